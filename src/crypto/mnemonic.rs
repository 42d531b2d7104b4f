// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! BIP-39 backup and restore of node keys.
//!
//! The node key is the BIP-32 master key of the mnemonic's seed (empty
//! passphrase): `HMAC-SHA512("Bitcoin seed", seed)[..32]`. Same words, same
//! key, on every platform.

use bip39::{Language, Mnemonic, MnemonicType, Seed};
use hmac::{Hmac, Mac};
use sha2::Sha512;

use super::{CryptoError, PrivateKey};

type HmacSha512 = Hmac<Sha512>;

const MASTER_KEY_DOMAIN: &[u8] = b"Bitcoin seed";

/// Generate a fresh 12-word English mnemonic.
pub fn generate_mnemonic() -> String {
    Mnemonic::new(MnemonicType::Words12, Language::English)
        .phrase()
        .to_string()
}

/// Deterministically derive the node key from a mnemonic phrase.
pub fn derive_key_from_mnemonic(phrase: &str) -> Result<PrivateKey, CryptoError> {
    let normalized = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
    let mnemonic = Mnemonic::from_phrase(&normalized, Language::English)
        .map_err(|_| CryptoError::InvalidMnemonic)?;
    let seed = Seed::new(&mnemonic, "");

    let mut mac =
        HmacSha512::new_from_slice(MASTER_KEY_DOMAIN).map_err(|_| CryptoError::InvalidMnemonic)?;
    mac.update(seed.as_bytes());
    let out = mac.finalize().into_bytes();

    PrivateKey::from_bytes(&out[..32])
}
