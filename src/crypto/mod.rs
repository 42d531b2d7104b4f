// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cryptographic primitives for the gossip node.
//!
//! Stateless helpers, no I/O:
//!
//! - `hash` - SHA-256 over an ordered sequence of byte strings (message ids,
//!   payment hashes)
//! - `sign_object` / `verify_object` - BIP-340 Schnorr over the SHA-256 of an
//!   object's canonical serialization
//! - `encrypt_object` / `decrypt_object` - ECDH + HKDF + ChaCha20-Poly1305
//! - `mnemonic` - BIP-39 key backup and restore
//! - `token` - signed, time-bound API tokens
//!
//! ## Canonical serialization
//!
//! Objects are serialized with `serde_json`. Struct fields are emitted in
//! declaration order and every map that takes part in a signature is a
//! `BTreeMap`, so the same logical object always produces the same bytes.

mod cipher;
mod keys;
pub mod mnemonic;
pub mod token;

use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use signature::{Signer, Verifier};

pub use cipher::{decrypt_object, encrypt_object};
pub use keys::{PrivateKey, PublicKey, Signature};
pub use mnemonic::{derive_key_from_mnemonic, generate_mnemonic};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid private key")]
    InvalidPrivateKey,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("malformed signature")]
    MalformedSignature,

    #[error("signing failed")]
    SigningFailed,

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("ciphertext is malformed")]
    MalformedCiphertext,

    /// Authentication tag mismatch: wrong key pair or tampered ciphertext.
    #[error("decryption failed")]
    DecryptionFailed,

    #[error("invalid mnemonic phrase")]
    InvalidMnemonic,
}

/// SHA-256 over the concatenation of `parts`, in order.
pub fn hash<I, B>(parts: I) -> [u8; 32]
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref());
    }
    hasher.finalize().into()
}

/// Deterministic serialization used for signing, hashing and encryption.
pub fn canonical_bytes<T: Serialize + ?Sized>(obj: &T) -> Result<Vec<u8>, CryptoError> {
    serde_json::to_vec(obj).map_err(|e| CryptoError::Serialization(e.to_string()))
}

pub(crate) fn from_canonical_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CryptoError> {
    serde_json::from_slice(bytes).map_err(|e| CryptoError::Serialization(e.to_string()))
}

/// Schnorr-sign the SHA-256 of `obj`'s canonical bytes.
pub fn sign_object<T: Serialize + ?Sized>(
    obj: &T,
    key: &PrivateKey,
) -> Result<Signature, CryptoError> {
    let digest = hash([canonical_bytes(obj)?]);
    let sig: k256::schnorr::Signature = key
        .signing_key()
        .try_sign(&digest)
        .map_err(|_| CryptoError::SigningFailed)?;
    Signature::from_bytes(&sig.to_bytes())
}

/// Returns `true` only if `signature` is `key`'s signature over `obj`.
pub fn verify_object<T: Serialize + ?Sized>(
    obj: &T,
    signature: &Signature,
    key: &PublicKey,
) -> bool {
    let Ok(bytes) = canonical_bytes(obj) else {
        return false;
    };
    let Ok(verifying_key) = key.verifying_key() else {
        return false;
    };
    let Ok(sig) = k256::schnorr::Signature::try_from(signature.as_bytes().as_slice()) else {
        return false;
    };
    verifying_key.verify(&hash([bytes]), &sig).is_ok()
}
