// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authenticated asymmetric encryption of structured objects.
//!
//! The sender's private key and the recipient's x-only public key agree on a
//! secp256k1 ECDH secret (x-coordinate, so the BIP-340 even-Y lift does not
//! matter). HKDF-SHA256 stretches it into a ChaCha20-Poly1305 key; both
//! public keys, sender first, are bound in as associated data. Only the two
//! parties can produce or open the ciphertext, and any other key pair fails
//! the tag check.
//!
//! Wire layout: `nonce (12) || ciphertext+tag`.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use k256::elliptic_curve::sec1::FromEncodedPoint;
use k256::{AffinePoint, EncodedPoint};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{de::DeserializeOwned, Serialize};
use sha2::Sha256;

use super::{canonical_bytes, from_canonical_bytes, CryptoError, PrivateKey, PublicKey};

const NONCE_LEN: usize = 12;
const KDF_INFO: &[u8] = b"gig-gossip-node/object-cipher/v1";

/// Encrypt `obj` from `sender` to `recipient`.
pub fn encrypt_object<T: Serialize + ?Sized>(
    obj: &T,
    sender: &PrivateKey,
    recipient: &PublicKey,
) -> Result<Vec<u8>, CryptoError> {
    let plaintext = canonical_bytes(obj)?;
    let cipher = cipher_for(sender, recipient)?;
    let aad = associated_data(&sender.public_key(), recipient);

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| CryptoError::Serialization("encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt a ciphertext produced by [`encrypt_object`].
///
/// Fails with [`CryptoError::DecryptionFailed`] when the key pair does not
/// match the one used for encryption.
pub fn decrypt_object<T: DeserializeOwned>(
    ciphertext: &[u8],
    recipient: &PrivateKey,
    sender: &PublicKey,
) -> Result<T, CryptoError> {
    if ciphertext.len() <= NONCE_LEN {
        return Err(CryptoError::MalformedCiphertext);
    }
    let (nonce, sealed) = ciphertext.split_at(NONCE_LEN);

    let cipher = cipher_for(recipient, sender)?;
    let aad = associated_data(sender, &recipient.public_key());

    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: sealed,
                aad: &aad,
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)?;

    from_canonical_bytes(&plaintext)
}

fn cipher_for(mine: &PrivateKey, theirs: &PublicKey) -> Result<ChaCha20Poly1305, CryptoError> {
    let mut sec1 = [0u8; 33];
    sec1[0] = 0x02;
    sec1[1..].copy_from_slice(theirs.as_bytes());
    let encoded = EncodedPoint::from_bytes(sec1).map_err(|_| CryptoError::InvalidPublicKey)?;
    let point: Option<AffinePoint> = AffinePoint::from_encoded_point(&encoded).into();
    let point = point.ok_or(CryptoError::InvalidPublicKey)?;

    let shared = k256::ecdh::diffie_hellman(mine.secret_scalar()?, point);

    let hk = Hkdf::<Sha256>::new(None, shared.raw_secret_bytes().as_slice());
    let mut key = [0u8; 32];
    hk.expand(KDF_INFO, &mut key)
        .map_err(|_| CryptoError::Serialization("key derivation failed".to_string()))?;

    Ok(ChaCha20Poly1305::new(Key::from_slice(&key)))
}

fn associated_data(sender: &PublicKey, recipient: &PublicKey) -> [u8; 64] {
    let mut aad = [0u8; 64];
    aad[..32].copy_from_slice(sender.as_bytes());
    aad[32..].copy_from_slice(recipient.as_bytes());
    aad
}
