// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Hash-lock proofs: a payment is settled by revealing the preimage of its
//! payment hash.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::crypto::{hash, CryptoError};

/// SHA-256 of a [`Preimage`]. Serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaymentHash([u8; 32]);

impl PaymentHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(value: &str) -> Result<Self, CryptoError> {
        decode_32(value).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentHash({})", self.to_hex())
    }
}

impl TryFrom<String> for PaymentHash {
    type Error = CryptoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<PaymentHash> for String {
    fn from(h: PaymentHash) -> Self {
        h.to_hex()
    }
}

/// 32 random bytes whose hash locks a payment.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Preimage([u8; 32]);

impl Preimage {
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(value: &str) -> Result<Self, CryptoError> {
        decode_32(value).map(Self)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn payment_hash(&self) -> PaymentHash {
        PaymentHash(hash([self.0]))
    }

    /// `true` if this preimage unlocks `payment_hash`.
    pub fn unlocks(&self, payment_hash: &PaymentHash) -> bool {
        self.payment_hash() == *payment_hash
    }
}

impl fmt::Debug for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Preimage(..)")
    }
}

impl TryFrom<String> for Preimage {
    type Error = CryptoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<Preimage> for String {
    fn from(p: Preimage) -> Self {
        p.to_hex()
    }
}

fn decode_32(value: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = hex::decode(value.trim())
        .map_err(|e| CryptoError::Serialization(format!("invalid hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::Serialization("expected 32 bytes".to_string()))
}
