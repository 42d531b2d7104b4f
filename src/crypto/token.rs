// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signed, time-bound API tokens.
//!
//! Wallet and settler calls are authorized with a token the caller mints
//! itself instead of a static credential: its public key, the current time
//! and a random nonce, Schnorr-signed with its private key. The service
//! checks the signature and that the timestamp is within its freshness
//! window.
//!
//! Encoding: canonical JSON of [`TimedToken`], then base64.

use std::time::Duration;

use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    canonical_bytes, from_canonical_bytes, sign_object, verify_object, CryptoError, PrivateKey,
    PublicKey, Signature,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,

    #[error("token is stale")]
    Stale,

    #[error("token is dated in the future")]
    FromTheFuture,

    #[error("token signature is invalid")]
    BadSignature,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedToken {
    pub public_key: PublicKey,
    pub timestamp: DateTime<Utc>,
    pub nonce: Uuid,
    pub signature: Option<Signature>,
}

impl TimedToken {
    fn unsigned(&self) -> TimedToken {
        TimedToken {
            signature: None,
            ..self.clone()
        }
    }
}

/// Mint a token for `key` dated `now`.
pub fn make_timed_token(key: &PrivateKey, now: DateTime<Utc>) -> Result<String, CryptoError> {
    let mut token = TimedToken {
        public_key: key.public_key(),
        timestamp: now,
        nonce: Uuid::new_v4(),
        signature: None,
    };
    token.signature = Some(sign_object(&token, key)?);
    Ok(Base64::encode_string(&canonical_bytes(&token)?))
}

/// Check a token minted by [`make_timed_token`].
///
/// Accepts tokens no older than `max_age` and no further than `max_age` in
/// the future (clock skew between caller and service).
pub fn verify_timed_token(
    encoded: &str,
    max_age: Duration,
    now: DateTime<Utc>,
) -> Result<TimedToken, TokenError> {
    let bytes = Base64::decode_vec(encoded.trim()).map_err(|_| TokenError::Malformed)?;
    let token: TimedToken = from_canonical_bytes(&bytes).map_err(|_| TokenError::Malformed)?;

    let max_age = chrono::Duration::from_std(max_age).map_err(|_| TokenError::Malformed)?;
    if now - token.timestamp > max_age {
        return Err(TokenError::Stale);
    }
    if token.timestamp - now > max_age {
        return Err(TokenError::FromTheFuture);
    }

    let signature = token.signature.ok_or(TokenError::BadSignature)?;
    if !verify_object(&token.unsigned(), &signature, &token.public_key) {
        return Err(TokenError::BadSignature);
    }
    Ok(token)
}
