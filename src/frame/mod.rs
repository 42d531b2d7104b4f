// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Gossip frames.
//!
//! Three frame kinds travel over relays: a signed topic broadcast, a signed
//! reply to a broadcast, and a signed retraction of a broadcast. Each is
//! signed over every field except its signature, with a kind tag mixed into
//! the signed body so a signature for one kind never verifies as another.
//!
//! A broadcast's [`MessageId`] is the hash of its signed content, so every
//! node derives the same id for the same frame.

pub mod codec;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::certificate::Certificate;
use crate::crypto::{
    canonical_bytes, decrypt_object, encrypt_object, hash, sign_object, verify_object,
    CryptoError, PrivateKey, PublicKey, Signature,
};
use crate::topic::Topic;

pub use codec::{decode, encode, CodecError};

const BROADCAST_ID_DOMAIN: &[u8] = b"gig-gossip-node/broadcast-id/v1";
const REPLY_ID_DOMAIN: &[u8] = b"gig-gossip-node/reply-id/v1";

/// Content hash identifying a broadcast (or a reply). Serialized as hex.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId([u8; 32]);

impl MessageId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(value: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(value.trim())
            .map_err(|e| CryptoError::Serialization(format!("invalid message id: {e}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::Serialization("message id must be 32 bytes".to_string()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({}..)", &self.to_hex()[..12])
    }
}

impl TryFrom<String> for MessageId {
    type Error = CryptoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.to_hex()
    }
}

/// A signed topic broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastFrame {
    pub topic: Topic,
    pub originator: PublicKey,
    /// Price the originator pays relays for carrying this frame.
    pub price: u64,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
    /// Required when `price` is above the certified-price threshold.
    pub certificate: Option<Certificate>,
    pub signature: Signature,
}

#[derive(Serialize)]
struct BroadcastBody<'a> {
    kind: &'static str,
    topic: &'a Topic,
    originator: &'a PublicKey,
    price: u64,
    created_at: &'a DateTime<Utc>,
    ttl_secs: u64,
    certificate: Option<&'a Certificate>,
}

impl BroadcastFrame {
    pub fn new_signed(
        topic: Topic,
        key: &PrivateKey,
        price: u64,
        created_at: DateTime<Utc>,
        ttl: Duration,
        certificate: Option<Certificate>,
    ) -> Result<Self, CryptoError> {
        let originator = key.public_key();
        let ttl_secs = ttl.as_secs();
        let signature = sign_object(
            &BroadcastBody {
                kind: "broadcast",
                topic: &topic,
                originator: &originator,
                price,
                created_at: &created_at,
                ttl_secs,
                certificate: certificate.as_ref(),
            },
            key,
        )?;
        Ok(Self {
            topic,
            originator,
            price,
            created_at,
            ttl_secs,
            certificate,
            signature,
        })
    }

    fn body(&self) -> BroadcastBody<'_> {
        BroadcastBody {
            kind: "broadcast",
            topic: &self.topic,
            originator: &self.originator,
            price: self.price,
            created_at: &self.created_at,
            ttl_secs: self.ttl_secs,
            certificate: self.certificate.as_ref(),
        }
    }

    /// `true` if the originator signed exactly this frame.
    pub fn verify(&self) -> bool {
        verify_object(&self.body(), &self.signature, &self.originator)
    }

    pub fn message_id(&self) -> Result<MessageId, CryptoError> {
        let body = canonical_bytes(&self.body())?;
        Ok(MessageId(hash([
            BROADCAST_ID_DOMAIN,
            body.as_slice(),
            self.signature.as_bytes(),
        ])))
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Expiry with the claimed TTL capped at `max_ttl`.
    pub fn expires_within(&self, max_ttl: Duration) -> DateTime<Utc> {
        let cap = chrono::Duration::from_std(max_ttl)
            .ok()
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.expires_at().min(cap)
    }

    /// Valid up to and including `created_at + ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    /// Created later than `now` allows, even granting `skew`.
    pub fn is_future_dated(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        match chrono::Duration::from_std(skew)
            .ok()
            .and_then(|skew| now.checked_add_signed(skew))
        {
            Some(limit) => self.created_at > limit,
            None => false,
        }
    }
}

/// What a responder offers in a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTerms {
    pub fee: u64,
    /// Invoice the originator pays to accept the offer.
    pub payment_request: Option<String>,
    pub valid_until: DateTime<Utc>,
}

/// Private part of a reply, readable only by the originator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyMessage {
    pub text: String,
    /// Relays where the responder can be reached directly.
    pub contact_relays: Vec<String>,
}

/// A signed reply to a broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyFrame {
    pub message_id: MessageId,
    pub responder: PublicKey,
    pub terms: ReplyTerms,
    /// [`ReplyMessage`] encrypted from responder to originator.
    pub encrypted_message: Vec<u8>,
    pub certificate: Option<Certificate>,
    pub signature: Signature,
}

#[derive(Serialize)]
struct ReplyBody<'a> {
    kind: &'static str,
    message_id: &'a MessageId,
    responder: &'a PublicKey,
    terms: &'a ReplyTerms,
    encrypted_message: String,
    certificate: Option<&'a Certificate>,
}

impl ReplyFrame {
    pub fn new_signed(
        message_id: MessageId,
        originator: &PublicKey,
        message: &ReplyMessage,
        terms: ReplyTerms,
        certificate: Option<Certificate>,
        key: &PrivateKey,
    ) -> Result<Self, CryptoError> {
        let mut frame = Self {
            message_id,
            responder: key.public_key(),
            terms,
            encrypted_message: encrypt_object(message, key, originator)?,
            certificate,
            signature: Signature::from_bytes(&[0u8; 64])?,
        };
        frame.signature = sign_object(&frame.body(), key)?;
        Ok(frame)
    }

    fn body(&self) -> ReplyBody<'_> {
        ReplyBody {
            kind: "reply",
            message_id: &self.message_id,
            responder: &self.responder,
            terms: &self.terms,
            encrypted_message: hex::encode(&self.encrypted_message),
            certificate: self.certificate.as_ref(),
        }
    }

    pub fn verify(&self) -> bool {
        verify_object(&self.body(), &self.signature, &self.responder)
    }

    /// Identity of this reply, for deduplication.
    pub fn reply_id(&self) -> Result<MessageId, CryptoError> {
        let body = canonical_bytes(&self.body())?;
        Ok(MessageId(hash([
            REPLY_ID_DOMAIN,
            body.as_slice(),
            self.signature.as_bytes(),
        ])))
    }

    /// Decrypt the private message. Only the originator's key succeeds.
    pub fn decrypt_message(&self, originator_key: &PrivateKey) -> Result<ReplyMessage, CryptoError> {
        decrypt_object(&self.encrypted_message, originator_key, &self.responder)
    }
}

/// The originator withdrawing a broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct RetractionFrame {
    pub message_id: MessageId,
    pub originator: PublicKey,
    pub retracted_at: DateTime<Utc>,
    pub signature: Signature,
}

#[derive(Serialize)]
struct RetractionBody<'a> {
    kind: &'static str,
    message_id: &'a MessageId,
    originator: &'a PublicKey,
    retracted_at: &'a DateTime<Utc>,
}

impl RetractionFrame {
    pub fn new_signed(
        message_id: MessageId,
        key: &PrivateKey,
        retracted_at: DateTime<Utc>,
    ) -> Result<Self, CryptoError> {
        let originator = key.public_key();
        let signature = sign_object(
            &RetractionBody {
                kind: "retraction",
                message_id: &message_id,
                originator: &originator,
                retracted_at: &retracted_at,
            },
            key,
        )?;
        Ok(Self {
            message_id,
            originator,
            retracted_at,
            signature,
        })
    }

    pub fn verify(&self) -> bool {
        let body = RetractionBody {
            kind: "retraction",
            message_id: &self.message_id,
            originator: &self.originator,
            retracted_at: &self.retracted_at,
        };
        verify_object(&body, &self.signature, &self.originator)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Broadcast(BroadcastFrame),
    Reply(ReplyFrame),
    Retraction(RetractionFrame),
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Broadcast(_) => "broadcast",
            Frame::Reply(_) => "reply",
            Frame::Retraction(_) => "retraction",
        }
    }
}
