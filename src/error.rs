// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Node-level error taxonomy.
//!
//! | Kind | Variant | Handling |
//! |------|---------|----------|
//! | Protocol | [`NodeError::Protocol`] | frame dropped and logged, never fatal |
//! | Trust | [`NodeError::Trust`] | dependent action rejected, surfaced to caller |
//! | Payment | [`NodeError::Payment`] | relay gating rejection, surfaced to caller |
//! | Transport | [`NodeError::AllRelaysUnreachable`] | surfaced only when no relay took the frame |

use crate::certificate::TrustError;
use crate::crypto::CryptoError;
use crate::frame::{CodecError, MessageId};
use crate::payment::PaymentError;

/// Malformed, forged or stale frames.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("undecodable frame: {0}")]
    Codec(#[from] CodecError),

    #[error("frame signature does not verify")]
    InvalidSignature,

    #[error("frame expired")]
    Expired,

    #[error("frame created in the future")]
    FutureDated,

    #[error("retraction not signed by the originator of {0}")]
    ForeignRetraction(MessageId),

    #[error("reply message cannot be decrypted")]
    UndecryptableReply,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("trust rejection: {0}")]
    Trust(#[from] TrustError),

    #[error("payment rejection: {0}")]
    Payment(#[from] PaymentError),

    #[error("no relay accepted the frame")]
    AllRelaysUnreachable,

    #[error("operation cancelled before any relay accepted the frame")]
    Cancelled,

    #[error("unknown message {0}")]
    UnknownMessage(MessageId),

    #[error("message {0} was not broadcast by this node")]
    NotOriginator(MessageId),

    #[error("message {message_id} is {state}, expected {expected}")]
    InvalidState {
        message_id: MessageId,
        state: &'static str,
        expected: &'static str,
    },

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl NodeError {
    /// Short label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::Protocol(_) => "protocol",
            NodeError::Trust(_) => "trust",
            NodeError::Payment(_) => "payment",
            NodeError::AllRelaysUnreachable => "transport",
            NodeError::Cancelled => "cancelled",
            NodeError::UnknownMessage(_)
            | NodeError::NotOriginator(_)
            | NodeError::InvalidState { .. } => "state",
            NodeError::Crypto(_) => "crypto",
        }
    }
}

impl From<CodecError> for NodeError {
    fn from(e: CodecError) -> Self {
        NodeError::Protocol(ProtocolError::Codec(e))
    }
}
