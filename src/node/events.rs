// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! What a node reports to its embedding application, and what its
//! operations return.

use crate::certificate::{Certificate, TrustError};
use crate::crypto::PublicKey;
use crate::frame::{MessageId, ReplyMessage, ReplyTerms};
use crate::payment::{PaymentError, PaymentHash};
use crate::topic::Topic;
use crate::transport::RelayId;

/// A validated, decrypted reply to one of our broadcasts.
#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    pub reply_id: MessageId,
    pub message_id: MessageId,
    pub responder: PublicKey,
    pub terms: ReplyTerms,
    pub message: ReplyMessage,
    pub certificate: Certificate,
    pub received_from: RelayId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// An inbound topic this node's policy accepted. Emitted once per message.
    TopicCandidate {
        message_id: MessageId,
        topic: Topic,
        originator: PublicKey,
        price: u64,
        relay: RelayId,
    },
    OfferReceived(Offer),
    /// A reply to one of our broadcasts failed certificate checks.
    ReplyRejected {
        message_id: MessageId,
        responder: PublicKey,
        reason: TrustError,
    },
    /// A candidate was withdrawn by its originator.
    TopicRetracted { message_id: MessageId },
    TopicExpired { message_id: MessageId },
}

/// Result of processing one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    /// First copy of a broadcast, now active.
    Accepted {
        message_id: MessageId,
        /// The topic policy accepted it.
        candidate: bool,
        relayed_to: Vec<RelayId>,
        /// Set when payment gating refused to relay it further.
        relay_refused: Option<PaymentError>,
    },
    /// Already known; only the relay association was recorded.
    Duplicate(MessageId),
    Retracted(MessageId),
    Offer(MessageId),
    /// Nothing to do, e.g. a reply to someone else's broadcast.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub message_id: MessageId,
    pub delivered: Vec<RelayId>,
    pub failed: Vec<RelayId>,
    /// Relays skipped because the caller cancelled mid fan-out.
    pub cancelled: Vec<RelayId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetractOutcome {
    pub notified: Vec<RelayId>,
    pub failed: Vec<RelayId>,
    /// Relays not reached before the retraction timeout.
    pub timed_out: Vec<RelayId>,
    /// Relays skipped because the caller cancelled mid fan-out.
    pub cancelled: Vec<RelayId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub relayed_to: Vec<RelayId>,
    /// The obligation held for carrying the frame, if it was priced and
    /// some relay took it.
    pub obligation: Option<PaymentHash>,
}
