// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-message lifecycle bookkeeping.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};

use super::events::Offer;
use crate::frame::{BroadcastFrame, MessageId};

/// Lifecycle of a broadcast as seen by this node.
///
/// `Validating -> Active -> {Retracted, Expired}`; `Validating -> Rejected`.
/// Every state but `Active` is terminal apart from eventual purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    /// First copy received, trust checks in flight.
    Validating,
    Active,
    Retracted,
    Expired,
    /// Failed certificate checks.
    Rejected,
}

impl MessageState {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageState::Validating => "validating",
            MessageState::Active => "active",
            MessageState::Retracted => "retracted",
            MessageState::Expired => "expired",
            MessageState::Rejected => "rejected",
        }
    }

    /// Still circulating: duplicates should be associated with their relay.
    pub fn is_live(self) -> bool {
        matches!(self, MessageState::Validating | MessageState::Active)
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

#[derive(Debug, Clone)]
pub(crate) struct MessageEntry {
    pub frame: BroadcastFrame,
    pub origin: Origin,
    pub state: MessageState,
    /// The topic policy accepted this topic.
    pub candidate: bool,
    pub expires_at: DateTime<Utc>,
}

impl MessageEntry {
    pub fn new(
        frame: BroadcastFrame,
        origin: Origin,
        state: MessageState,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            frame,
            origin,
            state,
            candidate: false,
            expires_at,
        }
    }
}

#[derive(Default)]
pub(crate) struct MessageTable {
    entries: HashMap<MessageId, MessageEntry>,
    offers: HashMap<MessageId, Vec<Offer>>,
    /// Reply ids seen per broadcast.
    seen_replies: HashMap<MessageId, HashSet<MessageId>>,
}

impl MessageTable {
    /// Insert unless `id` is already tracked. Returns `true` if inserted.
    pub fn insert_if_absent(&mut self, id: MessageId, entry: MessageEntry) -> bool {
        match self.entries.entry(id) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    pub fn get(&self, id: &MessageId) -> Option<&MessageEntry> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &MessageId) -> Option<&mut MessageEntry> {
        self.entries.get_mut(id)
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<MessageEntry> {
        self.offers.remove(id);
        self.seen_replies.remove(id);
        self.entries.remove(id)
    }

    /// Move every live entry past its expiry to `Expired`.
    pub fn expire_due(&mut self, now: DateTime<Utc>) -> Vec<MessageId> {
        let mut expired = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            if entry.state.is_live() && now > entry.expires_at {
                entry.state = MessageState::Expired;
                expired.push(id.clone());
            }
        }
        expired
    }

    /// Drop terminal entries whose expiry is older than `cutoff` and return
    /// their ids. A frame that old fails the expiry check on arrival, so its
    /// tombstone is no longer needed for deduplication.
    pub fn purge_before(&mut self, cutoff: DateTime<Utc>) -> Vec<MessageId> {
        let stale: Vec<MessageId> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.state.is_live() && e.expires_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.remove(id);
        }
        stale
    }

    /// Own broadcasts still circulating.
    pub fn local_active(&self) -> Vec<(MessageId, BroadcastFrame)> {
        self.entries
            .iter()
            .filter(|(_, e)| e.origin == Origin::Local && e.state == MessageState::Active)
            .map(|(id, e)| (id.clone(), e.frame.clone()))
            .collect()
    }

    /// Returns `true` the first time `reply_id` is seen for `message_id`.
    pub fn record_reply(&mut self, message_id: &MessageId, reply_id: MessageId) -> bool {
        self.seen_replies
            .entry(message_id.clone())
            .or_default()
            .insert(reply_id)
    }

    /// Let `reply_id` be processed again.
    pub fn forget_reply(&mut self, message_id: &MessageId, reply_id: &MessageId) {
        if let Some(seen) = self.seen_replies.get_mut(message_id) {
            seen.remove(reply_id);
        }
    }

    pub fn add_offer(&mut self, offer: Offer) {
        self.offers
            .entry(offer.message_id.clone())
            .or_default()
            .push(offer);
    }

    pub fn offers(&self, id: &MessageId) -> Vec<Offer> {
        self.offers.get(id).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
