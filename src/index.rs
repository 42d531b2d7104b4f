// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bidirectional relay ↔ item index.
//!
//! Records which relay connections have seen (or been sent) which items,
//! usually message ids. Both directions live behind one lock, so a pair is
//! either visible from both sides or from neither; there is no window where
//! the relay-keyed view and the item-keyed view disagree.
//!
//! `forget(relay)` is linearizable: every association made before it takes
//! the lock is removed, and an `associate` that runs after it simply creates
//! a new association.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::RwLock;

/// Opaque identifier of a relay connection.
pub type RelayKey = String;

#[derive(Debug)]
struct Views<T> {
    items_by_relay: HashMap<RelayKey, HashSet<T>>,
    relays_by_item: HashMap<T, HashSet<RelayKey>>,
}

impl<T> Default for Views<T> {
    fn default() -> Self {
        Self {
            items_by_relay: HashMap::new(),
            relays_by_item: HashMap::new(),
        }
    }
}

/// Concurrent many-to-many association between relay ids and items.
#[derive(Debug)]
pub struct DualIndex<T> {
    views: RwLock<Views<T>>,
}

impl<T> Default for DualIndex<T> {
    fn default() -> Self {
        Self {
            views: RwLock::new(Views::default()),
        }
    }
}

impl<T> DualIndex<T>
where
    T: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `relay` has `item`. Returns `true` if the pair is new.
    ///
    /// # Panics
    /// Panics if `relay` is empty.
    pub fn associate(&self, relay: &str, item: T) -> bool {
        assert!(!relay.is_empty(), "relay id must not be empty");
        let mut views = self.write();
        let added = views
            .items_by_relay
            .entry(relay.to_string())
            .or_default()
            .insert(item.clone());
        views
            .relays_by_item
            .entry(item)
            .or_default()
            .insert(relay.to_string());
        added
    }

    /// Remove one pair. Returns `true` if it existed.
    pub fn disassociate(&self, relay: &str, item: &T) -> bool {
        let mut views = self.write();
        let removed = match views.items_by_relay.get_mut(relay) {
            Some(items) => {
                let removed = items.remove(item);
                if items.is_empty() {
                    views.items_by_relay.remove(relay);
                }
                removed
            }
            None => false,
        };
        if let Some(relays) = views.relays_by_item.get_mut(item) {
            relays.remove(relay);
            if relays.is_empty() {
                views.relays_by_item.remove(item);
            }
        }
        removed
    }

    /// Drop every association of `relay`. Returns the items it had.
    pub fn forget(&self, relay: &str) -> Vec<T> {
        let mut views = self.write();
        let Some(items) = views.items_by_relay.remove(relay) else {
            return Vec::new();
        };
        for item in &items {
            if let Some(relays) = views.relays_by_item.get_mut(item) {
                relays.remove(relay);
                if relays.is_empty() {
                    views.relays_by_item.remove(item);
                }
            }
        }
        items.into_iter().collect()
    }

    /// Drop every association of `item`. Returns the relays that had it.
    pub fn forget_item(&self, item: &T) -> HashSet<RelayKey> {
        let mut views = self.write();
        let Some(relays) = views.relays_by_item.remove(item) else {
            return HashSet::new();
        };
        for relay in &relays {
            if let Some(items) = views.items_by_relay.get_mut(relay) {
                items.remove(item);
                if items.is_empty() {
                    views.items_by_relay.remove(relay);
                }
            }
        }
        relays
    }

    pub fn has_association(&self, relay: &str, item: &T) -> bool {
        self.read()
            .items_by_relay
            .get(relay)
            .is_some_and(|items| items.contains(item))
    }

    /// Snapshot of the relays associated with `item`.
    pub fn relays_for(&self, item: &T) -> HashSet<RelayKey> {
        self.read()
            .relays_by_item
            .get(item)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of the items associated with `relay`.
    pub fn items_for(&self, relay: &str) -> HashSet<T> {
        self.read()
            .items_by_relay
            .get(relay)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_known(&self, item: &T) -> bool {
        self.read().relays_by_item.contains_key(item)
    }

    /// Number of (relay, item) pairs.
    pub fn len(&self) -> usize {
        self.read().items_by_relay.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.read().items_by_relay.is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Views<T>> {
        // Every mutation leaves both views consistent before it can panic,
        // so a poisoned lock still guards valid data.
        self.views.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Views<T>> {
        self.views.write().unwrap_or_else(|e| e.into_inner())
    }
}
