// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process relays for simulations and tests.
//!
//! Every relay fans a published frame out to all other subscribed
//! connections, applying each subscriber's filter. Taking a relay offline
//! closes its connections and refuses new ones until it comes back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    RelayConnection, RelayConnector, RelayEndpoint, RelayId, SubscriptionFilter, TransportError,
};
use crate::frame::codec;

struct Subscriber {
    connection: u64,
    filter: SubscriptionFilter,
    inbox: mpsc::UnboundedSender<Vec<u8>>,
}

#[derive(Default)]
struct Relay {
    offline: bool,
    next_connection: u64,
    subscribers: Vec<Subscriber>,
    published: Vec<Vec<u8>>,
}

impl Relay {
    fn deliver(&mut self, from: Option<u64>, bytes: &[u8]) {
        let decoded = codec::decode(bytes).ok();
        self.subscribers.retain(|sub| {
            if Some(sub.connection) == from {
                return true;
            }
            // Relays do not parse what they cannot; undecodable frames pass.
            let wanted = decoded.as_ref().map_or(true, |f| sub.filter.matches(f));
            !wanted || sub.inbox.send(bytes.to_vec()).is_ok()
        });
    }
}

type Relays = Arc<Mutex<HashMap<RelayId, Relay>>>;

/// A set of in-process relays, addressed by relay id.
#[derive(Clone, Default)]
pub struct MemoryRelayNetwork {
    relays: Relays,
}

impl MemoryRelayNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames published on `relay`, oldest first.
    pub fn published(&self, relay: &RelayId) -> Vec<Vec<u8>> {
        self.lock()
            .get(relay)
            .map(|r| r.published.clone())
            .unwrap_or_default()
    }

    /// Deliver `bytes` to every subscriber of `relay`, as if another peer
    /// had published it.
    pub fn inject(&self, relay: &RelayId, bytes: Vec<u8>) {
        let mut relays = self.lock();
        let state = relays.entry(relay.clone()).or_default();
        state.published.push(bytes.clone());
        state.deliver(None, &bytes);
    }

    /// Taking a relay offline drops all of its connections.
    pub fn set_online(&self, relay: &RelayId, online: bool) {
        let mut relays = self.lock();
        let state = relays.entry(relay.clone()).or_default();
        state.offline = !online;
        if !online {
            state.subscribers.clear();
        }
    }

    /// Drop every connection to `relay` but keep it online.
    pub fn disconnect_all(&self, relay: &RelayId) {
        if let Some(state) = self.lock().get_mut(relay) {
            state.subscribers.clear();
        }
    }

    pub fn subscriber_count(&self, relay: &RelayId) -> usize {
        self.lock()
            .get(relay)
            .map_or(0, |r| r.subscribers.len())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RelayId, Relay>> {
        self.relays.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RelayConnector for MemoryRelayNetwork {
    async fn connect(
        &self,
        endpoint: &RelayEndpoint,
    ) -> Result<Box<dyn RelayConnection>, TransportError> {
        let relay = endpoint.id();
        let mut relays = self.lock();
        let state = relays.entry(relay.clone()).or_default();
        if state.offline {
            return Err(TransportError::ConnectFailed {
                relay,
                reason: "relay offline".to_string(),
            });
        }
        state.next_connection += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Box::new(MemoryConnection {
            relay,
            connection: state.next_connection,
            relays: Arc::clone(&self.relays),
            pending: Some(tx),
            inbox: rx,
        }))
    }
}

struct MemoryConnection {
    relay: RelayId,
    connection: u64,
    relays: Relays,
    /// Sender handed to the relay on subscribe.
    pending: Option<mpsc::UnboundedSender<Vec<u8>>>,
    inbox: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryConnection {
    fn lock(&self) -> MutexGuard<'_, HashMap<RelayId, Relay>> {
        self.relays.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RelayConnection for MemoryConnection {
    async fn subscribe(&mut self, filter: &SubscriptionFilter) -> Result<(), TransportError> {
        let inbox = self.pending.take().ok_or_else(|| TransportError::SendFailed {
            relay: self.relay.clone(),
            reason: "already subscribed".to_string(),
        })?;
        let connection = self.connection;
        let mut relays = self.lock();
        let state = relays.entry(self.relay.clone()).or_default();
        if state.offline {
            return Err(TransportError::NotConnected(self.relay.clone()));
        }
        state.subscribers.push(Subscriber {
            connection,
            filter: filter.clone(),
            inbox,
        });
        Ok(())
    }

    async fn publish(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let connection = self.connection;
        let mut relays = self.lock();
        let state = relays.entry(self.relay.clone()).or_default();
        let attached = state.subscribers.iter().any(|s| s.connection == connection);
        if state.offline || !attached {
            return Err(TransportError::SendFailed {
                relay: self.relay.clone(),
                reason: "connection closed".to_string(),
            });
        }
        state.published.push(frame.to_vec());
        state.deliver(Some(connection), frame);
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.inbox.recv().await
    }
}
