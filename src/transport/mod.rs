// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relay transport.
//!
//! A node keeps one long-lived connection per configured relay. Each
//! connection is owned by its own worker task ([`RelayTransport`]) that
//! subscribes with the node's [`SubscriptionFilter`], forwards inbound frames
//! as [`TransportEvent`]s, serializes outbound publishes, and reconnects with
//! exponential backoff. A slow or dead relay never blocks the others.
//!
//! The concrete wire protocol sits behind [`RelayConnector`] and
//! [`RelayConnection`]; [`MemoryRelayNetwork`] implements both in process.

mod memory;
mod relay;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

use crate::frame::Frame;

pub use memory::MemoryRelayNetwork;
pub use relay::{RelayTransport, DEFAULT_EVENT_BUFFER};

/// Stable identifier of a relay connection: its normalized URL.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelayId(String);

impl RelayId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelayId({})", self.0)
    }
}

impl From<&str> for RelayId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RelayId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEndpoint {
    url: Url,
}

impl RelayEndpoint {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn id(&self) -> RelayId {
        RelayId(self.url.as_str().to_string())
    }
}

/// Reconnect delays: `min`, doubling per failed attempt, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub min: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(250),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.min.saturating_mul(factor).min(self.max)
    }
}

/// Which frames a node subscribes to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    /// Frame kinds to receive. Empty means all.
    pub kinds: Vec<String>,
    /// Drop broadcasts and retractions dated before this.
    pub since: Option<DateTime<Utc>>,
}

impl SubscriptionFilter {
    pub fn matches(&self, frame: &Frame) -> bool {
        if !self.kinds.is_empty() && !self.kinds.iter().any(|k| k == frame.kind()) {
            return false;
        }
        let dated = match frame {
            Frame::Broadcast(b) => Some(b.created_at),
            Frame::Retraction(r) => Some(r.retracted_at),
            Frame::Reply(_) => None,
        };
        match (self.since, dated) {
            (Some(since), Some(at)) => at >= since,
            _ => true,
        }
    }
}

/// Something a relay worker reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected(RelayId),
    Frame { relay: RelayId, bytes: Vec<u8> },
    Disconnected(RelayId),
}

impl TransportEvent {
    pub fn relay(&self) -> &RelayId {
        match self {
            TransportEvent::Connected(relay)
            | TransportEvent::Frame { relay, .. }
            | TransportEvent::Disconnected(relay) => relay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("relay {0} is not connected")]
    NotConnected(RelayId),

    #[error("relay {0} is not configured")]
    UnknownRelay(RelayId),

    #[error("connecting to relay {relay} failed: {reason}")]
    ConnectFailed { relay: RelayId, reason: String },

    #[error("sending to relay {relay} failed: {reason}")]
    SendFailed { relay: RelayId, reason: String },

    #[error("transport shut down")]
    ShutDown,
}

#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &RelayEndpoint,
    ) -> Result<Box<dyn RelayConnection>, TransportError>;
}

/// One open relay connection.
#[async_trait]
pub trait RelayConnection: Send {
    async fn subscribe(&mut self, filter: &SubscriptionFilter) -> Result<(), TransportError>;

    async fn publish(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Next inbound frame, `None` once the connection is closed.
    ///
    /// Must be cancel-safe: dropping the future loses no frame.
    async fn next_frame(&mut self) -> Option<Vec<u8>>;
}

/// Outbound side of the transport as seen by a node.
#[async_trait]
pub trait FramePublisher: Send + Sync {
    fn connected_relays(&self) -> Vec<RelayId>;

    /// Publish on one relay. `Ok` means the relay accepted the frame.
    async fn publish(&self, relay: &RelayId, frame: Arc<[u8]>) -> Result<(), TransportError>;
}
