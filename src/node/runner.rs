// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Event loop driving a node from transport events.
//!
//! Each relay gets its own lane: a task that processes that relay's events
//! strictly in arrival order. Lanes run concurrently, so a slow certificate
//! check on one relay's frame never holds up another relay. The loop itself
//! only routes events and runs the TTL sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::GossipNode;
use crate::error::NodeError;
use crate::transport::{RelayId, TransportEvent};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

type Lanes = HashMap<RelayId, mpsc::UnboundedSender<TransportEvent>>;

impl GossipNode {
    /// Process transport events until `shutdown` is cancelled or the
    /// transport goes away.
    ///
    /// Should be spawned as a background task:
    /// ```ignore
    /// tokio::spawn(node.clone().run(events, shutdown.clone()));
    /// ```
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<TransportEvent>,
        shutdown: CancellationToken,
    ) {
        let period = self.config.sweep_interval.max(MIN_SWEEP_INTERVAL);
        let mut sweep = tokio::time::interval(period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut lanes = Lanes::new();
        let mut workers = JoinSet::new();

        info!(
            parent: &self.span,
            sweep_interval_ms = period.as_millis() as u64,
            "gossip node running"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sweep.tick() => {
                    self.sweep_expired();
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        info!(parent: &self.span, "transport closed");
                        break;
                    };
                    self.route(&mut lanes, &mut workers, event);
                }
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = joined {
                        warn!(parent: &self.span, error = %e, "relay lane failed");
                    }
                }
            }
        }

        self.shutdown.cancel();
        drop(lanes);
        workers.shutdown().await;
        info!(parent: &self.span, "gossip node stopped");
    }

    fn route(self: &Arc<Self>, lanes: &mut Lanes, workers: &mut JoinSet<()>, event: TransportEvent) {
        let relay = event.relay().clone();
        if lanes.get(&relay).is_some_and(|lane| lane.is_closed()) {
            lanes.remove(&relay);
        }
        let lane = lanes.entry(relay.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            let span = tracing::debug_span!(parent: &self.span, "lane", relay = %relay);
            workers.spawn(Arc::clone(self).lane(rx).instrument(span));
            tx
        });
        if lane.send(event).is_err() {
            warn!(parent: &self.span, %relay, "relay lane closed, event dropped");
        }
    }

    async fn lane(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected(relay) => {
                    if let Err(e) = self.on_relay_connected(&relay, &self.shutdown).await {
                        self.log_failure(&relay, &e);
                    }
                }
                TransportEvent::Frame { relay, bytes } => {
                    if let Err(e) = self.handle_inbound(&relay, &bytes).await {
                        self.log_failure(&relay, &e);
                    }
                }
                TransportEvent::Disconnected(relay) => {
                    self.on_relay_disconnected(&relay);
                }
            }
        }
    }

    fn log_failure(&self, relay: &RelayId, error: &NodeError) {
        let kind = error.kind();
        match kind {
            "protocol" => debug!(parent: &self.span, %relay, kind, error = %error, "frame dropped"),
            "trust" | "payment" => {
                info!(parent: &self.span, %relay, kind, error = %error, "frame rejected")
            }
            _ => warn!(parent: &self.span, %relay, kind, error = %error, "frame handling failed"),
        }
    }
}
