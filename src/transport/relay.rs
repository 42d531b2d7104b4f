// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-relay connection workers.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument, Span};

use super::{
    BackoffPolicy, FramePublisher, RelayConnection, RelayConnector, RelayEndpoint, RelayId,
    SubscriptionFilter, TransportError, TransportEvent,
};

/// Capacity of the inbound event channel shared by all workers.
pub const DEFAULT_EVENT_BUFFER: usize = 1_024;

/// Outbound publishes queued per relay before callers wait.
const COMMAND_BUFFER: usize = 64;

struct Publish {
    frame: Arc<[u8]>,
    ack: oneshot::Sender<Result<(), TransportError>>,
}

type ConnectedSet = Arc<RwLock<HashSet<RelayId>>>;

/// Handle to the relay workers. Dropping it stops them.
pub struct RelayTransport {
    relays: HashMap<RelayId, mpsc::Sender<Publish>>,
    connected: ConnectedSet,
}

impl RelayTransport {
    /// Spawn one worker per endpoint. Inbound frames and connection changes
    /// arrive on the returned receiver, in order per relay.
    pub fn start(
        connector: Arc<dyn RelayConnector>,
        endpoints: &[RelayEndpoint],
        filter: SubscriptionFilter,
        backoff: BackoffPolicy,
        shutdown: CancellationToken,
        span: Span,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(DEFAULT_EVENT_BUFFER);
        let connected: ConnectedSet = Arc::new(RwLock::new(HashSet::new()));
        let mut relays = HashMap::new();

        for endpoint in endpoints {
            let relay = endpoint.id();
            if relays.contains_key(&relay) {
                continue;
            }
            let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
            let worker = RelayWorker {
                relay: relay.clone(),
                endpoint: endpoint.clone(),
                connector: Arc::clone(&connector),
                filter: filter.clone(),
                backoff,
                commands: commands_rx,
                events: events_tx.clone(),
                connected: Arc::clone(&connected),
                shutdown: shutdown.clone(),
            };
            let worker_span = tracing::info_span!(parent: &span, "relay", relay = %relay);
            tokio::spawn(worker.run().instrument(worker_span));
            relays.insert(relay, commands_tx);
        }

        (Self { relays, connected }, events_rx)
    }

    /// Every configured relay, connected or not.
    pub fn relay_ids(&self) -> Vec<RelayId> {
        let mut ids: Vec<_> = self.relays.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn is_connected(&self, relay: &RelayId) -> bool {
        self.connected
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(relay)
    }
}

#[async_trait]
impl FramePublisher for RelayTransport {
    fn connected_relays(&self) -> Vec<RelayId> {
        let mut ids: Vec<_> = self
            .connected
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    async fn publish(&self, relay: &RelayId, frame: Arc<[u8]>) -> Result<(), TransportError> {
        let commands = self
            .relays
            .get(relay)
            .ok_or_else(|| TransportError::UnknownRelay(relay.clone()))?;
        if !self.is_connected(relay) {
            return Err(TransportError::NotConnected(relay.clone()));
        }
        let (ack, done) = oneshot::channel();
        commands
            .send(Publish { frame, ack })
            .await
            .map_err(|_| TransportError::ShutDown)?;
        done.await.map_err(|_| TransportError::ShutDown)?
    }
}

struct RelayWorker {
    relay: RelayId,
    endpoint: RelayEndpoint,
    connector: Arc<dyn RelayConnector>,
    filter: SubscriptionFilter,
    backoff: BackoffPolicy,
    commands: mpsc::Receiver<Publish>,
    events: mpsc::Sender<TransportEvent>,
    connected: ConnectedSet,
    shutdown: CancellationToken,
}

/// Why a connection ended.
enum Ended {
    /// Connection lost; reconnect.
    Lost,
    /// Shutdown requested or the transport handle was dropped.
    Stop,
}

impl RelayWorker {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        loop {
            let connecting = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.connector.connect(&self.endpoint) => result,
            };

            match connecting {
                Ok(mut connection) => match connection.subscribe(&self.filter).await {
                    Ok(()) => {
                        attempt = 0;
                        if let Ended::Stop = self.serve(connection.as_mut()).await {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "subscribe failed"),
                },
                Err(e) => warn!(error = %e, attempt, "connect failed"),
            }

            let delay = self.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            debug!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");
            if let Ended::Stop = self.wait(delay).await {
                break;
            }
        }
        self.set_connected(false);
        debug!("relay worker stopped");
    }

    async fn serve(&mut self, connection: &mut dyn RelayConnection) -> Ended {
        self.set_connected(true);
        info!("relay connected");
        if self.events.send(TransportEvent::Connected(self.relay.clone())).await.is_err() {
            return Ended::Stop;
        }

        let ended = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break Ended::Stop,
                command = self.commands.recv() => {
                    let Some(Publish { frame, ack }) = command else {
                        break Ended::Stop;
                    };
                    let result = connection.publish(&frame).await;
                    let failed = result.is_err();
                    // The publisher may have given up waiting.
                    let _ = ack.send(result);
                    if failed {
                        break Ended::Lost;
                    }
                }
                inbound = connection.next_frame() => {
                    let Some(bytes) = inbound else {
                        break Ended::Lost;
                    };
                    let event = TransportEvent::Frame { relay: self.relay.clone(), bytes };
                    if self.events.send(event).await.is_err() {
                        break Ended::Stop;
                    }
                }
            }
        };

        self.set_connected(false);
        info!("relay disconnected");
        let _ = self
            .events
            .send(TransportEvent::Disconnected(self.relay.clone()))
            .await;
        ended
    }

    /// Sleep out a backoff delay, refusing publishes meanwhile.
    async fn wait(&mut self, delay: std::time::Duration) -> Ended {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ended::Stop,
                _ = &mut sleep => return Ended::Lost,
                command = self.commands.recv() => match command {
                    Some(Publish { ack, .. }) => {
                        let _ = ack.send(Err(TransportError::NotConnected(self.relay.clone())));
                    }
                    None => return Ended::Stop,
                },
            }
        }
    }

    fn set_connected(&self, connected: bool) {
        let mut set = self.connected.write().unwrap_or_else(|e| e.into_inner());
        if connected {
            set.insert(self.relay.clone());
        } else {
            set.remove(&self.relay);
        }
    }
}
