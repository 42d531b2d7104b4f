// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::*;
use crate::certificate::tests::driver_attributes;
use crate::certificate::CertificateAuthority;
use crate::clock::ManualClock;
use crate::frame::tests::ride_topic;
use crate::payment::PaymentError;
use crate::settler::InMemorySettler;
use crate::transport::{
    BackoffPolicy, MemoryRelayNetwork, RelayEndpoint, RelayTransport, SubscriptionFilter,
};
use crate::wallet::InMemoryWallet;

fn relay(name: &str) -> RelayId {
    RelayId::from(format!("wss://{name}.example/"))
}

#[derive(Default)]
struct PublisherState {
    connected: Vec<RelayId>,
    failing: HashSet<RelayId>,
    hanging: HashSet<RelayId>,
    sent: Vec<(RelayId, Vec<u8>)>,
}

/// Records every publish; relays can be made to fail or never answer.
#[derive(Default)]
struct RecordingPublisher {
    state: Mutex<PublisherState>,
}

impl RecordingPublisher {
    fn connect(&self, name: &str) -> RelayId {
        let id = relay(name);
        self.state().connected.push(id.clone());
        id
    }

    fn disconnect(&self, relay: &RelayId) {
        self.state().connected.retain(|r| r != relay);
    }

    fn fail(&self, relay: &RelayId) {
        self.state().failing.insert(relay.clone());
    }

    fn hang(&self, relay: &RelayId) {
        self.state().hanging.insert(relay.clone());
    }

    fn frames_to(&self, relay: &RelayId) -> Vec<Frame> {
        self.state()
            .sent
            .iter()
            .filter(|(r, _)| r == relay)
            .map(|(_, bytes)| decode(bytes).unwrap())
            .collect()
    }

    fn last_bytes(&self) -> Vec<u8> {
        self.state().sent.last().unwrap().1.clone()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, PublisherState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl FramePublisher for RecordingPublisher {
    fn connected_relays(&self) -> Vec<RelayId> {
        self.state().connected.clone()
    }

    async fn publish(&self, relay: &RelayId, frame: Arc<[u8]>) -> Result<(), TransportError> {
        let hang = {
            let mut state = self.state();
            if !state.connected.contains(relay) {
                return Err(TransportError::NotConnected(relay.clone()));
            }
            if state.failing.contains(relay) {
                return Err(TransportError::SendFailed {
                    relay: relay.clone(),
                    reason: "refused".to_string(),
                });
            }
            if state.hanging.contains(relay) {
                true
            } else {
                state.sent.push((relay.clone(), frame.to_vec()));
                false
            }
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Accept-all policy that counts its invocations.
#[derive(Default)]
struct CountingPolicy {
    calls: AtomicUsize,
}

impl CountingPolicy {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TopicPolicy for CountingPolicy {
    fn accept(&self, _topic: &Topic, _now: DateTime<Utc>) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// Shared settler, wallet and clock.
struct World {
    clock: Arc<ManualClock>,
    settler: Arc<InMemorySettler>,
    wallet: Arc<InMemoryWallet>,
}

struct TestNode {
    node: Arc<GossipNode>,
    events: mpsc::UnboundedReceiver<NodeEvent>,
    publisher: Arc<RecordingPublisher>,
    policy: Arc<CountingPolicy>,
}

impl World {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let settler = Arc::new(InMemorySettler::new(
            CertificateAuthority::new(
                Url::parse("https://settler.example/").unwrap(),
                PrivateKey::generate(),
            ),
            clock.clone(),
        ));
        let wallet = Arc::new(InMemoryWallet::new(clock.clone(), Duration::from_secs(60)));
        Self {
            clock,
            settler,
            wallet,
        }
    }

    fn services(
        &self,
        key: &PrivateKey,
        config: &NodeConfig,
        publisher: Arc<dyn FramePublisher>,
        policy: Arc<dyn TopicPolicy>,
    ) -> NodeServices {
        let certificates = CertificateAuthorityClient::new(
            self.settler.clone(),
            self.clock.clone(),
            config.cert_cache_ttl,
            config.cert_max_staleness,
            Span::none(),
        )
        .trust(self.settler.service_uri().clone(), self.settler.public_key());
        let payments = PaymentGateway::new(
            self.wallet.clone(),
            self.settler.clone(),
            key.clone(),
            self.clock.clone(),
            config.max_relay_price,
            Span::none(),
        );
        NodeServices {
            certificates: Arc::new(certificates),
            payments: Arc::new(payments),
            publisher,
            policy,
            clock: self.clock.clone(),
        }
    }

    fn node(&self, config: NodeConfig) -> TestNode {
        let key = PrivateKey::generate();
        let publisher = Arc::new(RecordingPublisher::default());
        let policy = Arc::new(CountingPolicy::default());
        let services = self.services(&key, &config, publisher.clone(), policy.clone());
        let (node, events) = GossipNode::new(key, config, services, Span::none());
        TestNode {
            node,
            events,
            publisher,
            policy,
        }
    }

    fn certify(&self, node: &GossipNode) -> Certificate {
        let cert = self
            .settler
            .issue_for(node.public_key(), driver_attributes())
            .unwrap();
        node.set_certificate(cert.clone());
        cert
    }

    /// A broadcast from some other node, encoded for the wire.
    fn remote_broadcast(
        &self,
        key: &PrivateKey,
        price: u64,
        ttl: Duration,
        certificate: Option<Certificate>,
    ) -> (MessageId, Vec<u8>) {
        let now = self.clock.now();
        let frame =
            BroadcastFrame::new_signed(ride_topic(now), key, price, now, ttl, certificate).unwrap();
        let id = frame.message_id().unwrap();
        (id, encode(&Frame::Broadcast(frame)).unwrap())
    }
}

fn config() -> NodeConfig {
    NodeConfig {
        broadcast_ttl: Duration::from_secs(600),
        ..NodeConfig::default()
    }
}

const HOUR: Duration = Duration::from_secs(3_600);

fn drain(events: &mut mpsc::UnboundedReceiver<NodeEvent>) -> Vec<NodeEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn relay_set(relays: &[&RelayId]) -> HashSet<String> {
    relays.iter().map(|r| r.as_str().to_string()).collect()
}

#[tokio::test]
async fn broadcast_associates_only_confirmed_sends() {
    let world = World::new();
    let t = world.node(config());
    let a = t.publisher.connect("relay-a");
    let b = t.publisher.connect("relay-b");
    let c = t.publisher.connect("relay-c");
    t.publisher.fail(&c);

    let now = world.clock.now();
    let outcome = t
        .node
        .broadcast(ride_topic(now), 10, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.delivered, vec![a.clone(), b.clone()]);
    assert_eq!(outcome.failed, vec![c.clone()]);
    assert_eq!(t.node.index().relays_for(&outcome.message_id), relay_set(&[&a, &b]));
    assert_eq!(
        t.node.message_state(&outcome.message_id),
        Some(MessageState::Active)
    );

    let frames = t.publisher.frames_to(&a);
    let Frame::Broadcast(sent) = &frames[0] else {
        panic!("expected a broadcast");
    };
    assert!(sent.verify());
    assert_eq!(sent.message_id().unwrap(), outcome.message_id);
}

#[tokio::test]
async fn broadcast_with_no_reachable_relay_fails() {
    let world = World::new();
    let t = world.node(config());
    let now = world.clock.now();

    assert!(matches!(
        t.node
            .broadcast(ride_topic(now), 1, &CancellationToken::new())
            .await,
        Err(NodeError::AllRelaysUnreachable)
    ));

    let a = t.publisher.connect("relay-a");
    t.publisher.fail(&a);
    assert!(matches!(
        t.node
            .broadcast(ride_topic(now), 1, &CancellationToken::new())
            .await,
        Err(NodeError::AllRelaysUnreachable)
    ));
    assert!(t.node.index().is_empty());
}

#[tokio::test]
async fn cancelled_broadcast_keeps_only_confirmed_associations() {
    let world = World::new();
    let t = world.node(config());
    let a = t.publisher.connect("relay-a");
    let b = t.publisher.connect("relay-b");
    let c = t.publisher.connect("relay-c");
    t.publisher.hang(&b);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = t
        .node
        .broadcast(ride_topic(world.clock.now()), 1, &cancel)
        .await
        .unwrap();
    assert_eq!(outcome.delivered, vec![a.clone()]);
    assert_eq!(outcome.cancelled, vec![b, c]);
    assert_eq!(t.node.index().relays_for(&outcome.message_id), relay_set(&[&a]));

    let already = CancellationToken::new();
    already.cancel();
    assert!(matches!(
        t.node
            .broadcast(ride_topic(world.clock.now()), 1, &already)
            .await,
        Err(NodeError::Cancelled)
    ));
}

#[tokio::test]
async fn priced_broadcast_needs_a_valid_own_certificate() {
    let world = World::new();
    let t = world.node(NodeConfig {
        certified_price_threshold: 500,
        ..config()
    });
    t.publisher.connect("relay-a");
    let now = world.clock.now();
    let cancel = CancellationToken::new();

    assert!(matches!(
        t.node.broadcast(ride_topic(now), 600, &cancel).await,
        Err(NodeError::Trust(TrustError::MissingCertificate))
    ));

    let revoked = world.certify(&t.node);
    world.settler.revoke(revoked.id);
    assert!(matches!(
        t.node.broadcast(ride_topic(now), 600, &cancel).await,
        Err(NodeError::Trust(TrustError::Revoked))
    ));

    world.certify(&t.node);
    let outcome = t.node.broadcast(ride_topic(now), 600, &cancel).await.unwrap();
    assert_eq!(outcome.delivered.len(), 1);

    // Below the threshold no certificate is consulted.
    assert!(t.node.broadcast(ride_topic(now), 500, &cancel).await.is_ok());
}

#[tokio::test]
async fn duplicate_delivery_is_processed_once() {
    let world = World::new();
    let mut t = world.node(config());
    let (id, bytes) = world.remote_broadcast(&PrivateKey::generate(), 0, HOUR, None);
    let a = relay("relay-a");
    let b = relay("relay-b");

    let first = t.node.handle_inbound(&a, &bytes).await.unwrap();
    assert!(matches!(first, InboundOutcome::Accepted { candidate: true, .. }));
    assert_eq!(
        t.node.handle_inbound(&b, &bytes).await.unwrap(),
        InboundOutcome::Duplicate(id.clone())
    );
    assert_eq!(
        t.node.handle_inbound(&a, &bytes).await.unwrap(),
        InboundOutcome::Duplicate(id.clone())
    );

    assert_eq!(t.policy.calls(), 1);
    assert_eq!(t.node.index().relays_for(&id), relay_set(&[&a, &b]));
    assert_eq!(t.node.index().items_for(a.as_str()).len(), 1);

    let events = drain(&mut t.events);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], NodeEvent::TopicCandidate { message_id, .. } if *message_id == id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_invoke_policy_once() {
    let world = World::new();
    let t = world.node(config());
    let (id, bytes) = world.remote_broadcast(&PrivateKey::generate(), 0, HOUR, None);
    let bytes = Arc::new(bytes);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let node = Arc::clone(&t.node);
            let bytes = Arc::clone(&bytes);
            tokio::spawn(async move { node.handle_inbound(&relay(&format!("r{i}")), &bytes).await })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            InboundOutcome::Accepted { .. } => accepted += 1,
            InboundOutcome::Duplicate(dup) => assert_eq!(dup, id),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(t.policy.calls(), 1);
    assert_eq!(t.node.index().relays_for(&id).len(), 8);
}

#[tokio::test]
async fn broadcast_expires_after_ttl_and_releases_index() {
    let world = World::new();
    let t = world.node(NodeConfig {
        broadcast_ttl: Duration::from_secs(2),
        ..config()
    });
    t.publisher.connect("relay-a");
    t.publisher.connect("relay-b");

    let outcome = t
        .node
        .broadcast(ride_topic(world.clock.now()), 1, &CancellationToken::new())
        .await
        .unwrap();
    assert!(t.node.sweep_expired().is_empty());

    world.clock.advance(Duration::from_secs(3));
    assert_eq!(t.node.sweep_expired(), vec![outcome.message_id.clone()]);
    assert_eq!(
        t.node.message_state(&outcome.message_id),
        Some(MessageState::Expired)
    );
    assert!(t.node.index().relays_for(&outcome.message_id).is_empty());
    assert!(t.node.index().is_empty());
}

#[tokio::test]
async fn expired_candidate_is_reported_then_purged() {
    let world = World::new();
    let mut t = world.node(config());
    let (id, bytes) =
        world.remote_broadcast(&PrivateKey::generate(), 0, Duration::from_secs(5), None);
    t.node.handle_inbound(&relay("relay-a"), &bytes).await.unwrap();
    drain(&mut t.events);

    world.clock.advance(Duration::from_secs(6));
    assert_eq!(t.node.sweep_expired(), vec![id.clone()]);
    assert_eq!(
        drain(&mut t.events),
        vec![NodeEvent::TopicExpired {
            message_id: id.clone()
        }]
    );

    // Late copies of an expired message are still recognised.
    assert_eq!(
        t.node.handle_inbound(&relay("relay-b"), &bytes).await.unwrap(),
        InboundOutcome::Duplicate(id.clone())
    );
    assert!(t.node.index().is_empty());

    world.clock.advance(Duration::from_secs(2 * 3_600));
    t.node.sweep_expired();
    assert_eq!(t.node.message_state(&id), None);
}

#[tokio::test]
async fn expired_inbound_frame_is_dropped() {
    let world = World::new();
    let t = world.node(config());
    let (id, bytes) =
        world.remote_broadcast(&PrivateKey::generate(), 0, Duration::from_secs(2), None);
    world.clock.advance(Duration::from_secs(10));

    assert!(matches!(
        t.node.handle_inbound(&relay("relay-a"), &bytes).await,
        Err(NodeError::Protocol(ProtocolError::Expired))
    ));
    assert_eq!(t.node.message_state(&id), None);
    assert_eq!(t.policy.calls(), 0);
}

#[tokio::test]
async fn inbound_frame_is_live_through_its_last_second() {
    let world = World::new();
    let t = world.node(config());
    let (id, bytes) =
        world.remote_broadcast(&PrivateKey::generate(), 0, Duration::from_secs(5), None);
    world.clock.advance(Duration::from_secs(5));

    assert!(matches!(
        t.node.handle_inbound(&relay("relay-a"), &bytes).await.unwrap(),
        InboundOutcome::Accepted { .. }
    ));
    assert!(t.node.sweep_expired().is_empty());

    world.clock.advance(Duration::from_secs(1));
    assert_eq!(t.node.sweep_expired(), vec![id]);
}

#[tokio::test]
async fn future_dated_inbound_frame_is_dropped() {
    let world = World::new();
    let t = world.node(NodeConfig {
        clock_skew: Duration::from_secs(30),
        ..config()
    });
    let key = PrivateKey::generate();
    let now = world.clock.now();
    let ahead = |secs: i64| {
        let created = now + chrono::Duration::seconds(secs);
        let frame =
            BroadcastFrame::new_signed(ride_topic(created), &key, 0, created, HOUR, None).unwrap();
        (frame.message_id().unwrap(), encode(&Frame::Broadcast(frame)).unwrap())
    };

    let (id, bytes) = ahead(31);
    assert!(matches!(
        t.node.handle_inbound(&relay("relay-a"), &bytes).await,
        Err(NodeError::Protocol(ProtocolError::FutureDated))
    ));
    assert_eq!(t.node.message_state(&id), None);
    assert_eq!(t.policy.calls(), 0);

    let (_, bytes) = ahead(30);
    assert!(matches!(
        t.node.handle_inbound(&relay("relay-a"), &bytes).await.unwrap(),
        InboundOutcome::Accepted { .. }
    ));
}

#[tokio::test]
async fn claimed_ttl_is_capped_by_node_maximum() {
    let world = World::new();
    let t = world.node(NodeConfig {
        max_frame_ttl: Duration::from_secs(60),
        ..config()
    });
    let a = relay("relay-a");
    let (id, bytes) =
        world.remote_broadcast(&PrivateKey::generate(), 0, Duration::from_secs(u64::MAX), None);
    t.node.handle_inbound(&a, &bytes).await.unwrap();
    assert_eq!(t.node.message_state(&id), Some(MessageState::Active));

    world.clock.advance(Duration::from_secs(61));
    assert_eq!(t.node.sweep_expired(), vec![id.clone()]);
    assert!(t.node.index().is_empty());
    assert!(matches!(
        t.node.relay_frame(&id, &CancellationToken::new()).await,
        Err(NodeError::InvalidState { .. })
    ));

    world.clock.advance(2 * HOUR);
    t.node.sweep_expired();
    assert_eq!(t.node.message_state(&id), None);
    assert!(matches!(
        t.node.handle_inbound(&a, &bytes).await,
        Err(NodeError::Protocol(ProtocolError::Expired))
    ));
}

#[tokio::test]
async fn forged_or_malformed_frames_are_protocol_errors() {
    let world = World::new();
    let t = world.node(config());
    let now = world.clock.now();
    let mut frame = BroadcastFrame::new_signed(
        ride_topic(now),
        &PrivateKey::generate(),
        5,
        now,
        HOUR,
        None,
    )
    .unwrap();
    frame.price = 1;
    let bytes = encode(&Frame::Broadcast(frame)).unwrap();

    let err = t.node.handle_inbound(&relay("relay-a"), &bytes).await.unwrap_err();
    assert!(matches!(err, NodeError::Protocol(ProtocolError::InvalidSignature)));
    assert_eq!(err.kind(), "protocol");

    assert!(matches!(
        t.node.handle_inbound(&relay("relay-a"), b"[1, 2").await,
        Err(NodeError::Protocol(ProtocolError::Codec(_)))
    ));
    assert_eq!(t.policy.calls(), 0);
    assert!(t.node.index().is_empty());
}

#[tokio::test]
async fn uncertified_priced_inbound_broadcast_is_rejected() {
    let world = World::new();
    let t = world.node(NodeConfig {
        certified_price_threshold: 50,
        ..config()
    });
    let (id, bytes) = world.remote_broadcast(&PrivateKey::generate(), 80, HOUR, None);

    assert!(matches!(
        t.node.handle_inbound(&relay("relay-a"), &bytes).await,
        Err(NodeError::Trust(TrustError::MissingCertificate))
    ));
    assert_eq!(t.node.message_state(&id), Some(MessageState::Rejected));
    assert!(t.node.index().relays_for(&id).is_empty());
    assert_eq!(t.policy.calls(), 0);

    let originator = PrivateKey::generate();
    let cert = world
        .settler
        .issue_for(originator.public_key(), driver_attributes())
        .unwrap();
    let (_, bytes) = world.remote_broadcast(&originator, 80, HOUR, Some(cert));
    assert!(matches!(
        t.node.handle_inbound(&relay("relay-a"), &bytes).await.unwrap(),
        InboundOutcome::Accepted { .. }
    ));
}

#[tokio::test]
async fn settler_outage_does_not_reject_broadcast_for_good() {
    let world = World::new();
    let t = world.node(NodeConfig {
        certified_price_threshold: 50,
        ..config()
    });
    let originator = PrivateKey::generate();
    let cert = world
        .settler
        .issue_for(originator.public_key(), driver_attributes())
        .unwrap();
    let (id, bytes) = world.remote_broadcast(&originator, 80, HOUR, Some(cert));

    world.settler.set_online(false);
    assert!(matches!(
        t.node.handle_inbound(&relay("relay-a"), &bytes).await,
        Err(NodeError::Trust(TrustError::Settler(_)))
    ));
    assert_eq!(t.node.message_state(&id), None);
    assert!(t.node.index().is_empty());

    world.settler.set_online(true);
    assert!(matches!(
        t.node.handle_inbound(&relay("relay-b"), &bytes).await.unwrap(),
        InboundOutcome::Accepted { .. }
    ));
    assert_eq!(t.node.message_state(&id), Some(MessageState::Active));
    assert_eq!(t.policy.calls(), 1);
}

#[tokio::test]
async fn relay_gating_refuses_price_above_cap() {
    let world = World::new();
    let t = world.node(NodeConfig {
        max_relay_price: 50,
        ..config()
    });
    let a = t.publisher.connect("relay-a");
    let b = t.publisher.connect("relay-b");
    let (id, bytes) = world.remote_broadcast(&PrivateKey::generate(), 100, HOUR, None);

    match t.node.handle_inbound(&a, &bytes).await.unwrap() {
        InboundOutcome::Accepted {
            relayed_to,
            relay_refused,
            ..
        } => {
            assert!(relayed_to.is_empty());
            assert_eq!(
                relay_refused,
                Some(PaymentError::PriceAboveCap { price: 100, cap: 50 })
            );
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    // The relay it came from keeps it; no new relay gets it.
    assert!(t.node.index().has_association(a.as_str(), &id));
    assert!(!t.node.index().has_association(b.as_str(), &id));
    assert!(t.publisher.frames_to(&b).is_empty());
    assert_eq!(t.node.message_state(&id), Some(MessageState::Active));
    assert_eq!(t.node.payments().obligation_count(), 0);

    assert!(matches!(
        t.node.relay_frame(&id, &CancellationToken::new()).await,
        Err(NodeError::Payment(PaymentError::PriceAboveCap { .. }))
    ));
}

#[tokio::test]
async fn relaying_opens_one_obligation_per_message() {
    let world = World::new();
    let t = world.node(config());
    let a = t.publisher.connect("relay-a");
    let b = t.publisher.connect("relay-b");
    let (id, bytes) = world.remote_broadcast(&PrivateKey::generate(), 10, HOUR, None);

    match t.node.handle_inbound(&a, &bytes).await.unwrap() {
        InboundOutcome::Accepted { relayed_to, .. } => assert_eq!(relayed_to, vec![b.clone()]),
        other => panic!("unexpected outcome {other:?}"),
    }
    let first = t.node.payments().relay_obligation(&id).unwrap();
    assert_eq!(first.amount, 10);

    let c = t.publisher.connect("relay-c");
    let report = t
        .node
        .relay_frame(&id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.relayed_to, vec![c.clone()]);
    assert_eq!(report.obligation, Some(first.payment_hash));

    t.node.handle_inbound(&c, &bytes).await.unwrap();
    assert_eq!(t.node.payments().obligation_count(), 1);

    // Nothing left to relay to.
    let report = t
        .node
        .relay_frame(&id, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.relayed_to.is_empty());
}

#[tokio::test]
async fn undelivered_relay_opens_no_obligation() {
    let world = World::new();
    let t = world.node(config());
    let a = t.publisher.connect("relay-a");
    let b = t.publisher.connect("relay-b");
    t.publisher.fail(&b);
    let (id, bytes) = world.remote_broadcast(&PrivateKey::generate(), 10, HOUR, None);

    match t.node.handle_inbound(&a, &bytes).await.unwrap() {
        InboundOutcome::Accepted {
            relayed_to,
            relay_refused,
            ..
        } => {
            assert!(relayed_to.is_empty());
            assert!(relay_refused.is_none());
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(t.node.payments().relay_obligation(&id).is_none());
    assert_eq!(t.node.payments().obligation_count(), 0);
}

#[tokio::test]
async fn obligation_is_released_once_message_is_purged() {
    let world = World::new();
    let t = world.node(config());
    let a = t.publisher.connect("relay-a");
    t.publisher.connect("relay-b");
    let (id, bytes) =
        world.remote_broadcast(&PrivateKey::generate(), 10, Duration::from_secs(5), None);
    t.node.handle_inbound(&a, &bytes).await.unwrap();
    assert_eq!(t.node.payments().obligation_count(), 1);

    world.clock.advance(Duration::from_secs(6));
    assert_eq!(t.node.sweep_expired(), vec![id.clone()]);
    // Still redeemable while the tombstone is kept.
    assert!(t.node.payments().relay_obligation(&id).is_some());

    world.clock.advance(2 * HOUR);
    t.node.sweep_expired();
    assert_eq!(t.node.message_state(&id), None);
    assert_eq!(t.node.payments().obligation_count(), 0);
}

#[tokio::test]
async fn retraction_reaches_exactly_the_associated_relays() {
    let world = World::new();
    let t = world.node(config());
    let cancel = CancellationToken::new();
    let a = t.publisher.connect("relay-a");
    let b = t.publisher.connect("relay-b");
    let first = t
        .node
        .broadcast(ride_topic(world.clock.now()), 1, &cancel)
        .await
        .unwrap();
    let c = t.publisher.connect("relay-c");
    let second = t
        .node
        .broadcast(ride_topic(world.clock.now()), 1, &cancel)
        .await
        .unwrap();

    let outcome = t.node.retract(&first.message_id, &cancel).await.unwrap();
    assert_eq!(outcome.notified, vec![a.clone(), b.clone()]);
    assert!(outcome.timed_out.is_empty());
    assert!(outcome.cancelled.is_empty());

    let retracted = |relay: &RelayId| {
        t.publisher
            .frames_to(relay)
            .into_iter()
            .filter(|f| matches!(f, Frame::Retraction(r) if r.message_id == first.message_id))
            .count()
    };
    assert_eq!(retracted(&a), 1);
    assert_eq!(retracted(&b), 1);
    assert_eq!(retracted(&c), 0);

    assert!(t.node.index().relays_for(&first.message_id).is_empty());
    assert_eq!(t.node.index().relays_for(&second.message_id).len(), 3);
    assert_eq!(
        t.node.message_state(&first.message_id),
        Some(MessageState::Retracted)
    );

    assert!(matches!(
        t.node.retract(&first.message_id, &cancel).await,
        Err(NodeError::InvalidState { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn retraction_is_bounded_by_timeout() {
    let world = World::new();
    let t = world.node(NodeConfig {
        retraction_timeout: Duration::from_secs(1),
        ..config()
    });
    let a = t.publisher.connect("relay-a");
    let b = t.publisher.connect("relay-b");
    let outcome = t
        .node
        .broadcast(ride_topic(world.clock.now()), 1, &CancellationToken::new())
        .await
        .unwrap();

    t.publisher.hang(&b);
    let retraction = t.node.retract(&outcome.message_id, &CancellationToken::new()).await.unwrap();
    assert_eq!(retraction.notified, vec![a]);
    assert_eq!(retraction.timed_out, vec![b]);
    assert!(t.node.index().relays_for(&outcome.message_id).is_empty());
}

#[tokio::test]
async fn cancelled_retraction_still_releases_associations() {
    let world = World::new();
    let t = world.node(config());
    let a = t.publisher.connect("relay-a");
    let b = t.publisher.connect("relay-b");
    let outcome = t
        .node
        .broadcast(ride_topic(world.clock.now()), 1, &CancellationToken::new())
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let retraction = t.node.retract(&outcome.message_id, &cancel).await.unwrap();
    assert!(retraction.notified.is_empty());
    assert!(retraction.timed_out.is_empty());
    assert_eq!(retraction.cancelled, vec![a.clone(), b.clone()]);

    assert!(t.node.index().relays_for(&outcome.message_id).is_empty());
    assert_eq!(
        t.node.message_state(&outcome.message_id),
        Some(MessageState::Retracted)
    );
    let retractions = [&a, &b]
        .iter()
        .flat_map(|relay| t.publisher.frames_to(relay))
        .filter(|f| matches!(f, Frame::Retraction(_)))
        .count();
    assert_eq!(retractions, 0);
}

#[tokio::test]
async fn only_the_originator_can_retract() {
    let world = World::new();
    let mut t = world.node(config());
    let a = t.publisher.connect("relay-a");
    let b = t.publisher.connect("relay-b");
    let originator = PrivateKey::generate();
    let (id, bytes) = world.remote_broadcast(&originator, 0, HOUR, None);
    t.node.handle_inbound(&a, &bytes).await.unwrap();
    assert_eq!(t.node.index().relays_for(&id), relay_set(&[&a, &b]));
    drain(&mut t.events);

    assert!(matches!(
        t.node.retract(&id, &CancellationToken::new()).await,
        Err(NodeError::NotOriginator(_))
    ));

    let forged = RetractionFrame::new_signed(id.clone(), &PrivateKey::generate(), world.clock.now())
        .unwrap();
    let forged = encode(&Frame::Retraction(forged)).unwrap();
    assert!(matches!(
        t.node.handle_inbound(&a, &forged).await,
        Err(NodeError::Protocol(ProtocolError::ForeignRetraction(_)))
    ));
    assert_eq!(t.node.message_state(&id), Some(MessageState::Active));

    let genuine = RetractionFrame::new_signed(id.clone(), &originator, world.clock.now()).unwrap();
    let genuine = encode(&Frame::Retraction(genuine)).unwrap();
    assert_eq!(
        t.node.handle_inbound(&a, &genuine).await.unwrap(),
        InboundOutcome::Retracted(id.clone())
    );
    assert_eq!(t.node.message_state(&id), Some(MessageState::Retracted));
    assert_eq!(
        drain(&mut t.events),
        vec![NodeEvent::TopicRetracted {
            message_id: id.clone()
        }]
    );

    // Forwarded to the other relay that had it, not back to the sender.
    assert!(t
        .publisher
        .frames_to(&b)
        .iter()
        .any(|f| matches!(f, Frame::Retraction(_))));
    assert!(!t
        .publisher
        .frames_to(&a)
        .iter()
        .any(|f| matches!(f, Frame::Retraction(_))));
    assert!(t.node.index().relays_for(&id).is_empty());
}

#[tokio::test]
async fn reconnecting_relay_gets_own_broadcasts_again() {
    let world = World::new();
    let t = world.node(config());
    let a = t.publisher.connect("relay-a");
    let b = t.publisher.connect("relay-b");
    let outcome = t
        .node
        .broadcast(ride_topic(world.clock.now()), 1, &CancellationToken::new())
        .await
        .unwrap();

    t.publisher.disconnect(&a);
    assert_eq!(t.node.on_relay_disconnected(&a), vec![outcome.message_id.clone()]);
    assert_eq!(t.node.index().relays_for(&outcome.message_id), relay_set(&[&b]));

    t.publisher.connect("relay-a");
    let cancel = CancellationToken::new();
    assert_eq!(
        t.node.on_relay_connected(&a, &cancel).await.unwrap(),
        vec![outcome.message_id.clone()]
    );
    assert_eq!(t.publisher.frames_to(&a).len(), 2);
    assert_eq!(t.node.index().relays_for(&outcome.message_id), relay_set(&[&a, &b]));

    assert!(t.node.on_relay_connected(&b, &cancel).await.unwrap().is_empty());
}

#[tokio::test]
async fn certified_reply_becomes_an_offer() {
    let world = World::new();
    let mut originator = world.node(config());
    let responder = world.node(config());
    let a = originator.publisher.connect("relay-a");
    responder.publisher.connect("relay-a");
    let cancel = CancellationToken::new();

    let broadcast = originator
        .node
        .broadcast(ride_topic(world.clock.now()), 1, &cancel)
        .await
        .unwrap();
    responder
        .node
        .handle_inbound(&a, &originator.publisher.last_bytes())
        .await
        .unwrap();

    world.certify(&responder.node);
    let message = ReplyMessage {
        text: "silver hatchback, 5 min away".to_string(),
        contact_relays: vec![a.to_string()],
    };
    let valid_until = world.clock.now() + chrono::Duration::minutes(10);
    let sent = responder
        .node
        .reply(&broadcast.message_id, 25, valid_until, &message, &cancel)
        .await
        .unwrap();

    let reply_bytes = responder.publisher.last_bytes();
    assert_eq!(
        originator.node.handle_inbound(&a, &reply_bytes).await.unwrap(),
        InboundOutcome::Offer(sent.message_id.clone())
    );
    assert_eq!(
        originator.node.handle_inbound(&a, &reply_bytes).await.unwrap(),
        InboundOutcome::Duplicate(sent.message_id.clone())
    );

    let offers = originator.node.offers(&broadcast.message_id);
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].message, message);
    assert_eq!(offers[0].responder, responder.node.public_key());
    assert_eq!(offers[0].terms.fee, 25);

    // The fee invoice is real: paying it credits the responder.
    let request = offers[0].terms.payment_request.clone().unwrap();
    world.wallet.pay(&request).unwrap();
    assert_eq!(responder.node.payments().balance().await.unwrap(), 25);

    assert!(matches!(
        drain(&mut originator.events).as_slice(),
        [NodeEvent::OfferReceived(offer)] if offer.reply_id == sent.message_id
    ));
}

#[tokio::test]
async fn reply_with_revoked_certificate_is_rejected() {
    let world = World::new();
    let mut originator = world.node(config());
    let a = originator.publisher.connect("relay-a");
    let broadcast = originator
        .node
        .broadcast(ride_topic(world.clock.now()), 1, &CancellationToken::new())
        .await
        .unwrap();

    let responder = PrivateKey::generate();
    let cert = world
        .settler
        .issue_for(responder.public_key(), driver_attributes())
        .unwrap();
    world.settler.revoke(cert.id);
    let reply = ReplyFrame::new_signed(
        broadcast.message_id.clone(),
        &originator.node.public_key(),
        &ReplyMessage {
            text: "pick me".to_string(),
            contact_relays: Vec::new(),
        },
        ReplyTerms {
            fee: 0,
            payment_request: None,
            valid_until: world.clock.now(),
        },
        Some(cert),
        &responder,
    )
    .unwrap();
    let bytes = encode(&Frame::Reply(reply)).unwrap();

    let err = originator.node.handle_inbound(&a, &bytes).await.unwrap_err();
    assert!(matches!(err, NodeError::Trust(TrustError::Revoked)));
    assert_eq!(err.kind(), "trust");
    assert!(originator.node.offers(&broadcast.message_id).is_empty());
    assert_eq!(
        drain(&mut originator.events),
        vec![NodeEvent::ReplyRejected {
            message_id: broadcast.message_id.clone(),
            responder: responder.public_key(),
            reason: TrustError::Revoked,
        }]
    );
}

#[tokio::test]
async fn reply_is_retried_after_settler_outage() {
    let world = World::new();
    let mut originator = world.node(config());
    let a = originator.publisher.connect("relay-a");
    let broadcast = originator
        .node
        .broadcast(ride_topic(world.clock.now()), 1, &CancellationToken::new())
        .await
        .unwrap();

    let responder = PrivateKey::generate();
    let cert = world
        .settler
        .issue_for(responder.public_key(), driver_attributes())
        .unwrap();
    let reply = ReplyFrame::new_signed(
        broadcast.message_id.clone(),
        &originator.node.public_key(),
        &ReplyMessage {
            text: "pick me".to_string(),
            contact_relays: Vec::new(),
        },
        ReplyTerms {
            fee: 0,
            payment_request: None,
            valid_until: world.clock.now(),
        },
        Some(cert),
        &responder,
    )
    .unwrap();
    let reply_id = reply.reply_id().unwrap();
    let bytes = encode(&Frame::Reply(reply)).unwrap();

    world.settler.set_online(false);
    assert!(matches!(
        originator.node.handle_inbound(&a, &bytes).await,
        Err(NodeError::Trust(TrustError::Settler(_)))
    ));
    drain(&mut originator.events);

    world.settler.set_online(true);
    assert_eq!(
        originator.node.handle_inbound(&a, &bytes).await.unwrap(),
        InboundOutcome::Offer(reply_id.clone())
    );
    assert_eq!(originator.node.offers(&broadcast.message_id).len(), 1);
    assert_eq!(
        originator.node.handle_inbound(&a, &bytes).await.unwrap(),
        InboundOutcome::Duplicate(reply_id)
    );
}

#[tokio::test]
async fn replying_needs_own_certificate_and_active_topic() {
    let world = World::new();
    let t = world.node(config());
    t.publisher.connect("relay-a");
    let (id, bytes) = world.remote_broadcast(&PrivateKey::generate(), 0, HOUR, None);
    t.node.handle_inbound(&relay("relay-a"), &bytes).await.unwrap();

    let message = ReplyMessage {
        text: "here".to_string(),
        contact_relays: Vec::new(),
    };
    let until = world.clock.now();
    let cancel = CancellationToken::new();
    assert!(matches!(
        t.node.reply(&id, 0, until, &message, &cancel).await,
        Err(NodeError::Trust(TrustError::MissingCertificate))
    ));

    world.certify(&t.node);
    let unknown = MessageId::from_bytes([7u8; 32]);
    assert!(matches!(
        t.node.reply(&unknown, 0, until, &message, &cancel).await,
        Err(NodeError::UnknownMessage(_))
    ));
    assert!(t.node.reply(&id, 0, until, &message, &cancel).await.is_ok());
}

#[tokio::test]
async fn replies_to_other_nodes_broadcasts_are_ignored() {
    let world = World::new();
    let t = world.node(config());
    let responder = PrivateKey::generate();
    let reply = ReplyFrame::new_signed(
        MessageId::from_bytes([1u8; 32]),
        &PrivateKey::generate().public_key(),
        &ReplyMessage {
            text: "not for you".to_string(),
            contact_relays: Vec::new(),
        },
        ReplyTerms {
            fee: 0,
            payment_request: None,
            valid_until: world.clock.now(),
        },
        None,
        &responder,
    )
    .unwrap();
    let bytes = encode(&Frame::Reply(reply)).unwrap();
    assert_eq!(
        t.node.handle_inbound(&relay("relay-a"), &bytes).await.unwrap(),
        InboundOutcome::Ignored
    );
}

#[tokio::test]
async fn certify_obtains_and_installs_certificate() {
    let world = World::new();
    let t = world.node(config());
    let subject = t.node.public_key();
    world.settler.grant(subject, "driver", "true");
    let preimage = crate::payment::Preimage::random();
    world.settler.expect_payment(preimage.payment_hash());

    let request = CertificateRequest {
        subject,
        attributes: driver_attributes(),
        proof_of_payment: crate::settler::ProofOfPayment {
            payment_hash: preimage.payment_hash(),
            preimage,
        },
    };
    let cert = t.node.certify(&request).await.unwrap();
    assert_eq!(t.node.certificate(), Some(cert));

    let foreign = CertificateRequest {
        subject: PrivateKey::generate().public_key(),
        ..request
    };
    assert!(matches!(
        t.node.certify(&foreign).await,
        Err(NodeError::Trust(TrustError::SubjectMismatch))
    ));
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<NodeEvent>) -> NodeEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for node event")
        .expect("node event channel closed")
}

async fn wait_connected(transport: &RelayTransport) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while transport.connected_relays().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("relay never connected");
}

#[tokio::test]
async fn nodes_exchange_topic_and_offer_over_memory_relays() {
    let world = World::new();
    let network = MemoryRelayNetwork::new();
    let endpoint = RelayEndpoint::new(Url::parse("wss://relay-a.example").unwrap());
    let shutdown = CancellationToken::new();

    let start = |key: &PrivateKey| {
        let (transport, transport_events) = RelayTransport::start(
            Arc::new(network.clone()),
            &[endpoint.clone()],
            SubscriptionFilter::default(),
            BackoffPolicy::default(),
            shutdown.clone(),
            Span::none(),
        );
        let transport = Arc::new(transport);
        let services = world.services(
            key,
            &config(),
            transport.clone(),
            Arc::new(CountingPolicy::default()),
        );
        let (node, events) = GossipNode::new(key.clone(), config(), services, Span::none());
        tokio::spawn(Arc::clone(&node).run(transport_events, shutdown.clone()));
        (node, events, transport)
    };

    let (rider, mut rider_events, rider_transport) = start(&PrivateKey::generate());
    let (driver, mut driver_events, driver_transport) = start(&PrivateKey::generate());
    wait_connected(&rider_transport).await;
    wait_connected(&driver_transport).await;
    world.certify(&driver);

    let broadcast = rider
        .broadcast(ride_topic(world.clock.now()), 0, &shutdown)
        .await
        .unwrap();
    let NodeEvent::TopicCandidate { message_id, .. } = next_event(&mut driver_events).await else {
        panic!("expected a topic candidate");
    };
    assert_eq!(message_id, broadcast.message_id);

    let message = ReplyMessage {
        text: "on my way".to_string(),
        contact_relays: vec![endpoint.id().to_string()],
    };
    driver
        .reply(
            &message_id,
            0,
            world.clock.now() + chrono::Duration::minutes(5),
            &message,
            &shutdown,
        )
        .await
        .unwrap();

    let NodeEvent::OfferReceived(offer) = next_event(&mut rider_events).await else {
        panic!("expected an offer");
    };
    assert_eq!(offer.message, message);
    assert_eq!(offer.responder, driver.public_key());
    assert_eq!(offer.received_from, endpoint.id());
    shutdown.cancel();
}
