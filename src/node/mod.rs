// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The gossip node.
//!
//! A node signs and fans out its own topic broadcasts, validates inbound
//! frames, surfaces the topics its [`TopicPolicy`] accepts, relays what it
//! can afford to carry, and collects certified replies to its broadcasts.
//!
//! Every broadcast moves through
//! `Validating -> Active -> {Retracted, Expired}` (or `Validating -> Rejected`
//! when certificate checks fail). The [`DualIndex`] records which relay has
//! which message: only confirmed sends and actual receipts create an
//! association, a relay disconnect forgets all of the relay's associations,
//! and a message leaving `Active` releases all of its own.
//!
//! No lock is held across a network call. The message table is locked only
//! for short bookkeeping steps; certificate and payment checks run unlocked,
//! and the `Validating` state keeps a concurrent duplicate from being
//! processed twice meanwhile.

mod events;
mod runner;
mod state;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Span};

use crate::certificate::{Certificate, CertificateAuthorityClient, TrustError};
use crate::clock::Clock;
use crate::config::NodeConfig;
use crate::crypto::{PrivateKey, PublicKey};
use crate::error::{NodeError, ProtocolError};
use crate::frame::{
    decode, encode, BroadcastFrame, Frame, MessageId, ReplyFrame, ReplyMessage, ReplyTerms,
    RetractionFrame,
};
use crate::index::DualIndex;
use crate::payment::PaymentGateway;
use crate::settler::CertificateRequest;
use crate::topic::{Topic, TopicPolicy};
use crate::transport::{FramePublisher, RelayId, TransportError};

pub use events::{
    BroadcastOutcome, InboundOutcome, NodeEvent, Offer, RelayReport, RetractOutcome,
};
pub use state::{MessageState, Origin};

use state::{MessageEntry, MessageTable};

/// How long a terminal entry is kept past its expiry for deduplication.
const TOMBSTONE_RETENTION_SECS: i64 = 60 * 60;

/// Collaborators a node is built from.
pub struct NodeServices {
    pub certificates: Arc<CertificateAuthorityClient>,
    pub payments: Arc<PaymentGateway>,
    pub publisher: Arc<dyn FramePublisher>,
    pub policy: Arc<dyn TopicPolicy>,
    pub clock: Arc<dyn Clock>,
}

pub struct GossipNode {
    key: PrivateKey,
    public_key: PublicKey,
    config: NodeConfig,
    certificates: Arc<CertificateAuthorityClient>,
    payments: Arc<PaymentGateway>,
    publisher: Arc<dyn FramePublisher>,
    policy: Arc<dyn TopicPolicy>,
    clock: Arc<dyn Clock>,
    index: DualIndex<MessageId>,
    messages: Mutex<MessageTable>,
    certificate: RwLock<Option<Certificate>>,
    events: mpsc::UnboundedSender<NodeEvent>,
    /// Cancels fan-outs started by the node itself once it stops running.
    shutdown: CancellationToken,
    span: Span,
}

/// Per-relay results of one fan-out.
#[derive(Debug, Default)]
struct FanOut {
    delivered: Vec<RelayId>,
    failed: Vec<RelayId>,
    cancelled: Vec<RelayId>,
    timed_out: Vec<RelayId>,
}

enum Step {
    Sent(Result<(), TransportError>),
    Cancelled,
    TimedOut,
}

impl GossipNode {
    /// Build a node. Events for the application arrive on the returned
    /// receiver; dropping it discards them.
    pub fn new(
        key: PrivateKey,
        config: NodeConfig,
        services: NodeServices,
        span: Span,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<NodeEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let node = Self {
            public_key: key.public_key(),
            key,
            config,
            certificates: services.certificates,
            payments: services.payments,
            publisher: services.publisher,
            policy: services.policy,
            clock: services.clock,
            index: DualIndex::new(),
            messages: Mutex::new(MessageTable::default()),
            certificate: RwLock::new(None),
            events,
            shutdown: CancellationToken::new(),
            span,
        };
        (Arc::new(node), receiver)
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Use `certificate` for our broadcasts and replies.
    pub fn set_certificate(&self, certificate: Certificate) {
        *self.certificate.write().unwrap_or_else(|e| e.into_inner()) = Some(certificate);
    }

    pub fn certificate(&self) -> Option<Certificate> {
        self.certificate
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Obtain a certificate for this node's key from the settler and use it.
    pub async fn certify(&self, request: &CertificateRequest) -> Result<Certificate, NodeError> {
        if request.subject != self.public_key {
            return Err(TrustError::SubjectMismatch.into());
        }
        let certificate = self.certificates.obtain_certificate(request).await?;
        self.set_certificate(certificate.clone());
        info!(parent: &self.span, certificate = %certificate.id, "node certified");
        Ok(certificate)
    }

    pub fn index(&self) -> &DualIndex<MessageId> {
        &self.index
    }

    pub fn payments(&self) -> &PaymentGateway {
        &self.payments
    }

    pub fn message_state(&self, message_id: &MessageId) -> Option<MessageState> {
        self.messages().get(message_id).map(|e| e.state)
    }

    /// Accepted offers received for one of our broadcasts, in arrival order.
    pub fn offers(&self, message_id: &MessageId) -> Vec<Offer> {
        self.messages().offers(message_id)
    }

    /// Sign `topic` and publish it on every connected relay.
    ///
    /// Prices above the certified threshold require this node's own
    /// certificate to validate first. Succeeds if at least one relay accepted
    /// the frame; `cancel` abandons the relays not yet reached.
    pub async fn broadcast(
        &self,
        topic: Topic,
        price: u64,
        cancel: &CancellationToken,
    ) -> Result<BroadcastOutcome, NodeError> {
        let certificate = self.certificate();
        if price > self.config.certified_price_threshold {
            let cert = certificate.as_ref().ok_or(TrustError::MissingCertificate)?;
            self.certificates.require_valid(cert, &self.public_key).await?;
        }

        let frame = BroadcastFrame::new_signed(
            topic,
            &self.key,
            price,
            self.clock.now(),
            self.config.broadcast_ttl,
            certificate,
        )?;
        let message_id = frame.message_id()?;
        let bytes: Arc<[u8]> = encode(&Frame::Broadcast(frame.clone()))?.into();
        let expires_at = self.expiry_of(&frame);
        self.messages().insert_if_absent(
            message_id.clone(),
            MessageEntry::new(frame, Origin::Local, MessageState::Active, expires_at),
        );

        let targets = self.publisher.connected_relays();
        let fan = self
            .fan_out(Some(&message_id), bytes, targets, cancel, None)
            .await;
        if fan.delivered.is_empty() {
            self.messages().remove(&message_id);
            return Err(if fan.cancelled.is_empty() {
                NodeError::AllRelaysUnreachable
            } else {
                NodeError::Cancelled
            });
        }

        info!(
            parent: &self.span,
            %message_id,
            price,
            delivered = fan.delivered.len(),
            failed = fan.failed.len(),
            "topic broadcast"
        );
        Ok(BroadcastOutcome {
            message_id,
            delivered: fan.delivered,
            failed: fan.failed,
            cancelled: fan.cancelled,
        })
    }

    /// Process one frame received from `relay`.
    ///
    /// Protocol errors mean the frame was dropped. Trust errors mean it was
    /// rejected; they are returned so the rejection stays observable.
    pub async fn handle_inbound(
        &self,
        relay: &RelayId,
        bytes: &[u8],
    ) -> Result<InboundOutcome, NodeError> {
        match decode(bytes)? {
            Frame::Broadcast(frame) => self.on_broadcast(relay, frame).await,
            Frame::Reply(frame) => self.on_reply(relay, frame).await,
            Frame::Retraction(frame) => self.on_retraction(relay, frame).await,
        }
    }

    async fn on_broadcast(
        &self,
        relay: &RelayId,
        frame: BroadcastFrame,
    ) -> Result<InboundOutcome, NodeError> {
        if !frame.verify() {
            return Err(ProtocolError::InvalidSignature.into());
        }
        let message_id = frame.message_id()?;
        let now = self.clock.now();

        {
            let mut messages = self.messages();
            if let Some(entry) = messages.get(&message_id) {
                if entry.state.is_live() {
                    self.index.associate(relay.as_str(), message_id.clone());
                }
                debug!(parent: &self.span, %message_id, %relay, state = %entry.state, "duplicate broadcast");
                return Ok(InboundOutcome::Duplicate(message_id));
            }
            if frame.is_future_dated(now, self.config.clock_skew) {
                return Err(ProtocolError::FutureDated.into());
            }
            let expires_at = self.expiry_of(&frame);
            if now > expires_at {
                return Err(ProtocolError::Expired.into());
            }
            messages.insert_if_absent(
                message_id.clone(),
                MessageEntry::new(
                    frame.clone(),
                    Origin::Remote,
                    MessageState::Validating,
                    expires_at,
                ),
            );
            self.index.associate(relay.as_str(), message_id.clone());
        }

        if frame.price > self.config.certified_price_threshold {
            let verdict = match &frame.certificate {
                Some(cert) => self.certificates.require_valid(cert, &frame.originator).await,
                None => Err(TrustError::MissingCertificate),
            };
            if let Err(reason) = verdict {
                // An unreachable settler says nothing about the frame; a
                // later copy gets validated afresh.
                if matches!(reason, TrustError::Settler(_)) {
                    self.messages().remove(&message_id);
                } else if let Some(entry) = self.messages().get_mut(&message_id) {
                    entry.state = MessageState::Rejected;
                }
                self.index.forget_item(&message_id);
                info!(parent: &self.span, %message_id, %relay, error = %reason, "broadcast rejected");
                return Err(reason.into());
            }
        }

        let candidate = self.policy.accept(&frame.topic, now);
        {
            let mut messages = self.messages();
            let Some(entry) = messages.get_mut(&message_id) else {
                return Ok(InboundOutcome::Ignored);
            };
            if entry.state != MessageState::Validating {
                debug!(parent: &self.span, %message_id, state = %entry.state, "broadcast left validation early");
                return Ok(InboundOutcome::Ignored);
            }
            entry.state = MessageState::Active;
            entry.candidate = candidate;
        }
        if candidate {
            self.emit(NodeEvent::TopicCandidate {
                message_id: message_id.clone(),
                topic: frame.topic.clone(),
                originator: frame.originator,
                price: frame.price,
                relay: relay.clone(),
            });
        }
        debug!(parent: &self.span, %message_id, %relay, candidate, "broadcast accepted");

        let (relayed_to, relay_refused) = match self.relay_frame(&message_id, &self.shutdown).await {
            Ok(report) => (report.relayed_to, None),
            Err(NodeError::Payment(e)) => {
                info!(parent: &self.span, %message_id, error = %e, "relay refused");
                (Vec::new(), Some(e))
            }
            Err(e) => {
                debug!(parent: &self.span, %message_id, error = %e, "relay skipped");
                (Vec::new(), None)
            }
        };

        Ok(InboundOutcome::Accepted {
            message_id,
            candidate,
            relayed_to,
            relay_refused,
        })
    }

    /// Forward an active message to every connected relay that does not
    /// have it yet.
    ///
    /// A frame from another node must be affordable under this node's relay
    /// cap. Once some relay has taken it, the relay obligation for its price
    /// is opened.
    pub async fn relay_frame(
        &self,
        message_id: &MessageId,
        cancel: &CancellationToken,
    ) -> Result<RelayReport, NodeError> {
        let (frame, origin, expires_at) = {
            let messages = self.messages();
            let entry = messages
                .get(message_id)
                .ok_or_else(|| NodeError::UnknownMessage(message_id.clone()))?;
            if entry.state != MessageState::Active {
                return Err(NodeError::InvalidState {
                    message_id: message_id.clone(),
                    state: entry.state.as_str(),
                    expected: MessageState::Active.as_str(),
                });
            }
            (entry.frame.clone(), entry.origin, entry.expires_at)
        };
        if self.clock.now() > expires_at {
            return Err(ProtocolError::Expired.into());
        }
        if origin == Origin::Remote {
            self.payments.check_affordable(frame.price)?;
        }

        let seen = self.index.relays_for(message_id);
        let targets: Vec<RelayId> = self
            .publisher
            .connected_relays()
            .into_iter()
            .filter(|relay| !seen.contains(relay.as_str()))
            .collect();
        if targets.is_empty() {
            return Ok(RelayReport {
                relayed_to: Vec::new(),
                obligation: None,
            });
        }

        let price = frame.price;
        let bytes: Arc<[u8]> = encode(&Frame::Broadcast(frame))?.into();
        let fan = self
            .fan_out(Some(message_id), bytes, targets, cancel, None)
            .await;

        let obligation = if origin == Origin::Remote && price > 0 && !fan.delivered.is_empty() {
            // Opening is idempotent; a later relay_frame retries a failure.
            match self.payments.open_relay_obligation(message_id, price).await {
                Ok(invoice) => Some(invoice.payment_hash),
                Err(e) => {
                    warn!(parent: &self.span, %message_id, error = %e, "relay obligation not opened");
                    None
                }
            }
        } else {
            None
        };
        debug!(
            parent: &self.span,
            %message_id,
            relayed = fan.delivered.len(),
            failed = fan.failed.len(),
            "frame relayed"
        );
        Ok(RelayReport {
            relayed_to: fan.delivered,
            obligation,
        })
    }

    /// Withdraw one of our active broadcasts.
    ///
    /// The retraction goes to exactly the relays known to have the message,
    /// bounded by the retraction timeout and `cancel`. The message's
    /// associations are released however the fan-out ends.
    pub async fn retract(
        &self,
        message_id: &MessageId,
        cancel: &CancellationToken,
    ) -> Result<RetractOutcome, NodeError> {
        {
            let mut messages = self.messages();
            let entry = messages
                .get_mut(message_id)
                .ok_or_else(|| NodeError::UnknownMessage(message_id.clone()))?;
            if entry.origin != Origin::Local {
                return Err(NodeError::NotOriginator(message_id.clone()));
            }
            if entry.state != MessageState::Active {
                return Err(NodeError::InvalidState {
                    message_id: message_id.clone(),
                    state: entry.state.as_str(),
                    expected: MessageState::Active.as_str(),
                });
            }
            entry.state = MessageState::Retracted;
        }

        let retraction = RetractionFrame::new_signed(message_id.clone(), &self.key, self.clock.now())?;
        let bytes: Arc<[u8]> = encode(&Frame::Retraction(retraction))?.into();
        let targets = sorted(self.index.relays_for(message_id));
        let deadline = Instant::now() + self.config.retraction_timeout;
        let fan = self
            .fan_out(None, bytes, targets, cancel, Some(deadline))
            .await;
        self.index.forget_item(message_id);

        info!(
            parent: &self.span,
            %message_id,
            notified = fan.delivered.len(),
            timed_out = fan.timed_out.len(),
            cancelled = fan.cancelled.len(),
            "broadcast retracted"
        );
        Ok(RetractOutcome {
            notified: fan.delivered,
            failed: fan.failed,
            timed_out: fan.timed_out,
            cancelled: fan.cancelled,
        })
    }

    async fn on_retraction(
        &self,
        relay: &RelayId,
        frame: RetractionFrame,
    ) -> Result<InboundOutcome, NodeError> {
        if !frame.verify() {
            return Err(ProtocolError::InvalidSignature.into());
        }
        let message_id = frame.message_id.clone();
        let was_candidate = {
            let mut messages = self.messages();
            let Some(entry) = messages.get_mut(&message_id) else {
                return Ok(InboundOutcome::Ignored);
            };
            if entry.frame.originator != frame.originator {
                return Err(ProtocolError::ForeignRetraction(message_id).into());
            }
            if !entry.state.is_live() {
                return Ok(InboundOutcome::Ignored);
            }
            entry.state = MessageState::Retracted;
            entry.candidate
        };
        if was_candidate {
            self.emit(NodeEvent::TopicRetracted {
                message_id: message_id.clone(),
            });
        }

        let targets: Vec<RelayId> = sorted(self.index.relays_for(&message_id))
            .into_iter()
            .filter(|r| r != relay)
            .collect();
        let bytes: Arc<[u8]> = encode(&Frame::Retraction(frame))?.into();
        let deadline = Instant::now() + self.config.retraction_timeout;
        let fan = self
            .fan_out(None, bytes, targets, &self.shutdown, Some(deadline))
            .await;
        self.index.forget_item(&message_id);
        info!(parent: &self.span, %message_id, %relay, forwarded = fan.delivered.len(), "broadcast retracted by originator");
        Ok(InboundOutcome::Retracted(message_id))
    }

    /// Reply to an active topic from another node.
    ///
    /// The reply carries this node's certificate and, for a non-zero fee, an
    /// invoice the originator pays to accept the offer. Only the originator
    /// can read `message`.
    pub async fn reply(
        &self,
        message_id: &MessageId,
        fee: u64,
        valid_until: DateTime<Utc>,
        message: &ReplyMessage,
        cancel: &CancellationToken,
    ) -> Result<BroadcastOutcome, NodeError> {
        let certificate = self.certificate().ok_or(TrustError::MissingCertificate)?;
        self.certificates
            .require_valid(&certificate, &self.public_key)
            .await?;

        let originator = {
            let messages = self.messages();
            let entry = messages
                .get(message_id)
                .ok_or_else(|| NodeError::UnknownMessage(message_id.clone()))?;
            if entry.state != MessageState::Active {
                return Err(NodeError::InvalidState {
                    message_id: message_id.clone(),
                    state: entry.state.as_str(),
                    expected: MessageState::Active.as_str(),
                });
            }
            entry.frame.originator
        };

        let payment_request = if fee > 0 {
            let memo = format!("offer {message_id}");
            Some(self.payments.request_invoice(fee, &memo).await?.payment_request)
        } else {
            None
        };
        let terms = ReplyTerms {
            fee,
            payment_request,
            valid_until,
        };
        let frame = ReplyFrame::new_signed(
            message_id.clone(),
            &originator,
            message,
            terms,
            Some(certificate),
            &self.key,
        )?;
        let reply_id = frame.reply_id()?;
        self.messages().record_reply(message_id, reply_id.clone());

        let bytes: Arc<[u8]> = encode(&Frame::Reply(frame))?.into();
        let targets = self.publisher.connected_relays();
        let fan = self.fan_out(None, bytes, targets, cancel, None).await;
        if fan.delivered.is_empty() {
            return Err(if fan.cancelled.is_empty() {
                NodeError::AllRelaysUnreachable
            } else {
                NodeError::Cancelled
            });
        }
        info!(parent: &self.span, %message_id, %reply_id, fee, "reply sent");
        Ok(BroadcastOutcome {
            message_id: reply_id,
            delivered: fan.delivered,
            failed: fan.failed,
            cancelled: fan.cancelled,
        })
    }

    async fn on_reply(
        &self,
        relay: &RelayId,
        frame: ReplyFrame,
    ) -> Result<InboundOutcome, NodeError> {
        if !frame.verify() {
            return Err(ProtocolError::InvalidSignature.into());
        }
        let reply_id = frame.reply_id()?;
        {
            let mut messages = self.messages();
            let ours = messages.get(&frame.message_id).is_some_and(|e| {
                e.origin == Origin::Local && e.state == MessageState::Active
            });
            if !ours {
                return Ok(InboundOutcome::Ignored);
            }
            if !messages.record_reply(&frame.message_id, reply_id.clone()) {
                return Ok(InboundOutcome::Duplicate(reply_id));
            }
        }

        let Some(certificate) = frame.certificate.clone() else {
            return Err(self.reject_reply(&frame, TrustError::MissingCertificate));
        };
        if let Err(reason) = self
            .certificates
            .require_valid(&certificate, &frame.responder)
            .await
        {
            if matches!(reason, TrustError::Settler(_)) {
                self.messages().forget_reply(&frame.message_id, &reply_id);
            }
            return Err(self.reject_reply(&frame, reason));
        }

        let message = frame
            .decrypt_message(&self.key)
            .map_err(|_| ProtocolError::UndecryptableReply)?;
        let offer = Offer {
            reply_id: reply_id.clone(),
            message_id: frame.message_id.clone(),
            responder: frame.responder,
            terms: frame.terms,
            message,
            certificate,
            received_from: relay.clone(),
        };
        self.messages().add_offer(offer.clone());
        info!(
            parent: &self.span,
            message_id = %offer.message_id,
            responder = %offer.responder,
            fee = offer.terms.fee,
            "offer received"
        );
        self.emit(NodeEvent::OfferReceived(offer));
        Ok(InboundOutcome::Offer(reply_id))
    }

    fn reject_reply(&self, frame: &ReplyFrame, reason: TrustError) -> NodeError {
        info!(
            parent: &self.span,
            message_id = %frame.message_id,
            responder = %frame.responder,
            error = %reason,
            "reply rejected"
        );
        self.emit(NodeEvent::ReplyRejected {
            message_id: frame.message_id.clone(),
            responder: frame.responder,
            reason: reason.clone(),
        });
        NodeError::Trust(reason)
    }

    /// Expire every live message past its TTL and release its associations.
    /// Also purges old tombstones. Returns the newly expired ids.
    pub fn sweep_expired(&self) -> Vec<MessageId> {
        let now = self.clock.now();
        let (expired, candidates, purged) = {
            let mut messages = self.messages();
            let expired = messages.expire_due(now);
            let candidates: Vec<MessageId> = expired
                .iter()
                .filter(|id| messages.get(id).is_some_and(|e| e.candidate))
                .cloned()
                .collect();
            let purged = now
                .checked_sub_signed(chrono::Duration::seconds(TOMBSTONE_RETENTION_SECS))
                .map(|cutoff| messages.purge_before(cutoff))
                .unwrap_or_default();
            (expired, candidates, purged)
        };

        for message_id in &expired {
            self.index.forget_item(message_id);
        }
        for message_id in candidates {
            self.emit(NodeEvent::TopicExpired { message_id });
        }
        for message_id in &purged {
            self.payments.release(message_id);
        }
        if !expired.is_empty() || !purged.is_empty() {
            debug!(
                parent: &self.span,
                expired = expired.len(),
                purged = purged.len(),
                "message sweep"
            );
        }
        expired
    }

    /// Offer our own active broadcasts to a relay that just (re)connected.
    /// Returns the ids it accepted.
    pub async fn on_relay_connected(
        &self,
        relay: &RelayId,
        cancel: &CancellationToken,
    ) -> Result<Vec<MessageId>, NodeError> {
        let now = self.clock.now();
        let own = self.messages().local_active();
        let mut offered = Vec::new();
        for (message_id, frame) in own {
            if now > self.expiry_of(&frame)
                || self.index.has_association(relay.as_str(), &message_id)
            {
                continue;
            }
            let bytes: Arc<[u8]> = encode(&Frame::Broadcast(frame))?.into();
            let fan = self
                .fan_out(Some(&message_id), bytes, vec![relay.clone()], cancel, None)
                .await;
            if !fan.cancelled.is_empty() {
                break;
            }
            if !fan.delivered.is_empty() {
                offered.push(message_id);
            }
        }
        if !offered.is_empty() {
            info!(parent: &self.span, %relay, count = offered.len(), "broadcasts re-offered");
        }
        Ok(offered)
    }

    /// Forget everything `relay` had. Returns the affected messages.
    pub fn on_relay_disconnected(&self, relay: &RelayId) -> Vec<MessageId> {
        let forgotten = self.index.forget(relay.as_str());
        debug!(parent: &self.span, %relay, forgotten = forgotten.len(), "relay associations forgotten");
        forgotten
    }

    /// Publish `bytes` to `targets` one relay at a time.
    ///
    /// Each confirmed send associates `record` (if any) with the relay.
    /// Cancellation or the deadline stops the fan-out; the remaining relays
    /// are reported as cancelled or timed out and get no association.
    async fn fan_out(
        &self,
        record: Option<&MessageId>,
        bytes: Arc<[u8]>,
        targets: Vec<RelayId>,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> FanOut {
        let mut fan = FanOut::default();
        let mut pending = targets.into_iter();
        while let Some(relay) = pending.next() {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                _ = until(deadline) => Step::TimedOut,
                result = self.publisher.publish(&relay, Arc::clone(&bytes)) => Step::Sent(result),
            };
            match step {
                Step::Sent(Ok(())) => {
                    if let Some(message_id) = record {
                        self.index.associate(relay.as_str(), message_id.clone());
                    }
                    fan.delivered.push(relay);
                }
                Step::Sent(Err(e)) => {
                    debug!(parent: &self.span, %relay, error = %e, "publish failed");
                    fan.failed.push(relay);
                }
                Step::Cancelled => {
                    fan.cancelled.push(relay);
                    fan.cancelled.extend(pending);
                    break;
                }
                Step::TimedOut => {
                    fan.timed_out.push(relay);
                    fan.timed_out.extend(pending);
                    break;
                }
            }
        }
        fan
    }

    /// When this node stops honouring `frame`, whatever TTL it claims.
    fn expiry_of(&self, frame: &BroadcastFrame) -> DateTime<Utc> {
        frame.expires_within(self.config.max_frame_ttl)
    }

    fn emit(&self, event: NodeEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn messages(&self) -> MutexGuard<'_, MessageTable> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn sorted(relays: HashSet<String>) -> Vec<RelayId> {
    let mut relays: Vec<RelayId> = relays.into_iter().map(RelayId::from).collect();
    relays.sort();
    relays
}

#[cfg(test)]
mod tests;
