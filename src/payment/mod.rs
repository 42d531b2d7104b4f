// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Hash-locked payments for relay work.
//!
//! A relay that forwards a priced broadcast opens an obligation: an invoice
//! for the broadcast's price, keyed by message id. The obligation is
//! redeemed when the wallet reports the invoice settled and the revealed
//! preimage hashes to the invoice's payment hash. Opening is idempotent per
//! message and a settlement is recorded once, however often it is confirmed.
//!
//! The gateway holds no lock across a wallet or settler call. Concurrent
//! openers of the same obligation wait on a per-message cell instead.

mod hashlock;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, info, Span};
use uuid::Uuid;

use crate::clock::Clock;
use crate::crypto::token::make_timed_token;
use crate::crypto::{CryptoError, PrivateKey};
use crate::frame::MessageId;
use crate::settler::{DisputeEvidence, DisputeOutcome, SettlerApi, SettlerError};
use crate::wallet::{Invoice, InvoiceState, WalletApi, WalletError};

pub use hashlock::{PaymentHash, Preimage};

/// Relay invoices expire after an hour unless configured otherwise.
pub const DEFAULT_INVOICE_EXPIRY: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PaymentError {
    #[error("price {price} exceeds relay cap {cap}")]
    PriceAboveCap { price: u64, cap: u64 },

    #[error("unknown payment hash {0}")]
    UnknownPaymentHash(PaymentHash),

    #[error("revealed preimage does not match payment hash")]
    PreimageMismatch,

    #[error("invoice {0} was cancelled")]
    InvoiceCancelled(PaymentHash),

    #[error("no relay obligation for message {0}")]
    UnknownObligation(MessageId),

    #[error("wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("settler error: {0}")]
    Settler(#[from] SettlerError),

    #[error("token error: {0}")]
    Token(#[from] CryptoError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Settled(Preimage),
}

struct TrackedInvoice {
    invoice: Invoice,
    settled: Option<Preimage>,
}

pub struct PaymentGateway {
    wallet: Arc<dyn WalletApi>,
    settler: Arc<dyn SettlerApi>,
    key: PrivateKey,
    clock: Arc<dyn Clock>,
    max_relay_price: u64,
    invoice_expiry: Duration,
    invoices: Mutex<HashMap<PaymentHash, TrackedInvoice>>,
    relay_obligations: Mutex<HashMap<MessageId, Arc<OnceCell<Invoice>>>>,
    span: Span,
}

impl PaymentGateway {
    /// `key` is the node key; it mints the timed tokens for wallet calls.
    pub fn new(
        wallet: Arc<dyn WalletApi>,
        settler: Arc<dyn SettlerApi>,
        key: PrivateKey,
        clock: Arc<dyn Clock>,
        max_relay_price: u64,
        span: Span,
    ) -> Self {
        Self {
            wallet,
            settler,
            key,
            clock,
            max_relay_price,
            invoice_expiry: DEFAULT_INVOICE_EXPIRY,
            invoices: Mutex::new(HashMap::new()),
            relay_obligations: Mutex::new(HashMap::new()),
            span,
        }
    }

    pub fn with_invoice_expiry(mut self, expiry: Duration) -> Self {
        self.invoice_expiry = expiry;
        self
    }

    pub fn max_relay_price(&self) -> u64 {
        self.max_relay_price
    }

    /// Reject prices above this node's relay cap.
    pub fn check_affordable(&self, price: u64) -> Result<(), PaymentError> {
        if price > self.max_relay_price {
            return Err(PaymentError::PriceAboveCap {
                price,
                cap: self.max_relay_price,
            });
        }
        Ok(())
    }

    pub async fn request_invoice(&self, amount: u64, memo: &str) -> Result<Invoice, PaymentError> {
        let token = self.token()?;
        let invoice = self
            .wallet
            .add_invoice(&token, amount, memo, self.invoice_expiry.as_secs())
            .await?;
        self.tracked().insert(
            invoice.payment_hash,
            TrackedInvoice {
                invoice: invoice.clone(),
                settled: None,
            },
        );
        debug!(parent: &self.span, payment_hash = %invoice.payment_hash, amount, "invoice requested");
        Ok(invoice)
    }

    /// Ask the wallet whether `payment_hash` has been paid.
    ///
    /// A settlement is accepted only if the revealed preimage unlocks the
    /// hash, and is recorded once; later calls return the recorded preimage
    /// without contacting the wallet.
    pub async fn confirm_payment(
        &self,
        payment_hash: &PaymentHash,
    ) -> Result<PaymentStatus, PaymentError> {
        match self.tracked().get(payment_hash) {
            None => return Err(PaymentError::UnknownPaymentHash(*payment_hash)),
            Some(TrackedInvoice {
                settled: Some(preimage),
                ..
            }) => return Ok(PaymentStatus::Settled(*preimage)),
            Some(_) => {}
        }

        let token = self.token()?;
        let state = self.wallet.invoice_state(&token, payment_hash).await?;
        match state {
            InvoiceState::Open => Ok(PaymentStatus::Pending),
            InvoiceState::Cancelled => Err(PaymentError::InvoiceCancelled(*payment_hash)),
            InvoiceState::Settled { preimage } => {
                if !preimage.unlocks(payment_hash) {
                    return Err(PaymentError::PreimageMismatch);
                }
                let mut tracked = self.tracked();
                let entry = tracked
                    .get_mut(payment_hash)
                    .ok_or(PaymentError::UnknownPaymentHash(*payment_hash))?;
                if entry.settled.is_none() {
                    entry.settled = Some(preimage);
                    info!(parent: &self.span, %payment_hash, amount = entry.invoice.amount, "payment settled");
                }
                Ok(PaymentStatus::Settled(preimage))
            }
        }
    }

    /// Open the relay obligation for `message_id`, or return the one already
    /// open. Concurrent callers for the same message share one invoice.
    pub async fn open_relay_obligation(
        &self,
        message_id: &MessageId,
        price: u64,
    ) -> Result<Invoice, PaymentError> {
        self.check_affordable(price)?;
        let cell = {
            let mut obligations = self.obligations();
            Arc::clone(obligations.entry(message_id.clone()).or_default())
        };
        let invoice = cell
            .get_or_try_init(|| async {
                let memo = format!("relay {message_id}");
                self.request_invoice(price, &memo).await
            })
            .await?;
        Ok(invoice.clone())
    }

    /// Redeem the relay obligation for `message_id`.
    pub async fn redeem_relay(&self, message_id: &MessageId) -> Result<PaymentStatus, PaymentError> {
        let invoice = self
            .relay_obligation(message_id)
            .ok_or_else(|| PaymentError::UnknownObligation(message_id.clone()))?;
        self.confirm_payment(&invoice.payment_hash).await
    }

    /// Stop tracking the relay obligation for `message_id` and its invoice.
    /// Returns the invoice if one had been opened.
    pub fn release(&self, message_id: &MessageId) -> Option<Invoice> {
        let invoice = self
            .obligations()
            .remove(message_id)
            .and_then(|cell| cell.get().cloned())?;
        self.tracked().remove(&invoice.payment_hash);
        debug!(parent: &self.span, %message_id, payment_hash = %invoice.payment_hash, "relay obligation released");
        Some(invoice)
    }

    /// The open relay obligation for `message_id`, if any.
    pub fn relay_obligation(&self, message_id: &MessageId) -> Option<Invoice> {
        self.obligations()
            .get(message_id)
            .and_then(|cell| cell.get().cloned())
    }

    /// Number of relay obligations opened so far.
    pub fn obligation_count(&self) -> usize {
        self.obligations()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    /// Sum of all settled invoice amounts.
    pub fn settled_total(&self) -> u64 {
        self.tracked()
            .values()
            .filter(|t| t.settled.is_some())
            .map(|t| t.invoice.amount)
            .sum()
    }

    pub async fn dispute(
        &self,
        case_id: Uuid,
        evidence: &DisputeEvidence,
    ) -> Result<DisputeOutcome, PaymentError> {
        let outcome = self.settler.resolve_dispute(case_id, evidence).await?;
        info!(parent: &self.span, %case_id, payment_hash = %evidence.payment_hash, ?outcome, "dispute resolved");
        Ok(outcome)
    }

    pub async fn balance(&self) -> Result<u64, PaymentError> {
        let token = self.token()?;
        Ok(self.wallet.get_balance(&token).await?)
    }

    pub async fn new_address(&self) -> Result<String, PaymentError> {
        let token = self.token()?;
        Ok(self.wallet.new_address(&token).await?)
    }

    fn token(&self) -> Result<String, PaymentError> {
        Ok(make_timed_token(&self.key, self.clock.now())?)
    }

    fn tracked(&self) -> MutexGuard<'_, HashMap<PaymentHash, TrackedInvoice>> {
        self.invoices.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn obligations(&self) -> MutexGuard<'_, HashMap<MessageId, Arc<OnceCell<Invoice>>>> {
        self.relay_obligations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}
