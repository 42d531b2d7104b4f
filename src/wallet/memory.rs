// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process wallet for simulations and tests.
//!
//! Accounts are keyed by the public key inside the caller's timed token.
//! [`InMemoryWallet::pay`] plays the payer: it settles an invoice and hands
//! back the preimage, the way a real payment reveals it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{Invoice, InvoiceState, WalletApi, WalletError};
use crate::clock::Clock;
use crate::crypto::token::verify_timed_token;
use crate::crypto::PublicKey;
use crate::payment::{PaymentHash, Preimage};

const PAYMENT_REQUEST_PREFIX: &str = "lnmem1";

struct StoredInvoice {
    owner: PublicKey,
    invoice: Invoice,
    preimage: Preimage,
    state: InvoiceState,
}

#[derive(Default)]
struct State {
    balances: HashMap<PublicKey, u64>,
    invoices: HashMap<PaymentHash, StoredInvoice>,
    addresses_issued: u64,
    offline: bool,
}

pub struct InMemoryWallet {
    clock: Arc<dyn Clock>,
    token_max_age: Duration,
    state: Mutex<State>,
}

impl InMemoryWallet {
    pub fn new(clock: Arc<dyn Clock>, token_max_age: Duration) -> Self {
        Self {
            clock,
            token_max_age,
            state: Mutex::new(State::default()),
        }
    }

    /// Pay the invoice behind `payment_request`, crediting its owner.
    pub fn pay(&self, payment_request: &str) -> Result<Preimage, WalletError> {
        let hash = payment_request
            .strip_prefix(PAYMENT_REQUEST_PREFIX)
            .and_then(|hex| PaymentHash::from_hex(hex).ok())
            .ok_or(WalletError::NotFound)?;

        let now = self.clock.now();
        let mut state = self.state();
        let stored = state.invoices.get_mut(&hash).ok_or(WalletError::NotFound)?;
        match stored.state {
            InvoiceState::Open if stored.invoice.expires_at < now => {
                stored.state = InvoiceState::Cancelled;
                Err(WalletError::InvoiceProblem("invoice expired".to_string()))
            }
            InvoiceState::Open => {
                stored.state = InvoiceState::Settled {
                    preimage: stored.preimage,
                };
                let (owner, amount, preimage) =
                    (stored.owner, stored.invoice.amount, stored.preimage);
                *state.balances.entry(owner).or_default() += amount;
                Ok(preimage)
            }
            InvoiceState::Settled { .. } => {
                Err(WalletError::InvoiceProblem("invoice already paid".to_string()))
            }
            InvoiceState::Cancelled => {
                Err(WalletError::InvoiceProblem("invoice cancelled".to_string()))
            }
        }
    }

    pub fn set_online(&self, online: bool) {
        self.state().offline = !online;
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn authenticate(&self, token: &str) -> Result<PublicKey, WalletError> {
        if self.state().offline {
            return Err(WalletError::Unavailable("wallet offline".to_string()));
        }
        verify_timed_token(token, self.token_max_age, self.clock.now())
            .map(|t| t.public_key)
            .map_err(|_| WalletError::AccessDenied)
    }
}

#[async_trait]
impl WalletApi for InMemoryWallet {
    async fn new_address(&self, token: &str) -> Result<String, WalletError> {
        let owner = self.authenticate(token)?;
        let mut state = self.state();
        state.addresses_issued += 1;
        Ok(format!("mem1{}{:08x}", &owner.to_hex()[..16], state.addresses_issued))
    }

    async fn get_balance(&self, token: &str) -> Result<u64, WalletError> {
        let owner = self.authenticate(token)?;
        Ok(self.state().balances.get(&owner).copied().unwrap_or(0))
    }

    async fn add_invoice(
        &self,
        token: &str,
        amount: u64,
        memo: &str,
        expiry_secs: u64,
    ) -> Result<Invoice, WalletError> {
        let owner = self.authenticate(token)?;
        if amount == 0 {
            return Err(WalletError::InvoiceProblem("amount must be positive".to_string()));
        }
        let expiry = i64::try_from(expiry_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| WalletError::InvoiceProblem("expiry out of range".to_string()))?;

        let preimage = Preimage::random();
        let payment_hash = preimage.payment_hash();
        let invoice = Invoice {
            payment_hash,
            payment_request: format!("{PAYMENT_REQUEST_PREFIX}{payment_hash}"),
            amount,
            memo: memo.to_string(),
            expires_at: self.clock.now() + expiry,
        };
        self.state().invoices.insert(
            payment_hash,
            StoredInvoice {
                owner,
                invoice: invoice.clone(),
                preimage,
                state: InvoiceState::Open,
            },
        );
        Ok(invoice)
    }

    async fn invoice_state(
        &self,
        token: &str,
        payment_hash: &PaymentHash,
    ) -> Result<InvoiceState, WalletError> {
        let owner = self.authenticate(token)?;
        let now = self.clock.now();
        let mut state = self.state();
        let stored = state
            .invoices
            .get_mut(payment_hash)
            .filter(|s| s.owner == owner)
            .ok_or(WalletError::NotFound)?;
        if stored.state == InvoiceState::Open && stored.invoice.expires_at < now {
            stored.state = InvoiceState::Cancelled;
        }
        Ok(stored.state.clone())
    }
}
