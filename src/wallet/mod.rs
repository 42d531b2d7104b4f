// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet service boundary.
//!
//! The wallet holds funds and issues hash-locked invoices. Every call is
//! authorized by a timed token minted by the caller, so the wallet knows
//! which account is asking.

mod http;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::payment::{PaymentHash, Preimage};

pub use http::HttpWalletClient;
pub use memory::InMemoryWallet;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    #[error("access denied")]
    AccessDenied,

    #[error("not found")]
    NotFound,

    #[error("invoice problem: {0}")]
    InvoiceProblem(String),

    #[error("wallet unavailable: {0}")]
    Unavailable(String),
}

impl WalletError {
    pub fn from_code(code: &str, detail: Option<String>) -> Self {
        match code {
            "access_denied" | "invalid_token" => WalletError::AccessDenied,
            "not_found" | "unknown_invoice" => WalletError::NotFound,
            "invoice_problem" | "invoice_expired" | "invoice_already_paid" => {
                WalletError::InvoiceProblem(detail.unwrap_or_else(|| code.to_string()))
            }
            other => WalletError::Unavailable(format!("unexpected error code {other}")),
        }
    }
}

/// A hash-locked payment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub payment_hash: PaymentHash,
    /// Encoded request handed to the payer.
    pub payment_request: String,
    pub amount: u64,
    pub memo: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InvoiceState {
    Open,
    Settled { preimage: Preimage },
    Cancelled,
}

#[async_trait]
pub trait WalletApi: Send + Sync {
    async fn new_address(&self, token: &str) -> Result<String, WalletError>;

    async fn get_balance(&self, token: &str) -> Result<u64, WalletError>;

    async fn add_invoice(
        &self,
        token: &str,
        amount: u64,
        memo: &str,
        expiry_secs: u64,
    ) -> Result<Invoice, WalletError>;

    async fn invoice_state(
        &self,
        token: &str,
        payment_hash: &PaymentHash,
    ) -> Result<InvoiceState, WalletError>;
}
