// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP client for a wallet deployment.
//!
//! The caller passes the timed token explicitly so the wallet account is
//! always the caller's, never the client's.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{Invoice, InvoiceState, WalletApi, WalletError};
use crate::payment::PaymentHash;
use crate::service::{ServiceClient, ServiceFailure};

#[derive(Debug, Deserialize)]
struct AddressResponse {
    address: String,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: u64,
}

#[derive(Debug, Serialize)]
struct AddInvoiceRequest<'a> {
    amount: u64,
    memo: &'a str,
    expiry_secs: u64,
}

pub struct HttpWalletClient {
    service: ServiceClient,
}

impl HttpWalletClient {
    pub fn new(base_url: Url) -> Result<Self, WalletError> {
        let service = ServiceClient::new(base_url).map_err(map_failure)?;
        Ok(Self { service })
    }
}

fn map_failure(failure: ServiceFailure) -> WalletError {
    match failure {
        ServiceFailure::Rejected { error_code, detail } => WalletError::from_code(&error_code, detail),
        ServiceFailure::Unavailable(reason) => WalletError::Unavailable(reason),
    }
}

#[async_trait]
impl WalletApi for HttpWalletClient {
    async fn new_address(&self, token: &str) -> Result<String, WalletError> {
        let response: AddressResponse = self
            .service
            .post_json(token, "/addresses", &serde_json::json!({}))
            .await
            .map_err(map_failure)?;
        Ok(response.address)
    }

    async fn get_balance(&self, token: &str) -> Result<u64, WalletError> {
        let response: BalanceResponse = self
            .service
            .get_json(token, "/balance")
            .await
            .map_err(map_failure)?;
        Ok(response.balance)
    }

    async fn add_invoice(
        &self,
        token: &str,
        amount: u64,
        memo: &str,
        expiry_secs: u64,
    ) -> Result<Invoice, WalletError> {
        let request = AddInvoiceRequest {
            amount,
            memo,
            expiry_secs,
        };
        self.service
            .post_json(token, "/invoices", &request)
            .await
            .map_err(map_failure)
    }

    async fn invoice_state(
        &self,
        token: &str,
        payment_hash: &PaymentHash,
    ) -> Result<InvoiceState, WalletError> {
        self.service
            .get_json(token, &format!("/invoices/{payment_hash}"))
            .await
            .map_err(map_failure)
    }
}
