// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Settler service boundary.
//!
//! The settler issues and revokes certificates and arbitrates payment
//! disputes. It is an external service; [`HttpSettlerClient`] talks to a real
//! deployment and [`InMemorySettler`] stands in for it in simulations and
//! tests.

mod http;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::certificate::Certificate;
use crate::crypto::PublicKey;
use crate::payment::{PaymentHash, Preimage};

pub use http::HttpSettlerClient;
pub use memory::InMemorySettler;

/// Failures reported by a settler. The first five are the service's closed
/// error vocabulary; `Unavailable` covers everything below it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlerError {
    #[error("access denied")]
    AccessDenied,

    #[error("not found")]
    NotFound,

    #[error("unknown certificate")]
    UnknownCertificate,

    #[error("unknown preimage")]
    UnknownPreimage,

    #[error("invoice problem: {0}")]
    InvoiceProblem(String),

    #[error("settler unavailable: {0}")]
    Unavailable(String),
}

impl SettlerError {
    /// Map a service `error_code` to its variant.
    pub fn from_code(code: &str, detail: Option<String>) -> Self {
        match code {
            "access_denied" | "property_not_granted" | "invalid_token" => SettlerError::AccessDenied,
            "not_found" => SettlerError::NotFound,
            "unknown_certificate" => SettlerError::UnknownCertificate,
            "unknown_preimage" => SettlerError::UnknownPreimage,
            "invoice_problem" => {
                SettlerError::InvoiceProblem(detail.unwrap_or_else(|| code.to_string()))
            }
            other => SettlerError::Unavailable(format!("unexpected error code {other}")),
        }
    }
}

/// Payment made to the settler for a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOfPayment {
    pub payment_hash: PaymentHash,
    pub preimage: Preimage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    pub subject: PublicKey,
    pub attributes: BTreeMap<String, String>,
    pub proof_of_payment: ProofOfPayment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeEvidence {
    pub payment_hash: PaymentHash,
    /// Preimage proving the disputed payment was delivered, if the claimant has it.
    pub preimage: Option<Preimage>,
    pub statement: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    /// Delivery proven; the payee keeps the payment.
    Upheld,
    /// Delivery not proven; the payer is refunded.
    Refunded,
}

#[async_trait]
pub trait SettlerApi: Send + Sync {
    async fn issue_certificate(
        &self,
        request: &CertificateRequest,
    ) -> Result<Certificate, SettlerError>;

    /// `true` if the certificate has been revoked.
    async fn check_revocation(&self, certificate_id: Uuid) -> Result<bool, SettlerError>;

    async fn resolve_dispute(
        &self,
        case_id: Uuid,
        evidence: &DisputeEvidence,
    ) -> Result<DisputeOutcome, SettlerError>;
}
