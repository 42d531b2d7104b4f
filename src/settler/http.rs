// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP client for a settler deployment.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | issue certificate | `POST /certificates` |
//! | revocation status | `GET /certificates/{id}/revocation` |
//! | resolve dispute | `POST /disputes/{case_id}` |

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use super::{CertificateRequest, DisputeEvidence, DisputeOutcome, SettlerApi, SettlerError};
use crate::certificate::Certificate;
use crate::clock::Clock;
use crate::crypto::token::make_timed_token;
use crate::crypto::PrivateKey;
use crate::service::{ServiceClient, ServiceFailure};

#[derive(Debug, Deserialize)]
struct RevocationResponse {
    revoked: bool,
}

#[derive(Debug, Deserialize)]
struct DisputeResponse {
    outcome: DisputeOutcome,
}

pub struct HttpSettlerClient {
    service: ServiceClient,
    key: PrivateKey,
    clock: Arc<dyn Clock>,
}

impl HttpSettlerClient {
    /// `key` authenticates this node to the settler.
    pub fn new(base_url: Url, key: PrivateKey, clock: Arc<dyn Clock>) -> Result<Self, SettlerError> {
        let service = ServiceClient::new(base_url).map_err(map_failure)?;
        Ok(Self {
            service,
            key,
            clock,
        })
    }

    fn token(&self) -> Result<String, SettlerError> {
        make_timed_token(&self.key, self.clock.now())
            .map_err(|e| SettlerError::Unavailable(format!("failed to mint token: {e}")))
    }
}

fn map_failure(failure: ServiceFailure) -> SettlerError {
    match failure {
        ServiceFailure::Rejected { error_code, detail } => {
            SettlerError::from_code(&error_code, detail)
        }
        ServiceFailure::Unavailable(reason) => SettlerError::Unavailable(reason),
    }
}

#[async_trait]
impl SettlerApi for HttpSettlerClient {
    async fn issue_certificate(
        &self,
        request: &CertificateRequest,
    ) -> Result<Certificate, SettlerError> {
        self.service
            .post_json(&self.token()?, "/certificates", request)
            .await
            .map_err(map_failure)
    }

    async fn check_revocation(&self, certificate_id: Uuid) -> Result<bool, SettlerError> {
        let response: RevocationResponse = self
            .service
            .get_json(&self.token()?, &format!("/certificates/{certificate_id}/revocation"))
            .await
            .map_err(map_failure)?;
        Ok(response.revoked)
    }

    async fn resolve_dispute(
        &self,
        case_id: Uuid,
        evidence: &DisputeEvidence,
    ) -> Result<DisputeOutcome, SettlerError> {
        let response: DisputeResponse = self
            .service
            .post_json(&self.token()?, &format!("/disputes/{case_id}"), evidence)
            .await
            .map_err(map_failure)?;
        Ok(response.outcome)
    }
}
