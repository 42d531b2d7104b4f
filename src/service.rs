// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared HTTP plumbing for the settler and wallet clients.
//!
//! Every request carries a timed token as a bearer credential. Non-2xx
//! responses are expected to carry `{ "error_code": "...", "detail": "..." }`;
//! the calling client maps the code onto its own error vocabulary.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Why a service call failed, before client-specific mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ServiceFailure {
    /// The service answered with a recognisable error body.
    Rejected {
        error_code: String,
        detail: Option<String>,
    },
    /// Network failure, unexpected status, or an unreadable body.
    Unavailable(String),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error_code: String,
    #[serde(default)]
    detail: Option<String>,
}

/// Classify a failed response body.
pub(crate) fn classify_error(status: u16, body: &str) -> ServiceFailure {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => ServiceFailure::Rejected {
            error_code: parsed.error_code.trim().to_ascii_lowercase(),
            detail: parsed.detail,
        },
        Err(_) => ServiceFailure::Unavailable(format!("status {status}: {body}")),
    }
}

pub(crate) struct ServiceClient {
    base_url: Url,
    http: Client,
}

impl ServiceClient {
    pub(crate) fn new(base_url: Url) -> Result<Self, ServiceFailure> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ServiceFailure::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { base_url, http })
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
    ) -> Result<T, ServiceFailure> {
        let response = self
            .http
            .get(self.endpoint(path))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ServiceFailure::Unavailable(format!("GET {path} failed: {e}")))?;
        Self::read(response, "GET", path).await
    }

    pub(crate) async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
        body: &B,
    ) -> Result<T, ServiceFailure> {
        let response = self
            .http
            .post(self.endpoint(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| ServiceFailure::Unavailable(format!("POST {path} failed: {e}")))?;
        Self::read(response, "POST", path).await
    }

    async fn read<T: DeserializeOwned>(
        response: reqwest::Response,
        method: &str,
        path: &str,
    ) -> Result<T, ServiceFailure> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &body));
        }
        response.json().await.map_err(|e| {
            ServiceFailure::Unavailable(format!("{method} {path} invalid JSON: {e}"))
        })
    }
}
