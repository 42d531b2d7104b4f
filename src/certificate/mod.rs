// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Settler-issued certificates.
//!
//! A certificate binds a subject public key to a set of attributes (for
//! example `"driver" = "true"`) for a bounded validity window. It is signed
//! by the settler service named in `service_uri`; a node trusts a settler by
//! configuring that settler's public key in its [`CertificateAuthorityClient`].

mod client;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::crypto::{sign_object, verify_object, CryptoError, PrivateKey, PublicKey, Signature};
use crate::settler::SettlerError;

pub use client::{CertificateAuthorityClient, DEFAULT_REVOCATION_CACHE_CAPACITY};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: Uuid,
    /// Base URI of the issuing settler.
    pub service_uri: Url,
    pub subject: PublicKey,
    pub attributes: BTreeMap<String, String>,
    pub issued_at: DateTime<Utc>,
    pub not_valid_before: DateTime<Utc>,
    pub not_valid_after: DateTime<Utc>,
    pub signature: Signature,
}

/// Everything the issuer signs.
#[derive(Serialize)]
struct CertificateBody<'a> {
    id: &'a Uuid,
    service_uri: &'a Url,
    subject: &'a PublicKey,
    attributes: &'a BTreeMap<String, String>,
    issued_at: &'a DateTime<Utc>,
    not_valid_before: &'a DateTime<Utc>,
    not_valid_after: &'a DateTime<Utc>,
}

impl Certificate {
    fn body(&self) -> CertificateBody<'_> {
        CertificateBody {
            id: &self.id,
            service_uri: &self.service_uri,
            subject: &self.subject,
            attributes: &self.attributes,
            issued_at: &self.issued_at,
            not_valid_before: &self.not_valid_before,
            not_valid_after: &self.not_valid_after,
        }
    }

    /// `true` if `issuer` signed exactly this certificate.
    pub fn verify_signature(&self, issuer: &PublicKey) -> bool {
        verify_object(&self.body(), &self.signature, issuer)
    }

    /// Window check only; says nothing about signature or revocation.
    pub fn window_status(&self, now: DateTime<Utc>) -> CertificateStatus {
        if now < self.not_valid_before {
            CertificateStatus::NotYetValid
        } else if now > self.not_valid_after {
            CertificateStatus::Expired
        } else {
            CertificateStatus::Valid
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Outcome of validating a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    Valid,
    Expired,
    NotYetValid,
    Revoked,
    /// Bad signature, or an issuer this node does not trust.
    SignatureInvalid,
    /// Signed for a different public key than the one presenting it.
    SubjectMismatch,
}

impl CertificateStatus {
    pub fn is_valid(self) -> bool {
        self == CertificateStatus::Valid
    }
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CertificateStatus::Valid => "valid",
            CertificateStatus::Expired => "expired",
            CertificateStatus::NotYetValid => "not yet valid",
            CertificateStatus::Revoked => "revoked",
            CertificateStatus::SignatureInvalid => "signature invalid",
            CertificateStatus::SubjectMismatch => "subject mismatch",
        };
        f.write_str(label)
    }
}

/// Why a trust-dependent action was refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrustError {
    #[error("certificate expired")]
    Expired,

    #[error("certificate not yet valid")]
    NotYetValid,

    #[error("certificate revoked")]
    Revoked,

    #[error("certificate signature invalid")]
    SignatureInvalid,

    #[error("certificate subject mismatch")]
    SubjectMismatch,

    #[error("no certificate presented")]
    MissingCertificate,

    #[error("certificate lacks attribute {name:?}")]
    MissingAttribute { name: String },

    /// Revocation status could not be established; treated as untrusted.
    #[error("settler error: {0}")]
    Settler(#[from] SettlerError),
}

impl TrustError {
    /// The rejection matching a non-valid status, `None` for `Valid`.
    pub fn from_status(status: CertificateStatus) -> Option<Self> {
        match status {
            CertificateStatus::Valid => None,
            CertificateStatus::Expired => Some(TrustError::Expired),
            CertificateStatus::NotYetValid => Some(TrustError::NotYetValid),
            CertificateStatus::Revoked => Some(TrustError::Revoked),
            CertificateStatus::SignatureInvalid => Some(TrustError::SignatureInvalid),
            CertificateStatus::SubjectMismatch => Some(TrustError::SubjectMismatch),
        }
    }
}

/// Issuing side of a settler: signs certificates with the settler key.
#[derive(Debug, Clone)]
pub struct CertificateAuthority {
    service_uri: Url,
    key: PrivateKey,
}

impl CertificateAuthority {
    pub fn new(service_uri: Url, key: PrivateKey) -> Self {
        Self { service_uri, key }
    }

    pub fn service_uri(&self) -> &Url {
        &self.service_uri
    }

    pub fn public_key(&self) -> PublicKey {
        self.key.public_key()
    }

    pub fn issue(
        &self,
        subject: PublicKey,
        attributes: BTreeMap<String, String>,
        issued_at: DateTime<Utc>,
        not_valid_before: DateTime<Utc>,
        not_valid_after: DateTime<Utc>,
    ) -> Result<Certificate, CryptoError> {
        let id = Uuid::new_v4();
        let body = CertificateBody {
            id: &id,
            service_uri: &self.service_uri,
            subject: &subject,
            attributes: &attributes,
            issued_at: &issued_at,
            not_valid_before: &not_valid_before,
            not_valid_after: &not_valid_after,
        };
        let signature = sign_object(&body, &self.key)?;
        Ok(Certificate {
            id,
            service_uri: self.service_uri.clone(),
            subject,
            attributes,
            issued_at,
            not_valid_before,
            not_valid_after,
            signature,
        })
    }
}
