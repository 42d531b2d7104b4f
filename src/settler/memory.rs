// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process settler for simulations and tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use url::Url;
use uuid::Uuid;

use super::{
    CertificateRequest, DisputeEvidence, DisputeOutcome, SettlerApi, SettlerError,
};
use crate::certificate::{Certificate, CertificateAuthority};
use crate::clock::Clock;
use crate::crypto::PublicKey;
use crate::payment::PaymentHash;

/// Certificates are valid for a day unless configured otherwise.
const DEFAULT_VALIDITY_HOURS: i64 = 24;

#[derive(Default)]
struct State {
    grants: HashMap<PublicKey, BTreeMap<String, String>>,
    expected_payments: HashSet<PaymentHash>,
    issued: HashSet<Uuid>,
    revoked: HashSet<Uuid>,
    cases: HashMap<Uuid, PaymentHash>,
    revocation_checks: usize,
    offline: bool,
}

pub struct InMemorySettler {
    authority: CertificateAuthority,
    clock: Arc<dyn Clock>,
    validity: chrono::Duration,
    state: Mutex<State>,
}

impl InMemorySettler {
    pub fn new(authority: CertificateAuthority, clock: Arc<dyn Clock>) -> Self {
        Self {
            authority,
            clock,
            validity: chrono::Duration::hours(DEFAULT_VALIDITY_HOURS),
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_validity(mut self, validity: chrono::Duration) -> Self {
        self.validity = validity;
        self
    }

    pub fn public_key(&self) -> PublicKey {
        self.authority.public_key()
    }

    pub fn service_uri(&self) -> &Url {
        self.authority.service_uri()
    }

    /// Allow `subject` to be certified with `name = value`.
    pub fn grant(&self, subject: PublicKey, name: &str, value: &str) {
        self.state()
            .grants
            .entry(subject)
            .or_default()
            .insert(name.to_string(), value.to_string());
    }

    /// Accept `payment_hash` as payment for one certificate.
    pub fn expect_payment(&self, payment_hash: PaymentHash) {
        self.state().expected_payments.insert(payment_hash);
    }

    /// Issue directly, skipping grants and payment.
    pub fn issue_for(
        &self,
        subject: PublicKey,
        attributes: BTreeMap<String, String>,
    ) -> Result<Certificate, SettlerError> {
        let now = self.clock.now();
        let cert = self
            .authority
            .issue(subject, attributes, now, now, now + self.validity)
            .map_err(|e| SettlerError::Unavailable(e.to_string()))?;
        self.state().issued.insert(cert.id);
        Ok(cert)
    }

    pub fn revoke(&self, certificate_id: Uuid) {
        self.state().revoked.insert(certificate_id);
    }

    /// Register a dispute over `payment_hash`; returns the case id.
    pub fn open_case(&self, payment_hash: PaymentHash) -> Uuid {
        let case_id = Uuid::new_v4();
        self.state().cases.insert(case_id, payment_hash);
        case_id
    }

    /// Simulate an outage. Every call fails with `Unavailable` while offline.
    pub fn set_online(&self, online: bool) {
        self.state().offline = !online;
    }

    /// Number of revocation lookups served so far.
    pub fn revocation_checks(&self) -> usize {
        self.state().revocation_checks
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_online(state: &State) -> Result<(), SettlerError> {
        if state.offline {
            Err(SettlerError::Unavailable("settler offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SettlerApi for InMemorySettler {
    async fn issue_certificate(
        &self,
        request: &CertificateRequest,
    ) -> Result<Certificate, SettlerError> {
        {
            let state = self.state();
            Self::ensure_online(&state)?;

            let proof = &request.proof_of_payment;
            if !proof.preimage.unlocks(&proof.payment_hash)
                || !state.expected_payments.contains(&proof.payment_hash)
            {
                return Err(SettlerError::UnknownPreimage);
            }

            let granted = state.grants.get(&request.subject);
            for (name, value) in &request.attributes {
                if granted.and_then(|g| g.get(name)) != Some(value) {
                    return Err(SettlerError::AccessDenied);
                }
            }
        }
        self.issue_for(request.subject, request.attributes.clone())
    }

    async fn check_revocation(&self, certificate_id: Uuid) -> Result<bool, SettlerError> {
        let mut state = self.state();
        Self::ensure_online(&state)?;
        state.revocation_checks += 1;
        if !state.issued.contains(&certificate_id) {
            return Err(SettlerError::UnknownCertificate);
        }
        Ok(state.revoked.contains(&certificate_id))
    }

    async fn resolve_dispute(
        &self,
        case_id: Uuid,
        evidence: &DisputeEvidence,
    ) -> Result<DisputeOutcome, SettlerError> {
        let state = self.state();
        Self::ensure_online(&state)?;
        let disputed = state.cases.get(&case_id).ok_or(SettlerError::NotFound)?;
        if *disputed != evidence.payment_hash {
            return Err(SettlerError::InvoiceProblem(
                "evidence refers to another payment".to_string(),
            ));
        }
        let proven = evidence
            .preimage
            .is_some_and(|p| p.unlocks(&evidence.payment_hash));
        Ok(if proven {
            DisputeOutcome::Upheld
        } else {
            DisputeOutcome::Refunded
        })
    }
}
