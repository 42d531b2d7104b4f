// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Certificate validation against trusted settlers.
//!
//! Revocation status is cached per certificate id in a bounded LRU. A fresh
//! entry (younger than `cache_ttl`) is served as is. A stale entry younger
//! than `max_staleness` is served while a background task refreshes it, so a
//! slow settler does not stall frame processing. Anything older is fetched
//! inline. A certificate once seen revoked stays revoked.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use tracing::{debug, warn, Instrument, Span};
use url::Url;
use uuid::Uuid;

use super::{Certificate, CertificateStatus, TrustError};
use crate::clock::Clock;
use crate::crypto::PublicKey;
use crate::settler::{CertificateRequest, SettlerApi, SettlerError};

pub const DEFAULT_REVOCATION_CACHE_CAPACITY: usize = 4_096;

#[derive(Debug, Clone, Copy)]
struct RevocationEntry {
    revoked: bool,
    fetched_at: DateTime<Utc>,
    refreshing: bool,
}

type RevocationCache = Arc<Mutex<LruCache<Uuid, RevocationEntry>>>;

fn lock(cache: &RevocationCache) -> MutexGuard<'_, LruCache<Uuid, RevocationEntry>> {
    cache.lock().unwrap_or_else(|e| e.into_inner())
}

enum Cached {
    Fresh(bool),
    /// Served stale; caller should refresh in the background.
    Stale(bool),
    Miss,
}

pub struct CertificateAuthorityClient {
    trusted: HashMap<Url, PublicKey>,
    settler: Arc<dyn SettlerApi>,
    clock: Arc<dyn Clock>,
    revocations: RevocationCache,
    issued: Mutex<HashMap<PublicKey, Certificate>>,
    cache_ttl: chrono::Duration,
    max_staleness: chrono::Duration,
    span: Span,
}

impl CertificateAuthorityClient {
    pub fn new(
        settler: Arc<dyn SettlerApi>,
        clock: Arc<dyn Clock>,
        cache_ttl: Duration,
        max_staleness: Duration,
        span: Span,
    ) -> Self {
        let capacity = NonZeroUsize::new(DEFAULT_REVOCATION_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            trusted: HashMap::new(),
            settler,
            clock,
            revocations: Arc::new(Mutex::new(LruCache::new(capacity))),
            issued: Mutex::new(HashMap::new()),
            cache_ttl: to_chrono(cache_ttl),
            max_staleness: to_chrono(max_staleness.max(cache_ttl)),
            span,
        }
    }

    /// Trust certificates from the settler at `service_uri` signed by `key`.
    pub fn trust(mut self, service_uri: Url, key: PublicKey) -> Self {
        self.trusted.insert(service_uri, key);
        self
    }

    /// Full validation of `cert` as presented by `expected_subject`.
    ///
    /// Checks run cheapest first: subject, issuer signature, validity window,
    /// then revocation. An error means the revocation status could not be
    /// established at all.
    pub async fn validate_certificate(
        &self,
        cert: &Certificate,
        expected_subject: &PublicKey,
    ) -> Result<CertificateStatus, SettlerError> {
        let status = self.offline_status(cert, expected_subject);
        if !status.is_valid() {
            debug!(parent: &self.span, certificate = %cert.id, %status, "certificate rejected");
            return Ok(status);
        }
        if self.check_revocation(cert.id).await? {
            debug!(parent: &self.span, certificate = %cert.id, "certificate revoked");
            return Ok(CertificateStatus::Revoked);
        }
        Ok(CertificateStatus::Valid)
    }

    /// [`Self::validate_certificate`] as a gate.
    pub async fn require_valid(
        &self,
        cert: &Certificate,
        expected_subject: &PublicKey,
    ) -> Result<(), TrustError> {
        let status = self.validate_certificate(cert, expected_subject).await?;
        match TrustError::from_status(status) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Require `cert` to carry `name = value`. Does not validate the certificate.
    pub fn require_attribute(
        &self,
        cert: &Certificate,
        name: &str,
        value: &str,
    ) -> Result<(), TrustError> {
        if cert.attribute(name) == Some(value) {
            Ok(())
        } else {
            Err(TrustError::MissingAttribute {
                name: name.to_string(),
            })
        }
    }

    /// Get a certificate for `request.subject`, reusing a previously issued
    /// one while it is inside its window and covers the requested attributes.
    pub async fn obtain_certificate(
        &self,
        request: &CertificateRequest,
    ) -> Result<Certificate, TrustError> {
        let now = self.clock.now();
        let cached = self
            .issued_certificates()
            .get(&request.subject)
            .filter(|cert| cert.window_status(now).is_valid())
            .filter(|cert| covers(&cert.attributes, &request.attributes))
            .cloned();
        if let Some(cert) = cached {
            return Ok(cert);
        }

        let cert = self.settler.issue_certificate(request).await?;
        let status = self.offline_status(&cert, &request.subject);
        if let Some(err) = TrustError::from_status(status) {
            warn!(parent: &self.span, certificate = %cert.id, %status, "settler issued an unusable certificate");
            return Err(err);
        }

        self.issued_certificates()
            .insert(request.subject, cert.clone());
        debug!(parent: &self.span, certificate = %cert.id, "certificate obtained");
        Ok(cert)
    }

    /// `true` if `certificate_id` is revoked. Served from cache when possible.
    pub async fn check_revocation(&self, certificate_id: Uuid) -> Result<bool, SettlerError> {
        match self.cached(certificate_id) {
            Cached::Fresh(revoked) => Ok(revoked),
            Cached::Stale(revoked) => {
                self.spawn_refresh(certificate_id);
                Ok(revoked)
            }
            Cached::Miss => {
                let revoked = self.settler.check_revocation(certificate_id).await?;
                store(&self.revocations, certificate_id, revoked, self.clock.now());
                Ok(revoked)
            }
        }
    }

    /// Subject, signature and window checks; no settler round-trip.
    fn offline_status(&self, cert: &Certificate, expected_subject: &PublicKey) -> CertificateStatus {
        if cert.subject != *expected_subject {
            return CertificateStatus::SubjectMismatch;
        }
        let Some(issuer) = self.trusted.get(&cert.service_uri) else {
            return CertificateStatus::SignatureInvalid;
        };
        if !cert.verify_signature(issuer) {
            return CertificateStatus::SignatureInvalid;
        }
        cert.window_status(self.clock.now())
    }

    fn cached(&self, certificate_id: Uuid) -> Cached {
        let now = self.clock.now();
        let mut cache = lock(&self.revocations);
        let Some(entry) = cache.get_mut(&certificate_id) else {
            return Cached::Miss;
        };
        let age = now - entry.fetched_at;
        if entry.revoked || age < self.cache_ttl {
            return Cached::Fresh(entry.revoked);
        }
        if age < self.max_staleness {
            if entry.refreshing {
                return Cached::Fresh(entry.revoked);
            }
            entry.refreshing = true;
            return Cached::Stale(entry.revoked);
        }
        cache.pop(&certificate_id);
        Cached::Miss
    }

    fn spawn_refresh(&self, certificate_id: Uuid) {
        let settler = Arc::clone(&self.settler);
        let cache = Arc::clone(&self.revocations);
        let clock = Arc::clone(&self.clock);
        let span = self.span.clone();

        tokio::spawn(
            async move {
                match settler.check_revocation(certificate_id).await {
                    Ok(revoked) => store(&cache, certificate_id, revoked, clock.now()),
                    Err(e) => {
                        warn!(certificate = %certificate_id, error = %e, "revocation refresh failed");
                        if let Some(entry) = lock(&cache).get_mut(&certificate_id) {
                            entry.refreshing = false;
                        }
                    }
                }
            }
            .instrument(span),
        );
    }

    fn issued_certificates(&self) -> MutexGuard<'_, HashMap<PublicKey, Certificate>> {
        self.issued.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn store(cache: &RevocationCache, certificate_id: Uuid, revoked: bool, now: DateTime<Utc>) {
    lock(cache).put(
        certificate_id,
        RevocationEntry {
            revoked,
            fetched_at: now,
            refreshing: false,
        },
    );
}

fn covers(granted: &BTreeMap<String, String>, wanted: &BTreeMap<String, String>) -> bool {
    wanted
        .iter()
        .all(|(name, value)| granted.get(name) == Some(value))
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}
