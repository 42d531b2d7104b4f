// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! by a gossip node. Configuration is loaded from the environment at startup
//! with [`NodeConfig::from_env`]; every value has a default except the relay
//! list and the external service URLs.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `GOSSIP_RELAYS` | Comma-separated relay endpoints | none |
//! | `GOSSIP_BROADCAST_TTL_SECS` | Time-to-live of new broadcasts | `604800` (7 days) |
//! | `GOSSIP_MAX_FRAME_TTL_SECS` | Longest lifetime honoured for any frame | `604800` (7 days) |
//! | `GOSSIP_CLOCK_SKEW_SECS` | Tolerance for future-dated frames | `30` |
//! | `GOSSIP_SWEEP_INTERVAL_SECS` | TTL sweep period | `5` |
//! | `GOSSIP_RETRACTION_TIMEOUT_SECS` | Bound on retraction fan-out | `10` |
//! | `GOSSIP_MAX_RELAY_PRICE` | Highest price this node relays for | `1000` |
//! | `GOSSIP_CERTIFIED_PRICE_THRESHOLD` | Prices above this need a certificate | `500` |
//! | `GOSSIP_CERT_CACHE_TTL_SECS` | Revocation status freshness | `300` |
//! | `GOSSIP_CERT_MAX_STALENESS_SECS` | Stale-while-revalidate window | `900` |
//! | `GOSSIP_TOKEN_MAX_AGE_SECS` | Signed timed-token freshness | `60` |
//! | `GOSSIP_RECONNECT_MIN_MS` | First reconnect delay | `250` |
//! | `GOSSIP_RECONNECT_MAX_MS` | Reconnect delay ceiling | `30000` |
//! | `SETTLER_URL` | Settler service base URL | none |
//! | `WALLET_URL` | Wallet service base URL | none |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::logging::LogFormat;
use crate::transport::{BackoffPolicy, RelayEndpoint};

pub const RELAYS_ENV: &str = "GOSSIP_RELAYS";
pub const BROADCAST_TTL_ENV: &str = "GOSSIP_BROADCAST_TTL_SECS";
pub const MAX_FRAME_TTL_ENV: &str = "GOSSIP_MAX_FRAME_TTL_SECS";
pub const CLOCK_SKEW_ENV: &str = "GOSSIP_CLOCK_SKEW_SECS";
pub const SWEEP_INTERVAL_ENV: &str = "GOSSIP_SWEEP_INTERVAL_SECS";
pub const RETRACTION_TIMEOUT_ENV: &str = "GOSSIP_RETRACTION_TIMEOUT_SECS";
pub const MAX_RELAY_PRICE_ENV: &str = "GOSSIP_MAX_RELAY_PRICE";
pub const CERTIFIED_PRICE_THRESHOLD_ENV: &str = "GOSSIP_CERTIFIED_PRICE_THRESHOLD";
pub const CERT_CACHE_TTL_ENV: &str = "GOSSIP_CERT_CACHE_TTL_SECS";
pub const CERT_MAX_STALENESS_ENV: &str = "GOSSIP_CERT_MAX_STALENESS_SECS";
pub const TOKEN_MAX_AGE_ENV: &str = "GOSSIP_TOKEN_MAX_AGE_SECS";
pub const RECONNECT_MIN_ENV: &str = "GOSSIP_RECONNECT_MIN_MS";
pub const RECONNECT_MAX_ENV: &str = "GOSSIP_RECONNECT_MAX_MS";
pub const SETTLER_URL_ENV: &str = "SETTLER_URL";
pub const WALLET_URL_ENV: &str = "WALLET_URL";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Broadcasts live for a week unless configured otherwise.
pub const DEFAULT_BROADCAST_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_MAX_FRAME_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(30);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRACTION_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_RELAY_PRICE: u64 = 1_000;
pub const DEFAULT_CERTIFIED_PRICE_THRESHOLD: u64 = 500;
pub const DEFAULT_CERT_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_CERT_MAX_STALENESS: Duration = Duration::from_secs(900);
pub const DEFAULT_TOKEN_MAX_AGE: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Relay gating and lifecycle policy of a node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub relays: Vec<RelayEndpoint>,
    pub broadcast_ttl: Duration,
    /// Inbound frames are treated as expired this long after creation,
    /// whatever TTL they claim.
    pub max_frame_ttl: Duration,
    /// How far in the future a frame's creation time may lie.
    pub clock_skew: Duration,
    pub sweep_interval: Duration,
    pub retraction_timeout: Duration,
    /// Frames priced above this are not relayed.
    pub max_relay_price: u64,
    /// Broadcasts priced above this need a valid originator certificate.
    pub certified_price_threshold: u64,
    pub cert_cache_ttl: Duration,
    pub cert_max_staleness: Duration,
    pub token_max_age: Duration,
    pub reconnect: BackoffPolicy,
    pub settler_url: Option<Url>,
    pub wallet_url: Option<Url>,
    pub log_format: LogFormat,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            relays: Vec::new(),
            broadcast_ttl: DEFAULT_BROADCAST_TTL,
            max_frame_ttl: DEFAULT_MAX_FRAME_TTL,
            clock_skew: DEFAULT_CLOCK_SKEW,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            retraction_timeout: DEFAULT_RETRACTION_TIMEOUT,
            max_relay_price: DEFAULT_MAX_RELAY_PRICE,
            certified_price_threshold: DEFAULT_CERTIFIED_PRICE_THRESHOLD,
            cert_cache_ttl: DEFAULT_CERT_CACHE_TTL,
            cert_max_staleness: DEFAULT_CERT_MAX_STALENESS,
            token_max_age: DEFAULT_TOKEN_MAX_AGE,
            reconnect: BackoffPolicy::default(),
            settler_url: None,
            wallet_url: None,
            log_format: LogFormat::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let relays = match lookup(RELAYS_ENV) {
            Some(list) => parse_relays(&list)?,
            None => Vec::new(),
        };

        let reconnect = BackoffPolicy {
            min: millis_or(&lookup, RECONNECT_MIN_ENV, defaults.reconnect.min)?,
            max: millis_or(&lookup, RECONNECT_MAX_ENV, defaults.reconnect.max)?,
        };

        Ok(Self {
            relays,
            broadcast_ttl: secs_or(&lookup, BROADCAST_TTL_ENV, defaults.broadcast_ttl)?,
            max_frame_ttl: secs_or(&lookup, MAX_FRAME_TTL_ENV, defaults.max_frame_ttl)?,
            clock_skew: secs_or(&lookup, CLOCK_SKEW_ENV, defaults.clock_skew)?,
            sweep_interval: secs_or(&lookup, SWEEP_INTERVAL_ENV, defaults.sweep_interval)?,
            retraction_timeout: secs_or(
                &lookup,
                RETRACTION_TIMEOUT_ENV,
                defaults.retraction_timeout,
            )?,
            max_relay_price: parsed_or(&lookup, MAX_RELAY_PRICE_ENV, defaults.max_relay_price)?,
            certified_price_threshold: parsed_or(
                &lookup,
                CERTIFIED_PRICE_THRESHOLD_ENV,
                defaults.certified_price_threshold,
            )?,
            cert_cache_ttl: secs_or(&lookup, CERT_CACHE_TTL_ENV, defaults.cert_cache_ttl)?,
            cert_max_staleness: secs_or(
                &lookup,
                CERT_MAX_STALENESS_ENV,
                defaults.cert_max_staleness,
            )?,
            token_max_age: secs_or(&lookup, TOKEN_MAX_AGE_ENV, defaults.token_max_age)?,
            reconnect,
            settler_url: url_opt(&lookup, SETTLER_URL_ENV)?,
            wallet_url: url_opt(&lookup, WALLET_URL_ENV)?,
            log_format: lookup(LOG_FORMAT_ENV)
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
        })
    }
}

fn parse_relays(list: &str) -> Result<Vec<RelayEndpoint>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Url::parse(s)
                .map(RelayEndpoint::new)
                .map_err(|_| ConfigError::Invalid {
                    var: RELAYS_ENV,
                    value: s.to_string(),
                })
        })
        .collect()
}

fn parsed_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

fn secs_or<F>(lookup: &F, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parsed_or(lookup, var, default.as_secs()).map(Duration::from_secs)
}

fn millis_or<F>(lookup: &F, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parsed_or(lookup, var, default.as_millis() as u64).map(Duration::from_millis)
}

fn url_opt<F>(lookup: &F, var: &'static str) -> Result<Option<Url>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|value| Url::parse(value.trim()).map_err(|_| ConfigError::Invalid { var, value }))
        .transpose()
}
