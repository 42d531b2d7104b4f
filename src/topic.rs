// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Topics and topic acceptance policies.
//!
//! A topic is the business request carried by a broadcast. The set of topic
//! kinds is closed; which ones a node is willing to serve is decided by the
//! [`TopicPolicy`] it is constructed with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A ride request: pickup and dropoff as geohashes plus a pickup window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideTopic {
    pub from_geohash: String,
    pub to_geohash: String,
    pub pickup_after: DateTime<Utc>,
    pub pickup_before: DateTime<Utc>,
    /// Estimated trip distance in meters.
    pub distance: f64,
}

/// Every topic kind a node can broadcast or receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Topic {
    Ride(RideTopic),
}

impl Topic {
    /// Stable kind label, used for relay subscription filters.
    pub fn kind(&self) -> &'static str {
        match self {
            Topic::Ride(_) => "ride",
        }
    }
}

/// Decides whether this node wants to act on a topic.
pub trait TopicPolicy: Send + Sync {
    fn accept(&self, topic: &Topic, now: DateTime<Utc>) -> bool;
}

/// Precision of a geohash good to roughly 150 m.
pub const DEFAULT_MIN_GEOHASH_PRECISION: usize = 7;

/// Accepts ride topics with precise enough endpoints whose pickup window has
/// not closed.
#[derive(Debug, Clone)]
pub struct RideTopicPolicy {
    pub min_geohash_precision: usize,
}

impl Default for RideTopicPolicy {
    fn default() -> Self {
        Self {
            min_geohash_precision: DEFAULT_MIN_GEOHASH_PRECISION,
        }
    }
}

impl TopicPolicy for RideTopicPolicy {
    fn accept(&self, topic: &Topic, now: DateTime<Utc>) -> bool {
        match topic {
            Topic::Ride(ride) => {
                ride.from_geohash.len() >= self.min_geohash_precision
                    && ride.to_geohash.len() >= self.min_geohash_precision
                    && ride.pickup_before >= now
            }
        }
    }
}

/// Accepts nothing. For nodes that only relay.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayOnlyPolicy;

impl TopicPolicy for RelayOnlyPolicy {
    fn accept(&self, _topic: &Topic, _now: DateTime<Utc>) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ride(from: &str, to: &str, before: DateTime<Utc>) -> Topic {
        Topic::Ride(RideTopic {
            from_geohash: from.to_string(),
            to_geohash: to.to_string(),
            pickup_after: before - Duration::hours(1),
            pickup_before: before,
            distance: 4_200.0,
        })
    }

    #[test]
    fn accepts_precise_future_ride() {
        let now = Utc::now();
        let policy = RideTopicPolicy::default();
        assert!(policy.accept(&ride("u4pruyd", "u4pruyf", now + Duration::minutes(30)), now));
    }

    #[test]
    fn rejects_imprecise_geohash() {
        let now = Utc::now();
        let policy = RideTopicPolicy::default();
        assert!(!policy.accept(&ride("u4pru", "u4pruyf", now + Duration::minutes(30)), now));
        assert!(!policy.accept(&ride("u4pruyd", "u4p", now + Duration::minutes(30)), now));
    }

    #[test]
    fn rejects_closed_pickup_window() {
        let now = Utc::now();
        let policy = RideTopicPolicy::default();
        assert!(!policy.accept(&ride("u4pruyd", "u4pruyf", now - Duration::seconds(1)), now));
    }

    #[test]
    fn relay_only_accepts_nothing() {
        let now = Utc::now();
        assert!(!RelayOnlyPolicy.accept(&ride("u4pruyd", "u4pruyf", now + Duration::hours(1)), now));
    }

    #[test]
    fn topic_serializes_with_kind_tag() {
        let now = Utc::now();
        let json = serde_json::to_value(ride("u4pruyd", "u4pruyf", now)).unwrap();
        assert_eq!(json["kind"], "ride");
        assert_eq!(json["body"]["from_geohash"], "u4pruyd");
    }
}
