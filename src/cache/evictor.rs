//! Eviction policy: decides which Memory-tier payloads move down to SSD.
//!
//! The score combines:
//! - Access frequency over the rolling window (frequent → keep)
//! - Exponential recency decay (stale → evictable)
//! - Tenant weight (touched by a Premium/Enterprise tenant → keep)
//!
//! Lowest score is evicted first. Among equal scores the larger payload goes
//! first so that fewer demotions free the same space.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::cache::payload::PayloadId;
use crate::config::EvictionConfig;

/// A Memory-tier payload with its computed score.
#[derive(Debug, Clone, PartialEq)]
pub struct EvictionCandidate {
    pub payload_id: PayloadId,
    pub size_bytes: u64,
    pub score: f64,
}

/// The eviction order for one cycle, split at the shortest prefix whose
/// sizes cover the excess.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvictionPlan {
    /// Bytes above target when the plan was made.
    pub excess: u64,
    pub victims: Vec<EvictionCandidate>,
    /// The rest of the order, tried in turn when a victim cannot be demoted.
    pub fallback: Vec<EvictionCandidate>,
}

/// The eviction policy engine.
#[derive(Debug, Clone)]
pub struct Evictor {
    config: EvictionConfig,
}

impl Evictor {
    pub fn new(config: EvictionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvictionConfig {
        &self.config
    }

    /// Retention score of a single payload.
    ///
    /// ```text
    /// score = access_count * exp(-hours_since_last_access / decay_hours) * multiplier
    /// ```
    ///
    /// A payload never accessed scores zero.
    pub fn score(
        &self,
        access_count: u64,
        last_accessed_at: Option<DateTime<Utc>>,
        premium_accessed: bool,
        now: DateTime<Utc>,
    ) -> f64 {
        let Some(last) = last_accessed_at else {
            return 0.0;
        };
        let hours = ((now - last).num_milliseconds() as f64 / 3_600_000.0).max(0.0);
        let multiplier = if premium_accessed {
            self.config.premium_multiplier
        } else {
            1.0
        };
        access_count as f64 * (-hours / self.config.decay_hours).exp() * multiplier
    }

    /// Sort candidates into eviction order.
    pub fn rank(&self, mut candidates: Vec<EvictionCandidate>) -> Vec<EvictionCandidate> {
        candidates.sort_by(eviction_order);
        candidates
    }

    /// Rank candidates and take the shortest prefix whose sizes sum to at
    /// least `current_bytes - target_bytes`. Empty when already under target.
    pub fn plan(
        &self,
        candidates: Vec<EvictionCandidate>,
        current_bytes: u64,
        target_bytes: u64,
    ) -> EvictionPlan {
        let excess = current_bytes.saturating_sub(target_bytes);
        if excess == 0 {
            return EvictionPlan::default();
        }

        let mut ranked = self.rank(candidates);
        let mut covered = 0u64;
        let split = ranked
            .iter()
            .position(|c| {
                covered += c.size_bytes;
                covered >= excess
            })
            .map_or(ranked.len(), |i| i + 1);
        let fallback = ranked.split_off(split);
        EvictionPlan {
            excess,
            victims: ranked,
            fallback,
        }
    }
}

fn eviction_order(a: &EvictionCandidate, b: &EvictionCandidate) -> Ordering {
    a.score
        .partial_cmp(&b.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.size_bytes.cmp(&a.size_bytes))
        .then_with(|| a.payload_id.cmp(&b.payload_id))
}
