//! Predictive preload: decides which payloads should be promoted before they
//! are requested.
//!
//! Triggers:
//! 1. Interaction start: every payload of the model to SSD; for Premium and
//!    Enterprise tenants the first/last layers go to Memory
//! 2. Scheduled (time of day): top-N payloads by trailing access count to SSD
//! 3. Tenant: reserved payloads and the tenant's most-used models, to Memory
//!    for Premium/Enterprise and to SSD for Standard
//!
//! The planner only produces requests. Placement is carried out by the tier
//! manager, which keeps the Memory capacity bound.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::cache::payload::{ModelId, PayloadId, Tier};
use crate::config::PreloadConfig;
use crate::tenant::SubscriptionTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PreloadReason {
    Interaction,
    Scheduled,
    Tenant,
}

/// A preload request: place a payload in at least `target_tier`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreloadRequest {
    pub payload_id: PayloadId,
    pub target_tier: Tier,
    pub reason: PreloadReason,
}

/// One payload of a model as seen by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelLayer {
    pub payload_id: PayloadId,
    pub layer_index: Option<u32>,
}

pub struct PreloadPlanner {
    config: PreloadConfig,
}

impl PreloadPlanner {
    pub fn new(config: PreloadConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PreloadConfig {
        &self.config
    }

    /// Requests for the start of a multi-step interaction on one model.
    pub fn plan_interaction(&self, layers: &[ModelLayer], tier: SubscriptionTier) -> Vec<PreloadRequest> {
        let mut ordered: Vec<&ModelLayer> = layers.iter().collect();
        ordered.sort_by(|a, b| {
            a.layer_index
                .cmp(&b.layer_index)
                .then_with(|| a.payload_id.cmp(&b.payload_id))
        });

        let n = ordered.len();
        let edge = if tier.is_premium() {
            self.config.premium_memory_layers
        } else {
            0
        };

        ordered
            .into_iter()
            .enumerate()
            .map(|(i, layer)| {
                let at_edge = i < edge || i + edge >= n;
                PreloadRequest {
                    payload_id: layer.payload_id.clone(),
                    target_tier: if at_edge { Tier::Memory } else { Tier::Ssd },
                    reason: PreloadReason::Interaction,
                }
            })
            .collect()
    }

    /// Top-N payloads by trailing access count, highest first.
    pub fn plan_scheduled(&self, counts: &HashMap<PayloadId, u64>) -> Vec<PreloadRequest> {
        top_by_count(counts, self.config.scheduled_top_n)
            .into_iter()
            .map(|payload_id| PreloadRequest {
                payload_id,
                target_tier: Tier::Ssd,
                reason: PreloadReason::Scheduled,
            })
            .collect()
    }

    /// The tenant's most-used models, highest usage first.
    pub fn top_models(&self, model_counts: &HashMap<ModelId, u64>) -> Vec<ModelId> {
        top_by_count(model_counts, self.config.tenant_top_models)
    }

    /// Requests for a tenant trigger. Free tenants get nothing.
    pub fn plan_tenant(
        &self,
        tier: SubscriptionTier,
        reserved: &[PayloadId],
        model_payloads: &[PayloadId],
    ) -> Vec<PreloadRequest> {
        let target_tier = match tier {
            SubscriptionTier::Premium | SubscriptionTier::Enterprise => Tier::Memory,
            SubscriptionTier::Standard => Tier::Ssd,
            SubscriptionTier::Free => return Vec::new(),
        };

        let mut seen = std::collections::HashSet::new();
        reserved
            .iter()
            .chain(model_payloads)
            .filter(|id| seen.insert(id.as_str()))
            .map(|id| PreloadRequest {
                payload_id: id.clone(),
                target_tier,
                reason: PreloadReason::Tenant,
            })
            .collect()
    }
}

fn top_by_count(counts: &HashMap<String, u64>, n: usize) -> Vec<String> {
    let mut ranked: Vec<(&String, u64)> = counts
        .iter()
        .filter(|(_, c)| **c > 0)
        .map(|(k, c)| (k, *c))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.into_iter().take(n).map(|(k, _)| k.clone()).collect()
}

/// Fires at most once per UTC day, during the configured hour.
#[derive(Debug)]
pub struct ScheduledTrigger {
    hour_utc: u32,
    last_fired: Mutex<Option<NaiveDate>>,
}

impl ScheduledTrigger {
    pub fn new(hour_utc: u32) -> Self {
        Self {
            hour_utc,
            last_fired: Mutex::new(None),
        }
    }

    pub fn should_fire(&self, now: DateTime<Utc>) -> bool {
        if now.hour() != self.hour_utc {
            return false;
        }
        let today = now.date_naive();
        let mut last = self.last_fired.lock();
        if *last == Some(today) {
            return false;
        }
        *last = Some(today);
        true
    }
}
