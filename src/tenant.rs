//! Tenant quota store.
//!
//! Per-tenant limits and subscription tier. Written by administrators, read on
//! every admission decision and by cache scoring (tenant weight).

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::payload::PayloadId;
use crate::error::{Error, Result};

/// Subscription tier of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubscriptionTier {
    Free,
    Standard,
    Premium,
    Enterprise,
}

impl SubscriptionTier {
    /// Premium and Enterprise tenants get cache weight and Memory preloads.
    pub fn is_premium(&self) -> bool {
        matches!(self, SubscriptionTier::Premium | SubscriptionTier::Enterprise)
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionTier::Free => write!(f, "free"),
            SubscriptionTier::Standard => write!(f, "standard"),
            SubscriptionTier::Premium => write!(f, "premium"),
            SubscriptionTier::Enterprise => write!(f, "enterprise"),
        }
    }
}

/// Limits for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantQuota {
    pub tenant_id: String,

    /// Upper bound on Pending + Processing items.
    pub max_concurrent_requests: usize,

    /// Upper bound on Pending items.
    pub max_queued_requests: usize,

    pub subscription_tier: SubscriptionTier,

    /// Payloads kept warm for this tenant by the tenant preload trigger.
    #[serde(default)]
    pub reserved_payload_ids: Vec<PayloadId>,
}

impl TenantQuota {
    pub fn new(
        tenant_id: impl Into<String>,
        subscription_tier: SubscriptionTier,
        max_concurrent_requests: usize,
        max_queued_requests: usize,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            max_concurrent_requests,
            max_queued_requests,
            subscription_tier,
            reserved_payload_ids: Vec::new(),
        }
    }
}

/// Concurrent tenant quota table.
#[derive(Debug, Default)]
pub struct QuotaStore {
    quotas: DashMap<String, TenantQuota>,
}

impl QuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tenant's quota.
    pub fn set(&self, tenant_id: &str, mut quota: TenantQuota) {
        quota.tenant_id = tenant_id.to_string();
        info!(
            tenant_id,
            tier = %quota.subscription_tier,
            max_concurrent = quota.max_concurrent_requests,
            max_queued = quota.max_queued_requests,
            "Tenant quota set"
        );
        self.quotas.insert(tenant_id.to_string(), quota);
    }

    pub fn get(&self, tenant_id: &str) -> Result<TenantQuota> {
        self.quotas
            .get(tenant_id)
            .map(|q| q.clone())
            .ok_or_else(|| Error::NotFound(format!("tenant {tenant_id}")))
    }

    /// Subscription tier of a tenant, if known.
    pub fn tier_of(&self, tenant_id: &str) -> Option<SubscriptionTier> {
        self.quotas.get(tenant_id).map(|q| q.subscription_tier)
    }

    pub fn remove(&self, tenant_id: &str) -> Option<TenantQuota> {
        self.quotas.remove(tenant_id).map(|(_, q)| q)
    }

    pub fn len(&self) -> usize {
        self.quotas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotas.is_empty()
    }
}
