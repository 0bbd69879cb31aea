//! Admission control: validate a request against its tenant's quota, compute
//! its initial priority and queue class, and hand it to the scheduler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PriorityPolicy;
use crate::error::{Error, QuotaKind, Result};
use crate::metrics::Metrics;
use crate::queue::request::{
    EnqueueRequest, OperationType, QueueClass, RequestId, RequestItem, RequestStatus,
};
use crate::queue::scheduler::Scheduler;
use crate::tenant::{QuotaStore, SubscriptionTier};

/// Admission priority.
///
/// ```text
/// priority = base + tier_bonus + size_bonus + interactive_bonus + operation_bonus
/// priority = min(priority, max_priority)
/// ```
pub fn compute_priority(
    policy: &PriorityPolicy,
    tier: SubscriptionTier,
    input_size: u64,
    interactive: bool,
    operation: OperationType,
) -> u8 {
    let size_bonus = policy
        .size_bonus
        .iter()
        .find(|(bound, _)| input_size < *bound)
        .map_or(0, |(_, bonus)| *bonus);

    let mut priority = policy.base_priority as u32;
    priority += policy.tier_bonus.for_tier(tier) as u32;
    priority += size_bonus as u32;
    if interactive {
        priority += policy.interactive_bonus as u32;
    }
    priority += policy.operation_bonus.for_operation(operation) as u32;

    priority.min(policy.max_priority as u32) as u8
}

/// Queue class for an admission priority.
pub fn classify(policy: &PriorityPolicy, priority: u8) -> QueueClass {
    if priority >= policy.hot_threshold {
        QueueClass::Hot
    } else if priority >= policy.warm_threshold {
        QueueClass::Warm
    } else {
        QueueClass::Cold
    }
}

/// Gatekeeper for new requests.
pub struct AdmissionController {
    quotas: Arc<QuotaStore>,
    scheduler: Arc<Scheduler>,
    policy: PriorityPolicy,
    metrics: Arc<Metrics>,
}

impl AdmissionController {
    pub fn new(
        quotas: Arc<QuotaStore>,
        scheduler: Arc<Scheduler>,
        policy: PriorityPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            quotas,
            scheduler,
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> &PriorityPolicy {
        &self.policy
    }

    /// Admit a request or reject it synchronously.
    ///
    /// Fails with `NotFound` for an unknown tenant and `QuotaExceeded` when
    /// either tenant limit is reached; in both cases nothing is created.
    pub fn enqueue(&self, req: EnqueueRequest, now: DateTime<Utc>) -> Result<RequestId> {
        let quota = match self.quotas.get(&req.tenant_id) {
            Ok(q) => q,
            Err(e) => {
                self.metrics.rejected.with_label_values(&["unknown_tenant"]).inc();
                return Err(e);
            }
        };

        if let Err(e) = self.scheduler.reserve(
            &req.tenant_id,
            quota.max_concurrent_requests,
            quota.max_queued_requests,
        ) {
            if let Error::QuotaExceeded { kind, limit, .. } = &e {
                let reason = match kind {
                    QuotaKind::Concurrent => "concurrent",
                    QuotaKind::Queued => "queued",
                };
                self.metrics.rejected.with_label_values(&[reason]).inc();
                warn!(
                    tenant_id = %req.tenant_id,
                    kind = %kind,
                    limit,
                    "Admission rejected"
                );
            }
            return Err(e);
        }

        let priority = compute_priority(
            &self.policy,
            quota.subscription_tier,
            req.effective_input_size(),
            req.interactive,
            req.operation_type,
        );
        let queue_class = classify(&self.policy, priority);

        let item = RequestItem {
            id: Uuid::new_v4(),
            tenant_id: req.tenant_id,
            user_id: req.user_id,
            operation_type: req.operation_type,
            queue_class,
            priority,
            base_priority: priority,
            estimated_cost: req.estimated_cost,
            estimated_duration_ms: req.estimated_duration_ms.unwrap_or(0),
            payload: req.payload,
            status: RequestStatus::Pending,
            enqueued_at: now,
            started_at: None,
            completed_at: None,
            heartbeat_at: None,
            worker_id: None,
            retry_count: 0,
            actual_cost: None,
            error_message: None,
        };
        let id = item.id;
        let tenant_id = item.tenant_id.clone();

        let status = self.scheduler.insert(item);
        self.metrics
            .admitted
            .with_label_values(&[queue_class.as_str()])
            .inc();

        info!(
            request_id = %id,
            tenant_id = %tenant_id,
            priority,
            class = %queue_class,
            status = %status,
            "Request admitted"
        );
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::tenant::TenantQuota;

    fn controller(tier: SubscriptionTier, max_concurrent: usize, max_queued: usize) -> AdmissionController {
        let metrics = Arc::new(Metrics::new().unwrap());
        let quotas = Arc::new(QuotaStore::new());
        quotas.set("acme", TenantQuota::new("acme", tier, max_concurrent, max_queued));
        let scheduler = Arc::new(Scheduler::new(SchedulerConfig::default(), metrics.clone()));
        AdmissionController::new(quotas, scheduler, PriorityPolicy::default(), metrics)
    }

    #[test]
    fn test_enterprise_interactive_search_is_capped_hot() {
        let policy = PriorityPolicy::default();
        let p = compute_priority(
            &policy,
            SubscriptionTier::Enterprise,
            500,
            true,
            OperationType::Search,
        );
        assert_eq!(p, 100);
        assert_eq!(classify(&policy, p), QueueClass::Hot);
    }

    #[test]
    fn test_free_large_ingestion_is_warm_boundary() {
        let policy = PriorityPolicy::default();
        let p = compute_priority(
            &policy,
            SubscriptionTier::Free,
            50_000,
            false,
            OperationType::Ingestion,
        );
        assert_eq!(p, 50);
        assert_eq!(classify(&policy, p), QueueClass::Warm);
    }

    #[test]
    fn test_size_bonus_bands() {
        let policy = PriorityPolicy::default();
        let p = |size| compute_priority(&policy, SubscriptionTier::Free, size, false, OperationType::Ingestion);
        assert_eq!(p(999), 70);
        assert_eq!(p(1_000), 60);
        assert_eq!(p(9_999), 60);
        assert_eq!(p(10_000), 50);
    }

    #[test]
    fn test_cold_class_below_warm_threshold() {
        let mut policy = PriorityPolicy::default();
        policy.base_priority = 30;
        let p = compute_priority(&policy, SubscriptionTier::Free, 50_000, false, OperationType::Embedding);
        assert_eq!(p, 35);
        assert_eq!(classify(&policy, p), QueueClass::Cold);
    }

    #[test]
    fn test_unknown_tenant_rejected() {
        let ctl = controller(SubscriptionTier::Free, 1, 1);
        let req = EnqueueRequest::new("ghost", "u", OperationType::Search);
        assert!(matches!(ctl.enqueue(req, Utc::now()), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_quota_rejection_creates_nothing() {
        let ctl = controller(SubscriptionTier::Standard, 1, 1);
        let now = Utc::now();
        ctl.enqueue(EnqueueRequest::new("acme", "u", OperationType::Search), now)
            .unwrap();
        let err = ctl
            .enqueue(EnqueueRequest::new("acme", "u", OperationType::Search), now)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::QuotaExceeded { kind: QuotaKind::Concurrent, limit: 1, .. }
        ));
        assert_eq!(ctl.scheduler.len(), 1);
    }
}
