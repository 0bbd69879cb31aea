//! Resource manager: wires the cache, the admission queue, telemetry and the
//! throttle gate together, and runs the periodic background jobs.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::blob::InMemoryBlobStore;
use crate::cache::payload::{PayloadEntry, PayloadRegistration};
use crate::cache::preload::ScheduledTrigger;
use crate::cache::tier_manager::{AccessOutcome, TierManager, TierStores, TierUsage};
use crate::config::{ticker_period, Config};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::queue::admission::AdmissionController;
use crate::queue::request::{
    EnqueueRequest, QueueClass, RequestId, RequestItem, RequestStatus,
};
use crate::queue::scheduler::{QueueDepth, Scheduler};
use crate::queue::throttle::{FixedSampler, LoadSampler, SystemLoadSample, ThrottleGate, ThrottleLevel};
use crate::telemetry::{CompletionRecord, TelemetryLog, TenantUsage};
use crate::tenant::{QuotaStore, TenantQuota};

/// How often the scheduled-preload trigger checks the clock.
const PRELOAD_CHECK_SECS: u64 = 60;

/// Queue state as seen by an operator.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
    pub throttled: usize,
    pub processing: usize,
    pub level: ThrottleLevel,
    pub paused: Vec<QueueClass>,
    pub last_sample: Option<SystemLoadSample>,
}

pub struct ResourceManager {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    telemetry: Arc<TelemetryLog>,
    quotas: Arc<QuotaStore>,
    cache: Arc<TierManager>,
    scheduler: Arc<Scheduler>,
    admission: AdmissionController,
    throttle: ThrottleGate,
    scheduled_preload: ScheduledTrigger,
    started_at: Instant,
}

impl ResourceManager {
    pub fn new(config: Config, stores: TierStores, sampler: Arc<dyn LoadSampler>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let metrics = Arc::new(Metrics::new()?);
        let telemetry = Arc::new(TelemetryLog::new());
        let quotas = Arc::new(QuotaStore::new());

        let cache = Arc::new(TierManager::new(
            &config,
            stores,
            telemetry.clone(),
            quotas.clone(),
            metrics.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(config.scheduler.clone(), metrics.clone()));
        let admission = AdmissionController::new(
            quotas.clone(),
            scheduler.clone(),
            config.admission.clone(),
            metrics.clone(),
        );
        let throttle = ThrottleGate::new(scheduler.clone(), sampler, config.throttle.clone());
        let scheduled_preload = ScheduledTrigger::new(config.preload.scheduled_hour_utc);

        Ok(Self {
            config,
            metrics,
            telemetry,
            quotas,
            cache,
            scheduler,
            admission,
            throttle,
            scheduled_preload,
            started_at: Instant::now(),
        })
    }

    /// Manager with in-process blob stores and a fixed idle load reading.
    pub fn in_memory(config: Config) -> Result<Self> {
        let stores = TierStores {
            ssd: Arc::new(InMemoryBlobStore::new()),
            cold: Arc::new(InMemoryBlobStore::new()),
        };
        Self::new(config, stores, Arc::new(FixedSampler::default()))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn telemetry(&self) -> &TelemetryLog {
        &self.telemetry
    }

    pub fn cache(&self) -> &TierManager {
        &self.cache
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn throttle(&self) -> &ThrottleGate {
        &self.throttle
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    // ─── Requests ────────────────────────────────────────────────────────

    pub fn enqueue(&self, req: EnqueueRequest) -> Result<RequestId> {
        self.admission.enqueue(req, Utc::now())
    }

    /// Claim the next eligible item. An empty `classes` means Hot, Warm, Cold.
    pub fn dequeue(&self, worker_id: &str, classes: &[QueueClass]) -> Option<RequestItem> {
        let classes = if classes.is_empty() {
            &QueueClass::ALL[..]
        } else {
            classes
        };
        self.scheduler.dequeue(worker_id, classes, Utc::now())
    }

    pub fn heartbeat(&self, id: RequestId, worker_id: &str) -> Result<()> {
        self.scheduler.heartbeat(id, worker_id, Utc::now())
    }

    /// Record a worker's completion report and feed it to telemetry.
    pub fn report_completion(
        &self,
        id: RequestId,
        worker_id: &str,
        success: bool,
        actual_cost: f64,
        error_message: Option<String>,
    ) -> Result<RequestItem> {
        let now = Utc::now();
        let item = self
            .scheduler
            .complete(id, worker_id, success, actual_cost, error_message, now)?;

        let duration_ms = item
            .started_at
            .map_or(0, |s| (now - s).num_milliseconds().max(0) as u64);
        self.telemetry.record_completion(CompletionRecord {
            request_id: id,
            tenant_id: item.tenant_id.clone(),
            operation_type: item.operation_type,
            success,
            actual_cost,
            duration_ms,
            completed_at: now,
        });
        info!(
            request_id = %id,
            tenant_id = %item.tenant_id,
            success,
            actual_cost,
            duration_ms,
            "Request finished"
        );
        Ok(item)
    }

    pub fn cancel_pending(&self, id: RequestId) -> Result<()> {
        self.scheduler.cancel(id, Utc::now())
    }

    /// Status of a request. A throttled item reports `Throttled`.
    pub fn request_status(&self, id: RequestId) -> Result<RequestItem> {
        let item = self.scheduler.get(id)?;
        if item.status == RequestStatus::Throttled {
            return Err(Error::Throttled(id));
        }
        Ok(item)
    }

    /// Full item record regardless of status.
    pub fn request_item(&self, id: RequestId) -> Result<RequestItem> {
        self.scheduler.get(id)
    }

    // ─── Cache ───────────────────────────────────────────────────────────

    pub fn register_payload(&self, reg: PayloadRegistration) -> bool {
        self.cache.register_payload(reg, Utc::now())
    }

    pub fn payload(&self, id: &str) -> Result<PayloadEntry> {
        self.cache.get(id)
    }

    pub async fn access_payload(
        &self,
        payload_id: &str,
        tenant_id: &str,
        request_id: RequestId,
    ) -> Result<AccessOutcome> {
        self.cache
            .access_payload(payload_id, tenant_id, request_id, Utc::now())
            .await
    }

    pub fn get_cache_stats(&self) -> BTreeMap<String, TierUsage> {
        self.cache.cache_stats()
    }

    // ─── Admin ───────────────────────────────────────────────────────────

    pub fn set_tenant_quota(&self, tenant_id: &str, quota: TenantQuota) {
        self.quotas.set(tenant_id, quota);
    }

    pub fn tenant_quota(&self, tenant_id: &str) -> Result<TenantQuota> {
        self.quotas.get(tenant_id)
    }

    pub fn pause_queue_class(&self, class: QueueClass) -> usize {
        self.throttle.pause_class(class)
    }

    pub fn resume_queue_class(&self, class: QueueClass) -> usize {
        self.throttle.resume_class(class)
    }

    pub fn queue_depth(&self) -> QueueDepth {
        self.scheduler.depth()
    }

    pub fn queue_status(&self) -> QueueStatus {
        let depth = self.scheduler.depth();
        QueueStatus {
            hot: depth.hot,
            warm: depth.warm,
            cold: depth.cold,
            throttled: depth.throttled,
            processing: depth.processing,
            level: self.throttle.level(),
            paused: QueueClass::ALL
                .into_iter()
                .filter(|c| self.scheduler.is_paused(*c))
                .collect(),
            last_sample: self.throttle.last_sample(),
        }
    }

    /// Per-tenant completion totals for billing.
    pub fn usage_rollups(&self) -> Vec<TenantUsage> {
        self.telemetry.usage_rollups()
    }

    // ─── Background jobs ─────────────────────────────────────────────────

    /// Start eviction, boost, reaper, throttle, telemetry rollup and
    /// scheduled preload loops. Each stops when `shutdown` is cancelled.
    pub fn spawn_background_tasks(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let c = self.config.clone();
        vec![
            self.spawn_periodic("eviction", c.eviction.interval_secs, &shutdown, |m| async move {
                m.cache.run_eviction(Utc::now()).await;
            }),
            self.spawn_periodic("boost", c.scheduler.boost_interval_secs, &shutdown, |m| async move {
                m.scheduler.boost(Utc::now());
            }),
            self.spawn_periodic("reaper", c.scheduler.reap_interval_secs, &shutdown, |m| async move {
                let report = m.scheduler.reap(Utc::now());
                if report.requeued + report.failed + report.expired > 0 {
                    info!(
                        requeued = report.requeued,
                        failed = report.failed,
                        expired = report.expired,
                        purged = report.purged,
                        "Reaper pass complete"
                    );
                }
            }),
            self.spawn_periodic("throttle", c.throttle.sample_interval_secs, &shutdown, |m| async move {
                m.throttle.tick(Utc::now());
            }),
            self.spawn_periodic("telemetry-rollup", c.telemetry.rollup_interval_secs, &shutdown, |m| async move {
                let t = &m.config.telemetry;
                m.telemetry.rollup_and_prune(
                    Utc::now(),
                    chrono::Duration::seconds(t.raw_retention_secs as i64),
                    t.archive_retention_days,
                );
            }),
            self.spawn_periodic("scheduled-preload", PRELOAD_CHECK_SECS, &shutdown, |m| async move {
                let now = Utc::now();
                if m.scheduled_preload.should_fire(now) {
                    m.cache.preload_scheduled(now).await;
                }
            }),
        ]
    }

    fn spawn_periodic<F, Fut>(
        self: &Arc<Self>,
        name: &'static str,
        interval_secs: u64,
        shutdown: &CancellationToken,
        job: F,
    ) -> JoinHandle<()>
    where
        F: Fn(Arc<ResourceManager>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let manager = Arc::clone(self);
        let shutdown = shutdown.clone();
        let period = ticker_period(interval_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            debug!(task = name, period_secs = period.as_secs(), "Background task started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => job(manager.clone()).await,
                }
            }
            debug!(task = name, "Background task stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::request::OperationType;
    use crate::tenant::SubscriptionTier;

    fn manager() -> ResourceManager {
        let rm = ResourceManager::in_memory(Config::default()).unwrap();
        rm.set_tenant_quota(
            "acme",
            TenantQuota::new("acme", SubscriptionTier::Enterprise, 5, 5),
        );
        rm
    }

    #[test]
    fn test_completion_feeds_usage_rollup() {
        let rm = manager();
        let id = rm
            .enqueue(EnqueueRequest::new("acme", "u", OperationType::Search))
            .unwrap();
        let claimed = rm.dequeue("w1", &[]).unwrap();
        assert_eq!(claimed.id, id);

        rm.report_completion(id, "w1", true, 2.5, None).unwrap();
        let usage = rm.usage_rollups();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].completed, 1);
        assert!((usage[0].total_cost - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_status_query_surfaces_throttled() {
        let rm = manager();
        let mut req = EnqueueRequest::new("acme", "u", OperationType::Ingestion);
        req.input_size = Some(1_000_000);
        // Enterprise + ingestion of a large input: 50 + 40 = 90, Hot.
        let id = rm.enqueue(req).unwrap();
        rm.pause_queue_class(QueueClass::Hot);

        assert!(matches!(rm.request_status(id), Err(Error::Throttled(_))));
        assert_eq!(rm.request_item(id).unwrap().status, RequestStatus::Throttled);
        assert_eq!(rm.queue_status().paused, vec![QueueClass::Hot]);

        rm.resume_queue_class(QueueClass::Hot);
        assert_eq!(rm.request_status(id).unwrap().status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn test_background_tasks_stop_on_cancel() {
        let rm = Arc::new(manager());
        let shutdown = CancellationToken::new();
        let handles = rm.spawn_background_tasks(shutdown.clone());
        assert_eq!(handles.len(), 6);

        shutdown.cancel();
        for result in futures::future::join_all(handles).await {
            assert!(result.is_ok());
        }
    }
}
