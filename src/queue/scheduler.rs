//! Priority scheduler: the request table and per-class ready queues.
//!
//! Items live in a concurrent table keyed by id. Every status change is a
//! single-row compare-and-swap performed under that row's map lock. Pending
//! items are also indexed in one ordered set per queue class
//! (`priority DESC, enqueued_at ASC, admission order`); a worker pops the head
//! of a class under the set's mutex, releases it, then claims the row. A
//! popped key whose row is no longer Pending at that priority is a lost race
//! and the worker moves on to the next key.
//!
//! The only place both locks are held is the boost job, which always takes the
//! class index first and the row second.

use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{Error, QuotaKind, Result};
use crate::metrics::Metrics;
use crate::queue::request::{QueueClass, RequestId, RequestItem, RequestStatus};

/// Ordering key of a Pending item inside its class index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ReadyKey {
    priority: Reverse<u8>,
    enqueued_at: DateTime<Utc>,
    seq: u64,
    id: RequestId,
}

#[derive(Debug)]
struct Slot {
    item: RequestItem,
    seq: u64,
}

impl Slot {
    fn ready_key(&self) -> ReadyKey {
        ReadyKey {
            priority: Reverse(self.item.priority),
            enqueued_at: self.item.enqueued_at,
            seq: self.seq,
            id: self.item.id,
        }
    }
}

/// Per-tenant admission counters.
///
/// `active` counts Pending + Throttled + Processing items plus in-flight
/// reservations; `queued` counts Pending + Throttled items plus reservations.
#[derive(Debug, Default)]
struct TenantLedger {
    active: AtomicUsize,
    queued: AtomicUsize,
}

impl TenantLedger {
    fn apply(&self, from: RequestStatus, to: RequestStatus) {
        match (from.is_active(), to.is_active()) {
            (true, false) => {
                self.active.fetch_sub(1, Ordering::SeqCst);
            }
            (false, true) => {
                self.active.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
        match (from.is_queued(), to.is_queued()) {
            (true, false) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
            }
            (false, true) => {
                self.queued.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

/// What one reaper pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Stuck Processing items returned to Pending.
    pub requeued: usize,
    /// Stuck Processing items that ran out of retries.
    pub failed: usize,
    /// Queued items that exceeded their lifetime.
    pub expired: usize,
    /// Finished items dropped from the table.
    pub purged: usize,
}

/// Per-class queue depth snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
    pub throttled: usize,
    pub processing: usize,
}

impl QueueDepth {
    /// Pending items across all classes.
    pub fn pending(&self) -> usize {
        self.hot + self.warm + self.cold
    }
}

pub struct Scheduler {
    items: DashMap<RequestId, Slot>,
    ready: [Mutex<BTreeSet<ReadyKey>>; 3],
    paused: [AtomicBool; 3],
    ledgers: DashMap<String, Arc<TenantLedger>>,
    next_seq: AtomicU64,
    config: SchedulerConfig,
    metrics: Arc<Metrics>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            items: DashMap::new(),
            ready: Default::default(),
            paused: Default::default(),
            ledgers: DashMap::new(),
            next_seq: AtomicU64::new(0),
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn ledger(&self, tenant_id: &str) -> Arc<TenantLedger> {
        if let Some(ledger) = self.ledgers.get(tenant_id) {
            return ledger.clone();
        }
        self.ledgers
            .entry(tenant_id.to_string())
            .or_default()
            .clone()
    }

    // ─── Admission ───────────────────────────────────────────────────────

    /// Atomically reserve one concurrent and one queued slot for a tenant.
    ///
    /// Each counter is incremented first and rolled back if the previous value
    /// was already at the limit, so concurrent reservations can never together
    /// exceed it. A successful reservation must be followed by [`Self::insert`].
    pub fn reserve(&self, tenant_id: &str, max_concurrent: usize, max_queued: usize) -> Result<()> {
        let ledger = self.ledger(tenant_id);

        let prev = ledger.active.fetch_add(1, Ordering::SeqCst);
        if prev >= max_concurrent {
            ledger.active.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::QuotaExceeded {
                tenant_id: tenant_id.to_string(),
                kind: QuotaKind::Concurrent,
                limit: max_concurrent,
            });
        }

        let prev = ledger.queued.fetch_add(1, Ordering::SeqCst);
        if prev >= max_queued {
            ledger.queued.fetch_sub(1, Ordering::SeqCst);
            ledger.active.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::QuotaExceeded {
                tenant_id: tenant_id.to_string(),
                kind: QuotaKind::Queued,
                limit: max_queued,
            });
        }

        Ok(())
    }

    /// Insert a freshly admitted item whose slot was reserved.
    ///
    /// Items admitted into a paused class start out Throttled.
    pub fn insert(&self, mut item: RequestItem) -> RequestStatus {
        item.status = if self.is_paused(item.queue_class) {
            RequestStatus::Throttled
        } else {
            RequestStatus::Pending
        };
        let status = item.status;
        let class = item.queue_class;
        let slot = Slot {
            item,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        let key = slot.ready_key();
        self.items.insert(key.id, slot);

        if status == RequestStatus::Pending {
            self.ready[class.index()].lock().insert(key);
        }
        status
    }

    /// Active (Pending + Throttled + Processing) item count for a tenant.
    pub fn active_count(&self, tenant_id: &str) -> usize {
        self.ledgers
            .get(tenant_id)
            .map_or(0, |l| l.active.load(Ordering::SeqCst))
    }

    /// Queued (Pending + Throttled) item count for a tenant.
    pub fn queued_count(&self, tenant_id: &str) -> usize {
        self.ledgers
            .get(tenant_id)
            .map_or(0, |l| l.queued.load(Ordering::SeqCst))
    }

    // ─── Dequeue ─────────────────────────────────────────────────────────

    /// Claim the best eligible Pending item for `worker_id`.
    ///
    /// Classes are tried in the given order; within a class the highest
    /// priority wins, then the oldest. Returns `None` when nothing is eligible.
    pub fn dequeue(
        &self,
        worker_id: &str,
        classes: &[QueueClass],
        now: DateTime<Utc>,
    ) -> Option<RequestItem> {
        for &class in classes {
            loop {
                let key = self.ready[class.index()].lock().pop_first();
                let Some(key) = key else {
                    break;
                };
                match self.claim(&key, worker_id, now) {
                    Ok(item) => {
                        debug!(
                            request_id = %item.id,
                            worker_id,
                            class = %class,
                            priority = item.priority,
                            "Claimed request"
                        );
                        self.metrics.dequeued.with_label_values(&[class.as_str()]).inc();
                        return Some(item);
                    }
                    Err(e) => {
                        debug!(error = %e, "Lost claim, trying next candidate");
                        self.metrics.claim_conflicts.inc();
                    }
                }
            }
        }
        None
    }

    /// Compare-and-swap Pending → Processing for the row behind `key`.
    fn claim(&self, key: &ReadyKey, worker_id: &str, now: DateTime<Utc>) -> Result<RequestItem> {
        let mut slot = self
            .items
            .get_mut(&key.id)
            .ok_or(Error::ClaimConflict(key.id))?;
        if slot.item.status != RequestStatus::Pending || slot.item.priority != key.priority.0 {
            return Err(Error::ClaimConflict(key.id));
        }

        slot.item.status = RequestStatus::Processing;
        slot.item.started_at = Some(now);
        slot.item.heartbeat_at = Some(now);
        slot.item.worker_id = Some(worker_id.to_string());
        self.ledger(&slot.item.tenant_id)
            .apply(RequestStatus::Pending, RequestStatus::Processing);

        Ok(slot.item.clone())
    }

    // ─── Worker reports ──────────────────────────────────────────────────

    /// Refresh the reaper deadline of a Processing item held by `worker_id`.
    pub fn heartbeat(&self, id: RequestId, worker_id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut slot = self
            .items
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("request {id}")))?;
        if slot.item.status != RequestStatus::Processing
            || slot.item.worker_id.as_deref() != Some(worker_id)
        {
            return Err(Error::InvalidTransition {
                id,
                from: slot.item.status,
                to: RequestStatus::Processing,
            });
        }
        slot.item.heartbeat_at = Some(now);
        Ok(())
    }

    /// Move a Processing item to Completed or Failed.
    ///
    /// Only the worker holding the claim may report; a worker whose claim was
    /// reaped and handed to someone else gets `InvalidTransition`.
    pub fn complete(
        &self,
        id: RequestId,
        worker_id: &str,
        success: bool,
        actual_cost: f64,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<RequestItem> {
        let to = if success {
            RequestStatus::Completed
        } else {
            RequestStatus::Failed
        };
        let mut slot = self
            .items
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("request {id}")))?;
        if slot.item.status != RequestStatus::Processing
            || slot.item.worker_id.as_deref() != Some(worker_id)
        {
            return Err(Error::InvalidTransition {
                id,
                from: slot.item.status,
                to,
            });
        }

        slot.item.status = to;
        slot.item.completed_at = Some(now);
        slot.item.actual_cost = Some(actual_cost);
        slot.item.error_message = error_message;
        self.ledger(&slot.item.tenant_id)
            .apply(RequestStatus::Processing, to);

        let outcome = if success { "completed" } else { "failed" };
        self.metrics.outcomes.with_label_values(&[outcome]).inc();
        Ok(slot.item.clone())
    }

    /// Fail a Pending or Throttled item without involving a worker.
    pub fn cancel(&self, id: RequestId, now: DateTime<Utc>) -> Result<()> {
        let key = {
            let mut slot = self
                .items
                .get_mut(&id)
                .ok_or_else(|| Error::NotFound(format!("request {id}")))?;
            let from = slot.item.status;
            if !from.is_queued() {
                return Err(Error::InvalidTransition {
                    id,
                    from,
                    to: RequestStatus::Failed,
                });
            }
            let key = slot.ready_key();
            slot.item.status = RequestStatus::Failed;
            slot.item.completed_at = Some(now);
            slot.item.error_message = Some("cancelled".to_string());
            self.ledger(&slot.item.tenant_id)
                .apply(from, RequestStatus::Failed);
            (from == RequestStatus::Pending).then_some((slot.item.queue_class, key))
        };

        if let Some((class, key)) = key {
            self.ready[class.index()].lock().remove(&key);
        }
        self.metrics.outcomes.with_label_values(&["cancelled"]).inc();
        info!(request_id = %id, "Cancelled pending request");
        Ok(())
    }

    /// Snapshot of one item.
    pub fn get(&self, id: RequestId) -> Result<RequestItem> {
        self.items
            .get(&id)
            .map(|s| s.item.clone())
            .ok_or_else(|| Error::NotFound(format!("request {id}")))
    }

    // ─── Starvation boost ────────────────────────────────────────────────

    /// Priority a queued item should have after waiting until `now`.
    ///
    /// `base + floor(wait / threshold) * step`, capped, and never below the
    /// current priority.
    pub fn boosted_priority(&self, item: &RequestItem, now: DateTime<Utc>) -> u8 {
        let threshold = self.config.starvation_threshold(item.queue_class);
        let wait = now - item.enqueued_at;
        if wait <= threshold || threshold <= Duration::zero() {
            return item.priority;
        }
        let steps = wait.num_milliseconds() / threshold.num_milliseconds();
        let boosted = (item.base_priority as i64 + steps * self.config.boost_step as i64)
            .min(self.config.boost_cap as i64);
        item.priority.max(boosted as u8)
    }

    /// Raise the priority of every Pending item that has waited past its
    /// class threshold. Returns how many items changed.
    pub fn boost(&self, now: DateTime<Utc>) -> usize {
        let candidates: Vec<(RequestId, QueueClass, u8, u8)> = self
            .items
            .iter()
            .filter(|s| s.item.status == RequestStatus::Pending)
            .filter_map(|s| {
                let boosted = self.boosted_priority(&s.item, now);
                (boosted > s.item.priority)
                    .then_some((s.item.id, s.item.queue_class, s.item.priority, boosted))
            })
            .collect();

        let mut boosted_count = 0;
        for (id, class, old_priority, new_priority) in candidates {
            let mut ready = self.ready[class.index()].lock();
            let Some(mut slot) = self.items.get_mut(&id) else {
                continue;
            };
            if slot.item.status != RequestStatus::Pending || slot.item.priority != old_priority {
                continue;
            }
            // Absent means a worker already popped it and is about to claim.
            if !ready.remove(&slot.ready_key()) {
                continue;
            }
            slot.item.priority = new_priority;
            ready.insert(slot.ready_key());
            boosted_count += 1;
            debug!(
                request_id = %id,
                class = %class,
                from = old_priority,
                to = new_priority,
                "Boosted starved request"
            );
        }

        if boosted_count > 0 {
            self.metrics.boosts.inc_by(boosted_count as u64);
            info!(boosted = boosted_count, "Starvation boost complete");
        }
        boosted_count
    }

    // ─── Reaper ──────────────────────────────────────────────────────────

    /// Requeue or fail stuck Processing items, expire over-age queued items,
    /// and drop finished items past `finished_retention`.
    pub fn reap(&self, now: DateTime<Utc>) -> ReapReport {
        let deadline = Duration::seconds(self.config.heartbeat_deadline_secs as i64);
        let lifetime = Duration::seconds(self.config.max_pending_lifetime_secs as i64);
        let retention = Duration::seconds(self.config.finished_retention_secs as i64);
        let mut report = ReapReport::default();

        let stuck: Vec<RequestId> = self
            .items
            .iter()
            .filter(|s| is_stuck(&s.item, now, deadline))
            .map(|s| s.item.id)
            .collect();

        for id in stuck {
            let requeue = {
                let Some(mut slot) = self.items.get_mut(&id) else {
                    continue;
                };
                if !is_stuck(&slot.item, now, deadline) {
                    continue;
                }
                slot.item.retry_count += 1;
                slot.item.worker_id = None;
                slot.item.started_at = None;
                slot.item.heartbeat_at = None;

                if slot.item.retry_count > self.config.max_retries {
                    slot.item.status = RequestStatus::Failed;
                    slot.item.completed_at = Some(now);
                    slot.item.error_message = Some(Error::Timeout(id).to_string());
                    self.ledger(&slot.item.tenant_id)
                        .apply(RequestStatus::Processing, RequestStatus::Failed);
                    report.failed += 1;
                    warn!(
                        request_id = %id,
                        retries = slot.item.retry_count,
                        "Request failed after exhausting retries"
                    );
                    None
                } else {
                    let to = if self.is_paused(slot.item.queue_class) {
                        RequestStatus::Throttled
                    } else {
                        RequestStatus::Pending
                    };
                    slot.item.status = to;
                    self.ledger(&slot.item.tenant_id)
                        .apply(RequestStatus::Processing, to);
                    report.requeued += 1;
                    info!(
                        request_id = %id,
                        retry = slot.item.retry_count,
                        "Requeued stuck request"
                    );
                    (to == RequestStatus::Pending).then(|| (slot.item.queue_class, slot.ready_key()))
                }
            };
            if let Some((class, key)) = requeue {
                self.ready[class.index()].lock().insert(key);
            }
        }

        let expired: Vec<RequestId> = self
            .items
            .iter()
            .filter(|s| s.item.status.is_queued() && now - s.item.enqueued_at > lifetime)
            .map(|s| s.item.id)
            .collect();

        for id in expired {
            let removed_key = {
                let Some(mut slot) = self.items.get_mut(&id) else {
                    continue;
                };
                let from = slot.item.status;
                if !from.is_queued() {
                    continue;
                }
                let key = slot.ready_key();
                slot.item.status = RequestStatus::Failed;
                slot.item.completed_at = Some(now);
                slot.item.error_message = Some(Error::Timeout(id).to_string());
                self.ledger(&slot.item.tenant_id)
                    .apply(from, RequestStatus::Failed);
                report.expired += 1;
                (from == RequestStatus::Pending).then_some((slot.item.queue_class, key))
            };
            if let Some((class, key)) = removed_key {
                self.ready[class.index()].lock().remove(&key);
            }
            warn!(request_id = %id, "Queued request exceeded its lifetime");
        }

        let before = self.items.len();
        self.items.retain(|_, s| {
            !(s.item.status.is_terminal()
                && s.item.completed_at.is_some_and(|t| now - t > retention))
        });
        report.purged = before.saturating_sub(self.items.len());

        if report.requeued > 0 {
            self.metrics.reaped.with_label_values(&["requeued"]).inc_by(report.requeued as u64);
        }
        if report.failed > 0 {
            self.metrics.reaped.with_label_values(&["failed"]).inc_by(report.failed as u64);
        }
        if report.expired > 0 {
            self.metrics.reaped.with_label_values(&["expired"]).inc_by(report.expired as u64);
        }
        report
    }

    // ─── Throttling ──────────────────────────────────────────────────────

    pub fn is_paused(&self, class: QueueClass) -> bool {
        self.paused[class.index()].load(Ordering::SeqCst)
    }

    /// Pause or unpause a class and move its items accordingly.
    ///
    /// Pausing marks every Pending item of the class Throttled; unpausing
    /// returns every Throttled item to Pending with its original
    /// `enqueued_at`. Returns how many items moved. Processing items are
    /// never touched.
    pub fn set_paused(&self, class: QueueClass, paused: bool) -> usize {
        self.paused[class.index()].store(paused, Ordering::SeqCst);
        let moved = if paused {
            self.throttle_class(class)
        } else {
            self.resume_class(class)
        };
        if moved > 0 {
            let direction = if paused { "throttled" } else { "resumed" };
            self.metrics
                .throttle_transitions
                .with_label_values(&[direction])
                .inc_by(moved as u64);
            info!(class = %class, moved, direction, "Queue class gate changed");
        }
        moved
    }

    fn throttle_class(&self, class: QueueClass) -> usize {
        let ids = self.ids_in(class, RequestStatus::Pending);
        let mut moved = 0;
        for id in ids {
            let key = {
                let Some(mut slot) = self.items.get_mut(&id) else {
                    continue;
                };
                if slot.item.status != RequestStatus::Pending {
                    continue;
                }
                slot.item.status = RequestStatus::Throttled;
                self.ledger(&slot.item.tenant_id)
                    .apply(RequestStatus::Pending, RequestStatus::Throttled);
                slot.ready_key()
            };
            self.ready[class.index()].lock().remove(&key);
            moved += 1;
        }
        moved
    }

    fn resume_class(&self, class: QueueClass) -> usize {
        let ids = self.ids_in(class, RequestStatus::Throttled);
        let mut moved = 0;
        for id in ids {
            let key = {
                let Some(mut slot) = self.items.get_mut(&id) else {
                    continue;
                };
                if slot.item.status != RequestStatus::Throttled {
                    continue;
                }
                slot.item.status = RequestStatus::Pending;
                self.ledger(&slot.item.tenant_id)
                    .apply(RequestStatus::Throttled, RequestStatus::Pending);
                slot.ready_key()
            };
            self.ready[class.index()].lock().insert(key);
            moved += 1;
        }
        moved
    }

    fn ids_in(&self, class: QueueClass, status: RequestStatus) -> Vec<RequestId> {
        self.items
            .iter()
            .filter(|s| s.item.queue_class == class && s.item.status == status)
            .map(|s| s.item.id)
            .collect()
    }

    // ─── Introspection ───────────────────────────────────────────────────

    /// Count items by class and status, and publish the depth gauges.
    pub fn depth(&self) -> QueueDepth {
        let mut depth = QueueDepth::default();
        for slot in self.items.iter() {
            match (slot.item.status, slot.item.queue_class) {
                (RequestStatus::Pending, QueueClass::Hot) => depth.hot += 1,
                (RequestStatus::Pending, QueueClass::Warm) => depth.warm += 1,
                (RequestStatus::Pending, QueueClass::Cold) => depth.cold += 1,
                (RequestStatus::Throttled, _) => depth.throttled += 1,
                (RequestStatus::Processing, _) => depth.processing += 1,
                _ => {}
            }
        }
        for (class, n) in [
            (QueueClass::Hot, depth.hot),
            (QueueClass::Warm, depth.warm),
            (QueueClass::Cold, depth.cold),
        ] {
            self.metrics
                .queue_depth
                .with_label_values(&[class.as_str()])
                .set(n as i64);
        }
        depth
    }

    /// Total items held, including finished ones awaiting purge.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn is_stuck(item: &RequestItem, now: DateTime<Utc>, deadline: Duration) -> bool {
    if item.status != RequestStatus::Processing {
        return false;
    }
    let last_seen = item.heartbeat_at.or(item.started_at).unwrap_or(item.enqueued_at);
    now - last_seen > deadline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::request::OperationType;
    use uuid::Uuid;

    fn scheduler() -> Scheduler {
        Scheduler::new(
            SchedulerConfig::default(),
            Arc::new(Metrics::new().unwrap()),
        )
    }

    fn item(class: QueueClass, priority: u8, enqueued_at: DateTime<Utc>) -> RequestItem {
        RequestItem {
            id: Uuid::new_v4(),
            tenant_id: "t1".to_string(),
            user_id: "u1".to_string(),
            operation_type: OperationType::Search,
            queue_class: class,
            priority,
            base_priority: priority,
            estimated_cost: 1.0,
            estimated_duration_ms: 100,
            payload: serde_json::Value::Null,
            status: RequestStatus::Pending,
            enqueued_at,
            started_at: None,
            completed_at: None,
            heartbeat_at: None,
            worker_id: None,
            retry_count: 0,
            actual_cost: None,
            error_message: None,
        }
    }

    fn admit(s: &Scheduler, item: RequestItem) -> RequestId {
        s.reserve(&item.tenant_id, 1000, 1000).unwrap();
        let id = item.id;
        s.insert(item);
        id
    }

    #[test]
    fn test_priority_then_fifo_within_class() {
        let s = scheduler();
        let t0 = Utc::now();
        let low = admit(&s, item(QueueClass::Warm, 55, t0));
        let high_late = admit(&s, item(QueueClass::Warm, 70, t0 + Duration::seconds(2)));
        let high_early = admit(&s, item(QueueClass::Warm, 70, t0 + Duration::seconds(1)));

        let order: Vec<_> = (0..3)
            .map(|_| s.dequeue("w", &QueueClass::ALL, t0).unwrap().id)
            .collect();
        assert_eq!(order, vec![high_early, high_late, low]);
        assert!(s.dequeue("w", &QueueClass::ALL, t0).is_none());
    }

    #[test]
    fn test_class_order_is_caller_controlled() {
        let s = scheduler();
        let now = Utc::now();
        let hot = admit(&s, item(QueueClass::Hot, 90, now));
        let cold = admit(&s, item(QueueClass::Cold, 10, now));

        let first = s
            .dequeue("w", &[QueueClass::Cold, QueueClass::Hot], now)
            .unwrap();
        assert_eq!(first.id, cold);
        assert_eq!(first.status, RequestStatus::Processing);
        assert_eq!(first.worker_id.as_deref(), Some("w"));

        assert!(s.dequeue("w", &[QueueClass::Warm], now).is_none());
        assert_eq!(s.dequeue("w", &QueueClass::ALL, now).unwrap().id, hot);
    }

    #[test]
    fn test_boost_cold_item_after_threshold() {
        let s = scheduler();
        let now = Utc::now();
        let id = admit(&s, item(QueueClass::Cold, 40, now - Duration::seconds(400)));

        assert_eq!(s.boost(now), 1);
        assert_eq!(s.get(id).unwrap().priority, 50);

        // Same wait, same target: nothing to do.
        assert_eq!(s.boost(now), 0);
        assert_eq!(s.get(id).unwrap().queue_class, QueueClass::Cold);
    }

    #[test]
    fn test_boost_capped_and_never_lowers() {
        let s = scheduler();
        let now = Utc::now();
        let old_cold = admit(&s, item(QueueClass::Cold, 40, now - Duration::hours(10)));
        let hot = admit(&s, item(QueueClass::Hot, 100, now - Duration::hours(1)));

        s.boost(now);
        assert_eq!(s.get(old_cold).unwrap().priority, 95);
        assert_eq!(s.get(hot).unwrap().priority, 100);
    }

    #[test]
    fn test_boost_reorders_ready_queue() {
        let s = scheduler();
        let now = Utc::now();
        let fresh = admit(&s, item(QueueClass::Warm, 60, now));
        let starving = admit(&s, item(QueueClass::Warm, 50, now - Duration::seconds(95)));

        s.boost(now);
        // 50 + floor(95/30)*10 = 80
        assert_eq!(s.get(starving).unwrap().priority, 80);
        assert_eq!(s.dequeue("w", &QueueClass::ALL, now).unwrap().id, starving);
        assert_eq!(s.dequeue("w", &QueueClass::ALL, now).unwrap().id, fresh);
    }

    #[test]
    fn test_reaper_requeues_then_fails() {
        let mut config = SchedulerConfig::default();
        config.heartbeat_deadline_secs = 10;
        config.max_retries = 1;
        let s = Scheduler::new(config, Arc::new(Metrics::new().unwrap()));
        let t0 = Utc::now();
        let id = admit(&s, item(QueueClass::Hot, 90, t0));

        s.dequeue("w1", &QueueClass::ALL, t0).unwrap();
        let report = s.reap(t0 + Duration::seconds(11));
        assert_eq!(report.requeued, 1);
        let requeued = s.get(id).unwrap();
        assert_eq!(requeued.status, RequestStatus::Pending);
        assert_eq!(requeued.retry_count, 1);
        assert!(requeued.worker_id.is_none());

        let t1 = t0 + Duration::seconds(20);
        s.dequeue("w2", &QueueClass::ALL, t1).unwrap();
        let report = s.reap(t1 + Duration::seconds(11));
        assert_eq!(report.failed, 1);
        assert_eq!(s.get(id).unwrap().status, RequestStatus::Failed);
        assert_eq!(s.active_count("t1"), 0);
    }

    #[test]
    fn test_heartbeat_keeps_item_alive() {
        let mut config = SchedulerConfig::default();
        config.heartbeat_deadline_secs = 10;
        let s = Scheduler::new(config, Arc::new(Metrics::new().unwrap()));
        let t0 = Utc::now();
        let id = admit(&s, item(QueueClass::Hot, 90, t0));
        s.dequeue("w1", &QueueClass::ALL, t0).unwrap();

        s.heartbeat(id, "w1", t0 + Duration::seconds(8)).unwrap();
        assert!(s.heartbeat(id, "intruder", t0).is_err());
        assert_eq!(s.reap(t0 + Duration::seconds(15)).requeued, 0);
        assert_eq!(s.get(id).unwrap().status, RequestStatus::Processing);
    }

    #[test]
    fn test_cancel_only_queued() {
        let s = scheduler();
        let now = Utc::now();
        let a = admit(&s, item(QueueClass::Warm, 60, now));
        let b = admit(&s, item(QueueClass::Warm, 50, now));

        s.cancel(a, now).unwrap();
        assert_eq!(s.get(a).unwrap().status, RequestStatus::Failed);

        let claimed = s.dequeue("w", &QueueClass::ALL, now).unwrap();
        assert_eq!(claimed.id, b);
        assert!(matches!(
            s.cancel(b, now),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(s.cancel(Uuid::new_v4(), now), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_pause_and_resume_preserve_enqueued_at() {
        let s = scheduler();
        let now = Utc::now();
        let enq = now - Duration::seconds(42);
        let cold = admit(&s, item(QueueClass::Cold, 30, enq));
        let hot = admit(&s, item(QueueClass::Hot, 90, now));

        assert_eq!(s.set_paused(QueueClass::Cold, true), 1);
        assert_eq!(s.get(cold).unwrap().status, RequestStatus::Throttled);
        assert_eq!(s.get(hot).unwrap().status, RequestStatus::Pending);
        assert_eq!(s.queued_count("t1"), 2);

        assert!(s.dequeue("w", &[QueueClass::Cold], now).is_none());

        assert_eq!(s.set_paused(QueueClass::Cold, false), 1);
        let resumed = s.get(cold).unwrap();
        assert_eq!(resumed.status, RequestStatus::Pending);
        assert_eq!(resumed.enqueued_at, enq);
        assert_eq!(s.dequeue("w", &[QueueClass::Cold], now).unwrap().id, cold);
    }

    #[test]
    fn test_insert_into_paused_class_starts_throttled() {
        let s = scheduler();
        s.set_paused(QueueClass::Cold, true);
        s.reserve("t1", 10, 10).unwrap();
        let status = s.insert(item(QueueClass::Cold, 10, Utc::now()));
        assert_eq!(status, RequestStatus::Throttled);
        assert_eq!(s.depth().throttled, 1);
    }

    #[test]
    fn test_reserve_enforces_limits() {
        let s = scheduler();
        s.reserve("t1", 2, 1).unwrap();
        assert!(matches!(
            s.reserve("t1", 2, 1),
            Err(Error::QuotaExceeded { kind: QuotaKind::Queued, .. })
        ));
        assert_eq!(s.active_count("t1"), 1);
        assert!(matches!(
            s.reserve("t1", 1, 5),
            Err(Error::QuotaExceeded { kind: QuotaKind::Concurrent, .. })
        ));
    }

    #[test]
    fn test_expired_pending_items_fail_and_purge() {
        let mut config = SchedulerConfig::default();
        config.max_pending_lifetime_secs = 60;
        config.finished_retention_secs = 30;
        let s = Scheduler::new(config, Arc::new(Metrics::new().unwrap()));
        let now = Utc::now();
        let id = admit(&s, item(QueueClass::Cold, 10, now - Duration::seconds(61)));

        let report = s.reap(now);
        assert_eq!(report.expired, 1);
        let failed = s.get(id).unwrap();
        assert_eq!(failed.status, RequestStatus::Failed);
        assert!(failed.error_message.unwrap().contains("timed out"));
        assert!(s.dequeue("w", &QueueClass::ALL, now).is_none());

        let report = s.reap(now + Duration::seconds(31));
        assert_eq!(report.purged, 1);
        assert!(s.is_empty());
    }
}
