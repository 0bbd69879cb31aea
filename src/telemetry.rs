//! Telemetry log: append-only record of payload accesses and request completions.
//!
//! This is the source of truth for cache scoring and preload ranking. Raw
//! events are kept for the retention window; the rollup job folds older
//! events into per-day aggregates (payload × tenant × day access counts, and
//! per-tenant completion/cost totals for billing) and discards the raw rows.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::payload::PayloadId;
use crate::queue::request::{OperationType, RequestId};

/// One payload read by the serving layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessEvent {
    pub request_id: RequestId,
    pub payload_id: PayloadId,
    pub tenant_id: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Terminal outcome of one request, as reported by its worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub request_id: RequestId,
    pub tenant_id: String,
    pub operation_type: OperationType,
    pub success: bool,
    /// Actual cost in demand cost units.
    pub actual_cost: f64,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// Windowed access statistics for one payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessStats {
    pub count: u64,
    pub tenants: HashSet<String>,
    pub last_access: Option<DateTime<Utc>>,
}

/// Per-tenant completion totals, consumed read-only by billing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantUsage {
    pub tenant_id: String,
    pub completed: u64,
    pub failed: u64,
    pub total_cost: f64,
    pub total_duration_ms: u64,
}

impl TenantUsage {
    fn absorb(&mut self, record: &CompletionRecord) {
        if record.success {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        self.total_cost += record.actual_cost;
        self.total_duration_ms += record.duration_ms;
    }
}

/// What one rollup pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollupReport {
    pub events_archived: usize,
    pub completions_archived: usize,
    pub days_dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ArchiveKey {
    payload_id: PayloadId,
    tenant_id: String,
    day: NaiveDate,
}

/// The telemetry log.
#[derive(Debug, Default)]
pub struct TelemetryLog {
    /// Raw access events within the retention window.
    raw_accesses: RwLock<Vec<AccessEvent>>,

    /// Raw completion reports within the retention window.
    raw_completions: RwLock<Vec<CompletionRecord>>,

    /// Daily access counts that survive pruning.
    archived_accesses: DashMap<ArchiveKey, u64>,

    /// Completion totals folded in from pruned reports.
    archived_usage: DashMap<String, TenantUsage>,
}

impl TelemetryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an access event.
    pub fn record_access(&self, event: AccessEvent) {
        self.raw_accesses.write().push(event);
    }

    /// Append a completion report.
    pub fn record_completion(&self, record: CompletionRecord) {
        self.raw_completions.write().push(record);
    }

    /// Number of raw access events currently retained.
    pub fn raw_access_count(&self) -> usize {
        self.raw_accesses.read().len()
    }

    /// Access statistics for every payload touched in `(now - window, now]`,
    /// computed in a single pass over the raw log.
    pub fn window_stats(&self, window: Duration, now: DateTime<Utc>) -> HashMap<PayloadId, AccessStats> {
        let since = now - window;
        let mut stats: HashMap<PayloadId, AccessStats> = HashMap::new();
        for event in self.raw_accesses.read().iter() {
            if event.timestamp <= since || event.timestamp > now {
                continue;
            }
            let entry = stats.entry(event.payload_id.clone()).or_default();
            entry.count += 1;
            entry.tenants.insert(event.tenant_id.clone());
            if entry.last_access.map_or(true, |t| event.timestamp > t) {
                entry.last_access = Some(event.timestamp);
            }
        }
        stats
    }

    /// Access counts per payload over a trailing window, combining raw events
    /// and archived daily aggregates. Optionally restricted to one tenant.
    pub fn trailing_counts(
        &self,
        window: Duration,
        now: DateTime<Utc>,
        tenant_id: Option<&str>,
    ) -> HashMap<PayloadId, u64> {
        let since = now - window;
        let since_day = since.date_naive();
        let mut counts: HashMap<PayloadId, u64> = HashMap::new();

        for event in self.raw_accesses.read().iter() {
            if event.timestamp <= since || event.timestamp > now {
                continue;
            }
            if tenant_id.is_some_and(|t| t != event.tenant_id) {
                continue;
            }
            *counts.entry(event.payload_id.clone()).or_default() += 1;
        }

        for item in self.archived_accesses.iter() {
            let key = item.key();
            if key.day < since_day {
                continue;
            }
            if tenant_id.is_some_and(|t| t != key.tenant_id) {
                continue;
            }
            *counts.entry(key.payload_id.clone()).or_default() += *item.value();
        }

        counts
    }

    /// Completion totals for one tenant (archived plus raw).
    pub fn tenant_usage(&self, tenant_id: &str) -> TenantUsage {
        let mut usage = self
            .archived_usage
            .get(tenant_id)
            .map(|u| u.clone())
            .unwrap_or_else(|| TenantUsage {
                tenant_id: tenant_id.to_string(),
                ..Default::default()
            });
        for record in self.raw_completions.read().iter() {
            if record.tenant_id == tenant_id {
                usage.absorb(record);
            }
        }
        usage
    }

    /// Completion totals for every tenant seen, sorted by tenant id.
    pub fn usage_rollups(&self) -> Vec<TenantUsage> {
        let mut tenants: HashSet<String> =
            self.archived_usage.iter().map(|u| u.key().clone()).collect();
        tenants.extend(self.raw_completions.read().iter().map(|r| r.tenant_id.clone()));

        let mut rollups: Vec<TenantUsage> = tenants.iter().map(|t| self.tenant_usage(t)).collect();
        rollups.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        rollups
    }

    /// Fold raw rows older than `raw_retention` into aggregates, discard them,
    /// and drop archived days older than `archive_days`.
    pub fn rollup_and_prune(
        &self,
        now: DateTime<Utc>,
        raw_retention: Duration,
        archive_days: u32,
    ) -> RollupReport {
        let cutoff = now - raw_retention;
        let mut report = RollupReport::default();

        let expired: Vec<AccessEvent> = {
            let mut raw = self.raw_accesses.write();
            let (keep, expired): (Vec<_>, Vec<_>) =
                raw.drain(..).partition(|e| e.timestamp > cutoff);
            *raw = keep;
            expired
        };
        report.events_archived = expired.len();
        for event in expired {
            let key = ArchiveKey {
                payload_id: event.payload_id,
                tenant_id: event.tenant_id,
                day: event.timestamp.date_naive(),
            };
            *self.archived_accesses.entry(key).or_insert(0) += 1;
        }

        let expired: Vec<CompletionRecord> = {
            let mut raw = self.raw_completions.write();
            let (keep, expired): (Vec<_>, Vec<_>) =
                raw.drain(..).partition(|r| r.completed_at > cutoff);
            *raw = keep;
            expired
        };
        report.completions_archived = expired.len();
        for record in expired {
            self.archived_usage
                .entry(record.tenant_id.clone())
                .or_insert_with(|| TenantUsage {
                    tenant_id: record.tenant_id.clone(),
                    ..Default::default()
                })
                .absorb(&record);
        }

        let oldest_day = (now - Duration::days(archive_days as i64)).date_naive();
        let before = self.archived_accesses.len();
        self.archived_accesses.retain(|k, _| k.day >= oldest_day);
        report.days_dropped = before - self.archived_accesses.len();

        if report.events_archived > 0 || report.completions_archived > 0 {
            info!(
                events = report.events_archived,
                completions = report.completions_archived,
                dropped = report.days_dropped,
                "Telemetry rollup complete"
            );
        } else {
            debug!("Telemetry rollup found nothing to archive");
        }

        report
    }
}
