//! Tier manager: orchestrates payload movement between tiers.
//!
//! The tier manager is the central coordinator for the payload cache. It:
//! - Tracks every registered payload and its current tier
//! - Serves accesses, promoting on a miss and recording telemetry
//! - Runs eviction whenever the Memory tier exceeds its capacity
//! - Carries out preload requests from the planner
//!
//! Every tier change is a compare-and-swap on one row: the expected prior
//! tier is checked again after any blob I/O, and no row lock is held across
//! an await.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::blob::{BlobLocation, BlobStore};
use crate::cache::evictor::{EvictionCandidate, EvictionPlan, Evictor};
use crate::cache::payload::{ModelId, PayloadEntry, PayloadId, PayloadRegistration, Tier};
use crate::cache::preload::{ModelLayer, PreloadPlanner, PreloadRequest};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::queue::request::RequestId;
use crate::telemetry::{AccessEvent, TelemetryLog};
use crate::tenant::QuotaStore;

/// Per-tier usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierUsage {
    pub entry_count: usize,
    pub total_bytes: u64,
    /// Configured capacity; Cold is unbounded.
    pub capacity_bytes: Option<u64>,
}

/// What one eviction cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub evicted: usize,
    pub freed_bytes: u64,
    /// Pinned entries, rows that changed under the cycle, and failed demotions.
    pub skipped: usize,
    /// Memory-tier bytes after the cycle.
    pub memory_bytes: u64,
}

/// What one batch of preload requests did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreloadReport {
    pub requested: usize,
    /// Requests whose payload now sits at or above the target tier.
    pub placed: usize,
    pub failed: usize,
}

/// Result of serving one payload read.
#[derive(Debug, Clone)]
pub struct AccessOutcome {
    pub data: Bytes,
    /// Tier the bytes were read from.
    pub served_from: Tier,
    /// Whether the payload was already resident.
    pub hit: bool,
}

/// Blob stores behind the two non-resident tiers.
#[derive(Clone)]
pub struct TierStores {
    /// Warm copies written by demotion and Cold→SSD promotion.
    pub ssd: Arc<dyn BlobStore>,
    /// Durable origin of every payload.
    pub cold: Arc<dyn BlobStore>,
}

/// Snapshot of where a non-resident payload can be read from.
struct Source {
    tier: Tier,
    ssd_location: Option<BlobLocation>,
    blob_location: BlobLocation,
}

/// The central tier manager.
pub struct TierManager {
    /// All payloads indexed by ID.
    entries: DashMap<PayloadId, PayloadEntry>,

    stores: TierStores,

    evictor: Evictor,

    planner: PreloadPlanner,

    telemetry: Arc<TelemetryLog>,

    quotas: Arc<QuotaStore>,

    metrics: Arc<Metrics>,

    /// Target capacity of the Memory tier in bytes.
    memory_capacity: u64,

    /// Advisory capacity of the SSD tier, reported in stats.
    ssd_capacity: u64,

    /// Held while a cycle scores entries and claims its victims, never
    /// across blob I/O.
    selection_lock: Mutex<()>,

    trailing_window: Duration,
}

impl TierManager {
    pub fn new(
        config: &Config,
        stores: TierStores,
        telemetry: Arc<TelemetryLog>,
        quotas: Arc<QuotaStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            stores,
            evictor: Evictor::new(config.eviction.clone()),
            planner: PreloadPlanner::new(config.preload.clone()),
            telemetry,
            quotas,
            metrics,
            memory_capacity: config.tiers.memory_capacity_bytes,
            ssd_capacity: config.tiers.ssd_capacity_bytes,
            selection_lock: Mutex::new(()),
            trailing_window: Duration::days(config.preload.trailing_days as i64),
        }
    }

    pub fn memory_capacity(&self) -> u64 {
        self.memory_capacity
    }

    // ─── Registry ────────────────────────────────────────────────────────

    /// Register a payload that lives in cold storage. Returns `false` if the
    /// id was already known, in which case nothing changes.
    pub fn register_payload(&self, reg: PayloadRegistration, now: DateTime<Utc>) -> bool {
        let id = reg.id.clone();
        let mut inserted = false;
        self.entries.entry(id.clone()).or_insert_with(|| {
            inserted = true;
            PayloadEntry::new_cold(reg, now)
        });
        if inserted {
            debug!(payload_id = %id, "Registered payload");
        }
        inserted
    }

    /// Snapshot of one payload.
    pub fn get(&self, id: &str) -> Result<PayloadEntry> {
        self.entries
            .get(id)
            .map(|e| e.clone())
            .ok_or_else(|| Error::NotFound(format!("payload {id}")))
    }

    pub fn tier_of(&self, id: &str) -> Option<Tier> {
        self.entries.get(id).map(|e| e.tier)
    }

    /// Payloads owned by a model, ordered by layer.
    pub fn model_layers(&self, model_id: &str) -> Vec<ModelLayer> {
        let mut layers: Vec<ModelLayer> = self
            .entries
            .iter()
            .filter(|e| e.owner_model_id == model_id)
            .map(|e| ModelLayer {
                payload_id: e.id.clone(),
                layer_index: e.layer_index,
            })
            .collect();
        layers.sort_by(|a, b| {
            a.layer_index
                .cmp(&b.layer_index)
                .then_with(|| a.payload_id.cmp(&b.payload_id))
        });
        layers
    }

    /// Drop every payload of a retired model. Warm copies are deleted; the
    /// cold origin belongs to the producer and is left alone.
    pub async fn remove_model(&self, model_id: &str) -> usize {
        let ids: Vec<PayloadId> = self
            .entries
            .iter()
            .filter(|e| e.owner_model_id == model_id)
            .map(|e| e.id.clone())
            .collect();

        let mut removed = 0;
        for id in ids {
            let Some((_, entry)) = self.entries.remove(&id) else {
                continue;
            };
            removed += 1;
            if let Some(loc) = entry.ssd_location {
                self.discard_warm_copy(&loc).await;
            }
        }

        if removed > 0 {
            info!(model_id, removed, "Removed model payloads");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // ─── Pinning ─────────────────────────────────────────────────────────

    /// Mark a payload in use; pinned payloads are never demoted.
    pub fn pin(&self, id: &str) -> Result<u32> {
        let mut entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("payload {id}")))?;
        entry.pins += 1;
        Ok(entry.pins)
    }

    pub fn unpin(&self, id: &str) -> Result<u32> {
        let mut entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("payload {id}")))?;
        entry.pins = entry.pins.saturating_sub(1);
        Ok(entry.pins)
    }

    // ─── Access ──────────────────────────────────────────────────────────

    /// Serve one payload read for a request.
    ///
    /// A resident payload is a hit. Otherwise the bytes are read from the
    /// nearest copy (SSD, falling back to Cold) and installed in Memory. A
    /// backend failure only fails the read when no copy could be loaded.
    pub async fn access_payload(
        &self,
        id: &str,
        tenant_id: &str,
        request_id: RequestId,
        now: DateTime<Utc>,
    ) -> Result<AccessOutcome> {
        let started = Instant::now();

        let resident = {
            let mut entry = self
                .entries
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("payload {id}")))?;
            entry.touch(now);
            match entry.buffer.clone() {
                Some(data) => Ok(data),
                None => Err(Source {
                    tier: entry.tier,
                    ssd_location: entry.ssd_location.clone(),
                    blob_location: entry.blob_location.clone(),
                }),
            }
        };

        let (outcome, installed) = match resident {
            Ok(data) => (
                AccessOutcome {
                    data,
                    served_from: Tier::Memory,
                    hit: true,
                },
                false,
            ),
            Err(source) => {
                let (data, served_from) = self.load_nearest(id, &source).await?;
                let installed = self.install_resident(id, source.tier, data.clone(), now);
                (
                    AccessOutcome {
                        data,
                        served_from,
                        hit: false,
                    },
                    installed,
                )
            }
        };

        // Recorded before enforcement so this access counts toward the new
        // entry's own score.
        self.telemetry.record_access(AccessEvent {
            request_id,
            payload_id: id.to_string(),
            tenant_id: tenant_id.to_string(),
            timestamp: now,
            duration_ms: started.elapsed().as_millis() as u64,
        });
        if installed {
            self.enforce_capacity(now).await;
        }
        Ok(outcome)
    }

    /// Read a payload's bytes from SSD, then Cold.
    async fn load_nearest(&self, id: &str, source: &Source) -> Result<(Bytes, Tier)> {
        if let Some(loc) = &source.ssd_location {
            match self.stores.ssd.load(loc).await {
                Ok(data) => return Ok((data, Tier::Ssd)),
                Err(e) => {
                    self.metrics.backend_failures.inc();
                    warn!(payload_id = id, error = %e, "SSD read failed, falling back to cold storage");
                }
            }
        }
        match self.stores.cold.load(&source.blob_location).await {
            Ok(data) => Ok((data, Tier::Cold)),
            Err(e) => {
                self.metrics.backend_failures.inc();
                warn!(payload_id = id, error = %e, "Cold storage read failed");
                Err(e.into())
            }
        }
    }

    /// Place loaded bytes in Memory if the row is still at `expected` and
    /// the payload fits. Returns whether the row changed.
    fn install_resident(&self, id: &str, expected: Tier, data: Bytes, now: DateTime<Utc>) -> bool {
        if data.len() as u64 > self.memory_capacity {
            debug!(payload_id = id, size = data.len(), "Payload larger than Memory tier, not installed");
            return false;
        }
        let Some(mut entry) = self.entries.get_mut(id) else {
            return false;
        };
        if entry.tier != expected || entry.promoting {
            return false;
        }
        entry.size_bytes = data.len() as u64;
        entry.buffer = Some(data);
        entry.tier = Tier::Memory;
        entry.last_accessed_at.get_or_insert(now);
        self.metrics
            .promotions
            .with_label_values(&[Tier::Memory.as_str()])
            .inc();
        debug!(payload_id = id, from = %expected, "Installed payload in Memory");
        true
    }

    // ─── Promotion ───────────────────────────────────────────────────────

    /// Move a payload up to at least `target`.
    ///
    /// Returns the tier the payload ends up in. A payload placed in Memory
    /// competes with the resident entries on score, so one colder than all of
    /// them is demoted again and reported at SSD. A failed blob load leaves
    /// the payload where it was and returns `BackendUnavailable`. A payload
    /// larger than the whole Memory tier is left at its tier.
    pub async fn promote(&self, id: &str, target: Tier, now: DateTime<Utc>) -> Result<Tier> {
        let source = {
            let mut entry = self
                .entries
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("payload {id}")))?;
            if entry.tier.at_least(target) || entry.promoting {
                return Ok(entry.tier);
            }
            if target == Tier::Memory && entry.size_bytes > self.memory_capacity {
                warn!(
                    payload_id = id,
                    size = entry.size_bytes,
                    capacity = self.memory_capacity,
                    "Payload cannot fit in Memory tier"
                );
                return Ok(entry.tier);
            }
            entry.promoting = true;
            Source {
                tier: entry.tier,
                ssd_location: entry.ssd_location.clone(),
                blob_location: entry.blob_location.clone(),
            }
        };

        let (fetched, mut written) = match self.fetch_for(id, &source, target).await {
            Ok((data, written)) => (Ok(data), written),
            Err(e) => (Err(e), None),
        };

        let placed = match self.entries.get_mut(id) {
            None => Err(Error::NotFound(format!("payload {id}"))),
            Some(mut entry) => {
                entry.promoting = false;
                match fetched {
                    Err(e) => {
                        warn!(payload_id = id, target = %target, error = %e, "Promotion failed, tier unchanged");
                        Err(e)
                    }
                    Ok(_) if entry.tier != source.tier => Ok(entry.tier),
                    Ok(data) => {
                        if let Some(loc) = written.take() {
                            entry.ssd_location = Some(loc);
                        }
                        if target == Tier::Memory {
                            entry.size_bytes = data.len() as u64;
                            entry.buffer = Some(data);
                        }
                        entry.tier = target;
                        self.metrics
                            .promotions
                            .with_label_values(&[target.as_str()])
                            .inc();
                        debug!(payload_id = id, from = %source.tier, to = %target, "Promoted payload");
                        Ok(target)
                    }
                }
            }
        };

        // A warm copy nobody adopted.
        if let Some(loc) = &written {
            self.discard_warm_copy(loc).await;
        }
        let placed = placed?;
        if placed != Tier::Memory {
            return Ok(placed);
        }
        self.enforce_capacity(now).await;
        Ok(self.tier_of(id).unwrap_or(placed))
    }

    /// Load bytes for a promotion, writing a warm copy when the target is SSD
    /// and none exists.
    async fn fetch_for(
        &self,
        id: &str,
        source: &Source,
        target: Tier,
    ) -> Result<(Bytes, Option<BlobLocation>)> {
        let (data, _) = self.load_nearest(id, source).await?;
        if target == Tier::Ssd && source.ssd_location.is_none() {
            let loc = self.stores.ssd.store(data.clone()).await.map_err(|e| {
                self.metrics.backend_failures.inc();
                Error::from(e)
            })?;
            return Ok((data, Some(loc)));
        }
        Ok((data, None))
    }

    async fn discard_warm_copy(&self, loc: &BlobLocation) {
        if let Err(e) = self.stores.ssd.delete(loc).await {
            warn!(location = %loc, error = %e, "Failed to delete warm copy");
        }
    }

    // ─── Eviction ───────────────────────────────────────────────────────

    /// Run one eviction cycle.
    ///
    /// Demotes the lowest-scoring Memory payloads to SSD until the tier is
    /// within capacity. Evicts nothing when already under target.
    pub async fn run_eviction(&self, now: DateTime<Utc>) -> EvictionReport {
        self.evict(now).await
    }

    async fn enforce_capacity(&self, now: DateTime<Utc>) {
        let report = self.evict(now).await;
        if report.memory_bytes > self.memory_capacity {
            warn!(
                memory_bytes = report.memory_bytes,
                capacity = self.memory_capacity,
                "Memory tier above capacity after admission"
            );
        }
    }

    async fn evict(&self, now: DateTime<Utc>) -> EvictionReport {
        let (plan, current, mut report) = self.plan_eviction(now);
        if plan.excess == 0 {
            report.memory_bytes = current;
            return report;
        }

        // Victims were claimed under the selection lock; every one of them is
        // demoted (or released) before the fallbacks are considered.
        for candidate in &plan.victims {
            let outcome = self.demote(&candidate.payload_id, now).await;
            self.record_demotion(candidate, outcome, &mut report);
        }
        for candidate in &plan.fallback {
            if report.freed_bytes >= plan.excess {
                break;
            }
            if !self.claim_for_demotion(&candidate.payload_id) {
                report.skipped += 1;
                continue;
            }
            let outcome = self.demote(&candidate.payload_id, now).await;
            self.record_demotion(candidate, outcome, &mut report);
        }

        report.memory_bytes = current.saturating_sub(report.freed_bytes);
        self.metrics.evictions.inc_by(report.evicted as u64);
        self.metrics.evicted_bytes.inc_by(report.freed_bytes);
        if report.evicted > 0 {
            info!(
                evicted = report.evicted,
                freed_bytes = report.freed_bytes,
                memory_bytes = report.memory_bytes,
                capacity = self.memory_capacity,
                "Eviction cycle complete"
            );
        }
        report
    }

    /// Score every unclaimed Memory entry and claim the victims, all under
    /// the selection lock. Entries another cycle is already demoting are
    /// left out of both the candidates and the resident total.
    fn plan_eviction(&self, now: DateTime<Utc>) -> (EvictionPlan, u64, EvictionReport) {
        let mut report = EvictionReport::default();
        let _selection = self.selection_lock.lock();

        let stats = self
            .telemetry
            .window_stats(self.evictor.config().access_window(), now);

        let mut current = 0u64;
        let mut candidates = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if entry.tier != Tier::Memory || entry.demoting {
                continue;
            }
            current += entry.size_bytes;

            let window = stats.get(&entry.id);
            entry.access_count_window = window.map_or(0, |s| s.count);
            let last_access = entry
                .last_accessed_at
                .max(window.and_then(|s| s.last_access));
            let premium = window.is_some_and(|s| {
                s.tenants
                    .iter()
                    .any(|t| self.quotas.tier_of(t).is_some_and(|tier| tier.is_premium()))
            });

            if entry.is_pinned() {
                report.skipped += 1;
                continue;
            }
            candidates.push(EvictionCandidate {
                payload_id: entry.id.clone(),
                size_bytes: entry.size_bytes,
                score: self
                    .evictor
                    .score(entry.access_count_window, last_access, premium, now),
            });
        }

        let plan = self.evictor.plan(candidates, current, self.memory_capacity);
        for victim in &plan.victims {
            if let Some(mut entry) = self.entries.get_mut(&victim.payload_id) {
                entry.demoting = true;
            }
        }
        (plan, current, report)
    }

    /// Claim a fallback candidate if it is still an unpinned, unclaimed
    /// Memory entry.
    fn claim_for_demotion(&self, id: &str) -> bool {
        let _selection = self.selection_lock.lock();
        match self.entries.get_mut(id) {
            Some(mut entry) if entry.tier == Tier::Memory && !entry.demoting && !entry.is_pinned() => {
                entry.demoting = true;
                true
            }
            _ => false,
        }
    }

    fn record_demotion(
        &self,
        candidate: &EvictionCandidate,
        outcome: Result<Option<u64>>,
        report: &mut EvictionReport,
    ) {
        match outcome {
            Ok(Some(freed)) => {
                report.evicted += 1;
                report.freed_bytes += freed;
                debug!(
                    payload_id = %candidate.payload_id,
                    score = candidate.score,
                    size = freed,
                    "Evicted payload"
                );
            }
            Ok(None) => report.skipped += 1,
            Err(e) => {
                report.skipped += 1;
                self.metrics.backend_failures.inc();
                warn!(
                    payload_id = %candidate.payload_id,
                    error = %e,
                    "Eviction skipped payload"
                );
            }
        }
    }

    /// Demote one claimed Memory payload to SSD and release the claim.
    /// `Ok(None)` means the row changed or became pinned meanwhile.
    async fn demote(&self, id: &str, now: DateTime<Utc>) -> Result<Option<u64>> {
        let outcome = self.demote_claimed(id, now).await;
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.demoting = false;
        }
        outcome
    }

    /// Write a warm copy first if none exists, then swap the row to SSD.
    async fn demote_claimed(&self, id: &str, now: DateTime<Utc>) -> Result<Option<u64>> {
        let pending_write = {
            let Some(entry) = self.entries.get(id) else {
                return Ok(None);
            };
            if entry.tier != Tier::Memory || entry.is_pinned() {
                return Ok(None);
            }
            match (&entry.ssd_location, &entry.buffer) {
                (Some(_), _) => None,
                (None, Some(data)) => Some(data.clone()),
                (None, None) => return Ok(None),
            }
        };

        let written = match pending_write {
            Some(data) => Some(self.stores.ssd.store(data).await?),
            None => None,
        };

        let freed = {
            match self.entries.get_mut(id) {
                Some(mut entry) if entry.tier == Tier::Memory && !entry.is_pinned() => {
                    if let Some(loc) = written.clone() {
                        entry.ssd_location = Some(loc);
                    }
                    entry.tier = Tier::Ssd;
                    entry.buffer = None;
                    entry.demoted_at = Some(now);
                    Some(entry.size_bytes)
                }
                _ => None,
            }
        };

        if freed.is_none() {
            if let Some(loc) = &written {
                self.discard_warm_copy(loc).await;
            }
        }
        Ok(freed)
    }

    // ─── Preload ─────────────────────────────────────────────────────────

    /// Carry out planner requests in order. Failures are logged and counted.
    pub async fn apply_preload(&self, requests: Vec<PreloadRequest>, now: DateTime<Utc>) -> PreloadReport {
        let mut report = PreloadReport {
            requested: requests.len(),
            ..Default::default()
        };
        for request in requests {
            match self.promote(&request.payload_id, request.target_tier, now).await {
                Ok(tier) if tier.at_least(request.target_tier) => report.placed += 1,
                Ok(_) => {}
                Err(e) => {
                    report.failed += 1;
                    debug!(
                        payload_id = %request.payload_id,
                        reason = ?request.reason,
                        error = %e,
                        "Preload request not placed"
                    );
                }
            }
        }
        report
    }

    /// Interaction-start trigger for one model.
    pub async fn preload_interaction(
        &self,
        model_id: &str,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PreloadReport> {
        let quota = self.quotas.get(tenant_id)?;
        let layers = self.model_layers(model_id);
        if layers.is_empty() {
            return Err(Error::NotFound(format!("model {model_id}")));
        }
        let requests = self
            .planner
            .plan_interaction(&layers, quota.subscription_tier);
        let report = self.apply_preload(requests, now).await;
        info!(
            model_id,
            tenant_id,
            placed = report.placed,
            failed = report.failed,
            "Interaction preload complete"
        );
        Ok(report)
    }

    /// Time-of-day trigger: most-accessed payloads over the trailing window.
    pub async fn preload_scheduled(&self, now: DateTime<Utc>) -> PreloadReport {
        let mut counts = self.telemetry.trailing_counts(self.trailing_window, now, None);
        counts.retain(|id, _| self.entries.contains_key(id));
        let requests = self.planner.plan_scheduled(&counts);
        let report = self.apply_preload(requests, now).await;
        info!(
            placed = report.placed,
            failed = report.failed,
            "Scheduled preload complete"
        );
        report
    }

    /// Tenant trigger: reserved payloads and the tenant's most-used models.
    pub async fn preload_tenant(&self, tenant_id: &str, now: DateTime<Utc>) -> Result<PreloadReport> {
        let quota = self.quotas.get(tenant_id)?;

        let payload_counts = self
            .telemetry
            .trailing_counts(self.trailing_window, now, Some(tenant_id));
        let mut model_counts: HashMap<ModelId, u64> = HashMap::new();
        for (payload_id, count) in payload_counts {
            if let Some(entry) = self.entries.get(&payload_id) {
                *model_counts.entry(entry.owner_model_id.clone()).or_default() += count;
            }
        }

        let model_payloads: Vec<PayloadId> = self
            .planner
            .top_models(&model_counts)
            .iter()
            .flat_map(|model| self.model_layers(model))
            .map(|layer| layer.payload_id)
            .collect();

        let requests = self.planner.plan_tenant(
            quota.subscription_tier,
            &quota.reserved_payload_ids,
            &model_payloads,
        );
        let report = self.apply_preload(requests, now).await;
        info!(
            tenant_id,
            placed = report.placed,
            failed = report.failed,
            "Tenant preload complete"
        );
        Ok(report)
    }

    // ─── Stats ───────────────────────────────────────────────────────────

    /// Entry count, bytes and capacity per tier, keyed by tier name. Also
    /// refreshes the per-tier gauges.
    pub fn cache_stats(&self) -> BTreeMap<String, TierUsage> {
        let mut usage = [TierUsage::default(); 3];
        usage[Tier::Memory.index()].capacity_bytes = Some(self.memory_capacity);
        usage[Tier::Ssd.index()].capacity_bytes = Some(self.ssd_capacity);
        for entry in self.entries.iter() {
            let u = &mut usage[entry.tier.index()];
            u.entry_count += 1;
            u.total_bytes += entry.size_bytes;
        }

        Tier::ALL
            .iter()
            .map(|tier| {
                let u = usage[tier.index()];
                self.metrics
                    .tier_bytes
                    .with_label_values(&[tier.as_str()])
                    .set(u.total_bytes as i64);
                self.metrics
                    .tier_entries
                    .with_label_values(&[tier.as_str()])
                    .set(u.entry_count as i64);
                (tier.as_str().to_string(), u)
            })
            .collect()
    }

    /// Bytes currently resident in Memory.
    pub fn memory_bytes(&self) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.tier == Tier::Memory)
            .map(|e| e.size_bytes)
            .sum()
    }
}
