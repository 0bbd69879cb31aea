//! Prometheus metrics for the cache and the admission queue.
//!
//! Each [`Metrics`] owns its own registry so that several managers (and tests)
//! can live in one process.

use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

pub struct Metrics {
    registry: Registry,

    /// Admitted requests by queue class.
    pub admitted: IntCounterVec,
    /// Rejected admissions by reason (`concurrent`, `queued`, `unknown_tenant`).
    pub rejected: IntCounterVec,
    /// Claimed requests by queue class.
    pub dequeued: IntCounterVec,
    /// Dequeue races lost and retried.
    pub claim_conflicts: IntCounter,
    /// Terminal outcomes (`completed`, `failed`, `cancelled`).
    pub outcomes: IntCounterVec,
    /// Items whose priority was raised by the starvation boost.
    pub boosts: IntCounter,
    /// Reaper actions (`requeued`, `failed`, `expired`).
    pub reaped: IntCounterVec,
    /// Throttle gate transitions (`throttled`, `resumed`).
    pub throttle_transitions: IntCounterVec,
    /// Pending items by queue class.
    pub queue_depth: IntGaugeVec,

    /// Entries demoted out of Memory.
    pub evictions: IntCounter,
    pub evicted_bytes: IntCounter,
    /// Successful promotions by target tier.
    pub promotions: IntCounterVec,
    /// Blob load/store failures.
    pub backend_failures: IntCounter,
    /// Bytes resident per tier.
    pub tier_bytes: IntGaugeVec,
    /// Entries per tier.
    pub tier_entries: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("payload_tier".to_string()), None)?;

        let admitted = IntCounterVec::new(
            Opts::new("admitted_total", "Requests admitted"),
            &["class"],
        )?;
        let rejected = IntCounterVec::new(
            Opts::new("rejected_total", "Admissions rejected"),
            &["reason"],
        )?;
        let dequeued = IntCounterVec::new(
            Opts::new("dequeued_total", "Requests claimed by workers"),
            &["class"],
        )?;
        let claim_conflicts =
            IntCounter::new("claim_conflicts_total", "Dequeue races lost and retried")?;
        let outcomes = IntCounterVec::new(
            Opts::new("outcomes_total", "Terminal request outcomes"),
            &["outcome"],
        )?;
        let boosts = IntCounter::new("boosts_total", "Starvation boosts applied")?;
        let reaped = IntCounterVec::new(
            Opts::new("reaped_total", "Reaper actions"),
            &["action"],
        )?;
        let throttle_transitions = IntCounterVec::new(
            Opts::new("throttle_transitions_total", "Items throttled or resumed"),
            &["direction"],
        )?;
        let queue_depth = IntGaugeVec::new(
            Opts::new("queue_depth", "Pending requests"),
            &["class"],
        )?;
        let evictions = IntCounter::new("evictions_total", "Payloads demoted out of Memory")?;
        let evicted_bytes = IntCounter::new("evicted_bytes_total", "Bytes demoted out of Memory")?;
        let promotions = IntCounterVec::new(
            Opts::new("promotions_total", "Payload promotions"),
            &["tier"],
        )?;
        let backend_failures =
            IntCounter::new("backend_failures_total", "Blob store load/store failures")?;
        let tier_bytes = IntGaugeVec::new(
            Opts::new("tier_bytes", "Bytes resident per tier"),
            &["tier"],
        )?;
        let tier_entries = IntGaugeVec::new(
            Opts::new("tier_entries", "Entries per tier"),
            &["tier"],
        )?;

        registry.register(Box::new(admitted.clone()))?;
        registry.register(Box::new(rejected.clone()))?;
        registry.register(Box::new(dequeued.clone()))?;
        registry.register(Box::new(claim_conflicts.clone()))?;
        registry.register(Box::new(outcomes.clone()))?;
        registry.register(Box::new(boosts.clone()))?;
        registry.register(Box::new(reaped.clone()))?;
        registry.register(Box::new(throttle_transitions.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(evictions.clone()))?;
        registry.register(Box::new(evicted_bytes.clone()))?;
        registry.register(Box::new(promotions.clone()))?;
        registry.register(Box::new(backend_failures.clone()))?;
        registry.register(Box::new(tier_bytes.clone()))?;
        registry.register(Box::new(tier_entries.clone()))?;

        Ok(Self {
            registry,
            admitted,
            rejected,
            dequeued,
            claim_conflicts,
            outcomes,
            boosts,
            reaped,
            throttle_transitions,
            queue_depth,
            evictions,
            evicted_bytes,
            promotions,
            backend_failures,
            tier_bytes,
            tier_entries,
        })
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_prefix() {
        let metrics = Metrics::new().unwrap();
        metrics.admitted.with_label_values(&["hot"]).inc();
        let text = metrics.encode().unwrap();
        assert!(text.contains("payload_tier_admitted_total"));
    }

    #[test]
    fn test_independent_registries() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.boosts.inc();
        assert_eq!(a.boosts.get(), 1);
        assert_eq!(b.boosts.get(), 0);
    }
}
