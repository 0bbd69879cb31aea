//! Load monitor and throttle gate.
//!
//! On every tick the gate samples host CPU and memory plus the scheduler's
//! waiting-item count, picks a throttle level, and pauses or resumes the Warm
//! and Cold classes to match. Administrators can also pause any class; a
//! class is paused while either the load level or an administrator says so.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tracing::{info, warn};

use crate::config::ThrottleConfig;
use crate::queue::request::QueueClass;
use crate::queue::scheduler::Scheduler;

/// Host utilisation in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HostLoad {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// One load monitor observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SystemLoadSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    /// Pending plus Throttled items.
    pub queue_depth: usize,
    pub sampled_at: DateTime<Utc>,
}

/// Source of host utilisation figures.
pub trait LoadSampler: Send + Sync {
    fn sample(&self) -> HostLoad;
}

/// Samples the local host through sysinfo.
///
/// CPU usage is measured between consecutive calls, so the first sample
/// after construction may read low.
pub struct SysinfoSampler {
    system: Mutex<System>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadSampler for SysinfoSampler {
    fn sample(&self) -> HostLoad {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        system.refresh_memory();

        let total = system.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            system.used_memory() as f64 / total as f64 * 100.0
        };
        HostLoad {
            cpu_percent: system.global_cpu_usage() as f64,
            memory_percent,
        }
    }
}

/// Sampler returning whatever was last set. Used by tests and by
/// deployments that feed load from an external monitor.
#[derive(Debug, Default)]
pub struct FixedSampler {
    load: Mutex<HostLoad>,
}

impl FixedSampler {
    pub fn new(cpu_percent: f64, memory_percent: f64) -> Self {
        Self {
            load: Mutex::new(HostLoad {
                cpu_percent,
                memory_percent,
            }),
        }
    }

    pub fn set(&self, cpu_percent: f64, memory_percent: f64) {
        *self.load.lock() = HostLoad {
            cpu_percent,
            memory_percent,
        };
    }
}

impl LoadSampler for FixedSampler {
    fn sample(&self) -> HostLoad {
        *self.load.lock()
    }
}

/// Which classes the load monitor wants paused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleLevel {
    #[default]
    Normal,
    Cold,
    ColdAndWarm,
}

impl ThrottleLevel {
    /// Hot is never paused by load.
    pub fn pauses(&self, class: QueueClass) -> bool {
        match (self, class) {
            (_, QueueClass::Hot) => false,
            (ThrottleLevel::Normal, _) => false,
            (ThrottleLevel::Cold, QueueClass::Warm) => false,
            _ => true,
        }
    }
}

/// Throttle level for a sample.
pub fn evaluate(config: &ThrottleConfig, sample: &SystemLoadSample) -> ThrottleLevel {
    let cold = sample.cpu_percent > config.cold_cpu_percent
        || sample.memory_percent > config.cold_memory_percent
        || sample.queue_depth > config.cold_queue_depth;
    let warm = sample.cpu_percent > config.warm_cpu_percent
        || sample.queue_depth > config.warm_queue_depth;

    match (cold, warm) {
        (_, true) => ThrottleLevel::ColdAndWarm,
        (true, false) => ThrottleLevel::Cold,
        (false, false) => ThrottleLevel::Normal,
    }
}

struct GateState {
    level: ThrottleLevel,
    last_sample: Option<SystemLoadSample>,
}

pub struct ThrottleGate {
    scheduler: Arc<Scheduler>,
    sampler: Arc<dyn LoadSampler>,
    config: ThrottleConfig,
    admin_paused: [AtomicBool; 3],
    state: Mutex<GateState>,
}

impl ThrottleGate {
    pub fn new(scheduler: Arc<Scheduler>, sampler: Arc<dyn LoadSampler>, config: ThrottleConfig) -> Self {
        Self {
            scheduler,
            sampler,
            config,
            admin_paused: Default::default(),
            state: Mutex::new(GateState {
                level: ThrottleLevel::Normal,
                last_sample: None,
            }),
        }
    }

    /// Take one sample, re-evaluate the level and apply it. Returns the
    /// sample and the number of items moved.
    pub fn tick(&self, now: DateTime<Utc>) -> (SystemLoadSample, usize) {
        let host = self.sampler.sample();
        let depth = self.scheduler.depth();
        let sample = SystemLoadSample {
            cpu_percent: host.cpu_percent,
            memory_percent: host.memory_percent,
            queue_depth: depth.pending() + depth.throttled,
            sampled_at: now,
        };
        let level = evaluate(&self.config, &sample);

        let mut state = self.state.lock();
        if state.level != level {
            if level == ThrottleLevel::Normal {
                info!(
                    cpu = sample.cpu_percent,
                    memory = sample.memory_percent,
                    queue_depth = sample.queue_depth,
                    "Load back to normal, resuming queues"
                );
            } else {
                warn!(
                    ?level,
                    cpu = sample.cpu_percent,
                    memory = sample.memory_percent,
                    queue_depth = sample.queue_depth,
                    "System under load, throttling queues"
                );
            }
        }
        state.level = level;
        state.last_sample = Some(sample);
        let moved = self.reconcile(&state);
        (sample, moved)
    }

    /// Administrative pause. Returns how many items were throttled.
    pub fn pause_class(&self, class: QueueClass) -> usize {
        self.admin_paused[class.index()].store(true, Ordering::SeqCst);
        let state = self.state.lock();
        info!(class = %class, "Queue class paused by administrator");
        self.reconcile(&state)
    }

    /// Lift an administrative pause. The class stays paused if load still
    /// requires it. Returns how many items were resumed.
    pub fn resume_class(&self, class: QueueClass) -> usize {
        self.admin_paused[class.index()].store(false, Ordering::SeqCst);
        let state = self.state.lock();
        info!(class = %class, "Queue class resumed by administrator");
        self.reconcile(&state)
    }

    pub fn level(&self) -> ThrottleLevel {
        self.state.lock().level
    }

    pub fn last_sample(&self) -> Option<SystemLoadSample> {
        self.state.lock().last_sample
    }

    pub fn is_admin_paused(&self, class: QueueClass) -> bool {
        self.admin_paused[class.index()].load(Ordering::SeqCst)
    }

    /// Bring every class's gate in line with level and admin flags. Called
    /// with the state lock held so gate changes never interleave.
    fn reconcile(&self, state: &GateState) -> usize {
        let mut moved = 0;
        for class in QueueClass::ALL {
            let want = self.is_admin_paused(class) || state.level.pauses(class);
            if want != self.scheduler.is_paused(class) {
                moved += self.scheduler.set_paused(class, want);
            }
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::metrics::Metrics;

    fn sample(cpu: f64, memory: f64, depth: usize) -> SystemLoadSample {
        SystemLoadSample {
            cpu_percent: cpu,
            memory_percent: memory,
            queue_depth: depth,
            sampled_at: Utc::now(),
        }
    }

    #[test]
    fn test_evaluate_levels() {
        let config = ThrottleConfig::default();
        assert_eq!(evaluate(&config, &sample(50.0, 50.0, 10)), ThrottleLevel::Normal);
        assert_eq!(evaluate(&config, &sample(80.0, 85.0, 10_000)), ThrottleLevel::Normal);
        assert_eq!(evaluate(&config, &sample(85.0, 50.0, 10)), ThrottleLevel::Cold);
        assert_eq!(evaluate(&config, &sample(50.0, 90.0, 10)), ThrottleLevel::Cold);
        assert_eq!(evaluate(&config, &sample(50.0, 50.0, 10_001)), ThrottleLevel::Cold);
        assert_eq!(evaluate(&config, &sample(95.0, 50.0, 10)), ThrottleLevel::ColdAndWarm);
        assert_eq!(evaluate(&config, &sample(10.0, 10.0, 60_000)), ThrottleLevel::ColdAndWarm);
    }

    #[test]
    fn test_hot_never_paused_by_load() {
        assert!(!ThrottleLevel::ColdAndWarm.pauses(QueueClass::Hot));
        assert!(ThrottleLevel::ColdAndWarm.pauses(QueueClass::Warm));
        assert!(!ThrottleLevel::Cold.pauses(QueueClass::Warm));
        assert!(ThrottleLevel::Cold.pauses(QueueClass::Cold));
    }

    #[test]
    fn test_admin_pause_survives_normal_load() {
        let scheduler = Arc::new(Scheduler::new(
            SchedulerConfig::default(),
            Arc::new(Metrics::new().unwrap()),
        ));
        let sampler = Arc::new(FixedSampler::new(10.0, 10.0));
        let gate = ThrottleGate::new(scheduler.clone(), sampler, ThrottleConfig::default());

        gate.pause_class(QueueClass::Hot);
        gate.tick(Utc::now());
        assert!(scheduler.is_paused(QueueClass::Hot));
        assert!(!scheduler.is_paused(QueueClass::Cold));

        gate.resume_class(QueueClass::Hot);
        assert!(!scheduler.is_paused(QueueClass::Hot));
    }

    #[test]
    fn test_admin_resume_keeps_load_pause() {
        let scheduler = Arc::new(Scheduler::new(
            SchedulerConfig::default(),
            Arc::new(Metrics::new().unwrap()),
        ));
        let sampler = Arc::new(FixedSampler::new(85.0, 10.0));
        let gate = ThrottleGate::new(scheduler.clone(), sampler, ThrottleConfig::default());

        gate.tick(Utc::now());
        gate.pause_class(QueueClass::Cold);
        gate.resume_class(QueueClass::Cold);
        assert!(scheduler.is_paused(QueueClass::Cold));
        assert_eq!(gate.level(), ThrottleLevel::Cold);
    }
}
