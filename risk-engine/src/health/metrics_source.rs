use parking_lot::RwLock;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};

/// Resource usage reported for an agent, in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub cpu_usage: f64,
    pub memory_usage: f64,
}

/// Where heartbeats get CPU and memory figures from.
pub trait MetricsSource: Send + Sync {
    fn sample(&self, agent_id: &str) -> anyhow::Result<ResourceSample>;
}

/// Random figures for running without real telemetry.
#[derive(Debug, Clone)]
pub struct SyntheticMetricsSource {
    cpu_range: (f64, f64),
    memory_range: (f64, f64),
}

impl SyntheticMetricsSource {
    /// Ranges are clamped to 0-100 and reordered if given backwards.
    pub fn new(cpu_range: (f64, f64), memory_range: (f64, f64)) -> Self {
        Self {
            cpu_range: percent_range(cpu_range),
            memory_range: percent_range(memory_range),
        }
    }
}

fn percent_range((a, b): (f64, f64)) -> (f64, f64) {
    let bound = |v: f64| if v.is_nan() { 0.0 } else { v.clamp(0.0, 100.0) };
    let (a, b) = (bound(a), bound(b));
    (a.min(b), a.max(b))
}

impl Default for SyntheticMetricsSource {
    fn default() -> Self {
        Self::new((10.0, 80.0), (30.0, 90.0))
    }
}

impl MetricsSource for SyntheticMetricsSource {
    fn sample(&self, _agent_id: &str) -> anyhow::Result<ResourceSample> {
        let mut rng = rand::thread_rng();
        Ok(ResourceSample {
            cpu_usage: rng.gen_range(self.cpu_range.0..=self.cpu_range.1),
            memory_usage: rng.gen_range(self.memory_range.0..=self.memory_range.1),
        })
    }
}

/// Source whose reading is set by hand; can be switched to fail.
#[derive(Debug)]
pub struct ManualMetricsSource {
    sample: RwLock<ResourceSample>,
    failing: AtomicBool,
}

impl ManualMetricsSource {
    pub fn new(cpu_usage: f64, memory_usage: f64) -> Self {
        Self {
            sample: RwLock::new(ResourceSample { cpu_usage, memory_usage }),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set(&self, cpu_usage: f64, memory_usage: f64) {
        *self.sample.write() = ResourceSample { cpu_usage, memory_usage };
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl MetricsSource for ManualMetricsSource {
    fn sample(&self, agent_id: &str) -> anyhow::Result<ResourceSample> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("no telemetry available for agent {}", agent_id);
        }
        Ok(*self.sample.read())
    }
}
