pub mod health_monitor;
pub mod metrics_source;

pub use health_monitor::{classify, HealthMonitor, HeartbeatHandle};
pub use metrics_source::{ManualMetricsSource, MetricsSource, ResourceSample, SyntheticMetricsSource};
