pub mod agent;
pub mod health;
pub mod risk_control;
pub mod system;

pub use agent::RiskAgent;
pub use health::{HealthMonitor, ManualMetricsSource, MetricsSource, ResourceSample, SyntheticMetricsSource};
pub use risk_control::{RiskAggregator, RiskFactorEvaluator};
pub use system::RiskScoringSystem;
