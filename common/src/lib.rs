pub mod config;
pub mod errors;
pub mod types;
pub mod weights;

pub use config::{AgentConfig, EngineConfig, HealthConfig, SelectionStrategy};
pub use errors::{EvaluationError, RiskError, RiskResult};
pub use types::{
    AgentHealth, AgentStatus, EntityInput, FactorBreakdown, FieldValue, FlatRecord,
    RiskAssessment, RiskFactor, RiskLevel, SystemMetrics, EXPECTED_FIELD_COUNT,
};
pub use weights::RiskWeights;
