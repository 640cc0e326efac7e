use thiserror::Error;

/// Errors surfaced to callers of the scoring engine.
///
/// None of these are retried by the engine; the caller decides.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RiskError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("assessment failed on agent `{agent_id}`: {reason}")]
    AssessmentFailed { agent_id: String, reason: String },

    #[error("agent `{0}` is already registered")]
    DuplicateAgent(String),

    #[error("agent `{0}` is not registered")]
    UnknownAgent(String),

    #[error("agent `{0}` is offline")]
    AgentOffline(String),

    #[error("invalid risk weights: {0}")]
    InvalidWeights(String),
}

pub type RiskResult<T> = Result<T, RiskError>;

/// Failures raised inside factor evaluation or aggregation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvaluationError {
    #[error("field `{field}` is not a finite number")]
    NonFiniteInput { field: &'static str },

    #[error("aggregated score is not a finite number")]
    NonFiniteScore,
}

impl RiskError {
    pub fn assessment_failed(agent_id: &str, source: EvaluationError) -> Self {
        RiskError::AssessmentFailed {
            agent_id: agent_id.to_string(),
            reason: source.to_string(),
        }
    }
}
