pub mod factor_evaluator;
pub mod aggregator;

pub use factor_evaluator::{FactorEvaluation, RiskFactorEvaluator};
pub use aggregator::{AggregateResult, RiskAggregator};
