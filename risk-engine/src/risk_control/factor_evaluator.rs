use std::collections::BTreeMap;
use tracing::debug;

use common::errors::EvaluationError;
use common::types::{EntityInput, RiskFactor, EXPECTED_FIELD_COUNT};

/// Exposure at or above this amount saturates the factor.
pub const EXPOSURE_CEILING: f64 = 10_000_000.0;
/// Plausible credit score range; scores map inversely onto [0, 1].
pub const CREDIT_SCORE_MIN: f64 = 300.0;
pub const CREDIT_SCORE_MAX: f64 = 850.0;
/// Decay constant k in 1 - e^(-k * incidents).
pub const INCIDENT_DECAY: f64 = 0.3;

/// Normalized factor values for one entity.
///
/// Every canonical factor has a value; missing inputs are recorded as 0.0
/// and listed in `missing`.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorEvaluation {
    pub values: BTreeMap<RiskFactor, f64>,
    pub missing: Vec<RiskFactor>,
}

impl FactorEvaluation {
    pub fn value(&self, factor: RiskFactor) -> f64 {
        self.values.get(&factor).copied().unwrap_or(0.0)
    }

    pub fn is_present(&self, factor: RiskFactor) -> bool {
        !self.missing.contains(&factor)
    }

    pub fn present_field_count(&self) -> usize {
        EXPECTED_FIELD_COUNT - self.missing.len()
    }

    pub fn expected_field_count(&self) -> usize {
        EXPECTED_FIELD_COUNT
    }
}

/// Maps raw entity attributes to factor values in [0, 1].
#[derive(Debug, Clone, Default)]
pub struct RiskFactorEvaluator;

impl RiskFactorEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, input: &EntityInput) -> Result<FactorEvaluation, EvaluationError> {
        let mut values = BTreeMap::new();
        let mut missing = Vec::new();

        for factor in RiskFactor::ALL {
            match input.field(factor) {
                Some(raw) => {
                    if !raw.is_finite() {
                        return Err(EvaluationError::NonFiniteInput {
                            field: factor.input_field(),
                        });
                    }
                    values.insert(factor, Self::normalize(factor, raw));
                }
                None => {
                    values.insert(factor, 0.0);
                    missing.push(factor);
                }
            }
        }

        if !missing.is_empty() {
            debug!("Entity {} missing fields: {:?}", input.entity_id, missing);
        }

        Ok(FactorEvaluation { values, missing })
    }

    fn normalize(factor: RiskFactor, raw: f64) -> f64 {
        let value = match factor {
            RiskFactor::FinancialExposure => raw / EXPOSURE_CEILING,
            // Lower score, higher risk
            RiskFactor::CreditHistory => {
                (CREDIT_SCORE_MAX - raw) / (CREDIT_SCORE_MAX - CREDIT_SCORE_MIN)
            }
            RiskFactor::MarketVolatility => raw,
            RiskFactor::RegulatoryCompliance => 1.0 - raw,
            RiskFactor::OperationalRisk => 1.0 - (-INCIDENT_DECAY * raw.max(0.0)).exp(),
        };
        value.clamp(0.0, 1.0)
    }
}
