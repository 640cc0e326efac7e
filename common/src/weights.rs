use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::errors::{RiskError, RiskResult};
use crate::types::RiskFactor;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Validated factor weights: non-negative, finite, summing to 1.0.
///
/// Factors left out of the mapping carry no weight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskWeights {
    weights: BTreeMap<RiskFactor, f64>,
}

impl RiskWeights {
    pub fn new(weights: BTreeMap<RiskFactor, f64>) -> RiskResult<Self> {
        if weights.is_empty() {
            return Err(RiskError::InvalidWeights("no factor weights given".to_string()));
        }

        for (factor, weight) in &weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(RiskError::InvalidWeights(format!(
                    "weight for {} must be a non-negative number, got {}",
                    factor, weight
                )));
            }
        }

        let sum: f64 = weights.values().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(RiskError::InvalidWeights(format!(
                "weights must sum to 1.0, got {:.6}",
                sum
            )));
        }

        Ok(Self { weights })
    }

    /// Builds weights from factor names as they appear in configuration.
    pub fn from_named(named: &HashMap<String, f64>) -> RiskResult<Self> {
        let mut weights = BTreeMap::new();
        for (name, weight) in named {
            let factor = RiskFactor::from_name(name).ok_or_else(|| {
                RiskError::InvalidWeights(format!("unknown risk factor `{}`", name))
            })?;
            weights.insert(factor, *weight);
        }
        Self::new(weights)
    }

    pub fn get(&self, factor: RiskFactor) -> Option<f64> {
        self.weights.get(&factor).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RiskFactor, f64)> + '_ {
        self.weights.iter().map(|(f, w)| (*f, *w))
    }
}

impl Default for RiskWeights {
    fn default() -> Self {
        let weights = BTreeMap::from([
            (RiskFactor::FinancialExposure, 0.3),
            (RiskFactor::CreditHistory, 0.25),
            (RiskFactor::MarketVolatility, 0.2),
            (RiskFactor::RegulatoryCompliance, 0.15),
            (RiskFactor::OperationalRisk, 0.1),
        ]);
        Self { weights }
    }
}
