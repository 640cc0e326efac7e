use std::collections::BTreeMap;

use common::errors::EvaluationError;
use common::types::{FactorBreakdown, RiskFactor, RiskLevel};
use common::weights::RiskWeights;

use super::factor_evaluator::FactorEvaluation;

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    pub breakdown: BTreeMap<RiskFactor, FactorBreakdown>,
}

/// Weighted sum of factor values, classified into a risk level.
#[derive(Debug, Clone)]
pub struct RiskAggregator {
    weights: RiskWeights,
}

impl RiskAggregator {
    pub fn new(weights: RiskWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &RiskWeights {
        &self.weights
    }

    /// Missing factors stay in the sum with value 0.0; confidence reflects
    /// how many inputs were actually supplied.
    pub fn aggregate(&self, evaluation: &FactorEvaluation) -> Result<AggregateResult, EvaluationError> {
        let mut breakdown = BTreeMap::new();
        let mut score = 0.0;

        for factor in RiskFactor::ALL {
            let value = evaluation.value(factor);
            let weight = self.weights.get(factor).unwrap_or(0.0);
            let contribution = weight * value;
            score += contribution;

            breakdown.insert(
                factor,
                FactorBreakdown {
                    value,
                    weight,
                    contribution,
                    present: evaluation.is_present(factor),
                },
            );
        }

        if !score.is_finite() {
            return Err(EvaluationError::NonFiniteScore);
        }

        let risk_score = score.clamp(0.0, 1.0);

        Ok(AggregateResult {
            risk_score,
            risk_level: RiskLevel::from_score(risk_score),
            confidence: Self::confidence(
                evaluation.present_field_count(),
                evaluation.expected_field_count(),
            ),
            breakdown,
        })
    }

    pub fn confidence(present: usize, expected: usize) -> f64 {
        if expected == 0 {
            return 0.0;
        }
        (present as f64 / expected as f64).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::EntityInput;
    use crate::risk_control::factor_evaluator::RiskFactorEvaluator;

    fn aggregate(input: &EntityInput) -> AggregateResult {
        let evaluation = RiskFactorEvaluator::new().evaluate(input).unwrap();
        RiskAggregator::new(RiskWeights::default()).aggregate(&evaluation).unwrap()
    }

    #[test]
    fn test_reference_entity_score() {
        let input = EntityInput::new("CORP_001")
            .with_financial_exposure(2_500_000.0)
            .with_credit_score(720.0)
            .with_market_volatility(0.15)
            .with_compliance_score(0.95)
            .with_operational_incidents(1.0);
        let result = aggregate(&input);

        let expected = 0.3 * (2_500_000.0 / 10_000_000.0)
            + 0.25 * ((850.0 - 720.0) / 550.0)
            + 0.2 * 0.15
            + 0.15 * (1.0 - 0.95)
            + 0.1 * (1.0 - (-0.3f64).exp());

        assert!((result.risk_score - expected).abs() < 1e-12);
        assert!((result.risk_score - 0.197509).abs() < 1e-6);
        assert_eq!(result.risk_level, RiskLevel::Low);
        assert_eq!(result.confidence, 1.0);

        let credit = result.breakdown[&RiskFactor::CreditHistory];
        assert_eq!(credit.weight, 0.25);
        assert!((credit.contribution - 0.25 * 130.0 / 550.0).abs() < 1e-12);
        assert!(credit.present);
    }

    #[test]
    fn test_confidence_drops_per_missing_field() {
        let full = EntityInput::new("E")
            .with_financial_exposure(1.0)
            .with_credit_score(700.0)
            .with_market_volatility(0.2)
            .with_compliance_score(0.9)
            .with_operational_incidents(0.0);

        let cases = [
            (full.clone(), 1.0),
            (EntityInput { operational_incidents: None, ..full.clone() }, 0.8),
            (EntityInput { operational_incidents: None, compliance_score: None, ..full.clone() }, 0.6),
            (EntityInput::new("E").with_credit_score(700.0).with_market_volatility(0.2), 0.4),
            (EntityInput::new("E").with_compliance_score(0.5), 0.2),
            (EntityInput::new("E"), 0.0),
        ];

        for (input, confidence) in cases {
            assert!((aggregate(&input).confidence - confidence).abs() < 1e-12);
        }
    }

    #[test]
    fn test_missing_factor_contributes_zero() {
        let input = EntityInput::new("E").with_market_volatility(1.0);
        let result = aggregate(&input);

        assert!((result.risk_score - 0.2).abs() < 1e-12);
        assert_eq!(result.breakdown[&RiskFactor::FinancialExposure].contribution, 0.0);
        assert!(!result.breakdown[&RiskFactor::FinancialExposure].present);
    }

    #[test]
    fn test_worst_case_is_critical_and_bounded() {
        let input = EntityInput::new("E")
            .with_financial_exposure(1e12)
            .with_credit_score(0.0)
            .with_market_volatility(5.0)
            .with_compliance_score(-3.0)
            .with_operational_incidents(1000.0);
        let result = aggregate(&input);

        assert!(result.risk_score <= 1.0);
        assert!(result.risk_score > 0.999);
        assert_eq!(result.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn test_factors_outside_weights_carry_no_weight() {
        let weights = RiskWeights::new(BTreeMap::from([(RiskFactor::MarketVolatility, 1.0)])).unwrap();
        let input = EntityInput::new("E")
            .with_financial_exposure(10_000_000.0)
            .with_market_volatility(0.6);
        let evaluation = RiskFactorEvaluator::new().evaluate(&input).unwrap();
        let result = RiskAggregator::new(weights).aggregate(&evaluation).unwrap();

        assert!((result.risk_score - 0.6).abs() < 1e-12);
        assert_eq!(result.risk_level, RiskLevel::High);
        assert_eq!(result.breakdown[&RiskFactor::FinancialExposure].weight, 0.0);
    }
}
