use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::errors::{RiskError, RiskResult};

/// Number of canonical input fields; the denominator of confidence.
pub const EXPECTED_FIELD_COUNT: usize = 5;

/// 风险因子
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactor {
    FinancialExposure,
    CreditHistory,
    MarketVolatility,
    RegulatoryCompliance,
    OperationalRisk,
}

impl RiskFactor {
    pub const ALL: [RiskFactor; EXPECTED_FIELD_COUNT] = [
        RiskFactor::FinancialExposure,
        RiskFactor::CreditHistory,
        RiskFactor::MarketVolatility,
        RiskFactor::RegulatoryCompliance,
        RiskFactor::OperationalRisk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskFactor::FinancialExposure => "financial_exposure",
            RiskFactor::CreditHistory => "credit_history",
            RiskFactor::MarketVolatility => "market_volatility",
            RiskFactor::RegulatoryCompliance => "regulatory_compliance",
            RiskFactor::OperationalRisk => "operational_risk",
        }
    }

    /// 按因子名查找, 未知名称返回 None
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.as_str() == name)
    }

    /// Name of the raw entity field this factor is derived from.
    pub fn input_field(&self) -> &'static str {
        match self {
            RiskFactor::FinancialExposure => "financial_exposure",
            RiskFactor::CreditHistory => "credit_score",
            RiskFactor::MarketVolatility => "market_volatility",
            RiskFactor::RegulatoryCompliance => "compliance_score",
            RiskFactor::OperationalRisk => "operational_incidents",
        }
    }
}

impl fmt::Display for RiskFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 风险等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Buckets are closed below and open above; the last one includes 1.0.
    pub fn from_score(score: f64) -> Self {
        if score < 0.25 {
            RiskLevel::Low
        } else if score < 0.5 {
            RiskLevel::Medium
        } else if score < 0.75 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// 代理健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Healthy,
    Warning,
    Critical,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Healthy => "healthy",
            AgentStatus::Warning => "warning",
            AgentStatus::Critical => "critical",
            AgentStatus::Offline => "offline",
        }
    }

    /// 除 Offline 以外都视为在线
    pub fn is_online(&self) -> bool {
        *self != AgentStatus::Offline
    }
}

/// Raw attributes of the entity being scored. Every numeric field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityInput {
    /// 实体ID
    pub entity_id: String,
    /// 敞口金额
    pub financial_exposure: Option<f64>,
    /// 信用分 (300-850)
    pub credit_score: Option<f64>,
    /// 市场波动率 (0-1)
    pub market_volatility: Option<f64>,
    /// 合规评分 (0-1, 越高越合规)
    pub compliance_score: Option<f64>,
    /// 运营事故次数
    pub operational_incidents: Option<f64>,
}

impl EntityInput {
    /// 创建只有ID、没有任何数值字段的输入
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            ..Default::default()
        }
    }

    /// 设置敞口金额
    pub fn with_financial_exposure(mut self, value: f64) -> Self {
        self.financial_exposure = Some(value);
        self
    }

    /// 设置信用分
    pub fn with_credit_score(mut self, value: f64) -> Self {
        self.credit_score = Some(value);
        self
    }

    /// 设置市场波动率
    pub fn with_market_volatility(mut self, value: f64) -> Self {
        self.market_volatility = Some(value);
        self
    }

    /// 设置合规评分
    pub fn with_compliance_score(mut self, value: f64) -> Self {
        self.compliance_score = Some(value);
        self
    }

    /// 设置运营事故次数
    pub fn with_operational_incidents(mut self, value: f64) -> Self {
        self.operational_incidents = Some(value);
        self
    }

    /// Raw input value feeding the given factor.
    pub fn field(&self, factor: RiskFactor) -> Option<f64> {
        match factor {
            RiskFactor::FinancialExposure => self.financial_exposure,
            RiskFactor::CreditHistory => self.credit_score,
            RiskFactor::MarketVolatility => self.market_volatility,
            RiskFactor::RegulatoryCompliance => self.compliance_score,
            RiskFactor::OperationalRisk => self.operational_incidents,
        }
    }

    /// 已提供的数值字段个数
    pub fn present_field_count(&self) -> usize {
        RiskFactor::ALL
            .iter()
            .filter(|f| self.field(**f).is_some())
            .count()
    }

    /// Parses a JSON object. `null` and absent fields are missing; unknown
    /// keys are ignored. Anything that is not an object, or a canonical
    /// field holding a non-number, is rejected.
    pub fn from_json(value: &Value) -> RiskResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| RiskError::InvalidInput("entity data must be a JSON object".to_string()))?;

        let entity_id = match object.get("entity_id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => {
                return Err(RiskError::InvalidInput(format!(
                    "entity_id must be a string, got {}",
                    other
                )))
            }
        };

        let mut input = EntityInput::new(entity_id);
        for factor in RiskFactor::ALL {
            let name = factor.input_field();
            let parsed = match object.get(name) {
                None | Some(Value::Null) => None,
                Some(Value::Number(n)) => n.as_f64(),
                Some(other) => {
                    return Err(RiskError::InvalidInput(format!(
                        "field `{}` must be numeric, got {}",
                        name, other
                    )))
                }
            };
            match factor {
                RiskFactor::FinancialExposure => input.financial_exposure = parsed,
                RiskFactor::CreditHistory => input.credit_score = parsed,
                RiskFactor::MarketVolatility => input.market_volatility = parsed,
                RiskFactor::RegulatoryCompliance => input.compliance_score = parsed,
                RiskFactor::OperationalRisk => input.operational_incidents = parsed,
            }
        }

        Ok(input)
    }
}

/// Contribution of a single factor to an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorBreakdown {
    pub value: f64,
    pub weight: f64,
    pub contribution: f64,
    pub present: bool,
}

/// Immutable result of one `assess` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub assessment_id: Uuid,
    pub agent_id: String,
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    pub factors: BTreeMap<RiskFactor, FactorBreakdown>,
}

/// Point-in-time operational state of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealth {
    pub agent_id: String,
    pub status: AgentStatus,
    /// 评估耗时的指数移动平均 (毫秒, 新样本权重 0.1), 由每次评估更新
    pub response_time_ms: f64,
    /// 活动窗口内每秒成功评估数, 由心跳更新
    pub throughput: f64,
    /// 活动窗口内的错误率, 由心跳更新
    pub error_rate: f64,
    /// CPU使用率 (%)
    pub cpu_usage: f64,
    /// 内存使用率 (%)
    pub memory_usage: f64,
    pub last_heartbeat: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: f64,
    /// 成功评估总数
    pub total_processed: u64,
    /// 失败评估总数
    pub total_errors: u64,
    /// 快照时正在进行中的评估数
    pub active_assessments: u64,
}

impl AgentHealth {
    pub fn new(agent_id: String, now: DateTime<Utc>) -> Self {
        Self {
            agent_id,
            status: AgentStatus::Healthy,
            response_time_ms: 0.0,
            throughput: 0.0,
            error_rate: 0.0,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            last_heartbeat: now,
            started_at: now,
            uptime_secs: 0.0,
            total_processed: 0,
            total_errors: 0,
            active_assessments: 0,
        }
    }
}

/// Registry-wide aggregate, computed from agent snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub total_assessments: u64,
    pub total_errors: u64,
    pub active_agents: usize,
    pub total_agents: usize,
    pub average_response_time_ms: f64,
    pub system_uptime_secs: f64,
    pub captured_at: DateTime<Utc>,
}

/// Primitive value of a flat export record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Float(f64),
    Integer(u64),
    Bool(bool),
}

/// Flattening into `field name -> primitive` for exporters.
pub trait FlatRecord {
    fn to_record(&self) -> BTreeMap<String, FieldValue>;
}

impl FlatRecord for RiskAssessment {
    fn to_record(&self) -> BTreeMap<String, FieldValue> {
        let mut record = BTreeMap::new();
        record.insert("assessment_id".to_string(), FieldValue::Text(self.assessment_id.to_string()));
        record.insert("agent_id".to_string(), FieldValue::Text(self.agent_id.clone()));
        record.insert("entity_id".to_string(), FieldValue::Text(self.entity_id.clone()));
        record.insert("timestamp".to_string(), FieldValue::Text(self.timestamp.to_rfc3339()));
        record.insert("risk_score".to_string(), FieldValue::Float(self.risk_score));
        record.insert("risk_level".to_string(), FieldValue::Text(self.risk_level.as_str().to_string()));
        record.insert("confidence".to_string(), FieldValue::Float(self.confidence));

        for (factor, breakdown) in &self.factors {
            let prefix = factor.as_str();
            record.insert(format!("{}.value", prefix), FieldValue::Float(breakdown.value));
            record.insert(format!("{}.weight", prefix), FieldValue::Float(breakdown.weight));
            record.insert(format!("{}.contribution", prefix), FieldValue::Float(breakdown.contribution));
            record.insert(format!("{}.present", prefix), FieldValue::Bool(breakdown.present));
        }

        record
    }
}

impl FlatRecord for AgentHealth {
    fn to_record(&self) -> BTreeMap<String, FieldValue> {
        let mut record = BTreeMap::new();
        record.insert("agent_id".to_string(), FieldValue::Text(self.agent_id.clone()));
        record.insert("status".to_string(), FieldValue::Text(self.status.as_str().to_string()));
        record.insert("response_time_ms".to_string(), FieldValue::Float(self.response_time_ms));
        record.insert("throughput".to_string(), FieldValue::Float(self.throughput));
        record.insert("error_rate".to_string(), FieldValue::Float(self.error_rate));
        record.insert("cpu_usage".to_string(), FieldValue::Float(self.cpu_usage));
        record.insert("memory_usage".to_string(), FieldValue::Float(self.memory_usage));
        record.insert("last_heartbeat".to_string(), FieldValue::Text(self.last_heartbeat.to_rfc3339()));
        record.insert("started_at".to_string(), FieldValue::Text(self.started_at.to_rfc3339()));
        record.insert("uptime_secs".to_string(), FieldValue::Float(self.uptime_secs));
        record.insert("total_processed".to_string(), FieldValue::Integer(self.total_processed));
        record.insert("total_errors".to_string(), FieldValue::Integer(self.total_errors));
        record.insert("active_assessments".to_string(), FieldValue::Integer(self.active_assessments));
        record
    }
}

impl FlatRecord for SystemMetrics {
    fn to_record(&self) -> BTreeMap<String, FieldValue> {
        let mut record = BTreeMap::new();
        record.insert("total_assessments".to_string(), FieldValue::Integer(self.total_assessments));
        record.insert("total_errors".to_string(), FieldValue::Integer(self.total_errors));
        record.insert("active_agents".to_string(), FieldValue::Integer(self.active_agents as u64));
        record.insert("total_agents".to_string(), FieldValue::Integer(self.total_agents as u64));
        record.insert("average_response_time_ms".to_string(), FieldValue::Float(self.average_response_time_ms));
        record.insert("system_uptime_secs".to_string(), FieldValue::Float(self.system_uptime_secs));
        record.insert("captured_at".to_string(), FieldValue::Text(self.captured_at.to_rfc3339()));
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_risk_level_boundaries() {
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.2499), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.25), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.5), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.7499), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.75), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(1.0), RiskLevel::Critical);
    }

    #[test]
    fn test_entity_from_json() {
        let input = EntityInput::from_json(&json!({
            "entity_id": "CORP_001",
            "financial_exposure": 2500000,
            "credit_score": 720,
            "market_volatility": null,
            "nickname": "ignored"
        }))
        .unwrap();

        assert_eq!(input.entity_id, "CORP_001");
        assert_eq!(input.financial_exposure, Some(2_500_000.0));
        assert_eq!(input.credit_score, Some(720.0));
        assert_eq!(input.market_volatility, None);
        assert_eq!(input.present_field_count(), 2);
    }

    #[test]
    fn test_entity_from_json_rejects_bad_shape() {
        assert!(matches!(
            EntityInput::from_json(&json!([1, 2, 3])),
            Err(RiskError::InvalidInput(_))
        ));
        assert!(matches!(
            EntityInput::from_json(&json!({"entity_id": "E1", "credit_score": "high"})),
            Err(RiskError::InvalidInput(_))
        ));
        assert!(matches!(
            EntityInput::from_json(&json!({"entity_id": 42})),
            Err(RiskError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_factor_names() {
        for factor in RiskFactor::ALL {
            assert_eq!(RiskFactor::from_name(factor.as_str()), Some(factor));
        }
        assert_eq!(RiskFactor::from_name("credit_score"), None);
    }

    #[test]
    fn test_health_flat_record_exports_to_json() {
        let health = AgentHealth::new("agent_1".to_string(), Utc::now());
        let record = health.to_record();

        assert_eq!(record.get("status"), Some(&FieldValue::Text("healthy".to_string())));
        assert_eq!(record.get("total_processed"), Some(&FieldValue::Integer(0)));
        assert_eq!(record.get("active_assessments"), Some(&FieldValue::Integer(0)));

        let exported = serde_json::to_value(&record).unwrap();
        assert_eq!(exported["agent_id"], json!("agent_1"));
        assert_eq!(exported["error_rate"], json!(0.0));
    }

    #[test]
    fn test_assessment_flat_record() {
        let assessment = RiskAssessment {
            assessment_id: Uuid::new_v4(),
            agent_id: "agent_1".to_string(),
            entity_id: "CORP_001".to_string(),
            timestamp: Utc::now(),
            risk_score: 0.3,
            risk_level: RiskLevel::Medium,
            confidence: 0.4,
            factors: BTreeMap::from([
                (
                    RiskFactor::CreditHistory,
                    FactorBreakdown { value: 0.5, weight: 0.25, contribution: 0.125, present: true },
                ),
                (
                    RiskFactor::MarketVolatility,
                    FactorBreakdown { value: 0.0, weight: 0.2, contribution: 0.0, present: false },
                ),
            ]),
        };
        let record = assessment.to_record();

        assert_eq!(record.len(), 7 + 2 * 4);
        assert_eq!(record.get("risk_level"), Some(&FieldValue::Text("medium".to_string())));
        assert_eq!(
            record.get("assessment_id"),
            Some(&FieldValue::Text(assessment.assessment_id.to_string()))
        );
        assert_eq!(record.get("credit_history.contribution"), Some(&FieldValue::Float(0.125)));
        assert_eq!(record.get("market_volatility.present"), Some(&FieldValue::Bool(false)));
        assert!(!record.contains_key("financial_exposure.value"));

        let exported = serde_json::to_value(&record).unwrap();
        assert_eq!(exported["credit_history.weight"], json!(0.25));
        assert_eq!(exported["entity_id"], json!("CORP_001"));
    }

    #[test]
    fn test_system_metrics_flat_record() {
        let captured_at = Utc::now();
        let metrics = SystemMetrics {
            total_assessments: 12,
            total_errors: 2,
            active_agents: 3,
            total_agents: 4,
            average_response_time_ms: 1.5,
            system_uptime_secs: 30.0,
            captured_at,
        };
        let record = metrics.to_record();

        assert_eq!(record.len(), 7);
        assert_eq!(record.get("active_agents"), Some(&FieldValue::Integer(3)));
        assert_eq!(record.get("total_agents"), Some(&FieldValue::Integer(4)));
        assert_eq!(
            record.get("captured_at"),
            Some(&FieldValue::Text(captured_at.to_rfc3339()))
        );

        let exported = serde_json::to_value(&record).unwrap();
        assert_eq!(exported["total_assessments"], json!(12));
        assert_eq!(exported["average_response_time_ms"], json!(1.5));
    }
}
