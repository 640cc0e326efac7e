use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use anyhow::{Context, Result};

use crate::weights::RiskWeights;

/// 心跳间隔上限 (1天)
pub const MAX_HEARTBEAT_INTERVAL_MS: u64 = 86_400_000;
/// 离线判定倍数上限
pub const MAX_OFFLINE_TIMEOUT_MULTIPLIER: u32 = 1_000;
/// 活动窗口上限 (1天)
pub const MAX_ACTIVITY_WINDOW_SECS: u64 = 86_400;

/// 风险评分引擎配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 每个代理保留的评估记录数, 超出后淘汰最旧的
    pub history_capacity: usize,
    /// 健康监控配置
    pub health: HealthConfig,
    /// 默认因子权重 (因子名 -> 权重), 用于未单独配置权重的代理
    pub default_weights: HashMap<String, f64>,
    /// 分派时的代理选择策略
    pub selection: SelectionStrategy,
    /// 启动时注册的代理列表
    pub agents: Vec<AgentConfig>,
}

/// 健康监控配置: 心跳节奏与状态阈值
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// 心跳间隔 (毫秒)
    pub heartbeat_interval_ms: u64,
    /// 连续多少个心跳间隔没有采样后判定为离线
    pub offline_timeout_multiplier: u32,
    /// 计算错误率和吞吐量的活动窗口 (秒)
    pub activity_window_secs: u64,
    /// 错误率超过该值判定为 Critical
    pub critical_error_rate: f64,
    /// CPU或内存超过该百分比判定为 Critical
    pub resource_exhaustion_pct: f64,
    /// 响应时间超过该值 (毫秒) 判定为 Warning
    pub elevated_latency_ms: f64,
    /// CPU或内存超过该百分比判定为 Warning
    pub resource_warning_pct: f64,
}

/// 单个代理配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    pub id: String,
    /// 自定义权重, 为空时使用默认权重
    #[serde(default)]
    pub weights: Option<HashMap<String, f64>>,
}

/// 代理选择策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// 轮询
    RoundRobin,
    /// 响应时间最短
    LeastLatency,
    /// 健康状态最好
    Healthiest,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
            health: HealthConfig::default(),
            default_weights: HashMap::from([
                ("financial_exposure".to_string(), 0.3),
                ("credit_history".to_string(), 0.25),
                ("market_volatility".to_string(), 0.2),
                ("regulatory_compliance".to_string(), 0.15),
                ("operational_risk".to_string(), 0.1),
            ]),
            selection: SelectionStrategy::RoundRobin,
            agents: Vec::new(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5000,
            offline_timeout_multiplier: 3,
            activity_window_secs: 60,
            critical_error_rate: 0.1,
            resource_exhaustion_pct: 95.0,
            elevated_latency_ms: 5000.0,
            resource_warning_pct: 85.0,
        }
    }
}

impl Default for SelectionStrategy {
    fn default() -> Self {
        SelectionStrategy::RoundRobin
    }
}

impl HealthConfig {
    /// 心跳间隔
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// 超过该时长没有心跳即判定为离线, 溢出时取最大值
    pub fn offline_timeout(&self) -> Duration {
        self.heartbeat_interval()
            .checked_mul(self.offline_timeout_multiplier)
            .unwrap_or(Duration::MAX)
    }

    /// 活动窗口长度
    pub fn activity_window(&self) -> Duration {
        Duration::from_secs(self.activity_window_secs)
    }
}

impl EngineConfig {
    /// 从TOML文件加载并校验配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine config: {:?}", path))?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid engine config: {:?}", path))
    }

    /// 从TOML字符串解析并校验配置
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse engine config")?;
        config.validate()?;
        Ok(config)
    }

    /// 校验后的默认权重
    pub fn default_risk_weights(&self) -> Result<RiskWeights> {
        RiskWeights::from_named(&self.default_weights).context("Invalid default_weights")
    }

    fn validate(&self) -> Result<()> {
        if self.history_capacity == 0 {
            anyhow::bail!("history_capacity must be at least 1");
        }
        let health = &self.health;
        if !(1..=MAX_HEARTBEAT_INTERVAL_MS).contains(&health.heartbeat_interval_ms) {
            anyhow::bail!(
                "health.heartbeat_interval_ms must be between 1 and {}",
                MAX_HEARTBEAT_INTERVAL_MS
            );
        }
        if !(1..=MAX_OFFLINE_TIMEOUT_MULTIPLIER).contains(&health.offline_timeout_multiplier) {
            anyhow::bail!(
                "health.offline_timeout_multiplier must be between 1 and {}",
                MAX_OFFLINE_TIMEOUT_MULTIPLIER
            );
        }
        if !(1..=MAX_ACTIVITY_WINDOW_SECS).contains(&health.activity_window_secs) {
            anyhow::bail!(
                "health.activity_window_secs must be between 1 and {}",
                MAX_ACTIVITY_WINDOW_SECS
            );
        }
        self.default_risk_weights()?;
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                anyhow::bail!("agent ids must not be empty");
            }
            if let Some(weights) = &agent.weights {
                RiskWeights::from_named(weights)
                    .with_context(|| format!("Invalid weights for agent {}", agent.id))?;
            }
        }
        Ok(())
    }
}
