use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use common::errors::{RiskError, RiskResult};
use common::types::{AgentHealth, AgentStatus, EntityInput, RiskAssessment};
use common::weights::RiskWeights;

use crate::agent::activity::ActivityWindow;
use crate::agent::history::AssessmentHistory;
use crate::health::metrics_source::ResourceSample;
use crate::risk_control::{RiskAggregator, RiskFactorEvaluator};

/// 一次心跳前后的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    /// 心跳前的状态
    pub previous: AgentStatus,
    /// 心跳后的状态
    pub current: AgentStatus,
}

impl HeartbeatOutcome {
    /// 状态是否发生变化
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

/// Everything an agent mutates, kept behind one lock.
struct AgentState {
    running: bool,
    health: AgentHealth,
    history: AssessmentHistory,
    activity: ActivityWindow,
}

/// Counts one assessment as in flight until dropped.
struct InFlight<'a>(&'a AtomicU64);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicU64) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AgentState {
    fn record_outcome(&mut self, at: DateTime<Utc>, latency_ms: f64, success: bool) {
        let seen = self.health.total_processed + self.health.total_errors;
        self.health.response_time_ms = if seen == 0 {
            latency_ms
        } else {
            self.health.response_time_ms * 0.9 + latency_ms * 0.1 // Exponential moving average
        };

        if success {
            self.health.total_processed += 1;
        } else {
            self.health.total_errors += 1;
        }

        self.activity.record(at, success);
    }

    fn uptime_secs(&self, now: DateTime<Utc>) -> f64 {
        (now - self.health.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }
}

/// One scoring agent: evaluator, aggregator, bounded history and health.
///
/// All mutation happens under a single per-agent mutex, so history appends
/// and metric updates from concurrent `assess` calls are never lost. Agents
/// share nothing with each other.
pub struct RiskAgent {
    agent_id: String,
    evaluator: RiskFactorEvaluator,
    aggregator: RiskAggregator,
    state: Mutex<AgentState>,
    active_assessments: AtomicU64,
}

impl RiskAgent {
    pub fn new(
        agent_id: impl Into<String>,
        weights: RiskWeights,
        history_capacity: usize,
        activity_window: Duration,
    ) -> RiskResult<Self> {
        let agent_id = agent_id.into();
        if agent_id.trim().is_empty() {
            return Err(RiskError::InvalidInput("agent id must not be empty".to_string()));
        }

        let now = Utc::now();
        let state = AgentState {
            running: true,
            health: AgentHealth::new(agent_id.clone(), now),
            history: AssessmentHistory::new(history_capacity),
            activity: ActivityWindow::new(activity_window),
        };

        Ok(Self {
            agent_id,
            evaluator: RiskFactorEvaluator::new(),
            aggregator: RiskAggregator::new(weights),
            state: Mutex::new(state),
            active_assessments: AtomicU64::new(0),
        })
    }

    /// 代理ID
    pub fn id(&self) -> &str {
        &self.agent_id
    }

    /// 当前使用的因子权重
    pub fn weights(&self) -> &RiskWeights {
        self.aggregator.weights()
    }

    /// 正在进行中的评估数量 (包括等待锁的调用), 读取时不加锁
    pub fn active_assessments(&self) -> u64 {
        self.active_assessments.load(Ordering::SeqCst)
    }

    /// Scores one entity and appends the result to this agent's history.
    ///
    /// Missing numeric fields lower confidence and never fail the call.
    /// Evaluation failures are counted and reported as `AssessmentFailed`
    /// with nothing appended.
    pub fn assess(&self, input: &EntityInput) -> RiskResult<RiskAssessment> {
        if input.entity_id.trim().is_empty() {
            return Err(RiskError::InvalidInput("entity_id must not be empty".to_string()));
        }

        let _in_flight = InFlight::enter(&self.active_assessments);
        let started = Instant::now();
        let mut state = self.state.lock();

        if !state.running || state.health.status == AgentStatus::Offline {
            return Err(RiskError::AgentOffline(self.agent_id.clone()));
        }

        let outcome = self
            .evaluator
            .evaluate(input)
            .and_then(|evaluation| self.aggregator.aggregate(&evaluation));

        let now = Utc::now();
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(result) => {
                let assessment = RiskAssessment {
                    assessment_id: Uuid::new_v4(),
                    agent_id: self.agent_id.clone(),
                    entity_id: input.entity_id.clone(),
                    timestamp: now,
                    risk_score: result.risk_score,
                    risk_level: result.risk_level,
                    confidence: result.confidence,
                    factors: result.breakdown,
                };

                state.history.push(assessment.clone());
                state.record_outcome(now, latency_ms, true);

                debug!(
                    "Agent {} assessed {}: score={:.4} level={:?} confidence={:.2}",
                    self.agent_id, assessment.entity_id, assessment.risk_score,
                    assessment.risk_level, assessment.confidence
                );
                Ok(assessment)
            }
            Err(e) => {
                state.record_outcome(now, latency_ms, false);
                error!("Agent {} failed to assess {}: {}", self.agent_id, input.entity_id, e);
                Err(RiskError::assessment_failed(&self.agent_id, e))
            }
        }
    }

    /// Chronological history (oldest first); `limit` keeps the newest entries.
    pub fn history(&self, limit: Option<usize>) -> Vec<RiskAssessment> {
        self.state.lock().history.recent(limit)
    }

    /// 历史记录条数
    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    /// Consistent snapshot of the agent's health record.
    pub fn health(&self) -> AgentHealth {
        let state = self.state.lock();
        let mut health = state.health.clone();
        health.active_assessments = self.active_assessments();
        if state.running {
            health.uptime_secs = state.uptime_secs(Utc::now());
        }
        health
    }

    /// 当前健康状态
    pub fn status(&self) -> AgentStatus {
        self.state.lock().health.status
    }

    /// 是否处于运行中 (未被 stop)
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Brings the agent back online. An agent that is already online only
    /// has its heartbeat clock reset.
    pub fn start(&self) {
        let mut state = self.state.lock();
        let now = Utc::now();
        if state.running && state.health.status != AgentStatus::Offline {
            state.health.last_heartbeat = now;
            debug!("Agent {} already running", self.agent_id);
            return;
        }

        state.running = true;
        state.health.status = AgentStatus::Healthy;
        state.health.started_at = now;
        state.health.last_heartbeat = now;
        state.health.uptime_secs = 0.0;
        state.activity.clear();
        info!("Risk scoring agent {} started", self.agent_id);
    }

    /// Marks the agent offline. Calls already holding the lock finish and
    /// are recorded; later calls fail with `AgentOffline`.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if !state.running {
            return;
        }

        let uptime_secs = state.uptime_secs(Utc::now());
        state.health.uptime_secs = uptime_secs;
        state.running = false;
        state.health.status = AgentStatus::Offline;
        info!("Risk scoring agent {} stopped", self.agent_id);
    }

    /// Applies one heartbeat: refreshes resource usage and the last-heartbeat
    /// time when a sample is available, recomputes error rate and throughput
    /// from the activity window, then reclassifies with `classify`. Response
    /// time is owned by `assess` and is not touched here. Offline is left
    /// untouched.
    pub fn record_heartbeat<F>(
        &self,
        sample: Option<ResourceSample>,
        now: DateTime<Utc>,
        classify: F,
    ) -> HeartbeatOutcome
    where
        F: FnOnce(&AgentHealth) -> AgentStatus,
    {
        let mut state = self.state.lock();
        let previous = state.health.status;

        if !state.running || previous == AgentStatus::Offline {
            return HeartbeatOutcome { previous, current: previous };
        }

        let stats = state.activity.stats(now);
        let uptime_secs = state.uptime_secs(now);
        let elapsed_secs = uptime_secs.min(state.activity.window_secs()).max(1.0);

        let health = &mut state.health;
        health.error_rate = stats.error_rate();
        health.throughput = stats.successes as f64 / elapsed_secs;
        if let Some(sample) = sample {
            health.cpu_usage = sample.cpu_usage;
            health.memory_usage = sample.memory_usage;
            health.last_heartbeat = now;
        }
        health.uptime_secs = uptime_secs;

        let current = classify(health);
        health.status = current;

        if current != previous {
            match current {
                AgentStatus::Healthy => info!("Agent {} recovered to {:?}", self.agent_id, current),
                _ => warn!(
                    "Agent {} health {:?} -> {:?} (error_rate={:.3}, latency={:.1}ms, cpu={:.1}%, mem={:.1}%)",
                    self.agent_id, previous, current, health.error_rate,
                    health.response_time_ms, health.cpu_usage, health.memory_usage
                ),
            }
        }

        HeartbeatOutcome { previous, current }
    }
}
