use anyhow::Context;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use common::config::EngineConfig;
use common::errors::{RiskError, RiskResult};
use common::types::{AgentHealth, EntityInput, RiskAssessment, SystemMetrics};
use common::weights::RiskWeights;

use crate::agent::RiskAgent;
use crate::health::{HealthMonitor, HeartbeatHandle, MetricsSource, SyntheticMetricsSource};
use super::agent_selector::AgentSelector;

/// Heartbeat loop together with the agent instance it watches.
struct MonitoredAgent {
    agent: Arc<RiskAgent>,
    handle: HeartbeatHandle,
}

/// Registry of scoring agents and the entry point for assessments.
///
/// The agent map and the heartbeat map are sharded; lookups clone the
/// agent's `Arc` and release the shard before assessing, so no registry
/// lock is held while an agent works.
pub struct RiskScoringSystem {
    config: EngineConfig,
    default_weights: RiskWeights,
    agents: DashMap<String, Arc<RiskAgent>>,
    heartbeats: DashMap<String, MonitoredAgent>,
    metrics_source: Arc<dyn MetricsSource>,
    selector: AgentSelector,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl RiskScoringSystem {
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        Self::with_metrics_source(config, Arc::new(SyntheticMetricsSource::default()))
    }

    pub fn with_metrics_source(
        config: EngineConfig,
        metrics_source: Arc<dyn MetricsSource>,
    ) -> anyhow::Result<Self> {
        let default_weights = config.default_risk_weights()?;
        let selector = AgentSelector::new(config.selection);

        Ok(Self {
            config,
            default_weights,
            agents: DashMap::new(),
            heartbeats: DashMap::new(),
            metrics_source,
            selector,
            started_at: Mutex::new(None),
        })
    }

    /// Registers every agent listed in the configuration.
    pub fn register_configured_agents(&self) -> anyhow::Result<usize> {
        for agent in &self.config.agents {
            let weights = match &agent.weights {
                Some(named) => Some(
                    RiskWeights::from_named(named)
                        .with_context(|| format!("Invalid weights for agent {}", agent.id))?,
                ),
                None => None,
            };
            self.add_agent(&agent.id, weights)
                .with_context(|| format!("Failed to register agent {}", agent.id))?;
        }
        Ok(self.config.agents.len())
    }

    /// Creates and registers an agent. It is online immediately; heartbeats
    /// begin with `start_all`.
    pub fn add_agent(&self, agent_id: &str, weights: Option<RiskWeights>) -> RiskResult<Arc<RiskAgent>> {
        let agent = Arc::new(RiskAgent::new(
            agent_id,
            weights.unwrap_or_else(|| self.default_weights.clone()),
            self.config.history_capacity,
            self.config.health.activity_window(),
        )?);

        match self.agents.entry(agent_id.to_string()) {
            Entry::Occupied(_) => return Err(RiskError::DuplicateAgent(agent_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(agent.clone());
            }
        }

        self.started_at.lock().get_or_insert_with(Utc::now);
        info!("Added risk scoring agent {}", agent_id);
        Ok(agent)
    }

    /// Stops the agent, ends its heartbeat and unregisters it.
    pub fn remove_agent(&self, agent_id: &str) -> RiskResult<Arc<RiskAgent>> {
        let (_, agent) = self
            .agents
            .remove(agent_id)
            .ok_or_else(|| RiskError::UnknownAgent(agent_id.to_string()))?;

        agent.stop();
        self.stop_heartbeat(&agent);

        info!("Removed risk scoring agent {}", agent_id);
        Ok(agent)
    }

    pub fn agent(&self, agent_id: &str) -> RiskResult<Arc<RiskAgent>> {
        self.agents
            .get(agent_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RiskError::UnknownAgent(agent_id.to_string()))
    }

    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn assess(&self, agent_id: &str, input: &EntityInput) -> RiskResult<RiskAssessment> {
        self.agent(agent_id)?.assess(input)
    }

    /// Same as `assess`, taking raw JSON entity data.
    pub fn assess_json(&self, agent_id: &str, data: &Value) -> RiskResult<RiskAssessment> {
        let agent = self.agent(agent_id)?;
        let input = EntityInput::from_json(data)?;
        agent.assess(&input)
    }

    /// Assesses on whichever online agent the selection strategy picks.
    pub fn dispatch(&self, input: &EntityInput) -> RiskResult<RiskAssessment> {
        let candidates = self.all_agent_health();
        let agent_id = self
            .selector
            .select(&candidates)
            .ok_or_else(|| RiskError::AgentOffline("no online agents".to_string()))?;

        debug!("Dispatching {} to agent {}", input.entity_id, agent_id);
        self.assess(&agent_id, input)
    }

    /// Starts every agent and its heartbeat loop. Must run inside a tokio
    /// runtime.
    pub fn start_all(&self) -> anyhow::Result<()> {
        tokio::runtime::Handle::try_current()
            .context("Starting heartbeats requires a tokio runtime")?;

        let started = self
            .snapshot_agents()
            .iter()
            .filter(|agent| self.start_agent(agent))
            .count();

        info!("Started {} risk scoring agents", started);
        Ok(())
    }

    /// Starts one agent from a snapshot and makes sure its own heartbeat
    /// loop runs. Returns false if the agent was removed concurrently, in
    /// which case it is left stopped with no heartbeat.
    fn start_agent(&self, agent: &Arc<RiskAgent>) -> bool {
        if !self.is_registered(agent) {
            return false;
        }

        agent.start();
        self.ensure_heartbeat(agent);

        if !self.is_registered(agent) {
            agent.stop();
            self.stop_heartbeat(agent);
            debug!("Agent {} removed while starting", agent.id());
            return false;
        }
        true
    }

    fn is_registered(&self, agent: &Arc<RiskAgent>) -> bool {
        self.agents
            .get(agent.id())
            .map_or(false, |entry| Arc::ptr_eq(entry.value(), agent))
    }

    /// Spawns a heartbeat loop unless one is already running for this exact
    /// agent instance. A loop left behind by a removed agent of the same id
    /// is replaced.
    fn ensure_heartbeat(&self, agent: &Arc<RiskAgent>) {
        match self.heartbeats.entry(agent.id().to_string()) {
            Entry::Occupied(mut slot) => {
                let current = slot.get();
                if Arc::ptr_eq(&current.agent, agent) && !current.handle.is_finished() {
                    return;
                }
                let stale = slot.insert(self.spawn_monitor(agent));
                stale.handle.shutdown();
            }
            Entry::Vacant(slot) => {
                slot.insert(self.spawn_monitor(agent));
            }
        }
    }

    /// Ends the heartbeat loop of this agent instance, if it owns the slot.
    fn stop_heartbeat(&self, agent: &Arc<RiskAgent>) {
        let removed = self
            .heartbeats
            .remove_if(agent.id(), |_, monitored| Arc::ptr_eq(&monitored.agent, agent));
        if let Some((_, monitored)) = removed {
            monitored.handle.shutdown();
        }
    }

    fn spawn_monitor(&self, agent: &Arc<RiskAgent>) -> MonitoredAgent {
        let monitor = HealthMonitor::new(
            agent.clone(),
            self.metrics_source.clone(),
            self.config.health.clone(),
        );
        MonitoredAgent {
            agent: agent.clone(),
            handle: monitor.spawn(),
        }
    }

    /// Stops every agent. In-flight assessments finish and are recorded.
    pub fn stop_all(&self) {
        for agent in self.snapshot_agents() {
            agent.stop();
        }
        for entry in self.heartbeats.iter() {
            entry.value().handle.shutdown();
        }
        self.heartbeats.clear();

        info!("Stopped all risk scoring agents");
    }

    pub fn all_agent_health(&self) -> Vec<AgentHealth> {
        self.snapshot_agents().iter().map(|agent| agent.health()).collect()
    }

    /// Aggregate counters over all agents. Reads only.
    pub fn system_metrics(&self) -> SystemMetrics {
        let healths = self.all_agent_health();
        let active: Vec<&AgentHealth> = healths.iter().filter(|h| h.status.is_online()).collect();

        let average_response_time_ms = if active.is_empty() {
            0.0
        } else {
            active.iter().map(|h| h.response_time_ms).sum::<f64>() / active.len() as f64
        };

        let now = Utc::now();
        let started_at = *self.started_at.lock();
        let system_uptime_secs = started_at
            .map(|started| (now - started).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);

        SystemMetrics {
            total_assessments: healths.iter().map(|h| h.total_processed).sum(),
            total_errors: healths.iter().map(|h| h.total_errors).sum(),
            active_agents: active.len(),
            total_agents: healths.len(),
            average_response_time_ms,
            system_uptime_secs,
            captured_at: now,
        }
    }

    fn snapshot_agents(&self) -> Vec<Arc<RiskAgent>> {
        let mut agents: Vec<Arc<RiskAgent>> =
            self.agents.iter().map(|entry| entry.value().clone()).collect();
        agents.sort_by(|a, b| a.id().cmp(b.id()));
        agents
    }
}
