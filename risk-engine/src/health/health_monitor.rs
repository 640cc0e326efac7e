use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use common::config::HealthConfig;
use common::types::{AgentHealth, AgentStatus};

use crate::agent::RiskAgent;
use super::metrics_source::MetricsSource;

/// Classifies an agent from its current metrics. First match wins:
/// Offline, Critical, Warning, Healthy.
pub fn classify(health: &AgentHealth, config: &HealthConfig, now: DateTime<Utc>) -> AgentStatus {
    // A heartbeat stamped in the future counts as no silence.
    let silence = (now - health.last_heartbeat).to_std().unwrap_or(Duration::ZERO);
    if silence > config.offline_timeout() {
        return AgentStatus::Offline;
    }

    let peak_resource = health.cpu_usage.max(health.memory_usage);

    if health.error_rate > config.critical_error_rate
        || peak_resource > config.resource_exhaustion_pct
    {
        return AgentStatus::Critical;
    }

    if health.response_time_ms > config.elevated_latency_ms
        || peak_resource > config.resource_warning_pct
    {
        return AgentStatus::Warning;
    }

    AgentStatus::Healthy
}

/// Periodic health evaluation for a single agent.
pub struct HealthMonitor {
    agent: Arc<RiskAgent>,
    source: Arc<dyn MetricsSource>,
    config: HealthConfig,
}

/// Running heartbeat loop. The loop ends on `shutdown` or when the handle is dropped.
pub struct HeartbeatHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) {
        self.shutdown();
        if let Err(e) = self.task.await {
            warn!("Heartbeat task ended abnormally: {}", e);
        }
    }
}

impl HealthMonitor {
    pub fn new(agent: Arc<RiskAgent>, source: Arc<dyn MetricsSource>, config: HealthConfig) -> Self {
        Self { agent, source, config }
    }

    pub fn heartbeat(&self) -> AgentStatus {
        self.heartbeat_at(Utc::now())
    }

    /// One heartbeat cycle evaluated at `now`. A failed metrics sample does
    /// not refresh the heartbeat time, so repeated failures end in Offline.
    pub fn heartbeat_at(&self, now: DateTime<Utc>) -> AgentStatus {
        let sample = match self.source.sample(self.agent.id()) {
            Ok(sample) => Some(sample),
            Err(e) => {
                warn!("Metrics sample failed for agent {}: {:#}", self.agent.id(), e);
                None
            }
        };

        let outcome = self
            .agent
            .record_heartbeat(sample, now, |health| classify(health, &self.config, now));

        debug!("Heartbeat for agent {}: {:?}", self.agent.id(), outcome.current);
        outcome.current
    }

    /// Runs heartbeats on the configured cadence until shut down or the
    /// agent stops.
    pub fn spawn(self) -> HeartbeatHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let period = self.config.heartbeat_interval().max(Duration::from_millis(1));
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !self.agent.is_running() {
                            break;
                        }
                        self.heartbeat();
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Heartbeat loop for agent {} stopped", self.agent.id());
        });

        HeartbeatHandle { shutdown_tx, task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::metrics_source::ManualMetricsSource;
    use chrono::Duration as ChronoDuration;
    use common::types::EntityInput;
    use common::weights::RiskWeights;

    fn setup() -> (Arc<RiskAgent>, Arc<ManualMetricsSource>, HealthMonitor) {
        let agent = Arc::new(
            RiskAgent::new("agent_1", RiskWeights::default(), 100, Duration::from_secs(60)).unwrap(),
        );
        let source = Arc::new(ManualMetricsSource::new(20.0, 40.0));
        let monitor = HealthMonitor::new(agent.clone(), source.clone(), HealthConfig::default());
        (agent, source, monitor)
    }

    fn valid_entity(i: usize) -> EntityInput {
        EntityInput::new(format!("E{}", i))
            .with_financial_exposure(100_000.0)
            .with_credit_score(780.0)
    }

    fn health_with(f: impl FnOnce(&mut AgentHealth)) -> (AgentHealth, DateTime<Utc>) {
        let now = Utc::now();
        let mut health = AgentHealth::new("agent_1".to_string(), now);
        f(&mut health);
        (health, now)
    }

    #[test]
    fn test_classify_order() {
        let config = HealthConfig::default();

        let (health, now) = health_with(|_| {});
        assert_eq!(classify(&health, &config, now), AgentStatus::Healthy);

        let (health, now) = health_with(|h| h.response_time_ms = 6000.0);
        assert_eq!(classify(&health, &config, now), AgentStatus::Warning);

        let (health, now) = health_with(|h| h.memory_usage = 88.0);
        assert_eq!(classify(&health, &config, now), AgentStatus::Warning);

        let (health, now) = health_with(|h| {
            h.response_time_ms = 6000.0;
            h.error_rate = 0.2;
        });
        assert_eq!(classify(&health, &config, now), AgentStatus::Critical);

        let (health, now) = health_with(|h| h.cpu_usage = 99.0);
        assert_eq!(classify(&health, &config, now), AgentStatus::Critical);

        let (health, now) = health_with(|h| h.error_rate = 0.9);
        let later = now + ChronoDuration::seconds(16);
        assert_eq!(classify(&health, &config, later), AgentStatus::Offline);
    }

    #[test]
    fn test_classify_with_extreme_timeouts() {
        let (health, now) = health_with(|_| {});

        let config = HealthConfig {
            heartbeat_interval_ms: u64::MAX,
            offline_timeout_multiplier: u32::MAX,
            ..HealthConfig::default()
        };
        assert_eq!(classify(&health, &config, now), AgentStatus::Healthy);
        assert_eq!(
            classify(&health, &config, now + ChronoDuration::days(3650)),
            AgentStatus::Healthy
        );

        let config = HealthConfig::default();
        assert_eq!(
            classify(&health, &config, now - ChronoDuration::seconds(30)),
            AgentStatus::Healthy
        );
    }

    #[test]
    fn test_heartbeat_with_oversized_activity_window() {
        let agent = Arc::new(
            RiskAgent::new(
                "agent_1",
                RiskWeights::default(),
                100,
                Duration::from_secs(10_000_000_000_000),
            )
            .unwrap(),
        );
        let source = Arc::new(ManualMetricsSource::new(20.0, 40.0));
        let monitor = HealthMonitor::new(agent.clone(), source, HealthConfig::default());

        agent.assess(&valid_entity(1)).unwrap();
        assert_eq!(monitor.heartbeat(), AgentStatus::Healthy);
        assert!(agent.health().throughput > 0.0);
    }

    #[test]
    fn test_error_burst_shows_on_next_heartbeat() {
        let (agent, _source, monitor) = setup();
        assert_eq!(monitor.heartbeat(), AgentStatus::Healthy);

        for i in 0..4 {
            agent.assess(&valid_entity(i)).unwrap();
        }
        for _ in 0..4 {
            let bad = EntityInput::new("bad").with_market_volatility(f64::NAN);
            assert!(agent.assess(&bad).is_err());
        }

        // Not reclassified until the monitor runs again.
        assert_eq!(agent.status(), AgentStatus::Healthy);

        assert_eq!(monitor.heartbeat(), AgentStatus::Critical);
        assert_eq!(agent.status(), AgentStatus::Critical);
        assert!((agent.health().error_rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_recovers_when_window_clears() {
        let (agent, _source, monitor) = setup();
        let bad = EntityInput::new("bad").with_market_volatility(f64::NAN);
        assert!(agent.assess(&bad).is_err());
        assert_eq!(monitor.heartbeat(), AgentStatus::Critical);

        let later = Utc::now() + ChronoDuration::seconds(61);
        assert_eq!(monitor.heartbeat_at(later), AgentStatus::Healthy);
    }

    #[test]
    fn test_resource_thresholds() {
        let (_agent, source, monitor) = setup();

        source.set(90.0, 40.0);
        assert_eq!(monitor.heartbeat(), AgentStatus::Warning);

        source.set(50.0, 96.0);
        assert_eq!(monitor.heartbeat(), AgentStatus::Critical);

        source.set(30.0, 30.0);
        assert_eq!(monitor.heartbeat(), AgentStatus::Healthy);
    }

    #[test]
    fn test_missing_heartbeats_go_offline_until_restart() {
        let (agent, source, monitor) = setup();
        let now = Utc::now();
        assert_eq!(monitor.heartbeat_at(now), AgentStatus::Healthy);

        source.set_failing(true);
        assert_eq!(monitor.heartbeat_at(now + ChronoDuration::seconds(10)), AgentStatus::Healthy);
        assert_eq!(monitor.heartbeat_at(now + ChronoDuration::seconds(16)), AgentStatus::Offline);
        assert!(agent.assess(&valid_entity(1)).is_err());

        // Terminal: a good sample alone does not bring it back.
        source.set_failing(false);
        assert_eq!(monitor.heartbeat_at(now + ChronoDuration::seconds(20)), AgentStatus::Offline);

        agent.start();
        assert_eq!(monitor.heartbeat(), AgentStatus::Healthy);
        assert!(agent.assess(&valid_entity(2)).is_ok());
    }

    #[test]
    fn test_stopped_agent_stays_offline() {
        let (agent, _source, monitor) = setup();
        agent.stop();
        assert_eq!(monitor.heartbeat(), AgentStatus::Offline);
    }

    #[tokio::test]
    async fn test_spawned_loop_stops_on_shutdown() {
        let (agent, source, _monitor) = setup();
        source.set(91.0, 40.0);

        let config = HealthConfig {
            heartbeat_interval_ms: 10,
            ..HealthConfig::default()
        };
        let handle = HealthMonitor::new(agent.clone(), source.clone(), config).spawn();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(agent.status(), AgentStatus::Warning);

        handle.join().await;
    }

    #[tokio::test]
    async fn test_spawned_loop_exits_when_agent_stops() {
        let (agent, source, _monitor) = setup();
        let config = HealthConfig {
            heartbeat_interval_ms: 10,
            ..HealthConfig::default()
        };
        let handle = HealthMonitor::new(agent.clone(), source, config).spawn();

        agent.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_finished());
    }
}
