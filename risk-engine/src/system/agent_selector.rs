use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::config::SelectionStrategy;
use common::types::{AgentHealth, AgentStatus};

/// Picks which online agent handles a dispatched assessment.
pub struct AgentSelector {
    strategy: SelectionStrategy,
    round_robin_index: AtomicUsize,
}

impl AgentSelector {
    pub fn new(strategy: SelectionStrategy) -> Self {
        Self {
            strategy,
            round_robin_index: AtomicUsize::new(0),
        }
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    /// Offline candidates are ignored. Returns the chosen agent id.
    pub fn select(&self, candidates: &[AgentHealth]) -> Option<String> {
        let mut online: Vec<&AgentHealth> = candidates
            .iter()
            .filter(|h| h.status.is_online())
            .collect();

        if online.is_empty() {
            return None;
        }
        online.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));

        let selected = match self.strategy {
            SelectionStrategy::RoundRobin => self.select_round_robin(&online),
            SelectionStrategy::LeastLatency => Self::select_by_latency(&online),
            SelectionStrategy::Healthiest => Self::select_by_health(&online),
        };

        selected.map(|h| h.agent_id.clone())
    }

    fn select_round_robin<'a>(&self, online: &[&'a AgentHealth]) -> Option<&'a AgentHealth> {
        let index = self.round_robin_index.fetch_add(1, Ordering::Relaxed);
        online.get(index % online.len()).copied()
    }

    fn select_by_latency<'a>(online: &[&'a AgentHealth]) -> Option<&'a AgentHealth> {
        online
            .iter()
            .min_by(|a, b| a.response_time_ms.total_cmp(&b.response_time_ms))
            .copied()
    }

    fn select_by_health<'a>(online: &[&'a AgentHealth]) -> Option<&'a AgentHealth> {
        online.iter().min_by(|a, b| compare_health(a, b)).copied()
    }
}

fn status_rank(status: AgentStatus) -> u8 {
    match status {
        AgentStatus::Healthy => 0,
        AgentStatus::Warning => 1,
        AgentStatus::Critical => 2,
        AgentStatus::Offline => 3,
    }
}

fn compare_health(a: &AgentHealth, b: &AgentHealth) -> CmpOrdering {
    status_rank(a.status)
        .cmp(&status_rank(b.status))
        .then_with(|| a.error_rate.total_cmp(&b.error_rate))
        .then_with(|| a.response_time_ms.total_cmp(&b.response_time_ms))
}
