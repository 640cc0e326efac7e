pub mod agent_selector;
pub mod registry;

pub use agent_selector::AgentSelector;
pub use registry::RiskScoringSystem;
