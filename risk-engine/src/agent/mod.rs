pub mod activity;
pub mod history;
pub mod risk_agent;

pub use activity::{ActivityStats, ActivityWindow};
pub use history::AssessmentHistory;
pub use risk_agent::{HeartbeatOutcome, RiskAgent};
