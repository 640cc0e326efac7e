use anyhow::{Context, Result};
use tokio::select;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use common::config::EngineConfig;
use risk_engine::RiskScoringSystem;

const DEFAULT_CONFIG_PATH: &str = "config/engine.toml";

fn print_statistics(system: &RiskScoringSystem) {
    let metrics = system.system_metrics();
    info!("=== Statistics ===");
    info!("Active agents: {}/{}", metrics.active_agents, metrics.total_agents);
    info!("Total assessments: {}", metrics.total_assessments);
    info!("Total errors: {}", metrics.total_errors);
    info!("Average response time: {:.3}ms", metrics.average_response_time_ms);
    info!("Uptime: {:.0}s", metrics.system_uptime_secs);

    for health in system.all_agent_health() {
        info!(
            "  {} {:?} latency={:.3}ms throughput={:.2}/s errors={:.1}% cpu={:.1}% mem={:.1}%",
            health.agent_id, health.status, health.response_time_ms, health.throughput,
            health.error_rate * 100.0, health.cpu_usage, health.memory_usage
        );
    }
}

async fn run(config: EngineConfig) -> Result<()> {
    let system = RiskScoringSystem::new(config)?;
    let registered = system.register_configured_agents()?;
    info!("Registered {} agents", registered);

    system.start_all()?;

    let mut stats_timer = interval(Duration::from_secs(60));

    loop {
        select! {
            _ = stats_timer.tick() => {
                print_statistics(&system);
            }

            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for shutdown signal")?;
                info!("Shutdown requested");
                break;
            }
        }
    }

    system.stop_all();
    print_statistics(&system);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = EngineConfig::from_file(&config_path)?;

    info!("Risk scoring engine starting with {}", config_path);

    if let Err(e) = run(config).await {
        error!("Risk scoring engine error: {:?}", e);
        return Err(e);
    }

    Ok(())
}
