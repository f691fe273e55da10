use bulwark::cli::{
    Args, ConfigDiscovery, ExecutionMode, RunConfig, SimulatedHandler, TaskLoader, run_workload,
};
use bulwark::{Engine, NoopHost};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let verbose = matches!(&mode, ExecutionMode::Run(config) if config.verbose);
    let default_filter = if verbose { "bulwark=debug" } else { "bulwark=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match mode {
        ExecutionMode::Run(config) => run_mode(config).await,
        ExecutionMode::ShowConfig => {
            ConfigDiscovery::show_discovery_info();
            let effective = ConfigDiscovery::discover_config()?;
            println!();
            println!("Effective configuration:");
            println!("{}", effective.to_toml_string()?);
            Ok(())
        }
        ExecutionMode::InitConfig => {
            let path = ConfigDiscovery::create_default_user_config()?;
            println!("Configuration file: {:?}", path);
            Ok(())
        }
    }
}

async fn run_mode(config: RunConfig) -> anyhow::Result<()> {
    info!("Running workload from {:?}", config.task_input);

    let mut engine_config = ConfigDiscovery::load(config.config_override.as_deref())?;
    if let Some(store_dir) = config.store_dir_override {
        engine_config.persistence.store_dir = Some(store_dir);
    }

    let payloads = TaskLoader::load(&config.task_input)?;
    let handler = SimulatedHandler::new(
        config.failure_rate,
        Duration::from_millis(config.latency_ms),
    );
    let engine = Engine::new(engine_config, Arc::new(handler), Arc::new(NoopHost)).await?;

    if let Some(previous) = engine.restore_state().await {
        info!("Restored session snapshot with {} keys", previous.len());
    }
    if config.monitor {
        engine.start_monitoring();
    }

    let report = run_workload(&engine, payloads, POLL_INTERVAL).await;
    let status = engine.status().await;
    engine.shutdown().await?;

    println!("Submitted:      {}", report.submitted);
    println!("Rejected:       {}", report.rejected);
    println!("Completed:      {}", report.stats.completed);
    println!("Dead-lettered:  {}", report.stats.dead_lettered);
    println!("Health score:   {}", status.health.rolling_health_score);
    println!("Elapsed:        {:.2?}", report.elapsed);
    if let Some(strategy) = status.recovery.last_strategy {
        println!("Last recovery:  {}", strategy);
    }

    if status.recovery.irrecoverable {
        error!("Engine gave up on automatic recovery; manual restart required");
        std::process::exit(2);
    }
    Ok(())
}
