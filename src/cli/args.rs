//! Command line argument parsing
//!
//! Subcommands:
//! - `run`: Push a workload through the engine (payload file or synthetic)
//! - `show-config`: Show configuration discovery information
//! - `init-config`: Write a default user configuration file

use super::tasks::TaskInput;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug)]
pub enum ExecutionMode {
    Run(RunConfig),
    ShowConfig,
    InitConfig,
}

#[derive(Debug)]
pub struct RunConfig {
    pub task_input: TaskInput,
    pub config_override: Option<PathBuf>,
    pub store_dir_override: Option<PathBuf>,
    pub failure_rate: f64,
    pub latency_ms: u64,
    pub monitor: bool,
    pub verbose: bool,
}

#[derive(Debug, Parser)]
#[command(name = "bulwark")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run task workloads through a self-healing queue with retries and recovery")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a workload (payload file, or synthetic tasks when no file is given)
    Run {
        /// JSON array (.json) or JSON lines file of task payloads
        file: Option<PathBuf>,
        /// Number of synthetic tasks when no file is given
        #[arg(short = 'n', long = "tasks", default_value_t = 100)]
        tasks: usize,
        /// Probability that a simulated task fails
        #[arg(long = "failure-rate", default_value_t = 0.1)]
        failure_rate: f64,
        /// Simulated task latency in milliseconds
        #[arg(long = "latency-ms", default_value_t = 20)]
        latency_ms: u64,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// Directory for persisted session snapshots
        #[arg(long = "store-dir")]
        store_dir: Option<PathBuf>,
        /// Start the recovery sampler while the workload runs
        #[arg(long = "monitor")]
        monitor: bool,
        /// Enable verbose output
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
    },
    /// Show configuration discovery information
    ShowConfig,
    /// Write a default configuration file to ~/.bulwark/config.toml
    InitConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Run {
                file,
                tasks,
                failure_rate,
                latency_ms,
                config,
                store_dir,
                monitor,
                verbose,
            }) => {
                if !(0.0..=1.0).contains(failure_rate) {
                    return Err(format!(
                        "--failure-rate must be between 0 and 1, got {}",
                        failure_rate
                    ));
                }
                let task_input = match file {
                    Some(path) => Self::detect_file_type(path),
                    None => TaskInput::Synthetic(*tasks),
                };

                Ok(ExecutionMode::Run(RunConfig {
                    task_input,
                    config_override: config.clone(),
                    store_dir_override: store_dir.clone(),
                    failure_rate: *failure_rate,
                    latency_ms: *latency_ms,
                    monitor: *monitor,
                    verbose: *verbose,
                }))
            }
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            Some(Commands::InitConfig) => Ok(ExecutionMode::InitConfig),
            None => Err(
                "No command specified. Use 'bulwark --help' to see available commands.".to_string(),
            ),
        }
    }

    /// `.json` files hold one array of payloads; anything else is read as
    /// JSON lines. Matching is case-insensitive.
    fn detect_file_type(path: &std::path::Path) -> TaskInput {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "json" => TaskInput::JsonArray(path.to_path_buf()),
            _ => TaskInput::JsonLines(path.to_path_buf()),
        }
    }
}
