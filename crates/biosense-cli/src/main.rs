//! biosense - drive the sensor scheduler against a mock HAL

mod scenario;

use anyhow::Context;
use biosense_scheduler::SensorConfig;
use clap::{Parser, Subcommand};
use scenario::Scenario;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// biosense - single-flight biometric sensor scheduler
#[derive(Parser)]
#[command(name = "biosense")]
#[command(about = "Drive the biometric sensor scheduler against a mock HAL")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Coordinator configuration file (JSON). Missing fields take defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scripted scenarios and print a JSON report for each
    Demo {
        /// Scenario to run. Runs all of them when omitted.
        #[arg(long, value_enum)]
        scenario: Option<Scenario>,

        /// Print compact JSON
        #[arg(long)]
        compact: bool,
    },

    /// Print the default configuration
    DefaultConfig,

    /// Validate a configuration file
    CheckConfig {
        /// Path to the configuration file
        path: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SensorConfig> {
    let Some(path) = path else {
        return Ok(SensorConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    SensorConfig::from_json(&text).with_context(|| format!("invalid configuration in {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reports go to stdout, logs to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "biosense=info,biosense_scheduler=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Demo { scenario, compact } => {
            let config = load_config(cli.config.as_deref())?;
            let scenarios = match scenario {
                Some(scenario) => vec![scenario],
                None => Scenario::ALL.to_vec(),
            };

            let mut reports = Vec::with_capacity(scenarios.len());
            for scenario in scenarios {
                match scenario::run(scenario, &config).await {
                    Ok(report) => reports.push(report),
                    Err(e) => {
                        error!("Scenario {:?} failed: {:#}", scenario, e);
                        return Err(e);
                    }
                }
            }

            let json = if compact {
                serde_json::to_string(&reports)?
            } else {
                serde_json::to_string_pretty(&reports)?
            };
            println!("{}", json);
            info!("Ran {} scenarios", reports.len());
        }

        Commands::DefaultConfig => {
            println!("{}", serde_json::to_string_pretty(&SensorConfig::default())?);
        }

        Commands::CheckConfig { path } => {
            let config = load_config(Some(&path))?;
            info!("{} is valid", path.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
