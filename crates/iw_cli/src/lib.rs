//! iw_cli - CLI commands for ironwatch
//!
//! This crate provides:
//! - clap-based command definitions
//! - JSON envelope output for scripts (`--format json`)
//! - The polling loop (`iw run`) and one-shot `detect` and `check` commands

use clap::{Parser, Subcommand, ValueEnum};
use futures::future::join_all;
use iw_config::IwConfig;
use iw_connector::ConnectorStore;
use iw_engine::{EngineContext, HostMonitoringCycle};
use iw_telemetry::{HostConfiguration, MetricDefinitions, TelemetryManager};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::signal;
use tracing::{info, warn};

pub mod robot;

pub use robot::{ConnectorInfo, HostCheck, HostDetection, HostSnapshot, RobotEnvelope};

/// CLI errors
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Config error: {0}")]
    ConfigError(#[from] iw_config::ConfigError),

    #[error("Connector error: {0}")]
    ConnectorError(#[from] iw_connector::ConnectorError),

    #[error("Unknown host: {0}")]
    UnknownHost(String),

    #[error("Serialization error: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    /// JSON wrapped in a schema envelope
    Json,
    /// Human-readable text
    Text,
}

/// Main CLI application
#[derive(Parser, Debug)]
#[command(name = "iw")]
#[command(
    author,
    version,
    about = "ironwatch - connector-driven hardware and IT monitoring"
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format for commands
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll the configured hosts
    Run {
        /// Host to poll (id or hostname); all enabled hosts by default
        #[arg(long)]
        host: Option<String>,

        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Run connector detection only
    Detect {
        #[arg(long)]
        host: Option<String>,
    },

    /// Check protocol reachability
    Check {
        #[arg(long)]
        host: Option<String>,
    },

    /// Connector store inspection
    Connectors {
        #[command(subcommand)]
        command: ConnectorCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConnectorCommands {
    /// List the loaded connectors
    List,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Parse and validate the configuration
    Validate,

    /// Print the effective configuration
    Show,
}

impl Cli {
    /// Load the configuration named by `--config`, or discover one
    pub fn load_config(&self) -> Result<IwConfig, CliError> {
        Ok(match &self.config {
            Some(path) => IwConfig::load_with_env(path)?,
            None => IwConfig::discover_with_env()?,
        })
    }

    /// Run the CLI against a loaded configuration
    pub async fn run(self, config: IwConfig) -> Result<(), CliError> {
        match &self.command {
            Commands::Run { host, once } => {
                let cycles = Monitoring::build(&config, host.as_deref())?;
                let interval = Duration::from_secs(config.global.poll_interval_secs.max(1));
                cycles.poll(interval, *once, self.format).await;
            }
            Commands::Detect { host } => {
                let cycles = Monitoring::build(&config, host.as_deref())?;
                let hosts = join_all(cycles.cycles.iter().map(|(host_id, cycle)| async move {
                    HostDetection {
                        host_id: host_id.clone(),
                        hostname: cycle.telemetry().hostname().to_string(),
                        connectors: cycle.detect().await,
                    }
                }))
                .await;
                match self.format {
                    OutputFormat::Json => println!(
                        "{}",
                        RobotEnvelope::new(robot::DETECT_SCHEMA, &hosts)
                            .with_warnings(cycles.warnings)
                            .to_json_pretty()
                    ),
                    OutputFormat::Text => {
                        for host in &hosts {
                            print!("{}", robot::render_detection(host));
                        }
                    }
                }
            }
            Commands::Check { host } => {
                let cycles = Monitoring::build(&config, host.as_deref())?;
                let hosts = join_all(cycles.cycles.iter().map(|(host_id, cycle)| async move {
                    HostCheck {
                        host_id: host_id.clone(),
                        hostname: cycle.telemetry().hostname().to_string(),
                        protocols: cycle.check_protocols().await,
                    }
                }))
                .await;
                match self.format {
                    OutputFormat::Json => println!(
                        "{}",
                        RobotEnvelope::new(robot::CHECK_SCHEMA, &hosts)
                            .with_warnings(cycles.warnings)
                            .to_json_pretty()
                    ),
                    OutputFormat::Text => {
                        for host in &hosts {
                            print!("{}", robot::render_check(host));
                        }
                    }
                }
            }
            Commands::Connectors {
                command: ConnectorCommands::List,
            } => {
                let store = load_connectors(&config.global.connectors_dir)?;
                let connectors: Vec<ConnectorInfo> = store.iter().map(ConnectorInfo::from).collect();
                match self.format {
                    OutputFormat::Json => println!(
                        "{}",
                        RobotEnvelope::new(robot::CONNECTORS_SCHEMA, &connectors).to_json_pretty()
                    ),
                    OutputFormat::Text => {
                        for c in &connectors {
                            println!("{:<32} {:<40} {}", c.id, c.display_name, c.monitors.join(","));
                        }
                    }
                }
            }
            Commands::Config { command } => match command {
                ConfigCommands::Validate => {
                    let enabled = config.hosts.values().filter(|h| h.enabled).count();
                    match self.format {
                        OutputFormat::Json => println!(
                            "{}",
                            RobotEnvelope::new(
                                robot::CONFIG_SCHEMA,
                                serde_json::json!({
                                    "valid": true,
                                    "hosts": config.hosts.len(),
                                    "enabled_hosts": enabled,
                                })
                            )
                            .to_json_pretty()
                        ),
                        OutputFormat::Text => println!(
                            "Configuration valid: {} hosts ({enabled} enabled)",
                            config.hosts.len()
                        ),
                    }
                }
                ConfigCommands::Show => match self.format {
                    OutputFormat::Json => println!(
                        "{}",
                        RobotEnvelope::new(robot::CONFIG_SCHEMA, &config).to_json_pretty()
                    ),
                    OutputFormat::Text => println!("{}", toml::to_string_pretty(&config)?),
                },
            },
        }
        Ok(())
    }
}

/// Load the connector store, failing when the directory is unreadable
pub fn load_connectors(dir: &Path) -> Result<ConnectorStore, CliError> {
    Ok(ConnectorStore::load_dir(dir)?)
}

// ============================================================================
// Polling
// ============================================================================

/// Host cycles built from the configuration
pub struct Monitoring {
    /// `(host id, cycle)`, sorted by host id
    pub cycles: Vec<(String, HostMonitoringCycle)>,
    pub warnings: Vec<String>,
}

impl Monitoring {
    /// One cycle per enabled host, or only `selected` (host id or hostname)
    pub fn build(config: &IwConfig, selected: Option<&str>) -> Result<Self, CliError> {
        let store = Arc::new(load_connectors(&config.global.connectors_dir)?);
        let definitions = Arc::new(MetricDefinitions::with_connectors(&store));
        let ctx = Arc::new(EngineContext::default());

        let mut warnings = Vec::new();
        if store.is_empty() {
            warnings.push(format!(
                "no connector loaded from {}",
                config.global.connectors_dir.display()
            ));
        }

        let mut hosts: Vec<_> = config
            .hosts
            .iter()
            .filter(|(id, host)| match selected {
                Some(selected) => *id == selected || host.hostname == selected,
                None => host.enabled,
            })
            .collect();
        hosts.sort_by(|a, b| a.0.cmp(b.0));

        if let Some(selected) = selected
            && hosts.is_empty()
        {
            return Err(CliError::UnknownHost(selected.to_string()));
        }

        let cycles = hosts
            .into_iter()
            .map(|(id, host)| {
                let host_config = HostConfiguration::from_config(id, host, &config.global);
                let telemetry = Arc::new(TelemetryManager::new(host_config, definitions.clone()));
                (
                    id.clone(),
                    HostMonitoringCycle::new(ctx.clone(), store.clone(), telemetry),
                )
            })
            .collect();

        Ok(Self { cycles, warnings })
    }

    /// Poll every host each `interval` until interrupted, or once
    pub async fn poll(&self, interval: Duration, once: bool, format: OutputFormat) {
        if self.cycles.is_empty() {
            warn!("No host to poll");
            return;
        }
        for warning in &self.warnings {
            warn!("{warning}");
        }

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            hosts = self.cycles.len(),
            interval_secs = interval.as_secs(),
            "Starting polling loop"
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let snapshots = join_all(self.cycles.iter().map(|(_, cycle)| async move {
                        let summary = cycle.run().await;
                        HostSnapshot {
                            summary,
                            monitors: cycle.telemetry().snapshot(),
                        }
                    }))
                    .await;
                    report(&snapshots, format);
                    if once {
                        break;
                    }
                }
                _ = signal::ctrl_c() => {
                    info!("Shutting down");
                    break;
                }
            }
        }
    }
}

fn report(snapshots: &[HostSnapshot], format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            RobotEnvelope::new(robot::CYCLE_SCHEMA, snapshots).to_json()
        ),
        OutputFormat::Text => {
            for snapshot in snapshots {
                print!("{}", robot::render_snapshot(snapshot));
            }
        }
    }
}
