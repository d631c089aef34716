//! Host polling cycle
//!
//! One cycle runs every selected connector of a host through detection,
//! pre sources, discovery, collect and simple jobs, then saves metrics so
//! the next cycle can compute counter rates. Connectors run one after the
//! other or concurrently, per the host's `sequential` flag.

use futures::stream::{self, StreamExt};
use iw_connector::{Connector, ConnectorStore};
use iw_telemetry::{TelemetryManager, now_millis};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::EngineContext;
use crate::extension::CriterionTestResult;
use crate::strategy::{ConnectorStrategy, DetectionOutcome};

/// Outcome of one connector within a cycle
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorOutcome {
    pub connector_id: String,
    pub detected: bool,
    pub criteria: Vec<(String, CriterionTestResult)>,
    pub duration_ms: u64,
}

/// Outcome of one host cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub hostname: String,
    /// Collect time stamped on the metrics of this cycle
    pub strategy_time: i64,
    pub connectors: Vec<ConnectorOutcome>,
    pub monitor_count: usize,
    pub duration_ms: u64,
}

impl CycleSummary {
    pub fn detected_count(&self) -> usize {
        self.connectors.iter().filter(|c| c.detected).count()
    }
}

/// Health of one protocol extension on a host
#[derive(Debug, Clone, Serialize)]
pub struct ProtocolCheck {
    pub extension: String,
    /// `None` when the extension is not configured for the host
    pub reachable: Option<bool>,
    pub error: Option<String>,
}

/// Polls one host with a set of connectors
#[derive(Debug, Clone)]
pub struct HostMonitoringCycle {
    ctx: Arc<EngineContext>,
    store: Arc<ConnectorStore>,
    telemetry: Arc<TelemetryManager>,
}

impl HostMonitoringCycle {
    pub fn new(
        ctx: Arc<EngineContext>,
        store: Arc<ConnectorStore>,
        telemetry: Arc<TelemetryManager>,
    ) -> Self {
        Self {
            ctx,
            store,
            telemetry,
        }
    }

    pub fn telemetry(&self) -> &Arc<TelemetryManager> {
        &self.telemetry
    }

    /// Connectors applicable to the host: the allow-list when one is set,
    /// minus connectors that opt out of automatic detection unless listed.
    pub fn connectors(&self) -> Vec<&Connector> {
        let host = self.telemetry.host_configuration();
        self.store
            .iter()
            .filter(|c| host.is_connector_selected(&c.id))
            .filter(|c| !c.is_auto_detection_disabled() || host.is_connector_listed(&c.id))
            .collect()
    }

    /// Detection only, for every applicable connector
    #[instrument(skip(self), fields(hostname = %self.telemetry.hostname()))]
    pub async fn detect(&self) -> Vec<DetectionOutcome> {
        let mut outcomes = Vec::new();
        for connector in self.connectors() {
            outcomes.push(
                ConnectorStrategy::new(&self.ctx, &self.telemetry, connector)
                    .detect()
                    .await,
            );
        }
        outcomes
    }

    /// One full polling cycle
    #[instrument(skip(self), fields(hostname = %self.telemetry.hostname()))]
    pub async fn run(&self) -> CycleSummary {
        let start = Instant::now();
        let strategy_time = now_millis();
        self.telemetry.set_strategy_time(strategy_time);

        let host = self.telemetry.host_configuration().clone();
        let connectors = self.connectors();
        info!(
            connectors = connectors.len(),
            sequential = host.sequential,
            "Starting host cycle"
        );

        let mut outcomes = if host.sequential {
            let mut outcomes = Vec::with_capacity(connectors.len());
            for connector in connectors {
                outcomes.push(self.run_connector(connector).await);
            }
            outcomes
        } else {
            stream::iter(connectors)
                .map(|connector| self.run_connector(connector))
                .buffer_unordered(host.max_parallel_connectors.max(1))
                .collect::<Vec<_>>()
                .await
        };
        outcomes.sort_by(|a, b| a.connector_id.cmp(&b.connector_id));

        self.telemetry.save();

        let summary = CycleSummary {
            hostname: self.telemetry.hostname().to_string(),
            strategy_time,
            connectors: outcomes,
            monitor_count: self.telemetry.monitor_count(),
            duration_ms: elapsed_ms(start),
        };
        info!(
            detected = summary.detected_count(),
            monitors = summary.monitor_count,
            duration_ms = summary.duration_ms,
            "Host cycle complete"
        );
        summary
    }

    async fn run_connector(&self, connector: &Connector) -> ConnectorOutcome {
        let start = Instant::now();
        let strategy = ConnectorStrategy::new(&self.ctx, &self.telemetry, connector);

        let detection = strategy.detect().await;
        if detection.success {
            strategy.run_pre().await;
            strategy.discover().await;
            strategy.collect().await;
            strategy.simple().await;
        } else {
            debug!(connector_id = %connector.id, "Skipping jobs of undetected connector");
        }

        ConnectorOutcome {
            connector_id: connector.id.clone(),
            detected: detection.success,
            criteria: detection.criteria,
            duration_ms: elapsed_ms(start),
        }
    }

    /// Health check of every extension configured for the host
    #[instrument(skip(self), fields(hostname = %self.telemetry.hostname()))]
    pub async fn check_protocols(&self) -> Vec<ProtocolCheck> {
        let timeout = self.telemetry.host_configuration().job_timeout;
        let mut checks = Vec::new();
        for extension in self.ctx.extensions().for_host(&self.telemetry) {
            let check = match tokio::time::timeout(timeout, extension.check_protocol(&self.telemetry)).await {
                Ok(Ok(reachable)) => ProtocolCheck {
                    extension: extension.identifier().to_string(),
                    reachable,
                    error: None,
                },
                Ok(Err(e)) => {
                    warn!(extension = extension.identifier(), error = %e, "Protocol check failed");
                    ProtocolCheck {
                        extension: extension.identifier().to_string(),
                        reachable: Some(false),
                        error: Some(e.to_string()),
                    }
                }
                Err(_) => ProtocolCheck {
                    extension: extension.identifier().to_string(),
                    reachable: Some(false),
                    error: Some(format!("no answer within {timeout:?}")),
                },
            };
            checks.push(check);
        }
        checks
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
