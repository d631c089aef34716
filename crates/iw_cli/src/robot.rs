//! Machine-readable output
//!
//! Every command run with `--format json` prints its payload wrapped in a
//! [`RobotEnvelope`], so scripts can check the schema before reading data.

use chrono::{DateTime, Utc};
use iw_engine::{CycleSummary, DetectionOutcome, ProtocolCheck};
use iw_telemetry::Monitor;
use serde::{Deserialize, Serialize};

pub const CYCLE_SCHEMA: &str = "iw.cycle.v1";
pub const DETECT_SCHEMA: &str = "iw.detect.v1";
pub const CHECK_SCHEMA: &str = "iw.check.v1";
pub const CONNECTORS_SCHEMA: &str = "iw.connectors.v1";
pub const CONFIG_SCHEMA: &str = "iw.config.v1";

/// Standard envelope for all JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotEnvelope<T: Serialize> {
    /// Schema version identifier (e.g., "iw.cycle.v1")
    pub schema_version: String,

    /// When this output was generated
    pub generated_at: DateTime<Utc>,

    pub data: T,

    /// Problems that did not stop the command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl<T: Serialize> RobotEnvelope<T> {
    pub fn new(schema_version: impl Into<String>, data: T) -> Self {
        Self {
            schema_version: schema_version.into(),
            generated_at: Utc::now(),
            data,
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    #[must_use]
    pub fn add_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Serialize to pretty JSON string
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self)
            .unwrap_or_else(|e| format!(r#"{{"error": "serialization failed: {e}"}}"#))
    }

    /// Serialize to compact JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error": "serialization failed: {e}"}}"#))
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// One host after a polling cycle
#[derive(Debug, Clone, Serialize)]
pub struct HostSnapshot {
    pub summary: CycleSummary,
    pub monitors: Vec<Monitor>,
}

/// Detection results of one host
#[derive(Debug, Clone, Serialize)]
pub struct HostDetection {
    pub host_id: String,
    pub hostname: String,
    pub connectors: Vec<DetectionOutcome>,
}

/// Protocol checks of one host
#[derive(Debug, Clone, Serialize)]
pub struct HostCheck {
    pub host_id: String,
    pub hostname: String,
    pub protocols: Vec<ProtocolCheck>,
}

/// One connector of the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorInfo {
    pub id: String,
    pub display_name: String,
    pub applies_to: Vec<String>,
    pub source_types: Vec<String>,
    pub monitors: Vec<String>,
}

impl From<&iw_connector::Connector> for ConnectorInfo {
    fn from(connector: &iw_connector::Connector) -> Self {
        Self {
            id: connector.id.clone(),
            display_name: connector.display_name().to_string(),
            applies_to: connector
                .detection
                .iter()
                .flat_map(|d| d.applies_to.iter().map(|k| k.as_str().to_string()))
                .collect(),
            source_types: connector
                .source_types()
                .iter()
                .map(|t| t.as_str().to_string())
                .collect(),
            monitors: connector
                .monitors
                .iter()
                .map(|m| m.monitor_type.clone())
                .collect(),
        }
    }
}

// ============================================================================
// Text rendering
// ============================================================================

pub fn render_cycle(summary: &CycleSummary) -> String {
    let mut out = format!(
        "{}: {}/{} connectors detected, {} monitors ({} ms)\n",
        summary.hostname,
        summary.detected_count(),
        summary.connectors.len(),
        summary.monitor_count,
        summary.duration_ms
    );
    for connector in &summary.connectors {
        let marker = if connector.detected { "+" } else { "-" };
        out.push_str(&format!(
            "  {marker} {} ({} ms)\n",
            connector.connector_id, connector.duration_ms
        ));
    }
    out
}

/// Cycle summary followed by one line per monitor with its metrics
pub fn render_snapshot(snapshot: &HostSnapshot) -> String {
    let mut out = render_cycle(&snapshot.summary);
    for monitor in &snapshot.monitors {
        let metrics: Vec<String> = monitor
            .metrics
            .iter()
            .map(|(name, metric)| format!("{name}={}", metric.display_value()))
            .collect();
        let missing = if monitor.is_missing { " (missing)" } else { "" };
        out.push_str(&format!(
            "    {} {}{missing}: {}\n",
            monitor.monitor_type,
            monitor.id,
            metrics.join(" ")
        ));
    }
    out
}

pub fn render_detection(host: &HostDetection) -> String {
    let mut out = format!("{} ({})\n", host.hostname, host.host_id);
    for outcome in &host.connectors {
        let marker = if outcome.success { "+" } else { "-" };
        out.push_str(&format!("  {marker} {}\n", outcome.connector_id));
        for (criterion, result) in &outcome.criteria {
            let status = if result.success { "ok" } else { "failed" };
            out.push_str(&format!("      {criterion}: {status}: {}\n", result.message));
        }
    }
    out
}

pub fn render_check(host: &HostCheck) -> String {
    let mut out = format!("{} ({})\n", host.hostname, host.host_id);
    if host.protocols.is_empty() {
        out.push_str("  no protocol configured\n");
    }
    for check in &host.protocols {
        let status = match check.reachable {
            Some(true) => "reachable",
            Some(false) => "unreachable",
            None => "not configured",
        };
        out.push_str(&format!("  {}: {status}", check.extension));
        if let Some(error) = &check.error {
            out.push_str(&format!(" ({error})"));
        }
        out.push('\n');
    }
    out
}
