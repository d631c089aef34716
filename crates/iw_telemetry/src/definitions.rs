//! Metric definition catalog
//!
//! Built once at start from the built-in definitions plus the ones declared
//! by connectors, then shared read-only.

use iw_connector::{ConnectorStore, MetricDefinition, MetricType};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Status state set shared by hardware monitors
pub const STATUS_STATES: &[&str] = &["ok", "degraded", "failed"];

/// State set of the per-connector status metric
pub const CONNECTOR_STATUS_STATES: &[&str] = &["ok", "failed"];

/// Name of the per-connector status metric
pub const CONNECTOR_STATUS_METRIC: &str = "connector.status";

#[derive(Debug, Clone, Default)]
pub struct MetricDefinitions {
    definitions: HashMap<String, MetricDefinition>,
}

impl MetricDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Definitions every host knows about
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.insert(
            CONNECTOR_STATUS_METRIC,
            MetricDefinition::state_set(CONNECTOR_STATUS_STATES, "Status of the connector"),
        );
        catalog.insert(
            crate::monitor::PRESENT_METRIC,
            MetricDefinition::gauge("", "Whether the monitor was found at the last discovery"),
        );
        catalog.insert(
            "hw.status",
            MetricDefinition::state_set(STATUS_STATES, "Operational status"),
        );
        catalog.insert(
            "hw.energy",
            MetricDefinition::counter("J", "Energy consumed by the component"),
        );
        catalog.insert(
            "hw.power",
            MetricDefinition::gauge("W", "Instantaneous power consumed"),
        );
        catalog.insert(
            "hw.temperature",
            MetricDefinition::gauge("Cel", "Temperature in degrees Celsius"),
        );
        catalog.insert("hw.fan.speed", MetricDefinition::gauge("rpm", "Fan speed"));
        catalog.insert("hw.voltage", MetricDefinition::gauge("V", "Voltage"));
        catalog.insert(
            "hw.errors",
            MetricDefinition::counter("{error}", "Number of errors encountered"),
        );
        catalog.insert(
            "hw.network.io",
            MetricDefinition::counter("By", "Bytes sent and received"),
        );
        catalog.insert(
            "system.cpu.time",
            MetricDefinition::counter("s", "CPU time spent"),
        );
        catalog.insert(
            "system.memory.usage",
            MetricDefinition::simple(MetricType::UpDownCounter, "By", "Memory in use"),
        );
        catalog
    }

    /// Built-in definitions extended with every connector's own
    pub fn with_connectors(store: &ConnectorStore) -> Self {
        let mut catalog = Self::builtin();
        catalog.merge(store.metric_definitions());
        catalog
    }

    pub fn insert(&mut self, name: impl Into<String>, definition: MetricDefinition) {
        self.definitions.insert(name.into(), definition);
    }

    /// Add definitions; entries already present are kept
    pub fn merge<'a>(&mut self, definitions: impl IntoIterator<Item = (&'a String, &'a MetricDefinition)>) {
        for (name, definition) in definitions {
            let base = metric_base_name(name);
            if self.definitions.contains_key(base) {
                debug!(metric = %base, "Metric already defined, keeping first definition");
                continue;
            }
            self.definitions.insert(base.to_string(), definition.clone());
        }
    }

    /// Definition of a metric; attributes in `{...}` are ignored
    pub fn get(&self, metric_name: &str) -> Option<&MetricDefinition> {
        self.definitions.get(metric_base_name(metric_name))
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Metric name without its `{...}` attribute block
pub fn metric_base_name(name: &str) -> &str {
    match name.find('{') {
        Some(index) => name[..index].trim(),
        None => name.trim(),
    }
}

/// Attributes of a metric name such as `hw.status{hw.type="fan"}`
pub fn metric_attributes(name: &str) -> BTreeMap<String, String> {
    let Some(start) = name.find('{') else {
        return BTreeMap::new();
    };
    let body = name[start + 1..].trim_end().trim_end_matches('}');
    body.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().trim_matches('"').to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}
