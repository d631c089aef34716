//! Monitors: discovered entities and their metrics

use serde::Serialize;
use std::collections::BTreeMap;

use crate::metric::Metric;

/// Attribute holding a monitor's device key
pub const ID_ATTRIBUTE: &str = "id";

/// Gauge set to 1 when a monitor is discovered and 0 when it goes missing
pub const PRESENT_METRIC: &str = "present";

/// One discovered entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Monitor {
    pub id: String,
    pub monitor_type: String,
    /// Connector that discovered the monitor; `None` for the host monitor
    pub connector_id: Option<String>,
    pub parent_id: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub legacy_text_parameters: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, Metric>,
    pub is_missing: bool,
    /// Epoch milliseconds of the discovery that last reported the monitor
    pub discovery_time: i64,
}

impl Monitor {
    pub fn new(id: impl Into<String>, monitor_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            monitor_type: monitor_type.into(),
            connector_id: None,
            parent_id: None,
            attributes: BTreeMap::new(),
            legacy_text_parameters: BTreeMap::new(),
            metrics: BTreeMap::new(),
            is_missing: false,
            discovery_time: 0,
        }
    }

    #[must_use]
    pub fn with_connector(mut self, connector_id: impl Into<String>) -> Self {
        self.connector_id = Some(connector_id.into());
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn device_key(&self) -> Option<&str> {
        self.attribute(ID_ATTRIBUTE)
    }

    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.get(name)
    }

    pub fn is_host(&self) -> bool {
        self.monitor_type == iw_connector::HOST_MONITOR_TYPE
    }

    /// Roll every metric's current sample into its previous one
    pub fn save_metrics(&mut self) {
        for metric in self.metrics.values_mut() {
            metric.save();
        }
    }
}

/// Deterministic monitor id from connector, type, parent key and device key
pub fn build_monitor_id(
    connector_id: &str,
    monitor_type: &str,
    parent_key: Option<&str>,
    device_key: &str,
) -> String {
    let mut parts = vec![connector_id, monitor_type];
    if let Some(parent) = parent_key {
        parts.push(parent);
    }
    parts.push(device_key);
    parts
        .into_iter()
        .map(|part| part.trim().replace(char::is_whitespace, "_"))
        .collect::<Vec<_>>()
        .join("_")
}
