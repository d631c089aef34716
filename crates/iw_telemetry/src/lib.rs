//! iw_telemetry - Per-host runtime state for ironwatch
//!
//! This crate provides:
//! - `TelemetryManager`, the long-lived state of one monitored host
//! - Monitors with typed metrics (numbers with counter rates, state sets)
//! - Per-connector namespaces: source-table cache, discovered WQL
//!   namespaces, incremental cursors, detection status
//! - The metric definition catalog and `MetricFactory`
//!
//! One `TelemetryManager` is reused across polling cycles so counters can
//! compute rates and namespace discovery happens once.

use dashmap::DashMap;
use dashmap::mapref::one::{Ref, RefMut};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, info};

pub mod definitions;
pub mod factory;
pub mod host;
pub mod metric;
pub mod monitor;
pub mod namespace;
pub mod table;

pub use definitions::{
    CONNECTOR_STATUS_METRIC, MetricDefinitions, metric_attributes, metric_base_name,
};
pub use factory::MetricFactory;
pub use host::{HostConfiguration, HostProperties, NamespaceCandidates, is_local_hostname};
pub use metric::{Metric, NumberMetric, StateSetMetric};
pub use monitor::{ID_ATTRIBUTE, Monitor, PRESENT_METRIC, build_monitor_id};
pub use namespace::{ConnectorNamespace, Cursor, WqlProtocol};
pub use table::SourceTable;

use iw_connector::{CONNECTOR_MONITOR_TYPE, HOST_MONITOR_TYPE};

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Runtime state of one host
#[derive(Debug)]
pub struct TelemetryManager {
    host_configuration: Arc<HostConfiguration>,
    host_properties: HostProperties,
    metric_definitions: Arc<MetricDefinitions>,
    connector_namespaces: DashMap<String, ConnectorNamespace>,
    monitors: DashMap<String, Monitor>,
    /// Collect time applied to the metrics of the running cycle
    strategy_time: AtomicI64,
}

impl TelemetryManager {
    pub fn new(
        host_configuration: HostConfiguration,
        metric_definitions: Arc<MetricDefinitions>,
    ) -> Self {
        let is_localhost = is_local_hostname(&host_configuration.hostname);
        Self::with_properties(
            host_configuration,
            metric_definitions,
            HostProperties::new(is_localhost),
        )
    }

    pub fn with_properties(
        host_configuration: HostConfiguration,
        metric_definitions: Arc<MetricDefinitions>,
        host_properties: HostProperties,
    ) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(ID_ATTRIBUTE.to_string(), host_configuration.host_id.clone());
        attributes.insert("host.name".to_string(), host_configuration.hostname.clone());
        attributes.insert(
            "host.type".to_string(),
            host_configuration.device_kind.to_string(),
        );
        let host_monitor =
            Monitor::new(host_configuration.host_id.clone(), HOST_MONITOR_TYPE).with_attributes(attributes);

        let monitors = DashMap::new();
        monitors.insert(host_monitor.id.clone(), host_monitor);

        Self {
            host_configuration: Arc::new(host_configuration),
            host_properties,
            metric_definitions,
            connector_namespaces: DashMap::new(),
            monitors,
            strategy_time: AtomicI64::new(now_millis()),
        }
    }

    pub fn host_configuration(&self) -> &Arc<HostConfiguration> {
        &self.host_configuration
    }

    pub fn host_properties(&self) -> &HostProperties {
        &self.host_properties
    }

    pub fn hostname(&self) -> &str {
        &self.host_configuration.hostname
    }

    pub fn metric_definitions(&self) -> &MetricDefinitions {
        &self.metric_definitions
    }

    pub fn metric_factory(&self) -> MetricFactory<'_> {
        MetricFactory::new(&self.metric_definitions)
    }

    pub fn strategy_time(&self) -> i64 {
        self.strategy_time.load(Ordering::Relaxed)
    }

    pub fn set_strategy_time(&self, time: i64) {
        self.strategy_time.store(time, Ordering::Relaxed);
    }

    // ========================================================================
    // Connector namespaces
    // ========================================================================

    /// Namespace of a connector, created on first access.
    /// The guard must not be held across an await point.
    pub fn connector_namespace(&self, connector_id: &str) -> RefMut<'_, String, ConnectorNamespace> {
        self.connector_namespaces
            .entry(connector_id.to_string())
            .or_default()
    }

    pub fn source_table(&self, connector_id: &str, source_key: &str) -> Option<SourceTable> {
        self.connector_namespaces
            .get(connector_id)
            .and_then(|ns| ns.source_table(source_key).cloned())
    }

    pub fn put_source_table(&self, connector_id: &str, source_key: &str, table: SourceTable) {
        self.connector_namespace(connector_id)
            .put_source_table(source_key, table);
    }

    pub fn automatic_namespace(&self, connector_id: &str, protocol: WqlProtocol) -> Option<String> {
        self.connector_namespaces
            .get(connector_id)
            .and_then(|ns| ns.automatic_namespace(protocol).map(str::to_string))
    }

    pub fn set_automatic_namespace(&self, connector_id: &str, protocol: WqlProtocol, namespace: &str) {
        info!(
            hostname = %self.hostname(),
            connector_id = %connector_id,
            protocol = %protocol,
            namespace = %namespace,
            "Namespace discovered"
        );
        self.connector_namespace(connector_id)
            .set_automatic_namespace(protocol, namespace);
    }

    pub fn cursor(&self, connector_id: &str, source_key: &str) -> Option<Cursor> {
        self.connector_namespaces
            .get(connector_id)
            .and_then(|ns| ns.cursor(source_key).cloned())
    }

    pub fn set_cursor(&self, connector_id: &str, source_key: &str, cursor: Cursor) {
        self.connector_namespace(connector_id)
            .set_cursor(source_key, cursor);
    }

    pub fn is_connector_status_ok(&self, connector_id: &str) -> bool {
        self.connector_namespaces
            .get(connector_id)
            .is_some_and(|ns| ns.is_status_ok())
    }

    /// Record a detection outcome on the namespace and the connector monitor
    pub fn set_connector_status(&self, connector_id: &str, ok: bool) {
        self.connector_namespace(connector_id).set_status_ok(ok);

        let host_id = self.host_monitor_id().to_string();
        let monitor_id = build_monitor_id(connector_id, CONNECTOR_MONITOR_TYPE, None, &host_id);
        let mut monitor = self.monitors.entry(monitor_id.clone()).or_insert_with(|| {
            let mut attributes = BTreeMap::new();
            attributes.insert(ID_ATTRIBUTE.to_string(), connector_id.to_string());
            Monitor::new(monitor_id, CONNECTOR_MONITOR_TYPE)
                .with_connector(connector_id)
                .with_parent(host_id)
                .with_attributes(attributes)
        });
        let states: Vec<String> = definitions::CONNECTOR_STATUS_STATES
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        let time = self.strategy_time();
        monitor.is_missing = false;
        self.metric_factory().collect_state_set_metric(
            &mut monitor,
            CONNECTOR_STATUS_METRIC,
            if ok { "ok" } else { "failed" },
            &states,
            time,
        );
    }

    /// Connectors whose last detection succeeded
    pub fn detected_connectors(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .connector_namespaces
            .iter()
            .filter(|entry| entry.value().is_status_ok())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    // ========================================================================
    // Monitors
    // ========================================================================

    pub fn host_monitor_id(&self) -> &str {
        &self.host_configuration.host_id
    }

    pub fn monitor(&self, id: &str) -> Option<Ref<'_, String, Monitor>> {
        self.monitors.get(id)
    }

    pub fn monitor_mut(&self, id: &str) -> Option<RefMut<'_, String, Monitor>> {
        self.monitors.get_mut(id)
    }

    /// Insert a monitor, or refresh an existing one with new attributes.
    /// Metrics of an existing monitor are kept.
    pub fn upsert_monitor(&self, monitor: Monitor) {
        match self.monitors.get_mut(&monitor.id) {
            Some(mut existing) => {
                existing.attributes = monitor.attributes;
                existing.legacy_text_parameters = monitor.legacy_text_parameters;
                existing.parent_id = monitor.parent_id;
                existing.discovery_time = monitor.discovery_time;
                existing.is_missing = false;
            }
            None => {
                debug!(monitor_id = %monitor.id, monitor_type = %monitor.monitor_type, "New monitor");
                self.monitors.insert(monitor.id.clone(), monitor);
            }
        }
    }

    /// Ids of the monitors of one connector and type
    pub fn monitor_ids(&self, connector_id: &str, monitor_type: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .monitors
            .iter()
            .filter(|entry| {
                let m = entry.value();
                m.monitor_type == monitor_type && m.connector_id.as_deref() == Some(connector_id)
            })
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Find a monitor of a connector by type and device key
    pub fn find_monitor_id(
        &self,
        connector_id: &str,
        monitor_type: &str,
        device_key: &str,
    ) -> Option<String> {
        self.monitors
            .iter()
            .find(|entry| {
                let m = entry.value();
                m.monitor_type == monitor_type
                    && m.connector_id.as_deref() == Some(connector_id)
                    && m.device_key() == Some(device_key)
            })
            .map(|entry| entry.key().clone())
    }

    /// Flag monitors of a connector/type absent from the last discovery.
    /// Rediscovered monitors get `present = 1`, the others `present = 0`.
    pub fn refresh_presence(
        &self,
        connector_id: &str,
        monitor_type: &str,
        discovered: &HashSet<String>,
    ) {
        let time = self.strategy_time();
        let factory = self.metric_factory();
        for id in self.monitor_ids(connector_id, monitor_type) {
            let Some(mut monitor) = self.monitors.get_mut(&id) else {
                continue;
            };
            if monitor.is_host() {
                continue;
            }
            let present = discovered.contains(&id);
            if !present && !monitor.is_missing {
                info!(
                    hostname = %self.hostname(),
                    connector_id = %connector_id,
                    monitor_id = %id,
                    "Monitor is missing"
                );
            }
            monitor.is_missing = !present;
            factory.collect_number_metric(
                &mut monitor,
                PRESENT_METRIC,
                if present { 1.0 } else { 0.0 },
                time,
            );
        }
    }

    /// Remove a monitor and all of its descendants. Returns removed ids.
    pub fn remove_monitor(&self, id: &str) -> Vec<String> {
        if id == self.host_monitor_id() {
            return Vec::new();
        }

        let mut removed = Vec::new();
        let mut pending = vec![id.to_string()];
        while let Some(current) = pending.pop() {
            if self.monitors.remove(&current).is_none() {
                continue;
            }
            pending.extend(
                self.monitors
                    .iter()
                    .filter(|entry| entry.value().parent_id.as_deref() == Some(current.as_str()))
                    .map(|entry| entry.key().clone()),
            );
            removed.push(current);
        }
        removed
    }

    pub fn monitor_count(&self) -> usize {
        self.monitors.len()
    }

    /// Copy of every monitor, sorted by id
    pub fn snapshot(&self) -> Vec<Monitor> {
        let mut monitors: Vec<Monitor> = self
            .monitors
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        monitors.sort_by(|a, b| a.id.cmp(&b.id));
        monitors
    }

    /// End-of-cycle step: current samples become previous samples
    pub fn save(&self) {
        for mut entry in self.monitors.iter_mut() {
            entry.value_mut().save_metrics();
        }
    }
}
