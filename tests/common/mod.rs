#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use iw_config::{DeviceKind, ProtocolConfig, SnmpProtocol, WmiProtocol};
use iw_connector::{Connector, Criterion, CriterionType, Source, SourceKind, SourceType};
use iw_engine::{CriterionTestResult, EngineContext, ExtensionError, ExtensionRegistry, ProtocolExtension};
use iw_telemetry::{HostConfiguration, MetricDefinitions, SourceTable, TelemetryManager, WqlProtocol};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

/// Initialize tracing once for integration tests.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::registry()
            .with(fmt::layer().with_test_writer())
            .with(filter)
            .init();
    });
}

/// Unique temporary directory path for a test.
pub fn temp_dir_path(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    std::env::temp_dir().join(format!("iw_{test_name}_{nanos}"))
}

/// Default config pointing at a test-scoped connector directory.
pub fn temp_config(test_name: &str) -> iw_config::IwConfig {
    let mut config = iw_config::IwConfig::default();
    config.global.connectors_dir = temp_dir_path(test_name);
    config
}

pub fn connector(value: serde_json::Value) -> Connector {
    let fallback = value["id"].as_str().unwrap_or("Test").to_string();
    Connector::from_json_str(&value.to_string(), &fallback).unwrap()
}

/// Host with SNMP and WMI configured, so the lab extension handles it
pub fn lab_host(hostname: &str, kind: DeviceKind) -> HostConfiguration {
    HostConfiguration::new(hostname, hostname, kind)
        .with_protocol(ProtocolConfig::Snmp(SnmpProtocol::default()))
        .with_protocol(ProtocolConfig::Wmi(WmiProtocol::default()))
        .with_job_timeout(Duration::from_secs(5))
}

pub fn telemetry(host: HostConfiguration, definitions: MetricDefinitions) -> TelemetryManager {
    TelemetryManager::new(host, Arc::new(definitions))
}

pub fn context(lab: Arc<LabExtension>) -> EngineContext {
    let mut registry = ExtensionRegistry::new();
    registry.register(lab);
    EngineContext::new(registry)
}

// ============================================================================
// Instrumented extension
// ============================================================================

/// SNMP and WMI stand-in.
///
/// SNMP tables are served per OID. WMI queries only answer in
/// `answering_namespace`. Every call is counted, as are namespace
/// enumerations and the peak number of concurrent source executions.
pub struct LabExtension {
    tables: Mutex<BTreeMap<String, Vec<Vec<String>>>>,
    namespaces: Vec<String>,
    answering_namespace: String,
    delay: Duration,
    enumerations: AtomicUsize,
    source_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    wql_namespaces: Mutex<Vec<String>>,
}

impl LabExtension {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(BTreeMap::new()),
            namespaces: vec![
                "root/cimv2".to_string(),
                "root/dcim/sysman".to_string(),
                "root/hpq".to_string(),
            ],
            answering_namespace: "root/dcim/sysman".to_string(),
            delay: Duration::ZERO,
            enumerations: AtomicUsize::new(0),
            source_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            wql_namespaces: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn with_table(self, oid: &str, rows: &[&[&str]]) -> Self {
        self.set_table(oid, rows);
        self
    }

    pub fn set_table(&self, oid: &str, rows: &[&[&str]]) {
        let rows = rows
            .iter()
            .map(|row| row.iter().map(|c| (*c).to_string()).collect())
            .collect();
        self.tables.lock().unwrap().insert(oid.to_string(), rows);
    }

    pub fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }

    pub fn source_calls(&self) -> usize {
        self.source_calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Namespaces WQL sources and criteria were run against, in call order
    pub fn wql_namespaces(&self) -> Vec<String> {
        self.wql_namespaces.lock().unwrap().clone()
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProtocolExtension for LabExtension {
    fn identifier(&self) -> &'static str {
        "lab"
    }

    fn is_valid_configuration(&self, config: &ProtocolConfig) -> bool {
        matches!(config, ProtocolConfig::Snmp(_) | ProtocolConfig::Wmi(_))
    }

    fn supported_sources(&self) -> HashSet<SourceType> {
        [SourceType::SnmpTable, SourceType::Wmi].into_iter().collect()
    }

    fn supported_criteria(&self) -> HashSet<CriterionType> {
        [CriterionType::SnmpGetNext, CriterionType::Wmi]
            .into_iter()
            .collect()
    }

    async fn check_protocol(
        &self,
        _telemetry: &TelemetryManager,
    ) -> Result<Option<bool>, ExtensionError> {
        Ok(Some(true))
    }

    async fn process_source(
        &self,
        source: &Source,
        _connector_id: &str,
        _telemetry: &TelemetryManager,
    ) -> Result<SourceTable, ExtensionError> {
        self.source_calls.fetch_add(1, Ordering::SeqCst);
        self.enter();
        tokio::time::sleep(self.delay).await;
        let table = match &source.kind {
            SourceKind::SnmpTable(snmp) => {
                let rows = self.tables.lock().unwrap().get(&snmp.oid).cloned();
                rows.map(SourceTable::from_rows).unwrap_or_default()
            }
            SourceKind::Wmi(wql) => {
                let namespace = wql.namespace.clone().unwrap_or_default();
                self.wql_namespaces.lock().unwrap().push(namespace.clone());
                if namespace == self.answering_namespace {
                    SourceTable::from_csv("chassis-1;ok")
                } else {
                    SourceTable::empty()
                }
            }
            _ => SourceTable::empty(),
        };
        self.leave();
        Ok(table)
    }

    async fn process_criterion(
        &self,
        criterion: &Criterion,
        _connector_id: &str,
        _telemetry: &TelemetryManager,
    ) -> Result<CriterionTestResult, ExtensionError> {
        match criterion {
            Criterion::Wmi(wql) => {
                self.wql_namespaces.lock().unwrap().push(wql.namespace.clone());
                if wql.namespace == self.answering_namespace {
                    Ok(CriterionTestResult::success("1 instance returned"))
                } else {
                    Ok(CriterionTestResult::failure("Invalid namespace"))
                }
            }
            Criterion::SnmpGetNext(snmp) => {
                let known = self.tables.lock().unwrap().contains_key(&snmp.oid);
                Ok(if known {
                    CriterionTestResult::success(format!("{} answered", snmp.oid))
                } else {
                    CriterionTestResult::failure(format!("{} not found", snmp.oid))
                })
            }
            other => Err(ExtensionError::Unsupported(other.describe())),
        }
    }

    async fn find_namespaces(
        &self,
        _protocol: WqlProtocol,
        _telemetry: &TelemetryManager,
    ) -> Result<Vec<String>, ExtensionError> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        Ok(self.namespaces.clone())
    }
}
