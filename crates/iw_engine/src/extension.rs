//! Protocol extension interface
//!
//! The engine never speaks a wire protocol itself. Each protocol is an
//! extension claiming a set of source and criterion types; the engine looks
//! up the extension able to run a given source or criterion on a host.

use async_trait::async_trait;
use iw_config::ProtocolConfig;
use iw_connector::{Criterion, CriterionType, Source, SourceType};
use iw_telemetry::{SourceTable, TelemetryManager, WqlProtocol};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised inside protocol extensions
#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error("Protocol not configured: {0}")]
    NotConfigured(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Command execution failed: {0}")]
    ExecutionError(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Failed to parse output: {0}")]
    ParseError(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

/// Outcome of one criterion evaluation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CriterionTestResult {
    pub success: bool,
    pub message: String,
    /// Raw protocol output
    pub result: Option<String>,
    pub error: Option<String>,
}

impl CriterionTestResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Default::default()
        }
    }

    /// Failure caused by an error
    pub fn error(message: impl Into<String>, error: impl ToString) -> Self {
        Self {
            success: false,
            message: message.into(),
            result: None,
            error: Some(error.to_string()),
        }
    }

    #[must_use]
    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }
}

/// Capability contract implemented once per wire protocol
#[async_trait]
pub trait ProtocolExtension: Send + Sync {
    /// Unique identifier (e.g. "oscommand", "snmp")
    fn identifier(&self) -> &'static str;

    /// Whether this extension understands the given configuration
    fn is_valid_configuration(&self, config: &ProtocolConfig) -> bool;

    fn supported_sources(&self) -> HashSet<SourceType>;

    fn supported_criteria(&self) -> HashSet<CriterionType>;

    /// Whether the extension can reach the host of `telemetry`
    fn handles_host(&self, telemetry: &TelemetryManager) -> bool {
        telemetry
            .host_configuration()
            .protocols
            .iter()
            .any(|p| self.is_valid_configuration(p))
    }

    /// Health check; `Ok(None)` means not configured for this host
    async fn check_protocol(
        &self,
        telemetry: &TelemetryManager,
    ) -> Result<Option<bool>, ExtensionError>;

    async fn process_source(
        &self,
        source: &Source,
        connector_id: &str,
        telemetry: &TelemetryManager,
    ) -> Result<SourceTable, ExtensionError>;

    async fn process_criterion(
        &self,
        criterion: &Criterion,
        connector_id: &str,
        telemetry: &TelemetryManager,
    ) -> Result<CriterionTestResult, ExtensionError>;

    /// Candidate namespaces of a WQL protocol on the host, in test order
    async fn find_namespaces(
        &self,
        protocol: WqlProtocol,
        _telemetry: &TelemetryManager,
    ) -> Result<Vec<String>, ExtensionError> {
        Err(ExtensionError::Unsupported(format!(
            "{} namespace discovery",
            protocol
        )))
    }
}

/// Registry of protocol extensions, built at start and read-only afterwards
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: BTreeMap<String, Arc<dyn ProtocolExtension>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in OS command and file extensions
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::extensions::OsCommandExtension::new()));
        registry.register(Arc::new(crate::extensions::FileExtension::new()));
        registry
    }

    pub fn register(&mut self, extension: Arc<dyn ProtocolExtension>) {
        self.extensions
            .insert(extension.identifier().to_string(), extension);
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<dyn ProtocolExtension>> {
        self.extensions.get(identifier).cloned()
    }

    pub fn identifiers(&self) -> Vec<&str> {
        self.extensions.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ProtocolExtension>> {
        self.extensions.values()
    }

    /// Extension able to run a source type on the host
    pub fn find_for_source(
        &self,
        source_type: SourceType,
        telemetry: &TelemetryManager,
    ) -> Option<Arc<dyn ProtocolExtension>> {
        self.extensions
            .values()
            .find(|e| e.supported_sources().contains(&source_type) && e.handles_host(telemetry))
            .cloned()
    }

    /// Extension able to evaluate a criterion type on the host
    pub fn find_for_criterion(
        &self,
        criterion_type: CriterionType,
        telemetry: &TelemetryManager,
    ) -> Option<Arc<dyn ProtocolExtension>> {
        self.extensions
            .values()
            .find(|e| e.supported_criteria().contains(&criterion_type) && e.handles_host(telemetry))
            .cloned()
    }

    /// Extensions configured for the host
    pub fn for_host(&self, telemetry: &TelemetryManager) -> Vec<Arc<dyn ProtocolExtension>> {
        self.extensions
            .values()
            .filter(|e| e.handles_host(telemetry))
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("extensions", &self.identifiers())
            .finish()
    }
}
