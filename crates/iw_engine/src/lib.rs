//! iw_engine - Connector execution engine for ironwatch
//!
//! This crate provides:
//! - The protocol extension interface and registry
//! - The source pipeline: execution, retry, forced serialization, computes
//! - Criterion evaluation with automatic WQL namespace discovery
//! - Discovery, collect and simple strategies mapping tables to monitors
//! - `HostMonitoringCycle`, one polling cycle over all connectors of a host
//! - Built-in OS command and file extensions

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod compute;
pub mod criterion;
pub mod cycle;
pub mod executor;
pub mod extension;
pub mod extensions;
pub mod mapping;
pub mod namespace;
pub mod pipeline;
pub mod serialization;
pub mod source;
pub mod strategy;

pub use criterion::CriterionProcessor;
pub use cycle::{ConnectorOutcome, CycleSummary, HostMonitoringCycle, ProtocolCheck};
pub use extension::{CriterionTestResult, ExtensionError, ExtensionRegistry, ProtocolExtension};
pub use pipeline::SourcePipeline;
pub use serialization::SerializationLocks;
pub use strategy::{ConnectorStrategy, DetectionOutcome};

/// Engine version, checked by `productRequirements` criteria
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No extension can run {kind} on {hostname}")]
    NoExtension { kind: String, hostname: String },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Serialization lock not acquired within {0:?}")]
    LockTimeout(Duration),

    #[error("Extension error: {0}")]
    Extension(#[from] ExtensionError),
}

/// Identity of the job running a source, used in logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub hostname: String,
    pub connector_id: String,
    pub monitor_type: String,
    pub task: String,
}

impl JobInfo {
    pub fn new(
        hostname: impl Into<String>,
        connector_id: impl Into<String>,
        monitor_type: impl Into<String>,
        task: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            connector_id: connector_id.into(),
            monitor_type: monitor_type.into(),
            task: task.into(),
        }
    }
}

/// Process-wide engine state shared by every host
#[derive(Debug)]
pub struct EngineContext {
    extensions: Arc<ExtensionRegistry>,
    serialization: SerializationLocks,
    engine_version: semver::Version,
}

impl EngineContext {
    pub fn new(extensions: ExtensionRegistry) -> Self {
        Self::with_registry(Arc::new(extensions))
    }

    pub fn with_registry(extensions: Arc<ExtensionRegistry>) -> Self {
        Self {
            extensions,
            serialization: SerializationLocks::new(),
            engine_version: semver::Version::parse(ENGINE_VERSION)
                .unwrap_or_else(|_| semver::Version::new(0, 0, 0)),
        }
    }

    #[must_use]
    pub fn with_engine_version(mut self, version: semver::Version) -> Self {
        self.engine_version = version;
        self
    }

    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    pub fn serialization(&self) -> &SerializationLocks {
        &self.serialization
    }

    pub fn engine_version(&self) -> &semver::Version {
        &self.engine_version
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new(ExtensionRegistry::with_builtins())
    }
}
