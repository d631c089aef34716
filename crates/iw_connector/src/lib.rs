//! iw_connector - Declarative connector model for ironwatch
//!
//! A connector describes one kind of monitored thing:
//! - How to decide whether it applies to a host (`Detection` criteria)
//! - Which monitor jobs it runs (discovery, collect, simple tasks)
//! - Which sources each task queries and which computes transform them
//! - How the resulting tables map onto monitor attributes and metrics
//!
//! Connectors are immutable once loaded. The engine only reads them.

use iw_config::DeviceKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod compute;
pub mod criterion;
pub mod mapping;
pub mod metric;
pub mod source;
pub mod store;

pub use compute::{Compute, ConversionType};
pub use criterion::{
    AUTOMATIC_NAMESPACE, Criterion, CriterionType, DEFAULT_NAMESPACE, DeviceTypeCriterion,
    WqlCriterion,
};
pub use mapping::{Mapping, MappingFunction, MappingValue, parse_column_ref};
pub use metric::{MetricDefinition, MetricKind, MetricType, StateSetDefinition};
pub use source::{Source, SourceKind, SourceType};
pub use store::ConnectorStore;

/// Monitor type of the host monitor
pub const HOST_MONITOR_TYPE: &str = "host";

/// Monitor type of per-connector monitors created at detection
pub const CONNECTOR_MONITOR_TYPE: &str = "connector";

/// Connector loading errors
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("Failed to read connector file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse connector {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid connector {id}: {reason}")]
    Invalid { id: String, reason: String },
}

/// One connector definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Connector {
    /// Connector identifier; defaults to the file stem when loaded from disk
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub detection: Option<Detection>,

    /// Extra metric definitions merged into the catalog
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricDefinition>,

    /// Sources run before any monitor job
    #[serde(default)]
    pub pre: Vec<Source>,

    /// Monitor jobs in declaration order
    #[serde(default)]
    pub monitors: Vec<MonitorJob>,
}

/// Applicability test of a connector
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Detection {
    /// Device kinds the connector applies to; empty means any
    pub applies_to: BTreeSet<DeviceKind>,
    /// Connector is only used when explicitly selected for a host
    pub disable_auto_detection: bool,
    pub criteria: Vec<Criterion>,
}

impl Detection {
    /// Criteria in evaluation order, with `appliesTo` as a leading device filter
    pub fn effective_criteria(&self) -> Vec<Criterion> {
        let mut criteria = Vec::with_capacity(self.criteria.len() + 1);
        if !self.applies_to.is_empty() {
            criteria.push(Criterion::DeviceType(DeviceTypeCriterion {
                keep: self.applies_to.clone(),
                exclude: BTreeSet::new(),
            }));
        }
        criteria.extend(self.criteria.iter().cloned());
        criteria
    }
}

/// One monitor job: a standard (discovery + collect) or simple job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorJob {
    #[serde(rename = "type")]
    pub monitor_type: String,
    #[serde(default)]
    pub discovery: Option<Discovery>,
    #[serde(default)]
    pub collect: Option<Collect>,
    #[serde(default)]
    pub simple: Option<Simple>,
}

/// Task kinds, used in source keys and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Discovery,
    Collect,
    Simple,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Collect => "collect",
            Self::Simple => "simple",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Discovery {
    pub sources: Vec<Source>,
    pub mapping: Mapping,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CollectType {
    /// Sources run once; rows are matched to monitors through `keys`
    #[default]
    MultiInstance,
    /// Sources run once per monitor with that monitor's attributes
    MonoInstance,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Collect {
    #[serde(rename = "type", default)]
    pub collect_type: CollectType,
    /// Attribute names identifying a monitor in collected rows
    #[serde(default = "default_keys")]
    pub keys: Vec<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub mapping: Mapping,
}

fn default_keys() -> Vec<String> {
    vec!["id".to_string()]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Simple {
    pub sources: Vec<Source>,
    pub mapping: Mapping,
}

impl MonitorJob {
    pub fn is_simple(&self) -> bool {
        self.simple.is_some()
    }
}

impl Connector {
    /// Parse a connector from JSON text and normalize it
    pub fn from_json_str(content: &str, fallback_id: &str) -> Result<Self, ConnectorError> {
        let mut connector: Connector =
            serde_json::from_str(content).map_err(|source| ConnectorError::ParseError {
                path: PathBuf::from(fallback_id),
                source,
            })?;
        if connector.id.is_empty() {
            connector.id = fallback_id.to_string();
        }
        connector.normalize();
        connector.validate()?;
        Ok(connector)
    }

    /// Load a connector from a JSON file; the id defaults to the file stem
    pub fn from_file(path: &Path) -> Result<Self, ConnectorError> {
        let content = std::fs::read_to_string(path)?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_json_str(&content, &stem).map_err(|e| match e {
            ConnectorError::ParseError { source, .. } => ConnectorError::ParseError {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Fill in omitted source keys
    pub fn normalize(&mut self) {
        for (index, source) in self.pre.iter_mut().enumerate() {
            if source.key.is_empty() {
                source.key = format!("${{source::pre.source({})}}", index + 1);
            }
        }

        for job in &mut self.monitors {
            let monitor_type = job.monitor_type.clone();
            let tasks: [(TaskKind, Option<&mut Vec<Source>>); 3] = [
                (
                    TaskKind::Discovery,
                    job.discovery.as_mut().map(|t| &mut t.sources),
                ),
                (
                    TaskKind::Collect,
                    job.collect.as_mut().map(|t| &mut t.sources),
                ),
                (TaskKind::Simple, job.simple.as_mut().map(|t| &mut t.sources)),
            ];
            for (task, sources) in tasks {
                let Some(sources) = sources else { continue };
                for (index, source) in sources.iter_mut().enumerate() {
                    if source.key.is_empty() {
                        source.key = format!(
                            "${{source::monitors.{monitor_type}.{task}.sources.source({})}}",
                            index + 1
                        );
                    }
                }
            }
        }
    }

    /// Structural checks that cannot be expressed in serde
    pub fn validate(&self) -> Result<(), ConnectorError> {
        let invalid = |reason: String| ConnectorError::Invalid {
            id: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("empty connector id".to_string()));
        }

        for job in &self.monitors {
            if job.monitor_type.trim().is_empty() {
                return Err(invalid("monitor job without type".to_string()));
            }
            if job.simple.is_some() && (job.discovery.is_some() || job.collect.is_some()) {
                return Err(invalid(format!(
                    "monitor job {} mixes simple with discovery/collect",
                    job.monitor_type
                )));
            }
            if job.simple.is_none() && job.discovery.is_none() {
                return Err(invalid(format!(
                    "monitor job {} has neither discovery nor simple task",
                    job.monitor_type
                )));
            }
        }

        let mut seen = BTreeSet::new();
        for source in self.all_sources() {
            if !seen.insert(source.key.as_str()) {
                return Err(invalid(format!("duplicate source key {}", source.key)));
            }
        }

        Ok(())
    }

    /// Every source of the connector, pre sources first
    pub fn all_sources(&self) -> impl Iterator<Item = &Source> {
        self.pre.iter().chain(self.monitors.iter().flat_map(|job| {
            let discovery = job.discovery.iter().flat_map(|t| t.sources.iter());
            let collect = job.collect.iter().flat_map(|t| t.sources.iter());
            let simple = job.simple.iter().flat_map(|t| t.sources.iter());
            discovery.chain(collect).chain(simple)
        }))
    }

    /// Source types this connector needs, used to match protocol extensions
    pub fn source_types(&self) -> BTreeSet<SourceType> {
        self.all_sources().map(Source::source_type).collect()
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }

    pub fn is_auto_detection_disabled(&self) -> bool {
        self.detection
            .as_ref()
            .is_some_and(|d| d.disable_auto_detection)
    }
}
