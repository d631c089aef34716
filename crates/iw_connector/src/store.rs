//! Connector store: the set of connectors loaded at start

use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::{Connector, ConnectorError, MetricDefinition};

/// Loaded connectors keyed by id
#[derive(Debug, Clone, Default)]
pub struct ConnectorStore {
    connectors: BTreeMap<String, Connector>,
}

impl ConnectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from already parsed connectors
    pub fn from_connectors(connectors: impl IntoIterator<Item = Connector>) -> Self {
        let mut store = Self::new();
        for connector in connectors {
            store.insert(connector);
        }
        store
    }

    /// Load every `*.json` connector in a directory.
    ///
    /// A file that fails to parse is logged and skipped; the directory
    /// itself must be readable.
    pub fn load_dir(dir: &Path) -> Result<Self, ConnectorError> {
        let mut store = Self::new();
        if !dir.exists() {
            warn!(path = %dir.display(), "Connector directory does not exist");
            return Ok(store);
        }

        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        for path in paths {
            match Connector::from_file(&path) {
                Ok(connector) => {
                    debug!(connector_id = %connector.id, path = %path.display(), "Loaded connector");
                    store.insert(connector);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping invalid connector");
                }
            }
        }

        info!(
            path = %dir.display(),
            connectors = store.len(),
            "Connector store loaded"
        );
        Ok(store)
    }

    pub fn insert(&mut self, connector: Connector) {
        if self.connectors.contains_key(&connector.id) {
            warn!(connector_id = %connector.id, "Replacing connector with the same id");
        }
        self.connectors.insert(connector.id.clone(), connector);
    }

    pub fn get(&self, id: &str) -> Option<&Connector> {
        self.connectors.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connector> {
        self.connectors.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.connectors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Metric definitions declared by all connectors
    pub fn metric_definitions(&self) -> impl Iterator<Item = (&String, &MetricDefinition)> {
        self.connectors.values().flat_map(|c| c.metrics.iter())
    }
}
