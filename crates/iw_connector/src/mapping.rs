//! Table-to-monitor mappings

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a task's source table becomes monitor attributes and metrics.
///
/// Values are `$N` column references, literals, or one of the functions
/// `boolean($N)`, `percent2Ratio($N)`, `megaHertz2Hertz($N)`,
/// `mebiByte2Byte($N)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Mapping {
    /// Key of the source whose table is mapped
    pub source: String,
    pub attributes: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, String>,
    pub legacy_text_parameters: BTreeMap<String, String>,
}

impl Mapping {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metrics.insert(name.into(), value.into());
        self
    }
}

/// Parsed mapping value
#[derive(Debug, Clone, PartialEq)]
pub enum MappingValue {
    /// 1-based column reference
    Column(usize),
    Literal(String),
    Function(MappingFunction, usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingFunction {
    Boolean,
    Percent2Ratio,
    MegaHertz2Hertz,
    MebiByte2Byte,
}

impl MappingFunction {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "boolean" => Some(Self::Boolean),
            "percent2Ratio" => Some(Self::Percent2Ratio),
            "megaHertz2Hertz" => Some(Self::MegaHertz2Hertz),
            "mebiByte2Byte" => Some(Self::MebiByte2Byte),
            _ => None,
        }
    }
}

/// Parse a `$N` column reference
pub fn parse_column_ref(value: &str) -> Option<usize> {
    value
        .strip_prefix('$')
        .and_then(|n| n.parse::<usize>().ok())
        .filter(|n| *n > 0)
}

impl MappingValue {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Some(column) = parse_column_ref(trimmed) {
            return Self::Column(column);
        }
        if let Some((name, rest)) = trimmed.split_once('(')
            && let Some(arg) = rest.strip_suffix(')')
            && let Some(function) = MappingFunction::from_name(name.trim())
            && let Some(column) = parse_column_ref(arg.trim())
        {
            return Self::Function(function, column);
        }
        Self::Literal(raw.to_string())
    }
}
