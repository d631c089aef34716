//! Metric definitions declared by connectors

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    #[default]
    Gauge,
    Counter,
    #[serde(alias = "upDownCounter", alias = "up_down_counter")]
    UpDownCounter,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
            Self::UpDownCounter => "updowncounter",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State-set metric: one 0/1 series per allowed state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSetDefinition {
    pub state_set: Vec<String>,
    #[serde(default)]
    pub output: MetricType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricKind {
    Simple(MetricType),
    StateSet(StateSetDefinition),
}

impl Default for MetricKind {
    fn default() -> Self {
        Self::Simple(MetricType::Gauge)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: MetricKind,
}

impl MetricDefinition {
    pub fn gauge(unit: &str, description: &str) -> Self {
        Self::simple(MetricType::Gauge, unit, description)
    }

    pub fn counter(unit: &str, description: &str) -> Self {
        Self::simple(MetricType::Counter, unit, description)
    }

    pub fn simple(metric_type: MetricType, unit: &str, description: &str) -> Self {
        Self {
            unit: Some(unit.to_string()).filter(|u| !u.is_empty()),
            description: Some(description.to_string()),
            kind: MetricKind::Simple(metric_type),
        }
    }

    pub fn state_set(states: &[&str], description: &str) -> Self {
        Self {
            unit: None,
            description: Some(description.to_string()),
            kind: MetricKind::StateSet(StateSetDefinition {
                state_set: states.iter().map(|s| (*s).to_string()).collect(),
                output: MetricType::UpDownCounter,
            }),
        }
    }

    /// Numeric type, `None` for state sets
    pub fn metric_type(&self) -> Option<MetricType> {
        match &self.kind {
            MetricKind::Simple(t) => Some(*t),
            MetricKind::StateSet(_) => None,
        }
    }

    /// Allowed states, `None` for numeric metrics
    pub fn allowed_states(&self) -> Option<&[String]> {
        match &self.kind {
            MetricKind::Simple(_) => None,
            MetricKind::StateSet(def) => Some(&def.state_set),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_kinds() {
        let counter: MetricDefinition =
            serde_json::from_str(r#"{"unit": "J", "type": "counter"}"#).unwrap();
        assert_eq!(counter.metric_type(), Some(MetricType::Counter));
        assert!(counter.allowed_states().is_none());

        let state: MetricDefinition = serde_json::from_str(
            r#"{"type": {"stateSet": ["ok", "degraded", "failed"]}}"#,
        )
        .unwrap();
        assert_eq!(state.metric_type(), None);
        assert_eq!(state.allowed_states().map(<[String]>::len), Some(3));

        let implicit: MetricDefinition = serde_json::from_str(r#"{"unit": "By"}"#).unwrap();
        assert_eq!(implicit.metric_type(), Some(MetricType::Gauge));
    }
}
