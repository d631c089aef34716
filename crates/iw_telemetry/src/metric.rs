//! Metric values held by monitors

use iw_connector::MetricType;
use serde::Serialize;

/// Numeric metric with previous-value tracking
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumberMetric {
    pub name: String,
    pub value: f64,
    /// Per-second rate, counters only
    pub rate: Option<f64>,
    /// Collection time in epoch milliseconds
    pub collect_time: i64,
    pub previous_value: Option<f64>,
    pub previous_collect_time: Option<i64>,
    /// Resolved at creation, never changed afterwards
    pub metric_type: Option<MetricType>,
}

impl NumberMetric {
    pub fn new(
        name: impl Into<String>,
        value: f64,
        collect_time: i64,
        metric_type: Option<MetricType>,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            rate: None,
            collect_time,
            previous_value: None,
            previous_collect_time: None,
            metric_type,
        }
    }

    /// Record a new value and refresh the rate
    pub fn update(&mut self, value: f64, collect_time: i64) {
        self.value = value;
        self.collect_time = collect_time;
        self.rate = self.compute_rate();
    }

    fn compute_rate(&self) -> Option<f64> {
        if self.metric_type != Some(MetricType::Counter) {
            return None;
        }
        let previous_value = self.previous_value?;
        let previous_time = self.previous_collect_time?;
        let elapsed_ms = self.collect_time - previous_time;
        if elapsed_ms <= 0 {
            return None;
        }
        Some((self.value - previous_value) / (elapsed_ms as f64 / 1000.0))
    }

    /// Keep the current sample as the previous one for the next cycle
    pub fn save(&mut self) {
        self.previous_value = Some(self.value);
        self.previous_collect_time = Some(self.collect_time);
    }

    pub fn is_counter(&self) -> bool {
        self.metric_type == Some(MetricType::Counter)
    }
}

/// Metric whose value is one state out of an allowed set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSetMetric {
    pub name: String,
    pub value: String,
    pub state_set: Vec<String>,
    pub collect_time: i64,
    pub previous_value: Option<String>,
    pub previous_collect_time: Option<i64>,
}

impl StateSetMetric {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        state_set: Vec<String>,
        collect_time: i64,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            state_set,
            collect_time,
            previous_value: None,
            previous_collect_time: None,
        }
    }

    pub fn update(&mut self, value: impl Into<String>, collect_time: i64) {
        self.value = value.into();
        self.collect_time = collect_time;
    }

    pub fn save(&mut self) {
        self.previous_value = Some(self.value.clone());
        self.previous_collect_time = Some(self.collect_time);
    }

    /// State sets never carry a rate
    pub fn rate(&self) -> Option<f64> {
        None
    }

    /// 1.0 for the current state, 0.0 for the others
    pub fn state_values(&self) -> impl Iterator<Item = (&str, f64)> {
        self.state_set.iter().map(|state| {
            let active = if state == &self.value { 1.0 } else { 0.0 };
            (state.as_str(), active)
        })
    }
}

/// Canonical spelling of `state` within `state_set`, matched case-insensitively
pub fn canonical_state<'a>(state: &str, state_set: &'a [String]) -> Option<&'a str> {
    let state = state.trim();
    state_set
        .iter()
        .find(|allowed| allowed.eq_ignore_ascii_case(state))
        .map(String::as_str)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Metric {
    Number(NumberMetric),
    StateSet(StateSetMetric),
}

impl Metric {
    pub fn name(&self) -> &str {
        match self {
            Self::Number(m) => &m.name,
            Self::StateSet(m) => &m.name,
        }
    }

    pub fn collect_time(&self) -> i64 {
        match self {
            Self::Number(m) => m.collect_time,
            Self::StateSet(m) => m.collect_time,
        }
    }

    pub fn rate(&self) -> Option<f64> {
        match self {
            Self::Number(m) => m.rate,
            Self::StateSet(m) => m.rate(),
        }
    }

    pub fn save(&mut self) {
        match self {
            Self::Number(m) => m.save(),
            Self::StateSet(m) => m.save(),
        }
    }

    pub fn as_number(&self) -> Option<&NumberMetric> {
        match self {
            Self::Number(m) => Some(m),
            Self::StateSet(_) => None,
        }
    }

    pub fn as_state_set(&self) -> Option<&StateSetMetric> {
        match self {
            Self::StateSet(m) => Some(m),
            Self::Number(_) => None,
        }
    }

    /// Value rendered for display
    pub fn display_value(&self) -> String {
        match self {
            Self::Number(m) => m.value.to_string(),
            Self::StateSet(m) => m.value.clone(),
        }
    }
}
