//! Metric collection onto monitors

use tracing::{debug, warn};

use crate::definitions::MetricDefinitions;
use crate::metric::{Metric, NumberMetric, StateSetMetric, canonical_state};
use crate::monitor::Monitor;

/// Records metric values on monitors, resolving types from the catalog
#[derive(Debug, Clone, Copy)]
pub struct MetricFactory<'a> {
    definitions: &'a MetricDefinitions,
}

impl<'a> MetricFactory<'a> {
    pub fn new(definitions: &'a MetricDefinitions) -> Self {
        Self { definitions }
    }

    /// Record a numeric value. The metric type is resolved when the metric
    /// is first created and kept afterwards.
    pub fn collect_number_metric(
        &self,
        monitor: &mut Monitor,
        name: &str,
        value: f64,
        collect_time: i64,
    ) -> NumberMetric {
        match monitor.metrics.get_mut(name) {
            Some(Metric::Number(metric)) => {
                metric.update(value, collect_time);
                return metric.clone();
            }
            Some(Metric::StateSet(_)) => {
                warn!(monitor_id = %monitor.id, metric = %name, "Metric changed kind, replacing");
            }
            None => {}
        }

        let metric_type = self.definitions.get(name).and_then(|d| d.metric_type());
        let metric = NumberMetric::new(name, value, collect_time, metric_type);
        monitor
            .metrics
            .insert(name.to_string(), Metric::Number(metric.clone()));
        metric
    }

    /// Record a state. Returns `None` when the state is not one of
    /// `allowed_states`.
    pub fn collect_state_set_metric(
        &self,
        monitor: &mut Monitor,
        name: &str,
        state: &str,
        allowed_states: &[String],
        collect_time: i64,
    ) -> Option<StateSetMetric> {
        let Some(state) = canonical_state(state, allowed_states) else {
            debug!(
                monitor_id = %monitor.id,
                metric = %name,
                state = %state,
                "State not in allowed set, ignoring"
            );
            return None;
        };

        if let Some(Metric::StateSet(metric)) = monitor.metrics.get_mut(name) {
            metric.update(state, collect_time);
            return Some(metric.clone());
        }

        let metric = StateSetMetric::new(name, state, allowed_states.to_vec(), collect_time);
        monitor
            .metrics
            .insert(name.to_string(), Metric::StateSet(metric.clone()));
        Some(metric)
    }

    /// Record a raw mapped value, choosing the metric kind from the catalog.
    /// Non-numeric values of numeric metrics are dropped.
    pub fn collect_value(
        &self,
        monitor: &mut Monitor,
        name: &str,
        raw: &str,
        collect_time: i64,
    ) -> bool {
        if let Some(states) = self.definitions.get(name).and_then(|d| d.allowed_states()) {
            let states = states.to_vec();
            return self
                .collect_state_set_metric(monitor, name, raw, &states, collect_time)
                .is_some();
        }

        match raw.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => {
                self.collect_number_metric(monitor, name, value, collect_time);
                true
            }
            _ => {
                debug!(monitor_id = %monitor.id, metric = %name, value = %raw, "Non-numeric value dropped");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iw_connector::MetricType;

    fn states() -> Vec<String> {
        vec!["ok".to_string(), "degraded".to_string(), "failed".to_string()]
    }

    #[test]
    fn test_counter_rate_across_save() {
        let catalog = MetricDefinitions::builtin();
        let factory = MetricFactory::new(&catalog);
        let mut monitor = Monitor::new("m", "enclosure");

        factory.collect_number_metric(&mut monitor, "hw.energy", 100.0, 1_000);
        monitor.save_metrics();
        let metric = factory.collect_number_metric(&mut monitor, "hw.energy", 400.0, 4_000);

        assert_eq!(metric.rate, Some(100.0));
        assert_eq!(metric.metric_type, Some(MetricType::Counter));
    }

    #[test]
    fn test_unknown_metric_has_no_type() {
        let catalog = MetricDefinitions::builtin();
        let factory = MetricFactory::new(&catalog);
        let mut monitor = Monitor::new("m", "enclosure");

        factory.collect_number_metric(&mut monitor, "vendor.thing", 1.0, 1_000);
        monitor.save_metrics();
        let metric = factory.collect_number_metric(&mut monitor, "vendor.thing", 5.0, 2_000);
        assert_eq!(metric.metric_type, None);
        assert_eq!(metric.rate, None);
        assert_eq!(metric.value, 5.0);
    }

    #[test]
    fn test_type_fixed_for_metric_life() {
        let mut catalog = MetricDefinitions::builtin();
        let factory_catalog = catalog.clone();
        let factory = MetricFactory::new(&factory_catalog);
        let mut monitor = Monitor::new("m", "enclosure");
        factory.collect_number_metric(&mut monitor, "hw.energy", 1.0, 1_000);

        catalog.insert("hw.energy", iw_connector::MetricDefinition::gauge("J", ""));
        let factory = MetricFactory::new(&catalog);
        monitor.save_metrics();
        let metric = factory.collect_number_metric(&mut monitor, "hw.energy", 3.0, 2_000);
        assert_eq!(metric.metric_type, Some(MetricType::Counter));
        assert_eq!(metric.rate, Some(2.0));
    }

    #[test]
    fn test_state_set_canonical_and_rejected() {
        let catalog = MetricDefinitions::builtin();
        let factory = MetricFactory::new(&catalog);
        let mut monitor = Monitor::new("m", "fan");

        let metric = factory
            .collect_state_set_metric(&mut monitor, "hw.status", "OK", &states(), 1_000)
            .unwrap();
        assert_eq!(metric.value, "ok");
        assert_eq!(metric.rate(), None);

        assert!(
            factory
                .collect_state_set_metric(&mut monitor, "hw.status", "bogus", &states(), 2_000)
                .is_none()
        );
        assert_eq!(
            monitor.metric("hw.status").map(Metric::display_value),
            Some("ok".to_string())
        );
    }

    #[test]
    fn test_collect_value_dispatch() {
        let catalog = MetricDefinitions::builtin();
        let factory = MetricFactory::new(&catalog);
        let mut monitor = Monitor::new("m", "fan");

        assert!(factory.collect_value(&mut monitor, "hw.status{hw.type=\"fan\"}", "degraded", 1));
        assert!(factory.collect_value(&mut monitor, "hw.fan.speed", "4200", 1));
        assert!(!factory.collect_value(&mut monitor, "hw.fan.speed", "n/a", 1));

        assert!(monitor.metric("hw.status{hw.type=\"fan\"}").unwrap().as_state_set().is_some());
        assert_eq!(
            monitor.metric("hw.fan.speed").and_then(Metric::as_number).map(|m| m.value),
            Some(4200.0)
        );
    }
}
