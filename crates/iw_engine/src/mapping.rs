//! Row mapping: table rows to monitor attributes and metric values

use iw_connector::{Mapping, MappingFunction, MappingValue};
use std::collections::BTreeMap;

use crate::compute::format_number;

/// Attribute naming the monitor type of a row's parent
pub const PARENT_TYPE_ATTRIBUTE: &str = "hw.parent.type";

/// Attribute naming the device key of a row's parent
pub const PARENT_ID_ATTRIBUTE: &str = "hw.parent.id";

/// One row resolved through a mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedRow {
    pub attributes: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, String>,
    pub legacy_text_parameters: BTreeMap<String, String>,
}

impl MappedRow {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Resolve every entry of `mapping` against `row`. Entries whose column is
/// missing or whose function cannot convert the cell are left out.
pub fn map_row(mapping: &Mapping, row: &[String]) -> MappedRow {
    let resolve_all = |entries: &BTreeMap<String, String>| -> BTreeMap<String, String> {
        entries
            .iter()
            .filter_map(|(name, raw)| resolve_value(raw, row).map(|v| (name.clone(), v)))
            .collect()
    };
    MappedRow {
        attributes: resolve_all(&mapping.attributes),
        metrics: resolve_all(&mapping.metrics),
        legacy_text_parameters: resolve_all(&mapping.legacy_text_parameters),
    }
}

pub fn resolve_value(raw: &str, row: &[String]) -> Option<String> {
    let cell = |column: usize| column.checked_sub(1).and_then(|c| row.get(c));
    match MappingValue::parse(raw) {
        MappingValue::Column(column) => cell(column).cloned(),
        MappingValue::Literal(literal) => Some(literal),
        MappingValue::Function(function, column) => {
            cell(column).and_then(|value| apply_function(function, value))
        }
    }
}

pub fn apply_function(function: MappingFunction, value: &str) -> Option<String> {
    let value = value.trim();
    match function {
        MappingFunction::Boolean => boolean(value).map(|b| if b { "1" } else { "0" }.to_string()),
        MappingFunction::Percent2Ratio => convert(value, |v| v / 100.0),
        MappingFunction::MegaHertz2Hertz => convert(value, |v| v * 1_000_000.0),
        MappingFunction::MebiByte2Byte => convert(value, |v| v * 1_048_576.0),
    }
}

fn convert(value: &str, f: impl Fn(f64) -> f64) -> Option<String> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| format_number(f(v)))
}

fn boolean(value: &str) -> Option<bool> {
    if let Ok(number) = value.parse::<f64>() {
        return Some(number != 0.0);
    }
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "ok" => Some(true),
        "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| (*c).to_string()).collect()
    }

    #[test]
    fn test_map_row() {
        let mapping = Mapping::new("${source::fans}")
            .with_attribute("id", "$1")
            .with_attribute("hw.type", "fan")
            .with_attribute("name", "$9")
            .with_metric("hw.fan.speed", "$3")
            .with_metric("hw.fan.speed_ratio", "percent2Ratio($4)");

        let mapped = map_row(&mapping, &row(&["fan-1", "ok", "4200", "55"]));
        assert_eq!(mapped.attribute("id"), Some("fan-1"));
        assert_eq!(mapped.attribute("hw.type"), Some("fan"));
        assert_eq!(mapped.attribute("name"), None);
        assert_eq!(mapped.metrics.get("hw.fan.speed").map(String::as_str), Some("4200"));
        assert_eq!(
            mapped.metrics.get("hw.fan.speed_ratio").map(String::as_str),
            Some("0.55")
        );
    }

    #[test]
    fn test_functions() {
        assert_eq!(apply_function(MappingFunction::Boolean, "TRUE").as_deref(), Some("1"));
        assert_eq!(apply_function(MappingFunction::Boolean, "0").as_deref(), Some("0"));
        assert_eq!(apply_function(MappingFunction::Boolean, "maybe"), None);
        assert_eq!(
            apply_function(MappingFunction::MegaHertz2Hertz, "2400").as_deref(),
            Some("2400000000")
        );
        assert_eq!(
            apply_function(MappingFunction::MebiByte2Byte, "2").as_deref(),
            Some("2097152")
        );
        assert_eq!(apply_function(MappingFunction::Percent2Ratio, "n/a"), None);
    }
}
