//! Compute execution
//!
//! Each compute transforms the table produced by the previous step. A step
//! that cannot apply to a row (missing column, non-numeric operand) leaves
//! that row untouched.

use iw_connector::compute::{
    ArithmeticCompute, ArrayTranslateCompute, ConcatCompute, ExtractCompute, MatchingLinesCompute,
    PerBitTranslationCompute, ReplaceCompute, SubstringCompute, TranslateCompute,
};
use iw_connector::{Compute, ConversionType, parse_column_ref};
use iw_telemetry::SourceTable;
use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;
use tracing::{trace, warn};

const DEFAULT_TRANSLATION: &str = "default";

/// Apply computes in order
pub fn apply_computes(table: &mut SourceTable, computes: &[Compute]) {
    for compute in computes {
        apply_compute(table, compute);
        trace!(compute = compute.type_name(), rows = table.row_count(), "Compute applied");
    }
}

pub fn apply_compute(table: &mut SourceTable, compute: &Compute) {
    match compute {
        Compute::Add(c) => arithmetic(table, c, |a, b| Some(a + b)),
        Compute::Subtract(c) => arithmetic(table, c, |a, b| Some(a - b)),
        Compute::Multiply(c) => arithmetic(table, c, |a, b| Some(a * b)),
        Compute::Divide(c) => arithmetic(table, c, |a, b| (b != 0.0).then(|| a / b)),
        Compute::And(c) => bitwise_and(table, c),
        Compute::LeftConcat(c) => concat(table, c, true),
        Compute::RightConcat(c) => concat(table, c, false),
        Compute::DuplicateColumn(c) => {
            for row in &mut table.table {
                if let Some(copy) = column_value(row, c.column).map(str::to_string) {
                    row.insert(c.column, copy);
                }
            }
        }
        Compute::KeepColumns(c) => {
            for row in &mut table.table {
                *row = c
                    .column_numbers
                    .iter()
                    .filter_map(|n| column_value(row, *n).map(str::to_string))
                    .collect();
            }
        }
        Compute::KeepOnlyMatchingLines(c) => filter_lines(table, c, true),
        Compute::ExcludeMatchingLines(c) => filter_lines(table, c, false),
        Compute::Extract(c) => extract(table, c),
        Compute::Replace(c) => replace(table, c),
        Compute::Substring(c) => substring(table, c),
        Compute::Translate(c) => translate(table, c),
        Compute::ArrayTranslate(c) => array_translate(table, c),
        Compute::PerBitTranslation(c) => per_bit_translation(table, c),
        Compute::Convert(c) => {
            let convert: fn(&str) -> Option<String> = match c.conversion {
                ConversionType::Hex2Dec => hex_to_decimal,
                ConversionType::Array2SimpleStatus => array_to_simple_status,
            };
            update_column(table, c.column, |_, cell| convert(cell));
        }
    }
}

/// Cell at a 1-based column
fn column_value(row: &[String], column: usize) -> Option<&str> {
    column
        .checked_sub(1)
        .and_then(|index| row.get(index))
        .map(String::as_str)
}

/// Literal operand, or the cell referenced by `$N`
fn operand<'a>(row: &'a [String], value: &'a str) -> Option<&'a str> {
    match parse_column_ref(value) {
        Some(column) => column_value(row, column),
        None => Some(value),
    }
}

/// Number formatting used for computed cells
pub fn format_number(value: f64) -> String {
    value.to_string()
}

fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Replace a column's cell with `f(row, cell)` when it returns a value
fn update_column(
    table: &mut SourceTable,
    column: usize,
    f: impl Fn(&[String], &str) -> Option<String>,
) {
    let Some(index) = column.checked_sub(1) else {
        return;
    };
    for row in &mut table.table {
        let Some(cell) = row.get(index) else { continue };
        if let Some(new_value) = f(row, cell) {
            row[index] = new_value;
        }
    }
}

fn arithmetic(table: &mut SourceTable, c: &ArithmeticCompute, op: impl Fn(f64, f64) -> Option<f64>) {
    update_column(table, c.column, |row, cell| {
        let left = parse_number(cell)?;
        let right = parse_number(operand(row, &c.value)?)?;
        op(left, right).map(format_number)
    });
}

fn bitwise_and(table: &mut SourceTable, c: &ArithmeticCompute) {
    update_column(table, c.column, |row, cell| {
        let left = cell.trim().parse::<i64>().ok()?;
        let right = operand(row, &c.value)?.trim().parse::<i64>().ok()?;
        Some((left & right).to_string())
    });
}

fn concat(table: &mut SourceTable, c: &ConcatCompute, left: bool) {
    update_column(table, c.column, |row, cell| {
        let value = operand(row, &c.value)?;
        Some(if left {
            format!("{value}{cell}")
        } else {
            format!("{cell}{value}")
        })
    });
}

fn build_regex(pattern: &str) -> Option<Regex> {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "Invalid regular expression in compute");
            None
        }
    }
}

fn filter_lines(table: &mut SourceTable, c: &MatchingLinesCompute, keep: bool) {
    if c.regexp.is_none() && c.value_list.is_none() {
        return;
    }
    let regex = match c.regexp.as_deref() {
        Some(pattern) => match build_regex(pattern) {
            Some(regex) => Some(regex),
            None => return,
        },
        None => None,
    };

    table.table.retain(|row| {
        let Some(cell) = column_value(row, c.column) else {
            return !keep;
        };
        let regex_match = regex.as_ref().is_none_or(|r| r.is_match(cell));
        let list_match = c
            .value_list
            .as_ref()
            .is_none_or(|values| values.iter().any(|v| v.eq_ignore_ascii_case(cell.trim())));
        (regex_match && list_match) == keep
    });
}

fn extract(table: &mut SourceTable, c: &ExtractCompute) {
    update_column(table, c.column, |_, cell| {
        let index = c.sub_column.checked_sub(1)?;
        cell.split(|ch: char| c.sub_separators.contains(ch))
            .filter(|token| !token.is_empty())
            .nth(index)
            .map(str::to_string)
    });
}

fn replace(table: &mut SourceTable, c: &ReplaceCompute) {
    update_column(table, c.column, |row, cell| {
        let existing = operand(row, &c.existing_value)?;
        if existing.is_empty() {
            return None;
        }
        let new_value = operand(row, &c.new_value)?;
        Some(cell.replace(existing, new_value))
    });
}

fn substring(table: &mut SourceTable, c: &SubstringCompute) {
    update_column(table, c.column, |row, cell| {
        let start = operand(row, &c.start)?.trim().parse::<usize>().ok()?;
        let length = operand(row, &c.length)?.trim().parse::<usize>().ok()?;
        let chars: Vec<char> = cell.chars().collect();
        let begin = start.checked_sub(1)?;
        if begin > chars.len() {
            return None;
        }
        let end = begin.saturating_add(length).min(chars.len());
        Some(chars[begin..end].iter().collect())
    });
}

/// Case-insensitive table lookup with `default` fallback
fn lookup<'a>(table: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    let key = key.trim();
    table
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .or_else(|| table.iter().find(|(k, _)| k.eq_ignore_ascii_case(DEFAULT_TRANSLATION)))
        .map(|(_, v)| v.as_str())
}

fn translate(table: &mut SourceTable, c: &TranslateCompute) {
    update_column(table, c.column, |_, cell| {
        lookup(&c.translation_table, cell).map(str::to_string)
    });
}

fn array_translate(table: &mut SourceTable, c: &ArrayTranslateCompute) {
    update_column(table, c.column, |_, cell| {
        let translated: Vec<&str> = cell
            .split(c.array_separator.as_str())
            .filter_map(|item| lookup(&c.translation_table, item))
            .filter(|t| !t.is_empty())
            .collect();
        Some(translated.join(&c.result_separator))
    });
}

fn per_bit_translation(table: &mut SourceTable, c: &PerBitTranslationCompute) {
    update_column(table, c.column, |_, cell| {
        let value = cell.trim().parse::<u64>().ok()?;
        let words: Vec<&str> = c
            .bit_list
            .iter()
            .filter(|bit| **bit < 64)
            .filter_map(|bit| {
                let state = (value >> *bit) & 1;
                let key = format!("{bit},{state}");
                c.translation_table
                    .iter()
                    .find(|(k, _)| k.replace(' ', "") == key)
                    .map(|(_, v)| v.as_str())
            })
            .filter(|w| !w.is_empty())
            .collect();
        Some(words.join(" - "))
    });
}

fn hex_to_decimal(cell: &str) -> Option<String> {
    let trimmed = cell.trim();
    let digits: String = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .chars()
        .filter(|c| !matches!(c, ':' | ' ' | '-'))
        .collect();
    u64::from_str_radix(&digits, 16).ok().map(|v| v.to_string())
}

fn status_rank(word: &str) -> Option<u8> {
    match word.trim().to_ascii_lowercase().as_str() {
        "ok" => Some(0),
        "warn" | "warning" | "degraded" => Some(1),
        "alarm" | "failed" | "critical" => Some(2),
        _ => None,
    }
}

fn array_to_simple_status(cell: &str) -> Option<String> {
    let worst = cell.split('|').filter_map(status_rank).max()?;
    Some(
        match worst {
            0 => "ok",
            1 => "degraded",
            _ => "failed",
        }
        .to_string(),
    )
}
