//! Source tables

use serde::{Deserialize, Serialize};

/// Cell separator of tables written as text
pub const TABLE_SEP: &str = ";";

/// Result of executing one source.
///
/// `table` is always present; "no rows" is an empty vector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTable {
    pub table: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,
}

impl SourceTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_rows(table: Vec<Vec<String>>) -> Self {
        Self {
            table,
            ..Default::default()
        }
    }

    /// Table built from raw text, one row per non-empty line split on `separators`
    pub fn from_raw(raw: impl Into<String>, separators: &str) -> Self {
        let raw = raw.into();
        let table = parse_table(&raw, separators);
        Self {
            table,
            raw_data: Some(raw),
            headers: Vec::new(),
        }
    }

    /// Parse `a;b\nc;d` text; a trailing separator does not open a new cell
    pub fn from_csv(text: &str) -> Self {
        Self::from_rows(parse_table(text, TABLE_SEP))
    }

    #[must_use]
    pub fn with_raw_data(mut self, raw: impl Into<String>) -> Self {
        self.raw_data = Some(raw.into());
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Vec<String>) -> Self {
        self.headers = headers;
        self
    }

    /// No rows and no raw data
    pub fn is_empty(&self) -> bool {
        self.table.is_empty() && self.raw_data.as_deref().is_none_or(str::is_empty)
    }

    pub fn row_count(&self) -> usize {
        self.table.len()
    }

    /// Table rendered back to `;`-separated text
    pub fn to_csv(&self) -> String {
        self.table
            .iter()
            .map(|row| row.join(TABLE_SEP))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Raw data when present, otherwise the table as text
    pub fn text(&self) -> String {
        match &self.raw_data {
            Some(raw) => raw.clone(),
            None => self.to_csv(),
        }
    }

    /// Cell at a 1-based column of a row
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        column
            .checked_sub(1)
            .and_then(|c| self.table.get(row).and_then(|r| r.get(c)))
            .map(String::as_str)
    }
}

fn parse_table(text: &str, separators: &str) -> Vec<Vec<String>> {
    text.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(|line| split_line(line, separators))
        .collect()
}

/// Split a line on any of the separator characters
pub fn split_line(line: &str, separators: &str) -> Vec<String> {
    if separators.is_empty() {
        return vec![line.to_string()];
    }
    let mut cells: Vec<String> = line
        .split(|c: char| separators.contains(c))
        .map(str::to_string)
        .collect();
    if cells.len() > 1 && cells.last().is_some_and(String::is_empty) {
        cells.pop();
    }
    cells
}
