//! Compute steps
//!
//! A compute is one declarative transformation applied to a source table.
//! Column numbers are 1-based. Operand values written as `$N` refer to
//! column N of the row being transformed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Compute {
    Add(ArithmeticCompute),
    Subtract(ArithmeticCompute),
    Multiply(ArithmeticCompute),
    Divide(ArithmeticCompute),
    /// Bitwise AND on integer cells
    And(ArithmeticCompute),
    LeftConcat(ConcatCompute),
    RightConcat(ConcatCompute),
    DuplicateColumn(ColumnCompute),
    KeepColumns(KeepColumnsCompute),
    KeepOnlyMatchingLines(MatchingLinesCompute),
    ExcludeMatchingLines(MatchingLinesCompute),
    Extract(ExtractCompute),
    Replace(ReplaceCompute),
    Substring(SubstringCompute),
    Translate(TranslateCompute),
    ArrayTranslate(ArrayTranslateCompute),
    PerBitTranslation(PerBitTranslationCompute),
    Convert(ConvertCompute),
}

impl Compute {
    /// Type name as written in connector files
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Add(_) => "add",
            Self::Subtract(_) => "subtract",
            Self::Multiply(_) => "multiply",
            Self::Divide(_) => "divide",
            Self::And(_) => "and",
            Self::LeftConcat(_) => "leftConcat",
            Self::RightConcat(_) => "rightConcat",
            Self::DuplicateColumn(_) => "duplicateColumn",
            Self::KeepColumns(_) => "keepColumns",
            Self::KeepOnlyMatchingLines(_) => "keepOnlyMatchingLines",
            Self::ExcludeMatchingLines(_) => "excludeMatchingLines",
            Self::Extract(_) => "extract",
            Self::Replace(_) => "replace",
            Self::Substring(_) => "substring",
            Self::Translate(_) => "translate",
            Self::ArrayTranslate(_) => "arrayTranslate",
            Self::PerBitTranslation(_) => "perBitTranslation",
            Self::Convert(_) => "convert",
        }
    }
}

/// `column <op> value`, where value is a literal or `$N`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArithmeticCompute {
    pub column: usize,
    pub value: String,
}

/// Concatenation of a literal or `$N` onto a column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConcatCompute {
    pub column: usize,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnCompute {
    pub column: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeepColumnsCompute {
    pub column_numbers: Vec<usize>,
}

/// Row filter on one column; a row matches if it matches the regular
/// expression (when set) and belongs to the value list (when set)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchingLinesCompute {
    pub column: usize,
    #[serde(default)]
    pub regexp: Option<String>,
    #[serde(default)]
    pub value_list: Option<Vec<String>>,
}

/// Split a cell on separator characters and keep one 1-based sub-column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractCompute {
    pub column: usize,
    pub sub_column: usize,
    pub sub_separators: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceCompute {
    pub column: usize,
    pub existing_value: String,
    pub new_value: String,
}

/// 1-based `start` and `length`, each a literal or `$N`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubstringCompute {
    pub column: usize,
    pub start: String,
    pub length: String,
}

/// Lookup table keys are matched case-insensitively; the `default` key
/// applies to values with no entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TranslateCompute {
    pub column: usize,
    pub translation_table: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArrayTranslateCompute {
    pub column: usize,
    pub translation_table: BTreeMap<String, String>,
    #[serde(default = "default_array_separator")]
    pub array_separator: String,
    #[serde(default = "default_result_separator")]
    pub result_separator: String,
}

fn default_array_separator() -> String {
    ",".to_string()
}

fn default_result_separator() -> String {
    "|".to_string()
}

/// Translate individual bits of an integer cell. Table keys are
/// `"<bit>,<0|1>"`; translated words are joined with ` - `
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerBitTranslationCompute {
    pub column: usize,
    pub bit_list: Vec<u32>,
    pub translation_table: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConversionType {
    /// Hexadecimal string to decimal
    Hex2Dec,
    /// `|`-separated status words reduced to the worst of ok/degraded/failed
    Array2SimpleStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConvertCompute {
    pub column: usize,
    pub conversion: ConversionType,
}
