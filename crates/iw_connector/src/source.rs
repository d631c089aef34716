//! Source definitions
//!
//! A source is one data-fetch operation producing a table. Protocol-backed
//! sources are executed by extensions; table-manipulation sources (`copy`,
//! `static`, `tableJoin`, `tableUnion`) are executed by the engine itself.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::compute::Compute;

/// One source with its ordered compute chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Stable key, unique within the connector (filled in when omitted)
    #[serde(default)]
    pub key: String,

    /// At most one concurrent execution of this source in the process
    #[serde(default)]
    pub force_serialization: bool,

    /// Transformation steps applied in order
    #[serde(default)]
    pub computes: Vec<Compute>,

    #[serde(flatten)]
    pub kind: SourceKind,
}

impl Source {
    pub fn new(key: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            key: key.into(),
            force_serialization: false,
            computes: Vec::new(),
            kind,
        }
    }

    #[must_use]
    pub fn with_computes(mut self, computes: Vec<Compute>) -> Self {
        self.computes = computes;
        self
    }

    #[must_use]
    pub fn serialized(mut self) -> Self {
        self.force_serialization = true;
        self
    }

    pub fn source_type(&self) -> SourceType {
        self.kind.source_type()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceKind {
    Http(HttpSource),
    Ipmi(IpmiSource),
    CommandLine(CommandLineSource),
    SnmpGet(SnmpGetSource),
    SnmpTable(SnmpTableSource),
    Sql(SqlSource),
    Wbem(WqlSource),
    Wmi(WqlSource),
    Jmx(JmxSource),
    File(FileSource),
    EventLog(EventLogSource),
    Copy(CopySource),
    Static(StaticSource),
    TableJoin(TableJoinSource),
    TableUnion(TableUnionSource),
}

/// Source type identifiers, used to match protocol extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceType {
    Http,
    Ipmi,
    CommandLine,
    SnmpGet,
    SnmpTable,
    Sql,
    Wbem,
    Wmi,
    Jmx,
    File,
    EventLog,
    Copy,
    Static,
    TableJoin,
    TableUnion,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Ipmi => "ipmi",
            Self::CommandLine => "commandLine",
            Self::SnmpGet => "snmpGet",
            Self::SnmpTable => "snmpTable",
            Self::Sql => "sql",
            Self::Wbem => "wbem",
            Self::Wmi => "wmi",
            Self::Jmx => "jmx",
            Self::File => "file",
            Self::EventLog => "eventLog",
            Self::Copy => "copy",
            Self::Static => "static",
            Self::TableJoin => "tableJoin",
            Self::TableUnion => "tableUnion",
        }
    }

    /// Whether the engine executes this source without a protocol extension
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::Copy | Self::Static | Self::TableJoin | Self::TableUnion
        )
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SourceKind {
    pub fn source_type(&self) -> SourceType {
        match self {
            Self::Http(_) => SourceType::Http,
            Self::Ipmi(_) => SourceType::Ipmi,
            Self::CommandLine(_) => SourceType::CommandLine,
            Self::SnmpGet(_) => SourceType::SnmpGet,
            Self::SnmpTable(_) => SourceType::SnmpTable,
            Self::Sql(_) => SourceType::Sql,
            Self::Wbem(_) => SourceType::Wbem,
            Self::Wmi(_) => SourceType::Wmi,
            Self::Jmx(_) => SourceType::Jmx,
            Self::File(_) => SourceType::File,
            Self::EventLog(_) => SourceType::EventLog,
            Self::Copy(_) => SourceType::Copy,
            Self::Static(_) => SourceType::Static,
            Self::TableJoin(_) => SourceType::TableJoin,
            Self::TableUnion(_) => SourceType::TableUnion,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpSource {
    #[serde(default = "default_http_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub result_content: HttpResultContent,
}

fn default_http_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum HttpResultContent {
    #[default]
    Body,
    Header,
    HttpStatus,
    All,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IpmiSource {}

/// Command whose stdout is turned into a table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandLineSource {
    pub command_line: String,
    #[serde(default)]
    pub execute_locally: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Lines matching this expression are dropped
    #[serde(default)]
    pub exclude_regexp: Option<String>,
    /// Only lines matching this expression are kept
    #[serde(default)]
    pub keep_only_regexp: Option<String>,
    /// 1-based first line to keep
    #[serde(default)]
    pub begin_at_line_number: Option<usize>,
    /// 1-based last line to keep
    #[serde(default)]
    pub end_at_line_number: Option<usize>,
    /// Characters splitting a line into cells; no split when unset
    #[serde(default)]
    pub separators: Option<String>,
    /// 1-based columns to keep, e.g. "1,3-5"
    #[serde(default)]
    pub select_columns: Option<String>,
}

impl CommandLineSource {
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            execute_locally: false,
            timeout_secs: None,
            exclude_regexp: None,
            keep_only_regexp: None,
            begin_at_line_number: None,
            end_at_line_number: None,
            separators: None,
            select_columns: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnmpGetSource {
    pub oid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnmpTableSource {
    pub oid: String,
    /// Comma-separated column numbers or "ID"
    pub select_columns: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SqlSource {
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WqlSource {
    pub query: String,
    /// `None` or `"Automatic"` uses the namespace discovered at detection
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JmxSource {
    pub object_name: String,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub key_properties: Vec<String>,
}

/// How file content is read across polls
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FileMode {
    /// Only bytes appended since the previous poll
    #[default]
    Log,
    /// Whole file every poll
    Flat,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileSource {
    pub paths: Vec<String>,
    #[serde(default)]
    pub mode: FileMode,
    /// Upper bound of bytes read per file and poll
    #[serde(default)]
    pub max_size_per_poll: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventLogSource {
    pub log_name: String,
    #[serde(default)]
    pub event_ids: Vec<u32>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub levels: Vec<String>,
    #[serde(default)]
    pub max_events_per_poll: Option<usize>,
}

/// Copy of another source's table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CopySource {
    pub from: String,
}

/// Literal table: rows separated by newlines, cells by `;`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaticSource {
    pub value: String,
}

/// How join keys are compared
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum JoinKeyType {
    /// Case-insensitive equality
    #[default]
    Regular,
    /// WBEM object paths, compared without host and namespace prefix
    Wbem,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TableJoinSource {
    pub left_table: String,
    pub right_table: String,
    /// 1-based key column in the left table
    pub left_key_column: usize,
    /// 1-based key column in the right table
    pub right_key_column: usize,
    /// `;`-separated line appended when the right table has no match
    #[serde(default)]
    pub default_right_line: Option<String>,
    #[serde(default)]
    pub key_type: JoinKeyType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableUnionSource {
    pub tables: Vec<String>,
}
