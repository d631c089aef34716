//! Detection criteria
//!
//! A criterion is one applicability test. Criteria are evaluated in
//! declaration order; a connector applies to a host only if all of them pass.

use iw_config::DeviceKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Namespace value asking the engine to discover the namespace itself
pub const AUTOMATIC_NAMESPACE: &str = "Automatic";

/// Namespace used when a WQL criterion does not declare one
pub const DEFAULT_NAMESPACE: &str = "root/cimv2";

/// One applicability test
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Criterion {
    DeviceType(DeviceTypeCriterion),
    Http(HttpCriterion),
    Ipmi(IpmiCriterion),
    CommandLine(CommandLineCriterion),
    Process(ProcessCriterion),
    Service(ServiceCriterion),
    ProductRequirements(ProductRequirementsCriterion),
    SnmpGet(SnmpCriterion),
    SnmpGetNext(SnmpCriterion),
    Wmi(WqlCriterion),
    Wbem(WqlCriterion),
}

/// Criterion type identifiers, used to match protocol extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CriterionType {
    DeviceType,
    Http,
    Ipmi,
    CommandLine,
    Process,
    Service,
    ProductRequirements,
    SnmpGet,
    SnmpGetNext,
    Wmi,
    Wbem,
}

impl CriterionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceType => "deviceType",
            Self::Http => "http",
            Self::Ipmi => "ipmi",
            Self::CommandLine => "commandLine",
            Self::Process => "process",
            Self::Service => "service",
            Self::ProductRequirements => "productRequirements",
            Self::SnmpGet => "snmpGet",
            Self::SnmpGetNext => "snmpGetNext",
            Self::Wmi => "wmi",
            Self::Wbem => "wbem",
        }
    }
}

impl fmt::Display for CriterionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Criterion {
    pub fn criterion_type(&self) -> CriterionType {
        match self {
            Self::DeviceType(_) => CriterionType::DeviceType,
            Self::Http(_) => CriterionType::Http,
            Self::Ipmi(_) => CriterionType::Ipmi,
            Self::CommandLine(_) => CriterionType::CommandLine,
            Self::Process(_) => CriterionType::Process,
            Self::Service(_) => CriterionType::Service,
            Self::ProductRequirements(_) => CriterionType::ProductRequirements,
            Self::SnmpGet(_) => CriterionType::SnmpGet,
            Self::SnmpGetNext(_) => CriterionType::SnmpGetNext,
            Self::Wmi(_) => CriterionType::Wmi,
            Self::Wbem(_) => CriterionType::Wbem,
        }
    }

    /// WQL payload of WMI and WBEM criteria
    pub fn as_wql(&self) -> Option<&WqlCriterion> {
        match self {
            Self::Wmi(c) | Self::Wbem(c) => Some(c),
            _ => None,
        }
    }

    /// Short human description used in logs and results
    pub fn describe(&self) -> String {
        match self {
            Self::DeviceType(c) => format!(
                "deviceType keep={:?} exclude={:?}",
                c.keep.iter().map(DeviceKind::as_str).collect::<Vec<_>>(),
                c.exclude.iter().map(DeviceKind::as_str).collect::<Vec<_>>()
            ),
            Self::Http(c) => format!("http {} {}", c.method, c.path),
            Self::Ipmi(_) => "ipmi".to_string(),
            Self::CommandLine(c) => format!("commandLine {}", c.command_line),
            Self::Process(c) => format!("process {}", c.command_line),
            Self::Service(c) => format!("service {}", c.name),
            Self::ProductRequirements(c) => format!(
                "productRequirements engineVersion={}",
                c.engine_version.as_deref().unwrap_or("-")
            ),
            Self::SnmpGet(c) => format!("snmpGet {}", c.oid),
            Self::SnmpGetNext(c) => format!("snmpGetNext {}", c.oid),
            Self::Wmi(c) => format!("wmi {} ({})", c.query, c.namespace),
            Self::Wbem(c) => format!("wbem {} ({})", c.query, c.namespace),
        }
    }
}

/// Include/exclude test on the host's device kind
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceTypeCriterion {
    pub keep: BTreeSet<DeviceKind>,
    pub exclude: BTreeSet<DeviceKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpCriterion {
    #[serde(default = "default_http_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub expected_result: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

fn default_http_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct IpmiCriterion {
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandLineCriterion {
    pub command_line: String,
    #[serde(default)]
    pub expected_result: Option<String>,
    #[serde(default)]
    pub execute_locally: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessCriterion {
    /// Regular expression matched against full process command lines
    pub command_line: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceCriterion {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProductRequirementsCriterion {
    /// Minimum engine version able to run the connector
    pub engine_version: Option<String>,
    pub km_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnmpCriterion {
    pub oid: String,
    #[serde(default)]
    pub expected_result: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// WQL query test, shared by WMI and WBEM
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WqlCriterion {
    pub query: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub expected_result: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl WqlCriterion {
    pub fn new(query: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            namespace: namespace.into(),
            expected_result: None,
            error_message: None,
        }
    }

    /// Whether the namespace must be discovered by the engine
    pub fn is_automatic_namespace(&self) -> bool {
        self.namespace.eq_ignore_ascii_case(AUTOMATIC_NAMESPACE)
    }

    /// Copy of this criterion pinned to the given namespace
    #[must_use]
    pub fn with_namespace(&self, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..self.clone()
        }
    }
}
