//! Per-host protocol configurations
//!
//! Each monitored host declares the protocols the agent may use to reach it.
//! The engine never interprets these structures itself: protocol extensions
//! claim the configurations they understand.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default protocol timeout when a section does not set one
pub const DEFAULT_PROTOCOL_TIMEOUT_SECS: u64 = 120;

/// Protocol identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Ssh,
    Snmp,
    Wbem,
    Wmi,
    WinRm,
    Http,
    Ipmi,
    Jdbc,
    Jmx,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Snmp => "snmp",
            Self::Wbem => "wbem",
            Self::Wmi => "wmi",
            Self::WinRm => "winrm",
            Self::Http => "http",
            Self::Ipmi => "ipmi",
            Self::Jdbc => "jdbc",
            Self::Jmx => "jmx",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SSH / OS command configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SshProtocol {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Prefix prepended to commands that need elevated rights (e.g. `sudo`)
    #[serde(default)]
    pub sudo_command: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

/// SNMP protocol version
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SnmpVersion {
    V1,
    #[default]
    V2c,
    V3,
}

/// SNMP configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnmpProtocol {
    #[serde(default)]
    pub version: SnmpVersion,
    #[serde(default = "default_community")]
    pub community: String,
    #[serde(default = "default_snmp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for SnmpProtocol {
    fn default() -> Self {
        Self {
            version: SnmpVersion::default(),
            community: default_community(),
            port: default_snmp_port(),
            username: None,
            password: None,
            timeout_secs: None,
        }
    }
}

fn default_community() -> String {
    "public".to_string()
}

fn default_snmp_port() -> u16 {
    161
}

/// WBEM configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WbemProtocol {
    #[serde(default = "default_true")]
    pub https: bool,
    #[serde(default = "default_wbem_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Forced namespace; overrides automatic discovery when set
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub vcenter: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_wbem_port() -> u16 {
    5989
}

/// WMI configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WmiProtocol {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Forced namespace; overrides automatic discovery when set
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// WinRM configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WinRmProtocol {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_winrm_port")]
    pub port: u16,
    #[serde(default)]
    pub https: bool,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_winrm_port() -> u16 {
    5985
}

/// HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpProtocol {
    #[serde(default = "default_true")]
    pub https: bool,
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_http_port() -> u16 {
    443
}

/// IPMI-over-LAN configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct IpmiProtocol {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub bmc_key: Option<String>,
    #[serde(default)]
    pub skip_auth: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// JDBC configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JdbcProtocol {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// JMX configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JmxProtocol {
    #[serde(default = "default_jmx_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_jmx_port() -> u16 {
    1099
}

fn default_true() -> bool {
    true
}

/// All protocol sections of one host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ProtocolsConfig {
    pub ssh: Option<SshProtocol>,
    pub snmp: Option<SnmpProtocol>,
    pub wbem: Option<WbemProtocol>,
    pub wmi: Option<WmiProtocol>,
    pub winrm: Option<WinRmProtocol>,
    pub http: Option<HttpProtocol>,
    pub ipmi: Option<IpmiProtocol>,
    pub jdbc: Option<JdbcProtocol>,
    pub jmx: Option<JmxProtocol>,
}

/// One configured protocol, as handed to protocol extensions
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolConfig {
    Ssh(SshProtocol),
    Snmp(SnmpProtocol),
    Wbem(WbemProtocol),
    Wmi(WmiProtocol),
    WinRm(WinRmProtocol),
    Http(HttpProtocol),
    Ipmi(IpmiProtocol),
    Jdbc(JdbcProtocol),
    Jmx(JmxProtocol),
}

impl ProtocolConfig {
    /// Protocol identifier of this configuration
    pub fn kind(&self) -> ProtocolKind {
        match self {
            Self::Ssh(_) => ProtocolKind::Ssh,
            Self::Snmp(_) => ProtocolKind::Snmp,
            Self::Wbem(_) => ProtocolKind::Wbem,
            Self::Wmi(_) => ProtocolKind::Wmi,
            Self::WinRm(_) => ProtocolKind::WinRm,
            Self::Http(_) => ProtocolKind::Http,
            Self::Ipmi(_) => ProtocolKind::Ipmi,
            Self::Jdbc(_) => ProtocolKind::Jdbc,
            Self::Jmx(_) => ProtocolKind::Jmx,
        }
    }

    /// Configured timeout, falling back to the protocol default
    pub fn timeout(&self) -> Duration {
        let secs = match self {
            Self::Ssh(p) => p.timeout_secs,
            Self::Snmp(p) => p.timeout_secs,
            Self::Wbem(p) => p.timeout_secs,
            Self::Wmi(p) => p.timeout_secs,
            Self::WinRm(p) => p.timeout_secs,
            Self::Http(p) => p.timeout_secs,
            Self::Ipmi(p) => p.timeout_secs,
            Self::Jdbc(p) => p.timeout_secs,
            Self::Jmx(p) => p.timeout_secs,
        };
        Duration::from_secs(secs.unwrap_or(DEFAULT_PROTOCOL_TIMEOUT_SECS))
    }
}

impl ProtocolsConfig {
    /// Flatten the declared sections into a list, in a stable order
    pub fn configurations(&self) -> Vec<ProtocolConfig> {
        let mut configs = Vec::new();
        if let Some(p) = &self.ssh {
            configs.push(ProtocolConfig::Ssh(p.clone()));
        }
        if let Some(p) = &self.snmp {
            configs.push(ProtocolConfig::Snmp(p.clone()));
        }
        if let Some(p) = &self.wbem {
            configs.push(ProtocolConfig::Wbem(p.clone()));
        }
        if let Some(p) = &self.wmi {
            configs.push(ProtocolConfig::Wmi(p.clone()));
        }
        if let Some(p) = &self.winrm {
            configs.push(ProtocolConfig::WinRm(p.clone()));
        }
        if let Some(p) = &self.http {
            configs.push(ProtocolConfig::Http(p.clone()));
        }
        if let Some(p) = &self.ipmi {
            configs.push(ProtocolConfig::Ipmi(p.clone()));
        }
        if let Some(p) = &self.jdbc {
            configs.push(ProtocolConfig::Jdbc(p.clone()));
        }
        if let Some(p) = &self.jmx {
            configs.push(ProtocolConfig::Jmx(p.clone()));
        }
        configs
    }

    /// Whether no protocol is configured at all
    pub fn is_empty(&self) -> bool {
        self.configurations().is_empty()
    }
}
