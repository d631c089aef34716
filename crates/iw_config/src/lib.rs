//! `iw_config` - Configuration parsing and validation for ironwatch
//!
//! This crate provides:
//! - TOML configuration parsing
//! - Default value handling
//! - Environment variable overrides
//! - Path expansion (`~/` to home directory)
//! - Auto-discovery from standard config paths
//! - Host inventory with per-host protocol configurations

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub mod protocol;

pub use protocol::{
    HttpProtocol, IpmiProtocol, JdbcProtocol, JmxProtocol, ProtocolConfig, ProtocolKind,
    ProtocolsConfig, SnmpProtocol, SnmpVersion, SshProtocol, WbemProtocol, WinRmProtocol,
    WmiProtocol,
};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Kind of device a host is, used by connector applicability tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Linux,
    Windows,
    #[serde(alias = "outofband", alias = "out-of-band")]
    Oob,
    Network,
    Storage,
    #[serde(alias = "vmware")]
    Vms,
    Aix,
    Hpux,
    Solaris,
    Tru64,
    Other,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
            Self::Oob => "oob",
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Vms => "vms",
            Self::Aix => "aix",
            Self::Hpux => "hpux",
            Self::Solaris => "solaris",
            Self::Tru64 => "tru64",
            Self::Other => "other",
        }
    }
}

impl Default for DeviceKind {
    fn default() -> Self {
        Self::Other
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "linux" => Ok(Self::Linux),
            "windows" | "win" => Ok(Self::Windows),
            "oob" | "outofband" | "out-of-band" | "management" => Ok(Self::Oob),
            "network" | "switch" => Ok(Self::Network),
            "storage" => Ok(Self::Storage),
            "vms" | "vmware" => Ok(Self::Vms),
            "aix" => Ok(Self::Aix),
            "hpux" | "hp-ux" => Ok(Self::Hpux),
            "solaris" | "sunos" => Ok(Self::Solaris),
            "tru64" | "osf1" => Ok(Self::Tru64),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown device kind '{other}'")),
        }
    }
}

/// Top-level configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IwConfig {
    /// Global settings
    pub global: GlobalConfig,

    /// Host inventory, keyed by host id
    pub hosts: HashMap<String, HostConfig>,
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Directory holding connector definitions
    pub connectors_dir: PathBuf,

    /// Poll interval in seconds
    pub poll_interval_secs: u64,

    /// Time budget for one source or criterion evaluation, in seconds
    pub job_timeout_secs: u64,

    /// Process connectors of one host one after the other
    pub sequential: bool,

    /// Maximum connectors processed at once for one host in parallel mode
    pub max_parallel_connectors: usize,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Enable JSON logging
    pub json_logs: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            connectors_dir: default_connectors_dir(),
            poll_interval_secs: 120,
            job_timeout_secs: 120,
            sequential: false,
            max_parallel_connectors: 8,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Default connector directory using XDG directories
fn default_connectors_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ironwatch")
        .join("connectors")
}

/// Expand tilde in path to home directory
#[must_use]
pub fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    if let Some(stripped) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if path_str == "~"
        && let Some(home) = dirs::home_dir()
    {
        return home;
    }
    path.to_path_buf()
}

impl GlobalConfig {
    pub fn expand_paths(&mut self) {
        self.connectors_dir = expand_path(&self.connectors_dir);
    }
}

/// Monitored host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Network name or address used by protocols
    pub hostname: String,

    /// Device kind, matched against connector applicability
    #[serde(default)]
    pub device_kind: DeviceKind,

    /// Per-host override of `global.sequential`
    #[serde(default)]
    pub sequential: Option<bool>,

    /// Connector allow-list; empty means every loaded connector
    #[serde(default)]
    pub connectors: Vec<String>,

    /// Whether this host is polled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Protocols available to reach the host
    #[serde(default)]
    pub protocols: ProtocolsConfig,
}

fn default_true() -> bool {
    true
}

impl HostConfig {
    /// Minimal host entry, mostly for tests and ad-hoc runs
    #[must_use]
    pub fn new(hostname: impl Into<String>, device_kind: DeviceKind) -> Self {
        Self {
            hostname: hostname.into(),
            device_kind,
            sequential: None,
            connectors: Vec::new(),
            enabled: true,
            protocols: ProtocolsConfig::default(),
        }
    }

    fn expand_paths(&mut self) {
        if let Some(ssh) = self.protocols.ssh.as_mut()
            && let Some(key_path) = ssh.key_path.as_mut()
        {
            *key_path = expand_path(key_path);
        }
    }
}

impl IwConfig {
    /// Standard config file paths, in order of precedence
    #[must_use]
    pub fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("ironwatch.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("ironwatch").join("ironwatch.toml"));
        }

        paths.push(PathBuf::from("/etc/ironwatch/ironwatch.toml"));

        paths
    }

    /// Discover and load configuration from standard paths.
    ///
    /// Returns defaults if no config file is found.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if a discovered config file cannot be loaded.
    pub fn discover() -> Result<Self, ConfigError> {
        for path in Self::config_paths() {
            if path.exists() {
                info!(path = %path.display(), "Loading config from");
                return Self::load(&path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Discover config and apply environment variable overrides.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if config discovery or validation fails.
    pub fn discover_with_env() -> Result<Self, ConfigError> {
        let mut config = Self::discover()?;
        config.apply_env_overrides();
        config.expand_all_paths();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific TOML file.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the text cannot be parsed or validated.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config: IwConfig = toml::from_str(content)?;
        config.expand_all_paths();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the file cannot be read, parsed, or validated.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Expand all paths in configuration (resolve `~/` to home directory)
    pub fn expand_all_paths(&mut self) {
        self.global.expand_paths();
        for host in self.hosts.values_mut() {
            host.expand_paths();
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("IW_CONNECTORS_DIR") {
            self.global.connectors_dir = expand_path(&PathBuf::from(val));
        }
        if let Ok(val) = std::env::var("IW_LOG_LEVEL") {
            self.global.log_level = val;
        }
        if let Ok(val) = std::env::var("IW_POLL_INTERVAL")
            && let Ok(secs) = val.parse()
        {
            self.global.poll_interval_secs = secs;
        }
        if let Ok(val) = std::env::var("IW_JOB_TIMEOUT")
            && let Ok(secs) = val.parse()
        {
            self.global.job_timeout_secs = secs;
        }
    }

    /// Validate configuration.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] when validation rules are violated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.global.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_secs must be > 0".to_string(),
            ));
        }

        if self.global.job_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "job_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.global.max_parallel_connectors == 0 {
            return Err(ConfigError::ValidationError(
                "max_parallel_connectors must be > 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.global.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.global.log_level,
                valid_levels.join(", ")
            )));
        }

        for (id, host) in &self.hosts {
            if host.hostname.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Host '{id}' has an empty hostname"
                )));
            }
            if let Some(ssh) = &host.protocols.ssh
                && ssh.username.trim().is_empty()
            {
                return Err(ConfigError::ValidationError(format!(
                    "Host '{id}' has an ssh section but an empty username"
                )));
            }
            if let Some(snmp) = &host.protocols.snmp
                && snmp.port == 0
            {
                return Err(ConfigError::ValidationError(format!(
                    "Host '{id}' has an invalid snmp port"
                )));
            }
        }

        Ok(())
    }

    /// Get poll interval as Duration
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.global.poll_interval_secs)
    }

    /// Get job timeout as Duration
    #[must_use]
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.global.job_timeout_secs)
    }

    /// Get enabled hosts
    pub fn enabled_hosts(&self) -> impl Iterator<Item = (&String, &HostConfig)> {
        self.hosts.iter().filter(|(_, h)| h.enabled)
    }

    /// Whether connectors of this host must run one after the other
    #[must_use]
    pub fn is_sequential(&self, host_id: &str) -> bool {
        self.hosts
            .get(host_id)
            .and_then(|h| h.sequential)
            .unwrap_or(self.global.sequential)
    }

    /// Check if a connector is enabled for a specific host
    #[must_use]
    pub fn is_connector_enabled(&self, host_id: &str, connector_id: &str) -> bool {
        match self.hosts.get(host_id) {
            Some(host) if !host.connectors.is_empty() => host
                .connectors
                .iter()
                .any(|c| c.eq_ignore_ascii_case(connector_id)),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = IwConfig::default();
        assert_eq!(config.global.poll_interval_secs, 120);
        assert_eq!(config.global.job_timeout_secs, 120);
        assert_eq!(config.global.log_level, "info");
        assert!(!config.global.sequential);
        assert!(config.hosts.is_empty());
    }

    #[test]
    fn test_config_validation_poll_interval() {
        let mut config = IwConfig::default();
        config.global.poll_interval_secs = 0;
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("poll_interval_secs"));
    }

    #[test]
    fn test_config_validation_job_timeout() {
        let mut config = IwConfig::default();
        config.global.job_timeout_secs = 0;
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("job_timeout_secs"));
    }

    #[test]
    fn test_config_validation_log_level() {
        let mut config = IwConfig::default();
        config.global.log_level = "invalid".to_string();
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("log_level"));
    }

    #[test]
    fn test_config_validation_empty_hostname() {
        let mut config = IwConfig::default();
        config
            .hosts
            .insert("bad".to_string(), HostConfig::new("  ", DeviceKind::Linux));
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("empty hostname"));
    }

    #[test]
    fn test_config_validation_ssh_username() {
        let mut config = IwConfig::default();
        let mut host = HostConfig::new("srv", DeviceKind::Linux);
        host.protocols.ssh = Some(SshProtocol {
            username: String::new(),
            password: None,
            key_path: None,
            port: 22,
            timeout_secs: None,
            sudo_command: None,
        });
        config.hosts.insert("srv".to_string(), host);
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("username"));
    }

    #[test]
    fn test_device_kind_parse() {
        assert_eq!("Linux".parse::<DeviceKind>().unwrap(), DeviceKind::Linux);
        assert_eq!("out-of-band".parse::<DeviceKind>().unwrap(), DeviceKind::Oob);
        assert_eq!("SunOS".parse::<DeviceKind>().unwrap(), DeviceKind::Solaris);
        assert!("toaster".parse::<DeviceKind>().is_err());
    }

    #[test]
    fn test_path_expansion_tilde() {
        let path = PathBuf::from("~/test/path");
        let expanded = expand_path(&path);
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join("test/path"));
        }
    }

    #[test]
    fn test_path_expansion_no_tilde() {
        let path = PathBuf::from("/absolute/path");
        assert_eq!(expand_path(&path), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_load_from_toml() {
        let toml_content = r#"
[global]
connectors_dir = "/tmp/connectors"
poll_interval_secs = 60
sequential = true
log_level = "debug"

[hosts.storage-01]
hostname = "storage-01.example.com"
device_kind = "storage"

[hosts.storage-01.protocols.snmp]
community = "private"

[hosts.win-01]
hostname = "win-01"
device_kind = "windows"
sequential = false
connectors = ["WindowsDisks"]

[hosts.win-01.protocols.wmi]
username = "Administrator"
"#;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        let config = IwConfig::load(file.path()).unwrap();
        assert_eq!(config.global.poll_interval_secs, 60);
        assert_eq!(config.global.connectors_dir, PathBuf::from("/tmp/connectors"));
        assert_eq!(config.hosts.len(), 2);

        let storage = &config.hosts["storage-01"];
        assert_eq!(storage.device_kind, DeviceKind::Storage);
        let snmp = storage.protocols.snmp.as_ref().unwrap();
        assert_eq!(snmp.community, "private");
        assert_eq!(snmp.port, 161);
        assert_eq!(snmp.version, SnmpVersion::V2c);

        assert!(config.is_sequential("storage-01"));
        assert!(!config.is_sequential("win-01"));
        assert!(config.is_connector_enabled("win-01", "windowsdisks"));
        assert!(!config.is_connector_enabled("win-01", "LinuxProcess"));
        assert!(config.is_connector_enabled("storage-01", "anything"));
    }

    #[test]
    fn test_enabled_hosts() {
        let mut config = IwConfig::default();
        config
            .hosts
            .insert("on".to_string(), HostConfig::new("on", DeviceKind::Linux));
        let mut off = HostConfig::new("off", DeviceKind::Linux);
        off.enabled = false;
        config.hosts.insert("off".to_string(), off);

        let enabled: Vec<_> = config.enabled_hosts().collect();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].0, "on");
    }

    #[test]
    fn test_config_paths() {
        let paths = IwConfig::config_paths();
        assert_eq!(paths[0], PathBuf::from("ironwatch.toml"));
    }

    #[test]
    fn test_durations() {
        let config = IwConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(120));
        assert_eq!(config.job_timeout(), Duration::from_secs(120));
    }
}
