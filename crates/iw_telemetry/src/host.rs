//! Host configuration and cached host properties

use iw_config::{DeviceKind, GlobalConfig, HostConfig, ProtocolConfig, ProtocolKind};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::namespace::WqlProtocol;

/// Everything the engine needs to know about one monitored host
#[derive(Debug, Clone)]
pub struct HostConfiguration {
    pub host_id: String,
    pub hostname: String,
    pub device_kind: DeviceKind,
    pub protocols: Vec<ProtocolConfig>,
    /// Budget of one source or criterion evaluation
    pub job_timeout: Duration,
    pub sequential: bool,
    pub max_parallel_connectors: usize,
    /// Connector allow-list; empty means all
    pub selected_connectors: Vec<String>,
}

impl HostConfiguration {
    pub fn new(
        host_id: impl Into<String>,
        hostname: impl Into<String>,
        device_kind: DeviceKind,
    ) -> Self {
        Self {
            host_id: host_id.into(),
            hostname: hostname.into(),
            device_kind,
            protocols: Vec::new(),
            job_timeout: Duration::from_secs(120),
            sequential: false,
            max_parallel_connectors: 8,
            selected_connectors: Vec::new(),
        }
    }

    /// Build from the agent configuration entry of a host
    pub fn from_config(host_id: &str, host: &HostConfig, global: &GlobalConfig) -> Self {
        Self {
            host_id: host_id.to_string(),
            hostname: host.hostname.clone(),
            device_kind: host.device_kind,
            protocols: host.protocols.configurations(),
            job_timeout: Duration::from_secs(global.job_timeout_secs),
            sequential: host.sequential.unwrap_or(global.sequential),
            max_parallel_connectors: global.max_parallel_connectors.max(1),
            selected_connectors: host.connectors.clone(),
        }
    }

    #[must_use]
    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocols.retain(|p| p.kind() != protocol.kind());
        self.protocols.push(protocol);
        self
    }

    #[must_use]
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_sequential(mut self, sequential: bool) -> Self {
        self.sequential = sequential;
        self
    }

    pub fn protocol(&self, kind: ProtocolKind) -> Option<&ProtocolConfig> {
        self.protocols.iter().find(|p| p.kind() == kind)
    }

    /// Whether the connector may run on this host
    pub fn is_connector_selected(&self, connector_id: &str) -> bool {
        self.selected_connectors.is_empty() || self.is_connector_listed(connector_id)
    }

    /// Whether the connector is named in the host's allow-list, ignoring case
    pub fn is_connector_listed(&self, connector_id: &str) -> bool {
        self.selected_connectors
            .iter()
            .any(|c| c.eq_ignore_ascii_case(connector_id))
    }
}

/// Whether a hostname designates the machine the agent runs on
pub fn is_local_hostname(hostname: &str) -> bool {
    let hostname = hostname.trim();
    if hostname.eq_ignore_ascii_case("localhost")
        || hostname == "127.0.0.1"
        || hostname == "::1"
        || hostname == "0:0:0:0:0:0:0:1"
    {
        return true;
    }
    sysinfo::System::host_name().is_some_and(|local| {
        let short = local.split('.').next().unwrap_or(&local);
        hostname.eq_ignore_ascii_case(&local) || hostname.eq_ignore_ascii_case(short)
    })
}

/// Namespace candidates of one protocol on a host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NamespaceCandidates {
    #[default]
    Unknown,
    Known(Vec<String>),
    /// Enumeration failed during the cycle stamped `strategy_time`
    Failed { strategy_time: i64, message: String },
}

impl NamespaceCandidates {
    /// Failure message when enumeration already failed in this cycle
    pub fn failed_in_cycle(&self, strategy_time: i64) -> Option<&str> {
        match self {
            Self::Failed {
                strategy_time: failed_at,
                message,
            } if *failed_at == strategy_time => Some(message),
            _ => None,
        }
    }
}

/// Host facts computed once and shared by all connectors of the host
#[derive(Debug)]
pub struct HostProperties {
    is_localhost: bool,
    wmi_candidates: Mutex<NamespaceCandidates>,
    wbem_candidates: Mutex<NamespaceCandidates>,
}

impl HostProperties {
    pub fn new(is_localhost: bool) -> Self {
        Self {
            is_localhost,
            wmi_candidates: Mutex::new(NamespaceCandidates::Unknown),
            wbem_candidates: Mutex::new(NamespaceCandidates::Unknown),
        }
    }

    pub fn is_localhost(&self) -> bool {
        self.is_localhost
    }

    /// Candidate namespace cache of a protocol. Holding the guard is the
    /// per-host, per-protocol enumeration lock.
    pub fn namespace_candidates(&self, protocol: WqlProtocol) -> &Mutex<NamespaceCandidates> {
        match protocol {
            WqlProtocol::Wmi => &self.wmi_candidates,
            WqlProtocol::Wbem => &self.wbem_candidates,
        }
    }
}
