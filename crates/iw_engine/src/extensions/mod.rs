//! Built-in protocol extensions
//!
//! Both run commands on the monitored host, locally when it is the agent
//! machine and over SSH otherwise. Every other protocol (SNMP, WBEM, WMI,
//! HTTP, IPMI, JMX, SQL) is provided by external extensions registered at
//! start.

use iw_config::ProtocolKind;
use iw_telemetry::TelemetryManager;

pub mod file;
pub use file::FileExtension;

pub mod oscommand;
pub use oscommand::OsCommandExtension;

/// Whether commands can reach the host: it is the agent machine, or SSH is
/// configured for it
pub(crate) fn reaches_host(telemetry: &TelemetryManager) -> bool {
    telemetry.host_properties().is_localhost()
        || telemetry
            .host_configuration()
            .protocol(ProtocolKind::Ssh)
            .is_some()
}
