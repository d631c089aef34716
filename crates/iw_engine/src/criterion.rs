//! Criterion evaluation
//!
//! Device, version and process tests are answered by the engine. Everything
//! else is delegated to the protocol extension claiming the criterion type
//! on the host. Evaluation never fails: errors, timeouts and missing
//! configuration all become a failed `CriterionTestResult`.

use iw_config::DeviceKind;
use iw_connector::criterion::{
    DeviceTypeCriterion, ProcessCriterion, ProductRequirementsCriterion, WqlCriterion,
};
use iw_connector::Criterion;
use iw_telemetry::{TelemetryManager, WqlProtocol};
use regex::RegexBuilder;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::{debug, instrument, warn};

use crate::EngineContext;
use crate::extension::CriterionTestResult;

/// Query standing in for IPMI detection on Windows hosts
pub const WINDOWS_IPMI_QUERY: &str = "SELECT Description FROM ComputerSystem";

/// Namespace of the Windows IPMI query
pub const WINDOWS_IPMI_NAMESPACE: &str = "root/hardware";

/// Evaluates criteria for one host
#[derive(Debug, Clone, Copy)]
pub struct CriterionProcessor<'a> {
    pub(crate) ctx: &'a EngineContext,
    pub(crate) telemetry: &'a TelemetryManager,
}

impl<'a> CriterionProcessor<'a> {
    pub fn new(ctx: &'a EngineContext, telemetry: &'a TelemetryManager) -> Self {
        Self { ctx, telemetry }
    }

    #[instrument(skip_all, fields(
        hostname = %self.telemetry.hostname(),
        connector_id = %connector_id,
        criterion = %criterion.criterion_type()
    ))]
    pub async fn process(&self, criterion: &Criterion, connector_id: &str) -> CriterionTestResult {
        let result = match criterion {
            Criterion::DeviceType(c) => {
                device_type(c, self.telemetry.host_configuration().device_kind)
            }
            Criterion::ProductRequirements(c) => {
                product_requirements(c, self.ctx.engine_version())
            }
            Criterion::Process(c) => self.process_criterion(c).await,
            Criterion::Ipmi(_) => self.ipmi(criterion, connector_id).await,
            Criterion::Wmi(wql) => self.wql(criterion, wql, WqlProtocol::Wmi, connector_id).await,
            Criterion::Wbem(wql) => self.wql(criterion, wql, WqlProtocol::Wbem, connector_id).await,
            Criterion::SnmpGet(c) | Criterion::SnmpGetNext(c) if c.oid.trim().is_empty() => {
                CriterionTestResult::failure(format!(
                    "Malformed {} criterion: no OID",
                    criterion.criterion_type()
                ))
            }
            Criterion::CommandLine(c) if c.command_line.trim().is_empty() => {
                CriterionTestResult::failure("Malformed commandLine criterion: no command line")
            }
            Criterion::Service(c) if c.name.trim().is_empty() => {
                CriterionTestResult::failure("Malformed service criterion: no service name")
            }
            _ => self.delegate(criterion, connector_id).await,
        };

        debug!(
            success = result.success,
            message = %result.message,
            "Criterion evaluated"
        );
        result
    }

    /// Hand a criterion to the extension claiming its type
    pub(crate) async fn delegate(&self, criterion: &Criterion, connector_id: &str) -> CriterionTestResult {
        let criterion_type = criterion.criterion_type();
        let Some(extension) = self
            .ctx
            .extensions()
            .find_for_criterion(criterion_type, self.telemetry)
        else {
            return CriterionTestResult::failure(format!(
                "No protocol configured on {} to process {} criterion",
                self.telemetry.hostname(),
                criterion_type
            ));
        };

        let timeout = self.telemetry.host_configuration().job_timeout;
        match tokio::time::timeout(
            timeout,
            extension.process_criterion(criterion, connector_id, self.telemetry),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(
                    hostname = %self.telemetry.hostname(),
                    connector_id,
                    criterion = %criterion.describe(),
                    error = %e,
                    "Criterion evaluation failed"
                );
                CriterionTestResult::error(format!("{} failed", criterion.describe()), e)
            }
            Err(_) => {
                warn!(
                    hostname = %self.telemetry.hostname(),
                    connector_id,
                    criterion = %criterion.describe(),
                    timeout_secs = timeout.as_secs(),
                    "Criterion evaluation timed out"
                );
                CriterionTestResult::error(
                    format!("{} timed out", criterion.describe()),
                    format!("no answer within {timeout:?}"),
                )
            }
        }
    }

    async fn ipmi(&self, criterion: &Criterion, connector_id: &str) -> CriterionTestResult {
        match self.telemetry.host_configuration().device_kind {
            DeviceKind::Windows => {
                let wql = WqlCriterion::new(WINDOWS_IPMI_QUERY, WINDOWS_IPMI_NAMESPACE);
                let wmi = Criterion::Wmi(wql.clone());
                self.wql(&wmi, &wql, WqlProtocol::Wmi, connector_id).await
            }
            DeviceKind::Linux | DeviceKind::Solaris | DeviceKind::Oob => {
                self.delegate(criterion, connector_id).await
            }
            other => CriterionTestResult::failure(format!(
                "IPMI detection is not supported on {other} hosts"
            )),
        }
    }

    async fn wql(
        &self,
        criterion: &Criterion,
        wql: &WqlCriterion,
        protocol: WqlProtocol,
        connector_id: &str,
    ) -> CriterionTestResult {
        if wql.query.trim().is_empty() {
            return CriterionTestResult::failure(format!(
                "Malformed {} criterion: no query",
                criterion.criterion_type()
            ));
        }
        if wql.is_automatic_namespace() {
            return self
                .automatic_namespace(wql, protocol, connector_id)
                .await;
        }
        self.delegate(criterion, connector_id).await
    }

    async fn process_criterion(&self, criterion: &ProcessCriterion) -> CriterionTestResult {
        if criterion.command_line.trim().is_empty() {
            return CriterionTestResult::success("Process criterion has no command line, skipped");
        }
        if !self.telemetry.host_properties().is_localhost() {
            return CriterionTestResult::success("Process criterion only runs locally, skipped");
        }
        if System::name().is_none() {
            return CriterionTestResult::success("Local OS unknown, process criterion skipped");
        }

        let regex = match RegexBuilder::new(&criterion.command_line)
            .case_insensitive(true)
            .build()
        {
            Ok(regex) => regex,
            Err(e) => {
                return CriterionTestResult::error(
                    format!("Invalid process pattern {}", criterion.command_line),
                    e,
                );
            }
        };

        let command_lines = match tokio::task::spawn_blocking(running_command_lines).await {
            Ok(lines) => lines,
            Err(e) => return CriterionTestResult::error("Cannot list processes", e),
        };

        match command_lines.iter().find(|line| regex.is_match(line)) {
            Some(line) => CriterionTestResult::success(format!(
                "Process matching {} is running",
                criterion.command_line
            ))
            .with_result(line.clone()),
            None => CriterionTestResult::failure(format!(
                "No running process matches {}",
                criterion.command_line
            )),
        }
    }
}

/// Keep/exclude test on the host's device kind
pub fn device_type(criterion: &DeviceTypeCriterion, kind: DeviceKind) -> CriterionTestResult {
    if criterion.keep.contains(&kind) {
        return CriterionTestResult::success(format!("Device kind {kind} is kept"));
    }
    if criterion.exclude.contains(&kind) {
        return CriterionTestResult::failure(format!("Device kind {kind} is excluded"));
    }
    if criterion.keep.is_empty() {
        CriterionTestResult::success(format!("Device kind {kind} is not excluded"))
    } else {
        CriterionTestResult::failure(format!("Device kind {kind} is not in the kept kinds"))
    }
}

/// Minimum engine version test
pub fn product_requirements(
    criterion: &ProductRequirementsCriterion,
    engine_version: &semver::Version,
) -> CriterionTestResult {
    let Some(required) = criterion
        .engine_version
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    else {
        return CriterionTestResult::success("No engine version required");
    };

    match parse_lenient_version(required) {
        Some(minimum) if *engine_version >= minimum => CriterionTestResult::success(format!(
            "Engine {engine_version} satisfies {minimum}"
        )),
        Some(minimum) => CriterionTestResult::failure(format!(
            "Engine {engine_version} is older than required {minimum}"
        )),
        None => CriterionTestResult::failure(format!("Invalid required engine version {required}")),
    }
}

/// Parse `1`, `1.2` or `1.2.3`, padding missing components with zeros
pub fn parse_lenient_version(version: &str) -> Option<semver::Version> {
    let version = version.trim().trim_start_matches(['v', 'V']);
    if let Ok(parsed) = semver::Version::parse(version) {
        return Some(parsed);
    }
    let mut parts = version
        .split('.')
        .map(|p| p.trim().parse::<u64>().ok());
    let major = parts.next().flatten()?;
    let minor = parts.next().unwrap_or(Some(0))?;
    let patch = parts.next().unwrap_or(Some(0))?;
    if parts.next().is_some() {
        return None;
    }
    Some(semver::Version::new(major, minor, patch))
}

fn running_command_lines() -> Vec<String> {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
    );
    system
        .processes()
        .values()
        .map(|process| {
            let cmd: Vec<String> = process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect();
            if cmd.is_empty() {
                process.name().to_string_lossy().into_owned()
            } else {
                cmd.join(" ")
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExtensionRegistry;
    use crate::extension::{ExtensionError, ProtocolExtension};
    use async_trait::async_trait;
    use iw_config::{IpmiProtocol, ProtocolConfig, WmiProtocol};
    use iw_connector::criterion::{CommandLineCriterion, IpmiCriterion, SnmpCriterion};
    use iw_connector::{CriterionType, Source, SourceType};
    use iw_telemetry::{HostConfiguration, MetricDefinitions, SourceTable};
    use std::collections::{BTreeSet, HashSet};
    use std::sync::{Arc, Mutex};

    fn kinds(kinds: &[DeviceKind]) -> BTreeSet<DeviceKind> {
        kinds.iter().copied().collect()
    }

    fn telemetry(hostname: &str, kind: DeviceKind) -> TelemetryManager {
        TelemetryManager::new(
            HostConfiguration::new("h", hostname, kind),
            Arc::new(MetricDefinitions::builtin()),
        )
    }

    #[test]
    fn test_device_type_keep_and_exclude() {
        let keep_linux = DeviceTypeCriterion {
            keep: kinds(&[DeviceKind::Linux]),
            exclude: BTreeSet::new(),
        };
        assert!(device_type(&keep_linux, DeviceKind::Linux).success);
        assert!(!device_type(&keep_linux, DeviceKind::Windows).success);

        let exclude_windows = DeviceTypeCriterion {
            keep: BTreeSet::new(),
            exclude: kinds(&[DeviceKind::Windows]),
        };
        assert!(device_type(&exclude_windows, DeviceKind::Linux).success);
        assert!(!device_type(&exclude_windows, DeviceKind::Windows).success);

        assert!(device_type(&DeviceTypeCriterion::default(), DeviceKind::Other).success);
    }

    #[test]
    fn test_device_type_keep_wins_over_exclude() {
        let both = DeviceTypeCriterion {
            keep: kinds(&[DeviceKind::Linux]),
            exclude: kinds(&[DeviceKind::Linux]),
        };
        assert!(device_type(&both, DeviceKind::Linux).success);
    }

    #[test]
    fn test_product_requirements_semantic_compare() {
        let engine = semver::Version::new(1, 10, 0);
        let requires = |v: &str| ProductRequirementsCriterion {
            engine_version: Some(v.to_string()),
            km_version: None,
        };

        assert!(product_requirements(&ProductRequirementsCriterion::default(), &engine).success);
        assert!(product_requirements(&requires("1.9"), &engine).success);
        assert!(product_requirements(&requires("1.10.0"), &engine).success);
        assert!(!product_requirements(&requires("1.11"), &engine).success);
        assert!(!product_requirements(&requires("2"), &engine).success);
        assert!(!product_requirements(&requires("latest"), &engine).success);
    }

    #[test]
    fn test_parse_lenient_version() {
        assert_eq!(parse_lenient_version("3"), Some(semver::Version::new(3, 0, 0)));
        assert_eq!(parse_lenient_version("v1.2"), Some(semver::Version::new(1, 2, 0)));
        assert_eq!(parse_lenient_version("1.2.3.4"), None);
        assert_eq!(parse_lenient_version("1.x"), None);
    }

    #[tokio::test]
    async fn test_missing_extension_is_failure() {
        let ctx = EngineContext::new(ExtensionRegistry::new());
        let telemetry = telemetry("switch.invalid", DeviceKind::Network);
        let processor = CriterionProcessor::new(&ctx, &telemetry);

        let result = processor
            .process(
                &Criterion::SnmpGet(SnmpCriterion {
                    oid: "1.3.6.1.2.1.1.1.0".to_string(),
                    expected_result: None,
                    error_message: None,
                }),
                "conn",
            )
            .await;
        assert!(!result.success);
        assert!(result.message.contains("snmpGet"));
    }

    #[tokio::test]
    async fn test_malformed_criteria_fail() {
        let ctx = EngineContext::new(ExtensionRegistry::new());
        let telemetry = telemetry("server.invalid", DeviceKind::Windows);
        let processor = CriterionProcessor::new(&ctx, &telemetry);

        let no_query = processor
            .process(&Criterion::Wmi(WqlCriterion::new("  ", "root/cimv2")), "conn")
            .await;
        assert!(!no_query.success);
        assert!(no_query.message.contains("no query"));

        let no_command = processor
            .process(
                &Criterion::CommandLine(CommandLineCriterion {
                    command_line: String::new(),
                    expected_result: None,
                    execute_locally: false,
                    timeout_secs: None,
                    error_message: None,
                }),
                "conn",
            )
            .await;
        assert!(!no_command.success);
    }

    /// Answers WMI and IPMI criteria, recording each as `type@namespace`
    #[derive(Default)]
    struct Bmc {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProtocolExtension for Bmc {
        fn identifier(&self) -> &'static str {
            "bmc"
        }

        fn is_valid_configuration(&self, config: &ProtocolConfig) -> bool {
            matches!(config, ProtocolConfig::Wmi(_) | ProtocolConfig::Ipmi(_))
        }

        fn supported_sources(&self) -> HashSet<SourceType> {
            HashSet::new()
        }

        fn supported_criteria(&self) -> HashSet<CriterionType> {
            [CriterionType::Wmi, CriterionType::Ipmi].into_iter().collect()
        }

        async fn check_protocol(
            &self,
            _telemetry: &TelemetryManager,
        ) -> Result<Option<bool>, ExtensionError> {
            Ok(Some(true))
        }

        async fn process_source(
            &self,
            _source: &Source,
            _connector_id: &str,
            _telemetry: &TelemetryManager,
        ) -> Result<SourceTable, ExtensionError> {
            Ok(SourceTable::empty())
        }

        async fn process_criterion(
            &self,
            criterion: &Criterion,
            _connector_id: &str,
            _telemetry: &TelemetryManager,
        ) -> Result<CriterionTestResult, ExtensionError> {
            let namespace = criterion
                .as_wql()
                .map(|w| w.namespace.clone())
                .unwrap_or_default();
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}@{namespace}", criterion.criterion_type()));
            Ok(CriterionTestResult::success("answered"))
        }
    }

    fn bmc_host(kind: DeviceKind) -> (Arc<Bmc>, EngineContext, TelemetryManager) {
        let bmc = Arc::new(Bmc::default());
        let mut registry = ExtensionRegistry::new();
        registry.register(bmc.clone());
        let host = HostConfiguration::new("h", "bmc.invalid", kind)
            .with_protocol(ProtocolConfig::Wmi(WmiProtocol::default()))
            .with_protocol(ProtocolConfig::Ipmi(IpmiProtocol::default()));
        let telemetry = TelemetryManager::new(host, Arc::new(MetricDefinitions::builtin()));
        (bmc, EngineContext::new(registry), telemetry)
    }

    #[tokio::test]
    async fn test_ipmi_on_windows_queries_wmi_hardware_namespace() {
        let (bmc, ctx, telemetry) = bmc_host(DeviceKind::Windows);
        let result = CriterionProcessor::new(&ctx, &telemetry)
            .process(&Criterion::Ipmi(IpmiCriterion::default()), "conn")
            .await;
        assert!(result.success);
        assert_eq!(*bmc.seen.lock().unwrap(), vec!["wmi@root/hardware"]);
    }

    #[tokio::test]
    async fn test_ipmi_delegated_for_linux_solaris_and_oob() {
        for kind in [DeviceKind::Linux, DeviceKind::Solaris, DeviceKind::Oob] {
            let (bmc, ctx, telemetry) = bmc_host(kind);
            let result = CriterionProcessor::new(&ctx, &telemetry)
                .process(&Criterion::Ipmi(IpmiCriterion::default()), "conn")
                .await;
            assert!(result.success, "{kind}");
            assert_eq!(*bmc.seen.lock().unwrap(), vec!["ipmi@"], "{kind}");
        }
    }

    #[tokio::test]
    async fn test_ipmi_unsupported_kind() {
        let ctx = EngineContext::new(ExtensionRegistry::new());
        let telemetry = telemetry("array.invalid", DeviceKind::Storage);
        let result = CriterionProcessor::new(&ctx, &telemetry)
            .process(&Criterion::Ipmi(IpmiCriterion::default()), "conn")
            .await;
        assert!(!result.success);
        assert!(result.message.contains("not supported"));
    }

    #[tokio::test]
    async fn test_process_criterion_skipped_remotely() {
        let ctx = EngineContext::new(ExtensionRegistry::new());
        let telemetry = telemetry("remote-17.invalid", DeviceKind::Linux);
        let result = CriterionProcessor::new(&ctx, &telemetry)
            .process(
                &Criterion::Process(ProcessCriterion {
                    command_line: "no-such-daemon".to_string(),
                }),
                "conn",
            )
            .await;
        assert!(result.success);
        assert!(result.message.contains("skipped"));
    }

    #[tokio::test]
    async fn test_process_criterion_locally() {
        let ctx = EngineContext::new(ExtensionRegistry::new());
        let telemetry = telemetry("localhost", DeviceKind::Linux);
        let processor = CriterionProcessor::new(&ctx, &telemetry);

        let missing = processor
            .process(
                &Criterion::Process(ProcessCriterion {
                    command_line: "no-such-daemon-4f1c9a".to_string(),
                }),
                "conn",
            )
            .await;
        assert!(!missing.success);

        let empty = processor
            .process(
                &Criterion::Process(ProcessCriterion {
                    command_line: String::new(),
                }),
                "conn",
            )
            .await;
        assert!(empty.success);
    }
}
