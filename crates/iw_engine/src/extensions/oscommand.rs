//! OS command extension: `commandLine` sources and criteria, `service`
//! criteria

use async_trait::async_trait;
use iw_config::{ProtocolConfig, ProtocolKind};
use iw_connector::criterion::{CommandLineCriterion, ServiceCriterion};
use iw_connector::source::CommandLineSource;
use iw_connector::{Criterion, CriterionType, Source, SourceKind, SourceType};
use iw_telemetry::table::split_line;
use iw_telemetry::{SourceTable, TelemetryManager};
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::executor::{Executor, shell_escape};
use crate::extension::{CriterionTestResult, ExtensionError, ProtocolExtension};
use crate::extensions::reaches_host;

const HOSTNAME_MACRO: &str = "%{HOSTNAME}";
const USERNAME_MACRO: &str = "%{USERNAME}";
const SUDO_MACRO: &str = "%{SUDO}";

#[derive(Debug, Clone, Default)]
pub struct OsCommandExtension;

impl OsCommandExtension {
    pub fn new() -> Self {
        Self
    }

    async fn run(
        &self,
        telemetry: &TelemetryManager,
        command_line: &str,
        execute_locally: bool,
        timeout_secs: Option<u64>,
    ) -> Result<crate::executor::CommandOutput, ExtensionError> {
        let executor = Executor::for_host(telemetry, execute_locally)?;
        let command = expand_macros(command_line, telemetry);
        let timeout = command_timeout(telemetry, timeout_secs);
        executor.run(&command, timeout).await
    }

    async fn command_line_criterion(
        &self,
        criterion: &CommandLineCriterion,
        telemetry: &TelemetryManager,
    ) -> Result<CriterionTestResult, ExtensionError> {
        let output = self
            .run(
                telemetry,
                &criterion.command_line,
                criterion.execute_locally,
                criterion.timeout_secs,
            )
            .await?;

        let success = match criterion.expected_result.as_deref().filter(|e| !e.is_empty()) {
            Some(expected) => build_regex(expected)
                .map_err(|e| ExtensionError::ParseError(format!("expectedResult: {e}")))?
                .is_match(&output.stdout),
            None => output.success(),
        };

        let result = if success {
            CriterionTestResult::success(format!("{} succeeded", criterion.command_line))
        } else {
            let message = criterion
                .error_message
                .clone()
                .unwrap_or_else(|| format!("{} did not return the expected result", criterion.command_line));
            CriterionTestResult::failure(message)
        };
        Ok(result.with_result(output.stdout))
    }

    async fn service_criterion(
        &self,
        criterion: &ServiceCriterion,
        telemetry: &TelemetryManager,
    ) -> Result<CriterionTestResult, ExtensionError> {
        let command = format!("systemctl is-active --quiet {}", shell_escape(&criterion.name));
        let output = self.run(telemetry, &command, false, None).await?;
        Ok(if output.success() {
            CriterionTestResult::success(format!("Service {} is running", criterion.name))
        } else {
            CriterionTestResult::failure(format!("Service {} is not running", criterion.name))
        })
    }
}

#[async_trait]
impl ProtocolExtension for OsCommandExtension {
    fn identifier(&self) -> &'static str {
        "oscommand"
    }

    fn is_valid_configuration(&self, config: &ProtocolConfig) -> bool {
        matches!(config, ProtocolConfig::Ssh(_))
    }

    fn supported_sources(&self) -> HashSet<SourceType> {
        [SourceType::CommandLine].into_iter().collect()
    }

    fn supported_criteria(&self) -> HashSet<CriterionType> {
        [CriterionType::CommandLine, CriterionType::Service]
            .into_iter()
            .collect()
    }

    fn handles_host(&self, telemetry: &TelemetryManager) -> bool {
        reaches_host(telemetry)
    }

    async fn check_protocol(
        &self,
        telemetry: &TelemetryManager,
    ) -> Result<Option<bool>, ExtensionError> {
        if !reaches_host(telemetry) {
            return Ok(None);
        }
        let output = self.run(telemetry, "echo ironwatch", false, None).await?;
        Ok(Some(output.success() && output.stdout.trim() == "ironwatch"))
    }

    #[instrument(skip(self, source, telemetry), fields(source_key = %source.key))]
    async fn process_source(
        &self,
        source: &Source,
        connector_id: &str,
        telemetry: &TelemetryManager,
    ) -> Result<SourceTable, ExtensionError> {
        let SourceKind::CommandLine(command) = &source.kind else {
            return Err(ExtensionError::Unsupported(format!(
                "{} source",
                source.source_type()
            )));
        };

        let output = self
            .run(
                telemetry,
                &command.command_line,
                command.execute_locally,
                command.timeout_secs,
            )
            .await?;
        if !output.success() && output.stdout.trim().is_empty() {
            return Err(ExtensionError::ExecutionError(format!(
                "exit code {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let table = parse_output(&output.stdout, command)?;
        debug!(connector_id, rows = table.len(), "Command output parsed");
        Ok(SourceTable::from_rows(table).with_raw_data(output.stdout))
    }

    async fn process_criterion(
        &self,
        criterion: &Criterion,
        _connector_id: &str,
        telemetry: &TelemetryManager,
    ) -> Result<CriterionTestResult, ExtensionError> {
        match criterion {
            Criterion::CommandLine(c) => self.command_line_criterion(c, telemetry).await,
            Criterion::Service(c) => self.service_criterion(c, telemetry).await,
            other => Err(ExtensionError::Unsupported(format!(
                "{} criterion",
                other.criterion_type()
            ))),
        }
    }
}

/// Replace `%{HOSTNAME}`, `%{USERNAME}` and `%{SUDO}`
pub fn expand_macros(command_line: &str, telemetry: &TelemetryManager) -> String {
    let ssh = match telemetry.host_configuration().protocol(ProtocolKind::Ssh) {
        Some(ProtocolConfig::Ssh(ssh)) => Some(ssh),
        _ => None,
    };
    let username = ssh.map(|s| s.username.as_str()).unwrap_or_default();
    let sudo = ssh
        .and_then(|s| s.sudo_command.as_deref())
        .unwrap_or_default();

    command_line
        .replace(HOSTNAME_MACRO, telemetry.hostname())
        .replace(USERNAME_MACRO, username)
        .replace(SUDO_MACRO, sudo)
}

fn command_timeout(telemetry: &TelemetryManager, timeout_secs: Option<u64>) -> Duration {
    let host = telemetry.host_configuration();
    match timeout_secs {
        Some(secs) => Duration::from_secs(secs),
        None => host
            .protocol(ProtocolKind::Ssh)
            .map(ProtocolConfig::timeout)
            .unwrap_or(host.job_timeout)
            .min(host.job_timeout),
    }
}

fn build_regex(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .build()
}

/// Turn command output into rows: line range, then keep/exclude
/// expressions, then separators and column selection
pub fn parse_output(
    stdout: &str,
    command: &CommandLineSource,
) -> Result<Vec<Vec<String>>, ExtensionError> {
    let keep = command
        .keep_only_regexp
        .as_deref()
        .filter(|p| !p.is_empty())
        .map(build_regex)
        .transpose()
        .map_err(|e| ExtensionError::ParseError(format!("keepOnlyRegExp: {e}")))?;
    let exclude = command
        .exclude_regexp
        .as_deref()
        .filter(|p| !p.is_empty())
        .map(build_regex)
        .transpose()
        .map_err(|e| ExtensionError::ParseError(format!("excludeRegExp: {e}")))?;
    let columns = command
        .select_columns
        .as_deref()
        .map(parse_column_selection)
        .transpose()?;

    let begin = command.begin_at_line_number.unwrap_or(1).max(1);
    let end = command.end_at_line_number.unwrap_or(usize::MAX);
    let separators = command.separators.as_deref().unwrap_or("");

    let rows = stdout
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .enumerate()
        .filter(|(index, _)| (begin..=end).contains(&(index + 1)))
        .map(|(_, line)| line)
        .filter(|line| !line.trim().is_empty())
        .filter(|line| keep.as_ref().is_none_or(|re| re.is_match(line)))
        .filter(|line| exclude.as_ref().is_none_or(|re| !re.is_match(line)))
        .map(|line| {
            let cells = split_line(line, separators);
            match &columns {
                Some(columns) => columns
                    .iter()
                    .map(|c| cells.get(c - 1).cloned().unwrap_or_default())
                    .collect(),
                None => cells,
            }
        })
        .collect();
    Ok(rows)
}

/// Parse `1,3-5` into 1-based column numbers
pub fn parse_column_selection(selection: &str) -> Result<Vec<usize>, ExtensionError> {
    let invalid = || ExtensionError::ParseError(format!("invalid column selection {selection}"));
    let mut columns = Vec::new();
    for part in selection.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((from, to)) => {
                let from: usize = from.trim().parse().map_err(|_| invalid())?;
                let to: usize = to.trim().parse().map_err(|_| invalid())?;
                if from == 0 || to < from {
                    return Err(invalid());
                }
                columns.extend(from..=to);
            }
            None => {
                let column: usize = part.parse().map_err(|_| invalid())?;
                if column == 0 {
                    return Err(invalid());
                }
                columns.push(column);
            }
        }
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use iw_config::{DeviceKind, SshProtocol};
    use iw_telemetry::{HostConfiguration, MetricDefinitions};
    use std::sync::Arc;

    fn local() -> TelemetryManager {
        TelemetryManager::new(
            HostConfiguration::new("local", "localhost", DeviceKind::Linux),
            Arc::new(MetricDefinitions::builtin()),
        )
    }

    fn remote_with_ssh() -> TelemetryManager {
        TelemetryManager::new(
            HostConfiguration::new("r", "remote-17.invalid", DeviceKind::Linux).with_protocol(
                ProtocolConfig::Ssh(SshProtocol {
                    username: "monitor".to_string(),
                    password: None,
                    key_path: None,
                    port: 22,
                    timeout_secs: Some(10),
                    sudo_command: Some("sudo -n".to_string()),
                }),
            ),
            Arc::new(MetricDefinitions::builtin()),
        )
    }

    #[test]
    fn test_expand_macros() {
        assert_eq!(
            expand_macros("%{SUDO} smartctl -d %{USERNAME}@%{HOSTNAME}", &remote_with_ssh()),
            "sudo -n smartctl -d monitor@remote-17.invalid"
        );
        assert_eq!(expand_macros("%{SUDO} lsblk", &local()), " lsblk");
    }

    #[test]
    fn test_parse_output_filters() {
        let mut command = CommandLineSource::new("lsblk");
        command.begin_at_line_number = Some(2);
        command.exclude_regexp = Some("^loop".to_string());
        command.separators = Some(" ".to_string());
        command.select_columns = Some("1,3".to_string());

        let stdout = "NAME RM SIZE\nsda 0 100G\nloop0 0 50M\nsdb 0 200G\n";
        let rows = parse_output(stdout, &command).unwrap();
        assert_eq!(rows, vec![vec!["sda", "100G"], vec!["sdb", "200G"]]);
    }

    #[test]
    fn test_parse_output_keep_only_and_end_line() {
        let mut command = CommandLineSource::new("cat");
        command.keep_only_regexp = Some("^disk".to_string());
        command.end_at_line_number = Some(2);

        let rows = parse_output("disk1\ndisk2\ndisk3\n", &command).unwrap();
        assert_eq!(rows, vec![vec!["disk1"], vec!["disk2"]]);
    }

    #[test]
    fn test_parse_column_selection() {
        assert_eq!(parse_column_selection("1,3-5").unwrap(), vec![1, 3, 4, 5]);
        assert!(parse_column_selection("0").is_err());
        assert!(parse_column_selection("4-2").is_err());
        assert!(parse_column_selection("a").is_err());
    }

    #[tokio::test]
    async fn test_local_command_source() {
        let ext = OsCommandExtension::new();
        let mut command = CommandLineSource::new("printf 'a;1\\nb;2\\n'");
        command.separators = Some(";".to_string());
        let source = Source::new("k", SourceKind::CommandLine(command));

        let table = ext.process_source(&source, "conn", &local()).await.unwrap();
        assert_eq!(table.table, vec![vec!["a", "1"], vec!["b", "2"]]);
        assert_eq!(table.raw_data.as_deref(), Some("a;1\nb;2\n"));
    }

    #[tokio::test]
    async fn test_failing_command_without_output_is_error() {
        let ext = OsCommandExtension::new();
        let source = Source::new("k", SourceKind::CommandLine(CommandLineSource::new("exit 3")));
        let result = ext.process_source(&source, "conn", &local()).await;
        assert!(matches!(result, Err(ExtensionError::ExecutionError(_))));
    }

    #[tokio::test]
    async fn test_command_line_criterion() {
        let ext = OsCommandExtension::new();
        let criterion = |cmd: &str, expected: Option<&str>| {
            Criterion::CommandLine(CommandLineCriterion {
                command_line: cmd.to_string(),
                expected_result: expected.map(str::to_string),
                execute_locally: false,
                timeout_secs: Some(5),
                error_message: Some("not a Linux host".to_string()),
            })
        };

        let ok = ext
            .process_criterion(&criterion("echo Linux", Some("^linux")), "conn", &local())
            .await
            .unwrap();
        assert!(ok.success);
        assert_eq!(ok.result.as_deref(), Some("Linux\n"));

        let ko = ext
            .process_criterion(&criterion("echo SunOS", Some("^linux")), "conn", &local())
            .await
            .unwrap();
        assert!(!ko.success);
        assert_eq!(ko.message, "not a Linux host");

        let exit_code = ext
            .process_criterion(&criterion("false", None), "conn", &local())
            .await
            .unwrap();
        assert!(!exit_code.success);
    }

    #[tokio::test]
    async fn test_handles_host() {
        let ext = OsCommandExtension::new();
        assert!(ext.handles_host(&local()));
        assert!(ext.handles_host(&remote_with_ssh()));

        let unreachable = TelemetryManager::new(
            HostConfiguration::new("r", "remote-17.invalid", DeviceKind::Linux),
            Arc::new(MetricDefinitions::builtin()),
        );
        assert!(!ext.handles_host(&unreachable));
        assert_eq!(ext.check_protocol(&unreachable).await.unwrap(), None);
        assert_eq!(ext.check_protocol(&local()).await.unwrap(), Some(true));
    }
}
