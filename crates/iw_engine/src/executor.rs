//! Command execution for the built-in extensions
//!
//! Commands run through `sh -c` on the agent host, or through the `ssh`
//! client on the monitored host. File tailing is built on the same
//! primitive so it works identically in both modes.

use iw_config::{ProtocolConfig, ProtocolKind, SshProtocol};
use iw_telemetry::TelemetryManager;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::extension::ExtensionError;

/// Where commands run
#[derive(Debug, Clone)]
pub struct Executor {
    remote: Option<RemoteShell>,
}

/// SSH target for remote execution
#[derive(Debug, Clone)]
pub struct RemoteShell {
    pub host: String,
    pub user: String,
    pub key_path: Option<String>,
    pub port: u16,
}

impl RemoteShell {
    pub fn from_protocol(host: impl Into<String>, ssh: &SshProtocol) -> Self {
        Self {
            host: host.into(),
            user: ssh.username.clone(),
            key_path: ssh
                .key_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            port: ssh.port,
        }
    }
}

/// Output from command execution
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Inode and size of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub inode: u64,
    pub size: u64,
    pub exists: bool,
}

impl Executor {
    #[must_use]
    pub fn local() -> Self {
        Self { remote: None }
    }

    #[must_use]
    pub fn remote(shell: RemoteShell) -> Self {
        Self {
            remote: Some(shell),
        }
    }

    /// Executor for a host: local when the host is the agent machine or the
    /// caller asks for local execution, SSH otherwise.
    pub fn for_host(
        telemetry: &TelemetryManager,
        execute_locally: bool,
    ) -> Result<Self, ExtensionError> {
        if execute_locally || telemetry.host_properties().is_localhost() {
            return Ok(Self::local());
        }
        let host = telemetry.host_configuration();
        match host.protocol(ProtocolKind::Ssh) {
            Some(ProtocolConfig::Ssh(ssh)) => {
                Ok(Self::remote(RemoteShell::from_protocol(&host.hostname, ssh)))
            }
            _ => Err(ExtensionError::NotConfigured(format!(
                "ssh for {}",
                host.hostname
            ))),
        }
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.remote.is_none()
    }

    /// Run a command with timeout
    #[instrument(skip(self))]
    pub async fn run(&self, cmd: &str, timeout: Duration) -> Result<CommandOutput, ExtensionError> {
        match &self.remote {
            None => self.run_local(cmd, timeout).await,
            Some(shell) => self.run_remote(cmd, timeout, shell).await,
        }
    }

    /// Inode and size of a file; a missing file is reported, not an error
    #[instrument(skip(self))]
    pub async fn stat(&self, path: &str, timeout: Duration) -> Result<FileStat, ExtensionError> {
        // GNU stat first, BSD stat as fallback
        let cmd = format!(
            "stat -c '%i %s' {} 2>/dev/null || stat -f '%i %z' {} 2>/dev/null",
            shell_escape(path),
            shell_escape(path)
        );
        let output = self.run(&cmd, timeout).await?;

        if !output.success() || output.stdout.trim().is_empty() {
            return Ok(FileStat {
                inode: 0,
                size: 0,
                exists: false,
            });
        }

        let parts: Vec<&str> = output.stdout.split_whitespace().collect();
        let [inode, size, ..] = parts.as_slice() else {
            warn!(output = %output.stdout, "Unexpected stat output format");
            return Err(ExtensionError::ParseError(
                "Unexpected stat output format".to_string(),
            ));
        };

        let inode: u64 = inode
            .parse()
            .map_err(|e| ExtensionError::ParseError(format!("Invalid inode: {e}")))?;
        let size: u64 = size
            .parse()
            .map_err(|e| ExtensionError::ParseError(format!("Invalid size: {e}")))?;

        Ok(FileStat {
            inode,
            size,
            exists: true,
        })
    }

    /// Read at most `max_bytes` of a file starting at a byte offset
    #[instrument(skip(self))]
    pub async fn read_file_range(
        &self,
        path: &str,
        offset: u64,
        max_bytes: Option<u64>,
        timeout: Duration,
    ) -> Result<Vec<u8>, ExtensionError> {
        // tail uses 1-based byte positions
        let mut cmd = format!("tail -c +{} {}", offset + 1, shell_escape(path));
        if let Some(max) = max_bytes {
            cmd.push_str(&format!(" | head -c {max}"));
        }
        let output = self.run(&cmd, timeout).await?;
        if !output.success() {
            if output.stderr.contains("No such file") {
                return Err(ExtensionError::FileNotFound(path.to_string()));
            }
            return Err(ExtensionError::ExecutionError(output.stderr));
        }
        Ok(output.stdout.into_bytes())
    }

    async fn run_local(&self, cmd: &str, timeout: Duration) -> Result<CommandOutput, ExtensionError> {
        debug!(cmd = %cmd, "Running local command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExtensionError::ExecutionError(e.to_string()))?;

        wait_with_timeout(child, timeout).await
    }

    async fn run_remote(
        &self,
        cmd: &str,
        timeout: Duration,
        shell: &RemoteShell,
    ) -> Result<CommandOutput, ExtensionError> {
        debug!(cmd = %cmd, host = %shell.host, "Running remote command");

        let mut ssh_cmd = Command::new("ssh");
        if let Some(key) = &shell.key_path {
            ssh_cmd.arg("-i").arg(key);
        }
        if shell.port != 22 {
            ssh_cmd.arg("-p").arg(shell.port.to_string());
        }
        ssh_cmd
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", timeout.as_secs().max(5)))
            .arg(format!("{}@{}", shell.user, shell.host))
            .arg(cmd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = ssh_cmd
            .spawn()
            .map_err(|e| ExtensionError::ExecutionError(e.to_string()))?;

        wait_with_timeout(child, timeout).await
    }
}

async fn wait_with_timeout(
    child: tokio::process::Child,
    timeout: Duration,
) -> Result<CommandOutput, ExtensionError> {
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        }),
        Ok(Err(e)) => Err(ExtensionError::ExecutionError(e.to_string())),
        Err(_) => Err(ExtensionError::Timeout(timeout)),
    }
}

/// Wrap in single quotes, escaping embedded single quotes
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
