//! File extension: `file` sources
//!
//! Log mode tails each file from the position reached at the previous poll,
//! stored as a `FileOffset` cursor in the connector namespace. Rotation
//! (new inode) or truncation restarts from the beginning. Flat mode reads
//! the whole file every poll.

use async_trait::async_trait;
use iw_config::ProtocolConfig;
use iw_connector::source::FileMode;
use iw_connector::{Criterion, CriterionType, Source, SourceKind, SourceType};
use iw_telemetry::{Cursor, SourceTable, TelemetryManager};
use std::collections::HashSet;
use tracing::{debug, instrument, warn};

use crate::executor::Executor;
use crate::extension::{CriterionTestResult, ExtensionError, ProtocolExtension};
use crate::extensions::reaches_host;

/// Default cap on the bytes read from one file per poll
pub const DEFAULT_MAX_SIZE_PER_POLL: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Default)]
pub struct FileExtension;

impl FileExtension {
    pub fn new() -> Self {
        Self
    }

    /// New lines of one file since the last poll
    async fn tail(
        &self,
        executor: &Executor,
        path: &str,
        cursor_key: &str,
        max_size: u64,
        connector_id: &str,
        telemetry: &TelemetryManager,
    ) -> Result<String, ExtensionError> {
        let timeout = telemetry.host_configuration().job_timeout;
        let stat = executor.stat(path, timeout).await?;
        if !stat.exists {
            debug!(path, "File not found, nothing to read");
            return Ok(String::new());
        }

        let start = telemetry
            .cursor(connector_id, cursor_key)
            .map_or(0, |cursor| cursor.resume_offset(stat.inode, stat.size));
        if start >= stat.size {
            telemetry.set_cursor(connector_id, cursor_key, Cursor::file_offset(stat.inode, start));
            return Ok(String::new());
        }

        let bytes = executor
            .read_file_range(path, start, Some(max_size), timeout)
            .await?;

        // A partial last line waits for the next poll, unless the cap cut
        // a line longer than the cap itself
        let consumed = match bytes.iter().rposition(|b| *b == b'\n') {
            Some(last_newline) => last_newline + 1,
            None if bytes.len() as u64 >= max_size => bytes.len(),
            None => 0,
        };

        telemetry.set_cursor(
            connector_id,
            cursor_key,
            Cursor::file_offset(stat.inode, start + consumed as u64),
        );
        debug!(path, start, consumed, "File tailed");
        Ok(String::from_utf8_lossy(&bytes[..consumed]).into_owned())
    }

    async fn read_whole(
        &self,
        executor: &Executor,
        path: &str,
        max_size: u64,
        telemetry: &TelemetryManager,
    ) -> Result<String, ExtensionError> {
        let timeout = telemetry.host_configuration().job_timeout;
        match executor.read_file_range(path, 0, Some(max_size), timeout).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(ExtensionError::FileNotFound(_)) => Ok(String::new()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ProtocolExtension for FileExtension {
    fn identifier(&self) -> &'static str {
        "file"
    }

    fn is_valid_configuration(&self, config: &ProtocolConfig) -> bool {
        matches!(config, ProtocolConfig::Ssh(_))
    }

    fn supported_sources(&self) -> HashSet<SourceType> {
        [SourceType::File].into_iter().collect()
    }

    fn supported_criteria(&self) -> HashSet<CriterionType> {
        HashSet::new()
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
        let executor = Executor::for_host(telemetry, false)?;
        let output = executor
            .run("test -r /", telemetry.host_configuration().job_timeout)
            .await?;
        Ok(Some(output.success()))
    }

    #[instrument(skip(self, source, telemetry), fields(source_key = %source.key))]
    async fn process_source(
        &self,
        source: &Source,
        connector_id: &str,
        telemetry: &TelemetryManager,
    ) -> Result<SourceTable, ExtensionError> {
        let SourceKind::File(file) = &source.kind else {
            return Err(ExtensionError::Unsupported(format!(
                "{} source",
                source.source_type()
            )));
        };
        let executor = Executor::for_host(telemetry, false)?;
        let max_size = file.max_size_per_poll.unwrap_or(DEFAULT_MAX_SIZE_PER_POLL).max(1);

        let mut raw = String::new();
        for path in &file.paths {
            let read = match file.mode {
                FileMode::Log => {
                    let cursor_key = cursor_key(&source.key, path);
                    self.tail(&executor, path, &cursor_key, max_size, connector_id, telemetry)
                        .await
                }
                FileMode::Flat => self.read_whole(&executor, path, max_size, telemetry).await,
            };
            match read {
                Ok(text) => raw.push_str(&text),
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to read file");
                    if file.paths.len() == 1 {
                        return Err(e);
                    }
                }
            }
        }

        Ok(to_table(raw))
    }

    async fn process_criterion(
        &self,
        criterion: &Criterion,
        _connector_id: &str,
        _telemetry: &TelemetryManager,
    ) -> Result<CriterionTestResult, ExtensionError> {
        Err(ExtensionError::Unsupported(format!(
            "{} criterion",
            criterion.criterion_type()
        )))
    }
}

fn cursor_key(source_key: &str, path: &str) -> String {
    format!("{source_key}|{path}")
}

fn to_table(raw: String) -> SourceTable {
    let rows = raw
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(|line| vec![line.to_string()])
        .collect();
    SourceTable::from_rows(rows).with_raw_data(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use iw_config::DeviceKind;
    use iw_connector::source::FileSource;
    use iw_telemetry::{HostConfiguration, MetricDefinitions};
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn local() -> TelemetryManager {
        TelemetryManager::new(
            HostConfiguration::new("local", "localhost", DeviceKind::Linux),
            Arc::new(MetricDefinitions::builtin()),
        )
    }

    fn source(path: &std::path::Path, mode: FileMode, max: Option<u64>) -> Source {
        Source::new(
            "${source::monitors.log.collect.sources.source(1)}",
            SourceKind::File(FileSource {
                paths: vec![path.to_string_lossy().into_owned()],
                mode,
                max_size_per_poll: max,
            }),
        )
    }

    fn append(path: &std::path::Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    fn lines(table: &SourceTable) -> Vec<&str> {
        table.table.iter().map(|r| r[0].as_str()).collect()
    }

    #[tokio::test]
    async fn test_log_mode_reads_only_new_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("messages");
        append(&path, "boot\ndisk ok\n");

        let ext = FileExtension::new();
        let telemetry = local();
        let src = source(&path, FileMode::Log, None);

        let first = ext.process_source(&src, "conn", &telemetry).await.unwrap();
        assert_eq!(lines(&first), vec!["boot", "disk ok"]);

        let nothing = ext.process_source(&src, "conn", &telemetry).await.unwrap();
        assert!(nothing.table.is_empty());

        append(&path, "disk failed\npartial");
        let second = ext.process_source(&src, "conn", &telemetry).await.unwrap();
        assert_eq!(lines(&second), vec!["disk failed"]);

        append(&path, " line\n");
        let third = ext.process_source(&src, "conn", &telemetry).await.unwrap();
        assert_eq!(lines(&third), vec!["partial line"]);
    }

    #[tokio::test]
    async fn test_log_mode_restarts_after_truncation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "one\ntwo\nthree\n");

        let ext = FileExtension::new();
        let telemetry = local();
        let src = source(&path, FileMode::Log, None);
        ext.process_source(&src, "conn", &telemetry).await.unwrap();

        std::fs::write(&path, "new\n").unwrap();
        let table = ext.process_source(&src, "conn", &telemetry).await.unwrap();
        assert_eq!(lines(&table), vec!["new"]);
    }

    #[tokio::test]
    async fn test_log_mode_cap_per_poll() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.log");
        append(&path, "aaaa\nbbbb\ncccc\n");

        let ext = FileExtension::new();
        let telemetry = local();
        let src = source(&path, FileMode::Log, Some(12));

        let first = ext.process_source(&src, "conn", &telemetry).await.unwrap();
        assert_eq!(lines(&first), vec!["aaaa", "bbbb"]);
        let second = ext.process_source(&src, "conn", &telemetry).await.unwrap();
        assert_eq!(lines(&second), vec!["cccc"]);
    }

    #[tokio::test]
    async fn test_flat_mode_reads_everything_each_poll() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status");
        append(&path, "fan1;ok\nfan2;ok\n");

        let ext = FileExtension::new();
        let telemetry = local();
        let src = source(&path, FileMode::Flat, None);

        for _ in 0..2 {
            let table = ext.process_source(&src, "conn", &telemetry).await.unwrap();
            assert_eq!(lines(&table), vec!["fan1;ok", "fan2;ok"]);
            assert_eq!(table.raw_data.as_deref(), Some("fan1;ok\nfan2;ok\n"));
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.log");
        let ext = FileExtension::new();
        let telemetry = local();

        for mode in [FileMode::Log, FileMode::Flat] {
            let table = ext
                .process_source(&source(&path, mode, None), "conn", &telemetry)
                .await
                .unwrap();
            assert!(table.table.is_empty());
        }
    }
}
