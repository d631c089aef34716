//! Source/compute pipeline
//!
//! Sources of a task run strictly in declaration order so later sources can
//! reference earlier tables by key. Each execution is wrapped the same way:
//! - forced serialization when the source declares it
//! - the job timeout
//! - one retry when a source that produced data last cycle comes back empty
//!
//! Errors never escape: they are logged and become empty tables.

use iw_connector::Source;
use iw_telemetry::{SourceTable, TelemetryManager};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::compute::apply_computes;
use crate::source::execute_source;
use crate::{EngineContext, EngineError, JobInfo};

/// Executions per source: the first try plus one retry
const MAX_ATTEMPTS: usize = 2;

static ATTRIBUTE_PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$\{attribute::([^}]+)\}").ok());

/// Result of one execution attempt
#[derive(Debug)]
struct SourceAttempt {
    table: SourceTable,
    should_retry: bool,
}

impl SourceAttempt {
    fn failed() -> Self {
        Self {
            table: SourceTable::empty(),
            should_retry: false,
        }
    }
}

/// Runs sources and their computes for one host
#[derive(Debug, Clone, Copy)]
pub struct SourcePipeline<'a> {
    ctx: &'a EngineContext,
    telemetry: &'a TelemetryManager,
}

impl<'a> SourcePipeline<'a> {
    pub fn new(ctx: &'a EngineContext, telemetry: &'a TelemetryManager) -> Self {
        Self { ctx, telemetry }
    }

    /// Run `sources` in order, storing every resulting table in the
    /// connector namespace. `attributes` fill `${attribute::name}`
    /// placeholders for mono-instance collects.
    #[instrument(skip_all, fields(
        hostname = %job.hostname,
        connector_id = %job.connector_id,
        monitor_type = %job.monitor_type,
        task = %job.task
    ))]
    pub async fn process_sources_and_computes(
        &self,
        sources: &[Source],
        attributes: Option<&BTreeMap<String, String>>,
        job: &JobInfo,
    ) {
        for source in sources {
            self.process_source(source, attributes, job).await;
        }
    }

    /// Run a single source and its computes, store and return the table
    pub async fn process_source(
        &self,
        source: &Source,
        attributes: Option<&BTreeMap<String, String>>,
        job: &JobInfo,
    ) -> SourceTable {
        let previous_non_empty = self
            .telemetry
            .source_table(&job.connector_id, &source.key)
            .is_some_and(|t| !t.is_empty());

        let resolved = match attributes {
            Some(attributes) => substitute_attributes(source, attributes),
            None => source.clone(),
        };

        let mut table = SourceTable::empty();
        for attempt in 1..=MAX_ATTEMPTS {
            let outcome = self.attempt(source, &resolved, previous_non_empty, job).await;
            table = outcome.table;
            if !outcome.should_retry || attempt == MAX_ATTEMPTS {
                break;
            }
            info!(
                hostname = %job.hostname,
                connector_id = %job.connector_id,
                source_key = %source.key,
                "Source returned no data after a previous success, retrying"
            );
        }

        if table.table.is_empty() {
            debug!(source_key = %source.key, "Source produced no rows");
        }

        apply_computes(&mut table, &resolved.computes);
        self.telemetry
            .put_source_table(&job.connector_id, &source.key, table.clone());
        table
    }

    /// One execution. The serialization lock is keyed on the declared
    /// source and held until the attempt returns. Waiting for the lock and
    /// running the source share one job timeout.
    async fn attempt(
        &self,
        declared: &Source,
        resolved: &Source,
        previous_non_empty: bool,
        job: &JobInfo,
    ) -> SourceAttempt {
        let timeout = self.telemetry.host_configuration().job_timeout;
        let deadline = Instant::now() + timeout;

        let _guard = if declared.force_serialization {
            match self.ctx.serialization().acquire_until(declared, deadline).await {
                Some(guard) => Some(guard),
                None => return self.failed(declared, job, &EngineError::LockTimeout(timeout)),
            }
        } else {
            None
        };

        let result =
            tokio::time::timeout_at(deadline, execute_source(self.ctx, self.telemetry, resolved, job))
                .await
                .unwrap_or(Err(EngineError::Timeout(timeout)));

        match result {
            Ok(table) => {
                let should_retry = table.is_empty() && previous_non_empty;
                SourceAttempt {
                    table,
                    should_retry,
                }
            }
            Err(e) => self.failed(declared, job, &e),
        }
    }

    fn failed(&self, declared: &Source, job: &JobInfo, error: &EngineError) -> SourceAttempt {
        warn!(
            hostname = %job.hostname,
            connector_id = %job.connector_id,
            source_key = %declared.key,
            source_type = %declared.source_type(),
            error = %error,
            "Source execution failed"
        );
        SourceAttempt::failed()
    }
}

/// Copy of `source` with `${attribute::name}` placeholders replaced.
/// Unknown attributes are left as written.
pub fn substitute_attributes(source: &Source, attributes: &BTreeMap<String, String>) -> Source {
    let Some(pattern) = ATTRIBUTE_PLACEHOLDER.as_ref() else {
        return source.clone();
    };

    let mut value = match serde_json::to_value(source) {
        Ok(value) => value,
        Err(e) => {
            warn!(source_key = %source.key, error = %e, "Cannot substitute attributes");
            return source.clone();
        }
    };
    replace_strings(&mut value, &|text: &str| {
        pattern
            .replace_all(text, |caps: &regex::Captures<'_>| {
                attributes
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    });

    match serde_json::from_value(value) {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!(source_key = %source.key, error = %e, "Substituted source no longer parses");
            source.clone()
        }
    }
}

fn replace_strings(value: &mut serde_json::Value, f: &dyn Fn(&str) -> String) {
    match value {
        serde_json::Value::String(s) => {
            if s.contains("${attribute::") {
                let replaced = f(s.as_str());
                *s = replaced;
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                replace_strings(item, f);
            }
        }
        serde_json::Value::Object(map) => {
            // Keys are never substituted
            for item in map.values_mut() {
                replace_strings(item, f);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::{CriterionTestResult, ExtensionError, ProtocolExtension};
    use crate::ExtensionRegistry;
    use async_trait::async_trait;
    use iw_config::{DeviceKind, ProtocolConfig, SshProtocol};
    use iw_connector::compute::ArithmeticCompute;
    use iw_connector::source::{CommandLineSource, SourceKind, StaticSource};
    use iw_connector::{Compute, Criterion, CriterionType, SourceType};
    use iw_telemetry::{HostConfiguration, MetricDefinitions};
    use std::collections::{HashSet, VecDeque};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Extension replaying scripted results, one per call
    struct Scripted {
        results: Mutex<VecDeque<Result<SourceTable, ExtensionError>>>,
        calls: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl Scripted {
        fn new(results: Vec<Result<SourceTable, ExtensionError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                calls: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProtocolExtension for Scripted {
        fn identifier(&self) -> &'static str {
            "scripted"
        }

        fn is_valid_configuration(&self, config: &ProtocolConfig) -> bool {
            matches!(config, ProtocolConfig::Ssh(_))
        }

        fn supported_sources(&self) -> HashSet<SourceType> {
            [SourceType::CommandLine].into_iter().collect()
        }

        fn supported_criteria(&self) -> HashSet<CriterionType> {
            HashSet::new()
        }

        async fn check_protocol(
            &self,
            _telemetry: &TelemetryManager,
        ) -> Result<Option<bool>, ExtensionError> {
            Ok(Some(true))
        }

        async fn process_source(
            &self,
            source: &Source,
            _connector_id: &str,
            _telemetry: &TelemetryManager,
        ) -> Result<SourceTable, ExtensionError> {
            if let SourceKind::CommandLine(c) = &source.kind {
                self.calls.lock().unwrap().push(c.command_line.clone());
            }
            tokio::time::sleep(self.delay).await;
            let next = self.results.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(SourceTable::empty()))
        }

        async fn process_criterion(
            &self,
            _criterion: &Criterion,
            _connector_id: &str,
            _telemetry: &TelemetryManager,
        ) -> Result<CriterionTestResult, ExtensionError> {
            Ok(CriterionTestResult::failure("unused"))
        }
    }

    fn setup(extension: Arc<Scripted>, job_timeout: Duration) -> (EngineContext, TelemetryManager) {
        let mut registry = ExtensionRegistry::new();
        registry.register(extension);
        let host = HostConfiguration::new("h", "server.invalid", DeviceKind::Linux)
            .with_protocol(ProtocolConfig::Ssh(SshProtocol {
                username: "monitor".to_string(),
                password: None,
                key_path: None,
                port: 22,
                timeout_secs: None,
                sudo_command: None,
            }))
            .with_job_timeout(job_timeout);
        (
            EngineContext::new(registry),
            TelemetryManager::new(host, Arc::new(MetricDefinitions::builtin())),
        )
    }

    fn command(key: &str, cmd: &str) -> Source {
        Source::new(key, SourceKind::CommandLine(CommandLineSource::new(cmd)))
    }

    fn job() -> JobInfo {
        JobInfo::new("server.invalid", "conn", "disk", "collect")
    }

    #[tokio::test]
    async fn test_sources_run_in_order_and_later_see_earlier() {
        let ext = Arc::new(Scripted::new(vec![]));
        let (ctx, telemetry) = setup(ext, Duration::from_secs(5));
        let pipeline = SourcePipeline::new(&ctx, &telemetry);

        let first = Source::new(
            "${source::one}",
            SourceKind::Static(StaticSource {
                value: "a;2".to_string(),
            }),
        )
        .with_computes(vec![Compute::Multiply(ArithmeticCompute {
            column: 2,
            value: "10".to_string(),
        })]);
        let second = Source::new(
            "${source::two}",
            SourceKind::Copy(iw_connector::source::CopySource {
                from: "${source::one}".to_string(),
            }),
        );

        pipeline
            .process_sources_and_computes(&[first, second], None, &job())
            .await;

        assert_eq!(
            telemetry.source_table("conn", "${source::two}").unwrap().table,
            vec![vec!["a", "20"]]
        );
    }

    #[tokio::test]
    async fn test_empty_source_list_is_noop() {
        let ext = Arc::new(Scripted::new(vec![]));
        let (ctx, telemetry) = setup(ext, Duration::from_secs(5));
        SourcePipeline::new(&ctx, &telemetry)
            .process_sources_and_computes(&[], None, &job())
            .await;
        assert!(telemetry.connector_namespace("conn").source_keys().next().is_none());
    }

    #[tokio::test]
    async fn test_retry_after_previous_success() {
        let ext = Arc::new(Scripted::new(vec![
            Ok(SourceTable::from_csv("x;1")),
            Ok(SourceTable::empty()),
            Ok(SourceTable::from_csv("x;2")),
        ]));
        let (ctx, telemetry) = setup(ext.clone(), Duration::from_secs(5));
        let pipeline = SourcePipeline::new(&ctx, &telemetry);
        let source = command("${source::cmd}", "lsblk");

        pipeline.process_source(&source, None, &job()).await;
        let table = pipeline.process_source(&source, None, &job()).await;

        assert_eq!(ext.calls().len(), 3);
        assert_eq!(table.table, vec![vec!["x", "2"]]);
    }

    #[tokio::test]
    async fn test_no_retry_without_previous_success() {
        let ext = Arc::new(Scripted::new(vec![Ok(SourceTable::empty())]));
        let (ctx, telemetry) = setup(ext.clone(), Duration::from_secs(5));

        let table = SourcePipeline::new(&ctx, &telemetry)
            .process_source(&command("k", "lsblk"), None, &job())
            .await;

        assert_eq!(ext.calls().len(), 1);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_errors_become_empty_without_retry() {
        let ext = Arc::new(Scripted::new(vec![
            Ok(SourceTable::from_csv("x")),
            Err(ExtensionError::ExecutionError("connection reset".to_string())),
        ]));
        let (ctx, telemetry) = setup(ext.clone(), Duration::from_secs(5));
        let pipeline = SourcePipeline::new(&ctx, &telemetry);
        let source = command("k", "lsblk");

        pipeline.process_source(&source, None, &job()).await;
        let table = pipeline.process_source(&source, None, &job()).await;

        assert_eq!(ext.calls().len(), 2);
        assert!(table.table.is_empty());
        assert_eq!(telemetry.source_table("conn", "k"), Some(SourceTable::empty()));
    }

    #[tokio::test]
    async fn test_timeout_becomes_empty() {
        let mut scripted = Scripted::new(vec![Ok(SourceTable::from_csv("late"))]);
        scripted.delay = Duration::from_millis(500);
        let (ctx, telemetry) = setup(Arc::new(scripted), Duration::from_millis(50));

        let table = SourcePipeline::new(&ctx, &telemetry)
            .process_source(&command("k", "sleep"), None, &job())
            .await;
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_raw_data_kept_on_empty_table() {
        let ext = Arc::new(Scripted::new(vec![Ok(
            SourceTable::empty().with_raw_data("header only")
        )]));
        let (ctx, telemetry) = setup(ext, Duration::from_secs(5));

        let table = SourcePipeline::new(&ctx, &telemetry)
            .process_source(&command("k", "cat"), None, &job())
            .await;
        assert!(table.table.is_empty());
        assert_eq!(table.raw_data.as_deref(), Some("header only"));
    }

    #[tokio::test]
    async fn test_attribute_placeholders_are_substituted() {
        let ext = Arc::new(Scripted::new(vec![]));
        let (ctx, telemetry) = setup(ext.clone(), Duration::from_secs(5));
        let attributes: BTreeMap<String, String> =
            [("id".to_string(), "sda".to_string())].into_iter().collect();

        SourcePipeline::new(&ctx, &telemetry)
            .process_source(
                &command("k", "smartctl -H /dev/${attribute::id} ${attribute::unknown}"),
                Some(&attributes),
                &job(),
            )
            .await;

        assert_eq!(ext.calls(), vec!["smartctl -H /dev/sda ${attribute::unknown}"]);
    }
}
