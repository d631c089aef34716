//! Connector strategies: detection, discovery, collect and simple jobs
//!
//! A strategy drives one connector on one host. Sources go through the
//! pipeline; mapped rows become monitors (discovery, simple) or metric
//! updates on existing monitors (collect).

use iw_connector::{
    CONNECTOR_MONITOR_TYPE, Collect, CollectType, Connector, Mapping, MonitorJob, Source, TaskKind,
};
use iw_telemetry::{ID_ATTRIBUTE, Monitor, SourceTable, TelemetryManager, build_monitor_id};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, instrument};

use crate::criterion::CriterionProcessor;
use crate::extension::CriterionTestResult;
use crate::mapping::{MappedRow, PARENT_ID_ATTRIBUTE, PARENT_TYPE_ATTRIBUTE, map_row};
use crate::pipeline::SourcePipeline;
use crate::{EngineContext, JobInfo};

/// Result of detecting one connector
#[derive(Debug, Clone, Serialize)]
pub struct DetectionOutcome {
    pub connector_id: String,
    pub success: bool,
    /// Evaluated criteria in order, with their results
    pub criteria: Vec<(String, CriterionTestResult)>,
}

/// Runs one connector against one host
#[derive(Debug, Clone, Copy)]
pub struct ConnectorStrategy<'a> {
    ctx: &'a EngineContext,
    telemetry: &'a TelemetryManager,
    connector: &'a Connector,
}

impl<'a> ConnectorStrategy<'a> {
    pub fn new(
        ctx: &'a EngineContext,
        telemetry: &'a TelemetryManager,
        connector: &'a Connector,
    ) -> Self {
        Self {
            ctx,
            telemetry,
            connector,
        }
    }

    fn pipeline(&self) -> SourcePipeline<'a> {
        SourcePipeline::new(self.ctx, self.telemetry)
    }

    fn job_info(&self, monitor_type: &str, task: &str) -> JobInfo {
        JobInfo::new(
            self.telemetry.hostname(),
            &self.connector.id,
            monitor_type,
            task,
        )
    }

    // ========================================================================
    // Detection
    // ========================================================================

    /// Evaluate criteria in order, stopping at the first failure, and record
    /// the outcome as the connector status.
    #[instrument(skip(self), fields(hostname = %self.telemetry.hostname(), connector_id = %self.connector.id))]
    pub async fn detect(&self) -> DetectionOutcome {
        let processor = CriterionProcessor::new(self.ctx, self.telemetry);
        let criteria = self
            .connector
            .detection
            .as_ref()
            .map(|d| d.effective_criteria())
            .unwrap_or_default();

        let mut evaluated = Vec::with_capacity(criteria.len());
        let mut success = true;
        for criterion in &criteria {
            let result = processor.process(criterion, &self.connector.id).await;
            let passed = result.success;
            evaluated.push((criterion.describe(), result));
            if !passed {
                success = false;
                break;
            }
        }

        self.telemetry
            .set_connector_status(&self.connector.id, success);
        if success {
            info!(criteria = evaluated.len(), "Connector detected");
        } else {
            debug!(criteria = evaluated.len(), "Connector not detected");
        }

        DetectionOutcome {
            connector_id: self.connector.id.clone(),
            success,
            criteria: evaluated,
        }
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    /// Sources shared by every monitor job of the connector
    pub async fn run_pre(&self) {
        if self.connector.pre.is_empty() {
            return;
        }
        let job = self.job_info(CONNECTOR_MONITOR_TYPE, "pre");
        self.pipeline()
            .process_sources_and_computes(&self.connector.pre, None, &job)
            .await;
    }

    /// Discovery of every standard job, in declaration order
    pub async fn discover(&self) {
        for job in self.connector.monitors.iter().filter(|j| !j.is_simple()) {
            if let Some(discovery) = &job.discovery {
                self.run_discovery(job, &discovery.sources, &discovery.mapping, TaskKind::Discovery)
                    .await;
            }
        }
    }

    /// Collect of every standard job, in declaration order
    pub async fn collect(&self) {
        for job in self.connector.monitors.iter().filter(|j| !j.is_simple()) {
            if let Some(collect) = &job.collect {
                self.run_collect(job, collect).await;
            }
        }
    }

    /// Simple jobs discover and collect in one pass
    pub async fn simple(&self) {
        for job in self.connector.monitors.iter() {
            if let Some(simple) = &job.simple {
                self.run_discovery(job, &simple.sources, &simple.mapping, TaskKind::Simple)
                    .await;
            }
        }
    }

    /// Number of monitors discovered or refreshed
    async fn run_discovery(
        &self,
        job: &MonitorJob,
        sources: &[Source],
        mapping: &Mapping,
        task: TaskKind,
    ) -> usize {
        let info = self.job_info(&job.monitor_type, task.as_str());
        self.pipeline()
            .process_sources_and_computes(sources, None, &info)
            .await;

        let table = self.mapped_table(mapping);
        let time = self.telemetry.strategy_time();
        let mut discovered = HashSet::new();

        for row in &table.table {
            let mapped = map_row(mapping, row);
            let Some(device_key) = mapped.attribute(ID_ATTRIBUTE).map(str::to_string) else {
                debug!(monitor_type = %job.monitor_type, "Row without id attribute skipped");
                continue;
            };

            let parent_id = self.parent_monitor_id(&mapped);
            let id = build_monitor_id(
                &self.connector.id,
                &job.monitor_type,
                mapped.attribute(PARENT_ID_ATTRIBUTE),
                &device_key,
            );

            let mut monitor = Monitor::new(id.clone(), job.monitor_type.clone())
                .with_connector(&self.connector.id)
                .with_parent(parent_id)
                .with_attributes(mapped.attributes.clone());
            monitor.legacy_text_parameters = mapped.legacy_text_parameters.clone();
            monitor.discovery_time = time;
            self.telemetry.upsert_monitor(monitor);

            self.collect_metrics(&id, &mapped, time);
            discovered.insert(id);
        }

        debug!(
            monitor_type = %job.monitor_type,
            task = %task,
            count = discovered.len(),
            "Monitors discovered"
        );
        let count = discovered.len();
        self.telemetry
            .refresh_presence(&self.connector.id, &job.monitor_type, &discovered);
        count
    }

    async fn run_collect(&self, job: &MonitorJob, collect: &Collect) {
        let monitor_ids = self
            .telemetry
            .monitor_ids(&self.connector.id, &job.monitor_type);
        if monitor_ids.is_empty() {
            return;
        }
        let info = self.job_info(&job.monitor_type, TaskKind::Collect.as_str());
        let time = self.telemetry.strategy_time();

        match collect.collect_type {
            CollectType::MultiInstance => {
                self.pipeline()
                    .process_sources_and_computes(&collect.sources, None, &info)
                    .await;
                let table = self.mapped_table(&collect.mapping);
                for row in &table.table {
                    let mapped = map_row(&collect.mapping, row);
                    match self.match_monitor(&monitor_ids, &collect.keys, &mapped) {
                        Some(id) => self.collect_metrics(&id, &mapped, time),
                        None => debug!(monitor_type = %job.monitor_type, "Collected row matches no monitor"),
                    }
                }
            }
            CollectType::MonoInstance => {
                for id in &monitor_ids {
                    let Some(attributes) = self
                        .telemetry
                        .monitor(id)
                        .filter(|m| !m.is_missing)
                        .map(|m| m.attributes.clone())
                    else {
                        continue;
                    };
                    self.pipeline()
                        .process_sources_and_computes(&collect.sources, Some(&attributes), &info)
                        .await;
                    let table = self.mapped_table(&collect.mapping);
                    if let Some(row) = table.table.first() {
                        let mapped = map_row(&collect.mapping, row);
                        self.collect_metrics(id, &mapped, time);
                    }
                }
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn mapped_table(&self, mapping: &Mapping) -> SourceTable {
        self.telemetry
            .source_table(&self.connector.id, &mapping.source)
            .unwrap_or_default()
    }

    /// Parent declared by the row, else the host
    fn parent_monitor_id(&self, mapped: &MappedRow) -> String {
        if let (Some(parent_type), Some(parent_key)) = (
            mapped.attribute(PARENT_TYPE_ATTRIBUTE),
            mapped.attribute(PARENT_ID_ATTRIBUTE),
        ) && let Some(parent) =
            self.telemetry
                .find_monitor_id(&self.connector.id, parent_type, parent_key)
        {
            return parent;
        }
        self.telemetry.host_monitor_id().to_string()
    }

    /// Monitor whose attributes equal the row's on every key
    fn match_monitor(
        &self,
        monitor_ids: &[String],
        keys: &[String],
        mapped: &MappedRow,
    ) -> Option<String> {
        if keys.iter().any(|k| mapped.attribute(k).is_none()) {
            return None;
        }
        monitor_ids
            .iter()
            .find(|id| {
                self.telemetry.monitor(id).is_some_and(|m| {
                    keys.iter()
                        .all(|k| m.attribute(k) == mapped.attribute(k))
                })
            })
            .cloned()
    }

    fn collect_metrics(&self, monitor_id: &str, mapped: &MappedRow, time: i64) {
        if mapped.metrics.is_empty() && mapped.legacy_text_parameters.is_empty() {
            return;
        }
        let factory = self.telemetry.metric_factory();
        let Some(mut monitor) = self.telemetry.monitor_mut(monitor_id) else {
            return;
        };
        for (name, value) in &mapped.metrics {
            factory.collect_value(&mut monitor, name, value, time);
        }
        merge_into(&mut monitor.legacy_text_parameters, &mapped.legacy_text_parameters);
    }
}

fn merge_into(target: &mut BTreeMap<String, String>, values: &BTreeMap<String, String>) {
    for (name, value) in values {
        target.insert(name.clone(), value.clone());
    }
}
