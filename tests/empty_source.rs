mod common;

use std::sync::Arc;

use common::{LabExtension, context, init_tracing, lab_host, telemetry};
use iw_config::DeviceKind;
use iw_connector::source::SnmpTableSource;
use iw_connector::{Source, SourceKind};
use iw_engine::{JobInfo, SourcePipeline};
use iw_telemetry::MetricDefinitions;

const OID: &str = "1.3.6.1.4.1.2.3.51.2.2.3.1";

#[tokio::test]
async fn test_empty_result_after_success_is_stored_as_empty_table() {
    init_tracing();
    let lab = Arc::new(LabExtension::new().with_table(OID, &[&["fan-1", "4200"]]));
    let ctx = context(lab.clone());
    let host = telemetry(lab_host("ibm-01.invalid", DeviceKind::Oob), MetricDefinitions::builtin());
    let pipeline = SourcePipeline::new(&ctx, &host);
    let job = JobInfo::new("ibm-01.invalid", "IbmImm", "fan", "collect");

    let source = Source::new(
        "${source::monitors.fan.collect.sources.source(1)}",
        SourceKind::SnmpTable(SnmpTableSource {
            oid: OID.to_string(),
            select_columns: "ID,2".to_string(),
        }),
    );

    let first = pipeline.process_source(&source, None, &job).await;
    assert_eq!(first.row_count(), 1);
    assert_eq!(lab.source_calls(), 1);

    lab.set_table(OID, &[]);
    let second = pipeline.process_source(&source, None, &job).await;
    assert!(second.table.is_empty());
    // one retry after the previous non-empty result
    assert_eq!(lab.source_calls(), 3);

    let stored = host
        .source_table("IbmImm", &source.key)
        .expect("empty result is stored, not dropped");
    assert_eq!(stored.table, Vec::<Vec<String>>::new());
}
