mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::{LabExtension, connector, context, init_tracing, lab_host, telemetry};
use iw_config::DeviceKind;
use iw_connector::criterion::DeviceTypeCriterion;
use iw_connector::{ConnectorStore, Criterion};
use iw_engine::{CriterionProcessor, EngineContext, HostMonitoringCycle};
use iw_telemetry::{HostConfiguration, MetricDefinitions};
use serde_json::json;

fn device_type(keep: &[DeviceKind], exclude: &[DeviceKind]) -> Criterion {
    Criterion::DeviceType(DeviceTypeCriterion {
        keep: keep.iter().copied().collect::<BTreeSet<_>>(),
        exclude: exclude.iter().copied().collect::<BTreeSet<_>>(),
    })
}

async fn evaluate(criterion: &Criterion, kind: DeviceKind) -> bool {
    let ctx = EngineContext::default();
    let telemetry = telemetry(
        HostConfiguration::new("h", "server.invalid", kind),
        MetricDefinitions::builtin(),
    );
    CriterionProcessor::new(&ctx, &telemetry)
        .process(criterion, "conn")
        .await
        .success
}

#[tokio::test]
async fn test_device_type_keep_and_exclude() {
    init_tracing();
    let keep_linux = device_type(&[DeviceKind::Linux], &[]);
    assert!(evaluate(&keep_linux, DeviceKind::Linux).await);
    assert!(!evaluate(&keep_linux, DeviceKind::Windows).await);

    let exclude_windows = device_type(&[], &[DeviceKind::Windows]);
    assert!(evaluate(&exclude_windows, DeviceKind::Linux).await);
    assert!(!evaluate(&exclude_windows, DeviceKind::Windows).await);
}

const STATUS_OID: &str = "1.3.6.1.4.1.674.10892.1.300.10.1";

fn chassis_connector() -> serde_json::Value {
    let states = json!({"type": {"stateSet": ["ok", "degraded", "failed"]}});
    json!({
        "id": "DellChassis",
        "detection": {
            "criteria": [{"type": "snmpGetNext", "oid": STATUS_OID}]
        },
        "metrics": {
            "status": states.clone(),
            "intrusionStatus": states,
            "energyUsage": {"unit": "J", "type": "counter"}
        },
        "monitors": [{
            "type": "enclosure",
            "discovery": {
                "sources": [{"type": "snmpTable", "oid": STATUS_OID, "selectColumns": "ID,4,5,30,47"}],
                "mapping": {
                    "source": "${source::monitors.enclosure.discovery.sources.source(1)}",
                    "attributes": {"id": "$1", "serialNumber": "$1"},
                    "metrics": {
                        "status": "$2",
                        "intrusionStatus": "$4",
                        "energyUsage": "$5"
                    },
                    "legacyTextParameters": {"statusInformation": "$3"}
                }
            }
        }]
    })
}

#[tokio::test]
async fn test_snmp_table_to_monitor_metrics() {
    init_tracing();
    let lab = Arc::new(
        LabExtension::new().with_table(STATUS_OID, &[&["1.1", "OK", "Operable", "OK", "15000"]]),
    );
    let store = Arc::new(ConnectorStore::from_connectors([connector(chassis_connector())]));
    let definitions = MetricDefinitions::with_connectors(&store);
    let cycle = HostMonitoringCycle::new(
        Arc::new(context(lab)),
        store,
        Arc::new(telemetry(lab_host("idrac-01.invalid", DeviceKind::Oob), definitions)),
    );

    let summary = cycle.run().await;
    assert_eq!(summary.detected_count(), 1);

    let telemetry = cycle.telemetry();
    let id = telemetry
        .find_monitor_id("DellChassis", "enclosure", "1.1")
        .expect("enclosure monitor");
    let monitor = telemetry.monitor(&id).unwrap();

    let status = monitor.metric("status").and_then(|m| m.as_state_set()).unwrap();
    assert!(status.value.eq_ignore_ascii_case("OK"));
    let intrusion = monitor
        .metric("intrusionStatus")
        .and_then(|m| m.as_state_set())
        .unwrap();
    assert!(intrusion.value.eq_ignore_ascii_case("OK"));
    let energy = monitor.metric("energyUsage").and_then(|m| m.as_number()).unwrap();
    assert_eq!(energy.value, 15000.0);

    assert_eq!(monitor.attribute("serialNumber"), Some("1.1"));
    assert_eq!(
        monitor.legacy_text_parameters.get("statusInformation").map(String::as_str),
        Some("Operable")
    );
}

#[tokio::test]
async fn test_failed_criterion_skips_connector_jobs() {
    init_tracing();
    let lab = Arc::new(LabExtension::new());
    let store = Arc::new(ConnectorStore::from_connectors([connector(chassis_connector())]));
    let cycle = HostMonitoringCycle::new(
        Arc::new(context(lab.clone())),
        store,
        Arc::new(telemetry(
            lab_host("switch-01.invalid", DeviceKind::Network),
            MetricDefinitions::builtin(),
        )),
    );

    let summary = cycle.run().await;
    assert_eq!(summary.detected_count(), 0);
    assert_eq!(lab.source_calls(), 0);
    assert!(!cycle.telemetry().is_connector_status_ok("DellChassis"));
    assert!(
        cycle
            .telemetry()
            .find_monitor_id("DellChassis", "enclosure", "1.1")
            .is_none()
    );
}
