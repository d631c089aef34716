//! Source execution
//!
//! Table-manipulation sources run here against the connector namespace;
//! every other source is dispatched to the protocol extension claiming its
//! type on the host.

use iw_connector::criterion::{AUTOMATIC_NAMESPACE, DEFAULT_NAMESPACE};
use iw_connector::source::{JoinKeyType, TableJoinSource, WqlSource};
use iw_connector::{Source, SourceKind};
use iw_config::{ProtocolConfig, ProtocolKind};
use iw_telemetry::table::{TABLE_SEP, split_line};
use iw_telemetry::{SourceTable, TelemetryManager, WqlProtocol};
use std::collections::HashMap;
use tracing::debug;

use crate::{EngineContext, EngineError, JobInfo};

/// Run one source once, without retry or serialization
pub async fn execute_source(
    ctx: &EngineContext,
    telemetry: &TelemetryManager,
    source: &Source,
    job: &JobInfo,
) -> Result<SourceTable, EngineError> {
    let connector_id = job.connector_id.as_str();
    match &source.kind {
        SourceKind::Copy(copy) => Ok(telemetry
            .source_table(connector_id, &copy.from)
            .unwrap_or_else(|| {
                debug!(connector_id, from = %copy.from, "Copy of unknown source");
                SourceTable::empty()
            })),
        SourceKind::Static(s) => Ok(SourceTable::from_csv(&s.value)),
        SourceKind::TableJoin(join) => Ok(table_join(telemetry, connector_id, join)),
        SourceKind::TableUnion(union) => {
            let table = union
                .tables
                .iter()
                .filter_map(|key| telemetry.source_table(connector_id, key))
                .flat_map(|t| t.table)
                .collect();
            Ok(SourceTable::from_rows(table))
        }
        SourceKind::Wmi(wql) => {
            let resolved = resolve_wql_namespace(telemetry, connector_id, WqlProtocol::Wmi, wql);
            let source = Source {
                kind: SourceKind::Wmi(resolved),
                ..source.clone()
            };
            dispatch(ctx, telemetry, &source, job).await
        }
        SourceKind::Wbem(wql) => {
            let resolved = resolve_wql_namespace(telemetry, connector_id, WqlProtocol::Wbem, wql);
            let source = Source {
                kind: SourceKind::Wbem(resolved),
                ..source.clone()
            };
            dispatch(ctx, telemetry, &source, job).await
        }
        _ => dispatch(ctx, telemetry, source, job).await,
    }
}

async fn dispatch(
    ctx: &EngineContext,
    telemetry: &TelemetryManager,
    source: &Source,
    job: &JobInfo,
) -> Result<SourceTable, EngineError> {
    let source_type = source.source_type();
    let Some(extension) = ctx.extensions().find_for_source(source_type, telemetry) else {
        return Err(EngineError::NoExtension {
            kind: format!("{source_type} source"),
            hostname: job.hostname.clone(),
        });
    };
    debug!(
        hostname = %job.hostname,
        connector_id = %job.connector_id,
        source_key = %source.key,
        extension = extension.identifier(),
        "Dispatching source"
    );
    Ok(extension
        .process_source(source, &job.connector_id, telemetry)
        .await?)
}

/// Namespace a WQL source runs against: the declared one, else the one
/// discovered at detection, else the protocol's configured one, else the
/// default.
fn resolve_wql_namespace(
    telemetry: &TelemetryManager,
    connector_id: &str,
    protocol: WqlProtocol,
    wql: &WqlSource,
) -> WqlSource {
    let declared = wql
        .namespace
        .as_deref()
        .filter(|ns| !ns.eq_ignore_ascii_case(AUTOMATIC_NAMESPACE));
    if declared.is_some() {
        return wql.clone();
    }

    let namespace = telemetry
        .automatic_namespace(connector_id, protocol)
        .or_else(|| configured_namespace(telemetry, protocol))
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

    WqlSource {
        query: wql.query.clone(),
        namespace: Some(namespace),
    }
}

/// Namespace forced by the host's protocol configuration
pub(crate) fn configured_namespace(
    telemetry: &TelemetryManager,
    protocol: WqlProtocol,
) -> Option<String> {
    let host = telemetry.host_configuration();
    match protocol {
        WqlProtocol::Wmi => match host.protocol(ProtocolKind::Wmi) {
            Some(ProtocolConfig::Wmi(wmi)) => wmi.namespace.clone(),
            _ => match host.protocol(ProtocolKind::WinRm) {
                Some(ProtocolConfig::WinRm(winrm)) => winrm.namespace.clone(),
                _ => None,
            },
        },
        WqlProtocol::Wbem => match host.protocol(ProtocolKind::Wbem) {
            Some(ProtocolConfig::Wbem(wbem)) => wbem.namespace.clone(),
            _ => None,
        },
    }
}

fn table_join(telemetry: &TelemetryManager, connector_id: &str, join: &TableJoinSource) -> SourceTable {
    let left = telemetry
        .source_table(connector_id, &join.left_table)
        .unwrap_or_default();
    let right = telemetry
        .source_table(connector_id, &join.right_table)
        .unwrap_or_default();

    if join.left_key_column == 0 || join.right_key_column == 0 {
        debug!(connector_id, "Join key columns are 1-based, empty result");
        return SourceTable::empty();
    }

    let mut right_index: HashMap<String, Vec<&Vec<String>>> = HashMap::new();
    for row in &right.table {
        if let Some(key) = row.get(join.right_key_column - 1) {
            right_index
                .entry(join_key(key, join.key_type))
                .or_default()
                .push(row);
        }
    }

    let default_right = join
        .default_right_line
        .as_deref()
        .map(|line| split_line(line, TABLE_SEP));

    let mut table = Vec::new();
    for left_row in &left.table {
        let Some(key) = left_row.get(join.left_key_column - 1) else {
            continue;
        };
        match right_index.get(&join_key(key, join.key_type)) {
            Some(matches) => {
                for right_row in matches {
                    let mut row = left_row.clone();
                    row.extend(right_row.iter().cloned());
                    table.push(row);
                }
            }
            None => {
                if let Some(default_right) = &default_right {
                    let mut row = left_row.clone();
                    row.extend(default_right.iter().cloned());
                    table.push(row);
                }
            }
        }
    }

    SourceTable::from_rows(table)
}

fn join_key(key: &str, key_type: JoinKeyType) -> String {
    let key = match key_type {
        JoinKeyType::Regular => key,
        // `//host/root/cimv2:Class.Key="x"` compares as `Class.Key="x"`
        JoinKeyType::Wbem => match key.split_once(':') {
            Some((prefix, rest)) if prefix.contains('/') => rest,
            _ => key,
        },
    };
    key.to_lowercase()
}
