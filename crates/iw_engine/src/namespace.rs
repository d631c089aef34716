//! Automatic WQL namespace discovery
//!
//! A WMI or WBEM criterion declared with the `Automatic` namespace goes
//! through three states per connector and host:
//! - undiscovered: the host's candidate namespaces are enumerated once,
//!   under the per-host, per-protocol lock of `HostProperties`
//! - candidates known: the query is tried against each candidate in order
//! - sticky: the first namespace that answered is stored in the connector
//!   namespace and used directly from then on
//!
//! A failed enumeration leaves the host undiscovered. It is remembered for
//! the rest of the cycle and tried again on the next poll.

use iw_connector::Criterion;
use iw_connector::criterion::WqlCriterion;
use iw_telemetry::{NamespaceCandidates, WqlProtocol};
use tracing::{debug, warn};

use crate::criterion::CriterionProcessor;
use crate::extension::CriterionTestResult;
use crate::source::configured_namespace;

fn wql_criterion(protocol: WqlProtocol, wql: WqlCriterion) -> Criterion {
    match protocol {
        WqlProtocol::Wmi => Criterion::Wmi(wql),
        WqlProtocol::Wbem => Criterion::Wbem(wql),
    }
}

impl CriterionProcessor<'_> {
    pub(crate) async fn automatic_namespace(
        &self,
        wql: &WqlCriterion,
        protocol: WqlProtocol,
        connector_id: &str,
    ) -> CriterionTestResult {
        if let Some(namespace) = self.telemetry.automatic_namespace(connector_id, protocol) {
            debug!(connector_id, namespace = %namespace, "Using discovered namespace");
            let criterion = wql_criterion(protocol, wql.with_namespace(namespace));
            return self.delegate(&criterion, connector_id).await;
        }

        if let Some(namespace) = configured_namespace(self.telemetry, protocol) {
            debug!(connector_id, namespace = %namespace, "Using configured namespace");
            let criterion = wql_criterion(protocol, wql.with_namespace(namespace));
            return self.delegate(&criterion, connector_id).await;
        }

        let candidates = match self.namespace_candidates(protocol).await {
            Ok(candidates) => candidates,
            Err(result) => return result,
        };

        for namespace in &candidates {
            let criterion = wql_criterion(protocol, wql.with_namespace(namespace.as_str()));
            let result = self.delegate(&criterion, connector_id).await;
            if result.success {
                self.telemetry
                    .set_automatic_namespace(connector_id, protocol, namespace);
                let message = format!("{} (namespace {namespace})", result.message);
                return CriterionTestResult { message, ..result };
            }
            debug!(connector_id, namespace = %namespace, "Namespace rejected");
        }

        CriterionTestResult::failure(format!(
            "No {protocol} namespace among {} candidates answers {}",
            candidates.len(),
            wql.query
        ))
    }

    /// Candidate namespaces of the host, enumerated at most once.
    /// A failed enumeration is not retried before the next cycle.
    /// `Err` carries the failed criterion result.
    async fn namespace_candidates(
        &self,
        protocol: WqlProtocol,
    ) -> Result<Vec<String>, CriterionTestResult> {
        let mut cached = self
            .telemetry
            .host_properties()
            .namespace_candidates(protocol)
            .lock()
            .await;
        if let NamespaceCandidates::Known(candidates) = &*cached {
            return Ok(candidates.clone());
        }
        let strategy_time = self.telemetry.strategy_time();
        if let Some(message) = cached.failed_in_cycle(strategy_time) {
            debug!(protocol = %protocol, "Namespace enumeration already failed this cycle");
            return Err(CriterionTestResult::failure(message));
        }

        let result = self.enumerate(protocol).await;
        *cached = match &result {
            Ok(candidates) => NamespaceCandidates::Known(candidates.clone()),
            Err(failed) => NamespaceCandidates::Failed {
                strategy_time,
                message: failed.message.clone(),
            },
        };
        result
    }

    async fn enumerate(&self, protocol: WqlProtocol) -> Result<Vec<String>, CriterionTestResult> {
        let criterion_type = match protocol {
            WqlProtocol::Wmi => iw_connector::CriterionType::Wmi,
            WqlProtocol::Wbem => iw_connector::CriterionType::Wbem,
        };
        let Some(extension) = self
            .ctx
            .extensions()
            .find_for_criterion(criterion_type, self.telemetry)
        else {
            return Err(CriterionTestResult::failure(format!(
                "No protocol configured on {} to discover {protocol} namespaces",
                self.telemetry.hostname()
            )));
        };

        let timeout = self.telemetry.host_configuration().job_timeout;
        let enumerated =
            tokio::time::timeout(timeout, extension.find_namespaces(protocol, self.telemetry)).await;

        match enumerated {
            Ok(Ok(candidates)) if !candidates.is_empty() => {
                debug!(
                    hostname = %self.telemetry.hostname(),
                    protocol = %protocol,
                    count = candidates.len(),
                    "Namespace candidates enumerated"
                );
                Ok(candidates)
            }
            Ok(Ok(_)) => Err(CriterionTestResult::failure(format!(
                "No {protocol} namespace found on {}",
                self.telemetry.hostname()
            ))),
            Ok(Err(e)) => {
                warn!(
                    hostname = %self.telemetry.hostname(),
                    protocol = %protocol,
                    error = %e,
                    "Namespace enumeration failed"
                );
                Err(CriterionTestResult::error(
                    format!("{protocol} namespace enumeration failed: {e}"),
                    e,
                ))
            }
            Err(_) => Err(CriterionTestResult::error(
                format!("{protocol} namespace enumeration timed out"),
                format!("no answer within {timeout:?}"),
            )),
        }
    }
}
