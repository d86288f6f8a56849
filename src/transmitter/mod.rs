//! Upstream delivery
//!
//! Transmits workload metadata, scan results, and deletion notices to the
//! upstream collector. Each payload is attempted once; the only built-in
//! secondary attempt is the dependency-graph fallback for scan results.
//! A lost payload never takes the process with it: failures are logged
//! with the payload context (minus the dependency graph, which is too
//! large to log) and dropped.

pub mod payload;

use crate::scan::ScanOutput;
use crate::workload::Workload;
use crate::{AgentError, Result};
use payload::{
    AgentMetadata, DeleteWorkloadPayload, DependencyGraphPayload, ImageLocator,
    LocalWorkloadLocator, ScanIdentity, ScanResultEntry, ScanResultsPayload, ScanTarget,
    WorkloadLocator, WorkloadMetadata, WorkloadMetadataPayload,
};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Any status in the exclusive range (100, 400) counts as success.
pub fn is_success_status(status: u16) -> bool {
    status > 100 && status < 400
}

pub struct Transmitter {
    client: reqwest::Client,
    base_url: String,
    integration_id: String,
    agent_id: String,
    cluster_name: String,
    namespace: Option<String>,
}

impl Transmitter {
    pub fn new(
        base_url: impl Into<String>,
        integration_id: impl Into<String>,
        agent_id: impl Into<String>,
        cluster_name: impl Into<String>,
        namespace: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AgentError::DeliveryError(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            integration_id: integration_id.into(),
            agent_id: agent_id.into(),
            cluster_name: cluster_name.into(),
            namespace,
        })
    }

    pub async fn send_workload_metadata(&self, workload: &Workload) {
        let payload = WorkloadMetadataPayload {
            workload_locator: self.workload_locator(workload),
            agent_id: self.agent_id.clone(),
            workload_metadata: WorkloadMetadata {
                labels: workload.labels.clone(),
                annotations: workload.annotations.clone(),
                spec_labels: workload.spec_labels.clone(),
                spec_annotations: workload.spec_annotations.clone(),
                revision: workload.revision,
                pod_spec: workload.pod_spec.clone(),
            },
        };

        info!(
            locator = ?payload.workload_locator.local,
            "sending workload metadata upstream"
        );

        match self.post("/api/v1/workload", &payload).await {
            Ok(()) => info!(
                locator = ?payload.workload_locator.local,
                "workload metadata sent upstream"
            ),
            Err(err) => error!(
                error = %err,
                locator = ?payload.workload_locator.local,
                "could not send workload metadata upstream"
            ),
        }
    }

    /// Primary submission goes to the structured scan-results endpoint.
    /// If that fails for any reason, the same data is re-shaped into the
    /// legacy dependency-graph payload and sent to the secondary endpoint,
    /// which remains the long-term-supported contract.
    pub async fn send_scan_results(&self, workload: &Workload, output: &ScanOutput) {
        let image_locator = self.image_locator(workload);
        let payload = ScanResultsPayload {
            image_locator: image_locator.clone(),
            agent_id: self.agent_id.clone(),
            metadata: self.agent_metadata(),
            scan_results: vec![ScanResultEntry {
                identity: ScanIdentity {
                    identity_type: "container-image".to_string(),
                },
                target: ScanTarget {
                    image: workload.image_name.clone(),
                },
                facts: output.facts.clone(),
            }],
        };

        let Err(err) = self.post("/api/v1/scan-results", &payload).await else {
            return;
        };

        warn!(
            error = %err,
            image_locator = ?image_locator,
            "scan-results submission failed, falling back to the dependency-graph endpoint"
        );

        let fallback = DependencyGraphPayload {
            image_locator: image_locator.clone(),
            agent_id: self.agent_id.clone(),
            dependency_graph: output.dependency_graph.to_string(),
            metadata: self.agent_metadata(),
        };

        if let Err(err) = self.post("/api/v1/dependency-graph", &fallback).await {
            error!(
                error = %err,
                image_locator = ?image_locator,
                "could not send the dependency scan result upstream"
            );
        }
    }

    /// A 404 means the workload was never (or not yet) registered
    /// upstream; that is a benign no-op, not an error.
    pub async fn delete_workload(&self, locator: &LocalWorkloadLocator) {
        let payload = DeleteWorkloadPayload {
            workload_locator: self.local_to_global(locator),
            agent_id: self.agent_id.clone(),
        };

        let response = self
            .client
            .delete(format!("{}/api/v1/workload", self.base_url))
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                if status == 404 {
                    info!(
                        locator = ?locator,
                        "workload to delete not found upstream, maybe it is still being built"
                    );
                } else if !is_success_status(status) {
                    error!(
                        status,
                        locator = ?locator,
                        "could not delete workload upstream"
                    );
                }
            }
            Err(err) => error!(
                error = %err,
                locator = ?locator,
                "could not send workload deletion upstream"
            ),
        }
    }

    async fn post<T: Serialize>(&self, path: &str, payload: &T) -> Result<()> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(payload)
            .send()
            .await
            .map_err(|err| AgentError::DeliveryError(err.to_string()))?;

        let status = response.status();
        if is_success_status(status.as_u16()) {
            Ok(())
        } else {
            Err(AgentError::UpstreamStatus {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("unknown").to_string(),
            })
        }
    }

    fn workload_locator(&self, workload: &Workload) -> WorkloadLocator {
        WorkloadLocator {
            local: LocalWorkloadLocator {
                namespace: workload.namespace.clone(),
                workload_type: workload.kind.as_str().to_string(),
                name: workload.name.clone(),
            },
            user_locator: self.integration_id.clone(),
            cluster: workload.cluster.clone(),
        }
    }

    fn local_to_global(&self, locator: &LocalWorkloadLocator) -> WorkloadLocator {
        WorkloadLocator {
            local: locator.clone(),
            user_locator: self.integration_id.clone(),
            cluster: self.cluster_name.clone(),
        }
    }

    fn image_locator(&self, workload: &Workload) -> ImageLocator {
        let image_id = if workload.image_id.is_empty() {
            workload.image_name.clone()
        } else {
            workload.image_id.clone()
        };
        ImageLocator {
            workload: self.workload_locator(workload),
            image_id,
        }
    }

    fn agent_metadata(&self) -> AgentMetadata {
        AgentMetadata {
            agent_id: self.agent_id.clone(),
            version: crate::VERSION.to_string(),
            namespace: self.namespace.clone(),
        }
    }
}
