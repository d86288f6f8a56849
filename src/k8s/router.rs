//! Event routing
//!
//! Turns one raw watch event into zero or more normalized workload
//! records, then either dispatches them for scanning or reports a
//! deletion upstream. One malformed event must never halt the watch
//! stream, so every failure path here degrades to a log line.

use crate::k8s::reader::WorkloadReader;
use crate::k8s::resolver::resolve_owning_workload;
use crate::scan::{correlation_id, ScanJob, ScanQueue};
use crate::transmitter::payload::LocalWorkloadLocator;
use crate::transmitter::Transmitter;
use crate::workload::{build_workloads, KubeObjectRecord, Workload};
use k8s_openapi::api::core::v1::Pod;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Router {
    reader: Arc<dyn WorkloadReader>,
    queue: ScanQueue,
    transmitter: Arc<Transmitter>,
    cluster_name: String,
}

impl Router {
    pub fn new(
        reader: Arc<dyn WorkloadReader>,
        queue: ScanQueue,
        transmitter: Arc<Transmitter>,
        cluster_name: String,
    ) -> Self {
        Self {
            reader,
            queue,
            transmitter,
            cluster_name,
        }
    }

    /// Added/Modified pod events. Non-ready pods are dropped without
    /// logging; they are usually still being scheduled and would otherwise
    /// burn scan capacity on transient states.
    pub async fn handle_pod_applied(&self, pod: Pod) {
        if !is_pod_ready(&pod) {
            return;
        }

        let correlation_id = correlation_id();

        match workloads_for_pod(self.reader.as_ref(), &pod, &self.cluster_name).await {
            Some(workloads) if !workloads.is_empty() => {
                debug!(
                    correlation_id = %correlation_id,
                    pod = pod_name(&pod),
                    workloads = workloads.len(),
                    "dispatching pod workloads for scanning"
                );
                self.queue.enqueue(ScanJob {
                    workloads,
                    correlation_id,
                });
            }
            _ => {
                warn!(
                    correlation_id = %correlation_id,
                    pod = pod_name(&pod),
                    images = ?candidate_images(&pod),
                    "could not process pod images, the workload is possibly unsupported"
                );
            }
        }
    }

    /// Pod deletions are reported regardless of readiness to keep the
    /// upstream inventory accurate. The report is built from the pod's own
    /// metadata, no live API read needed.
    pub async fn handle_pod_deleted(&self, pod: Pod) {
        match KubeObjectRecord::from_pod(&pod) {
            Some(record) => self.report_deletion(record).await,
            None => warn!(
                pod = pod_name(&pod),
                "deleted pod lacks a spec, skipping deletion report"
            ),
        }
    }

    /// Controller deletions observed on the per-kind watches.
    pub async fn handle_workload_deleted(&self, record: KubeObjectRecord) {
        self.report_deletion(record).await;
    }

    async fn report_deletion(&self, record: KubeObjectRecord) {
        let correlation_id = correlation_id();
        let locator = LocalWorkloadLocator {
            namespace: record.namespace().to_string(),
            workload_type: record.kind.as_str().to_string(),
            name: record.name().to_string(),
        };
        info!(
            correlation_id = %correlation_id,
            namespace = %locator.namespace,
            workload = %locator.name,
            kind = %locator.workload_type,
            "reporting workload deletion upstream"
        );
        self.transmitter.delete_workload(&locator).await;
    }
}

/// A pod is scan-worthy only once it is Running and at least one container
/// reports a running or waiting state.
pub fn is_pod_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    if status.phase.as_deref() != Some("Running") {
        return false;
    }
    status
        .container_statuses
        .as_ref()
        .is_some_and(|statuses| {
            statuses.iter().any(|cs| {
                cs.state
                    .as_ref()
                    .is_some_and(|state| state.running.is_some() || state.waiting.is_some())
            })
        })
}

/// Does any owner reference carry a non-empty kind?
pub fn is_pod_associated_with_owner(pod: &Pod) -> bool {
    pod.metadata
        .owner_references
        .as_ref()
        .is_some_and(|owners| owners.iter().any(|owner| !owner.kind.is_empty()))
}

/// Builds the per-container workload records for one ready pod, resolving
/// ownership when the pod is attached to a controller. A pod without any
/// owner is its own workload; its own metadata and spec are used directly,
/// skipping the API round-trip entirely.
pub async fn workloads_for_pod(
    reader: &dyn WorkloadReader,
    pod: &Pod,
    cluster: &str,
) -> Option<Vec<Workload>> {
    if pod.metadata.namespace.is_none() || pod.spec.is_none() {
        return None;
    }
    let Some(status) = pod.status.as_ref() else {
        warn!(pod = pod_name(pod), "pod lacks a status");
        return None;
    };

    if !is_pod_associated_with_owner(pod) {
        let record = KubeObjectRecord::from_pod(pod)?;
        return Some(build_workloads(&record, Some(status), cluster));
    }

    let namespace = pod.metadata.namespace.as_deref()?;
    let owner_refs = pod.metadata.owner_references.clone().unwrap_or_default();
    let record = resolve_owning_workload(reader, &owner_refs, namespace).await?;
    Some(build_workloads(&record, Some(status), cluster))
}

fn pod_name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or("unknown")
}

fn candidate_images(pod: &Pod) -> Vec<String> {
    pod.spec
        .as_ref()
        .map(|spec| {
            spec.containers
                .iter()
                .filter_map(|container| container.image.clone())
                .collect()
        })
        .unwrap_or_default()
}
