//! Upstream payload shapes
//!
//! Wire contract of the upstream collector. Field names are camelCase on
//! the wire; everything here serializes with serde renames so the Rust
//! side keeps normal naming.

use crate::scan::Fact;
use k8s_openapi::api::core::v1::PodSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifies a workload within one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalWorkloadLocator {
    pub namespace: String,
    #[serde(rename = "type")]
    pub workload_type: String,
    pub name: String,
}

/// Cluster- and integration-qualified workload locator used upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadLocator {
    #[serde(flatten)]
    pub local: LocalWorkloadLocator,
    pub user_locator: String,
    pub cluster: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageLocator {
    #[serde(flatten)]
    pub workload: WorkloadLocator,
    pub image_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadMetadata {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub spec_labels: BTreeMap<String, String>,
    pub spec_annotations: BTreeMap<String, String>,
    pub revision: Option<i64>,
    pub pod_spec: PodSpec,
}

/// Identifies this agent instance on every scan payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetadata {
    pub agent_id: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadMetadataPayload {
    pub workload_locator: WorkloadLocator,
    pub agent_id: String,
    pub workload_metadata: WorkloadMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResultsPayload {
    pub image_locator: ImageLocator,
    pub agent_id: String,
    pub metadata: AgentMetadata,
    pub scan_results: Vec<ScanResultEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResultEntry {
    pub identity: ScanIdentity,
    pub target: ScanTarget,
    pub facts: Vec<Fact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanIdentity {
    #[serde(rename = "type")]
    pub identity_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanTarget {
    pub image: String,
}

/// Legacy contract for the secondary endpoint; the graph travels as one
/// serialized string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyGraphPayload {
    pub image_locator: ImageLocator,
    pub agent_id: String,
    pub dependency_graph: String,
    pub metadata: AgentMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteWorkloadPayload {
    pub workload_locator: WorkloadLocator,
    pub agent_id: String,
}
