//! Shared workload data model
//!
//! Every watch event is normalized into these types before anything else
//! happens: a `KubeObjectRecord` is the raw shape shared by all supported
//! controller kinds, and a `Workload` is one observed container image of
//! one workload, the unit the rest of the pipeline operates on.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, PodStatus, ReplicationController};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::BTreeMap;

/// The closed set of workload kinds this agent understands.
///
/// Adding or removing a kind is a compile-time-checked change: every
/// dispatch over kinds is an exhaustive match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Pod,
    Deployment,
    ReplicaSet,
    StatefulSet,
    DaemonSet,
    ReplicationController,
    Job,
    CronJob,
}

impl WorkloadKind {
    pub const ALL: [WorkloadKind; 8] = [
        WorkloadKind::Pod,
        WorkloadKind::Deployment,
        WorkloadKind::ReplicaSet,
        WorkloadKind::StatefulSet,
        WorkloadKind::DaemonSet,
        WorkloadKind::ReplicationController,
        WorkloadKind::Job,
        WorkloadKind::CronJob,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Pod => "Pod",
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::ReplicaSet => "ReplicaSet",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::ReplicationController => "ReplicationController",
            WorkloadKind::Job => "Job",
            WorkloadKind::CronJob => "CronJob",
        }
    }

    /// Parses an owner-reference kind into a supported controller kind.
    /// Pods are never owners of other workloads.
    pub fn from_owner_kind(kind: &str) -> Option<WorkloadKind> {
        match kind {
            "Deployment" => Some(WorkloadKind::Deployment),
            "ReplicaSet" => Some(WorkloadKind::ReplicaSet),
            "StatefulSet" => Some(WorkloadKind::StatefulSet),
            "DaemonSet" => Some(WorkloadKind::DaemonSet),
            "ReplicationController" => Some(WorkloadKind::ReplicationController),
            "Job" => Some(WorkloadKind::Job),
            "CronJob" => Some(WorkloadKind::CronJob),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized shape of one supported object: enough to build workload
/// records from it and to keep walking its owner chain upward.
#[derive(Debug, Clone)]
pub struct KubeObjectRecord {
    pub kind: WorkloadKind,
    pub object_meta: ObjectMeta,
    /// Metadata of the pod template. For bare pods this repeats the pod's
    /// own metadata, since pods have no template.
    pub spec_meta: ObjectMeta,
    pub containers: Vec<Container>,
    pub owner_refs: Vec<OwnerReference>,
    pub revision: Option<i64>,
    pub pod_spec: PodSpec,
}

impl KubeObjectRecord {
    pub fn name(&self) -> &str {
        self.object_meta.name.as_deref().unwrap_or("unknown")
    }

    pub fn namespace(&self) -> &str {
        self.object_meta.namespace.as_deref().unwrap_or_default()
    }

    /// A pod is its own workload when no controller owns it.
    pub fn from_pod(pod: &Pod) -> Option<KubeObjectRecord> {
        let spec = pod.spec.as_ref()?;
        Some(KubeObjectRecord {
            kind: WorkloadKind::Pod,
            object_meta: pod.metadata.clone(),
            spec_meta: pod.metadata.clone(),
            containers: spec.containers.clone(),
            owner_refs: pod.metadata.owner_references.clone().unwrap_or_default(),
            revision: None,
            pod_spec: spec.clone(),
        })
    }

    pub fn from_deployment(deployment: &Deployment) -> Option<KubeObjectRecord> {
        let template = deployment.spec.as_ref().map(|spec| &spec.template)?;
        from_template(WorkloadKind::Deployment, &deployment.metadata, template)
    }

    pub fn from_replica_set(replica_set: &ReplicaSet) -> Option<KubeObjectRecord> {
        let template = replica_set.spec.as_ref().and_then(|spec| spec.template.as_ref())?;
        from_template(WorkloadKind::ReplicaSet, &replica_set.metadata, template)
    }

    pub fn from_stateful_set(stateful_set: &StatefulSet) -> Option<KubeObjectRecord> {
        let template = stateful_set.spec.as_ref().map(|spec| &spec.template)?;
        from_template(WorkloadKind::StatefulSet, &stateful_set.metadata, template)
    }

    pub fn from_daemon_set(daemon_set: &DaemonSet) -> Option<KubeObjectRecord> {
        let template = daemon_set.spec.as_ref().map(|spec| &spec.template)?;
        from_template(WorkloadKind::DaemonSet, &daemon_set.metadata, template)
    }

    pub fn from_replication_controller(rc: &ReplicationController) -> Option<KubeObjectRecord> {
        let template = rc.spec.as_ref().and_then(|spec| spec.template.as_ref())?;
        from_template(WorkloadKind::ReplicationController, &rc.metadata, template)
    }

    pub fn from_job(job: &Job) -> Option<KubeObjectRecord> {
        let template = job.spec.as_ref().map(|spec| &spec.template)?;
        from_template(WorkloadKind::Job, &job.metadata, template)
    }

    pub fn from_cron_job(cron_job: &CronJob) -> Option<KubeObjectRecord> {
        let template = cron_job
            .spec
            .as_ref()
            .and_then(|spec| spec.job_template.spec.as_ref())
            .map(|job_spec| &job_spec.template)?;
        from_template(WorkloadKind::CronJob, &cron_job.metadata, template)
    }
}

fn from_template(
    kind: WorkloadKind,
    object_meta: &ObjectMeta,
    template: &k8s_openapi::api::core::v1::PodTemplateSpec,
) -> Option<KubeObjectRecord> {
    let pod_spec = template.spec.as_ref()?;
    Some(KubeObjectRecord {
        kind,
        object_meta: object_meta.clone(),
        spec_meta: template.metadata.clone().unwrap_or_default(),
        containers: pod_spec.containers.clone(),
        owner_refs: object_meta.owner_references.clone().unwrap_or_default(),
        revision: object_meta.generation,
        pod_spec: pod_spec.clone(),
    })
}

/// One observed container image of one workload. Immutable once built;
/// handed by value from pipeline stage to pipeline stage.
#[derive(Debug, Clone)]
pub struct Workload {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub uid: String,
    pub revision: Option<i64>,
    pub spec_labels: BTreeMap<String, String>,
    pub spec_annotations: BTreeMap<String, String>,
    pub container_name: String,
    pub image_name: String,
    pub image_id: String,
    pub cluster: String,
    pub pod_spec: PodSpec,
}

/// Builds one `Workload` per container of the resolved workload.
///
/// When the observation came from a live pod, the pod's container statuses
/// carry the authoritative image identities (including the pulled image
/// id). Deletion paths have no pod status, so the template containers are
/// used instead.
pub fn build_workloads(
    record: &KubeObjectRecord,
    pod_status: Option<&PodStatus>,
    cluster: &str,
) -> Vec<Workload> {
    let containers: Vec<(String, String, String)> = match pod_status
        .and_then(|status| status.container_statuses.as_ref())
    {
        Some(statuses) => statuses
            .iter()
            .map(|cs| {
                (
                    cs.name.clone(),
                    cs.image.clone(),
                    cs.image_id.clone(),
                )
            })
            .collect(),
        None => record
            .containers
            .iter()
            .map(|container| {
                (
                    container.name.clone(),
                    container.image.clone().unwrap_or_default(),
                    String::new(),
                )
            })
            .collect(),
    };

    containers
        .into_iter()
        .map(|(container_name, image_name, image_id)| Workload {
            kind: record.kind,
            name: record.name().to_string(),
            namespace: record.namespace().to_string(),
            labels: record.object_meta.labels.clone().unwrap_or_default(),
            annotations: record.object_meta.annotations.clone().unwrap_or_default(),
            uid: record.object_meta.uid.clone().unwrap_or_default(),
            revision: record.revision,
            spec_labels: record.spec_meta.labels.clone().unwrap_or_default(),
            spec_annotations: record.spec_meta.annotations.clone().unwrap_or_default(),
            container_name,
            image_name,
            image_id,
            cluster: cluster.to_string(),
            pod_spec: record.pod_spec.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ContainerStatus;

    fn pod_with_containers(names: &[&str]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("uid-1".to_string()),
                labels: Some(BTreeMap::from([(
                    "app".to_string(),
                    "web".to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: names
                    .iter()
                    .map(|name| Container {
                        name: name.to_string(),
                        image: Some(format!("{}:latest", name)),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }),
            status: Some(PodStatus {
                container_statuses: Some(
                    names
                        .iter()
                        .map(|name| ContainerStatus {
                            name: name.to_string(),
                            image: format!("{}:latest", name),
                            image_id: format!("sha256-{}", name),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn owner_kind_parsing() {
        assert_eq!(
            WorkloadKind::from_owner_kind("Deployment"),
            Some(WorkloadKind::Deployment)
        );
        assert_eq!(WorkloadKind::from_owner_kind("Pod"), None);
        assert_eq!(WorkloadKind::from_owner_kind("Node"), None);
    }

    #[test]
    fn one_workload_per_container_sharing_locator() {
        let pod = pod_with_containers(&["app", "sidecar"]);
        let record = KubeObjectRecord::from_pod(&pod).expect("record");
        let workloads = build_workloads(&record, pod.status.as_ref(), "cluster-a");

        assert_eq!(workloads.len(), 2);
        for workload in &workloads {
            assert_eq!(workload.kind, WorkloadKind::Pod);
            assert_eq!(workload.name, "web");
            assert_eq!(workload.namespace, "default");
            assert_eq!(workload.uid, "uid-1");
            assert_eq!(workload.cluster, "cluster-a");
            assert!(workload.revision.is_none());
        }
        assert_eq!(workloads[0].container_name, "app");
        assert_eq!(workloads[0].image_id, "sha256-app");
        assert_eq!(workloads[1].container_name, "sidecar");
    }

    #[test]
    fn delete_path_uses_template_containers() {
        let pod = pod_with_containers(&["app"]);
        let record = KubeObjectRecord::from_pod(&pod).expect("record");
        let workloads = build_workloads(&record, None, "cluster-a");

        assert_eq!(workloads.len(), 1);
        assert_eq!(workloads[0].image_name, "app:latest");
        assert!(workloads[0].image_id.is_empty());
    }
}
