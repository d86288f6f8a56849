//! Per-kind workload readers
//!
//! The ownership resolver walks owner chains by fetching one object at a
//! time; this module is the capability it walks with. The kube-backed
//! implementation dispatches over the closed kind set, so an unsupported
//! kind can never reach the API.

use crate::workload::{KubeObjectRecord, WorkloadKind};
use crate::{AgentError, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Pod, ReplicationController};
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Reads one workload object and normalizes it, or reports its absence.
#[async_trait]
pub trait WorkloadReader: Send + Sync {
    async fn read(
        &self,
        kind: WorkloadKind,
        name: &str,
        namespace: &str,
    ) -> Result<Option<KubeObjectRecord>>;
}

pub struct KubeWorkloadReader {
    client: Client,
}

impl KubeWorkloadReader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn read_as<K>(
        &self,
        name: &str,
        namespace: &str,
        convert: fn(&K) -> Option<KubeObjectRecord>,
    ) -> Result<Option<KubeObjectRecord>>
    where
        K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let object = api.get_opt(name).await.map_err(|e| {
            AgentError::KubernetesError(format!(
                "failed to read {}/{}: {}",
                namespace, name, e
            ))
        })?;

        match object {
            Some(object) => {
                let record = convert(&object);
                if record.is_none() {
                    debug!(namespace, name, "object has no pod template, treating as absent");
                }
                Ok(record)
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl WorkloadReader for KubeWorkloadReader {
    async fn read(
        &self,
        kind: WorkloadKind,
        name: &str,
        namespace: &str,
    ) -> Result<Option<KubeObjectRecord>> {
        match kind {
            WorkloadKind::Pod => {
                self.read_as::<Pod>(name, namespace, KubeObjectRecord::from_pod)
                    .await
            }
            WorkloadKind::Deployment => {
                self.read_as::<Deployment>(name, namespace, KubeObjectRecord::from_deployment)
                    .await
            }
            WorkloadKind::ReplicaSet => {
                self.read_as::<ReplicaSet>(name, namespace, KubeObjectRecord::from_replica_set)
                    .await
            }
            WorkloadKind::StatefulSet => {
                self.read_as::<StatefulSet>(name, namespace, KubeObjectRecord::from_stateful_set)
                    .await
            }
            WorkloadKind::DaemonSet => {
                self.read_as::<DaemonSet>(name, namespace, KubeObjectRecord::from_daemon_set)
                    .await
            }
            WorkloadKind::ReplicationController => {
                self.read_as::<ReplicationController>(
                    name,
                    namespace,
                    KubeObjectRecord::from_replication_controller,
                )
                .await
            }
            WorkloadKind::Job => {
                self.read_as::<Job>(name, namespace, KubeObjectRecord::from_job)
                    .await
            }
            WorkloadKind::CronJob => {
                self.read_as::<CronJob>(name, namespace, KubeObjectRecord::from_cron_job)
                    .await
            }
        }
    }
}
