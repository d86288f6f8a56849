//! Ownership resolution
//!
//! Walks a pod's owner-reference chain upward to the highest supported
//! controller. Real clusters nest at most a couple of levels
//! (pod -> ReplicaSet -> Deployment), but the walk never assumes a fixed
//! depth; it only assumes the chain is finite, and enforces that with a
//! hard iteration cap.

use crate::k8s::reader::WorkloadReader;
use crate::workload::{KubeObjectRecord, WorkloadKind};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::debug;

/// Maximum owner-chain length before resolution is abandoned. A chain this
/// deep is a malformed or cyclic owner graph, not a real hierarchy.
pub const OWNER_CHAIN_LIMIT: usize = 20;

/// First owner reference whose kind is a supported controller.
fn supported_owner(owner_refs: &[OwnerReference]) -> Option<(WorkloadKind, &OwnerReference)> {
    owner_refs
        .iter()
        .find_map(|owner| WorkloadKind::from_owner_kind(&owner.kind).map(|kind| (kind, owner)))
}

/// Resolves the topmost supported controller reachable from `owner_refs`.
///
/// Returns `None` when no supported owner exists at all, and the most
/// recently resolved ancestor when a link in the chain cannot be fetched
/// (object gone or API failure): a workload that disappeared mid-walk must
/// not invalidate what was already resolved. Hitting the iteration cap
/// returns `None` unconditionally.
pub async fn resolve_owning_workload(
    reader: &dyn WorkloadReader,
    owner_refs: &[OwnerReference],
    namespace: &str,
) -> Option<KubeObjectRecord> {
    let mut owner_refs = owner_refs.to_vec();
    let mut resolved: Option<KubeObjectRecord> = None;

    for _ in 0..OWNER_CHAIN_LIMIT {
        let Some((kind, owner)) = supported_owner(&owner_refs) else {
            // Reached the top, or an unsupported owner kind.
            return resolved;
        };

        match reader.read(kind, &owner.name, namespace).await {
            Ok(Some(record)) => {
                owner_refs = record.owner_refs.clone();
                resolved = Some(record);
            }
            Ok(None) => return resolved,
            Err(err) => {
                debug!(
                    namespace,
                    owner = %owner.name,
                    kind = %kind,
                    error = %err,
                    "could not read next owner, keeping what was resolved so far"
                );
                return resolved;
            }
        }
    }

    debug!(
        namespace,
        limit = OWNER_CHAIN_LIMIT,
        "owner chain exceeded iteration limit, giving up on resolution"
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::PodSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::HashMap;

    struct MapReader {
        objects: HashMap<(WorkloadKind, String), KubeObjectRecord>,
    }

    #[async_trait]
    impl WorkloadReader for MapReader {
        async fn read(
            &self,
            kind: WorkloadKind,
            name: &str,
            _namespace: &str,
        ) -> Result<Option<KubeObjectRecord>> {
            Ok(self.objects.get(&(kind, name.to_string())).cloned())
        }
    }

    fn record(kind: WorkloadKind, name: &str, owner_refs: Vec<OwnerReference>) -> KubeObjectRecord {
        KubeObjectRecord {
            kind,
            object_meta: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec_meta: ObjectMeta::default(),
            containers: Vec::new(),
            owner_refs,
            revision: Some(1),
            pod_spec: PodSpec::default(),
        }
    }

    fn owner(kind: &str, name: &str) -> OwnerReference {
        OwnerReference {
            kind: kind.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn reader(records: Vec<KubeObjectRecord>) -> MapReader {
        MapReader {
            objects: records
                .into_iter()
                .map(|r| ((r.kind, r.name().to_string()), r))
                .collect(),
        }
    }

    #[tokio::test]
    async fn resolves_through_replica_set_to_deployment() {
        let reader = reader(vec![
            record(
                WorkloadKind::ReplicaSet,
                "checkout-5f4b",
                vec![owner("Deployment", "checkout")],
            ),
            record(WorkloadKind::Deployment, "checkout", Vec::new()),
        ]);

        let resolved = resolve_owning_workload(
            &reader,
            &[owner("ReplicaSet", "checkout-5f4b")],
            "default",
        )
        .await
        .expect("resolved");

        assert_eq!(resolved.kind, WorkloadKind::Deployment);
        assert_eq!(resolved.name(), "checkout");
    }

    #[tokio::test]
    async fn no_supported_owner_resolves_to_absent() {
        let reader = reader(Vec::new());

        assert!(
            resolve_owning_workload(&reader, &[owner("Node", "worker-1")], "default")
                .await
                .is_none()
        );
        assert!(resolve_owning_workload(&reader, &[], "default")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn missing_top_link_returns_last_resolved_ancestor() {
        // The ReplicaSet resolves, but its owning Deployment is gone.
        let reader = reader(vec![record(
            WorkloadKind::ReplicaSet,
            "checkout-5f4b",
            vec![owner("Deployment", "checkout")],
        )]);

        let resolved = resolve_owning_workload(
            &reader,
            &[owner("ReplicaSet", "checkout-5f4b")],
            "default",
        )
        .await
        .expect("resolved");

        assert_eq!(resolved.kind, WorkloadKind::ReplicaSet);
    }

    #[tokio::test]
    async fn deep_chain_terminates_below_the_cap() {
        // 19 Jobs chained to each other, the last one unowned.
        let mut records = Vec::new();
        for i in 0..19 {
            let owners = if i + 1 < 19 {
                vec![owner("Job", &format!("job-{}", i + 1))]
            } else {
                Vec::new()
            };
            records.push(record(WorkloadKind::Job, &format!("job-{}", i), owners));
        }
        let reader = reader(records);

        let resolved = resolve_owning_workload(&reader, &[owner("Job", "job-0")], "default")
            .await
            .expect("resolved");

        assert_eq!(resolved.name(), "job-18");
    }

    #[tokio::test]
    async fn cyclic_owner_graph_resolves_to_absent() {
        let reader = reader(vec![
            record(
                WorkloadKind::ReplicaSet,
                "a",
                vec![owner("ReplicaSet", "b")],
            ),
            record(
                WorkloadKind::ReplicaSet,
                "b",
                vec![owner("ReplicaSet", "a")],
            ),
        ]);

        let resolved =
            resolve_owning_workload(&reader, &[owner("ReplicaSet", "a")], "default").await;

        assert!(resolved.is_none());
    }
}
