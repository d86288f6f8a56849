//! Watch orchestration
//!
//! Keeps exactly one live watch per (namespace, workload kind) pair. In
//! cluster scope a namespace watch fans out to per-kind watches as
//! namespaces appear; in restricted scope a single namespace is wired up
//! directly. Streams self-heal from connection resets; anything else
//! abandons the stream instance and leaves recovery to process
//! supervision.

use crate::config::Config;
use crate::k8s::router::Router;
use crate::workload::{KubeObjectRecord, WorkloadKind};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Namespace, Pod, ReplicationController};
use kube::runtime::watcher::{self, watcher, Event};
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Namespaces internal to the orchestrator itself; never watched.
pub const KUBERNETES_INTERNAL_NAMESPACES: [&str; 3] =
    ["kube-node-lease", "kube-public", "kube-system"];

const STREAM_RESTART_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub enum WatchScope {
    /// Watch every namespace the agent can see.
    Cluster,
    /// Watch a single fixed namespace.
    SingleNamespace(String),
}

/// What to do with a watch stream after an error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDisposition {
    /// Reset-type connection error: restart the stream in place.
    Restart,
    /// Anything else: log loudly and abandon this stream instance.
    Degrade,
}

/// Connection resets are routine on long-lived watch connections and must
/// not escalate; unknown errors should surface instead of looping
/// silently. The watcher errors render the underlying transport error, so
/// classification goes by message, as there is no errno to match on.
pub fn classify_stream_error(message: &str) -> StreamDisposition {
    let message = message.to_ascii_lowercase();
    if message.contains("connection reset") || message.contains("econnreset") {
        StreamDisposition::Restart
    } else {
        StreamDisposition::Degrade
    }
}

pub fn is_internal_namespace(namespace: &str) -> bool {
    KUBERNETES_INTERNAL_NAMESPACES.contains(&namespace)
}

/// An absent exclusion list means "exclude nothing".
pub fn is_excluded_namespace(namespace: &str, excluded: Option<&[String]>) -> bool {
    excluded.is_some_and(|excluded| excluded.iter().any(|entry| entry == namespace))
}

/// Tracks namespaces that already have per-kind watches. Registration is
/// idempotent: a namespace deleted and re-created out of order must not
/// produce a second set of watches.
pub struct NamespaceRegistry {
    watched: Mutex<HashSet<String>>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self {
            watched: Mutex::new(HashSet::new()),
        }
    }

    /// Returns true when the namespace was not tracked before.
    pub async fn try_register(&self, namespace: &str) -> bool {
        self.watched.lock().await.insert(namespace.to_string())
    }
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WatchOrchestrator {
    client: Client,
    router: Arc<Router>,
    registry: NamespaceRegistry,
    excluded_namespaces: Option<Vec<String>>,
    skip_jobs: bool,
}

impl WatchOrchestrator {
    pub fn new(client: Client, router: Arc<Router>, config: &Config) -> Arc<Self> {
        Arc::new(Self {
            client,
            router,
            registry: NamespaceRegistry::new(),
            excluded_namespaces: config.excluded_namespaces.clone(),
            skip_jobs: config.skip_jobs,
        })
    }

    pub async fn begin_watching(self: &Arc<Self>, scope: WatchScope) {
        match scope {
            WatchScope::SingleNamespace(namespace) => {
                info!(namespace = %namespace, "agent restricted to a single namespace");
                self.setup_watches_for_namespace(&namespace).await;
            }
            WatchScope::Cluster => {
                let orchestrator = Arc::clone(self);
                tokio::spawn(async move { orchestrator.watch_namespaces().await });
            }
        }
    }

    /// Cluster-wide namespace watch. Every namespace that passes the
    /// inclusion filter gets its per-kind watches set up exactly once.
    async fn watch_namespaces(self: Arc<Self>) {
        let api: Api<Namespace> = Api::all(self.client.clone());

        loop {
            let mut stream = watcher(api.clone(), watcher::Config::default()).boxed();
            let disposition = loop {
                match stream.next().await {
                    Some(Ok(Event::Apply(namespace)))
                    | Some(Ok(Event::InitApply(namespace))) => {
                        self.handle_namespace_added(namespace).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => break classify_stream_error(&err.to_string()),
                    None => break StreamDisposition::Restart,
                }
            };

            match disposition {
                StreamDisposition::Restart => {
                    debug!("namespace watch connection reset, restarting");
                    tokio::time::sleep(STREAM_RESTART_DELAY).await;
                }
                StreamDisposition::Degrade => {
                    error!("unexpected namespace watch error, abandoning stream");
                    return;
                }
            }
        }
    }

    async fn handle_namespace_added(&self, namespace: Namespace) {
        let Some(name) = namespace.metadata.name else {
            error!("namespace event missing metadata.name, skipping");
            return;
        };

        if is_internal_namespace(&name)
            || is_excluded_namespace(&name, self.excluded_namespaces.as_deref())
        {
            info!(namespace = %name, "ignoring excluded namespace");
            return;
        }

        self.setup_watches_for_namespace(&name).await;
    }

    /// Sets up one watch per supported kind for the namespace. A single
    /// kind failing to start is skipped; the remaining kinds still get
    /// their watches.
    async fn setup_watches_for_namespace(&self, namespace: &str) {
        if !self.registry.try_register(namespace).await {
            info!(namespace, "namespace watches already set up, skipping");
            return;
        }

        info!(namespace, "setting up namespace watches");

        // Each kind runs as its own task, so one kind failing to watch
        // never takes the others down with it.
        for kind in WorkloadKind::ALL {
            if self.skip_jobs && kind == WorkloadKind::Job {
                continue;
            }
            self.spawn_workload_watch(namespace, kind);
        }
    }

    fn spawn_workload_watch(&self, namespace: &str, kind: WorkloadKind) {
        let router = Arc::clone(&self.router);
        let namespace = namespace.to_string();

        match kind {
            WorkloadKind::Pod => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
                tokio::spawn(watch_pods(api, namespace, router));
            }
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
                tokio::spawn(watch_controller(
                    api,
                    kind,
                    namespace,
                    KubeObjectRecord::from_deployment,
                    router,
                ));
            }
            WorkloadKind::ReplicaSet => {
                let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), &namespace);
                tokio::spawn(watch_controller(
                    api,
                    kind,
                    namespace,
                    KubeObjectRecord::from_replica_set,
                    router,
                ));
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &namespace);
                tokio::spawn(watch_controller(
                    api,
                    kind,
                    namespace,
                    KubeObjectRecord::from_stateful_set,
                    router,
                ));
            }
            WorkloadKind::DaemonSet => {
                let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), &namespace);
                tokio::spawn(watch_controller(
                    api,
                    kind,
                    namespace,
                    KubeObjectRecord::from_daemon_set,
                    router,
                ));
            }
            WorkloadKind::ReplicationController => {
                let api: Api<ReplicationController> =
                    Api::namespaced(self.client.clone(), &namespace);
                tokio::spawn(watch_controller(
                    api,
                    kind,
                    namespace,
                    KubeObjectRecord::from_replication_controller,
                    router,
                ));
            }
            WorkloadKind::Job => {
                let api: Api<Job> = Api::namespaced(self.client.clone(), &namespace);
                tokio::spawn(watch_controller(
                    api,
                    kind,
                    namespace,
                    KubeObjectRecord::from_job,
                    router,
                ));
            }
            WorkloadKind::CronJob => {
                let api: Api<CronJob> = Api::namespaced(self.client.clone(), &namespace);
                tokio::spawn(watch_controller(
                    api,
                    kind,
                    namespace,
                    KubeObjectRecord::from_cron_job,
                    router,
                ));
            }
        }
    }
}

/// Pod stream: Added/Modified go through the readiness-gated scan path,
/// deletions are always reported.
async fn watch_pods(api: Api<Pod>, namespace: String, router: Arc<Router>) {
    loop {
        let mut stream = watcher(api.clone(), watcher::Config::default()).boxed();
        let disposition = loop {
            match stream.next().await {
                Some(Ok(Event::Apply(pod))) | Some(Ok(Event::InitApply(pod))) => {
                    router.handle_pod_applied(pod).await;
                }
                Some(Ok(Event::Delete(pod))) => {
                    router.handle_pod_deleted(pod).await;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => break classify_stream_error(&err.to_string()),
                None => break StreamDisposition::Restart,
            }
        };

        match disposition {
            StreamDisposition::Restart => {
                debug!(namespace = %namespace, kind = "Pod", "watch connection reset, restarting");
                tokio::time::sleep(STREAM_RESTART_DELAY).await;
            }
            StreamDisposition::Degrade => {
                error!(
                    namespace = %namespace,
                    kind = "Pod",
                    "unexpected watch error, abandoning stream"
                );
                return;
            }
        }
    }
}

/// Controller streams only care about deletions; live state is observed
/// through the pods the controllers own.
async fn watch_controller<K>(
    api: Api<K>,
    kind: WorkloadKind,
    namespace: String,
    extract: fn(&K) -> Option<KubeObjectRecord>,
    router: Arc<Router>,
) where
    K: kube::Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
{
    loop {
        let mut stream = watcher(api.clone(), watcher::Config::default()).boxed();
        let disposition = loop {
            match stream.next().await {
                Some(Ok(Event::Delete(object))) => match extract(&object) {
                    Some(record) => router.handle_workload_deleted(record).await,
                    None => debug!(
                        namespace = %namespace,
                        kind = %kind,
                        "deleted object lacks a pod template, skipping deletion report"
                    ),
                },
                Some(Ok(_)) => {}
                Some(Err(err)) => break classify_stream_error(&err.to_string()),
                None => break StreamDisposition::Restart,
            }
        };

        match disposition {
            StreamDisposition::Restart => {
                debug!(namespace = %namespace, kind = %kind, "watch connection reset, restarting");
                tokio::time::sleep(STREAM_RESTART_DELAY).await;
            }
            StreamDisposition::Degrade => {
                error!(
                    namespace = %namespace,
                    kind = %kind,
                    "unexpected watch error, abandoning stream"
                );
                return;
            }
        }
    }
}
