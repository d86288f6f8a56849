//! Delivery-layer semantics against a local mock upstream.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Json;
use clusterscan::scan::ScanOutput;
use clusterscan::transmitter::payload::LocalWorkloadLocator;
use clusterscan::transmitter::Transmitter;
use clusterscan::workload::{Workload, WorkloadKind};
use k8s_openapi::api::core::v1::PodSpec;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
struct Upstream {
    workloads: Arc<Mutex<Vec<Value>>>,
    scan_results: Arc<Mutex<Vec<Value>>>,
    dep_graphs: Arc<Mutex<Vec<Value>>>,
    deletes: Arc<Mutex<Vec<Value>>>,
    scan_results_status: u16,
    delete_status: u16,
}

impl Upstream {
    fn new(scan_results_status: u16, delete_status: u16) -> Self {
        Self {
            workloads: Arc::new(Mutex::new(Vec::new())),
            scan_results: Arc::new(Mutex::new(Vec::new())),
            dep_graphs: Arc::new(Mutex::new(Vec::new())),
            deletes: Arc::new(Mutex::new(Vec::new())),
            scan_results_status,
            delete_status,
        }
    }
}

async fn handle_workload(State(state): State<Upstream>, Json(body): Json<Value>) -> StatusCode {
    state.workloads.lock().unwrap().push(body);
    StatusCode::OK
}

async fn handle_scan_results(State(state): State<Upstream>, Json(body): Json<Value>) -> StatusCode {
    state.scan_results.lock().unwrap().push(body);
    StatusCode::from_u16(state.scan_results_status).unwrap()
}

async fn handle_dep_graph(State(state): State<Upstream>, Json(body): Json<Value>) -> StatusCode {
    state.dep_graphs.lock().unwrap().push(body);
    StatusCode::OK
}

async fn handle_delete(State(state): State<Upstream>, Json(body): Json<Value>) -> StatusCode {
    state.deletes.lock().unwrap().push(body);
    StatusCode::from_u16(state.delete_status).unwrap()
}

async fn spawn_upstream(state: Upstream) -> String {
    let app = axum::Router::new()
        .route("/api/v1/workload", post(handle_workload).delete(handle_delete))
        .route("/api/v1/scan-results", post(handle_scan_results))
        .route("/api/v1/dependency-graph", post(handle_dep_graph))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{}", addr)
}

fn transmitter(base_url: &str) -> Transmitter {
    Transmitter::new(
        base_url,
        "integration-1",
        "agent-1",
        "prod-cluster",
        None,
    )
    .expect("transmitter")
}

fn checkout_workload() -> Workload {
    Workload {
        kind: WorkloadKind::Deployment,
        name: "checkout".to_string(),
        namespace: "shop".to_string(),
        labels: BTreeMap::from([("app".to_string(), "checkout".to_string())]),
        annotations: BTreeMap::new(),
        uid: "uid-checkout".to_string(),
        revision: Some(4),
        spec_labels: BTreeMap::new(),
        spec_annotations: BTreeMap::new(),
        container_name: "checkout".to_string(),
        image_name: "checkout:2.1".to_string(),
        image_id: "sha256-checkout".to_string(),
        cluster: "prod-cluster".to_string(),
        pod_spec: PodSpec::default(),
    }
}

fn scan_output() -> ScanOutput {
    ScanOutput {
        dependency_graph: json!({"pkgs": [{"name": "openssl"}]}),
        facts: vec![],
    }
}

#[tokio::test]
async fn workload_metadata_is_posted_with_wire_field_names() {
    let state = Upstream::new(200, 200);
    let base_url = spawn_upstream(state.clone()).await;

    transmitter(&base_url)
        .send_workload_metadata(&checkout_workload())
        .await;

    let workloads = state.workloads.lock().unwrap();
    assert_eq!(workloads.len(), 1);
    let body = &workloads[0];
    assert_eq!(body["workloadLocator"]["name"], "checkout");
    assert_eq!(body["workloadLocator"]["type"], "Deployment");
    assert_eq!(body["workloadLocator"]["userLocator"], "integration-1");
    assert_eq!(body["workloadLocator"]["cluster"], "prod-cluster");
    assert_eq!(body["agentId"], "agent-1");
    assert_eq!(body["workloadMetadata"]["revision"], 4);
    assert_eq!(body["workloadMetadata"]["labels"]["app"], "checkout");
}

#[tokio::test]
async fn successful_scan_results_do_not_hit_the_fallback() {
    let state = Upstream::new(200, 200);
    let base_url = spawn_upstream(state.clone()).await;

    transmitter(&base_url)
        .send_scan_results(&checkout_workload(), &scan_output())
        .await;

    assert_eq!(state.scan_results.lock().unwrap().len(), 1);
    assert!(state.dep_graphs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_scan_results_fall_back_to_dependency_graph_once() {
    let state = Upstream::new(500, 200);
    let base_url = spawn_upstream(state.clone()).await;

    transmitter(&base_url)
        .send_scan_results(&checkout_workload(), &scan_output())
        .await;

    // Primary attempted exactly once, then exactly one fallback call
    // carrying the same image identity.
    assert_eq!(state.scan_results.lock().unwrap().len(), 1);
    let dep_graphs = state.dep_graphs.lock().unwrap();
    assert_eq!(dep_graphs.len(), 1);
    let body = &dep_graphs[0];
    assert_eq!(body["imageLocator"]["name"], "checkout");
    assert_eq!(body["imageLocator"]["imageId"], "sha256-checkout");

    // The graph travels as one serialized string.
    let graph: Value =
        serde_json::from_str(body["dependencyGraph"].as_str().expect("string graph"))
            .expect("valid json");
    assert_eq!(graph["pkgs"][0]["name"], "openssl");
}

#[tokio::test]
async fn delete_receiving_404_is_a_benign_noop() {
    let state = Upstream::new(200, 404);
    let base_url = spawn_upstream(state.clone()).await;

    let locator = LocalWorkloadLocator {
        namespace: "shop".to_string(),
        workload_type: "Deployment".to_string(),
        name: "checkout".to_string(),
    };
    transmitter(&base_url).delete_workload(&locator).await;

    // Exactly one delete call, no fallback of any kind.
    let deletes = state.deletes.lock().unwrap();
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0]["workloadLocator"]["name"], "checkout");
    assert_eq!(deletes[0]["workloadLocator"]["cluster"], "prod-cluster");
    assert!(state.dep_graphs.lock().unwrap().is_empty());
    assert!(state.scan_results.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_upstream_loses_only_the_payload() {
    // Nothing is listening here; the send must complete without panicking.
    let transmitter = transmitter("http://127.0.0.1:1");

    tokio::time::timeout(Duration::from_secs(10), async {
        transmitter.send_workload_metadata(&checkout_workload()).await;
    })
    .await
    .expect("send returned");
}
