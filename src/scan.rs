//! Scan dispatch
//!
//! Ready-pod observations are queued here and handed to the external
//! image analysis tool with bounded concurrency, so the agent's resource
//! usage stays within the configured worker count no matter how fast
//! watch events arrive. The queue guarantees admission control, not
//! delivery: a failed scan is logged and dropped.

use crate::transmitter::Transmitter;
use crate::workload::Workload;
use crate::{AgentError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

/// Short opaque token grouping all log lines of one event's lifecycle.
pub fn correlation_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

/// One ready-pod observation: all per-container workload records of the
/// event, sharing a locator, plus the event's correlation id.
#[derive(Debug, Clone)]
pub struct ScanJob {
    pub workloads: Vec<Workload>,
    pub correlation_id: String,
}

/// Output of the external analysis tool for one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutput {
    pub dependency_graph: serde_json::Value,
    #[serde(default)]
    pub facts: Vec<Fact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    #[serde(rename = "type")]
    pub fact_type: String,
    pub data: serde_json::Value,
}

/// The image-pulling and static-analysis capability. How a dependency
/// graph is computed from image contents is outside this crate.
#[async_trait]
pub trait ImageScanner: Send + Sync {
    async fn scan(&self, image_name: &str) -> Result<ScanOutput>;
}

/// Production scanner: invokes the configured analysis command with the
/// image reference and parses its JSON stdout.
pub struct CommandScanner {
    program: String,
}

impl CommandScanner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ImageScanner for CommandScanner {
    async fn scan(&self, image_name: &str) -> Result<ScanOutput> {
        let output = tokio::process::Command::new(&self.program)
            .arg(image_name)
            .output()
            .await
            .map_err(|err| {
                AgentError::ScannerError(format!("failed to run {}: {}", self.program, err))
            })?;

        if !output.status.success() {
            return Err(AgentError::ScannerError(format!(
                "{} exited with {} for image {}: {}",
                self.program,
                output.status,
                image_name,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

/// Processes one dequeued job. Split from the queue so admission control
/// stays independent of what a job actually does.
#[async_trait]
pub trait ScanProcessor: Send + Sync {
    async fn process(&self, job: ScanJob);
}

/// Production job processor: reports the workload's metadata upstream,
/// then scans each container image and delivers the results.
pub struct WorkloadWorker {
    scanner: Arc<dyn ImageScanner>,
    transmitter: Arc<Transmitter>,
}

impl WorkloadWorker {
    pub fn new(scanner: Arc<dyn ImageScanner>, transmitter: Arc<Transmitter>) -> Self {
        Self {
            scanner,
            transmitter,
        }
    }
}

#[async_trait]
impl ScanProcessor for WorkloadWorker {
    async fn process(&self, job: ScanJob) {
        let Some(first) = job.workloads.first() else {
            return;
        };

        // Register the workload before any scan result references it.
        self.transmitter.send_workload_metadata(first).await;

        let mut processed = Vec::new();
        for workload in &job.workloads {
            match self.scanner.scan(&workload.image_name).await {
                Ok(output) => {
                    self.transmitter.send_scan_results(workload, &output).await;
                    processed.push(workload.image_name.clone());
                }
                Err(err) => {
                    warn!(
                        correlation_id = %job.correlation_id,
                        image = %workload.image_name,
                        error = %err,
                        "image scan failed, dropping"
                    );
                }
            }
        }

        info!(
            correlation_id = %job.correlation_id,
            images = ?processed,
            "processed images"
        );
    }
}

/// FIFO job queue with a fixed concurrency bound. Enqueue never blocks;
/// jobs beyond the worker count wait in arrival order.
#[derive(Clone)]
pub struct ScanQueue {
    tx: mpsc::UnboundedSender<ScanJob>,
}

impl ScanQueue {
    pub fn start(worker_count: usize, processor: Arc<dyn ScanProcessor>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ScanJob>();
        let semaphore = Arc::new(Semaphore::new(worker_count));

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };
                let processor = Arc::clone(&processor);
                tokio::spawn(async move {
                    processor.process(job).await;
                    drop(permit);
                });
            }
        });

        Self { tx }
    }

    pub fn enqueue(&self, job: ScanJob) {
        if self.tx.send(job).is_err() {
            warn!("scan queue is shut down, dropping job");
        }
    }
}
