//! Runtime configuration for the agent
//!
//! Everything is read once at startup: environment variables plus an
//! optional excluded-namespaces file mounted into the container.

use crate::{AgentError, Result};
use std::env;
use std::fs;
use std::path::Path;
use uuid::Uuid;

pub const DEFAULT_UPSTREAM_URL: &str = "https://upstream.clusterscan.dev";
pub const DEFAULT_SCAN_WORKERS: usize = 10;
pub const EXCLUDED_NAMESPACES_FILE: &str = "/etc/config/namespaces";

#[derive(Debug, Clone)]
pub struct Config {
    /// Identifies the integration this agent reports into.
    pub integration_id: String,
    /// Generated per agent instance, attached to every upstream payload.
    pub agent_id: String,
    /// Display name of the monitored cluster.
    pub cluster_name: String,
    /// When set, the agent watches only this namespace.
    pub namespace: Option<String>,
    /// Namespaces that must never be watched. None means exclude nothing.
    pub excluded_namespaces: Option<Vec<String>>,
    /// Disables the Job watch entirely.
    pub skip_jobs: bool,
    /// Maximum number of concurrently executing scans.
    pub scan_workers: usize,
    /// Base URL of the upstream collector.
    pub upstream_url: String,
    /// External analysis command producing a dependency graph for an image.
    pub scanner_command: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let integration_id = env::var("INTEGRATION_ID")
            .map_err(|_| AgentError::ConfigError("INTEGRATION_ID is not set".to_string()))?
            .trim()
            .to_string();

        if integration_id.is_empty() {
            return Err(AgentError::ConfigError(
                "INTEGRATION_ID must not be empty".to_string(),
            ));
        }

        let scan_workers = match env::var("SCAN_WORKERS") {
            Ok(raw) => raw.parse::<usize>().map_err(|_| {
                AgentError::ConfigError(format!("SCAN_WORKERS is not a number: {}", raw))
            })?,
            Err(_) => DEFAULT_SCAN_WORKERS,
        };

        Ok(Self {
            integration_id,
            agent_id: Uuid::new_v4().to_string(),
            cluster_name: env::var("CLUSTER_NAME")
                .unwrap_or_else(|_| "Default cluster".to_string()),
            namespace: env::var("NAMESPACE").ok().filter(|ns| !ns.is_empty()),
            excluded_namespaces: load_excluded_namespaces(EXCLUDED_NAMESPACES_FILE),
            skip_jobs: env::var("SKIP_JOBS").map(|v| v == "true").unwrap_or(false),
            scan_workers,
            upstream_url: env::var("UPSTREAM_URL")
                .unwrap_or_else(|_| DEFAULT_UPSTREAM_URL.to_string()),
            scanner_command: env::var("SCANNER_COMMAND")
                .unwrap_or_else(|_| "clusterscan-analyze".to_string()),
        })
    }
}

/// Reads the newline-separated exclusion list. Any read failure (most
/// commonly the file simply not being mounted) means "exclude nothing".
pub fn load_excluded_namespaces(path: impl AsRef<Path>) -> Option<Vec<String>> {
    let data = fs::read_to_string(path).ok()?;
    let namespaces: Vec<String> = data
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();
    Some(namespaces)
}
