//! Batch job descriptions and the job runner abstraction.

use async_trait::async_trait;
use hs_types::HsResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum length of a Kubernetes object name.
pub const MAX_JOB_NAME_LEN: usize = 63;

/// Resource requests for a single worker container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResources {
    /// Number of CPUs per worker (fractional ok, 0 = scheduler default).
    pub num_cpus: f64,
    /// Number of GPUs per worker (0 = no GPU).
    pub num_gpus: u32,
    /// Memory in bytes (0 = no request).
    pub memory_bytes: u64,
}

impl Default for WorkerResources {
    fn default() -> Self {
        Self {
            num_cpus: 0.0,
            num_gpus: 0,
            memory_bytes: 0,
        }
    }
}

/// Describes one batch job: a single container run to completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobManifest {
    /// Job name, already sanitized for the scheduler.
    pub name: String,
    /// Fully qualified container image.
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub resources: WorkerResources,
    pub restart_policy: String,
}

impl JobManifest {
    pub fn new(name: &str, image: &str, command: Vec<String>, args: Vec<String>) -> Self {
        Self {
            name: sanitize_job_name(name),
            image: image.to_string(),
            command,
            args,
            labels: BTreeMap::new(),
            resources: WorkerResources::default(),
            restart_policy: "OnFailure".to_string(),
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_resources(mut self, resources: WorkerResources) -> Self {
        self.resources = resources;
        self
    }
}

/// Lowercase and replace anything outside `[a-z0-9.-]`, as required for
/// Kubernetes object names.
pub fn sanitize_job_name(name: &str) -> String {
    let mapped: String = name
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();

    // Keep the tail: it carries the worker index that tells jobs apart.
    let start = mapped.len().saturating_sub(MAX_JOB_NAME_LEN);
    mapped[start..]
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// Handle returned by the scheduler for a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub name: String,
    pub uid: Option<String>,
}

/// A pod spawned for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub job_name: Option<String>,
    pub phase: Option<String>,
}

/// Cluster scheduler operations used by the orchestrator.
#[async_trait]
pub trait JobRunner: Send + Sync + std::fmt::Debug {
    /// Submit a job; returns once the scheduler has accepted it.
    async fn submit(&self, manifest: &JobManifest) -> HsResult<JobHandle>;

    /// Delete a job. A job that no longer exists counts as deleted.
    async fn delete_job(&self, name: &str) -> HsResult<()>;

    /// Pods that belong to any of `job_names`.
    async fn list_pods_for_jobs(&self, job_names: &[String]) -> HsResult<Vec<PodInfo>>;

    /// Delete a pod. A pod that no longer exists counts as deleted.
    async fn delete_pod(&self, name: &str) -> HsResult<()>;

    /// Number of schedulable nodes in the cluster.
    async fn node_count(&self) -> HsResult<usize>;
}
