//! Orchestrator configuration.

use chrono::{DateTime, Utc};
use hs_store::WorkerResources;
use hs_types::PayloadFormat;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Container registry images are pulled from unless overridden.
pub const DEFAULT_IMAGE_REGISTRY: &str = "gcr.io";

/// Entry point of the worker image.
pub const DEFAULT_WORKER_COMMAND: &str = "hs-worker";

/// Where and how a parallel search is dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelSearchConfig {
    /// Cloud project that owns the cluster and the image.
    pub project_id: String,
    pub cluster_id: String,
    /// Bucket holding every input and output of the task.
    pub bucket: String,
    /// Worker image name, without registry or project.
    pub image_name: String,
    pub image_registry: String,

    /// Explicit task name. Reusing a name resumes that task's namespace.
    pub task_name: Option<String>,

    /// Workers dispatched per cluster node.
    pub workers_per_node: usize,

    pub format: PayloadFormat,
    pub worker_command: String,
    pub resources: WorkerResources,

    /// Default interval between completion checks in [`crate::ParallelSearch::wait`].
    pub poll_interval: Duration,
}

impl Default for ParallelSearchConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            cluster_id: String::new(),
            bucket: String::new(),
            image_name: String::new(),
            image_registry: DEFAULT_IMAGE_REGISTRY.to_string(),
            task_name: None,
            workers_per_node: 1,
            format: PayloadFormat::Json,
            worker_command: DEFAULT_WORKER_COMMAND.to_string(),
            resources: WorkerResources::default(),
            poll_interval: Duration::from_secs(10),
        }
    }
}

impl ParallelSearchConfig {
    pub fn new(project_id: &str, cluster_id: &str, bucket: &str, image_name: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            cluster_id: cluster_id.to_string(),
            bucket: bucket.to_string(),
            image_name: image_name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_task_name(mut self, task_name: &str) -> Self {
        self.task_name = Some(task_name.to_string());
        self
    }

    pub fn with_workers_per_node(mut self, n: usize) -> Self {
        self.workers_per_node = n;
        self
    }

    pub fn with_image_registry(mut self, registry: &str) -> Self {
        self.image_registry = registry.to_string();
        self
    }

    pub fn with_worker_command(mut self, command: &str) -> Self {
        self.worker_command = command.to_string();
        self
    }

    pub fn with_resources(mut self, resources: WorkerResources) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Fully qualified worker image.
    pub fn image(&self) -> String {
        format!("{}/{}/{}", self.image_registry, self.project_id, self.image_name)
    }

    /// The configured task name, or `{cluster_id}.{image_name}.{unix_ts}`.
    pub fn task_name_at(&self, now: DateTime<Utc>) -> String {
        match &self.task_name {
            Some(name) => name.clone(),
            None => format!("{}.{}.{}", self.cluster_id, self.image_name, now.timestamp()),
        }
    }
}
