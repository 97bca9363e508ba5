//! Task bookkeeping and the blob layout shared with workers.

use chrono::{DateTime, Utc};
use hs_search::{AggregateResult, Partition, PartitionResult};
use hs_types::{BlobUri, PayloadFormat, WorkerId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Object names under a task's namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLayout {
    task_name: String,
    ext: &'static str,
}

impl TaskLayout {
    pub fn new(task_name: &str, format: PayloadFormat) -> Self {
        Self {
            task_name: task_name.to_string(),
            ext: format.extension(),
        }
    }

    pub fn snapshot(&self) -> String {
        format!("{}/gke_search.{}", self.task_name, self.ext)
    }

    pub fn request(&self) -> String {
        format!("{}/search.{}", self.task_name, self.ext)
    }

    pub fn features(&self) -> String {
        format!("{}/features.{}", self.task_name, self.ext)
    }

    pub fn labels(&self) -> String {
        format!("{}/labels.{}", self.task_name, self.ext)
    }

    /// `stem` is one of [`Partition::object_stem`].
    pub fn partition(&self, worker: WorkerId, stem: &str) -> String {
        format!("{}/{}/{}.{}", self.task_name, worker, stem, self.ext)
    }

    pub fn full_result(&self, worker: WorkerId) -> String {
        format!("{}/{}/fitted_search.{}", self.task_name, worker, self.ext)
    }

    pub fn light_result(&self, worker: WorkerId) -> String {
        format!(
            "{}/{}/fitted_search_without_estimator.{}",
            self.task_name, worker, self.ext
        )
    }
}

/// Where a worker writes its result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputUris {
    pub full: BlobUri,
    /// Written last, so its existence marks the worker as finished.
    pub without_estimator: BlobUri,
}

/// Everything the orchestrator knows about a dispatched search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_name: String,
    pub bucket: String,
    pub format: PayloadFormat,
    pub created_at: DateTime<Utc>,

    pub features_uri: BlobUri,
    pub labels_uri: BlobUri,
    pub request_uri: BlobUri,

    pub partitions: BTreeMap<WorkerId, Partition>,
    pub job_names: BTreeMap<WorkerId, String>,
    pub outputs: BTreeMap<WorkerId, OutputUris>,
    pub done: BTreeMap<WorkerId, bool>,

    /// Downloaded results. Lightweight, except the full copy of any worker in
    /// `full_results`.
    pub results: BTreeMap<WorkerId, PartitionResult>,
    pub full_results: BTreeSet<WorkerId>,
    pub aggregate: AggregateResult,

    pub cancelled: bool,
}

impl Task {
    pub fn layout(&self) -> TaskLayout {
        TaskLayout::new(&self.task_name, self.format)
    }

    pub fn worker_ids(&self) -> impl Iterator<Item = WorkerId> + '_ {
        self.partitions.keys().copied()
    }

    pub fn worker_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn done_count(&self) -> usize {
        self.done.values().filter(|done| **done).count()
    }

    pub fn is_done(&self) -> bool {
        self.done_count() == self.worker_count()
    }

    /// Workers whose completion has not been observed yet.
    pub fn pending_workers(&self) -> Vec<WorkerId> {
        self.worker_ids()
            .filter(|worker| !self.done.get(worker).copied().unwrap_or(false))
            .collect()
    }
}
