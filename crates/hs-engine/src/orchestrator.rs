//! The parallel search orchestrator.
//!
//! A [`ParallelSearch`] partitions a search across the cluster, dispatches one
//! job per partition and then behaves like a future: [`ParallelSearch::done`]
//! polls the blob store for finished workers and [`ParallelSearch::result`]
//! downloads and aggregates what they produced. All bookkeeping lives in a
//! [`Task`] snapshot that is persisted after every change.

use chrono::Utc;
use hs_search::{
    aggregate, partition, EstimatorPayload, Params, PartitionResult, SearchRequest,
};
use hs_store::{
    download_decoded, download_uri_decoded, sanitize_job_name, upload_encoded, BlobStore,
    JobManifest, JobRunner,
};
use hs_types::{config_error, internal_error, BlobUri, HsError, HsResult, WorkerId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ParallelSearchConfig;
use crate::task::{OutputUris, Task, TaskLayout};
use crate::worker::WorkerArgs;

/// Label attached to every job of a task.
pub const TASK_LABEL: &str = "hpsearch-task";

/// A dataset handed to [`ParallelSearch::fit`].
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetInput {
    /// Raw bytes, uploaded into the task's namespace.
    Inline(Vec<u8>),
    /// Already in the blob store; referenced as is.
    Remote(BlobUri),
}

impl From<BlobUri> for DatasetInput {
    fn from(uri: BlobUri) -> Self {
        Self::Remote(uri)
    }
}

impl From<Vec<u8>> for DatasetInput {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Inline(bytes)
    }
}

#[derive(Debug)]
pub struct ParallelSearch {
    config: ParallelSearchConfig,
    store: Arc<dyn BlobStore>,
    runner: Arc<dyn JobRunner>,
    task: Option<Task>,
}

impl ParallelSearch {
    pub fn new(
        config: ParallelSearchConfig,
        store: Arc<dyn BlobStore>,
        runner: Arc<dyn JobRunner>,
    ) -> Self {
        Self {
            config,
            store,
            runner,
            task: None,
        }
    }

    /// Rebuild an orchestrator from the snapshot persisted for `task_name`.
    pub async fn load(
        config: ParallelSearchConfig,
        store: Arc<dyn BlobStore>,
        runner: Arc<dyn JobRunner>,
        task_name: &str,
    ) -> HsResult<Self> {
        let layout = TaskLayout::new(task_name, config.format);
        let task: Task =
            download_decoded(store.as_ref(), config.format, &config.bucket, &layout.snapshot())
                .await?;
        info!(
            "Loaded task {} ({} of {} workers done)",
            task.task_name,
            task.done_count(),
            task.worker_count()
        );

        Ok(Self {
            config,
            store,
            runner,
            task: Some(task),
        })
    }

    pub fn config(&self) -> &ParallelSearchConfig {
        &self.config
    }

    /// The current snapshot, once a search has been dispatched or loaded.
    pub fn task(&self) -> Option<&Task> {
        self.task.as_ref()
    }

    fn require_task(&self) -> HsResult<&Task> {
        self.task
            .as_ref()
            .ok_or_else(|| config_error!("no search has been dispatched"))
    }

    /// Upload inputs, partition the search and dispatch one job per
    /// partition. `node_count` defaults to the cluster's node count.
    ///
    /// With an explicit task name whose snapshot already exists, the stored
    /// task is resumed instead: its partitions and completion flags are kept
    /// and only unfinished workers without a live job are submitted. The
    /// request must match the stored one.
    pub async fn fit(
        &mut self,
        features: DatasetInput,
        labels: DatasetInput,
        request: SearchRequest,
        node_count: Option<usize>,
    ) -> HsResult<&Task> {
        if let Some(task_name) = self.config.task_name.clone() {
            let layout = TaskLayout::new(&task_name, self.config.format);
            let snapshot = self.store.uri(&self.config.bucket, &layout.snapshot());
            if self.store.exists(&snapshot).await? {
                return self.resume(&task_name, &request).await;
            }
        }

        let node_count = match node_count {
            Some(n) => n,
            None => self.runner.node_count().await?,
        };
        let target_count = node_count * self.config.workers_per_node;
        let partitions = partition(&request.spec, target_count)?;

        let created_at = Utc::now();
        let task_name = self.config.task_name_at(created_at);
        let bucket = self.config.bucket.clone();
        let format = self.config.format;
        let layout = TaskLayout::new(&task_name, format);
        let store = self.store.as_ref();

        info!(
            "Dispatching {} search {} as {} partitions ({} nodes x {} workers)",
            request.spec.kind(),
            task_name,
            partitions.len(),
            node_count,
            self.config.workers_per_node
        );

        let features_uri = self.dataset_uri(features, &layout.features()).await?;
        let labels_uri = self.dataset_uri(labels, &layout.labels()).await?;
        let request_uri = upload_encoded(store, format, &bucket, &layout.request(), &request).await?;

        let mut task = Task {
            task_name: task_name.clone(),
            bucket: bucket.clone(),
            format,
            created_at,
            features_uri,
            labels_uri,
            request_uri,
            partitions: BTreeMap::new(),
            job_names: BTreeMap::new(),
            outputs: BTreeMap::new(),
            done: BTreeMap::new(),
            results: BTreeMap::new(),
            full_results: BTreeSet::new(),
            aggregate: Default::default(),
            cancelled: false,
        };

        for (index, part) in partitions.into_iter().enumerate() {
            let worker = WorkerId(index);
            let object = layout.partition(worker, part.object_stem());
            upload_encoded(store, format, &bucket, &object, &part).await?;

            task.partitions.insert(worker, part);
            task.outputs.insert(
                worker,
                OutputUris {
                    full: store.uri(&bucket, &layout.full_result(worker)),
                    without_estimator: store.uri(&bucket, &layout.light_result(worker)),
                },
            );
            task.done.insert(worker, false);
        }

        // Persisted before any job exists so an interrupted dispatch can be resumed.
        self.task = Some(task);
        self.persist().await?;
        self.submit_pending().await?;
        self.require_task()
    }

    async fn resume(&mut self, task_name: &str, request: &SearchRequest) -> HsResult<&Task> {
        let format = self.config.format;
        let layout = TaskLayout::new(task_name, format);
        let mut task: Task = download_decoded(
            self.store.as_ref(),
            format,
            &self.config.bucket,
            &layout.snapshot(),
        )
        .await?;

        let stored = self.store.download_uri(&task.request_uri).await?;
        if stored != format.encode(request)? {
            return Err(config_error!(
                "task {task_name} already holds a different search; use another task name"
            ));
        }

        if task.cancelled {
            // Their jobs were deleted on cancel.
            for worker in task.pending_workers() {
                task.job_names.remove(&worker);
            }
            task.cancelled = false;
        }
        info!(
            "Resuming task {} ({} of {} workers done)",
            task.task_name,
            task.done_count(),
            task.worker_count()
        );

        self.task = Some(task);
        self.submit_pending().await?;
        self.require_task()
    }

    fn manifest_for(&self, task: &Task, worker: WorkerId) -> JobManifest {
        let args = WorkerArgs {
            bucket: task.bucket.clone(),
            task_name: task.task_name.clone(),
            worker_id: worker,
            features_uri: task.features_uri.clone(),
            labels_uri: task.labels_uri.clone(),
        };
        JobManifest::new(
            &format!("{}.worker.{worker}", task.task_name),
            &self.config.image(),
            vec![self.config.worker_command.clone()],
            args.to_args(),
        )
        .with_label(TASK_LABEL, &sanitize_job_name(&task.task_name))
        .with_resources(self.config.resources.clone())
    }

    /// Submit a job for every unfinished worker that has none. Jobs accepted
    /// before a failure are persisted.
    async fn submit_pending(&mut self) -> HsResult<()> {
        let task = self.require_task()?;
        let manifests: Vec<(WorkerId, JobManifest)> = task
            .pending_workers()
            .into_iter()
            .filter(|worker| !task.job_names.contains_key(worker))
            .map(|worker| (worker, self.manifest_for(task, worker)))
            .collect();

        for (worker, manifest) in manifests {
            let handle = match self.runner.submit(&manifest).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("Submitting worker {} failed: {}", worker, e);
                    self.persist().await?;
                    return Err(e);
                }
            };
            debug!("Worker {} dispatched as job {}", worker, handle.name);
            if let Some(task) = self.task.as_mut() {
                task.job_names.insert(worker, handle.name);
            }
        }
        self.persist().await
    }

    async fn dataset_uri(&self, input: DatasetInput, object: &str) -> HsResult<BlobUri> {
        match input {
            DatasetInput::Inline(bytes) => {
                self.store.upload(&self.config.bucket, object, bytes).await
            }
            DatasetInput::Remote(uri) => {
                debug!("Reusing dataset at {}", uri);
                Ok(uri)
            }
        }
    }

    /// Whether every worker has written its result. Workers already seen
    /// finished are not checked again.
    pub async fn done(&mut self) -> HsResult<bool> {
        let task = self
            .task
            .as_mut()
            .ok_or_else(|| config_error!("no search has been dispatched"))?;

        let mut flipped = false;
        for worker in task.pending_workers() {
            let outputs = task.outputs.get(&worker).ok_or_else(|| {
                internal_error!("task {} has no outputs for worker {}", task.task_name, worker)
            })?;
            if self.store.exists(&outputs.without_estimator).await? {
                info!("Worker {} of task {} finished", worker, task.task_name);
                task.done.insert(worker, true);
                flipped = true;
            }
        }

        let done = task.is_done();
        debug!(
            "Task {}: {} of {} workers done",
            task.task_name,
            task.done_count(),
            task.worker_count()
        );

        if flipped {
            self.persist().await?;
        }
        Ok(done)
    }

    /// Delete every job of the task, then their pods. Results already
    /// uploaded stay in the blob store. The task is only marked cancelled
    /// once every deletion went through, so a failed cancel can be retried.
    pub async fn cancel(&mut self) -> HsResult<()> {
        let task = self.require_task()?;
        if task.cancelled {
            debug!("Task {} already cancelled", task.task_name);
            return Ok(());
        }

        let job_names: Vec<String> = task.job_names.values().cloned().collect();
        warn!("Cancelling task {} ({} jobs)", task.task_name, job_names.len());

        for name in &job_names {
            self.runner.delete_job(name).await?;
        }
        for pod in self.runner.list_pods_for_jobs(&job_names).await? {
            self.runner.delete_pod(&pod.name).await?;
        }

        if let Some(task) = self.task.as_mut() {
            task.cancelled = true;
        }
        self.persist().await
    }

    pub fn cancelled(&self) -> bool {
        self.task.as_ref().map_or(false, |task| task.cancelled)
    }

    /// Per-worker results once every worker is done, `None` before.
    ///
    /// Each lightweight result is downloaded once. With `download_estimator`
    /// the full result of the winning worker is fetched as well, including on
    /// a later call after one that skipped it.
    pub async fn result(
        &mut self,
        download_estimator: bool,
    ) -> HsResult<Option<BTreeMap<WorkerId, PartitionResult>>> {
        if !self.done().await? {
            return Ok(None);
        }

        let format = self.config.format;
        let store = self.store.as_ref();
        let task = self
            .task
            .as_mut()
            .ok_or_else(|| config_error!("no search has been dispatched"))?;

        let mut changed = false;
        for worker in task.worker_ids().collect::<Vec<_>>() {
            if task.results.contains_key(&worker) {
                continue;
            }
            let outputs = task.outputs.get(&worker).ok_or_else(|| {
                internal_error!("task {} has no outputs for worker {}", task.task_name, worker)
            })?;
            let result: PartitionResult =
                download_uri_decoded(store, format, &outputs.without_estimator).await?;
            task.results.insert(worker, result);
            changed = true;
        }

        if download_estimator {
            let best = aggregate(&task.results).best_worker;
            if let Some(best) = best.filter(|worker| !task.full_results.contains(worker)) {
                let outputs = task.outputs.get(&best).ok_or_else(|| {
                    internal_error!("task {} has no outputs for worker {}", task.task_name, best)
                })?;
                let full: PartitionResult =
                    download_uri_decoded(store, format, &outputs.full).await?;
                debug!("Fetched full result of worker {}", best);
                task.results.insert(best, full);
                task.full_results.insert(best);
                changed = true;
            }
        }

        if changed {
            task.aggregate = aggregate(&task.results);
            info!(
                "Task {} best score {:?} from worker {:?}",
                task.task_name, task.aggregate.best_score, task.aggregate.best_worker
            );
        }
        let results = task.results.clone();

        if changed {
            self.persist().await?;
        }
        Ok(Some(results))
    }

    /// Write the task snapshot to `{task}/gke_search.{ext}`.
    pub async fn persist(&self) -> HsResult<()> {
        let task = self.require_task()?;
        upload_encoded(
            self.store.as_ref(),
            task.format,
            &task.bucket,
            &task.layout().snapshot(),
            task,
        )
        .await?;
        debug!("Persisted task {}", task.task_name);
        Ok(())
    }

    /// `(done, total)` worker counts as of the last poll.
    pub fn progress(&self) -> (usize, usize) {
        self.task
            .as_ref()
            .map_or((0, 0), |task| (task.done_count(), task.worker_count()))
    }

    pub fn best_score(&self) -> Option<f64> {
        self.task.as_ref().and_then(|task| task.aggregate.best_score)
    }

    pub fn best_params(&self) -> Option<&Params> {
        self.task
            .as_ref()
            .and_then(|task| task.aggregate.best_params.as_ref())
    }

    /// The winning worker's fitted estimator, present after
    /// `result(true)`.
    pub fn best_estimator(&self) -> Option<&EstimatorPayload> {
        self.task
            .as_ref()
            .and_then(|task| task.aggregate.best_estimator.as_ref())
    }

    /// Poll [`Self::done`] every `poll_interval` (the configured interval
    /// when `None`) until it holds or `timeout` passes.
    pub async fn wait(
        &mut self,
        poll_interval: Option<Duration>,
        timeout: Option<Duration>,
    ) -> HsResult<()> {
        let interval = poll_interval.unwrap_or(self.config.poll_interval);
        let started = tokio::time::Instant::now();

        loop {
            if self.done().await? {
                return Ok(());
            }

            let elapsed = started.elapsed();
            let sleep_for = match timeout {
                Some(limit) if elapsed >= limit => {
                    let (done, total) = self.progress();
                    return Err(HsError::Timeout {
                        waited_secs: elapsed.as_secs(),
                        done,
                        total,
                    });
                }
                Some(limit) => interval.min(limit - elapsed),
                None => interval,
            };
            tokio::time::sleep(sleep_for).await;
        }
    }
}
