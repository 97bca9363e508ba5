//! The procedure each dispatched job runs.

use hs_search::{Partition, PartitionResult, SearchFit, SearchRequest};
use hs_store::{download_decoded, upload_encoded, BlobStore};
use hs_types::{config_error, BlobUri, HsResult, PayloadFormat, WorkerId};
use tracing::info;

use crate::task::TaskLayout;

/// The five positional arguments a worker job is started with. Their order
/// is shared between the orchestrator and the worker binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerArgs {
    pub bucket: String,
    pub task_name: String,
    pub worker_id: WorkerId,
    pub features_uri: BlobUri,
    pub labels_uri: BlobUri,
}

impl WorkerArgs {
    pub fn to_args(&self) -> Vec<String> {
        vec![
            self.bucket.clone(),
            self.task_name.clone(),
            self.worker_id.to_string(),
            self.features_uri.to_string(),
            self.labels_uri.to_string(),
        ]
    }

    pub fn from_args(args: &[String]) -> HsResult<Self> {
        match args {
            [bucket, task_name, worker_id, features_uri, labels_uri] => Ok(Self {
                bucket: bucket.clone(),
                task_name: task_name.clone(),
                worker_id: worker_id.parse()?,
                features_uri: features_uri.parse()?,
                labels_uri: labels_uri.parse()?,
            }),
            _ => Err(config_error!(
                "expected 5 worker arguments, got {}",
                args.len()
            )),
        }
    }
}

/// Fit this worker's partition and upload the result.
///
/// The full result is uploaded before the lightweight one, whose existence
/// is what the orchestrator polls for.
pub async fn execute(
    store: &dyn BlobStore,
    fitter: &dyn SearchFit,
    format: PayloadFormat,
    args: &WorkerArgs,
) -> HsResult<PartitionResult> {
    let layout = TaskLayout::new(&args.task_name, format);
    let worker = args.worker_id;

    let features = store.download_uri(&args.features_uri).await?;
    let labels = store.download_uri(&args.labels_uri).await?;
    let mut request: SearchRequest =
        download_decoded(store, format, &args.bucket, &layout.request()).await?;

    let stem = Partition::object_stem_for(request.spec.kind());
    let partition: Partition =
        download_decoded(store, format, &args.bucket, &layout.partition(worker, stem)).await?;
    request.spec.splice(partition)?;

    info!(
        "Worker {} of task {} fitting {} search",
        worker,
        args.task_name,
        request.spec.kind()
    );
    let result = fitter.fit(&request, worker, &features, &labels).await?;

    upload_encoded(store, format, &args.bucket, &layout.full_result(worker), &result).await?;
    upload_encoded(
        store,
        format,
        &args.bucket,
        &layout.light_result(worker),
        &result.without_estimator(),
    )
    .await?;

    info!(
        "Worker {} of task {} uploaded best score {}",
        worker, args.task_name, result.best_score
    );
    Ok(result)
}
