//! hs-worker: fits one partition of a parallel search.
//!
//! ```text
//! hs-worker <bucket> <task_name> <worker_id> <features_uri> <labels_uri>
//! ```

use anyhow::Context;
use clap::Parser;
use hs_engine::cli::{init_tracing, StoreArgs};
use hs_engine::{execute, CommandScorer, WorkerArgs};
use hs_search::ScoredSearch;
use hs_types::{BlobUri, PayloadFormat, WorkerId};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "hs-worker", about = "Fit one partition of a parallel hyperparameter search")]
struct Cli {
    bucket: String,
    task_name: String,
    worker_id: WorkerId,
    features_uri: BlobUri,
    labels_uri: BlobUri,

    /// Program that trains and scores one candidate.
    #[arg(long, env = "HS_TRAINER", default_value = "hs-trainer")]
    trainer: PathBuf,

    /// Extra argument for the trainer (repeatable).
    #[arg(long = "trainer-arg")]
    trainer_args: Vec<String>,

    /// Candidates requested per round from adaptive strategies.
    #[arg(long, env = "HS_BATCH_SIZE", default_value_t = 1)]
    batch_size: usize,

    #[command(flatten)]
    store: StoreArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let args = WorkerArgs {
        bucket: cli.bucket,
        task_name: cli.task_name,
        worker_id: cli.worker_id,
        features_uri: cli.features_uri,
        labels_uri: cli.labels_uri,
    };
    let store = cli.store.open(&args.features_uri.scheme)?;
    let fitter = ScoredSearch::new(CommandScorer::new(cli.trainer).with_args(cli.trainer_args))
        .with_batch_size(cli.batch_size);

    let result = execute(store.as_ref(), &fitter, PayloadFormat::Json, &args)
        .await
        .with_context(|| format!("worker {} of task {} failed", args.worker_id, args.task_name))?;

    info!(
        "Worker {} done: best score {} with {:?}",
        args.worker_id, result.best_score, result.best_params
    );
    Ok(())
}
