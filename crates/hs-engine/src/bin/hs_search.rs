//! hs-search: dispatch and follow parallel hyperparameter searches.
//!
//! ```text
//! hs-search submit --request search.json --features X.json --labels y.json \
//!     --project my-proj --cluster my-cluster --image trainer
//! hs-search status <task>
//! hs-search result <task> --estimator
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use hs_engine::cli::{init_tracing, KubernetesArgs, StoreArgs};
use hs_engine::{DatasetInput, ParallelSearch, ParallelSearchConfig};
use hs_search::SearchRequest;
use hs_store::WorkerResources;
use hs_types::BlobUri;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "hs-search",
    about = "Distributed hyperparameter search on Kubernetes",
    version
)]
struct Cli {
    #[command(flatten)]
    cluster: ClusterArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ClusterArgs {
    /// Bucket holding task inputs and outputs.
    #[arg(long, env = "HS_BUCKET", global = true, default_value = "")]
    bucket: String,

    /// Blob store scheme: `gs` or `file`.
    #[arg(long, env = "HS_STORE_SCHEME", global = true, default_value = "gs")]
    scheme: String,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    kubernetes: KubernetesArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Partition a search and dispatch one job per partition.
    Submit(SubmitArgs),
    /// Poll worker completion.
    Status { task_name: String },
    /// Block until every worker finished.
    Wait {
        task_name: String,
        /// Seconds between polls.
        #[arg(long, default_value_t = 10)]
        interval: u64,
        /// Give up after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Print per-worker results and the best one.
    Result {
        task_name: String,
        /// Also download the winning worker's fitted estimator.
        #[arg(long)]
        estimator: bool,
    },
    /// Delete the task's jobs and pods.
    Cancel { task_name: String },
}

#[derive(Args)]
struct SubmitArgs {
    /// JSON search request: estimator, spec and optional scoring.
    #[arg(long)]
    request: PathBuf,
    /// Features file, or a blob URI to reuse.
    #[arg(long)]
    features: String,
    /// Labels file, or a blob URI to reuse.
    #[arg(long)]
    labels: String,

    #[arg(long, env = "HS_PROJECT")]
    project: String,
    #[arg(long, env = "HS_CLUSTER")]
    cluster: String,
    /// Worker image name under `{registry}/{project}/`.
    #[arg(long, env = "HS_IMAGE")]
    image: String,
    #[arg(long, env = "HS_IMAGE_REGISTRY", default_value = "gcr.io")]
    registry: String,

    /// Explicit task name; reuse one to resume its namespace.
    #[arg(long)]
    task_name: Option<String>,
    /// Node count; queried from the cluster when unset.
    #[arg(long)]
    nodes: Option<usize>,
    #[arg(long, default_value_t = 1)]
    workers_per_node: usize,

    #[arg(long, default_value_t = 0.0)]
    cpus: f64,
    #[arg(long, default_value_t = 0)]
    gpus: u32,
    #[arg(long, default_value_t = 0)]
    memory_bytes: u64,
}

fn dataset(value: &str) -> anyhow::Result<DatasetInput> {
    if BlobUri::is_uri(value) {
        return Ok(DatasetInput::Remote(value.parse()?));
    }
    let bytes = std::fs::read(value).with_context(|| format!("cannot read dataset {value}"))?;
    Ok(DatasetInput::Inline(bytes))
}

fn base_config(cluster: &ClusterArgs) -> anyhow::Result<ParallelSearchConfig> {
    if cluster.bucket.is_empty() {
        anyhow::bail!("a bucket is required (--bucket or HS_BUCKET)");
    }
    Ok(ParallelSearchConfig {
        bucket: cluster.bucket.clone(),
        ..ParallelSearchConfig::default()
    })
}

async fn load(cluster: &ClusterArgs, task_name: &str) -> anyhow::Result<ParallelSearch> {
    let store = cluster.store.open(&cluster.scheme)?;
    let runner = Arc::new(cluster.kubernetes.runner().await?);
    let search = ParallelSearch::load(base_config(cluster)?, store, runner, task_name)
        .await
        .with_context(|| format!("cannot load task {task_name}"))?;
    Ok(search)
}

async fn submit(cluster: &ClusterArgs, args: SubmitArgs) -> anyhow::Result<()> {
    let request: SearchRequest = serde_json::from_slice(
        &std::fs::read(&args.request)
            .with_context(|| format!("cannot read {}", args.request.display()))?,
    )?;

    let mut config = ParallelSearchConfig {
        project_id: args.project,
        cluster_id: args.cluster,
        image_name: args.image,
        ..base_config(cluster)?
    }
    .with_image_registry(&args.registry)
    .with_workers_per_node(args.workers_per_node)
    .with_resources(WorkerResources {
        num_cpus: args.cpus,
        num_gpus: args.gpus,
        memory_bytes: args.memory_bytes,
    });
    if let Some(name) = &args.task_name {
        config = config.with_task_name(name);
    }

    let store = cluster.store.open(&cluster.scheme)?;
    let runner = Arc::new(cluster.kubernetes.runner().await?);
    let mut search = ParallelSearch::new(config, store, runner);

    let task = search
        .fit(dataset(&args.features)?, dataset(&args.labels)?, request, args.nodes)
        .await?;
    info!("Dispatched {} workers", task.worker_count());
    println!("{}", task.task_name);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Submit(args) => submit(&cli.cluster, args).await,
        Command::Status { task_name } => {
            let mut search = load(&cli.cluster, &task_name).await?;
            let done = search.done().await?;
            let (finished, total) = search.progress();
            println!(
                "{task_name}: {finished}/{total} workers done{}",
                if search.cancelled() { " (cancelled)" } else { "" }
            );
            if !done {
                std::process::exit(2);
            }
            Ok(())
        }
        Command::Wait {
            task_name,
            interval,
            timeout,
        } => {
            let mut search = load(&cli.cluster, &task_name).await?;
            search
                .wait(
                    Some(Duration::from_secs(interval)),
                    timeout.map(Duration::from_secs),
                )
                .await?;
            println!("{task_name}: done");
            Ok(())
        }
        Command::Result {
            task_name,
            estimator,
        } => {
            let mut search = load(&cli.cluster, &task_name).await?;
            match search.result(estimator).await? {
                None => {
                    let (finished, total) = search.progress();
                    anyhow::bail!("{task_name} is not done yet ({finished}/{total} workers)");
                }
                Some(results) => {
                    let report = serde_json::json!({
                        "best_score": search.best_score(),
                        "best_params": search.best_params(),
                        "has_estimator": search.best_estimator().is_some(),
                        "workers": results,
                    });
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    Ok(())
                }
            }
        }
        Command::Cancel { task_name } => {
            let mut search = load(&cli.cluster, &task_name).await?;
            search.cancel().await?;
            println!("{task_name}: cancelled");
            Ok(())
        }
    }
}
