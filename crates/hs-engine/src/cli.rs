//! Pieces shared by the `hs-search` and `hs-worker` binaries.

use clap::Args;
use hs_store::{BlobStore, GcsBlobStore, KubernetesJobRunner, LocalBlobStore};
use hs_types::{config_error, HsResult};
use std::path::PathBuf;
use std::sync::Arc;

/// Initialise logging from `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

/// Credentials and locations for each blob store scheme.
#[derive(Debug, Clone, Default, Args)]
pub struct StoreArgs {
    /// Root directory backing `file://` URIs.
    #[arg(long, env = "HS_STORE_ROOT")]
    pub store_root: Option<PathBuf>,

    /// OAuth access token for `gs://` URIs. Ambient Google credentials are
    /// used when unset.
    #[arg(long, env = "GOOGLE_OAUTH_ACCESS_TOKEN", hide_env_values = true)]
    pub gcs_token: Option<String>,
}

impl StoreArgs {
    /// Open the store answering to `scheme`.
    pub fn open(&self, scheme: &str) -> HsResult<Arc<dyn BlobStore>> {
        match scheme {
            LocalBlobStore::SCHEME => {
                let root = self
                    .store_root
                    .as_ref()
                    .ok_or_else(|| config_error!("file:// storage needs --store-root or HS_STORE_ROOT"))?;
                Ok(Arc::new(LocalBlobStore::new(root)?))
            }
            GcsBlobStore::SCHEME => Ok(Arc::new(match &self.gcs_token {
                Some(token) => GcsBlobStore::with_token(token.as_str()),
                None => GcsBlobStore::from_env(),
            })),
            other => Err(config_error!(
                "no blob store for scheme {other:?} (expected file or gs)"
            )),
        }
    }
}

/// Which cluster and namespace jobs go to.
#[derive(Debug, Clone, Default, Args)]
pub struct KubernetesArgs {
    /// Kubeconfig context. The current context, or the pod's service
    /// account, when unset.
    #[arg(long = "kube-context", env = "KUBE_CONTEXT")]
    pub context: Option<String>,

    /// Namespace for jobs; the context's default when unset.
    #[arg(long, env = "KUBERNETES_NAMESPACE")]
    pub namespace: Option<String>,
}

impl KubernetesArgs {
    pub async fn runner(&self) -> HsResult<KubernetesJobRunner> {
        KubernetesJobRunner::connect(self.context.as_deref(), self.namespace.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use hs_types::HsError;

    #[derive(Parser)]
    struct Flags {
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        kubernetes: KubernetesArgs,
    }

    #[test]
    fn opens_local_store_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let args = StoreArgs {
            store_root: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        assert_eq!(args.open("file").unwrap().scheme(), "file");
    }

    #[test]
    fn missing_root_and_unknown_schemes_are_config_errors() {
        let args = StoreArgs::default();
        assert!(matches!(args.open("file"), Err(HsError::Config(_))));
        assert!(matches!(args.open("s3"), Err(HsError::Config(_))));

        let with_token = StoreArgs {
            gcs_token: Some("token".into()),
            ..Default::default()
        };
        assert_eq!(with_token.open("gs").unwrap().scheme(), "gs");
    }

    #[test]
    fn cluster_flags_parse() {
        let flags = Flags::parse_from([
            "hs",
            "--kube-context",
            "gke_proj_zone_cluster",
            "--namespace",
            "search",
            "--store-root",
            "/tmp/blobs",
        ]);
        assert_eq!(flags.kubernetes.context.as_deref(), Some("gke_proj_zone_cluster"));
        assert_eq!(flags.kubernetes.namespace.as_deref(), Some("search"));
        assert_eq!(flags.store.store_root, Some(PathBuf::from("/tmp/blobs")));
    }
}
