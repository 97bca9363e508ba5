//! Kubernetes job runner on the `kube` client.

use async_trait::async_trait;
use hs_types::{config_error, HsError, HsResult, TransportError};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, Node, Pod, PodSpec, PodTemplateSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::config::KubeConfigOptions;
use kube::{Api, Client, Config};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

use crate::jobs::{JobHandle, JobManifest, JobRunner, PodInfo, WorkerResources};

/// Label the job controller sets on every pod it creates.
const JOB_NAME_LABEL: &str = "job-name";

impl WorkerResources {
    /// Container resource requirements, or `None` when nothing is requested.
    pub fn to_requirements(&self) -> Option<ResourceRequirements> {
        let mut requests = BTreeMap::new();
        let mut limits = BTreeMap::new();

        if self.num_cpus > 0.0 {
            requests.insert("cpu".to_string(), Quantity(self.num_cpus.to_string()));
        }
        if self.memory_bytes > 0 {
            requests.insert("memory".to_string(), Quantity(self.memory_bytes.to_string()));
        }
        if self.num_gpus > 0 {
            limits.insert("nvidia.com/gpu".to_string(), Quantity(self.num_gpus.to_string()));
        }

        if requests.is_empty() && limits.is_empty() {
            return None;
        }
        Some(ResourceRequirements {
            requests: (!requests.is_empty()).then_some(requests),
            limits: (!limits.is_empty()).then_some(limits),
            ..Default::default()
        })
    }
}

impl JobManifest {
    /// Render as a `batch/v1` Job with a single `worker` container.
    pub fn to_job(&self) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                labels: Some(self.labels.clone()),
                ..Default::default()
            },
            spec: Some(JobSpec {
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(self.labels.clone()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "worker".to_string(),
                            image: Some(self.image.clone()),
                            command: Some(self.command.clone()),
                            args: Some(self.args.clone()),
                            resources: self.resources.to_requirements(),
                            ..Default::default()
                        }],
                        restart_policy: Some(self.restart_policy.clone()),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }
}

fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}

fn job_error(operation: &str, error: kube::Error) -> HsError {
    TransportError::job(operation, error).into()
}

/// [`JobRunner`] that creates `batch/v1` Jobs in one namespace.
#[derive(Clone)]
pub struct KubernetesJobRunner {
    namespace: String,
    jobs: Api<Job>,
    pods: Api<Pod>,
    nodes: Api<Node>,
}

impl fmt::Debug for KubernetesJobRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubernetesJobRunner")
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl KubernetesJobRunner {
    /// Runner in `namespace`, or the client's default namespace.
    pub fn new(client: Client, namespace: Option<&str>) -> Self {
        let namespace = namespace
            .unwrap_or_else(|| client.default_namespace())
            .to_string();
        Self {
            jobs: Api::namespaced(client.clone(), &namespace),
            pods: Api::namespaced(client.clone(), &namespace),
            nodes: Api::all(client),
            namespace,
        }
    }

    /// Connect using a kubeconfig context, or the inferred configuration
    /// (local kubeconfig, then the pod's service account) without one.
    pub async fn connect(context: Option<&str>, namespace: Option<&str>) -> HsResult<Self> {
        let config = match context {
            Some(context) => Config::from_kubeconfig(&KubeConfigOptions {
                context: Some(context.to_string()),
                ..Default::default()
            })
            .await
            .map_err(|e| config_error!("cannot load kubeconfig context {context}: {e}"))?,
            None => Config::infer()
                .await
                .map_err(|e| config_error!("cannot infer Kubernetes configuration: {e}"))?,
        };
        let client = Client::try_from(config)
            .map_err(|e| config_error!("cannot build Kubernetes client: {e}"))?;
        Ok(Self::new(client, namespace))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl JobRunner for KubernetesJobRunner {
    async fn submit(&self, manifest: &JobManifest) -> HsResult<JobHandle> {
        let created = self
            .jobs
            .create(&PostParams::default(), &manifest.to_job())
            .await
            .map_err(|e| job_error("create job", e))?;
        info!("Created job {} in namespace {}", manifest.name, self.namespace);

        Ok(JobHandle {
            name: manifest.name.clone(),
            uid: created.metadata.uid,
        })
    }

    async fn delete_job(&self, name: &str) -> HsResult<()> {
        match self.jobs.delete(name, &DeleteParams::background()).await {
            Ok(_) => info!("Deleted job {} in namespace {}", name, self.namespace),
            Err(e) if is_not_found(&e) => debug!("Job {} already gone", name),
            Err(e) => return Err(job_error("delete job", e)),
        }
        Ok(())
    }

    async fn list_pods_for_jobs(&self, job_names: &[String]) -> HsResult<Vec<PodInfo>> {
        if job_names.is_empty() {
            return Ok(Vec::new());
        }

        let selector = format!("{JOB_NAME_LABEL} in ({})", job_names.join(","));
        let listed = self
            .pods
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| job_error("list pods", e))?;

        let pods: Vec<PodInfo> = listed
            .items
            .into_iter()
            .filter_map(|pod| {
                let name = pod.metadata.name?;
                let job_name = pod
                    .metadata
                    .labels
                    .and_then(|labels| labels.get(JOB_NAME_LABEL).cloned())
                    .filter(|job| job_names.contains(job))?;
                Some(PodInfo {
                    name,
                    job_name: Some(job_name),
                    phase: pod.status.and_then(|status| status.phase),
                })
            })
            .collect();

        debug!("Found {} pods for {} jobs", pods.len(), job_names.len());
        Ok(pods)
    }

    async fn delete_pod(&self, name: &str) -> HsResult<()> {
        match self.pods.delete(name, &DeleteParams::default()).await {
            Ok(_) => info!("Deleted pod {} in namespace {}", name, self.namespace),
            Err(e) if is_not_found(&e) => debug!("Pod {} already gone", name),
            Err(e) => return Err(job_error("delete pod", e)),
        }
        Ok(())
    }

    async fn node_count(&self) -> HsResult<usize> {
        let nodes = self
            .nodes
            .list(&ListParams::default())
            .await
            .map_err(|e| job_error("list nodes", e))?;
        Ok(nodes.items.len())
    }
}
