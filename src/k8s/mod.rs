//! Narrow interface to the orchestration platform.
//!
//! Everything the control plane does to the cluster goes through
//! [`ClusterApi`]. [`KubeCluster`] talks to a real API server and
//! [`InMemoryCluster`] keeps objects in process memory.

pub mod kube_cluster;
pub mod memory;
pub mod resources;

pub use kube_cluster::KubeCluster;
pub use memory::{ExecBehavior, InMemoryCluster, ResourceKind};

use async_trait::async_trait;
use futures::future::BoxFuture;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use tokio::io::AsyncRead;

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("Kubernetes API error: {0}")]
    Api(String),

    #[error("Exec stream error: {0}")]
    Stream(String),
}

impl ClusterError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub(crate) fn not_found(kind: &'static str, name: &str) -> Self {
        Self::NotFound {
            kind,
            name: name.to_string(),
        }
    }

    pub(crate) fn already_exists(kind: &'static str, name: &str) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.to_string(),
        }
    }
}

/// Outcome of the remote process: `Err` carries the failure message reported
/// by the platform (non-zero exit, killed, ...).
pub type ExecStatus = BoxFuture<'static, Result<(), String>>;

/// A running command inside a container.
///
/// Dropping the session aborts the underlying connection, so a caller that
/// gives up (timeout, cancellation) never leaks it.
pub struct ExecSession {
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub stderr: Box<dyn AsyncRead + Send + Unpin>,
    pub status: ExecStatus,
    abort: Option<Box<dyn FnOnce() + Send>>,
}

impl ExecSession {
    pub fn new(
        stdout: Box<dyn AsyncRead + Send + Unpin>,
        stderr: Box<dyn AsyncRead + Send + Unpin>,
        status: ExecStatus,
        abort: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            stdout,
            stderr,
            status,
            abort: Some(Box::new(abort)),
        }
    }
}

impl Drop for ExecSession {
    fn drop(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort();
        }
    }
}

/// Create/get/delete primitives keyed by name, plus the few mutations the
/// lifecycle needs. All calls are scoped to the configured namespace.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_volume_claim(&self, name: &str) -> Result<PersistentVolumeClaim, ClusterError>;

    async fn create_volume_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, ClusterError>;

    async fn delete_volume_claim(&self, name: &str) -> Result<(), ClusterError>;

    async fn get_deployment(&self, name: &str) -> Result<Deployment, ClusterError>;

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, ClusterError>;

    async fn delete_deployment(&self, name: &str) -> Result<(), ClusterError>;

    async fn scale_deployment(&self, name: &str, replicas: i32) -> Result<(), ClusterError>;

    /// Sets one annotation on the pod template, which rolls the pods.
    async fn annotate_pod_template(
        &self,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ClusterError>;

    async fn get_service(&self, name: &str) -> Result<Service, ClusterError>;

    async fn create_service(&self, service: &Service) -> Result<Service, ClusterError>;

    async fn delete_service(&self, name: &str) -> Result<(), ClusterError>;

    async fn list_services(&self, label_selector: &str) -> Result<Vec<Service>, ClusterError>;

    /// First pod matching the selector, preferring one that is running.
    async fn find_pod(&self, label_selector: &str) -> Result<Option<Pod>, ClusterError>;

    async fn open_exec(
        &self,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<ExecSession, ClusterError>;
}

pub(crate) fn object_name(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> String {
    meta.name.clone().unwrap_or_default()
}

pub(crate) fn pick_pod(pods: Vec<Pod>) -> Option<Pod> {
    let running = pods.iter().position(|pod| {
        pod.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .is_some_and(|phase| phase == "Running")
    });

    match running {
        Some(idx) => pods.into_iter().nth(idx),
        None => pods.into_iter().next(),
    }
}
