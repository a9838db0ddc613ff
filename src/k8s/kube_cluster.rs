use async_trait::async_trait;
use futures::FutureExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use kube::api::{AttachParams, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::config::KubeConfigOptions;
use kube::{Api, Client, Config};
use serde_json::json;
use tracing::{debug, info};

use super::{ClusterApi, ClusterError, ExecSession, object_name, pick_pod};
use crate::config::KubernetesConfig;

/// [`ClusterApi`] backed by a real API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    namespace: String,
}

impl KubeCluster {
    #[must_use]
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Kubeconfig (optionally a named context) first, in-cluster service account second.
    pub async fn connect(config: &KubernetesConfig) -> Result<Self, ClusterError> {
        let options = KubeConfigOptions {
            context: config.context.clone(),
            ..Default::default()
        };

        let kube_config = match Config::from_kubeconfig(&options).await {
            Ok(cfg) => cfg,
            Err(e) => {
                debug!(error = %e, "No usable kubeconfig, trying in-cluster config");
                Config::incluster().map_err(|e| ClusterError::Api(e.to_string()))?
            }
        };

        let client =
            Client::try_from(kube_config).map_err(|e| ClusterError::Api(e.to_string()))?;

        info!(namespace = %config.namespace, "Connected to Kubernetes");
        Ok(Self::new(client, config.namespace.clone()))
    }

    fn claims(&self) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn map_err(err: kube::Error, kind: &'static str, name: &str) -> ClusterError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => ClusterError::not_found(kind, name),
        kube::Error::Api(resp) if resp.code == 409 => ClusterError::already_exists(kind, name),
        other => ClusterError::Api(other.to_string()),
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_volume_claim(&self, name: &str) -> Result<PersistentVolumeClaim, ClusterError> {
        self.claims()
            .get(name)
            .await
            .map_err(|e| map_err(e, "PersistentVolumeClaim", name))
    }

    async fn create_volume_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, ClusterError> {
        let name = object_name(&claim.metadata);
        self.claims()
            .create(&PostParams::default(), claim)
            .await
            .map_err(|e| map_err(e, "PersistentVolumeClaim", &name))
    }

    async fn delete_volume_claim(&self, name: &str) -> Result<(), ClusterError> {
        self.claims()
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_err(e, "PersistentVolumeClaim", name))
    }

    async fn get_deployment(&self, name: &str) -> Result<Deployment, ClusterError> {
        self.deployments()
            .get(name)
            .await
            .map_err(|e| map_err(e, "Deployment", name))
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, ClusterError> {
        let name = object_name(&deployment.metadata);
        self.deployments()
            .create(&PostParams::default(), deployment)
            .await
            .map_err(|e| map_err(e, "Deployment", &name))
    }

    async fn delete_deployment(&self, name: &str) -> Result<(), ClusterError> {
        self.deployments()
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_err(e, "Deployment", name))
    }

    async fn scale_deployment(&self, name: &str, replicas: i32) -> Result<(), ClusterError> {
        let patch = json!({ "spec": { "replicas": replicas } });
        self.deployments()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| map_err(e, "Deployment", name))
    }

    async fn annotate_pod_template(
        &self,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ClusterError> {
        let patch = json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": { key: value }
                    }
                }
            }
        });
        self.deployments()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| map_err(e, "Deployment", name))
    }

    async fn get_service(&self, name: &str) -> Result<Service, ClusterError> {
        self.services()
            .get(name)
            .await
            .map_err(|e| map_err(e, "Service", name))
    }

    async fn create_service(&self, service: &Service) -> Result<Service, ClusterError> {
        let name = object_name(&service.metadata);
        self.services()
            .create(&PostParams::default(), service)
            .await
            .map_err(|e| map_err(e, "Service", &name))
    }

    async fn delete_service(&self, name: &str) -> Result<(), ClusterError> {
        self.services()
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_err(e, "Service", name))
    }

    async fn list_services(&self, label_selector: &str) -> Result<Vec<Service>, ClusterError> {
        self.services()
            .list(&ListParams::default().labels(label_selector))
            .await
            .map(|list| list.items)
            .map_err(|e| ClusterError::Api(e.to_string()))
    }

    async fn find_pod(&self, label_selector: &str) -> Result<Option<Pod>, ClusterError> {
        let pods = self
            .pods()
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| ClusterError::Api(e.to_string()))?;

        Ok(pick_pod(pods.items))
    }

    async fn open_exec(
        &self,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<ExecSession, ClusterError> {
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true);

        let mut process = self
            .pods()
            .exec(pod, command, &params)
            .await
            .map_err(|e| map_err(e, "Pod", pod))?;

        let stdout = process
            .stdout()
            .ok_or_else(|| ClusterError::Stream("stdout not attached".to_string()))?;
        let stderr = process
            .stderr()
            .ok_or_else(|| ClusterError::Stream("stderr not attached".to_string()))?;
        let status = process
            .take_status()
            .ok_or_else(|| ClusterError::Stream("status channel not available".to_string()))?;

        let status = async move {
            match status.await {
                Some(s) if s.status.as_deref() == Some("Success") => Ok(()),
                Some(s) => Err(s
                    .message
                    .unwrap_or_else(|| "command exited with a failure status".to_string())),
                None => Err("exec stream closed without a status".to_string()),
            }
        }
        .boxed();

        Ok(ExecSession::new(
            Box::new(stdout),
            Box::new(stderr),
            status,
            move || process.abort(),
        ))
    }
}
