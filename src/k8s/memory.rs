//! In-process [`ClusterApi`] implementation.
//!
//! Objects live in maps behind a mutex. A deployment with at least one
//! desired replica owns exactly one synthetic pod named `<workload>-0`, in
//! the `Running` phase unless told otherwise. Faults can be injected for
//! workload creation, deletes and exec.

use async_trait::async_trait;
use futures::FutureExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, PodStatus, Service, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::io::AsyncReadExt;

use super::{ClusterApi, ClusterError, ExecSession, object_name, pick_pod};

/// What an exec into a synthetic pod does.
#[derive(Debug, Clone)]
pub enum ExecBehavior {
    /// Emit the output and exit cleanly.
    Succeed { stdout: String, stderr: String },
    /// Emit the output and exit with a failure status.
    Fail {
        stdout: String,
        stderr: String,
        message: String,
    },
    /// Emit the output, then never finish.
    Hang { stdout: String },
    /// Emit the output, then fail the stdout stream.
    Break { stdout: String, error: String },
}

impl Default for ExecBehavior {
    fn default() -> Self {
        Self::Succeed {
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// Object kinds whose deletion can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    VolumeClaim,
    Deployment,
    Service,
}

#[derive(Default)]
struct ClusterState {
    claims: BTreeMap<String, PersistentVolumeClaim>,
    deployments: BTreeMap<String, Deployment>,
    services: BTreeMap<String, Service>,
    next_node_port: i32,
    fail_deployment_create: bool,
    failing_deletes: Vec<ResourceKind>,
    pod_phase: Option<String>,
    exec_behavior: ExecBehavior,
    exec_log: Vec<(String, Vec<String>)>,
}

#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
}

impl ClusterState {
    fn pods(&self) -> impl Iterator<Item = Pod> + '_ {
        let phase = self.pod_phase.as_deref().unwrap_or("Running");
        self.deployments
            .values()
            .filter_map(move |d| synthetic_pod(d, phase))
    }

    fn check_delete(&self, kind: ResourceKind, name: &str) -> Result<(), ClusterError> {
        if self.failing_deletes.contains(&kind) {
            return Err(ClusterError::Api(format!(
                "delete of {kind:?} {name} rejected by the API server"
            )));
        }
        Ok(())
    }
}

impl InMemoryCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        // A panic while holding the lock leaves the maps consistent.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Makes every following deployment creation fail with an API error.
    pub fn fail_deployment_creates(&self, fail: bool) {
        self.lock().fail_deployment_create = fail;
    }

    /// Makes every following delete of `kind` fail with an API error.
    pub fn fail_deletes_of(&self, kind: ResourceKind) {
        let mut state = self.lock();
        if !state.failing_deletes.contains(&kind) {
            state.failing_deletes.push(kind);
        }
    }

    /// Phase reported for synthetic pods. Exec is refused unless it is `Running`.
    pub fn set_pod_phase(&self, phase: &str) {
        self.lock().pod_phase = Some(phase.to_string());
    }

    pub fn set_exec_behavior(&self, behavior: ExecBehavior) {
        self.lock().exec_behavior = behavior;
    }

    /// Every `(pod, argv)` exec issued so far.
    #[must_use]
    pub fn exec_log(&self) -> Vec<(String, Vec<String>)> {
        self.lock().exec_log.clone()
    }

    #[must_use]
    pub fn volume_claim_names(&self) -> Vec<String> {
        self.lock().claims.keys().cloned().collect()
    }

    #[must_use]
    pub fn deployment_names(&self) -> Vec<String> {
        self.lock().deployments.keys().cloned().collect()
    }

    #[must_use]
    pub fn service_names(&self) -> Vec<String> {
        self.lock().services.keys().cloned().collect()
    }

    /// Simulates the platform assigning a load balancer address.
    pub fn assign_load_balancer_ip(&self, service: &str, ip: &str) -> Result<(), ClusterError> {
        use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, ServiceStatus};

        let mut state = self.lock();
        let svc = state
            .services
            .get_mut(service)
            .ok_or_else(|| ClusterError::not_found("Service", service))?;
        svc.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress {
                    ip: Some(ip.to_string()),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        });
        Ok(())
    }
}

fn matches_selector(meta: &ObjectMeta, selector: &str) -> bool {
    let labels = meta.labels.as_ref();
    selector
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .all(|(key, value)| {
            labels
                .and_then(|l| l.get(key.trim()))
                .is_some_and(|v| v == value.trim())
        })
}

fn synthetic_pod(deployment: &Deployment, phase: &str) -> Option<Pod> {
    let spec = deployment.spec.as_ref()?;
    if spec.replicas.unwrap_or(0) < 1 {
        return None;
    }

    let workload = object_name(&deployment.metadata);
    let template_labels = spec
        .template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();

    Some(Pod {
        metadata: ObjectMeta {
            name: Some(format!("{workload}-0")),
            labels: Some(template_labels),
            ..Default::default()
        },
        spec: spec.template.spec.clone(),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
    })
}

fn boxed_reader(text: String) -> Box<dyn tokio::io::AsyncRead + Send + Unpin> {
    Box::new(Cursor::new(text.into_bytes()))
}

/// Reader that fails on first poll, standing in for a dropped websocket.
struct BrokenStream(String);

impl tokio::io::AsyncRead for BrokenStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Ready(Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            self.0.clone(),
        )))
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn get_volume_claim(&self, name: &str) -> Result<PersistentVolumeClaim, ClusterError> {
        self.lock()
            .claims
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::not_found("PersistentVolumeClaim", name))
    }

    async fn create_volume_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, ClusterError> {
        let name = object_name(&claim.metadata);
        let mut state = self.lock();
        if state.claims.contains_key(&name) {
            return Err(ClusterError::already_exists("PersistentVolumeClaim", &name));
        }
        state.claims.insert(name, claim.clone());
        Ok(claim.clone())
    }

    async fn delete_volume_claim(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.lock();
        state.check_delete(ResourceKind::VolumeClaim, name)?;
        state
            .claims
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ClusterError::not_found("PersistentVolumeClaim", name))
    }

    async fn get_deployment(&self, name: &str) -> Result<Deployment, ClusterError> {
        self.lock()
            .deployments
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::not_found("Deployment", name))
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, ClusterError> {
        let name = object_name(&deployment.metadata);
        let mut state = self.lock();
        if state.fail_deployment_create {
            return Err(ClusterError::Api(format!(
                "admission webhook denied deployment {name}"
            )));
        }
        if state.deployments.contains_key(&name) {
            return Err(ClusterError::already_exists("Deployment", &name));
        }
        state.deployments.insert(name, deployment.clone());
        Ok(deployment.clone())
    }

    async fn delete_deployment(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.lock();
        state.check_delete(ResourceKind::Deployment, name)?;
        state
            .deployments
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ClusterError::not_found("Deployment", name))
    }

    async fn scale_deployment(&self, name: &str, replicas: i32) -> Result<(), ClusterError> {
        let mut state = self.lock();
        let deployment = state
            .deployments
            .get_mut(name)
            .ok_or_else(|| ClusterError::not_found("Deployment", name))?;
        deployment.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
        Ok(())
    }

    async fn annotate_pod_template(
        &self,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ClusterError> {
        let mut state = self.lock();
        let deployment = state
            .deployments
            .get_mut(name)
            .ok_or_else(|| ClusterError::not_found("Deployment", name))?;
        deployment
            .spec
            .get_or_insert_with(Default::default)
            .template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations
            .get_or_insert_with(Default::default)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_service(&self, name: &str) -> Result<Service, ClusterError> {
        self.lock()
            .services
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::not_found("Service", name))
    }

    async fn create_service(&self, service: &Service) -> Result<Service, ClusterError> {
        let name = object_name(&service.metadata);
        let mut state = self.lock();
        if state.services.contains_key(&name) {
            return Err(ClusterError::already_exists("Service", &name));
        }

        let mut stored = service.clone();
        let spec = stored.spec.get_or_insert_with(ServiceSpec::default);
        let service_type = spec.type_.clone().unwrap_or_else(|| "ClusterIP".to_string());
        spec.cluster_ip = Some(format!("10.96.0.{}", state.services.len() + 10));
        if service_type == "NodePort" || service_type == "LoadBalancer" {
            let node_port = 30000 + state.next_node_port;
            state.next_node_port += 1;
            for port in spec.ports.iter_mut().flatten() {
                port.node_port = Some(node_port);
            }
        }

        state.services.insert(name, stored.clone());
        Ok(stored)
    }

    async fn delete_service(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.lock();
        state.check_delete(ResourceKind::Service, name)?;
        state
            .services
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ClusterError::not_found("Service", name))
    }

    async fn list_services(&self, label_selector: &str) -> Result<Vec<Service>, ClusterError> {
        Ok(self
            .lock()
            .services
            .values()
            .filter(|svc| matches_selector(&svc.metadata, label_selector))
            .cloned()
            .collect())
    }

    async fn find_pod(&self, label_selector: &str) -> Result<Option<Pod>, ClusterError> {
        let pods = self
            .lock()
            .pods()
            .filter(|pod| matches_selector(&pod.metadata, label_selector))
            .collect();
        Ok(pick_pod(pods))
    }

    async fn open_exec(
        &self,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<ExecSession, ClusterError> {
        let mut state = self.lock();
        let target = state
            .pods()
            .find(|p| p.metadata.name.as_deref() == Some(pod))
            .ok_or_else(|| ClusterError::not_found("Pod", pod))?;
        let phase = target
            .status
            .and_then(|s| s.phase)
            .unwrap_or_default();
        if phase != "Running" {
            return Err(ClusterError::Api(format!(
                "container {container} is not running (pod {phase})"
            )));
        }

        state.exec_log.push((pod.to_string(), command));

        let session = match state.exec_behavior.clone() {
            ExecBehavior::Succeed { stdout, stderr } => ExecSession::new(
                boxed_reader(stdout),
                boxed_reader(stderr),
                futures::future::ready(Ok(())).boxed(),
                || {},
            ),
            ExecBehavior::Fail {
                stdout,
                stderr,
                message,
            } => ExecSession::new(
                boxed_reader(stdout),
                boxed_reader(stderr),
                futures::future::ready(Err(message)).boxed(),
                || {},
            ),
            ExecBehavior::Hang { stdout } => {
                // The open half keeps the stream pending until the session is dropped.
                let (writer, pending) = tokio::io::duplex(64);
                let stdout = Cursor::new(stdout.into_bytes()).chain(pending);
                ExecSession::new(
                    Box::new(stdout),
                    boxed_reader(String::new()),
                    futures::future::pending::<Result<(), String>>().boxed(),
                    move || drop(writer),
                )
            }
            ExecBehavior::Break { stdout, error } => {
                let stdout = Cursor::new(stdout.into_bytes()).chain(BrokenStream(error.clone()));
                ExecSession::new(
                    Box::new(stdout),
                    boxed_reader(String::new()),
                    futures::future::ready(Err(error)).boxed(),
                    || {},
                )
            }
        };

        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KubernetesConfig;
    use crate::constants::labels;
    use crate::domain::{ResourceNames, ServerName};
    use crate::k8s::resources;
    use std::collections::BTreeMap;

    fn names() -> ResourceNames {
        ResourceNames::derive(
            &ServerName::new("alice-survival").unwrap(),
            &KubernetesConfig::default(),
        )
    }

    #[tokio::test]
    async fn create_is_create_if_absent() {
        let cluster = InMemoryCluster::new();
        let claim = resources::volume_claim(&names(), &KubernetesConfig::default());

        cluster.create_volume_claim(&claim).await.unwrap();
        let err = cluster.create_volume_claim(&claim).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(cluster.volume_claim_names().len(), 1);
    }

    #[tokio::test]
    async fn pod_follows_replica_count() {
        let cluster = InMemoryCluster::new();
        let names = names();
        let deployment =
            resources::deployment(&names, &KubernetesConfig::default(), &BTreeMap::new());
        cluster.create_deployment(&deployment).await.unwrap();

        let pod = cluster.find_pod(&names.selector()).await.unwrap().unwrap();
        assert_eq!(
            pod.metadata.name.as_deref(),
            Some("minecraft-server-alice-survival-0")
        );

        cluster.scale_deployment(&names.workload, 0).await.unwrap();
        assert!(cluster.find_pod(&names.selector()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn services_are_selected_by_label() {
        let cluster = InMemoryCluster::new();
        let names = names();
        let svc = resources::service(&names, "NodePort", 25565, BTreeMap::new());
        let created = cluster.create_service(&svc).await.unwrap();

        let node_port = created.spec.unwrap().ports.unwrap()[0].node_port;
        assert_eq!(node_port, Some(30000));

        assert_eq!(cluster.list_services(&names.selector()).await.unwrap().len(), 1);
        assert!(cluster.list_services("app=other").await.unwrap().is_empty());
        let managed = format!("{}={}", labels::CREATED_BY, labels::CREATED_BY_VALUE);
        assert_eq!(cluster.list_services(&managed).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pending_pod_refuses_exec() {
        let cluster = InMemoryCluster::new();
        let names = names();
        let deployment =
            resources::deployment(&names, &KubernetesConfig::default(), &BTreeMap::new());
        cluster.create_deployment(&deployment).await.unwrap();
        cluster.set_pod_phase("Pending");

        let pod = cluster.find_pod(&names.selector()).await.unwrap().unwrap();
        assert_eq!(
            pod.status.and_then(|s| s.phase).as_deref(),
            Some("Pending")
        );

        let result = cluster
            .open_exec(
                "minecraft-server-alice-survival-0",
                "minecraft-server",
                vec!["true".to_string()],
            )
            .await;
        assert!(matches!(result, Err(ClusterError::Api(_))));
        assert!(cluster.exec_log().is_empty());
    }

    #[tokio::test]
    async fn injected_delete_failure_keeps_the_object() {
        let cluster = InMemoryCluster::new();
        let claim = resources::volume_claim(&names(), &KubernetesConfig::default());
        cluster.create_volume_claim(&claim).await.unwrap();
        cluster.fail_deletes_of(ResourceKind::VolumeClaim);

        let err = cluster
            .delete_volume_claim("minecraft-server-alice-survival-pvc")
            .await
            .unwrap_err();
        assert!(!err.is_not_found());
        assert_eq!(cluster.volume_claim_names().len(), 1);
    }
}
