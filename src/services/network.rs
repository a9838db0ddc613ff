//! Network exposure of a server's game port.
//!
//! A server has at most one Service. Re-exposing deletes whatever was there
//! before creating the replacement.

use k8s_openapi::api::core::v1::Service;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::constants::{annotations, game};
use crate::domain::ResourceNames;
use crate::k8s::{ClusterApi, ClusterError, object_name, resources};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExposureMode {
    /// Reachable from inside the cluster only.
    #[serde(rename = "ClusterIP")]
    ClusterIp,
    NodePort,
    LoadBalancer,
    /// Cluster-internal Service that mc-router multiplexes by hostname.
    #[serde(rename = "MCRouter")]
    McRouter,
}

impl ExposureMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClusterIp => "ClusterIP",
            Self::NodePort => "NodePort",
            Self::LoadBalancer => "LoadBalancer",
            Self::McRouter => "MCRouter",
        }
    }

    /// Kubernetes `spec.type` used for this mode.
    #[must_use]
    pub const fn service_type(self) -> &'static str {
        match self {
            Self::ClusterIp | Self::McRouter => "ClusterIP",
            Self::NodePort => "NodePort",
            Self::LoadBalancer => "LoadBalancer",
        }
    }
}

impl fmt::Display for ExposureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExposureMode {
    type Err = ExposureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ClusterIP" => Ok(Self::ClusterIp),
            "NodePort" => Ok(Self::NodePort),
            "LoadBalancer" => Ok(Self::LoadBalancer),
            "MCRouter" => Ok(Self::McRouter),
            other => Err(ExposureError::Validation(format!(
                "invalid exposure type '{other}', must be one of: ClusterIP, NodePort, LoadBalancer, MCRouter"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposureRequest {
    pub mode: ExposureMode,
    /// Service port; the game port when `None`.
    pub port: Option<i32>,
    /// Hostname routed to this server. Required for [`ExposureMode::McRouter`].
    pub domain: Option<String>,
}

impl ExposureRequest {
    fn validate(&self) -> Result<i32, ExposureError> {
        if self.mode == ExposureMode::McRouter
            && self.domain.as_deref().is_none_or(|d| d.trim().is_empty())
        {
            return Err(ExposureError::Validation(
                "domain is required for MCRouter exposure".to_string(),
            ));
        }

        match self.port {
            None => Ok(game::PORT),
            Some(port) if port <= 0 => Ok(game::PORT),
            Some(port) if port > 65535 => Err(ExposureError::Validation(format!(
                "port {port} is out of range"
            ))),
            Some(port) => Ok(port),
        }
    }
}

/// What was created, with the mode-specific address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExposureDetails {
    pub service_name: String,
    pub exposure_type: ExposureMode,
    pub service_type: String,
    pub port: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_port: Option<i32>,
    /// IP or hostname, or `"pending"` until the platform assigns one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// Short description of a live Service, used in server details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSummary {
    pub name: String,
    pub service_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_port: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl From<&Service> for ServiceSummary {
    fn from(svc: &Service) -> Self {
        let spec = svc.spec.as_ref();
        let service_type = spec
            .and_then(|s| s.type_.clone())
            .unwrap_or_else(|| "ClusterIP".to_string());
        let external_address =
            (service_type == "LoadBalancer").then(|| external_address(svc));

        Self {
            name: object_name(&svc.metadata),
            cluster_ip: spec.and_then(|s| s.cluster_ip.clone()),
            node_port: node_port(svc),
            external_address,
            domain: svc
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(annotations::MC_ROUTER_SERVER_NAME).cloned()),
            service_type,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExposureError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Workload {0} not found")]
    WorkloadNotFound(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

fn node_port(svc: &Service) -> Option<i32> {
    svc.spec
        .as_ref()?
        .ports
        .as_ref()?
        .first()?
        .node_port
        .filter(|p| *p > 0)
}

fn external_address(svc: &Service) -> String {
    svc.status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|ingress| ingress.first())
        .and_then(|first| {
            first
                .ip
                .clone()
                .filter(|ip| !ip.is_empty())
                .or_else(|| first.hostname.clone())
        })
        .filter(|addr| !addr.is_empty())
        .unwrap_or_else(|| "pending".to_string())
}

/// Creates and replaces the Service in front of a workload.
pub struct NetworkExposureManager {
    cluster: Arc<dyn ClusterApi>,
}

impl NetworkExposureManager {
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Replaces any existing exposure of the workload with a single Service.
    pub async fn expose(
        &self,
        names: &ResourceNames,
        request: &ExposureRequest,
    ) -> Result<ExposureDetails, ExposureError> {
        let port = request.validate()?;

        match self.cluster.get_deployment(&names.workload).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                return Err(ExposureError::WorkloadNotFound(names.workload.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        let removed = self.remove(names).await?;
        if !removed.is_empty() {
            debug!(workload = %names.workload, ?removed, "Removed previous exposure");
        }

        let mut service_annotations = BTreeMap::new();
        let domain = match request.mode {
            ExposureMode::McRouter => request.domain.as_ref().map(|d| d.trim().to_string()),
            _ => None,
        };
        if let Some(domain) = &domain {
            service_annotations.insert(
                annotations::MC_ROUTER_SERVER_NAME.to_string(),
                domain.clone(),
            );
        }

        let service = resources::service(
            names,
            request.mode.service_type(),
            port,
            service_annotations,
        );
        let created = self.cluster.create_service(&service).await?;

        let details = ExposureDetails {
            service_name: object_name(&created.metadata),
            exposure_type: request.mode,
            service_type: request.mode.service_type().to_string(),
            port,
            node_port: match request.mode {
                ExposureMode::NodePort | ExposureMode::LoadBalancer => node_port(&created),
                _ => None,
            },
            external_address: (request.mode == ExposureMode::LoadBalancer)
                .then(|| external_address(&created)),
            domain,
        };

        info!(
            workload = %names.workload,
            service = %details.service_name,
            exposure_type = %request.mode,
            port,
            "Server exposed"
        );

        Ok(details)
    }

    /// Deletes every Service labelled for the workload plus the
    /// deterministic service name. Returns the names actually deleted.
    pub async fn remove(&self, names: &ResourceNames) -> Result<Vec<String>, ClusterError> {
        let mut targets: Vec<String> = self
            .cluster
            .list_services(&names.selector())
            .await?
            .iter()
            .map(|svc| object_name(&svc.metadata))
            .filter(|name| !name.is_empty())
            .collect();
        if !targets.contains(&names.service) {
            targets.push(names.service.clone());
        }

        let mut removed = Vec::new();
        for name in targets {
            match self.cluster.delete_service(&name).await {
                Ok(()) => removed.push(name),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        Ok(removed)
    }

    /// Live Services in front of the workload.
    pub async fn describe(&self, names: &ResourceNames) -> Result<Vec<ServiceSummary>, ClusterError> {
        Ok(self
            .cluster
            .list_services(&names.selector())
            .await?
            .iter()
            .map(ServiceSummary::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KubernetesConfig;
    use crate::domain::ServerName;
    use crate::k8s::InMemoryCluster;

    fn names() -> ResourceNames {
        ResourceNames::derive(
            &ServerName::new("alice-survival").unwrap(),
            &KubernetesConfig::default(),
        )
    }

    async fn cluster_with_workload() -> Arc<InMemoryCluster> {
        let cluster = Arc::new(InMemoryCluster::new());
        let deployment =
            resources::deployment(&names(), &KubernetesConfig::default(), &BTreeMap::new());
        cluster.create_deployment(&deployment).await.unwrap();
        cluster
    }

    fn request(mode: ExposureMode) -> ExposureRequest {
        ExposureRequest {
            mode,
            port: None,
            domain: None,
        }
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("MCRouter".parse::<ExposureMode>().unwrap(), ExposureMode::McRouter);
        assert_eq!("ClusterIP".parse::<ExposureMode>().unwrap(), ExposureMode::ClusterIp);
        assert!("Ingress".parse::<ExposureMode>().is_err());
        let json = serde_json::to_string(&ExposureMode::McRouter).unwrap();
        assert_eq!(json, "\"MCRouter\"");
    }

    #[test]
    fn router_mode_requires_domain() {
        let err = request(ExposureMode::McRouter).validate().unwrap_err();
        assert!(matches!(err, ExposureError::Validation(_)));

        let ok = ExposureRequest {
            domain: Some("alice.play.example.com".to_string()),
            ..request(ExposureMode::McRouter)
        };
        assert_eq!(ok.validate().unwrap(), game::PORT);
    }

    #[tokio::test]
    async fn node_port_reports_assigned_port() {
        let cluster = cluster_with_workload().await;
        let manager = NetworkExposureManager::new(cluster.clone());

        let details = manager
            .expose(&names(), &request(ExposureMode::NodePort))
            .await
            .unwrap();
        assert_eq!(details.service_type, "NodePort");
        assert_eq!(details.port, 25565);
        assert!(details.node_port.is_some());
        assert!(details.external_address.is_none());
    }

    #[tokio::test]
    async fn load_balancer_is_pending_until_assigned() {
        let cluster = cluster_with_workload().await;
        let manager = NetworkExposureManager::new(cluster.clone());
        let names = names();

        let details = manager
            .expose(&names, &request(ExposureMode::LoadBalancer))
            .await
            .unwrap();
        assert_eq!(details.external_address.as_deref(), Some("pending"));

        cluster
            .assign_load_balancer_ip(&names.service, "203.0.113.7")
            .unwrap();
        let summary = manager.describe(&names).await.unwrap();
        assert_eq!(summary[0].external_address.as_deref(), Some("203.0.113.7"));
    }

    #[tokio::test]
    async fn router_domain_is_an_annotation() {
        let cluster = cluster_with_workload().await;
        let manager = NetworkExposureManager::new(cluster.clone());
        let names = names();

        let details = manager
            .expose(
                &names,
                &ExposureRequest {
                    mode: ExposureMode::McRouter,
                    port: None,
                    domain: Some("alice.play.example.com".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(details.service_type, "ClusterIP");
        assert_eq!(details.domain.as_deref(), Some("alice.play.example.com"));

        let svc = cluster.get_service(&names.service).await.unwrap();
        let service_annotations = svc.metadata.annotations.unwrap();
        assert_eq!(
            service_annotations[annotations::MC_ROUTER_SERVER_NAME],
            "alice.play.example.com"
        );
    }

    #[tokio::test]
    async fn re_expose_leaves_one_service() {
        let cluster = cluster_with_workload().await;
        let manager = NetworkExposureManager::new(cluster.clone());
        let names = names();

        manager
            .expose(&names, &request(ExposureMode::NodePort))
            .await
            .unwrap();
        manager
            .expose(&names, &request(ExposureMode::LoadBalancer))
            .await
            .unwrap();

        let services = cluster.list_services(&names.selector()).await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(
            services[0].spec.as_ref().unwrap().type_.as_deref(),
            Some("LoadBalancer")
        );
    }

    #[tokio::test]
    async fn exposing_missing_workload_fails() {
        let manager = NetworkExposureManager::new(Arc::new(InMemoryCluster::new()));
        let err = manager
            .expose(&names(), &request(ExposureMode::ClusterIp))
            .await
            .unwrap_err();
        assert!(matches!(err, ExposureError::WorkloadNotFound(_)));
    }
}
