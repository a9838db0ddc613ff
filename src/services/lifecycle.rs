//! Server lifecycle: create, stop, restart, start and delete.
//!
//! Each transition sequences the volume claim, the workload and the network
//! exposure of one server. There is no application-level locking; concurrent
//! calls for the same name rely on the platform's create-if-absent and
//! delete-if-present semantics.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::exec::{ExecError, ExecOutput, RemoteExecutor, is_running};
use super::network::{
    ExposureDetails, ExposureError, ExposureRequest, NetworkExposureManager, ServiceSummary,
};
use crate::auth::Principal;
use crate::config::KubernetesConfig;
use crate::constants::annotations;
use crate::db::{CredentialStore, NewServerRecord, ServerRecord, StoreError};
use crate::domain::{ResourceNames, ServerName, ServerStatus};
use crate::k8s::{ClusterApi, ClusterError, resources};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Server {0} not found")]
    ServerNotFound(String),

    #[error("Workload {0} not found")]
    WorkloadNotFound(String),

    #[error("Server {0} belongs to another user")]
    OwnedByOther(String),

    #[error("Server {0} has no running instance")]
    NotRunning(String),

    /// The world could not be saved; the server was left untouched.
    #[error("World save failed: {0}")]
    SaveFailed(#[source] ExecError),

    #[error(transparent)]
    Exec(ExecError),

    #[error(transparent)]
    Exposure(#[from] ExposureError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LifecycleError {
    /// Output captured by a failed remote command, if any.
    #[must_use]
    pub const fn exec_output(&self) -> Option<&ExecOutput> {
        match self {
            Self::SaveFailed(e) | Self::Exec(e) => Some(&e.output),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub server: ServerRecord,
    pub volume_claim_created: bool,
    pub workload_created: bool,
}

/// Result of a best-effort delete. `warnings` lists sub-resources that could
/// not be removed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteReport {
    pub removed: Vec<String>,
    pub warnings: Vec<String>,
}

impl DeleteReport {
    fn step(&mut self, what: &str, name: &str, result: Result<(), ClusterError>) {
        match result {
            Ok(()) => self.removed.push(name.to_string()),
            Err(e) if e.is_not_found() => debug!(what, name, "Already absent"),
            Err(e) => {
                warn!(what, name, error = %e, "Failed to delete");
                self.warnings.push(format!("failed to delete {what} {name}: {e}"));
            }
        }
    }
}

/// Live view of the workload behind a server.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkloadState {
    pub desired_replicas: i32,
    pub ready_replicas: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_phase: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerState {
    pub record: ServerRecord,
    pub workload: Option<WorkloadState>,
    pub services: Vec<ServiceSummary>,
}

fn record_outcome<T>(operation: &'static str, result: &Result<T, LifecycleError>) {
    let outcome = if result.is_ok() { "success" } else { "failure" };
    metrics::counter!(
        "lifecycle_operations_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}

pub struct LifecycleOrchestrator {
    cluster: Arc<dyn ClusterApi>,
    store: Arc<dyn CredentialStore>,
    executor: Arc<RemoteExecutor>,
    network: Arc<NetworkExposureManager>,
    config: KubernetesConfig,
}

impl LifecycleOrchestrator {
    #[must_use]
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        store: Arc<dyn CredentialStore>,
        executor: Arc<RemoteExecutor>,
        network: Arc<NetworkExposureManager>,
        config: KubernetesConfig,
    ) -> Self {
        Self {
            cluster,
            store,
            executor,
            network,
            config,
        }
    }

    #[must_use]
    pub fn names(&self, name: &ServerName) -> ResourceNames {
        ResourceNames::derive(name, &self.config)
    }

    /// Provisions the volume claim and the workload.
    ///
    /// Repeating the call for an existing server is a no-op that succeeds.
    /// If the workload cannot be created, a claim created by this call is
    /// removed again; a claim that already existed is never touched.
    pub async fn create(
        &self,
        owner: &Principal,
        name: &ServerName,
        env: &BTreeMap<String, String>,
    ) -> Result<CreateOutcome, LifecycleError> {
        let result = self.try_create(owner, name, env).await;
        record_outcome("create", &result);
        result
    }

    async fn try_create(
        &self,
        owner: &Principal,
        name: &ServerName,
        env: &BTreeMap<String, String>,
    ) -> Result<CreateOutcome, LifecycleError> {
        let names = self.names(name);
        let record_created = self.claim_record(owner, name, &names).await?;

        let volume_claim_created = match self.ensure_volume_claim(&names).await {
            Ok(created) => created,
            Err(e) => {
                if record_created {
                    self.discard_record(name).await;
                }
                return Err(e.into());
            }
        };

        let deployment = resources::deployment(&names, &self.config, env);
        let workload_created = match self.cluster.create_deployment(&deployment).await {
            Ok(_) => true,
            Err(e) if e.is_already_exists() => {
                debug!(workload = %names.workload, "Workload already exists");
                false
            }
            Err(e) => {
                warn!(server_name = %name, workload = %names.workload, error = %e, "Workload creation failed, rolling back");
                if volume_claim_created {
                    match self.cluster.delete_volume_claim(&names.volume_claim).await {
                        Ok(()) => info!(volume_claim = %names.volume_claim, "Rolled back volume claim"),
                        Err(rollback) => warn!(
                            volume_claim = %names.volume_claim,
                            error = %rollback,
                            "Failed to roll back volume claim"
                        ),
                    }
                }
                if record_created {
                    self.discard_record(name).await;
                }
                return Err(e.into());
            }
        };

        let status = if workload_created {
            ServerStatus::Running
        } else {
            let existing = self.cluster.get_deployment(&names.workload).await?;
            if resources::desired_replicas(&existing) > 0 {
                ServerStatus::Running
            } else {
                ServerStatus::Stopped
            }
        };
        let server = self.store.update_server_status(name.as_str(), status).await?;

        info!(
            server_name = %name,
            owner_id = server.owner_id,
            volume_claim_created,
            workload_created,
            "Server created"
        );

        Ok(CreateOutcome {
            server,
            volume_claim_created,
            workload_created,
        })
    }

    /// Creates the ownership record. Returns whether this call created it.
    async fn claim_record(
        &self,
        owner: &Principal,
        name: &ServerName,
        names: &ResourceNames,
    ) -> Result<bool, LifecycleError> {
        let new = NewServerRecord {
            server_name: name.to_string(),
            workload_name: names.workload.clone(),
            volume_claim_name: names.volume_claim.clone(),
            owner_id: owner.user_id,
            status: ServerStatus::Creating,
        };

        match self.store.create_server_record(new).await {
            Ok(_) => Ok(true),
            Err(StoreError::AlreadyExists(_)) => {
                let existing = self.store.get_server_by_name(name.as_str()).await?;
                if existing.owner_id != owner.user_id && !owner.is_admin() {
                    return Err(LifecycleError::OwnedByOther(name.to_string()));
                }
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn discard_record(&self, name: &ServerName) {
        if let Err(e) = self.store.delete_server_record(name.as_str()).await {
            if !e.is_not_found() {
                warn!(server_name = %name, error = %e, "Failed to discard server record");
            }
        }
    }

    /// Returns whether this call created the claim.
    async fn ensure_volume_claim(&self, names: &ResourceNames) -> Result<bool, ClusterError> {
        match self.cluster.get_volume_claim(&names.volume_claim).await {
            Ok(_) => {
                debug!(volume_claim = %names.volume_claim, "Volume claim already exists");
                return Ok(false);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let claim = resources::volume_claim(names, &self.config);
        match self.cluster.create_volume_claim(&claim).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_already_exists() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Saves the world, then scales the workload to zero. The volume claim and
    /// the workload object are kept. A failed save aborts the stop.
    pub async fn stop(&self, name: &ServerName) -> Result<ServerRecord, LifecycleError> {
        let result = self.try_stop(name).await;
        record_outcome("stop", &result);
        result
    }

    async fn try_stop(&self, name: &ServerName) -> Result<ServerRecord, LifecycleError> {
        let names = self.existing(name).await?;
        self.require_workload(&names).await?;

        match self.running_pod(&names).await? {
            Some(pod) => self.save_world(&pod).await?,
            None => debug!(workload = %names.workload, "No running pod, nothing to save"),
        }

        self.cluster.scale_deployment(&names.workload, 0).await?;
        let record = self
            .store
            .update_server_status(name.as_str(), ServerStatus::Stopped)
            .await?;

        info!(server_name = %name, workload = %names.workload, "Server stopped");
        Ok(record)
    }

    /// Saves the world, then rolls the pods by stamping the pod template.
    pub async fn restart(&self, name: &ServerName) -> Result<ServerRecord, LifecycleError> {
        let result = self.try_restart(name).await;
        record_outcome("restart", &result);
        result
    }

    async fn try_restart(&self, name: &ServerName) -> Result<ServerRecord, LifecycleError> {
        let names = self.existing(name).await?;
        self.require_workload(&names).await?;

        let pod = self
            .running_pod(&names)
            .await?
            .ok_or_else(|| LifecycleError::NotRunning(name.to_string()))?;
        self.save_world(&pod).await?;

        let stamp = chrono::Utc::now().to_rfc3339();
        self.cluster
            .annotate_pod_template(&names.workload, annotations::RESTARTED_AT, &stamp)
            .await?;

        let record = self
            .store
            .update_server_status(name.as_str(), ServerStatus::Running)
            .await?;

        info!(server_name = %name, workload = %names.workload, restarted_at = %stamp, "Server restarting");
        Ok(record)
    }

    /// Scales a stopped workload back to the configured replica count.
    pub async fn start(&self, name: &ServerName) -> Result<ServerRecord, LifecycleError> {
        let result = self.try_start(name).await;
        record_outcome("start", &result);
        result
    }

    async fn try_start(&self, name: &ServerName) -> Result<ServerRecord, LifecycleError> {
        let names = self.existing(name).await?;
        self.require_workload(&names).await?;

        self.cluster
            .scale_deployment(&names.workload, self.config.default_replicas)
            .await?;
        let record = self
            .store
            .update_server_status(name.as_str(), ServerStatus::Running)
            .await?;

        info!(
            server_name = %name,
            replicas = self.config.default_replicas,
            "Server started"
        );
        Ok(record)
    }

    /// Removes the workload, the volume claim, every Service and the record.
    /// Missing pieces are skipped; other failures become warnings.
    pub async fn delete(&self, name: &ServerName) -> DeleteReport {
        let names = self.names(name);
        let mut report = DeleteReport::default();

        report.step(
            "workload",
            &names.workload,
            self.cluster.delete_deployment(&names.workload).await,
        );
        report.step(
            "volume claim",
            &names.volume_claim,
            self.cluster.delete_volume_claim(&names.volume_claim).await,
        );

        match self.network.remove(&names).await {
            Ok(removed) => report.removed.extend(removed),
            Err(e) => {
                warn!(server_name = %name, error = %e, "Failed to remove services");
                report
                    .warnings
                    .push(format!("failed to delete services for {}: {e}", names.workload));
            }
        }

        match self.store.delete_server_record(name.as_str()).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!(server_name = %name, error = %e, "Failed to delete server record");
                report
                    .warnings
                    .push(format!("failed to delete server record: {e}"));
            }
        }

        let outcome = if report.warnings.is_empty() { "success" } else { "partial" };
        metrics::counter!(
            "lifecycle_operations_total",
            "operation" => "delete",
            "outcome" => outcome
        )
        .increment(1);

        info!(
            server_name = %name,
            removed = report.removed.len(),
            warnings = report.warnings.len(),
            "Server deleted"
        );
        report
    }

    /// Runs an in-game console command on the server's pod.
    pub async fn console(
        &self,
        name: &ServerName,
        command: &str,
    ) -> Result<ExecOutput, LifecycleError> {
        let names = self.existing(name).await?;
        self.executor
            .console(&names, command)
            .await
            .map_err(LifecycleError::Exec)
    }

    pub async fn expose(
        &self,
        name: &ServerName,
        request: &ExposureRequest,
    ) -> Result<ExposureDetails, LifecycleError> {
        let names = self.existing(name).await?;
        Ok(self.network.expose(&names, request).await?)
    }

    /// Every server for admins, otherwise the caller's own servers.
    pub async fn list(&self, principal: &Principal) -> Result<Vec<ServerRecord>, LifecycleError> {
        let servers = if principal.is_admin() {
            self.store.list_servers().await?
        } else {
            self.store.list_servers_by_owner(principal.user_id).await?
        };
        Ok(servers)
    }

    /// The stored record together with live workload and service state.
    pub async fn describe(&self, name: &ServerName) -> Result<ServerState, LifecycleError> {
        let record = self.record(name).await?;
        let names = self.names(name);

        let workload = match self.cluster.get_deployment(&names.workload).await {
            Ok(deployment) => {
                let pod = self.cluster.find_pod(&names.selector()).await?;
                Some(WorkloadState {
                    desired_replicas: resources::desired_replicas(&deployment),
                    ready_replicas: deployment
                        .status
                        .as_ref()
                        .and_then(|s| s.ready_replicas)
                        .unwrap_or(0),
                    pod_phase: pod
                        .as_ref()
                        .and_then(|p| p.status.as_ref())
                        .and_then(|s| s.phase.clone()),
                    pod: pod.and_then(|p| p.metadata.name),
                })
            }
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        let services = self.network.describe(&names).await?;

        Ok(ServerState {
            record,
            workload,
            services,
        })
    }

    async fn record(&self, name: &ServerName) -> Result<ServerRecord, LifecycleError> {
        match self.store.get_server_by_name(name.as_str()).await {
            Ok(record) => Ok(record),
            Err(e) if e.is_not_found() => Err(LifecycleError::ServerNotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn existing(&self, name: &ServerName) -> Result<ResourceNames, LifecycleError> {
        self.record(name).await?;
        Ok(self.names(name))
    }

    async fn require_workload(&self, names: &ResourceNames) -> Result<(), LifecycleError> {
        match self.cluster.get_deployment(&names.workload).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Err(LifecycleError::WorkloadNotFound(names.workload.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Only a `Running` pod holds a live world worth saving.
    async fn running_pod(&self, names: &ResourceNames) -> Result<Option<String>, LifecycleError> {
        let pod = self.cluster.find_pod(&names.selector()).await?;
        Ok(pod.filter(is_running).and_then(|p| p.metadata.name))
    }

    async fn save_world(&self, pod: &str) -> Result<(), LifecycleError> {
        let output = self
            .executor
            .save_all(pod)
            .await
            .map_err(LifecycleError::SaveFailed)?;
        debug!(pod, stdout = %output.stdout.trim(), "World saved");

        if self.config.save_settle_millis > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.save_settle_millis)).await;
        }
        Ok(())
    }
}
