use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::ServerRecord;
use crate::services::{DeleteReport, ServerState, ServiceSummary, WorkloadState};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub const fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ServerDto {
    pub name: String,
    pub workload_name: String,
    pub volume_claim_name: String,
    pub owner_id: i64,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<ServerRecord> for ServerDto {
    fn from(record: ServerRecord) -> Self {
        Self {
            name: record.server_name,
            workload_name: record.workload_name,
            volume_claim_name: record.volume_claim_name,
            owner_id: record.owner_id,
            status: record.status.to_string(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ServerDetailDto {
    #[serde(flatten)]
    pub server: ServerDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload: Option<WorkloadState>,
    pub services: Vec<ServiceSummary>,
}

impl From<ServerState> for ServerDetailDto {
    fn from(state: ServerState) -> Self {
        Self {
            server: state.record.into(),
            workload: state.workload,
            services: state.services,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateServerResponse {
    #[serde(flatten)]
    pub server: ServerDto,
    pub volume_claim_created: bool,
    pub workload_created: bool,
}

#[derive(Debug, Serialize)]
pub struct DeleteServerResponse {
    pub name: String,
    #[serde(flatten)]
    pub report: DeleteReport,
}

#[derive(Debug, Deserialize)]
pub struct CreateServerRequest {
    pub name: String,
    /// Container environment overrides, e.g. `TYPE`, `VERSION`, `MEMORY`.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    pub command: String,
}

#[derive(Debug, Deserialize)]
pub struct ExposeRequest {
    #[serde(rename = "type")]
    pub exposure_type: String,
    pub port: Option<i32>,
    pub domain: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub permissions: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub permissions: Option<i64>,
    pub active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateApiKeyRequest {
    #[serde(default)]
    pub description: String,
    pub expires_in_days: Option<i64>,
}
