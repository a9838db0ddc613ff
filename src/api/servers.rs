//! Server endpoints.
//!
//! Every handler authorizes the caller through the [`PermissionResolver`]
//! before handing the request to the lifecycle orchestrator.
//!
//! [`PermissionResolver`]: crate::auth::PermissionResolver

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;

use super::validation::{validate_console_command, validate_env_overrides, validate_server_name};
use super::{
    ApiError, ApiResponse, AppState, CreateServerRequest, CreateServerResponse,
    DeleteServerResponse, ExecRequest, ExposeRequest, ServerDetailDto, ServerDto,
};
use crate::auth::{PermissionResolver, Principal};
use crate::domain::{Capability, ServerName};
use crate::services::{ExecOutput, ExposureDetails, ExposureMode, ExposureRequest};

async fn authorize(
    state: &AppState,
    principal: &Principal,
    capability: Capability,
    name: &str,
) -> Result<ServerName, ApiError> {
    let name = validate_server_name(name)?;
    state
        .shared
        .permissions
        .require_for_server(principal, capability, name.as_str())
        .await?;
    Ok(name)
}

/// POST /servers
pub async fn create_server(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<CreateServerRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CreateServerResponse>>), ApiError> {
    let name = validate_server_name(&payload.name)?;
    validate_env_overrides(&payload.env)?;
    PermissionResolver::require(&principal, Capability::CreateServer)?;

    let outcome = state
        .lifecycle()
        .create(&principal, &name, &payload.env)
        .await?;

    let status = if outcome.workload_created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(ApiResponse::success(CreateServerResponse {
            server: outcome.server.into(),
            volume_claim_created: outcome.volume_claim_created,
            workload_created: outcome.workload_created,
        })),
    ))
}

/// GET /servers
/// Admins see every server, everyone else their own. Owning a server already
/// grants viewing it, so no capability is checked here.
pub async fn list_servers(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<ApiResponse<Vec<ServerDto>>>, ApiError> {
    // No server name to resolve, so only the global capability applies.
    PermissionResolver::require(&principal, Capability::ViewServer)?;
    let servers = state.lifecycle().list(&principal).await?;
    Ok(Json(ApiResponse::success(
        servers.into_iter().map(ServerDto::from).collect(),
    )))
}

/// GET /servers/{name}
pub async fn get_server(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<ServerDetailDto>>, ApiError> {
    let name = authorize(&state, &principal, Capability::ViewServer, &name).await?;
    let server = state.lifecycle().describe(&name).await?;
    Ok(Json(ApiResponse::success(server.into())))
}

/// POST /servers/{name}/stop
pub async fn stop_server(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<ServerDto>>, ApiError> {
    let name = authorize(&state, &principal, Capability::StopServer, &name).await?;
    let record = state.lifecycle().stop(&name).await?;
    Ok(Json(ApiResponse::success(record.into())))
}

/// POST /servers/{name}/start
pub async fn start_server(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<ServerDto>>, ApiError> {
    let name = authorize(&state, &principal, Capability::StartServer, &name).await?;
    let record = state.lifecycle().start(&name).await?;
    Ok(Json(ApiResponse::success(record.into())))
}

/// POST /servers/{name}/restart
pub async fn restart_server(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<ServerDto>>, ApiError> {
    let name = authorize(&state, &principal, Capability::RestartServer, &name).await?;
    let record = state.lifecycle().restart(&name).await?;
    Ok(Json(ApiResponse::success(record.into())))
}

/// POST /servers/{name}/delete
/// Best effort: sub-resources that could not be removed are listed as warnings.
pub async fn delete_server(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<DeleteServerResponse>>, ApiError> {
    let name = authorize(&state, &principal, Capability::DeleteServer, &name).await?;
    let report = state.lifecycle().delete(&name).await;
    Ok(Json(ApiResponse::success(DeleteServerResponse {
        name: name.to_string(),
        report,
    })))
}

/// POST /servers/{name}/exec
/// Sends one console command; the output is returned even when it fails.
pub async fn exec_command(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
    Json(payload): Json<ExecRequest>,
) -> Result<Json<ApiResponse<ExecOutput>>, ApiError> {
    let name = authorize(&state, &principal, Capability::ExecCommand, &name).await?;
    let command = validate_console_command(&payload.command)?;

    tracing::info!(server_name = %name, user_id = principal.user_id, command, "Console command");
    let output = state.lifecycle().console(&name, command).await?;
    Ok(Json(ApiResponse::success(output)))
}

/// POST /servers/{name}/expose
pub async fn expose_server(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
    Json(payload): Json<ExposeRequest>,
) -> Result<Json<ApiResponse<ExposureDetails>>, ApiError> {
    let name = authorize(&state, &principal, Capability::CreateServer, &name).await?;
    let mode: ExposureMode = payload.exposure_type.parse()?;

    let request = ExposureRequest {
        mode,
        port: payload.port,
        domain: payload.domain,
    };
    let details = state.lifecycle().expose(&name, &request).await?;
    Ok(Json(ApiResponse::success(details)))
}
