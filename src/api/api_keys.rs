use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;

use super::validation::validate_id;
use super::{ApiError, ApiResponse, AppState, CreateApiKeyRequest, MessageResponse};
use crate::auth::Principal;
use crate::services::{ApiKeyInfo, CreatedApiKey, NewKeyRequest};

/// POST /apikeys
/// The full key is only returned here.
pub async fn create_api_key(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    payload: Option<Json<CreateApiKeyRequest>>,
) -> Result<(StatusCode, Json<ApiResponse<CreatedApiKey>>), ApiError> {
    let Json(payload) = payload.unwrap_or_default();

    let key = state
        .auth_service()
        .create_api_key(
            &principal,
            NewKeyRequest {
                description: payload.description,
                expires_in_days: payload.expires_in_days,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(key))))
}

/// GET /apikeys
pub async fn list_api_keys(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<ApiResponse<Vec<ApiKeyInfo>>>, ApiError> {
    let keys = state.auth_service().list_api_keys(&principal).await?;
    Ok(Json(ApiResponse::success(keys)))
}

/// DELETE /apikeys/{id}
pub async fn delete_api_key(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let id = validate_id(id, "API key")?;
    state.auth_service().delete_api_key(&principal, id).await?;

    Ok(Json(ApiResponse::success(MessageResponse {
        message: format!("API key {id} deleted"),
    })))
}
