use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;

use super::validation::validate_id;
use super::{
    ApiError, ApiResponse, AppState, CreateUserRequest, MessageResponse, UpdateUserRequest,
};
use crate::auth::{PermissionResolver, Principal};
use crate::domain::{Capability, Permissions};
use crate::services::{AccountUpdate, Registration, UserInfo};

/// GET /users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<ApiResponse<Vec<UserInfo>>>, ApiError> {
    PermissionResolver::require(&principal, Capability::Admin)?;
    let users = state.auth_service().list_users().await?;
    Ok(Json(ApiResponse::success(users)))
}

/// POST /users
/// Admin-created accounts; permissions default to read-only.
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<ApiResponse<UserInfo>>), ApiError> {
    PermissionResolver::require(&principal, Capability::Admin)?;

    let permissions = payload
        .permissions
        .map_or(Permissions::READ_ONLY, Permissions::from_bits);
    let user = state
        .auth_service()
        .create_user(
            Registration {
                username: payload.username,
                email: payload.email,
                password: payload.password,
            },
            permissions,
        )
        .await?;

    tracing::info!(user_id = user.id, actor_id = principal.user_id, "User created");
    Ok((StatusCode::CREATED, Json(ApiResponse::success(user))))
}

/// GET /users/{id}
/// Users may read their own account.
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<UserInfo>>, ApiError> {
    let id = validate_id(id, "user")?;
    let user = state.auth_service().get_user(&principal, id).await?;
    Ok(Json(ApiResponse::success(user)))
}

/// PUT /users/{id}
/// Users may change their own email and password; access changes are admin-only.
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<ApiResponse<UserInfo>>, ApiError> {
    let id = validate_id(id, "user")?;
    let update = AccountUpdate {
        email: payload.email,
        password: payload.password,
        permissions: payload.permissions.map(Permissions::from_bits),
        active: payload.active,
    };

    let user = state
        .auth_service()
        .update_user(&principal, id, update)
        .await?;
    Ok(Json(ApiResponse::success(user)))
}

/// DELETE /users/{id}
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let id = validate_id(id, "user")?;
    PermissionResolver::require(&principal, Capability::Admin)?;
    state.auth_service().delete_user(&principal, id).await?;

    Ok(Json(ApiResponse::success(MessageResponse {
        message: format!("User {id} deleted"),
    })))
}
