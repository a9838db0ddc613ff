use axum::{
    Extension, Json,
    extract::{Path, Query, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Redirect},
};
use serde::Deserialize;
use std::sync::Arc;
use tower_sessions::Session;

use super::{ApiError, ApiResponse, AppState, LoginRequest, RegisterRequest};
use crate::auth::password::random_token;
use crate::auth::{Credentials, Principal};
use crate::services::{LoginResult, Registration, UserInfo};

const OAUTH_STATE_KEY: &str = "oauth_state";

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

// ============================================================================
// Middleware
// ============================================================================

/// Resolves the caller and stores the [`Principal`] in the request extensions.
///
/// Accepted credentials:
/// 1. `Authorization: Bearer <token>`
/// 2. `X-API-Key` header
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<impl IntoResponse, ApiError> {
    let credentials = extract_credentials(&headers);
    let principal = state.shared.auth_chain.resolve(&credentials).await?;

    tracing::Span::current().record("user_id", principal.user_id);
    request.extensions_mut().insert(principal);

    Ok(next.run(request).await)
}

fn extract_credentials(headers: &HeaderMap) -> Credentials {
    let mut credentials = Credentials::default();

    if let Some(auth_header) = headers.get("Authorization")
        && let Ok(auth_str) = auth_header.to_str()
        && let Some(token) = auth_str.strip_prefix("Bearer ")
    {
        let token = token.trim();
        if !token.is_empty() {
            credentials.bearer = Some(token.to_string());
        }
    }

    if let Some(api_key) = headers.get("X-API-Key")
        && let Ok(key_str) = api_key.to_str()
    {
        let key = key_str.trim();
        if !key.is_empty() {
            credentials.api_key = Some(key.to_string());
        }
    }

    credentials
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<ApiResponse<LoginResult>>, ApiError> {
    if payload.username.is_empty() {
        return Err(ApiError::validation("Username is required"));
    }
    if payload.password.is_empty() {
        return Err(ApiError::validation("Password is required"));
    }

    let result = state
        .auth_service()
        .login(&payload.username, &payload.password)
        .await?;

    Ok(Json(ApiResponse::success(result)))
}

/// POST /auth/register
/// Self-service sign-up; new accounts are read-only.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<ApiResponse<LoginResult>>, ApiError> {
    let result = state
        .auth_service()
        .register(Registration {
            username: payload.username,
            email: payload.email,
            password: payload.password,
        })
        .await?;

    tracing::info!(user_id = result.user.id, "User registered");
    Ok(Json(ApiResponse::success(result)))
}

/// GET /auth/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<ApiResponse<UserInfo>>, ApiError> {
    let user = state.auth_service().me(&principal).await?;
    Ok(Json(ApiResponse::success(user)))
}

/// GET /auth/oauth/{provider}
/// Redirects the browser to the identity provider.
pub async fn oauth_start(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    session: Session,
) -> Result<Redirect, ApiError> {
    let identity_provider = state.identity_provider(&provider)?;

    let csrf_state = random_token(32);
    session
        .insert(OAUTH_STATE_KEY, &csrf_state)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to store OAuth state: {e}")))?;

    let url = identity_provider.authorize_url(&csrf_state)?;
    Ok(Redirect::to(&url))
}

/// GET /auth/callback/{provider}
/// Completes the authorization code flow and hands the token to the frontend.
pub async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthCallbackQuery>,
    session: Session,
) -> Result<Redirect, ApiError> {
    let identity_provider = state.identity_provider(&provider)?;

    if let Some(error) = query.error {
        return Err(ApiError::Unauthorized(format!("Sign-in was refused: {error}")));
    }

    let expected: Option<String> = session
        .remove(OAUTH_STATE_KEY)
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))?;

    match (expected, query.state) {
        (Some(expected), Some(received)) if expected == received => {}
        _ => return Err(ApiError::Unauthorized("Invalid OAuth state".to_string())),
    }

    let code = query
        .code
        .ok_or_else(|| ApiError::validation("Missing authorization code"))?;

    let access_token = identity_provider.exchange(&code).await?;
    let identity = identity_provider.user_info(&access_token).await?;
    let result = state.auth_service().sign_in_external(&identity).await?;

    tracing::info!(user_id = result.user.id, provider = %provider, "External sign-in");

    let mut target = url::Url::parse(&state.config().oauth.frontend_url)
        .map_err(|e| ApiError::internal(format!("Invalid frontend_url: {e}")))?;
    target
        .path_segments_mut()
        .map_err(|()| ApiError::internal("frontend_url cannot be a base"))?
        .pop_if_empty()
        .push("oauth-callback");
    target.query_pairs_mut().append_pair("token", &result.token);

    Ok(Redirect::to(target.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_both_credentials() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer abc.def.ghi".parse().unwrap());
        headers.insert("X-API-Key", "mcapi.secret".parse().unwrap());

        let credentials = extract_credentials(&headers);
        assert_eq!(credentials.bearer.as_deref(), Some("abc.def.ghi"));
        assert_eq!(credentials.api_key.as_deref(), Some("mcapi.secret"));
    }

    #[test]
    fn test_extract_ignores_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Basic dXNlcjpwYXNz".parse().unwrap());

        let credentials = extract_credentials(&headers);
        assert!(credentials.bearer.is_none());
        assert!(credentials.api_key.is_none());
    }

    #[test]
    fn test_extract_ignores_blank_values() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer   ".parse().unwrap());
        headers.insert("X-API-Key", " ".parse().unwrap());

        let credentials = extract_credentials(&headers);
        assert!(credentials.bearer.is_none());
        assert!(credentials.api_key.is_none());
    }
}
