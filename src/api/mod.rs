use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{delete, get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};

use crate::auth::oauth::IdentityProvider;
use crate::config::Config;
use crate::services::{AuthService, LifecycleOrchestrator};
use crate::state::SharedState;

mod api_keys;
pub mod auth;
mod error;
mod observability;
mod servers;
mod system;
mod types;
mod users;
mod validation;

pub use error::ApiError;
pub use types::*;

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,

    pub start_time: std::time::Instant,

    pub prometheus_handle: Option<PrometheusHandle>,
}

impl AppState {
    #[must_use]
    pub fn config(&self) -> &Config {
        self.shared.config()
    }

    #[must_use]
    pub fn auth_service(&self) -> &Arc<dyn AuthService> {
        &self.shared.auth_service
    }

    #[must_use]
    pub fn lifecycle(&self) -> &Arc<LifecycleOrchestrator> {
        &self.shared.lifecycle
    }

    /// The configured identity provider, if `provider` names it.
    pub fn identity_provider(&self, provider: &str) -> Result<Arc<dyn IdentityProvider>, ApiError> {
        self.shared
            .identity_provider
            .as_ref()
            .filter(|p| p.name() == provider)
            .cloned()
            .ok_or_else(|| ApiError::not_found("Identity provider", provider))
    }
}

#[must_use]
pub fn create_app_state(
    shared: Arc<SharedState>,
    prometheus_handle: Option<PrometheusHandle>,
) -> Arc<AppState> {
    Arc::new(AppState {
        shared,
        start_time: std::time::Instant::now(),
        prometheus_handle,
    })
}

pub async fn create_app_state_from_config(
    config: Config,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    let shared = Arc::new(SharedState::new(config).await?);
    Ok(create_app_state(shared, prometheus_handle))
}

pub fn router(state: Arc<AppState>) -> Router {
    let (cors_origins, secure_cookies) = {
        let config = state.config();
        (
            config.server.cors_allowed_origins.clone(),
            config.server.secure_cookies,
        )
    };

    let protected_routes = create_protected_router(state.clone());

    // Only the OAuth state round trip lives in the session.
    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(secure_cookies)
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(10)));

    let api_router = Router::new()
        .merge(protected_routes)
        .route("/ping", get(system::ping))
        .route("/health/ready", get(system::health_ready))
        .route("/auth/login", post(auth::login))
        .route("/auth/register", post(auth::register))
        .route("/auth/oauth/{provider}", get(auth::oauth_start))
        .route("/auth/callback/{provider}", get(auth::oauth_callback))
        .layer(session_layer)
        .with_state(state);

    let cors_layer = if cors_origins.contains(&"*".to_string()) {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .nest("/api", api_router)
        .layer(cors_layer.allow_methods(Any).allow_headers(Any))
        .layer(middleware::from_fn(observability::security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(observability::logging_middleware))
}

fn create_protected_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/me", get(auth::me))
        .route(
            "/apikeys",
            get(api_keys::list_api_keys).post(api_keys::create_api_key),
        )
        .route("/apikeys/{id}", delete(api_keys::delete_api_key))
        .route("/users", get(users::list_users).post(users::create_user))
        .route(
            "/users/{id}",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route(
            "/servers",
            get(servers::list_servers).post(servers::create_server),
        )
        .route("/servers/{name}", get(servers::get_server))
        .route("/servers/{name}/stop", post(servers::stop_server))
        .route("/servers/{name}/start", post(servers::start_server))
        .route("/servers/{name}/restart", post(servers::restart_server))
        .route("/servers/{name}/delete", post(servers::delete_server))
        .route("/servers/{name}/exec", post(servers::exec_command))
        .route("/servers/{name}/expose", post(servers::expose_server))
        .route("/metrics", get(observability::get_metrics))
        .route_layer(middleware::from_fn_with_state(state, auth::auth_middleware))
}
