use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

use super::ApiResponse;
use crate::db::StoreError;
use crate::services::{
    AuthError, ExecError, ExecErrorKind, ExecOutput, ExposureError, LifecycleError,
};

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),

    DatabaseError(String),

    ExternalApiError { service: String, message: String },

    ValidationError(String),

    Conflict(String),

    InternalError(String),

    Unauthorized(String),

    Forbidden(String),

    /// A remote command failed; whatever it printed before failing is returned.
    CommandFailed {
        status: StatusCode,
        message: String,
        output: ExecOutput,
    },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            ApiError::ExternalApiError { service, message } => {
                write!(f, "{} error: {}", service, message)
            }
            ApiError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::CommandFailed { message, .. } => write!(f, "Command failed: {}", message),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred".to_string(),
                )
            }
            ApiError::ExternalApiError { service, message } => {
                tracing::warn!("{} API error: {}", service, message);
                (
                    StatusCode::BAD_GATEWAY,
                    format!("{} service is unavailable", service),
                )
            }
            ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::CommandFailed {
                status,
                message,
                output,
            } => {
                tracing::warn!("Remote command failed: {}", message);
                let body = ApiResponse {
                    success: false,
                    data: Some(output),
                    error: Some(message),
                };
                return (status, Json(body)).into_response();
            }
        };

        let body = ApiResponse::<()>::error(error_message);
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        if err.is_authentication() {
            return ApiError::Unauthorized(err.to_string());
        }

        match err {
            AuthError::Forbidden(_) | AuthError::Inactive | AuthError::NotAllowed(_) => {
                ApiError::Forbidden(err.to_string())
            }
            AuthError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            AuthError::Validation(msg) => ApiError::ValidationError(msg),
            AuthError::Conflict(what) => ApiError::Conflict(format!("{what} already exists")),
            AuthError::Provider(message) => ApiError::ExternalApiError {
                service: "Identity provider".to_string(),
                message,
            },
            AuthError::Database(msg) => ApiError::DatabaseError(msg),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            StoreError::AlreadyExists(what) => ApiError::Conflict(format!("{what} already exists")),
            StoreError::Database(e) => ApiError::DatabaseError(e.to_string()),
        }
    }
}

impl From<ExposureError> for ApiError {
    fn from(err: ExposureError) -> Self {
        match err {
            ExposureError::Validation(msg) => ApiError::ValidationError(msg),
            ExposureError::WorkloadNotFound(name) => ApiError::not_found("Workload", name),
            ExposureError::Cluster(e) => ApiError::InternalError(e.to_string()),
        }
    }
}

impl From<ExecError> for ApiError {
    fn from(err: ExecError) -> Self {
        let status = match err.kind {
            ExecErrorKind::NoRunningPod(_) => StatusCode::CONFLICT,
            ExecErrorKind::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::CommandFailed {
            status,
            message: err.kind.to_string(),
            output: err.output,
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::ServerNotFound(name) => ApiError::not_found("Server", name),
            LifecycleError::WorkloadNotFound(name) => ApiError::not_found("Workload", name),
            LifecycleError::OwnedByOther(_) | LifecycleError::NotRunning(_) => {
                ApiError::Conflict(err.to_string())
            }
            LifecycleError::SaveFailed(exec) => ApiError::CommandFailed {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: format!("World save failed, server left running: {}", exec.kind),
                output: exec.output,
            },
            LifecycleError::Exec(exec) => exec.into(),
            LifecycleError::Exposure(e) => e.into(),
            LifecycleError::Cluster(e) => ApiError::InternalError(e.to_string()),
            LifecycleError::Store(e) => e.into(),
        }
    }
}

impl ApiError {
    pub fn not_found(resource: &str, id: impl fmt::Display) -> Self {
        ApiError::NotFound(format!("{} {} not found", resource, id))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::ValidationError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError::InternalError(msg.into())
    }
}
