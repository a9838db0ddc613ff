//! Credential resolution and capability checks.
//!
//! A request is resolved to a [`Principal`] by the [`chain::AuthChain`]
//! (bearer token first, API key second), then authorized by
//! [`permissions::PermissionResolver`].

pub mod chain;
pub mod jwt;
pub mod oauth;
pub mod password;
pub mod permissions;

pub use chain::{ApiKeyAuthenticator, AuthChain, Authenticator, BearerAuthenticator, Resolution};
pub use jwt::{Claims, JwtCodec};
pub use permissions::PermissionResolver;

use serde::Serialize;

use crate::db::{StoreError, User};
use crate::domain::{Capability, Permissions};

/// Credentials found on an inbound request.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub bearer: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Bearer,
    ApiKey,
}

/// The authenticated identity behind a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub permissions: Permissions,
    pub active: bool,
    pub method: AuthMethod,
}

impl Principal {
    #[must_use]
    pub fn from_user(user: User, method: AuthMethod) -> Self {
        Self {
            user_id: user.id,
            username: user.username,
            email: user.email,
            permissions: user.permissions,
            active: user.active,
            method,
        }
    }

    #[must_use]
    pub const fn is_admin(&self) -> bool {
        self.permissions.is_admin()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingCredentials,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("API key has expired")]
    ApiKeyExpired,

    #[error("User account is inactive")]
    Inactive,

    #[error("Missing permission: {0}")]
    Forbidden(Capability),

    #[error("{0}")]
    NotAllowed(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("Identity provider error: {0}")]
    Provider(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Short label used for the `auth_failures_total` metric and logs.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "missing_credentials",
            Self::InvalidCredentials => "invalid_credentials",
            Self::TokenExpired => "token_expired",
            Self::TokenInvalid => "token_invalid",
            Self::InvalidApiKey => "invalid_api_key",
            Self::ApiKeyExpired => "api_key_expired",
            Self::Inactive => "inactive",
            Self::Forbidden(_) | Self::NotAllowed(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::Conflict(_) => "conflict",
            Self::Provider(_) => "provider",
            Self::Database(_) | Self::Internal(_) => "internal",
        }
    }

    /// Errors that mean "who are you?" rather than "you may not".
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(
            self,
            Self::MissingCredentials
                | Self::InvalidCredentials
                | Self::TokenExpired
                | Self::TokenInvalid
                | Self::InvalidApiKey
                | Self::ApiKeyExpired
        )
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::AlreadyExists(what) => Self::Conflict(what),
            StoreError::Database(e) => Self::Database(e.to_string()),
        }
    }
}
