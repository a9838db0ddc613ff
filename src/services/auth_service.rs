//! Domain service for accounts and API keys.
//!
//! Handles registration, password login, identity-provider sign-in, user
//! administration and API key management.

use serde::Serialize;

pub use crate::auth::AuthError;
use crate::auth::Principal;
use crate::auth::oauth::ProviderUser;
use crate::db::{ApiKey, User};
use crate::domain::{Capability, Permissions};

/// User info DTO for responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub permissions: i64,
    pub capabilities: Vec<&'static str>,
    pub active: bool,
    pub last_login: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            permissions: user.permissions.bits(),
            capabilities: user
                .permissions
                .capabilities()
                .into_iter()
                .map(Capability::as_str)
                .collect(),
            active: user.active,
            last_login: user.last_login,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Issued bearer token together with the account it belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct LoginResult {
    pub token: String,
    pub expires_in: i64,
    pub user: UserInfo,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Fields an account update may touch. `permissions` and `active` are
/// reserved for administrators.
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub email: Option<String>,
    pub password: Option<String>,
    pub permissions: Option<Permissions>,
    pub active: Option<bool>,
}

/// API key as shown in listings; the secret is masked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiKeyInfo {
    pub id: i64,
    pub user_id: i64,
    pub key_preview: String,
    pub description: String,
    pub last_used: Option<String>,
    pub expires_at: Option<String>,
    pub created_at: String,
}

impl From<ApiKey> for ApiKeyInfo {
    fn from(key: ApiKey) -> Self {
        Self {
            key_preview: key.masked(),
            id: key.id,
            user_id: key.user_id,
            description: key.description,
            last_used: key.last_used,
            expires_at: key.expires_at,
            created_at: key.created_at,
        }
    }
}

/// A freshly created key. The only time the full secret is returned.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedApiKey {
    pub key: String,
    #[serde(flatten)]
    pub info: ApiKeyInfo,
}

#[derive(Debug, Clone, Default)]
pub struct NewKeyRequest {
    pub description: String,
    pub expires_in_days: Option<i64>,
}

/// Domain service trait for authentication.
#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Creates an active read-only account and signs it in.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Validation`] for malformed input and
    /// [`AuthError::Conflict`] when the username or email is taken.
    async fn register(&self, registration: Registration) -> Result<LoginResult, AuthError>;

    /// Verifies credentials and issues a bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] for an unknown user or a
    /// wrong password alike, and [`AuthError::Inactive`] for disabled accounts.
    async fn login(&self, username: &str, password: &str) -> Result<LoginResult, AuthError>;

    /// Syncs an identity-provider account and issues a bearer token.
    async fn sign_in_external(&self, identity: &ProviderUser) -> Result<LoginResult, AuthError>;

    /// Fresh account data for the caller.
    async fn me(&self, principal: &Principal) -> Result<UserInfo, AuthError>;

    /// Creates an account directly, bypassing the self-registration defaults.
    async fn create_user(
        &self,
        registration: Registration,
        permissions: Permissions,
    ) -> Result<UserInfo, AuthError>;

    async fn list_users(&self) -> Result<Vec<UserInfo>, AuthError>;

    /// Admins may read any account, everyone else only their own.
    async fn get_user(&self, actor: &Principal, user_id: i64) -> Result<UserInfo, AuthError>;

    async fn update_user(
        &self,
        actor: &Principal,
        user_id: i64,
        update: AccountUpdate,
    ) -> Result<UserInfo, AuthError>;

    /// Removes an account and its API keys. Admins cannot delete themselves.
    async fn delete_user(&self, actor: &Principal, user_id: i64) -> Result<(), AuthError>;

    async fn create_api_key(
        &self,
        actor: &Principal,
        request: NewKeyRequest,
    ) -> Result<CreatedApiKey, AuthError>;

    async fn list_api_keys(&self, actor: &Principal) -> Result<Vec<ApiKeyInfo>, AuthError>;

    /// Owners and admins may delete a key.
    async fn delete_api_key(&self, actor: &Principal, key_id: i64) -> Result<(), AuthError>;
}
