use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{AuthError, AuthMethod, Credentials, JwtCodec, Principal};
use crate::db::CredentialStore;

/// Outcome of one authenticator. A hard failure is returned as `Err`.
#[derive(Debug)]
pub enum Resolution {
    Resolved(Principal),
    NotApplicable,
}

/// One credential scheme in the chain.
#[async_trait]
pub trait Authenticator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn authenticate(&self, credentials: &Credentials) -> Result<Resolution, AuthError>;
}

/// Validates `Authorization: Bearer <jwt>` and reloads the account so that
/// deactivation and permission changes apply before the token expires.
pub struct BearerAuthenticator {
    jwt: Arc<JwtCodec>,
    store: Arc<dyn CredentialStore>,
}

impl BearerAuthenticator {
    #[must_use]
    pub fn new(jwt: Arc<JwtCodec>, store: Arc<dyn CredentialStore>) -> Self {
        Self { jwt, store }
    }
}

#[async_trait]
impl Authenticator for BearerAuthenticator {
    fn name(&self) -> &'static str {
        "bearer"
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Resolution, AuthError> {
        let Some(token) = credentials.bearer.as_deref() else {
            return Ok(Resolution::NotApplicable);
        };

        let claims = self.jwt.verify(token)?;

        let user = match self.store.get_user_by_id(claims.user_id).await {
            Ok(user) => user,
            Err(e) if e.is_not_found() => return Err(AuthError::TokenInvalid),
            Err(e) => return Err(e.into()),
        };

        debug!(user_id = user.id, "Bearer token validated");
        Ok(Resolution::Resolved(Principal::from_user(
            user,
            AuthMethod::Bearer,
        )))
    }
}

/// Validates `X-API-Key` against stored keys.
pub struct ApiKeyAuthenticator {
    store: Arc<dyn CredentialStore>,
}

impl ApiKeyAuthenticator {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    fn name(&self) -> &'static str {
        "api_key"
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Resolution, AuthError> {
        let Some(raw) = credentials.api_key.as_deref() else {
            return Ok(Resolution::NotApplicable);
        };

        let key = match self.store.get_api_key(raw).await {
            Ok(key) => key,
            Err(e) if e.is_not_found() => return Err(AuthError::InvalidApiKey),
            Err(e) => return Err(e.into()),
        };

        if key.is_expired_at(chrono::Utc::now()) {
            return Err(AuthError::ApiKeyExpired);
        }

        let user = match self.store.get_user_by_id(key.user_id).await {
            Ok(user) => user,
            Err(e) if e.is_not_found() => return Err(AuthError::InvalidApiKey),
            Err(e) => return Err(e.into()),
        };

        if user.active {
            // Best effort; never delays or fails the request.
            let store = Arc::clone(&self.store);
            let key_id = key.id;
            tokio::spawn(async move {
                if let Err(e) = store.touch_api_key(key_id).await {
                    warn!(api_key_id = key_id, error = %e, "Failed to update API key last use");
                }
            });
        }

        debug!(user_id = user.id, api_key_id = key.id, "API key validated");
        Ok(Resolution::Resolved(Principal::from_user(
            user,
            AuthMethod::ApiKey,
        )))
    }
}

/// Ordered list of authenticators; the first one that resolves wins.
#[derive(Clone)]
pub struct AuthChain {
    authenticators: Vec<Arc<dyn Authenticator>>,
}

impl AuthChain {
    #[must_use]
    pub fn new(authenticators: Vec<Arc<dyn Authenticator>>) -> Self {
        Self { authenticators }
    }

    /// Bearer token first, API key second.
    #[must_use]
    pub fn standard(jwt: Arc<JwtCodec>, store: Arc<dyn CredentialStore>) -> Self {
        Self::new(vec![
            Arc::new(BearerAuthenticator::new(jwt, Arc::clone(&store))),
            Arc::new(ApiKeyAuthenticator::new(store)),
        ])
    }

    pub async fn resolve(&self, credentials: &Credentials) -> Result<Principal, AuthError> {
        let result = self.try_resolve(credentials).await;

        if let Err(e) = &result {
            metrics::counter!("auth_failures_total", "reason" => e.reason()).increment(1);
            warn!(reason = e.reason(), "Authentication failed");
        }

        result
    }

    async fn try_resolve(&self, credentials: &Credentials) -> Result<Principal, AuthError> {
        for authenticator in &self.authenticators {
            match authenticator.authenticate(credentials).await? {
                Resolution::Resolved(principal) => {
                    if !principal.active {
                        return Err(AuthError::Inactive);
                    }
                    debug!(
                        scheme = authenticator.name(),
                        user_id = principal.user_id,
                        "Principal resolved"
                    );
                    return Ok(principal);
                }
                Resolution::NotApplicable => {}
            }
        }

        Err(AuthError::MissingCredentials)
    }
}
