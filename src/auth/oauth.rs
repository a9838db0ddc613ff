use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use super::AuthError;
use super::password::{hash_password_blocking, random_token};
use crate::config::{OAuthConfig, SecurityConfig};
use crate::db::{CredentialStore, NewUser, User};
use crate::domain::Permissions;

const SCOPES: &str = "openid email profile";

/// Identity as reported by the provider's userinfo endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderUser {
    #[serde(rename = "sub")]
    pub subject: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl ProviderUser {
    /// Preferred username, else the email local part, else `user_<subject>`.
    #[must_use]
    pub fn username(&self) -> String {
        if let Some(name) = self.preferred_username.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }

        match self.email.split_once('@') {
            Some((local, _)) if !local.is_empty() => local.to_string(),
            _ => format!("user_{}", self.subject),
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &str;

    fn authorize_url(&self, state: &str) -> Result<String, AuthError>;

    /// Trades an authorization code for an access token.
    async fn exchange(&self, code: &str) -> Result<String, AuthError>;

    async fn user_info(&self, access_token: &str) -> Result<ProviderUser, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// OpenID Connect provider laid out as `{issuer}/oauth2/{authorize,token,userinfo}`.
pub struct OidcProvider {
    client: Client,
    name: String,
    issuer: String,
    client_id: String,
    client_secret: String,
    redirect_url: String,
}

impl OidcProvider {
    #[must_use]
    pub fn new(client: Client, config: &OAuthConfig) -> Self {
        Self {
            client,
            name: config.provider.clone(),
            issuer: config.issuer.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_url: config.redirect_url.clone(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/oauth2/{path}", self.issuer)
    }
}

async fn provider_error(what: &str, response: reqwest::Response) -> AuthError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    warn!(%status, "Identity provider {what} request failed");
    AuthError::Provider(format!("{what} failed: {status} - {body}"))
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn authorize_url(&self, state: &str) -> Result<String, AuthError> {
        let url = Url::parse_with_params(
            &self.endpoint("authorize"),
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("scope", SCOPES),
                ("state", state),
            ],
        )
        .map_err(|e| AuthError::Provider(format!("invalid issuer url: {e}")))?;

        Ok(url.into())
    }

    async fn exchange(&self, code: &str) -> Result<String, AuthError> {
        let response = self
            .client
            .post(self.endpoint("token"))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_url.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Provider(format!("token exchange failed: {e}")))?;

        if !response.status().is_success() {
            return Err(provider_error("token exchange", response).await);
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Provider(format!("malformed token response: {e}")))?;

        Ok(token.access_token)
    }

    async fn user_info(&self, access_token: &str) -> Result<ProviderUser, AuthError> {
        let response = self
            .client
            .get(self.endpoint("userinfo"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::Provider(format!("userinfo request failed: {e}")))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(AuthError::InvalidCredentials);
        }

        if !response.status().is_success() {
            return Err(provider_error("userinfo", response).await);
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::Provider(format!("malformed userinfo response: {e}")))
    }
}

/// Mirrors a provider identity into the local account table.
///
/// New identities become active read-only users with a random password that
/// nobody knows; returning identities only get `last_login` bumped. An
/// existing account is only reused when its email matches the identity's.
pub async fn sync_user(
    store: &dyn CredentialStore,
    identity: &ProviderUser,
    security: &SecurityConfig,
) -> Result<User, AuthError> {
    let username = identity.username();

    match store.get_user_by_username(&username).await {
        Ok(user) => {
            if identity.email.is_empty() || !user.email.eq_ignore_ascii_case(&identity.email) {
                warn!(
                    user_id = user.id,
                    username = %user.username,
                    "Refusing to link identity with a different email"
                );
                return Err(AuthError::NotAllowed(
                    "This username belongs to another account".to_string(),
                ));
            }
            if let Err(e) = store.record_login(user.id).await {
                warn!(user_id = user.id, error = %e, "Failed to record login");
            }
            Ok(user)
        }
        Err(e) if e.is_not_found() => {
            let password_hash =
                hash_password_blocking(random_token(32), security.clone()).await?;

            let mut user = store
                .create_user(NewUser {
                    username,
                    email: identity.email.clone(),
                    password_hash,
                    permissions: Permissions::READ_ONLY,
                    active: true,
                })
                .await?;

            store.record_login(user.id).await?;
            user = store.get_user_by_id(user.id).await?;

            info!(user_id = user.id, username = %user.username, "Provisioned user from identity provider");
            Ok(user)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;

    fn identity(preferred: Option<&str>, email: &str, subject: &str) -> ProviderUser {
        ProviderUser {
            subject: subject.to_string(),
            email: email.to_string(),
            preferred_username: preferred.map(str::to_string),
            ..ProviderUser::default()
        }
    }

    fn cheap_security() -> SecurityConfig {
        SecurityConfig {
            argon2_memory_cost_kib: 1024,
            argon2_time_cost: 1,
            ..SecurityConfig::default()
        }
    }

    #[test]
    fn username_prefers_preferred_username() {
        let id = identity(Some("steve"), "alex@example.com", "abc");
        assert_eq!(id.username(), "steve");
    }

    #[test]
    fn username_falls_back_to_email_then_subject() {
        assert_eq!(identity(None, "alex@example.com", "abc").username(), "alex");
        assert_eq!(identity(Some(""), "", "abc").username(), "user_abc");
        assert_eq!(identity(None, "@example.com", "xyz").username(), "user_xyz");
    }

    #[test]
    fn userinfo_payload_deserializes() {
        let json = r#"{"sub":"42","email":"a@b.c","email_verified":true,"preferred_username":"herobrine"}"#;
        let user: ProviderUser = serde_json::from_str(json).unwrap();
        assert_eq!(user.subject, "42");
        assert!(user.email_verified);
        assert_eq!(user.username(), "herobrine");
    }

    #[test]
    fn authorize_url_carries_state_and_scopes() {
        let config = OAuthConfig {
            enabled: true,
            issuer: "https://id.example.com/application/o/".to_string(),
            client_id: "blockyard".to_string(),
            client_secret: "shh".to_string(),
            redirect_url: "http://localhost:8080/api/auth/callback/authentik".to_string(),
            ..OAuthConfig::default()
        };
        let provider = OidcProvider::new(Client::new(), &config);

        let url = Url::parse(&provider.authorize_url("xyz").unwrap()).unwrap();
        assert_eq!(url.path(), "/application/o/oauth2/authorize");

        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["state"], "xyz");
        assert_eq!(params["scope"], SCOPES);
        assert_eq!(params["client_id"], "blockyard");
        assert!(!params.contains_key("client_secret"));
    }

    #[tokio::test]
    async fn first_sign_in_creates_read_only_user() {
        let store = Store::in_memory().await.unwrap();
        let user = sync_user(
            &store,
            &identity(Some("steve"), "steve@example.com", "s1"),
            &cheap_security(),
        )
        .await
        .unwrap();

        assert_eq!(user.username, "steve");
        assert_eq!(user.permissions, Permissions::READ_ONLY);
        assert!(user.active);
        assert!(user.last_login.is_some());
    }

    #[tokio::test]
    async fn repeat_sign_in_reuses_account() {
        let store = Store::in_memory().await.unwrap();
        let id = identity(None, "alex@example.com", "a1");

        let first = sync_user(&store, &id, &cheap_security()).await.unwrap();
        let second = sync_user(&store, &id, &cheap_security()).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.list_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn identity_with_other_email_cannot_take_over_account() {
        let store = Store::in_memory().await.unwrap();
        let admin = store
            .create_user(NewUser {
                username: "root".to_string(),
                email: "root@example.com".to_string(),
                password_hash: "not-a-real-hash".to_string(),
                permissions: Permissions::ALL,
                active: true,
            })
            .await
            .unwrap();

        let err = sync_user(
            &store,
            &identity(Some("root"), "mallory@example.net", "m1"),
            &cheap_security(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::NotAllowed(_)));

        let stored = store.get_user_by_id(admin.id).await.unwrap();
        assert!(stored.last_login.is_none());
    }

    #[tokio::test]
    async fn matching_email_links_existing_account() {
        let store = Store::in_memory().await.unwrap();
        let existing = store
            .create_user(NewUser {
                username: "steve".to_string(),
                email: "steve@example.com".to_string(),
                password_hash: "not-a-real-hash".to_string(),
                permissions: Permissions::OPERATOR,
                active: true,
            })
            .await
            .unwrap();

        let user = sync_user(
            &store,
            &identity(Some("steve"), "Steve@Example.com", "s1"),
            &cheap_security(),
        )
        .await
        .unwrap();
        assert_eq!(user.id, existing.id);
        assert_eq!(user.permissions, Permissions::OPERATOR);
    }
}
