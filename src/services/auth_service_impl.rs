//! [`AuthService`] backed by the credential store.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::oauth::{ProviderUser, sync_user};
use crate::auth::password::{generate_api_key, hash_password_blocking, verify_password_blocking};
use crate::auth::{JwtCodec, Principal};
use crate::config::SecurityConfig;
use crate::constants::limits;
use crate::db::{CredentialStore, NewApiKey, NewUser, User, UserUpdate};
use crate::domain::{Capability, Permissions};
use crate::services::auth_service::{
    AccountUpdate, ApiKeyInfo, AuthError, AuthService, CreatedApiKey, LoginResult, NewKeyRequest,
    Registration, UserInfo,
};

const MAX_PASSWORD_LEN: usize = 1024;
const MAX_EMAIL_LEN: usize = 254;
const MAX_KEY_DESCRIPTION_LEN: usize = 200;
const MAX_KEY_LIFETIME_DAYS: i64 = 3650;

pub fn validate_username(username: &str) -> Result<(), AuthError> {
    let len = username.chars().count();
    if !(limits::MIN_USERNAME_LEN..=limits::MAX_USERNAME_LEN).contains(&len) {
        return Err(AuthError::Validation(format!(
            "Username must be between {} and {} characters",
            limits::MIN_USERNAME_LEN,
            limits::MAX_USERNAME_LEN
        )));
    }

    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(AuthError::Validation(
            "Username can only contain letters, numbers, dots, hyphens, and underscores".to_string(),
        ));
    }

    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), AuthError> {
    let valid = email.len() <= MAX_EMAIL_LEN
        && !email.chars().any(char::is_whitespace)
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());

    if valid {
        Ok(())
    } else {
        Err(AuthError::Validation("Invalid email address".to_string()))
    }
}

pub fn validate_password(password: &str, min_len: usize) -> Result<(), AuthError> {
    if password.len() < min_len {
        return Err(AuthError::Validation(format!(
            "Password must be at least {min_len} characters"
        )));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(AuthError::Validation("Password is too long".to_string()));
    }
    Ok(())
}

fn require_admin(actor: &Principal) -> Result<(), AuthError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(AuthError::Forbidden(Capability::Admin))
    }
}

pub struct DefaultAuthService {
    store: Arc<dyn CredentialStore>,
    jwt: Arc<JwtCodec>,
    security: SecurityConfig,
}

impl DefaultAuthService {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        jwt: Arc<JwtCodec>,
        security: SecurityConfig,
    ) -> Self {
        Self {
            store,
            jwt,
            security,
        }
    }

    fn sign_in(&self, user: User) -> Result<LoginResult, AuthError> {
        let token = self.jwt.issue(&user)?;
        Ok(LoginResult {
            token,
            expires_in: self.security.jwt_expiry_hours * 3600,
            user: user.into(),
        })
    }

    async fn insert_user(
        &self,
        registration: Registration,
        permissions: Permissions,
    ) -> Result<User, AuthError> {
        let username = registration.username.trim().to_string();
        let email = registration.email.trim().to_lowercase();

        validate_username(&username)?;
        validate_email(&email)?;
        validate_password(&registration.password, self.security.min_password_length)?;

        let password_hash =
            hash_password_blocking(registration.password, self.security.clone()).await?;

        let user = self
            .store
            .create_user(NewUser {
                username,
                email,
                password_hash,
                permissions,
                active: true,
            })
            .await?;

        info!(user_id = user.id, username = %user.username, permissions = user.permissions.bits(), "User created");
        Ok(user)
    }
}

#[async_trait]
impl AuthService for DefaultAuthService {
    async fn register(&self, registration: Registration) -> Result<LoginResult, AuthError> {
        let user = self
            .insert_user(registration, Permissions::READ_ONLY)
            .await?;
        self.sign_in(user)
    }

    async fn login(&self, username: &str, password: &str) -> Result<LoginResult, AuthError> {
        let (user, hash) = match self.store.get_user_with_password_hash(username.trim()).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => return Err(AuthError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };

        if !verify_password_blocking(password.to_string(), hash).await? {
            warn!(user_id = user.id, "Login failed: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.active {
            return Err(AuthError::Inactive);
        }

        let user = match self.store.record_login(user.id).await {
            Ok(()) => self.store.get_user_by_id(user.id).await.unwrap_or(user),
            Err(e) => {
                warn!(user_id = user.id, error = %e, "Failed to record login");
                user
            }
        };

        info!(user_id = user.id, "User logged in");
        self.sign_in(user)
    }

    async fn sign_in_external(&self, identity: &ProviderUser) -> Result<LoginResult, AuthError> {
        let user = sync_user(self.store.as_ref(), identity, &self.security).await?;
        if !user.active {
            return Err(AuthError::Inactive);
        }
        self.sign_in(user)
    }

    async fn me(&self, principal: &Principal) -> Result<UserInfo, AuthError> {
        Ok(self.store.get_user_by_id(principal.user_id).await?.into())
    }

    async fn create_user(
        &self,
        registration: Registration,
        permissions: Permissions,
    ) -> Result<UserInfo, AuthError> {
        Ok(self.insert_user(registration, permissions).await?.into())
    }

    async fn list_users(&self) -> Result<Vec<UserInfo>, AuthError> {
        Ok(self
            .store
            .list_users()
            .await?
            .into_iter()
            .map(UserInfo::from)
            .collect())
    }

    async fn get_user(&self, actor: &Principal, user_id: i64) -> Result<UserInfo, AuthError> {
        if actor.user_id != user_id {
            require_admin(actor)?;
        }
        Ok(self.store.get_user_by_id(user_id).await?.into())
    }

    async fn update_user(
        &self,
        actor: &Principal,
        user_id: i64,
        update: AccountUpdate,
    ) -> Result<UserInfo, AuthError> {
        let is_self = actor.user_id == user_id;
        if !is_self {
            require_admin(actor)?;
        }

        let touches_access = update.permissions.is_some() || update.active.is_some();
        if touches_access && !actor.is_admin() {
            return Err(AuthError::NotAllowed(
                "Only administrators can change permissions or account status".to_string(),
            ));
        }
        if is_self
            && (update.active == Some(false)
                || update.permissions.is_some_and(|p| !p.is_admin()))
        {
            return Err(AuthError::NotAllowed(
                "Administrators cannot deactivate or demote themselves".to_string(),
            ));
        }

        let email = match update.email {
            Some(email) => {
                let email = email.trim().to_lowercase();
                validate_email(&email)?;
                Some(email)
            }
            None => None,
        };

        let password_hash = match update.password {
            Some(password) => {
                validate_password(&password, self.security.min_password_length)?;
                Some(hash_password_blocking(password, self.security.clone()).await?)
            }
            None => None,
        };

        let user = self
            .store
            .update_user(
                user_id,
                UserUpdate {
                    email,
                    password_hash,
                    permissions: update.permissions,
                    active: update.active,
                },
            )
            .await?;

        info!(user_id, actor_id = actor.user_id, "User updated");
        Ok(user.into())
    }

    async fn delete_user(&self, actor: &Principal, user_id: i64) -> Result<(), AuthError> {
        require_admin(actor)?;
        if actor.user_id == user_id {
            return Err(AuthError::NotAllowed(
                "Administrators cannot delete their own account".to_string(),
            ));
        }

        self.store.delete_user(user_id).await?;
        info!(user_id, actor_id = actor.user_id, "User deleted");
        Ok(())
    }

    async fn create_api_key(
        &self,
        actor: &Principal,
        request: NewKeyRequest,
    ) -> Result<CreatedApiKey, AuthError> {
        let description = request.description.trim().to_string();
        if description.chars().count() > MAX_KEY_DESCRIPTION_LEN {
            return Err(AuthError::Validation(format!(
                "Description must be {MAX_KEY_DESCRIPTION_LEN} characters or less"
            )));
        }

        let expires_at = match request.expires_in_days {
            Some(days) if !(1..=MAX_KEY_LIFETIME_DAYS).contains(&days) => {
                return Err(AuthError::Validation(format!(
                    "expires_in_days must be between 1 and {MAX_KEY_LIFETIME_DAYS}"
                )));
            }
            Some(days) => Some(chrono::Utc::now() + chrono::Duration::days(days)),
            None => None,
        };

        let secret = generate_api_key(&self.security.api_key_prefix);
        let key = self
            .store
            .create_api_key(NewApiKey {
                user_id: actor.user_id,
                key: secret.clone(),
                description,
                expires_at,
            })
            .await?;

        info!(user_id = actor.user_id, api_key_id = key.id, "API key created");
        Ok(CreatedApiKey {
            key: secret,
            info: key.into(),
        })
    }

    async fn list_api_keys(&self, actor: &Principal) -> Result<Vec<ApiKeyInfo>, AuthError> {
        Ok(self
            .store
            .list_api_keys_by_user(actor.user_id)
            .await?
            .into_iter()
            .map(ApiKeyInfo::from)
            .collect())
    }

    async fn delete_api_key(&self, actor: &Principal, key_id: i64) -> Result<(), AuthError> {
        let key = self.store.get_api_key_by_id(key_id).await?;
        if key.user_id != actor.user_id {
            require_admin(actor)?;
        }

        self.store.delete_api_key(key_id).await?;
        info!(api_key_id = key_id, actor_id = actor.user_id, "API key deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthMethod;
    use crate::db::Store;

    async fn service() -> DefaultAuthService {
        let store: Arc<dyn CredentialStore> = Arc::new(Store::in_memory().await.unwrap());
        let security = SecurityConfig {
            argon2_memory_cost_kib: 1024,
            argon2_time_cost: 1,
            ..SecurityConfig::default()
        };
        DefaultAuthService::new(store, Arc::new(JwtCodec::new("svc-secret", 1)), security)
    }

    fn registration(name: &str) -> Registration {
        Registration {
            username: name.to_string(),
            email: format!("{name}@example.com"),
            password: "hunter22".to_string(),
        }
    }

    fn principal_of(info: &UserInfo) -> Principal {
        Principal {
            user_id: info.id,
            username: info.username.clone(),
            email: info.email.clone(),
            permissions: Permissions::from_bits(info.permissions),
            active: info.active,
            method: AuthMethod::Bearer,
        }
    }

    #[test]
    fn username_rules() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("a.b-c_d").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username(&"x".repeat(51)).is_err());
    }

    #[test]
    fn email_rules() {
        assert!(validate_email("a@b.c").is_ok());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("a b@example.com").is_err());
    }

    #[tokio::test]
    async fn register_then_login() {
        let svc = service().await;
        let registered = svc.register(registration("alice")).await.unwrap();
        assert_eq!(registered.user.permissions, Permissions::READ_ONLY.bits());
        assert_eq!(registered.user.capabilities, vec!["view_server"]);

        let login = svc.login("alice", "hunter22").await.unwrap();
        let claims = svc.jwt.verify(&login.token).unwrap();
        assert_eq!(claims.user_id, registered.user.id);
        assert!(login.user.last_login.is_some());
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let svc = service().await;
        svc.register(registration("alice")).await.unwrap();

        let err = svc.register(registration("alice")).await.unwrap_err();
        assert!(matches!(err, AuthError::Conflict(_)));
    }

    #[tokio::test]
    async fn unknown_user_and_wrong_password_look_the_same() {
        let svc = service().await;
        svc.register(registration("alice")).await.unwrap();

        let wrong = svc.login("alice", "nope-nope").await.unwrap_err();
        let unknown = svc.login("mallory", "hunter22").await.unwrap_err();
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn inactive_account_cannot_log_in() {
        let svc = service().await;
        let admin = svc
            .create_user(registration("root"), Permissions::ALL)
            .await
            .unwrap();
        let carol = svc.register(registration("carol")).await.unwrap().user;

        svc.update_user(
            &principal_of(&admin),
            carol.id,
            AccountUpdate {
                active: Some(false),
                ..AccountUpdate::default()
            },
        )
        .await
        .unwrap();

        let err = svc.login("carol", "hunter22").await.unwrap_err();
        assert!(matches!(err, AuthError::Inactive));
    }

    #[tokio::test]
    async fn users_cannot_grant_themselves_permissions() {
        let svc = service().await;
        let alice = svc.register(registration("alice")).await.unwrap().user;
        let me = principal_of(&alice);

        let err = svc
            .update_user(
                &me,
                alice.id,
                AccountUpdate {
                    permissions: Some(Permissions::ALL),
                    ..AccountUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotAllowed(_)));

        let updated = svc
            .update_user(
                &me,
                alice.id,
                AccountUpdate {
                    email: Some("Alice@New.example".to_string()),
                    ..AccountUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.email, "alice@new.example");
    }

    #[tokio::test]
    async fn admin_cannot_delete_self() {
        let svc = service().await;
        let admin = svc
            .create_user(registration("root"), Permissions::ALL)
            .await
            .unwrap();
        let err = svc
            .delete_user(&principal_of(&admin), admin.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotAllowed(_)));
    }

    #[tokio::test]
    async fn api_key_lifecycle() {
        let svc = service().await;
        let bob = principal_of(&svc.register(registration("bob")).await.unwrap().user);
        let eve = principal_of(&svc.register(registration("eve")).await.unwrap().user);

        let created = svc
            .create_api_key(
                &bob,
                NewKeyRequest {
                    description: "ci".to_string(),
                    expires_in_days: Some(30),
                },
            )
            .await
            .unwrap();
        assert!(created.key.starts_with("mcapi."));
        assert!(created.info.expires_at.is_some());

        let listed = svc.list_api_keys(&bob).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].key_preview.contains("****"));
        assert_ne!(listed[0].key_preview, created.key);

        let err = svc.delete_api_key(&eve, created.info.id).await.unwrap_err();
        assert!(matches!(err, AuthError::Forbidden(Capability::Admin)));

        svc.delete_api_key(&bob, created.info.id).await.unwrap();
        assert!(svc.list_api_keys(&bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn api_key_expiry_is_bounded() {
        let svc = service().await;
        let bob = principal_of(&svc.register(registration("bob")).await.unwrap().user);
        let err = svc
            .create_api_key(
                &bob,
                NewKeyRequest {
                    description: String::new(),
                    expires_in_days: Some(0),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }
}
