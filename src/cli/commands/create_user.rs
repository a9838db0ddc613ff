use std::sync::Arc;

use crate::auth::JwtCodec;
use crate::config::Config;
use crate::db::{CredentialStore, Store};
use crate::domain::Permissions;
use crate::services::{AuthService, DefaultAuthService, Registration};

/// Creates an account without going through the API. This is how the first
/// administrator is bootstrapped.
pub async fn cmd_create_user(
    config: &Config,
    username: &str,
    email: &str,
    password: &str,
    admin: bool,
) -> anyhow::Result<()> {
    let store = Store::new(&config.general.database_path).await?;
    let credentials: Arc<dyn CredentialStore> = Arc::new(store);
    let jwt = Arc::new(JwtCodec::from_config(&config.security));
    let service = DefaultAuthService::new(credentials, jwt, config.security.clone());

    let permissions = if admin {
        Permissions::ALL
    } else {
        Permissions::READ_ONLY
    };

    let user = service
        .create_user(
            Registration {
                username: username.to_string(),
                email: email.to_string(),
                password: password.to_string(),
            },
            permissions,
        )
        .await?;

    println!("✓ Created user {} (id {})", user.username, user.id);
    println!("  Capabilities: {}", user.capabilities.join(", "));
    Ok(())
}
