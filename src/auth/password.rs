use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::task;

use super::AuthError;
use crate::config::SecurityConfig;

fn argon2(config: &SecurityConfig) -> Result<Argon2<'static>, AuthError> {
    let params = Params::new(
        config.argon2_memory_cost_kib,
        config.argon2_time_cost,
        config.argon2_parallelism,
        None,
    )
    .map_err(|e| AuthError::Internal(format!("Invalid Argon2 params: {e}")))?;

    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a password using Argon2id with the configured cost parameters.
pub fn hash_password(password: &str, config: &SecurityConfig) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);

    argon2(config)?
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Internal(format!("Failed to hash password: {e}")))
}

/// Parameters are read from the stored hash, so old hashes keep verifying
/// after the configured costs change.
#[must_use]
pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .is_ok_and(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
}

/// Argon2 is CPU bound; keep it off the async workers.
pub async fn hash_password_blocking(
    password: String,
    config: SecurityConfig,
) -> Result<String, AuthError> {
    task::spawn_blocking(move || hash_password(&password, &config))
        .await
        .map_err(|e| AuthError::Internal(format!("Password hashing task panicked: {e}")))?
}

pub async fn verify_password_blocking(password: String, hash: String) -> Result<bool, AuthError> {
    task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| AuthError::Internal(format!("Password verification task panicked: {e}")))
}

/// Random alphanumeric string from the thread RNG.
#[must_use]
pub fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// `<prefix>.<random>`
#[must_use]
pub fn generate_api_key(prefix: &str) -> String {
    format!(
        "{prefix}.{}",
        random_token(crate::constants::limits::API_KEY_RANDOM_LEN)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap_config() -> SecurityConfig {
        SecurityConfig {
            argon2_memory_cost_kib: 1024,
            argon2_time_cost: 1,
            ..SecurityConfig::default()
        }
    }

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("correct horse", &cheap_config()).unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-hash"));
    }

    #[test]
    fn api_key_shape() {
        let key = generate_api_key("mcapi");
        let (prefix, secret) = key.split_once('.').unwrap();
        assert_eq!(prefix, "mcapi");
        assert_eq!(secret.len(), 32);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(key, generate_api_key("mcapi"));
    }

    #[tokio::test]
    async fn blocking_helpers_round_trip() {
        let hash = hash_password_blocking("pw-123456".to_string(), cheap_config())
            .await
            .unwrap();
        assert!(
            verify_password_blocking("pw-123456".to_string(), hash)
                .await
                .unwrap()
        );
    }
}
