use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use super::AuthError;
use crate::config::SecurityConfig;
use crate::db::User;

/// Claims carried by a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub permissions: i64,
    pub iat: i64,
    pub exp: i64,
}

/// Signs and verifies HS256 bearer tokens.
pub struct JwtCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    expiry: chrono::Duration,
}

impl JwtCodec {
    #[must_use]
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            expiry: chrono::Duration::hours(expiry_hours),
        }
    }

    #[must_use]
    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::new(&config.jwt_secret, config.jwt_expiry_hours)
    }

    pub fn issue(&self, user: &User) -> Result<String, AuthError> {
        let now = chrono::Utc::now();
        let claims = Claims {
            user_id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            permissions: user.permissions.bits(),
            iat: now.timestamp(),
            exp: (now + self.expiry).timestamp(),
        };
        self.sign(&claims)
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("failed to sign token: {e}")))
    }

    /// Expiry is reported separately from every other verification failure.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::TokenInvalid,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Permissions;

    fn user() -> User {
        User {
            id: 7,
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            permissions: Permissions::OPERATOR,
            active: true,
            last_login: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn issued_token_decodes_to_same_user() {
        let codec = JwtCodec::new("test-secret", 1);
        let token = codec.issue(&user()).unwrap();
        let claims = codec.verify(&token).unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.permissions, Permissions::OPERATOR.bits());
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn expired_token_is_distinct_from_invalid() {
        let codec = JwtCodec::new("test-secret", 1);
        let now = chrono::Utc::now().timestamp();
        let expired = codec
            .sign(&Claims {
                user_id: 7,
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                permissions: 0,
                iat: now - 7200,
                exp: now - 3600,
            })
            .unwrap();

        assert!(matches!(codec.verify(&expired), Err(AuthError::TokenExpired)));
        assert!(matches!(
            codec.verify("not.a.token"),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn token_signed_with_other_secret_is_invalid() {
        let token = JwtCodec::new("secret-a", 1).issue(&user()).unwrap();
        let result = JwtCodec::new("secret-b", 1).verify(&token);
        assert!(matches!(result, Err(AuthError::TokenInvalid)));
    }

    #[test]
    fn tampered_payload_is_invalid() {
        let codec = JwtCodec::new("test-secret", 1);
        let token = codec.issue(&user()).unwrap();
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        let other = codec
            .issue(&User {
                id: 1,
                ..user()
            })
            .unwrap();
        parts[1] = other.split('.').nth(1).unwrap().to_string();
        assert!(matches!(
            codec.verify(&parts.join(".")),
            Err(AuthError::TokenInvalid)
        ));
    }
}
