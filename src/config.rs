use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Placeholder secret shipped in the default config. Refused at startup unless
/// `security.allow_insecure_jwt_secret` is set.
pub const DEFAULT_JWT_SECRET: &str = "change-me-blockyard-jwt-secret";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub security: SecurityConfig,

    pub kubernetes: KubernetesConfig,

    pub oauth: OAuthConfig,

    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_path: String,

    pub log_level: String,

    /// Number of tokio worker threads (default: 2)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,

    /// Maximum database connections (default: 5)
    pub max_db_connections: u32,

    /// Minimum database connections (default: 1)
    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:data/blockyard.db".to_string(),
            log_level: "info".to_string(),
            worker_threads: 2,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,

    pub cors_allowed_origins: Vec<String>,

    /// Whether to set the Secure flag on the OAuth state cookie.
    /// Set to false for local development without HTTPS.
    pub secure_cookies: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            cors_allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            secure_cookies: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Argon2 memory cost in KiB (default: 8192 = 8MB)
    pub argon2_memory_cost_kib: u32,

    /// Argon2 time cost (iterations)
    pub argon2_time_cost: u32,

    pub argon2_parallelism: u32,

    /// HMAC secret used to sign bearer tokens.
    #[serde(skip_serializing)]
    pub jwt_secret: String,

    pub jwt_expiry_hours: i64,

    /// Permit starting with [`DEFAULT_JWT_SECRET`]. Only meant for local development.
    pub allow_insecure_jwt_secret: bool,

    /// Prefix put in front of every generated API key (`<prefix>.<random>`).
    pub api_key_prefix: String,

    pub min_password_length: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            argon2_memory_cost_kib: 8192,
            argon2_time_cost: 3,
            argon2_parallelism: 1,
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            jwt_expiry_hours: 24,
            allow_insecure_jwt_secret: false,
            api_key_prefix: "mcapi".to_string(),
            min_password_length: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterBackend {
    /// Talk to a real cluster through kubeconfig or the in-cluster service account.
    Cluster,
    /// Keep every object in process memory. Nothing is actually scheduled.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesConfig {
    pub backend: ClusterBackend,

    pub namespace: String,

    /// Kubeconfig context to use; `None` picks the current context, then in-cluster config.
    pub context: Option<String>,

    pub deployment_prefix: String,

    pub pvc_suffix: String,

    pub service_suffix: String,

    pub storage_size: String,

    pub storage_class: Option<String>,

    pub image: String,

    pub default_replicas: i32,

    /// Upper bound for a single remote command, in seconds (default: 30)
    pub exec_timeout_seconds: u64,

    /// Time given to the game server to flush chunks after `save-all`.
    pub save_settle_millis: u64,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            backend: ClusterBackend::Cluster,
            namespace: "blockyard".to_string(),
            context: None,
            deployment_prefix: "minecraft-server-".to_string(),
            pvc_suffix: "-pvc".to_string(),
            service_suffix: "-svc".to_string(),
            storage_size: "10Gi".to_string(),
            storage_class: Some("rook-ceph-block".to_string()),
            image: "itzg/minecraft-server".to_string(),
            default_replicas: 1,
            exec_timeout_seconds: 30,
            save_settle_millis: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub enabled: bool,

    /// Provider name used in the `/auth/oauth/{provider}` routes.
    pub provider: String,

    /// Base URL of the identity provider, e.g. `https://auth.example.com/application/o`
    pub issuer: String,

    pub client_id: String,

    #[serde(skip_serializing)]
    pub client_secret: String,

    pub redirect_url: String,

    /// Where the browser lands after a successful sign-in.
    pub frontend_url: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "authentik".to_string(),
            issuer: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_url: String::new(),
            frontend_url: "http://localhost:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    pub json_logs: bool,

    pub loki_enabled: bool,

    pub loki_url: String,

    pub loki_labels: std::collections::HashMap<String, String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        let mut labels = std::collections::HashMap::new();
        labels.insert("app".to_string(), "blockyard".to_string());

        Self {
            metrics_enabled: true,
            json_logs: false,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
            loki_labels: labels,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            server: ServerConfig::default(),
            security: SecurityConfig::default(),
            kubernetes: KubernetesConfig::default(),
            oauth: OAuthConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        paths.push(PathBuf::from("config.toml"));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("blockyard").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".blockyard").join("config.toml"));
        }

        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            Ok(false)
        } else {
            let config = Self::default();
            config.save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.kubernetes.namespace.trim().is_empty() {
            anyhow::bail!("kubernetes.namespace cannot be empty");
        }

        if self.kubernetes.exec_timeout_seconds == 0 {
            anyhow::bail!("kubernetes.exec_timeout_seconds must be > 0");
        }

        if self.kubernetes.default_replicas < 1 {
            anyhow::bail!("kubernetes.default_replicas must be at least 1");
        }

        if self.security.jwt_secret.is_empty() {
            anyhow::bail!("security.jwt_secret cannot be empty");
        }

        if self.security.jwt_secret == DEFAULT_JWT_SECRET && !self.security.allow_insecure_jwt_secret
        {
            anyhow::bail!(
                "security.jwt_secret is still the default value; set a real secret or enable allow_insecure_jwt_secret"
            );
        }

        if self.security.jwt_expiry_hours <= 0 {
            anyhow::bail!("security.jwt_expiry_hours must be > 0");
        }

        if self.oauth.enabled
            && (self.oauth.issuer.is_empty()
                || self.oauth.client_id.is_empty()
                || self.oauth.client_secret.is_empty()
                || self.oauth.redirect_url.is_empty())
        {
            anyhow::bail!("OAuth is enabled but issuer, client_id, client_secret or redirect_url is missing");
        }

        Ok(())
    }

    #[must_use]
    pub fn exec_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.kubernetes.exec_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.kubernetes.namespace, "blockyard");
        assert_eq!(config.kubernetes.default_replicas, 1);
        assert_eq!(config.kubernetes.exec_timeout_seconds, 30);
        assert_eq!(config.security.api_key_prefix, "mcapi");
        assert!(!config.oauth.enabled);
    }

    #[test]
    fn test_default_secret_rejected() {
        let config = Config::default();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.security.allow_insecure_jwt_secret = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_incomplete_oauth_rejected() {
        let mut config = Config::default();
        config.security.jwt_secret = "a-real-secret".to_string();
        config.oauth.enabled = true;
        config.oauth.issuer = "https://auth.example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secrets_not_serialized() {
        let mut config = Config::default();
        config.security.jwt_secret = "super-secret-value".to_string();
        config.oauth.client_secret = "oauth-secret-value".to_string();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[kubernetes]"));
        assert!(!toml_str.contains("super-secret-value"));
        assert!(!toml_str.contains("oauth-secret-value"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [general]
            log_level = "debug"

            [kubernetes]
            backend = "memory"
            namespace = "games"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.kubernetes.backend, ClusterBackend::Memory);
        assert_eq!(config.kubernetes.namespace, "games");
        assert_eq!(config.kubernetes.pvc_suffix, "-pvc");
    }
}
