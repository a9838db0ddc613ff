//! Domain primitives for tenant game servers.
//!
//! [`ServerName`] is the only externally addressable key of a server; every
//! cluster object name is derived from it through [`ResourceNames`].

pub mod permissions;

pub use permissions::{Capability, Permissions};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::config::KubernetesConfig;
use crate::constants::limits::MAX_SERVER_NAME_LEN;

fn server_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("Invalid regex"))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServerNameError {
    #[error("Server name cannot be empty")]
    Empty,

    #[error("Server name must be {MAX_SERVER_NAME_LEN} characters or less")]
    TooLong,

    #[error(
        "Server name may only contain lowercase letters, digits and hyphens, and must start and end with a letter or digit"
    )]
    InvalidCharacters,
}

/// A validated server name, safe to embed in cluster object names.
///
/// ```rust
/// use blockyard::domain::ServerName;
///
/// let name: ServerName = "alice-survival".parse().unwrap();
/// assert_eq!(name.as_str(), "alice-survival");
/// assert!("Alice".parse::<ServerName>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ServerName(String);

impl ServerName {
    pub fn new(name: impl Into<String>) -> Result<Self, ServerNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ServerNameError::Empty);
        }
        if name.len() > MAX_SERVER_NAME_LEN {
            return Err(ServerNameError::TooLong);
        }
        if !server_name_regex().is_match(&name) {
            return Err(ServerNameError::InvalidCharacters);
        }
        Ok(Self(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ServerName {
    type Err = ServerNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for ServerName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

impl AsRef<str> for ServerName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle state persisted on the server record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerStatus {
    Creating,
    Running,
    Stopped,
}

impl ServerStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "Creating",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Creating" => Ok(Self::Creating),
            "Running" => Ok(Self::Running),
            "Stopped" => Ok(Self::Stopped),
            other => Err(format!("unknown server status: {other}")),
        }
    }
}

/// Cluster object names for one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    pub workload: String,
    pub volume_claim: String,
    pub service: String,
}

impl ResourceNames {
    #[must_use]
    pub fn derive(name: &ServerName, config: &KubernetesConfig) -> Self {
        let workload = format!("{}{}", config.deployment_prefix, name);
        Self {
            volume_claim: format!("{workload}{}", config.pvc_suffix),
            service: format!("{workload}{}", config.service_suffix),
            workload,
        }
    }

    /// Label selector matching every object created for this server.
    #[must_use]
    pub fn selector(&self) -> String {
        format!("{}={}", crate::constants::labels::APP, self.workload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_name_validation() {
        assert!(ServerName::new("alice-survival").is_ok());
        assert!(ServerName::new("a").is_ok());
        assert_eq!(ServerName::new(""), Err(ServerNameError::Empty));
        assert_eq!(
            ServerName::new("Alice"),
            Err(ServerNameError::InvalidCharacters)
        );
        assert_eq!(
            ServerName::new("-edge"),
            Err(ServerNameError::InvalidCharacters)
        );
        assert_eq!(
            ServerName::new("edge-"),
            Err(ServerNameError::InvalidCharacters)
        );
        assert_eq!(
            ServerName::new("a".repeat(MAX_SERVER_NAME_LEN + 1)),
            Err(ServerNameError::TooLong)
        );
    }

    #[test]
    fn server_name_deserialize_validates() {
        let ok: ServerName = serde_json::from_str("\"bob-creative\"").unwrap();
        assert_eq!(ok.as_str(), "bob-creative");
        assert!(serde_json::from_str::<ServerName>("\"bad name\"").is_err());
    }

    #[test]
    fn resource_names_are_deterministic() {
        let config = KubernetesConfig::default();
        let name = ServerName::new("alice-survival").unwrap();
        let names = ResourceNames::derive(&name, &config);
        assert_eq!(names.workload, "minecraft-server-alice-survival");
        assert_eq!(names.volume_claim, "minecraft-server-alice-survival-pvc");
        assert_eq!(names.service, "minecraft-server-alice-survival-svc");
        assert_eq!(names.selector(), "app=minecraft-server-alice-survival");
        assert_eq!(ResourceNames::derive(&name, &config), names);
    }

    #[test]
    fn status_round_trip() {
        for status in [
            ServerStatus::Creating,
            ServerStatus::Running,
            ServerStatus::Stopped,
        ] {
            assert_eq!(status.as_str().parse::<ServerStatus>(), Ok(status));
        }
        assert!("Paused".parse::<ServerStatus>().is_err());
    }
}
