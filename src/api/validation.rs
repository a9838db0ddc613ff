use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::ApiError;
use crate::domain::ServerName;

const MAX_ENV_OVERRIDES: usize = 64;
const MAX_ENV_VALUE_LEN: usize = 4096;
const MAX_COMMAND_LEN: usize = 1024;

fn env_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid regex"))
}

pub fn validate_server_name(name: &str) -> Result<ServerName, ApiError> {
    ServerName::new(name).map_err(|e| ApiError::validation(e.to_string()))
}

pub fn validate_env_overrides(env: &BTreeMap<String, String>) -> Result<(), ApiError> {
    if env.len() > MAX_ENV_OVERRIDES {
        return Err(ApiError::validation(format!(
            "At most {} environment overrides are allowed",
            MAX_ENV_OVERRIDES
        )));
    }

    for (key, value) in env {
        if !env_key_regex().is_match(key) {
            return Err(ApiError::validation(format!(
                "Invalid environment variable name: {}",
                key
            )));
        }
        if value.len() > MAX_ENV_VALUE_LEN {
            return Err(ApiError::validation(format!(
                "Value for {} must be {} characters or less",
                key, MAX_ENV_VALUE_LEN
            )));
        }
    }

    Ok(())
}

/// Console commands travel through a named pipe, one line each.
pub fn validate_console_command(command: &str) -> Result<&str, ApiError> {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation("Command cannot be empty"));
    }

    if trimmed.len() > MAX_COMMAND_LEN {
        return Err(ApiError::validation(format!(
            "Command must be {} characters or less",
            MAX_COMMAND_LEN
        )));
    }

    if trimmed.contains(['\n', '\r', '\0']) {
        return Err(ApiError::validation(
            "Command must be a single line without control characters",
        ));
    }

    Ok(trimmed)
}

pub fn validate_id(id: i64, what: &str) -> Result<i64, ApiError> {
    if id <= 0 {
        return Err(ApiError::validation(format!(
            "Invalid {} ID: {}. ID must be a positive integer",
            what, id
        )));
    }
    Ok(id)
}
