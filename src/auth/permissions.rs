use std::sync::Arc;
use tracing::debug;

use super::{AuthError, Principal};
use crate::db::CredentialStore;
use crate::domain::Capability;

/// Authorizes principals against capabilities, optionally scoped to a server.
#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn CredentialStore>,
}

fn deny(principal: &Principal, capability: Capability) -> AuthError {
    metrics::counter!("auth_failures_total", "reason" => "forbidden").increment(1);
    debug!(
        user_id = principal.user_id,
        capability = capability.as_str(),
        "Permission denied"
    );
    AuthError::Forbidden(capability)
}

impl PermissionResolver {
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    pub fn require(principal: &Principal, capability: Capability) -> Result<(), AuthError> {
        if principal.permissions.is_admin_or_has(capability) {
            Ok(())
        } else {
            Err(deny(principal, capability))
        }
    }

    /// Like [`Self::require`], but the owner of `server_name` passes any
    /// server-scoped check. Ownership never grants `Admin`. When the server
    /// record does not exist only the global check applies.
    pub async fn require_for_server(
        &self,
        principal: &Principal,
        capability: Capability,
        server_name: &str,
    ) -> Result<(), AuthError> {
        if principal.permissions.is_admin_or_has(capability) {
            return Ok(());
        }

        if !capability.is_server_scoped() {
            return Err(deny(principal, capability));
        }

        match self.store.get_server_by_name(server_name).await {
            Ok(record) if record.owner_id == principal.user_id => {
                debug!(
                    user_id = principal.user_id,
                    server_name,
                    capability = capability.as_str(),
                    "Allowed by ownership"
                );
                Ok(())
            }
            Ok(_) => Err(deny(principal, capability)),
            Err(e) if e.is_not_found() => Err(deny(principal, capability)),
            Err(e) => Err(e.into()),
        }
    }
}
