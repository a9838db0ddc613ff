//! Capability bits carried by every account.
//!
//! Stored as a signed 64-bit column, checked through [`Permissions`] so call
//! sites never touch raw masks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One grantable capability. The discriminant is its bit in the stored mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i64)]
pub enum Capability {
    Admin = 1,
    CreateServer = 1 << 1,
    DeleteServer = 1 << 2,
    StartServer = 1 << 3,
    StopServer = 1 << 4,
    RestartServer = 1 << 5,
    ExecCommand = 1 << 6,
    ViewServer = 1 << 7,
}

impl Capability {
    pub const ALL: [Self; 8] = [
        Self::Admin,
        Self::CreateServer,
        Self::DeleteServer,
        Self::StartServer,
        Self::StopServer,
        Self::RestartServer,
        Self::ExecCommand,
        Self::ViewServer,
    ];

    #[must_use]
    pub const fn bit(self) -> i64 {
        self as i64
    }

    /// Capabilities that act on a single server and may be granted by owning it.
    #[must_use]
    pub const fn is_server_scoped(self) -> bool {
        !matches!(self, Self::Admin)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::CreateServer => "create_server",
            Self::DeleteServer => "delete_server",
            Self::StartServer => "start_server",
            Self::StopServer => "stop_server",
            Self::RestartServer => "restart_server",
            Self::ExecCommand => "exec_command",
            Self::ViewServer => "view_server",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of capabilities. Unknown bits survive a round trip but grant nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(i64);

impl Permissions {
    pub const NONE: Self = Self(0);

    pub const READ_ONLY: Self = Self(Capability::ViewServer.bit());

    pub const OPERATOR: Self = Self(
        Capability::CreateServer.bit()
            | Capability::DeleteServer.bit()
            | Capability::StartServer.bit()
            | Capability::StopServer.bit()
            | Capability::RestartServer.bit()
            | Capability::ExecCommand.bit()
            | Capability::ViewServer.bit(),
    );

    pub const ALL: Self = Self(Self::OPERATOR.0 | Capability::Admin.bit());

    #[must_use]
    pub const fn from_bits(bits: i64) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> i64 {
        self.0
    }

    #[must_use]
    pub const fn has(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    #[must_use]
    pub const fn is_admin(self) -> bool {
        self.has(Capability::Admin)
    }

    /// The single authorization predicate: admins pass every check.
    #[must_use]
    pub const fn is_admin_or_has(self, capability: Capability) -> bool {
        self.is_admin() || self.has(capability)
    }

    #[must_use]
    pub const fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    #[must_use]
    pub const fn without(self, capability: Capability) -> Self {
        Self(self.0 & !capability.bit())
    }

    /// Known capabilities present in the set, in bit order.
    #[must_use]
    pub fn capabilities(self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| self.has(*c))
            .collect()
    }
}

impl From<Capability> for Permissions {
    fn from(capability: Capability) -> Self {
        Self(capability.bit())
    }
}

impl FromIterator<Capability> for Permissions {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, Self::with)
    }
}
