use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::id::Role;

/// Addressable destination (queue) name.
///
/// Doubles as the transport handle: every transport operation addresses
/// destinations by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationName(String);

impl DestinationName {
    #[must_use]
    pub const fn from_string(name: String) -> Self {
        Self(name)
    }

    /// Request destination for a role. Shared by every producer and
    /// consumer of that role.
    #[must_use]
    pub fn requests(role: &Role) -> Self {
        Self(format!("{}-requests", role.as_str()))
    }

    /// Reply destination for a role, private to one process.
    ///
    /// The process id suffix keeps concurrently running producers from
    /// draining each other's responses.
    #[must_use]
    pub fn replies(prefix: &str, role: &Role, process_id: Uuid) -> Self {
        Self(format!("{prefix}{}-{process_id}", role.as_str()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DestinationName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DestinationName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Listing entry returned by `Transport::list_destinations`.
#[derive(Debug, Clone)]
pub struct DestinationInfo {
    pub name: DestinationName,
    /// Last time the owning process heartbeated the destination. `None`
    /// for destinations that were never tagged.
    pub last_heartbeat: Option<DateTime<Utc>>,
}
