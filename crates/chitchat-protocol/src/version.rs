//! Protocol versioning.
//!
//! Every Join carries the client's protocol version; the server refuses
//! clients whose major version differs from its own.

use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: Version = Version { major: 1, minor: 0 };

/// Protocol version information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Bumped on breaking wire changes.
    pub major: u8,
    /// Bumped on backwards-compatible additions.
    pub minor: u8,
}

impl Version {
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Versions are compatible if they share the same major version.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major
    }

    /// Check a peer version against [`PROTOCOL_VERSION`].
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the versions are incompatible.
    pub fn check_peer(peer: Version) -> Result<(), String> {
        if PROTOCOL_VERSION.is_compatible_with(&peer) {
            Ok(())
        } else {
            Err(format!(
                "unsupported protocol version {} (server speaks {})",
                peer, PROTOCOL_VERSION
            ))
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl Default for Version {
    fn default() -> Self {
        PROTOCOL_VERSION
    }
}
