//! Environment identity: which backend a path or API instance belongs to.
//!
//! An [`EnvironmentId`] wraps a UUID (v7 for freshly attached environments,
//! a deterministic v5 sentinel for the local machine). A [`Descriptor`] pairs
//! the id with the environment's [`OsFamily`], and is embedded in every
//! [`EnvPath`](crate::EnvPath) so a path can never be silently interpreted
//! against another environment's root.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Opaque environment identifier (UUIDv7, or UUIDv5 for the local sentinel).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentId(uuid::Uuid);

/// Fixed namespace for deriving deterministic environment ids via UUIDv5.
const ENVFS_ENVIRONMENT_NS: uuid::Uuid = uuid::uuid!("3f5e2b8c-91d4-4a7e-b0c6-6d2a8e41f907");

impl EnvironmentId {
    /// Create a new time-ordered ID (UUIDv7).
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// The well-known id of the machine this process runs on.
    ///
    /// Deterministic: same value every time (UUIDv5 derived from `b"local"`).
    pub fn local() -> Self {
        Self(uuid::Uuid::new_v5(&ENVFS_ENVIRONMENT_NS, b"local"))
    }

    /// Derive a stable id from an environment name (container id, agent host...).
    pub fn named(name: &str) -> Self {
        Self(uuid::Uuid::new_v5(&ENVFS_ENVIRONMENT_NS, name.as_bytes()))
    }

    /// First 8 hex characters, for human display only.
    pub fn short(&self) -> String {
        self.0.as_simple().to_string()[..8].to_string()
    }

    /// The raw 16 bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Parse from a hex string (32 chars, no hyphens) or standard UUID format.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        uuid::Uuid::parse_str(s).map(Self)
    }

    /// Check if this is the local sentinel.
    pub fn is_local(&self) -> bool {
        *self == Self::local()
    }
}

impl Default for EnvironmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<uuid::Uuid> for EnvironmentId {
    fn from(u: uuid::Uuid) -> Self {
        Self(u)
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local() {
            write!(f, "EnvironmentId(local)")
        } else {
            write!(f, "EnvironmentId({})", self.short())
        }
    }
}

/// Per-directory case sensitivity, as reported by a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CaseSensitivity {
    Sensitive,
    Insensitive,
    /// The backend could not determine it.
    Unknown,
}

/// Operating system family of an environment.
///
/// Decides separators, path syntax and the default case sensitivity. The
/// family is fixed for the lifetime of an environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OsFamily {
    Posix,
    Windows,
}

impl OsFamily {
    /// The family of the machine this process runs on.
    pub fn current() -> Self {
        if cfg!(windows) {
            OsFamily::Windows
        } else {
            OsFamily::Posix
        }
    }

    /// Separator between path segments.
    pub fn separator(&self) -> char {
        match self {
            OsFamily::Posix => '/',
            OsFamily::Windows => '\\',
        }
    }

    /// Separator between entries of a path list (`PATH`-style variables).
    pub fn path_list_separator(&self) -> char {
        match self {
            OsFamily::Posix => ':',
            OsFamily::Windows => ';',
        }
    }

    /// Case sensitivity assumed when a directory does not report its own.
    pub fn default_case_sensitivity(&self) -> CaseSensitivity {
        match self {
            OsFamily::Posix => CaseSensitivity::Sensitive,
            OsFamily::Windows => CaseSensitivity::Insensitive,
        }
    }

    pub fn is_posix(&self) -> bool {
        matches!(self, OsFamily::Posix)
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, OsFamily::Windows)
    }
}

/// Identity of one execution environment: who serves it and which OS rules apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor {
    pub id: EnvironmentId,
    pub os_family: OsFamily,
}

impl Descriptor {
    pub fn new(id: EnvironmentId, os_family: OsFamily) -> Self {
        Self { id, os_family }
    }

    /// Descriptor of the machine this process runs on.
    pub fn local() -> Self {
        Self::new(EnvironmentId::local(), OsFamily::current())
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.id.is_local() {
            write!(f, "local/{}", self.os_family)
        } else {
            write!(f, "{}/{}", self.id.short(), self.os_family)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_new_is_unique() {
        assert_ne!(EnvironmentId::new(), EnvironmentId::new());
    }

    #[test]
    fn test_local_is_deterministic() {
        assert_eq!(EnvironmentId::local(), EnvironmentId::local());
        assert!(EnvironmentId::local().is_local());
        assert!(!EnvironmentId::new().is_local());
    }

    #[test]
    fn test_named_is_stable_per_name() {
        assert_eq!(EnvironmentId::named("box-1"), EnvironmentId::named("box-1"));
        assert_ne!(EnvironmentId::named("box-1"), EnvironmentId::named("box-2"));
    }

    #[test]
    fn test_parse_roundtrip() {
        let id = EnvironmentId::new();
        assert_eq!(EnvironmentId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_os_family_separators() {
        assert_eq!(OsFamily::Posix.separator(), '/');
        assert_eq!(OsFamily::Posix.path_list_separator(), ':');
        assert_eq!(OsFamily::Windows.separator(), '\\');
        assert_eq!(OsFamily::Windows.path_list_separator(), ';');
        assert_eq!(
            OsFamily::Windows.default_case_sensitivity(),
            CaseSensitivity::Insensitive
        );
    }

    #[test]
    fn test_os_family_from_str() {
        assert_eq!(OsFamily::from_str("POSIX").unwrap(), OsFamily::Posix);
        assert_eq!(OsFamily::from_str("windows").unwrap(), OsFamily::Windows);
        assert!(OsFamily::from_str("plan9").is_err());
    }

    #[test]
    fn test_descriptor_display() {
        let local = Descriptor::new(EnvironmentId::local(), OsFamily::Posix);
        assert_eq!(local.to_string(), "local/posix");
    }
}
