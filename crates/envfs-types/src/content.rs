//! Values produced by content-level operations: handle I/O, whole-file reads,
//! directory hashing.

use serde::{Deserialize, Serialize};

use crate::error::DirectoryHashError;
use crate::path::{EnvPath, RelativePath};

/// What an open handle may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    Reader,
    Writer,
    ReaderWriter,
}

impl Capability {
    pub fn can_read(&self) -> bool {
        matches!(self, Capability::Reader | Capability::ReaderWriter)
    }

    pub fn can_write(&self) -> bool {
        matches!(self, Capability::Writer | Capability::ReaderWriter)
    }
}

/// End-of-file marker attached to every read.
///
/// A short or empty read with `NotEof` only means "nothing more right now";
/// callers loop until `Eof`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadStatus {
    NotEof,
    Eof,
}

/// Result of one handle read: how many bytes landed in the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOutcome {
    pub bytes_read: usize,
    pub status: ReadStatus,
}

impl ReadOutcome {
    pub fn is_eof(&self) -> bool {
        self.status == ReadStatus::Eof
    }
}

/// Reference point for `seek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// Result of `read_fully`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadFullyOutcome {
    /// The whole file fit within the limit.
    Bytes(Vec<u8>),
    /// The file exceeded the limit; these are its first `limit` bytes.
    BytesOverflown(Vec<u8>),
    /// The file exceeded the limit and the data was dropped.
    Overflow,
}

/// One entry of a directory hash walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectoryHashEntry {
    /// `hash` is `None` for entries without comparable content (symlinks,
    /// sockets, devices).
    Hash { path: EnvPath, hash: Option<u64> },
    Error(DirectoryHashError),
}

impl DirectoryHashEntry {
    pub fn path(&self) -> &EnvPath {
        match self {
            DirectoryHashEntry::Hash { path, .. } => path,
            DirectoryHashEntry::Error(err) => err.path(),
        }
    }

    /// `(relative path, hash)` under `root`, for comparing trees that live
    /// under different roots or environments. Errors and entries outside
    /// `root` yield `None`.
    pub fn relative_to(&self, root: &EnvPath) -> Option<(RelativePath, Option<u64>)> {
        match self {
            DirectoryHashEntry::Hash { path, hash } => Some((path.relative_to(root)?, *hash)),
            DirectoryHashEntry::Error(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorDetail;
    use crate::ids::{Descriptor, EnvironmentId, OsFamily};

    fn p(s: &str) -> EnvPath {
        EnvPath::parse(s, Descriptor::new(EnvironmentId::local(), OsFamily::Posix)).unwrap()
    }

    #[test]
    fn test_capability() {
        assert!(Capability::Reader.can_read());
        assert!(!Capability::Reader.can_write());
        assert!(Capability::ReaderWriter.can_write());
    }

    #[test]
    fn test_hash_entry_relative() {
        let entry = DirectoryHashEntry::Hash {
            path: p("/root/a/b.txt"),
            hash: Some(7),
        };
        let (rel, hash) = entry.relative_to(&p("/root")).unwrap();
        assert_eq!(rel.to_string(), "a/b.txt");
        assert_eq!(hash, Some(7));
        assert!(entry.relative_to(&p("/elsewhere")).is_none());

        let err = DirectoryHashEntry::Error(DirectoryHashError::PermissionDenied(
            ErrorDetail::new(p("/root/secret"), "denied"),
        ));
        assert_eq!(err.path(), &p("/root/secret"));
        assert!(err.relative_to(&p("/root")).is_none());
    }
}
