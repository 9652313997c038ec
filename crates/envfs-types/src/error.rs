//! Error taxonomy.
//!
//! Every operation has its own closed error enum (e.g. [`MoveError`]) whose
//! variants all map onto one shared vocabulary, [`FsErrorKind`]. The untyped
//! carrier [`FsError`] is what backends produce internally; each operation
//! error converts from it, folding kinds the operation cannot report into its
//! `Other` variant.
//!
//! ```text
//!   io::Error ──(backend)──▶ FsError { kind, path, message }
//!                                 │  From
//!                                 ▼
//!                   ListDirectoryError::NotDirectory(ErrorDetail)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::path::EnvPath;

/// Which resource ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exhaustion {
    DiskQuotaExceeded,
    FileSizeExceeded,
    NoSpaceLeft,
}

/// Shared vocabulary of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FsErrorKind {
    DoesNotExist,
    NotDirectory,
    NotFile,
    IsDirectory,
    PermissionDenied,
    AlreadyExists,
    DirNotEmpty,
    NameTooLong,
    ReadOnlyFileSystem,
    /// The file handle is closed or was never opened.
    UnknownFile,
    InvalidValue,
    ResourceExhausted(Exhaustion),
    Other,
}

impl fmt::Display for FsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FsErrorKind::DoesNotExist => "does not exist",
            FsErrorKind::NotDirectory => "not a directory",
            FsErrorKind::NotFile => "not a file",
            FsErrorKind::IsDirectory => "is a directory",
            FsErrorKind::PermissionDenied => "permission denied",
            FsErrorKind::AlreadyExists => "already exists",
            FsErrorKind::DirNotEmpty => "directory not empty",
            FsErrorKind::NameTooLong => "name too long",
            FsErrorKind::ReadOnlyFileSystem => "read-only filesystem",
            FsErrorKind::UnknownFile => "unknown file handle",
            FsErrorKind::InvalidValue => "invalid value",
            FsErrorKind::ResourceExhausted(Exhaustion::DiskQuotaExceeded) => "disk quota exceeded",
            FsErrorKind::ResourceExhausted(Exhaustion::FileSizeExceeded) => "file size exceeded",
            FsErrorKind::ResourceExhausted(Exhaustion::NoSpaceLeft) => "no space left on device",
            FsErrorKind::Other => "error",
        };
        f.write_str(s)
    }
}

/// Where a failure happened and what the backend said about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub path: EnvPath,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(path: EnvPath, message: impl Into<String>) -> Self {
        Self {
            path,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.path)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Untyped filesystem error: a base kind plus detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct FsError {
    pub kind: FsErrorKind,
    pub detail: ErrorDetail,
}

impl FsError {
    pub fn new(kind: FsErrorKind, path: EnvPath, message: impl Into<String>) -> Self {
        Self {
            kind,
            detail: ErrorDetail::new(path, message),
        }
    }

    pub fn other(path: EnvPath, message: impl Into<String>) -> Self {
        Self::new(FsErrorKind::Other, path, message)
    }

    pub fn path(&self) -> &EnvPath {
        &self.detail.path
    }
}

/// Declare a closed per-operation error enum.
///
/// Each `Variant => kind` line becomes `Variant(ErrorDetail)` reporting
/// `kind` as its base kind. Conversion from [`FsError`] picks the first
/// variant whose kind matches, falling back to `Other`, so every enum
/// declared here must have an `Other` variant.
macro_rules! operation_error {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $kind:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* $variant(ErrorDetail), )+
        }

        impl $name {
            /// Base kind in the shared vocabulary.
            pub fn kind(&self) -> FsErrorKind {
                match self {
                    $( Self::$variant(_) => $kind, )+
                }
            }

            pub fn detail(&self) -> &ErrorDetail {
                match self {
                    $( Self::$variant(detail) => detail, )+
                }
            }

            pub fn path(&self) -> &EnvPath {
                &self.detail().path
            }

            pub fn message(&self) -> &str {
                &self.detail().message
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let variant = match self {
                    $( Self::$variant(_) => stringify!($variant), )+
                };
                write!(f, "{}: {}", variant, self.detail())
            }
        }

        impl std::error::Error for $name {}

        impl From<$name> for FsError {
            fn from(err: $name) -> FsError {
                let kind = err.kind();
                let detail = match err {
                    $( $name::$variant(detail) => detail, )+
                };
                FsError { kind, detail }
            }
        }

        impl From<FsError> for $name {
            fn from(err: FsError) -> $name {
                $(
                    if err.kind == $kind {
                        return $name::$variant(err.detail);
                    }
                )+
                let FsError { kind, detail } = err;
                $name::Other(ErrorDetail {
                    message: if detail.message.is_empty() {
                        kind.to_string()
                    } else {
                        format!("{kind}: {}", detail.message)
                    },
                    path: detail.path,
                })
            }
        }
    };
}

use FsErrorKind::*;

const QUOTA: FsErrorKind = ResourceExhausted(Exhaustion::DiskQuotaExceeded);
const FILE_SIZE: FsErrorKind = ResourceExhausted(Exhaustion::FileSizeExceeded);
const NO_SPACE: FsErrorKind = ResourceExhausted(Exhaustion::NoSpaceLeft);

operation_error! {
    /// Failure of `list_directory` / `list_directory_with_attrs`.
    ListDirectoryError {
        DoesNotExist => DoesNotExist,
        PermissionDenied => PermissionDenied,
        NotDirectory => NotDirectory,
        Other => Other,
    }
}

operation_error! {
    /// Failure of `stat`, on a path or on an open handle.
    StatError {
        DoesNotExist => DoesNotExist,
        PermissionDenied => PermissionDenied,
        NotDirectory => NotDirectory,
        UnknownFile => UnknownFile,
        Other => Other,
    }
}

operation_error! {
    CanonicalizeError {
        DoesNotExist => DoesNotExist,
        PermissionDenied => PermissionDenied,
        NotDirectory => NotDirectory,
        NotFile => NotFile,
        Other => Other,
    }
}

operation_error! {
    SameFileError {
        DoesNotExist => DoesNotExist,
        PermissionDenied => PermissionDenied,
        NotDirectory => NotDirectory,
        NotFile => NotFile,
        Other => Other,
    }
}

operation_error! {
    /// Failure of `open_for_reading`.
    OpenReadError {
        DoesNotExist => DoesNotExist,
        PermissionDenied => PermissionDenied,
        NotDirectory => NotDirectory,
        /// The path names a directory or something else without content.
        NotFile => NotFile,
        Other => Other,
    }
}

operation_error! {
    /// Failure of `open_for_writing` / `open_for_reading_and_writing`.
    OpenWriteError {
        DoesNotExist => DoesNotExist,
        /// `CreationMode::OnlyCreate` and the file exists.
        AlreadyExists => AlreadyExists,
        PermissionDenied => PermissionDenied,
        NotDirectory => NotDirectory,
        NotFile => NotFile,
        NameTooLong => NameTooLong,
        ReadOnlyFileSystem => ReadOnlyFileSystem,
        NoSpaceLeft => NO_SPACE,
        DiskQuotaExceeded => QUOTA,
        Other => Other,
    }
}

operation_error! {
    ReadFullyError {
        DoesNotExist => DoesNotExist,
        PermissionDenied => PermissionDenied,
        NotDirectory => NotDirectory,
        NotFile => NotFile,
        Other => Other,
    }
}

operation_error! {
    /// Failure of a handle read.
    ReadError {
        UnknownFile => UnknownFile,
        InvalidValue => InvalidValue,
        NotFile => NotFile,
        Other => Other,
    }
}

operation_error! {
    /// Failure of a handle write.
    WriteError {
        UnknownFile => UnknownFile,
        InvalidValue => InvalidValue,
        DiskQuotaExceeded => QUOTA,
        FileSizeExceeded => FILE_SIZE,
        NoSpaceLeft => NO_SPACE,
        Other => Other,
    }
}

operation_error! {
    SeekError {
        UnknownFile => UnknownFile,
        /// The resulting position would be negative or overflow.
        InvalidValue => InvalidValue,
        Other => Other,
    }
}

operation_error! {
    TellError {
        UnknownFile => UnknownFile,
        Other => Other,
    }
}

operation_error! {
    FlushError {
        UnknownFile => UnknownFile,
        DiskQuotaExceeded => QUOTA,
        NoSpaceLeft => NO_SPACE,
        Other => Other,
    }
}

operation_error! {
    TruncateError {
        UnknownFile => UnknownFile,
        InvalidValue => InvalidValue,
        FileSizeExceeded => FILE_SIZE,
        NoSpaceLeft => NO_SPACE,
        Other => Other,
    }
}

operation_error! {
    /// Failure of `close`. Closing twice reports `UnknownFile`.
    CloseError {
        UnknownFile => UnknownFile,
        NoSpaceLeft => NO_SPACE,
        Other => Other,
    }
}

operation_error! {
    DeleteError {
        DoesNotExist => DoesNotExist,
        /// Non-recursive delete of a directory with content.
        DirNotEmpty => DirNotEmpty,
        PermissionDenied => PermissionDenied,
        NotDirectory => NotDirectory,
        ReadOnlyFileSystem => ReadOnlyFileSystem,
        Other => Other,
    }
}

operation_error! {
    CopyError {
        SourceDoesNotExist => DoesNotExist,
        TargetAlreadyExists => AlreadyExists,
        TargetIsDirectory => IsDirectory,
        TargetDirNotEmpty => DirNotEmpty,
        PermissionDenied => PermissionDenied,
        NotDirectory => NotDirectory,
        NameTooLong => NameTooLong,
        ReadOnlyFileSystem => ReadOnlyFileSystem,
        NoSpaceLeft => NO_SPACE,
        DiskQuotaExceeded => QUOTA,
        FileSizeExceeded => FILE_SIZE,
        Other => Other,
    }
}

operation_error! {
    MoveError {
        SourceDoesNotExist => DoesNotExist,
        TargetAlreadyExists => AlreadyExists,
        /// `DoNotReplaceDirectories` and the target is a directory.
        TargetIsDirectory => IsDirectory,
        TargetDirNotEmpty => DirNotEmpty,
        PermissionDenied => PermissionDenied,
        NotDirectory => NotDirectory,
        NameTooLong => NameTooLong,
        ReadOnlyFileSystem => ReadOnlyFileSystem,
        Other => Other,
    }
}

operation_error! {
    ChangeAttributesError {
        DoesNotExist => DoesNotExist,
        PermissionDenied => PermissionDenied,
        NameTooLong => NameTooLong,
        ReadOnlyFileSystem => ReadOnlyFileSystem,
        InvalidValue => InvalidValue,
        Other => Other,
    }
}

operation_error! {
    CreateTemporaryEntryError {
        /// The parent directory does not exist.
        ParentDoesNotExist => DoesNotExist,
        NotDirectory => NotDirectory,
        PermissionDenied => PermissionDenied,
        ReadOnlyFileSystem => ReadOnlyFileSystem,
        NoSpaceLeft => NO_SPACE,
        Other => Other,
    }
}

operation_error! {
    DiskInfoError {
        DoesNotExist => DoesNotExist,
        PermissionDenied => PermissionDenied,
        NameTooLong => NameTooLong,
        Other => Other,
    }
}

operation_error! {
    /// A per-entry failure inside a directory hash walk.
    DirectoryHashError {
        DoesNotExist => DoesNotExist,
        PermissionDenied => PermissionDenied,
        NotDirectory => NotDirectory,
        NotFile => NotFile,
        Other => Other,
    }
}

operation_error! {
    CreateDirectoryError {
        /// Something already exists at the path.
        AlreadyExists => AlreadyExists,
        ParentDoesNotExist => DoesNotExist,
        ParentNotDirectory => NotDirectory,
        PermissionDenied => PermissionDenied,
        NameTooLong => NameTooLong,
        ReadOnlyFileSystem => ReadOnlyFileSystem,
        Other => Other,
    }
}

operation_error! {
    CreateSymbolicLinkError {
        /// The link path is already taken.
        AlreadyExists => AlreadyExists,
        ParentDoesNotExist => DoesNotExist,
        NotDirectory => NotDirectory,
        PermissionDenied => PermissionDenied,
        NameTooLong => NameTooLong,
        ReadOnlyFileSystem => ReadOnlyFileSystem,
        Other => Other,
    }
}

/// Watching is a capability, not a fallible operation on a path: backends
/// without it say so up front with `Unsupported`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum WatchError {
    #[error("watching is not supported by this backend: {backend}")]
    Unsupported { backend: String },
    #[error("watch failed: {0}")]
    Failed(String),
}

impl WatchError {
    pub fn unsupported(backend: impl Into<String>) -> Self {
        Self::Unsupported {
            backend: backend.into(),
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, WatchError::Unsupported { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Descriptor;

    fn path() -> EnvPath {
        EnvPath::parse("/data/file", Descriptor::local()).unwrap_or_else(|_| {
            EnvPath::parse("C:\\data\\file", Descriptor::local()).unwrap()
        })
    }

    #[test]
    fn test_kind_mapping() {
        let err = MoveError::TargetIsDirectory(ErrorDetail::new(path(), "target is a directory"));
        assert_eq!(err.kind(), IsDirectory);
        let err = WriteError::NoSpaceLeft(ErrorDetail::new(path(), ""));
        assert_eq!(err.kind(), ResourceExhausted(Exhaustion::NoSpaceLeft));
    }

    #[test]
    fn test_from_base_error_picks_matching_variant() {
        let base = FsError::new(DoesNotExist, path(), "gone");
        let err = CopyError::from(base);
        assert!(matches!(err, CopyError::SourceDoesNotExist(_)));
        assert_eq!(err.message(), "gone");
    }

    #[test]
    fn test_from_base_error_folds_unknown_kinds_into_other() {
        let base = FsError::new(ReadOnlyFileSystem, path(), "mounted ro");
        let err = ListDirectoryError::from(base);
        match err {
            ListDirectoryError::Other(detail) => {
                assert_eq!(detail.message, "read-only filesystem: mounted ro");
            }
            other => panic!("expected Other, got {other:?}"),
        }
    }

    #[test]
    fn test_roundtrip_through_base_keeps_kind() {
        let err = DeleteError::DirNotEmpty(ErrorDetail::new(path(), "has children"));
        let base: FsError = err.clone().into();
        assert_eq!(base.kind, DirNotEmpty);
        assert_eq!(DeleteError::from(base), err);
    }

    #[test]
    fn test_display() {
        let err = StatError::DoesNotExist(ErrorDetail::new(path(), "no such file"));
        let text = err.to_string();
        assert!(text.starts_with("DoesNotExist: "));
        assert!(text.ends_with(": no such file"));

        let base = FsError::new(NameTooLong, path(), "");
        assert!(base.to_string().starts_with("name too long: "));
    }

    #[test]
    fn test_watch_unsupported() {
        let err = WatchError::unsupported("remote");
        assert!(err.is_unsupported());
        assert_eq!(
            err.to_string(),
            "watching is not supported by this backend: remote"
        );
    }
}
