//! Shared vocabulary for envfs.
//!
//! This crate is the contract's data model: environment identity, paths,
//! file metadata, option values and the error taxonomy. It has **no internal
//! envfs dependencies** and no I/O, so backends and clients on either side
//! of an RPC boundary agree on one set of serializable types.
//!
//! # Key Types
//!
//! |-------------------------|-----------------------------------------------|
//! | Type                    | Purpose                                       |
//! |-------------------------|-----------------------------------------------|
//! | [`Descriptor`]          | Which environment (id + OS family)            |
//! | [`EnvPath`]             | Absolute path tagged with its environment     |
//! | [`RelativePath`]        | Root-less segments                            |
//! | [`PosixFileInfo`]       | `stat` result on POSIX environments           |
//! | [`WindowsFileInfo`]     | `stat` result on Windows environments         |
//! | [`FsErrorKind`]         | Base failure vocabulary                       |
//! | [`FsError`]             | Untyped carrier: kind + path + message        |
//! | `*Error`                | Closed per-operation error enums              |
//! | `*Options` / `*Args`    | Builder-made operation arguments              |
//! | [`DirectoryHashEntry`]  | One file of a directory hash walk             |
//! | [`PathChange`]          | One watch event                               |
//! |-------------------------|-----------------------------------------------|

pub mod content;
pub mod error;
pub mod ids;
pub mod info;
pub mod options;
pub mod path;
pub mod watch;

pub use content::{
    Capability, DirectoryHashEntry, ReadFullyOutcome, ReadOutcome, ReadStatus, Whence,
};
pub use error::{
    CanonicalizeError, ChangeAttributesError, CloseError, CopyError, CreateDirectoryError,
    CreateSymbolicLinkError, CreateTemporaryEntryError, DeleteError, DirectoryHashError,
    DiskInfoError, ErrorDetail, Exhaustion, FlushError, FsError, FsErrorKind, ListDirectoryError,
    MoveError, OpenReadError, OpenWriteError, ReadError, ReadFullyError, SameFileError, SeekError,
    StatError, TellError, TruncateError, WatchError, WriteError,
};
pub use ids::{CaseSensitivity, Descriptor, EnvironmentId, OsFamily};
pub use info::{
    DiskInfo, FileInfo, FileType, InodeId, Permissions, PosixFileInfo, PosixPermissions,
    SymlinkType, WindowsFileInfo, WindowsPermissions,
};
pub use options::{
    ChangeAttributesOptions, ChangeAttributesOptionsBuilder, CopyOptions, CopyOptionsBuilder,
    CreateTemporaryEntryOptions, CreateTemporaryEntryOptionsBuilder, CreationMode,
    ListDirectoryWithAttrsArgs, ListDirectoryWithAttrsArgsBuilder, MoveArgs, MoveArgsBuilder,
    OverflowPolicy, ReplaceExistingDuringMove, StatArgs, StatArgsBuilder, SymlinkPolicy,
    TimestampUpdate, WriteOptions, WriteOptionsBuilder,
};
pub use path::{EnvPath, LinkTarget, PathError, RelativePath};
pub use watch::{ChangeType, PathChange, UnwatchOptions, WatchOptions, WatchOptionsBuilder, WatchedPath};
