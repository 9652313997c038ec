//! The filesystem contract.
//!
//! One trait, [`FileSystemApi`], names every operation a backend offers. It is
//! specialised per OS family through two sub-traits that pin the metadata and
//! permission shapes:
//!
//! ```text
//!                      FileSystemApi
//!                     /             \
//!   PosixFileSystemApi               WindowsFileSystemApi
//!   Info = PosixFileInfo             Info = WindowsFileInfo
//!   + create_directory               + root_directories
//!   + create_symbolic_link
//! ```
//!
//! A client picks the variant once per environment through [`AnyFileSystem`].
//!
//! Every path argument must belong to the backend's environment (see
//! [`FileSystemApi::descriptor`]); a foreign path is rejected with the
//! operation's `Other` error and never reinterpreted.
//!
//! All operations are independent: nothing orders two calls made on the same
//! backend. Handle operations are ordered per handle (see [`crate::handle`]).

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use envfs_types::{
    CanonicalizeError, ChangeAttributesError, ChangeAttributesOptions, CopyError, CopyOptions,
    CreateDirectoryError, CreateSymbolicLinkError, CreateTemporaryEntryError,
    CreateTemporaryEntryOptions, Descriptor, DirectoryHashEntry, DiskInfo, DiskInfoError,
    DeleteError, EnvPath, FileInfo, LinkTarget, ListDirectoryError, ListDirectoryWithAttrsArgs,
    MoveArgs, MoveError, OpenReadError, OpenWriteError, OsFamily, OverflowPolicy, PathChange,
    Permissions, PosixFileInfo, PosixPermissions, ReadFullyError, ReadFullyOutcome, SameFileError,
    StatArgs, StatError, UnwatchOptions, WatchError, WatchOptions, WindowsFileInfo,
    WindowsPermissions, WriteOptions,
};

use crate::handle::{BoxReader, BoxReaderWriter, BoxWriter};

/// Lazy, single-pass stream of directory hash entries.
pub type DirectoryHashStream = BoxStream<'static, DirectoryHashEntry>;

/// Stream of change events shared by every registered watch root.
pub type ChangeStream = BoxStream<'static, PathChange>;

/// Operations common to every backend.
#[async_trait]
pub trait FileSystemApi: Send + Sync {
    /// Metadata returned by `stat` and friends.
    type Info: FileInfo + Clone + Send + Sync + 'static;

    /// Permission shape accepted by this backend.
    type Permissions: Copy + Into<Permissions> + Send + Sync + 'static;

    /// The environment this backend serves.
    fn descriptor(&self) -> Descriptor;

    fn os_family(&self) -> OsFamily {
        self.descriptor().os_family
    }

    /// Whether the watch operations are implemented.
    fn supports_watching(&self) -> bool {
        false
    }

    /// Names of the entries in a directory, sorted.
    ///
    /// A symlink at `path` itself is followed; symlinks among the children
    /// are listed as names like everything else.
    async fn list_directory(&self, path: &EnvPath) -> Result<Vec<String>, ListDirectoryError>;

    /// Like [`list_directory`](Self::list_directory), with each child's
    /// metadata under the given symlink policy.
    async fn list_directory_with_attrs(
        &self,
        args: ListDirectoryWithAttrsArgs,
    ) -> Result<Vec<(String, Self::Info)>, ListDirectoryError>;

    /// Absolute path with every symlink component resolved.
    async fn canonicalize(&self, path: &EnvPath) -> Result<EnvPath, CanonicalizeError>;

    async fn stat(&self, args: StatArgs) -> Result<Self::Info, StatError>;

    /// Whether two paths name the same file.
    ///
    /// POSIX backends compare device and inode. Windows backends compare
    /// canonical paths case-insensitively, which cannot see through hard links.
    async fn same_file(&self, a: &EnvPath, b: &EnvPath) -> Result<bool, SameFileError>;

    async fn open_for_reading(
        &self,
        path: &EnvPath,
    ) -> Result<BoxReader<Self::Info>, OpenReadError>;

    async fn open_for_writing(
        &self,
        options: WriteOptions,
    ) -> Result<BoxWriter<Self::Info>, OpenWriteError>;

    async fn open_for_reading_and_writing(
        &self,
        options: WriteOptions,
    ) -> Result<BoxReaderWriter<Self::Info>, OpenWriteError>;

    /// Whole file content, bounded by `limit` bytes.
    ///
    /// A file longer than `limit` yields [`ReadFullyOutcome::Overflow`] under
    /// [`OverflowPolicy::Drop`] and its first `limit` bytes as
    /// [`ReadFullyOutcome::BytesOverflown`] under [`OverflowPolicy::Retain`].
    async fn read_fully(
        &self,
        path: &EnvPath,
        limit: u64,
        overflow: OverflowPolicy,
    ) -> Result<ReadFullyOutcome, ReadFullyError>;

    /// Remove a file, symlink or directory. A non-empty directory needs
    /// `remove_content_recursively`.
    async fn delete(
        &self,
        path: &EnvPath,
        remove_content_recursively: bool,
    ) -> Result<(), DeleteError>;

    async fn copy(&self, options: CopyOptions) -> Result<(), CopyError>;

    async fn move_entry(&self, args: MoveArgs) -> Result<(), MoveError>;

    async fn change_attributes(
        &self,
        options: ChangeAttributesOptions,
    ) -> Result<(), ChangeAttributesError>;

    /// Create a fresh, uniquely named directory and return its path.
    async fn create_temporary_directory(
        &self,
        options: CreateTemporaryEntryOptions,
    ) -> Result<EnvPath, CreateTemporaryEntryError>;

    /// Create a fresh, uniquely named empty file and return its path.
    async fn create_temporary_file(
        &self,
        options: CreateTemporaryEntryOptions,
    ) -> Result<EnvPath, CreateTemporaryEntryError>;

    async fn disk_info(&self, path: &EnvPath) -> Result<DiskInfo, DiskInfoError>;

    /// Hash every file under `path`, breadth first.
    ///
    /// A missing root yields an empty stream; a regular file root yields one
    /// entry. Per-entry failures arrive as `Error` entries. Dropping the
    /// stream stops the walk.
    fn directory_hash(&self, path: &EnvPath) -> DirectoryHashStream;

    /// Register watch roots. Returns `true` when every path was newly added.
    async fn add_watch_roots(&self, options: WatchOptions) -> Result<bool, WatchError> {
        let _ = options;
        Err(WatchError::unsupported(self.descriptor().to_string()))
    }

    /// Stop watching a root. Returns `true` if it was watched.
    async fn unwatch(&self, options: UnwatchOptions) -> Result<bool, WatchError> {
        let _ = options;
        Err(WatchError::unsupported(self.descriptor().to_string()))
    }

    /// Subscribe to changes under every registered root.
    fn watch_changes(&self) -> Result<ChangeStream, WatchError> {
        Err(WatchError::unsupported(self.descriptor().to_string()))
    }
}

/// Backends serving a POSIX environment.
#[async_trait]
pub trait PosixFileSystemApi:
    FileSystemApi<Info = PosixFileInfo, Permissions = PosixPermissions>
{
    /// Create one directory. The parent must exist.
    async fn create_directory(
        &self,
        path: &EnvPath,
        permissions: Option<PosixPermissions>,
    ) -> Result<(), CreateDirectoryError>;

    /// Create `link` pointing at `target`, in `symlink(2)` argument order.
    async fn create_symbolic_link(
        &self,
        target: LinkTarget,
        link: &EnvPath,
    ) -> Result<(), CreateSymbolicLinkError>;
}

/// Backends serving a Windows environment.
#[async_trait]
pub trait WindowsFileSystemApi:
    FileSystemApi<Info = WindowsFileInfo, Permissions = WindowsPermissions>
{
    /// Drive roots present in the environment.
    async fn root_directories(&self) -> Result<Vec<EnvPath>, ListDirectoryError>;
}

/// One backend, typed by the OS family of its environment.
#[derive(Clone)]
pub enum AnyFileSystem {
    Posix(Arc<dyn PosixFileSystemApi>),
    Windows(Arc<dyn WindowsFileSystemApi>),
}

impl AnyFileSystem {
    pub fn descriptor(&self) -> Descriptor {
        match self {
            AnyFileSystem::Posix(fs) => fs.descriptor(),
            AnyFileSystem::Windows(fs) => fs.descriptor(),
        }
    }

    pub fn os_family(&self) -> OsFamily {
        self.descriptor().os_family
    }

    pub fn as_posix(&self) -> Option<&Arc<dyn PosixFileSystemApi>> {
        match self {
            AnyFileSystem::Posix(fs) => Some(fs),
            AnyFileSystem::Windows(_) => None,
        }
    }

    pub fn as_windows(&self) -> Option<&Arc<dyn WindowsFileSystemApi>> {
        match self {
            AnyFileSystem::Windows(fs) => Some(fs),
            AnyFileSystem::Posix(_) => None,
        }
    }

    /// Hash a tree without caring which variant serves it.
    pub fn directory_hash(&self, path: &EnvPath) -> DirectoryHashStream {
        match self {
            AnyFileSystem::Posix(fs) => fs.directory_hash(path),
            AnyFileSystem::Windows(fs) => fs.directory_hash(path),
        }
    }
}

impl std::fmt::Debug for AnyFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            AnyFileSystem::Posix(_) => "Posix",
            AnyFileSystem::Windows(_) => "Windows",
        };
        write!(f, "AnyFileSystem::{variant}({})", self.descriptor())
    }
}
