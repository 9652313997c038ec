//! # envfs-core
//!
//! One filesystem contract, many environments.
//!
//! A tool that inspects files should not care whether they sit on this
//! machine or behind an agent on another one. [`FileSystemApi`] is that
//! contract; [`LocalFileSystem`] and [`RemoteFileSystem`] are its two
//! backends, and every path carries the [`Descriptor`](envfs_types::Descriptor)
//! of the environment it belongs to so the two can never be mixed up.
//!
//! - Open handles: [`FileReader`], [`FileWriter`], [`FileReaderWriter`]
//! - Tree fingerprints: [`FileSystemApi::directory_hash`] + [`TreeHashes`]
//! - Change notification: watch roots + [`FileSystemApi::watch_changes`]
//! - Remote access: [`Agent`] serves a backend, [`RemoteFileSystem`] consumes it

pub mod api;
pub mod config;
pub mod handle;
pub mod hash;
pub mod local;
pub mod remote;
pub mod watch;

pub use api::{
    AnyFileSystem, ChangeStream, DirectoryHashStream, FileSystemApi, PosixFileSystemApi,
    WindowsFileSystemApi,
};
pub use config::{Config, ConfigError};
pub use handle::{
    BoxReader, BoxReaderWriter, BoxWriter, FileHandle, FileReader, FileReaderWriter, FileWriter,
};
pub use hash::{
    ContentHasher, DirectoryHasher, HashAlgorithm, TreeDiff, TreeHashes, Xxh3, Xxh64,
    relative_entries,
};
pub use local::{LocalFileSystem, LocalHandle, NativeFileInfo};
pub use remote::{Agent, Channel, RemoteError, RemoteFileSystem, RemoteHandle, loopback};
pub use watch::WatchService;

pub use envfs_types as types;
