//! Local filesystem backend.
//!
//! Serves the machine the process runs on. On Unix it implements
//! [`PosixFileSystemApi`](crate::api::PosixFileSystemApi), on Windows
//! [`WindowsFileSystemApi`](crate::api::WindowsFileSystemApi); the metadata
//! shape follows as [`NativeFileInfo`].
//!
//! Blocking calls go through `tokio::fs` or `spawn_blocking`. Entries created
//! with `delete_on_exit` are removed when the backend is dropped.

pub(crate) mod errors;
mod handle;
pub(crate) mod info;
mod temp;
mod transfer;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::debug;

use envfs_types::{
    Capability, CanonicalizeError, ChangeAttributesError, ChangeAttributesOptions, CopyError,
    CopyOptions, CreateTemporaryEntryError, CreateTemporaryEntryOptions, CreationMode,
    DeleteError, Descriptor, DiskInfo, DiskInfoError, EnvPath, FsError, FsErrorKind,
    ListDirectoryError, ListDirectoryWithAttrsArgs, MoveArgs, MoveError, OpenReadError,
    OpenWriteError, OverflowPolicy, PathError, Permissions, ReadFullyError, ReadFullyOutcome,
    SameFileError, StatArgs, StatError, SymlinkPolicy, TimestampUpdate, UnwatchOptions,
    WatchError, WatchOptions, WriteOptions,
};

use crate::api::{ChangeStream, DirectoryHashStream, FileSystemApi};
use crate::config::Config;
use crate::handle::{BoxReader, BoxReaderWriter, BoxWriter};
use crate::hash::DirectoryHasher;
use crate::watch::WatchService;

use errors::{IoResultExt, join_error};
pub use handle::LocalHandle;
pub use info::NativeFileInfo;
use info::{from_native, stat_native, stat_with_policy, to_native};
use temp::{EntryKind, TempRegistry};

#[cfg(unix)]
type NativePermissions = envfs_types::PosixPermissions;
#[cfg(windows)]
type NativePermissions = envfs_types::WindowsPermissions;

/// The filesystem of this machine.
pub struct LocalFileSystem {
    descriptor: Descriptor,
    config: Config,
    hasher: DirectoryHasher,
    temp: TempRegistry,
    watch: Mutex<Option<Arc<WatchService>>>,
}

impl LocalFileSystem {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            descriptor: Descriptor::local(),
            hasher: DirectoryHasher::new(&config.hash),
            config,
            temp: TempRegistry::default(),
            watch: Mutex::new(None),
        }
    }

    /// Replace the hasher, e.g. to change the hash algorithm.
    pub fn with_hasher(mut self, hasher: DirectoryHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Parse a path in this environment's syntax.
    pub fn path(&self, raw: &str) -> Result<EnvPath, PathError> {
        EnvPath::parse(raw, self.descriptor)
    }

    /// Convert a native path, e.g. one from `tempfile`.
    pub fn from_native(&self, native: &std::path::Path) -> Result<EnvPath, PathError> {
        from_native(native, self.descriptor)
    }

    /// Reject paths that belong to another environment.
    fn check(&self, path: &EnvPath) -> Result<(), FsError> {
        path.ensure_environment(&self.descriptor)
            .map_err(|e| FsError::other(path.clone(), e.to_string()))
    }

    fn watch_service(&self) -> Result<Arc<WatchService>, WatchError> {
        let mut slot = self.watch.lock();
        if let Some(service) = slot.as_ref() {
            return Ok(Arc::clone(service));
        }
        let service = Arc::new(WatchService::new(self.descriptor, &self.config.watch)?);
        *slot = Some(Arc::clone(&service));
        Ok(service)
    }

    async fn open_writable(
        &self,
        options: &WriteOptions,
        read: bool,
    ) -> Result<LocalHandle, FsError> {
        let path = &options.path;
        self.check(path)?;
        let native = to_native(path);

        // Refuse directories and special files before open(2) can block on them.
        if let Ok(meta) = fs::metadata(&native).await {
            if !meta.is_file() {
                return Err(FsError::new(FsErrorKind::NotFile, path.clone(), "not a regular file"));
            }
        }

        let mut open = fs::OpenOptions::new();
        open.read(read).write(true);
        if options.append {
            open.append(true);
        } else {
            open.truncate(options.truncate_existing);
        }
        match options.creation_mode {
            CreationMode::OnlyOpenExisting => {}
            CreationMode::AllowCreate => {
                open.create(true);
            }
            CreationMode::OnlyCreate => {
                open.create_new(true);
            }
        }

        let file = open.open(&native).await.map_err(|e| {
            let mut err = errors::fs_error(e, path);
            if err.kind == FsErrorKind::IsDirectory {
                err.kind = FsErrorKind::NotFile;
            }
            err
        })?;
        if options.append && options.truncate_existing {
            file.set_len(0).await.at(path)?;
        }

        let capability = if read {
            Capability::ReaderWriter
        } else {
            Capability::Writer
        };
        debug!(path = %path, ?capability, mode = ?options.creation_mode, "opened handle");
        Ok(LocalHandle::new(path.clone(), file, capability))
    }

    async fn create_temporary(
        &self,
        options: &CreateTemporaryEntryOptions,
        kind: EntryKind,
    ) -> Result<EnvPath, FsError> {
        if let Some(parent) = &options.parent_directory {
            self.check(parent)?;
        }
        let path = temp::create_entry(self.descriptor, &self.config.temp, options, kind).await?;
        if options.delete_on_exit {
            self.temp.register(&path);
        }
        Ok(path)
    }
}

impl Default for LocalFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LocalFileSystem {
    fn drop(&mut self) {
        self.temp.cleanup();
    }
}

impl std::fmt::Debug for LocalFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFileSystem")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Resolve a timestamp update against the current value.
fn timestamp(update: Option<TimestampUpdate>, current: filetime::FileTime) -> filetime::FileTime {
    match update {
        None => current,
        Some(TimestampUpdate::Now) => filetime::FileTime::now(),
        Some(TimestampUpdate::At(t)) => filetime::FileTime::from_system_time(t),
    }
}

#[cfg(unix)]
async fn apply_permissions(
    path: &EnvPath,
    meta: &std::fs::Metadata,
    permissions: Permissions,
) -> Result<(), FsError> {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    let Permissions::Posix(wanted) = permissions else {
        return Err(FsError::new(
            FsErrorKind::InvalidValue,
            path.clone(),
            "Windows attributes on a POSIX environment",
        ));
    };

    let native = to_native(path);
    // chown first: it may clear setuid/setgid.
    if wanted.owner != meta.uid() || wanted.group != meta.gid() {
        let owned = native.clone();
        tokio::task::spawn_blocking(move || {
            std::os::unix::fs::chown(&owned, Some(wanted.owner), Some(wanted.group))
        })
        .await
        .map_err(|e| join_error(e, path))?
        .at(path)?;
    }
    fs::set_permissions(&native, std::fs::Permissions::from_mode(wanted.mode()))
        .await
        .at(path)
}

#[cfg(windows)]
async fn apply_permissions(
    path: &EnvPath,
    meta: &std::fs::Metadata,
    permissions: Permissions,
) -> Result<(), FsError> {
    let Permissions::Windows(wanted) = permissions else {
        return Err(FsError::new(
            FsErrorKind::InvalidValue,
            path.clone(),
            "POSIX permissions on a Windows environment",
        ));
    };
    let mut native_perms = meta.permissions();
    native_perms.set_readonly(wanted.read_only);
    fs::set_permissions(to_native(path), native_perms).await.at(path)
}

#[async_trait]
impl FileSystemApi for LocalFileSystem {
    type Info = NativeFileInfo;
    type Permissions = NativePermissions;

    fn descriptor(&self) -> Descriptor {
        self.descriptor
    }

    fn supports_watching(&self) -> bool {
        true
    }

    async fn list_directory(&self, path: &EnvPath) -> Result<Vec<String>, ListDirectoryError> {
        self.check(path)?;
        debug!(path = %path, "list_directory");
        Ok(transfer::read_names(path).await?)
    }

    async fn list_directory_with_attrs(
        &self,
        args: ListDirectoryWithAttrsArgs,
    ) -> Result<Vec<(String, NativeFileInfo)>, ListDirectoryError> {
        let path = &args.path;
        self.check(path)?;
        debug!(path = %path, policy = %args.symlink_policy, "list_directory_with_attrs");

        let mut entries = Vec::new();
        for entry in transfer::read_entries(path).await? {
            let child = path
                .join(&entry.name)
                .map_err(|e| FsError::other(path.clone(), e.to_string()))?;
            match stat_native(&child, &entry.native, args.symlink_policy).await {
                Ok(info) => entries.push((entry.name, info)),
                // Removed between listing and stat.
                Err(e) if e.kind == FsErrorKind::DoesNotExist => {
                    debug!(path = %child, "entry vanished during listing");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(entries)
    }

    async fn canonicalize(&self, path: &EnvPath) -> Result<EnvPath, CanonicalizeError> {
        self.check(path)?;
        Ok(transfer::canonical(path).await?)
    }

    async fn stat(&self, args: StatArgs) -> Result<NativeFileInfo, StatError> {
        self.check(&args.path)?;
        debug!(path = %args.path, policy = %args.symlink_policy, "stat");
        Ok(stat_with_policy(&args.path, args.symlink_policy).await?)
    }

    #[cfg(unix)]
    async fn same_file(&self, a: &EnvPath, b: &EnvPath) -> Result<bool, SameFileError> {
        self.check(a)?;
        self.check(b)?;
        let a_info = stat_with_policy(a, SymlinkPolicy::ResolveAndFollow).await?;
        let b_info = stat_with_policy(b, SymlinkPolicy::ResolveAndFollow).await?;
        Ok(a_info.inode == b_info.inode)
    }

    #[cfg(windows)]
    async fn same_file(&self, a: &EnvPath, b: &EnvPath) -> Result<bool, SameFileError> {
        self.check(a)?;
        self.check(b)?;
        let a = transfer::canonical(a).await?;
        let b = transfer::canonical(b).await?;
        Ok(a.same_location(&b))
    }

    async fn open_for_reading(
        &self,
        path: &EnvPath,
    ) -> Result<BoxReader<NativeFileInfo>, OpenReadError> {
        self.check(path)?;
        let native = to_native(path);
        let meta = fs::metadata(&native).await.at(path)?;
        if !meta.is_file() {
            return Err(FsError::new(FsErrorKind::NotFile, path.clone(), "not a regular file").into());
        }
        let file = fs::File::open(&native).await.at(path)?;
        debug!(path = %path, "opened handle for reading");
        Ok(Box::new(LocalHandle::new(path.clone(), file, Capability::Reader)))
    }

    async fn open_for_writing(
        &self,
        options: WriteOptions,
    ) -> Result<BoxWriter<NativeFileInfo>, OpenWriteError> {
        Ok(Box::new(self.open_writable(&options, false).await?))
    }

    async fn open_for_reading_and_writing(
        &self,
        options: WriteOptions,
    ) -> Result<BoxReaderWriter<NativeFileInfo>, OpenWriteError> {
        Ok(Box::new(self.open_writable(&options, true).await?))
    }

    async fn read_fully(
        &self,
        path: &EnvPath,
        limit: u64,
        overflow: OverflowPolicy,
    ) -> Result<ReadFullyOutcome, ReadFullyError> {
        self.check(path)?;
        let native = to_native(path);
        let meta = fs::metadata(&native).await.at(path)?;
        if !meta.is_file() {
            return Err(FsError::new(FsErrorKind::NotFile, path.clone(), "not a regular file").into());
        }

        let file = fs::File::open(&native).await.at(path)?;
        let mut data = Vec::new();
        file.take(limit.saturating_add(1))
            .read_to_end(&mut data)
            .await
            .at(path)?;

        if data.len() as u64 <= limit {
            return Ok(ReadFullyOutcome::Bytes(data));
        }
        debug!(path = %path, limit, ?overflow, "read_fully overflow");
        Ok(match overflow {
            OverflowPolicy::Drop => ReadFullyOutcome::Overflow,
            OverflowPolicy::Retain => {
                data.truncate(limit as usize);
                ReadFullyOutcome::BytesOverflown(data)
            }
        })
    }

    async fn delete(
        &self,
        path: &EnvPath,
        remove_content_recursively: bool,
    ) -> Result<(), DeleteError> {
        self.check(path)?;
        debug!(path = %path, recursive = remove_content_recursively, "delete");
        let native = to_native(path);
        let meta = fs::symlink_metadata(&native).await.at(path)?;
        if meta.is_dir() && !remove_content_recursively {
            return Ok(fs::remove_dir(&native).await.at(path)?);
        }
        Ok(transfer::remove_any(path, &meta).await?)
    }

    async fn copy(&self, options: CopyOptions) -> Result<(), CopyError> {
        self.check(&options.source)?;
        self.check(&options.target)?;
        debug!(
            source = %options.source,
            target = %options.target,
            recursive = options.copy_recursively,
            "copy"
        );
        Ok(transfer::copy(&options).await?)
    }

    async fn move_entry(&self, args: MoveArgs) -> Result<(), MoveError> {
        self.check(&args.source)?;
        self.check(&args.target)?;
        debug!(source = %args.source, target = %args.target, replace = ?args.replace_existing, "move");
        Ok(transfer::move_entry(&args).await?)
    }

    async fn change_attributes(
        &self,
        options: ChangeAttributesOptions,
    ) -> Result<(), ChangeAttributesError> {
        let path = &options.path;
        self.check(path)?;
        let native = to_native(path);
        let meta = fs::metadata(&native).await.at(path)?;

        if let Some(permissions) = options.permissions {
            apply_permissions(path, &meta, permissions).await?;
        }

        if options.access_time.is_some() || options.modification_time.is_some() {
            let atime = timestamp(
                options.access_time,
                filetime::FileTime::from_last_access_time(&meta),
            );
            let mtime = timestamp(
                options.modification_time,
                filetime::FileTime::from_last_modification_time(&meta),
            );
            tokio::task::spawn_blocking(move || filetime::set_file_times(&native, atime, mtime))
                .await
                .map_err(|e| join_error(e, path))?
                .at(path)?;
        }
        debug!(path = %path, "changed attributes");
        Ok(())
    }

    async fn create_temporary_directory(
        &self,
        options: CreateTemporaryEntryOptions,
    ) -> Result<EnvPath, CreateTemporaryEntryError> {
        Ok(self.create_temporary(&options, EntryKind::Directory).await?)
    }

    async fn create_temporary_file(
        &self,
        options: CreateTemporaryEntryOptions,
    ) -> Result<EnvPath, CreateTemporaryEntryError> {
        Ok(self.create_temporary(&options, EntryKind::File).await?)
    }

    #[cfg(unix)]
    async fn disk_info(&self, path: &EnvPath) -> Result<DiskInfo, DiskInfoError> {
        self.check(path)?;
        let native = to_native(path);
        let stat = tokio::task::spawn_blocking(move || rustix::fs::statvfs(&native))
            .await
            .map_err(|e| join_error(e, path))?
            .map_err(|errno| errors::fs_error(errno.into(), path))?;
        Ok(DiskInfo::from_blocks(
            stat.f_blocks,
            stat.f_bavail,
            stat.f_frsize,
        ))
    }

    #[cfg(windows)]
    async fn disk_info(&self, path: &EnvPath) -> Result<DiskInfo, DiskInfoError> {
        self.check(path)?;
        let native = to_native(path);
        let (total, available) = tokio::task::spawn_blocking(move || free_space(&native))
            .await
            .map_err(|e| join_error(e, path))?
            .at(path)?;
        Ok(DiskInfo::from_blocks(total, available, 1))
    }

    fn directory_hash(&self, path: &EnvPath) -> DirectoryHashStream {
        if let Err(err) = self.check(path) {
            let entry = envfs_types::DirectoryHashEntry::Error(err.into());
            return futures::StreamExt::boxed(futures::stream::iter([entry]));
        }
        debug!(path = %path, algorithm = self.hasher.algorithm_name(), "directory_hash");
        self.hasher.stream(path.clone())
    }

    async fn add_watch_roots(&self, options: WatchOptions) -> Result<bool, WatchError> {
        self.watch_service()?.add_roots(options)
    }

    async fn unwatch(&self, options: UnwatchOptions) -> Result<bool, WatchError> {
        self.watch_service()?.unwatch(&options)
    }

    fn watch_changes(&self) -> Result<ChangeStream, WatchError> {
        Ok(self.watch_service()?.subscribe())
    }
}

#[cfg(unix)]
#[async_trait]
impl crate::api::PosixFileSystemApi for LocalFileSystem {
    async fn create_directory(
        &self,
        path: &EnvPath,
        permissions: Option<envfs_types::PosixPermissions>,
    ) -> Result<(), envfs_types::CreateDirectoryError> {
        use std::os::unix::fs::PermissionsExt;

        self.check(path)?;
        let native = to_native(path);
        fs::create_dir(&native).await.at(path)?;
        if let Some(permissions) = permissions {
            fs::set_permissions(&native, std::fs::Permissions::from_mode(permissions.mode()))
                .await
                .at(path)?;
        }
        debug!(path = %path, "created directory");
        Ok(())
    }

    async fn create_symbolic_link(
        &self,
        target: envfs_types::LinkTarget,
        link: &EnvPath,
    ) -> Result<(), envfs_types::CreateSymbolicLinkError> {
        self.check(link)?;
        let text = match &target {
            envfs_types::LinkTarget::Absolute(path) => {
                self.check(path)?;
                to_native(path)
            }
            envfs_types::LinkTarget::Relative(relative) => relative.parts().iter().collect(),
        };
        fs::symlink(&text, to_native(link)).await.at(link)?;
        debug!(link = %link, target = %target, "created symbolic link");
        Ok(())
    }
}

/// `(total, available to this caller)` bytes of the volume holding `native`.
#[cfg(windows)]
fn free_space(native: &std::path::Path) -> std::io::Result<(u64, u64)> {
    use std::os::windows::ffi::OsStrExt;

    use windows_sys::Win32::Storage::FileSystem::GetDiskFreeSpaceExW;

    let wide: Vec<u16> = native.as_os_str().encode_wide().chain([0]).collect();
    let mut available = 0u64;
    let mut total = 0u64;
    let mut free = 0u64;
    // SAFETY: `wide` is NUL-terminated and the out-pointers live for the call.
    let ok = unsafe { GetDiskFreeSpaceExW(wide.as_ptr(), &mut available, &mut total, &mut free) };
    if ok == 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok((total, available))
}

#[cfg(windows)]
#[async_trait]
impl crate::api::WindowsFileSystemApi for LocalFileSystem {
    async fn root_directories(&self) -> Result<Vec<EnvPath>, ListDirectoryError> {
        let descriptor = self.descriptor;
        let roots = tokio::task::spawn_blocking(move || {
            ('A'..='Z')
                .map(|letter| format!("{letter}:\\"))
                .filter(|root| std::path::Path::new(root).exists())
                .filter_map(|root| EnvPath::parse(&root, descriptor).ok())
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| join_error(e, &EnvPath::root_of(descriptor)))?;
        Ok(roots)
    }
}

#[cfg(all(test, windows))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disk_info_reports_volume_space() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new();
        let path = fs.from_native(dir.path()).unwrap();

        let info = fs.disk_info(&path).await.unwrap();
        assert!(info.total_space > 0);
        assert!(info.available_space <= info.total_space);

        let missing = path.join("missing").unwrap();
        let err = fs.disk_info(&missing).await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::DoesNotExist);
    }
}
