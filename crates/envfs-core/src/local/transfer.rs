//! Copy and move.

use std::collections::VecDeque;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tokio::fs;
use tracing::{debug, warn};

use envfs_types::{
    CopyOptions, EnvPath, FsError, FsErrorKind, MoveArgs, ReplaceExistingDuringMove,
};

use super::errors::{IoResultExt, fs_error, is_cross_device, join_error};
use super::info::{from_native, to_native};
use super::temp::candidate_name;

/// One directory entry as the OS reported it.
pub(crate) struct DirEntryName {
    /// The name, with undecodable bytes replaced.
    pub name: String,
    /// The entry's real path. Use it for follow-up calls on the entry.
    pub native: PathBuf,
    /// `false` if `name` had to be rewritten.
    pub exact: bool,
}

/// Entries of a directory, sorted by name.
pub(crate) async fn read_entries(path: &EnvPath) -> Result<Vec<DirEntryName>, FsError> {
    let mut dir = fs::read_dir(to_native(path)).await.at(path)?;
    let mut entries = Vec::new();
    while let Some(entry) = dir.next_entry().await.at(path)? {
        let raw = entry.file_name();
        let (name, exact) = match raw.to_str() {
            Some(name) => (name.to_string(), true),
            None => (raw.to_string_lossy().into_owned(), false),
        };
        entries.push(DirEntryName {
            name,
            native: entry.path(),
            exact,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Names in a directory, sorted.
pub(crate) async fn read_names(path: &EnvPath) -> Result<Vec<String>, FsError> {
    Ok(read_entries(path)
        .await?
        .into_iter()
        .map(|entry| entry.name)
        .collect())
}

fn child(parent: &EnvPath, name: &str) -> Result<EnvPath, FsError> {
    parent
        .join(name)
        .map_err(|e| FsError::other(parent.clone(), e.to_string()))
}

async fn entry_metadata(path: &EnvPath, follow_links: bool) -> Result<Metadata, FsError> {
    let native = to_native(path);
    if follow_links {
        fs::metadata(&native).await.at(path)
    } else {
        fs::symlink_metadata(&native).await.at(path)
    }
}

/// Metadata of whatever sits at `path`, or `None` if nothing does.
async fn existing(path: &EnvPath) -> Result<Option<Metadata>, FsError> {
    match fs::symlink_metadata(to_native(path)).await {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(fs_error(e, path)),
    }
}

/// Remove a file, link or directory tree.
pub(crate) async fn remove_any(path: &EnvPath, meta: &Metadata) -> Result<(), FsError> {
    let native = to_native(path);
    if meta.is_dir() {
        fs::remove_dir_all(&native).await.at(path)
    } else {
        remove_link_or_file(&native).await.at(path)
    }
}

#[cfg(unix)]
async fn remove_link_or_file(native: &Path) -> std::io::Result<()> {
    fs::remove_file(native).await
}

#[cfg(windows)]
async fn remove_link_or_file(native: &Path) -> std::io::Result<()> {
    // Directory symlinks are removed like directories on Windows.
    match fs::remove_file(native).await {
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => fs::remove_dir(native).await,
        other => other,
    }
}

#[cfg(unix)]
pub(crate) async fn create_link(text: &Path, link: &Path, _target_is_dir: bool) -> std::io::Result<()> {
    fs::symlink(text, link).await
}

#[cfg(windows)]
pub(crate) async fn create_link(text: &Path, link: &Path, target_is_dir: bool) -> std::io::Result<()> {
    if target_is_dir {
        fs::symlink_dir(text, link).await
    } else {
        fs::symlink_file(text, link).await
    }
}

/// Copy permissions and timestamps from `meta` onto `target`.
async fn apply_attributes(meta: &Metadata, target: &EnvPath) -> Result<(), FsError> {
    let native = to_native(target);
    let atime = FileTime::from_last_access_time(meta);
    let mtime = FileTime::from_last_modification_time(meta);

    if meta.file_type().is_symlink() {
        return tokio::task::spawn_blocking(move || {
            filetime::set_symlink_file_times(&native, atime, mtime)
        })
        .await
        .map_err(|e| join_error(e, target))?
        .at(target);
    }

    fs::set_permissions(&native, meta.permissions()).await.at(target)?;
    tokio::task::spawn_blocking(move || filetime::set_file_times(&native, atime, mtime))
        .await
        .map_err(|e| join_error(e, target))?
        .at(target)
}

pub(crate) async fn copy(options: &CopyOptions) -> Result<(), FsError> {
    let source = &options.source;
    let target = &options.target;
    let meta = entry_metadata(source, options.follow_links).await?;

    if source.same_location(target) {
        return Ok(());
    }
    if meta.is_dir() && options.copy_recursively && target.starts_with(source) {
        return Err(FsError::new(
            FsErrorKind::InvalidValue,
            target.clone(),
            "cannot copy a directory into itself",
        ));
    }

    if let Some(existing) = existing(target).await? {
        if !options.replace_existing {
            return Err(FsError::new(
                FsErrorKind::AlreadyExists,
                target.clone(),
                "target exists",
            ));
        }
        if existing.is_dir() {
            // Only an empty directory may be replaced.
            fs::remove_dir(to_native(target)).await.at(target)?;
        } else {
            remove_link_or_file(&to_native(target)).await.at(target)?;
        }
    }

    copy_tree(source, meta, target, options).await
}

/// Copy `source` (already stat'ed as `meta`) to a vacant `target`.
async fn copy_tree(
    source: &EnvPath,
    meta: Metadata,
    target: &EnvPath,
    options: &CopyOptions,
) -> Result<(), FsError> {
    let mut pending = VecDeque::from([(source.clone(), meta, target.clone())]);
    // Directory attributes go on last so read-only directories can be filled first.
    let mut directories = Vec::new();

    while let Some((src, meta, dst)) = pending.pop_front() {
        let file_type = meta.file_type();
        if file_type.is_dir() {
            fs::create_dir(to_native(&dst)).await.at(&dst)?;
            if options.copy_recursively {
                for entry in read_entries(&src).await? {
                    if !entry.exact {
                        return Err(FsError::new(
                            FsErrorKind::InvalidValue,
                            src.clone(),
                            format!("entry name {:?} is not valid UTF-8", entry.native),
                        ));
                    }
                    let name = entry.name;
                    let child_src = child(&src, &name)?;
                    let child_meta = entry_metadata(&child_src, options.follow_links).await?;
                    pending.push_back((child_src, child_meta, child(&dst, &name)?));
                }
            }
            directories.push((meta, dst));
        } else if file_type.is_symlink() {
            let native = to_native(&src);
            let text = fs::read_link(&native).await.at(&src)?;
            let target_is_dir = fs::metadata(&native).await.map(|m| m.is_dir()).unwrap_or(false);
            create_link(&text, &to_native(&dst), target_is_dir)
                .await
                .at(&dst)?;
            if options.preserve_attributes {
                apply_attributes(&meta, &dst).await?;
            }
        } else if file_type.is_file() {
            fs::copy(to_native(&src), to_native(&dst)).await.at(&dst)?;
            if options.preserve_attributes {
                apply_attributes(&meta, &dst).await?;
            }
        } else {
            return Err(FsError::other(src, "cannot copy a special file"));
        }
    }

    if options.preserve_attributes {
        for (meta, dst) in directories.into_iter().rev() {
            apply_attributes(&meta, &dst).await?;
        }
    }
    Ok(())
}

pub(crate) async fn move_entry(args: &MoveArgs) -> Result<(), FsError> {
    let source = if args.follow_links {
        canonical(&args.source).await?
    } else {
        args.source.clone()
    };
    let target = &args.target;
    let meta = fs::symlink_metadata(to_native(&source)).await.at(&args.source)?;

    if source.same_location(target) {
        return Ok(());
    }
    if target.starts_with(&source) {
        return Err(FsError::new(
            FsErrorKind::InvalidValue,
            target.clone(),
            "cannot move an entry into itself",
        ));
    }

    let occupant = existing(target).await?;
    let mut aside = None;
    if let Some(occupant) = &occupant {
        match args.replace_existing {
            ReplaceExistingDuringMove::DoNotReplace => {
                return Err(FsError::new(
                    FsErrorKind::AlreadyExists,
                    target.clone(),
                    "target exists",
                ));
            }
            ReplaceExistingDuringMove::DoNotReplaceDirectories if occupant.is_dir() => {
                return Err(FsError::new(
                    FsErrorKind::IsDirectory,
                    target.clone(),
                    "target is a directory",
                ));
            }
            _ => {}
        }
        if source.starts_with(target) {
            return Err(FsError::new(
                FsErrorKind::InvalidValue,
                target.clone(),
                "target contains the source",
            ));
        }
        if !rename_replaces(&meta, occupant, target).await? {
            aside = Some(SetAside::new(target, occupant.clone()).await?);
        }
    }

    let outcome = match fs::rename(to_native(&source), to_native(target)).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            debug!(source = %source, target = %target, "rename crosses devices, copying");
            // The copy needs a vacant target.
            if aside.is_none() {
                if let Some(occupant) = occupant {
                    aside = Some(SetAside::new(target, occupant).await?);
                }
            }
            move_by_copy(&source, meta, target).await
        }
        Err(e) => Err(fs_error(e, target)),
    };

    match aside {
        Some(aside) => aside.finish(outcome).await,
        None => outcome,
    }
}

/// Whether `rename(2)` replaces `existing` by itself: a file over a
/// non-directory, or (on Unix) a directory over an empty directory.
async fn rename_replaces(
    source: &Metadata,
    existing: &Metadata,
    target: &EnvPath,
) -> Result<bool, FsError> {
    match (source.is_dir(), existing.is_dir()) {
        (false, false) => Ok(true),
        (true, true) if cfg!(unix) => Ok(read_names(target).await?.is_empty()),
        _ => Ok(false),
    }
}

/// An existing move target renamed to a hidden sibling until the move
/// settles. It is deleted once the move succeeds and put back if it fails.
struct SetAside {
    original: EnvPath,
    aside: EnvPath,
    meta: Metadata,
}

impl SetAside {
    async fn new(original: &EnvPath, meta: Metadata) -> Result<Self, FsError> {
        let parent = original.parent().ok_or_else(|| {
            FsError::new(FsErrorKind::InvalidValue, original.clone(), "cannot replace a root")
        })?;
        let name = original.file_name().unwrap_or_default();
        let aside = child(&parent, &candidate_name(&format!(".{name}."), ".replaced", 8))?;
        fs::rename(to_native(original), to_native(&aside))
            .await
            .at(original)?;
        debug!(target = %original, aside = %aside, "set existing target aside");
        Ok(Self {
            original: original.clone(),
            aside,
            meta,
        })
    }

    async fn finish(self, outcome: Result<(), FsError>) -> Result<(), FsError> {
        match outcome {
            Ok(()) => {
                if let Err(e) = remove_any(&self.aside, &self.meta).await {
                    warn!(path = %self.aside, error = %e, "failed to delete replaced move target");
                }
                Ok(())
            }
            Err(err) => {
                if let Err(e) = fs::rename(to_native(&self.aside), to_native(&self.original)).await {
                    warn!(
                        target = %self.original,
                        aside = %self.aside,
                        error = %e,
                        "failed to restore move target"
                    );
                }
                Err(err)
            }
        }
    }
}

/// Copy then delete. A failed copy leaves no partial target behind.
async fn move_by_copy(source: &EnvPath, meta: Metadata, target: &EnvPath) -> Result<(), FsError> {
    let options = CopyOptions::builder(source.clone(), target.clone())
        .copy_recursively(true)
        .preserve_attributes(true)
        .build();

    if let Err(err) = copy_tree(source, meta.clone(), target, &options).await {
        if let Ok(Some(partial)) = existing(target).await {
            if let Err(e) = remove_any(target, &partial).await {
                warn!(path = %target, error = %e, "failed to roll back partial move");
            }
        }
        return Err(err);
    }
    remove_any(source, &meta).await
}

pub(crate) async fn canonical(path: &EnvPath) -> Result<EnvPath, FsError> {
    let native = to_native(path);
    let resolved = tokio::task::spawn_blocking(move || dunce::canonicalize(native))
        .await
        .map_err(|e| join_error(e, path))?
        .at(path)?;
    from_native(&resolved, path.descriptor())
        .map_err(|e| FsError::other(path.clone(), e.to_string()))
}
