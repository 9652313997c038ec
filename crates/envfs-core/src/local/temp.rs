//! Temporary files and directories.

use std::path::PathBuf;

use parking_lot::Mutex;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::fs;
use tracing::{debug, warn};

use envfs_types::{CreateTemporaryEntryOptions, Descriptor, EnvPath, FsError, FsErrorKind};

use super::errors::{IoResultExt, fs_error};
use super::info::{from_native, to_native};
use crate::config::TempConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    File,
    Directory,
}

/// `prefix` + random alphanumerics + `suffix`.
pub(crate) fn candidate_name(prefix: &str, suffix: &str, random_len: usize) -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(random_len)
        .map(char::from)
        .collect();
    format!("{prefix}{random}{suffix}")
}

pub(crate) async fn create_entry(
    descriptor: Descriptor,
    config: &TempConfig,
    options: &CreateTemporaryEntryOptions,
    kind: EntryKind,
) -> Result<EnvPath, FsError> {
    let parent = match &options.parent_directory {
        Some(parent) => parent.clone(),
        None => {
            let native = std::env::temp_dir();
            from_native(&native, descriptor).map_err(|e| {
                FsError::other(
                    EnvPath::root_of(descriptor),
                    format!("temp dir {}: {e}", native.display()),
                )
            })?
        }
    };

    let meta = fs::metadata(to_native(&parent)).await.at(&parent)?;
    if !meta.is_dir() {
        return Err(FsError::new(
            FsErrorKind::NotDirectory,
            parent,
            "temporary entry parent is not a directory",
        ));
    }

    for _ in 0..config.max_attempts {
        let name = candidate_name(&options.prefix, &options.suffix, config.random_len);
        let candidate = parent
            .join(&name)
            .map_err(|e| FsError::new(FsErrorKind::InvalidValue, parent.clone(), e.to_string()))?;
        let native = to_native(&candidate);

        let created = match kind {
            EntryKind::Directory => fs::create_dir(&native).await,
            EntryKind::File => fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&native)
                .await
                .map(drop),
        };
        match created {
            Ok(()) => {
                debug!(path = %candidate, ?kind, "created temporary entry");
                return Ok(candidate);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(fs_error(e, &candidate)),
        }
    }

    Err(FsError::other(
        parent,
        format!("no unused name after {} attempts", config.max_attempts),
    ))
}

/// Entries to remove when the owning backend goes away.
#[derive(Debug, Default)]
pub(crate) struct TempRegistry {
    entries: Mutex<Vec<PathBuf>>,
}

impl TempRegistry {
    pub(crate) fn register(&self, path: &EnvPath) {
        self.entries.lock().push(to_native(path));
    }

    /// Remove every registered entry, newest first.
    pub(crate) fn cleanup(&self) {
        let entries = std::mem::take(&mut *self.entries.lock());
        for native in entries.into_iter().rev() {
            let result = match std::fs::symlink_metadata(&native) {
                Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(&native),
                Ok(_) => std::fs::remove_file(&native),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => debug!(path = %native.display(), "removed temporary entry"),
                Err(e) => warn!(path = %native.display(), error = %e, "failed to remove temporary entry"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_name_shape() {
        let name = candidate_name("t", ".bin", 10);
        assert!(name.starts_with('t'));
        assert!(name.ends_with(".bin"));
        assert_eq!(name.len(), 1 + 10 + 4);
        assert!(name[1..11].chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
