//! Native metadata and path conversion for the local backend.

use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};

use tokio::fs;

use envfs_types::{
    CaseSensitivity, Descriptor, EnvPath, FileType, FsError, FsErrorKind, PathError,
    SymlinkPolicy, SymlinkType,
};

use super::errors::{IoResultExt, classify, fs_error};

#[cfg(unix)]
pub type NativeFileInfo = envfs_types::PosixFileInfo;
#[cfg(windows)]
pub type NativeFileInfo = envfs_types::WindowsFileInfo;

pub(crate) fn to_native(path: &EnvPath) -> PathBuf {
    PathBuf::from(path.to_string())
}

pub(crate) fn from_native(native: &Path, descriptor: Descriptor) -> Result<EnvPath, PathError> {
    EnvPath::parse(&native.to_string_lossy(), descriptor)
}

fn local_case_sensitivity() -> CaseSensitivity {
    if cfg!(target_os = "linux") {
        CaseSensitivity::Sensitive
    } else if cfg!(windows) {
        CaseSensitivity::Insensitive
    } else {
        // macOS volumes may go either way.
        CaseSensitivity::Unknown
    }
}

/// File type of already-fetched metadata. Symlinks come out unresolved.
pub(crate) fn plain_file_type(meta: &Metadata) -> FileType {
    let ft = meta.file_type();
    if ft.is_dir() {
        FileType::Directory {
            case_sensitivity: local_case_sensitivity(),
        }
    } else if ft.is_file() {
        FileType::Regular { size: meta.len() }
    } else if ft.is_symlink() {
        FileType::Symlink(SymlinkType::Unresolved)
    } else {
        FileType::Other
    }
}

#[cfg(unix)]
pub(crate) fn file_info(meta: &Metadata, file_type: FileType) -> NativeFileInfo {
    use std::os::unix::fs::MetadataExt;

    use envfs_types::{InodeId, PosixPermissions};

    NativeFileInfo {
        file_type,
        permissions: PosixPermissions::new(meta.mode(), meta.uid(), meta.gid()),
        inode: InodeId {
            device: meta.dev(),
            number: meta.ino(),
        },
        last_modified: meta.modified().ok(),
        last_access: meta.accessed().ok(),
        creation: meta.created().ok(),
    }
}

#[cfg(windows)]
pub(crate) fn file_info(meta: &Metadata, file_type: FileType) -> NativeFileInfo {
    use std::os::windows::fs::MetadataExt;

    use envfs_types::WindowsPermissions;

    const READONLY: u32 = 0x1;
    const HIDDEN: u32 = 0x2;
    const SYSTEM: u32 = 0x4;
    const ARCHIVE: u32 = 0x20;

    let attrs = meta.file_attributes();
    NativeFileInfo {
        file_type,
        permissions: WindowsPermissions {
            read_only: attrs & READONLY != 0,
            hidden: attrs & HIDDEN != 0,
            archive: attrs & ARCHIVE != 0,
            system: attrs & SYSTEM != 0,
        },
        last_modified: meta.modified().ok(),
        last_access: meta.accessed().ok(),
        creation: meta.created().ok(),
    }
}

/// Make a link's stored text absolute without touching the filesystem.
fn lexical_link_target(link: &EnvPath, text: &Path) -> SymlinkType {
    if text.is_absolute() {
        return match from_native(text, link.descriptor()) {
            Ok(target) => SymlinkType::Resolved { target },
            Err(_) => SymlinkType::Unresolved,
        };
    }

    let Some(mut target) = link.parent() else {
        return SymlinkType::Unresolved;
    };
    for component in text.components() {
        let segment = match component {
            Component::Normal(s) => s.to_string_lossy().into_owned(),
            Component::ParentDir => "..".to_string(),
            Component::CurDir => continue,
            Component::RootDir | Component::Prefix(_) => return SymlinkType::Unresolved,
        };
        target = match target.join(&segment) {
            Ok(joined) => joined,
            Err(_) => return SymlinkType::Unresolved,
        };
    }
    SymlinkType::Resolved {
        target: target.normalize(),
    }
}

/// A follow failed because the chain ends nowhere (missing target or loop).
fn is_dangling(err: &std::io::Error) -> bool {
    if classify(err) == FsErrorKind::DoesNotExist {
        return true;
    }
    #[cfg(unix)]
    {
        rustix::io::Errno::from_io_error(err) == Some(rustix::io::Errno::LOOP)
    }
    #[cfg(windows)]
    {
        false
    }
}

/// `stat` under a symlink policy.
pub(crate) async fn stat_with_policy(
    path: &EnvPath,
    policy: SymlinkPolicy,
) -> Result<NativeFileInfo, FsError> {
    stat_native(path, &to_native(path), policy).await
}

/// `stat` of `native`, reported as `path`. Directory listings pass the OS's
/// own entry path here, which may not survive a round trip through `EnvPath`.
pub(crate) async fn stat_native(
    path: &EnvPath,
    native: &Path,
    policy: SymlinkPolicy,
) -> Result<NativeFileInfo, FsError> {
    let link_meta = fs::symlink_metadata(native).await.at(path)?;
    if !link_meta.file_type().is_symlink() {
        return Ok(file_info(&link_meta, plain_file_type(&link_meta)));
    }

    match policy {
        SymlinkPolicy::DoNotResolve => {
            let text = fs::read_link(native).await.at(path)?;
            let target = lexical_link_target(path, &text);
            Ok(file_info(&link_meta, FileType::Symlink(target)))
        }
        SymlinkPolicy::JustResolve => match fs::metadata(native).await {
            Ok(meta) => Ok(file_info(&meta, plain_file_type(&meta))),
            Err(e) if is_dangling(&e) => Ok(file_info(
                &link_meta,
                FileType::Symlink(SymlinkType::Unresolved),
            )),
            Err(e) => Err(fs_error(e, path)),
        },
        SymlinkPolicy::ResolveAndFollow => {
            let meta = fs::metadata(native).await.at(path)?;
            Ok(file_info(&meta, plain_file_type(&meta)))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn p(s: &str) -> EnvPath {
        EnvPath::parse(s, Descriptor::local()).unwrap()
    }

    #[test]
    fn test_lexical_target_relative() {
        let link = p("/srv/app/current");
        match lexical_link_target(&link, Path::new("../releases/./v2")) {
            SymlinkType::Resolved { target } => assert_eq!(target, p("/srv/releases/v2")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_lexical_target_absolute() {
        let link = p("/srv/app/current");
        assert_eq!(
            lexical_link_target(&link, Path::new("/opt/v3")),
            SymlinkType::Resolved {
                target: p("/opt/v3")
            }
        );
    }

    #[tokio::test]
    async fn test_stat_policies_on_dangling_link() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("dangling");
        std::os::unix::fs::symlink(dir.path().join("nowhere"), &link).unwrap();
        let link = from_native(&link, Descriptor::local()).unwrap();

        let info = stat_with_policy(&link, SymlinkPolicy::DoNotResolve).await.unwrap();
        assert!(matches!(
            info.file_type,
            FileType::Symlink(SymlinkType::Resolved { .. })
        ));

        let info = stat_with_policy(&link, SymlinkPolicy::JustResolve).await.unwrap();
        assert_eq!(info.file_type, FileType::Symlink(SymlinkType::Unresolved));

        let err = stat_with_policy(&link, SymlinkPolicy::ResolveAndFollow)
            .await
            .unwrap_err();
        assert_eq!(err.kind, FsErrorKind::DoesNotExist);
    }
}
