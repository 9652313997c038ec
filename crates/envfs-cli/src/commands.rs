//! Subcommand bodies, written once against [`FileSystemApi`] so both OS
//! families and both backends share them.

use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use serde_json::{Value, json};

use envfs_core::types::{
    CopyOptions, CreateTemporaryEntryOptions, Descriptor, DirectoryHashEntry, EnvPath, FileInfo,
    FileType, LinkTarget, ListDirectoryWithAttrsArgs, MoveArgs, OverflowPolicy, Permissions,
    PosixPermissions, ReadFullyOutcome, RelativePath, StatArgs, SymlinkType, WatchOptions,
    WatchedPath,
};
use envfs_core::{FileSystemApi, PosixFileSystemApi, TreeHashes};

use crate::Command;

/// Where records go: text lines or one JSON object per line.
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    fn emit(&self, text: impl FnOnce() -> String, value: impl FnOnce() -> Value) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        if self.json {
            serde_json::to_writer(&mut stdout, &value())?;
            writeln!(stdout)?;
        } else {
            writeln!(stdout, "{}", text())?;
        }
        Ok(())
    }
}

/// Parse a command-line path for `descriptor`. Relative paths are anchored
/// at the working directory.
pub fn resolve(raw: &str, descriptor: Descriptor) -> Result<EnvPath> {
    let absolute = std::path::absolute(raw).with_context(|| format!("resolving {raw}"))?;
    let text = absolute
        .to_str()
        .with_context(|| format!("{raw} is not valid UTF-8"))?;
    EnvPath::parse(text, descriptor).with_context(|| format!("parsing {raw}"))
}

pub async fn run<F>(fs: &F, command: &Command, out: &Output) -> Result<()>
where
    F: FileSystemApi + ?Sized,
{
    let descriptor = fs.descriptor();
    let path = |raw: &str| resolve(raw, descriptor);

    match command {
        Command::Stat { path: raw, policy } => {
            let target = path(raw)?;
            let args = StatArgs::builder(target.clone())
                .symlink_policy(*policy)
                .build();
            let info = fs.stat(args).await?;
            out.emit(
                || format!("{} {target}", info_line(&info)),
                || with_name(info_json(&info), "path", target.to_string()),
            )?;
        }

        Command::Ls { path: raw, long, policy } => {
            let dir = path(raw)?;
            if *long {
                let args = ListDirectoryWithAttrsArgs::builder(dir)
                    .symlink_policy(*policy)
                    .build();
                for (name, info) in fs.list_directory_with_attrs(args).await? {
                    out.emit(
                        || format!("{} {name}", info_line(&info)),
                        || with_name(info_json(&info), "name", name.clone()),
                    )?;
                }
            } else {
                for name in fs.list_directory(&dir).await? {
                    out.emit(|| name.clone(), || json!({ "name": name }))?;
                }
            }
        }

        Command::Hash { path: raw } => {
            let root = path(raw)?;
            let mut entries = fs.directory_hash(&root);
            let mut failures = 0usize;
            while let Some(entry) = entries.next().await {
                match entry {
                    DirectoryHashEntry::Hash { path: file, hash } => {
                        let shown = display_relative(&file, &root);
                        out.emit(
                            || format!("{}  {shown}", hash_text(hash)),
                            || json!({ "path": shown, "hash": hash.map(|h| format!("{h:016x}")) }),
                        )?;
                    }
                    DirectoryHashEntry::Error(err) => {
                        tracing::warn!(error = %err, "could not hash entry");
                        failures += 1;
                    }
                }
            }
            if failures > 0 {
                bail!("{failures} entries under {root} could not be hashed");
            }
        }

        Command::Diff { left, right } => {
            let (left, right) = (path(left)?, path(right)?);
            let (ours, theirs) = futures::join!(
                TreeHashes::collect(fs.directory_hash(&left), &left),
                TreeHashes::collect(fs.directory_hash(&right), &right),
            );
            for err in ours.errors.iter().chain(&theirs.errors) {
                tracing::warn!(error = %err, "could not hash entry");
            }
            let diff = ours.diff(&theirs);
            let names = |paths: &[RelativePath]| -> Vec<String> {
                paths.iter().map(|p| p.to_string()).collect()
            };
            if out.json {
                out.emit(String::new, || {
                    json!({
                        "added": names(&diff.added),
                        "removed": names(&diff.removed),
                        "changed": names(&diff.changed),
                    })
                })?;
            } else {
                let marked = [('+', &diff.added), ('-', &diff.removed), ('~', &diff.changed)];
                for (mark, paths) in marked {
                    for p in paths {
                        out.emit(|| format!("{mark} {p}"), || Value::Null)?;
                    }
                }
            }
        }

        Command::Watch { paths, recursive, types, count } => {
            if !fs.supports_watching() {
                bail!("{descriptor} cannot watch for changes");
            }
            if *count == Some(0) {
                return Ok(());
            }
            let mut builder = WatchOptions::builder();
            for raw in paths {
                let root = fs.canonicalize(&path(raw)?).await?;
                builder = builder.path(if *recursive {
                    WatchedPath::recursive(root)
                } else {
                    WatchedPath::new(root)
                });
            }
            if !types.is_empty() {
                builder = builder.change_types(types.iter().copied());
            }

            // Subscribe first so nothing between registration and the first
            // poll is lost.
            let mut changes = fs.watch_changes()?;
            let fresh = fs.add_watch_roots(builder.build()).await?;
            tracing::info!(roots = paths.len(), fresh, "watching");

            let mut seen = 0usize;
            while let Some(change) = changes.next().await {
                out.emit(
                    || format!("{} {}", change.change_type, change.path),
                    || json!({ "type": change.change_type.to_string(), "path": change.path.to_string() }),
                )?;
                seen += 1;
                if count.is_some_and(|limit| seen >= limit) {
                    break;
                }
            }
        }

        Command::Disk { path: raw } => {
            let info = fs.disk_info(&path(raw)?).await?;
            out.emit(
                || format!("total {} available {}", info.total_space, info.available_space),
                || json!({ "total": info.total_space, "available": info.available_space }),
            )?;
        }

        Command::Cat { path: raw, limit } => {
            let file = path(raw)?;
            let (bytes, truncated) = match fs.read_fully(&file, *limit, OverflowPolicy::Retain).await? {
                ReadFullyOutcome::Bytes(bytes) => (bytes, false),
                ReadFullyOutcome::BytesOverflown(bytes) => (bytes, true),
                ReadFullyOutcome::Overflow => bail!("{file} is larger than {limit} bytes"),
            };
            if truncated {
                tracing::warn!(path = %file, limit, "output truncated");
            }
            if out.json {
                out.emit(String::new, || {
                    json!({
                        "path": file.to_string(),
                        "truncated": truncated,
                        "text": String::from_utf8_lossy(&bytes),
                    })
                })?;
            } else {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&bytes)?;
                stdout.flush()?;
            }
        }

        Command::Cp { source, target, recursive, force, preserve, follow } => {
            let options = CopyOptions::builder(path(source)?, path(target)?)
                .copy_recursively(*recursive)
                .replace_existing(*force)
                .preserve_attributes(*preserve)
                .follow_links(*follow)
                .build();
            fs.copy(options).await?;
        }

        Command::Mv { source, target, replace, follow } => {
            let args = MoveArgs::builder(path(source)?, path(target)?)
                .replace_existing((*replace).into())
                .follow_links(*follow)
                .build();
            fs.move_entry(args).await?;
        }

        Command::Rm { path: raw, recursive } => {
            fs.delete(&path(raw)?, *recursive).await?;
        }

        Command::Mktemp { directory, prefix, suffix, parent } => {
            let mut builder = CreateTemporaryEntryOptions::builder()
                .prefix(prefix.as_str())
                .suffix(suffix.as_str())
                .delete_on_exit(false);
            if let Some(parent) = parent {
                builder = builder.parent_directory(path(parent)?);
            }
            let created = if *directory {
                fs.create_temporary_directory(builder.build()).await?
            } else {
                fs.create_temporary_file(builder.build()).await?
            };
            out.emit(|| created.to_string(), || json!({ "path": created.to_string() }))?;
        }

        Command::Mkdir { .. } | Command::Ln { .. } => {
            bail!("this command needs a POSIX backend");
        }
    }
    Ok(())
}

/// Commands only POSIX environments offer.
pub async fn run_posix(
    fs: &dyn PosixFileSystemApi,
    command: &Command,
    out: &Output,
) -> Result<()> {
    let descriptor = fs.descriptor();
    match command {
        Command::Mkdir { path, mode } => {
            // Ownership fields are not applied by create_directory.
            let permissions = mode.map(|mode| PosixPermissions::new(mode, 0, 0));
            fs.create_directory(&resolve(path, descriptor)?, permissions)
                .await?;
        }
        Command::Ln { target, link } => {
            let target = link_target(target, descriptor)?;
            fs.create_symbolic_link(target, &resolve(link, descriptor)?)
                .await?;
        }
        other => return run(fs, other, out).await,
    }
    Ok(())
}

/// `ln -s` semantics: absolute targets are paths in the environment, anything
/// else is stored relative to the link's directory.
fn link_target(raw: &str, descriptor: Descriptor) -> Result<LinkTarget> {
    if Path::new(raw).is_absolute() {
        Ok(LinkTarget::Absolute(resolve(raw, descriptor)?))
    } else {
        Ok(LinkTarget::Relative(RelativePath::parse(raw)?))
    }
}

fn display_relative(file: &EnvPath, root: &EnvPath) -> String {
    match file.relative_to(root) {
        Some(relative) if relative.is_empty() => ".".to_string(),
        Some(relative) => relative.to_string(),
        None => file.to_string(),
    }
}

fn hash_text(hash: Option<u64>) -> String {
    match hash {
        Some(hash) => format!("{hash:016x}"),
        None => format!("{:-<16}", ""),
    }
}

fn kind(file_type: &FileType) -> &'static str {
    match file_type {
        FileType::Directory { .. } => "directory",
        FileType::Regular { .. } => "file",
        FileType::Symlink(_) => "symlink",
        FileType::Other => "other",
    }
}

fn permissions_text(permissions: Permissions) -> String {
    match permissions {
        Permissions::Posix(posix) => posix.symbolic(),
        Permissions::Windows(windows) => [
            (windows.read_only, 'r'),
            (windows.hidden, 'h'),
            (windows.archive, 'a'),
            (windows.system, 's'),
        ]
        .iter()
        .map(|&(set, flag)| if set { flag } else { '-' })
        .collect(),
    }
}

fn epoch_seconds(time: Option<SystemTime>) -> Option<u64> {
    Some(time?.duration_since(UNIX_EPOCH).ok()?.as_secs())
}

fn link_target_text(file_type: &FileType) -> Option<String> {
    match file_type {
        FileType::Symlink(SymlinkType::Resolved { target }) => Some(target.to_string()),
        _ => None,
    }
}

fn info_line(info: &impl FileInfo) -> String {
    let size = info
        .file_type()
        .size()
        .map_or_else(|| "-".to_string(), |s| s.to_string());
    let modified = epoch_seconds(info.last_modified())
        .map_or_else(|| "-".to_string(), |s| s.to_string());
    let mut line = format!(
        "{:<9} {} {size:>12} {modified:>10}",
        kind(info.file_type()),
        permissions_text(info.permissions()),
    );
    if let Some(target) = link_target_text(info.file_type()) {
        line.push_str(" -> ");
        line.push_str(&target);
    }
    line
}

fn info_json(info: &impl FileInfo) -> Value {
    json!({
        "type": kind(info.file_type()),
        "size": info.file_type().size(),
        "target": link_target_text(info.file_type()),
        "permissions": permissions_text(info.permissions()),
        "modified": epoch_seconds(info.last_modified()),
        "accessed": epoch_seconds(info.last_access()),
        "created": epoch_seconds(info.creation()),
    })
}

fn with_name(mut value: Value, key: &str, name: String) -> Value {
    value[key] = Value::String(name);
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use envfs_core::types::{InodeId, OsFamily, PosixFileInfo, WindowsPermissions};

    fn posix() -> Descriptor {
        Descriptor::local()
    }

    #[test]
    fn test_hash_text_is_fixed_width() {
        assert_eq!(hash_text(Some(0xabc)), "0000000000000abc");
        assert_eq!(hash_text(None), "-".repeat(16));
    }

    #[test]
    fn test_display_relative() {
        let root = EnvPath::parse("/srv/tree", posix()).unwrap();
        let file = root.join("a").unwrap().join("b.txt").unwrap();
        assert_eq!(display_relative(&file, &root), "a/b.txt");
        assert_eq!(display_relative(&root, &root), ".");
        let outside = EnvPath::parse("/etc/hosts", posix()).unwrap();
        assert_eq!(display_relative(&outside, &root), "/etc/hosts");
    }

    #[test]
    fn test_windows_flags() {
        let flags = WindowsPermissions {
            read_only: true,
            hidden: false,
            archive: true,
            system: false,
        };
        assert_eq!(permissions_text(Permissions::Windows(flags)), "r-a-");
    }

    #[test]
    fn test_info_json_for_symlink() {
        let target = EnvPath::parse("/srv/real", posix()).unwrap();
        let info = PosixFileInfo {
            file_type: FileType::Symlink(SymlinkType::Resolved { target }),
            permissions: PosixPermissions::new(0o777, 0, 0),
            inode: InodeId { device: 1, number: 2 },
            last_modified: Some(UNIX_EPOCH + std::time::Duration::from_secs(60)),
            last_access: None,
            creation: None,
        };
        let value = info_json(&info);
        assert_eq!(value["type"], "symlink");
        assert_eq!(value["target"], "/srv/real");
        assert_eq!(value["permissions"], "rwxrwxrwx");
        assert_eq!(value["modified"], 60);
        assert!(value["size"].is_null());
        assert!(info_line(&info).ends_with("-> /srv/real"));
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_args_are_anchored_at_cwd() {
        let resolved = resolve("some/file", posix()).unwrap();
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(resolved.to_string(), cwd.join("some/file").to_str().unwrap());
        assert_eq!(resolved.os_family(), OsFamily::Posix);
    }

    #[cfg(unix)]
    #[test]
    fn test_link_targets() {
        assert!(matches!(
            link_target("/srv/real", posix()).unwrap(),
            LinkTarget::Absolute(_)
        ));
        match link_target("../sibling/file", posix()).unwrap() {
            LinkTarget::Relative(relative) => assert_eq!(relative.to_string(), "../sibling/file"),
            other => panic!("expected relative target, got {other:?}"),
        }
    }
}
