//! Immutable option values for multi-parameter operations.
//!
//! Each value is produced by a builder that starts from the required fields
//! and documented defaults:
//!
//! ```
//! # use envfs_types::*;
//! let src = EnvPath::parse("/srv/a", Descriptor::new(EnvironmentId::local(), OsFamily::Posix)).unwrap();
//! let dst = EnvPath::parse("/srv/b", src.descriptor()).unwrap();
//! let opts = CopyOptions::builder(src, dst)
//!     .copy_recursively(true)
//!     .build();
//! assert!(!opts.replace_existing);
//! ```

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::path::EnvPath;

/// How a stat-like operation treats a symbolic link.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum SymlinkPolicy {
    /// Report the link itself.
    #[default]
    DoNotResolve,
    /// Report what the link points to; a dangling link is reported as unresolved.
    JustResolve,
    /// Resolve to the final target and operate on it; a dangling link is an error.
    ResolveAndFollow,
}

/// Whether opening for writing may or must create the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreationMode {
    #[default]
    OnlyOpenExisting,
    AllowCreate,
    /// Exclusive create: fail if the file exists.
    OnlyCreate,
}

/// What `read_fully` does with data beyond the limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Return no data, only the fact that the limit was exceeded.
    #[default]
    Drop,
    /// Return the first `limit` bytes.
    Retain,
}

/// Replacement rule for `move_entry`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplaceExistingDuringMove {
    ReplaceEverything,
    /// Replace files, refuse when the target is a directory.
    DoNotReplaceDirectories,
    #[default]
    DoNotReplace,
}

/// New value for a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampUpdate {
    Now,
    At(SystemTime),
}

// ── WriteOptions ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOptions {
    pub path: EnvPath,
    /// Default `false`.
    pub append: bool,
    /// Default `false`.
    pub truncate_existing: bool,
    /// Default [`CreationMode::OnlyOpenExisting`].
    pub creation_mode: CreationMode,
}

impl WriteOptions {
    pub fn builder(path: EnvPath) -> WriteOptionsBuilder {
        WriteOptionsBuilder::new(path)
    }
}

pub struct WriteOptionsBuilder {
    opts: WriteOptions,
}

impl WriteOptionsBuilder {
    pub fn new(path: EnvPath) -> Self {
        Self {
            opts: WriteOptions {
                path,
                append: false,
                truncate_existing: false,
                creation_mode: CreationMode::OnlyOpenExisting,
            },
        }
    }

    pub fn append(mut self, append: bool) -> Self {
        self.opts.append = append;
        self
    }

    pub fn truncate_existing(mut self, truncate: bool) -> Self {
        self.opts.truncate_existing = truncate;
        self
    }

    pub fn creation_mode(mut self, mode: CreationMode) -> Self {
        self.opts.creation_mode = mode;
        self
    }

    pub fn build(self) -> WriteOptions {
        self.opts
    }
}

// ── CopyOptions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyOptions {
    pub source: EnvPath,
    pub target: EnvPath,
    /// Copy directory content too. Default `false`: a directory source yields
    /// an empty target directory.
    pub copy_recursively: bool,
    /// Default `false`.
    pub replace_existing: bool,
    /// Copy permissions and timestamps. Default `false`.
    pub preserve_attributes: bool,
    /// Copy what symlinks point to instead of the links. Default `false`.
    pub follow_links: bool,
}

impl CopyOptions {
    pub fn builder(source: EnvPath, target: EnvPath) -> CopyOptionsBuilder {
        CopyOptionsBuilder::new(source, target)
    }
}

pub struct CopyOptionsBuilder {
    opts: CopyOptions,
}

impl CopyOptionsBuilder {
    pub fn new(source: EnvPath, target: EnvPath) -> Self {
        Self {
            opts: CopyOptions {
                source,
                target,
                copy_recursively: false,
                replace_existing: false,
                preserve_attributes: false,
                follow_links: false,
            },
        }
    }

    pub fn copy_recursively(mut self, v: bool) -> Self {
        self.opts.copy_recursively = v;
        self
    }

    pub fn replace_existing(mut self, v: bool) -> Self {
        self.opts.replace_existing = v;
        self
    }

    pub fn preserve_attributes(mut self, v: bool) -> Self {
        self.opts.preserve_attributes = v;
        self
    }

    pub fn follow_links(mut self, v: bool) -> Self {
        self.opts.follow_links = v;
        self
    }

    pub fn build(self) -> CopyOptions {
        self.opts
    }
}

// ── MoveArgs ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveArgs {
    pub source: EnvPath,
    pub target: EnvPath,
    /// Default [`ReplaceExistingDuringMove::DoNotReplace`].
    pub replace_existing: ReplaceExistingDuringMove,
    /// Move the entry a symlink source points to. Default `false`.
    pub follow_links: bool,
}

impl MoveArgs {
    pub fn builder(source: EnvPath, target: EnvPath) -> MoveArgsBuilder {
        MoveArgsBuilder::new(source, target)
    }
}

pub struct MoveArgsBuilder {
    args: MoveArgs,
}

impl MoveArgsBuilder {
    pub fn new(source: EnvPath, target: EnvPath) -> Self {
        Self {
            args: MoveArgs {
                source,
                target,
                replace_existing: ReplaceExistingDuringMove::DoNotReplace,
                follow_links: false,
            },
        }
    }

    pub fn replace_existing(mut self, mode: ReplaceExistingDuringMove) -> Self {
        self.args.replace_existing = mode;
        self
    }

    pub fn follow_links(mut self, v: bool) -> Self {
        self.args.follow_links = v;
        self
    }

    pub fn build(self) -> MoveArgs {
        self.args
    }
}

// ── ChangeAttributesOptions ─────────────────────────────────────────────────

/// Attribute changes; `None` leaves the attribute untouched.
///
/// Permissions are carried as [`crate::Permissions`]; a backend rejects the
/// shape of the other OS family with `InvalidValue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeAttributesOptions {
    pub path: EnvPath,
    /// Default `None`.
    pub access_time: Option<TimestampUpdate>,
    /// Default `None`.
    pub modification_time: Option<TimestampUpdate>,
    /// Default `None`.
    pub permissions: Option<crate::info::Permissions>,
}

impl ChangeAttributesOptions {
    pub fn builder(path: EnvPath) -> ChangeAttributesOptionsBuilder {
        ChangeAttributesOptionsBuilder::new(path)
    }

    /// True if nothing would change.
    pub fn is_empty(&self) -> bool {
        self.access_time.is_none() && self.modification_time.is_none() && self.permissions.is_none()
    }
}

pub struct ChangeAttributesOptionsBuilder {
    opts: ChangeAttributesOptions,
}

impl ChangeAttributesOptionsBuilder {
    pub fn new(path: EnvPath) -> Self {
        Self {
            opts: ChangeAttributesOptions {
                path,
                access_time: None,
                modification_time: None,
                permissions: None,
            },
        }
    }

    pub fn access_time(mut self, t: TimestampUpdate) -> Self {
        self.opts.access_time = Some(t);
        self
    }

    pub fn modification_time(mut self, t: TimestampUpdate) -> Self {
        self.opts.modification_time = Some(t);
        self
    }

    pub fn permissions(mut self, p: impl Into<crate::info::Permissions>) -> Self {
        self.opts.permissions = Some(p.into());
        self
    }

    pub fn build(self) -> ChangeAttributesOptions {
        self.opts
    }
}

// ── CreateTemporaryEntryOptions ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTemporaryEntryOptions {
    /// Default `"tmp"`.
    pub prefix: String,
    /// Default `""`.
    pub suffix: String,
    /// Remove the entry when the backend instance is torn down. Default `false`.
    pub delete_on_exit: bool,
    /// Default `None`: the environment's temporary directory.
    pub parent_directory: Option<EnvPath>,
}

impl Default for CreateTemporaryEntryOptions {
    fn default() -> Self {
        Self {
            prefix: "tmp".to_string(),
            suffix: String::new(),
            delete_on_exit: false,
            parent_directory: None,
        }
    }
}

impl CreateTemporaryEntryOptions {
    pub fn builder() -> CreateTemporaryEntryOptionsBuilder {
        CreateTemporaryEntryOptionsBuilder::new()
    }
}

#[derive(Default)]
pub struct CreateTemporaryEntryOptionsBuilder {
    opts: CreateTemporaryEntryOptions,
}

impl CreateTemporaryEntryOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.opts.prefix = prefix.into();
        self
    }

    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.opts.suffix = suffix.into();
        self
    }

    pub fn delete_on_exit(mut self, v: bool) -> Self {
        self.opts.delete_on_exit = v;
        self
    }

    pub fn parent_directory(mut self, dir: EnvPath) -> Self {
        self.opts.parent_directory = Some(dir);
        self
    }

    pub fn build(self) -> CreateTemporaryEntryOptions {
        self.opts
    }
}

// ── Stat-like arguments ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatArgs {
    pub path: EnvPath,
    /// Default [`SymlinkPolicy::DoNotResolve`].
    pub symlink_policy: SymlinkPolicy,
}

impl StatArgs {
    pub fn builder(path: EnvPath) -> StatArgsBuilder {
        StatArgsBuilder {
            args: StatArgs {
                path,
                symlink_policy: SymlinkPolicy::DoNotResolve,
            },
        }
    }
}

pub struct StatArgsBuilder {
    args: StatArgs,
}

impl StatArgsBuilder {
    pub fn symlink_policy(mut self, policy: SymlinkPolicy) -> Self {
        self.args.symlink_policy = policy;
        self
    }

    pub fn build(self) -> StatArgs {
        self.args
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListDirectoryWithAttrsArgs {
    pub path: EnvPath,
    /// Applies to children. Default [`SymlinkPolicy::DoNotResolve`].
    pub symlink_policy: SymlinkPolicy,
}

impl ListDirectoryWithAttrsArgs {
    pub fn builder(path: EnvPath) -> ListDirectoryWithAttrsArgsBuilder {
        ListDirectoryWithAttrsArgsBuilder {
            args: ListDirectoryWithAttrsArgs {
                path,
                symlink_policy: SymlinkPolicy::DoNotResolve,
            },
        }
    }
}

pub struct ListDirectoryWithAttrsArgsBuilder {
    args: ListDirectoryWithAttrsArgs,
}

impl ListDirectoryWithAttrsArgsBuilder {
    pub fn symlink_policy(mut self, policy: SymlinkPolicy) -> Self {
        self.args.symlink_policy = policy;
        self
    }

    pub fn build(self) -> ListDirectoryWithAttrsArgs {
        self.args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{Descriptor, EnvironmentId, OsFamily};
    use std::str::FromStr;

    fn p(s: &str) -> EnvPath {
        EnvPath::parse(s, Descriptor::new(EnvironmentId::local(), OsFamily::Posix)).unwrap()
    }

    #[test]
    fn test_write_options_defaults() {
        let opts = WriteOptions::builder(p("/f")).build();
        assert!(!opts.append);
        assert!(!opts.truncate_existing);
        assert_eq!(opts.creation_mode, CreationMode::OnlyOpenExisting);

        let opts = WriteOptions::builder(p("/f"))
            .creation_mode(CreationMode::OnlyCreate)
            .append(true)
            .build();
        assert!(opts.append);
        assert_eq!(opts.creation_mode, CreationMode::OnlyCreate);
    }

    #[test]
    fn test_copy_defaults() {
        let opts = CopyOptions::builder(p("/a"), p("/b")).build();
        assert!(!opts.copy_recursively);
        assert!(!opts.replace_existing);
        assert!(!opts.preserve_attributes);
        assert!(!opts.follow_links);
    }

    #[test]
    fn test_move_defaults() {
        let args = MoveArgs::builder(p("/a"), p("/b")).build();
        assert_eq!(args.replace_existing, ReplaceExistingDuringMove::DoNotReplace);
        assert!(!args.follow_links);
    }

    #[test]
    fn test_temp_defaults() {
        let opts = CreateTemporaryEntryOptions::builder().build();
        assert_eq!(opts.prefix, "tmp");
        assert_eq!(opts.suffix, "");
        assert!(!opts.delete_on_exit);
        assert!(opts.parent_directory.is_none());
    }

    #[test]
    fn test_change_attributes_empty() {
        let opts = ChangeAttributesOptions::builder(p("/a")).build();
        assert!(opts.is_empty());
        let opts = ChangeAttributesOptions::builder(p("/a"))
            .modification_time(TimestampUpdate::Now)
            .build();
        assert!(!opts.is_empty());
    }

    #[test]
    fn test_symlink_policy_strings() {
        assert_eq!(SymlinkPolicy::JustResolve.to_string(), "just-resolve");
        assert_eq!(
            SymlinkPolicy::from_str("resolve-and-follow").unwrap(),
            SymlinkPolicy::ResolveAndFollow
        );
        assert_eq!(StatArgs::builder(p("/x")).build().symlink_policy, SymlinkPolicy::DoNotResolve);
    }
}
