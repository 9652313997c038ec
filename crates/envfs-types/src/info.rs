//! File metadata in its POSIX and Windows shapes.
//!
//! Both shapes share [`FileType`] and optional timestamps; they differ in
//! permissions and identity. A timestamp the backend cannot provide is
//! `None`, never the epoch.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::ids::CaseSensitivity;
use crate::path::EnvPath;

/// Where a symbolic link points, if that could be determined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymlinkType {
    Resolved { target: EnvPath },
    Unresolved,
}

/// Kind of a filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    Directory { case_sensitivity: CaseSensitivity },
    Regular { size: u64 },
    Symlink(SymlinkType),
    /// Sockets, FIFOs, devices.
    Other,
}

impl FileType {
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory { .. })
    }

    pub fn is_file(&self) -> bool {
        matches!(self, FileType::Regular { .. })
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink(_))
    }

    /// Size for regular files, `None` otherwise.
    pub fn size(&self) -> Option<u64> {
        match self {
            FileType::Regular { size } => Some(*size),
            _ => None,
        }
    }
}

/// POSIX mode bits plus ownership.
///
/// Only the twelve permission bits (`rwx` for owner/group/other, setuid,
/// setgid, sticky) are kept in `mode`; file-type bits are stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PosixPermissions {
    mode: u32,
    pub owner: u32,
    pub group: u32,
}

impl PosixPermissions {
    pub const OWNER_READ: u32 = 0o400;
    pub const OWNER_WRITE: u32 = 0o200;
    pub const OWNER_EXECUTE: u32 = 0o100;
    pub const GROUP_READ: u32 = 0o040;
    pub const GROUP_WRITE: u32 = 0o020;
    pub const GROUP_EXECUTE: u32 = 0o010;
    pub const OTHER_READ: u32 = 0o004;
    pub const OTHER_WRITE: u32 = 0o002;
    pub const OTHER_EXECUTE: u32 = 0o001;
    pub const SET_UID: u32 = 0o4000;
    pub const SET_GID: u32 = 0o2000;
    pub const STICKY: u32 = 0o1000;

    const MASK: u32 = 0o7777;

    pub fn new(mode: u32, owner: u32, group: u32) -> Self {
        Self {
            mode: mode & Self::MASK,
            owner,
            group,
        }
    }

    /// The permission bits (at most `0o7777`).
    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode & Self::MASK;
        self
    }

    pub fn has(&self, bit: u32) -> bool {
        self.mode & bit == bit
    }

    pub fn owner_can_read(&self) -> bool {
        self.has(Self::OWNER_READ)
    }

    pub fn owner_can_write(&self) -> bool {
        self.has(Self::OWNER_WRITE)
    }

    pub fn owner_can_execute(&self) -> bool {
        self.has(Self::OWNER_EXECUTE)
    }

    pub fn is_set_uid(&self) -> bool {
        self.has(Self::SET_UID)
    }

    pub fn is_set_gid(&self) -> bool {
        self.has(Self::SET_GID)
    }

    pub fn is_sticky(&self) -> bool {
        self.has(Self::STICKY)
    }

    /// `ls -l` style rendering, e.g. `rwxr-sr-t`.
    pub fn symbolic(&self) -> String {
        let triad = |r: u32, w: u32, x: u32, special: u32, set: char, unset: char| {
            let mut s = String::with_capacity(3);
            s.push(if self.has(r) { 'r' } else { '-' });
            s.push(if self.has(w) { 'w' } else { '-' });
            s.push(match (self.has(x), self.has(special)) {
                (true, true) => set,
                (false, true) => unset,
                (true, false) => 'x',
                (false, false) => '-',
            });
            s
        };
        let mut out = triad(
            Self::OWNER_READ,
            Self::OWNER_WRITE,
            Self::OWNER_EXECUTE,
            Self::SET_UID,
            's',
            'S',
        );
        out += &triad(
            Self::GROUP_READ,
            Self::GROUP_WRITE,
            Self::GROUP_EXECUTE,
            Self::SET_GID,
            's',
            'S',
        );
        out += &triad(
            Self::OTHER_READ,
            Self::OTHER_WRITE,
            Self::OTHER_EXECUTE,
            Self::STICKY,
            't',
            'T',
        );
        out
    }
}

/// Windows attribute flags standing in for permissions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowsPermissions {
    pub read_only: bool,
    pub hidden: bool,
    pub archive: bool,
    pub system: bool,
}

/// Either permission shape, for code that handles both variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permissions {
    Posix(PosixPermissions),
    Windows(WindowsPermissions),
}

impl From<PosixPermissions> for Permissions {
    fn from(p: PosixPermissions) -> Self {
        Permissions::Posix(p)
    }
}

impl From<WindowsPermissions> for Permissions {
    fn from(p: WindowsPermissions) -> Self {
        Permissions::Windows(p)
    }
}

/// Device + inode pair identifying a POSIX file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InodeId {
    pub device: u64,
    pub number: u64,
}

/// Read accessors shared by both metadata shapes.
pub trait FileInfo {
    fn file_type(&self) -> &FileType;
    fn permissions(&self) -> Permissions;
    fn last_modified(&self) -> Option<SystemTime>;
    fn last_access(&self) -> Option<SystemTime>;
    fn creation(&self) -> Option<SystemTime>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosixFileInfo {
    pub file_type: FileType,
    pub permissions: PosixPermissions,
    pub inode: InodeId,
    pub last_modified: Option<SystemTime>,
    pub last_access: Option<SystemTime>,
    pub creation: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowsFileInfo {
    pub file_type: FileType,
    pub permissions: WindowsPermissions,
    pub last_modified: Option<SystemTime>,
    pub last_access: Option<SystemTime>,
    pub creation: Option<SystemTime>,
}

macro_rules! impl_file_info {
    ($T:ident, $perm:ident) => {
        impl FileInfo for $T {
            fn file_type(&self) -> &FileType {
                &self.file_type
            }

            fn permissions(&self) -> Permissions {
                Permissions::$perm(self.permissions)
            }

            fn last_modified(&self) -> Option<SystemTime> {
                self.last_modified
            }

            fn last_access(&self) -> Option<SystemTime> {
                self.last_access
            }

            fn creation(&self) -> Option<SystemTime> {
                self.creation
            }
        }
    };
}

impl_file_info!(PosixFileInfo, Posix);
impl_file_info!(WindowsFileInfo, Windows);

/// Capacity of the volume holding a path. Values saturate at `u64::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub total_space: u64,
    pub available_space: u64,
}

impl DiskInfo {
    /// Build from block counts, saturating instead of overflowing.
    pub fn from_blocks(total_blocks: u64, available_blocks: u64, block_size: u64) -> Self {
        Self {
            total_space: total_blocks.saturating_mul(block_size),
            available_space: available_blocks.saturating_mul(block_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_predicates() {
        assert!(FileType::Regular { size: 3 }.is_file());
        assert_eq!(FileType::Regular { size: 3 }.size(), Some(3));
        assert!(
            FileType::Directory {
                case_sensitivity: CaseSensitivity::Sensitive
            }
            .is_dir()
        );
        assert!(FileType::Symlink(SymlinkType::Unresolved).is_symlink());
        assert_eq!(FileType::Other.size(), None);
    }

    #[test]
    fn test_posix_permissions_bits() {
        let p = PosixPermissions::new(0o104755, 1000, 100);
        // File-type bits are dropped.
        assert_eq!(p.mode(), 0o4755);
        assert!(p.is_set_uid());
        assert!(!p.is_set_gid());
        assert!(p.owner_can_write());
        assert_eq!(p.symbolic(), "rwsr-xr-x");
    }

    #[test]
    fn test_symbolic_special_bits_without_execute() {
        let p = PosixPermissions::new(0o3644, 0, 0);
        assert_eq!(p.symbolic(), "rw-r-Sr-T");
    }

    #[test]
    fn test_disk_info_saturates() {
        let info = DiskInfo::from_blocks(u64::MAX / 2, 10, 4096);
        assert_eq!(info.total_space, u64::MAX);
        assert_eq!(info.available_space, 40960);
    }

    #[test]
    fn test_file_info_trait_over_both_shapes() {
        let posix = PosixFileInfo {
            file_type: FileType::Regular { size: 1 },
            permissions: PosixPermissions::new(0o644, 0, 0),
            inode: InodeId { device: 1, number: 2 },
            last_modified: None,
            last_access: None,
            creation: None,
        };
        let windows = WindowsFileInfo {
            file_type: FileType::Other,
            permissions: WindowsPermissions {
                hidden: true,
                ..Default::default()
            },
            last_modified: Some(SystemTime::UNIX_EPOCH),
            last_access: None,
            creation: None,
        };
        let infos: [&dyn FileInfo; 2] = [&posix, &windows];
        assert!(infos[0].file_type().is_file());
        assert!(matches!(infos[1].permissions(), Permissions::Windows(w) if w.hidden));
        assert!(infos[0].last_modified().is_none());
    }
}
