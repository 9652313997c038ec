//! `io::Error` to [`FsError`] mapping.

use std::io;

use envfs_types::{EnvPath, Exhaustion, FsError, FsErrorKind};

/// Base kind for an OS error.
pub(crate) fn classify(err: &io::Error) -> FsErrorKind {
    #[cfg(unix)]
    if let Some(errno) = rustix::io::Errno::from_io_error(err) {
        use rustix::io::Errno;
        match errno {
            Errno::NAMETOOLONG => return FsErrorKind::NameTooLong,
            Errno::DQUOT => return FsErrorKind::ResourceExhausted(Exhaustion::DiskQuotaExceeded),
            Errno::FBIG => return FsErrorKind::ResourceExhausted(Exhaustion::FileSizeExceeded),
            Errno::BADF => return FsErrorKind::UnknownFile,
            _ => {}
        }
    }

    match err.kind() {
        io::ErrorKind::NotFound => FsErrorKind::DoesNotExist,
        io::ErrorKind::PermissionDenied => FsErrorKind::PermissionDenied,
        io::ErrorKind::AlreadyExists => FsErrorKind::AlreadyExists,
        io::ErrorKind::NotADirectory => FsErrorKind::NotDirectory,
        io::ErrorKind::IsADirectory => FsErrorKind::IsDirectory,
        io::ErrorKind::DirectoryNotEmpty => FsErrorKind::DirNotEmpty,
        io::ErrorKind::ReadOnlyFilesystem => FsErrorKind::ReadOnlyFileSystem,
        io::ErrorKind::StorageFull => FsErrorKind::ResourceExhausted(Exhaustion::NoSpaceLeft),
        io::ErrorKind::FileTooLarge => {
            FsErrorKind::ResourceExhausted(Exhaustion::FileSizeExceeded)
        }
        io::ErrorKind::InvalidInput => FsErrorKind::InvalidValue,
        _ => FsErrorKind::Other,
    }
}

pub(crate) fn fs_error(err: io::Error, path: &EnvPath) -> FsError {
    FsError::new(classify(&err), path.clone(), err.to_string())
}

/// Attach an [`EnvPath`] to an `io::Result`.
pub(crate) trait IoResultExt<T> {
    fn at(self, path: &EnvPath) -> Result<T, FsError>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, path: &EnvPath) -> Result<T, FsError> {
        self.map_err(|e| fs_error(e, path))
    }
}

/// Whether a rename failed only because source and target are on different
/// devices.
pub(crate) fn is_cross_device(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        rustix::io::Errno::from_io_error(err) == Some(rustix::io::Errno::XDEV)
    }
    #[cfg(windows)]
    {
        // ERROR_NOT_SAME_DEVICE
        err.raw_os_error() == Some(17)
    }
}

/// Failure of a blocking task that never reported back.
pub(crate) fn join_error(err: tokio::task::JoinError, path: &EnvPath) -> FsError {
    FsError::other(path.clone(), format!("blocking task failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_kinds() {
        let err = io::Error::from(io::ErrorKind::NotFound);
        assert_eq!(classify(&err), FsErrorKind::DoesNotExist);
        let err = io::Error::from(io::ErrorKind::StorageFull);
        assert_eq!(
            classify(&err),
            FsErrorKind::ResourceExhausted(Exhaustion::NoSpaceLeft)
        );
        assert_eq!(classify(&io::Error::other("boom")), FsErrorKind::Other);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_classify_errno() {
        let err = io::Error::from_raw_os_error(rustix::io::Errno::NAMETOOLONG.raw_os_error());
        assert_eq!(classify(&err), FsErrorKind::NameTooLong);
        let err = io::Error::from_raw_os_error(rustix::io::Errno::DQUOT.raw_os_error());
        assert_eq!(
            classify(&err),
            FsErrorKind::ResourceExhausted(Exhaustion::DiskQuotaExceeded)
        );
        let err = io::Error::from_raw_os_error(rustix::io::Errno::XDEV.raw_os_error());
        assert!(is_cross_device(&err));
    }
}
