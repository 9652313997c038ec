//! Open file handles.
//!
//! A handle is created by one of the `open_for_*` calls and lives until
//! `close()`:
//!
//! ```text
//!   open_for_reading ──▶ Open(Reader) ──┐
//!   open_for_writing ──▶ Open(Writer) ──┼── close() ──▶ Closed
//!   open_for_r_and_w ──▶ Open(ReaderWriter)
//! ```
//!
//! Methods take `&mut self`: a handle belongs to the caller that opened it,
//! and ordering of operations on one handle is the order of the calls.
//! Every operation on a closed handle, including a second `close()`, fails
//! with `UnknownFile`.
//!
//! Reads and writes may move fewer bytes than asked for even when more data
//! or room is available; callers loop. End of file is the explicit
//! [`ReadStatus::Eof`](envfs_types::ReadStatus) marker, never an ambiguous
//! zero-length read.

use async_trait::async_trait;

use envfs_types::{
    Capability, CloseError, EnvPath, FlushError, ReadError, ReadOutcome, ReadStatus, SeekError,
    StatError, TellError, TruncateError, Whence, WriteError,
};

/// Operations every open handle supports.
#[async_trait]
pub trait FileHandle: Send {
    /// Metadata shape of the owning environment.
    type Info: Send + 'static;

    fn path(&self) -> &EnvPath;

    fn capability(&self) -> Capability;

    /// Current cursor position.
    async fn tell(&mut self) -> Result<u64, TellError>;

    /// Move the cursor and return the new position.
    async fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, SeekError>;

    /// Metadata of the open file (sees this handle's own writes).
    async fn stat(&mut self) -> Result<Self::Info, StatError>;

    /// Release the handle. Terminal.
    async fn close(&mut self) -> Result<(), CloseError>;
}

#[async_trait]
pub trait FileReader: FileHandle {
    /// Read at the cursor, advancing it by the bytes read.
    async fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, ReadError>;

    /// Read at `offset` without moving the cursor.
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<ReadOutcome, ReadError>;

    /// Read until `buf` is full or end of file. Returns the bytes read.
    async fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> Result<usize, ReadError> {
        let mut filled = 0;
        while filled < buf.len() {
            let outcome = self.read(&mut buf[filled..]).await?;
            filled += outcome.bytes_read;
            if outcome.status == ReadStatus::Eof {
                break;
            }
        }
        Ok(filled)
    }
}

#[async_trait]
pub trait FileWriter: FileHandle {
    /// Write at the cursor, advancing it. May write fewer bytes than given.
    async fn write(&mut self, buf: &[u8]) -> Result<usize, WriteError>;

    /// Write at `offset` without moving the cursor.
    async fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize, WriteError>;

    async fn flush(&mut self) -> Result<(), FlushError>;

    /// Set the file length, extending with zeros or cutting off the tail.
    async fn truncate(&mut self, size: u64) -> Result<(), TruncateError>;

    /// Write all of `buf` at the cursor, looping over short writes.
    async fn write_all(&mut self, mut buf: &[u8]) -> Result<(), WriteError> {
        while !buf.is_empty() {
            let written = self.write(buf).await?;
            if written == 0 {
                return Err(WriteError::Other(envfs_types::ErrorDetail::new(
                    self.path().clone(),
                    "write made no progress",
                )));
            }
            buf = &buf[written..];
        }
        Ok(())
    }
}

/// A handle with both capabilities.
pub trait FileReaderWriter: FileReader + FileWriter {}

impl<T: FileReader + FileWriter + ?Sized> FileReaderWriter for T {}

pub type BoxReader<I> = Box<dyn FileReader<Info = I>>;
pub type BoxWriter<I> = Box<dyn FileWriter<Info = I>>;
pub type BoxReaderWriter<I> = Box<dyn FileReaderWriter<Info = I>>;

/// Resolve a seek request against the current position and file length.
pub(crate) fn seek_target(current: u64, len: u64, offset: i64, whence: Whence) -> Option<u64> {
    let base = match whence {
        Whence::Start => 0,
        Whence::Current => current,
        Whence::End => len,
    };
    base.checked_add_signed(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_target() {
        assert_eq!(seek_target(5, 100, 10, Whence::Start), Some(10));
        assert_eq!(seek_target(5, 100, -2, Whence::Current), Some(3));
        assert_eq!(seek_target(5, 100, -1, Whence::End), Some(99));
        assert_eq!(seek_target(5, 100, -6, Whence::Current), None);
        assert_eq!(seek_target(u64::MAX, 0, 1, Whence::Current), None);
    }
}
