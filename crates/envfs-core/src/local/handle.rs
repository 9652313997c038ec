//! Open handle over a `tokio::fs::File`.

use std::io::SeekFrom;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use envfs_types::{
    Capability, CloseError, EnvPath, FlushError, FsError, FsErrorKind, ReadError, ReadOutcome,
    ReadStatus, SeekError, StatError, TellError, TruncateError, Whence, WriteError,
};

use super::errors::IoResultExt;
use super::info::{NativeFileInfo, file_info, plain_file_type};
use crate::handle::{FileHandle, FileReader, FileWriter, seek_target};

pub struct LocalHandle {
    path: EnvPath,
    capability: Capability,
    /// `None` once closed.
    file: Option<File>,
}

impl LocalHandle {
    pub(crate) fn new(path: EnvPath, file: File, capability: Capability) -> Self {
        Self {
            path,
            capability,
            file: Some(file),
        }
    }

    fn file(&mut self) -> Result<&mut File, FsError> {
        match self.file.as_mut() {
            Some(file) => Ok(file),
            None => Err(FsError::new(
                FsErrorKind::UnknownFile,
                self.path.clone(),
                "handle is closed",
            )),
        }
    }

    /// Read at the cursor and decide whether the file is exhausted.
    async fn read_here(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, FsError> {
        let path = self.path.clone();
        let file = self.file()?;
        let bytes_read = file.read(buf).await.at(&path)?;

        let status = if bytes_read == buf.len() && !buf.is_empty() {
            ReadStatus::NotEof
        } else {
            let position = file.stream_position().await.at(&path)?;
            let len = file.metadata().await.at(&path)?.len();
            if position >= len {
                ReadStatus::Eof
            } else {
                ReadStatus::NotEof
            }
        };
        Ok(ReadOutcome { bytes_read, status })
    }

    async fn write_here(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        let path = self.path.clone();
        let file = self.file()?;
        let written = file.write(buf).await.at(&path)?;
        // Surface deferred write errors on this call instead of the next one.
        file.flush().await.at(&path)?;
        Ok(written)
    }

    /// Move to `offset`, returning the position to restore afterwards.
    async fn jump(&mut self, offset: u64) -> Result<u64, FsError> {
        let path = self.path.clone();
        let file = self.file()?;
        let saved = file.stream_position().await.at(&path)?;
        file.seek(SeekFrom::Start(offset)).await.at(&path)?;
        Ok(saved)
    }

    async fn restore(&mut self, saved: u64) -> Result<(), FsError> {
        let path = self.path.clone();
        self.file()?.seek(SeekFrom::Start(saved)).await.at(&path)?;
        Ok(())
    }
}

#[async_trait]
impl FileHandle for LocalHandle {
    type Info = NativeFileInfo;

    fn path(&self) -> &EnvPath {
        &self.path
    }

    fn capability(&self) -> Capability {
        self.capability
    }

    async fn tell(&mut self) -> Result<u64, TellError> {
        let path = self.path.clone();
        Ok(self.file()?.stream_position().await.at(&path)?)
    }

    async fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, SeekError> {
        let path = self.path.clone();
        let file = self.file()?;
        let current = file.stream_position().await.at(&path)?;
        let len = file.metadata().await.at(&path)?.len();
        let target = seek_target(current, len, offset, whence).ok_or_else(|| {
            SeekError::InvalidValue(envfs_types::ErrorDetail::new(
                path.clone(),
                format!("seek to {offset} from {whence:?} leaves the file"),
            ))
        })?;
        Ok(file.seek(SeekFrom::Start(target)).await.at(&path)?)
    }

    async fn stat(&mut self) -> Result<NativeFileInfo, StatError> {
        let path = self.path.clone();
        let meta = self.file()?.metadata().await.at(&path)?;
        Ok(file_info(&meta, plain_file_type(&meta)))
    }

    async fn close(&mut self) -> Result<(), CloseError> {
        let Some(mut file) = self.file.take() else {
            return Err(CloseError::UnknownFile(envfs_types::ErrorDetail::new(
                self.path.clone(),
                "handle is already closed",
            )));
        };
        let flushed = file.flush().await.at(&self.path);
        // Wait out in-flight blocking ops so the descriptor is really gone.
        drop(file.into_std().await);
        debug!(path = %self.path, "closed handle");
        Ok(flushed?)
    }
}

#[async_trait]
impl FileReader for LocalHandle {
    async fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, ReadError> {
        Ok(self.read_here(buf).await?)
    }

    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<ReadOutcome, ReadError> {
        let saved = self.jump(offset).await?;
        let outcome = self.read_here(buf).await;
        self.restore(saved).await?;
        Ok(outcome?)
    }
}

#[async_trait]
impl FileWriter for LocalHandle {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, WriteError> {
        Ok(self.write_here(buf).await?)
    }

    async fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize, WriteError> {
        let saved = self.jump(offset).await?;
        let written = self.write_here(buf).await;
        self.restore(saved).await?;
        Ok(written?)
    }

    async fn flush(&mut self) -> Result<(), FlushError> {
        let path = self.path.clone();
        let file = self.file()?;
        file.flush().await.at(&path)?;
        Ok(file.sync_data().await.at(&path)?)
    }

    async fn truncate(&mut self, size: u64) -> Result<(), TruncateError> {
        let path = self.path.clone();
        let file = self.file()?;
        file.flush().await.at(&path)?;
        Ok(file.set_len(size).await.at(&path)?)
    }
}

impl Drop for LocalHandle {
    fn drop(&mut self) {
        if self.file.is_some() {
            debug!(path = %self.path, "handle dropped without close");
        }
    }
}
