//! Agent side: executes calls against a local backend.
//!
//! Each `Call` frame runs in its own task so a slow stream never blocks a
//! `stat`. A `Cancel` frame aborts the task. When the channel closes every
//! task is aborted and every handle the session still holds is closed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::{Mutex, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use envfs_types::{EnvPath, FsError, FsErrorKind, PosixFileInfo};

use super::protocol::{
    AgentFrame, CallId, ClientFrame, HandleId, HandleRequest, MAX_CHUNK, Request, Response,
    StreamItem,
};
use super::transport::{Channel, FrameSender, decode, encode};
use crate::api::PosixFileSystemApi;
use crate::handle::{BoxReader, BoxReaderWriter, BoxWriter};

/// Serves one backend to any number of sessions, one per [`serve`](Self::serve).
#[derive(Clone)]
pub struct Agent {
    fs: Arc<dyn PosixFileSystemApi>,
}

impl Agent {
    pub fn new(fs: Arc<dyn PosixFileSystemApi>) -> Self {
        Self { fs }
    }

    /// Run a session until the client end of `channel` goes away.
    pub async fn serve(self, channel: Channel) {
        let (sender, mut receiver) = channel.split();
        let session = Session::new(self.fs);
        info!(environment = %session.fs.descriptor(), "agent session started");

        while let Some(bytes) = receiver.recv().await {
            let frame = match decode::<ClientFrame>(&bytes) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "dropping undecodable frame");
                    continue;
                }
            };
            match frame {
                ClientFrame::Call { id, request } => session.spawn_call(id, request, sender.clone()),
                ClientFrame::Cancel { id } => {
                    if let Some((_, task)) = session.tasks.remove(&id) {
                        task.abort();
                        debug!(call = id, "call cancelled");
                    }
                }
            }
        }

        session.teardown().await;
    }
}

enum OpenHandle {
    Reader(BoxReader<PosixFileInfo>),
    Writer(BoxWriter<PosixFileInfo>),
    ReaderWriter(BoxReaderWriter<PosixFileInfo>),
}

/// Evaluate `$body` with `$h` bound to whichever handle variant is open.
macro_rules! any_handle {
    ($handle:expr, $h:ident => $body:expr) => {
        match $handle {
            OpenHandle::Reader($h) => $body,
            OpenHandle::Writer($h) => $body,
            OpenHandle::ReaderWriter($h) => $body,
        }
    };
}

struct Session {
    fs: Arc<dyn PosixFileSystemApi>,
    handles: DashMap<HandleId, Arc<Mutex<OpenHandle>>>,
    next_handle: AtomicU64,
    tasks: DashMap<CallId, AbortHandle>,
}

impl Session {
    fn new(fs: Arc<dyn PosixFileSystemApi>) -> Arc<Self> {
        Arc::new(Session {
            fs,
            handles: DashMap::new(),
            next_handle: AtomicU64::new(1),
            tasks: DashMap::new(),
        })
    }

    fn spawn_call(self: &Arc<Self>, id: CallId, request: Request, sender: FrameSender) {
        // The task waits until its abort handle is registered, so a fast
        // call cannot finish before it is cancellable and leave a stale entry.
        let (start, gate) = oneshot::channel::<()>();
        let session = Arc::clone(self);
        let task = tokio::spawn(async move {
            if gate.await.is_err() {
                return;
            }
            session.run_call(id, request, &sender).await;
            session.tasks.remove(&id);
        });
        self.tasks.insert(id, task.abort_handle());
        let _ = start.send(());
    }

    async fn run_call(self: &Arc<Self>, id: CallId, request: Request, sender: &FrameSender) {
        let fs = &self.fs;
        let response = match request {
            Request::DirectoryHash { path } => return self.stream_hash(id, path, sender).await,
            Request::WatchChanges => return self.stream_changes(id, sender).await,

            Request::Hello => Response::Hello {
                descriptor: fs.descriptor(),
                supports_watching: fs.supports_watching(),
            },
            Request::ListDirectory { path } => Response::ListDirectory(fs.list_directory(&path).await),
            Request::ListDirectoryWithAttrs(args) => {
                Response::ListDirectoryWithAttrs(fs.list_directory_with_attrs(args).await)
            }
            Request::Canonicalize { path } => Response::Canonicalize(fs.canonicalize(&path).await),
            Request::Stat(args) => Response::Stat(fs.stat(args).await),
            Request::SameFile { a, b } => Response::SameFile(fs.same_file(&a, &b).await),
            Request::OpenForReading { path } => {
                let opened = fs.open_for_reading(&path).await;
                let opened = opened.map(|h| self.register(OpenHandle::Reader(h)));
                return reply_opened(id, opened, Response::OpenedForReading, sender).await;
            }
            Request::OpenForWriting(options) => {
                let opened = fs.open_for_writing(options).await;
                let opened = opened.map(|h| self.register(OpenHandle::Writer(h)));
                return reply_opened(id, opened, Response::OpenedForWriting, sender).await;
            }
            Request::OpenForReadingAndWriting(options) => {
                let opened = fs.open_for_reading_and_writing(options).await;
                let opened = opened.map(|h| self.register(OpenHandle::ReaderWriter(h)));
                return reply_opened(id, opened, Response::OpenedForWriting, sender).await;
            }
            Request::ReadFully {
                path,
                limit,
                overflow,
            } => Response::ReadFully(fs.read_fully(&path, limit, overflow).await),
            Request::Delete { path, recursive } => Response::Delete(fs.delete(&path, recursive).await),
            Request::Copy(options) => Response::Copy(fs.copy(options).await),
            Request::Move(args) => Response::Move(fs.move_entry(args).await),
            Request::ChangeAttributes(options) => {
                Response::ChangeAttributes(fs.change_attributes(options).await)
            }
            Request::CreateTemporaryDirectory(options) => {
                Response::TemporaryEntry(fs.create_temporary_directory(options).await)
            }
            Request::CreateTemporaryFile(options) => {
                Response::TemporaryEntry(fs.create_temporary_file(options).await)
            }
            Request::DiskInfo { path } => Response::DiskInfo(fs.disk_info(&path).await),
            Request::CreateDirectory { path, permissions } => {
                Response::CreateDirectory(fs.create_directory(&path, permissions).await)
            }
            Request::CreateSymbolicLink { target, link } => {
                Response::CreateSymbolicLink(fs.create_symbolic_link(target, &link).await)
            }
            Request::AddWatchRoots(options) => Response::Watch(fs.add_watch_roots(options).await),
            Request::Unwatch(options) => Response::Watch(fs.unwatch(options).await),
            Request::Handle { handle, op } => self.handle_op(handle, op).await,
        };
        send(sender, &AgentFrame::Reply { id, response }).await;
    }

    fn register(self: &Arc<Self>, handle: OpenHandle) -> PendingHandle {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(id, Arc::new(Mutex::new(handle)));
        debug!(handle = id, "handle opened");
        PendingHandle {
            session: Arc::clone(self),
            id,
            delivered: false,
        }
    }

    fn root(&self) -> EnvPath {
        EnvPath::root_of(self.fs.descriptor())
    }

    async fn handle_op(&self, id: HandleId, op: HandleRequest) -> Response {
        let entry = if matches!(op, HandleRequest::Close) {
            self.handles.remove(&id).map(|(_, handle)| handle)
        } else {
            self.handles.get(&id).map(|entry| Arc::clone(entry.value()))
        };
        let Some(entry) = entry else {
            let err = FsError::new(FsErrorKind::UnknownFile, self.root(), format!("unknown handle {id}"));
            return failed(&op, err);
        };
        let mut handle = entry.lock().await;

        match op {
            HandleRequest::Read { len } => {
                let mut buf = vec![0; (len as usize).min(MAX_CHUNK)];
                let result = match &mut *handle {
                    OpenHandle::Reader(h) => h.read(&mut buf).await,
                    OpenHandle::ReaderWriter(h) => h.read(&mut buf).await,
                    OpenHandle::Writer(h) => Err(not_open_for(h.path(), "reading").into()),
                };
                Response::Read(result.map(move |outcome| {
                    buf.truncate(outcome.bytes_read);
                    (buf, outcome.status)
                }))
            }
            HandleRequest::ReadAt { len, offset } => {
                let mut buf = vec![0; (len as usize).min(MAX_CHUNK)];
                let result = match &mut *handle {
                    OpenHandle::Reader(h) => h.read_at(&mut buf, offset).await,
                    OpenHandle::ReaderWriter(h) => h.read_at(&mut buf, offset).await,
                    OpenHandle::Writer(h) => Err(not_open_for(h.path(), "reading").into()),
                };
                Response::Read(result.map(move |outcome| {
                    buf.truncate(outcome.bytes_read);
                    (buf, outcome.status)
                }))
            }
            HandleRequest::Write { data } => Response::Written(
                match &mut *handle {
                    OpenHandle::Writer(h) => h.write(&data).await,
                    OpenHandle::ReaderWriter(h) => h.write(&data).await,
                    OpenHandle::Reader(h) => Err(not_open_for(h.path(), "writing").into()),
                }
                .map(|n| n as u64),
            ),
            HandleRequest::WriteAt { data, offset } => Response::Written(
                match &mut *handle {
                    OpenHandle::Writer(h) => h.write_at(&data, offset).await,
                    OpenHandle::ReaderWriter(h) => h.write_at(&data, offset).await,
                    OpenHandle::Reader(h) => Err(not_open_for(h.path(), "writing").into()),
                }
                .map(|n| n as u64),
            ),
            HandleRequest::Flush => Response::Flush(match &mut *handle {
                OpenHandle::Writer(h) => h.flush().await,
                OpenHandle::ReaderWriter(h) => h.flush().await,
                OpenHandle::Reader(h) => Err(not_open_for(h.path(), "writing").into()),
            }),
            HandleRequest::Truncate { size } => Response::Truncate(match &mut *handle {
                OpenHandle::Writer(h) => h.truncate(size).await,
                OpenHandle::ReaderWriter(h) => h.truncate(size).await,
                OpenHandle::Reader(h) => Err(not_open_for(h.path(), "writing").into()),
            }),
            HandleRequest::Seek { offset, whence } => {
                Response::Seek(any_handle!(&mut *handle, h => h.seek(offset, whence).await))
            }
            HandleRequest::Tell => Response::Tell(any_handle!(&mut *handle, h => h.tell().await)),
            HandleRequest::Stat => Response::HandleStat(any_handle!(&mut *handle, h => h.stat().await)),
            HandleRequest::Close => {
                let result = any_handle!(&mut *handle, h => h.close().await);
                debug!(handle = id, ok = result.is_ok(), "handle closed");
                Response::Close(result)
            }
        }
    }

    async fn stream_hash(&self, id: CallId, path: EnvPath, sender: &FrameSender) {
        let mut entries = self.fs.directory_hash(&path);
        while let Some(entry) = entries.next().await {
            let item = StreamItem::Hash(entry);
            if !send(sender, &AgentFrame::Item { id, item }).await {
                return;
            }
        }
        send(sender, &AgentFrame::End { id }).await;
    }

    async fn stream_changes(&self, id: CallId, sender: &FrameSender) {
        let mut changes = match self.fs.watch_changes() {
            Ok(changes) => changes,
            Err(e) => {
                let response = Response::Subscribed(Err(e));
                send(sender, &AgentFrame::Reply { id, response }).await;
                send(sender, &AgentFrame::End { id }).await;
                return;
            }
        };
        let response = Response::Subscribed(Ok(()));
        if !send(sender, &AgentFrame::Reply { id, response }).await {
            return;
        }
        while let Some(change) = changes.next().await {
            let item = StreamItem::Change(change);
            if !send(sender, &AgentFrame::Item { id, item }).await {
                return;
            }
        }
        send(sender, &AgentFrame::End { id }).await;
    }

    async fn teardown(&self) {
        for task in self.tasks.iter() {
            task.value().abort();
        }
        self.tasks.clear();

        let open: Vec<_> = self
            .handles
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        self.handles.clear();

        let count = open.len();
        for (id, handle) in open {
            close_quietly(id, handle).await;
        }
        info!(closed_handles = count, "agent session ended");
    }
}

/// A registered handle whose `Opened*` reply has not gone out yet. Dropped
/// undelivered (the send failed or the call was cancelled mid-send), it
/// closes the handle and removes it from the session.
struct PendingHandle {
    session: Arc<Session>,
    id: HandleId,
    delivered: bool,
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        if self.delivered {
            return;
        }
        let Some((id, handle)) = self.session.handles.remove(&self.id) else {
            return;
        };
        debug!(handle = id, "open reply not delivered, closing handle");
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(close_quietly(id, handle));
            }
            Err(_) => warn!(handle = id, "no runtime to close undelivered handle on"),
        }
    }
}

/// Send the reply to an open call. The handle stays registered only if the
/// reply made it into the channel.
async fn reply_opened<E>(
    id: CallId,
    opened: Result<PendingHandle, E>,
    wrap: fn(Result<HandleId, E>) -> Response,
    sender: &FrameSender,
) {
    let (result, mut pending) = match opened {
        Ok(pending) => (Ok(pending.id), Some(pending)),
        Err(e) => (Err(e), None),
    };
    let response = wrap(result);
    if send(sender, &AgentFrame::Reply { id, response }).await {
        if let Some(pending) = pending.as_mut() {
            pending.delivered = true;
        }
    }
}

async fn close_quietly(id: HandleId, handle: Arc<Mutex<OpenHandle>>) {
    let mut handle = handle.lock().await;
    if let Err(e) = any_handle!(&mut *handle, h => h.close().await) {
        warn!(handle = id, error = %e, "failed to close handle");
    }
}

fn not_open_for(path: &EnvPath, what: &str) -> FsError {
    FsError::other(path.clone(), format!("handle is not open for {what}"))
}

/// The error response matching `op`.
fn failed(op: &HandleRequest, err: FsError) -> Response {
    match op {
        HandleRequest::Read { .. } | HandleRequest::ReadAt { .. } => Response::Read(Err(err.into())),
        HandleRequest::Write { .. } | HandleRequest::WriteAt { .. } => {
            Response::Written(Err(err.into()))
        }
        HandleRequest::Seek { .. } => Response::Seek(Err(err.into())),
        HandleRequest::Tell => Response::Tell(Err(err.into())),
        HandleRequest::Stat => Response::HandleStat(Err(err.into())),
        HandleRequest::Flush => Response::Flush(Err(err.into())),
        HandleRequest::Truncate { .. } => Response::Truncate(Err(err.into())),
        HandleRequest::Close => Response::Close(Err(err.into())),
    }
}

/// Encode and send one frame. `false` once the client is gone.
async fn send(sender: &FrameSender, frame: &AgentFrame) -> bool {
    let bytes = match encode(frame) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to encode agent frame");
            return true;
        }
    };
    sender.send(bytes).await.is_ok()
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::local::LocalFileSystem;

    async fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }

    fn file_in(dir: &tempfile::TempDir, fs: &LocalFileSystem) -> EnvPath {
        let native = dir.path().join("data.txt");
        std::fs::write(&native, b"data").unwrap();
        fs.from_native(&native).unwrap()
    }

    #[tokio::test]
    async fn test_cancelled_open_on_full_channel_closes_handle() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new();
        let path = file_in(&dir, &fs);
        let session = Session::new(Arc::new(fs));

        // Nobody reads the client end, so one queued frame fills the channel.
        let (agent_end, _client_end) = Channel::pair(1);
        let (sender, _receiver) = agent_end.split();
        sender.send(Vec::new()).await.unwrap();

        let call = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session
                    .run_call(7, Request::OpenForReading { path }, &sender)
                    .await
            })
        };
        wait_for("the handle to open", || session.handles.len() == 1).await;
        call.abort();
        assert!(call.await.unwrap_err().is_cancelled());

        wait_for("the handle to be released", || session.handles.is_empty()).await;
    }

    #[tokio::test]
    async fn test_open_for_departed_client_closes_handle() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new();
        let path = file_in(&dir, &fs);
        let session = Session::new(Arc::new(fs));

        let (agent_end, client_end) = Channel::pair(4);
        let (sender, _receiver) = agent_end.split();
        drop(client_end);

        session
            .run_call(1, Request::OpenForReading { path }, &sender)
            .await;
        assert!(session.handles.is_empty());
    }

    #[tokio::test]
    async fn test_delivered_open_keeps_handle() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new();
        let path = file_in(&dir, &fs);
        let session = Session::new(Arc::new(fs));

        let (agent_end, client_end) = Channel::pair(4);
        let (sender, _receiver) = agent_end.split();
        let (_client_tx, mut client_rx) = client_end.split();

        session
            .run_call(1, Request::OpenForReading { path }, &sender)
            .await;
        let frame: AgentFrame = decode(&client_rx.recv().await.unwrap()).unwrap();
        let handle = match frame {
            AgentFrame::Reply { id: 1, response } => response.opened_handle().unwrap(),
            other => panic!("unexpected frame {other:?}"),
        };
        assert!(session.handles.contains_key(&handle));
    }
}
