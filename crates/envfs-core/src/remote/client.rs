//! Client side: a [`FileSystemApi`] that forwards every call to an agent.
//!
//! ```text
//!   RemoteFileSystem ─┐                       ┌─▶ writer task ──▶ Channel
//!   RemoteHandle ─────┼─▶ outbound (unbounded)┘
//!   CallStream ───────┘
//!                         pending: CallId ─▶ oneshot | stream
//!   Channel ──▶ reader task ──▶ pending
//! ```
//!
//! Calls never wait on each other: each one registers a pending slot under a
//! fresh id and waits on it. Dropping a call future or a stream cancels the
//! call on the agent. Dropping a [`RemoteHandle`] without closing it closes
//! it on the agent in the background.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use envfs_types::{
    Capability, CanonicalizeError, ChangeAttributesError, ChangeAttributesOptions, CloseError,
    CopyError, CopyOptions, CreateDirectoryError, CreateSymbolicLinkError,
    CreateTemporaryEntryError, CreateTemporaryEntryOptions, DeleteError, Descriptor,
    DirectoryHashEntry, DiskInfo, DiskInfoError, EnvPath, FlushError, FsError, FsErrorKind,
    LinkTarget, ListDirectoryError, ListDirectoryWithAttrsArgs, MoveArgs, MoveError,
    OpenReadError, OpenWriteError, OsFamily, OverflowPolicy, PosixFileInfo, PosixPermissions,
    ReadError, ReadFullyError, ReadFullyOutcome, ReadOutcome, SameFileError, SeekError, StatArgs,
    StatError, TellError, TruncateError, UnwatchOptions, WatchError, WatchOptions, Whence,
    WriteError, WriteOptions,
};

use super::RemoteError;
use super::protocol::{
    AgentFrame, CallId, ClientFrame, HandleId, HandleRequest, MAX_CHUNK, Request, Response,
    StreamItem,
};
use super::transport::{Channel, FrameReceiver, FrameSender, decode, encode};
use crate::api::{ChangeStream, DirectoryHashStream, FileSystemApi, PosixFileSystemApi};
use crate::handle::{BoxReader, BoxReaderWriter, BoxWriter, FileHandle, FileReader, FileWriter};

// ============================================================================
// Shared state
// ============================================================================

enum Pending {
    Unary(oneshot::Sender<Response>),
    Stream(mpsc::UnboundedSender<Incoming>),
}

/// What a streaming call receives.
enum Incoming {
    Reply(Response),
    Item(StreamItem),
}

/// State shared by the client and its two I/O tasks.
struct Shared {
    outbound: mpsc::UnboundedSender<ClientFrame>,
    pending: DashMap<CallId, Pending>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn next_id(&self) -> CallId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register `slot` under a fresh id and send the call.
    fn start(&self, request: Request, slot: Pending) -> Result<CallId, RemoteError> {
        let id = self.next_id();
        self.pending.insert(id, slot);
        // Checked after insert: the reader sets `closed` before draining.
        if self.closed.load(Ordering::SeqCst) {
            self.pending.remove(&id);
            return Err(RemoteError::Closed);
        }
        if self.outbound.send(ClientFrame::Call { id, request }).is_err() {
            self.pending.remove(&id);
            return Err(RemoteError::Closed);
        }
        Ok(id)
    }

    /// Send a call whose reply nobody waits for.
    fn detach(&self, request: Request) {
        let id = self.next_id();
        let _ = self.outbound.send(ClientFrame::Call { id, request });
    }

    fn cancel(&self, id: CallId) {
        self.pending.remove(&id);
        let _ = self.outbound.send(ClientFrame::Cancel { id });
    }

    fn deliver(&self, frame: AgentFrame) {
        match frame {
            AgentFrame::Reply { id, response } => {
                if let Some(entry) = self.pending.get(&id) {
                    if let Pending::Stream(tx) = entry.value() {
                        let _ = tx.send(Incoming::Reply(response));
                        return;
                    }
                }
                match self.pending.remove(&id) {
                    Some((_, Pending::Unary(tx))) => {
                        if let Err(response) = tx.send(response) {
                            self.release_orphan(response);
                        }
                    }
                    _ => self.release_orphan(response),
                }
            }
            AgentFrame::Item { id, item } => {
                if let Some(entry) = self.pending.get(&id) {
                    if let Pending::Stream(tx) = entry.value() {
                        let _ = tx.send(Incoming::Item(item));
                    }
                }
            }
            AgentFrame::End { id } => {
                self.pending.remove(&id);
            }
        }
    }

    /// A reply arrived after its caller gave up. An opened handle would
    /// otherwise stay open on the agent for the rest of the session.
    fn release_orphan(&self, response: Response) {
        if let Some(handle) = response.opened_handle() {
            debug!(handle, "closing handle opened by a cancelled call");
            self.detach(Request::Handle {
                handle,
                op: HandleRequest::Close,
            });
        }
    }
}

async fn write_loop(
    mut frames: mpsc::UnboundedReceiver<ClientFrame>,
    sender: FrameSender,
    shared: Arc<Shared>,
) {
    while let Some(frame) = frames.recv().await {
        let bytes = match encode(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode client frame");
                if let ClientFrame::Call { id, .. } = frame {
                    shared.pending.remove(&id);
                }
                continue;
            }
        };
        if sender.send(bytes).await.is_err() {
            debug!("agent channel closed, writer exiting");
            break;
        }
    }
}

async fn read_loop(mut receiver: FrameReceiver, shared: Arc<Shared>) {
    while let Some(bytes) = receiver.recv().await {
        match decode::<AgentFrame>(&bytes) {
            Ok(frame) => shared.deliver(frame),
            Err(e) => warn!(error = %e, "dropping undecodable frame"),
        }
    }
    info!("agent connection closed");
    shared.closed.store(true, Ordering::SeqCst);
    // Dropping the senders wakes every waiter with `Closed`.
    shared.pending.clear();
}

// ============================================================================
// Client
// ============================================================================

struct ClientInner {
    shared: Arc<Shared>,
    reader: AbortHandle,
    writer: AbortHandle,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Disarmed on completion; otherwise cancels the call when dropped.
struct CallGuard<'a> {
    shared: &'a Shared,
    id: CallId,
    armed: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.cancel(self.id);
        }
    }
}

impl ClientInner {
    async fn call(&self, request: Request) -> Result<Response, RemoteError> {
        let (tx, rx) = oneshot::channel();
        let id = self.shared.start(request, Pending::Unary(tx))?;
        let mut guard = CallGuard {
            shared: &self.shared,
            id,
            armed: true,
        };
        let response = rx.await;
        guard.armed = false;
        response.map_err(|_| RemoteError::Closed)
    }

    fn open_stream(self: &Arc<Self>, request: Request) -> Result<CallStream, RemoteError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.shared.start(request, Pending::Stream(tx))?;
        Ok(CallStream {
            inner: Arc::clone(self),
            id,
            rx,
            ended: false,
        })
    }
}

/// Frames of one streaming call. Cancels the call if dropped early.
struct CallStream {
    inner: Arc<ClientInner>,
    id: CallId,
    rx: mpsc::UnboundedReceiver<Incoming>,
    ended: bool,
}

impl Stream for CallStream {
    type Item = Incoming;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Incoming>> {
        let polled = self.rx.poll_recv(cx);
        if let Poll::Ready(None) = polled {
            self.ended = true;
        }
        polled
    }
}

impl Drop for CallStream {
    fn drop(&mut self) {
        if !self.ended {
            debug!(call = self.id, "stream dropped, cancelling");
            self.inner.shared.cancel(self.id);
        }
    }
}

fn transport_error(path: &EnvPath, err: RemoteError) -> FsError {
    FsError::other(path.clone(), err.to_string())
}

fn unexpected(expected: &'static str, got: &Response) -> RemoteError {
    RemoteError::UnexpectedResponse {
        expected,
        got: got.name(),
    }
}

/// Forward `$request` and unwrap the `$variant` reply. Channel failures
/// become the operation's `Other` error at `$path`.
macro_rules! rpc {
    ($inner:expr, $path:expr, $request:expr, $variant:ident) => {
        match $inner.call($request).await {
            Ok(Response::$variant(result)) => result,
            Ok(other) => Err(transport_error($path, unexpected(stringify!($variant), &other)).into()),
            Err(e) => Err(transport_error($path, e).into()),
        }
    };
}

/// A POSIX environment served by a remote [`Agent`](super::Agent).
#[derive(Clone)]
pub struct RemoteFileSystem {
    inner: Arc<ClientInner>,
    descriptor: Descriptor,
    supports_watching: bool,
}

impl RemoteFileSystem {
    /// Start the I/O tasks on `channel` and perform the handshake.
    pub async fn connect(channel: Channel) -> Result<Self, RemoteError> {
        let (sender, receiver) = channel.split();
        let (outbound, frames) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            outbound,
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });
        let writer = tokio::spawn(write_loop(frames, sender, Arc::clone(&shared))).abort_handle();
        let reader = tokio::spawn(read_loop(receiver, Arc::clone(&shared))).abort_handle();
        let inner = Arc::new(ClientInner {
            shared,
            reader,
            writer,
        });

        let (descriptor, supports_watching) = match inner.call(Request::Hello).await? {
            Response::Hello {
                descriptor,
                supports_watching,
            } => (descriptor, supports_watching),
            other => return Err(RemoteError::Handshake(unexpected("Hello", &other).to_string())),
        };
        if descriptor.os_family != OsFamily::Posix {
            return Err(RemoteError::Handshake(format!(
                "agent serves {}, only POSIX environments are supported",
                descriptor.os_family
            )));
        }
        info!(environment = %descriptor, supports_watching, "connected to agent");

        Ok(Self {
            inner,
            descriptor,
            supports_watching,
        })
    }

    fn handle(&self, id: HandleId, path: EnvPath, capability: Capability) -> RemoteHandle {
        RemoteHandle {
            inner: Arc::clone(&self.inner),
            id,
            path,
            capability,
            closed: false,
        }
    }

    fn unsupported(&self) -> WatchError {
        WatchError::unsupported(self.descriptor.to_string())
    }

    async fn watch_call(&self, request: Request) -> Result<bool, WatchError> {
        if !self.supports_watching {
            return Err(self.unsupported());
        }
        match self.inner.call(request).await {
            Ok(Response::Watch(result)) => result,
            Ok(other) => Err(WatchError::Failed(unexpected("Watch", &other).to_string())),
            Err(e) => Err(WatchError::Failed(e.to_string())),
        }
    }
}

impl std::fmt::Debug for RemoteFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFileSystem")
            .field("descriptor", &self.descriptor)
            .field("supports_watching", &self.supports_watching)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl FileSystemApi for RemoteFileSystem {
    type Info = PosixFileInfo;
    type Permissions = PosixPermissions;

    fn descriptor(&self) -> Descriptor {
        self.descriptor
    }

    fn supports_watching(&self) -> bool {
        self.supports_watching
    }

    async fn list_directory(&self, path: &EnvPath) -> Result<Vec<String>, ListDirectoryError> {
        rpc!(self.inner, path, Request::ListDirectory { path: path.clone() }, ListDirectory)
    }

    async fn list_directory_with_attrs(
        &self,
        args: ListDirectoryWithAttrsArgs,
    ) -> Result<Vec<(String, PosixFileInfo)>, ListDirectoryError> {
        let path = args.path.clone();
        rpc!(self.inner, &path, Request::ListDirectoryWithAttrs(args), ListDirectoryWithAttrs)
    }

    async fn canonicalize(&self, path: &EnvPath) -> Result<EnvPath, CanonicalizeError> {
        rpc!(self.inner, path, Request::Canonicalize { path: path.clone() }, Canonicalize)
    }

    async fn stat(&self, args: StatArgs) -> Result<PosixFileInfo, StatError> {
        let path = args.path.clone();
        rpc!(self.inner, &path, Request::Stat(args), Stat)
    }

    async fn same_file(&self, a: &EnvPath, b: &EnvPath) -> Result<bool, SameFileError> {
        let request = Request::SameFile {
            a: a.clone(),
            b: b.clone(),
        };
        rpc!(self.inner, a, request, SameFile)
    }

    async fn open_for_reading(
        &self,
        path: &EnvPath,
    ) -> Result<BoxReader<PosixFileInfo>, OpenReadError> {
        let request = Request::OpenForReading { path: path.clone() };
        let id = rpc!(self.inner, path, request, OpenedForReading)?;
        Ok(Box::new(self.handle(id, path.clone(), Capability::Reader)))
    }

    async fn open_for_writing(
        &self,
        options: WriteOptions,
    ) -> Result<BoxWriter<PosixFileInfo>, OpenWriteError> {
        let path = options.path.clone();
        let id = rpc!(self.inner, &path, Request::OpenForWriting(options), OpenedForWriting)?;
        Ok(Box::new(self.handle(id, path, Capability::Writer)))
    }

    async fn open_for_reading_and_writing(
        &self,
        options: WriteOptions,
    ) -> Result<BoxReaderWriter<PosixFileInfo>, OpenWriteError> {
        let path = options.path.clone();
        let request = Request::OpenForReadingAndWriting(options);
        let id = rpc!(self.inner, &path, request, OpenedForWriting)?;
        Ok(Box::new(self.handle(id, path, Capability::ReaderWriter)))
    }

    async fn read_fully(
        &self,
        path: &EnvPath,
        limit: u64,
        overflow: OverflowPolicy,
    ) -> Result<ReadFullyOutcome, ReadFullyError> {
        let request = Request::ReadFully {
            path: path.clone(),
            limit,
            overflow,
        };
        rpc!(self.inner, path, request, ReadFully)
    }

    async fn delete(
        &self,
        path: &EnvPath,
        remove_content_recursively: bool,
    ) -> Result<(), DeleteError> {
        let request = Request::Delete {
            path: path.clone(),
            recursive: remove_content_recursively,
        };
        rpc!(self.inner, path, request, Delete)
    }

    async fn copy(&self, options: CopyOptions) -> Result<(), CopyError> {
        let path = options.source.clone();
        rpc!(self.inner, &path, Request::Copy(options), Copy)
    }

    async fn move_entry(&self, args: MoveArgs) -> Result<(), MoveError> {
        let path = args.source.clone();
        rpc!(self.inner, &path, Request::Move(args), Move)
    }

    async fn change_attributes(
        &self,
        options: ChangeAttributesOptions,
    ) -> Result<(), ChangeAttributesError> {
        let path = options.path.clone();
        rpc!(self.inner, &path, Request::ChangeAttributes(options), ChangeAttributes)
    }

    async fn create_temporary_directory(
        &self,
        options: CreateTemporaryEntryOptions,
    ) -> Result<EnvPath, CreateTemporaryEntryError> {
        let path = options
            .parent_directory
            .clone()
            .unwrap_or_else(|| EnvPath::root_of(self.descriptor));
        rpc!(self.inner, &path, Request::CreateTemporaryDirectory(options), TemporaryEntry)
    }

    async fn create_temporary_file(
        &self,
        options: CreateTemporaryEntryOptions,
    ) -> Result<EnvPath, CreateTemporaryEntryError> {
        let path = options
            .parent_directory
            .clone()
            .unwrap_or_else(|| EnvPath::root_of(self.descriptor));
        rpc!(self.inner, &path, Request::CreateTemporaryFile(options), TemporaryEntry)
    }

    async fn disk_info(&self, path: &EnvPath) -> Result<DiskInfo, DiskInfoError> {
        rpc!(self.inner, path, Request::DiskInfo { path: path.clone() }, DiskInfo)
    }

    fn directory_hash(&self, path: &EnvPath) -> DirectoryHashStream {
        let inner = Arc::clone(&self.inner);
        let path = path.clone();
        // Nothing is sent until the stream is first polled.
        stream::once(async move {
            let opened = inner.open_stream(Request::DirectoryHash { path: path.clone() });
            (opened, path)
        })
        .flat_map(|(opened, path)| match opened {
            Ok(calls) => calls
                .filter_map(|incoming| {
                    futures::future::ready(match incoming {
                        Incoming::Item(StreamItem::Hash(entry)) => Some(entry),
                        _ => None,
                    })
                })
                .boxed(),
            Err(e) => {
                let entry = DirectoryHashEntry::Error(transport_error(&path, e).into());
                stream::iter([entry]).boxed()
            }
        })
        .boxed()
    }

    async fn add_watch_roots(&self, options: WatchOptions) -> Result<bool, WatchError> {
        self.watch_call(Request::AddWatchRoots(options)).await
    }

    async fn unwatch(&self, options: UnwatchOptions) -> Result<bool, WatchError> {
        self.watch_call(Request::Unwatch(options)).await
    }

    fn watch_changes(&self) -> Result<ChangeStream, WatchError> {
        if !self.supports_watching {
            return Err(self.unsupported());
        }
        // Subscribed eagerly, like a local subscription.
        let calls = self
            .inner
            .open_stream(Request::WatchChanges)
            .map_err(|e| WatchError::Failed(e.to_string()))?;
        Ok(calls
            .take_while(|incoming| {
                let keep = match incoming {
                    Incoming::Reply(Response::Subscribed(Err(e))) => {
                        warn!(error = %e, "agent refused watch subscription");
                        false
                    }
                    _ => true,
                };
                futures::future::ready(keep)
            })
            .filter_map(|incoming| {
                futures::future::ready(match incoming {
                    Incoming::Item(StreamItem::Change(change)) => Some(change),
                    _ => None,
                })
            })
            .boxed())
    }
}

#[async_trait]
impl PosixFileSystemApi for RemoteFileSystem {
    async fn create_directory(
        &self,
        path: &EnvPath,
        permissions: Option<PosixPermissions>,
    ) -> Result<(), CreateDirectoryError> {
        let request = Request::CreateDirectory {
            path: path.clone(),
            permissions,
        };
        rpc!(self.inner, path, request, CreateDirectory)
    }

    async fn create_symbolic_link(
        &self,
        target: LinkTarget,
        link: &EnvPath,
    ) -> Result<(), CreateSymbolicLinkError> {
        let request = Request::CreateSymbolicLink {
            target,
            link: link.clone(),
        };
        rpc!(self.inner, link, request, CreateSymbolicLink)
    }
}

// ============================================================================
// Handles
// ============================================================================

/// A handle held open by the agent.
pub struct RemoteHandle {
    inner: Arc<ClientInner>,
    id: HandleId,
    path: EnvPath,
    capability: Capability,
    closed: bool,
}

impl RemoteHandle {
    async fn op(&self, op: HandleRequest) -> Result<Response, FsError> {
        if self.closed {
            return Err(FsError::new(
                FsErrorKind::UnknownFile,
                self.path.clone(),
                "handle is closed",
            ));
        }
        self.inner
            .call(Request::Handle { handle: self.id, op })
            .await
            .map_err(|e| transport_error(&self.path, e))
    }

    fn unexpected(&self, expected: &'static str, got: &Response) -> FsError {
        transport_error(&self.path, unexpected(expected, got))
    }

    fn fill(&self, buf: &mut [u8], response: Response) -> Result<ReadOutcome, ReadError> {
        match response {
            Response::Read(result) => {
                let (data, status) = result?;
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(ReadOutcome {
                    bytes_read: n,
                    status,
                })
            }
            other => Err(self.unexpected("Read", &other).into()),
        }
    }

    fn written(&self, response: Response) -> Result<usize, WriteError> {
        match response {
            Response::Written(result) => Ok(result? as usize),
            other => Err(self.unexpected("Written", &other).into()),
        }
    }
}

impl Drop for RemoteHandle {
    fn drop(&mut self) {
        if !self.closed {
            debug!(handle = self.id, path = %self.path, "remote handle dropped without close");
            self.inner.shared.detach(Request::Handle {
                handle: self.id,
                op: HandleRequest::Close,
            });
        }
    }
}

#[async_trait]
impl FileHandle for RemoteHandle {
    type Info = PosixFileInfo;

    fn path(&self) -> &EnvPath {
        &self.path
    }

    fn capability(&self) -> Capability {
        self.capability
    }

    async fn tell(&mut self) -> Result<u64, TellError> {
        match self.op(HandleRequest::Tell).await? {
            Response::Tell(result) => result,
            other => Err(self.unexpected("Tell", &other).into()),
        }
    }

    async fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, SeekError> {
        match self.op(HandleRequest::Seek { offset, whence }).await? {
            Response::Seek(result) => result,
            other => Err(self.unexpected("Seek", &other).into()),
        }
    }

    async fn stat(&mut self) -> Result<PosixFileInfo, StatError> {
        match self.op(HandleRequest::Stat).await? {
            Response::HandleStat(result) => result,
            other => Err(self.unexpected("HandleStat", &other).into()),
        }
    }

    async fn close(&mut self) -> Result<(), CloseError> {
        if self.closed {
            return Err(FsError::new(
                FsErrorKind::UnknownFile,
                self.path.clone(),
                "handle is already closed",
            )
            .into());
        }
        let response = self.op(HandleRequest::Close).await;
        self.closed = true;
        match response? {
            Response::Close(result) => result,
            other => Err(self.unexpected("Close", &other).into()),
        }
    }
}

#[async_trait]
impl FileReader for RemoteHandle {
    async fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, ReadError> {
        let len = buf.len().min(MAX_CHUNK) as u32;
        let response = self.op(HandleRequest::Read { len }).await?;
        self.fill(buf, response)
    }

    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<ReadOutcome, ReadError> {
        let len = buf.len().min(MAX_CHUNK) as u32;
        let response = self.op(HandleRequest::ReadAt { len, offset }).await?;
        self.fill(buf, response)
    }
}

#[async_trait]
impl FileWriter for RemoteHandle {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, WriteError> {
        let data = buf[..buf.len().min(MAX_CHUNK)].to_vec();
        let response = self.op(HandleRequest::Write { data }).await?;
        self.written(response)
    }

    async fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize, WriteError> {
        let data = buf[..buf.len().min(MAX_CHUNK)].to_vec();
        let response = self.op(HandleRequest::WriteAt { data, offset }).await?;
        self.written(response)
    }

    async fn flush(&mut self) -> Result<(), FlushError> {
        match self.op(HandleRequest::Flush).await? {
            Response::Flush(result) => result,
            other => Err(self.unexpected("Flush", &other).into()),
        }
    }

    async fn truncate(&mut self, size: u64) -> Result<(), TruncateError> {
        match self.op(HandleRequest::Truncate { size }).await? {
            Response::Truncate(result) => result,
            other => Err(self.unexpected("Truncate", &other).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::Agent;
    use crate::local::LocalFileSystem;

    async fn pair() -> (RemoteFileSystem, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let (client_end, agent_end) = Channel::pair(16);
        tokio::spawn(Agent::new(Arc::new(LocalFileSystem::new())).serve(agent_end));
        (RemoteFileSystem::connect(client_end).await.unwrap(), dir)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_handshake_reports_agent_environment() {
        let (remote, _dir) = pair().await;
        assert_eq!(remote.descriptor(), Descriptor::local());
        assert!(remote.supports_watching());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_calls_fail_after_agent_goes_away() {
        let (client_end, agent_end) = Channel::pair(4);
        let agent = tokio::spawn(Agent::new(Arc::new(LocalFileSystem::new())).serve(agent_end));
        let remote = RemoteFileSystem::connect(client_end).await.unwrap();
        agent.abort();
        let _ = agent.await;

        let root = EnvPath::root_of(remote.descriptor());
        let err = remote.list_directory(&root).await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::Other);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropped_call_does_not_leak_pending_slot() {
        let (remote, dir) = pair().await;
        let path = EnvPath::parse(dir.path().to_str().unwrap(), remote.descriptor()).unwrap();
        {
            let hashes = remote.directory_hash(&path);
            drop(hashes);
        }
        remote.list_directory(&path).await.unwrap();
        assert!(remote.inner.shared.pending.is_empty());
    }
}
