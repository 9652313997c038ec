//! Wire messages between [`RemoteFileSystem`](super::RemoteFileSystem) and
//! [`Agent`](super::Agent).
//!
//! ```text
//!   client                                   agent
//!     │ ClientFrame::Call { id, request }  ──▶ │  spawn task
//!     │ ◀── AgentFrame::Reply { id, response } │  unary calls
//!     │ ◀── AgentFrame::Item  { id, item }     │  streaming calls,
//!     │ ◀── AgentFrame::End   { id }           │  zero or more items
//!     │ ClientFrame::Cancel { id }         ──▶ │  abort task
//! ```
//!
//! Every frame is one postcard-encoded message. Errors travel as the typed
//! per-operation enums, so a remote failure looks exactly like a local one.

use serde::{Deserialize, Serialize};

use envfs_types::{
    CanonicalizeError, ChangeAttributesError, ChangeAttributesOptions, CloseError, CopyError,
    CopyOptions, CreateDirectoryError, CreateSymbolicLinkError, CreateTemporaryEntryError,
    CreateTemporaryEntryOptions, DeleteError, Descriptor, DirectoryHashEntry, DiskInfo,
    DiskInfoError, EnvPath, FlushError, LinkTarget, ListDirectoryError,
    ListDirectoryWithAttrsArgs, MoveArgs, MoveError, OpenReadError, OpenWriteError,
    OverflowPolicy, PathChange, PosixFileInfo, PosixPermissions, ReadError, ReadFullyError,
    ReadFullyOutcome, ReadStatus, SameFileError, SeekError, StatArgs, StatError, TellError,
    TruncateError, UnwatchOptions, WatchError, WatchOptions, Whence, WriteError, WriteOptions,
};

/// Correlates a reply with its call. Chosen by the client.
pub type CallId = u64;

/// Names an open handle in the agent's table. Chosen by the agent.
pub type HandleId = u64;

/// Largest payload moved by one handle read or write.
pub const MAX_CHUNK: usize = 1024 * 1024;

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Handshake: who is the agent serving?
    Hello,

    ListDirectory {
        path: EnvPath,
    },
    ListDirectoryWithAttrs(ListDirectoryWithAttrsArgs),
    Canonicalize {
        path: EnvPath,
    },
    Stat(StatArgs),
    SameFile {
        a: EnvPath,
        b: EnvPath,
    },
    OpenForReading {
        path: EnvPath,
    },
    OpenForWriting(WriteOptions),
    OpenForReadingAndWriting(WriteOptions),
    ReadFully {
        path: EnvPath,
        limit: u64,
        overflow: OverflowPolicy,
    },
    Delete {
        path: EnvPath,
        recursive: bool,
    },
    Copy(CopyOptions),
    Move(MoveArgs),
    ChangeAttributes(ChangeAttributesOptions),
    CreateTemporaryDirectory(CreateTemporaryEntryOptions),
    CreateTemporaryFile(CreateTemporaryEntryOptions),
    DiskInfo {
        path: EnvPath,
    },
    CreateDirectory {
        path: EnvPath,
        permissions: Option<PosixPermissions>,
    },
    CreateSymbolicLink {
        target: LinkTarget,
        link: EnvPath,
    },
    AddWatchRoots(WatchOptions),
    Unwatch(UnwatchOptions),

    /// Streaming: `Hash` items, then `End`.
    DirectoryHash {
        path: EnvPath,
    },
    /// Streaming: a `Subscribed` reply, then `Change` items until cancelled.
    WatchChanges,

    /// An operation on an open handle.
    Handle {
        handle: HandleId,
        op: HandleRequest,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HandleRequest {
    Read { len: u32 },
    ReadAt { len: u32, offset: u64 },
    Write { data: Vec<u8> },
    WriteAt { data: Vec<u8>, offset: u64 },
    Seek { offset: i64, whence: Whence },
    Tell,
    Stat,
    Flush,
    Truncate { size: u64 },
    Close,
}

impl Request {
    /// Whether the agent answers with a stream of items.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Request::DirectoryHash { .. } | Request::WatchChanges)
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Hello {
        descriptor: Descriptor,
        supports_watching: bool,
    },
    ListDirectory(Result<Vec<String>, ListDirectoryError>),
    ListDirectoryWithAttrs(Result<Vec<(String, PosixFileInfo)>, ListDirectoryError>),
    Canonicalize(Result<EnvPath, CanonicalizeError>),
    Stat(Result<PosixFileInfo, StatError>),
    SameFile(Result<bool, SameFileError>),
    OpenedForReading(Result<HandleId, OpenReadError>),
    OpenedForWriting(Result<HandleId, OpenWriteError>),
    ReadFully(Result<ReadFullyOutcome, ReadFullyError>),
    Delete(Result<(), DeleteError>),
    Copy(Result<(), CopyError>),
    Move(Result<(), MoveError>),
    ChangeAttributes(Result<(), ChangeAttributesError>),
    TemporaryEntry(Result<EnvPath, CreateTemporaryEntryError>),
    DiskInfo(Result<DiskInfo, DiskInfoError>),
    CreateDirectory(Result<(), CreateDirectoryError>),
    CreateSymbolicLink(Result<(), CreateSymbolicLinkError>),
    Watch(Result<bool, WatchError>),
    Subscribed(Result<(), WatchError>),

    Read(Result<(Vec<u8>, ReadStatus), ReadError>),
    Written(Result<u64, WriteError>),
    Seek(Result<u64, SeekError>),
    Tell(Result<u64, TellError>),
    HandleStat(Result<PosixFileInfo, StatError>),
    Flush(Result<(), FlushError>),
    Truncate(Result<(), TruncateError>),
    Close(Result<(), CloseError>),
}

impl Response {
    /// Handle id carried by a successful open, if any.
    pub fn opened_handle(&self) -> Option<HandleId> {
        match self {
            Response::OpenedForReading(Ok(id)) | Response::OpenedForWriting(Ok(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Response::Hello { .. } => "Hello",
            Response::ListDirectory(_) => "ListDirectory",
            Response::ListDirectoryWithAttrs(_) => "ListDirectoryWithAttrs",
            Response::Canonicalize(_) => "Canonicalize",
            Response::Stat(_) => "Stat",
            Response::SameFile(_) => "SameFile",
            Response::OpenedForReading(_) => "OpenedForReading",
            Response::OpenedForWriting(_) => "OpenedForWriting",
            Response::ReadFully(_) => "ReadFully",
            Response::Delete(_) => "Delete",
            Response::Copy(_) => "Copy",
            Response::Move(_) => "Move",
            Response::ChangeAttributes(_) => "ChangeAttributes",
            Response::TemporaryEntry(_) => "TemporaryEntry",
            Response::DiskInfo(_) => "DiskInfo",
            Response::CreateDirectory(_) => "CreateDirectory",
            Response::CreateSymbolicLink(_) => "CreateSymbolicLink",
            Response::Watch(_) => "Watch",
            Response::Subscribed(_) => "Subscribed",
            Response::Read(_) => "Read",
            Response::Written(_) => "Written",
            Response::Seek(_) => "Seek",
            Response::Tell(_) => "Tell",
            Response::HandleStat(_) => "HandleStat",
            Response::Flush(_) => "Flush",
            Response::Truncate(_) => "Truncate",
            Response::Close(_) => "Close",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamItem {
    Hash(DirectoryHashEntry),
    Change(PathChange),
}

// ============================================================================
// Frames
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientFrame {
    Call { id: CallId, request: Request },
    Cancel { id: CallId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentFrame {
    Reply { id: CallId, response: Response },
    Item { id: CallId, item: StreamItem },
    End { id: CallId },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::transport::{decode, encode};
    use envfs_types::{ErrorDetail, StatArgs, SymlinkPolicy};

    fn p(s: &str) -> EnvPath {
        EnvPath::parse(s, Descriptor::local()).unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_call_frame_survives_the_wire() {
        let frame = ClientFrame::Call {
            id: 7,
            request: Request::Stat(
                StatArgs::builder(p("/etc/hosts"))
                    .symlink_policy(SymlinkPolicy::JustResolve)
                    .build(),
            ),
        };
        let bytes = encode(&frame).unwrap();
        match decode::<ClientFrame>(&bytes).unwrap() {
            ClientFrame::Call {
                id: 7,
                request: Request::Stat(args),
            } => {
                assert_eq!(args.path, p("/etc/hosts"));
                assert_eq!(args.symlink_policy, SymlinkPolicy::JustResolve);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_typed_error_survives_the_wire() {
        let frame = AgentFrame::Reply {
            id: 1,
            response: Response::Move(Err(MoveError::TargetIsDirectory(ErrorDetail::new(
                p("/srv/target"),
                "target is a directory",
            )))),
        };
        let bytes = encode(&frame).unwrap();
        let AgentFrame::Reply {
            response: Response::Move(Err(err)),
            ..
        } = decode::<AgentFrame>(&bytes).unwrap()
        else {
            panic!("wrong frame");
        };
        assert!(matches!(err, MoveError::TargetIsDirectory(_)));
        assert_eq!(err.path(), &p("/srv/target"));
    }

    #[test]
    fn test_opened_handle() {
        assert_eq!(Response::OpenedForReading(Ok(4)).opened_handle(), Some(4));
        assert_eq!(Response::Tell(Ok(4)).opened_handle(), None);
        assert!(Request::WatchChanges.is_streaming());
        assert!(!Request::Hello.is_streaming());
    }
}
