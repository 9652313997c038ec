//! Remote-agent backend.
//!
//! An [`Agent`] serves any POSIX backend over a framed [`Channel`]; a
//! [`RemoteFileSystem`] on the other end implements the same contract by
//! forwarding every call. Handles live in the agent and are named by id on
//! the wire; streams (directory hashes, change events) arrive as item frames
//! and stop when the consumer drops them.
//!
//! ```text
//!   RemoteFileSystem ── Channel ── Agent ── Arc<dyn PosixFileSystemApi>
//!        (client)       frames     (one task per call)
//! ```

mod agent;
mod client;
pub mod protocol;
pub mod transport;

use std::sync::Arc;

pub use agent::Agent;
pub use client::{RemoteFileSystem, RemoteHandle};
pub use transport::Channel;

use crate::api::PosixFileSystemApi;
use crate::config::Config;

/// Failures of the channel itself, as opposed to the remote operation.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("failed to encode frame: {0}")]
    Encode(postcard::Error),

    #[error("failed to decode frame: {0}")]
    Decode(postcard::Error),

    #[error("agent connection closed")]
    Closed,

    #[error("expected {expected} response, got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },

    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// Serve `fs` through an in-process agent and connect a client to it.
///
/// The agent task runs until the returned client is dropped.
pub async fn loopback(
    fs: Arc<dyn PosixFileSystemApi>,
    config: &Config,
) -> Result<RemoteFileSystem, RemoteError> {
    let (client_end, agent_end) = Channel::pair(config.remote.stream_capacity);
    tokio::spawn(Agent::new(fs).serve(agent_end));
    RemoteFileSystem::connect(client_end).await
}
