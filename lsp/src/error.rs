//! Error types surfaced to the host.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Misuse of the start/stop sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// `start()` was called while a session already exists.
    #[error("language client already started")]
    AlreadyStarted,
    /// A lifecycle call arrived after the session was stopped.
    #[error("language client already stopped")]
    AlreadyStopped,
}

/// Failure reported by the host while registering a file watcher.
#[derive(Debug, Error)]
#[error("host rejected file watcher for '{pattern}': {message}")]
pub struct HostError {
    pub pattern: String,
    pub message: String,
}

/// Everything that can make activation fail.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The host context cannot be used to derive an invocation.
    #[error("invalid extension context: {0}")]
    Config(String),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("language server executable '{command}' not found")]
    BinaryNotFound {
        command: String,
        #[source]
        source: which::Error,
    },

    #[error("failed to spawn '{command}' in {}", working_dir.display())]
    Spawn {
        command: String,
        working_dir: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The server answered `initialize` with an error, or with garbage.
    #[error("initialize handshake failed: {0}")]
    Handshake(String),

    #[error("language server did not answer '{method}' within {secs}s")]
    Timeout { method: &'static str, secs: u64 },

    /// The process went away before the handshake completed.
    #[error("language server exited during startup ({status})")]
    ServerExited { status: String },

    /// The session task is gone; nothing is listening.
    #[error("session channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Framing failures on the stdio transport.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("reading header line")]
    Header(#[source] io::Error),

    #[error("reading frame body")]
    Body(#[source] io::Error),

    #[error("writing frame")]
    Write(#[source] io::Error),

    #[error("stream ended inside a header block")]
    TruncatedHeaders,

    #[error("missing Content-Length header")]
    MissingLength,

    #[error("invalid Content-Length value '{0}'")]
    InvalidLength(String),

    #[error("Content-Length {length} exceeds maximum {max}")]
    FrameTooLarge { length: usize, max: usize },

    #[error("malformed JSON-RPC body")]
    Json(#[source] serde_json::Error),
}
