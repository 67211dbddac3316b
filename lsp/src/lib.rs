//! Client side of the Tempo language server.
//!
//! A host activates a [`SessionManager`] with an [`ExtensionContext`]; the
//! manager launches the server, runs the handshake, forwards matching
//! document and file events, and shuts the server down on deactivation.

pub mod codec;
pub mod filter;
pub mod host;
pub mod invocation;
pub mod types;

pub(crate) mod diagnostics;
pub(crate) mod protocol;
pub(crate) mod session;

mod error;
mod manager;
mod signal;

pub use error::{CodecError, HostError, LifecycleError, SessionError};
pub use filter::{DocumentSelector, EventFilter, FileWatchPattern};
pub use host::{ExtensionContext, FileWatcher};
pub use invocation::{ExecutionMode, InvocationConfig, ServerOptions};
pub use manager::SessionManager;
pub use signal::{StartSignal, StopSignal};
pub use types::{
    ClientIdentity, ClientSettings, Diagnostic, DiagnosticSeverity, DiagnosticsSnapshot,
    ExitReason, FileChangeType, FileEvent, MessageType, ServerInfo, ServerOverride, SessionEvent,
    SessionState, ShutdownReport, StopOutcome, TextDocumentItem,
};
