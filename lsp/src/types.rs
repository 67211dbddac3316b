//! Public types exchanged with the host.
//!
//! The host builds [`ClientSettings`], drives the session with
//! [`TextDocumentItem`]s and [`FileEvent`]s, and reads back
//! [`SessionEvent`]s and [`DiagnosticsSnapshot`]s.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

const fn default_initialize_timeout_secs() -> u64 {
    30
}

const fn default_shutdown_timeout_secs() -> u64 {
    2
}

/// Client configuration. Every field has a default.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSettings {
    /// Launch the debug invocation instead of the run invocation.
    #[serde(default)]
    pub debug: bool,
    /// How long the `initialize` request may take.
    #[serde(default = "default_initialize_timeout_secs")]
    pub initialize_timeout_secs: u64,
    /// Bound on each shutdown phase before the process is killed.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Advertised to the server as `rootUri`.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    /// Replace the `go run` invocation with a prebuilt server.
    #[serde(default)]
    pub server: Option<ServerOverride>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            debug: false,
            initialize_timeout_secs: default_initialize_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            workspace_root: None,
            server: None,
        }
    }
}

impl ClientSettings {
    #[must_use]
    pub fn initialize_timeout(&self) -> Duration {
        Duration::from_secs(self.initialize_timeout_secs)
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Command and arguments that replace the default server invocation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerOverride {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Stable id and human-readable label of the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    id: String,
    name: String,
}

impl ClientIdentity {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn tempo() -> Self {
        Self::new("tempoLS", "Tempo Language Server")
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl SessionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Stopped
    }
}

/// `serverInfo` from the `initialize` result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// A document as the host hands it to `did_open`.
#[derive(Debug, Clone)]
pub struct TextDocumentItem {
    pub uri: Url,
    pub language_id: String,
    pub version: i32,
    pub text: String,
}

/// Kind of workspace file change, numbered as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeType {
    Created = 1,
    Changed = 2,
    Deleted = 3,
}

/// One workspace file change reported by the host watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub uri: Url,
    pub kind: FileChangeType,
}

impl FileEvent {
    #[must_use]
    pub fn new(uri: Url, kind: FileChangeType) -> Self {
        Self { uri, kind }
    }
}

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Map the numeric wire severity. Unknown values yield `None`.
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

/// A diagnostic published by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    severity: DiagnosticSeverity,
    message: String,
    /// 0-indexed.
    line: u32,
    /// 0-indexed.
    col: u32,
    source: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(
        severity: DiagnosticSeverity,
        message: String,
        line: u32,
        col: u32,
        source: String,
    ) -> Self {
        Self {
            severity,
            message,
            line,
            col,
            source,
        }
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    #[must_use]
    pub fn col(&self) -> u32 {
        self.col
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// `location:line:col: severity: [source] message`, 1-indexed.
    #[must_use]
    pub fn display_at(&self, location: &str) -> String {
        format!(
            "{location}:{}:{}: {}: [{}] {}",
            self.line + 1,
            self.col + 1,
            self.severity.label(),
            self.source,
            self.message,
        )
    }
}

/// `window/showMessage` level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Error,
    Warning,
    Info,
    Log,
}

impl MessageType {
    #[must_use]
    pub fn from_lsp(value: u64) -> Self {
        match value {
            1 => Self::Error,
            2 => Self::Warning,
            3 => Self::Info,
            _ => Self::Log,
        }
    }
}

/// Why the server process went away on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// stdout closed.
    Exited,
    /// The transport broke.
    Failed(String),
}

/// Something the session reports back to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Diagnostics { uri: Url, items: Vec<Diagnostic> },
    Message { kind: MessageType, text: String },
    Exited { reason: ExitReason },
}

/// How a graceful shutdown ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Exit status, if one could be collected.
    pub status: Option<ExitStatus>,
    /// The server did not exit in time and was killed.
    pub forced: bool,
}

/// What `stop()` ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// No session was ever started.
    NotStarted,
    /// The session had already ended (startup failure or server exit).
    AlreadyExited,
    Stopped(ShutdownReport),
}

impl StopOutcome {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NotStarted)
    }
}

/// Immutable view of all diagnostics.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSnapshot {
    /// Per-document diagnostics, documents with errors first.
    files: Vec<(Url, Vec<Diagnostic>)>,
}

impl DiagnosticsSnapshot {
    pub(crate) fn new(files: Vec<(Url, Vec<Diagnostic>)>) -> Self {
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &[(Url, Vec<Diagnostic>)] {
        &self.files
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn count_by_severity(&self, severity: DiagnosticSeverity) -> usize {
        self.files
            .iter()
            .flat_map(|(_, items)| items)
            .filter(|d| d.severity() == severity)
            .count()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Error)
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Warning)
    }

    #[must_use]
    pub fn total_count(&self) -> usize {
        self.files.iter().map(|(_, items)| items.len()).sum()
    }

    /// Compact status like "E:3 W:5"; empty when there is nothing to show.
    #[must_use]
    pub fn status_string(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        format!("E:{} W:{}", self.error_count(), self.warning_count())
    }
}
