//! Session task: owns the server child process and speaks the protocol.
//!
//! [`launch`] spawns the process synchronously so a missing toolchain is
//! reported to the caller at once. Everything after that (handshake,
//! forwarding, shutdown) runs on a background task that the manager drives
//! through a command channel. Commands sent while the handshake is still in
//! flight wait in the channel and are handled in order once it completes.

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use std::{env, io};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use url::Url;

use crate::codec::{FrameReader, FrameWriter};
use crate::error::SessionError;
use crate::invocation::InvocationConfig;
use crate::protocol::{self, MessageParams, Notification, PublishDiagnosticsParams, Request};
use crate::signal::StartSignal;
use crate::types::{
    ClientIdentity, ClientSettings, ExitReason, MessageType, ServerInfo, SessionEvent,
    SessionState, ShutdownReport,
};

const WRITER_CHANNEL_CAPACITY: usize = 64;

enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

/// Work for the session task.
pub(crate) enum SessionCommand {
    Notify {
        method: &'static str,
        params: serde_json::Value,
    },
    Shutdown {
        reply: oneshot::Sender<ShutdownReport>,
    },
}

/// Requests awaiting a response. Closed once the reader has seen EOF so
/// new requests fail fast instead of waiting out their timeout.
#[derive(Default)]
struct Pending {
    closed: bool,
    waiters: HashMap<u64, oneshot::Sender<serde_json::Value>>,
}

type PendingMap = Arc<Mutex<Pending>>;

enum RequestFailure {
    Closed,
    TimedOut,
    Encode(serde_json::Error),
}

enum IncomingFrame {
    Response {
        id: u64,
        body: serde_json::Value,
    },
    ServerRequest {
        id: serde_json::Value,
        method: String,
        params: Option<serde_json::Value>,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

fn parse_incoming(frame: &serde_json::Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let is_response = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, is_response) {
        (Some(id), None, true) => Some(IncomingFrame::Response {
            id: id.as_u64()?,
            body: frame.clone(),
        }),
        (Some(id), Some(method), _) => Some(IncomingFrame::ServerRequest {
            id: id.clone(),
            method,
            params: frame.get("params").cloned(),
        }),
        (None, Some(method), _) => Some(IncomingFrame::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        _ => None,
    }
}

fn describe_exit(status: Option<ExitStatus>) -> String {
    status.map_or_else(|| "status unknown".to_string(), |s| s.to_string())
}

/// The manager's side of a launched session.
pub(crate) struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    state: watch::Receiver<SessionState>,
    /// Set once if the server dies on its own. Kept apart from the event
    /// channel so a full queue cannot swallow it.
    exit: Option<oneshot::Receiver<ExitReason>>,
    pid: Option<u32>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Queue a notification. `false` once the session task has ended.
    pub fn notify(&self, method: &'static str, params: serde_json::Value) -> bool {
        self.commands
            .send(SessionCommand::Notify { method, params })
            .is_ok()
    }

    /// Take the reason the server exited unexpectedly, if it has.
    pub fn take_exit(&mut self) -> Option<ExitReason> {
        let exit = self.exit.as_mut()?;
        match exit.try_recv() {
            Ok(reason) => {
                self.exit = None;
                Some(reason)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.exit = None;
                None
            }
        }
    }

    /// Ask the session to shut down. `None` when the task has already ended.
    pub fn shutdown(&self) -> Option<oneshot::Receiver<ShutdownReport>> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Shutdown { reply })
            .ok()
            .map(|()| rx)
    }
}

#[cfg(test)]
impl SessionHandle {
    /// A handle whose session task has already ended, plus the sender for
    /// its exit reason.
    pub(crate) fn detached() -> (Self, oneshot::Sender<ExitReason>) {
        let (commands, _) = mpsc::unbounded_channel();
        let (_, state) = watch::channel(SessionState::Stopped);
        let (exit_tx, exit_rx) = oneshot::channel();
        let handle = Self {
            commands,
            state,
            exit: Some(exit_rx),
            pid: None,
        };
        (handle, exit_tx)
    }
}

/// Spawn the server and start the handshake in the background.
pub(crate) fn launch(
    identity: &ClientIdentity,
    invocation: &InvocationConfig,
    settings: &ClientSettings,
    events: mpsc::Sender<SessionEvent>,
) -> Result<(SessionHandle, StartSignal), SessionError> {
    let working_dir = invocation.working_dir();
    let resolved = which::which_in(
        invocation.command(),
        env::var_os("PATH"),
        working_dir,
    )
    .map_err(|source| SessionError::BinaryNotFound {
        command: invocation.command().to_string(),
        source,
    })?;

    tracing::info!(
        server = %identity.id(),
        command = %resolved.display(),
        args = ?invocation.args(),
        cwd = %working_dir.display(),
        "Spawning language server"
    );

    let mut child = Command::new(&resolved)
        .args(invocation.args())
        .current_dir(working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| spawn_error(invocation, source))?;

    let pid = child.id();
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| spawn_error(invocation, io::Error::other("stdin not captured")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| spawn_error(invocation, io::Error::other("stdout not captured")))?;
    let stderr = child.stderr.take();

    let server = identity.id().to_string();
    let pending = PendingMap::default();
    let (writer_tx, writer_rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
    let (closed_tx, closed_rx) = oneshot::channel();

    tokio::spawn(write_loop(stdin, writer_rx, server.clone()));
    tokio::spawn(read_loop(
        stdout,
        pending.clone(),
        events.clone(),
        writer_tx.clone(),
        server.clone(),
        closed_tx,
    ));
    if let Some(stderr) = stderr {
        tokio::spawn(log_stderr(stderr, server.clone()));
    }

    let (state_tx, state_rx) = watch::channel(SessionState::Starting);
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel();
    let (exit_tx, exit_rx) = oneshot::channel();

    let root_uri = settings.workspace_root.as_deref().and_then(|root| {
        let uri = protocol::path_to_file_uri(root);
        if uri.is_none() {
            tracing::warn!(
                "Workspace root {} is not absolute; sending no rootUri",
                root.display()
            );
        }
        uri
    });

    let session = Session {
        server,
        child,
        writer_tx,
        pending,
        next_id: 1,
        state: state_tx,
        exit: Some(exit_tx),
        initialize_timeout: settings.initialize_timeout(),
        shutdown_timeout: settings.shutdown_timeout(),
    };
    tokio::spawn(session.run(
        identity.clone(),
        root_uri,
        commands_rx,
        closed_rx,
        ready_tx,
    ));

    let handle = SessionHandle {
        commands: commands_tx,
        state: state_rx,
        exit: Some(exit_rx),
        pid,
    };
    Ok((handle, StartSignal::new(ready_rx)))
}

fn spawn_error(invocation: &InvocationConfig, source: io::Error) -> SessionError {
    SessionError::Spawn {
        command: invocation.command().to_string(),
        working_dir: invocation.working_dir().to_path_buf(),
        source,
    }
}

async fn write_loop(stdin: ChildStdin, mut rx: mpsc::Receiver<WriterCommand>, server: String) {
    let mut writer = FrameWriter::new(stdin);
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Send(frame) => {
                if let Err(e) = writer.write_frame(&frame).await {
                    tracing::warn!(server = %server, "LSP write error: {e}");
                    break;
                }
            }
            WriterCommand::Shutdown => {
                let _ = writer.close().await;
                break;
            }
        }
    }
}

async fn read_loop(
    stdout: ChildStdout,
    pending: PendingMap,
    events: mpsc::Sender<SessionEvent>,
    writer_tx: mpsc::Sender<WriterCommand>,
    server: String,
    closed: oneshot::Sender<ExitReason>,
) {
    let mut reader = FrameReader::new(stdout);
    let reason = loop {
        match reader.read_frame().await {
            Ok(Some(frame)) => {
                dispatch_frame(&frame, &pending, &events, &writer_tx, &server).await;
            }
            Ok(None) => {
                tracing::debug!(server = %server, "Language server closed stdout");
                break ExitReason::Exited;
            }
            Err(e) => {
                tracing::warn!(server = %server, "LSP read error: {e}");
                break ExitReason::Failed(e.to_string());
            }
        }
    };

    {
        let mut pending = pending.lock().await;
        pending.closed = true;
        // Dropping the senders wakes every waiter with a closed channel.
        pending.waiters.clear();
    }
    let _ = closed.send(reason);
}

async fn log_stderr(stderr: ChildStderr, server: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(server = %server, "stderr: {line}");
    }
}

async fn dispatch_frame(
    frame: &serde_json::Value,
    pending: &Mutex<Pending>,
    events: &mpsc::Sender<SessionEvent>,
    writer_tx: &mpsc::Sender<WriterCommand>,
    server: &str,
) {
    let Some(incoming) = parse_incoming(frame) else {
        tracing::trace!(server = %server, "Ignoring malformed JSON-RPC frame");
        return;
    };

    match incoming {
        IncomingFrame::Response { id, body } => {
            let waiter = pending.lock().await.waiters.remove(&id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(body);
                }
                None => tracing::trace!(server = %server, id, "Response for unknown request"),
            }
        }
        IncomingFrame::ServerRequest { id, method, params } => {
            let reply = answer_server_request(&id, &method, params.as_ref());
            let _ = writer_tx.send(WriterCommand::Send(reply)).await;
        }
        IncomingFrame::Notification { method, params } => {
            handle_notification(server, &method, params, events);
        }
    }
}

/// Servers block on some requests until answered, so every request gets a
/// reply: a neutral result where one exists, "method not found" otherwise.
fn answer_server_request(
    id: &serde_json::Value,
    method: &str,
    params: Option<&serde_json::Value>,
) -> serde_json::Value {
    match method {
        "client/registerCapability"
        | "client/unregisterCapability"
        | "window/workDoneProgress/create" => protocol::response(id, serde_json::Value::Null),
        "workspace/configuration" => {
            let items = params
                .and_then(|p| p["items"].as_array())
                .map_or(0, Vec::len);
            protocol::response(id, serde_json::Value::Array(vec![serde_json::Value::Null; items]))
        }
        _ => {
            tracing::debug!("Server request {method} is not supported; replying method not found");
            protocol::error_response(
                id,
                protocol::METHOD_NOT_FOUND,
                &format!("Method not found: {method}"),
            )
        }
    }
}

fn handle_notification(
    server: &str,
    method: &str,
    params: Option<serde_json::Value>,
    events: &mpsc::Sender<SessionEvent>,
) {
    let Some(params) = params else {
        tracing::trace!(server = %server, "Notification {method} without params");
        return;
    };

    let event = match method {
        "textDocument/publishDiagnostics" => {
            match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                Ok(published) => match Url::parse(&published.uri) {
                    Ok(uri) => SessionEvent::Diagnostics {
                        uri,
                        items: published
                            .diagnostics
                            .iter()
                            .map(protocol::LspDiagnostic::to_diagnostic)
                            .collect(),
                    },
                    Err(e) => {
                        tracing::debug!(server = %server, "Diagnostics for bad URI {}: {e}", published.uri);
                        return;
                    }
                },
                Err(e) => {
                    tracing::debug!(server = %server, "Failed to parse publishDiagnostics: {e}");
                    return;
                }
            }
        }
        "window/showMessage" => match serde_json::from_value::<MessageParams>(params) {
            Ok(message) => SessionEvent::Message {
                kind: MessageType::from_lsp(message.kind),
                text: message.message,
            },
            Err(e) => {
                tracing::debug!(server = %server, "Failed to parse showMessage: {e}");
                return;
            }
        },
        "window/logMessage" => {
            if let Ok(message) = serde_json::from_value::<MessageParams>(params) {
                match MessageType::from_lsp(message.kind) {
                    MessageType::Error => tracing::error!(server = %server, "{}", message.message),
                    MessageType::Warning => tracing::warn!(server = %server, "{}", message.message),
                    MessageType::Info => tracing::info!(server = %server, "{}", message.message),
                    MessageType::Log => tracing::debug!(server = %server, "{}", message.message),
                }
            }
            return;
        }
        _ => {
            tracing::trace!(server = %server, "Ignoring notification {method}");
            return;
        }
    };

    if let Err(e) = events.try_send(event) {
        tracing::warn!(server = %server, "Dropping session event: {e}");
    }
}

/// State owned by the background task.
struct Session {
    server: String,
    child: Child,
    writer_tx: mpsc::Sender<WriterCommand>,
    pending: PendingMap,
    next_id: u64,
    state: watch::Sender<SessionState>,
    exit: Option<oneshot::Sender<ExitReason>>,
    initialize_timeout: Duration,
    shutdown_timeout: Duration,
}

impl Session {
    async fn run(
        mut self,
        identity: ClientIdentity,
        root_uri: Option<Url>,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut closed: oneshot::Receiver<ExitReason>,
        ready: oneshot::Sender<Result<ServerInfo, SessionError>>,
    ) {
        match self.initialize(&identity, root_uri.as_ref()).await {
            Ok(info) => {
                tracing::info!(
                    server = %self.server,
                    name = info.name.as_deref().unwrap_or("unknown"),
                    version = info.version.as_deref().unwrap_or("unknown"),
                    "Language server running"
                );
                self.state.send_replace(SessionState::Running);
                let _ = ready.send(Ok(info));
            }
            Err(e) => {
                tracing::warn!(server = %self.server, "Language server failed to start: {e}");
                self.abandon().await;
                let _ = ready.send(Err(e));
                return;
            }
        }

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Notify { method, params }) => {
                        if self.send_notification(method, Some(params)).await.is_err() {
                            tracing::debug!(server = %self.server, "Dropped {method}: writer closed");
                        }
                    }
                    Some(SessionCommand::Shutdown { reply }) => {
                        let report = self.shutdown().await;
                        let _ = reply.send(report);
                        return;
                    }
                    None => {
                        tracing::debug!(server = %self.server, "Session handle dropped; shutting down");
                        self.shutdown().await;
                        return;
                    }
                },
                reason = &mut closed => {
                    let reason = reason.unwrap_or(ExitReason::Exited);
                    let status = self.reap().await;
                    tracing::warn!(
                        server = %self.server,
                        status = %describe_exit(status),
                        "Language server exited unexpectedly"
                    );
                    self.state.send_replace(SessionState::Stopped);
                    if let Some(exit) = self.exit.take() {
                        let _ = exit.send(reason);
                    }
                    return;
                }
            }
        }
    }

    async fn initialize(
        &mut self,
        identity: &ClientIdentity,
        root_uri: Option<&Url>,
    ) -> Result<ServerInfo, SessionError> {
        let params = protocol::initialize_params(identity, root_uri);
        let response = match self
            .request("initialize", Some(params), self.initialize_timeout)
            .await
        {
            Ok(response) => response,
            Err(RequestFailure::TimedOut) => {
                return Err(SessionError::Timeout {
                    method: "initialize",
                    secs: self.initialize_timeout.as_secs(),
                });
            }
            Err(RequestFailure::Closed) => {
                let status = self.reap().await;
                return Err(SessionError::ServerExited {
                    status: describe_exit(status),
                });
            }
            Err(RequestFailure::Encode(e)) => return Err(SessionError::Handshake(e.to_string())),
        };

        if let Some(error) = response.get("error") {
            return Err(SessionError::Handshake(
                error["message"]
                    .as_str()
                    .unwrap_or("unknown error")
                    .to_string(),
            ));
        }
        if response.get("result").is_none_or(serde_json::Value::is_null) {
            return Err(SessionError::Handshake(
                "initialize response carried no result".to_string(),
            ));
        }

        self.send_notification("initialized", Some(serde_json::json!({})))
            .await?;

        Ok(protocol::server_info(&response))
    }

    async fn request(
        &mut self,
        method: &'static str,
        params: Option<serde_json::Value>,
        limit: Duration,
    ) -> Result<serde_json::Value, RequestFailure> {
        let id = self.next_id;
        self.next_id += 1;

        let frame =
            serde_json::to_value(Request::new(id, method, params)).map_err(RequestFailure::Encode)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.closed {
                return Err(RequestFailure::Closed);
            }
            pending.waiters.insert(id, tx);
        }

        if self
            .writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .is_err()
        {
            self.pending.lock().await.waiters.remove(&id);
            return Err(RequestFailure::Closed);
        }

        match tokio::time::timeout(limit, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RequestFailure::Closed),
            Err(_) => {
                self.pending.lock().await.waiters.remove(&id);
                Err(RequestFailure::TimedOut)
            }
        }
    }

    async fn send_notification(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<(), SessionError> {
        let frame = serde_json::to_value(Notification::new(method, params))
            .map_err(|e| SessionError::Handshake(e.to_string()))?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| SessionError::ChannelClosed)
    }

    /// `shutdown` request, `exit` notification, then wait for the process.
    /// Each wait is bounded; a server that overstays is killed.
    async fn shutdown(&mut self) -> ShutdownReport {
        self.state.send_replace(SessionState::Stopping);
        tracing::info!(server = %self.server, "Shutting down language server");

        match self
            .request("shutdown", None, self.shutdown_timeout)
            .await
        {
            Ok(response) if response.get("error").is_none() => {
                let _ = self.send_notification("exit", None).await;
            }
            Ok(response) => {
                tracing::warn!(
                    server = %self.server,
                    "Server rejected shutdown: {}",
                    response["error"]["message"].as_str().unwrap_or("unknown error")
                );
            }
            Err(RequestFailure::TimedOut) => {
                tracing::debug!(server = %self.server, "No shutdown acknowledgement in time");
            }
            Err(RequestFailure::Closed | RequestFailure::Encode(_)) => {}
        }

        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;

        let report = match tokio::time::timeout(self.shutdown_timeout, self.child.wait()).await {
            Ok(Ok(status)) => ShutdownReport {
                status: Some(status),
                forced: false,
            },
            Ok(Err(e)) => {
                tracing::warn!(server = %self.server, "Failed to wait for language server: {e}");
                ShutdownReport {
                    status: None,
                    forced: false,
                }
            }
            Err(_) => {
                tracing::debug!(server = %self.server, "Language server didn't exit in time, killing");
                let _ = self.child.kill().await;
                ShutdownReport {
                    status: self.child.try_wait().ok().flatten(),
                    forced: true,
                }
            }
        };

        self.state.send_replace(SessionState::Stopped);
        tracing::info!(
            server = %self.server,
            status = %describe_exit(report.status),
            forced = report.forced,
            "Language server stopped"
        );
        report
    }

    /// Tear down after a failed handshake. Nothing graceful is attempted.
    async fn abandon(&mut self) {
        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill().await;
        }
        self.state.send_replace(SessionState::Stopped);
    }

    /// Collect the exit status of a process that is going away on its own.
    async fn reap(&mut self) -> Option<ExitStatus> {
        match tokio::time::timeout(self.shutdown_timeout, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(_)) => None,
            Err(_) => {
                let _ = self.child.kill().await;
                self.child.try_wait().ok().flatten()
            }
        }
    }
}
