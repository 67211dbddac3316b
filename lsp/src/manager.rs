//! SessionManager: the public API the host drives.
//!
//! One manager per activation. It owns at most one session, built by
//! [`start`](SessionManager::start) and torn down by
//! [`stop`](SessionManager::stop). Both return immediately with a signal the
//! host can await.
//!
//! The lifecycle is `Unstarted → Starting → Running → Stopping → Stopped`.
//! Where the session lives is the state: `Unstarted` holds nothing,
//! `Active` holds the handle, `Stopped` has dropped it.

use std::collections::HashSet;

use tokio::sync::mpsc;
use url::Url;

use crate::diagnostics::DiagnosticsStore;
use crate::error::{LifecycleError, SessionError};
use crate::filter::EventFilter;
use crate::host::{ExtensionContext, WatchRegistration};
use crate::invocation::{ExecutionMode, ServerOptions};
use crate::protocol;
use crate::session::{self, SessionHandle};
use crate::signal::{StartSignal, StopSignal};
use crate::types::{
    ClientIdentity, ClientSettings, DiagnosticsSnapshot, FileEvent, SessionEvent, SessionState,
    StopOutcome, TextDocumentItem,
};

/// Channel capacity for events flowing from the session to the host.
const EVENT_CHANNEL_CAPACITY: usize = 256;

enum Lifecycle {
    Unstarted,
    Active(Box<ActiveSession>),
    Stopped,
}

struct ActiveSession {
    handle: SessionHandle,
    options: ServerOptions,
    filter: EventFilter,
    watcher: WatchRegistration,
    /// Documents accepted by `did_open` and not yet closed.
    open_documents: HashSet<Url>,
}

/// Owns the Tempo language session for one extension activation.
pub struct SessionManager {
    identity: ClientIdentity,
    settings: ClientSettings,
    lifecycle: Lifecycle,
    diagnostics: DiagnosticsStore,
    event_rx: mpsc::Receiver<SessionEvent>,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl SessionManager {
    #[must_use]
    pub fn new(settings: ClientSettings) -> Self {
        Self::with_identity(ClientIdentity::tempo(), settings)
    }

    #[must_use]
    pub fn with_identity(identity: ClientIdentity, settings: ClientSettings) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            identity,
            settings,
            lifecycle: Lifecycle::Unstarted,
            diagnostics: DiagnosticsStore::new(),
            event_rx,
            event_tx,
        }
    }

    #[must_use]
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        match &self.lifecycle {
            Lifecycle::Unstarted => SessionState::Unstarted,
            Lifecycle::Active(active) => active.handle.state(),
            Lifecycle::Stopped => SessionState::Stopped,
        }
    }

    /// OS process id of the server, for attaching a debugger.
    #[must_use]
    pub fn server_pid(&self) -> Option<u32> {
        match &self.lifecycle {
            Lifecycle::Active(active) => active.handle.pid(),
            Lifecycle::Unstarted | Lifecycle::Stopped => None,
        }
    }

    /// The invocations in use, once started.
    #[must_use]
    pub fn server_options(&self) -> Option<&ServerOptions> {
        match &self.lifecycle {
            Lifecycle::Active(active) => Some(&active.options),
            Lifecycle::Unstarted | Lifecycle::Stopped => None,
        }
    }

    /// Activate: spawn the server and begin the handshake.
    ///
    /// Returns as soon as the process is spawned. Await the returned
    /// [`StartSignal`] to learn whether the handshake succeeded. Spawn
    /// failures are returned directly and leave the manager `Unstarted`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self, ctx: &dyn ExtensionContext) -> Result<StartSignal, SessionError> {
        match self.lifecycle {
            Lifecycle::Unstarted => {}
            Lifecycle::Active(_) => return Err(self.misuse(LifecycleError::AlreadyStarted)),
            Lifecycle::Stopped => return Err(self.misuse(LifecycleError::AlreadyStopped)),
        }

        let install_path = ctx.extension_path();
        if install_path.as_os_str().is_empty() || !install_path.is_absolute() {
            return Err(SessionError::Config(format!(
                "extension path must be absolute, got '{}'",
                install_path.display()
            )));
        }

        let options = ServerOptions::resolve(install_path, &self.settings);
        let filter = EventFilter::tempo()
            .map_err(|e| SessionError::Config(format!("invalid watch pattern: {e}")))?;
        let watcher = WatchRegistration::new(ctx.create_file_watcher(filter.watch_pattern())?);

        let mode = if self.settings.debug {
            ExecutionMode::Debug
        } else {
            ExecutionMode::Run
        };
        tracing::info!(
            client = %self.identity.id(),
            mode = ?mode,
            "Starting {}",
            self.identity.name()
        );

        // On error `watcher` drops here, releasing the host registration.
        let (handle, ready) = session::launch(
            &self.identity,
            options.for_mode(mode),
            &self.settings,
            self.event_tx.clone(),
        )?;

        self.lifecycle = Lifecycle::Active(Box::new(ActiveSession {
            handle,
            options,
            filter,
            watcher,
            open_documents: HashSet::new(),
        }));
        Ok(ready)
    }

    /// Deactivate: request a graceful shutdown.
    ///
    /// Without a prior `start()` this is a no-op that resolves at once with
    /// [`StopOutcome::NotStarted`]. A stop issued while the handshake is in
    /// flight is handled after the handshake settles.
    pub fn stop(&mut self) -> Result<StopSignal, LifecycleError> {
        match std::mem::replace(&mut self.lifecycle, Lifecycle::Stopped) {
            Lifecycle::Unstarted => {
                self.lifecycle = Lifecycle::Unstarted;
                tracing::debug!(client = %self.identity.id(), "Stop requested before start; nothing to do");
                Ok(StopSignal::ready(StopOutcome::NotStarted))
            }
            Lifecycle::Stopped => Err(self.misuse(LifecycleError::AlreadyStopped)),
            Lifecycle::Active(mut active) => {
                active.watcher.release();
                self.diagnostics.clear();
                tracing::info!(client = %self.identity.id(), "Stopping {}", self.identity.name());
                Ok(match active.handle.shutdown() {
                    Some(rx) => StopSignal::shutdown(rx),
                    None => StopSignal::ready(StopOutcome::AlreadyExited),
                })
            }
        }
    }

    fn misuse<E>(&self, error: LifecycleError) -> E
    where
        E: From<LifecycleError>,
    {
        tracing::error!(
            client = %self.identity.id(),
            state = ?self.state(),
            "Lifecycle misuse: {error}"
        );
        E::from(error)
    }

    fn active(&mut self) -> Option<&mut ActiveSession> {
        match &mut self.lifecycle {
            Lifecycle::Active(active) => Some(active),
            Lifecycle::Unstarted | Lifecycle::Stopped => None,
        }
    }

    /// Forward a newly opened document if the selector accepts it.
    ///
    /// Returns whether the document was routed to the session.
    pub fn did_open(&mut self, document: &TextDocumentItem) -> bool {
        let Some(active) = self.active() else {
            tracing::trace!("did_open {} with no active session", document.uri);
            return false;
        };
        if !active
            .filter
            .accepts_document(&document.uri, &document.language_id)
        {
            return false;
        }
        if active.open_documents.contains(&document.uri) {
            tracing::debug!("{} is already open", document.uri);
            return false;
        }
        let sent = active.handle.notify(
            "textDocument/didOpen",
            protocol::did_open_params(document),
        );
        if sent {
            active.open_documents.insert(document.uri.clone());
        }
        sent
    }

    /// Forward a full-text change for a document previously opened.
    pub fn did_change(&mut self, uri: &Url, version: i32, text: &str) -> bool {
        let Some(active) = self.active() else {
            return false;
        };
        if !active.open_documents.contains(uri) {
            return false;
        }
        active.handle.notify(
            "textDocument/didChange",
            protocol::did_change_params(uri, version, text),
        )
    }

    pub fn did_close(&mut self, uri: &Url) -> bool {
        let Some(active) = self.active() else {
            return false;
        };
        if !active.open_documents.remove(uri) {
            return false;
        }
        active
            .handle
            .notify("textDocument/didClose", protocol::did_close_params(uri))
    }

    /// Forward the workspace file changes that match the watch pattern.
    ///
    /// Returns how many events were forwarded.
    pub fn did_change_watched_files(&mut self, events: &[FileEvent]) -> usize {
        let Some(active) = self.active() else {
            return 0;
        };
        let matched: Vec<&FileEvent> = events
            .iter()
            .filter(|event| active.filter.accepts_file_event(&event.uri))
            .collect();
        if matched.is_empty() {
            return 0;
        }
        let params = protocol::did_change_watched_files_params(&matched);
        if active
            .handle
            .notify("workspace/didChangeWatchedFiles", params)
        {
            matched.len()
        } else {
            0
        }
    }

    /// Drain up to `budget` session events without blocking.
    ///
    /// Diagnostics are folded into the store as well as returned. An
    /// unexpected server exit is always reported, after the events the
    /// server published before it died, once the budget leaves room.
    pub fn poll_events(&mut self, budget: usize) -> Vec<SessionEvent> {
        let mut drained = Vec::new();
        self.drain_events(&mut drained, budget);
        if drained.len() < budget
            && let Some(reason) = self.active().and_then(|a| a.handle.take_exit())
        {
            // Events sent just before the exit may have landed after the first drain.
            self.drain_events(&mut drained, budget - 1);
            drained.push(SessionEvent::Exited { reason });
        }
        for event in &drained {
            if let SessionEvent::Exited { reason } = event {
                tracing::warn!(client = %self.identity.id(), ?reason, "Language server exited");
            }
        }
        drained
    }

    fn drain_events(&mut self, drained: &mut Vec<SessionEvent>, limit: usize) {
        while drained.len() < limit {
            let Ok(event) = self.event_rx.try_recv() else {
                break;
            };
            if let SessionEvent::Diagnostics { uri, items } = &event {
                tracing::debug!(uri = %uri, count = items.len(), "Diagnostics updated");
                self.diagnostics.update(uri.clone(), items.clone());
            }
            drained.push(event);
        }
    }

    #[must_use]
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    #[cfg(test)]
    pub(crate) fn event_tx(&self) -> &mpsc::Sender<SessionEvent> {
        &self.event_tx
    }
}
