//! Completion signals returned by `start()` and `stop()`.

use tokio::sync::oneshot;

use crate::error::SessionError;
use crate::types::{ServerInfo, ShutdownReport, StopOutcome};

/// Resolves once the handshake finished, successfully or not.
#[must_use = "dropping the signal hides handshake failures"]
pub struct StartSignal {
    rx: oneshot::Receiver<Result<ServerInfo, SessionError>>,
}

impl StartSignal {
    pub(crate) fn new(rx: oneshot::Receiver<Result<ServerInfo, SessionError>>) -> Self {
        Self { rx }
    }

    /// Wait for the session to reach `Running`.
    pub async fn wait(self) -> Result<ServerInfo, SessionError> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(SessionError::ChannelClosed))
    }
}

enum Pending {
    Ready(StopOutcome),
    Shutdown(oneshot::Receiver<ShutdownReport>),
}

/// Resolves once the server process is gone.
pub struct StopSignal {
    pending: Pending,
}

impl StopSignal {
    pub(crate) fn ready(outcome: StopOutcome) -> Self {
        Self {
            pending: Pending::Ready(outcome),
        }
    }

    pub(crate) fn shutdown(rx: oneshot::Receiver<ShutdownReport>) -> Self {
        Self {
            pending: Pending::Shutdown(rx),
        }
    }

    /// Whether the outcome is already known without awaiting.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.pending, Pending::Ready(_))
    }

    pub async fn wait(self) -> StopOutcome {
        match self.pending {
            Pending::Ready(outcome) => outcome,
            // The session task dropped the reply: it had already ended.
            Pending::Shutdown(rx) => rx
                .await
                .map_or(StopOutcome::AlreadyExited, StopOutcome::Stopped),
        }
    }
}
