//! Activation failures and calls made in the wrong state.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use tempo_lsp::{
    ClientSettings, ExtensionContext, FileWatchPattern, FileWatcher, HostError, ServerOverride,
    SessionError, SessionManager, SessionState, StopOutcome,
};

use crate::common::{TestHost, settings};

/// A host whose watcher registration always fails.
struct FixedPathHost {
    path: PathBuf,
}

impl ExtensionContext for FixedPathHost {
    fn extension_path(&self) -> &Path {
        &self.path
    }

    fn create_file_watcher(
        &self,
        pattern: &FileWatchPattern,
    ) -> Result<Box<dyn FileWatcher>, HostError> {
        Err(HostError {
            pattern: pattern.glob().to_string(),
            message: "watcher limit reached".to_string(),
        })
    }
}

#[tokio::test]
async fn test_stop_before_start_is_a_noop() {
    let mut manager = SessionManager::new(ClientSettings::default());

    let stopping = manager.stop().unwrap();
    assert!(stopping.is_ready());
    assert_eq!(stopping.wait().await, StopOutcome::NotStarted);
    assert_eq!(manager.state(), SessionState::Unstarted);

    assert!(manager.stop().unwrap().wait().await.is_noop());
}

#[tokio::test]
async fn test_relative_extension_path_is_rejected() {
    let host = FixedPathHost {
        path: PathBuf::from("tempo-vscode"),
    };
    let mut manager = SessionManager::new(ClientSettings::default());

    let err = manager.start(&host).err().expect("relative path must fail");
    assert!(matches!(err, SessionError::Config(_)));
    assert_eq!(manager.state(), SessionState::Unstarted);
}

#[tokio::test]
async fn test_empty_extension_path_is_rejected() {
    let host = FixedPathHost {
        path: PathBuf::new(),
    };
    let mut manager = SessionManager::new(ClientSettings::default());

    assert!(matches!(
        manager.start(&host),
        Err(SessionError::Config(_))
    ));
}

#[tokio::test]
async fn test_watcher_failure_aborts_start() {
    let root = tempfile::tempdir().unwrap();
    let host = FixedPathHost {
        path: root.path().join("tempo-vscode"),
    };
    let mut manager = SessionManager::new(ClientSettings::default());

    match manager.start(&host) {
        Err(SessionError::Host(err)) => {
            assert_eq!(err.pattern, "**/*.tempo");
            assert_eq!(err.message, "watcher limit reached");
        }
        Err(other) => panic!("expected a host error, got {other}"),
        Ok(_) => panic!("expected a host error, got a running session"),
    }
    assert_eq!(manager.state(), SessionState::Unstarted);
    assert!(manager.server_pid().is_none());
}

#[tokio::test]
async fn test_missing_binary_leaves_manager_startable() {
    let host = TestHost::new();
    let mut manager = SessionManager::new(settings(ServerOverride {
        command: "tempo-no-such-toolchain".to_string(),
        args: Vec::new(),
    }));

    match manager.start(&host) {
        Err(SessionError::BinaryNotFound { command, .. }) => {
            assert_eq!(command, "tempo-no-such-toolchain");
        }
        Err(other) => panic!("expected BinaryNotFound, got {other}"),
        Ok(_) => panic!("expected BinaryNotFound, got a running session"),
    }
    assert_eq!(manager.state(), SessionState::Unstarted);
    assert!(manager.server_options().is_none());
    assert_eq!(host.watches.load(Ordering::SeqCst), 1);
    assert_eq!(host.disposed(), 1);
}

#[tokio::test]
async fn test_routing_without_session_is_dropped() {
    let mut manager = SessionManager::new(ClientSettings::default());
    let uri = url::Url::parse("file:///ws/ping.tempo").unwrap();

    assert!(!manager.did_change(&uri, 2, "protocol P {}"));
    assert!(!manager.did_close(&uri));
    assert_eq!(manager.did_change_watched_files(&[]), 0);
    assert!(manager.poll_events(8).is_empty());
}
