//! End-to-end session lifecycle against scripted servers.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use serde_json::json;
use tempo_lsp::{
    FileChangeType, FileEvent, LifecycleError, SessionError, SessionEvent, SessionManager,
    SessionState, StopOutcome, TextDocumentItem,
};
use url::Url;

use crate::common::{
    TestHost, answering_server, crashing_server, exiting_server, lingering_server,
    recorded_methods, recording_server, settings, silent_server, wait_for_state,
};

fn document(path: &str, language_id: &str) -> TextDocumentItem {
    TextDocumentItem {
        uri: Url::parse(&format!("file://{path}")).unwrap(),
        language_id: language_id.to_string(),
        version: 1,
        text: "protocol Ping { A -> B: ping; }".to_string(),
    }
}

#[tokio::test]
async fn test_start_then_stop_shuts_server_down() {
    let host = TestHost::new();
    let mut manager = SessionManager::new(settings(answering_server(&[])));

    let started = manager.start(&host).unwrap();
    let pid = manager.server_pid().expect("spawned server has a pid");
    let info = started.wait().await.unwrap();
    assert_eq!(info.name.as_deref(), Some("fake-tempo"));
    assert_eq!(info.version.as_deref(), Some("0.0.1"));
    assert_eq!(manager.state(), SessionState::Running);

    let outcome = manager.stop().unwrap().wait().await;
    match outcome {
        StopOutcome::Stopped(report) => assert!(report.status.is_some()),
        other => panic!("expected a graceful stop, got {other:?}"),
    }
    assert_eq!(manager.state(), SessionState::Stopped);
    #[cfg(target_os = "linux")]
    assert!(!crate::common::process_alive(pid));
    let _ = pid;
}

#[tokio::test]
async fn test_stop_during_handshake_waits_for_it() {
    let host = TestHost::new();
    let mut manager = SessionManager::new(settings(answering_server(&[])));

    let started = manager.start(&host).unwrap();
    let pid = manager.server_pid().expect("spawned server has a pid");
    let stopping = manager.stop().unwrap();
    assert!(!stopping.is_ready());

    assert!(started.wait().await.is_ok());
    assert!(matches!(stopping.wait().await, StopOutcome::Stopped(_)));
    #[cfg(target_os = "linux")]
    assert!(!crate::common::process_alive(pid));
    let _ = pid;
}

#[tokio::test]
async fn test_acknowledged_shutdown_exits_cleanly() {
    let host = TestHost::new();
    let log = host.root().join("methods.log");
    let mut config = settings(recording_server(&log));
    config.shutdown_timeout_secs = 5;
    let mut manager = SessionManager::new(config);

    let started = manager.start(&host).unwrap();
    let pid = manager.server_pid().expect("spawned server has a pid");
    started.wait().await.unwrap();

    let begun = Instant::now();
    let outcome = manager.stop().unwrap().wait().await;
    match outcome {
        StopOutcome::Stopped(report) => {
            assert!(!report.forced);
            assert!(report.status.is_some_and(|s| s.success()));
        }
        other => panic!("expected a graceful stop, got {other:?}"),
    }
    // Well inside the shutdown timeout: the server answered and left.
    assert!(begun.elapsed() < Duration::from_secs(4));
    assert_eq!(
        recorded_methods(&log),
        ["initialize", "initialized", "shutdown", "exit"]
    );
    #[cfg(target_os = "linux")]
    assert!(!crate::common::process_alive(pid));
    let _ = pid;
}

#[tokio::test]
async fn test_open_during_handshake_follows_initialized() {
    let host = TestHost::new();
    let log = host.root().join("methods.log");
    let mut manager = SessionManager::new(settings(recording_server(&log)));

    let started = manager.start(&host).unwrap();
    assert_eq!(manager.state(), SessionState::Starting);
    assert!(manager.did_open(&document("/ws/ping.tempo", "tempo")));

    started.wait().await.unwrap();
    let outcome = manager.stop().unwrap().wait().await;
    assert!(matches!(outcome, StopOutcome::Stopped(ref report) if !report.forced));
    assert_eq!(
        recorded_methods(&log),
        [
            "initialize",
            "initialized",
            "textDocument/didOpen",
            "shutdown",
            "exit"
        ]
    );
}

#[tokio::test]
async fn test_server_ignoring_stdin_eof_is_killed() {
    let host = TestHost::new();
    let mut manager = SessionManager::new(settings(lingering_server()));

    let started = manager.start(&host).unwrap();
    let pid = manager.server_pid().expect("spawned server has a pid");
    started.wait().await.unwrap();

    match manager.stop().unwrap().wait().await {
        StopOutcome::Stopped(report) => {
            assert!(report.forced);
            assert!(report.status.is_some_and(|s| !s.success()));
        }
        other => panic!("expected a forced stop, got {other:?}"),
    }
    #[cfg(target_os = "linux")]
    assert!(!crate::common::process_alive(pid));
    let _ = pid;
}

#[tokio::test]
async fn test_unexpected_exit_is_reported_once() {
    let host = TestHost::new();
    let mut manager = SessionManager::new(settings(crashing_server()));
    manager.start(&host).unwrap().wait().await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..250 {
        seen.extend(manager.poll_events(16));
        if !seen.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(matches!(seen.as_slice(), [SessionEvent::Exited { .. }]));
    assert_eq!(manager.state(), SessionState::Stopped);
    assert!(manager.poll_events(16).is_empty());

    assert_eq!(manager.stop().unwrap().wait().await, StopOutcome::AlreadyExited);
}

#[tokio::test]
async fn test_server_runs_from_install_parent() {
    let host = TestHost::new();
    let mut manager = SessionManager::new(settings(answering_server(&[])));

    let started = manager.start(&host).unwrap();
    let options = manager.server_options().expect("options after start");
    assert_eq!(options.run().working_dir(), host.root());
    assert_eq!(options.run(), options.debug());
    assert_eq!(options.run().command(), "sh");

    started.wait().await.unwrap();
    manager.stop().unwrap().wait().await;
}

#[tokio::test]
async fn test_silent_server_times_out_and_is_killed() {
    let host = TestHost::new();
    let mut config = settings(silent_server());
    config.initialize_timeout_secs = 1;
    let mut manager = SessionManager::new(config);

    let started = manager.start(&host).unwrap();
    let pid = manager.server_pid().expect("spawned server has a pid");
    let stopping = manager.stop().unwrap();

    let err = started.wait().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Timeout {
            method: "initialize",
            ..
        }
    ));
    assert_eq!(stopping.wait().await, StopOutcome::AlreadyExited);
    #[cfg(target_os = "linux")]
    assert!(!crate::common::process_alive(pid));
    let _ = pid;
}

#[tokio::test]
async fn test_server_exiting_during_startup_is_reported() {
    let host = TestHost::new();
    let mut manager = SessionManager::new(settings(exiting_server(3)));

    let started = manager.start(&host).unwrap();
    let err = started.wait().await.unwrap_err();
    assert!(
        matches!(err, SessionError::ServerExited { .. }),
        "unexpected error: {err}"
    );
    assert!(wait_for_state(&manager, SessionState::Stopped, Duration::from_secs(2)).await);

    assert_eq!(manager.stop().unwrap().wait().await, StopOutcome::AlreadyExited);
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let host = TestHost::new();
    let mut manager = SessionManager::new(settings(answering_server(&[])));

    let started = manager.start(&host).unwrap();
    let pid = manager.server_pid();
    assert!(matches!(
        manager.start(&host),
        Err(SessionError::Lifecycle(LifecycleError::AlreadyStarted))
    ));
    assert_eq!(manager.server_pid(), pid);
    assert_eq!(host.watches.load(Ordering::SeqCst), 1);

    started.wait().await.unwrap();
    manager.stop().unwrap().wait().await;
}

#[tokio::test]
async fn test_manager_is_single_use() {
    let host = TestHost::new();
    let mut manager = SessionManager::new(settings(answering_server(&[])));

    manager.start(&host).unwrap().wait().await.unwrap();
    manager.stop().unwrap().wait().await;

    assert!(matches!(
        manager.start(&host),
        Err(SessionError::Lifecycle(LifecycleError::AlreadyStopped))
    ));
    assert!(matches!(
        manager.stop(),
        Err(LifecycleError::AlreadyStopped)
    ));
}

#[tokio::test]
async fn test_watcher_registered_once_and_disposed_on_stop() {
    let host = TestHost::new();
    let mut manager = SessionManager::new(settings(answering_server(&[])));

    manager.start(&host).unwrap().wait().await.unwrap();
    assert_eq!(
        *host.patterns.lock().unwrap(),
        vec!["**/*.tempo".to_string()]
    );
    assert_eq!(host.disposed(), 0);

    let stopping = manager.stop().unwrap();
    assert_eq!(host.disposed(), 1);
    stopping.wait().await;
    assert_eq!(host.disposed(), 1);
}

#[tokio::test]
async fn test_published_diagnostics_reach_the_host() {
    let host = TestHost::new();
    let publish = json!({
        "jsonrpc": "2.0",
        "method": "textDocument/publishDiagnostics",
        "params": {
            "uri": "file:///ws/ping.tempo",
            "diagnostics": [{
                "range": {
                    "start": { "line": 0, "character": 9 },
                    "end": { "line": 0, "character": 13 }
                },
                "severity": 1,
                "message": "role C is never used"
            }]
        }
    });
    let mut manager = SessionManager::new(settings(answering_server(&[publish])));
    manager.start(&host).unwrap().wait().await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..100 {
        seen.extend(manager.poll_events(16));
        if !seen.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(matches!(
        seen.first(),
        Some(SessionEvent::Diagnostics { uri, items })
            if uri.as_str() == "file:///ws/ping.tempo" && items.len() == 1
    ));
    let snapshot = manager.diagnostics();
    assert_eq!(snapshot.error_count(), 1);
    assert_eq!(snapshot.files()[0].1[0].source(), "tempo");

    manager.stop().unwrap().wait().await;
    assert!(manager.diagnostics().is_empty());
}

#[tokio::test]
async fn test_only_tempo_documents_are_routed() {
    let host = TestHost::new();
    let mut manager = SessionManager::new(settings(answering_server(&[])));
    manager.start(&host).unwrap().wait().await.unwrap();

    let tempo = document("/ws/ping.tempo", "tempo");
    assert!(manager.did_open(&tempo));
    assert!(!manager.did_open(&tempo));
    assert!(!manager.did_open(&document("/ws/main.go", "go")));

    let unopened = Url::parse("file:///ws/other.tempo").unwrap();
    assert!(!manager.did_change(&unopened, 2, "x"));
    assert!(manager.did_change(&tempo.uri, 2, "protocol Ping {}"));
    assert!(manager.did_close(&tempo.uri));
    assert!(!manager.did_close(&tempo.uri));

    let events = [
        FileEvent::new(
            Url::parse("file:///ws/a.tempo").unwrap(),
            FileChangeType::Created,
        ),
        FileEvent::new(
            Url::parse("file:///ws/b.go").unwrap(),
            FileChangeType::Changed,
        ),
        FileEvent::new(
            Url::parse("file:///ws/nested/c.tempo").unwrap(),
            FileChangeType::Deleted,
        ),
    ];
    assert_eq!(manager.did_change_watched_files(&events), 2);

    manager.stop().unwrap().wait().await;
    assert!(!manager.did_open(&document("/ws/late.tempo", "tempo")));
}
