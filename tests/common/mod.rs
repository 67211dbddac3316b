//! Shared test utilities and fixtures
//!
//! A host context backed by a temporary install directory, and `sh`
//! scripts that stand in for the Tempo server.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::{Instant, sleep};
use tempo_lsp::{
    ClientSettings, ExtensionContext, FileWatchPattern, FileWatcher, HostError, ServerOverride,
    SessionManager, SessionState,
};

/// Extension installed at `<tmp>/tempo-vscode`, so the server root is `<tmp>`.
pub struct TestHost {
    _dir: TempDir,
    root: PathBuf,
    extension: PathBuf,
    pub watches: Arc<AtomicUsize>,
    pub disposed: Arc<AtomicUsize>,
    pub patterns: Mutex<Vec<String>>,
}

impl TestHost {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let root = dir.path().to_path_buf();
        let extension = root.join("tempo-vscode");
        fs::create_dir(&extension).expect("create extension dir");
        Self {
            _dir: dir,
            root,
            extension,
            watches: Arc::new(AtomicUsize::new(0)),
            disposed: Arc::new(AtomicUsize::new(0)),
            patterns: Mutex::new(Vec::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

struct CountingWatcher(Arc<AtomicUsize>);

impl FileWatcher for CountingWatcher {
    fn dispose(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl ExtensionContext for TestHost {
    fn extension_path(&self) -> &Path {
        &self.extension
    }

    fn create_file_watcher(
        &self,
        pattern: &FileWatchPattern,
    ) -> Result<Box<dyn FileWatcher>, HostError> {
        self.watches.fetch_add(1, Ordering::SeqCst);
        self.patterns
            .lock()
            .expect("patterns lock")
            .push(pattern.glob().to_string());
        Ok(Box::new(CountingWatcher(self.disposed.clone())))
    }
}

// Bodies are passed as `%s` arguments and must not contain single quotes.
fn printf_frames(frames: &[serde_json::Value]) -> String {
    frames
        .iter()
        .map(|f| {
            let body = f.to_string();
            format!(
                "printf 'Content-Length: %d\\r\\n\\r\\n%s' {} '{body}'",
                body.len()
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Initialize response for request id 1.
pub fn initialize_response() -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": {
            "capabilities": { "textDocumentSync": 1 },
            "serverInfo": { "name": "fake-tempo", "version": "0.0.1" }
        }
    })
}

/// A server that waits for the first request byte, answers `initialize`,
/// emits `extra` frames, then idles until stdin closes.
pub fn answering_server(extra: &[serde_json::Value]) -> ServerOverride {
    let mut frames = vec![initialize_response()];
    frames.extend_from_slice(extra);
    let script = format!(
        "head -c 1 >/dev/null; {}; cat >/dev/null",
        printf_frames(&frames)
    );
    sh(&script)
}

/// A server that answers `initialize`, then holds its pid without ever
/// reading stdin again, so closing the pipe does not make it exit.
pub fn lingering_server() -> ServerOverride {
    sh(&format!(
        "head -c 1 >/dev/null; {}; exec sleep 30",
        printf_frames(&[initialize_response()])
    ))
}

/// A server that answers `initialize`, then dies a second later.
pub fn crashing_server() -> ServerOverride {
    sh(&format!(
        "head -c 1 >/dev/null; {}; sleep 1; exit 1",
        printf_frames(&[initialize_response()])
    ))
}

// Message keys arrive sorted, so a top-level `method` or `id` comes before
// any nested object.
const RECORDING_SCRIPT: &str = r#"
reply() { printf 'Content-Length: %d

%s' "${#1}" "$1"; }
while IFS= read -r header; do
  len=${header#Content-Length: }
  len=${len%?}
  IFS= read -r blank
  body=$(dd bs=1 count="$len" 2>/dev/null)
  method=$(printf '%s' "$body" | sed -n 's/^{[^{]*"method":"\([^"]*\)".*//p')
  echo "$method" >> '@LOG@'
  case "$method" in
    initialize) reply '@INIT@' ;;
    shutdown)
      id=$(printf '%s' "$body" | sed -n 's/^{[^{]*"id":\([0-9]*\).*//p')
      reply "{"jsonrpc":"2.0","id":$id,"result":null}" ;;
    exit) exit 0 ;;
  esac
done
"#;

/// A well-behaved server: appends every method it receives to `log`, one
/// per line, answers `initialize` and `shutdown`, and exits 0 on `exit`.
pub fn recording_server(log: &Path) -> ServerOverride {
    sh(&RECORDING_SCRIPT
        .replace("@LOG@", &log.display().to_string())
        .replace("@INIT@", &initialize_response().to_string()))
}

/// Methods recorded by [`recording_server`], in arrival order.
pub fn recorded_methods(log: &Path) -> Vec<String> {
    fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// A server that never speaks.
pub fn silent_server() -> ServerOverride {
    sh("exec sleep 30")
}

/// A server that exits at once with `code`.
pub fn exiting_server(code: i32) -> ServerOverride {
    sh(&format!("exit {code}"))
}

fn sh(script: &str) -> ServerOverride {
    ServerOverride {
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
    }
}

pub fn settings(server: ServerOverride) -> ClientSettings {
    ClientSettings {
        initialize_timeout_secs: 5,
        shutdown_timeout_secs: 1,
        server: Some(server),
        ..ClientSettings::default()
    }
}

/// Poll until the manager reports `state`, or give up after `limit`.
pub async fn wait_for_state(manager: &SessionManager, state: SessionState, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if manager.state() == state {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    manager.state() == state
}

/// Whether a process with `pid` still exists.
#[cfg(target_os = "linux")]
pub fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}
