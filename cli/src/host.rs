//! Terminal host: install path, workspace scan, and a polling file watcher.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use ignore::WalkBuilder;
use tempo_lsp::{
    ExtensionContext, FileChangeType, FileEvent, FileWatchPattern, FileWatcher, HostError,
};
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tokio::time;
use url::Url;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

type Mtimes = HashMap<PathBuf, SystemTime>;

pub struct WorkspaceHost {
    extension_path: PathBuf,
    workspace: Option<PathBuf>,
    file_events: mpsc::UnboundedSender<Vec<FileEvent>>,
}

impl WorkspaceHost {
    pub fn new(
        extension_path: PathBuf,
        workspace: Option<PathBuf>,
        file_events: mpsc::UnboundedSender<Vec<FileEvent>>,
    ) -> Self {
        Self {
            extension_path,
            workspace,
            file_events,
        }
    }

    /// Workspace files matching `pattern`, sorted.
    pub async fn matching_files(&self, pattern: &FileWatchPattern) -> Vec<PathBuf> {
        let Some(root) = &self.workspace else {
            return Vec::new();
        };
        let Some(found) = scan_blocking(root.clone(), pattern.clone()).await else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = found.into_keys().collect();
        files.sort();
        files
    }
}

impl ExtensionContext for WorkspaceHost {
    fn extension_path(&self) -> &Path {
        &self.extension_path
    }

    fn create_file_watcher(
        &self,
        pattern: &FileWatchPattern,
    ) -> Result<Box<dyn FileWatcher>, HostError> {
        let Some(root) = self.workspace.clone() else {
            tracing::debug!("No workspace; {} is not watched", pattern.glob());
            return Ok(Box::new(PollingWatcher { task: None }));
        };
        if !root.is_dir() {
            return Err(HostError {
                pattern: pattern.glob().to_string(),
                message: format!("{} is not a directory", root.display()),
            });
        }

        tracing::debug!(root = %root.display(), glob = pattern.glob(), "Watching workspace");
        let task = tokio::spawn(poll_workspace(
            root,
            pattern.clone(),
            self.file_events.clone(),
        ));
        Ok(Box::new(PollingWatcher { task: Some(task) }))
    }
}

struct PollingWatcher {
    task: Option<JoinHandle<()>>,
}

impl FileWatcher for PollingWatcher {
    fn dispose(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("Workspace watcher disposed");
        }
    }
}

async fn poll_workspace(
    root: PathBuf,
    pattern: FileWatchPattern,
    events: mpsc::UnboundedSender<Vec<FileEvent>>,
) {
    let Some(mut known) = scan_blocking(root.clone(), pattern.clone()).await else {
        return;
    };
    let mut ticks = time::interval(POLL_INTERVAL);
    ticks.tick().await;
    loop {
        ticks.tick().await;
        let Some(current) = scan_blocking(root.clone(), pattern.clone()).await else {
            return;
        };
        let changes = diff(&known, &current);
        known = current;
        if !changes.is_empty() && events.send(changes).is_err() {
            return;
        }
    }
}

/// Walk the workspace on the blocking pool. `None` if the walk panicked.
async fn scan_blocking(root: PathBuf, pattern: FileWatchPattern) -> Option<Mtimes> {
    match task::spawn_blocking(move || scan(&root, &pattern)).await {
        Ok(files) => Some(files),
        Err(e) => {
            tracing::warn!("Workspace scan failed: {e}");
            None
        }
    }
}

fn scan(root: &Path, pattern: &FileWatchPattern) -> Mtimes {
    let mut builder = WalkBuilder::new(root);
    builder.filter_entry(|entry| entry.file_name() != ".git");

    let mut files = Mtimes::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::trace!("Skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) || !pattern.matches(entry.path()) {
            continue;
        }
        let modified = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        files.insert(entry.into_path(), modified);
    }
    files
}

fn diff(before: &Mtimes, after: &Mtimes) -> Vec<FileEvent> {
    let mut changes: Vec<(PathBuf, FileChangeType)> = Vec::new();
    for (path, modified) in after {
        match before.get(path) {
            None => changes.push((path.clone(), FileChangeType::Created)),
            Some(previous) if previous != modified => {
                changes.push((path.clone(), FileChangeType::Changed));
            }
            Some(_) => {}
        }
    }
    for path in before.keys().filter(|p| !after.contains_key(*p)) {
        changes.push((path.clone(), FileChangeType::Deleted));
    }
    changes.sort_by(|a, b| a.0.cmp(&b.0));

    changes
        .into_iter()
        .filter_map(|(path, kind)| {
            Url::from_file_path(&path)
                .ok()
                .map(|uri| FileEvent::new(uri, kind))
        })
        .collect()
}
