//! tempo-client - run the Tempo language server against a workspace.
//!
//! ```text
//! tempo-client <extension-path> [workspace-dir]
//! ```
//!
//! Activates a [`SessionManager`] with the given install path, opens every
//! `.tempo` file in the workspace, prints diagnostics as the server
//! publishes them, and deactivates on Ctrl-C.

mod config;
mod host;

use std::collections::HashMap;
use std::path::{self, Path, PathBuf};
use std::time::Duration;
use std::{fs, io, process};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tempo_lsp::filter::LANGUAGE_ID;
use tempo_lsp::{
    EventFilter, FileChangeType, FileEvent, MessageType, SessionEvent, SessionManager,
    StopOutcome, TextDocumentItem,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use url::Url;

use crate::host::WorkspaceHost;

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const EVENT_BUDGET: usize = 64;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    // stdout carries diagnostics; logs go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
}

/// Run the Tempo language server against a workspace.
#[derive(Parser, Debug)]
#[command(name = "tempo-client", version, about)]
struct Cli {
    /// Directory the Tempo extension is installed in. The server runs from its parent.
    #[arg(value_name = "EXTENSION_PATH")]
    extension_path: PathBuf,
    /// Workspace whose `.tempo` files are opened and watched.
    #[arg(value_name = "WORKSPACE_DIR")]
    workspace: Option<PathBuf>,
}

impl Cli {
    /// Make both paths absolute against the current directory.
    fn absolutize(self) -> Result<Self> {
        let extension_path = path::absolute(&self.extension_path).with_context(|| {
            format!("invalid extension path {}", self.extension_path.display())
        })?;
        let workspace = self
            .workspace
            .map(|dir| {
                path::absolute(&dir)
                    .with_context(|| format!("invalid workspace path {}", dir.display()))
            })
            .transpose()?;
        Ok(Self {
            extension_path,
            workspace,
        })
    }
}

/// Open documents and the version last sent for each.
#[derive(Default)]
struct OpenDocuments {
    versions: HashMap<Url, i32>,
}

impl OpenDocuments {
    fn open(&mut self, manager: &mut SessionManager, path: &Path) {
        let Ok(uri) = Url::from_file_path(path) else {
            return;
        };
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Skipping {}: {e}", path.display());
                return;
            }
        };
        let document = TextDocumentItem {
            uri: uri.clone(),
            language_id: LANGUAGE_ID.to_string(),
            version: 1,
            text,
        };
        if manager.did_open(&document) {
            self.versions.insert(uri, 1);
        }
    }

    fn apply(&mut self, manager: &mut SessionManager, events: &[FileEvent]) {
        for event in events {
            match event.kind {
                FileChangeType::Created => {
                    if let Ok(path) = event.uri.to_file_path() {
                        self.open(manager, &path);
                    }
                }
                FileChangeType::Changed => {
                    let (Some(version), Ok(path)) =
                        (self.versions.get_mut(&event.uri), event.uri.to_file_path())
                    else {
                        continue;
                    };
                    match fs::read_to_string(&path) {
                        Ok(text) => {
                            *version += 1;
                            manager.did_change(&event.uri, *version, &text);
                        }
                        Err(e) => tracing::debug!("Re-read of {} failed: {e}", path.display()),
                    }
                }
                FileChangeType::Deleted => {
                    if self.versions.remove(&event.uri).is_some() {
                        manager.did_close(&event.uri);
                    }
                }
            }
        }
    }
}

fn display_path(uri: &Url) -> String {
    uri.to_file_path()
        .map_or_else(|()| uri.to_string(), |p| p.display().to_string())
}

/// Print events; returns `false` once the server is gone.
fn report(events: Vec<SessionEvent>) -> bool {
    let mut alive = true;
    for event in events {
        match event {
            SessionEvent::Diagnostics { uri, items } => {
                let location = display_path(&uri);
                if items.is_empty() {
                    println!("{location}: clean");
                }
                for item in &items {
                    println!("{}", item.display_at(&location));
                }
            }
            SessionEvent::Message { kind, text } => match kind {
                MessageType::Error => tracing::error!("server: {text}"),
                MessageType::Warning => tracing::warn!("server: {text}"),
                MessageType::Info | MessageType::Log => tracing::info!("server: {text}"),
            },
            SessionEvent::Exited { reason } => {
                tracing::error!(?reason, "Language server exited");
                alive = false;
            }
        }
    }
    alive
}

async fn run(args: Cli) -> Result<()> {
    let mut settings = config::load()
        .context("failed to load configuration")?
        .unwrap_or_default();
    if settings.workspace_root.is_none() {
        settings.workspace_root.clone_from(&args.workspace);
    }

    let (file_tx, mut file_rx) = mpsc::unbounded_channel();
    let host = WorkspaceHost::new(args.extension_path, args.workspace, file_tx);
    let mut manager = SessionManager::new(settings);

    let started = manager
        .start(&host)
        .context("failed to start the Tempo language server")?;

    tokio::select! {
        result = started.wait() => match result {
            Ok(info) => {
                tracing::info!(
                    name = info.name.as_deref().unwrap_or("unknown"),
                    version = info.version.as_deref().unwrap_or("unknown"),
                    pid = ?manager.server_pid(),
                    "Ready"
                );
            }
            Err(e) => {
                manager.stop()?.wait().await;
                return Err(e).context("Tempo language server failed to initialize");
            }
        },
        _ = signal::ctrl_c() => {
            manager.stop()?.wait().await;
            return Ok(());
        }
    }

    let filter = EventFilter::tempo().context("invalid watch pattern")?;
    let mut documents = OpenDocuments::default();
    for path in host.matching_files(filter.watch_pattern()).await {
        documents.open(&mut manager, &path);
    }
    tracing::info!(count = documents.versions.len(), "Opened workspace documents");

    let mut ticks = time::interval(EVENT_POLL_INTERVAL);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            Some(events) = file_rx.recv() => {
                manager.did_change_watched_files(&events);
                documents.apply(&mut manager, &events);
            }
            _ = ticks.tick() => {
                if !report(manager.poll_events(EVENT_BUDGET)) {
                    break;
                }
            }
        }
    }

    let snapshot = manager.diagnostics();
    match manager.stop()?.wait().await {
        StopOutcome::Stopped(shutdown) if shutdown.forced => {
            tracing::warn!("Language server had to be killed");
        }
        StopOutcome::AlreadyExited => bail!("Tempo language server exited unexpectedly"),
        StopOutcome::Stopped(_) | StopOutcome::NotStarted => {}
    }
    if !snapshot.is_empty() {
        eprintln!("{}", snapshot.status_string());
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    let result = match cli.absolutize() {
        Ok(args) => run(args).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        eprintln!("Error: {e:?}");
        process::exit(1);
    }
}
