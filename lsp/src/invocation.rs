//! How the Tempo server process is launched.
//!
//! The server is run from source with the Go toolchain, from the directory
//! one level above the extension's install location.

use std::path::{Path, PathBuf};

use crate::types::{ClientSettings, ServerOverride};

/// Toolchain used to run the server from source.
pub const SERVER_COMMAND: &str = "go";

/// Server entry point, relative to the server root.
pub const SERVER_ENTRY_POINT: &str = "./main.go";

/// Subcommand that puts the server into protocol-serving mode.
pub const SERVE_SUBCOMMAND: &str = "lsp";

/// Executable, arguments and working directory for one launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationConfig {
    command: String,
    args: Vec<String>,
    working_dir: PathBuf,
}

impl InvocationConfig {
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>, working_dir: PathBuf) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir,
        }
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}

/// Which of the two invocations to launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Run,
    Debug,
}

/// The run and debug invocations for a session.
///
/// Both are identical: debugging is done by attaching to the spawned
/// process, not through extra server flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    run: InvocationConfig,
    debug: InvocationConfig,
}

impl ServerOptions {
    /// Derive both invocations from the extension install path.
    #[must_use]
    pub fn from_install_path(install_path: &Path) -> Self {
        let root = server_root(install_path);
        let invocation = InvocationConfig::new(
            SERVER_COMMAND,
            vec![
                "run".to_string(),
                SERVER_ENTRY_POINT.to_string(),
                SERVE_SUBCOMMAND.to_string(),
            ],
            root,
        );
        Self {
            run: invocation.clone(),
            debug: invocation,
        }
    }

    /// Same as [`from_install_path`](Self::from_install_path), honouring a
    /// configured server override.
    #[must_use]
    pub fn resolve(install_path: &Path, settings: &ClientSettings) -> Self {
        match &settings.server {
            Some(ServerOverride { command, args }) => {
                let invocation =
                    InvocationConfig::new(command.clone(), args.clone(), server_root(install_path));
                Self {
                    run: invocation.clone(),
                    debug: invocation,
                }
            }
            None => Self::from_install_path(install_path),
        }
    }

    #[must_use]
    pub fn run(&self) -> &InvocationConfig {
        &self.run
    }

    #[must_use]
    pub fn debug(&self) -> &InvocationConfig {
        &self.debug
    }

    #[must_use]
    pub fn for_mode(&self, mode: ExecutionMode) -> &InvocationConfig {
        match mode {
            ExecutionMode::Run => &self.run,
            ExecutionMode::Debug => &self.debug,
        }
    }
}

/// One level above the install directory. A root path is its own parent.
fn server_root(install_path: &Path) -> PathBuf {
    install_path
        .parent()
        .map_or_else(|| install_path.to_path_buf(), Path::to_path_buf)
}
