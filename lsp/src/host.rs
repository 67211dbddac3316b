//! What the client needs from the editing host.
//!
//! The host hands an [`ExtensionContext`] to activation. Nothing beyond the
//! install path and watcher registration is assumed.

use std::path::Path;

use crate::error::HostError;
use crate::filter::FileWatchPattern;

/// Host-owned watch registration. Disposing it releases the host resource.
pub trait FileWatcher: Send {
    fn dispose(&mut self);
}

/// Activation context supplied by the host.
pub trait ExtensionContext {
    /// Directory the extension is installed in.
    fn extension_path(&self) -> &Path;

    /// Register a filesystem watch for `pattern`.
    ///
    /// The host delivers matching events back through
    /// [`SessionManager::did_change_watched_files`](crate::SessionManager::did_change_watched_files).
    fn create_file_watcher(
        &self,
        pattern: &FileWatchPattern,
    ) -> Result<Box<dyn FileWatcher>, HostError>;
}

/// Disposes the wrapped watcher exactly once.
pub(crate) struct WatchRegistration {
    watcher: Option<Box<dyn FileWatcher>>,
}

impl WatchRegistration {
    pub(crate) fn new(watcher: Box<dyn FileWatcher>) -> Self {
        Self {
            watcher: Some(watcher),
        }
    }

    pub(crate) fn release(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.dispose();
        }
    }
}

impl Drop for WatchRegistration {
    fn drop(&mut self) {
        self.release();
    }
}
