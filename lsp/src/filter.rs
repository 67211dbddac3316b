//! Which documents and file events belong to the Tempo session.

use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};
use url::Url;

/// Language tag the host assigns to Tempo documents.
pub const LANGUAGE_ID: &str = "tempo";

/// Extension carried by Tempo source files.
pub const FILE_EXTENSION: &str = "tempo";

/// URI scheme of documents backed by the local filesystem.
pub const FILE_SCHEME: &str = "file";

/// Matches documents by URI scheme and language tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSelector {
    scheme: String,
    language: String,
}

impl DocumentSelector {
    #[must_use]
    pub fn new(scheme: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            language: language.into(),
        }
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    #[must_use]
    pub fn matches(&self, uri: &Url, language_id: &str) -> bool {
        uri.scheme() == self.scheme && language_id == self.language
    }
}

/// Recursive glob over workspace paths.
#[derive(Debug, Clone)]
pub struct FileWatchPattern {
    glob: String,
    matcher: GlobMatcher,
}

impl FileWatchPattern {
    /// Compile `glob`.
    pub fn new(glob: &str) -> Result<Self, globset::Error> {
        let mut builder = GlobBuilder::new(glob);
        builder.literal_separator(true);
        if cfg!(windows) {
            builder.case_insensitive(true);
        }
        let matcher = builder.build()?.compile_matcher();
        Ok(Self {
            glob: glob.to_string(),
            matcher,
        })
    }

    /// The pattern as handed to the host watcher.
    #[must_use]
    pub fn glob(&self) -> &str {
        &self.glob
    }

    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        self.matcher.is_match(path)
    }
}

impl PartialEq for FileWatchPattern {
    fn eq(&self, other: &Self) -> bool {
        self.glob == other.glob
    }
}

/// Document selector plus file watch pattern for one activation.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFilter {
    selector: DocumentSelector,
    watch: FileWatchPattern,
}

impl EventFilter {
    #[must_use]
    pub fn new(selector: DocumentSelector, watch: FileWatchPattern) -> Self {
        Self { selector, watch }
    }

    /// Local `.tempo` files tagged with the Tempo language.
    pub fn tempo() -> Result<Self, globset::Error> {
        Ok(Self {
            selector: DocumentSelector::new(FILE_SCHEME, LANGUAGE_ID),
            watch: FileWatchPattern::new(&format!("**/*.{FILE_EXTENSION}"))?,
        })
    }

    #[must_use]
    pub fn selector(&self) -> &DocumentSelector {
        &self.selector
    }

    #[must_use]
    pub fn watch_pattern(&self) -> &FileWatchPattern {
        &self.watch
    }

    #[must_use]
    pub fn accepts_document(&self, uri: &Url, language_id: &str) -> bool {
        self.selector.matches(uri, language_id)
    }

    /// Whether a file event for `uri` should reach the server.
    /// Only `file:` URIs can match the watch pattern.
    #[must_use]
    pub fn accepts_file_event(&self, uri: &Url) -> bool {
        if uri.scheme() != FILE_SCHEME {
            return false;
        }
        uri.to_file_path()
            .is_ok_and(|path| self.watch.matches(&path))
    }
}
