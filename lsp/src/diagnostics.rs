//! Latest diagnostics per document.

use std::collections::HashMap;

use url::Url;

use crate::types::{Diagnostic, DiagnosticsSnapshot};

pub(crate) struct DiagnosticsStore {
    data: HashMap<Url, Vec<Diagnostic>>,
}

impl DiagnosticsStore {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    /// Replace the diagnostics for `uri`; an empty list clears it.
    pub fn update(&mut self, uri: Url, items: Vec<Diagnostic>) {
        if items.is_empty() {
            self.data.remove(&uri);
        } else {
            self.data.insert(uri, items);
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Documents with errors first, then by URI.
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut files: Vec<(Url, Vec<Diagnostic>)> = self
            .data
            .iter()
            .map(|(uri, items)| (uri.clone(), items.clone()))
            .collect();

        files.sort_by(|a, b| {
            let a_errors = a.1.iter().any(|d| d.severity().is_error());
            let b_errors = b.1.iter().any(|d| d.severity().is_error());
            b_errors.cmp(&a_errors).then_with(|| a.0.cmp(&b.0))
        });

        DiagnosticsSnapshot::new(files)
    }
}
