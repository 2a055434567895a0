//! Document registry: open documents and their synchronization versions.

use std::collections::HashMap;
use std::path::PathBuf;

use url::Url;

use crate::types::Document;

struct Entry {
    path: PathBuf,
    language_id: String,
    version: i32,
}

impl Entry {
    fn handle(&self, uri: &Url) -> Document {
        Document::new(
            self.path.clone(),
            uri.clone(),
            self.language_id.clone(),
            self.version,
        )
    }
}

/// Keyed by URI; the version here is authoritative over any handle.
#[derive(Default)]
pub(crate) struct DocumentRegistry {
    docs: HashMap<Url, Entry>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document at version 1.
    ///
    /// Returns the handle and whether it was newly registered; an already-open
    /// URI keeps its entry and current version.
    pub fn open(&mut self, path: PathBuf, uri: Url, language_id: &str) -> (Document, bool) {
        if let Some(entry) = self.docs.get(&uri) {
            return (entry.handle(&uri), false);
        }
        let entry = Entry {
            path,
            language_id: language_id.to_string(),
            version: 1,
        };
        let doc = entry.handle(&uri);
        self.docs.insert(uri, entry);
        (doc, true)
    }

    pub fn get(&self, uri: &Url) -> Option<Document> {
        self.docs.get(uri).map(|entry| entry.handle(uri))
    }

    /// Bump the version for a content change. `None` if not open.
    pub fn bump_version(&mut self, uri: &Url) -> Option<Document> {
        let entry = self.docs.get_mut(uri)?;
        entry.version += 1;
        Some(entry.handle(uri))
    }

    pub fn close(&mut self, uri: &Url) -> bool {
        self.docs.remove(uri).is_some()
    }

    pub fn contains(&self, uri: &Url) -> bool {
        self.docs.contains_key(uri)
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn clear(&mut self) {
        self.docs.clear();
    }
}
