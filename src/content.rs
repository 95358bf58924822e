//! In-memory named-blob store for template assets.
//!
//! Assets arrive when a template package is loaded (or when a caller writes
//! one directly) and are addressed by `content://<name>` references through
//! the [`uri`](crate::uri) resolver. The store hands out `Arc` handles, so
//! resolving the same name repeatedly returns the same cheap clone instead
//! of copying the blob each time.
//!
//! The store is a field of whatever session owns it — there is no global
//! instance. Loading a new template package clears it.

use std::collections::BTreeMap;
use std::sync::Arc;

/// Named blobs backing `content://` references.
///
/// Names are the paths the assets had under the package's `assets/`
/// directory (forward slashes, no leading slash).
#[derive(Debug, Default, Clone)]
pub struct ContentStore {
    blobs: BTreeMap<String, Arc<Vec<u8>>>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a blob under `name`, replacing any previous entry.
    pub fn insert(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.blobs.insert(name.into(), Arc::new(bytes));
    }

    /// Stable handle to a blob. Cloning the returned `Arc` is the cached,
    /// churn-free path the resolver relies on.
    pub fn get(&self, name: &str) -> Option<Arc<Vec<u8>>> {
        self.blobs.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blobs.contains_key(name)
    }

    /// Remove every blob whose name starts with `prefix`. Returns how many
    /// entries were dropped.
    pub fn remove_prefix(&mut self, prefix: &str) -> usize {
        let doomed: Vec<String> = self
            .blobs
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        for name in &doomed {
            self.blobs.remove(name);
        }
        doomed.len()
    }

    /// Drop everything. Called when a new template package is loaded.
    pub fn clear(&mut self) {
        self.blobs.clear();
    }

    /// Asset names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.blobs.keys().map(String::as_str)
    }

    /// All entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<Vec<u8>>)> {
        self.blobs.iter().map(|(name, blob)| (name.as_str(), blob))
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}
