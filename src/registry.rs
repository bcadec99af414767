//! Shared extension registry keyed by tree path.
//!
//! The host populates the registry before resolution starts. Afterwards the
//! only permitted mutation is adding a key that does not exist yet; existing
//! entries are never replaced, so readers never observe a half-updated entry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arcstr::ArcStr;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::extension::Extension;

/// Outcome of an insert-if-absent.
#[derive(Debug, Clone)]
pub enum Insertion {
    /// The entry was created by this call.
    Created(Arc<Extension>),
    /// Another writer got there first; the existing entry is returned.
    Existing(Arc<Extension>),
}

impl Insertion {
    pub fn entry(&self) -> &Arc<Extension> {
        match self {
            Insertion::Created(ext) | Insertion::Existing(ext) => ext,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Insertion::Created(_))
    }
}

/// Thread-safe, append-only map from tree path to extension.
#[derive(Debug, Clone, Default)]
pub struct ExtensionRegistry {
    inner: Arc<DashMap<ArcStr, Arc<Extension>>>,
}

impl ExtensionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from host-provided entries.
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Extension)>,
        K: Into<ArcStr>,
    {
        let registry = Self::new();
        for (path, ext) in entries {
            registry.inner.insert(path.into(), Arc::new(ext));
        }
        registry
    }

    /// Parse a JSON object of `treePath -> extension` (null values skipped).
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let raw: HashMap<String, Option<Extension>> = serde_json::from_value(value)?;
        Ok(Self::from_entries(
            raw.into_iter()
                .filter_map(|(path, ext)| ext.map(|ext| (ArcStr::from(path), ext))),
        ))
    }

    /// Get the extension at `tree_path`.
    pub fn get(&self, tree_path: &str) -> Option<Arc<Extension>> {
        self.inner.get(tree_path).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether an extension exists at `tree_path`.
    pub fn contains(&self, tree_path: &str) -> bool {
        self.inner.contains_key(tree_path)
    }

    /// Insert `ext` at `tree_path` unless the key already exists.
    ///
    /// The check and the insert happen under the same shard lock.
    pub fn insert_if_absent(&self, tree_path: ArcStr, ext: Arc<Extension>) -> Insertion {
        match self.inner.entry(tree_path) {
            Entry::Occupied(occupied) => Insertion::Existing(Arc::clone(occupied.get())),
            Entry::Vacant(vacant) => {
                debug!(tree_path = %vacant.key(), "materialized registry entry");
                vacant.insert(Arc::clone(&ext));
                Insertion::Created(ext)
            }
        }
    }

    /// Number of registered paths.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Sorted copy of every entry, for inspection and serialization.
    pub fn snapshot(&self) -> BTreeMap<ArcStr, Arc<Extension>> {
        self.inner
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }
}
