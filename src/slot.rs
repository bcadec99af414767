//! Slot instances and dynamic slot materialization.
//!
//! An unlabeled slot instance renders its static path directly. A labeled
//! instance lives at its own dynamic path; the first render fetches content
//! for it and materializes a registry entry, later renders reuse that entry.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arcstr::ArcStr;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, error};

use crate::extension::{is_empty_content, Extension};
use crate::path;
use crate::registry::ExtensionRegistry;
use crate::RuntimeError;

// ---------------------------------------------------------------------------
// Content fetch collaborator
// ---------------------------------------------------------------------------

/// Scope of a block content request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding_id: Option<String>,
    /// Template page the slot is rendered on.
    pub template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    /// Dynamic path with the page prefix replaced by `*`.
    pub tree_path: String,
    pub page_context: Value,
}

/// One content candidate. Fetchers return `[override, default]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentCandidate {
    #[serde(rename = "contentJSON", default)]
    pub content_json: String,
}

impl ContentCandidate {
    pub fn new(content_json: impl Into<String>) -> Self {
        Self {
            content_json: content_json.into(),
        }
    }
}

/// Fetches per-block content.
pub trait ContentFetcher: Send + Sync {
    fn fetch_block_content(
        &self,
        query: &ContentQuery,
    ) -> impl Future<Output = anyhow::Result<Option<Vec<ContentCandidate>>>> + Send;
}

/// Pick the content to use: a non-empty override, else a non-empty default.
pub fn pick_content(
    candidates: Option<Vec<ContentCandidate>>,
) -> Result<Option<Value>, serde_json::Error> {
    for candidate in candidates.into_iter().flatten().take(2) {
        if candidate.content_json.trim().is_empty() {
            continue;
        }
        let parsed: Value = serde_json::from_str(&candidate.content_json)?;
        if !is_empty_content(&parsed) {
            return Ok(Some(parsed));
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Slot instances
// ---------------------------------------------------------------------------

/// Page-level values scoping content requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PageScope {
    pub binding_id: Option<String>,
    pub page: String,
    pub page_context: Value,
}

/// One rendering of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInstance<'a> {
    /// Tree path of the node rendering the slot.
    pub base_path: &'a str,
    /// Block id bound to the slot.
    pub slot_value: &'a str,
    /// Instance label supplied by the rendering call.
    pub label: Option<&'a str>,
}

impl<'a> SlotInstance<'a> {
    pub fn new(base_path: &'a str, slot_value: &'a str) -> Self {
        Self {
            base_path,
            slot_value,
            label: None,
        }
    }

    pub fn labeled(mut self, label: &'a str) -> Self {
        self.label = Some(label);
        self
    }

    pub fn static_path(&self) -> ArcStr {
        path::static_slot_path(self.base_path, self.slot_value)
    }

    /// Path the instance renders at.
    pub fn tree_path(&self) -> ArcStr {
        path::slot_path(self.base_path, self.slot_value, self.label)
    }
}

/// Whether the owner of a slot instance is still mounted.
#[derive(Debug, Clone)]
pub struct MountHandle(Arc<AtomicBool>);

impl Default for MountHandle {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl MountHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unmount(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_mounted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What to render for a slot instance right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOutcome {
    /// Render the entry at this path.
    Ready(ArcStr),
    /// Content is still being fetched; render nothing.
    Pending,
    /// Nothing to render.
    Nothing,
}

// ---------------------------------------------------------------------------
// Materializer
// ---------------------------------------------------------------------------

type InFlight = Arc<OnceCell<Arc<Extension>>>;

#[derive(Debug)]
pub struct SlotMaterializer {
    registry: ExtensionRegistry,
    scope: PageScope,
    in_flight: DashMap<ArcStr, InFlight>,
}

impl SlotMaterializer {
    pub fn new(registry: ExtensionRegistry, scope: PageScope) -> Self {
        Self {
            registry,
            scope,
            in_flight: DashMap::new(),
        }
    }

    /// Synchronous view for a render pass. Never fetches.
    pub fn peek(&self, instance: &SlotInstance<'_>) -> SlotOutcome {
        let static_path = instance.static_path();
        if !self.registry.contains(&static_path) {
            return SlotOutcome::Nothing;
        }
        if instance.label.is_none() {
            return SlotOutcome::Ready(static_path);
        }
        let dynamic = instance.tree_path();
        if self.registry.contains(&dynamic) {
            SlotOutcome::Ready(dynamic)
        } else {
            SlotOutcome::Pending
        }
    }

    /// Resolve `instance`, fetching and materializing its entry if needed.
    ///
    /// Overlapping calls for the same dynamic path share one fetch. A result
    /// arriving after `mount` was unmounted is not written to the registry.
    /// Fetch failures are logged and render nothing.
    pub async fn materialize<F: ContentFetcher>(
        &self,
        instance: &SlotInstance<'_>,
        fetcher: &F,
        mount: &MountHandle,
    ) -> SlotOutcome {
        let static_path = instance.static_path();
        let Some(base) = self.registry.get(&static_path) else {
            return SlotOutcome::Nothing;
        };
        if instance.label.is_none() {
            return SlotOutcome::Ready(static_path);
        }

        let dynamic = instance.tree_path();
        if self.registry.contains(&dynamic) {
            return SlotOutcome::Ready(dynamic);
        }

        let cell = Arc::clone(self.in_flight.entry(dynamic.clone()).or_default().value());
        let entry = match cell
            .get_or_try_init(|| self.fetch_entry(fetcher, &base, &dynamic))
            .await
        {
            Ok(entry) => Arc::clone(entry),
            Err(err) => {
                error!(tree_path = %dynamic, error = %err, "slot content fetch failed");
                self.in_flight.remove(&dynamic);
                return SlotOutcome::Nothing;
            }
        };

        if !mount.is_mounted() {
            debug!(tree_path = %dynamic, "ignoring slot content for unmounted instance");
            self.in_flight.remove(&dynamic);
            return SlotOutcome::Nothing;
        }

        self.registry.insert_if_absent(dynamic.clone(), entry);
        self.in_flight.remove(&dynamic);
        SlotOutcome::Ready(dynamic)
    }

    async fn fetch_entry<F: ContentFetcher>(
        &self,
        fetcher: &F,
        base: &Arc<Extension>,
        dynamic: &ArcStr,
    ) -> Result<Arc<Extension>, RuntimeError> {
        let query = ContentQuery {
            binding_id: self.scope.binding_id.clone(),
            template: self.scope.page.clone(),
            block_id: base.block_id.clone(),
            tree_path: path::page_wildcard(dynamic, &self.scope.page),
            page_context: self.scope.page_context.clone(),
        };
        debug!(tree_path = %dynamic, "fetching slot content");

        let candidates = fetcher
            .fetch_block_content(&query)
            .await
            .map_err(|source| RuntimeError::ContentFetch {
                tree_path: dynamic.to_string(),
                source,
            })?;
        let content = pick_content(candidates).map_err(|err| RuntimeError::ContentFetch {
            tree_path: dynamic.to_string(),
            source: err.into(),
        })?;

        Ok(match content {
            Some(content) => Arc::new(base.with_replaced_content(content)),
            None => Arc::clone(base),
        })
    }

    /// Number of dynamic paths with a fetch started but not yet written.
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }
}
