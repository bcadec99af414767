//! # Render Runtime
//!
//! Resolves a page described as a registry of extension points into a
//! concrete render tree, and controls how server-rendered subtrees become
//! interactive.
//!
//! # Architecture
//!
//! ```text
//! registry ─▶ resolver (path) ─▶ props ─▶ render tree ─▶ hydration gate
//!                  │                                          │
//!                  └── slot materializer ◀── content fetch    └── asset loader
//!
//! style activation runs on its own, driven by link load/error events
//! ```
//!
//! Collaborators (content fetch, asset loader, settings, document) are traits
//! implemented by the host.

pub mod config;
pub mod dom;
pub mod extension;
pub mod hydration;
pub mod page;
pub mod path;
pub mod props;
pub mod registry;
pub mod resolver;
pub mod slot;
pub mod styles;

use thiserror::Error;

pub use config::RuntimeConfig;
pub use extension::{BlockDescriptor, BlockRole, Extension, Hydration};
pub use hydration::{AssetLoader, GateState, HydrationGate};
pub use page::{PageRuntime, PageState};
pub use registry::ExtensionRegistry;
pub use resolver::{RenderElement, RenderTree};
pub use slot::{ContentFetcher, SlotInstance};
pub use styles::StyleActivation;

// ---------------------------------------------------------------------------
// RuntimeError
// ---------------------------------------------------------------------------

/// Errors surfaced by the runtime.
///
/// A missing registry entry is not an error: it resolves to
/// [`RenderTree::Nothing`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Component implementation unavailable for `{tree_path}` ({component}) after {attempts} retries")]
    ImplementationUnavailable {
        tree_path: String,
        component: String,
        attempts: u32,
    },

    #[error("Content fetch failed for `{tree_path}`: {source}")]
    ContentFetch {
        tree_path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid hydration transition for `{tree_path}`: {from:?} -> {to:?}")]
    InvalidTransition {
        tree_path: String,
        from: GateState,
        to: GateState,
    },

    #[error("Manual style controls are only available in debug mode")]
    DebugControlsDisabled,

    #[error("Invalid page state: {0}")]
    InvalidPageState(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Resolve the render tree of a page state document.
///
/// Labeled slots and hydration are not involved: this is the synchronous
/// first render from what the registry already holds.
pub fn resolve_page(source: &str) -> Result<RenderTree, RuntimeError> {
    let (runtime, root) = PageState::from_json_str(source)?.into_runtime()?;
    Ok(runtime.build_tree(&root))
}
