//! Per-subtree hydration gate.
//!
//! ```text
//! FROZEN ──request──▶ LOADING ──verified──▶ LIVE
//!                        │
//!                        └──retries exhausted──▶ FAILED
//! ```
//!
//! A frozen subtree keeps its server markup untouched. Loading requests the
//! subtree's asset manifest and polls the loader until every component has
//! an implementation. Transitions only move forward.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use arcstr::ArcStr;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{LazyImageConfig, ReadinessPolicy};
use crate::dom::{self, Dom};
use crate::extension::Extension;
use crate::registry::ExtensionRegistry;
use crate::resolver;
use crate::RuntimeError;

// ---------------------------------------------------------------------------
// Asset loader collaborator
// ---------------------------------------------------------------------------

/// Every component needed to render one subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetManifest {
    pub tree_path: ArcStr,
    pub components: BTreeSet<String>,
}

/// Fetches bundles and exposes the implementation registry.
pub trait AssetLoader: Send + Sync {
    /// Request the bundles for every component in `manifest`.
    fn load_assets(
        &self,
        manifest: &AssetManifest,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Whether an implementation for `component` has been registered.
    fn has_implementation(&self, component: &str) -> bool;
}

/// Collect the components of the subtree rooted at `tree_path`, across every
/// block role.
pub fn collect_manifest(registry: &ExtensionRegistry, tree_path: &ArcStr) -> AssetManifest {
    let mut manifest = AssetManifest {
        tree_path: tree_path.clone(),
        components: BTreeSet::new(),
    };
    let mut visited = BTreeSet::new();
    let mut stack = vec![tree_path.clone()];

    while let Some(path) = stack.pop() {
        if !visited.insert(path.clone()) {
            continue;
        }
        let Some(resolution) = resolver::resolve(registry, &path) else {
            continue;
        };
        if let Some(component) = &resolution.extension.component {
            manifest.components.insert(component.clone());
        }
        stack.extend(resolution.blocks.into_iter().map(|b| b.tree_path));
    }
    manifest
}

// ---------------------------------------------------------------------------
// Readiness probe
// ---------------------------------------------------------------------------

/// Next action after observing readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStep {
    Ready,
    Retry { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

/// Bounded retry counter over a [`ReadinessPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct ReadinessProbe {
    policy: ReadinessPolicy,
    retries: u32,
}

impl ReadinessProbe {
    pub fn new(policy: ReadinessPolicy) -> Self {
        Self { policy, retries: 0 }
    }

    /// Record one readiness check.
    pub fn observe(&mut self, ready: bool) -> ProbeStep {
        if ready {
            return ProbeStep::Ready;
        }
        if self.retries >= self.policy.max_retries {
            return ProbeStep::Exhausted {
                attempts: self.retries,
            };
        }
        self.retries += 1;
        ProbeStep::Retry {
            attempt: self.retries,
            delay: self.policy.delay_for(self.retries),
        }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateState {
    Frozen,
    Loading,
    Live,
    Failed,
}

/// Facts about a subtree captured when its gate mounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HydrationRecord {
    pub has_rendered_on_server: bool,
    /// Hydration intent at first mount. Never re-read afterwards.
    pub initial_should_hydrate: bool,
    pub is_loaded: bool,
}

/// Sources of lazy images visible in frozen markup, taken before the swap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LazyImageSnapshot {
    pub sources: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct HydrationGate {
    tree_path: ArcStr,
    record: HydrationRecord,
    state: GateState,
    policy: ReadinessPolicy,
    images: LazyImageConfig,
}

impl HydrationGate {
    /// Mount a gate. Server markup is kept frozen only when hydration was
    /// not wanted at first mount.
    pub fn mount(tree_path: ArcStr, has_rendered_on_server: bool, should_hydrate: bool) -> Self {
        let state = if has_rendered_on_server && !should_hydrate {
            GateState::Frozen
        } else {
            GateState::Live
        };
        Self {
            tree_path,
            record: HydrationRecord {
                has_rendered_on_server,
                initial_should_hydrate: should_hydrate,
                is_loaded: state == GateState::Live,
            },
            state,
            policy: ReadinessPolicy::default(),
            images: LazyImageConfig::default(),
        }
    }

    /// Mount a gate for `ext`. Client-rendered extensions never have server
    /// markup to preserve.
    pub fn for_extension(tree_path: ArcStr, ext: &Extension, has_rendered_on_server: bool) -> Self {
        let on_server = has_rendered_on_server && !ext.is_client_rendered();
        Self::mount(tree_path, on_server, ext.hydration.is_immediate())
    }

    pub fn with_policy(mut self, policy: ReadinessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_image_config(mut self, images: LazyImageConfig) -> Self {
        self.images = images;
        self
    }

    pub fn tree_path(&self) -> &ArcStr {
        &self.tree_path
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn record(&self) -> HydrationRecord {
        self.record
    }

    /// Render gate: whether the live subtree may be rendered.
    pub fn is_ready(&self) -> bool {
        self.state == GateState::Live
    }

    /// Report the current hydration intent. Returns `true` when this moved a
    /// frozen gate into loading.
    pub fn request(&mut self, should_hydrate: bool) -> bool {
        if self.state != GateState::Frozen || !should_hydrate {
            return false;
        }
        if should_hydrate == self.record.initial_should_hydrate {
            return false;
        }
        debug!(tree_path = %self.tree_path, "hydration requested");
        self.state = GateState::Loading;
        true
    }

    /// Read the sources of already-loaded lazy images from frozen markup.
    pub fn snapshot_lazy_images(&self, dom: &dyn Dom) -> LazyImageSnapshot {
        let selector = dom::loaded_lazy_images_selector(&self.images, &self.tree_path);
        let sources = dom::query(dom, &selector)
            .into_iter()
            .filter_map(|el| {
                dom.attribute(el, "src")
                    .filter(|src| !src.is_empty())
                    .or_else(|| dom.attribute(el, &self.images.data_src_attr))
            })
            .collect();
        LazyImageSnapshot { sources }
    }

    /// Load the subtree's assets and wait for every implementation.
    ///
    /// Fails with [`RuntimeError::ImplementationUnavailable`] once the retry
    /// budget is spent; the gate is then `Failed` for good.
    pub async fn load<L: AssetLoader>(
        &mut self,
        registry: &ExtensionRegistry,
        loader: &L,
    ) -> Result<(), RuntimeError> {
        if self.state != GateState::Loading {
            return Err(RuntimeError::InvalidTransition {
                tree_path: self.tree_path.to_string(),
                from: self.state,
                to: GateState::Live,
            });
        }

        let manifest = collect_manifest(registry, &self.tree_path);
        debug!(
            tree_path = %self.tree_path,
            components = manifest.components.len(),
            "loading subtree assets"
        );
        if let Err(err) = loader.load_assets(&manifest).await {
            warn!(tree_path = %self.tree_path, error = %err, "asset load failed, verifying anyway");
        }

        let mut probe = ReadinessProbe::new(self.policy);
        loop {
            let missing = manifest
                .components
                .iter()
                .find(|c| !loader.has_implementation(c))
                .cloned();
            match probe.observe(missing.is_none()) {
                ProbeStep::Ready => break,
                ProbeStep::Retry { attempt, delay } => {
                    debug!(
                        tree_path = %self.tree_path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "implementation not ready, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                ProbeStep::Exhausted { attempts } => {
                    self.state = GateState::Failed;
                    let component = missing.unwrap_or_default();
                    error!(
                        tree_path = %self.tree_path,
                        component = %component,
                        attempts,
                        "component implementation unavailable"
                    );
                    return Err(RuntimeError::ImplementationUnavailable {
                        tree_path: self.tree_path.to_string(),
                        component,
                        attempts,
                    });
                }
            }
        }

        self.state = GateState::Live;
        self.record.is_loaded = true;
        info!(tree_path = %self.tree_path, "subtree live");
        Ok(())
    }

    /// After the live subtree replaced the frozen markup, pin images that
    /// were already loaded so they do not fall back to lazy placeholders.
    /// Returns the number of images pinned.
    pub fn pin_lazy_images(&self, dom: &mut dyn Dom, snapshot: &LazyImageSnapshot) -> usize {
        if self.state != GateState::Live {
            return 0;
        }
        let mut pinned = BTreeSet::new();
        for src in &snapshot.sources {
            let mut found = Vec::new();
            for attr in ["src", self.images.data_src_attr.as_str()] {
                let selector =
                    dom::image_by_source_selector(&self.images, &self.tree_path, attr, src);
                found.extend(dom::query(&*dom, &selector));
            }
            for el in found {
                if !pinned.insert(el) {
                    continue;
                }
                dom.set_attribute(el, "src", src);
                dom.remove_attribute(el, &self.images.data_src_attr);
                dom.remove_class(el, &self.images.lazy_class);
                dom.remove_class(el, &self.images.loaded_class);
                dom.set_attribute(el, "loading", "eager");
            }
        }
        pinned.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
