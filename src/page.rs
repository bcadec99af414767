//! Page runtime: one page load's view of the extension tree.
//!
//! Wires the registry, resolver, prop cache and slot materializer together
//! to build render trees, and runs hydration gates with per-subtree failure
//! isolation. A subtree whose implementation never arrives is reported as
//! failed without stopping its siblings.

use std::collections::HashMap;
use std::sync::Arc;

use arcstr::ArcStr;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::dom::Dom;
use crate::extension::BlockRole;
use crate::hydration::{AssetLoader, GateState, HydrationGate};
use crate::props::{PropCache, PropInputs, RouteValues, SettingsLookup, StaticSettings};
use crate::registry::ExtensionRegistry;
use crate::resolver::{self, RenderElement, RenderTree, ResolvedBlock};
use crate::slot::{ContentFetcher, MountHandle, PageScope, SlotInstance, SlotMaterializer, SlotOutcome};
use crate::RuntimeError;

// ---------------------------------------------------------------------------
// Page state document
// ---------------------------------------------------------------------------

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Everything a host hands over for one page load.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageState {
    /// Tree path to render from.
    pub root: String,
    #[serde(default = "empty_object")]
    pub extensions: Value,
    #[serde(default = "empty_object")]
    pub params: Value,
    #[serde(default = "empty_object")]
    pub query: Value,
    #[serde(default)]
    pub scope: PageScope,
    #[serde(default)]
    pub settings: HashMap<String, Value>,
    #[serde(default)]
    pub config: RuntimeConfig,
}

impl PageState {
    pub fn from_json_str(source: &str) -> Result<Self, RuntimeError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Build the runtime for this page and return it with the root path.
    pub fn into_runtime(self) -> Result<(PageRuntime, ArcStr), RuntimeError> {
        if self.root.is_empty() {
            return Err(RuntimeError::InvalidPageState("root path is empty".into()));
        }
        let registry = ExtensionRegistry::from_json(self.extensions)?;
        let settings = self
            .settings
            .into_iter()
            .fold(StaticSettings::new(), |acc, (app, value)| acc.with_app(app, value));
        let runtime = PageRuntime::new(registry, self.scope, self.config)
            .with_settings(Arc::new(settings))
            .with_route(RouteValues::new(self.params, self.query));
        Ok((runtime, ArcStr::from(self.root)))
    }
}

// ---------------------------------------------------------------------------
// Hydration report
// ---------------------------------------------------------------------------

/// A subtree that could not go live.
#[derive(Debug)]
pub struct SubtreeFailure {
    pub tree_path: ArcStr,
    pub error: RuntimeError,
}

/// Outcome of one hydration round.
#[derive(Debug, Default)]
pub struct HydrationReport {
    pub live: Vec<ArcStr>,
    pub failed: Vec<SubtreeFailure>,
    pub pinned_images: usize,
}

impl HydrationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Props supplied by the code mounting an extension point.
#[derive(Debug, Clone, Default)]
pub struct MountProps {
    pub parent: Option<Arc<Value>>,
    pub block_props: Option<Arc<Value>>,
}

pub struct PageRuntime {
    registry: ExtensionRegistry,
    config: RuntimeConfig,
    settings: Arc<dyn SettingsLookup>,
    route: RouteValues,
    props: PropCache,
    slots: SlotMaterializer,
}

impl PageRuntime {
    pub fn new(registry: ExtensionRegistry, scope: PageScope, config: RuntimeConfig) -> Self {
        Self {
            slots: SlotMaterializer::new(registry.clone(), scope),
            registry,
            config,
            settings: Arc::new(StaticSettings::new()),
            route: RouteValues::default(),
            props: PropCache::new(),
        }
    }

    pub fn with_settings(mut self, settings: Arc<dyn SettingsLookup>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_route(mut self, route: RouteValues) -> Self {
        self.route = route;
        self
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn slots(&self) -> &SlotMaterializer {
        &self.slots
    }

    /// Render tree for `tree_path` with no call-site props or children.
    pub fn build_tree(&self, tree_path: &ArcStr) -> RenderTree {
        self.mount(tree_path, MountProps::default(), Vec::new())
    }

    /// Render tree for `tree_path` as mounted by a parent passing `props`
    /// and `call_site` children.
    pub fn mount(&self, tree_path: &ArcStr, props: MountProps, call_site: Vec<RenderTree>) -> RenderTree {
        let mut ancestors = Vec::new();
        self.mount_inner(tree_path, props, call_site, &mut ancestors)
    }

    fn mount_inner(
        &self,
        tree_path: &ArcStr,
        props: MountProps,
        call_site: Vec<RenderTree>,
        ancestors: &mut Vec<ArcStr>,
    ) -> RenderTree {
        let Some(resolution) = resolver::resolve(&self.registry, tree_path) else {
            return RenderTree::Nothing;
        };
        let ext = Arc::clone(&resolution.extension);
        let Some(component) = ext.component.clone() else {
            return RenderTree::Placeholder {
                tree_path: tree_path.clone(),
                preview: ext.preview.unwrap_or(false),
            };
        };

        ancestors.push(tree_path.clone());
        let build = |role: BlockRole, ancestors: &mut Vec<ArcStr>| -> Vec<RenderTree> {
            resolution
                .with_role(role)
                .map(|block| self.mount_block(block, ancestors))
                .collect()
        };
        let block_children = build(BlockRole::Children, ancestors);
        let slots = build(BlockRole::Slot, ancestors);
        let before = build(BlockRole::Before, ancestors);
        let after = build(BlockRole::After, ancestors);
        let arounds: Vec<RenderElement> = build(BlockRole::Around, ancestors)
            .into_iter()
            .filter_map(|tree| match tree {
                RenderTree::Element(el) => Some(*el),
                RenderTree::Nothing => None,
                other => {
                    debug!(
                        tree_path = %tree_path,
                        wrapper = ?other.tree_path(),
                        "around wrapper did not render an element, dropping it"
                    );
                    None
                }
            })
            .collect();
        ancestors.pop();

        let mut inputs = PropInputs::new(Arc::clone(&ext), self.route.clone());
        if let Some(parent) = props.parent {
            inputs = inputs.with_parent(parent);
        }
        if let Some(block_props) = props.block_props {
            inputs = inputs.with_block_props(block_props);
        }
        let merged = self.props.merge(tree_path, &inputs, self.settings.as_ref());

        let composed = resolver::compose_children(&ext, block_children, call_site);
        let node = RenderTree::Element(Box::new(RenderElement {
            tree_path: tree_path.clone(),
            component,
            props: merged,
            hydration: ext.hydration,
            client_only: ext.is_client_rendered(),
            children: composed.children,
            blocks: composed.blocks,
            slots,
        }));
        resolver::wrap(before, node, arounds, after)
    }

    fn mount_block(&self, block: &ResolvedBlock, ancestors: &mut Vec<ArcStr>) -> RenderTree {
        if ancestors.contains(&block.tree_path) {
            debug!(tree_path = %block.tree_path, "block refers back to an ancestor, not expanding");
            return RenderTree::Nothing;
        }
        let props = MountProps {
            parent: block.props.clone(),
            block_props: None,
        };
        self.mount_inner(&block.tree_path, props, Vec::new(), ancestors)
    }

    // -----------------------------------------------------------------------
    // Slots
    // -----------------------------------------------------------------------

    /// Render a slot instance from what the registry holds right now.
    /// Pending labeled instances render nothing.
    pub fn render_slot(&self, instance: &SlotInstance<'_>) -> RenderTree {
        match self.slots.peek(instance) {
            SlotOutcome::Ready(path) => self.build_tree(&path),
            SlotOutcome::Pending | SlotOutcome::Nothing => RenderTree::Nothing,
        }
    }

    /// Render a slot instance, fetching labeled content first if needed.
    pub async fn materialize_slot<F: ContentFetcher>(
        &self,
        instance: &SlotInstance<'_>,
        fetcher: &F,
        mount: &MountHandle,
    ) -> RenderTree {
        match self.slots.materialize(instance, fetcher, mount).await {
            SlotOutcome::Ready(path) => self.build_tree(&path),
            SlotOutcome::Pending | SlotOutcome::Nothing => RenderTree::Nothing,
        }
    }

    // -----------------------------------------------------------------------
    // Hydration
    // -----------------------------------------------------------------------

    /// Gate for the extension at `tree_path`.
    pub fn gate_for(&self, tree_path: &ArcStr, server_rendered: bool) -> Option<HydrationGate> {
        let ext = self.registry.get(tree_path)?;
        Some(
            HydrationGate::for_extension(tree_path.clone(), &ext, server_rendered)
                .with_policy(self.config.readiness)
                .with_image_config(self.config.lazy_images.clone()),
        )
    }

    /// One gate per element of `tree`.
    pub fn mount_gates(&self, tree: &RenderTree, server_rendered: bool) -> Vec<HydrationGate> {
        let mut gates = Vec::new();
        tree.for_each_element(&mut |el| {
            if let Some(gate) = self.gate_for(&el.tree_path, server_rendered) {
                gates.push(gate);
            }
        });
        gates
    }

    /// Load every gate that is in `Loading`, concurrently.
    ///
    /// For each gate that goes live, the lazy images loaded by then are
    /// snapshotted, `swap` replaces its frozen markup with the live subtree,
    /// and the snapshotted images are pinned. Gates that fail are reported
    /// and leave the others untouched.
    pub async fn hydrate<L: AssetLoader>(
        &self,
        gates: &mut [HydrationGate],
        loader: &L,
        dom: &mut dyn Dom,
        mut swap: impl FnMut(&mut dyn Dom, &ArcStr),
    ) -> HydrationReport {
        let registry = &self.registry;
        let results = join_all(gates.iter_mut().map(|gate| async move {
            if gate.state() == GateState::Loading {
                Some(gate.load(registry, loader).await)
            } else {
                None
            }
        }))
        .await;

        let mut report = HydrationReport::default();
        for (gate, result) in gates.iter().zip(results) {
            match result {
                None => {}
                Some(Ok(())) => {
                    // Images can finish lazy loading while the gate waits.
                    let snapshot = gate.snapshot_lazy_images(&*dom);
                    swap(&mut *dom, gate.tree_path());
                    report.pinned_images += gate.pin_lazy_images(&mut *dom, &snapshot);
                    report.live.push(gate.tree_path().clone());
                }
                Some(Err(error)) => {
                    warn!(tree_path = %gate.tree_path(), error = %error, "subtree failed to hydrate");
                    report.failed.push(SubtreeFailure {
                        tree_path: gate.tree_path().clone(),
                        error,
                    });
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::{BlockDescriptor, Extension};
    use serde_json::json;

    #[test]
    fn test_page_state_into_runtime() {
        let state = PageState::from_json_str(
            r#"{
                "root": "store.home",
                "extensions": { "store.home": { "component": "vtex.store@2.x/Home" } },
                "params": { "slug": "x" }
            }"#,
        )
        .unwrap();
        let (runtime, root) = state.into_runtime().unwrap();
        assert_eq!(root, "store.home");
        let tree = runtime.build_tree(&root);
        let el = tree.as_element().unwrap();
        assert_eq!(el.props["params"], json!({ "slug": "x" }));
    }

    #[test]
    fn test_empty_root_is_rejected() {
        let state = PageState::from_json_str(r#"{ "root": "" }"#).unwrap();
        assert!(matches!(
            state.into_runtime(),
            Err(RuntimeError::InvalidPageState(_))
        ));
    }

    #[test]
    fn test_self_referencing_block_terminates() {
        let registry = ExtensionRegistry::from_entries([(
            "header",
            Extension::new("Header").with_blocks(vec![BlockDescriptor::new("header")]),
        )]);
        let runtime = PageRuntime::new(registry, PageScope::default(), RuntimeConfig::default());
        let tree = runtime.build_tree(&"header".into());
        let el = tree.as_element().unwrap();
        assert_eq!(el.blocks, vec![RenderTree::Nothing]);
    }
}
