//! Layered prop merging.
//!
//! The final props of a resolved component are the fold of six ordered
//! layers through [`deep_merge`]. Later layers win:
//!
//! 1. `{ appSettings }` for the component's app, when one can be parsed
//! 2. parent-passed props
//! 3. the extension's declared props
//! 4. `blockProps`
//! 5. content
//! 6. `{ params, query }`
//!
//! [`PropCache`] memoizes the fold per tree path so that unchanged inputs
//! hand back the same `Arc`.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use arcstr::ArcStr;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use tracing::trace;

use crate::extension::Extension;

// ---------------------------------------------------------------------------
// Settings collaborator
// ---------------------------------------------------------------------------

/// Lookup of per-app settings.
pub trait SettingsLookup: Send + Sync {
    fn settings(&self, app: &str) -> Option<Arc<Value>>;
}

/// Settings lookup with nothing configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSettings;

impl SettingsLookup for NoSettings {
    fn settings(&self, _app: &str) -> Option<Arc<Value>> {
        None
    }
}

/// In-memory settings keyed by app name.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    apps: HashMap<String, Arc<Value>>,
}

impl StaticSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app(mut self, app: impl Into<String>, settings: Value) -> Self {
        self.apps.insert(app.into(), Arc::new(settings));
        self
    }
}

impl SettingsLookup for StaticSettings {
    fn settings(&self, app: &str) -> Option<Arc<Value>> {
        self.apps.get(app).cloned()
    }
}

/// App name of a component id: everything before the first `@`.
pub fn app_name(component: &str) -> Option<&str> {
    component
        .split_once('@')
        .map(|(app, _)| app)
        .filter(|app| !app.is_empty())
}

// ---------------------------------------------------------------------------
// Layers
// ---------------------------------------------------------------------------

/// Origin of a prop layer, in precedence order (lowest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PropSource {
    AppSettings,
    Parent,
    Declared,
    BlockProps,
    Content,
    Route,
}

/// The merge order. The fold applies layers left to right.
pub const MERGE_ORDER: [PropSource; 6] = [
    PropSource::AppSettings,
    PropSource::Parent,
    PropSource::Declared,
    PropSource::BlockProps,
    PropSource::Content,
    PropSource::Route,
];

/// One partial update applied during the fold.
#[derive(Debug, Clone)]
pub struct PropLayer<'a> {
    pub source: PropSource,
    pub value: Cow<'a, Value>,
}

/// Routing-derived values, always merged last.
#[derive(Debug, Clone)]
pub struct RouteValues {
    pub params: Arc<Value>,
    pub query: Arc<Value>,
}

impl Default for RouteValues {
    fn default() -> Self {
        Self {
            params: Arc::new(Value::Object(Map::new())),
            query: Arc::new(Value::Object(Map::new())),
        }
    }
}

impl RouteValues {
    pub fn new(params: Value, query: Value) -> Self {
        Self {
            params: Arc::new(params),
            query: Arc::new(query),
        }
    }
}

/// Parent layer of nodes mounted without parent props. One shared `Arc`
/// so that memoized merges keep matching across renders.
fn no_parent_props() -> Arc<Value> {
    static EMPTY: OnceLock<Arc<Value>> = OnceLock::new();
    Arc::clone(EMPTY.get_or_init(|| Arc::new(Value::Object(Map::new()))))
}

/// Everything one node's props are derived from.
#[derive(Debug, Clone)]
pub struct PropInputs {
    pub extension: Arc<Extension>,
    pub parent: Arc<Value>,
    pub block_props: Option<Arc<Value>>,
    pub route: RouteValues,
}

impl PropInputs {
    pub fn new(extension: Arc<Extension>, route: RouteValues) -> Self {
        Self {
            extension,
            parent: no_parent_props(),
            block_props: None,
            route,
        }
    }

    pub fn with_parent(mut self, parent: Arc<Value>) -> Self {
        self.parent = parent;
        self
    }

    pub fn with_block_props(mut self, block_props: Arc<Value>) -> Self {
        self.block_props = Some(block_props);
        self
    }

    /// The ordered layers for these inputs. `settings` is the already
    /// looked-up app settings, if any.
    pub fn layers<'a>(&'a self, settings: Option<&'a Value>) -> Vec<PropLayer<'a>> {
        let mut layers = Vec::with_capacity(MERGE_ORDER.len());
        for source in MERGE_ORDER {
            let value = match source {
                PropSource::AppSettings => match settings {
                    Some(settings) => Cow::Owned(json!({ "appSettings": settings })),
                    None => continue,
                },
                PropSource::Parent => Cow::Borrowed(self.parent.as_ref()),
                PropSource::Declared => Cow::Borrowed(&self.extension.props),
                PropSource::BlockProps => match &self.block_props {
                    Some(block_props) => Cow::Borrowed(block_props.as_ref()),
                    None => continue,
                },
                PropSource::Content => Cow::Borrowed(&self.extension.content),
                PropSource::Route => Cow::Owned(json!({
                    "params": self.route.params.as_ref(),
                    "query": self.route.query.as_ref(),
                })),
            };
            layers.push(PropLayer { source, value });
        }
        layers
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge `source` into `target`. Objects merge key by key; anything else
/// replaces the target wholesale.
pub fn deep_merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(t_map), Value::Object(s_map)) => {
            for (k, v) in s_map {
                deep_merge(t_map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
        (t, s) => {
            *t = s.clone();
        }
    }
}

/// Fold `layers` in order. Layers that are not objects are skipped.
pub fn fold_layers(layers: &[PropLayer<'_>]) -> Value {
    let mut merged = Value::Object(Map::new());
    for layer in layers {
        if !layer.value.is_object() {
            trace!(source = ?layer.source, "skipping non-object prop layer");
            continue;
        }
        deep_merge(&mut merged, &layer.value);
    }
    merged
}

/// Merge the props for `inputs` without memoization.
pub fn merge_props(inputs: &PropInputs, settings: &dyn SettingsLookup) -> Value {
    let app_settings = lookup_app_settings(&inputs.extension, settings);
    fold_layers(&inputs.layers(app_settings.as_deref()))
}

fn lookup_app_settings(ext: &Extension, settings: &dyn SettingsLookup) -> Option<Arc<Value>> {
    ext.component
        .as_deref()
        .and_then(app_name)
        .and_then(|app| settings.settings(app))
}

// ---------------------------------------------------------------------------
// Memoization
// ---------------------------------------------------------------------------

/// Inputs of the last merge for one node, held to compare identities.
#[derive(Debug, Clone)]
struct Memo {
    extension: Arc<Extension>,
    parent: Arc<Value>,
    block_props: Option<Arc<Value>>,
    settings: Option<Arc<Value>>,
    params: Arc<Value>,
    query: Arc<Value>,
    merged: Arc<Value>,
}

fn same_opt(a: &Option<Arc<Value>>, b: &Option<Arc<Value>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl Memo {
    fn matches(&self, inputs: &PropInputs, settings: &Option<Arc<Value>>) -> bool {
        Arc::ptr_eq(&self.extension, &inputs.extension)
            && Arc::ptr_eq(&self.parent, &inputs.parent)
            && same_opt(&self.block_props, &inputs.block_props)
            && same_opt(&self.settings, settings)
            && Arc::ptr_eq(&self.params, &inputs.route.params)
            && Arc::ptr_eq(&self.query, &inputs.route.query)
    }
}

/// Per-tree-path memo of merged props.
#[derive(Debug, Default)]
pub struct PropCache {
    memos: DashMap<ArcStr, Memo>,
}

impl PropCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merged props for the node at `tree_path`. Returns the previous `Arc`
    /// when no input changed identity since the last call.
    pub fn merge(
        &self,
        tree_path: &ArcStr,
        inputs: &PropInputs,
        settings: &dyn SettingsLookup,
    ) -> Arc<Value> {
        let app_settings = lookup_app_settings(&inputs.extension, settings);

        if let Some(memo) = self.memos.get(tree_path) {
            if memo.matches(inputs, &app_settings) {
                return Arc::clone(&memo.merged);
            }
        }

        let merged = Arc::new(fold_layers(&inputs.layers(app_settings.as_deref())));
        self.memos.insert(
            tree_path.clone(),
            Memo {
                extension: Arc::clone(&inputs.extension),
                parent: Arc::clone(&inputs.parent),
                block_props: inputs.block_props.clone(),
                settings: app_settings,
                params: Arc::clone(&inputs.route.params),
                query: Arc::clone(&inputs.route.query),
                merged: Arc::clone(&merged),
            },
        );
        merged
    }

    pub fn len(&self) -> usize {
        self.memos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memos.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
