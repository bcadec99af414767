//! Registry value types.
//!
//! These mirror the wire format hosts use to describe a page: camelCase
//! field names, optional fields defaulted.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Block descriptors
// ---------------------------------------------------------------------------

/// Relationship between a block and the extension that declares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockRole {
    Children,
    Around,
    Before,
    After,
    Slot,
}

/// Declarative descriptor of one child or sibling relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDescriptor {
    pub extension_point_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_role: Option<BlockRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<bool>,
    /// Props given at the declaration site, passed to the block as its
    /// parent-passed layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<Arc<Value>>,
}

impl BlockDescriptor {
    pub fn new(extension_point_id: impl Into<String>) -> Self {
        Self {
            extension_point_id: extension_point_id.into(),
            block_role: None,
            children: None,
            props: None,
        }
    }

    pub fn with_role(mut self, role: BlockRole) -> Self {
        self.block_role = Some(role);
        self
    }

    pub fn with_children_flag(mut self, children: bool) -> Self {
        self.children = Some(children);
        self
    }

    pub fn with_props(mut self, props: Value) -> Self {
        self.props = Some(Arc::new(props));
        self
    }

    /// A block is a child when it opts in (or predates the flag) and is not
    /// a slot.
    pub fn is_child(&self) -> bool {
        if self.block_role == Some(BlockRole::Slot) {
            return false;
        }
        self.children.is_none()
            || self.children == Some(true)
            || self.block_role == Some(BlockRole::Children)
    }
}

// ---------------------------------------------------------------------------
// Extension
// ---------------------------------------------------------------------------

/// How an extension composes its child blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Composition {
    /// Child blocks replace call-site children.
    Children,
    /// The component places its blocks itself.
    Blocks,
    #[serde(other)]
    Other,
}

/// Where an extension is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    Client,
    Server,
    #[serde(other)]
    Other,
}

/// Hydration trigger declared by an extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Hydration {
    #[default]
    Always,
    OnView,
    OnInteraction,
    ClientOnly,
    /// Unrecognized mode, handled like `Always`.
    #[serde(other)]
    Unknown,
}

impl Hydration {
    /// Whether hydration is wanted as soon as the node mounts.
    pub fn is_immediate(self) -> bool {
        matches!(self, Hydration::Always | Hydration::Unknown)
    }

    /// Whether the node never has server markup to preserve.
    pub fn is_client_only(self) -> bool {
        self == Hydration::ClientOnly
    }
}

/// One registry entry.
///
/// `component: None` renders a structural placeholder; a missing entry
/// renders nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default = "empty_object")]
    pub props: Value,
    #[serde(default = "empty_object")]
    pub content: Value,
    #[serde(default)]
    pub blocks: Vec<BlockDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition: Option<Composition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render: Option<RenderMode>,
    #[serde(default)]
    pub hydration: Hydration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Extension {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: Some(component.into()),
            props: empty_object(),
            content: empty_object(),
            ..Default::default()
        }
    }

    /// A placeholder entry (no component).
    pub fn placeholder() -> Self {
        Self {
            component: None,
            props: empty_object(),
            content: empty_object(),
            ..Default::default()
        }
    }

    pub fn with_blocks(mut self, blocks: Vec<BlockDescriptor>) -> Self {
        self.blocks = blocks;
        self
    }

    pub fn with_props(mut self, props: Value) -> Self {
        self.props = props;
        self
    }

    pub fn with_content(mut self, content: Value) -> Self {
        self.content = content;
        self
    }

    pub fn with_composition(mut self, composition: Composition) -> Self {
        self.composition = Some(composition);
        self
    }

    pub fn with_hydration(mut self, hydration: Hydration) -> Self {
        self.hydration = hydration;
        self
    }

    /// Whether child blocks override call-site children.
    pub fn composes_children(&self) -> bool {
        self.composition == Some(Composition::Children)
    }

    /// Whether the extension is only ever rendered on the client.
    pub fn is_client_rendered(&self) -> bool {
        self.render == Some(RenderMode::Client) || self.hydration.is_client_only()
    }

    /// Copy of this entry carrying `content` instead of its own.
    pub fn with_replaced_content(&self, content: Value) -> Self {
        Self {
            content,
            ..self.clone()
        }
    }
}

/// Whether a JSON value carries no content.
pub fn is_empty_content(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
