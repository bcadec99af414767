//! Tree resolution.
//!
//! [`resolve`] turns one registry entry into its ordered block list.
//! [`wrap`] and [`compose_children`] encode how resolved pieces nest:
//! before-elements, the node wrapped by its around-elements, after-elements.

use std::sync::Arc;

use arcstr::ArcStr;
use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use crate::extension::{BlockRole, Extension, Hydration};
use crate::path;
use crate::registry::ExtensionRegistry;

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// One block of a resolved node, with its computed path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedBlock {
    pub role: BlockRole,
    pub extension_point_id: String,
    pub tree_path: ArcStr,
    /// Declaration-site props, the child's parent-passed layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub props: Option<Arc<Value>>,
}

/// A registry entry together with its resolved blocks, in declaration order.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub tree_path: ArcStr,
    pub extension: Arc<Extension>,
    pub blocks: Vec<ResolvedBlock>,
}

impl Resolution {
    /// Blocks with `role`, in declaration order.
    pub fn with_role(&self, role: BlockRole) -> impl Iterator<Item = &ResolvedBlock> {
        self.blocks.iter().filter(move |b| b.role == role)
    }

    pub fn children(&self) -> impl Iterator<Item = &ResolvedBlock> {
        self.with_role(BlockRole::Children)
    }

    /// Child tree paths, in order.
    pub fn child_paths(&self) -> Vec<ArcStr> {
        self.children().map(|b| b.tree_path.clone()).collect()
    }
}

/// Resolve the node at `tree_path`.
///
/// `None` means "render nothing": optional extension points are routinely
/// absent, so this is not an error.
pub fn resolve(registry: &ExtensionRegistry, tree_path: &ArcStr) -> Option<Resolution> {
    let Some(extension) = registry.get(tree_path) else {
        trace!(tree_path = %tree_path, "no extension registered");
        return None;
    };

    let mut blocks = Vec::with_capacity(extension.blocks.len());
    for block in &extension.blocks {
        let props = block.props.clone();
        let id = block.extension_point_id.as_str();

        if block.is_child() {
            blocks.push(ResolvedBlock {
                role: BlockRole::Children,
                extension_point_id: id.to_string(),
                tree_path: path::mount_path(id, tree_path),
                props: props.clone(),
            });
        }

        let sibling = match block.block_role {
            Some(BlockRole::Slot) => Some((BlockRole::Slot, path::slot_path(tree_path, id, None))),
            Some(role @ (BlockRole::Before | BlockRole::After | BlockRole::Around)) => {
                Some((role, path::mount_path(id, tree_path)))
            }
            Some(BlockRole::Children) | None => None,
        };
        if let Some((role, block_path)) = sibling {
            blocks.push(ResolvedBlock {
                role,
                extension_point_id: id.to_string(),
                tree_path: block_path,
                props,
            });
        }
    }

    Some(Resolution {
        tree_path: tree_path.clone(),
        extension,
        blocks,
    })
}

// ---------------------------------------------------------------------------
// Render tree
// ---------------------------------------------------------------------------

/// A rendered component.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderElement {
    pub tree_path: ArcStr,
    pub component: String,
    pub props: Arc<Value>,
    pub hydration: Hydration,
    pub client_only: bool,
    /// Render children after composition.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RenderTree>,
    /// Child blocks the component places itself.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<RenderTree>,
    /// Unlabeled slot instances.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub slots: Vec<RenderTree>,
}

/// Output of resolving a subtree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RenderTree {
    /// Absent extension or pending content.
    Nothing,
    /// Registry entry without a component.
    Placeholder { tree_path: ArcStr, preview: bool },
    Element(Box<RenderElement>),
    Fragment { nodes: Vec<RenderTree> },
}

impl RenderTree {
    pub fn is_nothing(&self) -> bool {
        matches!(self, RenderTree::Nothing)
    }

    pub fn as_element(&self) -> Option<&RenderElement> {
        match self {
            RenderTree::Element(el) => Some(el),
            _ => None,
        }
    }

    /// Tree path of the outermost node, if it has one.
    pub fn tree_path(&self) -> Option<&ArcStr> {
        match self {
            RenderTree::Element(el) => Some(&el.tree_path),
            RenderTree::Placeholder { tree_path, .. } => Some(tree_path),
            _ => None,
        }
    }

    /// Visit every element, depth first, parents before children.
    pub fn for_each_element<'a>(&'a self, f: &mut dyn FnMut(&'a RenderElement)) {
        match self {
            RenderTree::Element(el) => {
                f(el);
                for tree in el.children.iter().chain(&el.blocks).chain(&el.slots) {
                    tree.for_each_element(f);
                }
            }
            RenderTree::Fragment { nodes } => {
                for node in nodes {
                    node.for_each_element(f);
                }
            }
            RenderTree::Nothing | RenderTree::Placeholder { .. } => {}
        }
    }
}

/// Children of a node after applying its composition.
#[derive(Debug, Default)]
pub struct ComposedChildren {
    pub children: Vec<RenderTree>,
    pub blocks: Vec<RenderTree>,
}

/// Apply the composition override.
///
/// An extension composing `children` with any declared blocks replaces the
/// call-site children with its own child blocks. Otherwise call-site
/// children pass through and the child blocks stay available to the
/// component.
pub fn compose_children(
    ext: &Extension,
    block_children: Vec<RenderTree>,
    call_site: Vec<RenderTree>,
) -> ComposedChildren {
    if ext.composes_children() && !ext.blocks.is_empty() {
        ComposedChildren {
            children: block_children,
            blocks: Vec::new(),
        }
    } else {
        ComposedChildren {
            children: call_site,
            blocks: block_children,
        }
    }
}

/// Nest `node` in its around wrappers and surround it with before/after
/// elements.
///
/// Each around wrapper takes the accumulated result as its only child, so
/// the last wrapper in declaration order ends up outermost.
pub fn wrap(
    before: Vec<RenderTree>,
    node: RenderTree,
    arounds: Vec<RenderElement>,
    after: Vec<RenderTree>,
) -> RenderTree {
    let wrapped = arounds.into_iter().fold(node, |inner, mut wrapper| {
        wrapper.children = vec![inner];
        RenderTree::Element(Box::new(wrapper))
    });

    let before: Vec<_> = before.into_iter().filter(|t| !t.is_nothing()).collect();
    let after: Vec<_> = after.into_iter().filter(|t| !t.is_nothing()).collect();
    if before.is_empty() && after.is_empty() {
        return wrapped;
    }

    let mut nodes = before;
    nodes.push(wrapped);
    nodes.extend(after);
    RenderTree::Fragment { nodes }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::BlockDescriptor;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn element(path: &str) -> RenderElement {
        RenderElement {
            tree_path: ArcStr::from(path),
            component: path.to_string(),
            props: Arc::new(json!({})),
            hydration: Hydration::Always,
            client_only: false,
            children: Vec::new(),
            blocks: Vec::new(),
            slots: Vec::new(),
        }
    }

    #[test]
    fn test_resolve_single_child() {
        let registry = ExtensionRegistry::from_entries([
            ("a", Extension::new("X").with_blocks(vec![BlockDescriptor::new("b")])),
            ("a/b", Extension::new("Y")),
        ]);
        let resolution = resolve(&registry, &"a".into()).unwrap();
        assert_eq!(resolution.child_paths(), vec![ArcStr::from("a/b")]);
        assert_eq!(resolution.blocks[0].role, BlockRole::Children);
    }

    #[test]
    fn test_resolve_absent_is_none() {
        let registry = ExtensionRegistry::new();
        assert!(resolve(&registry, &"missing".into()).is_none());
    }

    #[test]
    fn test_resolve_partitions_roles_in_order() {
        let registry = ExtensionRegistry::from_entries([(
            "p",
            Extension::new("X").with_blocks(vec![
                BlockDescriptor::new("w1").with_role(BlockRole::Around).with_children_flag(false),
                BlockDescriptor::new("c1"),
                BlockDescriptor::new("b1").with_role(BlockRole::Before).with_children_flag(false),
                BlockDescriptor::new("w2").with_role(BlockRole::Around).with_children_flag(false),
                BlockDescriptor::new("s1").with_role(BlockRole::Slot),
                BlockDescriptor::new("a1").with_role(BlockRole::After).with_children_flag(false),
                BlockDescriptor::new("c2").with_role(BlockRole::Children).with_children_flag(false),
            ]),
        )]);
        let r = resolve(&registry, &"p".into()).unwrap();
        let ids = |role| r.with_role(role).map(|b| b.extension_point_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(BlockRole::Children), vec!["c1", "c2"]);
        assert_eq!(ids(BlockRole::Around), vec!["w1", "w2"]);
        assert_eq!(ids(BlockRole::Before), vec!["b1"]);
        assert_eq!(ids(BlockRole::After), vec!["a1"]);
        assert_eq!(ids(BlockRole::Slot), vec!["s1"]);
        let slot = r.with_role(BlockRole::Slot).next().unwrap();
        assert_eq!(slot.tree_path, "p/s1");
    }

    #[test]
    fn test_self_reference_child() {
        let registry = ExtensionRegistry::from_entries([(
            "header",
            Extension::new("X").with_blocks(vec![BlockDescriptor::new("header")]),
        )]);
        let r = resolve(&registry, &"header".into()).unwrap();
        assert_eq!(r.child_paths(), vec![ArcStr::from("header")]);
    }

    #[test]
    fn test_wrap_last_around_is_outermost() {
        let node = RenderTree::Element(Box::new(element("p")));
        let tree = wrap(
            vec![RenderTree::Element(Box::new(element("p/b1")))],
            node,
            vec![element("p/w1"), element("p/w2")],
            vec![RenderTree::Nothing, RenderTree::Element(Box::new(element("p/a1")))],
        );
        let RenderTree::Fragment { nodes } = tree else {
            panic!("expected fragment");
        };
        let paths: Vec<_> = nodes.iter().map(|n| n.tree_path().unwrap().to_string()).collect();
        assert_eq!(paths, vec!["p/b1", "p/w2", "p/a1"]);

        let outer = nodes[1].as_element().unwrap();
        let inner = outer.children[0].as_element().unwrap();
        assert_eq!(inner.tree_path, "p/w1");
        assert_eq!(inner.children[0].tree_path().unwrap(), "p");
    }

    #[test]
    fn test_wrap_without_siblings_returns_node() {
        let node = RenderTree::Element(Box::new(element("p")));
        assert_eq!(wrap(vec![], node.clone(), vec![], vec![]), node);
    }

    #[test]
    fn test_compose_children_override() {
        let call_site = vec![RenderTree::Element(Box::new(element("call")))];
        let block = vec![RenderTree::Element(Box::new(element("p/c")))];

        let composing = Extension::new("X")
            .with_blocks(vec![BlockDescriptor::new("c")])
            .with_composition(crate::extension::Composition::Children);
        let composed = compose_children(&composing, block.clone(), call_site.clone());
        assert_eq!(composed.children, block);
        assert!(composed.blocks.is_empty());

        let plain = Extension::new("X").with_blocks(vec![BlockDescriptor::new("c")]);
        let composed = compose_children(&plain, block.clone(), call_site.clone());
        assert_eq!(composed.children, call_site);
        assert_eq!(composed.blocks, block);
    }
}
