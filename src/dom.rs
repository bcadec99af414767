//! Document surface driven by the hydration gate and style activation.
//!
//! The runtime never touches a physical document directly; hosts implement
//! [`Dom`]. Queries built from dynamic strings go through [`query`], which
//! logs malformed selectors and treats them as matching nothing.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::config::LazyImageConfig;

/// Opaque handle to a document element.
pub type ElementId = usize;

/// A selector the document refused to evaluate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid selector `{selector}`: {reason}")]
pub struct SelectorError {
    pub selector: String,
    pub reason: String,
}

/// A `<link>` element appended to preload an uncritical stylesheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreloadLink {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    pub rel: String,
    #[serde(rename = "as")]
    pub as_type: String,
    pub href: String,
}

impl PreloadLink {
    pub fn style(id: impl Into<String>, href: impl Into<String>, media: Option<String>) -> Self {
        Self {
            id: id.into(),
            media,
            rel: "preload".to_string(),
            as_type: "style".to_string(),
            href: href.into(),
        }
    }
}

/// Physical document operations.
pub trait Dom {
    fn query_selector_all(&self, selector: &str) -> Result<Vec<ElementId>, SelectorError>;
    fn element_by_id(&self, id: &str) -> Option<ElementId>;
    fn attribute(&self, el: ElementId, name: &str) -> Option<String>;
    fn set_attribute(&mut self, el: ElementId, name: &str, value: &str);
    fn remove_attribute(&mut self, el: ElementId, name: &str);
    fn remove_class(&mut self, el: ElementId, class: &str);
    fn append_link(&mut self, link: &PreloadLink) -> ElementId;
    fn remove_element(&mut self, el: ElementId);
    fn media_matches(&self, media: &str) -> bool;
}

/// Run `selector`, logging and swallowing selector errors.
pub fn query(dom: &dyn Dom, selector: &str) -> Vec<ElementId> {
    match dom.query_selector_all(selector) {
        Ok(found) => found,
        Err(err) => {
            warn!(error = %err, "selector query failed, treating as no match");
            Vec::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Selector construction
// ---------------------------------------------------------------------------

fn css_escape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"["\\]"#).expect("static css escape pattern"))
}

/// Quote `value` for use inside a double-quoted attribute selector.
pub fn css_string(value: &str) -> String {
    format!("\"{}\"", css_escape_re().replace_all(value, r"\$0"))
}

/// Selector for the server markup root of `tree_path`.
pub fn subtree_selector(config: &LazyImageConfig, tree_path: &str) -> String {
    format!("[{}={}]", config.tree_path_attr, css_string(tree_path))
}

/// Images under `tree_path` whose lazy source has already loaded.
pub fn loaded_lazy_images_selector(config: &LazyImageConfig, tree_path: &str) -> String {
    format!("{} img.{}", subtree_selector(config, tree_path), config.loaded_class)
}

/// Images under `tree_path` carrying `src` in `attr`.
pub fn image_by_source_selector(
    config: &LazyImageConfig,
    tree_path: &str,
    attr: &str,
    src: &str,
) -> String {
    format!("{} img[{}={}]", subtree_selector(config, tree_path), attr, css_string(src))
}
