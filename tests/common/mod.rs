//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use regex::Regex;
use render_runtime::dom::{Dom, ElementId, PreloadLink, SelectorError};
use render_runtime::hydration::{AssetLoader, AssetManifest};
use render_runtime::slot::{ContentCandidate, ContentFetcher, ContentQuery};

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    pub tag: String,
    /// Subtree the element belongs to.
    pub tree_path: Option<String>,
    pub attrs: BTreeMap<String, String>,
    pub classes: BTreeSet<String>,
    pub removed: bool,
}

/// Understands only the selector shapes the runtime builds:
/// `[data-tree-path="P"] img.class` and `[data-tree-path="P"] img[attr="v"]`.
#[derive(Debug)]
pub struct FakeDom {
    pub elements: Vec<FakeElement>,
    pub unmatched_media: HashSet<String>,
    selector_re: Regex,
}

impl Default for FakeDom {
    fn default() -> Self {
        Self {
            elements: Vec::new(),
            unmatched_media: HashSet::new(),
            selector_re: Regex::new(
                r#"^\[data-tree-path="((?:[^"\\]|\\.)*)"\] img(?:\.([\w-]+)|\[([\w-]+)="((?:[^"\\]|\\.)*)"\])$"#,
            )
            .unwrap(),
        }
    }
}

fn unescape(value: &str) -> String {
    value.replace("\\\"", "\"").replace("\\\\", "\\")
}

impl FakeDom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_image(&mut self, tree_path: &str, attrs: &[(&str, &str)], classes: &[&str]) -> ElementId {
        self.elements.push(FakeElement {
            tag: "img".into(),
            tree_path: Some(tree_path.into()),
            attrs: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            classes: classes.iter().map(|c| c.to_string()).collect(),
            removed: false,
        });
        self.elements.len() - 1
    }

    pub fn add_critical_style(&mut self, id: &str) -> ElementId {
        self.elements.push(FakeElement {
            tag: "style".into(),
            attrs: [("id".to_string(), id.to_string())].into_iter().collect(),
            ..Default::default()
        });
        self.elements.len() - 1
    }

    pub fn attr(&self, el: ElementId, name: &str) -> Option<&str> {
        self.elements[el].attrs.get(name).map(String::as_str)
    }

    pub fn has_class(&self, el: ElementId, class: &str) -> bool {
        self.elements[el].classes.contains(class)
    }

    pub fn is_present(&self, id: &str) -> bool {
        self.element_by_id(id).is_some()
    }

    pub fn links(&self) -> Vec<&FakeElement> {
        self.elements.iter().filter(|e| e.tag == "link" && !e.removed).collect()
    }

    pub fn stylesheet_hrefs(&self) -> Vec<String> {
        self.links()
            .into_iter()
            .filter(|e| e.attrs.get("rel").map(String::as_str) == Some("stylesheet"))
            .filter_map(|e| e.attrs.get("href").cloned())
            .collect()
    }

    /// Replace every image of `tree_path` with fresh copies, as a live
    /// render would.
    pub fn rerender_images(&mut self, tree_path: &str, fresh: Vec<FakeElement>) {
        for el in &mut self.elements {
            if el.tag == "img" && el.tree_path.as_deref() == Some(tree_path) {
                el.removed = true;
            }
        }
        self.elements.extend(fresh);
    }
}

impl Dom for FakeDom {
    fn query_selector_all(&self, selector: &str) -> Result<Vec<ElementId>, SelectorError> {
        let caps = self.selector_re.captures(selector).ok_or_else(|| SelectorError {
            selector: selector.to_string(),
            reason: "unsupported selector".to_string(),
        })?;
        let tree_path = unescape(&caps[1]);
        let class = caps.get(2).map(|m| m.as_str().to_string());
        let attr = caps
            .get(3)
            .map(|m| (m.as_str().to_string(), unescape(&caps[4])));

        Ok(self
            .elements
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.removed && e.tag == "img")
            .filter(|(_, e)| e.tree_path.as_deref() == Some(tree_path.as_str()))
            .filter(|(_, e)| match &class {
                Some(class) => e.classes.contains(class),
                None => true,
            })
            .filter(|(_, e)| match &attr {
                Some((name, value)) => e.attrs.get(name) == Some(value),
                None => true,
            })
            .map(|(idx, _)| idx)
            .collect())
    }

    fn element_by_id(&self, id: &str) -> Option<ElementId> {
        self.elements
            .iter()
            .position(|e| !e.removed && e.attrs.get("id").map(String::as_str) == Some(id))
    }

    fn attribute(&self, el: ElementId, name: &str) -> Option<String> {
        self.elements[el].attrs.get(name).cloned()
    }

    fn set_attribute(&mut self, el: ElementId, name: &str, value: &str) {
        self.elements[el].attrs.insert(name.to_string(), value.to_string());
    }

    fn remove_attribute(&mut self, el: ElementId, name: &str) {
        self.elements[el].attrs.remove(name);
    }

    fn remove_class(&mut self, el: ElementId, class: &str) {
        self.elements[el].classes.remove(class);
    }

    fn append_link(&mut self, link: &PreloadLink) -> ElementId {
        let mut attrs: BTreeMap<String, String> = [
            ("id", link.id.as_str()),
            ("rel", link.rel.as_str()),
            ("as", link.as_type.as_str()),
            ("href", link.href.as_str()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        if let Some(media) = &link.media {
            attrs.insert("media".into(), media.clone());
        }
        self.elements.push(FakeElement {
            tag: "link".into(),
            attrs,
            ..Default::default()
        });
        self.elements.len() - 1
    }

    fn remove_element(&mut self, el: ElementId) {
        self.elements[el].removed = true;
    }

    fn media_matches(&self, media: &str) -> bool {
        !self.unmatched_media.contains(media)
    }
}

/// A `FakeDom` that collaborators can also reach while the runtime holds it.
#[derive(Debug, Clone, Default)]
pub struct SharedDom(pub Arc<Mutex<FakeDom>>);

impl SharedDom {
    pub fn new(dom: FakeDom) -> Self {
        Self(Arc::new(Mutex::new(dom)))
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, FakeDom> {
        self.0.lock().unwrap()
    }
}

impl Dom for SharedDom {
    fn query_selector_all(&self, selector: &str) -> Result<Vec<ElementId>, SelectorError> {
        self.lock().query_selector_all(selector)
    }

    fn element_by_id(&self, id: &str) -> Option<ElementId> {
        self.lock().element_by_id(id)
    }

    fn attribute(&self, el: ElementId, name: &str) -> Option<String> {
        self.lock().attribute(el, name)
    }

    fn set_attribute(&mut self, el: ElementId, name: &str, value: &str) {
        self.lock().set_attribute(el, name, value)
    }

    fn remove_attribute(&mut self, el: ElementId, name: &str) {
        self.lock().remove_attribute(el, name)
    }

    fn remove_class(&mut self, el: ElementId, class: &str) {
        self.lock().remove_class(el, class)
    }

    fn append_link(&mut self, link: &PreloadLink) -> ElementId {
        self.lock().append_link(link)
    }

    fn remove_element(&mut self, el: ElementId) {
        self.lock().remove_element(el)
    }

    fn media_matches(&self, media: &str) -> bool {
        self.lock().media_matches(media)
    }
}

// ---------------------------------------------------------------------------
// Asset loader
// ---------------------------------------------------------------------------

/// Components become available after a configured number of failed checks.
#[derive(Debug, Default)]
pub struct FakeLoader {
    /// Component -> failed checks before it is available.
    ready_after: Mutex<HashMap<String, usize>>,
    never: HashSet<String>,
    pub loads: AtomicUsize,
    pub checks: AtomicUsize,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready_after(self, component: &str, failed_checks: usize) -> Self {
        self.ready_after
            .lock()
            .unwrap()
            .insert(component.to_string(), failed_checks);
        self
    }

    pub fn never(mut self, component: &str) -> Self {
        self.never.insert(component.to_string());
        self
    }
}

impl AssetLoader for FakeLoader {
    async fn load_assets(&self, _manifest: &AssetManifest) -> anyhow::Result<()> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn has_implementation(&self, component: &str) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.never.contains(component) {
            return false;
        }
        let mut ready_after = self.ready_after.lock().unwrap();
        match ready_after.get_mut(component) {
            Some(0) | None => true,
            Some(remaining) => {
                *remaining -= 1;
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Content fetcher
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FakeFetcher {
    response: Option<Vec<ContentCandidate>>,
    fail: bool,
    pub calls: AtomicUsize,
    pub queries: Mutex<Vec<ContentQuery>>,
}

impl FakeFetcher {
    pub fn returning(candidates: &[&str]) -> Self {
        Self {
            response: Some(candidates.iter().map(|c| ContentCandidate::new(*c)).collect()),
            ..Default::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ContentFetcher for FakeFetcher {
    async fn fetch_block_content(
        &self,
        query: &ContentQuery,
    ) -> anyhow::Result<Option<Vec<ContentCandidate>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.clone());
        tokio::task::yield_now().await;
        if self.fail {
            anyhow::bail!("content service unavailable");
        }
        Ok(self.response.clone())
    }
}
