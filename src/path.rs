//! Tree path algebra.
//!
//! - Child path construction (`mount_path`)
//! - Static and labeled slot paths (`slot_path`)
//! - Page wildcarding for content scoping
//!
//! Everything here is pure and total.

use std::sync::OnceLock;

use arcstr::ArcStr;
use regex::Regex;

/// Separator between tree path segments.
pub const SEPARATOR: char = '/';

/// Marker appended to a labeled slot instance whose value has no `#`.
pub const HASH_SLOT_MARKER: &str = "#slot";

/// Marker appended to a labeled slot instance whose value already has a `#`.
pub const DASH_SLOT_MARKER: &str = "-slot";

/// Page segment replacement used when scoping content queries.
pub const PAGE_WILDCARD: &str = "*";

fn slot_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-slot[^/]*$").expect("static slot suffix pattern"))
}

// ---------------------------------------------------------------------------
// Child paths
// ---------------------------------------------------------------------------

/// Compute the tree path of `child_id` mounted under `parent_path`.
///
/// When the parent path is the child id itself the parent path is returned
/// unchanged. This collapses the case where a component is both the mounting
/// context and the mounted id, which would otherwise double the segment.
pub fn mount_path(child_id: &str, parent_path: &str) -> ArcStr {
    if parent_path == child_id {
        return ArcStr::from(parent_path);
    }
    match (parent_path.is_empty(), child_id.is_empty()) {
        (false, false) => arcstr::format!("{}{}{}", parent_path, SEPARATOR, child_id),
        (false, true) => ArcStr::from(parent_path),
        (true, _) => ArcStr::from(child_id),
    }
}

// ---------------------------------------------------------------------------
// Slot paths
// ---------------------------------------------------------------------------

/// Remove a trailing `-slot…` marker from the last segment of `path`.
pub fn strip_slot_suffix(path: &str) -> &str {
    match slot_suffix_re().find(path) {
        Some(m) => &path[..m.start()],
        None => path,
    }
}

/// Static path of a slot instance: `base` without its slot marker, plus the
/// slot value as a new segment.
pub fn static_slot_path(base: &str, slot_value: &str) -> ArcStr {
    mount_path(slot_value, strip_slot_suffix(base))
}

/// Path of a slot instance, optionally labeled.
///
/// Labeled instances get a disambiguating marker so that several instances
/// sharing one slot value never collide. A value that already carries a `#`
/// gets `-slot{label}`, any other value gets `#slot{label}`.
pub fn slot_path(base: &str, slot_value: &str, label: Option<&str>) -> ArcStr {
    let static_path = static_slot_path(base, slot_value);
    match label {
        None => static_path,
        Some(label) => {
            let marker = if slot_value.contains('#') {
                DASH_SLOT_MARKER
            } else {
                HASH_SLOT_MARKER
            };
            arcstr::format!("{}{}{}", static_path, marker, label)
        }
    }
}

// ---------------------------------------------------------------------------
// Inspection helpers
// ---------------------------------------------------------------------------

/// Replace the leading `page` portion of `tree_path` with `*`.
///
/// Paths that do not start at `page` are returned unchanged.
pub fn page_wildcard(tree_path: &str, page: &str) -> String {
    if page.is_empty() {
        return tree_path.to_string();
    }
    match tree_path.strip_prefix(page) {
        Some("") => PAGE_WILDCARD.to_string(),
        Some(rest) if rest.starts_with(SEPARATOR) => format!("{}{}", PAGE_WILDCARD, rest),
        _ => tree_path.to_string(),
    }
}

/// Parent of `tree_path`, or `None` for a root path.
pub fn parent_path(tree_path: &str) -> Option<&str> {
    tree_path.rfind(SEPARATOR).map(|idx| &tree_path[..idx])
}

/// Iterate the segments of `tree_path`.
pub fn segments(tree_path: &str) -> impl Iterator<Item = &str> {
    tree_path.split(SEPARATOR).filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
