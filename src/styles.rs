//! Critical / uncritical stylesheet activation.
//!
//! Uncritical stylesheets are appended as preload links. Once every
//! scheduled link has loaded or failed, the loaded ones are promoted to
//! stylesheets in registration order and the critical style block is
//! removed. Stragglers settling afterwards are promoted on arrival.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::StyleConfig;
use crate::dom::{Dom, ElementId, PreloadLink};
use crate::RuntimeError;

/// An uncritical stylesheet to schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleRef {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
}

impl StyleRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            media: None,
        }
    }

    pub fn with_media(mut self, media: impl Into<String>) -> Self {
        self.media = Some(media.into());
        self
    }
}

/// Event fired by a preload link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Load,
    Error,
}

/// What recording an event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Unknown id or a repeated event for a settled id.
    Ignored,
    /// Recorded; other styles are still pending (or debug mode is on).
    Recorded,
    /// This event completed the set and triggered activation.
    Activated,
    /// Settled after activation and was promoted immediately.
    LateHydrated,
}

#[derive(Debug, Clone)]
struct ScheduledStyle {
    id: String,
    element: ElementId,
}

/// Page-load state of uncritical style activation.
#[derive(Debug, Clone)]
pub struct StyleActivation {
    config: StyleConfig,
    scheduled: Vec<ScheduledStyle>,
    /// Registration index to resolved id, `None` for load errors.
    settled: BTreeMap<usize, Option<String>>,
    promoted: BTreeSet<usize>,
    styles_hydrated: bool,
    next_link: usize,
}

impl StyleActivation {
    pub fn new(config: StyleConfig) -> Self {
        Self {
            config,
            scheduled: Vec::new(),
            settled: BTreeMap::new(),
            promoted: BTreeSet::new(),
            styles_hydrated: false,
            next_link: 0,
        }
    }

    /// Append a preload link for every ref whose media query matches now.
    /// Refs that do not match are neither appended nor counted. Returns the
    /// ids of the appended links.
    pub fn register(&mut self, dom: &mut dyn Dom, refs: &[StyleRef]) -> Vec<String> {
        let mut ids = Vec::new();
        for style in refs {
            if let Some(media) = &style.media {
                if !dom.media_matches(media) {
                    debug!(path = %style.path, media = %media, "skipping style, media does not match");
                    continue;
                }
            }
            let id = format!("{}{}", self.config.link_id_prefix, self.next_link);
            self.next_link += 1;
            let element = dom.append_link(&PreloadLink::style(
                id.clone(),
                style.path.clone(),
                style.media.clone(),
            ));
            self.scheduled.push(ScheduledStyle {
                id: id.clone(),
                element,
            });
            ids.push(id);
        }
        ids
    }

    /// Record a load or error event for the link `id`.
    pub fn on_link_event(&mut self, dom: &mut dyn Dom, id: &str, event: LinkEvent) -> EventOutcome {
        let Some(index) = self.scheduled.iter().position(|s| s.id == id) else {
            warn!(id, "event for unknown style link");
            return EventOutcome::Ignored;
        };
        if self.settled.contains_key(&index) {
            debug!(id, "duplicate style event ignored");
            return EventOutcome::Ignored;
        }

        let resolved = match event {
            LinkEvent::Load => Some(id.to_string()),
            LinkEvent::Error => {
                warn!(id, "uncritical style failed to load");
                None
            }
        };
        self.settled.insert(index, resolved);

        if self.styles_hydrated {
            if event == LinkEvent::Load {
                self.promote(dom, index);
            }
            return EventOutcome::LateHydrated;
        }
        if self.settled.len() == self.scheduled.len() && !self.config.debug {
            self.activate(dom);
            return EventOutcome::Activated;
        }
        EventOutcome::Recorded
    }

    fn activate(&mut self, dom: &mut dyn Dom) {
        let loaded: Vec<usize> = self.loaded_indices().collect();
        for index in &loaded {
            self.promote(dom, *index);
        }
        self.remove_critical(dom);
        self.styles_hydrated = true;
        info!(
            promoted = loaded.len(),
            total = self.scheduled.len(),
            "uncritical styles activated"
        );
    }

    fn loaded_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.settled
            .iter()
            .filter(|(_, id)| id.is_some())
            .map(|(index, _)| *index)
    }

    fn promote(&mut self, dom: &mut dyn Dom, index: usize) -> bool {
        if !self.promoted.insert(index) {
            return false;
        }
        let style = &self.scheduled[index];
        dom.set_attribute(style.element, "rel", "stylesheet");
        debug!(id = %style.id, "style promoted");
        true
    }

    fn remove_critical(&self, dom: &mut dyn Dom) -> bool {
        match dom.element_by_id(&self.config.critical_style_id) {
            Some(el) => {
                dom.remove_element(el);
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Manual controls (debug mode only)
    // -----------------------------------------------------------------------

    fn ensure_debug(&self) -> Result<(), RuntimeError> {
        if self.config.debug {
            Ok(())
        } else {
            Err(RuntimeError::DebugControlsDisabled)
        }
    }

    /// Promote every loaded style recorded so far. Returns how many were
    /// newly promoted.
    pub fn apply_all(&mut self, dom: &mut dyn Dom) -> Result<usize, RuntimeError> {
        self.ensure_debug()?;
        let loaded: Vec<usize> = self.loaded_indices().collect();
        Ok(loaded
            .into_iter()
            .filter(|index| self.promote(dom, *index))
            .count())
    }

    /// Promote the next loaded style in registration order. Returns its id.
    pub fn apply_one_step(&mut self, dom: &mut dyn Dom) -> Result<Option<String>, RuntimeError> {
        self.ensure_debug()?;
        let next = self
            .loaded_indices()
            .find(|index| !self.promoted.contains(index));
        Ok(next.map(|index| {
            self.promote(dom, index);
            self.scheduled[index].id.clone()
        }))
    }

    /// Remove the critical style block. Returns whether it was present.
    pub fn clear_critical(&mut self, dom: &mut dyn Dom) -> Result<bool, RuntimeError> {
        self.ensure_debug()?;
        Ok(self.remove_critical(dom))
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn total_styles(&self) -> usize {
        self.scheduled.len()
    }

    /// Settled styles in registration order, `None` marking errors.
    pub fn loaded_styles(&self) -> Vec<Option<String>> {
        self.settled.values().cloned().collect()
    }

    pub fn styles_hydrated(&self) -> bool {
        self.styles_hydrated
    }

    pub fn pending(&self) -> usize {
        self.scheduled.len() - self.settled.len()
    }
}
