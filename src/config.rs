//! Runtime configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::RuntimeError;

/// Environment variable that forces manual style activation.
pub const DEBUG_STYLES_ENV: &str = "RENDER_RUNTIME_DEBUG_STYLES";

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub readiness: ReadinessPolicy,
    pub styles: StyleConfig,
    pub lazy_images: LazyImageConfig,
}

impl RuntimeConfig {
    /// Parse a config from JSON text.
    pub fn from_json_str(source: &str) -> Result<Self, RuntimeError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Read a config file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        let source = std::fs::read_to_string(path)?;
        Ok(Self::from_json_str(&source)?.with_env_overrides())
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var(DEBUG_STYLES_ENV) {
            self.styles.debug = matches!(value.as_str(), "1" | "true" | "yes");
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Readiness
// ---------------------------------------------------------------------------

/// Retry schedule for implementation readiness checks.
///
/// Retry `n` (1-based) waits `base_delay_ms - n * step_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReadinessPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub step_ms: u64,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay_ms: 1100,
            step_ms: 100,
        }
    }
}

impl ReadinessPolicy {
    /// Delay before retry `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = self
            .base_delay_ms
            .saturating_sub(u64::from(attempt).saturating_mul(self.step_ms));
        Duration::from_millis(ms)
    }

    /// Sum of every retry delay.
    pub fn worst_case_wait(&self) -> Duration {
        (1..=self.max_retries).map(|n| self.delay_for(n)).sum()
    }
}

// ---------------------------------------------------------------------------
// Styles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StyleConfig {
    /// Suppress automatic activation and allow manual controls.
    pub debug: bool,
    /// Id of the temporary critical style element.
    pub critical_style_id: String,
    /// Prefix of generated preload link ids.
    pub link_id_prefix: String,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            debug: false,
            critical_style_id: "critical".to_string(),
            link_id_prefix: "uncritical_style_".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Lazy images
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LazyImageConfig {
    /// Class marking an image as lazily loaded.
    pub lazy_class: String,
    /// Class marking a lazy image whose source has already been loaded.
    pub loaded_class: String,
    /// Attribute holding the deferred source.
    pub data_src_attr: String,
    /// Attribute carrying the owning tree path on server markup.
    pub tree_path_attr: String,
}

impl Default for LazyImageConfig {
    fn default() -> Self {
        Self {
            lazy_class: "lazyload".to_string(),
            loaded_class: "lazyloaded".to_string(),
            data_src_attr: "data-src".to_string(),
            tree_path_attr: "data-tree-path".to_string(),
        }
    }
}
