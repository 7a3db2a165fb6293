//! Monitor configuration
//!
//! Tunables for the suppression monitor. The bandwidth figures are policy
//! heuristics, not measurements; they are kept here so hosts can override
//! them without touching the monitor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::MediaKind;

const MIB: u64 = 1024 * 1024;

/// Default coalescing window for mutation-triggered passes.
pub const DEFAULT_COALESCE_WINDOW_MS: u64 = 100;

/// Text shown in place of a hidden rich player.
pub const DEFAULT_PLACEHOLDER_TEXT: &str = "Video blocked by Bandwidth Saver";

/// Attribute stamped on placeholders (`placeholder`) and on hidden players
/// (`suppressed`).
pub const DEFAULT_MARKER_ATTRIBUTE: &str = "data-bandwidth-saver";

/// Per-category bandwidth estimates in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BandwidthEstimates {
    pub video: u64,
    pub rich_player: u64,
    pub iframe: u64,
    pub image: u64,
}

impl Default for BandwidthEstimates {
    fn default() -> Self {
        Self {
            video: 5 * MIB,
            rich_player: 10 * MIB,
            iframe: MIB,
            image: MIB,
        }
    }
}

impl BandwidthEstimates {
    pub fn for_kind(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Video => self.video,
            MediaKind::RichPlayer => self.rich_player,
            MediaKind::Iframe => self.iframe,
            MediaKind::Image => self.image,
        }
    }
}

/// Monitor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    /// Batches arriving within this window collapse into one pass.
    pub coalesce_window_ms: u64,
    pub estimates: BandwidthEstimates,
    pub placeholder_text: String,
    pub marker_attribute: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: DEFAULT_COALESCE_WINDOW_MS,
            estimates: BandwidthEstimates::default(),
            placeholder_text: DEFAULT_PLACEHOLDER_TEXT.to_string(),
            marker_attribute: DEFAULT_MARKER_ATTRIBUTE.to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }
}
