//! Core type definitions for Bandwidth Saver
//!
//! These types mirror the JSON shapes exchanged with the extension's JS shell
//! (storage record, runtime messages) and are shared by every crate in the
//! workspace.

use serde::{Deserialize, Serialize};

// =============================================================================
// Settings
// =============================================================================

/// Capability toggles: which media categories get blocked.
///
/// Missing fields deserialize to `false`, i.e. blocking disabled for that
/// category. Fresh installs use [`Settings::install_defaults`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub block_images: bool,
    pub block_videos: bool,
    pub block_iframes: bool,
}

impl Settings {
    /// Everything blocked; written on first install.
    pub const fn install_defaults() -> Self {
        Self {
            block_images: true,
            block_videos: true,
            block_iframes: true,
        }
    }

    /// Nothing blocked.
    pub const fn disabled() -> Self {
        Self {
            block_images: false,
            block_videos: false,
            block_iframes: false,
        }
    }

    /// True when at least one category is enabled.
    pub fn any_enabled(&self) -> bool {
        self.block_images || self.block_videos || self.block_iframes
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Lifetime usage counters. Both fields only grow until an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase", default)]
pub struct Stats {
    /// Estimated bytes not downloaded
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub bandwidth_saved: u64,
    /// Elements removed or hidden
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub elements_blocked: u64,
}

impl Stats {
    /// Fold a delta into the accumulators. Saturates instead of wrapping.
    pub fn apply(&mut self, delta: &StatsDelta) {
        self.bandwidth_saved = self.bandwidth_saved.saturating_add(delta.bandwidth_saved);
        self.elements_blocked = self.elements_blocked.saturating_add(delta.elements_blocked);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Increment produced by one suppression pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase", default)]
pub struct StatsDelta {
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub bandwidth_saved: u64,
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub elements_blocked: u64,
}

impl StatsDelta {
    pub fn is_empty(&self) -> bool {
        self.bandwidth_saved == 0 && self.elements_blocked == 0
    }
}

// =============================================================================
// Media Kinds
// =============================================================================

/// Category of a matched element. Drives both the bandwidth estimate and the
/// suppression strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// `<video>`
    Video,
    /// Host-specific player container (hidden, not removed)
    RichPlayer,
    /// Embedded player `<iframe>`
    Iframe,
    /// `<img>`
    Image,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::RichPlayer => "rich-player",
            Self::Iframe => "iframe",
            Self::Image => "image",
        }
    }

    /// Rich players re-insert themselves when removed, so they are hidden
    /// behind a placeholder instead.
    pub fn is_hidden_in_place(&self) -> bool {
        matches!(self, Self::RichPlayer)
    }
}
