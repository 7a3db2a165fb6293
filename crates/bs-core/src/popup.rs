//! Popup page logic
//!
//! Toggle and reset handlers for the settings UI. Each handler reads the
//! stored record (defaults if absent), changes it, persists it and returns
//! the `settingsUpdated` message the page broadcasts afterwards.

use std::fmt;
use std::str::FromStr;

use crate::format::format_bytes;
use crate::message::Message;
use crate::storage::{load_or_default, save_settings, SettingsStore, StorageError, StoredSettings};
use crate::types::Stats;

/// One of the three settings checkboxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Toggle {
    Images,
    Videos,
    Iframes,
}

impl Toggle {
    /// Element id of the checkbox in the popup.
    pub fn element_id(&self) -> &'static str {
        match self {
            Self::Images => "blockImages",
            Self::Videos => "blockVideos",
            Self::Iframes => "blockIframes",
        }
    }
}

impl FromStr for Toggle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "images" | "blockImages" => Ok(Self::Images),
            "videos" | "blockVideos" => Ok(Self::Videos),
            "iframes" | "blockIframes" => Ok(Self::Iframes),
            other => Err(format!("Unknown toggle '{}'", other)),
        }
    }
}

impl fmt::Display for Toggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.element_id())
    }
}

/// Result of a popup action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupUpdate {
    pub record: StoredSettings,
    /// Broadcast after the write completes.
    pub message: Message,
}

fn persist<S: SettingsStore + ?Sized>(store: &mut S, record: StoredSettings) -> Result<PopupUpdate, StorageError> {
    save_settings(store, &record)?;
    Ok(PopupUpdate {
        record,
        message: Message::SettingsUpdated { settings: record },
    })
}

/// Flip one checkbox.
pub fn apply_toggle<S: SettingsStore + ?Sized>(
    store: &mut S,
    toggle: Toggle,
    enabled: bool,
) -> Result<PopupUpdate, StorageError> {
    let mut record = load_or_default(store);
    match toggle {
        Toggle::Images => record.settings.block_images = enabled,
        Toggle::Videos => record.settings.block_videos = enabled,
        Toggle::Iframes => record.settings.block_iframes = enabled,
    }
    persist(store, record)
}

/// Zero both counters.
pub fn reset_stats<S: SettingsStore + ?Sized>(store: &mut S) -> Result<PopupUpdate, StorageError> {
    let mut record = load_or_default(store);
    record.stats.reset();
    persist(store, record)
}

/// Display strings for the stats panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsDisplay {
    pub bandwidth_saved: String,
    pub elements_blocked: String,
}

impl From<&Stats> for StatsDisplay {
    fn from(stats: &Stats) -> Self {
        Self {
            bandwidth_saved: format_bytes(stats.bandwidth_saved),
            elements_blocked: stats.elements_blocked.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{read_settings, MemoryStore};
    use crate::types::StatsDelta;

    #[test]
    fn toggle_starts_from_defaults() {
        let mut store = MemoryStore::new();
        let update = apply_toggle(&mut store, Toggle::Images, false).unwrap();
        assert!(!update.record.settings.block_images);
        assert!(update.record.settings.block_videos);
        assert_eq!(read_settings(&store).unwrap(), Some(update.record));
        assert_eq!(
            update.message,
            Message::SettingsUpdated {
                settings: update.record
            }
        );
    }

    #[test]
    fn reset_zeroes_stats_only() {
        let mut store = MemoryStore::new();
        let mut record = StoredSettings::default();
        record.settings.block_iframes = false;
        record.apply_delta(&StatsDelta {
            bandwidth_saved: 4096,
            elements_blocked: 3,
        });
        save_settings(&mut store, &record).unwrap();

        let update = reset_stats(&mut store).unwrap();
        assert_eq!(update.record.stats, Stats::default());
        assert!(!update.record.settings.block_iframes);
    }

    #[test]
    fn parses_toggle_names() {
        assert_eq!("videos".parse::<Toggle>(), Ok(Toggle::Videos));
        assert_eq!("blockIframes".parse::<Toggle>(), Ok(Toggle::Iframes));
        assert!("audio".parse::<Toggle>().is_err());
        assert_eq!(Toggle::Images.to_string(), "blockImages");
    }

    #[test]
    fn stats_display() {
        let display = StatsDisplay::from(&Stats {
            bandwidth_saved: 1536,
            elements_blocked: 12,
        });
        assert_eq!(display.bandwidth_saved, "1.50 KB");
        assert_eq!(display.elements_blocked, "12");
    }
}
