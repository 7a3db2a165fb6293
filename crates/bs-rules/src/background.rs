//! Background service
//!
//! Routes runtime messages, keeps the stored stats up to date, swaps the
//! dynamic rule set when settings change and pushes the current settings to
//! freshly loaded tabs. Storage, the rule engine and tab messaging are host
//! collaborators behind traits.

use std::str::FromStr;

use log::{debug, warn};
use serde_json::Value;

use bs_core::message::{Message, MessageError};
use bs_core::storage::{load_or_default, read_settings, save_settings, SettingsStore, StorageError};
use bs_core::url::is_http_url;
use bs_core::{HostError, Settings, Stats, StatsDelta, StoredSettings};

use crate::rules::{DynamicRule, RuleSetUpdate};

/// Host declarative rule engine.
pub trait RuleEngine {
    fn dynamic_rule_ids(&self) -> Result<Vec<u32>, HostError>;

    fn update_dynamic_rules(&mut self, update: &RuleSetUpdate) -> Result<(), HostError>;
}

/// Host tab messaging.
pub trait TabMessenger {
    fn send_to_tab(&mut self, tab_id: i32, message: &Message) -> Result<(), HostError>;
}

/// Error type for background operations.
#[derive(Debug, thiserror::Error)]
pub enum BackgroundError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Message(#[from] MessageError),
}

/// What a handled message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    RulesReplaced { removed: usize, added: usize },
    StatsRecorded(Stats),
    Ignored,
}

/// Tab lifecycle status reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabStatus {
    Loading,
    Complete,
}

impl FromStr for TabStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "loading" => Ok(Self::Loading),
            "complete" => Ok(Self::Complete),
            other => Err(format!("Unknown tab status '{}'", other)),
        }
    }
}

pub struct Background<S, R, T> {
    store: S,
    rules: R,
    tabs: T,
}

impl<S, R, T> Background<S, R, T>
where
    S: SettingsStore,
    R: RuleEngine,
    T: TabMessenger,
{
    pub fn new(store: S, rules: R, tabs: T) -> Self {
        Self { store, rules, tabs }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn rules(&self) -> &R {
        &self.rules
    }

    pub fn tabs(&self) -> &T {
        &self.tabs
    }

    /// Install hook: write the default record unless one exists. Returns
    /// whether defaults were written.
    pub fn on_installed(&mut self) -> Result<bool, BackgroundError> {
        if read_settings(&self.store)?.is_some() {
            return Ok(false);
        }
        save_settings(&mut self.store, &StoredSettings::default())?;
        debug!("installed default settings");
        Ok(true)
    }

    /// Handle a raw runtime message. Unknown actions are ignored.
    pub fn handle_value(&mut self, value: &Value) -> Result<Handled, BackgroundError> {
        match Message::from_value(value)? {
            Some(message) => self.handle_message(&message),
            None => Ok(Handled::Ignored),
        }
    }

    pub fn handle_message(&mut self, message: &Message) -> Result<Handled, BackgroundError> {
        match message {
            Message::SettingsUpdated { settings } => self.replace_rules(&settings.settings),
            Message::UpdateStats { stats } => self.record_stats(stats).map(Handled::StatsRecorded),
            // Addressed to content scripts.
            Message::UpdateSettings { .. } => Ok(Handled::Ignored),
        }
    }

    /// Swap the entire dynamic rule set for `settings`.
    pub fn replace_rules(&mut self, settings: &Settings) -> Result<Handled, BackgroundError> {
        let current = self.rules.dynamic_rule_ids()?;
        let update = RuleSetUpdate::replace_all(current, settings);
        self.rules.update_dynamic_rules(&update)?;
        debug!(
            "dynamic rules replaced: -{} +{}",
            update.remove_rule_ids.len(),
            update.add_rules.len()
        );
        Ok(Handled::RulesReplaced {
            removed: update.remove_rule_ids.len(),
            added: update.add_rules.len(),
        })
    }

    /// Fold a delta into the stored stats and return the new totals.
    pub fn record_stats(&mut self, delta: &StatsDelta) -> Result<Stats, BackgroundError> {
        let mut record = load_or_default(&self.store);
        record.apply_delta(delta);
        save_settings(&mut self.store, &record)?;
        Ok(record.stats)
    }

    /// Tab update hook. On `complete` for an http(s) page, sends the stored
    /// record to the tab's content script. A tab without a listening content
    /// script is not an error. Returns whether a message was delivered.
    pub fn on_tab_updated(&mut self, tab_id: i32, status: TabStatus, url: &str) -> bool {
        if status != TabStatus::Complete || !is_http_url(url) {
            return false;
        }
        let settings = load_or_default(&self.store);
        match self.tabs.send_to_tab(tab_id, &Message::UpdateSettings { settings }) {
            Ok(()) => true,
            Err(e) => {
                debug!("tab {} not ready for settings: {}", tab_id, e);
                false
            }
        }
    }

    /// Best-effort variant of [`handle_value`](Self::handle_value): failures
    /// are logged, never returned.
    pub fn handle_value_quietly(&mut self, value: &Value) -> Handled {
        match self.handle_value(value) {
            Ok(handled) => handled,
            Err(e) => {
                warn!("message handling failed: {}", e);
                Handled::Ignored
            }
        }
    }
}

// =============================================================================
// In-memory Collaborators
// =============================================================================

/// Rule engine keeping rules in memory. Rejects duplicate ids like the host.
#[derive(Debug, Clone, Default)]
pub struct MemoryRuleEngine {
    rules: Vec<DynamicRule>,
}

impl MemoryRuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rules(&self) -> &[DynamicRule] {
        &self.rules
    }
}

impl RuleEngine for MemoryRuleEngine {
    fn dynamic_rule_ids(&self) -> Result<Vec<u32>, HostError> {
        Ok(self.rules.iter().map(|r| r.id).collect())
    }

    fn update_dynamic_rules(&mut self, update: &RuleSetUpdate) -> Result<(), HostError> {
        let mut next: Vec<DynamicRule> = self
            .rules
            .iter()
            .filter(|r| !update.remove_rule_ids.contains(&r.id))
            .cloned()
            .collect();
        for rule in &update.add_rules {
            if next.iter().any(|r| r.id == rule.id) {
                return Err(HostError::Call(format!("Rule with id {} already exists", rule.id)));
            }
            next.push(rule.clone());
        }
        self.rules = next;
        Ok(())
    }
}

/// Tab messenger that records deliveries. Tabs listed in `unready` reject.
#[derive(Debug, Clone, Default)]
pub struct RecordingTabs {
    pub sent: Vec<(i32, Message)>,
    pub unready: Vec<i32>,
}

impl TabMessenger for RecordingTabs {
    fn send_to_tab(&mut self, tab_id: i32, message: &Message) -> Result<(), HostError> {
        if self.unready.contains(&tab_id) {
            return Err(HostError::RecipientUnavailable);
        }
        self.sent.push((tab_id, *message));
        Ok(())
    }
}
