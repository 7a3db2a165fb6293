//! WebAssembly bindings for Bandwidth Saver
//!
//! [`ContentScript`] runs the media monitor on a live page. The free
//! functions back the background service worker and the popup: rule
//! generation, stats folding, toggles and formatting. JSON-shaped values
//! cross the boundary as plain JS objects.

mod web;

use std::rc::Rc;
use std::sync::Once;

use bs_core::message::Message;
use bs_core::popup::{self, Toggle};
use bs_core::storage::{save_settings, MemoryStore, StoredSettings};
use bs_core::url::{extract_host, is_http_url};
use bs_core::{format_bytes, MonitorConfig, MonitorEvent, Settings, StatsDelta};
use bs_rules::{generate_rules, RuleSetUpdate, TabStatus};
use serde::de::DeserializeOwned;
use serde::Serialize;
use wasm_bindgen::prelude::*;

use crate::web::Runtime;

// =============================================================================
// Logging
// =============================================================================

static LOGGER_INIT: Once = Once::new();

/// Route `log` output to the page console. `level` is one of `error`,
/// `warn`, `info`, `debug`, `trace`; anything else turns logging off.
#[wasm_bindgen]
pub fn init_logging(level: &str) {
    let filter: log::LevelFilter = level.parse().unwrap_or(log::LevelFilter::Off);
    // The console logger passes everything; the max level does the filtering.
    LOGGER_INIT.call_once(|| wasm_logger::init(wasm_logger::Config::new(log::Level::Trace)));
    log::set_max_level(filter);
}

// =============================================================================
// JS values
// =============================================================================

fn to_rust<T: DeserializeOwned>(value: &JsValue) -> Result<T, JsValue> {
    serde_wasm_bindgen::from_value(value.clone()).map_err(|e| JsValue::from_str(&format!("Invalid value: {}", e)))
}

/// Plain objects and numbers, the shape extension APIs expect.
pub(crate) fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(JsValue::from)
}

/// Settings objects; `undefined` / `null` mean everything off.
fn settings_or_disabled(settings: &JsValue) -> Result<Settings, JsValue> {
    if settings.is_undefined() || settings.is_null() {
        return Ok(Settings::disabled());
    }
    to_rust(settings)
}

/// Read a stored record; `undefined` / `null` mean a fresh install.
fn record_or_default(record: &JsValue) -> Result<StoredSettings, JsValue> {
    if record.is_undefined() || record.is_null() {
        return Ok(StoredSettings::default());
    }
    to_rust(record)
}

// =============================================================================
// Content script
// =============================================================================

/// Media monitor bound to the current page.
#[wasm_bindgen]
pub struct ContentScript {
    runtime: Rc<Runtime>,
}

#[wasm_bindgen]
impl ContentScript {
    /// `send_stats` receives each `updateStats` message; it may return a
    /// promise, whose rejection is ignored. `page_host` defaults to
    /// `location.hostname`.
    #[wasm_bindgen(constructor)]
    pub fn new(send_stats: js_sys::Function, page_host: Option<String>) -> Result<ContentScript, JsValue> {
        let window = web_sys::window().ok_or_else(|| JsValue::from_str("No window"))?;
        let document = window.document().ok_or_else(|| JsValue::from_str("No document"))?;
        let page_host = match page_host {
            Some(host) => Some(host),
            None => window.location().hostname().ok(),
        };
        let runtime = Runtime::new(
            window,
            document,
            send_stats,
            MonitorConfig::default(),
            page_host.as_deref().filter(|host| !host.is_empty()),
        );
        Ok(ContentScript { runtime })
    }

    /// Apply a settings object (or a whole stored record). Missing toggles
    /// are off.
    pub fn configure(&self, settings: JsValue) -> Result<(), JsValue> {
        let settings = settings_or_disabled(&settings)?;
        self.runtime.deliver(MonitorEvent::Configure(settings));
        Ok(())
    }

    pub fn start(&self) {
        self.runtime.deliver(MonitorEvent::Start);
    }

    /// Call from `DOMContentLoaded`.
    pub fn document_ready(&self) {
        self.runtime.deliver(MonitorEvent::DocumentReady);
    }

    pub fn stop(&self) {
        self.runtime.deliver(MonitorEvent::Stop);
    }

    /// Call from `beforeunload`.
    pub fn unload(&self) {
        self.runtime.deliver(MonitorEvent::Unload);
    }

    /// Runtime message listener. Returns true when the message was an
    /// `updateSettings` and got applied.
    pub fn handle_message(&self, message: JsValue) -> Result<bool, JsValue> {
        let value: serde_json::Value = to_rust(&message)?;
        let message = Message::from_value(&value).map_err(|e| JsValue::from_str(&e.to_string()))?;
        match message {
            Some(Message::UpdateSettings { settings }) => {
                self.runtime.deliver(MonitorEvent::Configure(settings.settings));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Totals suppressed on this page so far.
    pub fn stats(&self) -> Result<JsValue, JsValue> {
        let stats = self
            .runtime
            .with_driver(|driver| driver.monitor().session_stats())
            .unwrap_or_default();
        to_js(&stats)
    }

    pub fn is_observing(&self) -> bool {
        self.runtime
            .with_driver(|driver| driver.monitor().is_observing())
            .unwrap_or(false)
    }

    /// Current selector list as CSS.
    pub fn selector(&self) -> String {
        self.runtime
            .with_driver(|driver| driver.monitor().selectors().to_css())
            .unwrap_or_default()
    }
}

// =============================================================================
// Background
// =============================================================================

/// Dynamic rules for a settings object.
#[wasm_bindgen]
pub fn generate_dynamic_rules(settings: JsValue) -> Result<JsValue, JsValue> {
    let settings = settings_or_disabled(&settings)?;
    to_js(&generate_rules(&settings))
}

/// `updateDynamicRules` argument replacing `current_rules` (the result of
/// `getDynamicRules`) with rules for `settings`.
#[wasm_bindgen]
pub fn rule_set_update(current_rules: JsValue, settings: JsValue) -> Result<JsValue, JsValue> {
    let settings = settings_or_disabled(&settings)?;
    let current: Vec<u32> = js_sys::Array::from(&current_rules)
        .iter()
        .filter_map(|rule| js_sys::Reflect::get(&rule, &"id".into()).ok())
        .filter_map(|id| id.as_f64())
        .map(|id| id as u32)
        .collect();
    to_js(&RuleSetUpdate::replace_all(current, &settings))
}

/// Record written on install.
#[wasm_bindgen]
pub fn default_record() -> Result<JsValue, JsValue> {
    to_js(&StoredSettings::default())
}

/// Fold an `updateStats` delta into the stored record and return the new
/// record.
#[wasm_bindgen]
pub fn apply_stats_delta(record: JsValue, delta: JsValue) -> Result<JsValue, JsValue> {
    let mut record = record_or_default(&record)?;
    let delta: StatsDelta = if delta.is_undefined() || delta.is_null() {
        StatsDelta::default()
    } else {
        to_rust(&delta)?
    };
    record.apply_delta(&delta);
    to_js(&record)
}

/// The message's `action` when it is one the extension understands.
#[wasm_bindgen]
pub fn message_action(message: JsValue) -> Option<String> {
    let value: serde_json::Value = to_rust(&message).ok()?;
    Message::from_value(&value)
        .ok()
        .flatten()
        .map(|m| m.action().to_string())
}

/// Tabs eligible for an `updateSettings` push.
#[wasm_bindgen]
pub fn should_push_settings(status: &str, url: &str) -> bool {
    status.parse::<TabStatus>() == Ok(TabStatus::Complete) && is_http_url(url)
}

#[wasm_bindgen]
pub fn extract_host_js(url: &str) -> Option<String> {
    extract_host(url).map(|h| h.to_string())
}

// =============================================================================
// Popup
// =============================================================================

fn popup_result(update: popup::PopupUpdate) -> Result<JsValue, JsValue> {
    let result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&result, &"record".into(), &to_js(&update.record)?);
    let _ = js_sys::Reflect::set(&result, &"message".into(), &to_js(&update.message)?);
    Ok(result.into())
}

fn staged(record: &JsValue) -> Result<MemoryStore, JsValue> {
    let mut store = MemoryStore::new();
    save_settings(&mut store, &record_or_default(record)?)
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    Ok(store)
}

/// Flip one checkbox (`blockImages`, `blockVideos`, `blockIframes`).
/// Returns `{ record, message }`; the caller stores `record` and broadcasts
/// `message`.
#[wasm_bindgen]
pub fn toggle_setting(record: JsValue, toggle: &str, enabled: bool) -> Result<JsValue, JsValue> {
    let toggle: Toggle = toggle.parse().map_err(|e: String| JsValue::from_str(&e))?;
    let mut store = staged(&record)?;
    let update = popup::apply_toggle(&mut store, toggle, enabled)
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    popup_result(update)
}

/// Zero the counters. Same return shape as [`toggle_setting`].
#[wasm_bindgen]
pub fn reset_stats(record: JsValue) -> Result<JsValue, JsValue> {
    let mut store = staged(&record)?;
    let update = popup::reset_stats(&mut store).map_err(|e| JsValue::from_str(&e.to_string()))?;
    popup_result(update)
}

#[wasm_bindgen]
pub fn format_bytes_js(bytes: f64) -> String {
    format_bytes(bytes.max(0.0) as u64)
}
