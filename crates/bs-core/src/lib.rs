//! Bandwidth Saver Core Library
//!
//! This crate provides the content-script core of the Bandwidth Saver
//! extension together with the types every other crate shares.
//!
//! # Architecture
//!
//! The [`MediaMonitor`] watches a document through the [`dom::DomTree`]
//! contract and keeps it free of the media categories the current
//! [`Settings`] forbid. It never touches the host directly: observer
//! registration, timers and stats delivery come back as [`monitor::Effect`]s
//! which the [`Driver`] applies to a [`driver::MonitorHost`].
//!
//! # Modules
//!
//! - `types`: Settings, Stats and media categories
//! - `config`: Monitor tunables (coalescing window, bandwidth estimates)
//! - `dom`: Tree contract and the in-memory arena document
//! - `selector`: Match predicates derived from settings
//! - `monitor`: The suppression state machine
//! - `driver`: Event queue and host effect application
//! - `message`: Cross-script message protocol
//! - `storage`: The persisted settings record
//! - `popup`: Settings UI handlers
//! - `format`: Byte count formatting
//! - `url`: Host extraction helpers

pub mod config;
pub mod dom;
pub mod driver;
pub mod format;
pub mod message;
pub mod monitor;
pub mod popup;
pub mod selector;
pub mod storage;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use config::{BandwidthEstimates, MonitorConfig};
pub use dom::{Document, DomTree, MutationRecord, NodeId};
pub use driver::{ArenaHost, Driver, HostError, MonitorEvent, MonitorHost};
pub use format::format_bytes;
pub use message::Message;
pub use monitor::{Effect, MediaMonitor, TimerId};
pub use selector::SelectorSet;
pub use storage::{SettingsStore, StorageError, StoredSettings};
pub use types::{MediaKind, Settings, Stats, StatsDelta};
