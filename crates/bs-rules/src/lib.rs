//! Bandwidth Saver network rules and background service
//!
//! This crate compiles settings into the host's dynamic network rules and
//! implements the background page logic around them.

pub mod background;
pub mod rules;

pub use background::{Background, BackgroundError, Handled, RuleEngine, TabMessenger, TabStatus};
pub use rules::{generate_rules, DynamicRule, ResourceType, RuleSetUpdate, FIRST_DYNAMIC_RULE_ID};
