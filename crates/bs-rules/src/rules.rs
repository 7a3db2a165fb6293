//! Dynamic network rules
//!
//! Compiles [`Settings`] into the host's declarative rule list. Applying new
//! settings always replaces the whole dynamic set (remove every current id,
//! add the fresh list); there is no incremental diff.

use std::fmt;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use bs_core::Settings;

/// First dynamic rule id. Ids below this are left to statically bundled
/// rulesets.
pub const FIRST_DYNAMIC_RULE_ID: u32 = 1000;

/// Priority of every generated rule.
pub const RULE_PRIORITY: u32 = 1;

/// Video container and file extensions blocked by URL.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "webm", "mov", "m4v", "avi", "flv", "mkv", "mpeg", "3gp", "ogg", "ogv", "ts",
];

/// Streaming manifest keywords, matched on script-initiated requests only.
pub const STREAMING_KEYWORDS: &[&str] = &["hls", "m3u8", "mpd", "dash"];

// =============================================================================
// Resource Types
// =============================================================================

bitflags::bitflags! {
    /// Request type bit mask, named after the host's `resourceTypes` values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceType: u32 {
        const OTHER = 1 << 0;
        const SCRIPT = 1 << 1;
        const IMAGE = 1 << 2;
        const STYLESHEET = 1 << 3;
        const OBJECT = 1 << 4;
        const SUB_FRAME = 1 << 5;
        const MAIN_FRAME = 1 << 6;
        const XMLHTTPREQUEST = 1 << 7;
        const WEBSOCKET = 1 << 8;
        const FONT = 1 << 9;
        const MEDIA = 1 << 10;
        const PING = 1 << 11;
        const CSP_REPORT = 1 << 12;
    }
}

const RESOURCE_TYPE_NAMES: &[(ResourceType, &str)] = &[
    (ResourceType::OTHER, "other"),
    (ResourceType::SCRIPT, "script"),
    (ResourceType::IMAGE, "image"),
    (ResourceType::STYLESHEET, "stylesheet"),
    (ResourceType::OBJECT, "object"),
    (ResourceType::SUB_FRAME, "sub_frame"),
    (ResourceType::MAIN_FRAME, "main_frame"),
    (ResourceType::XMLHTTPREQUEST, "xmlhttprequest"),
    (ResourceType::WEBSOCKET, "websocket"),
    (ResourceType::FONT, "font"),
    (ResourceType::MEDIA, "media"),
    (ResourceType::PING, "ping"),
    (ResourceType::CSP_REPORT, "csp_report"),
];

impl ResourceType {
    /// Parse a single host resource type name.
    pub fn from_host_name(name: &str) -> Option<Self> {
        RESOURCE_TYPE_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(t, _)| *t)
    }

    /// Host names of the set bits, in bit order.
    pub fn names(&self) -> Vec<&'static str> {
        RESOURCE_TYPE_NAMES
            .iter()
            .filter(|(t, _)| self.contains(*t))
            .map(|(_, n)| *n)
            .collect()
    }
}

impl Serialize for ResourceType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let names = self.names();
        let mut seq = serializer.serialize_seq(Some(names.len()))?;
        for name in names {
            seq.serialize_element(name)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for ResourceType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NamesVisitor;

        impl<'de> Visitor<'de> for NamesVisitor {
            type Value = ResourceType;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a list of resource type names")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<ResourceType, A::Error> {
                let mut mask = ResourceType::empty();
                while let Some(name) = seq.next_element::<String>()? {
                    mask |= ResourceType::from_host_name(&name)
                        .ok_or_else(|| {
                            <A::Error as de::Error>::custom(format!("unknown resource type '{}'", name))
                        })?;
                }
                Ok(mask)
            }
        }

        deserializer.deserialize_seq(NamesVisitor)
    }
}

// =============================================================================
// Rules
// =============================================================================

/// Rule action type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionType {
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub kind: ActionType,
}

/// Match condition. Pattern rules use `regexFilter` because the patterns are
/// alternations; `urlFilter` would read `|` as an anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_filter: Option<String>,
    pub resource_types: ResourceType,
}

/// One dynamic rule, in the host's JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicRule {
    pub id: u32,
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
}

/// Full replacement of the dynamic rule set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSetUpdate {
    pub remove_rule_ids: Vec<u32>,
    pub add_rules: Vec<DynamicRule>,
}

impl RuleSetUpdate {
    /// Remove every id in `current`, then add the rules for `settings`.
    pub fn replace_all<I>(current: I, settings: &Settings) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        Self {
            remove_rule_ids: current.into_iter().collect(),
            add_rules: generate_rules(settings),
        }
    }
}

/// `\.mp4|\.webm|...`
pub fn video_extension_pattern() -> String {
    VIDEO_EXTENSIONS
        .iter()
        .map(|ext| format!("\\.{}", ext))
        .collect::<Vec<_>>()
        .join("|")
}

/// `hls|m3u8|mpd|dash`
pub fn streaming_pattern() -> String {
    STREAMING_KEYWORDS.join("|")
}

struct RuleBuilder {
    next_id: u32,
    rules: Vec<DynamicRule>,
}

impl RuleBuilder {
    fn new() -> Self {
        Self {
            next_id: FIRST_DYNAMIC_RULE_ID,
            rules: Vec::new(),
        }
    }

    fn block(&mut self, resource_types: ResourceType, regex_filter: Option<String>) {
        self.rules.push(DynamicRule {
            id: self.next_id,
            priority: RULE_PRIORITY,
            action: RuleAction {
                kind: ActionType::Block,
            },
            condition: RuleCondition {
                regex_filter,
                resource_types,
            },
        });
        self.next_id += 1;
    }
}

/// Compile settings into dynamic rules. Ids are consecutive from
/// [`FIRST_DYNAMIC_RULE_ID`].
pub fn generate_rules(settings: &Settings) -> Vec<DynamicRule> {
    let mut builder = RuleBuilder::new();

    if settings.block_images {
        builder.block(ResourceType::IMAGE, None);
    }

    if settings.block_videos {
        builder.block(ResourceType::MEDIA, None);
        builder.block(
            ResourceType::OTHER
                | ResourceType::XMLHTTPREQUEST
                | ResourceType::OBJECT
                | ResourceType::SUB_FRAME,
            Some(video_extension_pattern()),
        );
        builder.block(ResourceType::XMLHTTPREQUEST, Some(streaming_pattern()));
    }

    builder.rules
}
