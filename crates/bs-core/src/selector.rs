//! Selector Set
//!
//! Structural match predicates derived from [`Settings`] and the page host.
//! Recomputed on every settings change, never stored.

use crate::dom::DomTree;
use crate::types::{MediaKind, Settings};
use crate::url::host_in_domain;

/// `src` substrings that mark an iframe as an embedded player.
pub const IFRAME_SRC_KEYWORDS: &[&str] = &[
    "youtube",
    "youtube-nocookie",
    "youtu.be",
    "vimeo",
    "dailymotion",
    "video",
    "player",
];

/// `data-src` substrings for lazily loaded player iframes.
pub const IFRAME_DATA_SRC_KEYWORDS: &[&str] = &["youtube"];

/// Sites whose player containers are hidden rather than removed.
pub const RICH_PLAYER_DOMAINS: &[&str] = &["youtube.com"];

const RICH_PLAYER_TAG: &str = "ytd-player";
const RICH_PLAYER_ID: &str = "player-container";
const RICH_PLAYER_CLASS: &str = "html5-video-player";

bitflags::bitflags! {
    /// Enabled match categories.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MediaCategories: u8 {
        const IMAGES = 1 << 0;
        const VIDEOS = 1 << 1;
        const IFRAMES = 1 << 2;
        /// Only set alongside VIDEOS on a rich-player site
        const RICH_PLAYERS = 1 << 3;
    }
}

/// Compiled match predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorSet {
    categories: MediaCategories,
}

impl Default for SelectorSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl SelectorSet {
    /// Matches nothing.
    pub const fn empty() -> Self {
        Self {
            categories: MediaCategories::empty(),
        }
    }

    /// Compile `settings` for a page served from `page_host`.
    pub fn new(settings: &Settings, page_host: Option<&str>) -> Self {
        let mut categories = MediaCategories::empty();
        if settings.block_images {
            categories |= MediaCategories::IMAGES;
        }
        if settings.block_videos {
            categories |= MediaCategories::VIDEOS;
            let rich_site = page_host.is_some_and(|host| {
                RICH_PLAYER_DOMAINS
                    .iter()
                    .any(|domain| host_in_domain(host, domain))
            });
            if rich_site {
                categories |= MediaCategories::RICH_PLAYERS;
            }
        }
        if settings.block_iframes {
            categories |= MediaCategories::IFRAMES;
        }
        Self { categories }
    }

    pub fn categories(&self) -> MediaCategories {
        self.categories
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Classify a single node. Non-elements never match.
    pub fn classify<T: DomTree>(&self, tree: &T, node: &T::Node) -> Option<MediaKind> {
        if self.is_empty() || !tree.is_element(node) {
            return None;
        }

        let name = tree.local_name(node);
        let c = self.categories;

        if c.contains(MediaCategories::VIDEOS) && name == "video" {
            return Some(MediaKind::Video);
        }

        if c.contains(MediaCategories::RICH_PLAYERS)
            && (name == RICH_PLAYER_TAG
                || tree.attribute(node, "id").as_deref() == Some(RICH_PLAYER_ID)
                || tree.has_class(node, RICH_PLAYER_CLASS))
        {
            return Some(MediaKind::RichPlayer);
        }

        if c.contains(MediaCategories::IFRAMES) && name == "iframe" && is_player_iframe(tree, node) {
            return Some(MediaKind::Iframe);
        }

        if c.contains(MediaCategories::IMAGES) && name == "img" {
            return Some(MediaKind::Image);
        }

        None
    }

    /// True if `root` or any descendant matches. Stops at the first hit.
    pub fn subtree_has_match<T: DomTree>(&self, tree: &T, root: &T::Node) -> bool {
        if self.is_empty() {
            return false;
        }
        let mut stack = vec![root.clone()];
        while let Some(node) = stack.pop() {
            if self.classify(tree, &node).is_some() {
                return true;
            }
            stack.extend(tree.element_children(&node));
        }
        false
    }

    /// Append every match in `root`'s inclusive subtree, in document order.
    /// Nodes for which `skip` returns true are not classified, but their
    /// descendants still are.
    pub fn collect_matches<T, F>(
        &self,
        tree: &T,
        root: &T::Node,
        skip: F,
        out: &mut Vec<(T::Node, MediaKind)>,
    ) where
        T: DomTree,
        F: Fn(&T, &T::Node) -> bool,
    {
        if self.is_empty() {
            return;
        }
        let mut stack = vec![root.clone()];
        while let Some(node) = stack.pop() {
            if !skip(tree, &node) {
                if let Some(kind) = self.classify(tree, &node) {
                    out.push((node.clone(), kind));
                }
            }
            let mut children = tree.element_children(&node);
            children.reverse();
            stack.extend(children);
        }
    }

    /// Equivalent CSS selector list, for diagnostics and `querySelector`.
    pub fn to_css(&self) -> String {
        let mut selectors: Vec<String> = Vec::new();
        let c = self.categories;

        if c.contains(MediaCategories::VIDEOS) {
            selectors.push("video".to_string());
        }
        if c.contains(MediaCategories::RICH_PLAYERS) {
            selectors.push(RICH_PLAYER_TAG.to_string());
            selectors.push(format!("#{RICH_PLAYER_ID}"));
            selectors.push(format!(".{RICH_PLAYER_CLASS}"));
        }
        if c.contains(MediaCategories::IFRAMES) {
            for keyword in IFRAME_SRC_KEYWORDS {
                selectors.push(format!("iframe[src*=\"{keyword}\"]"));
            }
            for keyword in IFRAME_DATA_SRC_KEYWORDS {
                selectors.push(format!("iframe[data-src*=\"{keyword}\"]"));
            }
        }
        if c.contains(MediaCategories::IMAGES) {
            selectors.push("img".to_string());
        }

        selectors.join(", ")
    }
}

fn is_player_iframe<T: DomTree>(tree: &T, node: &T::Node) -> bool {
    let src_hit = tree
        .attribute(node, "src")
        .is_some_and(|src| IFRAME_SRC_KEYWORDS.iter().any(|k| src.contains(k)));
    src_hit
        || tree
            .attribute(node, "data-src")
            .is_some_and(|src| IFRAME_DATA_SRC_KEYWORDS.iter().any(|k| src.contains(k)))
}
