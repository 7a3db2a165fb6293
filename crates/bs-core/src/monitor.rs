//! Media Suppression Monitor
//!
//! Keeps a live document free of the media categories the current settings
//! forbid. The monitor is a single-threaded state machine: every entry point
//! is a host callback, DOM edits happen synchronously through [`DomTree`], and
//! everything that needs the host (observer registration, timers, stats
//! delivery) comes back as [`Effect`]s for the caller to apply.
//!
//! Mutation batches never trigger DOM work directly. A batch whose added
//! subtrees contain a match arms the coalescing timer; further batches inside
//! the window only extend the pending root set. When the timer fires, one pass
//! runs over the union of pending roots with the selector set current at that
//! moment.

use std::fmt::Debug;
use std::time::Duration;

use log::{debug, trace};

use crate::config::MonitorConfig;
use crate::dom::{DomTree, MutationRecord};
use crate::selector::SelectorSet;
use crate::types::{MediaKind, Settings, Stats, StatsDelta};

/// Marker value on hidden rich players.
pub const SUPPRESSED_MARKER: &str = "suppressed";

/// Identifies one armed coalescing timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Host-side action requested by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect<N> {
    /// Register `childList` + `subtree` observation on the node.
    Observe(N),
    /// Release the observation registration.
    Disconnect,
    /// Call back with [`MediaMonitor::on_timer`] after `delay`.
    ArmTimer { id: TimerId, delay: Duration },
    CancelTimer(TimerId),
    /// Fire-and-forget delivery to the background collaborator.
    EmitStats(StatsDelta),
}

/// Observation lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase<N> {
    Idle,
    /// `start()` ran before the body existed.
    AwaitingBody,
    Observing(N),
}

/// The monitor. `N` is the host tree's node handle.
#[derive(Debug)]
pub struct MediaMonitor<N> {
    config: MonitorConfig,
    page_host: Option<String>,
    settings: Settings,
    selectors: SelectorSet,
    phase: Phase<N>,
    pending_roots: Vec<N>,
    armed: Option<TimerId>,
    next_timer: u64,
    passes: u64,
    session: Stats,
}

impl<N> MediaMonitor<N>
where
    N: Clone + Eq + Debug,
{
    /// A monitor for a page served from `page_host`. Starts with nothing
    /// enabled until [`configure`](Self::configure) is called.
    pub fn new(config: MonitorConfig, page_host: Option<&str>) -> Self {
        Self {
            config,
            page_host: page_host.map(str::to_string),
            settings: Settings::disabled(),
            selectors: SelectorSet::empty(),
            phase: Phase::Idle,
            pending_roots: Vec::new(),
            armed: None,
            next_timer: 0,
            passes: 0,
            session: Stats::default(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    pub fn selectors(&self) -> &SelectorSet {
        &self.selectors
    }

    pub fn phase(&self) -> &Phase<N> {
        &self.phase
    }

    pub fn is_observing(&self) -> bool {
        matches!(self.phase, Phase::Observing(_))
    }

    /// Roots waiting for the coalesced pass.
    pub fn pending_roots(&self) -> &[N] {
        &self.pending_roots
    }

    pub fn armed_timer(&self) -> Option<TimerId> {
        self.armed
    }

    /// Suppression passes that found at least one match.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Totals suppressed by this monitor instance.
    pub fn session_stats(&self) -> Stats {
        self.session
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Replace the selector set. While observing, re-applies suppression to
    /// the whole tree right away.
    pub fn configure<T>(&mut self, tree: &mut T, settings: Settings) -> Vec<Effect<N>>
    where
        T: DomTree<Node = N>,
    {
        self.settings = settings;
        self.selectors = SelectorSet::new(&settings, self.page_host.as_deref());
        debug!("monitor configured: [{}]", self.selectors.to_css());

        match &self.phase {
            Phase::Observing(root) => {
                let root = root.clone();
                self.run_pass(tree, &[root])
            }
            _ => Vec::new(),
        }
    }

    /// Begin observing the body. Defers until [`document_ready`] when the
    /// body does not exist yet. Idempotent.
    ///
    /// [`document_ready`]: Self::document_ready
    pub fn start<T>(&mut self, tree: &mut T) -> Vec<Effect<N>>
    where
        T: DomTree<Node = N>,
    {
        match self.phase {
            Phase::Observing(_) | Phase::AwaitingBody => Vec::new(),
            Phase::Idle => match tree.body() {
                Some(body) => self.begin(tree, body),
                None => {
                    debug!("no body yet, deferring start");
                    self.phase = Phase::AwaitingBody;
                    Vec::new()
                }
            },
        }
    }

    /// Host signal that the document finished parsing.
    pub fn document_ready<T>(&mut self, tree: &mut T) -> Vec<Effect<N>>
    where
        T: DomTree<Node = N>,
    {
        if self.phase != Phase::AwaitingBody {
            return Vec::new();
        }
        match tree.body() {
            Some(body) => self.begin(tree, body),
            None => Vec::new(),
        }
    }

    fn begin<T>(&mut self, tree: &mut T, body: N) -> Vec<Effect<N>>
    where
        T: DomTree<Node = N>,
    {
        self.phase = Phase::Observing(body.clone());
        let mut effects = vec![Effect::Observe(body.clone())];
        // Initial scan ignores the coalescing window.
        effects.extend(self.run_pass(tree, &[body]));
        effects
    }

    /// Release observation and cancel any armed timer. Safe when idle.
    pub fn stop(&mut self) -> Vec<Effect<N>> {
        let mut effects = Vec::new();
        if let Some(id) = self.armed.take() {
            effects.push(Effect::CancelTimer(id));
        }
        self.pending_roots.clear();
        if matches!(self.phase, Phase::Observing(_)) {
            effects.push(Effect::Disconnect);
        }
        self.phase = Phase::Idle;
        effects
    }

    /// Page teardown.
    pub fn unload(&mut self) -> Vec<Effect<N>> {
        self.stop()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// React to one delivered batch. Touches the DOM not at all; only decides
    /// whether any added subtree holds a match.
    pub fn on_mutation_batch<T>(&mut self, tree: &T, batch: &[MutationRecord<N>]) -> Vec<Effect<N>>
    where
        T: DomTree<Node = N>,
    {
        if !self.is_observing() || self.selectors.is_empty() {
            return Vec::new();
        }

        let mut matched = false;
        for node in batch.iter().flat_map(|record| record.added.iter()) {
            if !tree.is_element(node) || !self.selectors.subtree_has_match(tree, node) {
                continue;
            }
            matched = true;
            if !self.pending_roots.contains(node) {
                self.pending_roots.push(node.clone());
            }
        }

        if !matched {
            trace!("batch of {} record(s) has no media", batch.len());
            return Vec::new();
        }

        match self.armed {
            Some(_) => Vec::new(),
            None => {
                self.next_timer += 1;
                let id = TimerId(self.next_timer);
                self.armed = Some(id);
                vec![Effect::ArmTimer {
                    id,
                    delay: self.config.coalesce_window(),
                }]
            }
        }
    }

    /// The coalescing window elapsed. Ignores timers it did not arm.
    pub fn on_timer<T>(&mut self, tree: &mut T, id: TimerId) -> Vec<Effect<N>>
    where
        T: DomTree<Node = N>,
    {
        if self.armed != Some(id) {
            trace!("ignoring stale timer {:?}", id);
            return Vec::new();
        }
        self.armed = None;
        let roots = std::mem::take(&mut self.pending_roots);
        if !self.is_observing() {
            return Vec::new();
        }
        self.run_pass(tree, &roots)
    }

    // =========================================================================
    // Suppression
    // =========================================================================

    fn run_pass<T>(&mut self, tree: &mut T, roots: &[N]) -> Vec<Effect<N>>
    where
        T: DomTree<Node = N>,
    {
        if self.selectors.is_empty() {
            return Vec::new();
        }

        let marker = self.config.marker_attribute.as_str();
        let already_suppressed = |tree: &T, node: &N| {
            tree.attribute(node, marker).as_deref() == Some(SUPPRESSED_MARKER)
        };

        let mut matches = Vec::new();
        for (i, root) in roots.iter().enumerate() {
            if !tree.is_connected(root) {
                continue;
            }
            // A root nested in another root is covered by that root's walk.
            let nested = roots
                .iter()
                .enumerate()
                .any(|(j, other)| j != i && other != root && tree.is_inclusive_descendant(root, other));
            if nested {
                continue;
            }
            self.selectors
                .collect_matches(tree, root, already_suppressed, &mut matches);
        }

        match self.suppress(tree, matches) {
            Some(delta) => vec![Effect::EmitStats(delta)],
            None => Vec::new(),
        }
    }

    /// Remove (or hide behind a placeholder) every matched element and return
    /// the stats delta. `None` when nothing was suppressed.
    pub fn suppress<T>(&mut self, tree: &mut T, matches: Vec<(N, MediaKind)>) -> Option<StatsDelta>
    where
        T: DomTree<Node = N>,
    {
        let mut delta = StatsDelta::default();

        for (node, kind) in matches {
            if !tree.is_connected(&node) {
                continue;
            }
            delta.elements_blocked += 1;
            delta.bandwidth_saved += self.config.estimates.for_kind(kind);

            if kind.is_hidden_in_place() {
                tree.hide(&node);
                tree.set_attribute(&node, &self.config.marker_attribute, SUPPRESSED_MARKER);
                tree.insert_placeholder_before(
                    &node,
                    &self.config.placeholder_text,
                    &self.config.marker_attribute,
                );
            } else {
                tree.remove(&node);
            }
        }

        if delta.is_empty() {
            return None;
        }

        self.passes += 1;
        self.session.apply(&delta);
        debug!(
            "suppressed {} element(s), ~{} bytes",
            delta.elements_blocked, delta.bandwidth_saved
        );
        Some(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{Document, NodeId};

    const MIB: u64 = 1024 * 1024;

    fn videos_only() -> Settings {
        Settings {
            block_images: false,
            block_videos: true,
            block_iframes: false,
        }
    }

    fn iframes_only() -> Settings {
        Settings {
            block_iframes: true,
            ..Settings::disabled()
        }
    }

    fn started(doc: &mut Document, settings: Settings, host: Option<&str>) -> MediaMonitor<NodeId> {
        let mut monitor = MediaMonitor::new(MonitorConfig::default(), host);
        monitor.configure(doc, settings);
        let effects = monitor.start(doc);
        assert!(matches!(effects.first(), Some(Effect::Observe(_))));
        doc.observe(doc.body_id().unwrap());
        doc.take_records();
        monitor
    }

    fn emitted(effects: &[Effect<NodeId>]) -> Vec<StatsDelta> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::EmitStats(delta) => Some(*delta),
                _ => None,
            })
            .collect()
    }

    fn armed(effects: &[Effect<NodeId>]) -> Option<TimerId> {
        effects.iter().find_map(|e| match e {
            Effect::ArmTimer { id, .. } => Some(*id),
            _ => None,
        })
    }

    #[test]
    fn initial_scan_removes_video_and_keeps_vimeo_iframe() {
        let mut doc = Document::with_body();
        let body = doc.body_id().unwrap();
        let video = doc.create_element("video");
        let iframe = doc.element("iframe", &[("src", "https://vimeo.com/12345")]);
        doc.append_child(body, video);
        doc.append_child(body, iframe);

        let mut monitor = MediaMonitor::new(MonitorConfig::default(), Some("example.com"));
        monitor.configure(&mut doc, videos_only());
        let effects = monitor.start(&mut doc);

        assert_eq!(effects[0], Effect::Observe(body));
        assert_eq!(
            emitted(&effects),
            vec![StatsDelta {
                bandwidth_saved: 5 * MIB,
                elements_blocked: 1,
            }]
        );
        assert!(!doc.is_attached(video));
        assert!(doc.is_attached(iframe));
    }

    #[test]
    fn disabled_settings_never_suppress() {
        let mut doc = Document::with_body();
        let body = doc.body_id().unwrap();
        let mut monitor = started(&mut doc, Settings::disabled(), Some("www.youtube.com"));

        let video = doc.create_element("video");
        let player = doc.create_element("ytd-player");
        doc.append_child(body, video);
        doc.append_child(body, player);
        let batch = doc.take_records();

        let effects = monitor.on_mutation_batch(&doc, &batch);
        assert!(effects.is_empty());
        assert!(monitor.pending_roots().is_empty());
        assert!(doc.is_attached(video));
        assert_eq!(monitor.session_stats(), Stats::default());
    }

    #[test]
    fn unmatched_batch_does_nothing() {
        let mut doc = Document::with_body();
        let body = doc.body_id().unwrap();
        let mut monitor = started(&mut doc, Settings::install_defaults(), None);

        let div = doc.create_element("div");
        let text = doc.create_text("hello");
        doc.append_child(div, text);
        doc.append_child(body, div);
        let batch = doc.take_records();

        assert!(monitor.on_mutation_batch(&doc, &batch).is_empty());
        assert_eq!(monitor.armed_timer(), None);
        assert_eq!(monitor.passes(), 0);
    }

    #[test]
    fn nested_iframe_in_added_container_is_suppressed() {
        let mut doc = Document::with_body();
        let body = doc.body_id().unwrap();
        let mut monitor = started(&mut doc, iframes_only(), None);

        let container = doc.create_element("div");
        let iframe = doc.element("iframe", &[("src", "https://www.youtube.com/embed/xyz")]);
        doc.append_child(container, iframe);
        doc.append_child(body, container);
        let batch = doc.take_records();
        assert_eq!(batch.len(), 1);

        let effects = monitor.on_mutation_batch(&doc, &batch);
        let id = armed(&effects).expect("timer armed");
        assert_eq!(monitor.pending_roots(), &[container]);

        let effects = monitor.on_timer(&mut doc, id);
        assert_eq!(
            emitted(&effects),
            vec![StatsDelta {
                bandwidth_saved: MIB,
                elements_blocked: 1,
            }]
        );
        assert!(!doc.is_attached(iframe));
        assert!(doc.is_attached(container));
    }

    #[test]
    fn batches_within_window_coalesce_into_one_pass() {
        let mut doc = Document::with_body();
        let body = doc.body_id().unwrap();
        let mut monitor = started(&mut doc, videos_only(), None);

        let mut timers = Vec::new();
        let mut videos = Vec::new();
        for _ in 0..3 {
            let wrapper = doc.create_element("div");
            let video = doc.create_element("video");
            doc.append_child(wrapper, video);
            doc.append_child(body, wrapper);
            videos.push(video);
            let batch = doc.take_records();
            timers.extend(armed(&monitor.on_mutation_batch(&doc, &batch)));
        }
        assert_eq!(timers.len(), 1);
        assert_eq!(monitor.pending_roots().len(), 3);

        let effects = monitor.on_timer(&mut doc, timers[0]);
        assert_eq!(
            emitted(&effects),
            vec![StatsDelta {
                bandwidth_saved: 15 * MIB,
                elements_blocked: 3,
            }]
        );
        assert_eq!(monitor.passes(), 1);
        assert!(videos.iter().all(|&v| !doc.is_attached(v)));
        assert!(monitor.pending_roots().is_empty());
        assert_eq!(monitor.armed_timer(), None);
    }

    #[test]
    fn configure_mid_window_passes_now_and_on_timer() {
        let mut doc = Document::with_body();
        let body = doc.body_id().unwrap();
        let mut monitor = started(&mut doc, videos_only(), None);

        let wrapper = doc.create_element("div");
        let video = doc.create_element("video");
        let img = doc.create_element("img");
        doc.append_child(wrapper, video);
        doc.append_child(wrapper, img);
        doc.append_child(body, wrapper);
        let batch = doc.take_records();
        let id = armed(&monitor.on_mutation_batch(&doc, &batch)).unwrap();
        assert_eq!(monitor.pending_roots(), &[wrapper]);

        // Full pass under the new set, ahead of the window.
        let effects = monitor.configure(&mut doc, Settings::install_defaults());
        assert!(armed(&effects).is_none());
        assert_eq!(
            emitted(&effects),
            vec![StatsDelta {
                bandwidth_saved: 6 * MIB,
                elements_blocked: 2,
            }]
        );
        assert!(!doc.is_attached(video));
        assert!(!doc.is_attached(img));
        assert_eq!(monitor.armed_timer(), Some(id));
        doc.take_records();

        // Joins the armed window; only iframes matched the new set.
        let late = doc.create_element("section");
        let iframe = doc.create_element("iframe");
        doc.append_child(late, iframe);
        doc.append_child(body, late);
        let batch = doc.take_records();
        assert!(armed(&monitor.on_mutation_batch(&doc, &batch)).is_none());
        assert_eq!(monitor.pending_roots(), &[wrapper, late]);

        let effects = monitor.on_timer(&mut doc, id);
        assert_eq!(
            emitted(&effects),
            vec![StatsDelta {
                bandwidth_saved: MIB,
                elements_blocked: 1,
            }]
        );
        assert!(!doc.is_attached(iframe));
        assert_eq!(monitor.passes(), 2);
        assert_eq!(
            monitor.session_stats(),
            Stats {
                bandwidth_saved: 7 * MIB,
                elements_blocked: 3,
            }
        );
    }

    #[test]
    fn nested_pending_roots_are_walked_once() {
        let mut doc = Document::with_body();
        let body = doc.body_id().unwrap();
        let mut monitor = started(&mut doc, videos_only(), None);

        let outer = doc.create_element("div");
        doc.append_child(body, outer);
        let video = doc.create_element("video");
        doc.append_child(outer, video);
        let batch = doc.take_records();

        let id = armed(&monitor.on_mutation_batch(&doc, &batch)).unwrap();
        assert_eq!(monitor.pending_roots(), &[outer, video]);

        let effects = monitor.on_timer(&mut doc, id);
        assert_eq!(emitted(&effects)[0].elements_blocked, 1);
    }

    #[test]
    fn rich_player_is_hidden_behind_one_placeholder() {
        let mut doc = Document::with_body();
        let body = doc.body_id().unwrap();
        let before = doc.create_element("h1");
        let player = doc.element("div", &[("id", "player-container")]);
        doc.append_child(body, before);
        doc.append_child(body, player);

        let mut monitor = MediaMonitor::new(MonitorConfig::default(), Some("www.youtube.com"));
        monitor.configure(&mut doc, videos_only());
        let effects = monitor.start(&mut doc);

        assert_eq!(
            emitted(&effects),
            vec![StatsDelta {
                bandwidth_saved: 10 * MIB,
                elements_blocked: 1,
            }]
        );
        assert!(doc.is_attached(player));
        assert!(doc.is_hidden(player));

        let children = doc.children_of(body).to_vec();
        assert_eq!(children.len(), 3);
        assert_eq!(children[0], before);
        assert_eq!(children[2], player);
        let placeholder = children[1];
        assert_eq!(doc.text_content(placeholder), "Video blocked by Bandwidth Saver");
        assert_eq!(doc.get_attr(placeholder, "data-bandwidth-saver"), Some("placeholder"));

        // Later passes must not count or re-wrap the same player.
        assert!(monitor.configure(&mut doc, videos_only()).is_empty());
        assert_eq!(doc.children_of(body).len(), 3);
    }

    #[test]
    fn rich_player_contents_are_still_removed() {
        let mut doc = Document::with_body();
        let body = doc.body_id().unwrap();
        let player = doc.create_element("ytd-player");
        let video = doc.create_element("video");
        doc.append_child(player, video);
        doc.append_child(body, player);

        let mut monitor = MediaMonitor::new(MonitorConfig::default(), Some("youtube.com"));
        monitor.configure(&mut doc, videos_only());
        let effects = monitor.start(&mut doc);

        assert_eq!(
            emitted(&effects),
            vec![StatsDelta {
                bandwidth_saved: 15 * MIB,
                elements_blocked: 2,
            }]
        );
        assert!(doc.is_hidden(player));
        assert!(!doc.is_attached(video));
    }

    #[test]
    fn stop_cancels_timer_and_ignores_later_batches() {
        let mut doc = Document::with_body();
        let body = doc.body_id().unwrap();
        let mut monitor = started(&mut doc, videos_only(), None);

        let video = doc.create_element("video");
        doc.append_child(body, video);
        let batch = doc.take_records();
        let id = armed(&monitor.on_mutation_batch(&doc, &batch)).unwrap();

        let effects = monitor.stop();
        assert_eq!(effects, vec![Effect::CancelTimer(id), Effect::Disconnect]);
        doc.disconnect();

        // A timer callback that slipped through stays inert.
        assert!(monitor.on_timer(&mut doc, id).is_empty());

        let late = doc.create_element("video");
        doc.append_child(body, late);
        let batch = vec![MutationRecord::added(vec![late])];
        assert!(monitor.on_mutation_batch(&doc, &batch).is_empty());
        assert!(doc.is_attached(video));
        assert!(doc.is_attached(late));
        assert_eq!(monitor.session_stats(), Stats::default());
    }

    #[test]
    fn stop_before_start_is_harmless() {
        let mut monitor: MediaMonitor<NodeId> = MediaMonitor::new(MonitorConfig::default(), None);
        assert!(monitor.stop().is_empty());
        assert_eq!(monitor.phase(), &Phase::Idle);
    }

    #[test]
    fn start_is_idempotent_and_waits_for_body() {
        let mut doc = Document::new();
        let mut monitor = MediaMonitor::new(MonitorConfig::default(), None);
        monitor.configure(&mut doc, videos_only());

        assert!(monitor.start(&mut doc).is_empty());
        assert_eq!(monitor.phase(), &Phase::AwaitingBody);
        assert!(monitor.start(&mut doc).is_empty());

        let body = doc.attach_body();
        let video = doc.create_element("video");
        doc.append_child(body, video);

        let effects = monitor.document_ready(&mut doc);
        assert_eq!(effects[0], Effect::Observe(body));
        assert_eq!(emitted(&effects).len(), 1);
        assert!(!doc.is_attached(video));

        let again = monitor.start(&mut doc);
        assert!(again.is_empty());
        assert!(monitor.document_ready(&mut doc).is_empty());
    }

    #[test]
    fn configure_reapplies_to_current_tree() {
        let mut doc = Document::with_body();
        let body = doc.body_id().unwrap();
        let img = doc.create_element("img");
        doc.append_child(body, img);

        let mut monitor = started(&mut doc, videos_only(), None);
        assert!(doc.is_attached(img));

        let effects = monitor.configure(
            &mut doc,
            Settings {
                block_images: true,
                ..videos_only()
            },
        );
        assert_eq!(emitted(&effects)[0].elements_blocked, 1);
        assert!(!doc.is_attached(img));
    }

    #[test]
    fn suppress_with_no_matches_is_noop() {
        let mut doc = Document::with_body();
        let mut monitor: MediaMonitor<NodeId> = MediaMonitor::new(MonitorConfig::default(), None);
        assert_eq!(monitor.suppress(&mut doc, Vec::new()), None);
        assert_eq!(monitor.passes(), 0);
        assert!(doc.take_records().is_empty());
    }

    #[test]
    fn custom_estimates_are_used() {
        let mut doc = Document::with_body();
        let body = doc.body_id().unwrap();
        let video = doc.create_element("video");
        doc.append_child(body, video);

        let mut config = MonitorConfig::default();
        config.estimates.video = 7;
        let mut monitor = MediaMonitor::new(config, None);
        monitor.configure(&mut doc, videos_only());
        let effects = monitor.start(&mut doc);
        assert_eq!(emitted(&effects)[0].bandwidth_saved, 7);
    }
}
