//! Event driver
//!
//! Feeds host callbacks into a [`MediaMonitor`] through a FIFO that is drained
//! immediately, then applies the resulting [`Effect`]s to a [`MonitorHost`].
//! Events posted while a drain is running (for example a settings update that
//! lands mid-pass) wait their turn instead of nesting.

use std::collections::VecDeque;
use std::time::Duration;

use log::debug;

use crate::config::MonitorConfig;
use crate::dom::{Document, DomTree, MutationRecord};
use crate::monitor::{Effect, MediaMonitor, TimerId};
use crate::types::{Settings, StatsDelta};

/// Error reported by a host collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// The receiving script is not listening yet.
    #[error("Stats recipient unavailable")]
    RecipientUnavailable,
    #[error("Host call failed: {0}")]
    Call(String),
}

/// Host services the monitor relies on.
pub trait MonitorHost<T: DomTree> {
    fn observe(&mut self, tree: &mut T, root: &T::Node);

    fn disconnect(&mut self, tree: &mut T);

    fn arm_timer(&mut self, id: TimerId, delay: Duration);

    fn cancel_timer(&mut self, id: TimerId);

    /// Deliver a stats delta. Failure is tolerated by the driver.
    fn send_stats(&mut self, delta: &StatsDelta) -> Result<(), HostError>;
}

/// Host callback, as queued by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent<N> {
    Start,
    DocumentReady,
    Configure(Settings),
    Mutations(Vec<MutationRecord<N>>),
    Timer(TimerId),
    Stop,
    Unload,
}

/// Owns the tree handle, the monitor and the event queue.
pub struct Driver<T: DomTree, H> {
    tree: T,
    host: H,
    monitor: MediaMonitor<T::Node>,
    queue: VecDeque<MonitorEvent<T::Node>>,
    draining: bool,
    dropped_stats: u64,
}

impl<T, H> Driver<T, H>
where
    T: DomTree,
    H: MonitorHost<T>,
{
    pub fn new(tree: T, host: H, config: MonitorConfig, page_host: Option<&str>) -> Self {
        Self {
            tree,
            host,
            monitor: MediaMonitor::new(config, page_host),
            queue: VecDeque::new(),
            draining: false,
            dropped_stats: 0,
        }
    }

    pub fn tree(&self) -> &T {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut T {
        &mut self.tree
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn monitor(&self) -> &MediaMonitor<T::Node> {
        &self.monitor
    }

    /// Stats deltas the host failed to deliver.
    pub fn dropped_stats(&self) -> u64 {
        self.dropped_stats
    }

    /// Queue an event without draining.
    pub fn post(&mut self, event: MonitorEvent<T::Node>) {
        self.queue.push_back(event);
    }

    /// Queue an event and drain the queue unless a drain is in progress.
    pub fn dispatch(&mut self, event: MonitorEvent<T::Node>) {
        self.post(event);
        self.drain();
    }

    /// Process queued events in arrival order.
    pub fn drain(&mut self) {
        if self.draining {
            return;
        }
        self.draining = true;
        while let Some(event) = self.queue.pop_front() {
            let effects = self.handle(event);
            self.apply(effects);
        }
        self.draining = false;
    }

    fn handle(&mut self, event: MonitorEvent<T::Node>) -> Vec<Effect<T::Node>> {
        let tree = &mut self.tree;
        match event {
            MonitorEvent::Start => self.monitor.start(tree),
            MonitorEvent::DocumentReady => self.monitor.document_ready(tree),
            MonitorEvent::Configure(settings) => self.monitor.configure(tree, settings),
            MonitorEvent::Mutations(batch) => self.monitor.on_mutation_batch(tree, &batch),
            MonitorEvent::Timer(id) => self.monitor.on_timer(tree, id),
            MonitorEvent::Stop => self.monitor.stop(),
            MonitorEvent::Unload => self.monitor.unload(),
        }
    }

    fn apply(&mut self, effects: Vec<Effect<T::Node>>) {
        for effect in effects {
            match effect {
                Effect::Observe(root) => self.host.observe(&mut self.tree, &root),
                Effect::Disconnect => self.host.disconnect(&mut self.tree),
                Effect::ArmTimer { id, delay } => self.host.arm_timer(id, delay),
                Effect::CancelTimer(id) => self.host.cancel_timer(id),
                Effect::EmitStats(delta) => {
                    if let Err(e) = self.host.send_stats(&delta) {
                        self.dropped_stats += 1;
                        debug!("dropping stats delta: {}", e);
                    }
                }
            }
        }
    }
}

impl<H> Driver<Document, H>
where
    H: MonitorHost<Document>,
{
    /// A driver over `tree` for a page at `page_host` with default config.
    pub fn for_document(tree: Document, host: H, page_host: Option<&str>) -> Self {
        Self::new(tree, host, MonitorConfig::default(), page_host)
    }

    /// Deliver the document's journaled records as one batch.
    pub fn deliver_records(&mut self) {
        let batch = self.tree.take_records();
        if !batch.is_empty() {
            self.dispatch(MonitorEvent::Mutations(batch));
        }
    }
}

// =============================================================================
// Arena Host
// =============================================================================

/// [`MonitorHost`] for [`Document`]: observation journals into the document,
/// timers are recorded for the caller to fire, stats are collected.
#[derive(Debug, Default)]
pub struct ArenaHost {
    armed: Vec<(TimerId, Duration)>,
    sent: Vec<StatsDelta>,
    /// Reject every stats delivery, as an unready background would.
    pub reject_stats: bool,
}

impl ArenaHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timers armed and not yet cancelled or taken.
    pub fn armed_timers(&self) -> &[(TimerId, Duration)] {
        &self.armed
    }

    /// Remove and return armed timers so the caller can fire them.
    pub fn take_timers(&mut self) -> Vec<(TimerId, Duration)> {
        std::mem::take(&mut self.armed)
    }

    pub fn sent(&self) -> &[StatsDelta] {
        &self.sent
    }
}

impl MonitorHost<Document> for ArenaHost {
    fn observe(&mut self, tree: &mut Document, root: &<Document as DomTree>::Node) {
        tree.observe(*root);
    }

    fn disconnect(&mut self, tree: &mut Document) {
        tree.disconnect();
    }

    fn arm_timer(&mut self, id: TimerId, delay: Duration) {
        self.armed.push((id, delay));
    }

    fn cancel_timer(&mut self, id: TimerId) {
        self.armed.retain(|(armed, _)| *armed != id);
    }

    fn send_stats(&mut self, delta: &StatsDelta) -> Result<(), HostError> {
        if self.reject_stats {
            return Err(HostError::RecipientUnavailable);
        }
        self.sent.push(*delta);
        Ok(())
    }
}

impl Driver<Document, ArenaHost> {
    /// Fire every armed timer, as if the coalescing window elapsed.
    pub fn fire_timers(&mut self) {
        for (id, _) in self.host.take_timers() {
            self.dispatch(MonitorEvent::Timer(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Stats;

    const MIB: u64 = 1024 * 1024;

    fn videos_only() -> Settings {
        Settings {
            block_videos: true,
            ..Settings::disabled()
        }
    }

    fn running(doc: Document, settings: Settings) -> Driver<Document, ArenaHost> {
        let mut driver = Driver::for_document(doc, ArenaHost::new(), None);
        driver.dispatch(MonitorEvent::Configure(settings));
        driver.dispatch(MonitorEvent::Start);
        driver
    }

    #[test]
    fn start_observes_body_and_scans() {
        let mut doc = Document::with_body();
        let body = doc.body_id().unwrap();
        let video = doc.create_element("video");
        doc.append_child(body, video);

        let driver = running(doc, videos_only());
        assert!(driver.tree().is_observed());
        assert!(!driver.tree().is_attached(video));
        assert_eq!(
            driver.host().sent(),
            &[StatsDelta {
                bandwidth_saved: 5 * MIB,
                elements_blocked: 1,
            }]
        );
    }

    #[test]
    fn own_removals_do_not_rearm() {
        let mut driver = running(Document::with_body(), videos_only());
        let body = driver.tree().body_id().unwrap();

        let tree = driver.tree_mut();
        let video = tree.create_element("video");
        tree.append_child(body, video);
        driver.deliver_records();
        assert_eq!(driver.host().armed_timers().len(), 1);
        assert_eq!(driver.host().armed_timers()[0].1, Duration::from_millis(100));

        driver.fire_timers();
        assert!(!driver.tree().is_attached(video));

        // The removal itself is journaled; delivering it must not arm again.
        driver.deliver_records();
        assert!(driver.host().armed_timers().is_empty());
        assert_eq!(driver.host().sent().len(), 1);
    }

    #[test]
    fn failed_stats_delivery_is_swallowed() {
        let mut doc = Document::with_body();
        let body = doc.body_id().unwrap();
        let video = doc.create_element("video");
        doc.append_child(body, video);

        let mut host = ArenaHost::new();
        host.reject_stats = true;
        let mut driver = Driver::for_document(doc, host, None);
        driver.dispatch(MonitorEvent::Configure(videos_only()));
        driver.dispatch(MonitorEvent::Start);

        assert!(!driver.tree().is_attached(video));
        assert_eq!(driver.dropped_stats(), 1);
        assert!(driver.host().sent().is_empty());
        assert_eq!(driver.monitor().session_stats().elements_blocked, 1);
    }

    #[test]
    fn stats_flow_once_recipient_comes_up() {
        let mut doc = Document::with_body();
        let body = doc.body_id().unwrap();
        let video = doc.create_element("video");
        doc.append_child(body, video);

        let mut host = ArenaHost::new();
        host.reject_stats = true;
        let mut driver = Driver::for_document(doc, host, None);
        driver.dispatch(MonitorEvent::Configure(videos_only()));
        driver.dispatch(MonitorEvent::Start);
        assert_eq!(driver.dropped_stats(), 1);

        driver.host_mut().reject_stats = false;
        let tree = driver.tree_mut();
        let late = tree.create_element("video");
        tree.append_child(body, late);
        driver.deliver_records();
        driver.fire_timers();

        assert!(!driver.tree().is_attached(late));
        assert_eq!(driver.dropped_stats(), 1);
        assert_eq!(
            driver.host().sent(),
            &[StatsDelta {
                bandwidth_saved: 5 * MIB,
                elements_blocked: 1,
            }]
        );
        assert_eq!(driver.monitor().session_stats().elements_blocked, 2);
    }

    #[test]
    fn posted_events_run_in_order_on_drain() {
        let mut doc = Document::with_body();
        let body = doc.body_id().unwrap();
        let img = doc.create_element("img");
        doc.append_child(body, img);

        let mut driver = Driver::for_document(doc, ArenaHost::new(), None);
        driver.post(MonitorEvent::Start);
        driver.post(MonitorEvent::Configure(Settings {
            block_images: true,
            ..Settings::disabled()
        }));
        assert!(driver.tree().is_attached(img));

        driver.drain();
        assert!(!driver.tree().is_attached(img));
        assert_eq!(driver.host().sent().len(), 1);
    }

    #[test]
    fn unload_cancels_pending_pass() {
        let mut driver = running(Document::with_body(), videos_only());
        let body = driver.tree().body_id().unwrap();

        let tree = driver.tree_mut();
        let video = tree.create_element("video");
        tree.append_child(body, video);
        driver.deliver_records();
        assert_eq!(driver.host().armed_timers().len(), 1);

        driver.dispatch(MonitorEvent::Unload);
        assert!(driver.host().armed_timers().is_empty());
        assert!(!driver.tree().is_observed());

        driver.fire_timers();
        assert!(driver.tree().is_attached(video));
        assert_eq!(driver.monitor().session_stats(), Stats::default());
    }
}
