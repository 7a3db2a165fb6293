//! Live page runtime: [`DomTree`] over `web_sys` and the host side of the
//! monitor (mutation observer, timers, stats delivery).

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use bs_core::dom::{DomTree, MutationRecord};
use bs_core::message::Message;
use bs_core::monitor::TimerId;
use bs_core::{Driver, HostError, MonitorConfig, MonitorEvent, MonitorHost, StatsDelta};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, HtmlElement, MutationObserver, MutationObserverInit, NodeList, Window};

const PLACEHOLDER_STYLE: &str = "background:#f0f0f0;border:1px dashed #999;color:#666;\
padding:20px;text-align:center;font-family:sans-serif;font-size:14px;";

// =============================================================================
// Tree
// =============================================================================

/// Element handle compared by JS identity.
#[derive(Clone)]
pub struct WebNode(pub Element);

impl PartialEq for WebNode {
    fn eq(&self, other: &Self) -> bool {
        js_sys::Object::is(self.0.as_ref(), other.0.as_ref())
    }
}

impl Eq for WebNode {}

impl fmt::Debug for WebNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0.local_name())
    }
}

pub struct WebDom {
    document: Document,
}

impl WebDom {
    pub fn new(document: Document) -> Self {
        Self { document }
    }
}

impl DomTree for WebDom {
    type Node = WebNode;

    fn body(&self) -> Option<WebNode> {
        self.document.body().map(|body| WebNode(body.into()))
    }

    fn is_element(&self, _node: &WebNode) -> bool {
        // Non-elements are filtered out when records are converted.
        true
    }

    fn local_name(&self, node: &WebNode) -> Cow<'_, str> {
        Cow::Owned(node.0.local_name())
    }

    fn attribute(&self, node: &WebNode, name: &str) -> Option<Cow<'_, str>> {
        node.0.get_attribute(name).map(Cow::Owned)
    }

    fn has_class(&self, node: &WebNode, class: &str) -> bool {
        node.0.class_list().contains(class)
    }

    fn element_children(&self, node: &WebNode) -> Vec<WebNode> {
        let children = node.0.children();
        (0..children.length())
            .filter_map(|i| children.item(i))
            .map(WebNode)
            .collect()
    }

    fn parent(&self, node: &WebNode) -> Option<WebNode> {
        node.0.parent_element().map(WebNode)
    }

    fn is_connected(&self, node: &WebNode) -> bool {
        node.0.is_connected()
    }

    fn remove(&mut self, node: &WebNode) {
        node.0.remove();
    }

    fn set_attribute(&mut self, node: &WebNode, name: &str, value: &str) {
        let _ = node.0.set_attribute(name, value);
    }

    fn hide(&mut self, node: &WebNode) {
        if let Some(el) = node.0.dyn_ref::<HtmlElement>() {
            let _ = el.style().set_property("display", "none");
        }
    }

    fn insert_placeholder_before(
        &mut self,
        node: &WebNode,
        text: &str,
        marker_attribute: &str,
    ) -> Option<WebNode> {
        let parent = node.0.parent_node()?;
        let placeholder = self.document.create_element("div").ok()?;
        let _ = placeholder.set_attribute(marker_attribute, "placeholder");
        let _ = placeholder.set_attribute("style", PLACEHOLDER_STYLE);
        placeholder.set_text_content(Some(text));
        let reference: &web_sys::Node = &node.0;
        parent.insert_before(&placeholder, Some(reference)).ok()?;
        Some(WebNode(placeholder))
    }
}

fn elements_of(list: &NodeList) -> Vec<WebNode> {
    (0..list.length())
        .filter_map(|i| list.item(i))
        .filter_map(|node| node.dyn_into::<Element>().ok())
        .map(WebNode)
        .collect()
}

fn convert_records(records: &js_sys::Array) -> Vec<MutationRecord<WebNode>> {
    records
        .iter()
        .map(|record| {
            let record: web_sys::MutationRecord = record.unchecked_into();
            MutationRecord {
                added: elements_of(&record.added_nodes()),
                removed: elements_of(&record.removed_nodes()),
            }
        })
        .collect()
}

// =============================================================================
// Host
// =============================================================================

type ObserverCallback = Closure<dyn FnMut(js_sys::Array, MutationObserver)>;

pub struct WebHost {
    runtime: Weak<Runtime>,
    window: Window,
    observer: Option<MutationObserver>,
    // Replaced on the next observe, never dropped from inside a callback.
    observer_callback: Option<ObserverCallback>,
    armed: Option<(TimerId, i32)>,
    send_stats: js_sys::Function,
    swallow: Closure<dyn FnMut(JsValue)>,
}

impl WebHost {
    fn new(runtime: Weak<Runtime>, window: Window, send_stats: js_sys::Function) -> Self {
        Self {
            runtime,
            window,
            observer: None,
            observer_callback: None,
            armed: None,
            send_stats,
            swallow: Closure::wrap(Box::new(|_: JsValue| {}) as Box<dyn FnMut(JsValue)>),
        }
    }
}

impl WebHost {
    /// Deliver `id` without waiting. Called with the driver borrowed, so the
    /// event lands in the inbox and runs once the current drain returns.
    fn fire_now(&self, id: TimerId) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.deliver(MonitorEvent::Timer(id));
        }
    }
}

impl MonitorHost<WebDom> for WebHost {
    fn observe(&mut self, _tree: &mut WebDom, root: &WebNode) {
        let runtime = self.runtime.clone();
        let callback: ObserverCallback = Closure::wrap(Box::new(
            move |records: js_sys::Array, _observer: MutationObserver| {
                if let Some(runtime) = runtime.upgrade() {
                    runtime.deliver(MonitorEvent::Mutations(convert_records(&records)));
                }
            },
        ) as Box<dyn FnMut(js_sys::Array, MutationObserver)>);

        let observer = match MutationObserver::new(callback.as_ref().unchecked_ref()) {
            Ok(observer) => observer,
            Err(e) => {
                log::warn!("MutationObserver unavailable: {:?}", e);
                return;
            }
        };
        let init = MutationObserverInit::new();
        init.set_child_list(true);
        init.set_subtree(true);
        if let Err(e) = observer.observe_with_options(&root.0, &init) {
            log::warn!("observe failed: {:?}", e);
            return;
        }

        if let Some(previous) = self.observer.replace(observer) {
            previous.disconnect();
        }
        self.observer_callback = Some(callback);
    }

    fn disconnect(&mut self, _tree: &mut WebDom) {
        if let Some(observer) = self.observer.take() {
            observer.disconnect();
        }
    }

    fn arm_timer(&mut self, id: TimerId, delay: Duration) {
        let runtime = self.runtime.clone();
        let fire = Closure::once_into_js(move || {
            if let Some(runtime) = runtime.upgrade() {
                runtime.deliver(MonitorEvent::Timer(id));
            }
        });
        let millis = i32::try_from(delay.as_millis()).unwrap_or(i32::MAX);
        match self
            .window
            .set_timeout_with_callback_and_timeout_and_arguments_0(fire.unchecked_ref(), millis)
        {
            Ok(handle) => self.armed = Some((id, handle)),
            Err(e) => {
                log::warn!("setTimeout failed, running pass now: {:?}", e);
                self.fire_now(id);
            }
        }
    }

    fn cancel_timer(&mut self, id: TimerId) {
        if let Some((armed, handle)) = self.armed {
            if armed == id {
                self.window.clear_timeout_with_handle(handle);
                self.armed = None;
            }
        }
    }

    fn send_stats(&mut self, delta: &StatsDelta) -> Result<(), HostError> {
        let payload = crate::to_js(&Message::UpdateStats { stats: *delta })
            .map_err(|e| HostError::Call(format!("{:?}", e)))?;
        let returned = self
            .send_stats
            .call1(&JsValue::NULL, &payload)
            .map_err(|_| HostError::RecipientUnavailable)?;
        // An unready background rejects; nothing to do about it.
        if let Some(promise) = returned.dyn_ref::<js_sys::Promise>() {
            let _ = promise.catch(&self.swallow);
        }
        Ok(())
    }
}

// =============================================================================
// Runtime
// =============================================================================

/// Driver plus an inbox for events that arrive while the driver is busy.
pub struct Runtime {
    driver: RefCell<Driver<WebDom, WebHost>>,
    inbox: RefCell<VecDeque<MonitorEvent<WebNode>>>,
}

impl Runtime {
    pub fn new(
        window: Window,
        document: Document,
        send_stats: js_sys::Function,
        config: MonitorConfig,
        page_host: Option<&str>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|weak| Runtime {
            driver: RefCell::new(Driver::new(
                WebDom::new(document),
                WebHost::new(weak.clone(), window, send_stats),
                config,
                page_host,
            )),
            inbox: RefCell::new(VecDeque::new()),
        })
    }

    /// Queue `event` and drain the inbox unless a drain is already running.
    pub fn deliver(&self, event: MonitorEvent<WebNode>) {
        self.inbox.borrow_mut().push_back(event);
        let Ok(mut driver) = self.driver.try_borrow_mut() else {
            return;
        };
        loop {
            let next = self.inbox.borrow_mut().pop_front();
            match next {
                Some(event) => driver.dispatch(event),
                None => break,
            }
        }
    }

    pub fn with_driver<R>(&self, f: impl FnOnce(&Driver<WebDom, WebHost>) -> R) -> Option<R> {
        self.driver.try_borrow().ok().map(|driver| f(&driver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_bindgen_test::*;

    #[wasm_bindgen_test]
    fn timer_delivered_mid_drain_runs_after_it() {
        let window = web_sys::window().unwrap();
        let document = window.document().unwrap();
        let sink = js_sys::Function::new_no_args("");
        let runtime = Runtime::new(window, document.clone(), sink, MonitorConfig::default(), Some("example.com"));
        runtime.deliver(MonitorEvent::Configure(bs_core::Settings {
            block_videos: true,
            ..bs_core::Settings::disabled()
        }));
        runtime.deliver(MonitorEvent::Start);

        let wrapper = document.create_element("div").unwrap();
        let video = document.create_element("video").unwrap();
        wrapper.append_child(&video).unwrap();
        document.body().unwrap().append_child(&wrapper).unwrap();
        runtime.deliver(MonitorEvent::Mutations(vec![MutationRecord {
            added: vec![WebNode(wrapper.clone())],
            removed: Vec::new(),
        }]));
        let id = runtime
            .with_driver(|driver| driver.monitor().armed_timer())
            .flatten()
            .unwrap();
        assert!(video.is_connected());

        // As when setTimeout is refused: fired from inside the drain.
        let driver = runtime.driver.borrow();
        driver.host().fire_now(id);
        drop(driver);
        assert_eq!(runtime.inbox.borrow().len(), 1);

        runtime.deliver(MonitorEvent::DocumentReady);
        assert!(runtime.inbox.borrow().is_empty());
        assert!(!video.is_connected());
        assert_eq!(runtime.with_driver(|driver| driver.monitor().armed_timer()).flatten(), None);

        runtime.deliver(MonitorEvent::Unload);
        wrapper.remove();
    }
}
