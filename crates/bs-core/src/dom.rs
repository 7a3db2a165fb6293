//! Document tree abstraction
//!
//! The monitor never talks to a browser directly. It sees the page through
//! [`DomTree`], which the wasm binding implements over `web_sys` and which
//! [`Document`] implements as an arena for tests and tooling.
//!
//! [`Document`] journals [`MutationRecord`]s while observed, one record per
//! tree edit, the way a `MutationObserver` with `childList` + `subtree`
//! delivers them.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

// =============================================================================
// Tree Contract
// =============================================================================

/// Host tree operations needed by the monitor.
pub trait DomTree {
    /// Handle to a node. Must compare by identity.
    type Node: Clone + Eq + Debug;

    /// The document body, if it exists yet.
    fn body(&self) -> Option<Self::Node>;

    fn is_element(&self, node: &Self::Node) -> bool;

    /// Lowercase tag name. Empty for non-elements.
    fn local_name(&self, node: &Self::Node) -> Cow<'_, str>;

    fn attribute(&self, node: &Self::Node, name: &str) -> Option<Cow<'_, str>>;

    fn has_class(&self, node: &Self::Node, class: &str) -> bool;

    /// Element children in document order.
    fn element_children(&self, node: &Self::Node) -> Vec<Self::Node>;

    fn parent(&self, node: &Self::Node) -> Option<Self::Node>;

    /// Still attached to the document.
    fn is_connected(&self, node: &Self::Node) -> bool;

    /// Detach `node` from its parent.
    fn remove(&mut self, node: &Self::Node);

    fn set_attribute(&mut self, node: &Self::Node, name: &str, value: &str);

    /// Hide `node` without detaching it.
    fn hide(&mut self, node: &Self::Node);

    /// Insert a static placeholder as the previous sibling of `node`. Returns
    /// `None` when `node` has no parent.
    fn insert_placeholder_before(
        &mut self,
        node: &Self::Node,
        text: &str,
        marker_attribute: &str,
    ) -> Option<Self::Node>;

    /// True when `node` is `ancestor` or lies inside it.
    fn is_inclusive_descendant(&self, node: &Self::Node, ancestor: &Self::Node) -> bool {
        let mut current = Some(node.clone());
        while let Some(n) = current {
            if &n == ancestor {
                return true;
            }
            current = self.parent(&n);
        }
        false
    }
}

/// One observed tree edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord<N> {
    pub added: Vec<N>,
    pub removed: Vec<N>,
}

impl<N> MutationRecord<N> {
    pub fn added(nodes: Vec<N>) -> Self {
        Self {
            added: nodes,
            removed: Vec::new(),
        }
    }

    pub fn removed(nodes: Vec<N>) -> Self {
        Self {
            added: Vec::new(),
            removed: nodes,
        }
    }
}

// =============================================================================
// Arena Document
// =============================================================================

/// Index of a node in a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
enum NodeKind {
    Element {
        name: String,
        attributes: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

const HIDDEN_STYLE: &str = "display: none";

/// In-memory document. Nodes are never freed; detached nodes simply lose
/// their parent link.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
    root: NodeId,
    body: Option<NodeId>,
    observed: Option<NodeId>,
    records: Vec<MutationRecord<NodeId>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// A document with only an `<html>` root; the body does not exist yet.
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            body: None,
            observed: None,
            records: Vec::new(),
        };
        doc.root = doc.create_element("html");
        doc
    }

    /// A document with an empty `<body>`.
    pub fn with_body() -> Self {
        let mut doc = Self::new();
        doc.attach_body();
        doc
    }

    /// Create and attach `<body>`; returns the existing one if present.
    pub fn attach_body(&mut self) -> NodeId {
        if let Some(body) = self.body {
            return body;
        }
        let body = self.create_element("body");
        self.append_child(self.root, body);
        self.body = Some(body);
        body
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn body_id(&self) -> Option<NodeId> {
        self.body
    }

    pub fn create_element(&mut self, name: &str) -> NodeId {
        self.push_node(NodeKind::Element {
            name: name.to_ascii_lowercase(),
            attributes: Vec::new(),
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push_node(NodeKind::Text(text.to_string()))
    }

    /// Create an element with attributes in one call.
    pub fn element(&mut self, name: &str, attributes: &[(&str, &str)]) -> NodeId {
        let id = self.create_element(name);
        for (key, value) in attributes {
            self.set_attr(id, key, value);
        }
        id
    }

    fn push_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) {
        if let NodeKind::Element { attributes, .. } = &mut self.nodes[node.0].kind {
            match attributes.iter_mut().find(|(k, _)| k == name) {
                Some((_, v)) => *v = value.to_string(),
                None => attributes.push((name.to_string(), value.to_string())),
            }
        }
    }

    pub fn get_attr(&self, node: NodeId, name: &str) -> Option<&str> {
        match &self.nodes[node.0].kind {
            NodeKind::Element { attributes, .. } => attributes
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            NodeKind::Text(_) => None,
        }
    }

    /// Append `child` as the last child of `parent`, detaching it first.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[parent.0].children.push(child);
        self.nodes[child.0].parent = Some(parent);
        self.record(parent, MutationRecord::added(vec![child]));
    }

    /// Insert `child` before `reference` under `parent`. Appends when
    /// `reference` is not a child of `parent`.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: NodeId) {
        self.detach(child);
        let siblings = &mut self.nodes[parent.0].children;
        match siblings.iter().position(|&c| c == reference) {
            Some(pos) => siblings.insert(pos, child),
            None => siblings.push(child),
        }
        self.nodes[child.0].parent = Some(parent);
        self.record(parent, MutationRecord::added(vec![child]));
    }

    /// Detach `node` from its parent. No-op for detached nodes.
    pub fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.nodes[node.0].parent.take() else {
            return;
        };
        self.nodes[parent.0].children.retain(|&c| c != node);
        self.record(parent, MutationRecord::removed(vec![node]));
    }

    pub fn children_of(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        match &self.nodes[node.0].kind {
            NodeKind::Element { name, .. } => Some(name),
            NodeKind::Text(_) => None,
        }
    }

    /// Concatenated text of `node` and its descendants.
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        match &self.nodes[node.0].kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element { .. } => {
                for &child in &self.nodes[node.0].children {
                    self.collect_text(child, out);
                }
            }
        }
    }

    pub fn is_hidden(&self, node: NodeId) -> bool {
        self.get_attr(node, "style")
            .is_some_and(|style| style.contains(HIDDEN_STYLE))
    }

    pub fn is_attached(&self, node: NodeId) -> bool {
        let mut current = node;
        loop {
            if current == self.root {
                return true;
            }
            match self.nodes[current.0].parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Attached elements with the given tag, in document order.
    pub fn find_by_tag(&self, tag: &str) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            if self.tag(node) == Some(tag) {
                out.push(node);
            }
            stack.extend(self.nodes[node.0].children.iter().rev().copied());
        }
        out
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Start journaling edits under `root` (inclusive subtree).
    pub fn observe(&mut self, root: NodeId) {
        self.observed = Some(root);
    }

    /// Stop journaling and drop undelivered records.
    pub fn disconnect(&mut self) {
        self.observed = None;
        self.records.clear();
    }

    pub fn is_observed(&self) -> bool {
        self.observed.is_some()
    }

    /// Drain journaled records, oldest first.
    pub fn take_records(&mut self) -> Vec<MutationRecord<NodeId>> {
        std::mem::take(&mut self.records)
    }

    fn record(&mut self, target: NodeId, record: MutationRecord<NodeId>) {
        let Some(observed) = self.observed else {
            return;
        };
        if self.is_inclusive_descendant(&target, &observed) {
            self.records.push(record);
        }
    }

    // =========================================================================
    // Specs
    // =========================================================================

    /// Build a detached subtree from a spec.
    pub fn build(&mut self, spec: &NodeSpec) -> NodeId {
        match spec {
            NodeSpec::Text(text) => self.create_text(text),
            NodeSpec::Element(element) => {
                let id = self.create_element(&element.tag);
                for (key, value) in &element.attributes {
                    self.set_attr(id, key, value);
                }
                for child in &element.children {
                    let child_id = self.build(child);
                    self.nodes[child_id.0].parent = Some(id);
                    self.nodes[id.0].children.push(child_id);
                }
                id
            }
        }
    }

    /// A document whose body holds the given nodes.
    pub fn from_body_specs(specs: &[NodeSpec]) -> Self {
        let mut doc = Self::with_body();
        let body = doc.attach_body();
        for spec in specs {
            let id = doc.build(spec);
            doc.append_child(body, id);
        }
        doc
    }

    /// Snapshot of a subtree.
    pub fn to_spec(&self, node: NodeId) -> NodeSpec {
        match &self.nodes[node.0].kind {
            NodeKind::Text(text) => NodeSpec::Text(text.clone()),
            NodeKind::Element { name, attributes } => NodeSpec::Element(ElementSpec {
                tag: name.clone(),
                attributes: attributes.iter().cloned().collect(),
                children: self.nodes[node.0]
                    .children
                    .iter()
                    .map(|&c| self.to_spec(c))
                    .collect(),
            }),
        }
    }
}

/// Serializable description of a subtree, used by tooling and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeSpec {
    Text(String),
    Element(ElementSpec),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSpec {
    pub tag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSpec>,
}

impl DomTree for Document {
    type Node = NodeId;

    fn body(&self) -> Option<NodeId> {
        self.body
    }

    fn is_element(&self, node: &NodeId) -> bool {
        matches!(self.nodes[node.0].kind, NodeKind::Element { .. })
    }

    fn local_name(&self, node: &NodeId) -> Cow<'_, str> {
        Cow::Borrowed(self.tag(*node).unwrap_or(""))
    }

    fn attribute(&self, node: &NodeId, name: &str) -> Option<Cow<'_, str>> {
        self.get_attr(*node, name).map(Cow::Borrowed)
    }

    fn has_class(&self, node: &NodeId, class: &str) -> bool {
        self.get_attr(*node, "class")
            .is_some_and(|classes| classes.split_ascii_whitespace().any(|c| c == class))
    }

    fn element_children(&self, node: &NodeId) -> Vec<NodeId> {
        self.nodes[node.0]
            .children
            .iter()
            .copied()
            .filter(|c| self.is_element(c))
            .collect()
    }

    fn parent(&self, node: &NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    fn is_connected(&self, node: &NodeId) -> bool {
        self.is_attached(*node)
    }

    fn remove(&mut self, node: &NodeId) {
        self.detach(*node);
    }

    fn set_attribute(&mut self, node: &NodeId, name: &str, value: &str) {
        self.set_attr(*node, name, value);
    }

    fn hide(&mut self, node: &NodeId) {
        let style = match self.get_attr(*node, "style") {
            Some(existing) if !existing.trim().is_empty() => {
                format!("{}; {}", existing.trim_end_matches([';', ' ']), HIDDEN_STYLE)
            }
            _ => HIDDEN_STYLE.to_string(),
        };
        self.set_attr(*node, "style", &style);
    }

    fn insert_placeholder_before(
        &mut self,
        node: &NodeId,
        text: &str,
        marker_attribute: &str,
    ) -> Option<NodeId> {
        let parent = self.nodes[node.0].parent?;
        let placeholder = self.create_element("div");
        self.set_attr(placeholder, marker_attribute, "placeholder");
        self.set_attr(
            placeholder,
            "style",
            "padding: 20px; background-color: #f1f1f1; text-align: center; border: 1px solid #ddd",
        );
        let label = self.create_text(text);
        self.nodes[label.0].parent = Some(placeholder);
        self.nodes[placeholder.0].children.push(label);
        self.insert_before(parent, placeholder, *node);
        Some(placeholder)
    }
}
