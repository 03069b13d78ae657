//! # Editing Session
//!
//! [`ModelManager`] holds the nodes and elements of the stage being edited,
//! the current selection, and the listeners a front end registers to hear
//! about changes. It is a working copy: nothing here is persisted until the
//! caller writes it back with [`ModelManager::apply_to`].
//!
//! ## Example
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! use modsee_core::model::Node;
//! use modsee_core::session::{ModelManager, Selected};
//!
//! let changes = Rc::new(Cell::new(0));
//! let counter = Rc::clone(&changes);
//!
//! let mut manager = ModelManager::new();
//! manager.on_model_changed(move || counter.set(counter.get() + 1));
//! manager.add_node(Node::new(1, 0.0, 0.0, 0.0));
//! assert!(manager.select(Selected::Node(1)));
//! assert_eq!(changes.get(), 1);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::components::{Component, Initializable, Resettable};
use crate::errors::ModelResult;
use crate::model::{Element, Node, ObjectId};
use crate::stage::Stage;

/// A selectable object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Selected {
    Node(ObjectId),
    Element(ObjectId),
}

type ModelListener = Box<dyn FnMut()>;
type SelectionListener = Box<dyn FnMut(&BTreeSet<Selected>)>;

/// Serializable state of a [`ModelManager`], without its listeners.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub nodes: BTreeMap<ObjectId, Node>,
    pub elements: BTreeMap<ObjectId, Element>,
    pub selection: BTreeSet<Selected>,
    /// Whether the session went through [`Initializable::initialize`]
    #[serde(default)]
    pub initialized: bool,
}

/// Working copy of one stage's geometry plus the selection.
#[derive(Default)]
pub struct ModelManager {
    nodes: BTreeMap<ObjectId, Node>,
    elements: BTreeMap<ObjectId, Element>,
    selection: BTreeSet<Selected>,
    modified: bool,
    initialized: bool,
    model_listeners: Vec<ModelListener>,
    selection_listeners: Vec<SelectionListener>,
}

impl fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelManager")
            .field("nodes", &self.nodes.len())
            .field("elements", &self.elements.len())
            .field("selection", &self.selection)
            .field("modified", &self.modified)
            .field("initialized", &self.initialized)
            .field("listeners", &(self.model_listeners.len() + self.selection_listeners.len()))
            .finish()
    }
}

impl ModelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session from a stage's nodes and elements.
    pub fn from_stage(stage: &Stage) -> Self {
        let mut manager = ModelManager::new();
        manager.nodes = stage.nodes.clone();
        manager.elements = stage.elements.clone();
        tracing::debug!(stage = stage.id, nodes = manager.nodes.len(), "session loaded");
        manager
    }

    /// Replace the stage's nodes and elements with the session's.
    pub fn apply_to(&mut self, stage: &mut Stage) {
        stage.nodes = self.nodes.clone();
        stage.elements = self.elements.clone();
        self.modified = false;
    }

    pub fn on_model_changed(&mut self, listener: impl FnMut() + 'static) {
        self.model_listeners.push(Box::new(listener));
    }

    pub fn on_selection_changed(&mut self, listener: impl FnMut(&BTreeSet<Selected>) + 'static) {
        self.selection_listeners.push(Box::new(listener));
    }

    fn model_changed(&mut self) {
        self.modified = true;
        for listener in &mut self.model_listeners {
            listener();
        }
    }

    fn selection_changed(&mut self) {
        for listener in &mut self.selection_listeners {
            listener(&self.selection);
        }
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    /// Insert or replace a node.
    pub fn add_node(&mut self, node: Node) {
        tracing::debug!(node = node.id, "session added node");
        self.nodes.insert(node.id, node);
        self.model_changed();
    }

    pub fn node(&self, id: ObjectId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Remove a node, dropping it from the selection too.
    pub fn remove_node(&mut self, id: ObjectId) -> Option<Node> {
        let node = self.nodes.remove(&id)?;
        if self.selection.remove(&Selected::Node(id)) {
            self.selection_changed();
        }
        tracing::debug!(node = id, "session removed node");
        self.model_changed();
        Some(node)
    }

    /// Insert or replace an element.
    pub fn add_element(&mut self, element: Element) {
        tracing::debug!(element = element.id, "session added element");
        self.elements.insert(element.id, element);
        self.model_changed();
    }

    pub fn element(&self, id: ObjectId) -> Option<&Element> {
        self.elements.get(&id)
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }

    /// Remove an element, dropping it from the selection too.
    pub fn remove_element(&mut self, id: ObjectId) -> Option<Element> {
        let element = self.elements.remove(&id)?;
        if self.selection.remove(&Selected::Element(id)) {
            self.selection_changed();
        }
        tracing::debug!(element = id, "session removed element");
        self.model_changed();
        Some(element)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// True between `initialize` and the next `reset`.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Drop every object and the selection.
    pub fn clear(&mut self) {
        let had_selection = !self.selection.is_empty();
        self.nodes.clear();
        self.elements.clear();
        self.selection.clear();
        if had_selection {
            self.selection_changed();
        }
        self.model_changed();
        tracing::info!("session cleared");
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    fn exists(&self, item: Selected) -> bool {
        match item {
            Selected::Node(id) => self.nodes.contains_key(&id),
            Selected::Element(id) => self.elements.contains_key(&id),
        }
    }

    /// Add an existing object to the selection. Returns whether it changed.
    pub fn select(&mut self, item: Selected) -> bool {
        if !self.exists(item) || !self.selection.insert(item) {
            return false;
        }
        self.selection_changed();
        true
    }

    pub fn deselect(&mut self, item: Selected) -> bool {
        if !self.selection.remove(&item) {
            return false;
        }
        self.selection_changed();
        true
    }

    pub fn select_all(&mut self) {
        let before = self.selection.len();
        self.selection.extend(self.nodes.keys().map(|id| Selected::Node(*id)));
        self.selection.extend(self.elements.keys().map(|id| Selected::Element(*id)));
        if self.selection.len() != before {
            self.selection_changed();
        }
    }

    pub fn deselect_all(&mut self) {
        if self.selection.is_empty() {
            return;
        }
        self.selection.clear();
        self.selection_changed();
    }

    pub fn is_selected(&self, item: Selected) -> bool {
        self.selection.contains(&item)
    }

    pub fn selection(&self) -> &BTreeSet<Selected> {
        &self.selection
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            nodes: self.nodes.clone(),
            elements: self.elements.clone(),
            selection: self.selection.clone(),
            initialized: self.initialized,
        }
    }
}

impl Component for ModelManager {
    fn name(&self) -> &str {
        "ModelManager"
    }

    fn as_initializable_mut(&mut self) -> Option<&mut dyn Initializable> {
        Some(self)
    }

    fn as_resettable_mut(&mut self) -> Option<&mut dyn Resettable> {
        Some(self)
    }
}

impl Initializable for ModelManager {
    fn initialize(&mut self) -> ModelResult<()> {
        self.initialized = true;
        tracing::info!("model manager initialized");
        Ok(())
    }
}

impl Resettable for ModelManager {
    /// Clears the session and forgets unsaved changes. Listeners stay.
    fn reset(&mut self) {
        self.clear();
        self.modified = false;
        self.initialized = false;
    }
}
