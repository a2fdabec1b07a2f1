use crate::error::{Result, TopologyViolation, TreeError};
use crate::listener::{ListenerList, TreeListener};
use crate::undo::{UndoManager, UndoableAction};
use crate::{DynamicValue, Identifier};
use indexmap::IndexMap;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::{
    cell::RefCell,
    fmt,
    hash::{Hash, Hasher},
    rc::{Rc, Weak},
};

/// A handle to a node of a shared state tree.
///
/// Cloning a handle is cheap and aliases the same storage: a change made through one handle is
/// visible through every other, and two handles compare equal iff they share storage. Use
/// [`TreeNode::deep_copy`] for an independent subtree.
///
/// A parent owns its children. The back-reference to the parent is weak and is cleared when the
/// node is detached.
///
/// Every mutating method takes an optional [`UndoManager`]. When one is given the edit is
/// recorded into its current transaction so it can be undone later.
#[derive(Clone)]
pub struct TreeNode {
    inner: Rc<NodeInner>,
}

struct NodeInner {
    tag: Identifier,
    state: RefCell<NodeState>,
    listeners: ListenerList,
}

#[derive(Default)]
struct NodeState {
    properties: IndexMap<Identifier, DynamicValue>,
    children: Vec<TreeNode>,
    parent: Weak<NodeInner>,
}

impl TreeNode {
    /// Creates an empty, detached node. The type tag cannot be changed afterwards.
    pub fn new(tag: impl Into<Identifier>) -> Self {
        let tag = tag.into();
        debug_assert!(tag.is_valid(), "invalid type tag {tag:?}");
        Self {
            inner: Rc::new(NodeInner {
                tag,
                state: RefCell::new(NodeState::default()),
                listeners: ListenerList::default(),
            }),
        }
    }

    pub fn tag(&self) -> Identifier {
        self.inner.tag.clone()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.inner.tag == *tag
    }

    /// Number of live handles to this node's storage, including the one held by its parent.
    pub fn reference_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    // ---------------------------------------------------------------------------------------
    // Properties

    /// The named property, or `Void` when absent.
    pub fn property(&self, name: &str) -> DynamicValue {
        self.inner
            .state
            .borrow()
            .properties
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn property_or(&self, name: &str, default: impl Into<DynamicValue>) -> DynamicValue {
        self.inner
            .state
            .borrow()
            .properties
            .get(name)
            .cloned()
            .unwrap_or_else(|| default.into())
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.inner.state.borrow().properties.contains_key(name)
    }

    pub fn num_properties(&self) -> usize {
        self.inner.state.borrow().properties.len()
    }

    /// Property names in insertion order.
    pub fn property_names(&self) -> Vec<Identifier> {
        self.inner.state.borrow().properties.keys().cloned().collect()
    }

    /// Name/value pairs in insertion order.
    pub fn properties(&self) -> Vec<(Identifier, DynamicValue)> {
        self.inner
            .state
            .borrow()
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Stores `value` under `name` and notifies listeners, unless the stored value already has
    /// the same variant and printable form (an absent property counts as `Void`).
    pub fn set_property(
        &self,
        name: impl Into<Identifier>,
        value: impl Into<DynamicValue>,
        undo: Option<&UndoManager>,
    ) -> &Self {
        let name = name.into();
        let value = value.into();
        debug_assert!(name.is_valid(), "invalid property name {name:?}");

        let old = self.inner.state.borrow().properties.get(&name).cloned();
        if old.as_ref().unwrap_or(&DynamicValue::Void).same_content(&value) {
            return self;
        }

        match undo {
            Some(um) => um.perform(UndoableAction::SetProperty {
                node: self.clone(),
                name,
                old,
                new: Some(value),
            }),
            None => self.apply_property(&name, Some(value)),
        }
        self
    }

    pub fn remove_property(&self, name: &str, undo: Option<&UndoManager>) {
        let Some((name, old)) = self
            .inner
            .state
            .borrow()
            .properties
            .get_key_value(name)
            .map(|(k, v)| (k.clone(), v.clone()))
        else {
            return;
        };

        match undo {
            Some(um) => um.perform(UndoableAction::SetProperty {
                node: self.clone(),
                name,
                old: Some(old),
                new: None,
            }),
            None => self.apply_property(&name, None),
        }
    }

    pub fn remove_all_properties(&self, undo: Option<&UndoManager>) {
        for name in self.property_names().iter().rev() {
            self.remove_property(name, undo);
        }
    }

    /// Makes this node's property set equal to `source`'s, removing properties `source` lacks.
    pub fn copy_properties_from(&self, source: &TreeNode, undo: Option<&UndoManager>) {
        if self == source {
            return;
        }
        for name in self.property_names() {
            if !source.has_property(&name) {
                self.remove_property(&name, undo);
            }
        }
        for (name, value) in source.properties() {
            self.set_property(name, value, undo);
        }
    }

    // ---------------------------------------------------------------------------------------
    // Children

    pub fn num_children(&self) -> usize {
        self.inner.state.borrow().children.len()
    }

    pub fn child(&self, index: usize) -> Option<TreeNode> {
        self.inner.state.borrow().children.get(index).cloned()
    }

    /// Handles to the children, in order.
    pub fn children(&self) -> Vec<TreeNode> {
        self.inner.state.borrow().children.clone()
    }

    pub fn index_of(&self, child: &TreeNode) -> Option<usize> {
        self.inner
            .state
            .borrow()
            .children
            .iter()
            .position(|c| c == child)
    }

    pub fn child_with_tag(&self, tag: &str) -> Option<TreeNode> {
        self.inner
            .state
            .borrow()
            .children
            .iter()
            .find(|c| c.has_tag(tag))
            .cloned()
    }

    pub fn child_with_property(&self, name: &str, value: &DynamicValue) -> Option<TreeNode> {
        self.inner
            .state
            .borrow()
            .children
            .iter()
            .find(|c| c.property(name).equivalent_to(value))
            .cloned()
    }

    pub fn parent(&self) -> Option<TreeNode> {
        self.inner
            .state
            .borrow()
            .parent
            .upgrade()
            .map(|inner| TreeNode { inner })
    }

    /// The topmost ancestor, or this node when it is detached.
    pub fn root(&self) -> TreeNode {
        let mut node = self.clone();
        while let Some(parent) = node.parent() {
            node = parent;
        }
        node
    }

    /// True when `possible_ancestor` is a strict ancestor of this node.
    pub fn is_a_child_of(&self, possible_ancestor: &TreeNode) -> bool {
        let mut current = self.parent();
        while let Some(node) = current {
            if node == *possible_ancestor {
                return true;
            }
            current = node.parent();
        }
        false
    }

    /// Inserts `child` at `index` (clamped; `None` appends).
    ///
    /// Fails with [`TreeError::InvalidTopology`] when `child` already has a parent or when it is
    /// this node or one of its ancestors. On failure the tree is unchanged and nothing fires.
    pub fn add_child(
        &self,
        child: &TreeNode,
        index: Option<usize>,
        undo: Option<&UndoManager>,
    ) -> Result<()> {
        self.check_can_adopt(child)?;

        match undo {
            Some(um) => {
                let len = self.num_children();
                um.perform(UndoableAction::AddChild {
                    parent: self.clone(),
                    child: child.clone(),
                    index: index.map_or(len, |i| i.min(len)),
                });
            }
            None => {
                self.apply_insert_child(child, index);
            }
        }
        Ok(())
    }

    pub fn append_child(&self, child: &TreeNode, undo: Option<&UndoManager>) -> Result<()> {
        self.add_child(child, None, undo)
    }

    /// Detaches `child`. Does nothing when it is not a child of this node.
    pub fn remove_child(&self, child: &TreeNode, undo: Option<&UndoManager>) {
        if let Some(index) = self.index_of(child) {
            self.remove_child_at(index, undo);
        }
    }

    pub fn remove_child_at(&self, index: usize, undo: Option<&UndoManager>) -> Option<TreeNode> {
        let child = self.child(index)?;
        match undo {
            Some(um) => um.perform(UndoableAction::RemoveChild {
                parent: self.clone(),
                child: child.clone(),
                index,
            }),
            None => {
                self.apply_remove_child_at(index);
            }
        }
        Some(child)
    }

    pub fn remove_all_children(&self, undo: Option<&UndoManager>) {
        while let Some(last) = self.num_children().checked_sub(1) {
            self.remove_child_at(last, undo);
        }
    }

    /// Moves the child at `from` to `to` (clamped to the last index).
    pub fn move_child(&self, from: usize, to: usize, undo: Option<&UndoManager>) {
        let len = self.num_children();
        if from >= len {
            return;
        }
        let to = to.min(len - 1);
        if from == to {
            return;
        }

        match undo {
            Some(um) => um.perform(UndoableAction::MoveChild {
                parent: self.clone(),
                from,
                to,
            }),
            None => {
                self.apply_move_child(from, to);
            }
        }
    }

    fn check_can_adopt(&self, child: &TreeNode) -> Result<()> {
        let violation = if child == self || self.is_a_child_of(child) {
            Some(TopologyViolation::WouldCreateCycle)
        } else if child.parent().is_some() {
            Some(TopologyViolation::AlreadyAttached)
        } else {
            None
        };

        match violation {
            Some(violation) => {
                tracing::debug!(
                    parent = %self.inner.tag,
                    child = %child.inner.tag,
                    %violation,
                    "refusing to add child"
                );
                Err(TreeError::InvalidTopology(violation))
            }
            None => Ok(()),
        }
    }

    // ---------------------------------------------------------------------------------------
    // Copies and comparison

    /// An independent copy of this subtree. The copy is detached and has no listeners.
    pub fn deep_copy(&self) -> TreeNode {
        let copy = TreeNode::new(self.tag());
        {
            let source = self.inner.state.borrow();
            copy.inner.state.borrow_mut().properties = source.properties.clone();
        }
        for child in self.children() {
            copy.push_child_unchecked(child.deep_copy());
        }
        copy
    }

    /// Structural comparison: same tag, same property set (compared by kind and printable form,
    /// ignoring order) and equivalent children in the same order.
    pub fn is_equivalent_to(&self, other: &TreeNode) -> bool {
        if self == other {
            return true;
        }
        if self.inner.tag != other.inner.tag {
            return false;
        }

        {
            let a = self.inner.state.borrow();
            let b = other.inner.state.borrow();
            if a.properties.len() != b.properties.len() || a.children.len() != b.children.len() {
                return false;
            }
            let same_properties = a.properties.iter().all(|(name, value)| {
                b.properties
                    .get(name)
                    .is_some_and(|other| other.equivalent_to(value))
            });
            if !same_properties {
                return false;
            }
        }

        self.children()
            .iter()
            .zip(other.children().iter())
            .all(|(a, b)| a.is_equivalent_to(b))
    }

    // ---------------------------------------------------------------------------------------
    // Listeners

    /// Registers a listener without taking ownership of it. Dropping the listener unregisters it.
    pub fn add_listener<L: TreeListener + 'static>(&self, listener: &Rc<L>) {
        let listener: Rc<dyn TreeListener> = listener.clone();
        self.inner.listeners.add(&listener);
    }

    pub fn remove_listener<L: TreeListener + 'static>(&self, listener: &Rc<L>) {
        let listener: Rc<dyn TreeListener> = listener.clone();
        self.inner.listeners.remove(&listener);
    }

    pub fn num_listeners(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Points this handle at `other`'s storage.
    ///
    /// Listeners registered on the old storage move to the new one and receive
    /// [`TreeListener::redirected`]. Other handles to the old storage keep it but lose those
    /// listeners.
    pub fn redirect_to(&mut self, other: &TreeNode) {
        if self == other {
            return;
        }

        let moved = self.inner.listeners.take_all();
        *self = other.clone();
        if moved.is_empty() {
            return;
        }

        let live: Vec<Rc<dyn TreeListener>> = moved.iter().filter_map(Weak::upgrade).collect();
        self.inner.listeners.extend(moved);
        tracing::debug!(tag = %self.inner.tag, listeners = live.len(), "handle redirected");
        for listener in live {
            listener.redirected(self);
        }
    }

    // ---------------------------------------------------------------------------------------
    // Raw mutation path shared by live edits and undo/redo replay.

    pub(crate) fn apply_property(&self, name: &Identifier, value: Option<DynamicValue>) {
        let changed = {
            let mut state = self.inner.state.borrow_mut();
            match value {
                Some(value) => match state.properties.get_mut(name) {
                    Some(existing) if existing.same_content(&value) => false,
                    Some(existing) => {
                        *existing = value;
                        true
                    }
                    None => {
                        state.properties.insert(name.clone(), value);
                        true
                    }
                },
                None => state.properties.shift_remove(name).is_some(),
            }
        };

        if changed {
            tracing::trace!(node = %self.inner.tag, property = %name, "property changed");
            self.call_listeners(&|l| l.property_changed(self, name));
        }
    }

    pub(crate) fn apply_insert_child(&self, child: &TreeNode, index: Option<usize>) -> usize {
        let index = {
            let mut state = self.inner.state.borrow_mut();
            let len = state.children.len();
            let index = index.map_or(len, |i| i.min(len));
            state.children.insert(index, child.clone());
            index
        };
        child.inner.state.borrow_mut().parent = Rc::downgrade(&self.inner);

        tracing::trace!(parent = %self.inner.tag, child = %child.inner.tag, index, "child added");
        self.call_listeners(&|l| l.child_added(self, child));
        child.send_parent_changed();
        index
    }

    pub(crate) fn apply_remove_child_at(&self, index: usize) -> Option<TreeNode> {
        let child = {
            let mut state = self.inner.state.borrow_mut();
            if index >= state.children.len() {
                return None;
            }
            state.children.remove(index)
        };
        child.inner.state.borrow_mut().parent = Weak::new();

        tracing::trace!(parent = %self.inner.tag, child = %child.inner.tag, index, "child removed");
        self.call_listeners(&|l| l.child_removed(self, &child, index));
        child.send_parent_changed();
        Some(child)
    }

    pub(crate) fn apply_move_child(&self, from: usize, to: usize) -> bool {
        {
            let mut state = self.inner.state.borrow_mut();
            let len = state.children.len();
            if from >= len || to >= len || from == to {
                return false;
            }
            let child = state.children.remove(from);
            state.children.insert(to, child);
        }

        tracing::trace!(parent = %self.inner.tag, from, to, "child moved");
        self.call_listeners(&|l| l.child_order_changed(self, from, to));
        true
    }

    /// Attaches a freshly built, detached child without notifications. Only for building trees
    /// that nobody can be listening to yet (decoders, copies).
    pub(crate) fn push_child_unchecked(&self, child: TreeNode) {
        child.inner.state.borrow_mut().parent = Rc::downgrade(&self.inner);
        self.inner.state.borrow_mut().children.push(child);
    }

    /// Stores a property without notifications; same restrictions as `push_child_unchecked`.
    pub(crate) fn insert_property_unchecked(&self, name: Identifier, value: DynamicValue) {
        self.inner.state.borrow_mut().properties.insert(name, value);
    }

    /// Delivers an event to this node's listeners, then to each ancestor's.
    fn call_listeners(&self, f: &dyn Fn(&dyn TreeListener)) {
        let mut current = Some(self.clone());
        while let Some(node) = current {
            node.inner.listeners.call(f);
            current = node.parent();
        }
    }

    fn send_parent_changed(&self) {
        for child in self.children() {
            child.send_parent_changed();
        }
        self.inner.listeners.call(&|l| l.parent_changed(self));
    }
}

impl PartialEq for TreeNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for TreeNode {}

impl Hash for TreeNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Rc::as_ptr(&self.inner), state);
    }
}

impl fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("TreeNode")
            .field("tag", &self.inner.tag)
            .field("properties", &state.properties)
            .field("children", &state.children.len())
            .finish()
    }
}

impl Serialize for TreeNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let state = self.inner.state.borrow();
        let mut out = serializer.serialize_struct("TreeNode", 3)?;
        out.serialize_field("type", &self.inner.tag)?;
        out.serialize_field("properties", &state.properties)?;
        out.serialize_field("children", &state.children)?;
        out.end()
    }
}

#[derive(Deserialize)]
struct NodeRepr {
    #[serde(rename = "type")]
    tag: Identifier,
    #[serde(default)]
    properties: IndexMap<Identifier, DynamicValue>,
    #[serde(default)]
    children: Vec<TreeNode>,
}

impl<'de> Deserialize<'de> for TreeNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let repr = NodeRepr::deserialize(deserializer)?;
        if !repr.tag.is_valid() {
            return Err(de::Error::custom(format!("invalid type tag {:?}", repr.tag)));
        }

        let node = TreeNode::new(repr.tag);
        node.inner.state.borrow_mut().properties = repr.properties;
        for child in repr.children {
            node.push_child_unchecked(child);
        }
        Ok(node)
    }
}
