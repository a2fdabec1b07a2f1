use crate::{Identifier, TreeNode};
use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

/// Receives change notifications from a [`TreeNode`].
///
/// A listener registered on a node hears about mutations of that node and of every node below
/// it: events bubble from the mutated node up through each ancestor. Check the `node`/`parent`
/// argument when only direct changes matter. Every callback has an empty default so
/// implementors only override what they need.
///
/// Callbacks run synchronously on the state thread before the mutating call returns. They may
/// mutate the tree (nested notifications are delivered depth-first) and may add or remove
/// listeners, including themselves.
pub trait TreeListener {
    fn property_changed(&self, _node: &TreeNode, _property: &Identifier) {}

    fn child_added(&self, _parent: &TreeNode, _child: &TreeNode) {}

    fn child_removed(&self, _parent: &TreeNode, _child: &TreeNode, _former_index: usize) {}

    fn child_order_changed(&self, _parent: &TreeNode, _old_index: usize, _new_index: usize) {}

    /// The node (or one of its ancestors) was attached to or detached from a parent.
    fn parent_changed(&self, _node: &TreeNode) {}

    /// The handle this listener was registered through now refers to different storage.
    fn redirected(&self, _node: &TreeNode) {}
}

/// Registration-ordered, non-owning listener table.
///
/// Entries are weak: a listener that is dropped simply stops hearing events and is pruned on the
/// next dispatch. Dispatch iterates a snapshot and re-checks membership before every call, so
/// removals made from inside a callback take effect immediately.
#[derive(Default)]
pub(crate) struct ListenerList {
    entries: RefCell<Vec<Weak<dyn TreeListener>>>,
}

fn same_listener(a: &Weak<dyn TreeListener>, b: &Weak<dyn TreeListener>) -> bool {
    std::ptr::addr_eq(a.as_ptr(), b.as_ptr())
}

impl ListenerList {
    pub(crate) fn add(&self, listener: &Rc<dyn TreeListener>) {
        let weak = Rc::downgrade(listener);
        let mut entries = self.entries.borrow_mut();
        if !entries.iter().any(|e| same_listener(e, &weak)) {
            entries.push(weak);
        }
    }

    pub(crate) fn remove(&self, listener: &Rc<dyn TreeListener>) {
        let weak = Rc::downgrade(listener);
        self.entries.borrow_mut().retain(|e| !same_listener(e, &weak));
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|e| e.strong_count() > 0)
            .count()
    }

    pub(crate) fn take_all(&self) -> Vec<Weak<dyn TreeListener>> {
        std::mem::take(&mut *self.entries.borrow_mut())
    }

    pub(crate) fn extend(&self, listeners: Vec<Weak<dyn TreeListener>>) {
        let mut entries = self.entries.borrow_mut();
        for weak in listeners {
            if !entries.iter().any(|e| same_listener(e, &weak)) {
                entries.push(weak);
            }
        }
    }

    fn contains(&self, weak: &Weak<dyn TreeListener>) -> bool {
        self.entries.borrow().iter().any(|e| same_listener(e, weak))
    }

    pub(crate) fn call(&self, f: &dyn Fn(&dyn TreeListener)) {
        let snapshot = self.entries.borrow().clone();
        if snapshot.is_empty() {
            return;
        }

        let mut saw_dead = false;
        for weak in &snapshot {
            if !self.contains(weak) {
                continue;
            }
            match weak.upgrade() {
                Some(listener) => f(&*listener),
                None => saw_dead = true,
            }
        }

        if saw_dead {
            self.entries.borrow_mut().retain(|e| e.strong_count() > 0);
        }
    }
}
