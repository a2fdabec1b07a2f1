use crate::TreeNode;
use crate::listener::TreeListener;
use std::{
    cell::RefCell,
    rc::Rc,
    sync::{Arc, Mutex, PoisonError},
};

/// An object that mirrors one child node.
pub trait TreeObject {
    fn state(&self) -> &TreeNode;
}

/// Decides which children get objects and how those objects are made.
///
/// Notifications are delivered after the list has been updated, on the state thread.
pub trait ObjectListDelegate<T> {
    fn is_suitable(&self, node: &TreeNode) -> bool;

    fn create_object(&self, node: &TreeNode) -> T;

    /// Called when the list lets go of an object. The default just drops it.
    fn destroy_object(&self, _object: Rc<T>) {}

    fn object_added(&self, _object: &Rc<T>) {}

    fn object_removed(&self, _object: &Rc<T>) {}

    fn object_order_changed(&self) {}
}

type Mirror<T> = Box<dyn Fn(&[Rc<T>])>;

struct ListInner<T: TreeObject> {
    parent: RefCell<TreeNode>,
    objects: RefCell<Vec<Rc<T>>>,
    delegate: Box<dyn ObjectListDelegate<T>>,
    mirror: Option<Mirror<T>>,
}

impl<T: TreeObject> ListInner<T> {
    fn observes(&self, node: &TreeNode) -> bool {
        *self.parent.borrow() == *node
    }

    fn rebuild(&self) {
        let parent = self.parent.borrow().clone();
        let created: Vec<Rc<T>> = parent
            .children()
            .iter()
            .filter(|child| self.delegate.is_suitable(child))
            .map(|child| Rc::new(self.delegate.create_object(child)))
            .collect();
        *self.objects.borrow_mut() = created;
        self.sync_mirror();
    }

    fn sync_mirror(&self) {
        if let Some(mirror) = &self.mirror {
            mirror(&self.objects.borrow());
        }
    }

    fn free_objects(&self) {
        let objects = std::mem::take(&mut *self.objects.borrow_mut());
        self.sync_mirror();
        for object in objects {
            self.delegate.destroy_object(object);
        }
    }
}

impl<T: TreeObject> TreeListener for ListInner<T> {
    fn child_added(&self, parent: &TreeNode, child: &TreeNode) {
        if !self.observes(parent) || !self.delegate.is_suitable(child) {
            return;
        }
        if self.objects.borrow().iter().any(|o| o.state() == child) {
            return;
        }
        let Some(tree_index) = parent.index_of(child) else {
            return;
        };

        let position = parent
            .children()
            .iter()
            .take(tree_index)
            .filter(|sibling| self.delegate.is_suitable(sibling))
            .count();

        let object = Rc::new(self.delegate.create_object(child));
        {
            let mut objects = self.objects.borrow_mut();
            let position = position.min(objects.len());
            objects.insert(position, Rc::clone(&object));
        }
        self.sync_mirror();
        tracing::trace!(tag = %child.tag(), position, "object added");
        self.delegate.object_added(&object);
    }

    fn child_removed(&self, parent: &TreeNode, child: &TreeNode, _former_index: usize) {
        if !self.observes(parent) || !self.delegate.is_suitable(child) {
            return;
        }

        let removed = {
            let mut objects = self.objects.borrow_mut();
            objects
                .iter()
                .position(|o| o.state() == child)
                .map(|i| objects.remove(i))
        };

        match removed {
            Some(object) => {
                self.sync_mirror();
                tracing::trace!(tag = %child.tag(), "object removed");
                self.delegate.object_removed(&object);
                self.delegate.destroy_object(object);
            }
            None => {
                tracing::error!(tag = %child.tag(), "removed child had no object in the list");
                debug_assert!(false, "object list out of sync with its parent node");
            }
        }
    }

    fn child_order_changed(&self, parent: &TreeNode, _old_index: usize, _new_index: usize) {
        if !self.observes(parent) {
            return;
        }

        self.objects
            .borrow_mut()
            .sort_by_cached_key(|o| parent.index_of(o.state()).unwrap_or(usize::MAX));
        self.sync_mirror();
        self.delegate.object_order_changed();
    }

    /// The observed handle now points at other storage: every old object goes, and the new
    /// node's suitable children get fresh ones.
    fn redirected(&self, node: &TreeNode) {
        if self.observes(node) {
            return;
        }
        *self.parent.borrow_mut() = node.clone();

        let old = std::mem::take(&mut *self.objects.borrow_mut());
        self.sync_mirror();
        for object in old {
            self.delegate.object_removed(&object);
            self.delegate.destroy_object(object);
        }

        self.rebuild();
        let created = self.objects.borrow().clone();
        tracing::debug!(parent = %node.tag(), objects = created.len(), "object list redirected");
        for object in &created {
            self.delegate.object_added(object);
        }
    }
}

/// Keeps an ordered list of objects in step with the suitable children of one node.
///
/// Every suitable child has exactly one object and objects are ordered like their children.
/// Objects are created when children are added, dropped (through
/// [`ObjectListDelegate::destroy_object`]) when they are removed, and reordered, never
/// recreated, when children move. Only direct children of the observed node are considered.
pub struct ObjectList<T: TreeObject + 'static> {
    inner: Rc<ListInner<T>>,
}

impl<T: TreeObject + 'static> ObjectList<T> {
    /// Starts observing `parent`, creating objects for its current suitable children.
    pub fn new(parent: &TreeNode, delegate: impl ObjectListDelegate<T> + 'static) -> Self {
        Self::build(parent, Box::new(delegate), None)
    }

    /// Like [`ObjectList::new`], and also publishes a thread-safe projection of the list which
    /// is replaced wholesale after every change.
    pub fn with_snapshots<S, P>(
        parent: &TreeNode,
        delegate: impl ObjectListDelegate<T> + 'static,
        project: P,
    ) -> (Self, ObjectSnapshots<S>)
    where
        S: Send + Sync + 'static,
        P: Fn(&T) -> Arc<S> + 'static,
    {
        let snapshots = ObjectSnapshots::default();
        let shared = snapshots.clone();
        let mirror: Mirror<T> = Box::new(move |objects: &[Rc<T>]| {
            shared.replace(objects.iter().map(|o| project(o.as_ref())).collect());
        });
        (
            Self::build(parent, Box::new(delegate), Some(mirror)),
            snapshots,
        )
    }

    fn build(
        parent: &TreeNode,
        delegate: Box<dyn ObjectListDelegate<T>>,
        mirror: Option<Mirror<T>>,
    ) -> Self {
        let inner = Rc::new(ListInner {
            parent: RefCell::new(parent.clone()),
            objects: RefCell::new(Vec::new()),
            delegate,
            mirror,
        });
        inner.rebuild();
        parent.add_listener(&inner);
        tracing::debug!(parent = %parent.tag(), objects = inner.objects.borrow().len(), "object list attached");
        Self { inner }
    }

    pub fn parent(&self) -> TreeNode {
        self.inner.parent.borrow().clone()
    }

    pub fn objects(&self) -> Vec<Rc<T>> {
        self.inner.objects.borrow().clone()
    }

    pub fn get(&self, index: usize) -> Option<Rc<T>> {
        self.inner.objects.borrow().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.objects.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.objects.borrow().is_empty()
    }

    pub fn index_of(&self, object: &T) -> Option<usize> {
        self.inner
            .objects
            .borrow()
            .iter()
            .position(|o| std::ptr::eq(Rc::as_ptr(o), object))
    }

    /// The object mirroring `node`, if any.
    pub fn object_for(&self, node: &TreeNode) -> Option<Rc<T>> {
        self.inner
            .objects
            .borrow()
            .iter()
            .find(|o| o.state() == node)
            .cloned()
    }
}

impl<T: TreeObject + 'static> Drop for ObjectList<T> {
    fn drop(&mut self) {
        self.inner.parent.borrow().remove_listener(&self.inner);
        self.inner.free_objects();
    }
}

/// Thread-safe copy of an object list's projection, updated on the state thread.
pub struct ObjectSnapshots<S> {
    shared: Arc<Mutex<Vec<Arc<S>>>>,
}

impl<S> Clone for ObjectSnapshots<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> Default for ObjectSnapshots<S> {
    fn default() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<S> ObjectSnapshots<S> {
    /// The most recently published list.
    pub fn snapshot(&self) -> Vec<Arc<S>> {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn replace(&self, objects: Vec<Arc<S>>) {
        *self.shared.lock().unwrap_or_else(PoisonError::into_inner) = objects;
    }
}
