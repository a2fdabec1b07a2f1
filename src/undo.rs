use crate::listener::TreeListener;
use crate::statics;
use crate::{DynamicValue, Identifier, TreeNode};
use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
    time::{Duration, Instant},
};

/// History bounds. Whole transactions are dropped from the oldest end while the total number of
/// recorded actions exceeds `max_actions`, but at least `min_transactions` are always kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoConfig {
    pub max_actions: usize,
    pub min_transactions: usize,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            max_actions: statics::DEFAULT_MAX_UNDO_ACTIONS,
            min_transactions: statics::DEFAULT_MIN_UNDO_TRANSACTIONS,
        }
    }
}

/// One reversible primitive edit. `None` on either side of a property edit means "absent".
#[derive(Debug, Clone)]
pub(crate) enum UndoableAction {
    SetProperty {
        node: TreeNode,
        name: Identifier,
        old: Option<DynamicValue>,
        new: Option<DynamicValue>,
    },
    AddChild {
        parent: TreeNode,
        child: TreeNode,
        index: usize,
    },
    RemoveChild {
        parent: TreeNode,
        child: TreeNode,
        index: usize,
    },
    MoveChild {
        parent: TreeNode,
        from: usize,
        to: usize,
    },
}

impl UndoableAction {
    /// The node the edit is applied to.
    fn target(&self) -> &TreeNode {
        match self {
            UndoableAction::SetProperty { node, .. } => node,
            UndoableAction::AddChild { parent, .. }
            | UndoableAction::RemoveChild { parent, .. }
            | UndoableAction::MoveChild { parent, .. } => parent,
        }
    }

    /// Applies the edit. `false` when the tree no longer matches what the action expects.
    fn perform(&self) -> bool {
        match self {
            UndoableAction::SetProperty { node, name, new, .. } => {
                node.apply_property(name, new.clone());
                true
            }
            UndoableAction::AddChild {
                parent,
                child,
                index,
            } => {
                if child.parent().is_some() {
                    return false;
                }
                parent.apply_insert_child(child, Some(*index));
                true
            }
            UndoableAction::RemoveChild {
                parent,
                child,
                index,
            } => match parent.child(*index) {
                Some(found) if found == *child => parent.apply_remove_child_at(*index).is_some(),
                _ => false,
            },
            UndoableAction::MoveChild { parent, from, to } => parent.apply_move_child(*from, *to),
        }
    }

    fn undo(&self) -> bool {
        match self {
            UndoableAction::SetProperty { node, name, old, .. } => {
                node.apply_property(name, old.clone());
                true
            }
            UndoableAction::AddChild { parent, child, .. } => match parent.index_of(child) {
                Some(index) => parent.apply_remove_child_at(index).is_some(),
                None => false,
            },
            UndoableAction::RemoveChild {
                parent,
                child,
                index,
            } => {
                if child.parent().is_some() {
                    return false;
                }
                parent.apply_insert_child(child, Some(*index));
                true
            }
            UndoableAction::MoveChild { parent, from, to } => parent.apply_move_child(*to, *from),
        }
    }

    /// Folds `next` into `self` when both write the same property of the same node.
    fn coalesce(&mut self, next: &UndoableAction) -> bool {
        if let (
            UndoableAction::SetProperty { node, name, new, .. },
            UndoableAction::SetProperty {
                node: next_node,
                name: next_name,
                new: next_new,
                ..
            },
        ) = (self, next)
        {
            if *node == *next_node && *name == *next_name {
                *new = next_new.clone();
                return true;
            }
        }
        false
    }
}

struct Transaction {
    name: String,
    actions: Vec<UndoableAction>,
    last_modified: Instant,
}

#[derive(Default)]
struct History {
    transactions: Vec<Transaction>,
    /// Transactions below this index are done; the rest are undone and can be redone.
    next_index: usize,
    new_transaction_pending: bool,
    pending_name: String,
    config: UndoConfig,
}

impl History {
    fn total_actions(&self) -> usize {
        self.transactions.iter().map(|t| t.actions.len()).sum()
    }

    fn current_mut(&mut self) -> Option<&mut Transaction> {
        if self.new_transaction_pending {
            return None;
        }
        self.next_index
            .checked_sub(1)
            .and_then(|i| self.transactions.get_mut(i))
    }

    fn discard_undone(&mut self) {
        if self.next_index < self.transactions.len() {
            tracing::trace!(
                dropped = self.transactions.len() - self.next_index,
                "discarding undone transactions"
            );
            self.transactions.truncate(self.next_index);
        }
    }

    fn record(&mut self, action: UndoableAction) {
        self.discard_undone();

        let now = Instant::now();
        match self.current_mut() {
            Some(current) => {
                let merged = current
                    .actions
                    .last_mut()
                    .is_some_and(|last| last.coalesce(&action));
                if !merged {
                    current.actions.push(action);
                }
                current.last_modified = now;
            }
            None => {
                self.transactions.push(Transaction {
                    name: std::mem::take(&mut self.pending_name),
                    actions: vec![action],
                    last_modified: now,
                });
                self.next_index = self.transactions.len();
                self.new_transaction_pending = false;
            }
        }

        self.trim();
    }

    /// Removes the last recorded action of the current transaction, used when it failed to apply.
    fn forget_last_action(&mut self) {
        let Some(index) = self.next_index.checked_sub(1) else {
            return;
        };
        let Some(current) = self.transactions.get_mut(index) else {
            return;
        };
        current.actions.pop();
        if current.actions.is_empty() {
            self.transactions.remove(index);
            self.next_index = index;
            self.new_transaction_pending = true;
        }
    }

    fn trim(&mut self) {
        let config = self.config;
        let mut total = self.total_actions();
        while total > config.max_actions
            && self.transactions.len() > config.min_transactions.max(1)
            && self.next_index > 1
        {
            let dropped = self.transactions.remove(0);
            total -= dropped.actions.len();
            self.next_index -= 1;
            tracing::trace!(name = %dropped.name, "oldest transaction dropped from history");
        }
    }

    fn clear(&mut self) {
        self.transactions.clear();
        self.next_index = 0;
        self.new_transaction_pending = false;
        self.pending_name.clear();
    }
}

struct UndoInner {
    history: RefCell<History>,
    replaying: Cell<bool>,
}

impl UndoInner {
    /// Any edit the manager is not replaying itself invalidates what was undone.
    fn discard_redo(&self) {
        if self.replaying.get() {
            return;
        }
        if let Ok(mut history) = self.history.try_borrow_mut() {
            history.discard_undone();
        }
    }
}

impl TreeListener for UndoInner {
    fn property_changed(&self, _node: &TreeNode, _property: &Identifier) {
        self.discard_redo();
    }

    fn child_added(&self, _parent: &TreeNode, _child: &TreeNode) {
        self.discard_redo();
    }

    fn child_removed(&self, _parent: &TreeNode, _child: &TreeNode, _former_index: usize) {
        self.discard_redo();
    }

    fn child_order_changed(&self, _parent: &TreeNode, _old_index: usize, _new_index: usize) {
        self.discard_redo();
    }
}

/// Records reversible edits grouped into named transactions.
///
/// Cloning yields another handle to the same history. Pass a handle to the mutating methods of
/// [`TreeNode`] to make those edits undoable; consecutive writes to the same property within one
/// transaction collapse into a single action.
///
/// After an undo or redo the next recorded edit starts a fresh transaction. Any edit to a tree the
/// manager has recorded into discards everything that was undone, whether it was recorded here,
/// by another manager or not at all.
#[derive(Clone)]
pub struct UndoManager {
    inner: Rc<UndoInner>,
}

impl Default for UndoManager {
    fn default() -> Self {
        Self::with_config(UndoConfig::default())
    }
}

impl UndoManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: UndoConfig) -> Self {
        Self {
            inner: Rc::new(UndoInner {
                history: RefCell::new(History {
                    config,
                    ..History::default()
                }),
                replaying: Cell::new(false),
            }),
        }
    }

    pub fn config(&self) -> UndoConfig {
        self.inner.history.borrow().config
    }

    pub fn set_config(&self, config: UndoConfig) {
        let mut history = self.inner.history.borrow_mut();
        history.config = config;
        history.trim();
    }

    pub(crate) fn perform(&self, action: UndoableAction) {
        if self.inner.replaying.get() {
            // Edits made by listeners while a transaction is being replayed are applied but not
            // recorded.
            tracing::debug!("edit during undo/redo replay is not recorded");
            action.perform();
            return;
        }

        self.watch(action.target());
        // Record before applying so edits made by listeners land after this one.
        self.inner.history.borrow_mut().record(action.clone());
        if !action.perform() {
            tracing::warn!(?action, "undoable action could not be applied");
            self.inner.history.borrow_mut().forget_last_action();
        }
    }

    /// Listens on `node` and its root so edits made there without this manager discard redo.
    fn watch(&self, node: &TreeNode) {
        node.add_listener(&self.inner);
        let root = node.root();
        if root != *node {
            root.add_listener(&self.inner);
        }
    }

    /// Closes the current transaction. The next recorded edit opens a new one named `name`.
    pub fn begin_new_transaction(&self, name: impl Into<String>) {
        let mut history = self.inner.history.borrow_mut();
        history.new_transaction_pending = true;
        history.pending_name = name.into();
    }

    /// Starts a new transaction when the current one has been idle for at least `idle`.
    pub fn begin_new_transaction_if_idle(&self, idle: Duration) -> bool {
        let stale = {
            let history = self.inner.history.borrow();
            !history.new_transaction_pending
                && history
                    .next_index
                    .checked_sub(1)
                    .and_then(|i| history.transactions.get(i))
                    .is_some_and(|t| t.last_modified.elapsed() >= idle)
        };
        if stale {
            self.begin_new_transaction("");
        }
        stale
    }

    pub fn set_current_transaction_name(&self, name: impl Into<String>) {
        let mut history = self.inner.history.borrow_mut();
        let name = name.into();
        match history.current_mut() {
            Some(current) => current.name = name,
            None => history.pending_name = name,
        }
    }

    pub fn can_undo(&self) -> bool {
        self.inner.history.borrow().next_index > 0
    }

    pub fn can_redo(&self) -> bool {
        let history = self.inner.history.borrow();
        history.next_index < history.transactions.len()
    }

    pub fn undo_description(&self) -> Option<String> {
        let history = self.inner.history.borrow();
        history
            .next_index
            .checked_sub(1)
            .and_then(|i| history.transactions.get(i))
            .map(|t| t.name.clone())
    }

    pub fn redo_description(&self) -> Option<String> {
        let history = self.inner.history.borrow();
        history
            .transactions
            .get(history.next_index)
            .map(|t| t.name.clone())
    }

    /// Number of recorded transactions, done and undone.
    pub fn transaction_count(&self) -> usize {
        self.inner.history.borrow().transactions.len()
    }

    /// Number of transactions that can be undone.
    pub fn undo_depth(&self) -> usize {
        self.inner.history.borrow().next_index
    }

    /// Number of transactions that can be redone.
    pub fn redo_depth(&self) -> usize {
        let history = self.inner.history.borrow();
        history.transactions.len() - history.next_index
    }

    pub fn num_actions_in_current_transaction(&self) -> usize {
        let history = self.inner.history.borrow();
        if history.new_transaction_pending {
            return 0;
        }
        history
            .next_index
            .checked_sub(1)
            .and_then(|i| history.transactions.get(i))
            .map_or(0, |t| t.actions.len())
    }

    /// Reverts the most recent transaction. `false` when there is nothing to undo.
    pub fn undo(&self) -> bool {
        if self.inner.replaying.get() {
            return false;
        }
        let (name, actions) = {
            let history = self.inner.history.borrow();
            let Some(index) = history.next_index.checked_sub(1) else {
                return false;
            };
            let transaction = &history.transactions[index];
            (transaction.name.clone(), transaction.actions.clone())
        };

        tracing::debug!(transaction = %name, actions = actions.len(), "undo");
        self.inner.replaying.set(true);
        let ok = actions.iter().rev().all(UndoableAction::undo);
        self.inner.replaying.set(false);

        let mut history = self.inner.history.borrow_mut();
        if !ok {
            tracing::warn!(transaction = %name, "undo failed; clearing history");
            history.clear();
            return false;
        }
        history.next_index -= 1;
        history.new_transaction_pending = true;
        history.pending_name.clear();
        true
    }

    /// Re-applies the most recently undone transaction. `false` when there is nothing to redo.
    pub fn redo(&self) -> bool {
        if self.inner.replaying.get() {
            return false;
        }
        let (name, actions) = {
            let history = self.inner.history.borrow();
            let Some(transaction) = history.transactions.get(history.next_index) else {
                return false;
            };
            (transaction.name.clone(), transaction.actions.clone())
        };

        tracing::debug!(transaction = %name, actions = actions.len(), "redo");
        self.inner.replaying.set(true);
        let ok = actions.iter().all(UndoableAction::perform);
        self.inner.replaying.set(false);

        let mut history = self.inner.history.borrow_mut();
        if !ok {
            tracing::warn!(transaction = %name, "redo failed; clearing history");
            history.clear();
            return false;
        }
        history.next_index += 1;
        history.new_transaction_pending = true;
        history.pending_name.clear();
        true
    }

    /// Undoes the current transaction only if it is still open (no new one has been started).
    pub fn undo_current_transaction_only(&self) -> bool {
        let open = {
            let history = self.inner.history.borrow();
            !history.new_transaction_pending && history.next_index > 0
        };
        open && self.undo()
    }

    pub fn clear_undo_history(&self) {
        tracing::debug!("undo history cleared");
        self.inner.history.borrow_mut().clear();
    }
}

impl fmt::Debug for UndoManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let history = self.inner.history.borrow();
        f.debug_struct("UndoManager")
            .field("transactions", &history.transactions.len())
            .field("next_index", &history.next_index)
            .field("config", &history.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{UndoConfig, UndoManager};
    use crate::statics::ids;
    use crate::{DynamicValue, TreeNode};
    use std::time::Duration;

    #[test]
    fn consecutive_writes_to_one_property_coalesce() {
        let um = UndoManager::new();
        let clip = TreeNode::new(ids::CLIP);
        for i in 0..10 {
            clip.set_property(ids::START, i, Some(&um));
        }
        assert_eq!(um.num_actions_in_current_transaction(), 1);

        assert!(um.undo());
        assert!(!clip.has_property(ids::START));
        assert!(um.redo());
        assert_eq!(clip.property(ids::START), DynamicValue::Int(9));
    }

    #[test]
    fn transactions_carry_names() {
        let um = UndoManager::new();
        let clip = TreeNode::new(ids::CLIP);
        um.begin_new_transaction("rename");
        clip.set_property(ids::NAME, "a", Some(&um));
        um.begin_new_transaction("move");
        clip.set_property(ids::START, 1.0, Some(&um));

        assert_eq!(um.undo_description().as_deref(), Some("move"));
        um.undo();
        assert_eq!(um.undo_description().as_deref(), Some("rename"));
        assert_eq!(um.redo_description().as_deref(), Some("move"));
    }

    #[test]
    fn recording_after_undo_discards_redo() {
        let um = UndoManager::new();
        let clip = TreeNode::new(ids::CLIP);
        clip.set_property(ids::START, 1, Some(&um));
        um.undo();
        assert!(um.can_redo());

        clip.set_property(ids::LENGTH, 2, Some(&um));
        assert!(!um.can_redo());
        assert_eq!(um.undo_depth(), 1);
    }

    #[test]
    fn edits_after_undo_open_a_new_transaction() {
        let um = UndoManager::new();
        let clip = TreeNode::new(ids::CLIP);
        clip.set_property(ids::START, 1, Some(&um));
        clip.set_property(ids::LENGTH, 1, Some(&um));
        um.undo();
        um.redo();
        clip.set_property(ids::NAME, "x", Some(&um));
        assert_eq!(um.undo_depth(), 2);
        assert_eq!(um.num_actions_in_current_transaction(), 1);
    }

    #[test]
    fn child_structure_undoes_in_reverse_order() {
        let um = UndoManager::new();
        let track = TreeNode::new(ids::TRACK);
        let a = TreeNode::new(ids::CLIP);
        let b = TreeNode::new(ids::CLIP);
        track.append_child(&a, Some(&um)).unwrap();
        track.append_child(&b, Some(&um)).unwrap();
        track.move_child(1, 0, Some(&um));
        assert_eq!(track.children(), vec![b.clone(), a.clone()]);

        um.undo();
        assert_eq!(track.num_children(), 0);
        assert!(a.parent().is_none());

        um.redo();
        assert_eq!(track.children(), vec![b, a]);
    }

    #[test]
    fn history_is_bounded_by_action_count() {
        let um = UndoManager::with_config(UndoConfig {
            max_actions: 5,
            min_transactions: 2,
        });
        let clip = TreeNode::new(ids::CLIP);
        for i in 0..10 {
            um.begin_new_transaction(format!("step {i}"));
            clip.set_property(ids::START, i, Some(&um));
        }
        assert_eq!(um.undo_depth(), 5);
        while um.undo() {}
        assert_eq!(clip.property(ids::START), DynamicValue::Int(4));
    }

    #[test]
    fn undo_current_transaction_only_respects_boundaries() {
        let um = UndoManager::new();
        let clip = TreeNode::new(ids::CLIP);
        clip.set_property(ids::START, 1, Some(&um));
        um.begin_new_transaction("");
        assert!(!um.undo_current_transaction_only());
        assert!(clip.has_property(ids::START));

        clip.set_property(ids::LENGTH, 2, Some(&um));
        assert!(um.undo_current_transaction_only());
        assert!(!clip.has_property(ids::LENGTH));
    }

    #[test]
    fn idle_transactions_are_closed() {
        let um = UndoManager::new();
        let clip = TreeNode::new(ids::CLIP);
        clip.set_property(ids::START, 1, Some(&um));
        assert!(um.begin_new_transaction_if_idle(Duration::ZERO));
        assert!(!um.begin_new_transaction_if_idle(Duration::ZERO));
        clip.set_property(ids::START, 2, Some(&um));
        assert_eq!(um.undo_depth(), 2);
    }
}
