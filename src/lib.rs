//! Core library for statetree: observable, undoable shared state trees.
//! Provides reference-counted tree nodes with dynamically typed properties, change listeners,
//! transactional undo/redo, typed cached views of single properties, object lists mirroring a
//! node's children, XML and binary persistence, and helpers for getting background results back
//! onto the state thread.

mod binary;
mod cached;
mod error;
mod identifier;
mod listener;
mod node;
mod object_list;
mod save;
pub mod statics;
mod task;
mod undo;
mod value;
mod xml;

pub use cached::{
    AtomicCachedValue, AtomicCell, AtomicScalar, CachedValue, CachedValueReader, PlainCell,
    ValueCell, clamp_to, retain_chars,
};
pub use error::{Result, TopologyViolation, TreeError};
pub use identifier::Identifier;
pub use listener::TreeListener;
pub use node::TreeNode;
pub use object_list::{ObjectList, ObjectListDelegate, ObjectSnapshots, TreeObject};
pub use save::{
    TreeDocument, TreeFormat, detect_format, load_tree, save_tree, try_load_tree, try_save_tree,
};
pub use task::{
    Progress, ProgressList, SafeHandle, StatePoster, StateQueue, StateThread, TaskRunner,
};
pub use undo::{UndoConfig, UndoManager};
pub use value::{DynamicValue, ValueConvert, ValueKind};
