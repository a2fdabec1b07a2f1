use crate::listener::TreeListener;
use crate::undo::UndoManager;
use crate::value::ValueConvert;
use crate::{Identifier, TreeNode};
use std::{
    cell::RefCell,
    marker::PhantomData,
    rc::Rc,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

/// Storage for the cached copy of a property.
pub trait ValueCell<T>: Default {
    fn load(&self) -> T;
    fn store(&self, value: T);
}

/// Plain single-threaded storage.
pub struct PlainCell<T>(RefCell<T>);

impl<T: Default> Default for PlainCell<T> {
    fn default() -> Self {
        Self(RefCell::new(T::default()))
    }
}

impl<T: Clone + Default> ValueCell<T> for PlainCell<T> {
    fn load(&self) -> T {
        self.0.borrow().clone()
    }

    fn store(&self, value: T) {
        *self.0.borrow_mut() = value;
    }
}

/// Scalars that fit in 64 bits and can therefore live in an [`AtomicU64`].
pub trait AtomicScalar: Copy + Default + Send + Sync + 'static {
    fn to_raw(self) -> u64;
    fn from_raw(raw: u64) -> Self;
}

impl AtomicScalar for bool {
    fn to_raw(self) -> u64 {
        u64::from(self)
    }
    fn from_raw(raw: u64) -> Self {
        raw != 0
    }
}

impl AtomicScalar for i32 {
    fn to_raw(self) -> u64 {
        u64::from(self as u32)
    }
    fn from_raw(raw: u64) -> Self {
        raw as u32 as i32
    }
}

impl AtomicScalar for u32 {
    fn to_raw(self) -> u64 {
        u64::from(self)
    }
    fn from_raw(raw: u64) -> Self {
        raw as u32
    }
}

impl AtomicScalar for i64 {
    fn to_raw(self) -> u64 {
        self as u64
    }
    fn from_raw(raw: u64) -> Self {
        raw as i64
    }
}

impl AtomicScalar for u64 {
    fn to_raw(self) -> u64 {
        self
    }
    fn from_raw(raw: u64) -> Self {
        raw
    }
}

impl AtomicScalar for f32 {
    fn to_raw(self) -> u64 {
        u64::from(self.to_bits())
    }
    fn from_raw(raw: u64) -> Self {
        f32::from_bits(raw as u32)
    }
}

impl AtomicScalar for f64 {
    fn to_raw(self) -> u64 {
        self.to_bits()
    }
    fn from_raw(raw: u64) -> Self {
        f64::from_bits(raw)
    }
}

/// Lock-free storage whose value can be read from other threads through a
/// [`CachedValueReader`].
pub struct AtomicCell<T> {
    raw: Arc<AtomicU64>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: AtomicScalar> Default for AtomicCell<T> {
    fn default() -> Self {
        Self {
            raw: Arc::new(AtomicU64::new(T::default().to_raw())),
            _marker: PhantomData,
        }
    }
}

impl<T: AtomicScalar> ValueCell<T> for AtomicCell<T> {
    fn load(&self) -> T {
        T::from_raw(self.raw.load(Ordering::Acquire))
    }

    fn store(&self, value: T) {
        self.raw.store(value.to_raw(), Ordering::Release);
    }
}

/// Read-only view of an [`AtomicCachedValue`] that can be sent to other threads.
pub struct CachedValueReader<T> {
    raw: Arc<AtomicU64>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for CachedValueReader<T> {
    fn clone(&self) -> Self {
        Self {
            raw: Arc::clone(&self.raw),
            _marker: PhantomData,
        }
    }
}

impl<T: AtomicScalar> CachedValueReader<T> {
    pub fn get(&self) -> T {
        T::from_raw(self.raw.load(Ordering::Acquire))
    }
}

type Constrainer<T> = Box<dyn Fn(T) -> T>;

struct Binding {
    node: TreeNode,
    property: Identifier,
    undo: Option<UndoManager>,
}

struct CachedInner<T, C> {
    binding: RefCell<Option<Binding>>,
    default: RefCell<T>,
    constrainer: RefCell<Option<Constrainer<T>>>,
    cell: C,
}

impl<T, C> CachedInner<T, C>
where
    T: ValueConvert + Clone + PartialEq + Default + 'static,
    C: ValueCell<T> + 'static,
{
    fn reload(&self) {
        let decoded = {
            let binding = self.binding.borrow();
            let default = self.default.borrow().clone();
            match binding.as_ref() {
                Some(b) => b.node.property(&b.property).decode_or(default),
                None => default,
            }
        };
        self.cell.store(decoded);
    }
}

impl<T, C> TreeListener for CachedInner<T, C>
where
    T: ValueConvert + Clone + PartialEq + Default + 'static,
    C: ValueCell<T> + 'static,
{
    fn property_changed(&self, node: &TreeNode, property: &Identifier) {
        let ours = self
            .binding
            .borrow()
            .as_ref()
            .is_some_and(|b| b.node == *node && b.property == *property);
        if ours {
            self.reload();
        }
    }

    fn redirected(&self, node: &TreeNode) {
        if let Some(binding) = self.binding.borrow_mut().as_mut() {
            binding.node = node.clone();
        }
        self.reload();
    }
}

/// A typed, cached view of one property of one node.
///
/// Reads come from the cache. Writes go through the tree (and its undo manager, if one was given
/// when binding) and refresh the cache; changes made to the property by anyone else refresh it
/// too. A missing or undecodable property reads as the default.
///
/// An optional constrainer is applied to every value passed to [`CachedValue::set`]. It is not
/// applied to changes arriving from the tree.
pub struct CachedValue<T, C = PlainCell<T>>
where
    T: ValueConvert + Clone + PartialEq + Default + 'static,
    C: ValueCell<T> + 'static,
{
    inner: Rc<CachedInner<T, C>>,
}

/// A cached value whose cache can be read from any thread via [`CachedValue::reader`].
pub type AtomicCachedValue<T> = CachedValue<T, AtomicCell<T>>;

impl<T, C> Default for CachedValue<T, C>
where
    T: ValueConvert + Clone + PartialEq + Default + 'static,
    C: ValueCell<T> + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C> CachedValue<T, C>
where
    T: ValueConvert + Clone + PartialEq + Default + 'static,
    C: ValueCell<T> + 'static,
{
    /// An unbound value reading as `T::default()`.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(CachedInner {
                binding: RefCell::new(None),
                default: RefCell::new(T::default()),
                constrainer: RefCell::new(None),
                cell: C::default(),
            }),
        }
    }

    /// A value bound to `node[property]`.
    pub fn bound(
        node: &TreeNode,
        property: impl Into<Identifier>,
        undo: Option<&UndoManager>,
        default: T,
    ) -> Self {
        let value = Self::new();
        value.refer_to(node, property, undo, default);
        value
    }

    /// Binds (or rebinds) to `node[property]` and reloads the cache.
    pub fn refer_to(
        &self,
        node: &TreeNode,
        property: impl Into<Identifier>,
        undo: Option<&UndoManager>,
        default: T,
    ) {
        let previous = self.inner.binding.borrow_mut().replace(Binding {
            node: node.clone(),
            property: property.into(),
            undo: undo.cloned(),
        });
        if let Some(previous) = previous {
            previous.node.remove_listener(&self.inner);
        }

        *self.inner.default.borrow_mut() = default;
        node.add_listener(&self.inner);
        self.inner.reload();
    }

    /// Installs a function applied to every value passed to [`CachedValue::set`].
    pub fn set_constrainer(&self, constrain: impl Fn(T) -> T + 'static) {
        *self.inner.constrainer.borrow_mut() = Some(Box::new(constrain));
    }

    pub fn with_constrainer(self, constrain: impl Fn(T) -> T + 'static) -> Self {
        self.set_constrainer(constrain);
        self
    }

    pub fn get(&self) -> T {
        self.inner.cell.load()
    }

    /// Constrains `value` and writes it through to the tree. Nothing is written when the
    /// constrained value equals the cached one.
    pub fn set(&self, value: T) {
        let value = match self.inner.constrainer.borrow().as_ref() {
            Some(constrain) => constrain(value),
            None => value,
        };
        if value == self.get() {
            return;
        }

        let target = self
            .inner
            .binding
            .borrow()
            .as_ref()
            .map(|b| (b.node.clone(), b.property.clone(), b.undo.clone()));

        match target {
            Some((node, property, undo)) => {
                node.set_property(property, value.to_value(), undo.as_ref());
                self.inner.reload();
            }
            None => self.inner.cell.store(value),
        }
    }

    /// Removes the property so the value reads as its default again.
    pub fn reset_to_default(&self) {
        let target = self
            .inner
            .binding
            .borrow()
            .as_ref()
            .map(|b| (b.node.clone(), b.property.clone(), b.undo.clone()));

        match target {
            Some((node, property, undo)) => {
                node.remove_property(&property, undo.as_ref());
                self.inner.reload();
            }
            None => self.inner.cell.store(self.default_value()),
        }
    }

    /// True when the bound property is absent.
    pub fn is_using_default(&self) -> bool {
        self.inner
            .binding
            .borrow()
            .as_ref()
            .is_none_or(|b| !b.node.has_property(&b.property))
    }

    pub fn default_value(&self) -> T {
        self.inner.default.borrow().clone()
    }

    pub fn set_default(&self, default: T) {
        *self.inner.default.borrow_mut() = default;
        self.inner.reload();
    }

    /// Re-reads the property. Only needed if the cache was bypassed.
    pub fn force_update_of_cached_value(&self) {
        self.inner.reload();
    }

    pub fn node(&self) -> Option<TreeNode> {
        self.inner.binding.borrow().as_ref().map(|b| b.node.clone())
    }

    pub fn property_name(&self) -> Option<Identifier> {
        self.inner
            .binding
            .borrow()
            .as_ref()
            .map(|b| b.property.clone())
    }
}

impl<T: AtomicScalar + ValueConvert + PartialEq> CachedValue<T, AtomicCell<T>> {
    pub fn reader(&self) -> CachedValueReader<T> {
        CachedValueReader {
            raw: Arc::clone(&self.inner.cell.raw),
            _marker: PhantomData,
        }
    }
}

impl<T, C> Drop for CachedValue<T, C>
where
    T: ValueConvert + Clone + PartialEq + Default + 'static,
    C: ValueCell<T> + 'static,
{
    fn drop(&mut self) {
        if let Some(binding) = self.inner.binding.borrow().as_ref() {
            binding.node.remove_listener(&self.inner);
        }
    }
}

/// Constrainer clamping into `[min, max]`.
pub fn clamp_to<T: PartialOrd + Copy>(min: T, max: T) -> impl Fn(T) -> T {
    move |value| {
        if value < min {
            min
        } else if value > max {
            max
        } else {
            value
        }
    }
}

/// Constrainer dropping every character for which `keep` is false.
pub fn retain_chars(keep: impl Fn(char) -> bool) -> impl Fn(String) -> String {
    move |value| value.chars().filter(|c| keep(*c)).collect()
}
