//! Per-kind dependency declarations.

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::node::{AnyNode, Node};

type DefaultFactory = Arc<dyn Fn() -> AnyNode + Send + Sync>;

/// Typed handle to one dependency slot of a computation kind.
///
/// Kinds declare their slots as constants and use them both to read resolved
/// inputs ([`Inputs::get`](crate::Inputs::get)) and to let clients replace a
/// child ([`Node::set_dependency`]).
///
/// ```
/// use memo_flow::Dependency;
///
/// const LEFT: Dependency<i64> = Dependency::new(0, "left");
/// assert_eq!(LEFT.index(), 0);
/// ```
pub struct Dependency<T> {
    index: usize,
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Dependency<T> {
    /// Declare slot `index` named `name`.
    pub const fn new(index: usize, name: &'static str) -> Self {
        Self {
            index,
            name,
            _marker: PhantomData,
        }
    }

    /// Position of the slot among the kind's children.
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Name of the slot.
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Dependency<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Dependency<T> {}

impl<T> fmt::Debug for Dependency<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dependency({}, {:?})", self.index, self.name)
    }
}

/// Declaration of one dependency slot: its name, the output type it accepts
/// and, optionally, a default filler node.
#[derive(Clone)]
pub struct Slot {
    index: usize,
    name: &'static str,
    output: TypeId,
    output_name: &'static str,
    default: Option<DefaultFactory>,
}

impl Slot {
    /// A required slot.
    pub fn of<T: Send + Sync + 'static>(dependency: Dependency<T>) -> Self {
        Self {
            index: dependency.index,
            name: dependency.name,
            output: TypeId::of::<T>(),
            output_name: std::any::type_name::<T>(),
            default: None,
        }
    }

    /// A slot filled by `default` when left unset at construction.
    pub fn with_default<T: Send + Sync + 'static>(
        dependency: Dependency<T>,
        default: impl Fn() -> Node<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            default: Some(Arc::new(move || default().into_any())),
            ..Self::of(dependency)
        }
    }

    /// Name of the slot.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Position of the slot.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Name of the accepted output type.
    pub fn output_name(&self) -> &'static str {
        self.output_name
    }

    /// Returns `true` if the slot has a default filler.
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub(crate) fn output(&self) -> TypeId {
        self.output
    }

    pub(crate) fn make_default(&self) -> Option<AnyNode> {
        self.default.as_ref().map(|factory| factory())
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("output", &self.output_name)
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

/// The ordered dependency slots of a computation kind.
///
/// The number of slots is the kind's arity; every node of the kind has
/// exactly that many children.
#[derive(Clone, Debug, Default)]
pub struct Descriptor {
    slots: Vec<Slot>,
}

impl Descriptor {
    /// A kind without dependencies.
    pub fn leaf() -> Self {
        Self::default()
    }

    /// A kind with the given slots, in index order.
    ///
    /// # Panics
    ///
    /// Panics if a slot's index differs from its position in the list.
    pub fn new(slots: impl IntoIterator<Item = Slot>) -> Self {
        let slots: Vec<Slot> = slots.into_iter().collect();
        assert!(
            slots.iter().enumerate().all(|(i, slot)| slot.index == i),
            "dependency slots must be declared in index order"
        );
        Self { slots }
    }

    /// Number of declared slots.
    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    /// The slot at `index`.
    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    /// All slots.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }
}
