//! Computation nodes and tree assembly.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::computation::{Computation, ErasedComputation};
use crate::dependency::{Dependency, Descriptor};
use crate::error::ConstructionError;
use crate::key::{kinds_equal, Fingerprint};

type ByNode<V> = HashMap<*const NodeInner, V, ahash::RandomState>;

struct NodeInner {
    kind: Arc<dyn ErasedComputation>,
    children: RwLock<Vec<AnyNode>>,
}

/// Untyped, shared handle to a node in a computation tree.
///
/// Cloning the handle shares the node; use [`clone_node`](AnyNode::clone_node)
/// for a copy. Equality and hashing are structural: two handles are equal iff
/// their kinds are equal and their children are pairwise equal, recursively,
/// regardless of identity.
#[derive(Clone)]
pub struct AnyNode(Arc<NodeInner>);

impl AnyNode {
    fn assemble(
        kind: Arc<dyn ErasedComputation>,
        children: Vec<AnyNode>,
    ) -> Result<Self, ConstructionError> {
        let descriptor = kind.descriptor();
        if children.len() != descriptor.arity() {
            return Err(ConstructionError::ArityMismatch {
                kind: kind.kind_name(),
                expected: descriptor.arity(),
                found: children.len(),
            });
        }
        for (index, child) in children.iter().enumerate() {
            check_slot(kind.as_ref(), &descriptor, index, child)?;
        }
        Ok(Self(Arc::new(NodeInner {
            kind,
            children: RwLock::new(children),
        })))
    }

    /// Type name of this node's kind.
    pub fn kind_name(&self) -> &'static str {
        self.0.kind.kind_name()
    }

    /// Type name of the value this node produces.
    pub fn output_name(&self) -> &'static str {
        self.0.kind.output_name()
    }

    /// The dependency slots of this node's kind.
    pub fn descriptor(&self) -> Descriptor {
        self.0.kind.descriptor()
    }

    /// Attempts to view the kind as a concrete computation.
    pub fn downcast_kind<C: Computation>(&self) -> Option<&C> {
        self.0.kind.as_any().downcast_ref()
    }

    /// Snapshot of the current children.
    pub fn children(&self) -> Vec<AnyNode> {
        self.0.children.read().clone()
    }

    /// The child in slot `index`.
    pub fn child(&self, index: usize) -> Option<AnyNode> {
        self.0.children.read().get(index).cloned()
    }

    /// Number of children.
    pub fn arity(&self) -> usize {
        self.0.children.read().len()
    }

    /// Returns `true` if the node has no dependencies.
    pub fn is_leaf(&self) -> bool {
        self.0.children.read().is_empty()
    }

    /// Returns `true` if both handles refer to the same node.
    pub fn ptr_eq(&self, other: &AnyNode) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Replace the child in slot `index`.
    ///
    /// The node keeps its identity and all other children. Any fingerprint
    /// taken before the replacement describes the old tree; the next
    /// [`fingerprint`](AnyNode::fingerprint) reflects the new child.
    pub fn set_child(&self, index: usize, child: AnyNode) -> Result<(), ConstructionError> {
        let kind = self.0.kind.as_ref();
        let descriptor = kind.descriptor();
        if index >= descriptor.arity() {
            return Err(ConstructionError::SlotOutOfRange {
                kind: kind.kind_name(),
                index,
                arity: descriptor.arity(),
            });
        }
        check_slot(kind, &descriptor, index, &child)?;
        if child.reaches(self) {
            return Err(ConstructionError::Cycle {
                kind: kind.kind_name(),
            });
        }
        self.0.children.write()[index] = child;
        Ok(())
    }

    /// Returns `true` if `target` is this node or one of its descendants.
    fn reaches(&self, target: &AnyNode) -> bool {
        let mut visited: HashSet<*const NodeInner, ahash::RandomState> = HashSet::default();
        let mut pending = vec![self.clone()];
        while let Some(node) = pending.pop() {
            if node.ptr_eq(target) {
                return true;
            }
            if visited.insert(Arc::as_ptr(&node.0)) {
                pending.extend(node.children());
            }
        }
        false
    }

    /// A new node with a copy of this kind, sharing the same children.
    pub fn clone_node(&self) -> AnyNode {
        Self(Arc::new(NodeInner {
            kind: self.0.kind.clone_kind(),
            children: RwLock::new(self.children()),
        }))
    }

    /// A deep copy of the whole subtree.
    ///
    /// Each node is copied once; a node shared inside the subtree stays
    /// shared in the copy.
    pub fn clone_tree(&self) -> AnyNode {
        self.clone_tree_with(&mut ByNode::default())
    }

    fn clone_tree_with(&self, copies: &mut ByNode<AnyNode>) -> AnyNode {
        let ptr = Arc::as_ptr(&self.0);
        if let Some(copy) = copies.get(&ptr) {
            return copy.clone();
        }
        let children = self
            .children()
            .iter()
            .map(|child| child.clone_tree_with(copies))
            .collect();
        let copy = Self(Arc::new(NodeInner {
            kind: self.0.kind.clone_kind(),
            children: RwLock::new(children),
        }));
        copies.insert(ptr, copy.clone());
        copy
    }

    /// Snapshot the structural fingerprint of this subtree.
    ///
    /// A node reached along several paths is snapshotted once, so the cost is
    /// linear in the number of distinct nodes.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint_with(&mut ByNode::default())
    }

    fn fingerprint_with(&self, snapshots: &mut ByNode<Fingerprint>) -> Fingerprint {
        let ptr = Arc::as_ptr(&self.0);
        if let Some(fingerprint) = snapshots.get(&ptr) {
            return fingerprint.clone();
        }
        let children = self
            .children()
            .iter()
            .map(|child| child.fingerprint_with(snapshots))
            .collect();
        let fingerprint = Fingerprint::new(self.0.kind.clone(), children);
        snapshots.insert(ptr, fingerprint.clone());
        fingerprint
    }

    /// Convert into a typed handle.
    pub fn typed<T: Send + Sync + 'static>(self) -> Result<Node<T>, ConstructionError> {
        if self.0.kind.output_type() != std::any::TypeId::of::<T>() {
            return Err(ConstructionError::OutputMismatch {
                kind: self.kind_name(),
                expected: std::any::type_name::<T>(),
                found: self.output_name(),
            });
        }
        Ok(Node {
            node: self,
            _marker: PhantomData,
        })
    }
}

fn check_slot(
    kind: &dyn ErasedComputation,
    descriptor: &Descriptor,
    index: usize,
    child: &AnyNode,
) -> Result<(), ConstructionError> {
    let Some(slot) = descriptor.slot(index) else {
        return Err(ConstructionError::SlotOutOfRange {
            kind: kind.kind_name(),
            index,
            arity: descriptor.arity(),
        });
    };
    if slot.output() != child.0.kind.output_type() {
        return Err(ConstructionError::TypeMismatch {
            kind: kind.kind_name(),
            slot: slot.name(),
            expected: slot.output_name(),
            found: child.output_name(),
        });
    }
    Ok(())
}

impl PartialEq for AnyNode {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if !kinds_equal(self.0.kind.as_ref(), other.0.kind.as_ref()) {
            return false;
        }
        self.fingerprint() == other.fingerprint()
    }
}

impl Eq for AnyNode {}

impl Hash for AnyNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.fingerprint().hash_value());
    }
}

impl fmt::Debug for AnyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0.kind)?;
        let children = self.children();
        if !children.is_empty() {
            f.debug_list().entries(children.iter()).finish()?;
        }
        Ok(())
    }
}

/// A piece of a mixed argument list for [`Node::from_args`].
///
/// Nested lists are flattened in traversal order. Scalars are accepted by the
/// type but rejected at construction, since every dependency must be a node.
#[derive(Debug, Clone)]
pub enum Arg {
    /// A child node.
    Node(AnyNode),
    /// A nested list of arguments.
    List(Vec<Arg>),
    /// A non-node value.
    Scalar(String),
}

impl Arg {
    /// Wrap a non-node value.
    pub fn scalar(value: impl fmt::Debug) -> Self {
        Arg::Scalar(format!("{value:?}"))
    }

    fn flatten_into(
        self,
        kind: &'static str,
        nodes: &mut Vec<AnyNode>,
        position: &mut usize,
    ) -> Result<(), ConstructionError> {
        match self {
            Arg::Node(node) => {
                nodes.push(node);
                *position += 1;
            }
            Arg::List(args) => {
                for arg in args {
                    arg.flatten_into(kind, nodes, position)?;
                }
            }
            Arg::Scalar(found) => {
                return Err(ConstructionError::NotANode {
                    kind,
                    position: *position,
                    found,
                });
            }
        }
        Ok(())
    }
}

impl From<AnyNode> for Arg {
    fn from(node: AnyNode) -> Self {
        Arg::Node(node)
    }
}

impl<T> From<Node<T>> for Arg {
    fn from(node: Node<T>) -> Self {
        Arg::Node(node.node)
    }
}

impl<T> From<&Node<T>> for Arg {
    fn from(node: &Node<T>) -> Self {
        Arg::Node(node.node.clone())
    }
}

impl<A: Into<Arg>> From<Vec<A>> for Arg {
    fn from(args: Vec<A>) -> Self {
        Arg::List(args.into_iter().map(Into::into).collect())
    }
}

impl<A: Into<Arg>, const N: usize> From<[A; N]> for Arg {
    fn from(args: [A; N]) -> Self {
        Arg::List(args.into_iter().map(Into::into).collect())
    }
}

/// Typed, shared handle to a node producing `T`.
///
/// Dereferences to [`AnyNode`] for structural operations.
///
/// # Example
///
/// ```
/// use memo_flow::{Canceled, Computation, Inputs, Monitor, Node, Outcome};
///
/// #[derive(Debug, Clone, Hash, PartialEq, Eq)]
/// struct Const(i64);
///
/// impl Computation for Const {
///     type Output = i64;
///
///     fn compute(&self, _inputs: &Inputs, _monitor: &Monitor) -> Result<Outcome<i64>, Canceled> {
///         Ok(Outcome::of(self.0))
///     }
/// }
///
/// let a = Node::leaf(Const(5)).unwrap();
/// let b = Node::leaf(Const(5)).unwrap();
/// assert_eq!(a, b);
/// assert!(!a.ptr_eq(&b));
/// ```
pub struct Node<T> {
    node: AnyNode,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Node<T> {
    /// Build a node from a complete, ordered list of children.
    pub fn new<C>(kind: C, children: impl IntoIterator<Item = AnyNode>) -> Result<Self, ConstructionError>
    where
        C: Computation<Output = T>,
    {
        let node = AnyNode::assemble(Arc::new(kind), children.into_iter().collect())?;
        Ok(Self {
            node,
            _marker: PhantomData,
        })
    }

    /// Build a node without dependencies.
    pub fn leaf<C>(kind: C) -> Result<Self, ConstructionError>
    where
        C: Computation<Output = T>,
    {
        Self::new(kind, [])
    }

    /// Build a node from a mixed argument list, flattened in traversal order.
    pub fn from_args<C>(kind: C, args: impl IntoIterator<Item = Arg>) -> Result<Self, ConstructionError>
    where
        C: Computation<Output = T>,
    {
        let kind_name = std::any::type_name::<C>();
        let mut children = Vec::new();
        let mut position = 0;
        for arg in args {
            arg.flatten_into(kind_name, &mut children, &mut position)?;
        }
        Self::new(kind, children)
    }

    /// Build a node from a partial list; unset (`None`) and missing trailing
    /// slots take the slot's default.
    pub fn with_defaults<C>(
        kind: C,
        children: impl IntoIterator<Item = Option<AnyNode>>,
    ) -> Result<Self, ConstructionError>
    where
        C: Computation<Output = T>,
    {
        let descriptor = C::dependencies();
        let mut given: Vec<Option<AnyNode>> = children.into_iter().collect();
        if given.len() > descriptor.arity() {
            return Err(ConstructionError::ArityMismatch {
                kind: std::any::type_name::<C>(),
                expected: descriptor.arity(),
                found: given.len(),
            });
        }
        given.resize(descriptor.arity(), None);

        let mut resolved = Vec::with_capacity(given.len());
        for (slot, child) in descriptor.slots().iter().zip(given) {
            match child.or_else(|| slot.make_default()) {
                Some(child) => resolved.push(child),
                None => {
                    return Err(ConstructionError::MissingDependency {
                        kind: std::any::type_name::<C>(),
                        slot: slot.name(),
                        index: slot.index(),
                    })
                }
            }
        }
        Self::new(kind, resolved)
    }

    /// Replace the dependency in slot `dependency` with `child`.
    pub fn set_dependency<U: Send + Sync + 'static>(
        &self,
        dependency: Dependency<U>,
        child: &Node<U>,
    ) -> Result<&Self, ConstructionError> {
        self.node.set_child(dependency.index(), child.node.clone())?;
        Ok(self)
    }

    /// The dependency in slot `dependency`.
    pub fn dependency<U: Send + Sync + 'static>(&self, dependency: Dependency<U>) -> Option<Node<U>> {
        self.node
            .child(dependency.index())
            .and_then(|child| child.typed().ok())
    }

    /// A new node with a copy of this kind, sharing the same children.
    pub fn clone_node(&self) -> Node<T> {
        Node {
            node: self.node.clone_node(),
            _marker: PhantomData,
        }
    }

    /// A deep copy of the whole subtree.
    pub fn clone_tree(&self) -> Node<T> {
        Node {
            node: self.node.clone_tree(),
            _marker: PhantomData,
        }
    }
}

impl<T> Node<T> {
    /// The untyped handle.
    pub fn as_any(&self) -> &AnyNode {
        &self.node
    }

    /// Convert into the untyped handle.
    pub fn into_any(self) -> AnyNode {
        self.node
    }
}

impl<T> Deref for Node<T> {
    type Target = AnyNode;

    fn deref(&self) -> &AnyNode {
        &self.node
    }
}

impl<T> Clone for Node<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> From<Node<T>> for AnyNode {
    fn from(node: Node<T>) -> Self {
        node.node
    }
}

impl<T> PartialEq for Node<T> {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl<T> Eq for Node<T> {}

impl<T> Hash for Node<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node.hash(state);
    }
}

impl<T> fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.node, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Canceled, Inputs, Monitor, Outcome, Slot};
    use std::collections::hash_map::DefaultHasher;

    #[derive(Debug, Clone, Hash, PartialEq, Eq)]
    struct Const(i64);

    impl Computation for Const {
        type Output = i64;

        fn compute(&self, _inputs: &Inputs, _monitor: &Monitor) -> Result<Outcome<i64>, Canceled> {
            Ok(Outcome::of(self.0))
        }
    }

    #[derive(Debug, Clone, Hash, PartialEq, Eq)]
    struct Label(&'static str);

    impl Computation for Label {
        type Output = String;

        fn compute(&self, _inputs: &Inputs, _monitor: &Monitor) -> Result<Outcome<String>, Canceled> {
            Ok(Outcome::of(self.0.to_string()))
        }
    }

    #[derive(Debug, Clone, Hash, PartialEq, Eq)]
    struct Sum;

    impl Sum {
        const LEFT: Dependency<i64> = Dependency::new(0, "left");
        const RIGHT: Dependency<i64> = Dependency::new(1, "right");
    }

    impl Computation for Sum {
        type Output = i64;

        fn dependencies() -> Descriptor {
            Descriptor::new([
                Slot::of(Self::LEFT),
                Slot::with_default(Self::RIGHT, || Node::leaf(Const(0)).unwrap()),
            ])
        }

        fn compute(&self, inputs: &Inputs, _monitor: &Monitor) -> Result<Outcome<i64>, Canceled> {
            Ok(inputs
                .get(Self::LEFT)
                .flat_map(|l| inputs.get(Self::RIGHT).map(|r| *l + *r)))
        }
    }

    fn hash_of(node: &AnyNode) -> u64 {
        let mut hasher = DefaultHasher::new();
        node.hash(&mut hasher);
        hasher.finish()
    }

    fn constant(value: i64) -> Node<i64> {
        Node::leaf(Const(value)).unwrap()
    }

    #[test]
    fn test_structural_equality_ignores_identity() {
        let a = Node::new(Sum, [constant(5).into_any(), constant(7).into_any()]).unwrap();
        let b = Node::new(Sum, [constant(5).into_any(), constant(7).into_any()]).unwrap();
        let c = Node::new(Sum, [constant(7).into_any(), constant(5).into_any()]).unwrap();

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a, c);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_arity_mismatch_is_construction_fault() {
        let err = Node::new(Sum, [constant(1).into_any()]).unwrap_err();
        assert!(matches!(
            err,
            ConstructionError::ArityMismatch {
                expected: 2,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_type_mismatch_is_construction_fault() {
        let label = Node::leaf(Label("x")).unwrap();
        let err = Node::new(Sum, [constant(1).into_any(), label.into_any()]).unwrap_err();
        assert!(matches!(err, ConstructionError::TypeMismatch { slot: "right", .. }));
    }

    #[test]
    fn test_mixed_arguments_are_flattened() {
        let node = Node::from_args(
            Sum,
            [Arg::from(vec![constant(1), constant(2)])],
        )
        .unwrap();
        assert_eq!(node.child(0).unwrap(), constant(1).into_any());
        assert_eq!(node.child(1).unwrap(), constant(2).into_any());

        let err = Node::from_args(Sum, [Arg::from(constant(1)), Arg::scalar(2)]).unwrap_err();
        assert!(matches!(
            err,
            ConstructionError::NotANode { position: 1, .. }
        ));
    }

    #[test]
    fn test_defaults_fill_unset_slots() {
        let node = Node::with_defaults(Sum, [Some(constant(3).into_any())]).unwrap();
        assert_eq!(node.child(1).unwrap(), constant(0).into_any());

        let err = Node::with_defaults(Sum, [None, Some(constant(3).into_any())]).unwrap_err();
        assert!(matches!(
            err,
            ConstructionError::MissingDependency { slot: "left", index: 0, .. }
        ));
    }

    #[test]
    fn test_set_dependency_changes_fingerprint() {
        let node = Node::new(Sum, [constant(5).into_any(), constant(7).into_any()]).unwrap();
        let before = node.fingerprint();

        node.set_dependency(Sum::RIGHT, &constant(8)).unwrap();
        let after = node.fingerprint();

        assert_ne!(before, after);
        assert_eq!(node.dependency(Sum::RIGHT).unwrap(), constant(8));
        // The old snapshot still describes the old tree.
        assert_eq!(before.children()[1].downcast::<Const>(), Some(&Const(7)));
    }

    #[test]
    fn test_set_child_rejects_cycles_and_bad_slots() {
        let inner = Node::new(Sum, [constant(1).into_any(), constant(2).into_any()]).unwrap();
        let outer = Node::new(Sum, [inner.clone().into_any(), constant(3).into_any()]).unwrap();

        let err = inner.set_dependency(Sum::LEFT, &outer).unwrap_err();
        assert!(matches!(err, ConstructionError::Cycle { .. }));

        let err = outer.set_child(2, constant(4).into_any()).unwrap_err();
        assert!(matches!(err, ConstructionError::SlotOutOfRange { index: 2, arity: 2, .. }));
    }

    #[test]
    fn test_clone_node_shares_children() {
        let left = constant(5);
        let node = Node::new(Sum, [left.clone().into_any(), constant(7).into_any()]).unwrap();

        let copy = node.clone_node();
        assert_eq!(copy, node);
        assert!(!copy.ptr_eq(&node));
        assert!(copy.child(0).unwrap().ptr_eq(&left));

        // Reparameterizing the copy leaves the original untouched.
        copy.set_dependency(Sum::RIGHT, &constant(1)).unwrap();
        assert_ne!(copy, node);
        assert_eq!(node.dependency(Sum::RIGHT).unwrap(), constant(7));

        let deep = node.clone_tree();
        assert_eq!(deep, node);
        assert!(!deep.child(0).unwrap().ptr_eq(&left));
    }

    fn doubled(depth: usize) -> (Node<i64>, Node<i64>) {
        let first = Node::new(Sum, [constant(1).into_any(), constant(1).into_any()]).unwrap();
        let mut node = first.clone();
        for _ in 1..depth {
            node = Node::new(Sum, [node.clone().into_any(), node.clone().into_any()]).unwrap();
        }
        (node, first)
    }

    #[test]
    fn test_shared_dag_walks_each_node_once() {
        let (node, first) = doubled(48);
        let (other, _) = doubled(48);

        assert_eq!(node, other);
        assert_eq!(hash_of(&node), hash_of(&other));
        assert_eq!(node.fingerprint().size(), 50);

        let top = Node::new(Sum, [constant(0).into_any(), constant(0).into_any()]).unwrap();
        top.set_dependency(Sum::RIGHT, &node).unwrap();
        let err = first.set_dependency(Sum::LEFT, &top).unwrap_err();
        assert!(matches!(err, ConstructionError::Cycle { .. }));

        let deep = node.clone_tree();
        assert_eq!(deep, node);
        let (left, right) = (deep.child(0).unwrap(), deep.child(1).unwrap());
        assert!(left.ptr_eq(&right));
        assert!(!left.ptr_eq(&node.child(0).unwrap()));
    }

    #[test]
    fn test_typed_conversion_checks_output() {
        let any = constant(1).into_any();
        assert!(any.clone().typed::<i64>().is_ok());
        assert!(matches!(
            any.typed::<String>(),
            Err(ConstructionError::OutputMismatch { .. })
        ));
    }
}
