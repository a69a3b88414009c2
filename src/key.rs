//! Structural cache keys.

use std::any::Any;
use std::collections::HashSet;
use std::fmt::{self, Debug};
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

use crate::computation::ErasedComputation;

/// Object-safe equality comparison.
///
/// This trait enables comparing two trait objects for equality
/// by downcasting and comparing the concrete types.
pub(crate) trait DynEq: Any {
    /// Returns `true` if `other` is the same concrete type and equal to `self`.
    fn dyn_eq(&self, other: &dyn Any) -> bool;
}

impl<T: Eq + 'static> DynEq for T {
    fn dyn_eq(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<T>().is_some_and(|o| self == o)
    }
}

// Fixed seeds keep fingerprints comparable across runtimes and threads.
fn fingerprint_hasher() -> impl Hasher {
    ahash::RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    )
    .build_hasher()
}

pub(crate) fn kinds_equal(a: &dyn ErasedComputation, b: &dyn ErasedComputation) -> bool {
    a.as_any().type_id() == b.as_any().type_id() && a.dyn_eq(b.as_any())
}

/// Structural fingerprint of a computation (sub)tree.
///
/// A fingerprint is an immutable snapshot: the kind of the node plus the
/// fingerprints of its children, with a precomputed 64-bit hash. Two
/// fingerprints are equal iff the snapshotted trees are structurally equal;
/// the hash only serves as a fast prefilter. Later mutation of the live nodes
/// never affects an existing fingerprint.
///
/// Cloning is cheap.
#[derive(Clone)]
pub struct Fingerprint(Arc<FingerprintInner>);

struct FingerprintInner {
    hash: u64,
    kind: Arc<dyn ErasedComputation>,
    children: Vec<Fingerprint>,
}

impl Fingerprint {
    pub(crate) fn new(kind: Arc<dyn ErasedComputation>, children: Vec<Fingerprint>) -> Self {
        let mut hasher = fingerprint_hasher();
        kind.as_any().type_id().hash(&mut hasher);
        kind.hash(&mut hasher);
        children.len().hash(&mut hasher);
        for child in &children {
            hasher.write_u64(child.0.hash);
        }
        Self(Arc::new(FingerprintInner {
            hash: hasher.finish(),
            kind,
            children,
        }))
    }

    /// The precomputed structural hash.
    pub fn hash_value(&self) -> u64 {
        self.0.hash
    }

    /// Type name of the snapshotted kind.
    pub fn kind_name(&self) -> &'static str {
        self.0.kind.kind_name()
    }

    /// Fingerprints of the dependencies, in slot order.
    pub fn children(&self) -> &[Fingerprint] {
        &self.0.children
    }

    /// Attempts to view the snapshotted kind as a concrete computation.
    pub fn downcast<C: 'static>(&self) -> Option<&C> {
        self.0.kind.as_any().downcast_ref()
    }

    /// Number of distinct nodes in the snapshot. A node shared by several
    /// parents counts once.
    pub fn size(&self) -> usize {
        let mut seen: HashSet<*const FingerprintInner, ahash::RandomState> = HashSet::default();
        let mut pending = vec![self];
        while let Some(fingerprint) = pending.pop() {
            if seen.insert(Arc::as_ptr(&fingerprint.0)) {
                pending.extend(fingerprint.0.children.iter());
            }
        }
        seen.len()
    }

    /// Get the debug representation of this fingerprint.
    pub fn debug_repr(&self) -> String {
        format!("{:?}", self)
    }

    pub(crate) fn kind(&self) -> &Arc<dyn ErasedComputation> {
        &self.0.kind
    }
}

impl Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0.kind)?;
        if !self.0.children.is_empty() {
            f.debug_list().entries(self.0.children.iter()).finish()?;
        }
        Ok(())
    }
}

impl Hash for Fingerprint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

type Proven = HashSet<(*const FingerprintInner, *const FingerprintInner), ahash::RandomState>;

impl Fingerprint {
    // Pairs already shown equal are skipped, so shared subtrees are compared
    // once per pair rather than once per path.
    fn eq_with(&self, other: &Self, proven: &mut Proven) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        if self.0.hash != other.0.hash
            || self.0.children.len() != other.0.children.len()
            || !kinds_equal(self.0.kind.as_ref(), other.0.kind.as_ref())
        {
            return false;
        }
        let pair = (Arc::as_ptr(&self.0), Arc::as_ptr(&other.0));
        if proven.contains(&pair) {
            return true;
        }
        let equal = self
            .0
            .children
            .iter()
            .zip(&other.0.children)
            .all(|(ours, theirs)| ours.eq_with(theirs, proven));
        if equal {
            proven.insert(pair);
        }
        equal
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.eq_with(other, &mut Proven::default())
    }
}

impl Eq for Fingerprint {}
