//! Computation trait definition.

use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use dyn_hash::DynHash;

use crate::dependency::{Dependency, Descriptor};
use crate::error::Canceled;
use crate::key::DynEq;
use crate::monitor::Monitor;
use crate::outcome::{ErasedOutcome, Outcome};
use crate::problem::Problem;

/// A deterministic computation kind.
///
/// A value of a type implementing `Computation` is the "kind" of a node in a
/// computation tree: together with the node's children it fully determines
/// the result. The kind's own fields are part of the cache key through
/// `Hash + Eq`, so any parameter that influences the output must be a field
/// (or a child node), never hidden state.
///
/// `Clone` is the copy operation used by
/// [`AnyNode::clone_node`](crate::AnyNode::clone_node).
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use memo_flow::{Canceled, Computation, Dependency, Descriptor, Inputs, Monitor, Outcome, Slot};
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
/// #[derive(Debug, Clone, Hash, PartialEq, Eq)]
/// struct Negate;
///
/// impl Negate {
///     const INPUT: Dependency<i64> = Dependency::new(0, "input");
/// }
///
/// impl Computation for Negate {
///     type Output = i64;
///
///     fn dependencies() -> Descriptor {
///         Descriptor::new([Slot::of(Self::INPUT)])
///     }
///
///     fn compute(&self, inputs: &Inputs, _monitor: &Monitor) -> Result<Outcome<i64>, Canceled> {
///         Ok(inputs.get(Self::INPUT).map(|v| -*v))
///     }
/// }
/// ```
pub trait Computation: Hash + Eq + Clone + Debug + Send + Sync + 'static {
    /// The value produced by this kind.
    type Output: Send + Sync + 'static;

    /// Dependency slots of this kind. Defaults to none.
    fn dependencies() -> Descriptor {
        Descriptor::leaf()
    }

    /// Compute the output from resolved dependency outcomes.
    ///
    /// Dependencies that failed arrive as empty outcomes; each kind decides
    /// whether that is fatal. Long-running work should report through
    /// `monitor` and propagate [`Canceled`] with `?`.
    fn compute(
        &self,
        inputs: &Inputs,
        monitor: &Monitor,
    ) -> Result<Outcome<Self::Output>, Canceled>;
}

/// Object-safe view of a [`Computation`] used inside nodes and fingerprints.
pub(crate) trait ErasedComputation: DynHash + DynEq + Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn kind_name(&self) -> &'static str;

    fn output_type(&self) -> TypeId;

    fn output_name(&self) -> &'static str;

    fn descriptor(&self) -> Descriptor;

    fn execute(&self, inputs: &Inputs, monitor: &Monitor) -> Result<ErasedOutcome, Canceled>;

    fn clone_kind(&self) -> Arc<dyn ErasedComputation>;
}

dyn_hash::hash_trait_object!(ErasedComputation);

impl<C: Computation> ErasedComputation for C {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn kind_name(&self) -> &'static str {
        std::any::type_name::<C>()
    }

    fn output_type(&self) -> TypeId {
        TypeId::of::<C::Output>()
    }

    fn output_name(&self) -> &'static str {
        std::any::type_name::<C::Output>()
    }

    fn descriptor(&self) -> Descriptor {
        C::dependencies()
    }

    fn execute(&self, inputs: &Inputs, monitor: &Monitor) -> Result<ErasedOutcome, Canceled> {
        Ok(self.compute(inputs, monitor)?.map(Arc::new).erase())
    }

    fn clone_kind(&self) -> Arc<dyn ErasedComputation> {
        Arc::new(self.clone())
    }
}

/// Resolved dependency outcomes handed to [`Computation::compute`].
pub struct Inputs {
    outcomes: Vec<ErasedOutcome>,
}

impl Inputs {
    pub(crate) fn new(outcomes: Vec<ErasedOutcome>) -> Self {
        Self { outcomes }
    }

    /// The outcome of the dependency in slot `dependency`.
    pub fn get<T: Send + Sync + 'static>(&self, dependency: Dependency<T>) -> Outcome<Arc<T>> {
        match self.outcomes.get(dependency.index()) {
            Some(outcome) => outcome.clone().downcast(),
            None => Outcome::failure(Problem::error(format!(
                "dependency `{}` (#{}) was not resolved",
                dependency.name(),
                dependency.index()
            ))),
        }
    }

    /// The value of the dependency, if it produced one.
    pub fn value<T: Send + Sync + 'static>(&self, dependency: Dependency<T>) -> Option<Arc<T>> {
        self.get(dependency).into_value()
    }

    /// Returns `true` if every dependency produced a value.
    pub fn all_present(&self) -> bool {
        self.outcomes.iter().all(Outcome::is_present)
    }

    /// Problems reported by all dependencies, in slot order.
    pub fn problems(&self) -> Vec<Problem> {
        self.outcomes
            .iter()
            .flat_map(|outcome| outcome.problems().iter().cloned())
            .collect()
    }

    /// Number of resolved dependencies.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns `true` for leaf kinds.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}
