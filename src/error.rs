//! Error types for tree construction, configuration and cancellation.

use thiserror::Error;

use crate::problem::Problem;

/// Cooperative cancellation signal.
///
/// Returned by every [`Monitor`](crate::Monitor) check point once the monitor
/// or one of its ancestors has been canceled, and propagated out of
/// [`Computation::compute`](crate::Computation::compute) with `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("computation canceled")]
pub struct Canceled;

/// Faults raised while assembling or mutating a computation tree.
///
/// These are surfaced to whoever builds the tree and are never cached or
/// turned into [`Outcome`](crate::Outcome) problems.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    /// The number of resolved children differs from the declared arity.
    #[error("{kind} declares {expected} dependencies, got {found}")]
    ArityMismatch {
        /// Kind being constructed.
        kind: &'static str,
        /// Declared arity.
        expected: usize,
        /// Number of children supplied.
        found: usize,
    },

    /// A mixed argument list contained something other than a node.
    #[error("argument {position} of {kind} is not a computation: {found}")]
    NotANode {
        /// Kind being constructed.
        kind: &'static str,
        /// Position in the flattened argument list.
        position: usize,
        /// Debug representation of the offending argument.
        found: String,
    },

    /// A slot was left unset and declares no default.
    #[error("dependency `{slot}` (#{index}) of {kind} is unset and has no default")]
    MissingDependency {
        /// Kind being constructed.
        kind: &'static str,
        /// Slot name.
        slot: &'static str,
        /// Slot index.
        index: usize,
    },

    /// A child produces a different output type than its slot expects.
    #[error("dependency `{slot}` of {kind} expects {expected}, got a node producing {found}")]
    TypeMismatch {
        /// Kind being constructed.
        kind: &'static str,
        /// Slot name.
        slot: &'static str,
        /// Expected output type.
        expected: &'static str,
        /// Output type of the supplied child.
        found: &'static str,
    },

    /// A slot index beyond the declared arity.
    #[error("{kind} has {arity} dependencies, slot {index} does not exist")]
    SlotOutOfRange {
        /// Kind of the mutated node.
        kind: &'static str,
        /// Requested index.
        index: usize,
        /// Declared arity.
        arity: usize,
    },

    /// Replacing the child would make the node depend on itself.
    #[error("replacing a dependency of {kind} would introduce a cycle")]
    Cycle {
        /// Kind of the mutated node.
        kind: &'static str,
    },

    /// A node was converted to a typed handle with the wrong output type.
    #[error("{kind} produces {found}, not {expected}")]
    OutputMismatch {
        /// Kind of the node.
        kind: &'static str,
        /// Requested output type.
        expected: &'static str,
        /// Actual output type.
        found: &'static str,
    },
}

/// Configuration parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The value does not name a cache policy.
    #[error("unknown cache policy `{0}` (expected `none`, `top-level` or `all`)")]
    UnknownPolicy(String),

    /// The value does not name a cancellation mode.
    #[error("unknown cancellation mode `{0}` (expected `empty` or `fail`)")]
    UnknownCancellationMode(String),
}

/// An [`Outcome`](crate::Outcome) without a value, converted into an error.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("computation produced no value{}", render_problems(.problems))]
pub struct OutcomeError {
    /// Problems carried by the empty outcome.
    pub problems: Vec<Problem>,
}

fn render_problems(problems: &[Problem]) -> String {
    if problems.is_empty() {
        return String::new();
    }
    let rendered: Vec<String> = problems.iter().map(ToString::to_string).collect();
    format!(": {}", rendered.join("; "))
}
