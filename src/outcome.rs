//! The result container returned by every computation.

use std::any::Any;
use std::sync::Arc;

use crate::error::OutcomeError;
use crate::problem::{Problem, Severity};

/// Type-erased outcome as stored in the cache.
pub(crate) type ErasedOutcome = Outcome<Arc<dyn Any + Send + Sync>>;

/// Either a value or nothing, plus the diagnostics collected on the way.
///
/// A present value never carries error-severity problems; warnings (timing
/// notices, deprecated inputs, ...) may accompany it. Outcomes are immutable;
/// transforms like [`map`](Outcome::map) and [`flat_map`](Outcome::flat_map)
/// short-circuit on emptiness and keep all problems seen so far.
///
/// # Example
///
/// ```
/// use memo_flow::{Outcome, Problem};
///
/// let parsed = Outcome::from_result("42".parse::<i32>());
/// let doubled = parsed.map(|n| n * 2);
/// assert_eq!(doubled.value(), Some(&84));
///
/// let failed: Outcome<i32> = Outcome::failure(Problem::error("no input"));
/// assert!(failed.map(|n| n * 2).is_empty());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    value: Option<T>,
    problems: Vec<Problem>,
}

impl<T> Outcome<T> {
    /// A present value without problems.
    pub fn of(value: T) -> Self {
        Self {
            value: Some(value),
            problems: Vec::new(),
        }
    }

    /// A value with attached problems.
    ///
    /// If any problem is an error, the value is dropped and the outcome is
    /// empty.
    pub fn with_problems(value: T, problems: Vec<Problem>) -> Self {
        if problems.iter().any(Problem::is_error) {
            Self::empty(problems)
        } else {
            Self {
                value: Some(value),
                problems,
            }
        }
    }

    /// An empty outcome carrying the given problems.
    pub fn empty(problems: Vec<Problem>) -> Self {
        Self {
            value: None,
            problems,
        }
    }

    /// An empty outcome carrying a single problem.
    pub fn failure(problem: Problem) -> Self {
        Self::empty(vec![problem])
    }

    /// Converts a standard result; the error becomes an error-severity problem.
    pub fn from_result<E: Into<anyhow::Error>>(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::of(value),
            Err(err) => Self::failure(Problem::from_error(err)),
        }
    }

    /// Returns `true` if a value is present.
    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    /// Returns `true` if no value is present.
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// The value, if present.
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Consumes the outcome and returns the value, if present.
    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// All problems, in the order they were recorded.
    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }

    /// Returns `true` if any problem has error severity.
    pub fn has_errors(&self) -> bool {
        self.problems.iter().any(Problem::is_error)
    }

    /// Problems of the given severity.
    pub fn problems_of(&self, severity: Severity) -> impl Iterator<Item = &Problem> {
        self.problems.iter().filter(move |p| p.severity() == severity)
    }

    /// Attaches a warning, keeping the value.
    pub fn and_warning(mut self, message: impl Into<String>) -> Self {
        self.problems.push(Problem::warning(message));
        self
    }

    /// Attaches a problem. An error-severity problem empties the outcome.
    pub fn and_problem(mut self, problem: Problem) -> Self {
        if problem.is_error() {
            self.value = None;
        }
        self.problems.push(problem);
        self
    }

    /// Transforms the value, keeping the problems.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: self.value.map(f),
            problems: self.problems,
        }
    }

    /// Chains a fallible step; problems of both stages are concatenated.
    pub fn flat_map<U>(self, f: impl FnOnce(T) -> Outcome<U>) -> Outcome<U> {
        let Outcome {
            value,
            mut problems,
        } = self;
        match value {
            Some(value) => {
                let next = f(value);
                problems.extend(next.problems);
                Outcome {
                    value: next.value,
                    problems,
                }
            }
            None => Outcome::empty(problems),
        }
    }

    /// Falls back to another outcome when empty, keeping earlier problems.
    pub fn or_else(self, f: impl FnOnce() -> Outcome<T>) -> Outcome<T> {
        if self.value.is_some() {
            return self;
        }
        let mut problems = self.problems;
        let fallback = f();
        problems.extend(fallback.problems);
        // The fallback's value stands only if nothing so far was an error.
        match fallback.value {
            Some(value) => Outcome::with_problems(value, problems),
            None => Outcome::empty(problems),
        }
    }

    /// The value, or `default` when empty.
    pub fn unwrap_or(self, default: T) -> T {
        self.value.unwrap_or(default)
    }

    /// Borrows the value in a new outcome.
    pub fn as_ref(&self) -> Outcome<&T> {
        Outcome {
            value: self.value.as_ref(),
            problems: self.problems.clone(),
        }
    }

    /// Converts into a standard result.
    pub fn into_result(self) -> Result<T, OutcomeError> {
        match self.value {
            Some(value) => Ok(value),
            None => Err(OutcomeError {
                problems: self.problems,
            }),
        }
    }

    /// Splits into value and problems.
    pub fn into_parts(self) -> (Option<T>, Vec<Problem>) {
        (self.value, self.problems)
    }
}

impl<T: Send + Sync + 'static> Outcome<Arc<T>> {
    pub(crate) fn erase(self) -> ErasedOutcome {
        Outcome {
            value: self.value.map(|v| v as Arc<dyn Any + Send + Sync>),
            problems: self.problems,
        }
    }
}

impl ErasedOutcome {
    /// Recovers the typed value. A type mismatch becomes an error problem.
    pub(crate) fn downcast<T: Send + Sync + 'static>(self) -> Outcome<Arc<T>> {
        let Outcome {
            value,
            mut problems,
        } = self;
        match value.map(|v| v.downcast::<T>()) {
            Some(Ok(value)) => Outcome {
                value: Some(value),
                problems,
            },
            Some(Err(_)) => {
                problems.push(Problem::error(format!(
                    "computation output is not a {}",
                    std::any::type_name::<T>()
                )));
                Outcome::empty(problems)
            }
            None => Outcome::empty(problems),
        }
    }
}

impl<T> From<Result<T, Problem>> for Outcome<T> {
    fn from(result: Result<T, Problem>) -> Self {
        match result {
            Ok(value) => Outcome::of(value),
            Err(problem) => Outcome::failure(problem),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_problem_drops_value() {
        let outcome = Outcome::with_problems(1, vec![Problem::error("bad")]);
        assert!(outcome.is_empty());
        assert!(outcome.has_errors());

        let outcome = Outcome::with_problems(1, vec![Problem::warning("slow")]);
        assert_eq!(outcome.value(), Some(&1));
        assert!(!outcome.has_errors());
    }

    #[test]
    fn test_flat_map_concatenates_problems() {
        let first = Outcome::of(2).and_warning("first");
        let chained = first.flat_map(|n| Outcome::of(n + 1).and_warning("second"));

        assert_eq!(chained.value(), Some(&3));
        let messages: Vec<String> = chained.problems().iter().map(Problem::message).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[test]
    fn test_flat_map_short_circuits() {
        let empty: Outcome<i32> = Outcome::failure(Problem::error("missing"));
        let chained = empty.flat_map(|_| -> Outcome<i32> { panic!("must not run") });
        assert!(chained.is_empty());
        assert_eq!(chained.problems().len(), 1);
    }

    #[test]
    fn test_or_else_keeps_earlier_errors() {
        let failed: Outcome<i32> = Outcome::failure(Problem::error("primary"));
        let recovered = failed.or_else(|| Outcome::of(7));
        // The earlier error still forbids a value.
        assert!(recovered.is_empty());
        assert_eq!(recovered.problems().len(), 1);

        let warned: Outcome<i32> = Outcome::empty(vec![Problem::warning("skipped")]);
        let recovered = warned.or_else(|| Outcome::of(7));
        assert_eq!(recovered.value(), Some(&7));
    }

    #[test]
    fn test_into_result() {
        assert_eq!(Outcome::of(5).into_result().unwrap(), 5);

        let err = Outcome::<i32>::failure(Problem::error("no solver"))
            .into_result()
            .unwrap_err();
        assert_eq!(err.to_string(), "computation produced no value: error: no solver");
    }

    #[test]
    fn test_erased_round_trip_and_mismatch() {
        let erased = Outcome::of(Arc::new(5u32)).erase();
        assert_eq!(erased.clone().downcast::<u32>().value().map(|v| **v), Some(5));

        let wrong = erased.downcast::<String>();
        assert!(wrong.is_empty());
        assert!(wrong.has_errors());
    }
}
