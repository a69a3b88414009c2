//! Diagnostics attached to computation outcomes.

use std::fmt;
use std::sync::Arc;

/// Severity of a [`Problem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Severity {
    /// Does not prevent a value from being produced.
    Warning,
    /// Prevents a value from being produced.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

/// A warning or error produced while computing a value.
///
/// The underlying cause is kept as an [`anyhow::Error`], so any error type can
/// be wrapped and later recovered with [`Problem::downcast_ref`]. Cloning is
/// cheap.
#[derive(Clone)]
pub struct Problem {
    error: Arc<anyhow::Error>,
    severity: Severity,
}

impl Problem {
    /// An error-severity problem with a plain message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(anyhow::Error::msg(message.into()), Severity::Error)
    }

    /// A warning-severity problem with a plain message.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(anyhow::Error::msg(message.into()), Severity::Warning)
    }

    /// An error-severity problem wrapping an existing error.
    pub fn from_error(error: impl Into<anyhow::Error>) -> Self {
        Self::new(error, Severity::Error)
    }

    /// A problem wrapping an existing error with the given severity.
    pub fn new(error: impl Into<anyhow::Error>, severity: Severity) -> Self {
        Self {
            error: Arc::new(error.into()),
            severity,
        }
    }

    /// The severity of this problem.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Returns `true` for error-severity problems.
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// The message of the wrapped error.
    pub fn message(&self) -> String {
        self.error.to_string()
    }

    /// The wrapped error.
    pub fn source_error(&self) -> &anyhow::Error {
        &self.error
    }

    /// Attempts to downcast the wrapped error to a concrete type.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.error.downcast_ref::<E>()
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.error)
    }
}

impl fmt::Debug for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Problem")
            .field("severity", &self.severity)
            .field("message", &self.message())
            .finish()
    }
}

// Wrapped errors are not comparable; two problems are the same diagnostic when
// they agree on severity and rendered message.
impl PartialEq for Problem {
    fn eq(&self, other: &Self) -> bool {
        self.severity == other.severity && self.message() == other.message()
    }
}

impl Eq for Problem {}
