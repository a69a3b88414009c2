//! Memo-Flow: composable computation trees with structural memoization.
//!
//! Long-running analyses are assembled as trees of reusable computation
//! nodes. A [`ComputeRuntime`] evaluates a tree dependency-first and decides,
//! per [`CachePolicy`], whether to reuse a stored result or execute a node.
//!
//! # Key Features
//!
//! - **Structural keys**: nodes are cached by what they compute (kind value
//!   plus children), not by identity, so rebuilt trees hit the cache
//! - **Single-flight**: concurrent requests for the same memoized node share
//!   one execution
//! - **Outcomes, not exceptions**: every computation yields an [`Outcome`], a
//!   value or nothing plus the [`Problem`]s collected on the way
//! - **Cooperative cancellation**: hierarchical [`Monitor`]s carry weighted
//!   progress and a cancellation flag that reaches all descendants
//!
//! # Example
//!
//! ```
//! use memo_flow::{Canceled, ComputeRuntime, Computation, Inputs, Monitor, Node, Outcome};
//!
//! #[derive(Debug, Clone, Hash, PartialEq, Eq)]
//! struct Greeting(&'static str);
//!
//! impl Computation for Greeting {
//!     type Output = String;
//!
//!     fn compute(&self, _inputs: &Inputs, monitor: &Monitor) -> Result<Outcome<String>, Canceled> {
//!         monitor.check_cancel()?;
//!         Ok(Outcome::of(format!("hello, {}", self.0)))
//!     }
//! }
//!
//! let runtime = ComputeRuntime::new();
//! let node = Node::leaf(Greeting("world")).unwrap();
//! let outcome = runtime.compute(&node, &Monitor::new());
//! assert_eq!(outcome.value().map(|s| s.as_str()), Some("hello, world"));
//! ```
//!
//! # Observability
//!
//! Diagnostics go through the `tracing` facade. For structured per-node
//! events install a [`Tracer`] with [`ComputeRuntimeBuilder::tracer`];
//! [`EventCollector`] buffers them for tests and deferred reporting.

mod collector;
mod computation;
mod config;
mod dependency;
mod error;
mod key;
mod monitor;
mod node;
mod outcome;
mod problem;
mod runtime;
mod storage;
pub mod tracer;

pub use collector::{EventCollector, TraceEvent};
pub use computation::{Computation, Inputs};
pub use config::{CacheConfig, CachePolicy, CancellationMode, CACHE_POLICY_ENV};
pub use dependency::{Dependency, Descriptor, Slot};
pub use error::{Canceled, ConfigError, ConstructionError, OutcomeError};
pub use key::Fingerprint;
pub use monitor::{format_progress, Monitor};
pub use node::{AnyNode, Arg, Node};
pub use outcome::Outcome;
pub use problem::{Problem, Severity};
pub use runtime::{CacheStats, ComputeRuntime, ComputeRuntimeBuilder};
pub use tracer::{ExecutionResult, LogTracer, NoopTracer, SpanId, Tracer, TracerNodeKey};
