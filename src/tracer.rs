//! Tracer trait for observing computation runs.
//!
//! The runtime reports every node it resolves through a [`Tracer`]. The
//! default [`NoopTracer`] discards everything; [`LogTracer`] forwards to the
//! `tracing` facade and [`EventCollector`](crate::EventCollector) buffers
//! events for inspection.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use memo_flow::{ComputeRuntime, ExecutionResult, SpanId, Tracer, TracerNodeKey};
//!
//! #[derive(Default)]
//! struct CountingTracer {
//!     next: AtomicU64,
//!     executed: AtomicU64,
//! }
//!
//! impl Tracer for CountingTracer {
//!     fn new_span_id(&self) -> SpanId {
//!         SpanId(self.next.fetch_add(1, Ordering::Relaxed))
//!     }
//!
//!     fn on_compute_end(&self, _span: SpanId, _node: TracerNodeKey, result: ExecutionResult) {
//!         if result == ExecutionResult::Executed {
//!             self.executed.fetch_add(1, Ordering::Relaxed);
//!         }
//!     }
//! }
//!
//! let runtime = ComputeRuntime::builder().tracer(CountingTracer::default()).build();
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use crate::key::Fingerprint;

/// Unique identifier for the resolution of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpanId(pub u64);

/// A node in a type-erased form for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TracerNodeKey {
    /// The kind's type name (e.g. `"calc::Sum"`).
    pub kind: &'static str,
    /// Structural hash of the node's subtree.
    pub fingerprint: u64,
}

impl TracerNodeKey {
    /// Create a new tracer node key.
    #[inline]
    pub fn new(kind: &'static str, fingerprint: u64) -> Self {
        Self { kind, fingerprint }
    }
}

impl From<&Fingerprint> for TracerNodeKey {
    fn from(fingerprint: &Fingerprint) -> Self {
        Self::new(fingerprint.kind_name(), fingerprint.hash_value())
    }
}

/// How the resolution of a node ended.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ExecutionResult {
    /// The node was executed and produced a value.
    Executed,
    /// The node was executed and produced an empty outcome.
    Failed { message: String },
    /// A cached outcome was returned without execution.
    CacheHit,
    /// Another caller's in-flight execution was shared.
    Shared,
    /// Resolution stopped because the monitor was canceled.
    Canceled,
}

/// Tracer trait for observing node resolution.
///
/// All methods except [`new_span_id`](Tracer::new_span_id) have empty default
/// implementations, so only the events of interest need overriding.
///
/// Implementations must be `Send + Sync`: the runtime calls the tracer from
/// every thread that computes.
pub trait Tracer: Send + Sync + 'static {
    /// Generate a new unique span ID. Called once per resolved node.
    fn new_span_id(&self) -> SpanId;

    /// Called when the runtime starts resolving a node.
    #[inline]
    fn on_compute_start(&self, _span_id: SpanId, _node: TracerNodeKey) {}

    /// Called after the cache was consulted for a memoized node.
    #[inline]
    fn on_cache_check(&self, _span_id: SpanId, _node: TracerNodeKey, _hit: bool) {}

    /// Called when the node is being executed by another caller and this one
    /// starts waiting.
    #[inline]
    fn on_wait(&self, _span_id: SpanId, _node: TracerNodeKey) {}

    /// Called when resolution of a node ends.
    #[inline]
    fn on_compute_end(&self, _span_id: SpanId, _node: TracerNodeKey, _result: ExecutionResult) {}

    /// Called when a cache entry is removed through
    /// [`ComputeRuntime::invalidate`](crate::ComputeRuntime::invalidate).
    #[inline]
    fn on_invalidated(&self, _node: TracerNodeKey) {}
}

impl<T: Tracer> Tracer for std::sync::Arc<T> {
    fn new_span_id(&self) -> SpanId {
        (**self).new_span_id()
    }

    fn on_compute_start(&self, span_id: SpanId, node: TracerNodeKey) {
        (**self).on_compute_start(span_id, node)
    }

    fn on_cache_check(&self, span_id: SpanId, node: TracerNodeKey, hit: bool) {
        (**self).on_cache_check(span_id, node, hit)
    }

    fn on_wait(&self, span_id: SpanId, node: TracerNodeKey) {
        (**self).on_wait(span_id, node)
    }

    fn on_compute_end(&self, span_id: SpanId, node: TracerNodeKey, result: ExecutionResult) {
        (**self).on_compute_end(span_id, node, result)
    }

    fn on_invalidated(&self, node: TracerNodeKey) {
        (**self).on_invalidated(node)
    }
}

/// Zero-cost tracer that discards all events.
///
/// This is the default tracer for [`ComputeRuntime`](crate::ComputeRuntime).
pub struct NoopTracer;

static NOOP_SPAN_COUNTER: AtomicU64 = AtomicU64::new(1);

impl Tracer for NoopTracer {
    #[inline(always)]
    fn new_span_id(&self) -> SpanId {
        SpanId(NOOP_SPAN_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Tracer forwarding events to the `tracing` facade.
#[derive(Default)]
pub struct LogTracer {
    next_span: AtomicU64,
}

impl LogTracer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tracer for LogTracer {
    fn new_span_id(&self) -> SpanId {
        SpanId(self.next_span.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn on_compute_start(&self, span_id: SpanId, node: TracerNodeKey) {
        tracing::trace!(span = span_id.0, kind = node.kind, fingerprint = node.fingerprint, "compute start");
    }

    fn on_cache_check(&self, span_id: SpanId, node: TracerNodeKey, hit: bool) {
        tracing::trace!(span = span_id.0, kind = node.kind, hit, "cache check");
    }

    fn on_wait(&self, span_id: SpanId, node: TracerNodeKey) {
        tracing::debug!(span = span_id.0, kind = node.kind, "waiting on in-flight execution");
    }

    fn on_compute_end(&self, span_id: SpanId, node: TracerNodeKey, result: ExecutionResult) {
        match result {
            ExecutionResult::Failed { message } => {
                tracing::debug!(span = span_id.0, kind = node.kind, %message, "compute failed");
            }
            result => {
                tracing::debug!(span = span_id.0, kind = node.kind, ?result, "compute end");
            }
        }
    }

    fn on_invalidated(&self, node: TracerNodeKey) {
        tracing::info!(kind = node.kind, fingerprint = node.fingerprint, "cache entry invalidated");
    }
}
