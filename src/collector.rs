//! Event collector for testing and deferred reporting.
//!
//! `EventCollector` is a [`Tracer`] that accumulates events in memory. Tests
//! use it to assert which nodes executed; applications can buffer the events
//! of a run and [`flush`](EventCollector::flush) them into any consumer later.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::tracer::{ExecutionResult, SpanId, Tracer, TracerNodeKey};

/// An event recorded by [`EventCollector`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum TraceEvent {
    ComputeStart {
        span_id: SpanId,
        node: TracerNodeKey,
    },
    CacheCheck {
        span_id: SpanId,
        node: TracerNodeKey,
        hit: bool,
    },
    Wait {
        span_id: SpanId,
        node: TracerNodeKey,
    },
    ComputeEnd {
        span_id: SpanId,
        node: TracerNodeKey,
        result: ExecutionResult,
    },
    Invalidated {
        node: TracerNodeKey,
    },
}

impl TraceEvent {
    /// The node the event is about.
    pub fn node(&self) -> TracerNodeKey {
        match self {
            TraceEvent::ComputeStart { node, .. }
            | TraceEvent::CacheCheck { node, .. }
            | TraceEvent::Wait { node, .. }
            | TraceEvent::ComputeEnd { node, .. }
            | TraceEvent::Invalidated { node } => *node,
        }
    }
}

/// Tracer that accumulates events for later inspection.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use memo_flow::{ComputeRuntime, EventCollector};
///
/// let collector = Arc::new(EventCollector::new());
/// let runtime = ComputeRuntime::builder().tracer(collector.clone()).build();
/// // ... compute nodes ...
/// assert!(collector.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Mutex<Vec<TraceEvent>>,
    next_span: AtomicU64,
}

impl EventCollector {
    /// Create a new empty event collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get collected events as a vector.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Take collected events, clearing the collector.
    pub fn take(&self) -> Vec<TraceEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Hand all buffered events to `consumer` in recording order and clear
    /// the buffer.
    pub fn flush(&self, mut consumer: impl FnMut(TraceEvent)) {
        for event in self.take() {
            consumer(event);
        }
    }

    /// Get the number of collected events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Check if no events have been collected.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Number of times a node of kind `C` was actually executed.
    pub fn executions_of<C: 'static>(&self) -> usize {
        self.count_ends_of::<C>(|result| {
            matches!(
                result,
                ExecutionResult::Executed | ExecutionResult::Failed { .. }
            )
        })
    }

    /// Number of times a node of kind `C` was served from the cache.
    pub fn cache_hits_of<C: 'static>(&self) -> usize {
        self.count_ends_of::<C>(|result| *result == ExecutionResult::CacheHit)
    }

    fn count_ends_of<C: 'static>(&self, predicate: impl Fn(&ExecutionResult) -> bool) -> usize {
        let kind = std::any::type_name::<C>();
        self.events
            .lock()
            .iter()
            .filter(|event| match event {
                TraceEvent::ComputeEnd { node, result, .. } => node.kind == kind && predicate(result),
                _ => false,
            })
            .count()
    }

    fn record(&self, event: TraceEvent) {
        self.events.lock().push(event);
    }
}

impl Tracer for EventCollector {
    fn new_span_id(&self) -> SpanId {
        SpanId(self.next_span.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn on_compute_start(&self, span_id: SpanId, node: TracerNodeKey) {
        self.record(TraceEvent::ComputeStart { span_id, node });
    }

    fn on_cache_check(&self, span_id: SpanId, node: TracerNodeKey, hit: bool) {
        self.record(TraceEvent::CacheCheck { span_id, node, hit });
    }

    fn on_wait(&self, span_id: SpanId, node: TracerNodeKey) {
        self.record(TraceEvent::Wait { span_id, node });
    }

    fn on_compute_end(&self, span_id: SpanId, node: TracerNodeKey, result: ExecutionResult) {
        self.record(TraceEvent::ComputeEnd {
            span_id,
            node,
            result,
        });
    }

    fn on_invalidated(&self, node: TracerNodeKey) {
        self.record(TraceEvent::Invalidated { node });
    }
}
