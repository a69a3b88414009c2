//! The compute runtime: memoized, single-flight evaluation of node trees.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::computation::Inputs;
use crate::config::{CacheConfig, CachePolicy, CancellationMode};
use crate::error::Canceled;
use crate::key::Fingerprint;
use crate::monitor::Monitor;
use crate::node::{AnyNode, Node};
use crate::outcome::{ErasedOutcome, Outcome};
use crate::problem::Problem;
use crate::storage::{CacheStorage, Claim, Flight, WaitResult};
use crate::tracer::{ExecutionResult, NoopTracer, SpanId, Tracer, TracerNodeKey};

#[derive(Default)]
struct Stats {
    hits: AtomicU64,
    misses: AtomicU64,
    executions: AtomicU64,
    shared_waits: AtomicU64,
    abandoned: AtomicU64,
}

/// Counters describing how a runtime served its requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheStats {
    /// Memoized nodes answered from a finished cache entry.
    pub hits: u64,
    /// Memoized nodes this caller had to execute.
    pub misses: u64,
    /// Calls into [`Computation::compute`](crate::Computation::compute),
    /// memoized or not.
    pub executions: u64,
    /// Requests that joined another caller's in-flight execution.
    pub shared_waits: u64,
    /// In-flight executions withdrawn after cancellation or a panic.
    pub abandoned: u64,
}

/// The memoizing evaluator for computation trees.
///
/// `ComputeRuntime` is cheap to clone; clones share the cache. Each runtime
/// owns its own cache, so scoping a runtime to one run scopes the cache too.
///
/// # Example
///
/// ```
/// use memo_flow::{
///     CachePolicy, Canceled, ComputeRuntime, Computation, Dependency, Descriptor, Inputs,
///     Monitor, Node, Outcome, Slot,
/// };
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
/// struct Sum;
///
/// impl Sum {
///     const LEFT: Dependency<i64> = Dependency::new(0, "left");
///     const RIGHT: Dependency<i64> = Dependency::new(1, "right");
/// }
///
/// impl Computation for Sum {
///     type Output = i64;
///
///     fn dependencies() -> Descriptor {
///         Descriptor::new([Slot::of(Self::LEFT), Slot::of(Self::RIGHT)])
///     }
///
///     fn compute(&self, inputs: &Inputs, _monitor: &Monitor) -> Result<Outcome<i64>, Canceled> {
///         Ok(inputs
///             .get(Self::LEFT)
///             .flat_map(|l| inputs.get(Self::RIGHT).map(|r| *l + *r)))
///     }
/// }
///
/// let five = Node::leaf(Const(5)).unwrap();
/// let seven = Node::leaf(Const(7)).unwrap();
/// let sum = Node::new(Sum, [five.into_any(), seven.into_any()]).unwrap();
///
/// let runtime = ComputeRuntime::with_policy(CachePolicy::All);
/// let outcome = runtime.compute(&sum, &Monitor::new());
/// assert_eq!(outcome.value().map(|v| **v), Some(12));
/// ```
#[derive(Clone)]
pub struct ComputeRuntime {
    storage: Arc<CacheStorage>,
    config: CacheConfig,
    tracer: Arc<dyn Tracer>,
    stats: Arc<Stats>,
}

impl Default for ComputeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ComputeRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeRuntime")
            .field("config", &self.config)
            .field("entries", &self.storage.len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl ComputeRuntime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a runtime with the given cache policy.
    pub fn with_policy(policy: CachePolicy) -> Self {
        Self::builder().policy(policy).build()
    }

    /// Create a builder for a customized runtime.
    pub fn builder() -> ComputeRuntimeBuilder {
        ComputeRuntimeBuilder::new()
    }

    /// The active configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Compute `node`, rendering cancellation as an empty outcome according
    /// to the configured [`CancellationMode`].
    pub fn compute<T: Send + Sync + 'static>(
        &self,
        node: &Node<T>,
        monitor: &Monitor,
    ) -> Outcome<Arc<T>> {
        match self.try_compute(node, monitor) {
            Ok(outcome) => outcome,
            Err(canceled) => {
                tracing::info!(kind = node.kind_name(), "computation canceled");
                let problem = match self.config.cancellation {
                    CancellationMode::Empty => Problem::warning(canceled.to_string()),
                    CancellationMode::Fail => Problem::from_error(canceled),
                };
                Outcome::empty(vec![problem])
            }
        }
    }

    /// Compute `node`, surfacing cancellation as an error.
    ///
    /// The tree is snapshotted once at the start of the call; mutations made
    /// while it runs affect only later calls.
    pub fn try_compute<T: Send + Sync + 'static>(
        &self,
        node: &Node<T>,
        monitor: &Monitor,
    ) -> Result<Outcome<Arc<T>>, Canceled> {
        let fingerprint = node.fingerprint();
        let outcome = self.resolve(&fingerprint, monitor, true)?;
        Ok(outcome.downcast())
    }

    fn resolve(
        &self,
        fingerprint: &Fingerprint,
        monitor: &Monitor,
        top_level: bool,
    ) -> Result<ErasedOutcome, Canceled> {
        monitor.check_cancel()?;

        let span = self.tracer.new_span_id();
        let key = TracerNodeKey::from(fingerprint);
        self.tracer.on_compute_start(span, key);

        let result = if self.config.policy.memoizes(top_level) {
            self.resolve_memoized(fingerprint, monitor, span, key)
        } else {
            self.execute(fingerprint, monitor)
                .map(|outcome| (classify(&outcome), outcome))
        };

        match result {
            Ok((execution, outcome)) => {
                self.tracer.on_compute_end(span, key, execution);
                Ok(outcome)
            }
            Err(canceled) => {
                self.tracer.on_compute_end(span, key, ExecutionResult::Canceled);
                Err(canceled)
            }
        }
    }

    fn resolve_memoized(
        &self,
        fingerprint: &Fingerprint,
        monitor: &Monitor,
        span: SpanId,
        key: TracerNodeKey,
    ) -> Result<(ExecutionResult, ErasedOutcome), Canceled> {
        loop {
            match self.storage.claim(fingerprint) {
                Claim::Ready(outcome) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    self.tracer.on_cache_check(span, key, true);
                    monitor.done();
                    return Ok((ExecutionResult::CacheHit, outcome));
                }
                Claim::Wait(flight) => {
                    self.stats.shared_waits.fetch_add(1, Ordering::Relaxed);
                    self.tracer.on_wait(span, key);
                    if let Some(outcome) = self.wait_on(&flight, monitor)? {
                        monitor.done();
                        return Ok((ExecutionResult::Shared, outcome));
                    }
                    tracing::debug!(kind = key.kind, "in-flight execution abandoned, retrying");
                }
                Claim::Owner(flight) => {
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                    self.tracer.on_cache_check(span, key, false);
                    let guard = FlightGuard {
                        storage: &self.storage,
                        key: fingerprint,
                        flight: Some(flight),
                        abandoned: &self.stats.abandoned,
                    };
                    let outcome = self.execute(fingerprint, monitor)?;
                    guard.publish(outcome.clone());
                    return Ok((classify(&outcome), outcome));
                }
            }
        }
    }

    /// Wait for `flight` to settle. `None` means it was abandoned.
    fn wait_on(&self, flight: &Flight, monitor: &Monitor) -> Result<Option<ErasedOutcome>, Canceled> {
        let slice = Duration::from_millis(self.config.wait_slice_ms.max(1));
        loop {
            monitor.check_cancel()?;
            match flight.wait(slice) {
                WaitResult::Ready(outcome) => return Ok(Some(outcome)),
                WaitResult::Abandoned => return Ok(None),
                WaitResult::Pending => {}
            }
        }
    }

    fn execute(&self, fingerprint: &Fingerprint, monitor: &Monitor) -> Result<ErasedOutcome, Canceled> {
        let children = fingerprint.children();
        monitor.set_total_work(children.len() as u64 + 1)?;

        let mut outcomes = Vec::with_capacity(children.len());
        for child in children {
            let sub = monitor.sub_task(1);
            outcomes.push(self.resolve(child, &sub, false)?);
            sub.done();
        }

        let own = monitor.sub_task(1);
        self.stats.executions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(kind = fingerprint.kind_name(), "executing");
        let outcome = fingerprint.kind().execute(&Inputs::new(outcomes), &own)?;
        own.done();
        monitor.done();
        Ok(outcome)
    }

    /// Peek at the cached outcome for `node` without executing anything.
    pub fn get<T: Send + Sync + 'static>(&self, node: &Node<T>) -> Option<Outcome<Arc<T>>> {
        self.storage
            .get(&node.fingerprint())
            .map(|outcome| outcome.downcast())
    }

    /// Returns `true` if a finished outcome for `node` is cached.
    pub fn contains(&self, node: &AnyNode) -> bool {
        self.storage.get(&node.fingerprint()).is_some()
    }

    /// Remove the cache entry for `node`. Returns `true` if one existed.
    pub fn invalidate(&self, node: &AnyNode) -> bool {
        let fingerprint = node.fingerprint();
        let removed = self.storage.remove(&fingerprint);
        if removed {
            self.tracer.on_invalidated(TracerNodeKey::from(&fingerprint));
        }
        removed
    }

    /// Remove every cache entry.
    pub fn clear(&self) {
        self.storage.clear();
    }

    /// Number of cached outcomes.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fingerprints of all cached outcomes.
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.storage.keys()
    }

    /// Snapshot of the runtime's counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            executions: self.stats.executions.load(Ordering::Relaxed),
            shared_waits: self.stats.shared_waits.load(Ordering::Relaxed),
            abandoned: self.stats.abandoned.load(Ordering::Relaxed),
        }
    }
}

fn classify(outcome: &ErasedOutcome) -> ExecutionResult {
    if outcome.is_present() {
        return ExecutionResult::Executed;
    }
    let message = outcome
        .problems()
        .iter()
        .find(|problem| problem.is_error())
        .map(Problem::message)
        .unwrap_or_else(|| "no value".to_string());
    ExecutionResult::Failed { message }
}

/// Withdraws an owned flight unless it was published.
///
/// Dropping the guard without publishing (cancellation, a panic inside the
/// computation) wakes the waiters so one of them can take over.
struct FlightGuard<'a> {
    storage: &'a CacheStorage,
    key: &'a Fingerprint,
    flight: Option<Arc<Flight>>,
    abandoned: &'a AtomicU64,
}

impl FlightGuard<'_> {
    fn publish(mut self, outcome: ErasedOutcome) {
        if let Some(flight) = self.flight.take() {
            flight.publish(outcome);
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(flight) = self.flight.take() {
            self.storage.abandon(self.key, &flight);
            self.abandoned.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(kind = self.key.kind_name(), "abandoned in-flight execution");
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`ComputeRuntime`] with customizable settings.
///
/// # Example
///
/// ```
/// use memo_flow::{CachePolicy, CancellationMode, ComputeRuntime, LogTracer};
///
/// let runtime = ComputeRuntime::builder()
///     .policy(CachePolicy::All)
///     .cancellation(CancellationMode::Fail)
///     .tracer(LogTracer::new())
///     .build();
/// assert_eq!(runtime.config().policy, CachePolicy::All);
/// ```
pub struct ComputeRuntimeBuilder {
    config: CacheConfig,
    tracer: Option<Arc<dyn Tracer>>,
}

impl Default for ComputeRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeRuntimeBuilder {
    /// Create a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            tracer: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.config.policy = policy;
        self
    }

    pub fn cancellation(mut self, cancellation: CancellationMode) -> Self {
        self.config.cancellation = cancellation;
        self
    }

    /// Set how often waiters re-check their own cancellation.
    pub fn wait_slice(mut self, slice: Duration) -> Self {
        self.config.wait_slice_ms = u64::try_from(slice.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Install a tracer. Defaults to [`NoopTracer`].
    pub fn tracer(mut self, tracer: impl Tracer) -> Self {
        self.tracer = Some(Arc::new(tracer));
        self
    }

    pub fn build(self) -> ComputeRuntime {
        ComputeRuntime {
            storage: Arc::new(CacheStorage::new()),
            config: self.config,
            tracer: self.tracer.unwrap_or_else(|| Arc::new(NoopTracer)),
            stats: Arc::new(Stats::default()),
        }
    }
}
