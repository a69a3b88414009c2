//! Hierarchical progress monitors with cooperative cancellation.
//!
//! A [`Monitor`] tracks the work of one computation. Delegating part of that
//! work to a sub-computation goes through [`Monitor::sub_task`], which returns
//! a child monitor whose completion counts, scaled by its weight, towards the
//! parent's progress. Canceling a monitor is observed by it and by all of its
//! descendants at their next check point ([`Monitor::step`],
//! [`Monitor::uncertain_step`], [`Monitor::set_total_work`] or
//! [`Monitor::check_cancel`]).
//!
//! # Example
//!
//! ```
//! use memo_flow::Monitor;
//!
//! let root = Monitor::new();
//! root.set_total_work(10).unwrap();
//!
//! let sub = root.sub_task(4);
//! sub.set_total_work(2).unwrap();
//! sub.step(1).unwrap();
//!
//! assert!((root.relative_work_done() - 0.2).abs() < 1e-9);
//!
//! root.cancel();
//! assert!(sub.check_cancel().is_err());
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::Canceled;

type StatusReporter = Arc<dyn Fn() -> String + Send + Sync>;

/// Cancellation flag linked to the flags of all ancestors.
///
/// Holds no reference to children, so a child keeping its parent's flag alive
/// never forms a cycle with the parent's child list.
struct CancelFlag {
    canceled: AtomicBool,
    parent: Option<Arc<CancelFlag>>,
}

impl CancelFlag {
    fn is_set(&self) -> bool {
        let mut flag = Some(self);
        while let Some(current) = flag {
            if current.canceled.load(Ordering::Acquire) {
                return true;
            }
            flag = current.parent.as_deref();
        }
        false
    }
}

#[derive(Default)]
struct Work {
    current: u64,
    total: u64,
}

struct MonitorInner {
    cancel: Arc<CancelFlag>,
    parent_work: u64,
    work: Mutex<Work>,
    done: AtomicBool,
    task_name: RwLock<Option<String>>,
    status: RwLock<Option<StatusReporter>>,
    children: RwLock<Vec<Monitor>>,
}

/// A node in a tree of progress monitors.
///
/// Cheap to clone; clones refer to the same monitor. All methods take `&self`
/// and are safe to call from any thread.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    /// Create a root monitor.
    pub fn new() -> Self {
        Self::with_parent(None, 0)
    }

    fn with_parent(parent: Option<Arc<CancelFlag>>, parent_work: u64) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                cancel: Arc::new(CancelFlag {
                    canceled: AtomicBool::new(false),
                    parent,
                }),
                parent_work,
                work: Mutex::new(Work::default()),
                done: AtomicBool::new(false),
                task_name: RwLock::new(None),
                status: RwLock::new(None),
                children: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Create and register a child monitor worth `weight` units of this
    /// monitor's total work.
    pub fn sub_task(&self, weight: u64) -> Monitor {
        let child = Self::with_parent(Some(self.inner.cancel.clone()), weight);
        self.inner.children.write().push(child.clone());
        child
    }

    /// Record `work` completed units against the declared total.
    pub fn step(&self, work: u64) -> Result<(), Canceled> {
        {
            let mut state = self.inner.work.lock();
            state.current = state.current.saturating_add(work);
        }
        self.check_cancel()
    }

    /// Record `work` completed units and grow the total by the same amount.
    ///
    /// For operations whose total is not known upfront.
    pub fn uncertain_step(&self, work: u64) -> Result<(), Canceled> {
        {
            let mut state = self.inner.work.lock();
            state.current = state.current.saturating_add(work);
            state.total = state.total.saturating_add(work);
        }
        self.check_cancel()
    }

    /// Declare the expected number of work units.
    pub fn set_total_work(&self, total: u64) -> Result<(), Canceled> {
        self.inner.work.lock().total = total;
        self.check_cancel()
    }

    /// Mark the monitor as finished; current work snaps to the total.
    pub fn done(&self) {
        let mut state = self.inner.work.lock();
        state.current = state.total;
        self.inner.done.store(true, Ordering::Release);
    }

    /// Returns `true` once [`done`](Monitor::done) was called.
    pub fn is_done(&self) -> bool {
        self.inner.done.load(Ordering::Acquire)
    }

    /// Request cancellation of this monitor and its descendants.
    pub fn cancel(&self) {
        self.inner.cancel.canceled.store(true, Ordering::Release);
    }

    /// Returns `true` if this monitor or any ancestor was canceled.
    pub fn is_canceled(&self) -> bool {
        self.inner.cancel.is_set()
    }

    /// Fails with [`Canceled`] if this monitor or any ancestor was canceled.
    pub fn check_cancel(&self) -> Result<(), Canceled> {
        if self.inner.cancel.is_set() {
            Err(Canceled)
        } else {
            Ok(())
        }
    }

    /// The declared total work.
    pub fn total_work(&self) -> u64 {
        self.inner.work.lock().total
    }

    /// Weight of this monitor in its parent's total, 0 for a root.
    pub fn parent_work(&self) -> u64 {
        self.inner.parent_work
    }

    /// Completed work, including the weighted progress of sub-tasks.
    pub fn work_done(&self) -> f64 {
        if self.is_done() {
            return self.total_work() as f64;
        }
        let current = self.inner.work.lock().current;
        current as f64 + self.children_work()
    }

    /// Work still outstanding.
    pub fn remaining_work(&self) -> f64 {
        self.total_work() as f64 - self.work_done()
    }

    /// Completion fraction in `[0, 1]` for well-behaved callers; 0 when no
    /// total was declared, even once done, and otherwise 1 once done.
    pub fn relative_work_done(&self) -> f64 {
        let (current, total) = {
            let state = self.inner.work.lock();
            (state.current, state.total)
        };
        if total == 0 {
            return 0.0;
        }
        if self.is_done() {
            return 1.0;
        }
        (current as f64 + self.children_work()) / total as f64
    }

    fn children_work(&self) -> f64 {
        self.inner
            .children
            .read()
            .iter()
            .map(|child| child.relative_work_done() * child.inner.parent_work as f64)
            .sum()
    }

    /// Sub-tasks spawned so far.
    pub fn children(&self) -> Vec<Monitor> {
        self.inner.children.read().clone()
    }

    /// Set the human-readable task name.
    pub fn set_task_name(&self, name: impl Into<String>) {
        *self.inner.task_name.write() = Some(name.into());
    }

    /// The task name, if one was set.
    pub fn task_name(&self) -> Option<String> {
        self.inner.task_name.read().clone()
    }

    /// Install a producer of free-form status text.
    pub fn set_status_reporter(&self, reporter: impl Fn() -> String + Send + Sync + 'static) {
        *self.inner.status.write() = Some(Arc::new(reporter));
    }

    /// Current status text, empty without a reporter.
    pub fn report_status(&self) -> String {
        let reporter = self.inner.status.read().clone();
        reporter.map(|report| report()).unwrap_or_default()
    }

    /// Completion rendered as a fixed-width percentage, e.g. `" 42.5 %"`.
    pub fn progress_message(&self) -> String {
        format_progress(self.relative_work_done())
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (current, total) = {
            let state = self.inner.work.lock();
            (state.current, state.total)
        };
        f.debug_struct("Monitor")
            .field("task_name", &*self.inner.task_name.read())
            .field("parent_work", &self.inner.parent_work)
            .field("current", &current)
            .field("total", &total)
            .field("canceled", &self.is_canceled())
            .field("done", &self.is_done())
            .field("children", &self.inner.children.read().len())
            .finish()
    }
}

/// Render a completion fraction as a percentage with one decimal.
///
/// The fraction is clamped to `[0, 1]` and floored to a tenth of a percent,
/// so a computation never reports `100.0 %` before it is actually complete.
pub fn format_progress(fraction: f64) -> String {
    let clamped = if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    };
    format!("{:5.1} %", (clamped * 1000.0).floor() / 10.0)
}
