//! Fingerprint-keyed cache storage with in-flight tracking.

use std::sync::Arc;
use std::time::Duration;

use papaya::{Compute, HashMap, Operation};
use parking_lot::{Condvar, Mutex};

use crate::key::Fingerprint;
use crate::outcome::ErasedOutcome;

enum FlightState {
    Running,
    Ready(ErasedOutcome),
    Abandoned,
}

/// One execution of a fingerprint, shared by everyone who asked for it.
///
/// Starts `Running`, then either publishes an outcome or is abandoned. Both
/// transitions are final and wake all waiters.
pub(crate) struct Flight {
    state: Mutex<FlightState>,
    settled: Condvar,
}

/// What a waiter observed after one wait slice.
pub(crate) enum WaitResult {
    Ready(ErasedOutcome),
    Abandoned,
    Pending,
}

impl Flight {
    fn running() -> Self {
        Self {
            state: Mutex::new(FlightState::Running),
            settled: Condvar::new(),
        }
    }

    fn outcome(&self) -> Option<ErasedOutcome> {
        match &*self.state.lock() {
            FlightState::Ready(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }

    pub(crate) fn publish(&self, outcome: ErasedOutcome) {
        *self.state.lock() = FlightState::Ready(outcome);
        self.settled.notify_all();
    }

    fn abandon(&self) {
        let mut state = self.state.lock();
        if matches!(*state, FlightState::Running) {
            *state = FlightState::Abandoned;
            self.settled.notify_all();
        }
    }

    /// Wait at most `slice` for the flight to settle.
    pub(crate) fn wait(&self, slice: Duration) -> WaitResult {
        let mut state = self.state.lock();
        if matches!(*state, FlightState::Running) {
            let _ = self.settled.wait_for(&mut state, slice);
        }
        match &*state {
            FlightState::Running => WaitResult::Pending,
            FlightState::Ready(outcome) => WaitResult::Ready(outcome.clone()),
            FlightState::Abandoned => WaitResult::Abandoned,
        }
    }
}

/// Result of [`CacheStorage::claim`].
pub(crate) enum Claim {
    /// A finished outcome is cached.
    Ready(ErasedOutcome),
    /// Someone else is executing; wait on the flight.
    Wait(Arc<Flight>),
    /// The caller must execute and publish into the flight.
    Owner(Arc<Flight>),
}

/// Thread-safe, fingerprint-keyed storage for computation outcomes.
///
/// Uses papaya's lock-free HashMap internally. Entries are flights: running
/// ones mark an execution in progress, ready ones hold the cached outcome.
pub(crate) struct CacheStorage {
    entries: HashMap<Fingerprint, Arc<Flight>, ahash::RandomState>,
}

impl Default for CacheStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStorage {
    pub fn new() -> Self {
        Self {
            entries: HashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    /// Atomically decide who executes `key`.
    pub fn claim(&self, key: &Fingerprint) -> Claim {
        let pinned = self.entries.pin();
        let fresh = Arc::new(Flight::running());
        let result = pinned.compute(key.clone(), |entry| match entry {
            Some((_, flight)) => Operation::Abort(flight.clone()),
            None => Operation::Insert(fresh.clone()),
        });
        match result {
            Compute::Inserted(_, _) => Claim::Owner(fresh),
            Compute::Aborted(flight) => match flight.outcome() {
                Some(outcome) => Claim::Ready(outcome),
                None => Claim::Wait(flight),
            },
            Compute::Updated { .. } | Compute::Removed(_, _) => unreachable!(),
        }
    }

    /// Mark `flight` abandoned and withdraw it, unless it was replaced meanwhile.
    pub fn abandon(&self, key: &Fingerprint, flight: &Arc<Flight>) {
        flight.abandon();
        let pinned = self.entries.pin();
        let _ = pinned.compute(key.clone(), |entry| match entry {
            Some((_, current)) if Arc::ptr_eq(current, flight) => Operation::Remove,
            _ => Operation::Abort(()),
        });
    }

    /// Get a finished outcome if present.
    pub fn get(&self, key: &Fingerprint) -> Option<ErasedOutcome> {
        let pinned = self.entries.pin();
        pinned.get(key).and_then(|flight| flight.outcome())
    }

    /// Remove an entry. Executions already in flight still deliver to their
    /// waiters.
    pub fn remove(&self, key: &Fingerprint) -> bool {
        let pinned = self.entries.pin();
        pinned.remove(key).is_some()
    }

    pub fn clear(&self) {
        let pinned = self.entries.pin();
        pinned.clear();
    }

    /// Number of finished entries.
    pub fn len(&self) -> usize {
        let pinned = self.entries.pin();
        pinned
            .iter()
            .filter(|(_, flight)| flight.outcome().is_some())
            .count()
    }

    /// Keys of all finished entries.
    pub fn keys(&self) -> Vec<Fingerprint> {
        let pinned = self.entries.pin();
        pinned
            .iter()
            .filter(|(_, flight)| flight.outcome().is_some())
            .map(|(key, _)| key.clone())
            .collect()
    }
}
