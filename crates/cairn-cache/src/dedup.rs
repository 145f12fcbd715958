use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use cairn_store::{BlobReader, BlobRecord, StoreResult};
use cairn_types::{CancelToken, Locator};

enum FlightState {
    Running,
    /// The leader's call succeeded; followers clone the shared result.
    Done(Option<Arc<BlobRecord>>),
    /// The leader's call failed. Errors are not shared: each follower
    /// retries for itself, which is the right call for transient failures
    /// and harmless for the rest.
    Failed,
}

struct Flight {
    state: Mutex<FlightState>,
    done: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            state: Mutex::new(FlightState::Running),
            done: Condvar::new(),
        }
    }
}

/// Coalesces concurrent reads of the same locator into one backend call.
///
/// The first caller for a locator becomes the leader and performs the backend
/// read; callers arriving while it is in flight wait on the same flight and
/// share its result. The pending table's lock is held only to register or
/// remove an entry -- never across the backend I/O -- and the entry is removed
/// the instant the call completes, so later reads start a fresh flight.
pub struct DedupReader {
    inner: Arc<dyn BlobReader>,
    pending: Mutex<HashMap<Locator, Arc<Flight>>>,
}

impl DedupReader {
    /// Create a coalescing layer over `inner`.
    pub fn new(inner: Arc<dyn BlobReader>) -> Self {
        Self {
            inner,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Number of reads currently in flight.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().expect("lock poisoned").len()
    }

    /// Join an existing flight or become its leader.
    fn enroll(&self, locator: &Locator) -> (Arc<Flight>, bool) {
        let mut pending = self.pending.lock().expect("lock poisoned");
        match pending.get(locator) {
            Some(flight) => (Arc::clone(flight), false),
            None => {
                let flight = Arc::new(Flight::new());
                pending.insert(locator.clone(), Arc::clone(&flight));
                (flight, true)
            }
        }
    }

    fn lead(
        &self,
        locator: &Locator,
        flight: &Arc<Flight>,
        cancel: &CancelToken,
    ) -> StoreResult<Option<BlobRecord>> {
        let result = self.inner.read(locator, cancel);

        // Remove the pending entry first: the flight is finished and any
        // caller arriving from here on should issue a fresh read.
        self.pending.lock().expect("lock poisoned").remove(locator);

        let mut state = flight.state.lock().expect("lock poisoned");
        *state = match &result {
            Ok(record) => FlightState::Done(record.clone().map(Arc::new)),
            Err(_) => FlightState::Failed,
        };
        drop(state);
        flight.done.notify_all();

        result
    }

    fn follow(&self, flight: &Arc<Flight>) -> Option<Option<BlobRecord>> {
        let mut state = flight.state.lock().expect("lock poisoned");
        loop {
            match &*state {
                FlightState::Running => {
                    state = flight.done.wait(state).expect("lock poisoned");
                }
                FlightState::Done(record) => {
                    return Some(record.as_ref().map(|r| (**r).clone()));
                }
                FlightState::Failed => return None,
            }
        }
    }
}

impl BlobReader for DedupReader {
    fn read(&self, locator: &Locator, cancel: &CancelToken) -> StoreResult<Option<BlobRecord>> {
        loop {
            cancel.check()?;
            let (flight, is_leader) = self.enroll(locator);
            if is_leader {
                return self.lead(locator, &flight, cancel);
            }
            match self.follow(&flight) {
                Some(record) => return Ok(record),
                // Leader failed; its pending entry is gone. Retry as (or
                // behind) a new leader.
                None => continue,
            }
        }
    }
}

impl std::fmt::Debug for DedupReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupReader")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
