use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::entry::AppEntry;
use crate::filter::{AppFilter, Comparator};

/// A filter and ordering waiting to be run by the worker
pub(crate) struct RebuildRequest {
    pub(crate) filter: Option<Box<dyn AppFilter>>,
    pub(crate) comparator: Comparator,
}

struct RebuildState {
    request: Option<RebuildRequest>,
    /// Set once the requesting caller stopped waiting
    asynchronous: bool,
    result: Option<Vec<Arc<AppEntry>>>,
    last: Vec<Arc<AppEntry>>,
}

/// How the worker's result was handed over
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// A caller was still waiting and got the list directly
    Sync,
    /// Nobody is waiting, the listener has to be told
    Async,
    /// A newer request arrived while this one ran
    Superseded,
}

/// Single-slot rendezvous between [crate::ApplicationsState::rebuild] callers
/// and the worker.
pub(crate) struct RebuildSlot {
    state: Mutex<RebuildState>,
    cond: Condvar,
    wait: Duration,
}

impl RebuildSlot {
    pub(crate) fn new(wait: Duration) -> Self {
        Self {
            state: Mutex::new(RebuildState {
                request: None,
                asynchronous: false,
                result: None,
                last: Vec::new(),
            }),
            cond: Condvar::new(),
            wait,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RebuildState> {
        self.state.lock().expect("rebuild lock poisoned")
    }

    /// Replace any pending request with `request`, call `wake` and wait up
    /// to the configured budget for the result.
    ///
    /// Returns `None` if the budget ran out, in which case the result is
    /// delivered asynchronously later.
    pub(crate) fn request<F>(&self, request: RebuildRequest, wake: F) -> Option<Vec<Arc<AppEntry>>>
    where
        F: FnOnce(),
    {
        let mut state = self.lock();
        if state.request.is_some() {
            log::trace!("superseding pending rebuild");
        }
        state.request = Some(request);
        state.asynchronous = false;
        state.result = None;
        wake();

        let deadline = Instant::now() + self.wait;
        while state.result.is_none() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            state = self
                .cond
                .wait_timeout(state, deadline - now)
                .expect("rebuild lock poisoned")
                .0;
        }
        state.asynchronous = true;
        let result = state.result.take();
        if result.is_none() {
            log::debug!("rebuild not ready after {:?}, going async", self.wait);
        }
        result
    }

    pub(crate) fn take_request(&self) -> Option<RebuildRequest> {
        self.lock().request.take()
    }

    #[cfg(test)]
    pub(crate) fn has_request(&self) -> bool {
        self.lock().request.is_some()
    }

    /// Drop a request the worker hasn't started yet
    pub(crate) fn discard_pending(&self) {
        if self.lock().request.take().is_some() {
            log::trace!("discarded pending rebuild");
        }
    }

    /// Hand a finished list back, see [Delivery]
    pub(crate) fn publish(&self, entries: Vec<Arc<AppEntry>>) -> Delivery {
        let mut state = self.lock();
        if state.request.is_some() {
            return Delivery::Superseded;
        }
        state.last = entries;
        if state.asynchronous {
            return Delivery::Async;
        }
        state.result = Some(state.last.clone());
        self.cond.notify_all();
        Delivery::Sync
    }

    /// The most recently published list
    pub(crate) fn last(&self) -> Vec<Arc<AppEntry>> {
        self.lock().last.clone()
    }
}
