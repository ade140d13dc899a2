//! Completion barrier for work whose size is discovered while it runs.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct State {
    outstanding: usize,
    closed: bool,
    fired: bool,
}

/// Fires exactly once, when the producer has closed the barrier and every
/// registered unit of work has finished, in whichever order those happen.
///
/// Both conditions are evaluated under one lock, so a registration racing a
/// completion can neither fire the barrier early nor make it miss its zero.
#[derive(Debug)]
pub struct QuiescenceBarrier {
    state: Mutex<State>,
    done: watch::Sender<bool>,
}

impl Default for QuiescenceBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl QuiescenceBarrier {
    pub fn new() -> Self {
        let (done, _) = watch::channel(false);
        Self {
            state: Mutex::new(State::default()),
            done,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers one unit of work. The returned guard marks it finished when dropped.
    pub fn register(self: &Arc<Self>) -> WorkGuard {
        let mut state = self.lock();
        debug_assert!(!state.closed, "work registered after the barrier was closed");
        state.outstanding += 1;
        WorkGuard {
            barrier: Arc::clone(self),
        }
    }

    /// Producer side: no further work will be registered.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.fire_if_quiescent(&mut state);
    }

    fn finish_one(&self) {
        let mut state = self.lock();
        state.outstanding -= 1;
        self.fire_if_quiescent(&mut state);
    }

    fn fire_if_quiescent(&self, state: &mut State) {
        if state.closed && state.outstanding == 0 && !state.fired {
            state.fired = true;
            self.done.send_replace(true);
        }
    }

    #[cfg(test)]
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    #[cfg(test)]
    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Waits until the barrier has fired. Returns immediately if it already has.
    pub async fn wait(&self) {
        let mut rx = self.done.subscribe();
        // The sender lives as long as `self`, so the wait cannot fail.
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// Outstanding unit of work; dropping it (normally or on unwind) completes it.
#[derive(Debug)]
pub struct WorkGuard {
    barrier: Arc<QuiescenceBarrier>,
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.barrier.finish_one();
    }
}
