//! Reference-counted instrument lifetimes.
//!
//! User code never closes an instrument explicitly.  Every handle holds a strong reference on a
//! [`StalenessHandler`]; callback registrations hold a persistent one.  When the last reference
//! is released, the handler becomes stale and runs its on-stale callbacks, which tear down the
//! instrument's streams and remove it from the meter's identity cache.
use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use tracing::warn;

type OnStale = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct State {
    transient: usize,
    persistent: usize,
    stale: bool,
    callbacks: Vec<OnStale>,
}

impl State {
    fn should_go_stale(&self) -> bool {
        !self.stale && self.transient == 0 && self.persistent == 0
    }
}

/// Tracks the strong references to one instrument and fires on-stale callbacks once they are
/// all gone.
///
/// Once stale, a handler stays stale: it can no longer be acquired, and its callbacks never run
/// a second time.
#[derive(Default)]
pub struct StalenessHandler {
    state: Mutex<State>,
}

impl StalenessHandler {
    /// Creates a handler with no references.
    pub fn new() -> Self {
        StalenessHandler::default()
    }

    /// Acquires a reference.
    ///
    /// A persistent reference is counted separately, and is only given back with
    /// [`release_persistent`](StalenessHandler::release_persistent).  Acquiring a stale handler
    /// takes nothing and logs a warning; use [`try_acquire`](StalenessHandler::try_acquire) when
    /// the handler may already be stale.
    pub fn acquire(&self, persistent: bool) {
        if !self.try_acquire(persistent) {
            warn!(persistent, "ignored an attempt to acquire a stale instrument");
        }
    }

    /// Acquires a reference unless the handler is already stale.
    ///
    /// Returns `false`, and acquires nothing, when the handler is stale.
    pub fn try_acquire(&self, persistent: bool) -> bool {
        let mut state = self.state.lock();
        if state.stale {
            return false;
        }

        if persistent {
            state.persistent += 1;
        } else {
            state.transient += 1;
        }
        true
    }

    /// Releases a transient reference.
    ///
    /// Releasing more references than were acquired is a no-op.
    pub fn release(&self) {
        let callbacks = {
            let mut state = self.state.lock();
            if state.transient == 0 {
                warn!(stale = state.stale, "released an instrument reference that was not held");
                return;
            }
            state.transient -= 1;
            Self::take_if_stale(&mut state)
        };
        run(callbacks);
    }

    /// Releases a persistent reference.
    ///
    /// Releasing more references than were acquired is a no-op.
    pub fn release_persistent(&self) {
        let callbacks = {
            let mut state = self.state.lock();
            if state.persistent == 0 {
                warn!(
                    stale = state.stale,
                    "released a persistent instrument reference that was not held"
                );
                return;
            }
            state.persistent -= 1;
            Self::take_if_stale(&mut state)
        };
        run(callbacks);
    }

    /// Evaluates whether every reference is gone, firing the on-stale callbacks if so.
    ///
    /// Used after building an instrument whose creation was abandoned before any handle took a
    /// reference.
    pub fn check_staleness(&self) {
        let callbacks = Self::take_if_stale(&mut self.state.lock());
        run(callbacks);
    }

    /// Registers a callback to run when the handler goes stale.
    ///
    /// If the handler is already stale, the callback runs immediately.
    pub fn on_stale<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.stale {
            drop(state);
            callback();
        } else {
            state.callbacks.push(Box::new(callback));
        }
    }

    /// Whether or not the handler has gone stale.
    pub fn is_stale(&self) -> bool {
        self.state.lock().stale
    }

    fn take_if_stale(state: &mut State) -> Vec<OnStale> {
        if state.should_go_stale() {
            state.stale = true;
            std::mem::take(&mut state.callbacks)
        } else {
            Vec::new()
        }
    }
}

// Callbacks take other locks (cache shards, reader registries), so they always run after the
// handler lock is released.
fn run(callbacks: Vec<OnStale>) {
    for callback in callbacks {
        callback();
    }
}

impl fmt::Debug for StalenessHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("StalenessHandler")
            .field("transient", &state.transient)
            .field("persistent", &state.persistent)
            .field("stale", &state.stale)
            .field("callbacks", &state.callbacks.len())
            .finish()
    }
}

/// A transient reference on an instrument, released when dropped.
///
/// Cloning acquires another reference.
pub(crate) struct InstrumentRef {
    handler: Arc<StalenessHandler>,
}

impl InstrumentRef {
    /// Wraps a reference that the caller has already acquired.
    pub(crate) fn adopt(handler: Arc<StalenessHandler>) -> Self {
        InstrumentRef { handler }
    }

    pub(crate) fn handler(&self) -> &Arc<StalenessHandler> {
        &self.handler
    }
}

impl Clone for InstrumentRef {
    fn clone(&self) -> Self {
        self.handler.acquire(false);
        InstrumentRef { handler: Arc::clone(&self.handler) }
    }
}

impl Drop for InstrumentRef {
    fn drop(&mut self) {
        self.handler.release();
    }
}

impl fmt::Debug for InstrumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.handler, f)
    }
}
