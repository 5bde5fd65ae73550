//! Observable instrument callbacks.
//!
//! Callbacks are kept in a provider-wide registry, keyed by a stable integer id handed back to the
//! caller as a [`CallbackRegistration`].  Every live callback holds a persistent reference on the
//! instruments it feeds, so that dropping the user's handles does not tear down an instrument a
//! callback is still reporting for.
use std::{
    any::Any,
    cell::RefCell,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{unbounded, RecvTimeoutError};
use hashbrown::{HashMap, HashSet};
use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::{debug, error, warn};

use crate::{
    attributes::{Attributes, KeyValue},
    instruments::{IntoF64, ObservableInstrument},
    staleness::StalenessHandler,
    stream::Observations,
};

type SingleCallback = Arc<dyn Fn(&Observer) + Send + Sync>;
type BatchCallback = Arc<dyn Fn(&BatchObserver) + Send + Sync>;

/// Records observations for a single observable instrument.
///
/// Within one collection pass, observing the same attribute set twice keeps the last value.
pub struct Observer {
    observations: RefCell<Observations>,
}

impl Observer {
    fn new() -> Self {
        Observer { observations: RefCell::new(Observations::new()) }
    }

    /// Observes a value for the given attributes.
    pub fn observe<V: IntoF64>(&self, value: V, attributes: &[KeyValue]) {
        self.observations.borrow_mut().insert(Attributes::new(attributes), value.into_f64());
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer").field("observations", &self.observations.borrow().len()).finish()
    }
}

/// Records observations for several observable instruments from one callback.
///
/// Observations for instruments that were not part of the registration are dropped.
pub struct BatchObserver {
    observations: HashMap<u64, RefCell<Observations>>,
}

impl BatchObserver {
    fn new(instruments: &[u64]) -> Self {
        BatchObserver {
            observations: instruments
                .iter()
                .map(|id| (*id, RefCell::new(Observations::new())))
                .collect(),
        }
    }

    /// Observes a value of the given instrument for the given attributes.
    pub fn observe<I, V>(&self, instrument: &I, value: V, attributes: &[KeyValue])
    where
        I: ObservableInstrument + ?Sized,
        V: IntoF64,
    {
        let instrument_id = instrument.instrument_id();
        match self.observations.get(&instrument_id) {
            Some(observations) => {
                observations.borrow_mut().insert(Attributes::new(attributes), value.into_f64());
            }
            None => warn!(
                instrument_id,
                "dropped observation for an instrument outside of the batch registration"
            ),
        }
    }
}

impl fmt::Debug for BatchObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchObserver").field("instruments", &self.observations.len()).finish()
    }
}

#[derive(Clone)]
enum Callback {
    Single(u64, SingleCallback),
    Batch(Vec<u64>, BatchCallback),
}

impl Callback {
    fn feeds_any(&self, instruments: &HashSet<u64>) -> bool {
        match self {
            Callback::Single(id, _) => instruments.contains(id),
            Callback::Batch(ids, _) => ids.iter().any(|id| instruments.contains(id)),
        }
    }

    /// Runs the callback, returning its observations per instrument.
    fn run(&self) -> std::thread::Result<Vec<(u64, Observations)>> {
        match self {
            Callback::Single(id, f) => {
                let observer = Observer::new();
                catch_unwind(AssertUnwindSafe(|| f(&observer)))?;
                Ok(vec![(*id, observer.observations.into_inner())])
            }
            Callback::Batch(ids, f) => {
                let observer = BatchObserver::new(ids);
                catch_unwind(AssertUnwindSafe(|| f(&observer)))?;
                Ok(observer
                    .observations
                    .into_iter()
                    .map(|(id, observations)| (id, observations.into_inner()))
                    .collect())
            }
        }
    }
}

struct Registration {
    callback: Callback,
    handlers: Vec<Arc<StalenessHandler>>,
}

/// The observations gathered by one collection pass.
#[derive(Debug, Default)]
pub(crate) struct ObservationPass {
    pub(crate) observations: HashMap<u64, Observations>,
    pub(crate) failures: usize,
}

/// Provider-wide registry of observable callbacks.
#[derive(Default)]
pub(crate) struct CallbackRegistry {
    next_id: AtomicU64,
    callbacks: RwLock<IndexMap<u64, Registration>>,
}

impl CallbackRegistry {
    pub(crate) fn new() -> Self {
        CallbackRegistry::default()
    }

    fn insert(&self, callback: Callback, handlers: Vec<Arc<StalenessHandler>>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // Only references actually taken are given back on detach.
        let total = handlers.len();
        let handlers = handlers
            .into_iter()
            .filter(|handler| handler.try_acquire(true))
            .collect::<Vec<_>>();
        if handlers.len() < total {
            warn!(
                callback_id = id,
                stale = total - handlers.len(),
                "registered observable callback against instruments that are already torn down"
            );
        }

        self.callbacks.write().insert(id, Registration { callback, handlers });
        debug!(callback_id = id, "registered observable callback");
        id
    }

    /// Registers a callback feeding one instrument.
    pub(crate) fn register<F>(
        self: &Arc<Self>,
        instrument_id: u64,
        handler: Arc<StalenessHandler>,
        f: F,
    ) -> CallbackRegistration
    where
        F: Fn(&Observer) + Send + Sync + 'static,
    {
        let id = self.insert(Callback::Single(instrument_id, Arc::new(f)), vec![handler]);
        CallbackRegistration { id, registry: Arc::downgrade(self) }
    }

    /// Registers a callback feeding several instruments.
    pub(crate) fn register_batch<F>(
        self: &Arc<Self>,
        instruments: Vec<(u64, Arc<StalenessHandler>)>,
        f: F,
    ) -> CallbackRegistration
    where
        F: Fn(&BatchObserver) + Send + Sync + 'static,
    {
        let (ids, handlers): (Vec<_>, Vec<_>) = instruments.into_iter().unzip();
        let id = self.insert(Callback::Batch(ids, Arc::new(f)), handlers);
        CallbackRegistration { id, registry: Arc::downgrade(self) }
    }

    /// Removes a callback, releasing its references on the instruments it fed.
    pub(crate) fn detach(&self, id: u64) -> bool {
        let registration = self.callbacks.write().shift_remove(&id);
        match registration {
            Some(registration) => {
                debug!(callback_id = id, "detached observable callback");
                // Releasing may tear the instrument down, which must not happen under our lock.
                for handler in registration.handlers {
                    handler.release_persistent();
                }
                true
            }
            None => false,
        }
    }

    /// Runs every callback feeding at least one of the given instruments.
    ///
    /// Each callback runs once, on its own thread, without any lock held.  Callbacks that panic, or
    /// that have not returned once `timeout` has elapsed, contribute no observations and are
    /// counted as failures.  A callback that overruns is left to finish in the background; its
    /// observations are discarded.
    pub(crate) fn observe(&self, instruments: &HashSet<u64>, timeout: Duration) -> ObservationPass {
        let callbacks = self
            .callbacks
            .read()
            .iter()
            .filter(|(_, r)| r.callback.feeds_any(instruments))
            .map(|(id, r)| (*id, r.callback.clone()))
            .collect::<Vec<_>>();

        let mut pass = ObservationPass::default();
        if callbacks.is_empty() {
            return pass;
        }

        let deadline = Instant::now() + timeout;
        let (tx, rx) = unbounded();
        let mut pending = HashSet::with_capacity(callbacks.len());
        for (callback_id, callback) in callbacks {
            let tx = tx.clone();
            let spawned = thread::Builder::new()
                .name("metrics-sdk-callback".to_string())
                .spawn(move || {
                    // The receiver is gone once the pass gave up on this callback.
                    let _ = tx.send((callback_id, callback.run()));
                });
            match spawned {
                Ok(_) => {
                    pending.insert(callback_id);
                }
                Err(e) => {
                    error!(callback_id, error = %e, "failed to spawn observable callback thread");
                    pass.failures += 1;
                }
            }
        }
        drop(tx);

        while !pending.is_empty() {
            match rx.recv_deadline(deadline) {
                Ok((callback_id, result)) => {
                    pending.remove(&callback_id);
                    match result {
                        Ok(observed) => {
                            for (instrument_id, observations) in observed {
                                let merged = pass.observations.entry(instrument_id).or_default();
                                merged.extend(observations);
                            }
                        }
                        Err(panic) => {
                            error!(
                                callback_id,
                                error = panic_message(panic.as_ref()),
                                "observable callback panicked, its observations were discarded"
                            );
                            pass.failures += 1;
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    for callback_id in pending.drain() {
                        error!(
                            callback_id,
                            timeout_ms = timeout.as_millis() as u64,
                            "observable callback timed out, its observations were discarded"
                        );
                        pass.failures += 1;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        pass
    }

    #[cfg(test)]
    fn held(&self, id: u64) -> usize {
        self.callbacks.read().get(&id).map_or(0, |r| r.handlers.len())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.callbacks.read().len()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry").field("callbacks", &self.callbacks.read().len()).finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// A registered observable callback.
///
/// The callback stays registered until [`detach`](CallbackRegistration::detach) is called;
/// dropping the registration does not detach it.
#[must_use = "the callback can only be detached through its registration"]
#[derive(Debug)]
pub struct CallbackRegistration {
    id: u64,
    registry: Weak<CallbackRegistry>,
}

impl CallbackRegistration {
    /// Stable id of the callback.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Detaches the callback.
    ///
    /// The callback is not invoked by any collection pass that starts after this returns.
    pub fn detach(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.detach(self.id);
        }
    }
}
