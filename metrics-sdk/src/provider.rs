//! Entry point of the SDK: owns the readers, the views and every meter.
use std::{
    borrow::Cow,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    callback::CallbackRegistry,
    clock::Clock,
    instrument::{InstrumentationScope, Resource},
    meter::{InstrumentCache, Meter},
    reader::MetricReader,
    view::{View, ViewRegistry},
};

/// State shared by a provider and all of its meters.
pub(crate) struct ProviderState {
    pub(crate) resource: Arc<Resource>,
    pub(crate) views: ViewRegistry,
    pub(crate) readers: Vec<MetricReader>,
    pub(crate) callbacks: Arc<CallbackRegistry>,
    pub(crate) cache: Arc<InstrumentCache>,
    pub(crate) clock: Clock,
    next_instrument_id: AtomicU64,
}

impl ProviderState {
    pub(crate) fn next_instrument_id(&self) -> u64 {
        self.next_instrument_id.fetch_add(1, Ordering::Relaxed)
    }
}

struct Inner {
    state: Arc<ProviderState>,
    meters: Mutex<HashMap<InstrumentationScope, Meter>>,
    is_shutdown: AtomicBool,
}

/// Creates meters, and ties them to a fixed set of readers.
///
/// Cloning is cheap: clones share the same meters, instruments and readers.
#[derive(Clone)]
pub struct MeterProvider {
    inner: Arc<Inner>,
}

impl MeterProvider {
    /// Creates a [`MeterProviderBuilder`].
    pub fn builder() -> MeterProviderBuilder {
        MeterProviderBuilder::default()
    }

    /// Gets the meter for the scope with the given name, and no version, schema URL or
    /// attributes.
    pub fn meter<N: Into<Cow<'static, str>>>(&self, name: N) -> Meter {
        self.meter_with_scope(InstrumentationScope::builder(name).build())
    }

    /// Gets the meter for the given scope.
    ///
    /// Identical scopes share one meter.
    pub fn meter_with_scope(&self, scope: InstrumentationScope) -> Meter {
        let mut meters = self.inner.meters.lock();
        meters
            .entry(scope)
            .or_insert_with_key(|scope| {
                debug!(scope = %scope, "created meter");
                Meter::new(scope.clone(), Arc::clone(&self.inner.state))
            })
            .clone()
    }

    /// Registers a view.
    ///
    /// Views only apply to instruments created after they are registered.
    pub fn register_view(&self, view: View) {
        self.inner.state.views.register(view);
    }

    /// Collects and exports every reader, then flushes their exporters.
    ///
    /// Returns `false` if any reader failed, or if the provider is shut down.
    pub fn force_flush(&self) -> bool {
        if self.is_shutdown() {
            return false;
        }
        self.inner.state.readers.iter().fold(true, |ok, reader| reader.force_flush() && ok)
    }

    /// Shuts down every reader.
    ///
    /// Returns `false` if any reader failed to shut down cleanly, or if the provider was already
    /// shut down.
    pub fn shutdown(&self) -> bool {
        if self.inner.is_shutdown.swap(true, Ordering::AcqRel) {
            return false;
        }
        let ok = self.inner.state.readers.iter().fold(true, |ok, reader| reader.shutdown() && ok);
        debug!(ok, readers = self.inner.state.readers.len(), "meter provider shut down");
        ok
    }

    /// Whether or not this provider has been shut down.
    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &ProviderState {
        &self.inner.state
    }
}

impl fmt::Debug for MeterProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterProvider")
            .field("resource", &self.inner.state.resource)
            .field("readers", &self.inner.state.readers)
            .field("meters", &self.inner.meters.lock().len())
            .field("is_shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Builder for a [`MeterProvider`].
#[derive(Default)]
#[must_use = "the provider is only created by `build`"]
pub struct MeterProviderBuilder {
    resource: Option<Arc<Resource>>,
    readers: Vec<MetricReader>,
    views: Vec<View>,
    clock: Option<Clock>,
}

impl MeterProviderBuilder {
    /// Sets the resource attached to every exported metric.
    ///
    /// Defaults to an empty resource.
    pub fn with_resource(mut self, resource: Arc<Resource>) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Adds a reader.
    ///
    /// Every instrument gets its own streams on every reader.
    pub fn with_reader(mut self, reader: MetricReader) -> Self {
        self.readers.push(reader);
        self
    }

    /// Adds a view.
    pub fn with_view(mut self, view: View) -> Self {
        self.views.push(view);
        self
    }

    /// Sets the clock used for measurement and collection timestamps.
    ///
    /// Defaults to [`Clock::new`].  The clock is shared with every reader.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the provider.
    pub fn build(self) -> MeterProvider {
        let clock = self.clock.unwrap_or_default();
        for reader in &self.readers {
            reader.set_clock(clock.clone());
        }

        let views = ViewRegistry::new();
        for view in self.views {
            views.register(view);
        }

        let state = ProviderState {
            resource: self.resource.unwrap_or_else(Resource::empty),
            views,
            readers: self.readers,
            callbacks: Arc::new(CallbackRegistry::new()),
            cache: Arc::new(InstrumentCache::new()),
            clock,
            next_instrument_id: AtomicU64::new(0),
        };
        debug!(readers = state.readers.len(), "built meter provider");

        MeterProvider {
            inner: Arc::new(Inner {
                state: Arc::new(state),
                meters: Mutex::new(HashMap::new()),
                is_shutdown: AtomicBool::new(false),
            }),
        }
    }
}
