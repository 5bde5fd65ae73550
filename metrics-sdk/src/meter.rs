//! Meters and the instrument identity cache.
use std::{
    borrow::Cow,
    fmt,
    hash::BuildHasher,
    sync::{Arc, Weak},
    thread::available_parallelism,
};

use hashbrown::{DefaultHashBuilder, HashMap};
use parking_lot::RwLock;
use tracing::debug;

use crate::{
    aggregation::ResolvedAggregation,
    callback::{BatchObserver, CallbackRegistration},
    data::Temporality,
    error::Result,
    exporter::InstrumentMetadata,
    instrument::{Instrument, InstrumentId, InstrumentationScope},
    instruments::{
        Counter, Gauge, Histogram, InstrumentBuilder, ObservableCounter, ObservableGauge,
        ObservableInstrument, ObservableInstrumentBuilder, ObservableUpDownCounter, ObserverEntry,
        UpDownCounter, Writer,
    },
    provider::ProviderState,
    reader::{MetricReader, WeakMetricReader},
    registry::{RegisteredStream, StreamId, StreamSource},
    staleness::{InstrumentRef, StalenessHandler},
    stream,
    view::ViewProjection,
};

type CacheKey = (InstrumentationScope, InstrumentId);

#[derive(Clone)]
enum CachedInstrument {
    Writer(Arc<Writer>),
    Observer(Arc<ObserverEntry>),
}

#[derive(Clone)]
struct CacheEntry {
    handler: Arc<StalenessHandler>,
    instrument: CachedInstrument,
}

/// Live instruments of a provider, keyed by scope and instrument identity.
///
/// The cache holds no reference on its entries: an entry is removed by its instrument's on-stale
/// callback.  An entry may briefly outlive its instrument, between the handler going stale and the
/// callback taking the shard lock; lookups treat such an entry as absent.
pub(crate) struct InstrumentCache {
    shards: Vec<RwLock<HashMap<CacheKey, CacheEntry>>>,
    shard_mask: usize,
    hasher: DefaultHashBuilder,
}

impl InstrumentCache {
    pub(crate) fn new() -> Self {
        let shard_count =
            available_parallelism().map_or(1, usize::from).max(1).next_power_of_two();
        let shards = (0..shard_count).map(|_| RwLock::new(HashMap::new())).collect();
        InstrumentCache {
            shards,
            shard_mask: shard_count - 1,
            hasher: DefaultHashBuilder::default(),
        }
    }

    fn shard(&self, key: &CacheKey) -> &RwLock<HashMap<CacheKey, CacheEntry>> {
        let hash = self.hasher.hash_one(key) as usize;
        &self.shards[hash & self.shard_mask]
    }

    /// Gets the entry for the given key, or builds it, acquiring a transient reference either way.
    ///
    /// The build runs under the shard's write lock, so a lookup can never race with the creation
    /// or removal of the same identity.
    fn get_or_create<F>(&self, key: CacheKey, build: F) -> Result<(InstrumentRef, CachedInstrument)>
    where
        F: FnOnce() -> Result<CacheEntry>,
    {
        let shard = self.shard(&key);

        if let Some(entry) = shard.read().get(&key) {
            if entry.handler.try_acquire(false) {
                return Ok(adopt(entry));
            }
        }

        let mut shard_write = shard.write();
        if let Some(entry) = shard_write.get(&key) {
            if entry.handler.try_acquire(false) {
                return Ok(adopt(entry));
            }
        }

        // Absent, or stale and awaiting removal: either way a fresh instrument replaces it.
        let entry = build()?;
        entry.handler.acquire(false);
        let acquired = adopt(&entry);
        shard_write.insert(key, entry);
        Ok(acquired)
    }

    /// Removes the entry for the given key, if it still belongs to the given handler.
    fn remove(&self, key: &CacheKey, handler: &Weak<StalenessHandler>) -> bool {
        let mut shard_write = self.shard(key).write();
        match shard_write.get(key) {
            Some(entry) if Arc::as_ptr(&entry.handler) == handler.as_ptr() => {
                shard_write.remove(key);
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }
}

fn adopt(entry: &CacheEntry) -> (InstrumentRef, CachedInstrument) {
    (InstrumentRef::adopt(Arc::clone(&entry.handler)), entry.instrument.clone())
}

impl fmt::Debug for InstrumentCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentCache").field("shards", &self.shards.len()).finish()
    }
}

/// A stream to build: one projection of the instrument on one reader.
struct StreamPlan {
    reader: MetricReader,
    projection: ViewProjection,
    temporality: Temporality,
    aggregation: ResolvedAggregation,
}

/// Creates instruments for one instrumentation scope.
///
/// Creating an instrument with the same identity as a live one (same kind, name, unit and
/// description, within the same scope) returns a handle to the live instrument.
#[derive(Clone)]
pub struct Meter {
    scope: InstrumentationScope,
    state: Arc<ProviderState>,
}

impl Meter {
    pub(crate) fn new(scope: InstrumentationScope, state: Arc<ProviderState>) -> Self {
        Meter { scope, state }
    }

    /// Scope of this meter.
    pub fn scope(&self) -> &InstrumentationScope {
        &self.scope
    }

    /// Creates a builder for a [`Counter`].
    pub fn counter<N: Into<Cow<'static, str>>>(&self, name: N) -> InstrumentBuilder<'_, Counter> {
        InstrumentBuilder::new(self, name.into())
    }

    /// Creates a builder for an [`UpDownCounter`].
    pub fn up_down_counter<N: Into<Cow<'static, str>>>(
        &self,
        name: N,
    ) -> InstrumentBuilder<'_, UpDownCounter> {
        InstrumentBuilder::new(self, name.into())
    }

    /// Creates a builder for a [`Histogram`].
    pub fn histogram<N: Into<Cow<'static, str>>>(
        &self,
        name: N,
    ) -> InstrumentBuilder<'_, Histogram> {
        InstrumentBuilder::new(self, name.into())
    }

    /// Creates a builder for a [`Gauge`].
    pub fn gauge<N: Into<Cow<'static, str>>>(&self, name: N) -> InstrumentBuilder<'_, Gauge> {
        InstrumentBuilder::new(self, name.into())
    }

    /// Creates a builder for an [`ObservableCounter`].
    pub fn observable_counter<N: Into<Cow<'static, str>>>(
        &self,
        name: N,
    ) -> ObservableInstrumentBuilder<'_, ObservableCounter> {
        ObservableInstrumentBuilder::new(self, name.into())
    }

    /// Creates a builder for an [`ObservableUpDownCounter`].
    pub fn observable_up_down_counter<N: Into<Cow<'static, str>>>(
        &self,
        name: N,
    ) -> ObservableInstrumentBuilder<'_, ObservableUpDownCounter> {
        ObservableInstrumentBuilder::new(self, name.into())
    }

    /// Creates a builder for an [`ObservableGauge`].
    pub fn observable_gauge<N: Into<Cow<'static, str>>>(
        &self,
        name: N,
    ) -> ObservableInstrumentBuilder<'_, ObservableGauge> {
        ObservableInstrumentBuilder::new(self, name.into())
    }

    /// Registers one callback observing several instruments in the same collection pass.
    ///
    /// Every instrument stays alive until the callback is detached.
    pub fn batch_observe<F>(
        &self,
        instruments: &[&dyn ObservableInstrument],
        f: F,
    ) -> CallbackRegistration
    where
        F: Fn(&BatchObserver) + Send + Sync + 'static,
    {
        let instruments = instruments
            .iter()
            .map(|instrument| (instrument.instrument_id(), Arc::clone(instrument.staleness())))
            .collect();
        self.state.callbacks.register_batch(instruments, f)
    }

    pub(crate) fn synchronous(
        &self,
        instrument: Instrument,
    ) -> Result<(InstrumentRef, Arc<Writer>)> {
        let key = (self.scope.clone(), instrument.id().clone());
        let build = || self.build_synchronous(key.clone(), instrument);
        let (instrument_ref, cached) = self.state.cache.get_or_create(key.clone(), build)?;
        match cached {
            CachedInstrument::Writer(writer) => Ok((instrument_ref, writer)),
            // Identity includes the kind, and only synchronous kinds build writers.
            CachedInstrument::Observer(_) => {
                unreachable!("synchronous instrument cached as observer")
            }
        }
    }

    pub(crate) fn observable(
        &self,
        instrument: Instrument,
    ) -> Result<(InstrumentRef, Arc<ObserverEntry>)> {
        let key = (self.scope.clone(), instrument.id().clone());
        let build = || self.build_observable(key.clone(), instrument);
        let (instrument_ref, cached) = self.state.cache.get_or_create(key.clone(), build)?;
        match cached {
            CachedInstrument::Observer(observer) => Ok((instrument_ref, observer)),
            CachedInstrument::Writer(_) => unreachable!("observable instrument cached as writer"),
        }
    }

    /// Resolves every stream the instrument needs, before anything is registered, so that a
    /// configuration error leaves no trace behind.
    fn plan(&self, instrument: &Instrument) -> Result<Vec<StreamPlan>> {
        let projections = self
            .state
            .views
            .find(instrument, &self.scope)
            .unwrap_or_else(|| vec![ViewProjection::identity(instrument)]);
        let metadata = InstrumentMetadata::new(instrument, &self.scope);

        let mut plans = Vec::new();
        for projection in projections {
            for reader in self.state.readers.iter().filter(|r| !r.is_shutdown()) {
                let exporter = reader.exporter();
                let Some(temporality) = exporter.temporality(&metadata) else {
                    continue;
                };

                let aggregation = match &projection.aggregation {
                    Some(aggregation) => aggregation.clone(),
                    None => {
                        let aggregation = exporter.default_aggregation(instrument.kind());
                        aggregation.validate()?;
                        aggregation
                    }
                };
                let Some(aggregation) = aggregation.resolve(instrument)? else {
                    continue;
                };

                plans.push(StreamPlan {
                    reader: reader.clone(),
                    projection: projection.clone(),
                    temporality,
                    aggregation,
                });
            }
        }
        Ok(plans)
    }

    fn registered(&self, plan: &StreamPlan, source: StreamSource) -> RegisteredStream {
        RegisteredStream {
            scope: self.scope.clone(),
            resource: Arc::clone(&self.state.resource),
            name: plan.projection.name.clone(),
            unit: plan.projection.unit.clone(),
            description: plan.projection.description.clone(),
            source,
        }
    }

    fn build_synchronous(&self, key: CacheKey, instrument: Instrument) -> Result<CacheEntry> {
        let plans = self.plan(&instrument)?;
        let start_time = self.state.clock.now();

        let mut streams = Vec::with_capacity(plans.len());
        let mut registrations = Vec::with_capacity(plans.len());
        for plan in plans {
            let stream = stream::synchronous(
                plan.aggregation.clone(),
                &plan.projection,
                plan.temporality,
                start_time,
            );
            let source = StreamSource::Synchronous(Arc::clone(&stream));
            if let Some(id) = plan.reader.register(self.registered(&plan, source)) {
                streams.push(stream);
                registrations.push((plan.reader.downgrade(), id));
            }
        }

        let writer = Arc::new(Writer::new(
            Cow::Owned(instrument.name().to_string()),
            streams,
            self.state.clock.clone(),
        ));
        let handler = self.on_stale(key, &instrument, registrations);
        Ok(CacheEntry { handler, instrument: CachedInstrument::Writer(writer) })
    }

    fn build_observable(&self, key: CacheKey, instrument: Instrument) -> Result<CacheEntry> {
        let plans = self.plan(&instrument)?;
        let start_time = self.state.clock.now();
        let observer = Arc::new(ObserverEntry {
            id: self.state.next_instrument_id(),
            callbacks: Arc::clone(&self.state.callbacks),
        });

        let mut registrations = Vec::with_capacity(plans.len());
        for plan in plans {
            let stream = stream::asynchronous(
                plan.aggregation.clone(),
                &plan.projection,
                plan.temporality,
                start_time,
            );
            let source = StreamSource::Asynchronous { stream, observer: Arc::clone(&observer) };
            if let Some(id) = plan.reader.register(self.registered(&plan, source)) {
                registrations.push((plan.reader.downgrade(), id));
            }
        }

        let handler = self.on_stale(key, &instrument, registrations);
        Ok(CacheEntry { handler, instrument: CachedInstrument::Observer(observer) })
    }

    /// Creates the instrument's staleness handler, wired to tear the instrument down.
    ///
    /// The teardown holds its readers weakly: a reader owns the streams that can keep the handler
    /// alive.
    fn on_stale(
        &self,
        key: CacheKey,
        instrument: &Instrument,
        registrations: Vec<(WeakMetricReader, StreamId)>,
    ) -> Arc<StalenessHandler> {
        debug!(
            scope = %self.scope,
            metric_name = instrument.name(),
            instrument_kind = ?instrument.kind(),
            streams = registrations.len(),
            "created instrument"
        );

        let handler = Arc::new(StalenessHandler::new());
        let weak_handler = Arc::downgrade(&handler);
        let cache = Arc::downgrade(&self.state.cache);
        handler.on_stale(move || {
            if let Some(cache) = cache.upgrade() {
                cache.remove(&key, &weak_handler);
            }
            for (reader, id) in &registrations {
                if let Some(reader) = reader.upgrade() {
                    reader.unregister(*id);
                }
            }
            debug!(
                scope = %key.0,
                metric_name = %key.1.name,
                streams = registrations.len(),
                "instrument went stale, streams unregistered"
            );
        });
        handler
    }
}

impl fmt::Debug for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Meter").field("scope", &self.scope).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregation::Aggregation,
        data::{Data, Temporality},
        exporter::InMemoryMetricExporter,
        instrument::InstrumentKind,
        provider::MeterProvider,
        test_util::MockExporter,
    };

    fn provider() -> (MeterProvider, MetricReader) {
        let reader = MetricReader::new(InMemoryMetricExporter::with_temporality(
            Temporality::Cumulative,
        ));
        let provider = MeterProvider::builder().with_reader(reader.clone()).build();
        (provider, reader)
    }

    #[test]
    fn test_identity_sharing() {
        let (provider, reader) = provider();
        let meter = provider.meter("test");
        let a = meter.counter("requests").with_unit("1").build().expect("valid");
        let b = meter.counter("requests").with_unit("1").build().expect("valid");
        assert_eq!(provider.state().cache.len(), 1);
        assert_eq!(reader.stream_count(), 1);

        // A different unit is a different instrument.
        let c = meter.counter("requests").with_unit("By").build().expect("valid");
        assert_eq!(provider.state().cache.len(), 2);

        // So is the same name in another scope.
        let d = provider.meter("other").counter("requests").with_unit("1").build().expect("valid");
        assert_eq!(provider.state().cache.len(), 3);
        drop((a, b, c, d));
    }

    #[test]
    fn test_stale_entry_is_removed() {
        let (provider, reader) = provider();
        let meter = provider.meter("test");
        let a = meter.histogram("latency").build().expect("valid");
        let b = a.clone();
        drop(a);
        assert_eq!(provider.state().cache.len(), 1);
        drop(b);
        assert_eq!(provider.state().cache.len(), 0);
        assert_eq!(reader.stream_count(), 0);
    }

    #[test]
    fn test_stale_entry_is_replaced() {
        let cache = InstrumentCache::new();
        let scope = InstrumentationScope::builder("test").build();
        let instrument = Instrument::new(
            crate::InstrumentKind::Counter,
            "requests".into(),
            None,
            None,
            Default::default(),
        )
        .expect("valid");
        let key: CacheKey = (scope, instrument.id().clone());
        let writer = Arc::new(Writer::new("requests".into(), Vec::new(), crate::Clock::new()));

        let stale = Arc::new(StalenessHandler::new());
        stale.check_staleness();
        cache.shard(&key).write().insert(
            key.clone(),
            CacheEntry {
                handler: Arc::clone(&stale),
                instrument: CachedInstrument::Writer(Arc::clone(&writer)),
            },
        );

        let fresh = Arc::new(StalenessHandler::new());
        let (instrument_ref, _) = cache
            .get_or_create(key.clone(), || {
                Ok(CacheEntry {
                    handler: Arc::clone(&fresh),
                    instrument: CachedInstrument::Writer(writer),
                })
            })
            .expect("builds");
        assert!(Arc::ptr_eq(instrument_ref.handler(), &fresh));

        // The stale handler's late removal leaves the fresh entry alone.
        assert!(!cache.remove(&key, &Arc::downgrade(&stale)));
        assert_eq!(cache.len(), 1);
        assert!(cache.remove(&key, &Arc::downgrade(&fresh)));
    }

    #[test]
    fn test_reader_without_temporality_gets_no_stream() {
        let mut exporter = MockExporter::new();
        exporter.expect_temporality().return_const(None::<Temporality>);
        let skipping = MetricReader::new(exporter);
        let exporting = MetricReader::new(InMemoryMetricExporter::with_temporality(
            Temporality::Cumulative,
        ));
        let provider = MeterProvider::builder()
            .with_reader(skipping.clone())
            .with_reader(exporting.clone())
            .build();

        let counter = provider.meter("test").counter("requests").build().expect("valid");
        assert_eq!(skipping.stream_count(), 0);
        assert_eq!(exporting.stream_count(), 1);
        drop(counter);
    }

    #[test]
    fn test_exporter_default_aggregation() {
        let mut exporter = MockExporter::new();
        exporter.expect_temporality().return_const(Some(Temporality::Cumulative));
        exporter.expect_default_aggregation().returning(|kind| match kind {
            InstrumentKind::Histogram => Aggregation::Sum,
            InstrumentKind::Gauge => Aggregation::Drop,
            _ => Aggregation::Default,
        });
        exporter
            .expect_export()
            .withf(|batch| {
                batch.len() == 1
                    && batch[0].name == "latency"
                    && matches!(&batch[0].data, Data::Sum { .. })
                    && batch[0].data.number_points().map(|p| p[0].value) == Some(7.0)
            })
            .times(1)
            .return_const(true);

        let reader = MetricReader::new(exporter);
        let provider = MeterProvider::builder().with_reader(reader.clone()).build();
        let meter = provider.meter("test");
        let latency = meter.histogram("latency").build().expect("valid");
        let temperature = meter.gauge("temperature").build().expect("valid");
        assert_eq!(reader.stream_count(), 1);

        latency.record(3, &[]);
        latency.record(4, &[]);
        temperature.record(20, &[]);
        assert!(reader.collect());
    }

    #[test]
    fn test_observable_instruments_do_not_keep_readers_alive() {
        let (provider, reader) = provider();
        let weak = reader.downgrade();
        let gauge = provider
            .meter("test")
            .observable_gauge("memory.usage")
            .with_callback(|observer| observer.observe(1, &[]))
            .build()
            .expect("valid");
        assert_eq!(reader.stream_count(), 1);

        drop(gauge);
        drop(provider);
        drop(reader);
        assert!(weak.upgrade().is_none());
    }
}
