//! Instrument handles and their builders.
//!
//! Handles are cheap to clone, and every clone holds a reference on the underlying instrument.
//! When the last handle (and the last callback registration, for observable instruments) is
//! dropped, the instrument is torn down: its streams are unregistered from every reader and the
//! next creation with the same identity starts from scratch.
use std::{borrow::Cow, fmt, marker::PhantomData, sync::Arc, time::Duration};

use tracing::warn;

use crate::{
    attributes::{Attributes, KeyValue},
    callback::{CallbackRegistration, CallbackRegistry, Observer},
    clock::Clock,
    error::Result,
    instrument::{Advisory, Instrument, InstrumentKind},
    meter::Meter,
    staleness::{InstrumentRef, StalenessHandler},
    stream::SynchronousStream,
};

/// An object which can be converted into a `f64` representation.
///
/// Lets numeric types be passed directly to `add`, `record` and `observe`.
pub trait IntoF64 {
    /// Converts this object to its `f64` representation.
    fn into_f64(self) -> f64;
}

impl IntoF64 for f64 {
    fn into_f64(self) -> f64 {
        self
    }
}

impl IntoF64 for f32 {
    fn into_f64(self) -> f64 {
        f64::from(self)
    }
}

impl IntoF64 for i32 {
    fn into_f64(self) -> f64 {
        f64::from(self)
    }
}

impl IntoF64 for u32 {
    fn into_f64(self) -> f64 {
        f64::from(self)
    }
}

impl IntoF64 for i64 {
    fn into_f64(self) -> f64 {
        self as f64
    }
}

impl IntoF64 for u64 {
    fn into_f64(self) -> f64 {
        self as f64
    }
}

impl IntoF64 for usize {
    fn into_f64(self) -> f64 {
        self as f64
    }
}

impl IntoF64 for Duration {
    fn into_f64(self) -> f64 {
        self.as_secs_f64()
    }
}

/// Write side of a synchronous instrument: fans each measurement out to every stream built for
/// it, across every view and reader.
pub(crate) struct Writer {
    name: Cow<'static, str>,
    streams: Vec<Arc<dyn SynchronousStream>>,
    clock: Clock,
}

impl Writer {
    pub(crate) fn new(
        name: Cow<'static, str>,
        streams: Vec<Arc<dyn SynchronousStream>>,
        clock: Clock,
    ) -> Self {
        Writer { name, streams, clock }
    }

    fn record(&self, value: f64, attributes: &[KeyValue]) {
        if value.is_nan() {
            warn!(metric_name = %self.name, "dropped NaN measurement");
            return;
        }
        if self.streams.is_empty() {
            return;
        }

        let attributes = Attributes::new(attributes);
        let timestamp = self.clock.now();
        for stream in &self.streams {
            stream.record(value, &attributes, timestamp);
        }
    }
}

impl fmt::Debug for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer")
            .field("name", &self.name)
            .field("streams", &self.streams.len())
            .finish()
    }
}

/// Observe side of an asynchronous instrument: its id in the provider's callback registry.
#[derive(Debug)]
pub(crate) struct ObserverEntry {
    pub(crate) id: u64,
    pub(crate) callbacks: Arc<CallbackRegistry>,
}

/// A monotonic sum.
#[derive(Clone, Debug)]
pub struct Counter {
    _instrument: InstrumentRef,
    writer: Arc<Writer>,
}

impl Counter {
    /// Adds a non-negative amount.
    ///
    /// Negative amounts are dropped.
    pub fn add<V: IntoF64>(&self, value: V, attributes: &[KeyValue]) {
        let value = value.into_f64();
        if value < 0.0 {
            warn!(metric_name = %self.writer.name, value, "dropped negative counter increment");
            return;
        }
        self.writer.record(value, attributes);
    }
}

/// A sum that can go up and down.
#[derive(Clone, Debug)]
pub struct UpDownCounter {
    _instrument: InstrumentRef,
    writer: Arc<Writer>,
}

impl UpDownCounter {
    /// Adds an amount, which may be negative.
    pub fn add<V: IntoF64>(&self, value: V, attributes: &[KeyValue]) {
        self.writer.record(value.into_f64(), attributes);
    }
}

/// A distribution of values.
#[derive(Clone, Debug)]
pub struct Histogram {
    _instrument: InstrumentRef,
    writer: Arc<Writer>,
}

impl Histogram {
    /// Records a value.
    pub fn record<V: IntoF64>(&self, value: V, attributes: &[KeyValue]) {
        self.writer.record(value.into_f64(), attributes);
    }
}

/// A value sampled at a point in time.
#[derive(Clone, Debug)]
pub struct Gauge {
    _instrument: InstrumentRef,
    writer: Arc<Writer>,
}

impl Gauge {
    /// Records the current value.
    pub fn record<V: IntoF64>(&self, value: V, attributes: &[KeyValue]) {
        self.writer.record(value.into_f64(), attributes);
    }
}

mod sealed {
    pub trait Sealed {}
}

/// An instrument whose measurements are observed by callbacks at collection time.
///
/// This trait is sealed, and implemented by [`ObservableCounter`], [`ObservableUpDownCounter`]
/// and [`ObservableGauge`].
pub trait ObservableInstrument: sealed::Sealed {
    /// Id of the instrument, stable for as long as the instrument is alive.
    fn instrument_id(&self) -> u64;

    #[doc(hidden)]
    fn staleness(&self) -> &Arc<StalenessHandler>;
}

macro_rules! observable_instrument {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Clone, Debug)]
        pub struct $name {
            instrument: InstrumentRef,
            observer: Arc<ObserverEntry>,
        }

        impl $name {
            /// Registers a callback observing this instrument on every collection.
            ///
            /// The instrument stays alive until the callback is detached, even if every handle
            /// to it is dropped.
            pub fn register_callback<F>(&self, f: F) -> CallbackRegistration
            where
                F: Fn(&Observer) + Send + Sync + 'static,
            {
                self.observer.callbacks.register(
                    self.observer.id,
                    Arc::clone(self.instrument.handler()),
                    f,
                )
            }
        }

        impl sealed::Sealed for $name {}

        impl ObservableInstrument for $name {
            fn instrument_id(&self) -> u64 {
                self.observer.id
            }

            fn staleness(&self) -> &Arc<StalenessHandler> {
                self.instrument.handler()
            }
        }
    };
}

observable_instrument!(
    /// A monotonic sum observed by callbacks.
    ObservableCounter
);
observable_instrument!(
    /// A sum that can go up and down, observed by callbacks.
    ObservableUpDownCounter
);
observable_instrument!(
    /// A value observed by callbacks.
    ObservableGauge
);

/// Builder for a synchronous instrument.
#[must_use = "instruments are only created by `build`"]
pub struct InstrumentBuilder<'a, T> {
    meter: &'a Meter,
    name: Cow<'static, str>,
    unit: Option<Cow<'static, str>>,
    description: Option<Cow<'static, str>>,
    advisory: Advisory,
    _marker: PhantomData<T>,
}

impl<'a, T> InstrumentBuilder<'a, T> {
    pub(crate) fn new(meter: &'a Meter, name: Cow<'static, str>) -> Self {
        InstrumentBuilder {
            meter,
            name,
            unit: None,
            description: None,
            advisory: Advisory::default(),
            _marker: PhantomData,
        }
    }

    /// Sets the unit.
    pub fn with_unit<S: Into<Cow<'static, str>>>(mut self, unit: S) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets the description.
    pub fn with_description<S: Into<Cow<'static, str>>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the advisory parameters.
    ///
    /// Ignored if an instrument with the same identity already exists.
    pub fn with_advisory(mut self, advisory: Advisory) -> Self {
        self.advisory = advisory;
        self
    }

    fn instrument(self, kind: InstrumentKind) -> Result<(&'a Meter, Instrument)> {
        let instrument =
            Instrument::new(kind, self.name, self.unit, self.description, self.advisory)?;
        Ok((self.meter, instrument))
    }
}

macro_rules! synchronous_build {
    ($handle:ident, $kind:expr) => {
        impl InstrumentBuilder<'_, $handle> {
            #[doc = concat!("Builds the [`", stringify!($handle), "`].")]
            ///
            /// # Errors
            ///
            /// Fails if the name, unit or advisory parameters are invalid, or if a view sets an
            /// aggregation incompatible with the instrument.
            pub fn build(self) -> Result<$handle> {
                let (meter, instrument) = self.instrument($kind)?;
                let (instrument, writer) = meter.synchronous(instrument)?;
                Ok($handle { _instrument: instrument, writer })
            }
        }
    };
}

synchronous_build!(Counter, InstrumentKind::Counter);
synchronous_build!(UpDownCounter, InstrumentKind::UpDownCounter);
synchronous_build!(Histogram, InstrumentKind::Histogram);
synchronous_build!(Gauge, InstrumentKind::Gauge);

type BuildCallback = Box<dyn Fn(&Observer) + Send + Sync>;

/// Builder for an observable instrument.
#[must_use = "instruments are only created by `build`"]
pub struct ObservableInstrumentBuilder<'a, T> {
    inner: InstrumentBuilder<'a, T>,
    callbacks: Vec<BuildCallback>,
}

impl<'a, T> ObservableInstrumentBuilder<'a, T> {
    pub(crate) fn new(meter: &'a Meter, name: Cow<'static, str>) -> Self {
        ObservableInstrumentBuilder {
            inner: InstrumentBuilder::new(meter, name),
            callbacks: Vec::new(),
        }
    }

    /// Sets the unit.
    pub fn with_unit<S: Into<Cow<'static, str>>>(mut self, unit: S) -> Self {
        self.inner = self.inner.with_unit(unit);
        self
    }

    /// Sets the description.
    pub fn with_description<S: Into<Cow<'static, str>>>(mut self, description: S) -> Self {
        self.inner = self.inner.with_description(description);
        self
    }

    /// Sets the advisory parameters.
    ///
    /// Ignored if an instrument with the same identity already exists.
    pub fn with_advisory(mut self, advisory: Advisory) -> Self {
        self.inner = self.inner.with_advisory(advisory);
        self
    }

    /// Adds a callback observing the instrument on every collection.
    ///
    /// Callbacks given here can never be detached: they keep the instrument alive for as long as
    /// the provider lives.  Use `register_callback` on the built instrument for a detachable one.
    pub fn with_callback<F>(mut self, f: F) -> Self
    where
        F: Fn(&Observer) + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(f));
        self
    }

    fn build_parts(self, kind: InstrumentKind) -> Result<(InstrumentRef, Arc<ObserverEntry>)> {
        let callbacks = self.callbacks;
        let (meter, instrument) = self.inner.instrument(kind)?;
        let (instrument, observer) = meter.observable(instrument)?;
        for callback in callbacks {
            // Never detached; the persistent reference is held for the provider's lifetime.
            let handler = Arc::clone(instrument.handler());
            let _registration = observer.callbacks.register(observer.id, handler, callback);
        }
        Ok((instrument, observer))
    }
}

macro_rules! observable_build {
    ($handle:ident, $kind:expr) => {
        impl ObservableInstrumentBuilder<'_, $handle> {
            #[doc = concat!("Builds the [`", stringify!($handle), "`].")]
            ///
            /// # Errors
            ///
            /// Fails if the name, unit or advisory parameters are invalid, or if a view sets an
            /// aggregation incompatible with the instrument.
            pub fn build(self) -> Result<$handle> {
                let (instrument, observer) = self.build_parts($kind)?;
                Ok($handle { instrument, observer })
            }
        }
    };
}

observable_build!(ObservableCounter, InstrumentKind::AsynchronousCounter);
observable_build!(ObservableUpDownCounter, InstrumentKind::AsynchronousUpDownCounter);
observable_build!(ObservableGauge, InstrumentKind::AsynchronousGauge);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::{Data, Temporality},
        exporter::InMemoryMetricExporter,
        provider::MeterProvider,
        reader::MetricReader,
    };

    fn setup() -> (MeterProvider, MetricReader, InMemoryMetricExporter) {
        let exporter = InMemoryMetricExporter::with_temporality(Temporality::Cumulative);
        let reader = MetricReader::new(exporter.clone());
        let provider = MeterProvider::builder().with_reader(reader.clone()).build();
        (provider, reader, exporter)
    }

    fn only_value(exporter: &InMemoryMetricExporter) -> f64 {
        let batch = exporter.last_batch().expect("exported");
        assert_eq!(batch.len(), 1);
        batch[0].data.number_points().expect("number data")[0].value
    }

    #[test]
    fn test_into_f64() {
        assert_eq!(3i32.into_f64(), 3.0);
        assert_eq!(3u64.into_f64(), 3.0);
        assert_eq!(0.5f32.into_f64(), 0.5);
        assert_eq!(Duration::from_millis(1500).into_f64(), 1.5);
    }

    #[test]
    fn test_counter_drops_negative_and_nan() {
        let (provider, reader, exporter) = setup();
        let counter = provider.meter("test").counter("requests").build().expect("valid counter");
        counter.add(2, &[]);
        counter.add(-1, &[]);
        counter.add(f64::NAN, &[]);
        counter.add(0.5, &[]);

        assert!(reader.collect());
        assert_eq!(only_value(&exporter), 2.5);
    }

    #[test]
    fn test_up_down_counter_and_gauge() {
        let (provider, reader, exporter) = setup();
        let meter = provider.meter("test");
        let queue = meter.up_down_counter("queue.depth").build().expect("valid instrument");
        queue.add(5, &[]);
        queue.add(-2, &[]);
        assert!(reader.collect());
        assert_eq!(only_value(&exporter), 3.0);
        drop(queue);

        let temperature = meter.gauge("temperature").with_unit("Cel").build().expect("valid");
        temperature.record(21.5, &[]);
        temperature.record(22, &[]);
        assert!(reader.collect());
        let batch = exporter.last_batch().expect("exported");
        assert_eq!(batch[0].unit.as_deref(), Some("Cel"));
        assert!(matches!(batch[0].data, Data::Gauge { .. }));
        assert_eq!(only_value(&exporter), 22.0);
    }

    #[test]
    fn test_invalid_instruments() {
        let (provider, _reader, _exporter) = setup();
        let meter = provider.meter("test");
        assert!(meter.counter("9lives").build().is_err());
        assert!(meter
            .histogram("latency")
            .with_advisory(Advisory::default().with_explicit_bucket_boundaries(vec![2.0, 1.0]))
            .build()
            .is_err());
    }

    #[test]
    fn test_observable_with_callback() {
        let (provider, reader, exporter) = setup();
        let gauge = provider
            .meter("test")
            .observable_gauge("cpu.usage")
            .with_callback(|observer| observer.observe(0.75, &[KeyValue::new("cpu", 0)]))
            .build()
            .expect("valid instrument");

        // Build-time callbacks outlive the handle.
        drop(gauge);
        assert!(reader.collect());
        assert_eq!(only_value(&exporter), 0.75);
    }
}
