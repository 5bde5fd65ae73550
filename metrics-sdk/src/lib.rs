//! The core of a pull-based metrics SDK: instruments, aggregation, views and collection.
//!
//! # Overview
//!
//! A [`MeterProvider`] owns a fixed set of [`MetricReader`]s and a registry of [`View`]s.  Meters
//! obtained from the provider create instruments, and every instrument fans its measurements out
//! to one stream per matching view (or one identity stream, if no view matches) on every reader.
//! Each stream aggregates measurements per attribute set, and readers collect their streams on
//! demand, with the temporality their exporter asks for.
//!
//! ## Instrument identity
//!
//! Within a meter, an instrument is identified by its kind, name, unit and description.  Creating
//! an instrument with the identity of a live one returns a handle to the existing instrument, so
//! the measurements of both handles land in the same streams.  Advisory parameters are not part
//! of the identity: the first creation wins.
//!
//! ## Lifetimes
//!
//! There is no explicit way to close an instrument.  Each handle holds a reference on it, as does
//! every observable callback feeding it.  When the last reference goes away, the instrument goes
//! stale: its streams are unregistered from every reader, and creating it again starts from
//! scratch.
//!
//! # Usage
//!
//! ```
//! use metrics_sdk::{
//!     InMemoryMetricExporter, KeyValue, MeterProvider, MetricReader, Temporality,
//! };
//!
//! let exporter = InMemoryMetricExporter::with_temporality(Temporality::Delta);
//! let reader = MetricReader::new(exporter.clone());
//! let provider = MeterProvider::builder().with_reader(reader.clone()).build();
//!
//! let meter = provider.meter("checkout");
//! let orders = meter.counter("orders").with_unit("1").build().expect("valid counter");
//! orders.add(3, &[KeyValue::new("region", "eu")]);
//!
//! assert!(reader.collect());
//! let batch = exporter.last_batch().expect("exported");
//! assert_eq!(batch[0].name, "orders");
//! ```
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

pub mod aggregation;
pub use self::aggregation::{Aggregation, Aggregator};

mod attributes;
pub use self::attributes::{AttributeFilter, Attributes, KeyValue, SharedString, Value};

mod callback;
pub use self::callback::{BatchObserver, CallbackRegistration, Observer};

mod clock;
pub use self::clock::Clock;

mod data;
pub use self::data::{Data, HistogramDataPoint, Metric, NumberDataPoint, Temporality};

mod error;
pub use self::error::{AggregationError, ConfigurationError, Error, Result};

mod exemplar;
pub use self::exemplar::{Exemplar, ExemplarReservoir, ExemplarReservoirFactory, FixedSizeReservoir};

mod exporter;
pub use self::exporter::{
    InMemoryMetricExporter, InstrumentMetadata, LoggingMetricExporter, MetricExporter,
};

mod instrument;
pub use self::instrument::{
    Advisory, Instrument, InstrumentId, InstrumentKind, InstrumentationScope,
    InstrumentationScopeBuilder, Resource,
};

mod instruments;
pub use self::instruments::{
    Counter, Gauge, Histogram, InstrumentBuilder, IntoF64, ObservableCounter, ObservableGauge,
    ObservableInstrument, ObservableInstrumentBuilder, ObservableUpDownCounter, UpDownCounter,
};

mod meter;
pub use self::meter::Meter;

mod provider;
pub use self::provider::{MeterProvider, MeterProviderBuilder};

mod reader;
pub use self::reader::{MetricReader, MetricReaderBuilder};

mod registry;

mod staleness;
pub use self::staleness::StalenessHandler;

mod stream;

#[cfg(test)]
mod test_util;

mod view;
pub use self::view::{
    NamePattern, SelectionCriteria, View, ViewBuilder, ViewProjection, ViewRegistry,
};
