//! Exporter boundary.
//!
//! A [`MetricReader`](crate::MetricReader) hands every collected batch to a [`MetricExporter`].
//! The exporter also decides, once per stream at registration time, which temporality that reader
//! wants for an instrument and which aggregation to use when no view sets one.
use crate::{
    aggregation::Aggregation,
    data::{Metric, Temporality},
    instrument::{Instrument, InstrumentKind, InstrumentationScope},
};

mod in_memory;
mod logging;

pub use self::in_memory::InMemoryMetricExporter;
pub use self::logging::LoggingMetricExporter;

/// Description of an instrument about to get a stream on a reader.
#[derive(Clone, Debug, PartialEq)]
pub struct InstrumentMetadata {
    /// Kind of the instrument.
    pub kind: InstrumentKind,
    /// Name of the instrument.
    pub name: String,
    /// Unit of the instrument.
    pub unit: Option<String>,
    /// Description of the instrument.
    pub description: Option<String>,
    /// Scope of the meter that created the instrument.
    pub scope: InstrumentationScope,
}

impl InstrumentMetadata {
    pub(crate) fn new(instrument: &Instrument, scope: &InstrumentationScope) -> Self {
        InstrumentMetadata {
            kind: instrument.kind(),
            name: instrument.name().to_string(),
            unit: instrument.unit().map(str::to_string),
            description: instrument.description().map(str::to_string),
            scope: scope.clone(),
        }
    }
}

/// Destination of collected metrics.
pub trait MetricExporter: Send + Sync {
    /// Temporality this exporter wants for the given instrument.
    ///
    /// `None` means the instrument is not exported at all, and no stream is created for it on
    /// this reader.
    fn temporality(&self, metadata: &InstrumentMetadata) -> Option<Temporality>;

    /// Aggregation to use for an instrument kind when no view sets one.
    fn default_aggregation(&self, _kind: InstrumentKind) -> Aggregation {
        Aggregation::Default
    }

    /// Exports a batch of metrics, returning whether or not it succeeded.
    fn export(&self, batch: Vec<Metric>) -> bool;

    /// Flushes any buffered batches.
    fn force_flush(&self) -> bool {
        true
    }

    /// Shuts the exporter down.
    fn shutdown(&self) -> bool {
        true
    }
}
