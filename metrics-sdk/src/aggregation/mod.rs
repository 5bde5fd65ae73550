//! Aggregation algorithms.
//!
//! An [`Aggregator`] turns the raw measurements of one series into a summary, and knows how to
//! combine (`merge`) and temporally subtract (`diff`) summaries so that a stream can keep a single
//! cumulative accumulator and still produce delta points.
use crate::{
    attributes::Attributes,
    data::{Data, Temporality},
    error::{AggregationError, ConfigurationError},
    exemplar::Exemplar,
    instrument::{validate_boundaries, Instrument, InstrumentKind},
};

mod histogram;
mod last_value;
mod sum;

pub use self::histogram::{ExplicitBucketHistogram, HistogramSummary};
pub use self::last_value::LastValue;
pub use self::sum::Sum;

/// Bucket boundaries used by the default histogram aggregation.
pub const DEFAULT_HISTOGRAM_BOUNDARIES: &[f64] = &[
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0, 7500.0,
    10000.0,
];

/// The summary of one series, ready to be converted to a data point.
#[derive(Clone, Debug)]
pub struct Accumulation<S> {
    /// Attribute set of the series.
    pub attributes: Attributes,
    /// Aggregated state of the series.
    pub summary: S,
    /// Exemplars sampled for the series.
    pub exemplars: Vec<Exemplar>,
}

/// An aggregation algorithm.
pub trait Aggregator: Send + Sync + 'static {
    /// Per-series aggregated state.
    type Summary: Clone + Send + 'static;

    /// Creates an empty summary.
    fn initialize(&self) -> Self::Summary;

    /// Records a measurement into a summary.
    fn record(&self, summary: &mut Self::Summary, value: f64, timestamp: u64);

    /// Combines two summaries.
    fn merge(&self, left: &Self::Summary, right: &Self::Summary) -> Self::Summary;

    /// Subtracts `previous` from `current`, producing the summary of the window in between.
    fn diff(&self, current: &Self::Summary, previous: &Self::Summary) -> Self::Summary;

    /// Converts summaries to exportable data.
    fn to_data(
        &self,
        accumulations: Vec<Accumulation<Self::Summary>>,
        start_time: u64,
        time: u64,
        temporality: Temporality,
    ) -> Data;
}

/// Aggregation selected for a stream.
///
/// This is the user-facing configuration: it is resolved against an instrument's kind when a
/// stream is built.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Aggregation {
    /// The default aggregation for the instrument kind.
    #[default]
    Default,
    /// Discard every measurement; no stream is built.
    Drop,
    /// Arithmetic sum, monotonic when the instrument kind is.
    Sum,
    /// Most recent measurement.
    LastValue,
    /// Histogram with explicit bucket boundaries.
    ExplicitBucketHistogram {
        /// Upper bounds of the buckets, finite and strictly ascending.
        boundaries: Vec<f64>,
        /// Whether or not to report the minimum and maximum recorded values.
        record_min_max: bool,
    },
}

impl Aggregation {
    fn name(&self) -> &'static str {
        match self {
            Aggregation::Default => "default",
            Aggregation::Drop => "drop",
            Aggregation::Sum => "sum",
            Aggregation::LastValue => "last_value",
            Aggregation::ExplicitBucketHistogram { .. } => "explicit_bucket_histogram",
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigurationError> {
        match self {
            Aggregation::ExplicitBucketHistogram { boundaries, .. } => {
                validate_boundaries(boundaries)
            }
            _ => Ok(()),
        }
    }

    /// Resolves this aggregation for the given instrument.
    ///
    /// Returns `Ok(None)` for [`Aggregation::Drop`].
    pub(crate) fn resolve(
        &self,
        instrument: &Instrument,
    ) -> Result<Option<ResolvedAggregation>, AggregationError> {
        let kind = instrument.kind();
        let resolved = match self {
            Aggregation::Default => default_aggregation(instrument),
            Aggregation::Drop => return Ok(None),
            Aggregation::Sum => ResolvedAggregation::Sum(Sum::new(kind.is_monotonic())),
            Aggregation::LastValue => ResolvedAggregation::LastValue(LastValue),
            Aggregation::ExplicitBucketHistogram { boundaries, record_min_max } => {
                if kind.is_asynchronous() {
                    return Err(AggregationError::IncompatibleKind {
                        aggregation: self.name(),
                        kind,
                    });
                }
                ResolvedAggregation::Histogram(ExplicitBucketHistogram::new(
                    boundaries.clone(),
                    *record_min_max,
                ))
            }
        };

        Ok(Some(resolved))
    }
}

/// An aggregation bound to a concrete algorithm.
#[derive(Clone, Debug)]
pub(crate) enum ResolvedAggregation {
    Sum(Sum),
    Histogram(ExplicitBucketHistogram),
    LastValue(LastValue),
}

/// Default aggregation for an instrument, by kind.
fn default_aggregation(instrument: &Instrument) -> ResolvedAggregation {
    match instrument.kind() {
        InstrumentKind::Counter | InstrumentKind::AsynchronousCounter => {
            ResolvedAggregation::Sum(Sum::new(true))
        }
        InstrumentKind::UpDownCounter | InstrumentKind::AsynchronousUpDownCounter => {
            ResolvedAggregation::Sum(Sum::new(false))
        }
        InstrumentKind::Histogram => {
            let boundaries = instrument
                .advisory()
                .explicit_bucket_boundaries
                .clone()
                .unwrap_or_else(|| DEFAULT_HISTOGRAM_BOUNDARIES.to_vec());
            ResolvedAggregation::Histogram(ExplicitBucketHistogram::new(boundaries, true))
        }
        InstrumentKind::Gauge | InstrumentKind::AsynchronousGauge => {
            ResolvedAggregation::LastValue(LastValue)
        }
    }
}
