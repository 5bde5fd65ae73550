//! Metric streams.
//!
//! A stream holds the accumulators of one instrument, as projected by one view, for one reader.
//! Synchronous streams are written to on every measurement; asynchronous streams are handed the
//! observations of a collection pass.
use std::sync::Arc;

use indexmap::IndexMap;

use crate::{
    aggregation::ResolvedAggregation,
    attributes::Attributes,
    data::{Data, Temporality},
    view::ViewProjection,
};

mod asynchronous;
mod synchronous;

pub(crate) use self::asynchronous::AsynchronousMetricStream;
pub(crate) use self::synchronous::SynchronousMetricStream;

/// Observations of one instrument during one collection pass, keyed by attribute set.
pub(crate) type Observations = IndexMap<Attributes, f64>;

/// A stream written to by measurements.
pub(crate) trait SynchronousStream: Send + Sync {
    /// Records a measurement.
    fn record(&self, value: f64, attributes: &Attributes, timestamp: u64);

    /// Produces the data of this stream at the given time.
    fn collect(&self, timestamp: u64) -> Data;
}

/// A stream fed by callback observations.
pub(crate) trait AsynchronousStream: Send + Sync {
    /// Produces the data of this stream from one pass of observations.
    fn collect(&self, observations: &Observations, timestamp: u64) -> Data;
}

/// Builds a synchronous stream for the given aggregation.
pub(crate) fn synchronous(
    aggregation: ResolvedAggregation,
    projection: &ViewProjection,
    temporality: Temporality,
    start_time: u64,
) -> Arc<dyn SynchronousStream> {
    let filter = projection.attribute_filter.clone();
    let reservoir = projection.exemplar_reservoir.clone();
    match aggregation {
        ResolvedAggregation::Sum(agg) => Arc::new(SynchronousMetricStream::new(
            agg,
            filter,
            reservoir,
            temporality,
            start_time,
        )),
        ResolvedAggregation::Histogram(agg) => Arc::new(SynchronousMetricStream::new(
            agg,
            filter,
            reservoir,
            temporality,
            start_time,
        )),
        ResolvedAggregation::LastValue(agg) => Arc::new(SynchronousMetricStream::new(
            agg,
            filter,
            reservoir,
            temporality,
            start_time,
        )),
    }
}

/// Builds an asynchronous stream for the given aggregation.
pub(crate) fn asynchronous(
    aggregation: ResolvedAggregation,
    projection: &ViewProjection,
    temporality: Temporality,
    start_time: u64,
) -> Arc<dyn AsynchronousStream> {
    let filter = projection.attribute_filter.clone();
    match aggregation {
        ResolvedAggregation::Sum(agg) => {
            Arc::new(AsynchronousMetricStream::new(agg, filter, temporality, start_time))
        }
        ResolvedAggregation::Histogram(agg) => {
            Arc::new(AsynchronousMetricStream::new(agg, filter, temporality, start_time))
        }
        ResolvedAggregation::LastValue(agg) => {
            Arc::new(AsynchronousMetricStream::new(agg, filter, temporality, start_time))
        }
    }
}
