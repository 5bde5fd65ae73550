//! Collected metric data.
use std::{borrow::Cow, sync::Arc};

use crate::{
    attributes::Attributes,
    exemplar::Exemplar,
    instrument::{InstrumentationScope, Resource},
};

/// Temporality of exported sums and histograms.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Temporality {
    /// Each point covers the time since the stream was created.
    Cumulative,
    /// Each point covers the time since the previous collection.
    Delta,
}

/// A single numeric point.
#[derive(Clone, Debug, PartialEq)]
pub struct NumberDataPoint {
    /// Attribute set of the series.
    pub attributes: Attributes,
    /// Start of the window covered by this point.
    pub start_time: u64,
    /// Time the point was collected.
    pub time: u64,
    /// Value of the point.
    pub value: f64,
    /// Exemplars sampled during the window.
    pub exemplars: Vec<Exemplar>,
}

/// A single explicit-bucket histogram point.
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramDataPoint {
    /// Attribute set of the series.
    pub attributes: Attributes,
    /// Start of the window covered by this point.
    pub start_time: u64,
    /// Time the point was collected.
    pub time: u64,
    /// Number of recorded values.
    pub count: u64,
    /// Sum of recorded values.
    pub sum: f64,
    /// Minimum recorded value, if known for the window.
    pub min: Option<f64>,
    /// Maximum recorded value, if known for the window.
    pub max: Option<f64>,
    /// Per-bucket counts; one more than there are bounds.
    pub bucket_counts: Vec<u64>,
    /// Upper bounds of the buckets, inclusive.
    pub bounds: Arc<[f64]>,
    /// Exemplars sampled during the window.
    pub exemplars: Vec<Exemplar>,
}

/// Aggregated data for one stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Data {
    /// A sum.
    Sum {
        /// Points, one per attribute set.
        data_points: Vec<NumberDataPoint>,
        /// Temporality of the points.
        temporality: Temporality,
        /// Whether or not the sum can only increase.
        is_monotonic: bool,
    },
    /// An explicit-bucket histogram.
    Histogram {
        /// Points, one per attribute set.
        data_points: Vec<HistogramDataPoint>,
        /// Temporality of the points.
        temporality: Temporality,
    },
    /// A last-value gauge.
    Gauge {
        /// Points, one per attribute set.
        data_points: Vec<NumberDataPoint>,
    },
}

impl Data {
    /// Number of points in this data.
    pub fn len(&self) -> usize {
        match self {
            Data::Sum { data_points, .. } | Data::Gauge { data_points } => data_points.len(),
            Data::Histogram { data_points, .. } => data_points.len(),
        }
    }

    /// Whether or not this data holds no points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric points of a sum or gauge, or `None` for a histogram.
    pub fn number_points(&self) -> Option<&[NumberDataPoint]> {
        match self {
            Data::Sum { data_points, .. } | Data::Gauge { data_points } => Some(data_points),
            Data::Histogram { .. } => None,
        }
    }

    /// Points of a histogram, or `None` for a sum or gauge.
    pub fn histogram_points(&self) -> Option<&[HistogramDataPoint]> {
        match self {
            Data::Histogram { data_points, .. } => Some(data_points),
            _ => None,
        }
    }
}

/// A metric record handed to an exporter.
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    /// Scope of the meter that created the instrument.
    pub scope: InstrumentationScope,
    /// Resource of the provider.
    pub resource: Arc<Resource>,
    /// Exported name.
    pub name: Cow<'static, str>,
    /// Exported unit.
    pub unit: Option<Cow<'static, str>>,
    /// Exported description.
    pub description: Option<Cow<'static, str>>,
    /// Aggregated data.
    pub data: Data,
}
