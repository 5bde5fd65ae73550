use std::sync::Arc;

use crate::data::{Data, HistogramDataPoint, Temporality};

use super::{Accumulation, Aggregator};

/// Histogram with explicit bucket boundaries.
///
/// A value lands in the first bucket whose upper bound is greater than or equal to it; values
/// above the last bound land in the overflow bucket.
#[derive(Clone, Debug, PartialEq)]
pub struct ExplicitBucketHistogram {
    boundaries: Arc<[f64]>,
    record_min_max: bool,
}

/// Aggregated state of an [`ExplicitBucketHistogram`] series.
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramSummary {
    /// Number of recorded values.
    pub count: u64,
    /// Sum of recorded values.
    pub sum: f64,
    /// Minimum recorded value.
    pub min: Option<f64>,
    /// Maximum recorded value.
    pub max: Option<f64>,
    /// Per-bucket counts, including the overflow bucket.
    pub buckets: Vec<u64>,
}

impl ExplicitBucketHistogram {
    /// Creates a histogram aggregation.
    ///
    /// Boundaries are expected to be validated already.
    pub fn new(boundaries: Vec<f64>, record_min_max: bool) -> Self {
        ExplicitBucketHistogram { boundaries: boundaries.into(), record_min_max }
    }

    /// Upper bounds of the buckets.
    pub fn boundaries(&self) -> &Arc<[f64]> {
        &self.boundaries
    }

    fn bucket_index(&self, value: f64) -> usize {
        self.boundaries.partition_point(|bound| *bound < value)
    }
}

fn min_of(left: Option<f64>, right: Option<f64>) -> Option<f64> {
    match (left, right) {
        (Some(l), Some(r)) => Some(l.min(r)),
        (l, None) => l,
        (None, r) => r,
    }
}

fn max_of(left: Option<f64>, right: Option<f64>) -> Option<f64> {
    match (left, right) {
        (Some(l), Some(r)) => Some(l.max(r)),
        (l, None) => l,
        (None, r) => r,
    }
}

impl Aggregator for ExplicitBucketHistogram {
    type Summary = HistogramSummary;

    fn initialize(&self) -> HistogramSummary {
        HistogramSummary {
            count: 0,
            sum: 0.0,
            min: None,
            max: None,
            buckets: vec![0; self.boundaries.len() + 1],
        }
    }

    fn record(&self, summary: &mut HistogramSummary, value: f64, _timestamp: u64) {
        summary.count += 1;
        summary.sum += value;
        summary.min = min_of(summary.min, Some(value));
        summary.max = max_of(summary.max, Some(value));
        summary.buckets[self.bucket_index(value)] += 1;
    }

    fn merge(&self, left: &HistogramSummary, right: &HistogramSummary) -> HistogramSummary {
        let buckets = left.buckets.iter().zip(&right.buckets).map(|(l, r)| l + r).collect();
        HistogramSummary {
            count: left.count + right.count,
            sum: left.sum + right.sum,
            min: min_of(left.min, right.min),
            max: max_of(left.max, right.max),
            buckets,
        }
    }

    fn diff(&self, current: &HistogramSummary, previous: &HistogramSummary) -> HistogramSummary {
        let buckets = current
            .buckets
            .iter()
            .zip(&previous.buckets)
            .map(|(c, p)| c.saturating_sub(*p))
            .collect();

        // The window's extremes are only known when they moved past the previous ones.
        let min = match (current.min, previous.min) {
            (Some(c), Some(p)) if c < p => Some(c),
            (Some(c), None) => Some(c),
            _ => None,
        };
        let max = match (current.max, previous.max) {
            (Some(c), Some(p)) if c > p => Some(c),
            (Some(c), None) => Some(c),
            _ => None,
        };

        HistogramSummary {
            count: current.count.saturating_sub(previous.count),
            sum: current.sum - previous.sum,
            min,
            max,
            buckets,
        }
    }

    fn to_data(
        &self,
        accumulations: Vec<Accumulation<HistogramSummary>>,
        start_time: u64,
        time: u64,
        temporality: Temporality,
    ) -> Data {
        let data_points = accumulations
            .into_iter()
            .filter(|acc| acc.summary.count > 0)
            .map(|acc| HistogramDataPoint {
                attributes: acc.attributes,
                start_time,
                time,
                count: acc.summary.count,
                sum: acc.summary.sum,
                min: acc.summary.min.filter(|_| self.record_min_max),
                max: acc.summary.max.filter(|_| self.record_min_max),
                bucket_counts: acc.summary.buckets,
                bounds: Arc::clone(&self.boundaries),
                exemplars: acc.exemplars,
            })
            .collect();

        Data::Histogram { data_points, temporality }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::attributes::Attributes;

    fn histogram() -> ExplicitBucketHistogram {
        ExplicitBucketHistogram::new(vec![0.0, 10.0, 100.0], true)
    }

    fn summary_of(agg: &ExplicitBucketHistogram, values: &[f64]) -> HistogramSummary {
        let mut summary = agg.initialize();
        for value in values {
            agg.record(&mut summary, *value, 0);
        }
        summary
    }

    #[test]
    fn test_bucket_placement() {
        let agg = histogram();
        let summary = summary_of(&agg, &[-1.0, 0.0, 0.5, 10.0, 11.0, 100.0, 1000.0]);
        assert_eq!(summary.buckets, vec![2, 2, 2, 1]);
        assert_eq!(summary.count, 7);
        assert_eq!(summary.min, Some(-1.0));
        assert_eq!(summary.max, Some(1000.0));
        assert!((summary.sum - 1120.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_diff_min_max_only_when_moved() {
        let agg = histogram();
        let previous = summary_of(&agg, &[5.0, 50.0]);
        let current = agg.merge(&previous, &summary_of(&agg, &[20.0]));
        let window = agg.diff(&current, &previous);
        assert_eq!(window.count, 1);
        assert_eq!(window.min, None);
        assert_eq!(window.max, None);

        let current = agg.merge(&previous, &summary_of(&agg, &[1.0, 60.0]));
        let window = agg.diff(&current, &previous);
        assert_eq!(window.min, Some(1.0));
        assert_eq!(window.max, Some(60.0));
    }

    #[test]
    fn test_to_data_skips_empty_and_min_max() {
        let agg = ExplicitBucketHistogram::new(vec![1.0], false);
        let data = agg.to_data(
            vec![
                Accumulation {
                    attributes: Attributes::empty(),
                    summary: agg.initialize(),
                    exemplars: vec![],
                },
                Accumulation {
                    attributes: Attributes::new(&[crate::KeyValue::new("k", 1)]),
                    summary: summary_of(&agg, &[0.5, 2.0]),
                    exemplars: vec![],
                },
            ],
            0,
            1,
            Temporality::Delta,
        );

        let points = data.histogram_points().expect("histogram");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].count, 2);
        assert_eq!(points[0].bucket_counts, vec![1, 1]);
        assert_eq!(&points[0].bounds[..], &[1.0]);
        assert_eq!(points[0].min, None);
        assert_eq!(points[0].max, None);
    }

    proptest! {
        #[test]
        fn test_diff_of_merge_recovers_window(
            a in proptest::collection::vec(-500i32..500, 0..64),
            b in proptest::collection::vec(-500i32..500, 0..64),
        ) {
            let agg = histogram();
            let a: Vec<f64> = a.into_iter().map(f64::from).collect();
            let b: Vec<f64> = b.into_iter().map(f64::from).collect();
            let first = summary_of(&agg, &a);
            let second = summary_of(&agg, &b);

            let window = agg.diff(&agg.merge(&first, &second), &first);
            prop_assert_eq!(window.count, second.count);
            prop_assert_eq!(window.sum, second.sum);
            prop_assert_eq!(window.buckets, second.buckets);
        }
    }
}
