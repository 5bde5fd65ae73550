use std::fmt;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::{
    aggregation::{Accumulation, Aggregator},
    attributes::{AttributeFilter, Attributes},
    data::{Data, Temporality},
};

use super::{AsynchronousStream, Observations};

struct State<S> {
    // Summaries of the last pass, kept for delta readers only.
    previous: IndexMap<Attributes, S>,
    last_collect: u64,
}

/// A stream built from the observations made by callbacks during each collection pass.
///
/// Observations are already cumulative (or, for gauges, instantaneous).  A delta reader gets the
/// difference with the previous pass; a series missing from the previous pass counts as zero.
pub(crate) struct AsynchronousMetricStream<A: Aggregator> {
    aggregator: A,
    filter: Option<AttributeFilter>,
    temporality: Temporality,
    start_time: u64,
    state: Mutex<State<A::Summary>>,
}

impl<A: Aggregator> AsynchronousMetricStream<A> {
    pub(crate) fn new(
        aggregator: A,
        filter: Option<AttributeFilter>,
        temporality: Temporality,
        start_time: u64,
    ) -> Self {
        AsynchronousMetricStream {
            aggregator,
            filter,
            temporality,
            start_time,
            state: Mutex::new(State { previous: IndexMap::new(), last_collect: start_time }),
        }
    }

    fn aggregate(
        &self,
        observations: &Observations,
        timestamp: u64,
    ) -> IndexMap<Attributes, A::Summary> {
        let mut current = IndexMap::with_capacity(observations.len());
        for (attributes, value) in observations {
            // Sets that collapse onto the same filtered set are merged.
            let attributes = match &self.filter {
                Some(filter) => filter.apply(attributes).0,
                None => attributes.clone(),
            };
            let summary =
                current.entry(attributes).or_insert_with(|| self.aggregator.initialize());
            self.aggregator.record(summary, *value, timestamp);
        }
        current
    }
}

impl<A: Aggregator> AsynchronousStream for AsynchronousMetricStream<A> {
    fn collect(&self, observations: &Observations, timestamp: u64) -> Data {
        let current = self.aggregate(observations, timestamp);

        let mut state = self.state.lock();
        let (accumulations, start_time) = match self.temporality {
            Temporality::Cumulative => {
                let accumulations = current
                    .into_iter()
                    .map(|(attributes, summary)| Accumulation {
                        attributes,
                        summary,
                        exemplars: Vec::new(),
                    })
                    .collect();
                (accumulations, self.start_time)
            }
            Temporality::Delta => {
                let accumulations = current
                    .iter()
                    .map(|(attributes, summary)| Accumulation {
                        attributes: attributes.clone(),
                        summary: match state.previous.get(attributes) {
                            Some(previous) => self.aggregator.diff(summary, previous),
                            None => summary.clone(),
                        },
                        exemplars: Vec::new(),
                    })
                    .collect();
                // Series absent from this pass drop out of the baseline, so they restart from
                // zero if they are observed again.
                state.previous = current;
                (accumulations, state.last_collect)
            }
        };
        state.last_collect = timestamp;
        drop(state);

        self.aggregator.to_data(accumulations, start_time, timestamp, self.temporality)
    }
}

impl<A: Aggregator> fmt::Debug for AsynchronousMetricStream<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsynchronousMetricStream")
            .field("temporality", &self.temporality)
            .field("start_time", &self.start_time)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregation::{LastValue, Sum},
        attributes::KeyValue,
    };

    fn observations(pairs: &[(&'static str, f64)]) -> Observations {
        pairs
            .iter()
            .map(|(host, value)| (Attributes::new(&[KeyValue::new("host", *host)]), *value))
            .collect()
    }

    fn values(data: &Data) -> Vec<(String, f64)> {
        data.number_points()
            .expect("number data")
            .iter()
            .map(|p| (p.attributes.to_string(), p.value))
            .collect()
    }

    #[test]
    fn test_cumulative_passes_through() {
        let stream =
            AsynchronousMetricStream::new(Sum::new(true), None, Temporality::Cumulative, 0);
        let data = stream.collect(&observations(&[("a", 10.0)]), 1);
        assert_eq!(values(&data), vec![("{host=a}".to_string(), 10.0)]);

        let data = stream.collect(&observations(&[("a", 25.0)]), 2);
        assert_eq!(values(&data), vec![("{host=a}".to_string(), 25.0)]);
        assert_eq!(data.number_points().expect("sum")[0].start_time, 0);
    }

    #[test]
    fn test_delta_diffs_against_previous_pass() {
        let stream = AsynchronousMetricStream::new(Sum::new(true), None, Temporality::Delta, 0);
        let data = stream.collect(&observations(&[("a", 10.0), ("b", 4.0)]), 1);
        assert_eq!(
            values(&data),
            vec![("{host=a}".to_string(), 10.0), ("{host=b}".to_string(), 4.0)]
        );

        // `b` goes missing for a pass.
        let data = stream.collect(&observations(&[("a", 25.0)]), 2);
        assert_eq!(values(&data), vec![("{host=a}".to_string(), 15.0)]);
        assert_eq!(data.number_points().expect("sum")[0].start_time, 1);

        // When it comes back, it is diffed against zero, not its stale value.
        let data = stream.collect(&observations(&[("a", 25.0), ("b", 6.0)]), 3);
        assert_eq!(
            values(&data),
            vec![("{host=a}".to_string(), 0.0), ("{host=b}".to_string(), 6.0)]
        );
    }

    #[test]
    fn test_filter_merges_collapsed_sets() {
        let stream = AsynchronousMetricStream::new(
            Sum::new(false),
            Some(AttributeFilter::new(Vec::<String>::new())),
            Temporality::Cumulative,
            0,
        );
        let data = stream.collect(&observations(&[("a", 1.0), ("b", 2.0)]), 1);
        assert_eq!(values(&data), vec![("{}".to_string(), 3.0)]);
    }

    #[test]
    fn test_gauge() {
        let stream = AsynchronousMetricStream::new(LastValue, None, Temporality::Delta, 0);
        let _ = stream.collect(&observations(&[("a", 3.0)]), 1);
        let data = stream.collect(&observations(&[("a", 2.0)]), 2);
        assert_eq!(values(&data), vec![("{host=a}".to_string(), 2.0)]);
    }
}
