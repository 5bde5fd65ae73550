use std::fmt;

use hashbrown::HashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::{
    aggregation::{Accumulation, Aggregator},
    attributes::{AttributeFilter, Attributes},
    data::{Data, Temporality},
    exemplar::{ExemplarReservoir, ExemplarReservoirFactory},
};

use super::SynchronousStream;

struct Series<S> {
    summary: S,
    reservoir: Option<Box<dyn ExemplarReservoir>>,
    // Recorded into since the last collection.
    touched: bool,
}

struct State<S> {
    series: IndexMap<Attributes, Series<S>>,
    // Cumulative summaries as of the last delta collection.
    previous: HashMap<Attributes, S>,
    last_collect: u64,
}

/// A stream accumulating measurements as they are recorded.
///
/// Accumulators are always cumulative.  A delta reader gets the difference between the current
/// accumulator and the one it saw at its previous collection, and only for the series recorded
/// into in between.
pub(crate) struct SynchronousMetricStream<A: Aggregator> {
    aggregator: A,
    filter: Option<AttributeFilter>,
    reservoir: Option<ExemplarReservoirFactory>,
    temporality: Temporality,
    start_time: u64,
    state: Mutex<State<A::Summary>>,
}

impl<A: Aggregator> SynchronousMetricStream<A> {
    pub(crate) fn new(
        aggregator: A,
        filter: Option<AttributeFilter>,
        reservoir: Option<ExemplarReservoirFactory>,
        temporality: Temporality,
        start_time: u64,
    ) -> Self {
        SynchronousMetricStream {
            aggregator,
            filter,
            reservoir,
            temporality,
            start_time,
            state: Mutex::new(State {
                series: IndexMap::new(),
                previous: HashMap::new(),
                last_collect: start_time,
            }),
        }
    }

    fn collect_cumulative(&self, state: &mut State<A::Summary>) -> Vec<Accumulation<A::Summary>> {
        state
            .series
            .iter_mut()
            .map(|(attributes, series)| {
                series.touched = false;
                Accumulation {
                    attributes: attributes.clone(),
                    summary: series.summary.clone(),
                    exemplars: series.reservoir.as_mut().map(|r| r.collect()).unwrap_or_default(),
                }
            })
            .collect()
    }

    fn collect_delta(&self, state: &mut State<A::Summary>) -> Vec<Accumulation<A::Summary>> {
        let State { series: all, previous, .. } = state;
        let mut accumulations = Vec::new();
        for (attributes, series) in all.iter_mut().filter(|(_, s)| s.touched) {
            series.touched = false;
            let summary = match previous.get(attributes) {
                Some(prev) => self.aggregator.diff(&series.summary, prev),
                None => series.summary.clone(),
            };
            previous.insert(attributes.clone(), series.summary.clone());
            accumulations.push(Accumulation {
                attributes: attributes.clone(),
                summary,
                exemplars: series.reservoir.as_mut().map(|r| r.collect()).unwrap_or_default(),
            });
        }
        accumulations
    }
}

impl<A: Aggregator> SynchronousStream for SynchronousMetricStream<A> {
    fn record(&self, value: f64, attributes: &Attributes, timestamp: u64) {
        let (attributes, dropped) = match &self.filter {
            Some(filter) => filter.apply(attributes),
            None => (attributes.clone(), Vec::new()),
        };

        let mut state = self.state.lock();
        let series = state.series.entry(attributes).or_insert_with(|| Series {
            summary: self.aggregator.initialize(),
            reservoir: self.reservoir.as_ref().map(ExemplarReservoirFactory::create),
            touched: false,
        });
        self.aggregator.record(&mut series.summary, value, timestamp);
        series.touched = true;
        if let Some(reservoir) = series.reservoir.as_mut() {
            reservoir.offer(value, timestamp, &dropped);
        }
    }

    fn collect(&self, timestamp: u64) -> Data {
        let mut state = self.state.lock();
        let (accumulations, start_time) = match self.temporality {
            Temporality::Cumulative => (self.collect_cumulative(&mut state), self.start_time),
            Temporality::Delta => (self.collect_delta(&mut state), state.last_collect),
        };
        state.last_collect = timestamp;
        drop(state);

        self.aggregator.to_data(accumulations, start_time, timestamp, self.temporality)
    }
}

impl<A: Aggregator> fmt::Debug for SynchronousMetricStream<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronousMetricStream")
            .field("temporality", &self.temporality)
            .field("start_time", &self.start_time)
            .field("series", &self.state.lock().series.len())
            .finish()
    }
}
