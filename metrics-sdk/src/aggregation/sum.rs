use crate::data::{Data, NumberDataPoint, Temporality};

use super::{Accumulation, Aggregator};

/// Arithmetic sum.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sum {
    monotonic: bool,
}

impl Sum {
    /// Creates a sum aggregation.
    pub fn new(monotonic: bool) -> Self {
        Sum { monotonic }
    }

    /// Whether or not the produced sums are marked monotonic.
    pub fn is_monotonic(&self) -> bool {
        self.monotonic
    }
}

impl Aggregator for Sum {
    type Summary = f64;

    fn initialize(&self) -> f64 {
        0.0
    }

    fn record(&self, summary: &mut f64, value: f64, _timestamp: u64) {
        *summary += value;
    }

    fn merge(&self, left: &f64, right: &f64) -> f64 {
        left + right
    }

    fn diff(&self, current: &f64, previous: &f64) -> f64 {
        current - previous
    }

    fn to_data(
        &self,
        accumulations: Vec<Accumulation<f64>>,
        start_time: u64,
        time: u64,
        temporality: Temporality,
    ) -> Data {
        let data_points = accumulations
            .into_iter()
            .map(|acc| NumberDataPoint {
                attributes: acc.attributes,
                start_time,
                time,
                value: acc.summary,
                exemplars: acc.exemplars,
            })
            .collect();

        Data::Sum { data_points, temporality, is_monotonic: self.monotonic }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::attributes::Attributes;

    #[test]
    fn test_sum_to_data() {
        let sum = Sum::new(true);
        let mut summary = sum.initialize();
        sum.record(&mut summary, 3.0, 1);
        sum.record(&mut summary, 4.5, 2);

        let data = sum.to_data(
            vec![Accumulation { attributes: Attributes::empty(), summary, exemplars: vec![] }],
            10,
            20,
            Temporality::Cumulative,
        );
        match data {
            Data::Sum { data_points, temporality, is_monotonic } => {
                assert_eq!(temporality, Temporality::Cumulative);
                assert!(is_monotonic);
                assert_eq!(data_points.len(), 1);
                assert_eq!(data_points[0].value, 7.5);
                assert_eq!(data_points[0].start_time, 10);
                assert_eq!(data_points[0].time, 20);
            }
            other => panic!("unexpected data: {:?}", other),
        }
    }

    proptest! {
        #[test]
        fn test_delta_law(a in -1_000_000i32..1_000_000, b in -1_000_000i32..1_000_000) {
            let sum = Sum::new(false);
            let mut first = sum.initialize();
            sum.record(&mut first, f64::from(a), 0);
            let mut second = sum.initialize();
            sum.record(&mut second, f64::from(b), 0);

            let merged = sum.merge(&first, &second);
            prop_assert_eq!(sum.diff(&merged, &first), f64::from(b));
        }
    }
}
