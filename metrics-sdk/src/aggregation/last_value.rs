use crate::data::{Data, NumberDataPoint, Temporality};

use super::{Accumulation, Aggregator};

/// Most recent measurement.
///
/// Gauges report the latest sample regardless of the requested temporality, so `diff` returns the
/// current summary unchanged.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LastValue;

impl Aggregator for LastValue {
    /// Value and timestamp of the latest measurement, if any.
    type Summary = Option<(f64, u64)>;

    fn initialize(&self) -> Self::Summary {
        None
    }

    fn record(&self, summary: &mut Self::Summary, value: f64, timestamp: u64) {
        match summary {
            Some((_, last)) if *last > timestamp => {}
            _ => *summary = Some((value, timestamp)),
        }
    }

    fn merge(&self, left: &Self::Summary, right: &Self::Summary) -> Self::Summary {
        match (left, right) {
            (Some((_, lt)), Some((_, rt))) if lt > rt => *left,
            (_, Some(_)) => *right,
            (_, None) => *left,
        }
    }

    fn diff(&self, current: &Self::Summary, _previous: &Self::Summary) -> Self::Summary {
        *current
    }

    fn to_data(
        &self,
        accumulations: Vec<Accumulation<Self::Summary>>,
        start_time: u64,
        time: u64,
        _temporality: Temporality,
    ) -> Data {
        let data_points = accumulations
            .into_iter()
            .filter_map(|acc| {
                acc.summary.map(|(value, _)| NumberDataPoint {
                    attributes: acc.attributes,
                    start_time,
                    time,
                    value,
                    exemplars: acc.exemplars,
                })
            })
            .collect();

        Data::Gauge { data_points }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Attributes;

    #[test]
    fn test_record_keeps_newest() {
        let agg = LastValue;
        let mut summary = agg.initialize();
        agg.record(&mut summary, 1.0, 10);
        agg.record(&mut summary, 2.0, 5);
        assert_eq!(summary, Some((1.0, 10)));
        agg.record(&mut summary, 3.0, 10);
        assert_eq!(summary, Some((3.0, 10)));
    }

    #[test]
    fn test_merge_and_diff() {
        let agg = LastValue;
        assert_eq!(agg.merge(&Some((1.0, 2)), &Some((2.0, 1))), Some((1.0, 2)));
        assert_eq!(agg.merge(&Some((1.0, 1)), &Some((2.0, 2))), Some((2.0, 2)));
        assert_eq!(agg.merge(&Some((1.0, 1)), &None), Some((1.0, 1)));
        assert_eq!(agg.merge(&None, &None), None);
        assert_eq!(agg.diff(&Some((4.0, 3)), &Some((1.0, 1))), Some((4.0, 3)));
    }

    #[test]
    fn test_to_data_skips_empty() {
        let agg = LastValue;
        let data = agg.to_data(
            vec![
                Accumulation { attributes: Attributes::empty(), summary: None, exemplars: vec![] },
                Accumulation {
                    attributes: Attributes::new(&[crate::KeyValue::new("k", "v")]),
                    summary: Some((9.0, 1)),
                    exemplars: vec![],
                },
            ],
            0,
            5,
            Temporality::Delta,
        );
        let points = data.number_points().expect("gauge");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 9.0);
    }
}
