use tracing::info;

use crate::data::{Data, Metric, Temporality};

use super::{InstrumentMetadata, MetricExporter};

/// An exporter that emits every data point as a `tracing` event.
///
/// Meant for local debugging: each point becomes one `INFO` event with the metric name, the
/// attribute set, and the point's value as structured fields.
#[derive(Clone, Debug)]
pub struct LoggingMetricExporter {
    temporality: Temporality,
}

impl LoggingMetricExporter {
    /// Creates an exporter requesting the given temporality for every instrument.
    pub fn new(temporality: Temporality) -> Self {
        LoggingMetricExporter { temporality }
    }
}

impl Default for LoggingMetricExporter {
    fn default() -> Self {
        LoggingMetricExporter::new(Temporality::Cumulative)
    }
}

impl MetricExporter for LoggingMetricExporter {
    fn temporality(&self, _metadata: &InstrumentMetadata) -> Option<Temporality> {
        Some(self.temporality)
    }

    fn export(&self, batch: Vec<Metric>) -> bool {
        for metric in &batch {
            let scope = metric.scope.to_string();
            let unit = metric.unit.as_deref().unwrap_or("");
            match &metric.data {
                Data::Sum { data_points, temporality, is_monotonic } => {
                    for point in data_points {
                        info!(
                            metric_name = %metric.name,
                            scope = %scope,
                            unit,
                            attributes = %point.attributes,
                            temporality = ?temporality,
                            monotonic = is_monotonic,
                            value = point.value,
                            "sum"
                        );
                    }
                }
                Data::Gauge { data_points } => {
                    for point in data_points {
                        info!(
                            metric_name = %metric.name,
                            scope = %scope,
                            unit,
                            attributes = %point.attributes,
                            value = point.value,
                            "gauge"
                        );
                    }
                }
                Data::Histogram { data_points, temporality } => {
                    for point in data_points {
                        info!(
                            metric_name = %metric.name,
                            scope = %scope,
                            unit,
                            attributes = %point.attributes,
                            temporality = ?temporality,
                            count = point.count,
                            sum = point.sum,
                            min = ?point.min,
                            max = ?point.max,
                            buckets = ?point.bucket_counts,
                            "histogram"
                        );
                    }
                }
            }
        }
        true
    }
}
