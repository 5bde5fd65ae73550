use mockall::mock;

use crate::{
    aggregation::Aggregation,
    data::{Metric, Temporality},
    exporter::{InstrumentMetadata, MetricExporter},
    instrument::InstrumentKind,
};

mock! {
    pub Exporter {}

    impl MetricExporter for Exporter {
        fn temporality(&self, metadata: &InstrumentMetadata) -> Option<Temporality>;
        fn default_aggregation(&self, kind: InstrumentKind) -> Aggregation;
        fn export(&self, batch: Vec<Metric>) -> bool;
        fn force_flush(&self) -> bool;
        fn shutdown(&self) -> bool;
    }
}
