use std::sync::Arc;

use parking_lot::Mutex;

use crate::data::{Metric, Temporality};

use super::{InstrumentMetadata, MetricExporter};

/// An exporter that keeps every batch in memory.
///
/// Clones share the same storage, so a clone can be handed to a reader while the original is kept
/// around to inspect what was exported.
#[derive(Clone, Debug)]
pub struct InMemoryMetricExporter {
    temporality: Temporality,
    batches: Arc<Mutex<Vec<Vec<Metric>>>>,
}

impl InMemoryMetricExporter {
    /// Creates an exporter requesting cumulative temporality.
    pub fn new() -> Self {
        InMemoryMetricExporter::with_temporality(Temporality::Cumulative)
    }

    /// Creates an exporter requesting the given temporality for every instrument.
    pub fn with_temporality(temporality: Temporality) -> Self {
        InMemoryMetricExporter { temporality, batches: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Gets a copy of every batch exported so far.
    pub fn exported_batches(&self) -> Vec<Vec<Metric>> {
        self.batches.lock().clone()
    }

    /// Gets the most recently exported batch, if any.
    pub fn last_batch(&self) -> Option<Vec<Metric>> {
        self.batches.lock().last().cloned()
    }

    /// Discards every batch exported so far.
    pub fn reset(&self) {
        self.batches.lock().clear();
    }
}

impl Default for InMemoryMetricExporter {
    fn default() -> Self {
        InMemoryMetricExporter::new()
    }
}

impl MetricExporter for InMemoryMetricExporter {
    fn temporality(&self, _metadata: &InstrumentMetadata) -> Option<Temporality> {
        Some(self.temporality)
    }

    fn export(&self, batch: Vec<Metric>) -> bool {
        self.batches.lock().push(batch);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_storage() {
        let exporter = InMemoryMetricExporter::with_temporality(Temporality::Delta);
        let clone = exporter.clone();
        assert!(clone.export(Vec::new()));
        assert!(clone.export(Vec::new()));
        assert_eq!(exporter.exported_batches().len(), 2);
        assert_eq!(exporter.last_batch(), Some(Vec::new()));

        exporter.reset();
        assert!(clone.exported_batches().is_empty());
        assert!(exporter.force_flush());
        assert!(exporter.shutdown());
    }
}
