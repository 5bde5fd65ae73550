//! Pull-based collection.
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

use crate::{
    callback::CallbackRegistry,
    clock::Clock,
    data::{Data, Metric},
    exporter::MetricExporter,
    registry::{MetricRegistry, RegisteredStream, StreamId, StreamSource},
    stream::Observations,
};

const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(1);

struct Inner {
    exporter: Box<dyn MetricExporter>,
    registry: MetricRegistry,
    clock: RwLock<Clock>,
    callback_timeout: Duration,
    closed: AtomicBool,
    // Serializes collection passes, so delta baselines advance in order.
    pass: Mutex<()>,
}

/// Builder for a [`MetricReader`].
#[must_use]
pub struct MetricReaderBuilder {
    exporter: Box<dyn MetricExporter>,
    callback_timeout: Duration,
}

impl MetricReaderBuilder {
    /// Sets how long a collection pass waits for each observable callback.
    ///
    /// A callback still running when the timeout elapses is counted as failed, and its
    /// observations are discarded.  Defaults to one second.
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Builds the reader.
    pub fn build(self) -> MetricReader {
        MetricReader {
            inner: Arc::new(Inner {
                exporter: self.exporter,
                registry: MetricRegistry::new(),
                clock: RwLock::new(Clock::new()),
                callback_timeout: self.callback_timeout,
                closed: AtomicBool::new(false),
                pass: Mutex::new(()),
            }),
        }
    }
}

impl fmt::Debug for MetricReaderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricReaderBuilder")
            .field("callback_timeout", &self.callback_timeout)
            .finish_non_exhaustive()
    }
}

/// Collects the streams registered with it and hands the result to an exporter.
///
/// Each reader keeps its own streams, so several readers can export the same instruments with
/// different temporalities and aggregations.  Cloning is cheap: clones share the same state.
#[derive(Clone)]
pub struct MetricReader {
    inner: Arc<Inner>,
}

/// A reference to a reader that does not keep it alive.
#[derive(Clone)]
pub(crate) struct WeakMetricReader(Weak<Inner>);

impl WeakMetricReader {
    pub(crate) fn upgrade(&self) -> Option<MetricReader> {
        self.0.upgrade().map(|inner| MetricReader { inner })
    }
}

impl MetricReader {
    /// Creates a reader exporting to the given exporter, with the default callback timeout.
    pub fn new<E>(exporter: E) -> Self
    where
        E: MetricExporter + 'static,
    {
        MetricReader::builder(exporter).build()
    }

    /// Creates a builder for a reader exporting to the given exporter.
    pub fn builder<E>(exporter: E) -> MetricReaderBuilder
    where
        E: MetricExporter + 'static,
    {
        MetricReaderBuilder {
            exporter: Box::new(exporter),
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }

    /// Collects every registered stream and exports the result.
    ///
    /// Returns `true` if every observable callback succeeded and the exporter accepted the batch.
    /// A failing or timed out callback does not stop the pass: the data of every other stream is
    /// still exported.  Always returns `false` once the reader is shut down.
    pub fn collect(&self) -> bool {
        if self.is_shutdown() {
            return false;
        }
        self.collect_and_export()
    }

    /// Collects, exports, and then flushes the exporter.
    pub fn force_flush(&self) -> bool {
        if self.is_shutdown() {
            return false;
        }
        let collected = self.collect_and_export();
        let flushed = self.inner.exporter.force_flush();
        collected && flushed
    }

    /// Runs a final collection, shuts the exporter down, and drops every registered stream.
    ///
    /// Returns `false` if the reader was already shut down.
    pub fn shutdown(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let collected = self.collect_and_export();
        let shut_down = self.inner.exporter.shutdown();
        self.inner.registry.clear();
        debug!(collected, shut_down, "metric reader shut down");
        collected && shut_down
    }

    /// Whether or not this reader has been shut down.
    pub fn is_shutdown(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub(crate) fn exporter(&self) -> &dyn MetricExporter {
        self.inner.exporter.as_ref()
    }

    pub(crate) fn set_clock(&self, clock: Clock) {
        *self.inner.clock.write() = clock;
    }

    pub(crate) fn downgrade(&self) -> WeakMetricReader {
        WeakMetricReader(Arc::downgrade(&self.inner))
    }

    /// Registers a stream, unless the reader is shut down.
    pub(crate) fn register(&self, stream: RegisteredStream) -> Option<StreamId> {
        if self.is_shutdown() {
            return None;
        }
        let metric_name = stream.name.clone();
        let id = self.inner.registry.register(stream);
        debug!(stream_id = id, metric_name = %metric_name, "registered stream");
        Some(id)
    }

    pub(crate) fn unregister(&self, id: StreamId) {
        if self.inner.registry.unregister(id) {
            debug!(stream_id = id, "unregistered stream");
        }
    }

    #[cfg(test)]
    pub(crate) fn stream_count(&self) -> usize {
        self.inner.registry.len()
    }

    fn collect_and_export(&self) -> bool {
        let _pass = self.inner.pass.lock();
        let streams = self.inner.registry.snapshot();
        let timestamp = self.inner.clock.read().now();

        // Synchronous streams never wait on callbacks, so they are collected first.
        let mut collected: Vec<Option<Data>> = Vec::with_capacity(streams.len());
        let mut wanted: Vec<(Arc<CallbackRegistry>, HashSet<u64>)> = Vec::new();
        for stream in &streams {
            match &stream.source {
                StreamSource::Synchronous(s) => collected.push(Some(s.collect(timestamp))),
                StreamSource::Asynchronous { observer, .. } => {
                    collected.push(None);
                    match wanted.iter_mut().find(|(r, _)| Arc::ptr_eq(r, &observer.callbacks)) {
                        Some((_, ids)) => {
                            ids.insert(observer.id);
                        }
                        None => wanted.push((
                            Arc::clone(&observer.callbacks),
                            std::iter::once(observer.id).collect(),
                        )),
                    }
                }
            }
        }

        let mut observations: HashMap<u64, Observations> = HashMap::new();
        let mut failures = 0;
        for (callbacks, ids) in &wanted {
            let pass = callbacks.observe(ids, self.inner.callback_timeout);
            failures += pass.failures;
            observations.extend(pass.observations);
        }

        let empty = Observations::new();
        let mut batch = Vec::with_capacity(streams.len());
        for (stream, data) in streams.iter().zip(collected) {
            let data = match (&stream.source, data) {
                (_, Some(data)) => data,
                (StreamSource::Asynchronous { stream: s, observer }, None) => {
                    s.collect(observations.get(&observer.id).unwrap_or(&empty), timestamp)
                }
                (StreamSource::Synchronous(_), None) => continue,
            };
            if data.is_empty() {
                continue;
            }

            batch.push(Metric {
                scope: stream.scope.clone(),
                resource: Arc::clone(&stream.resource),
                name: stream.name.clone(),
                unit: stream.unit.clone(),
                description: stream.description.clone(),
                data,
            });
        }

        let metrics = batch.len();
        let exported = self.inner.exporter.export(batch);
        if !exported {
            error!(metrics, "failed to export metrics");
        }
        if failures > 0 {
            error!(failures, "observable callbacks failed during collection");
        }
        exported && failures == 0
    }
}

impl fmt::Debug for MetricReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricReader")
            .field("registry", &self.inner.registry)
            .field("closed", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use mockall::predicate::always;

    use super::*;
    use crate::{
        aggregation::Sum,
        callback::CallbackRegistry,
        data::Temporality,
        instrument::{InstrumentationScope, Resource},
        instruments::ObserverEntry,
        staleness::StalenessHandler,
        stream::{AsynchronousMetricStream, SynchronousMetricStream, SynchronousStream},
        test_util::MockExporter,
    };

    fn register_sum(reader: &MetricReader, name: &'static str) -> Arc<dyn SynchronousStream> {
        let stream: Arc<dyn SynchronousStream> = Arc::new(SynchronousMetricStream::new(
            Sum::new(true),
            None,
            None,
            Temporality::Cumulative,
            0,
        ));
        reader
            .register(RegisteredStream {
                scope: InstrumentationScope::builder("test").build(),
                resource: Resource::empty(),
                name: name.into(),
                unit: None,
                description: None,
                source: StreamSource::Synchronous(Arc::clone(&stream)),
            })
            .expect("reader is open");
        stream
    }

    #[test]
    fn test_collect_exports_non_empty_streams() {
        let mut exporter = MockExporter::new();
        exporter
            .expect_export()
            .withf(|batch| batch.len() == 1 && batch[0].name == "written")
            .times(1)
            .return_const(true);

        let reader = MetricReader::new(exporter);
        let written = register_sum(&reader, "written");
        let _idle = register_sum(&reader, "idle");
        written.record(1.0, &crate::Attributes::empty(), 0);

        assert!(reader.collect());
    }

    #[test]
    fn test_failed_export() {
        let mut exporter = MockExporter::new();
        exporter.expect_export().with(always()).times(1).return_const(false);

        let reader = MetricReader::new(exporter);
        assert!(!reader.collect());
    }

    #[test]
    fn test_shutdown() {
        let mut exporter = MockExporter::new();
        exporter.expect_export().times(1).return_const(true);
        exporter.expect_shutdown().times(1).return_const(true);
        exporter.expect_force_flush().never();

        let reader = MetricReader::new(exporter);
        let _stream = register_sum(&reader, "requests");
        assert_eq!(reader.stream_count(), 1);

        assert!(reader.shutdown());
        assert!(reader.is_shutdown());
        assert_eq!(reader.stream_count(), 0);

        assert!(!reader.shutdown());
        assert!(!reader.collect());
        assert!(!reader.force_flush());
        assert!(reader
            .register(RegisteredStream {
                scope: InstrumentationScope::builder("test").build(),
                resource: Resource::empty(),
                name: "late".into(),
                unit: None,
                description: None,
                source: StreamSource::Synchronous(Arc::new(SynchronousMetricStream::new(
                    Sum::new(true),
                    None,
                    None,
                    Temporality::Cumulative,
                    0,
                ))),
            })
            .is_none());
    }

    #[test]
    fn test_force_flush() {
        let mut exporter = MockExporter::new();
        exporter.expect_export().times(1).return_const(true);
        exporter.expect_force_flush().times(1).return_const(false);

        let reader = MetricReader::new(exporter);
        assert!(!reader.force_flush());
    }

    #[test]
    fn test_slow_callback_does_not_hold_up_collection() {
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        let mut exporter = MockExporter::new();
        exporter
            .expect_export()
            .withf(|batch| batch.len() == 1 && batch[0].name == "written")
            .times(1)
            .return_const(true);

        let reader = MetricReader::builder(exporter)
            .with_callback_timeout(Duration::from_millis(50))
            .build();
        let written = register_sum(&reader, "written");
        written.record(1.0, &crate::Attributes::empty(), 0);

        let callbacks = Arc::new(CallbackRegistry::new());
        let observer = Arc::new(ObserverEntry { id: 1, callbacks: Arc::clone(&callbacks) });
        let _registration =
            callbacks.register(observer.id, Arc::new(StalenessHandler::new()), move |observer| {
                let _ = release_rx.recv();
                observer.observe(1, &[]);
            });
        reader
            .register(RegisteredStream {
                scope: InstrumentationScope::builder("test").build(),
                resource: Resource::empty(),
                name: "blocked".into(),
                unit: None,
                description: None,
                source: StreamSource::Asynchronous {
                    stream: Arc::new(AsynchronousMetricStream::new(
                        Sum::new(true),
                        None,
                        Temporality::Cumulative,
                        0,
                    )),
                    observer,
                },
            })
            .expect("reader is open");

        let started = Instant::now();
        assert!(!reader.collect());
        assert!(started.elapsed() < Duration::from_secs(1));
        drop(release_tx);
    }

    #[test]
    fn test_weak_reader() {
        let reader = MetricReader::new(MockExporter::new());
        let weak = reader.downgrade();
        assert!(weak.upgrade().is_some());
        drop(reader);
        assert!(weak.upgrade().is_none());
    }
}
