use std::{borrow::Cow, fmt, sync::Arc};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::{
    instrument::{InstrumentationScope, Resource},
    instruments::ObserverEntry,
    stream::{AsynchronousStream, SynchronousStream},
};

/// Identifier of a stream registered with a reader.
pub(crate) type StreamId = u64;

/// Where the data of a registered stream comes from.
pub(crate) enum StreamSource {
    Synchronous(Arc<dyn SynchronousStream>),
    Asynchronous { stream: Arc<dyn AsynchronousStream>, observer: Arc<ObserverEntry> },
}

/// A stream registered with a reader, along with what it is exported as.
pub(crate) struct RegisteredStream {
    pub(crate) scope: InstrumentationScope,
    pub(crate) resource: Arc<Resource>,
    pub(crate) name: Cow<'static, str>,
    pub(crate) unit: Option<Cow<'static, str>>,
    pub(crate) description: Option<Cow<'static, str>>,
    pub(crate) source: StreamSource,
}

impl fmt::Debug for RegisteredStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.source {
            StreamSource::Synchronous(_) => "synchronous",
            StreamSource::Asynchronous { .. } => "asynchronous",
        };
        f.debug_struct("RegisteredStream")
            .field("scope", &self.scope)
            .field("name", &self.name)
            .field("source", &kind)
            .finish()
    }
}

#[derive(Default)]
struct Streams {
    next_id: StreamId,
    streams: IndexMap<StreamId, Arc<RegisteredStream>>,
}

/// The streams registered with one reader, in registration order.
#[derive(Default)]
pub(crate) struct MetricRegistry {
    inner: RwLock<Streams>,
}

impl MetricRegistry {
    pub(crate) fn new() -> Self {
        MetricRegistry::default()
    }

    pub(crate) fn register(&self, stream: RegisteredStream) -> StreamId {
        let mut inner = self.inner.write();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.streams.insert(id, Arc::new(stream));
        id
    }

    pub(crate) fn unregister(&self, id: StreamId) -> bool {
        self.inner.write().streams.shift_remove(&id).is_some()
    }

    /// Takes a snapshot of the registered streams, so they can be collected without the lock.
    pub(crate) fn snapshot(&self) -> Vec<Arc<RegisteredStream>> {
        self.inner.read().streams.values().cloned().collect()
    }

    pub(crate) fn clear(&self) {
        self.inner.write().streams.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.read().streams.len()
    }
}

impl fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricRegistry").field("streams", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregation::Sum,
        data::Temporality,
        instrument::Resource,
        stream::SynchronousMetricStream,
    };

    fn stream(name: &'static str) -> RegisteredStream {
        RegisteredStream {
            scope: InstrumentationScope::builder("test").build(),
            resource: Resource::empty(),
            name: name.into(),
            unit: None,
            description: None,
            source: StreamSource::Synchronous(Arc::new(SynchronousMetricStream::new(
                Sum::new(true),
                None,
                None,
                Temporality::Cumulative,
                0,
            ))),
        }
    }

    #[test]
    fn test_register_unregister() {
        let registry = MetricRegistry::new();
        let a = registry.register(stream("a"));
        let b = registry.register(stream("b"));
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);

        assert!(registry.unregister(a));
        assert!(!registry.unregister(a));
        let names = registry.snapshot().iter().map(|s| s.name.to_string()).collect::<Vec<_>>();
        assert_eq!(names, vec!["b".to_string()]);

        registry.clear();
        assert_eq!(registry.len(), 0);
    }
}
