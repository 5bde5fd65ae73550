//! Instrument descriptors and instrumentation scopes.
use std::{borrow::Cow, fmt, sync::Arc};

use crate::{
    attributes::{Attributes, KeyValue},
    error::ConfigurationError,
};

const MAX_NAME_LEN: usize = 255;
const MAX_UNIT_LEN: usize = 63;

/// Instrument kind.
///
/// The set of kinds is closed: every table keyed by kind (default aggregation, monotonicity, and
/// so on) is an exhaustive `match`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum InstrumentKind {
    /// Monotonic synchronous sum.
    Counter,
    /// Non-monotonic synchronous sum.
    UpDownCounter,
    /// Synchronous distribution.
    Histogram,
    /// Synchronous last value.
    Gauge,
    /// Monotonic sum observed by callbacks.
    AsynchronousCounter,
    /// Non-monotonic sum observed by callbacks.
    AsynchronousUpDownCounter,
    /// Last value observed by callbacks.
    AsynchronousGauge,
}

impl InstrumentKind {
    /// Whether or not measurements are pulled from callbacks at collection time.
    pub fn is_asynchronous(&self) -> bool {
        match self {
            InstrumentKind::Counter
            | InstrumentKind::UpDownCounter
            | InstrumentKind::Histogram
            | InstrumentKind::Gauge => false,
            InstrumentKind::AsynchronousCounter
            | InstrumentKind::AsynchronousUpDownCounter
            | InstrumentKind::AsynchronousGauge => true,
        }
    }

    /// Whether or not sums produced by this kind can only increase.
    pub fn is_monotonic(&self) -> bool {
        match self {
            InstrumentKind::Counter
            | InstrumentKind::Histogram
            | InstrumentKind::AsynchronousCounter => true,
            InstrumentKind::UpDownCounter
            | InstrumentKind::Gauge
            | InstrumentKind::AsynchronousUpDownCounter
            | InstrumentKind::AsynchronousGauge => false,
        }
    }
}

/// Advisory parameters given at instrument creation.
///
/// Advisory parameters are hints: a matching view always takes precedence, and they are not part
/// of the instrument identity.  When the same instrument is created twice with different advisory
/// parameters, the first creation wins.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Advisory {
    /// Bucket boundaries to use for the default histogram aggregation.
    pub explicit_bucket_boundaries: Option<Vec<f64>>,
    /// Attribute keys to retain when no view sets an allow-list.
    pub attribute_keys: Option<Vec<String>>,
}

impl Advisory {
    /// Sets the histogram bucket boundaries hint.
    #[must_use]
    pub fn with_explicit_bucket_boundaries(mut self, boundaries: Vec<f64>) -> Self {
        self.explicit_bucket_boundaries = Some(boundaries);
        self
    }

    /// Sets the attribute keys hint.
    #[must_use]
    pub fn with_attribute_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.attribute_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }
}

/// The identity of an instrument.
///
/// Two instruments are the same instrument iff their kind, name, unit and description match.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct InstrumentId {
    pub(crate) kind: InstrumentKind,
    pub(crate) name: Cow<'static, str>,
    pub(crate) unit: Option<Cow<'static, str>>,
    pub(crate) description: Option<Cow<'static, str>>,
}

/// An immutable instrument descriptor.
#[derive(Clone, Debug)]
pub struct Instrument {
    id: InstrumentId,
    advisory: Advisory,
}

impl Instrument {
    /// Creates and validates a new instrument descriptor.
    pub(crate) fn new(
        kind: InstrumentKind,
        name: Cow<'static, str>,
        unit: Option<Cow<'static, str>>,
        description: Option<Cow<'static, str>>,
        advisory: Advisory,
    ) -> Result<Instrument, ConfigurationError> {
        validate_name(&name)?;
        if let Some(unit) = &unit {
            validate_unit(unit)?;
        }
        if let Some(boundaries) = &advisory.explicit_bucket_boundaries {
            validate_boundaries(boundaries)?;
        }

        Ok(Instrument { id: InstrumentId { kind, name, unit, description }, advisory })
    }

    /// Kind of this instrument.
    pub fn kind(&self) -> InstrumentKind {
        self.id.kind
    }

    /// Name of this instrument.
    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// Unit of this instrument, if any.
    pub fn unit(&self) -> Option<&str> {
        self.id.unit.as_deref()
    }

    /// Description of this instrument, if any.
    pub fn description(&self) -> Option<&str> {
        self.id.description.as_deref()
    }

    /// Advisory parameters of this instrument.
    pub fn advisory(&self) -> &Advisory {
        &self.advisory
    }

    /// Identity of this instrument.
    pub fn id(&self) -> &InstrumentId {
        &self.id
    }
}

fn validate_name(name: &str) -> Result<(), ConfigurationError> {
    let mut chars = name.chars();
    let valid = name.len() <= MAX_NAME_LEN
        && chars.next().map_or(false, |c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-'));

    if valid {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidInstrumentName { name: name.to_string() })
    }
}

fn validate_unit(unit: &str) -> Result<(), ConfigurationError> {
    if unit.is_ascii() && unit.len() <= MAX_UNIT_LEN {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidUnit { unit: unit.to_string() })
    }
}

/// Checks that histogram boundaries are finite and strictly ascending.
pub(crate) fn validate_boundaries(boundaries: &[f64]) -> Result<(), ConfigurationError> {
    let finite = boundaries.iter().all(|b| b.is_finite());
    let ascending = boundaries.windows(2).all(|w| w[0] < w[1]);
    if finite && ascending {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidBoundaries { boundaries: boundaries.to_vec() })
    }
}

/// The library, or other logical unit of code, producing measurements.
///
/// Meters are created per scope, and the scope is the first-level key of the instrument identity
/// cache.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct InstrumentationScope {
    name: Cow<'static, str>,
    version: Option<Cow<'static, str>>,
    schema_url: Option<Cow<'static, str>>,
    attributes: Attributes,
}

impl InstrumentationScope {
    /// Creates a builder for a scope with the given name.
    pub fn builder<N>(name: N) -> InstrumentationScopeBuilder
    where
        N: Into<Cow<'static, str>>,
    {
        InstrumentationScopeBuilder {
            name: name.into(),
            version: None,
            schema_url: None,
            attributes: Vec::new(),
        }
    }

    /// Name of the scope.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version of the scope, if any.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Schema URL of the scope, if any.
    pub fn schema_url(&self) -> Option<&str> {
        self.schema_url.as_deref()
    }

    /// Attributes of the scope.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

impl fmt::Display for InstrumentationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => f.write_str(&self.name),
        }
    }
}

/// Builder for [`InstrumentationScope`].
pub struct InstrumentationScopeBuilder {
    name: Cow<'static, str>,
    version: Option<Cow<'static, str>>,
    schema_url: Option<Cow<'static, str>>,
    attributes: Vec<KeyValue>,
}

impl InstrumentationScopeBuilder {
    /// Sets the version of the scope.
    #[must_use]
    pub fn with_version<V>(mut self, version: V) -> Self
    where
        V: Into<Cow<'static, str>>,
    {
        self.version = Some(version.into());
        self
    }

    /// Sets the schema URL of the scope.
    #[must_use]
    pub fn with_schema_url<S>(mut self, schema_url: S) -> Self
    where
        S: Into<Cow<'static, str>>,
    {
        self.schema_url = Some(schema_url.into());
        self
    }

    /// Sets the attributes of the scope.
    #[must_use]
    pub fn with_attributes<I>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = KeyValue>,
    {
        self.attributes = attributes.into_iter().collect();
        self
    }

    /// Builds the scope.
    pub fn build(self) -> InstrumentationScope {
        InstrumentationScope {
            name: self.name,
            version: self.version,
            schema_url: self.schema_url,
            attributes: self.attributes.into_iter().collect(),
        }
    }
}

/// The entity producing telemetry, attached to every exported record.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Resource {
    attributes: Attributes,
}

impl Resource {
    /// Creates a resource from the given attributes.
    pub fn new<I>(attributes: I) -> Arc<Resource>
    where
        I: IntoIterator<Item = KeyValue>,
    {
        Arc::new(Resource { attributes: attributes.into_iter().collect() })
    }

    /// Creates a resource with no attributes.
    pub fn empty() -> Arc<Resource> {
        Arc::new(Resource::default())
    }

    /// Attributes of the resource.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instrument(
        name: &'static str,
        unit: Option<&'static str>,
    ) -> Result<Instrument, ConfigurationError> {
        Instrument::new(
            InstrumentKind::Counter,
            name.into(),
            unit.map(Into::into),
            None,
            Advisory::default(),
        )
    }

    #[test]
    fn test_name_validation() {
        assert!(instrument("http.server.duration", None).is_ok());
        assert!(instrument("a_b-c/d.e", None).is_ok());
        assert!(instrument("", None).is_err());
        assert!(instrument("1requests", None).is_err());
        assert!(instrument("requests total", None).is_err());

        let long: &'static str = Box::leak("a".repeat(256).into_boxed_str());
        assert_eq!(
            instrument(long, None).unwrap_err(),
            ConfigurationError::InvalidInstrumentName { name: long.to_string() }
        );
    }

    #[test]
    fn test_unit_validation() {
        assert!(instrument("requests", Some("ms")).is_ok());
        assert!(instrument("requests", Some("µs")).is_err());
    }

    #[test]
    fn test_boundaries_validation() {
        assert!(validate_boundaries(&[]).is_ok());
        assert!(validate_boundaries(&[0.0, 1.0, 10.0]).is_ok());
        assert!(validate_boundaries(&[1.0, 1.0]).is_err());
        assert!(validate_boundaries(&[5.0, 1.0]).is_err());
        assert!(validate_boundaries(&[0.0, f64::INFINITY]).is_err());
        assert!(validate_boundaries(&[f64::NAN]).is_err());
    }

    #[test]
    fn test_identity_excludes_advisory() {
        let a = Instrument::new(
            InstrumentKind::Histogram,
            "latency".into(),
            Some("ms".into()),
            Some("request latency".into()),
            Advisory::default(),
        )
        .expect("valid instrument");
        let b = Instrument::new(
            InstrumentKind::Histogram,
            "latency".into(),
            Some("ms".into()),
            Some("request latency".into()),
            Advisory::default().with_explicit_bucket_boundaries(vec![1.0, 2.0]),
        )
        .expect("valid instrument");
        assert_eq!(a.id(), b.id());

        let c = Instrument::new(
            InstrumentKind::Histogram,
            "latency".into(),
            Some("s".into()),
            Some("request latency".into()),
            Advisory::default(),
        )
        .expect("valid instrument");
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_kind_tables() {
        assert!(InstrumentKind::AsynchronousGauge.is_asynchronous());
        assert!(!InstrumentKind::Gauge.is_asynchronous());
        assert!(InstrumentKind::AsynchronousCounter.is_monotonic());
        assert!(!InstrumentKind::UpDownCounter.is_monotonic());
    }

    #[test]
    fn test_scope_builder() {
        let scope = InstrumentationScope::builder("io.http")
            .with_version("1.2.0")
            .with_schema_url("https://example.com/schema")
            .with_attributes([KeyValue::new("tier", "edge")])
            .build();
        assert_eq!(scope.name(), "io.http");
        assert_eq!(scope.version(), Some("1.2.0"));
        assert_eq!(scope.attributes().len(), 1);
        assert_eq!(scope.to_string(), "io.http@1.2.0");
        assert_eq!(scope, scope.clone());
    }
}
