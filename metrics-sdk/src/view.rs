//! Views: per-instrument overrides of the exported stream.
//!
//! A [`View`] selects instruments (by name pattern, kind, unit, and meter scope) and projects each
//! one to an exported stream with an optional new name, description, attribute allow-list,
//! aggregation, and exemplar reservoir.  Views are resolved once, when an instrument is first
//! created; registering a view later never affects streams that already exist.
use std::borrow::Cow;

use parking_lot::RwLock;
use tracing::debug;

use crate::{
    aggregation::Aggregation,
    attributes::AttributeFilter,
    error::ConfigurationError,
    exemplar::ExemplarReservoirFactory,
    instrument::{Instrument, InstrumentKind, InstrumentationScope},
};

/// A pattern matching instrument names.
///
/// `*` matches any sequence of characters, and `?` matches exactly one character.  Matching is
/// case-sensitive.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NamePattern {
    /// Matches one exact name.
    Exact(String),
    /// Matches every name accepted by the wildcard pattern.
    Wildcard(String),
}

impl NamePattern {
    /// Parses a pattern, treating it as a wildcard if it contains `*` or `?`.
    pub fn new<S: Into<String>>(pattern: S) -> Self {
        let pattern = pattern.into();
        if pattern.contains(|c: char| c == '*' || c == '?') {
            NamePattern::Wildcard(pattern)
        } else {
            NamePattern::Exact(pattern)
        }
    }

    /// Checks if the given name matches this pattern.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            NamePattern::Exact(exact) => exact == name,
            NamePattern::Wildcard(pattern) => wildcard_match(pattern.as_bytes(), name.as_bytes()),
        }
    }

    fn as_str(&self) -> &str {
        match self {
            NamePattern::Exact(s) | NamePattern::Wildcard(s) => s,
        }
    }
}

// Iterative glob matching with single-star backtracking.
fn wildcard_match(pattern: &[u8], name: &[u8]) -> bool {
    let (mut p, mut n) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while n < name.len() {
        match pattern.get(p) {
            Some(b'*') => {
                star = Some((p, n));
                p += 1;
            }
            Some(b'?') => {
                p += 1;
                n += 1;
            }
            Some(c) if *c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match star {
                Some((sp, sn)) => {
                    p = sp + 1;
                    n = sn + 1;
                    star = Some((sp, sn + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == b'*')
}

/// Instrument selection criteria of a view.
///
/// Every criterion that is set must match for the view to apply.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectionCriteria {
    name: Option<NamePattern>,
    kind: Option<InstrumentKind>,
    unit: Option<String>,
    meter_name: Option<String>,
    meter_version: Option<String>,
    schema_url: Option<String>,
}

impl SelectionCriteria {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.kind.is_none()
            && self.unit.is_none()
            && self.meter_name.is_none()
            && self.meter_version.is_none()
            && self.schema_url.is_none()
    }

    /// Checks if the given instrument, created by a meter of the given scope, is selected.
    pub fn accepts(&self, instrument: &Instrument, scope: &InstrumentationScope) -> bool {
        self.name.as_ref().map_or(true, |p| p.matches(instrument.name()))
            && self.kind.map_or(true, |k| k == instrument.kind())
            && self.unit.as_deref().map_or(true, |u| instrument.unit() == Some(u))
            && self.meter_name.as_deref().map_or(true, |n| scope.name() == n)
            && self.meter_version.as_deref().map_or(true, |v| scope.version() == Some(v))
            && self.schema_url.as_deref().map_or(true, |s| scope.schema_url() == Some(s))
    }
}

/// A configured view.
#[derive(Clone, Debug)]
pub struct View {
    criteria: SelectionCriteria,
    name: Option<Cow<'static, str>>,
    description: Option<Cow<'static, str>>,
    attribute_keys: Option<Vec<String>>,
    aggregation: Option<Aggregation>,
    exemplar_reservoir: Option<ExemplarReservoirFactory>,
}

impl View {
    /// Creates a builder for a view.
    pub fn builder() -> ViewBuilder {
        ViewBuilder::default()
    }

    /// Selection criteria of this view.
    pub fn criteria(&self) -> &SelectionCriteria {
        &self.criteria
    }

    fn project(&self, instrument: &Instrument) -> ViewProjection {
        let attribute_keys =
            self.attribute_keys.as_ref().or(instrument.advisory().attribute_keys.as_ref());

        ViewProjection {
            name: self.name.clone().unwrap_or_else(|| Cow::Owned(instrument.name().to_string())),
            unit: instrument.unit().map(|u| Cow::Owned(u.to_string())),
            description: self
                .description
                .clone()
                .or_else(|| instrument.description().map(|d| Cow::Owned(d.to_string()))),
            attribute_filter: attribute_keys.map(AttributeFilter::new),
            aggregation: self.aggregation.clone(),
            exemplar_reservoir: self.exemplar_reservoir.clone(),
        }
    }
}

/// Builder for [`View`].
#[derive(Default)]
pub struct ViewBuilder {
    criteria: SelectionCriteria,
    name: Option<Cow<'static, str>>,
    description: Option<Cow<'static, str>>,
    attribute_keys: Option<Vec<String>>,
    aggregation: Option<Aggregation>,
    exemplar_reservoir: Option<ExemplarReservoirFactory>,
}

impl ViewBuilder {
    /// Selects instruments whose name matches the given pattern.
    ///
    /// The pattern may use `*` and `?` wildcards.
    #[must_use]
    pub fn matching_name<S: Into<String>>(mut self, pattern: S) -> Self {
        self.criteria.name = Some(NamePattern::new(pattern));
        self
    }

    /// Selects instruments of the given kind.
    #[must_use]
    pub fn matching_kind(mut self, kind: InstrumentKind) -> Self {
        self.criteria.kind = Some(kind);
        self
    }

    /// Selects instruments with the given unit.
    #[must_use]
    pub fn matching_unit<S: Into<String>>(mut self, unit: S) -> Self {
        self.criteria.unit = Some(unit.into());
        self
    }

    /// Selects instruments created by meters with the given name.
    #[must_use]
    pub fn matching_meter_name<S: Into<String>>(mut self, name: S) -> Self {
        self.criteria.meter_name = Some(name.into());
        self
    }

    /// Selects instruments created by meters with the given version.
    #[must_use]
    pub fn matching_meter_version<S: Into<String>>(mut self, version: S) -> Self {
        self.criteria.meter_version = Some(version.into());
        self
    }

    /// Selects instruments created by meters with the given schema URL.
    #[must_use]
    pub fn matching_schema_url<S: Into<String>>(mut self, schema_url: S) -> Self {
        self.criteria.schema_url = Some(schema_url.into());
        self
    }

    /// Exports the selected instrument under a new name.
    #[must_use]
    pub fn with_name<S: Into<Cow<'static, str>>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Exports the selected instruments with a new description.
    #[must_use]
    pub fn with_description<S: Into<Cow<'static, str>>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Keeps only the given attribute keys on the exported streams.
    #[must_use]
    pub fn with_attribute_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.attribute_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Aggregates the selected instruments with the given aggregation.
    #[must_use]
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    /// Samples exemplars of the selected synchronous instruments.
    #[must_use]
    pub fn with_exemplar_reservoir(mut self, factory: ExemplarReservoirFactory) -> Self {
        self.exemplar_reservoir = Some(factory);
        self
    }

    /// Builds the view.
    ///
    /// # Errors
    ///
    /// Fails if no selection criterion is set, if a new name is given while selecting instruments
    /// by anything other than one exact name, or if the aggregation is invalid.
    pub fn build(self) -> Result<View, ConfigurationError> {
        if self.criteria.is_empty() {
            return Err(ConfigurationError::EmptySelection);
        }

        if self.name.is_some() {
            match &self.criteria.name {
                Some(NamePattern::Exact(_)) => {}
                Some(pattern) => {
                    return Err(ConfigurationError::WildcardRename {
                        pattern: pattern.as_str().to_string(),
                    })
                }
                None => {
                    return Err(ConfigurationError::WildcardRename { pattern: "*".to_string() })
                }
            }
        }

        if let Some(aggregation) = &self.aggregation {
            aggregation.validate()?;
        }

        Ok(View {
            criteria: self.criteria,
            name: self.name,
            description: self.description,
            attribute_keys: self.attribute_keys,
            aggregation: self.aggregation,
            exemplar_reservoir: self.exemplar_reservoir,
        })
    }
}

/// How one instrument is exported by one stream.
#[derive(Clone, Debug)]
pub struct ViewProjection {
    /// Exported name.
    pub name: Cow<'static, str>,
    /// Exported unit.
    pub unit: Option<Cow<'static, str>>,
    /// Exported description.
    pub description: Option<Cow<'static, str>>,
    /// Attribute allow-list applied before aggregation.
    pub attribute_filter: Option<AttributeFilter>,
    /// Aggregation override; `None` defers to the reader's default for the instrument kind.
    pub aggregation: Option<Aggregation>,
    /// Exemplar reservoir factory, if exemplars are sampled.
    pub exemplar_reservoir: Option<ExemplarReservoirFactory>,
}

impl ViewProjection {
    /// The projection used when no view selects an instrument.
    pub fn identity(instrument: &Instrument) -> Self {
        ViewProjection {
            name: Cow::Owned(instrument.name().to_string()),
            unit: instrument.unit().map(|u| Cow::Owned(u.to_string())),
            description: instrument.description().map(|d| Cow::Owned(d.to_string())),
            attribute_filter: instrument
                .advisory()
                .attribute_keys
                .as_ref()
                .map(AttributeFilter::new),
            aggregation: None,
            exemplar_reservoir: None,
        }
    }
}

/// The registered views of a provider.
#[derive(Debug, Default)]
pub struct ViewRegistry {
    views: RwLock<Vec<View>>,
}

impl ViewRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        ViewRegistry::default()
    }

    /// Registers a view.
    ///
    /// Only affects instruments created after this call.
    pub fn register(&self, view: View) {
        debug!(criteria = ?view.criteria, "registered view");
        self.views.write().push(view);
    }

    /// Finds the projections of every view selecting the given instrument.
    ///
    /// Returns `None` if no view selects it.
    pub fn find(
        &self,
        instrument: &Instrument,
        scope: &InstrumentationScope,
    ) -> Option<Vec<ViewProjection>> {
        let views = self.views.read();
        let projections = views
            .iter()
            .filter(|view| view.criteria.accepts(instrument, scope))
            .map(|view| view.project(instrument))
            .collect::<Vec<_>>();

        if projections.is_empty() {
            None
        } else {
            Some(projections)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::Advisory;

    fn instrument(
        kind: InstrumentKind,
        name: &'static str,
        unit: Option<&'static str>,
    ) -> Instrument {
        Instrument::new(kind, name.into(), unit.map(Into::into), None, Advisory::default())
            .expect("valid instrument")
    }

    #[test]
    fn test_wildcards() {
        let cases = [
            ("http.*", "http.server.duration", true),
            ("http.*", "http", false),
            ("*", "anything", true),
            ("*.duration", "http.server.duration", true),
            ("*.duration", "http.server.size", false),
            ("req?", "reqs", true),
            ("req?", "req", false),
            ("a*b*c", "axxbyyc", true),
            ("a*b*c", "axxbyy", false),
            ("**", "", true),
        ];

        for (pattern, name, expected) in cases {
            let matched = NamePattern::new(pattern).matches(name);
            assert_eq!(matched, expected, "{} vs {}", pattern, name);
        }
        assert_eq!(NamePattern::new("exact"), NamePattern::Exact("exact".to_string()));
    }

    #[test]
    fn test_build_errors() {
        assert_eq!(View::builder().build().unwrap_err(), ConfigurationError::EmptySelection);
        assert_eq!(
            View::builder().matching_name("http.*").with_name("renamed").build().unwrap_err(),
            ConfigurationError::WildcardRename { pattern: "http.*".to_string() }
        );
        assert!(View::builder()
            .matching_kind(InstrumentKind::Counter)
            .with_name("renamed")
            .build()
            .is_err());
        assert!(View::builder()
            .matching_name("latency")
            .with_aggregation(Aggregation::ExplicitBucketHistogram {
                boundaries: vec![1.0, f64::NAN],
                record_min_max: true,
            })
            .build()
            .is_err());
    }

    #[test]
    fn test_find() {
        let registry = ViewRegistry::new();
        registry.register(
            View::builder()
                .matching_name("requests")
                .with_name("requests.renamed")
                .with_attribute_keys(["method"])
                .build()
                .expect("valid view"),
        );
        registry.register(
            View::builder()
                .matching_kind(InstrumentKind::Counter)
                .matching_meter_name("io.http")
                .with_aggregation(Aggregation::Drop)
                .build()
                .expect("valid view"),
        );

        let scope = InstrumentationScope::builder("io.http").build();
        let other_scope = InstrumentationScope::builder("io.db").build();
        let counter = instrument(InstrumentKind::Counter, "requests", Some("1"));

        let projections = registry.find(&counter, &scope).expect("matches");
        assert_eq!(projections.len(), 2);
        assert_eq!(projections[0].name, "requests.renamed");
        assert_eq!(projections[0].unit.as_deref(), Some("1"));
        assert!(projections[0].attribute_filter.as_ref().map_or(false, |f| f.allows("method")));
        assert_eq!(projections[1].name, "requests");
        assert_eq!(projections[1].aggregation, Some(Aggregation::Drop));

        let projections = registry.find(&counter, &other_scope).expect("matches");
        assert_eq!(projections.len(), 1);

        let histogram = instrument(InstrumentKind::Histogram, "latency", None);
        assert!(registry.find(&histogram, &scope).is_none());
    }

    #[test]
    fn test_identity_projection_uses_advisory_keys() {
        let counter = Instrument::new(
            InstrumentKind::Counter,
            "requests".into(),
            None,
            Some("all requests".into()),
            Advisory::default().with_attribute_keys(["status"]),
        )
        .expect("valid instrument");

        let projection = ViewProjection::identity(&counter);
        assert_eq!(projection.name, "requests");
        assert_eq!(projection.description.as_deref(), Some("all requests"));
        let filter = projection.attribute_filter.expect("advisory keys");
        assert!(filter.allows("status"));
        assert!(!filter.allows("method"));
        assert!(projection.aggregation.is_none());
    }
}
