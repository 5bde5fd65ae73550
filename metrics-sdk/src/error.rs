use thiserror::Error;

use crate::instrument::InstrumentKind;

/// Errors caused by invalid instrument or view configuration.
///
/// These are surfaced synchronously to the code calling the misconfigured API, never at a later
/// collection pass.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConfigurationError {
    /// The instrument name does not follow the instrument naming rules.
    #[error("invalid instrument name `{name}`: must start with a letter, contain only `[A-Za-z0-9_./-]`, and be at most 255 characters")]
    InvalidInstrumentName {
        /// The rejected name.
        name: String,
    },

    /// The instrument unit is not ASCII or is longer than 63 characters.
    #[error("invalid unit `{unit}`: must be ASCII and at most 63 characters")]
    InvalidUnit {
        /// The rejected unit.
        unit: String,
    },

    /// Histogram bucket boundaries are not finite and strictly ascending.
    #[error("invalid histogram boundaries {boundaries:?}: must be finite and strictly ascending")]
    InvalidBoundaries {
        /// The rejected boundaries.
        boundaries: Vec<f64>,
    },

    /// A view was built without any selection criterion.
    #[error("view must select on at least one criterion")]
    EmptySelection,

    /// A view renames every instrument matched by a wildcard, which would collide.
    #[error("view cannot rename instruments selected by the wildcard pattern `{pattern}`")]
    WildcardRename {
        /// The wildcard name pattern.
        pattern: String,
    },
}

/// Errors caused by an aggregation that cannot be applied to an instrument.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum AggregationError {
    /// The configured aggregation does not support the instrument kind.
    #[error("aggregation `{aggregation}` is not compatible with {kind:?} instruments")]
    IncompatibleKind {
        /// Name of the configured aggregation.
        aggregation: &'static str,
        /// Kind of the instrument it was applied to.
        kind: InstrumentKind,
    },
}

/// Errors returned by the metrics SDK.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    /// Invalid instrument or view configuration.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Invalid aggregation for an instrument.
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
}

/// Result type used by fallible SDK operations.
pub type Result<T> = std::result::Result<T, Error>;
