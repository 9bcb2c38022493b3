use thiserror::Error;

use crate::diagnostics::AggregatedFailure;
use crate::DataType;

/// Malformed request, table or identifier. Raised before any source is touched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("argument key cannot be empty")]
    EmptyArgumentKey,
    #[error("argument key '{key}' must be ASCII alphanumeric or '_'")]
    InvalidArgumentKey { key: String },
    #[error("argument '{key}' could not be encoded: {message}")]
    ArgumentEncoding { key: String, message: String },
    #[error("request arguments must serialize to a JSON object")]
    ArgumentsNotObject,

    #[error("data type must be non-empty lowercase snake_case: '{value}'")]
    InvalidDataType { value: String },

    #[error("column name cannot be empty")]
    EmptyColumnName,
    #[error("duplicate column '{name}'")]
    DuplicateColumn { name: String },
    #[error("row has {actual} values, table has {expected} columns")]
    RowWidthMismatch { expected: usize, actual: usize },

    #[error("request rejected for '{data_type}': {message}")]
    Rejected { data_type: DataType, message: String },
}

/// Registry or configuration misuse. Never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown data type '{data_type}'")]
    UnknownDataType { data_type: DataType },
    #[error("no sources registered for data type '{data_type}'")]
    NoSources { data_type: DataType },
    #[error(
        "priority order for '{data_type}' must name exactly the registered sources {expected:?}, got {given:?}"
    )]
    PriorityMismatch {
        data_type: DataType,
        expected: Vec<String>,
        given: Vec<String>,
    },
    #[error("source '{name}' appears more than once for '{data_type}'")]
    DuplicateSourceName { data_type: DataType, name: String },
    #[error("source '{name}' is not registered for '{data_type}'")]
    UnknownSource { data_type: DataType, name: String },
    #[error("source name cannot be empty")]
    EmptySourceName,

    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: &'static str, message: String },
    #[error("environment variable {var} has invalid value '{value}'")]
    InvalidEnv { var: &'static str, value: String },
}

/// Broad classification of a [`FetchError`], for exhaustive handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Validation,
    Configuration,
    Aggregated,
    Cancelled,
}

/// Terminal error of a coordinated fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Every source in the chain was skipped; none was invoked.
    #[error("no source available for '{}': {}", .0.data_type(), .0.summary())]
    AllSourcesUnavailable(AggregatedFailure),

    /// At least one source was invoked and none succeeded.
    #[error("all sources failed for '{}': {}", .0.data_type(), .0.summary())]
    AllSourcesFailed(AggregatedFailure),

    #[error("fetch for '{data_type}' was cancelled")]
    Cancelled { data_type: DataType },
}

impl FetchError {
    pub const fn kind(&self) -> FetchErrorKind {
        match self {
            Self::Validation(_) => FetchErrorKind::Validation,
            Self::Config(_) => FetchErrorKind::Configuration,
            Self::AllSourcesUnavailable(_) | Self::AllSourcesFailed(_) => {
                FetchErrorKind::Aggregated
            }
            Self::Cancelled { .. } => FetchErrorKind::Cancelled,
        }
    }

    /// Per-source attempt map, when the whole chain was exhausted.
    pub fn aggregated(&self) -> Option<&AggregatedFailure> {
        match self {
            Self::AllSourcesUnavailable(failure) | Self::AllSourcesFailed(failure) => Some(failure),
            _ => None,
        }
    }
}
