//! Per-source attempt tracking for failover diagnostics.

use std::fmt::{Display, Formatter};

use crate::data_source::{SourceError, SourceErrorKind};
use crate::DataType;

/// Why a source was passed over without being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Circuit breaker is open for this (data type, source) pair.
    CircuitOpen,
    /// The source's attempt budget is exhausted.
    RateLimited,
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CircuitOpen => f.write_str("skipped: circuit open"),
            Self::RateLimited => f.write_str("skipped: rate limited"),
        }
    }
}

/// What happened to one source in an exhausted chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    Skipped(SkipReason),
    Failed(SourceError),
}

impl AttemptFailure {
    pub const fn was_invoked(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn error(&self) -> Option<&SourceError> {
        match self {
            Self::Failed(error) => Some(error),
            Self::Skipped(_) => None,
        }
    }
}

impl Display for AttemptFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skipped(reason) => write!(f, "{reason}"),
            Self::Failed(error) => write!(f, "{error}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAttempt {
    pub source: String,
    pub failure: AttemptFailure,
}

/// Ordered record of every source in a chain that did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedFailure {
    data_type: DataType,
    attempts: Vec<SourceAttempt>,
}

impl AggregatedFailure {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            attempts: Vec::new(),
        }
    }

    pub fn record_skip(&mut self, source: impl Into<String>, reason: SkipReason) {
        self.attempts.push(SourceAttempt {
            source: source.into(),
            failure: AttemptFailure::Skipped(reason),
        });
    }

    pub fn record_error(&mut self, source: impl Into<String>, error: SourceError) {
        self.attempts.push(SourceAttempt {
            source: source.into(),
            failure: AttemptFailure::Failed(error),
        });
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    /// Attempts in chain order.
    pub fn attempts(&self) -> &[SourceAttempt] {
        &self.attempts
    }

    pub fn failure_for(&self, source: &str) -> Option<&AttemptFailure> {
        self.attempts
            .iter()
            .find(|attempt| attempt.source == source)
            .map(|attempt| &attempt.failure)
    }

    /// Number of sources whose adapter was actually called.
    pub fn invoked_count(&self) -> usize {
        self.attempts
            .iter()
            .filter(|attempt| attempt.failure.was_invoked())
            .count()
    }

    pub fn all_skipped(&self) -> bool {
        self.invoked_count() == 0
    }

    /// True when every source was invoked and each reported no data.
    pub fn all_not_found(&self) -> bool {
        !self.attempts.is_empty()
            && self.attempts.iter().all(|attempt| {
                attempt
                    .failure
                    .error()
                    .is_some_and(|error| error.kind() == SourceErrorKind::NotFound)
            })
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// One-line summary, e.g. `eastmoney: skipped: circuit open -> sina: timeout (source.timeout)`.
    pub fn summary(&self) -> String {
        self.attempts
            .iter()
            .map(|attempt| format!("{}: {}", attempt.source, attempt.failure))
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}
