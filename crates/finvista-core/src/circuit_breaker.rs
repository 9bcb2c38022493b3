//! Per-(data type, source) circuit breaker.
//!
//! ```text
//! Closed   --failures reach threshold--> Open
//! Open     --next admission after cooldown--> HalfOpen (one trial)
//! HalfOpen --success--> Closed
//! HalfOpen --failure--> Open (cooldown restarts)
//! ```
//!
//! There is no background timer: the Open -> HalfOpen move happens inside
//! [`CircuitBreaker::try_admit`] when the cooldown has elapsed. Each record is
//! updated under its own map shard lock, so concurrent reports for one pair
//! are serialised while unrelated pairs proceed independently.

use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::SharedConfig;
use crate::DataType;

/// Runtime circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health record for one (data type, source) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitRecord {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    pub last_attempt: Option<Instant>,
}

impl Default for CircuitRecord {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            last_attempt: None,
        }
    }
}

/// Outcome of asking the breaker whether a source may be attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed, normal attempt.
    Granted,
    /// Cooldown elapsed; this caller holds the single half-open trial.
    Trial,
    /// Circuit open (or a trial is already in flight).
    Denied,
}

impl Admission {
    pub const fn is_allowed(self) -> bool {
        !matches!(self, Self::Denied)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CircuitKey {
    data_type: DataType,
    source: String,
}

impl CircuitKey {
    fn new(data_type: &DataType, source: &str) -> Self {
        Self {
            data_type: data_type.clone(),
            source: source.to_owned(),
        }
    }
}

/// Thread-safe table of circuit records.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: SharedConfig,
    circuits: DashMap<CircuitKey, CircuitRecord>,
}

impl CircuitBreaker {
    pub fn new(config: SharedConfig) -> Self {
        Self {
            config,
            circuits: DashMap::new(),
        }
    }

    /// Creates the record for a pair if it does not exist yet.
    pub fn ensure(&self, data_type: &DataType, source: &str) {
        self.circuits
            .entry(CircuitKey::new(data_type, source))
            .or_default();
    }

    /// Read-only availability check.
    ///
    /// True for a closed circuit and for an open one whose cooldown has
    /// elapsed (the next attempt would be the half-open trial).
    pub fn is_available(&self, data_type: &DataType, source: &str, now: Instant) -> bool {
        let cooldown = self.config.circuit().cooldown;
        self.circuits
            .get(&CircuitKey::new(data_type, source))
            .map(|record| admission_for(&record, now, cooldown).is_allowed())
            .unwrap_or(true)
    }

    /// Atomically decides admission and, for a trial, moves Open -> HalfOpen so
    /// that concurrent callers are denied until the trial reports back.
    pub fn try_admit(&self, data_type: &DataType, source: &str, now: Instant) -> Admission {
        let cooldown = self.config.circuit().cooldown;
        let mut record = self
            .circuits
            .entry(CircuitKey::new(data_type, source))
            .or_default();

        let admission = admission_for(&record, now, cooldown);
        match admission {
            Admission::Granted => record.last_attempt = Some(now),
            Admission::Trial => {
                if record.state == CircuitState::Open {
                    info!(%data_type, source, "circuit half-open, admitting trial attempt");
                }
                record.state = CircuitState::HalfOpen;
                record.last_attempt = Some(now);
            }
            Admission::Denied => {}
        }
        admission
    }

    /// Applies a success or failure report.
    pub fn report_outcome(&self, data_type: &DataType, source: &str, success: bool, now: Instant) {
        let threshold = self.config.circuit().failure_threshold;
        let mut record = self
            .circuits
            .entry(CircuitKey::new(data_type, source))
            .or_default();
        record.last_attempt = Some(now);

        if success {
            if record.state != CircuitState::Closed {
                info!(
                    %data_type,
                    source,
                    from = %record.state,
                    "circuit closed after successful attempt"
                );
            }
            record.state = CircuitState::Closed;
            record.consecutive_failures = 0;
            record.opened_at = None;
            return;
        }

        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        match record.state {
            CircuitState::Closed => {
                if record.consecutive_failures >= threshold {
                    info!(
                        %data_type,
                        source,
                        failures = record.consecutive_failures,
                        "circuit opened"
                    );
                    record.state = CircuitState::Open;
                    record.opened_at = Some(now);
                } else {
                    debug!(
                        %data_type,
                        source,
                        failures = record.consecutive_failures,
                        threshold,
                        "source failure recorded"
                    );
                }
            }
            CircuitState::HalfOpen => {
                info!(%data_type, source, "trial attempt failed, circuit reopened");
                record.state = CircuitState::Open;
                record.opened_at = Some(now);
                record.consecutive_failures = record.consecutive_failures.max(threshold);
            }
            // A straggler from before the circuit opened; the cooldown is not extended.
            CircuitState::Open => {}
        }
    }

    /// Returns an unreported half-open trial, leaving the circuit Open with its
    /// original `opened_at` so the next admission may trial again immediately.
    pub fn release(&self, data_type: &DataType, source: &str) {
        if let Some(mut record) = self.circuits.get_mut(&CircuitKey::new(data_type, source)) {
            if record.state == CircuitState::HalfOpen {
                record.state = CircuitState::Open;
            }
        }
    }

    /// Administrative override: forces Closed with zero failures.
    pub fn reset(&self, data_type: &DataType, source: &str) {
        let mut record = self
            .circuits
            .entry(CircuitKey::new(data_type, source))
            .or_default();
        info!(%data_type, source, from = %record.state, "circuit manually reset");
        record.state = CircuitState::Closed;
        record.consecutive_failures = 0;
        record.opened_at = None;
    }

    pub fn reset_all(&self) {
        for mut record in self.circuits.iter_mut() {
            record.state = CircuitState::Closed;
            record.consecutive_failures = 0;
            record.opened_at = None;
        }
        info!("all circuits reset");
    }

    pub fn record(&self, data_type: &DataType, source: &str) -> Option<CircuitRecord> {
        self.circuits
            .get(&CircuitKey::new(data_type, source))
            .map(|record| *record)
    }

    pub fn state(&self, data_type: &DataType, source: &str) -> CircuitState {
        self.record(data_type, source)
            .map(|record| record.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn consecutive_failures(&self, data_type: &DataType, source: &str) -> u32 {
        self.record(data_type, source)
            .map(|record| record.consecutive_failures)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }
}

fn admission_for(record: &CircuitRecord, now: Instant, cooldown: std::time::Duration) -> Admission {
    let elapsed_since = |at: Option<Instant>| {
        at.map(|at| now.saturating_duration_since(at) >= cooldown)
            .unwrap_or(true)
    };

    match record.state {
        CircuitState::Closed => Admission::Granted,
        CircuitState::Open if elapsed_since(record.opened_at) => Admission::Trial,
        CircuitState::Open => Admission::Denied,
        // A trial that never reported back within a cooldown is considered lost.
        CircuitState::HalfOpen if elapsed_since(record.last_attempt) => Admission::Trial,
        CircuitState::HalfOpen => Admission::Denied,
    }
}
