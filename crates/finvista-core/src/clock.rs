//! Time sources for circuit, cache and rate-limit decisions.
//!
//! Every time-dependent decision in the coordinator reads "now" from a
//! [`Clock`], so tests can drive cooldowns and TTLs deterministically with
//! [`ManualClock`] instead of sleeping.

use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Monotonic time source.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Instant;
}

/// Wall-clock backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
///
/// Clones share the same offset, so a test can hand one clone to the
/// coordinator and advance the other.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.lock_offset();
        *offset = offset.saturating_add(by);
    }

    fn lock_offset(&self) -> MutexGuard<'_, Duration> {
        self.offset
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.lock_offset()
    }
}

/// Adapts a shared [`Clock`] to governor's clock trait.
#[derive(Debug, Clone)]
pub(crate) struct GovernorClock {
    inner: Arc<dyn Clock>,
}

impl GovernorClock {
    pub(crate) fn new(inner: Arc<dyn Clock>) -> Self {
        Self { inner }
    }
}

impl governor::clock::Clock for GovernorClock {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        self.inner.now()
    }
}
