use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use governor::middleware::NoOpMiddleware;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::Quota;
use tracing::debug;

use crate::clock::{Clock, GovernorClock};
use crate::config::{RateBudget, SharedConfig, MAX_QUOTA_WINDOW};

type DirectRateLimiter =
    governor::RateLimiter<NotKeyed, InMemoryState, GovernorClock, NoOpMiddleware<Instant>>;

struct SourceLimiter {
    budget: RateBudget,
    limiter: DirectRateLimiter,
}

/// Per-source attempt throttling.
///
/// Budgets are keyed by source name only: a provider's quota is shared by
/// every data type routed through it. The budget is looked up on each call;
/// when it changes, that source's limiter is rebuilt with a fresh allowance.
pub struct RateLimiter {
    config: SharedConfig,
    clock: GovernorClock,
    limiters: DashMap<String, SourceLimiter>,
}

impl RateLimiter {
    pub fn new(config: SharedConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock: GovernorClock::new(clock),
            limiters: DashMap::new(),
        }
    }

    /// Returns true and consumes one unit of budget if `source` may be attempted now.
    pub fn allow(&self, source: &str) -> bool {
        let Some(budget) = self.config.budget_for(source) else {
            return true;
        };
        let Some(quota) = quota_from_budget(budget) else {
            return true;
        };

        let mut entry = self
            .limiters
            .entry(source.to_owned())
            .or_insert_with(|| SourceLimiter {
                budget,
                limiter: governor::RateLimiter::direct_with_clock(quota, &self.clock),
            });

        if entry.budget != budget {
            debug!(source, ?budget, "rate budget changed, rebuilding limiter");
            *entry = SourceLimiter {
                budget,
                limiter: governor::RateLimiter::direct_with_clock(quota, &self.clock),
            };
        }

        entry.limiter.check().is_ok()
    }

    /// Forgets consumed budget for `source`.
    pub fn reset(&self, source: &str) {
        self.limiters.remove(source);
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("tracked_sources", &self.limiters.len())
            .finish_non_exhaustive()
    }
}

/// Shortest replenish period handed to governor.
const MIN_CELL_PERIOD: Duration = Duration::from_millis(1);

fn quota_from_budget(budget: RateBudget) -> Option<Quota> {
    let burst = NonZeroU32::new(budget.quota_limit)?;
    // governor stores `period * burst` as u64 nanoseconds.
    let window = budget.quota_window.min(MAX_QUOTA_WINDOW);
    let period = (window / burst.get()).max(MIN_CELL_PERIOD);

    Quota::with_period(period).map(|quota| quota.allow_burst(burst))
}
