//! Runtime configuration consumed by the coordinator.
//!
//! Components hold a [`SharedConfig`] handle and read the section they need on
//! every call, so a change made through the handle takes effect on the next
//! fetch without rebuilding anything.
//!
//! # Environment Variables
//!
//! | Variable | Field | Example |
//! |----------|-------|---------|
//! | `FINVISTA_CACHE_ENABLED` | `cache.enabled` | `true` |
//! | `FINVISTA_CACHE_TTL_SECS` | `cache.ttl` | `300` |
//! | `FINVISTA_TIMEOUT_SECS` | `attempt_timeout` | `30` |
//! | `FINVISTA_CIRCUIT_THRESHOLD` | `circuit.failure_threshold` | `3` |
//! | `FINVISTA_CIRCUIT_COOLDOWN_SECS` | `circuit.cooldown` | `60` |
//! | `FINVISTA_NOT_FOUND_POLICY` | `not_found_policy` | `count` or `exempt` |

use std::collections::HashMap;
use std::env;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::ConfigError;

/// Result cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(300),
        }
    }
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Longest accepted [`RateBudget::quota_window`].
pub const MAX_QUOTA_WINDOW: Duration = Duration::from_secs(365 * 24 * 3600);

/// Attempt budget for one provider: at most `quota_limit` attempts per
/// `quota_window`, replenished evenly across the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    pub quota_limit: u32,
    pub quota_window: Duration,
}

impl RateBudget {
    pub const fn per_minute(quota_limit: u32) -> Self {
        Self {
            quota_limit,
            quota_window: Duration::from_secs(60),
        }
    }

    fn validate(self) -> Result<(), ConfigError> {
        if self.quota_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rate_limits.quota_limit",
                message: String::from("must be greater than zero"),
            });
        }
        if self.quota_window.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "rate_limits.quota_window",
                message: String::from("must be greater than zero"),
            });
        }
        if self.quota_window > MAX_QUOTA_WINDOW {
            return Err(ConfigError::InvalidValue {
                field: "rate_limits.quota_window",
                message: String::from("must be at most 365 days"),
            });
        }
        Ok(())
    }
}

/// Per-source attempt budgets. Sources without an entry fall back to
/// `default`; `None` everywhere means unthrottled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub default: Option<RateBudget>,
    pub per_source: HashMap<String, RateBudget>,
}

impl RateLimitConfig {
    pub fn budget_for(&self, source: &str) -> Option<RateBudget> {
        self.per_source.get(source).copied().or(self.default)
    }
}

/// Whether a provider's "no data for this query" answer counts as a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotFoundPolicy {
    /// Scarcity is treated as unreliability and increments the failure count.
    #[default]
    CountAsFailure,
    /// A valid, non-faulting answer: the circuit is left untouched.
    Exempt,
}

impl NotFoundPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "count" | "count_as_failure" => Some(Self::CountAsFailure),
            "exempt" => Some(Self::Exempt),
            _ => None,
        }
    }
}

/// Complete coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    pub cache: CacheConfig,
    pub circuit: CircuitBreakerConfig,
    pub rate_limits: RateLimitConfig,
    /// Upper bound for a single adapter invocation; `None` disables the bound.
    pub attempt_timeout: Option<Duration>,
    pub not_found_policy: NotFoundPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            circuit: CircuitBreakerConfig::default(),
            rate_limits: RateLimitConfig::default(),
            attempt_timeout: Some(Duration::from_secs(30)),
            not_found_policy: NotFoundPolicy::default(),
        }
    }
}

impl FetchConfig {
    /// Defaults overlaid with `FINVISTA_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Defaults overlaid with values from an arbitrary variable lookup.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("FINVISTA_CACHE_ENABLED") {
            config.cache.enabled = parse_bool("FINVISTA_CACHE_ENABLED", &value)?;
        }
        if let Some(value) = lookup("FINVISTA_CACHE_TTL_SECS") {
            config.cache.ttl = parse_secs("FINVISTA_CACHE_TTL_SECS", &value)?;
        }
        if let Some(value) = lookup("FINVISTA_TIMEOUT_SECS") {
            config.attempt_timeout = Some(parse_secs("FINVISTA_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = lookup("FINVISTA_CIRCUIT_THRESHOLD") {
            config.circuit.failure_threshold =
                value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    var: "FINVISTA_CIRCUIT_THRESHOLD",
                    value: value.clone(),
                })?;
        }
        if let Some(value) = lookup("FINVISTA_CIRCUIT_COOLDOWN_SECS") {
            config.circuit.cooldown = parse_secs("FINVISTA_CIRCUIT_COOLDOWN_SECS", &value)?;
        }
        if let Some(value) = lookup("FINVISTA_NOT_FOUND_POLICY") {
            config.not_found_policy =
                NotFoundPolicy::parse(&value).ok_or_else(|| ConfigError::InvalidEnv {
                    var: "FINVISTA_NOT_FOUND_POLICY",
                    value: value.clone(),
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.circuit.failure_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "circuit.failure_threshold",
                message: String::from("must be at least 1"),
            });
        }
        if self.attempt_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(ConfigError::InvalidValue {
                field: "attempt_timeout",
                message: String::from("must be greater than zero"),
            });
        }
        if let Some(budget) = self.rate_limits.default {
            budget.validate()?;
        }
        for budget in self.rate_limits.per_source.values() {
            budget.validate()?;
        }
        Ok(())
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            value: value.to_owned(),
        }),
    }
}

fn parse_secs(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ConfigError::InvalidEnv {
            var,
            value: value.to_owned(),
        })
}

/// Shared, dynamically updatable configuration handle.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<FetchConfig>>,
}

impl SharedConfig {
    pub fn new(config: FetchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(config)),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, FetchConfig> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, FetchConfig> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> FetchConfig {
        self.read().clone()
    }

    pub fn cache(&self) -> CacheConfig {
        self.read().cache
    }

    pub fn circuit(&self) -> CircuitBreakerConfig {
        self.read().circuit
    }

    pub fn budget_for(&self, source: &str) -> Option<RateBudget> {
        self.read().rate_limits.budget_for(source)
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.read().attempt_timeout
    }

    pub fn not_found_policy(&self) -> NotFoundPolicy {
        self.read().not_found_policy
    }

    /// Applies `change` to a copy, validates it, then publishes it.
    /// An invalid result leaves the current configuration untouched.
    pub fn update<F>(&self, change: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut FetchConfig),
    {
        let mut guard = self.write();
        let mut next = guard.clone();
        change(&mut next);
        next.validate()?;
        *guard = next;
        Ok(())
    }

    pub fn set_cache(&self, enabled: bool, ttl: Duration) -> Result<(), ConfigError> {
        self.update(|config| config.cache = CacheConfig { enabled, ttl })
    }

    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), ConfigError> {
        self.update(|config| config.attempt_timeout = timeout)
    }

    pub fn set_circuit(
        &self,
        failure_threshold: u32,
        cooldown: Duration,
    ) -> Result<(), ConfigError> {
        self.update(|config| {
            config.circuit = CircuitBreakerConfig {
                failure_threshold,
                cooldown,
            }
        })
    }

    pub fn set_rate_limit(
        &self,
        source: impl Into<String>,
        budget: Option<RateBudget>,
    ) -> Result<(), ConfigError> {
        let source = source.into();
        self.update(|config| match budget {
            Some(budget) => {
                config.rate_limits.per_source.insert(source, budget);
            }
            None => {
                config.rate_limits.per_source.remove(&source);
            }
        })
    }

    pub fn set_default_rate_limit(&self, budget: Option<RateBudget>) -> Result<(), ConfigError> {
        self.update(|config| config.rate_limits.default = budget)
    }

    pub fn set_not_found_policy(&self, policy: NotFoundPolicy) -> Result<(), ConfigError> {
        self.update(|config| config.not_found_policy = policy)
    }
}
