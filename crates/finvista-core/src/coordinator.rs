//! Fetch coordination: cache, failover chain, circuit and rate-limit checks.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{CacheMode, ResultCache};
use crate::circuit_breaker::{Admission, CircuitBreaker, CircuitRecord, CircuitState};
use crate::clock::{Clock, SystemClock};
use crate::config::{FetchConfig, NotFoundPolicy, SharedConfig};
use crate::data_source::{DataSource, SourceError, SourceErrorKind};
use crate::diagnostics::{AggregatedFailure, SkipReason};
use crate::registry::SourceRegistry;
use crate::throttling::RateLimiter;
use crate::{ConfigError, DataType, FetchArgs, FetchError, Table, ValidationError};

/// Request check run before the cache or any source is consulted.
pub type RequestValidator = Arc<dyn Fn(&FetchArgs) -> Result<(), String> + Send + Sync>;

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub cache_mode: CacheMode,
}

impl FetchOptions {
    pub const fn with_cache_mode(cache_mode: CacheMode) -> Self {
        Self { cache_mode }
    }
}

/// Successful fetch.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub table: Arc<Table>,
    /// Source that produced the table; preserved across cache hits.
    pub source: String,
    pub from_cache: bool,
    /// Sources considered in this call, in order, ending with `source`.
    /// Empty for a cache hit.
    pub source_chain: Vec<String>,
    pub warnings: Vec<String>,
    pub latency: Duration,
}

/// Circuit snapshot for one registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceHealth {
    pub status: CircuitState,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone)]
struct CachedFetch {
    table: Arc<Table>,
    source: String,
}

/// Builder for [`FetchCoordinator`].
#[derive(Default)]
pub struct FetchCoordinatorBuilder {
    config: Option<SharedConfig>,
    clock: Option<Arc<dyn Clock>>,
    registrations: Vec<(DataType, String, Arc<dyn DataSource>, i32)>,
    validators: HashMap<DataType, RequestValidator>,
}

impl FetchCoordinatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: FetchConfig) -> Result<Self, ConfigError> {
        self.config = Some(SharedConfig::new(config)?);
        Ok(self)
    }

    /// Uses `FINVISTA_*` environment variables over the defaults.
    pub fn with_env_config(self) -> Result<Self, ConfigError> {
        self.with_config(FetchConfig::from_env()?)
    }

    /// Shares an existing handle, so the caller can update settings later.
    pub fn with_shared_config(mut self, config: SharedConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn register(
        mut self,
        data_type: DataType,
        name: impl Into<String>,
        source: Arc<dyn DataSource>,
        priority: i32,
    ) -> Self {
        self.registrations
            .push((data_type, name.into(), source, priority));
        self
    }

    /// Registers a whole failover chain; priorities follow iteration order.
    pub fn register_chain<I, S>(mut self, data_type: DataType, chain: I) -> Self
    where
        I: IntoIterator<Item = (S, Arc<dyn DataSource>)>,
        S: Into<String>,
    {
        for (priority, (name, source)) in (0_i32..).zip(chain) {
            self = self.register(data_type.clone(), name, source, priority);
        }
        self
    }

    pub fn with_validator<F>(mut self, data_type: DataType, validator: F) -> Self
    where
        F: Fn(&FetchArgs) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validators.insert(data_type, Arc::new(validator));
        self
    }

    pub fn build(self) -> Result<FetchCoordinator, ConfigError> {
        let config = self.config.unwrap_or_default();
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let coordinator = FetchCoordinator {
            registry: SourceRegistry::new(),
            circuits: CircuitBreaker::new(config.clone()),
            cache: ResultCache::new(config.clone()),
            limiter: RateLimiter::new(config.clone(), Arc::clone(&clock)),
            config,
            clock,
            validators: self.validators,
        };

        for (data_type, name, source, priority) in self.registrations {
            coordinator.register(data_type, name, source, priority)?;
        }

        Ok(coordinator)
    }
}

/// Explicit orchestrator instance owning its registry, circuit table, cache
/// and rate limiters. Share it behind an `Arc` for concurrent callers.
pub struct FetchCoordinator {
    registry: SourceRegistry,
    circuits: CircuitBreaker,
    cache: ResultCache<CachedFetch>,
    limiter: RateLimiter,
    config: SharedConfig,
    clock: Arc<dyn Clock>,
    validators: HashMap<DataType, RequestValidator>,
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("registry", &self.registry)
            .field("circuits", &self.circuits.len())
            .field("cached", &self.cache.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FetchCoordinator {
    pub fn builder() -> FetchCoordinatorBuilder {
        FetchCoordinatorBuilder::new()
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    /// Adds or replaces a source. A replaced source keeps its circuit record.
    pub fn register(
        &self,
        data_type: DataType,
        name: impl Into<String>,
        source: Arc<dyn DataSource>,
        priority: i32,
    ) -> Result<(), ConfigError> {
        let name = name.into();
        let replaced = self
            .registry
            .register(data_type.clone(), name.clone(), source, priority)?;
        self.circuits.ensure(&data_type, &name);
        debug!(%data_type, source = %name, priority, replaced, "source registered");
        Ok(())
    }

    pub fn sources(&self, data_type: &DataType) -> Vec<String> {
        self.registry.sources(data_type)
    }

    pub fn set_priority<S: AsRef<str>>(
        &self,
        data_type: &DataType,
        order: &[S],
    ) -> Result<(), ConfigError> {
        self.registry.set_priority(data_type, order)?;
        info!(%data_type, order = ?self.registry.sources(data_type), "source priority updated");
        Ok(())
    }

    pub fn data_types(&self) -> Vec<DataType> {
        self.registry.data_types()
    }

    pub fn reset_circuit(&self, data_type: &DataType, name: &str) -> Result<(), ConfigError> {
        if !self.registry.contains(data_type, name) {
            return Err(ConfigError::UnknownSource {
                data_type: data_type.clone(),
                name: name.to_owned(),
            });
        }
        self.circuits.reset(data_type, name);
        Ok(())
    }

    pub fn reset_all_circuits(&self) {
        self.circuits.reset_all();
    }

    pub fn circuit(&self, data_type: &DataType, name: &str) -> Option<CircuitRecord> {
        self.circuits.record(data_type, name)
    }

    /// Circuit state of every registered source, keyed by data type.
    pub fn health(&self) -> BTreeMap<DataType, BTreeMap<String, SourceHealth>> {
        self.registry
            .data_types()
            .into_iter()
            .map(|data_type| {
                let sources = self
                    .registry
                    .sources(&data_type)
                    .into_iter()
                    .map(|name| {
                        let record = self.circuits.record(&data_type, &name).unwrap_or_default();
                        let health = SourceHealth {
                            status: record.state,
                            consecutive_failures: record.consecutive_failures,
                        };
                        (name, health)
                    })
                    .collect();
                (data_type, sources)
            })
            .collect()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        debug!("result cache cleared");
    }

    pub fn purge_expired_cache(&self) {
        self.cache.purge_expired(self.clock.now());
    }

    pub async fn fetch(
        &self,
        data_type: &DataType,
        args: &FetchArgs,
    ) -> Result<FetchOutcome, FetchError> {
        self.fetch_with(data_type, args, FetchOptions::default()).await
    }

    /// Serializes `request` into [`FetchArgs`] and fetches.
    pub async fn fetch_request<R: Serialize>(
        &self,
        data_type: &DataType,
        request: &R,
    ) -> Result<FetchOutcome, FetchError> {
        let args = FetchArgs::from_request(request)?;
        self.fetch(data_type, &args).await
    }

    /// Fetches until `signal` completes, whichever comes first.
    ///
    /// On cancellation the remaining sources are abandoned and any half-open
    /// trial held by the in-flight attempt is released.
    pub async fn fetch_until<S>(
        &self,
        data_type: &DataType,
        args: &FetchArgs,
        signal: S,
    ) -> Result<FetchOutcome, FetchError>
    where
        S: Future,
    {
        tokio::select! {
            biased;
            _ = signal => {
                info!(%data_type, "fetch cancelled");
                Err(FetchError::Cancelled {
                    data_type: data_type.clone(),
                })
            }
            result = self.fetch(data_type, args) => result,
        }
    }

    pub async fn fetch_with(
        &self,
        data_type: &DataType,
        args: &FetchArgs,
        options: FetchOptions,
    ) -> Result<FetchOutcome, FetchError> {
        let started = Instant::now();
        self.validate(data_type, args)?;

        let fingerprint = args.fingerprint(data_type);
        if options.cache_mode.reads() {
            if let Some(cached) = self.cache.get(&fingerprint, self.clock.now()) {
                debug!(%data_type, source = %cached.source, "cache hit");
                return Ok(FetchOutcome {
                    table: cached.table,
                    source: cached.source,
                    from_cache: true,
                    source_chain: Vec::new(),
                    warnings: Vec::new(),
                    latency: started.elapsed(),
                });
            }
        }

        let chain = self.registry.entries(data_type);
        if chain.is_empty() {
            return Err(ConfigError::NoSources {
                data_type: data_type.clone(),
            }
            .into());
        }

        let attempt_timeout = self.config.attempt_timeout();
        let mut failure = AggregatedFailure::new(data_type.clone());
        let mut source_chain = Vec::with_capacity(chain.len());

        for entry in &chain {
            let name = entry.name.as_str();
            source_chain.push(entry.name.clone());

            let admission = self.circuits.try_admit(data_type, name, self.clock.now());
            if !admission.is_allowed() {
                debug!(%data_type, source = name, "skipping source, circuit open");
                failure.record_skip(name, SkipReason::CircuitOpen);
                continue;
            }

            if !self.limiter.allow(name) {
                if admission == Admission::Trial {
                    self.circuits.release(data_type, name);
                }
                debug!(%data_type, source = name, "skipping source, rate limited");
                failure.record_skip(name, SkipReason::RateLimited);
                continue;
            }

            let mut trial = TrialGuard {
                circuits: &self.circuits,
                data_type,
                source: name,
                armed: admission == Admission::Trial,
            };

            let result = match attempt_timeout {
                Some(limit) => tokio::time::timeout(limit, entry.source.fetch(args))
                    .await
                    .unwrap_or_else(|_| Err(SourceError::timeout(limit))),
                None => entry.source.fetch(args).await,
            };
            let now = self.clock.now();

            let error = match result {
                Ok(table) => {
                    trial.disarm();
                    self.circuits.report_outcome(data_type, name, true, now);

                    let table = Arc::new(table);
                    if options.cache_mode.writes() {
                        self.cache.put(
                            fingerprint,
                            CachedFetch {
                                table: Arc::clone(&table),
                                source: entry.name.clone(),
                            },
                            now,
                        );
                    }

                    let mut warnings = Vec::new();
                    if !failure.is_empty() {
                        info!(
                            %data_type,
                            source = name,
                            passed_over = failure.attempts().len(),
                            "failover succeeded"
                        );
                        warnings.push(format!(
                            "source fallback succeeded with '{name}' after {} unsuccessful \
                             source(s): {}",
                            failure.attempts().len(),
                            failure.summary()
                        ));
                    }

                    return Ok(FetchOutcome {
                        table,
                        source: entry.name.clone(),
                        from_cache: false,
                        source_chain,
                        warnings,
                        latency: started.elapsed(),
                    });
                }
                Err(error) => error,
            };

            // Neutral outcomes leave the counter alone; the guard returns any trial.
            match error.kind() {
                SourceErrorKind::InvalidRequest => {
                    debug!(%data_type, source = name, error = %error, "source rejected request");
                }
                SourceErrorKind::NotFound
                    if self.config.not_found_policy() == NotFoundPolicy::Exempt =>
                {
                    debug!(%data_type, source = name, "source has no data for request");
                }
                _ => {
                    trial.disarm();
                    self.circuits.report_outcome(data_type, name, false, now);
                    warn!(%data_type, source = name, error = %error, "source attempt failed");
                }
            }
            failure.record_error(name, error);
        }

        if failure.all_skipped() {
            warn!(%data_type, attempts = %failure.summary(), "no source available");
            Err(FetchError::AllSourcesUnavailable(failure))
        } else {
            warn!(%data_type, attempts = %failure.summary(), "all sources failed");
            Err(FetchError::AllSourcesFailed(failure))
        }
    }

    fn validate(&self, data_type: &DataType, args: &FetchArgs) -> Result<(), ValidationError> {
        let Some(validator) = self.validators.get(data_type) else {
            return Ok(());
        };
        validator(args).map_err(|message| ValidationError::Rejected {
            data_type: data_type.clone(),
            message,
        })
    }
}

/// Returns a half-open trial to the breaker if the attempt ends without a
/// reported outcome, including when the fetch future is dropped mid-attempt.
struct TrialGuard<'a> {
    circuits: &'a CircuitBreaker,
    data_type: &'a DataType,
    source: &'a str,
    armed: bool,
}

impl TrialGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(data_type = %self.data_type, source = self.source, "releasing unreported trial");
            self.circuits.release(self.data_type, self.source);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::data_source::fn_source;

    fn table(source: &str) -> Table {
        Table::new(["source"])
            .and_then(|table| table.with_row(vec![json!(source)]))
            .expect("valid table")
    }

    #[tokio::test]
    async fn builder_registers_chain_in_order() {
        let coordinator = FetchCoordinator::builder()
            .register_chain(
                DataType::CN_STOCK_QUOTE,
                [
                    ("eastmoney", fn_source(|_| async { Ok(table("eastmoney")) })),
                    ("sina", fn_source(|_| async { Ok(table("sina")) })),
                ],
            )
            .build()
            .expect("valid coordinator");

        assert_eq!(
            coordinator.sources(&DataType::CN_STOCK_QUOTE),
            vec!["eastmoney", "sina"]
        );

        let outcome = coordinator
            .fetch(&DataType::CN_STOCK_QUOTE, &FetchArgs::new())
            .await
            .expect("first source succeeds");
        assert_eq!(outcome.source, "eastmoney");
        assert_eq!(outcome.source_chain, vec!["eastmoney"]);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn builder_rejects_blank_source_name() {
        let result = FetchCoordinator::builder()
            .register(
                DataType::CN_STOCK_QUOTE,
                "",
                fn_source(|_| async { Ok(table("x")) }),
                0,
            )
            .build();

        assert!(matches!(result, Err(ConfigError::EmptySourceName)));
    }

    #[test]
    fn health_lists_every_registered_source() {
        let coordinator = FetchCoordinator::builder()
            .register(
                DataType::US_STOCK_DAILY,
                "yahoo",
                fn_source(|_| async { Ok(table("yahoo")) }),
                0,
            )
            .build()
            .expect("valid coordinator");

        let health = coordinator.health();
        let yahoo = health
            .get(&DataType::US_STOCK_DAILY)
            .and_then(|sources| sources.get("yahoo"))
            .expect("registered source is reported");

        assert_eq!(
            *yahoo,
            SourceHealth {
                status: CircuitState::Closed,
                consecutive_failures: 0
            }
        );
        assert_eq!(
            serde_json::to_value(yahoo).expect("serializable"),
            json!({"status": "CLOSED", "consecutive_failures": 0})
        );
    }

    #[test]
    fn reset_circuit_requires_registered_pair() {
        let coordinator = FetchCoordinator::builder()
            .build()
            .expect("valid coordinator");

        assert_eq!(
            coordinator.reset_circuit(&DataType::CN_FUND_NAV, "tiantian"),
            Err(ConfigError::UnknownSource {
                data_type: DataType::CN_FUND_NAV,
                name: String::from("tiantian"),
            })
        );
    }
}
