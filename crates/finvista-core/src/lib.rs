//! # Finvista Core
//!
//! Multi-source fetch orchestration for finvista.
//!
//! ## Overview
//!
//! Financial data comes from several independent, unreliable providers. This
//! crate decides which provider to call, when to skip a degraded one and
//! whether a cached result can be served instead:
//!
//! - **Source registry** with per-data-type failover chains
//! - **Circuit breaker** per (data type, source) pair
//! - **Result cache** keyed by request fingerprint, with a TTL
//! - **Rate limiting** per source
//! - **Fetch coordinator** composing the above
//!
//! Provider-specific HTTP calls and response parsing live outside this crate,
//! behind the [`DataSource`] trait.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | TTL result cache |
//! | [`circuit_breaker`] | Per-pair circuit state machine |
//! | [`clock`] | Time sources |
//! | [`config`] | Runtime configuration and environment overrides |
//! | [`coordinator`] | Failover orchestration |
//! | [`data_source`] | Adapter trait and adapter errors |
//! | [`diagnostics`] | Per-source attempt records |
//! | [`error`] | Validation, configuration and fetch errors |
//! | [`registry`] | Failover chains |
//! | [`throttling`] | Per-source rate limiting |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use finvista_core::{fn_source, DataType, FetchArgs, FetchCoordinator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let coordinator = FetchCoordinator::builder()
//!         .with_env_config()?
//!         .register_chain(
//!             DataType::CN_STOCK_DAILY,
//!             [
//!                 ("eastmoney", fn_source(eastmoney::daily)),
//!                 ("sina", fn_source(sina::daily)),
//!             ],
//!         )
//!         .build()?;
//!
//!     let args = FetchArgs::new().with("symbol", "600519")?;
//!     let outcome = coordinator.fetch(&DataType::CN_STOCK_DAILY, &args).await?;
//!     println!("{} rows from {}", outcome.table.len(), outcome.source);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐
//! │ Fetch Coordinator│────▶│ Result Cache     │
//! └────────┬─────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ Source Registry  │────▶│ Circuit Breaker  │
//! │ (failover chain) │     └──────────────────┘
//! └────────┬─────────┘     ┌──────────────────┐
//!          │──────────────▶│ Rate Limiter     │
//!          ▼               └──────────────────┘
//! ┌──────────────────┐
//! │ Data Source      │
//! │ (Adapter Trait)  │
//! └──────────────────┘
//! ```

pub mod cache;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod data_source;
mod data_type;
pub mod diagnostics;
pub mod error;
pub mod registry;
mod request;
mod table;
pub mod throttling;

pub use cache::{CacheMode, ResultCache};
pub use circuit_breaker::{Admission, CircuitBreaker, CircuitRecord, CircuitState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CacheConfig, CircuitBreakerConfig, FetchConfig, NotFoundPolicy, RateBudget, RateLimitConfig,
    SharedConfig,
};
pub use coordinator::{
    FetchCoordinator, FetchCoordinatorBuilder, FetchOptions, FetchOutcome, RequestValidator,
    SourceHealth,
};
pub use data_source::{
    fn_source, typed_source, DataSource, FnSource, SourceError, SourceErrorKind, SourceFuture,
    TypedSource,
};
pub use data_type::DataType;
pub use diagnostics::{AggregatedFailure, AttemptFailure, SkipReason, SourceAttempt};
pub use error::{ConfigError, FetchError, FetchErrorKind, ValidationError};
pub use registry::{SourceEntry, SourceRegistry};
pub use request::{FetchArgs, Fingerprint};
pub use table::Table;
pub use throttling::RateLimiter;
