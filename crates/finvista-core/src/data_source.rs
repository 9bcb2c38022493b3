//! Adapter contract and adapter-level errors.
//!
//! Every provider-specific fetcher is registered as a [`DataSource`]: request
//! arguments in, a [`Table`] or a classified [`SourceError`] out. Providers
//! with their own request shape can be wrapped with [`typed_source`], which
//! decodes [`FetchArgs`] into the adapter's request type on each call.
//!
//! # Error classes
//!
//! | Kind | Code | Transient |
//! |------|------|-----------|
//! | `Network` | `source.network` | yes |
//! | `RateLimited` | `source.rate_limited` | yes |
//! | `MalformedResponse` | `source.malformed_response` | yes |
//! | `Timeout` | `source.timeout` | yes |
//! | `Internal` | `source.internal` | yes |
//! | `NotFound` | `source.not_found` | no, see [`NotFoundPolicy`](crate::NotFoundPolicy) |
//! | `InvalidRequest` | `source.invalid_request` | no |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::{FetchArgs, Table};

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceErrorKind {
    Network,
    RateLimited,
    MalformedResponse,
    Timeout,
    NotFound,
    InvalidRequest,
    Internal,
}

/// Structured adapter error used for failover decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
}

impl SourceError {
    pub fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Network, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::RateLimited, message)
    }

    pub fn malformed_response(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::MalformedResponse, message)
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            SourceErrorKind::Timeout,
            format!("attempt exceeded {}ms", limit.as_millis()),
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::NotFound, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::InvalidRequest, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Internal, message)
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Transient errors count against the circuit and trigger failover.
    pub const fn is_transient(&self) -> bool {
        !matches!(
            self.kind,
            SourceErrorKind::NotFound | SourceErrorKind::InvalidRequest
        )
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Network => "source.network",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::MalformedResponse => "source.malformed_response",
            SourceErrorKind::Timeout => "source.timeout",
            SourceErrorKind::NotFound => "source.not_found",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// Boxed future returned by [`DataSource::fetch`].
pub type SourceFuture<'a> = Pin<Box<dyn Future<Output = Result<Table, SourceError>> + Send + 'a>>;

/// Provider adapter contract.
///
/// Implementations must be `Send + Sync`; one adapter value may serve many
/// concurrent fetches and be registered under several data types.
pub trait DataSource: Send + Sync {
    fn fetch<'a>(&'a self, args: &'a FetchArgs) -> SourceFuture<'a>;
}

/// Adapter backed by an async closure over the raw arguments.
pub struct FnSource<F> {
    fetch: F,
}

impl<F, Fut> DataSource for FnSource<F>
where
    F: Fn(FetchArgs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Table, SourceError>> + Send + 'static,
{
    fn fetch<'a>(&'a self, args: &'a FetchArgs) -> SourceFuture<'a> {
        Box::pin((self.fetch)(args.clone()))
    }
}

pub fn fn_source<F, Fut>(fetch: F) -> Arc<dyn DataSource>
where
    F: Fn(FetchArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Table, SourceError>> + Send + 'static,
{
    Arc::new(FnSource { fetch })
}

/// Adapter with its own request type `R`, decoded from the arguments per call.
pub struct TypedSource<R, F> {
    fetch: F,
    request: PhantomData<fn() -> R>,
}

impl<R, F, Fut> DataSource for TypedSource<R, F>
where
    R: DeserializeOwned,
    F: Fn(R) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Table, SourceError>> + Send + 'static,
{
    fn fetch<'a>(&'a self, args: &'a FetchArgs) -> SourceFuture<'a> {
        match args.decode::<R>() {
            Ok(request) => Box::pin((self.fetch)(request)),
            Err(error) => {
                let error = SourceError::invalid_request(format!("cannot decode request: {error}"));
                Box::pin(async move { Err::<Table, _>(error) })
            }
        }
    }
}

pub fn typed_source<R, F, Fut>(fetch: F) -> Arc<dyn DataSource>
where
    R: DeserializeOwned + 'static,
    F: Fn(R) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Table, SourceError>> + Send + 'static,
{
    Arc::new(TypedSource {
        fetch,
        request: PhantomData,
    })
}
