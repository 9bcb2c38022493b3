//! Behavior-driven tests for result caching in front of the source chain.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{args, coordinator, ScriptedSource, T};
use finvista_core::{
    CacheMode, FetchArgs, FetchConfig, FetchCoordinator, FetchOptions, ManualClock, SourceError,
};

const TTL: Duration = Duration::from_secs(300);

// =============================================================================
// Cache: Hits and Expiry
// =============================================================================

#[tokio::test]
async fn when_request_repeats_within_ttl_cached_table_is_served_without_invocation() {
    // Given: A chain where B answered the first request
    let clock = ManualClock::new();
    let a = ScriptedSource::failing("A", SourceError::network("down"));
    let b = ScriptedSource::succeeding("B");
    let coordinator = coordinator(&clock, &[("A", &a), ("B", &b)]);
    let first = coordinator
        .fetch(&T, &args("600519"))
        .await
        .expect("B should answer");

    // When: The same request is made just before the TTL ends
    clock.advance(TTL);
    let second = coordinator
        .fetch(&T, &args("600519"))
        .await
        .expect("cache should answer");

    // Then: The identical table is served with B's attribution and no invocation
    assert!(second.from_cache);
    assert_eq!(second.source, "B");
    assert!(Arc::ptr_eq(&first.table, &second.table));
    assert!(second.source_chain.is_empty());
    assert_eq!((a.calls(), b.calls()), (1, 1));
}

#[tokio::test]
async fn when_ttl_has_expired_full_chain_is_evaluated_again() {
    // Given: A cached result
    let clock = ManualClock::new();
    let a = ScriptedSource::succeeding("A");
    let coordinator = coordinator(&clock, &[("A", &a)]);
    coordinator.fetch(&T, &args("600519")).await.expect("A answers");

    // When: The TTL has passed
    clock.advance(TTL + Duration::from_millis(1));
    let outcome = coordinator
        .fetch(&T, &args("600519"))
        .await
        .expect("A answers again");

    // Then: The chain runs again
    assert!(!outcome.from_cache);
    assert_eq!(a.calls(), 2);
}

#[tokio::test]
async fn when_argument_order_differs_request_still_hits_cache() {
    // Given: A cached result for {symbol, start}
    let clock = ManualClock::new();
    let a = ScriptedSource::succeeding("A");
    let coordinator = coordinator(&clock, &[("A", &a)]);
    let first = FetchArgs::new()
        .with("symbol", "600519")
        .and_then(|args| args.with("start", "2024-01-01"))
        .expect("valid args");
    coordinator.fetch(&T, &first).await.expect("A answers");

    // When: The same arguments are built in another order
    let second = FetchArgs::new()
        .with("start", "2024-01-01")
        .and_then(|args| args.with("symbol", "600519"))
        .expect("valid args");
    let outcome = coordinator.fetch(&T, &second).await.expect("cache answers");

    // Then: Both map to one fingerprint
    assert!(outcome.from_cache);
    assert_eq!(a.calls(), 1);
}

#[tokio::test]
async fn when_arguments_differ_results_are_cached_separately() {
    // Given: A healthy source
    let clock = ManualClock::new();
    let a = ScriptedSource::succeeding("A");
    let coordinator = coordinator(&clock, &[("A", &a)]);

    // When: Two different symbols are fetched twice each
    for symbol in ["600519", "000001", "600519", "000001"] {
        coordinator.fetch(&T, &args(symbol)).await.expect("answers");
    }

    // Then: Each symbol reached the source once
    assert_eq!(a.calls(), 2);
}

#[tokio::test]
async fn when_chain_fails_nothing_is_cached() {
    // Given: A source that fails once, then recovers
    let clock = ManualClock::new();
    let a = ScriptedSource::scripted(
        "A",
        [common::Step::Fail(SourceError::network("down"))],
        common::Step::Succeed,
    );
    let coordinator = coordinator(&clock, &[("A", &a)]);

    // When: The first fetch fails and the second is made
    coordinator.fetch(&T, &args("1")).await.expect_err("A fails");
    let outcome = coordinator.fetch(&T, &args("1")).await.expect("A answers");

    // Then: The second is served by the source, not a cached failure
    assert!(!outcome.from_cache);
    assert_eq!(a.calls(), 2);
}

// =============================================================================
// Cache: Configuration and Modes
// =============================================================================

#[tokio::test]
async fn when_cache_is_disabled_every_request_reaches_a_source() {
    // Given: Caching disabled at runtime
    let clock = ManualClock::new();
    let a = ScriptedSource::succeeding("A");
    let coordinator = coordinator(&clock, &[("A", &a)]);
    coordinator
        .config()
        .set_cache(false, TTL)
        .expect("valid cache config");

    // When: The same request is made twice
    coordinator.fetch(&T, &args("1")).await.expect("answers");
    let outcome = coordinator.fetch(&T, &args("1")).await.expect("answers");

    // Then: Both reached the source
    assert!(!outcome.from_cache);
    assert_eq!(a.calls(), 2);

    // And: Re-enabling takes effect on the next call
    coordinator
        .config()
        .set_cache(true, TTL)
        .expect("valid cache config");
    coordinator.fetch(&T, &args("1")).await.expect("answers");
    let outcome = coordinator.fetch(&T, &args("1")).await.expect("answers");
    assert!(outcome.from_cache);
    assert_eq!(a.calls(), 3);
}

#[tokio::test]
async fn when_ttl_is_shortened_new_entries_use_it() {
    // Given: A ten second TTL configured at runtime
    let clock = ManualClock::new();
    let a = ScriptedSource::succeeding("A");
    let coordinator = coordinator(&clock, &[("A", &a)]);
    coordinator
        .config()
        .set_cache(true, Duration::from_secs(10))
        .expect("valid cache config");
    coordinator.fetch(&T, &args("1")).await.expect("answers");

    // When: Eleven seconds pass
    clock.advance(Duration::from_secs(11));
    let outcome = coordinator.fetch(&T, &args("1")).await.expect("answers");

    // Then: The entry has expired
    assert!(!outcome.from_cache);
    assert_eq!(a.calls(), 2);
}

#[tokio::test]
async fn when_ttl_exceeds_clock_range_fetch_succeeds_and_entry_never_expires() {
    // Given: A TTL of u64::MAX seconds taken from the environment
    let clock = ManualClock::new();
    let a = ScriptedSource::succeeding("A");
    let config = FetchConfig::from_lookup(|var| {
        (var == "FINVISTA_CACHE_TTL_SECS").then(|| u64::MAX.to_string())
    })
    .expect("any TTL is accepted");
    let coordinator = FetchCoordinator::builder()
        .with_config(config)
        .expect("valid config")
        .with_clock(Arc::new(clock.clone()))
        .register(T, "A", a.adapter(), 0)
        .build()
        .expect("valid coordinator");

    // When: A result is cached and ten years pass
    coordinator.fetch(&T, &args("1")).await.expect("answers");
    clock.advance(Duration::from_secs(10 * 365 * 24 * 3600));
    let outcome = coordinator.fetch(&T, &args("1")).await.expect("answers");

    // Then: The entry is still served from the cache
    assert!(outcome.from_cache);
    assert_eq!(a.calls(), 1);
}

#[tokio::test]
async fn when_refresh_is_requested_source_is_called_and_cache_overwritten() {
    // Given: A cached result
    let clock = ManualClock::new();
    let a = ScriptedSource::succeeding("A");
    let coordinator = coordinator(&clock, &[("A", &a)]);
    coordinator.fetch(&T, &args("1")).await.expect("answers");

    // When: A refresh is requested
    let refreshed = coordinator
        .fetch_with(&T, &args("1"), FetchOptions::with_cache_mode(CacheMode::Refresh))
        .await
        .expect("answers");

    // Then: The source was called and the new table is cached
    assert!(!refreshed.from_cache);
    assert_eq!(a.calls(), 2);
    let cached = coordinator.fetch(&T, &args("1")).await.expect("cache answers");
    assert!(cached.from_cache);
    assert!(Arc::ptr_eq(&refreshed.table, &cached.table));
}

#[tokio::test]
async fn when_cache_is_bypassed_it_is_neither_read_nor_written() {
    // Given: An empty cache
    let clock = ManualClock::new();
    let a = ScriptedSource::succeeding("A");
    let coordinator = coordinator(&clock, &[("A", &a)]);
    let bypass = FetchOptions::with_cache_mode(CacheMode::Bypass);

    // When: A bypassing fetch is followed by a normal one
    coordinator.fetch_with(&T, &args("1"), bypass).await.expect("answers");
    let outcome = coordinator.fetch(&T, &args("1")).await.expect("answers");

    // Then: Nothing was cached by the bypassing call
    assert!(!outcome.from_cache);
    assert_eq!(a.calls(), 2);
}

#[tokio::test]
async fn when_cache_is_cleared_next_request_reaches_a_source() {
    // Given: A cached result
    let clock = ManualClock::new();
    let a = ScriptedSource::succeeding("A");
    let coordinator = coordinator(&clock, &[("A", &a)]);
    coordinator.fetch(&T, &args("1")).await.expect("answers");

    // When: The cache is cleared
    coordinator.clear_cache();
    let outcome = coordinator.fetch(&T, &args("1")).await.expect("answers");

    // Then: The source is called again
    assert!(!outcome.from_cache);
    assert_eq!(a.calls(), 2);
}

#[tokio::test]
async fn when_expired_entries_are_purged_live_ones_still_hit() {
    // Given: One stale and one fresh entry
    let clock = ManualClock::new();
    let a = ScriptedSource::succeeding("A");
    let coordinator = coordinator(&clock, &[("A", &a)]);
    coordinator.fetch(&T, &args("old")).await.expect("answers");
    clock.advance(TTL - Duration::from_secs(1));
    coordinator.fetch(&T, &args("new")).await.expect("answers");

    // When: Expired entries are purged after the first has expired
    clock.advance(Duration::from_secs(2));
    coordinator.purge_expired_cache();

    // Then: The fresh entry still hits
    let outcome = coordinator.fetch(&T, &args("new")).await.expect("answers");
    assert!(outcome.from_cache);
    assert_eq!(a.calls(), 2);
}
