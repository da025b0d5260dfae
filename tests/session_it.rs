mod common;

// std
use std::{sync::Arc, time::Duration as StdDuration};
// crates.io
use time::Duration;
use tokio::task;
// self
use common::CountingBackend;
use storage_warden::session::TokenCache;

#[tokio::test(start_paused = true)]
async fn concurrent_requests_share_one_refresh() {
	let backend = Arc::new(
		CountingBackend::granting("bearer-1", Duration::hours(1))
			.with_delay(StdDuration::from_millis(50)),
	);
	let cache = Arc::new(TokenCache::new(backend.clone()));
	let waiters: Vec<_> = (0..8)
		.map(|_| {
			let cache = cache.clone();

			task::spawn(async move { cache.token().await })
		})
		.collect();

	for waiter in waiters {
		let outcome = waiter.await.expect("Waiter task should not panic.");

		assert_eq!(
			outcome.as_ref().map(|secret| secret.expose()),
			Some("bearer-1"),
			"Every concurrent caller must observe the same refreshed bearer."
		);
	}

	assert_eq!(backend.calls(), 1, "Eight concurrent callers must trigger exactly one refresh.");
	assert!(cache.metrics().coalesced() >= 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_failure_reaches_every_waiter() {
	let backend = Arc::new(
		CountingBackend::granting("bearer-1", Duration::hours(1))
			.with_delay(StdDuration::from_millis(50)),
	);

	backend.fail_next();

	let cache = Arc::new(TokenCache::new(backend.clone()));
	let waiters: Vec<_> = (0..4)
		.map(|_| {
			let cache = cache.clone();

			task::spawn(async move { cache.token().await })
		})
		.collect();

	for waiter in waiters {
		assert!(
			waiter.await.expect("Waiter task should not panic.").is_none(),
			"A failed refresh must surface as no-token to every waiter."
		);
	}

	assert_eq!(backend.calls(), 1);
	assert!(cache.expiration().is_none(), "A failed refresh must clear the cache.");

	// The in-flight marker is released, so a later call retries and recovers.
	let recovered = cache.token().await.expect("The retry after failure should succeed.");

	assert_eq!(recovered.expose(), "bearer-1");
	assert_eq!(backend.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn fresh_tokens_are_served_from_cache() {
	let backend = Arc::new(CountingBackend::granting("bearer-1", Duration::hours(1)));
	let cache = TokenCache::new(backend.clone());

	cache.token().await.expect("Initial refresh should succeed.");
	cache.token().await.expect("Cached bearer should be reused.");
	cache.token().await.expect("Cached bearer should be reused.");

	assert_eq!(backend.calls(), 1, "A bearer outside the buffer must not refresh.");
}

#[tokio::test(start_paused = true)]
async fn tokens_inside_the_buffer_refresh_proactively() {
	let backend = Arc::new(CountingBackend::granting("bearer-1", Duration::seconds(120)));
	let cache = TokenCache::new(backend.clone());

	cache.token().await.expect("Initial refresh should succeed.");
	cache.token().await.expect("Proactive refresh should succeed.");

	assert_eq!(
		backend.calls(),
		2,
		"120 s of remaining lifetime sits inside the 300 s buffer and must refresh."
	);
}

#[tokio::test(start_paused = true)]
async fn clear_during_inflight_refresh_is_not_resurrected() {
	let backend = Arc::new(
		CountingBackend::granting("bearer-1", Duration::hours(1))
			.with_delay(StdDuration::from_millis(50)),
	);
	let cache = Arc::new(TokenCache::new(backend));
	let refresher = {
		let cache = cache.clone();

		task::spawn(async move { cache.refresh().await })
	};

	// Let the leader enter its network round-trip, then log out underneath it.
	for _ in 0..5 {
		task::yield_now().await;
	}

	cache.clear();

	let outcome = refresher.await.expect("Refresh task should not panic.");

	assert_eq!(
		outcome.as_ref().map(|secret| secret.expose()),
		Some("bearer-1"),
		"Waiters still receive the settled outcome of the raced refresh."
	);
	assert!(
		cache.expiration().is_none(),
		"A cleared cache must not be repopulated by a stale refresh."
	);
}
