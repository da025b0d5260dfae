//! Bearer-token session cache with singleflight refresh.
//!
//! [`TokenCache`] hands out the current bearer with minimal redundant refresh
//! traffic. A refresh executes exactly once per registration window: the first
//! caller becomes the leader and runs the network call, concurrent callers
//! attach to a shared settlement handle and observe the same outcome. Refresh
//! failures clear the cache and surface as `None`; they never escape the
//! cache boundary as errors, so callers treat a missing token as "re-authenticate",
//! not as an exception.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use tokio::sync::watch;
// self
use crate::{
	_prelude::*,
	error::TransientError,
	http::GateHttpClient,
	issuer::IssuerDescriptor,
	obs::{self, StageKind, StageOutcome, StageSpan},
	redact::{TokenSecret, sanitize},
};

/// Proactive refresh window: a cached token with less remaining lifetime than
/// this is refreshed before use.
pub const REFRESH_BUFFER: Duration = Duration::seconds(300);

/// Boxed future returned by [`RefreshBackend::refresh_session`].
pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = Result<SessionGrant>> + 'a + Send>>;

/// Identity-provider contract for session refreshes.
///
/// Only the `{access_token, expires_at} | error` shape matters to the cache;
/// everything else about the provider stays opaque.
pub trait RefreshBackend
where
	Self: Send + Sync,
{
	/// Performs one refresh round-trip against the identity provider.
	fn refresh_session(&self) -> RefreshFuture<'_>;
}

/// Successful refresh outcome handed back by a [`RefreshBackend`].
#[derive(Clone, Debug)]
pub struct SessionGrant {
	/// Fresh bearer secret.
	pub access_token: TokenSecret,
	/// Absolute expiry instant of the bearer.
	pub expires_at: OffsetDateTime,
}

/// Cached bearer owned exclusively by [`TokenCache`]; replaced on refresh,
/// cleared on logout.
#[derive(Clone, Debug)]
pub struct CachedToken {
	/// Bearer secret.
	pub secret: TokenSecret,
	/// Instant the cache accepted this bearer.
	pub issued_at: OffsetDateTime,
	/// Absolute expiry instant.
	pub expires_at: OffsetDateTime,
}
impl CachedToken {
	/// Remaining lifetime at `instant`; negative once expired.
	pub fn remaining_at(&self, instant: OffsetDateTime) -> Duration {
		self.expires_at - instant
	}

	/// Returns `true` once the bearer has expired at `instant`.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		!self.remaining_at(instant).is_positive()
	}
}

/// Pure read of the cached expiry state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpirationInfo {
	/// Absolute expiry instant of the cached bearer.
	pub expires_at: OffsetDateTime,
	/// Remaining lifetime; negative once expired.
	pub expires_in: Duration,
	/// Whether the proactive refresh window has been entered.
	pub should_refresh: bool,
}

/// Thread-safe counters for refresh traffic.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
	attempts: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
	coalesced: AtomicU64,
}
impl RefreshMetrics {
	/// Returns the total number of refresh requests (leaders and followers).
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Returns the number of successful network refreshes.
	pub fn successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Returns the number of failed network refreshes.
	pub fn failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	/// Returns the number of callers that attached to an in-flight refresh
	/// instead of starting their own.
	pub fn coalesced(&self) -> u64 {
		self.coalesced.load(Ordering::Relaxed)
	}

	fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	fn record_success(&self) {
		self.success.fetch_add(1, Ordering::Relaxed);
	}

	fn record_failure(&self) {
		self.failure.fetch_add(1, Ordering::Relaxed);
	}

	fn record_coalesced(&self) {
		self.coalesced.fetch_add(1, Ordering::Relaxed);
	}
}

#[derive(Clone, Debug)]
enum Settlement {
	Refreshed(CachedToken),
	Failed,
}

type InflightHandle = watch::Receiver<Option<Settlement>>;

#[derive(Debug, Default)]
struct CacheState {
	token: Option<CachedToken>,
	generation: u64,
}

enum RefreshRole {
	Leader(watch::Sender<Option<Settlement>>),
	Follower(InflightHandle),
}

/// Releases the in-flight slot when the leader settles, panics, or is
/// cancelled mid-refresh, so a later call can always retry.
struct InflightGuard<'a> {
	slot: &'a Mutex<Option<InflightHandle>>,
}
impl Drop for InflightGuard<'_> {
	fn drop(&mut self) {
		*self.slot.lock() = None;
	}
}

/// Client-side holder of the current bearer with proactive, deduplicated
/// refresh.
pub struct TokenCache {
	backend: Arc<dyn RefreshBackend>,
	refresh_buffer: Duration,
	state: Mutex<CacheState>,
	inflight: Mutex<Option<InflightHandle>>,
	metrics: Arc<RefreshMetrics>,
}
impl TokenCache {
	/// Creates a cache over the provided refresh backend with the default
	/// proactive window.
	pub fn new(backend: Arc<dyn RefreshBackend>) -> Self {
		Self {
			backend,
			refresh_buffer: REFRESH_BUFFER,
			state: Mutex::new(CacheState::default()),
			inflight: Mutex::new(None),
			metrics: Default::default(),
		}
	}

	/// Overrides the proactive refresh window.
	pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
		self.refresh_buffer = if buffer.is_negative() { Duration::ZERO } else { buffer };

		self
	}

	/// Shared refresh counters.
	pub fn metrics(&self) -> Arc<RefreshMetrics> {
		self.metrics.clone()
	}

	/// Returns a bearer valid for at least the proactive window, refreshing
	/// when the cached one is absent, expired, or inside the window.
	///
	/// `None` means no token is available (the refresh failed); callers react
	/// by routing to re-authentication.
	pub async fn token(&self) -> Option<TokenSecret> {
		let now = OffsetDateTime::now_utc();

		{
			let state = self.state.lock();

			if let Some(cached) = &state.token {
				if cached.remaining_at(now) >= self.refresh_buffer {
					return Some(cached.secret.clone());
				}
			}
		}

		self.refresh().await
	}

	/// Forces a refresh, coalescing with any refresh already in flight.
	///
	/// The network call executes exactly once per registration window; every
	/// concurrent caller receives the same settled outcome. On failure the
	/// cache is cleared and `None` returned. The in-flight handle is released
	/// after settlement in all cases so a later call can retry.
	pub async fn refresh(&self) -> Option<TokenSecret> {
		obs::record_stage_outcome(StageKind::Refresh, StageOutcome::Attempt);
		self.metrics.record_attempt();

		let role = {
			let mut slot = self.inflight.lock();

			match slot.as_ref() {
				Some(handle) => RefreshRole::Follower(handle.clone()),
				None => {
					let (tx, rx) = watch::channel(None);

					*slot = Some(rx);

					RefreshRole::Leader(tx)
				},
			}
		};

		match role {
			RefreshRole::Follower(mut handle) => {
				self.metrics.record_coalesced();

				let settled = handle.wait_for(|settlement| settlement.is_some()).await;

				match settled.ok().and_then(|settlement| settlement.clone()) {
					Some(Settlement::Refreshed(token)) => Some(token.secret),
					_ => None,
				}
			},
			RefreshRole::Leader(tx) => self.lead_refresh(tx).await,
		}
	}

	async fn lead_refresh(&self, tx: watch::Sender<Option<Settlement>>) -> Option<TokenSecret> {
		let _slot_release = InflightGuard { slot: &self.inflight };
		let span = StageSpan::new(StageKind::Refresh, "lead_refresh");
		let generation = self.state.lock().generation;
		let outcome = span.instrument(self.backend.refresh_session()).await;
		let settlement = match outcome {
			Ok(grant) => Settlement::Refreshed(CachedToken {
				secret: grant.access_token,
				issued_at: OffsetDateTime::now_utc(),
				expires_at: grant.expires_at,
			}),
			Err(error) => {
				#[cfg(feature = "tracing")]
				tracing::warn!(error = %error, "Session refresh failed; clearing cached bearer.");
				#[cfg(not(feature = "tracing"))]
				let _ = &error;

				Settlement::Failed
			},
		};

		{
			let mut state = self.state.lock();

			// A clear() that raced this refresh bumps the generation; its
			// settled outcome still reaches waiters, but a cleared cache is
			// never repopulated from a stale window.
			if state.generation == generation {
				state.token = match &settlement {
					Settlement::Refreshed(token) => Some(token.clone()),
					Settlement::Failed => None,
				};
			}
		}

		let result = match &settlement {
			Settlement::Refreshed(token) => {
				obs::record_stage_outcome(StageKind::Refresh, StageOutcome::Success);
				self.metrics.record_success();

				Some(token.secret.clone())
			},
			Settlement::Failed => {
				obs::record_stage_outcome(StageKind::Refresh, StageOutcome::Failure);
				self.metrics.record_failure();

				None
			},
		};

		let _ = tx.send(Some(settlement));

		result
	}

	/// Pure read of the cached expiry state; `None` when nothing is cached.
	pub fn expiration(&self) -> Option<ExpirationInfo> {
		let state = self.state.lock();
		let cached = state.token.as_ref()?;
		let expires_in = cached.remaining_at(OffsetDateTime::now_utc());

		Some(ExpirationInfo {
			expires_at: cached.expires_at,
			expires_in,
			should_refresh: expires_in < self.refresh_buffer,
		})
	}

	/// Explicit invalidation (logout).
	///
	/// A refresh already in flight is allowed to settle, and its waiters receive
	/// the outcome, but it can no longer repopulate the cleared cache.
	pub fn clear(&self) {
		let mut state = self.state.lock();

		state.token = None;
		state.generation += 1;
	}
}
impl Debug for TokenCache {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenCache")
			.field("refresh_buffer", &self.refresh_buffer)
			.field("cached", &self.state.lock().token.is_some())
			.finish()
	}
}

/// [`RefreshBackend`] that posts to the issuer's session-refresh endpoint.
///
/// The wire contract is `{"access_token": "...", "expires_at": <epoch secs>}`
/// on success; any other response becomes a transient error whose diagnostic
/// body is sanitized before it can reach a log sink.
pub struct HttpRefreshBackend {
	client: Arc<dyn GateHttpClient>,
	endpoint: Url,
	refresh_secret: TokenSecret,
}
impl HttpRefreshBackend {
	/// Creates a backend for the descriptor's session endpoint.
	pub fn new(
		client: Arc<dyn GateHttpClient>,
		descriptor: &IssuerDescriptor,
		refresh_secret: TokenSecret,
	) -> Self {
		Self { client, endpoint: descriptor.session_url.clone(), refresh_secret }
	}
}
impl RefreshBackend for HttpRefreshBackend {
	fn refresh_session(&self) -> RefreshFuture<'_> {
		Box::pin(async move {
			let body = serde_json::json!({ "refresh_token": self.refresh_secret.expose() });
			let payload = self.client.post_json(&self.endpoint, body).await?;

			if !payload.is_success() {
				let message = match payload.decode_json::<Value>() {
					Ok(detail) => sanitize(&detail).to_string(),
					Err(_) => "non-JSON error body".into(),
				};

				return Err(TransientError::SessionEndpoint {
					message,
					status: Some(payload.status),
					retry_after: payload.retry_after,
				}
				.into());
			}

			let wire: WireGrant = payload.decode_json()?;
			let expires_at =
				OffsetDateTime::from_unix_timestamp(wire.expires_at).map_err(|_| {
					TransientError::SessionEndpoint {
						message: "expires_at is outside the representable range".into(),
						status: Some(payload.status),
						retry_after: None,
					}
				})?;

			Ok(SessionGrant { access_token: TokenSecret::new(wire.access_token), expires_at })
		})
	}
}

#[derive(Deserialize)]
struct WireGrant {
	access_token: String,
	expires_at: i64,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::StubRefreshBackend;

	#[test]
	fn cached_token_lifetime_math() {
		let now = OffsetDateTime::now_utc();
		let token = CachedToken {
			secret: TokenSecret::new("bearer"),
			issued_at: now,
			expires_at: now + Duration::seconds(90),
		};

		assert_eq!(token.remaining_at(now), Duration::seconds(90));
		assert!(!token.is_expired_at(now));
		assert!(token.is_expired_at(now + Duration::seconds(90)));
		assert!(token.remaining_at(now + Duration::seconds(120)).is_negative());
	}

	#[tokio::test]
	async fn expiration_reflects_the_proactive_window() {
		let backend = Arc::new(StubRefreshBackend::granting("bearer", Duration::hours(1)));
		let cache = TokenCache::new(backend);

		assert!(cache.expiration().is_none(), "Nothing is cached before the first refresh.");

		cache.refresh().await.expect("Stub refresh should produce a bearer.");

		let info = cache.expiration().expect("A cached bearer should report expiry info.");

		assert!(!info.should_refresh);
		assert!(info.expires_in.whole_seconds() > 3000);
	}

	#[tokio::test]
	async fn short_lived_tokens_enter_the_window() {
		let backend = Arc::new(StubRefreshBackend::granting("bearer", Duration::seconds(120)));
		let cache = TokenCache::new(backend);

		cache.refresh().await.expect("Stub refresh should produce a bearer.");

		let info = cache.expiration().expect("A cached bearer should report expiry info.");

		assert!(info.should_refresh, "120 s of lifetime sits inside the 300 s buffer.");
	}

	#[tokio::test]
	async fn failed_refresh_clears_and_returns_none() {
		let backend = Arc::new(StubRefreshBackend::granting("bearer", Duration::hours(1)));
		let cache = TokenCache::new(backend.clone());

		cache.refresh().await.expect("First refresh should succeed.");
		backend.fail_next();

		assert!(cache.refresh().await.is_none());
		assert!(cache.expiration().is_none(), "A failed refresh must clear the cache.");
		assert_eq!(cache.metrics().failures(), 1);
	}

	#[tokio::test]
	async fn clear_drops_the_cached_bearer() {
		let backend = Arc::new(StubRefreshBackend::granting("bearer", Duration::hours(1)));
		let cache = TokenCache::new(backend);

		cache.refresh().await.expect("Refresh should succeed.");
		cache.clear();

		assert!(cache.expiration().is_none());
	}
}
