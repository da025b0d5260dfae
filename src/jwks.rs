//! TTL cache for the issuer's published signing keys.
//!
//! The key set is read-mostly: verification paths clone an [`Arc`] snapshot
//! out of a [`RwLock`] and the whole set is replaced atomically on refresh,
//! never patched in place. Concurrent cache misses share one fetch through an
//! async singleflight guard, and a token carrying an unknown `kid` may force
//! one out-of-band refetch bounded by the same guard.

// crates.io
use jsonwebtoken::jwk::{Jwk, JwkSet};
// self
use crate::{
	_prelude::*,
	error::TransientError,
	http::GateHttpClient,
	issuer::IssuerDescriptor,
	obs::{self, StageKind, StageOutcome, StageSpan},
	redact::sanitize,
};

/// Atomically-replaced view of the issuer key set.
#[derive(Clone, Debug)]
pub struct KeySetSnapshot {
	/// Published signing keys.
	pub keys: Arc<JwkSet>,
	/// Instant this snapshot was fetched.
	pub fetched_at: OffsetDateTime,
}

/// Caching fetcher for the issuer's JWKS endpoint.
pub struct KeySetCache {
	client: Arc<dyn GateHttpClient>,
	jwks_url: Url,
	ttl: Duration,
	snapshot: RwLock<Option<KeySetSnapshot>>,
	fetch_guard: AsyncMutex<()>,
}
impl KeySetCache {
	/// Creates a cache for the descriptor's JWKS endpoint and TTL.
	pub fn new(client: Arc<dyn GateHttpClient>, descriptor: &IssuerDescriptor) -> Self {
		Self {
			client,
			jwks_url: descriptor.jwks_url.clone(),
			ttl: descriptor.key_ttl,
			snapshot: RwLock::new(None),
			fetch_guard: AsyncMutex::new(()),
		}
	}

	/// Returns a fresh snapshot, fetching on first use or TTL expiry.
	///
	/// Concurrent callers during a miss share one fetch; the winner replaces
	/// the snapshot and everyone else reuses it.
	pub async fn key_set(&self) -> Result<KeySetSnapshot> {
		if let Some(snapshot) = self.fresh_snapshot() {
			return Ok(snapshot);
		}

		let _guard = self.fetch_guard.lock().await;

		// Another miss may have completed the fetch while this caller waited.
		if let Some(snapshot) = self.fresh_snapshot() {
			return Ok(snapshot);
		}

		self.fetch_locked().await
	}

	/// Forces a refetch unless the snapshot already changed since `observed`.
	///
	/// Used when a token references an unknown `kid`: the key may have rotated
	/// after the cached fetch. Passing the snapshot the caller inspected keeps
	/// a burst of unknown-`kid` tokens from stampeding the endpoint: whoever
	/// wins the guard refetches once and the rest reuse the replacement.
	pub async fn refetch_unless_newer(
		&self,
		observed: &KeySetSnapshot,
	) -> Result<KeySetSnapshot> {
		let _guard = self.fetch_guard.lock().await;

		if let Some(current) = self.snapshot.read().clone() {
			if current.fetched_at > observed.fetched_at {
				return Ok(current);
			}
		}

		self.fetch_locked().await
	}

	fn fresh_snapshot(&self) -> Option<KeySetSnapshot> {
		let now = OffsetDateTime::now_utc();

		self.snapshot.read().clone().filter(|snapshot| now - snapshot.fetched_at < self.ttl)
	}

	async fn fetch_locked(&self) -> Result<KeySetSnapshot> {
		obs::record_stage_outcome(StageKind::KeySetFetch, StageOutcome::Attempt);

		let span = StageSpan::new(StageKind::KeySetFetch, "fetch_locked");
		let result = span
			.instrument(async {
				let payload = self.client.get(&self.jwks_url).await?;

				if !payload.is_success() {
					let message = match payload.decode_json::<Value>() {
						Ok(detail) => sanitize(&detail).to_string(),
						Err(_) => "non-JSON error body".into(),
					};

					return Err(TransientError::KeySetEndpoint {
						message,
						status: Some(payload.status),
						retry_after: payload.retry_after,
					}
					.into());
				}

				let keys: JwkSet = payload.decode_json()?;
				let snapshot =
					KeySetSnapshot { keys: Arc::new(keys), fetched_at: OffsetDateTime::now_utc() };

				*self.snapshot.write() = Some(snapshot.clone());

				Ok(snapshot)
			})
			.await;

		match &result {
			Ok(_) => obs::record_stage_outcome(StageKind::KeySetFetch, StageOutcome::Success),
			Err(_) => obs::record_stage_outcome(StageKind::KeySetFetch, StageOutcome::Failure),
		}

		result
	}
}
impl Debug for KeySetCache {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("KeySetCache")
			.field("jwks_url", &self.jwks_url)
			.field("ttl", &self.ttl)
			.field("cached", &self.snapshot.read().is_some())
			.finish()
	}
}

/// Resolves the verification key for a token's `kid`.
///
/// A missing `kid` is tolerated only when the set contains exactly one key;
/// anything else is ambiguous and resolves to `None`.
pub fn resolve_key<'a>(keys: &'a JwkSet, kid: Option<&str>) -> Option<&'a Jwk> {
	match kid {
		Some(kid) => keys.find(kid),
		None =>
			if keys.keys.len() == 1 {
				keys.keys.first()
			} else {
				None
			},
	}
}
