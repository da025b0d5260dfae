//! Admission-control and auth-trust layer for object-storage clients—per-operation token
//! buckets, singleflight bearer caches, and JWKS-backed request verification in one crate
//! built for production.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod admission;
pub mod error;
pub mod gate;
pub mod http;
pub mod issuer;
pub mod jwks;
#[cfg(feature = "axum")]
pub mod middleware;
pub mod obs;
pub mod redact;
pub mod session;
pub mod verify;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience fixtures for unit and integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::{
		sync::atomic::{AtomicBool, AtomicU32, Ordering},
		time::Duration as StdDuration,
	};
	// crates.io
	use jsonwebtoken::{Algorithm, EncodingKey, Header};
	use serde_json::json;
	// self
	use crate::{
		error::TransientError,
		redact::TokenSecret,
		session::{RefreshBackend, RefreshFuture, SessionGrant},
	};

	/// Symmetric signing secret shared by test tokens and the test key set.
	pub const TEST_SIGNING_SECRET: &[u8] = b"secret-signing-key-value";
	/// Base64url (no padding) form of [`TEST_SIGNING_SECRET`] for JWKS bodies.
	pub const TEST_SIGNING_SECRET_B64: &str = "c2VjcmV0LXNpZ25pbmcta2V5LXZhbHVl";

	/// Builds a single-key JWKS document signing with [`TEST_SIGNING_SECRET`].
	pub fn test_key_set_json(kid: &str) -> Value {
		json!({
			"keys": [{
				"kty": "oct",
				"alg": "HS256",
				"kid": kid,
				"k": TEST_SIGNING_SECRET_B64,
			}]
		})
	}

	/// Standard claim fixture for a verified principal.
	pub fn test_claims(sub: &str, exp: i64) -> Value {
		json!({
			"sub": sub,
			"email": "user@example.com",
			"email_confirmed_at": "2025-01-01T00:00:00Z",
			"role": "authenticated",
			"session_id": "sess-1",
			"exp": exp,
		})
	}

	/// Mints an HS256 token for the provided claims, tagged with `kid`.
	pub fn mint_token(kid: &str, claims: Value) -> String {
		let mut header = Header::new(Algorithm::HS256);

		header.kid = Some(kid.to_owned());

		jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(TEST_SIGNING_SECRET))
			.expect("Test token minting should succeed.")
	}

	/// Scripted [`RefreshBackend`] that counts calls and can fail on demand.
	#[derive(Debug)]
	pub struct StubRefreshBackend {
		secret: String,
		lifetime: Duration,
		delay: Option<StdDuration>,
		fail_next: AtomicBool,
		calls: AtomicU32,
	}
	impl StubRefreshBackend {
		/// Backend whose refreshes grant `secret` for `lifetime`.
		pub fn granting(secret: &str, lifetime: Duration) -> Self {
			Self {
				secret: secret.into(),
				lifetime,
				delay: None,
				fail_next: AtomicBool::new(false),
				calls: AtomicU32::new(0),
			}
		}

		/// Adds an artificial round-trip delay so refreshes can overlap.
		pub fn with_delay(mut self, delay: StdDuration) -> Self {
			self.delay = Some(delay);

			self
		}

		/// Makes the next refresh fail.
		pub fn fail_next(&self) {
			self.fail_next.store(true, Ordering::SeqCst);
		}

		/// Number of refresh round-trips performed.
		pub fn calls(&self) -> u32 {
			self.calls.load(Ordering::SeqCst)
		}
	}
	impl RefreshBackend for StubRefreshBackend {
		fn refresh_session(&self) -> RefreshFuture<'_> {
			Box::pin(async move {
				self.calls.fetch_add(1, Ordering::SeqCst);

				if let Some(delay) = self.delay {
					tokio::time::sleep(delay).await;
				}
				if self.fail_next.swap(false, Ordering::SeqCst) {
					return Err(TransientError::SessionEndpoint {
						message: "scripted failure".into(),
						status: Some(500),
						retry_after: None,
					}
					.into());
				}

				Ok(SessionGrant {
					access_token: TokenSecret::new(self.secret.as_str()),
					expires_at: OffsetDateTime::now_utc() + self.lifetime,
				})
			})
		}
	}
}

mod _prelude {
	pub use std::{
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use serde_json::Value;
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {httpmock as _, tower as _};
