//! Shared fixtures for the integration suites.

#![allow(dead_code)]

// std
use std::{
	sync::atomic::{AtomicBool, AtomicU32, Ordering},
	time::Duration as StdDuration,
};
// crates.io
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde_json::{Value, json};
use time::{Duration, OffsetDateTime};
use url::Url;
// self
use storage_warden::{
	error::{TransientError, TransportError},
	http::{GateHttpClient, HttpFuture, HttpPayload},
	issuer::IssuerDescriptor,
	redact::TokenSecret,
	session::{RefreshBackend, RefreshFuture, SessionGrant},
};

/// Symmetric signing secret shared by minted tokens and key-set bodies.
pub const SIGNING_SECRET: &[u8] = b"secret-signing-key-value";
/// Base64url (no padding) form of [`SIGNING_SECRET`].
pub const SIGNING_SECRET_B64: &str = "c2VjcmV0LXNpZ25pbmcta2V5LXZhbHVl";

pub fn key_set_json(kid: &str) -> Value {
	json!({
		"keys": [{
			"kty": "oct",
			"alg": "HS256",
			"kid": kid,
			"k": SIGNING_SECRET_B64,
		}]
	})
}

pub fn verified_claims(sub: &str, exp: i64) -> Value {
	json!({
		"sub": sub,
		"email": "user@example.com",
		"email_confirmed_at": "2025-01-01T00:00:00Z",
		"role": "authenticated",
		"session_id": "sess-1",
		"exp": exp,
	})
}

pub fn mint_token(kid: &str, claims: Value) -> String {
	let mut header = Header::new(Algorithm::HS256);

	header.kid = Some(kid.to_owned());

	jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(SIGNING_SECRET))
		.expect("Test token minting should succeed.")
}

pub fn descriptor(base: &str, key_ttl: Duration) -> IssuerDescriptor {
	IssuerDescriptor::builder(Url::parse(base).expect("Issuer base fixture should parse."))
		.key_ttl(key_ttl)
		.build()
		.expect("Issuer descriptor fixture should build.")
}

/// In-memory [`GateHttpClient`] serving a swappable key-set body.
pub struct StaticKeyClient {
	fetches: AtomicU32,
	body: Mutex<Value>,
}
impl StaticKeyClient {
	pub fn new(body: Value) -> Self {
		Self { fetches: AtomicU32::new(0), body: Mutex::new(body) }
	}

	pub fn set_body(&self, body: Value) {
		*self.body.lock() = body;
	}

	pub fn fetches(&self) -> u32 {
		self.fetches.load(Ordering::SeqCst)
	}
}
impl GateHttpClient for StaticKeyClient {
	fn get(&self, _: &Url) -> HttpFuture<'_> {
		self.fetches.fetch_add(1, Ordering::SeqCst);

		let body = serde_json::to_vec(&*self.body.lock()).expect("Stub body should serialize.");

		Box::pin(async move { Ok(HttpPayload { status: 200, retry_after: None, body }) })
	}

	fn post_json(&self, _: &Url, _: Value) -> HttpFuture<'_> {
		Box::pin(async move {
			Err(TransportError::network(std::io::Error::other("unexpected POST")))
		})
	}
}

/// Scripted [`RefreshBackend`] counting round-trips, with optional delay and
/// scripted failures.
pub struct CountingBackend {
	secret: String,
	lifetime: Duration,
	delay: Option<StdDuration>,
	fail_next: AtomicBool,
	calls: AtomicU32,
}
impl CountingBackend {
	pub fn granting(secret: &str, lifetime: Duration) -> Self {
		Self {
			secret: secret.into(),
			lifetime,
			delay: None,
			fail_next: AtomicBool::new(false),
			calls: AtomicU32::new(0),
		}
	}

	pub fn with_delay(mut self, delay: StdDuration) -> Self {
		self.delay = Some(delay);

		self
	}

	pub fn fail_next(&self) {
		self.fail_next.store(true, Ordering::SeqCst);
	}

	pub fn calls(&self) -> u32 {
		self.calls.load(Ordering::SeqCst)
	}
}
impl RefreshBackend for CountingBackend {
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
