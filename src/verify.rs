//! Stateless trust boundary: bearer extraction, JWT verification, and the
//! [`Principal`] attached to verified requests.
//!
//! Every inbound token walks the same machine: structural header checks first
//! (rejected without any network cost), then signature verification against
//! the cached key set, then the `exp` claim, then optional email policy. All
//! failures collapse into the fixed [`AuthError`] taxonomy; raw cryptographic
//! or provider detail never crosses the boundary.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, errors::ErrorKind, jwk::Jwk};
// self
use crate::{
	_prelude::*,
	error::AuthError,
	issuer::IssuerDescriptor,
	jwks::{KeySetCache, resolve_key},
	obs::{self, StageKind, StageOutcome, StageSpan},
};

/// Verification policy applied after signature and expiry checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AuthPolicy {
	/// Rejects principals whose email address is unverified (403).
	pub require_verified_email: bool,
}
impl AuthPolicy {
	/// Policy that additionally requires a verified email address.
	pub const fn verified_email() -> Self {
		Self { require_verified_email: true }
	}
}

/// Verified identity attached to a request; created per request and never
/// persisted beyond it.
#[derive(Clone, Debug)]
pub struct Principal {
	/// Subject identifier (`sub` claim).
	pub id: String,
	/// Email address, when the token carries one.
	pub email: Option<String>,
	/// Whether the issuer recorded an email confirmation.
	pub email_verified: bool,
	/// Issuer-assigned role, when present.
	pub role: Option<String>,
	/// Issuer session identifier, when present.
	pub session_id: Option<String>,
	/// Complete claim set, kept opaque for downstream consumers.
	pub raw_claims: Value,
}
impl Principal {
	fn from_claims(claims: Value) -> Result<Self, AuthError> {
		let id = claims
			.get("sub")
			.and_then(Value::as_str)
			.filter(|sub| !sub.is_empty())
			.ok_or(AuthError::InvalidToken)?
			.to_owned();
		let email = claims.get("email").and_then(Value::as_str).map(str::to_owned);
		let email_verified = claims.get("email_confirmed_at").is_some_and(|value| match value {
			Value::Null => false,
			Value::String(confirmed_at) => !confirmed_at.is_empty(),
			_ => true,
		});
		let role = claims.get("role").and_then(Value::as_str).map(str::to_owned);
		let session_id = claims.get("session_id").and_then(Value::as_str).map(str::to_owned);

		Ok(Self { id, email, email_verified, role, session_id, raw_claims: claims })
	}
}

/// Stateless verifier converting bearer tokens into principals.
pub struct TokenVerifier {
	keys: Arc<KeySetCache>,
	descriptor: IssuerDescriptor,
}
impl TokenVerifier {
	/// Creates a verifier over a shared key-set cache.
	pub fn new(keys: Arc<KeySetCache>, descriptor: IssuerDescriptor) -> Self {
		Self { keys, descriptor }
	}

	/// Extracts the bearer token from an `Authorization` header value.
	///
	/// The scheme comparison is case-insensitive; anything other than
	/// `Bearer <token>` resolves to `None`.
	pub fn extract_bearer(header: &str) -> Option<&str> {
		let (scheme, rest) = header.split_once(' ')?;

		if scheme.eq_ignore_ascii_case("bearer") {
			let token = rest.trim();

			(!token.is_empty()).then_some(token)
		} else {
			None
		}
	}

	/// Runs the full state machine against an optional header value.
	pub async fn authenticate(
		&self,
		header: Option<&str>,
		policy: AuthPolicy,
	) -> Result<Principal, AuthError> {
		let header = header.ok_or(AuthError::MissingToken)?;
		let token = Self::extract_bearer(header).ok_or(AuthError::MissingToken)?;

		self.verify_with_policy(token, policy).await
	}

	/// Verifies a raw token with the default policy.
	///
	/// Usable outside the request pipeline (background jobs); an empty token
	/// is the explicit no-token case and rejects as [`AuthError::MissingToken`].
	pub async fn verify(&self, token: &str) -> Result<Principal, AuthError> {
		self.verify_with_policy(token, AuthPolicy::default()).await
	}

	/// Verifies a raw token under the provided policy.
	pub async fn verify_with_policy(
		&self,
		token: &str,
		policy: AuthPolicy,
	) -> Result<Principal, AuthError> {
		obs::record_stage_outcome(StageKind::Verify, StageOutcome::Attempt);

		let span = StageSpan::new(StageKind::Verify, "verify_with_policy");
		let result = span.instrument(self.run_machine(token, policy)).await;

		match &result {
			Ok(_) => obs::record_stage_outcome(StageKind::Verify, StageOutcome::Success),
			Err(_) => obs::record_stage_outcome(StageKind::Verify, StageOutcome::Failure),
		}

		result
	}

	async fn run_machine(&self, token: &str, policy: AuthPolicy) -> Result<Principal, AuthError> {
		let token = token.trim();

		// Structural gate: everything here resolves before any network cost.
		if token.is_empty() || !structurally_valid(token) {
			return Err(AuthError::MissingToken);
		}

		let header = jsonwebtoken::decode_header(token).map_err(|_| AuthError::InvalidToken)?;
		let snapshot = self.keys.key_set().await.map_err(keyset_unavailable)?;
		let jwk = match resolve_key(&snapshot.keys, header.kid.as_deref()) {
			Some(jwk) => jwk.clone(),
			None => {
				// The signing key may have rotated after the cached fetch.
				let refreshed = self
					.keys
					.refetch_unless_newer(&snapshot)
					.await
					.map_err(keyset_unavailable)?;

				resolve_key(&refreshed.keys, header.kid.as_deref())
					.cloned()
					.ok_or(AuthError::InvalidToken)?
			},
		};
		let decoding_key = DecodingKey::from_jwk(&jwk).map_err(|_| AuthError::InvalidToken)?;
		let algorithm = expected_algorithm(&jwk, header.alg)?;
		let validation = self.validation(algorithm);
		let data = jsonwebtoken::decode::<Value>(token, &decoding_key, &validation).map_err(
			|error| match error.kind() {
				ErrorKind::ExpiredSignature => AuthError::TokenExpired,
				_ => AuthError::InvalidToken,
			},
		)?;
		let principal = Principal::from_claims(data.claims)?;

		if policy.require_verified_email && !principal.email_verified {
			return Err(AuthError::EmailNotVerified);
		}

		Ok(principal)
	}

	fn validation(&self, algorithm: Algorithm) -> Validation {
		let mut validation = Validation::new(algorithm);

		validation.validate_exp = true;
		validation.validate_nbf = true;
		validation.leeway = self.descriptor.leeway.whole_seconds().max(0) as u64;

		if let Some(issuer) = &self.descriptor.expected_issuer {
			validation.set_issuer(&[issuer]);
		}

		match &self.descriptor.audience {
			Some(audience) => validation.set_audience(&[audience]),
			None => validation.validate_aud = false,
		}

		validation
	}

	/// Decodes the payload without verifying the signature and returns `exp`.
	///
	/// `None` when the token is malformed or lacks the claim. Intended for UI
	/// hints only, never a substitute for verification.
	pub fn peek_expiration(token: &str) -> Option<OffsetDateTime> {
		let segments: Vec<&str> = token.split('.').collect();

		if segments.len() != 3 {
			return None;
		}

		let payload = URL_SAFE_NO_PAD.decode(segments[1]).ok()?;
		let claims: Value = serde_json::from_slice(&payload).ok()?;
		let exp = claims.get("exp")?.as_i64()?;

		OffsetDateTime::from_unix_timestamp(exp).ok()
	}
}
impl Debug for TokenVerifier {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenVerifier").field("descriptor", &self.descriptor).finish()
	}
}

fn structurally_valid(token: &str) -> bool {
	let mut segments = 0_usize;

	for segment in token.split('.') {
		if segment.is_empty() {
			return false;
		}

		segments += 1;
	}

	segments == 3
}

fn keyset_unavailable(error: Error) -> AuthError {
	#[cfg(feature = "tracing")]
	tracing::warn!(error = %error, "Key set unavailable during verification.");
	#[cfg(not(feature = "tracing"))]
	let _ = &error;

	AuthError::InvalidToken
}

fn expected_algorithm(jwk: &Jwk, header_alg: Algorithm) -> Result<Algorithm, AuthError> {
	match jwk.common.key_algorithm {
		Some(declared) => {
			let declared: Algorithm =
				declared.to_string().parse().map_err(|_| AuthError::InvalidToken)?;

			if declared == header_alg { Ok(declared) } else { Err(AuthError::InvalidToken) }
		},
		None => Ok(header_alg),
	}
}
