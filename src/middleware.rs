//! Request-boundary middleware for axum routers.
//!
//! Two entry points share the verification state machine: [`require_auth`]
//! short-circuits rejections with the mapped status and wire body, while
//! [`optional_auth`] lets every request through and only attaches a
//! [`Principal`] when verification succeeds. Handlers read the principal from
//! request extensions.

// crates.io
use axum::{
	Json,
	extract::{Request, State},
	http::{StatusCode, header::AUTHORIZATION},
	middleware::Next,
	response::{IntoResponse, Response},
};
// self
use crate::{
	_prelude::*,
	error::AuthError,
	verify::{AuthPolicy, Principal, TokenVerifier},
};

/// Shared middleware state: the verifier plus the policy applied at this
/// boundary. Wire it up with `axum::middleware::from_fn_with_state`.
#[derive(Clone)]
pub struct AuthGate {
	verifier: Arc<TokenVerifier>,
	policy: AuthPolicy,
}
impl AuthGate {
	/// Creates a gate with the default policy.
	pub fn new(verifier: Arc<TokenVerifier>) -> Self {
		Self { verifier, policy: AuthPolicy::default() }
	}

	/// Additionally requires a verified email address (403 otherwise).
	pub fn require_verified_email(mut self) -> Self {
		self.policy = AuthPolicy::verified_email();

		self
	}

	/// Overrides the verification policy.
	pub fn with_policy(mut self, policy: AuthPolicy) -> Self {
		self.policy = policy;

		self
	}

	async fn authenticate(&self, header: Option<&str>) -> Result<Principal, AuthError> {
		self.verifier.authenticate(header, self.policy).await
	}
}
impl Debug for AuthGate {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthGate").field("policy", &self.policy).finish()
	}
}

impl IntoResponse for AuthError {
	fn into_response(self) -> Response {
		let status = match self.status() {
			403 => StatusCode::FORBIDDEN,
			_ => StatusCode::UNAUTHORIZED,
		};

		(status, Json(self.body())).into_response()
	}
}

/// Middleware that rejects unverified requests with the mapped status/code.
///
/// On success the verified [`Principal`] is attached to request extensions and
/// the inner handler runs; on rejection the handler is never invoked.
pub async fn require_auth(
	State(gate): State<AuthGate>,
	mut request: Request,
	next: Next,
) -> Response {
	let header = bearer_header(&request);

	match gate.authenticate(header.as_deref()).await {
		Ok(principal) => {
			request.extensions_mut().insert(principal);

			next.run(request).await
		},
		Err(error) => error.into_response(),
	}
}

/// Middleware that never rejects: verification failures simply proceed with no
/// [`Principal`] attached.
pub async fn optional_auth(
	State(gate): State<AuthGate>,
	mut request: Request,
	next: Next,
) -> Response {
	let header = bearer_header(&request);

	if let Ok(principal) = gate.authenticate(header.as_deref()).await {
		request.extensions_mut().insert(principal);
	}

	next.run(request).await
}

/// Extracts the `Authorization` header value as an owned string.
///
/// Owning the value keeps the `!Sync` request body from being borrowed across
/// the verifier await, which would otherwise make the middleware future `!Send`
/// and incompatible with `from_fn_with_state`.
fn bearer_header(request: &Request) -> Option<String> {
	request
		.headers()
		.get(AUTHORIZATION)
		.and_then(|value| value.to_str().ok())
		.map(str::to_owned)
}
