//! Outbound-call orchestration: admission first, then a bearer lease.
//!
//! [`StorageGate`] owns the limiter and the token cache so callers follow the
//! one sanctioned order (ask for admission, lease a bearer, attach it) and
//! cannot mutate either singleton except through the exposed operations.

// std
use std::time::Duration as StdDuration;
// self
use crate::{
	_prelude::*,
	admission::{BucketStatus, OperationClass, RateLimiter},
	redact::TokenSecret,
	session::TokenCache,
};

/// Admitted outbound call carrying the leased bearer.
#[derive(Clone)]
pub struct PreparedCall {
	/// Operation class the admission was charged against.
	pub class: OperationClass,
	/// Leased bearer secret.
	pub bearer: TokenSecret,
}
impl PreparedCall {
	/// Renders the outbound `Authorization` header value.
	pub fn authorization_value(&self) -> String {
		format!("Bearer {}", self.bearer.expose())
	}
}
impl Debug for PreparedCall {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PreparedCall")
			.field("class", &self.class)
			.field("bearer", &self.bearer)
			.finish()
	}
}

/// Outcome of a deadline-bounded admission attempt.
#[derive(Debug)]
pub enum GateOutcome {
	/// Admission and bearer lease both succeeded.
	Ready(PreparedCall),
	/// Admitted, but no bearer is available; route to re-authentication.
	Unauthenticated,
	/// The admission deadline elapsed before a token regenerated.
	DeadlineElapsed,
}

/// Gateway every outbound storage call passes through.
pub struct StorageGate {
	limiter: Arc<RateLimiter>,
	tokens: Arc<TokenCache>,
}
impl StorageGate {
	/// Creates a gate over shared limiter + token-cache services.
	pub fn new(limiter: Arc<RateLimiter>, tokens: Arc<TokenCache>) -> Self {
		Self { limiter, tokens }
	}

	/// Waits for admission, then leases a bearer.
	///
	/// `None` means the call was admitted but no token is available; the
	/// admission charge is intentionally not refunded, matching the upstream
	/// budget the bucket models.
	pub async fn admit(&self, class: OperationClass) -> Option<PreparedCall> {
		self.limiter.acquire(class, 1.0).await;

		let bearer = self.tokens.token().await?;

		Some(PreparedCall { class, bearer })
	}

	/// Deadline-bounded [`StorageGate::admit`].
	pub async fn admit_for(&self, class: OperationClass, deadline: StdDuration) -> GateOutcome {
		if !self.limiter.acquire_for(class, 1.0, deadline).await {
			return GateOutcome::DeadlineElapsed;
		}

		match self.tokens.token().await {
			Some(bearer) => GateOutcome::Ready(PreparedCall { class, bearer }),
			None => GateOutcome::Unauthenticated,
		}
	}

	/// Back-pressure snapshot for a lane; read-only.
	pub fn status(&self, class: OperationClass) -> BucketStatus {
		self.limiter.status(class)
	}

	/// Shared admission controller.
	pub fn limiter(&self) -> &RateLimiter {
		&self.limiter
	}

	/// Shared bearer cache.
	pub fn tokens(&self) -> &TokenCache {
		&self.tokens
	}
}
impl Debug for StorageGate {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("StorageGate").field("tokens", &self.tokens).finish()
	}
}
