//! Token-bucket state and refill math.

// std
use std::time::Duration as StdDuration;
// crates.io
use tokio::time::Instant;
// self
use crate::admission::BucketConfig;

/// Mutable bucket state guarded by the limiter's per-class lock.
///
/// Refill is lazy: every access first credits `elapsed × refill_rate` tokens,
/// capped at `max_tokens`, so no background task is required. Refill is
/// monotonic: a later observation never computes fewer tokens than an earlier
/// one would have for the same elapsed window.
#[derive(Debug)]
pub(crate) struct TokenBucket {
	max_tokens: f64,
	tokens: f64,
	refill_rate: f64,
	last_refill: Instant,
}
impl TokenBucket {
	/// Creates a full bucket from the provided configuration.
	pub(crate) fn new(config: &BucketConfig, now: Instant) -> Self {
		Self {
			max_tokens: config.max_tokens,
			tokens: config.max_tokens,
			refill_rate: config.refill_per_second,
			last_refill: now,
		}
	}

	/// Credits tokens for the time elapsed since the last refill.
	pub(crate) fn refill_at(&mut self, now: Instant) {
		let elapsed = now.saturating_duration_since(self.last_refill);

		self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.max_tokens);
		self.last_refill = now;
	}

	/// Refills, then atomically subtracts `permits` when enough tokens exist.
	/// No side effect on the token count when the subtraction fails.
	pub(crate) fn try_consume_at(&mut self, now: Instant, permits: f64) -> bool {
		self.refill_at(now);

		if self.tokens >= permits {
			self.tokens -= permits;

			true
		} else {
			false
		}
	}

	/// Time until the deficit for `permits` regenerates, assuming no
	/// intervening consumption. Zero when the permits are already covered.
	pub(crate) fn deficit_delay(&self, permits: f64) -> StdDuration {
		if self.tokens >= permits {
			return StdDuration::ZERO;
		}

		StdDuration::from_secs_f64((permits - self.tokens) / self.refill_rate)
	}

	/// Forces the bucket back to full.
	pub(crate) fn reset_at(&mut self, now: Instant) {
		self.tokens = self.max_tokens;
		self.last_refill = now;
	}

	pub(crate) fn tokens(&self) -> f64 {
		self.tokens
	}

	pub(crate) fn max_tokens(&self) -> f64 {
		self.max_tokens
	}
}
