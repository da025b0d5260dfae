//! Admission control for outbound storage operations.
//!
//! Each [`OperationClass`] owns an independent token bucket so a burst of one
//! operation kind cannot starve the others. Waiters do not poll: a blocked
//! [`RateLimiter::acquire`] sleeps on the exact deficit delay and races a wake
//! notification that fires whenever [`RateLimiter::reset`] refills the lane.

mod bucket;

use bucket::TokenBucket;

// std
use std::time::Duration as StdDuration;
// crates.io
use tokio::{
	sync::Notify,
	time::{Instant, sleep, timeout},
};
// self
use crate::{
	_prelude::*,
	error::ConfigError,
	obs::{self, StageKind, StageOutcome},
};

/// Floor applied to computed waits so floating-point residue can never turn
/// the retry loop into a busy spin.
const MIN_WAIT: StdDuration = StdDuration::from_millis(1);

/// Operation classes gated by the limiter, one bucket each.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
	/// Bucket/object listing calls.
	List,
	/// Object uploads.
	Upload,
	/// Object downloads.
	Download,
	/// Object deletions.
	Delete,
	/// Server-side object copies.
	Copy,
}
impl OperationClass {
	/// All classes, in lane order.
	pub const ALL: [Self; 5] = [Self::List, Self::Upload, Self::Download, Self::Delete, Self::Copy];

	/// Returns a stable label suitable for config keys and metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::List => "list",
			Self::Upload => "upload",
			Self::Download => "download",
			Self::Delete => "delete",
			Self::Copy => "copy",
		}
	}

	const fn lane_index(self) -> usize {
		match self {
			Self::List => 0,
			Self::Upload => 1,
			Self::Download => 2,
			Self::Delete => 3,
			Self::Copy => 4,
		}
	}
}
impl Display for OperationClass {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Capacity and refill rate for a single bucket.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
	/// Maximum (and initial) token count; must be positive.
	pub max_tokens: f64,
	/// Tokens credited per second of elapsed time; must be positive.
	pub refill_per_second: f64,
}
impl BucketConfig {
	/// Creates a config from a capacity + refill pair.
	pub const fn new(max_tokens: f64, refill_per_second: f64) -> Self {
		Self { max_tokens, refill_per_second }
	}

	fn validate(&self, class: OperationClass) -> Result<(), ConfigError> {
		if self.max_tokens > 0.0 && self.refill_per_second > 0.0 {
			Ok(())
		} else {
			Err(ConfigError::InvalidBucket { class: class.as_str() })
		}
	}
}

/// Per-class bucket table consumed by [`RateLimiter::new`].
///
/// The defaults mirror the upstream provider budget: a deployment overrides
/// individual classes through the serde representation and leaves the rest.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
	/// Bucket for [`OperationClass::List`].
	pub list: BucketConfig,
	/// Bucket for [`OperationClass::Upload`].
	pub upload: BucketConfig,
	/// Bucket for [`OperationClass::Download`].
	pub download: BucketConfig,
	/// Bucket for [`OperationClass::Delete`].
	pub delete: BucketConfig,
	/// Bucket for [`OperationClass::Copy`].
	pub copy: BucketConfig,
}
impl RateLimitConfig {
	/// Returns the bucket configuration for a class.
	pub const fn bucket(&self, class: OperationClass) -> BucketConfig {
		match class {
			OperationClass::List => self.list,
			OperationClass::Upload => self.upload,
			OperationClass::Download => self.download,
			OperationClass::Delete => self.delete,
			OperationClass::Copy => self.copy,
		}
	}
}
impl Default for RateLimitConfig {
	fn default() -> Self {
		Self {
			list: BucketConfig::new(10.0, 2.0),
			upload: BucketConfig::new(20.0, 5.0),
			download: BucketConfig::new(30.0, 10.0),
			delete: BucketConfig::new(20.0, 5.0),
			copy: BucketConfig::new(15.0, 3.0),
		}
	}
}

/// Read-only bucket snapshot taken after an implicit refill.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BucketStatus {
	/// Tokens currently available.
	pub tokens: f64,
	/// Configured capacity.
	pub max_tokens: f64,
	/// Fill level as a percentage of capacity.
	pub percentage: f64,
	/// Whether at least one whole token is available right now.
	pub available: bool,
}

struct Lane {
	bucket: Mutex<TokenBucket>,
	refill_wake: Notify,
}

/// Token-bucket admission controller for outbound storage operations.
///
/// The limiter only ever delays; no operation is rejected with an error. A
/// request for more permits than a lane's capacity can never be satisfied and
/// therefore waits forever; use [`RateLimiter::acquire_for`] when an upper
/// bound is required.
pub struct RateLimiter {
	lanes: [Lane; 5],
}
impl RateLimiter {
	/// Creates a limiter after validating every bucket in the table.
	pub fn new(config: RateLimitConfig) -> Result<Self, ConfigError> {
		let now = Instant::now();

		for class in OperationClass::ALL {
			config.bucket(class).validate(class)?;
		}

		let lanes = OperationClass::ALL.map(|class| Lane {
			bucket: Mutex::new(TokenBucket::new(&config.bucket(class), now)),
			refill_wake: Notify::new(),
		});

		Ok(Self { lanes })
	}

	/// Creates a limiter with the default per-class table.
	pub fn with_defaults() -> Self {
		// The default table is statically positive, so validation cannot fail.
		Self::new(RateLimitConfig::default())
			.unwrap_or_else(|_| unreachable!("Default bucket table is valid."))
	}

	fn lane(&self, class: OperationClass) -> &Lane {
		&self.lanes[class.lane_index()]
	}

	/// Attempts to consume `permits` tokens; `false` leaves the lane untouched.
	pub fn try_consume(&self, class: OperationClass, permits: f64) -> bool {
		self.lane(class).bucket.lock().try_consume_at(Instant::now(), permits)
	}

	/// Suspends the caller until `permits` tokens have been consumed.
	///
	/// A blocked waiter sleeps for the exact time the deficit takes to
	/// regenerate and additionally wakes early when the lane is refilled
	/// through [`RateLimiter::reset`].
	pub async fn acquire(&self, class: OperationClass, permits: f64) {
		obs::record_stage_outcome(StageKind::Admission, StageOutcome::Attempt);

		let lane = self.lane(class);

		loop {
			let wait = {
				let mut bucket = lane.bucket.lock();

				if bucket.try_consume_at(Instant::now(), permits) {
					obs::record_stage_outcome(StageKind::Admission, StageOutcome::Success);

					return;
				}

				bucket.deficit_delay(permits).max(MIN_WAIT)
			};

			tokio::select! {
				_ = sleep(wait) => {},
				_ = lane.refill_wake.notified() => {},
			}
		}
	}

	/// Deadline-bounded [`RateLimiter::acquire`]; `false` when the deadline
	/// elapses before admission.
	pub async fn acquire_for(
		&self,
		class: OperationClass,
		permits: f64,
		deadline: StdDuration,
	) -> bool {
		let admitted = timeout(deadline, self.acquire(class, permits)).await.is_ok();

		if !admitted {
			obs::record_stage_outcome(StageKind::Admission, StageOutcome::Failure);
		}

		admitted
	}

	/// Snapshot of a lane after an implicit refill; never throttles.
	pub fn status(&self, class: OperationClass) -> BucketStatus {
		let mut bucket = self.lane(class).bucket.lock();

		bucket.refill_at(Instant::now());

		let tokens = bucket.tokens();
		let max_tokens = bucket.max_tokens();

		BucketStatus {
			tokens,
			max_tokens,
			percentage: tokens / max_tokens * 100.0,
			available: tokens >= 1.0,
		}
	}

	/// Forces a lane back to full and wakes its waiters. Intended for test
	/// isolation rather than production flow.
	pub fn reset(&self, class: OperationClass) {
		let lane = self.lane(class);

		lane.bucket.lock().reset_at(Instant::now());
		lane.refill_wake.notify_waiters();
	}
}
impl Debug for RateLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let mut debug = f.debug_struct("RateLimiter");

		for class in OperationClass::ALL {
			debug.field(class.as_str(), &self.status(class));
		}

		debug.finish()
	}
}
