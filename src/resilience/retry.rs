//! Retry backoff policies.

// std
use std::cell::RefCell;
// crates.io
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Supported jitter strategies for retry backoff.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
	/// No jitter; deterministic backoff schedule.
	None,
	/// Randomize within a band around the computed backoff.
	#[default]
	Full,
	/// Decorrelated jitter per AWS architecture guidance.
	Decorrelated,
}

/// Retry schedule: maps a completed attempt count to the delay before the next try,
/// or to `None` when retrying should stop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Maximum number of retries after the initial attempt.
	pub max_retries: u32,
	/// Delay before the first retry.
	pub initial_backoff: Duration,
	/// Upper bound applied to exponential backoff growth.
	pub max_backoff: Duration,
	/// Strategy used to randomize the computed backoff.
	#[serde(default)]
	pub jitter: JitterStrategy,
}
impl RetryPolicy {
	/// A policy that never retries.
	pub fn none() -> Self {
		Self { max_retries: 0, ..Self::default() }
	}

	/// Validate invariants for retry configuration.
	pub fn validate(&self) -> Result<()> {
		if self.max_retries > 0 {
			if self.initial_backoff.is_zero() {
				return Err(StoreError::Validation {
					field: "retry_policy.initial_backoff",
					reason: "Must be greater than zero.".into(),
				});
			}
			if self.max_backoff < self.initial_backoff {
				return Err(StoreError::Validation {
					field: "retry_policy.max_backoff",
					reason: "Must be greater than or equal to initial_backoff.".into(),
				});
			}
		}

		Ok(())
	}

	/// Delay before the retry following `attempt` completed attempts, or `None` once
	/// the budget is spent. `attempt` is zero-based: the first retry asks for attempt 0.
	pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
		if attempt >= self.max_retries {
			tracing::debug!(attempt, "retry budget exhausted");

			return None;
		}

		let exponent = attempt.min(32);
		let base = self.initial_backoff.mul_f64(2f64.powi(exponent as i32));
		let bounded = base.min(self.max_backoff).max(self.initial_backoff);

		Some(self.apply_jitter(bounded, attempt))
	}

	fn apply_jitter(&self, bounded: Duration, attempt: u32) -> Duration {
		match self.jitter {
			JitterStrategy::None => bounded,
			JitterStrategy::Full => {
				let lower = bounded.mul_f64(0.8).max(self.initial_backoff);
				let upper = bounded.min(self.max_backoff);

				random_within(lower, upper)
			},
			JitterStrategy::Decorrelated => {
				let prev = if attempt == 0 { self.initial_backoff } else { bounded };
				let ceiling = self.max_backoff.min(prev.mul_f64(3.0));

				random_within(self.initial_backoff, ceiling.max(self.initial_backoff))
			},
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: 2,
			initial_backoff: Duration::from_millis(250),
			max_backoff: Duration::from_secs(2),
			jitter: JitterStrategy::Full,
		}
	}
}

fn random_within(min: Duration, max: Duration) -> Duration {
	if max <= min {
		return max;
	}

	SMALL_RNG.with(|cell| {
		let mut rng = cell.borrow_mut();
		let nanos = max.as_nanos() - min.as_nanos();
		let jitter = rng.random_range(0..=nanos.min(u64::MAX as u128));

		min + Duration::from_nanos(jitter as u64)
	})
}
