//! Injectable time source.
//!
//! Freshness windows, bookkeeper instants, and cache expiry all flow through a single
//! [`Clock`] handle so tests can advance time without sleeping.

// std
use std::{fmt::Debug, sync::Mutex};
// self
use crate::_prelude::*;

/// Wall-clock source consulted for every freshness decision.
pub trait Clock: Debug + Send + Sync {
	/// Current wall-clock time.
	fn now(&self) -> DateTime<Utc>;
}

/// System-backed clock used outside of tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// Manually-advanced clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
	now: Mutex<DateTime<Utc>>,
}
impl ManualClock {
	/// Create a clock frozen at the given instant.
	pub fn new(start: DateTime<Utc>) -> Self {
		Self { now: Mutex::new(start) }
	}

	/// Create a clock frozen at the current system time.
	pub fn from_system() -> Self {
		Self::new(Utc::now())
	}

	/// Move the clock forward by `delta`.
	pub fn advance(&self, delta: Duration) {
		let mut now = self.now.lock().expect("clock mutex poisoned");

		*now += TimeDelta::from_std(delta).unwrap_or(TimeDelta::MAX);
	}

	/// Pin the clock to an absolute instant.
	pub fn set(&self, at: DateTime<Utc>) {
		let mut now = self.now.lock().expect("clock mutex poisoned");

		*now = at;
	}
}
impl Clock for ManualClock {
	fn now(&self) -> DateTime<Utc> {
		*self.now.lock().expect("clock mutex poisoned")
	}
}

/// Age of a timestamp relative to `now`, saturating at zero for future stamps.
pub fn age_of(now: DateTime<Utc>, at: DateTime<Utc>) -> Duration {
	(now - at).to_std().unwrap_or(Duration::ZERO)
}

/// Whether `at` lies within `window` of `now` (inclusive).
pub fn within_window(now: DateTime<Utc>, at: DateTime<Utc>, window: Duration) -> bool {
	age_of(now, at) <= window
}
