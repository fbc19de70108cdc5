//! In-process counters for cache and fetch outcomes.

// std
use std::sync::{
	Arc,
	atomic::{AtomicU64, Ordering},
};

/// Thread-safe counter accumulator for a single store.
#[derive(Debug, Default)]
pub struct StoreStats {
	memory_hits: AtomicU64,
	memory_misses: AtomicU64,
	stale_serves: AtomicU64,
	fetch_successes: AtomicU64,
	fetch_not_modified: AtomicU64,
	fetch_failures: AtomicU64,
}
impl StoreStats {
	/// Create a shared accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub(crate) fn record_memory_hit(&self) {
		self.memory_hits.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_memory_miss(&self) {
		self.memory_misses.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_stale_serve(&self) {
		self.stale_serves.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_fetch_success(&self) {
		self.fetch_successes.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_fetch_not_modified(&self) {
		self.fetch_not_modified.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_fetch_failure(&self) {
		self.fetch_failures.fetch_add(1, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot.
	pub fn snapshot(&self) -> StoreStatsSnapshot {
		StoreStatsSnapshot {
			memory_hits: self.memory_hits.load(Ordering::Relaxed),
			memory_misses: self.memory_misses.load(Ordering::Relaxed),
			stale_serves: self.stale_serves.load(Ordering::Relaxed),
			fetch_successes: self.fetch_successes.load(Ordering::Relaxed),
			fetch_not_modified: self.fetch_not_modified.load(Ordering::Relaxed),
			fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
		}
	}
}

/// Point-in-time view of [`StoreStats`].
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreStatsSnapshot {
	pub memory_hits: u64,
	pub memory_misses: u64,
	pub stale_serves: u64,
	pub fetch_successes: u64,
	pub fetch_not_modified: u64,
	pub fetch_failures: u64,
}
