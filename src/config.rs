//! Engine configuration and validation.

// self
use crate::_prelude::*;

/// Default freshness TTL applied to `CachedOrFetch` reads.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
/// Default memory-cache entry TTL.
pub const DEFAULT_MEMORY_TTL: Duration = Duration::from_secs(5 * 60);
/// Default memory-cache capacity.
pub const DEFAULT_MEMORY_MAX_ENTRIES: usize = 100;
/// Default key-mutex table capacity.
pub const DEFAULT_LOCK_TABLE_MAX_ENTRIES: usize = 64;
/// Default stale-if-error window.
pub const DEFAULT_STALE_IF_ERROR: Duration = Duration::from_secs(10 * 60);
/// Default subscriber channel capacity.
pub const DEFAULT_STREAM_BUFFER: usize = 64;

/// Tunable parameters shared by the read, mutation, and page stores.
#[derive(Clone, Debug)]
pub struct StoreConfig {
	/// Freshness TTL: how long a source-of-truth row satisfies `CachedOrFetch`.
	pub ttl: Duration,
	/// Per-entry TTL for the memory cache.
	pub memory_ttl: Duration,
	/// Maximum entry count for the memory cache.
	pub memory_max_entries: usize,
	/// Maximum entry count for the key-mutex table.
	pub lock_table_max_entries: usize,
	/// How far past the last known-good instant stale data may still mask a failure.
	pub stale_if_error: Duration,
	/// Optional cooldown applied after a retryable fetch failure.
	///
	/// `RateLimited.retry_after` always takes precedence when the server suggests one.
	pub failure_backoff: Option<Duration>,
	/// Capacity of each subscriber's event channel.
	pub stream_buffer: usize,
}
impl StoreConfig {
	/// Validate the configuration against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if self.ttl.is_zero() {
			return Err(StoreError::Validation {
				field: "ttl",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.memory_ttl.is_zero() {
			return Err(StoreError::Validation {
				field: "memory_ttl",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.memory_max_entries == 0 {
			return Err(StoreError::Validation {
				field: "memory_max_entries",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.lock_table_max_entries == 0 {
			return Err(StoreError::Validation {
				field: "lock_table_max_entries",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.stream_buffer == 0 {
			return Err(StoreError::Validation {
				field: "stream_buffer",
				reason: "Must be greater than zero.".into(),
			});
		}
		if let Some(backoff) = self.failure_backoff
			&& backoff.is_zero()
		{
			return Err(StoreError::Validation {
				field: "failure_backoff",
				reason: "Must be omitted or greater than zero.".into(),
			});
		}

		Ok(())
	}
}
impl Default for StoreConfig {
	fn default() -> Self {
		Self {
			ttl: DEFAULT_TTL,
			memory_ttl: DEFAULT_MEMORY_TTL,
			memory_max_entries: DEFAULT_MEMORY_MAX_ENTRIES,
			lock_table_max_entries: DEFAULT_LOCK_TABLE_MAX_ENTRIES,
			stale_if_error: DEFAULT_STALE_IF_ERROR,
			failure_backoff: None,
			stream_buffer: DEFAULT_STREAM_BUFFER,
		}
	}
}
