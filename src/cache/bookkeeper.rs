//! Per-key ledger of fetch outcomes, validators, and cooldowns.

// std
use std::{collections::HashMap, sync::Mutex};
// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

/// Per-key fetch bookkeeping record.
///
/// Success and failure instants are retained independently; an etag is only ever
/// written on success.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStatus {
	/// Instant of the most recent successful fetch.
	pub last_success_at: Option<DateTime<Utc>>,
	/// Instant of the most recent failed fetch.
	pub last_failure_at: Option<DateTime<Utc>>,
	/// Validator supplied by the server on the most recent success.
	pub last_etag: Option<String>,
	/// Cooldown deadline; no fetch is initiated before it, regardless of policy.
	pub backoff_until: Option<DateTime<Utc>>,
}
impl KeyStatus {
	/// Whether the key is cooling down at `now`.
	pub fn in_backoff(&self, now: DateTime<Utc>) -> bool {
		self.backoff_until.map(|until| until > now).unwrap_or(false)
	}
}

/// In-memory store of [`KeyStatus`] records.
///
/// The bookkeeper is the only writer of `backoff_until`. A cooldown is set when a
/// failure carries a server-suggested delay (`RateLimited.retry_after`) or, for other
/// retryable failures, when the store is configured with a fallback cooldown.
#[derive(Debug)]
pub struct Bookkeeper {
	failure_backoff: Option<Duration>,
	inner: Mutex<HashMap<StoreKey, KeyStatus>>,
}
impl Bookkeeper {
	/// Create a bookkeeper with an optional fallback cooldown for retryable failures.
	pub fn new(failure_backoff: Option<Duration>) -> Self {
		Self { failure_backoff, inner: Mutex::new(HashMap::new()) }
	}

	/// Record a successful fetch at `at`.
	///
	/// The etag overwrite is intentionally nullable: `None` means the server provided
	/// no validator, and remembering a stale one would poison future conditionals.
	pub fn record_success(&self, key: &StoreKey, etag: Option<String>, at: DateTime<Utc>) {
		let mut table = self.inner.lock().expect("bookkeeper table poisoned");
		let status = table.entry(key.clone()).or_default();

		status.last_success_at = Some(at);
		status.last_etag = etag;
		status.backoff_until = None;

		tracing::trace!(key = %key, "recorded fetch success");
	}

	/// Record a failed fetch at `at`, leaving success bookkeeping untouched.
	pub fn record_failure(&self, key: &StoreKey, error: &StoreError, at: DateTime<Utc>) {
		let cooldown = if error.is_retryable() {
			error.retry_after().or(self.failure_backoff)
		} else {
			None
		};
		let mut table = self.inner.lock().expect("bookkeeper table poisoned");
		let status = table.entry(key.clone()).or_default();

		status.last_failure_at = Some(at);

		if let Some(cooldown) = cooldown {
			status.backoff_until = Some(at + TimeDelta::from_std(cooldown).unwrap_or(TimeDelta::MAX));
		}

		tracing::debug!(key = %key, error = %error, cooldown = ?cooldown, "recorded fetch failure");
	}

	/// Current status for `key`; missing keys yield an all-`None` record.
	pub fn last_status(&self, key: &StoreKey) -> KeyStatus {
		self.inner
			.lock()
			.expect("bookkeeper table poisoned")
			.get(key)
			.cloned()
			.unwrap_or_default()
	}

	/// Drop the record for a single key.
	pub fn forget(&self, key: &StoreKey) {
		self.inner.lock().expect("bookkeeper table poisoned").remove(key);
	}

	/// Drop every record.
	pub fn reset(&self) {
		self.inner.lock().expect("bookkeeper table poisoned").clear();
	}

	/// Export every record, ordered by canonical key form for stable journals.
	pub fn export(&self) -> Vec<(StoreKey, KeyStatus)> {
		let table = self.inner.lock().expect("bookkeeper table poisoned");
		let mut records: Vec<_> =
			table.iter().map(|(key, status)| (key.clone(), status.clone())).collect();

		records.sort_by_key(|(key, _)| key.index_key());

		records
	}

	/// Replace the ledger with previously exported records.
	pub fn import(&self, records: impl IntoIterator<Item = (StoreKey, KeyStatus)>) {
		let mut table = self.inner.lock().expect("bookkeeper table poisoned");

		table.clear();
		table.extend(records);
	}
}
