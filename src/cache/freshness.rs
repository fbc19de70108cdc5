//! Freshness policies and the fetch-plan validator.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{_prelude::*, cache::bookkeeper::KeyStatus, clock::within_window};

/// Consumer-declared tolerance for staleness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
	/// Serve if fresh by TTL; otherwise fetch conditionally.
	CachedOrFetch,
	/// Acceptable iff the row was cached no longer than the given duration ago.
	MinAge(Duration),
	/// Always fetch unconditionally, unless the key is cooling down.
	MustBeFresh,
	/// Fetch; on failure, surface stale data inside the stale-if-error window before
	/// the error.
	StaleIfError,
}

/// Engine-decided action for a read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchPlan {
	/// The cached state satisfies the policy; no fetch.
	Skip,
	/// Revalidate against the server with whatever validators the row carries.
	Conditional {
		/// Validator from the previous successful exchange.
		etag: Option<String>,
		/// Row timestamp enabling `If-Modified-Since`-style revalidation.
		last_modified: Option<DateTime<Utc>>,
	},
	/// Fetch without validators.
	Unconditional,
}
impl FetchPlan {
	/// Whether the plan requires hitting the fetcher.
	pub fn requires_fetch(&self) -> bool {
		!matches!(self, Self::Skip)
	}
}

/// Metadata projected from a source-of-truth row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbMeta {
	/// Wall-clock instant the row was last written.
	pub updated_at: DateTime<Utc>,
	/// Validator persisted alongside the row, if the server provided one.
	pub etag: Option<String>,
}
impl DbMeta {
	/// Construct metadata for a row updated at `updated_at`.
	pub fn new(updated_at: DateTime<Utc>, etag: Option<String>) -> Self {
		Self { updated_at, etag }
	}

	fn conditional_plan(&self) -> FetchPlan {
		// `last_modified` is carried whenever the row has a timestamp, even without an
		// etag, so fetchers can still revalidate by date.
		FetchPlan::Conditional { etag: self.etag.clone(), last_modified: Some(self.updated_at) }
	}
}

/// Decide the fetch plan for a read.
///
/// Pure function of the observation instant, the caller's policy, the projected row
/// metadata, and the bookkeeper record. A future `backoff_until` suppresses every
/// fetch regardless of policy.
pub fn plan_fetch(
	now: DateTime<Utc>,
	policy: Freshness,
	ttl: Duration,
	sot_meta: Option<&DbMeta>,
	status: &KeyStatus,
) -> FetchPlan {
	if status.in_backoff(now) {
		return FetchPlan::Skip;
	}

	match policy {
		Freshness::MustBeFresh => FetchPlan::Unconditional,
		Freshness::CachedOrFetch => match sot_meta {
			Some(meta) if within_window(now, meta.updated_at, ttl) => FetchPlan::Skip,
			Some(meta) => meta.conditional_plan(),
			None => FetchPlan::Unconditional,
		},
		Freshness::MinAge(age) => match sot_meta {
			Some(meta) if within_window(now, meta.updated_at, age) => FetchPlan::Skip,
			Some(meta) => meta.conditional_plan(),
			None => FetchPlan::Unconditional,
		},
		Freshness::StaleIfError => match sot_meta {
			Some(meta) => meta.conditional_plan(),
			None => FetchPlan::Unconditional,
		},
	}
}

/// Whether stale data may still be surfaced at `now` after a fetch failure.
///
/// Prefers the row's own timestamp; falls back to the bookkeeper's last success when
/// the projection lacks one. A key that has never succeeded and has no row timestamp
/// is not within the window: the error surfaces.
pub fn stale_within_window(
	now: DateTime<Utc>,
	window: Duration,
	sot_meta: Option<&DbMeta>,
	status: &KeyStatus,
) -> bool {
	let reference = sot_meta.map(|meta| meta.updated_at).or(status.last_success_at);

	match reference {
		Some(at) => within_window(now, at, window),
		None => false,
	}
}
