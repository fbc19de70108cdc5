//! Converter contract mapping among wire, persisted, and domain shapes.

// self
use crate::{_prelude::*, cache::freshness::DbMeta};

/// Injected transform triplet between the fetcher's wire shape (`Net`), the
/// source-of-truth row shape (`Db`), and the consumer-facing domain shape (`V`).
///
/// Transforms are pure; failures are surfaced as [`StoreError::Serialization`] and
/// never retried.
pub trait Converter<Net, Db, V>: Send + Sync {
	/// Map a fetched wire payload into the row written to the source of truth.
	fn net_to_db_write(&self, key: &StoreKey, net: Net) -> Result<Db>;

	/// Map a domain value into a row, used by optimistic mutations ahead of the
	/// server's echo.
	fn domain_to_db_write(&self, key: &StoreKey, value: &V) -> Result<Db>;

	/// Map a persisted row into the domain shape emitted to subscribers.
	fn db_read_to_domain(&self, key: &StoreKey, db: &Db) -> Result<V>;

	/// Project freshness metadata from a row; `None` when the row carries none.
	fn db_meta_from_projection(&self, db: &Db) -> Option<DbMeta>;
}
