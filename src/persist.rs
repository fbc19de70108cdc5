//! Optional persisted-state artifacts: bookkeeper journal and paging index.
//!
//! Storage wiring is the embedder's concern; the engine only defines versioned,
//! forward-compatible record shapes plus export/import glue. Omitting persistence
//! entirely leaves the engine behaviorally identical across restarts, with
//! bookkeeping reset.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*,
	cache::bookkeeper::{Bookkeeper, KeyStatus},
	paging::state::PageToken,
};

/// Current journal schema version.
pub const JOURNAL_VERSION: u32 = 1;
/// Current paging index schema version.
pub const PAGING_INDEX_VERSION: u32 = 1;

/// One persisted bookkeeper record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
	/// Key the record belongs to.
	pub key: StoreKey,
	/// Fetch bookkeeping captured at export time.
	#[serde(flatten)]
	pub status: KeyStatus,
}

/// Versioned bookkeeper journal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookkeeperJournal {
	/// Schema version for forward compatibility.
	pub version: u32,
	/// Records ordered by canonical key form.
	pub records: Vec<JournalRecord>,
}
impl BookkeeperJournal {
	/// Capture the bookkeeper's current ledger.
	pub fn capture(bookkeeper: &Bookkeeper) -> Self {
		let records = bookkeeper
			.export()
			.into_iter()
			.map(|(key, status)| JournalRecord { key, status })
			.collect();

		Self { version: JOURNAL_VERSION, records }
	}

	/// Restore a previously captured ledger into `bookkeeper`.
	pub fn restore(self, bookkeeper: &Bookkeeper) -> Result<()> {
		if self.version > JOURNAL_VERSION {
			return Err(StoreError::Serialization(format!(
				"Journal version {} is newer than supported version {JOURNAL_VERSION}.",
				self.version
			)));
		}

		bookkeeper.import(self.records.into_iter().map(|record| (record.key, record.status)));

		Ok(())
	}

	/// Serialize to JSON.
	pub fn to_json(&self) -> Result<String> {
		serde_json::to_string(self).map_err(|err| StoreError::Serialization(err.to_string()))
	}

	/// Deserialize from JSON.
	pub fn from_json(raw: &str) -> Result<Self> {
		serde_json::from_str(raw).map_err(|err| StoreError::Serialization(err.to_string()))
	}
}

/// Open boundary tokens captured for one paged key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingIndexRecord {
	/// Key the window belongs to.
	pub key: StoreKey,
	/// Boundary tokens in window order.
	pub tokens: Vec<PageToken>,
}

/// Versioned paging index for resumable streams.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingIndex {
	/// Schema version for forward compatibility.
	pub version: u32,
	/// Records ordered by canonical key form.
	pub records: Vec<PagingIndexRecord>,
}
impl PagingIndex {
	/// Build an index from exported `(key, tokens)` pairs.
	pub fn new(records: impl IntoIterator<Item = (StoreKey, Vec<PageToken>)>) -> Self {
		let records =
			records.into_iter().map(|(key, tokens)| PagingIndexRecord { key, tokens }).collect();

		Self { version: PAGING_INDEX_VERSION, records }
	}

	/// The `(key, tokens)` pairs for re-import.
	pub fn into_records(self) -> Result<Vec<(StoreKey, Vec<PageToken>)>> {
		if self.version > PAGING_INDEX_VERSION {
			return Err(StoreError::Serialization(format!(
				"Paging index version {} is newer than supported version {PAGING_INDEX_VERSION}.",
				self.version
			)));
		}

		Ok(self.records.into_iter().map(|record| (record.key, record.tokens)).collect())
	}

	/// Serialize to JSON.
	pub fn to_json(&self) -> Result<String> {
		serde_json::to_string(self).map_err(|err| StoreError::Serialization(err.to_string()))
	}

	/// Deserialize from JSON.
	pub fn from_json(raw: &str) -> Result<Self> {
		serde_json::from_str(raw).map_err(|err| StoreError::Serialization(err.to_string()))
	}
}
