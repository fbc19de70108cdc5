//! Network fetcher contract.

// crates.io
use async_trait::async_trait;
// self
use crate::_prelude::*;

/// Validators forwarded on a conditional fetch.
///
/// The engine does not define a wire protocol; implementations choose how to map these
/// onto headers (`If-None-Match`, `If-Modified-Since`) or query parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Conditional {
	/// Validator from the previous successful exchange.
	pub etag: Option<String>,
	/// Timestamp of the locally persisted row.
	pub last_modified: Option<DateTime<Utc>>,
}

/// Terminal outcome of one fetch call.
#[derive(Clone, Debug)]
pub enum FetcherResult<Net> {
	/// The server returned a fresh representation.
	Success {
		/// Wire-shaped payload.
		body: Net,
		/// Validator for future conditional fetches.
		etag: Option<String>,
		/// Server-reported modification timestamp.
		last_modified: Option<DateTime<Utc>>,
	},
	/// The server confirmed the local representation is still current.
	NotModified {
		/// Validator echoed by the server, when provided.
		etag: Option<String>,
	},
	/// The fetch failed.
	Error(StoreError),
}

/// Injected network dependency.
///
/// Each call yields exactly one terminal outcome; streaming transports surface their
/// first terminal event and may discard the rest, which is all the engine consumes.
#[async_trait]
pub trait Fetcher<Net>: Send + Sync {
	/// Fetch the representation for `key`, revalidating when `conditional` is given.
	async fn fetch(&self, key: &StoreKey, conditional: Option<&Conditional>) -> FetcherResult<Net>;
}
