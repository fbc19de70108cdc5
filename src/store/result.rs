//! Results emitted on read streams.

// self
use crate::_prelude::*;

/// Where an emitted value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
	/// Served from the in-memory cache.
	Memory,
	/// Served from the local source of truth.
	SourceOfTruth,
	/// Produced directly from a network response without an intervening
	/// source-of-truth emission.
	Network,
}

/// One state transition on a read stream.
#[derive(Clone, Debug)]
pub enum StoreResult<V> {
	/// No value is available yet; a fetch may be in progress.
	Loading {
		/// Whether a cached value preceded this transition.
		from_cache: bool,
	},
	/// A value is available.
	Data {
		/// The domain value.
		value: V,
		/// Layer that produced the value.
		origin: Origin,
		/// How long ago the value was last confirmed current.
		age: Duration,
	},
	/// A fetch failed.
	Error {
		/// The classified failure.
		error: StoreError,
		/// Whether stale data was surfaced ahead of this error.
		served_stale: bool,
	},
}
impl<V> StoreResult<V> {
	/// The carried value, when this is a data transition.
	pub fn value(&self) -> Option<&V> {
		match self {
			Self::Data { value, .. } => Some(value),
			_ => None,
		}
	}

	/// The carried error, when this is an error transition.
	pub fn error(&self) -> Option<&StoreError> {
		match self {
			Self::Error { error, .. } => Some(error),
			_ => None,
		}
	}

	/// Whether this is a data transition.
	pub fn is_data(&self) -> bool {
		matches!(self, Self::Data { .. })
	}
}
