//! Network updater contract for the mutation pipeline.

// crates.io
use async_trait::async_trait;
// self
use crate::_prelude::*;

/// One mutation dispatched to the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationOp<V> {
	/// Create a value that must not exist yet.
	Create(V),
	/// Patch the existing value.
	Update(V),
	/// Remove the value.
	Delete,
	/// Create or overwrite, whichever applies.
	Upsert(V),
	/// Overwrite a value that must already exist.
	Replace(V),
}
impl<V> MutationOp<V> {
	/// The value the operation applies locally, when it carries one.
	pub fn value(&self) -> Option<&V> {
		match self {
			Self::Create(value) | Self::Update(value) | Self::Upsert(value) | Self::Replace(value) =>
				Some(value),
			Self::Delete => None,
		}
	}

	/// Whether the operation removes the row.
	pub fn is_delete(&self) -> bool {
		matches!(self, Self::Delete)
	}
}

/// Injected network dependency for writes.
///
/// `send` returns the server's echo of the committed state, or `None` when the server
/// acknowledges without a body (typical for deletes).
#[async_trait]
pub trait Updater<Net, V>: Send + Sync {
	/// Dispatch `op` for `key` and return the server echo.
	async fn send(&self, key: &StoreKey, op: &MutationOp<V>) -> Result<Option<Net>>;
}
