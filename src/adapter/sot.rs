//! Source-of-truth adapter contract and the in-memory reference implementation.

// std
use std::{
	collections::HashMap,
	pin::Pin,
	sync::{
		Mutex,
		atomic::{AtomicU64, Ordering},
	},
};
// crates.io
use async_trait::async_trait;
use tokio::sync::watch;
use tokio_stream::{Stream, wrappers::WatchStream};
// self
use crate::_prelude::*;

/// Lazy, restartable sequence of rows for one key.
///
/// The first emission is the current row (or its absence); a fresh emission follows
/// every committed write or delete. The sequence only ends when the adapter is torn
/// down.
pub type RowStream<Db> = Pin<Box<dyn Stream<Item = Option<Db>> + Send>>;

/// Reconciliation function applied when a rekey target already holds a row.
pub type Reconcile<Db> = Box<dyn FnOnce(Db, Db) -> Db + Send>;

/// One write inside an atomic batch.
#[derive(Clone, Debug)]
pub enum SotWrite<Db> {
	/// Insert or overwrite a row.
	Put(StoreKey, Db),
	/// Remove a row.
	Delete(StoreKey),
}

/// Local durable store backing the engine.
///
/// Implementations must be safe under concurrent readers and serialize their own
/// writes; the engine additionally serializes its own writes per key. `reader` must
/// re-emit after any write or delete that has observably completed.
#[async_trait]
pub trait SourceOfTruth<Db>: Send + Sync {
	/// Observe the row for `key`.
	fn reader(&self, key: &StoreKey) -> RowStream<Db>;

	/// Atomically insert or overwrite the row for `key`.
	async fn write(&self, key: &StoreKey, value: Db) -> Result<()>;

	/// Atomically remove the row for `key`; readers subsequently observe absence.
	async fn delete(&self, key: &StoreKey) -> Result<()>;

	/// Apply a batch of writes as one atomic unit.
	async fn transaction(&self, batch: Vec<SotWrite<Db>>) -> Result<()>;

	/// Move the row at `old` to `new`, reconciling when `new` already holds a row.
	async fn rekey(&self, old: &StoreKey, new: &StoreKey, reconcile: Reconcile<Db>) -> Result<()>;
}

/// Watch-channel-backed source of truth.
///
/// The reference implementation for tests and small deployments: every key owns a
/// watch channel, so readers conflate to the latest row rather than buffering.
#[derive(Debug)]
pub struct InMemorySot<Db> {
	inner: Mutex<HashMap<StoreKey, watch::Sender<Option<Db>>>>,
	writes: AtomicU64,
	deletes: AtomicU64,
}
impl<Db> InMemorySot<Db>
where
	Db: Clone + Send + Sync + 'static,
{
	/// Create an empty store.
	pub fn new() -> Self {
		Self { inner: Mutex::new(HashMap::new()), writes: AtomicU64::new(0), deletes: AtomicU64::new(0) }
	}

	/// Number of committed writes, observable by tests.
	pub fn write_count(&self) -> u64 {
		self.writes.load(Ordering::SeqCst)
	}

	/// Number of committed deletes, observable by tests.
	pub fn delete_count(&self) -> u64 {
		self.deletes.load(Ordering::SeqCst)
	}

	/// Current row for `key` without subscribing.
	pub fn peek(&self, key: &StoreKey) -> Option<Db> {
		let table = self.inner.lock().expect("sot table poisoned");

		table.get(key).and_then(|sender| sender.borrow().clone())
	}

	fn apply_locked(
		table: &mut HashMap<StoreKey, watch::Sender<Option<Db>>>,
		key: &StoreKey,
		row: Option<Db>,
	) {
		match table.get(key) {
			Some(sender) => {
				sender.send_replace(row);
			},
			None => {
				let (sender, _) = watch::channel(row);

				table.insert(key.clone(), sender);
			},
		}
	}
}
impl<Db> Default for InMemorySot<Db>
where
	Db: Clone + Send + Sync + 'static,
{
	fn default() -> Self {
		Self::new()
	}
}
#[async_trait]
impl<Db> SourceOfTruth<Db> for InMemorySot<Db>
where
	Db: Clone + Send + Sync + 'static,
{
	fn reader(&self, key: &StoreKey) -> RowStream<Db> {
		let receiver = {
			let mut table = self.inner.lock().expect("sot table poisoned");

			table
				.entry(key.clone())
				.or_insert_with(|| watch::channel(None).0)
				.subscribe()
		};

		Box::pin(WatchStream::new(receiver))
	}

	async fn write(&self, key: &StoreKey, value: Db) -> Result<()> {
		let mut table = self.inner.lock().expect("sot table poisoned");

		Self::apply_locked(&mut table, key, Some(value));
		self.writes.fetch_add(1, Ordering::SeqCst);

		Ok(())
	}

	async fn delete(&self, key: &StoreKey) -> Result<()> {
		let mut table = self.inner.lock().expect("sot table poisoned");

		Self::apply_locked(&mut table, key, None);
		self.deletes.fetch_add(1, Ordering::SeqCst);

		Ok(())
	}

	async fn transaction(&self, batch: Vec<SotWrite<Db>>) -> Result<()> {
		// The table mutex is held across the whole batch; readers observe either none
		// or all of it.
		let mut table = self.inner.lock().expect("sot table poisoned");

		for write in batch {
			match write {
				SotWrite::Put(key, value) => {
					Self::apply_locked(&mut table, &key, Some(value));
					self.writes.fetch_add(1, Ordering::SeqCst);
				},
				SotWrite::Delete(key) => {
					Self::apply_locked(&mut table, &key, None);
					self.deletes.fetch_add(1, Ordering::SeqCst);
				},
			}
		}

		Ok(())
	}

	async fn rekey(&self, old: &StoreKey, new: &StoreKey, reconcile: Reconcile<Db>) -> Result<()> {
		let mut table = self.inner.lock().expect("sot table poisoned");
		let moved = table.get(old).and_then(|sender| sender.borrow().clone());

		if let Some(moved) = moved {
			let existing = table.get(new).and_then(|sender| sender.borrow().clone());
			let merged = match existing {
				Some(existing) => reconcile(moved, existing),
				None => moved,
			};

			Self::apply_locked(&mut table, new, Some(merged));
			self.writes.fetch_add(1, Ordering::SeqCst);
		}

		Self::apply_locked(&mut table, old, None);
		self.deletes.fetch_add(1, Ordering::SeqCst);

		Ok(())
	}
}
