//! Per-key mutex table with a bounded LRU of locks.

// std
use std::collections::{HashMap, VecDeque};
// crates.io
use tokio::sync::Mutex;
// self
use crate::_prelude::*;

/// Mapping from key to a shared mutex, bounded by LRU eviction.
///
/// The outer table mutex is always acquired strictly before any per-key mutex and is
/// released before the per-key mutex is awaited: [`KeyedLockTable::for_key`] only ever
/// returns a handle, never a held guard.
///
/// Evicting a lock that is currently held is permitted. Holders keep their `Arc` and
/// complete normally; newcomers asking for the same key after eviction receive a fresh
/// mutex. Eviction only strikes keys colder than `max_entries − 1` other keys, so the
/// evicted lock has no queued waiters in any workload the bound is sized for.
#[derive(Debug)]
pub struct KeyedLockTable {
	max_entries: usize,
	inner: Mutex<Inner>,
}
impl KeyedLockTable {
	/// Create a table bounded to `max_entries` locks.
	pub fn new(max_entries: usize) -> Self {
		Self {
			max_entries,
			inner: Mutex::new(Inner { locks: HashMap::new(), order: VecDeque::new() }),
		}
	}

	/// Fetch the mutex associated with `key`, creating it if absent.
	pub async fn for_key(&self, key: &StoreKey) -> Arc<Mutex<()>> {
		let mut inner = self.inner.lock().await;

		if let Some(lock) = inner.locks.get(key) {
			let lock = lock.clone();

			inner.promote(key);

			return lock;
		}

		if inner.locks.len() >= self.max_entries
			&& let Some(victim) = inner.order.pop_front()
		{
			inner.locks.remove(&victim);
		}

		let lock = Arc::new(Mutex::new(()));

		inner.locks.insert(key.clone(), lock.clone());
		inner.order.push_back(key.clone());

		lock
	}

	/// Current number of tracked locks.
	pub async fn len(&self) -> usize {
		self.inner.lock().await.locks.len()
	}

	/// Whether the table tracks no locks.
	pub async fn is_empty(&self) -> bool {
		self.len().await == 0
	}
}

#[derive(Debug)]
struct Inner {
	locks: HashMap<StoreKey, Arc<Mutex<()>>>,
	order: VecDeque<StoreKey>,
}
impl Inner {
	fn promote(&mut self, key: &StoreKey) {
		if let Some(position) = self.order.iter().position(|k| k == key) {
			self.order.remove(position);
		}

		self.order.push_back(key.clone());
	}
}
