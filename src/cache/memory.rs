//! Bounded in-memory cache with per-entry TTL and LRU eviction.

// std
use std::collections::{HashMap, VecDeque};
// crates.io
use tokio::sync::Mutex;
// self
use crate::{_prelude::*, key::Namespace};

/// Value returned on a cache hit.
#[derive(Clone, Debug)]
pub struct CacheHit<V> {
	/// Cached value.
	pub value: V,
	/// Wall-clock instant the entry was inserted.
	pub inserted_at: DateTime<Utc>,
}

/// Bounded mapping from key to `(value, expires_at)`.
///
/// All operations are serialized by a single mutex. An access-ordered queue encodes
/// recency: the front is the eviction candidate, the back the most recently used.
#[derive(Debug)]
pub struct MemoryCache<V> {
	clock: Arc<dyn Clock>,
	ttl: Duration,
	max_entries: usize,
	inner: Mutex<Inner<V>>,
}
impl<V> MemoryCache<V>
where
	V: Clone + Send,
{
	/// Create a cache bounded to `max_entries` with the given per-entry TTL.
	pub fn new(clock: Arc<dyn Clock>, ttl: Duration, max_entries: usize) -> Self {
		Self {
			clock,
			ttl,
			max_entries,
			inner: Mutex::new(Inner { slots: HashMap::new(), order: VecDeque::new() }),
		}
	}

	/// Look up `key`, promoting it to most-recently-used on a hit.
	///
	/// Entries past their expiry are dropped on observation and reported as misses.
	pub async fn get(&self, key: &StoreKey) -> Option<CacheHit<V>> {
		let now = self.clock.now();
		let mut inner = self.inner.lock().await;

		match inner.slots.get(key) {
			Some(slot) if now <= slot.expires_at => {
				let hit = CacheHit { value: slot.value.clone(), inserted_at: slot.inserted_at };

				inner.promote(key);

				Some(hit)
			},
			Some(_) => {
				inner.remove(key);

				None
			},
			None => None,
		}
	}

	/// Insert or overwrite `key`, returning `true` when the key was newly inserted.
	///
	/// Inserting a new key at capacity evicts the least-recently-used entry first.
	pub async fn put(&self, key: StoreKey, value: V) -> bool {
		let now = self.clock.now();
		let expires_at = now + TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
		let mut inner = self.inner.lock().await;
		let inserted = !inner.slots.contains_key(&key);

		if inserted && inner.slots.len() >= self.max_entries {
			inner.evict_lru();
		}

		inner.slots.insert(key.clone(), CacheSlot { value, inserted_at: now, expires_at });
		inner.promote(&key);

		inserted
	}

	/// Remove a single entry.
	pub async fn invalidate(&self, key: &StoreKey) {
		let mut inner = self.inner.lock().await;

		inner.remove(key);
	}

	/// Remove every entry whose key belongs to `namespace`.
	pub async fn invalidate_namespace(&self, namespace: &Namespace) {
		let mut inner = self.inner.lock().await;
		let doomed: Vec<StoreKey> = inner
			.slots
			.keys()
			.filter(|key| key.namespace() == namespace)
			.cloned()
			.collect();

		for key in doomed {
			inner.remove(&key);
		}
	}

	/// Remove every entry.
	pub async fn invalidate_all(&self) {
		let mut inner = self.inner.lock().await;

		inner.slots.clear();
		inner.order.clear();
	}

	/// Current entry count.
	pub async fn len(&self) -> usize {
		self.inner.lock().await.slots.len()
	}

	/// Whether the cache holds no entries.
	pub async fn is_empty(&self) -> bool {
		self.len().await == 0
	}
}

#[derive(Debug)]
struct CacheSlot<V> {
	value: V,
	inserted_at: DateTime<Utc>,
	expires_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Inner<V> {
	slots: HashMap<StoreKey, CacheSlot<V>>,
	order: VecDeque<StoreKey>,
}
impl<V> Inner<V> {
	fn promote(&mut self, key: &StoreKey) {
		if let Some(position) = self.order.iter().position(|k| k == key) {
			self.order.remove(position);
		}

		self.order.push_back(key.clone());
	}

	fn remove(&mut self, key: &StoreKey) {
		self.slots.remove(key);

		if let Some(position) = self.order.iter().position(|k| k == key) {
			self.order.remove(position);
		}
	}

	fn evict_lru(&mut self) {
		// An empty access-order queue means nothing can be evicted; skip rather than fail.
		if let Some(victim) = self.order.pop_front() {
			self.slots.remove(&victim);
		}
	}
}
