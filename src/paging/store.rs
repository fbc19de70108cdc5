//! Page store: coordinates bidirectional loads over per-key window state.

// std
use std::{
	collections::HashMap,
	sync::{
		Mutex as StdMutex,
		atomic::{AtomicU64, Ordering},
	},
};
// crates.io
use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	cache::freshness::Freshness,
	clock::within_window,
	config::DEFAULT_TTL,
	key::Namespace,
	paging::state::{
		LoadDirection, LoadState, Page, PageToken, PagingConfig, PagingSnapshot, PagingState,
	},
};

/// Injected page-shaped network dependency.
#[async_trait]
pub trait PageFetcher<V>: Send + Sync {
	/// Fetch one page for `key` in `direction`, continuing from `token` when given.
	async fn fetch_page(
		&self,
		key: &StoreKey,
		direction: LoadDirection,
		token: Option<&PageToken>,
		page_size: usize,
	) -> Result<Page<V>>;
}

/// Event published after every structural change to a key's window.
#[derive(Clone, Debug)]
pub enum PagingEvent<V> {
	/// Immutable view of the window.
	Snapshot(PagingSnapshot<V>),
	/// A boundary load closed both ends of the window.
	Boundary {
		/// Direction of the load that closed the boundary.
		direction: LoadDirection,
	},
}
impl<V> PagingEvent<V> {
	/// The carried snapshot, when this is a snapshot event.
	pub fn snapshot(&self) -> Option<&PagingSnapshot<V>> {
		match self {
			Self::Snapshot(snapshot) => Some(snapshot),
			Self::Boundary { .. } => None,
		}
	}
}

/// Bidirectional paging coordinator.
///
/// Window state per key is guarded by its own mutex, separate from the read store's
/// key-mutex table; loads for one key are serialized, and concurrent loads in the same
/// direction collapse onto the first. Snapshot emission uses a drop-oldest broadcast so
/// slow consumers observe the latest window rather than falling behind unboundedly.
pub struct PageStore<V> {
	fetcher: Arc<dyn PageFetcher<V>>,
	clock: Arc<dyn Clock>,
	ttl: Duration,
	entries: StdMutex<HashMap<StoreKey, Arc<PageEntry<V>>>>,
	shutdown: CancellationToken,
}
impl<V> PageStore<V>
where
	V: Clone + Send + Sync + 'static,
{
	/// Create a store over the given page fetcher with the system clock.
	pub fn new(fetcher: Arc<dyn PageFetcher<V>>) -> Self {
		Self {
			fetcher,
			clock: Arc::new(crate::clock::SystemClock),
			ttl: DEFAULT_TTL,
			entries: StdMutex::new(HashMap::new()),
			shutdown: CancellationToken::new(),
		}
	}

	/// Replace the time source.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}

	/// Replace the freshness TTL consulted by `CachedOrFetch` and refresh decisions.
	pub fn with_ttl(mut self, ttl: Duration) -> Self {
		self.ttl = ttl;

		self
	}

	/// Observe `key` as a lazy sequence of paging events.
	///
	/// The first event is always a snapshot of the established window. `config` is
	/// honored only for the first subscriber of the key; later subscribers observe the
	/// established state. An initial load is triggered automatically iff there is no
	/// prior state or `freshness` demands one.
	pub async fn stream(
		&self,
		key: StoreKey,
		config: PagingConfig,
		freshness: Freshness,
	) -> Result<impl Stream<Item = PagingEvent<V>>> {
		config.validate()?;

		let entry = self.entry(&key, config);
		// Subscribe before snapshotting so nothing published in between is lost;
		// duplicated snapshots conflate harmlessly.
		let events = BroadcastStream::new(entry.events.subscribe())
			.filter_map(|event| event.ok());
		let (current, needs_initial) = {
			let state = entry.state.lock().await;

			(state.snapshot(), self.initial_load_due(&state, freshness))
		};

		if needs_initial {
			self.spawn_load(entry, key, LoadDirection::Initial, None);
		}

		Ok(tokio_stream::once(PagingEvent::Snapshot(current)).chain(events))
	}

	/// Load one page for `key` in `direction`.
	///
	/// An explicit `from` token always proceeds, even across a closed boundary;
	/// without one, boundary loads with no open token are no-ops. Concurrent loads in
	/// the same direction await the first instead of fetching twice.
	pub async fn load(
		&self,
		key: &StoreKey,
		direction: LoadDirection,
		from: Option<PageToken>,
		freshness: Freshness,
	) -> Result<()> {
		let entry = self.entry(key, PagingConfig::default());

		if matches!(direction, LoadDirection::Initial) {
			let background_refresh = {
				let state = entry.state.lock().await;

				match freshness {
					Freshness::MustBeFresh => false,
					_ if !state.is_loaded() => false,
					// Cached state satisfies the caller; refresh out of band when due.
					_ => {
						if !self.initial_load_due(&state, freshness) {
							return Ok(());
						}

						matches!(freshness, Freshness::CachedOrFetch | Freshness::StaleIfError)
					},
				}
			};

			if background_refresh {
				self.spawn_load(entry, key.clone(), LoadDirection::Initial, None);

				return Ok(());
			}
		}

		Self::run_load(
			self.fetcher.clone(),
			self.clock.clone(),
			entry,
			key.clone(),
			direction,
			from,
		)
		.await
	}

	/// Replace the window with a fresh initial load.
	pub async fn refresh(&self, key: &StoreKey) -> Result<()> {
		self.load(key, LoadDirection::Initial, None, Freshness::MustBeFresh).await
	}

	/// Drop the window for `key`; live subscriptions end.
	pub fn invalidate(&self, key: &StoreKey) {
		self.entries.lock().expect("paging table poisoned").remove(key);
	}

	/// Drop every window whose key belongs to `namespace`.
	pub fn invalidate_namespace(&self, namespace: &Namespace) {
		self.entries
			.lock()
			.expect("paging table poisoned")
			.retain(|key, _| key.namespace() != namespace);
	}

	/// Cancel background refreshes; in-flight explicit loads run to completion.
	pub fn close(&self) {
		self.shutdown.cancel();
	}

	/// Export the open boundary tokens per key, ordered by canonical key form.
	pub async fn export_index(&self) -> Vec<(StoreKey, Vec<PageToken>)> {
		let entries: Vec<(StoreKey, Arc<PageEntry<V>>)> = {
			let table = self.entries.lock().expect("paging table poisoned");

			table.iter().map(|(key, entry)| (key.clone(), entry.clone())).collect()
		};
		let mut records = Vec::with_capacity(entries.len());

		for (key, entry) in entries {
			let state = entry.state.lock().await;
			let tokens: Vec<PageToken> =
				state.prev_token.iter().chain(state.next_token.iter()).cloned().collect();

			records.push((key, tokens));
		}

		records.sort_by_key(|(key, _)| key.index_key());

		records
	}

	/// Seed boundary tokens for keys with no established window yet.
	///
	/// Tokens are interpreted positionally: a record's last token reopens the forward
	/// boundary, its first (when distinct) the backward one.
	pub async fn import_index(
		&self,
		records: impl IntoIterator<Item = (StoreKey, Vec<PageToken>)>,
	) {
		for (key, tokens) in records {
			let entry = self.entry(&key, PagingConfig::default());
			let mut state = entry.state.lock().await;

			if state.is_loaded() {
				continue;
			}

			state.next_token = tokens.last().cloned();
			state.prev_token = if tokens.len() > 1 { tokens.first().cloned() } else { None };
		}
	}

	fn entry(&self, key: &StoreKey, config: PagingConfig) -> Arc<PageEntry<V>> {
		let mut table = self.entries.lock().expect("paging table poisoned");

		table
			.entry(key.clone())
			.or_insert_with(|| {
				// First caller wins: the config captured here is the key's config.
				let (events, _) = broadcast::channel(64);

				Arc::new(PageEntry {
					state: Mutex::new(PagingState::new(config)),
					events,
					epochs: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
				})
			})
			.clone()
	}

	fn initial_load_due(&self, state: &PagingState<V>, freshness: Freshness) -> bool {
		let now = self.clock.now();

		match freshness {
			Freshness::MustBeFresh => true,
			Freshness::MinAge(age) => match state.last_refresh_at {
				Some(at) => !within_window(now, at, age),
				None => true,
			},
			Freshness::CachedOrFetch | Freshness::StaleIfError => match state.last_refresh_at {
				Some(at) => !within_window(now, at, self.ttl),
				None => true,
			},
		}
	}

	fn spawn_load(
		&self,
		entry: Arc<PageEntry<V>>,
		key: StoreKey,
		direction: LoadDirection,
		from: Option<PageToken>,
	) {
		let fetcher = self.fetcher.clone();
		let clock = self.clock.clone();
		let shutdown = self.shutdown.clone();

		tokio::spawn(async move {
			tokio::select! {
				_ = shutdown.cancelled() => {},
				result = Self::run_load(fetcher, clock, entry, key.clone(), direction, from) => {
					if let Err(error) = result {
						tracing::debug!(key = %key, error = %error, "background page load failed");
					}
				},
			}
		});
	}

	async fn run_load(
		fetcher: Arc<dyn PageFetcher<V>>,
		clock: Arc<dyn Clock>,
		entry: Arc<PageEntry<V>>,
		key: StoreKey,
		direction: LoadDirection,
		from: Option<PageToken>,
	) -> Result<()> {
		let epoch = entry.epoch(direction);
		let mut state = entry.state.lock().await;

		// A load in this direction completed while this call waited on the key mutex;
		// the caller has effectively awaited it.
		if entry.epoch(direction) != epoch {
			return Ok(());
		}

		let token = match direction {
			LoadDirection::Initial => from,
			LoadDirection::Append => match from.or_else(|| state.next_token.clone()) {
				Some(token) => Some(token),
				None => return Ok(()),
			},
			LoadDirection::Prepend => match from.or_else(|| state.prev_token.clone()) {
				Some(token) => Some(token),
				None => return Ok(()),
			},
		};

		state.source_states.set(direction, LoadState::Loading);
		entry.emit(PagingEvent::Snapshot(state.snapshot()));

		tracing::debug!(key = %key, direction = ?direction, "loading page");

		let result = fetcher.fetch_page(&key, direction, token.as_ref(), state.config.page_size).await;
		let now = clock.now();

		match result {
			Ok(page) => {
				state.integrate(direction, page, now);
				state.source_states.set(direction, LoadState::Idle);
				entry.bump_epoch(direction);
				entry.emit(PagingEvent::Snapshot(state.snapshot()));

				if state.fully_loaded {
					entry.emit(PagingEvent::Boundary { direction });
				}

				Ok(())
			},
			Err(error) => {
				// Errors stay localized to this direction; the window is preserved.
				let can_serve_stale = state.total_len() > 0;

				state
					.source_states
					.set(direction, LoadState::Error { error: error.clone(), can_serve_stale });
				entry.bump_epoch(direction);
				entry.emit(PagingEvent::Snapshot(state.snapshot()));

				Err(error)
			},
		}
	}
}

struct PageEntry<V> {
	state: Mutex<PagingState<V>>,
	events: broadcast::Sender<PagingEvent<V>>,
	epochs: [AtomicU64; 3],
}
impl<V> PageEntry<V>
where
	V: Clone,
{
	fn epoch(&self, direction: LoadDirection) -> u64 {
		self.epochs[Self::slot(direction)].load(Ordering::SeqCst)
	}

	fn bump_epoch(&self, direction: LoadDirection) {
		self.epochs[Self::slot(direction)].fetch_add(1, Ordering::SeqCst);
	}

	fn emit(&self, event: PagingEvent<V>) {
		// No live subscribers is fine; the state itself is the source of record.
		let _ = self.events.send(event);
	}

	fn slot(direction: LoadDirection) -> usize {
		match direction {
			LoadDirection::Initial => 0,
			LoadDirection::Append => 1,
			LoadDirection::Prepend => 2,
		}
	}
}
