//! Read store: the memory → source-of-truth → conditional-fetch pipeline.

// crates.io
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt, wrappers::ReceiverStream};
// self
use crate::{
	_prelude::*,
	adapter::{sot::RowStream, updater::Updater},
	cache::{
		bookkeeper::KeyStatus,
		flight::FlightOutcome,
		freshness::{DbMeta, Freshness, plan_fetch, stale_within_window},
	},
	clock::age_of,
	key::Namespace,
	persist::BookkeeperJournal,
	stats::StoreStatsSnapshot,
	store::{
		core::{FetchValue, StoreCore},
		mutation::MutationStore,
		result::{Origin, StoreResult},
	},
};

/// Read-side API over one key space.
///
/// Cloning is cheap and shares the underlying tables; `close` tears down every
/// subscriber driver spawned by any clone.
pub struct ReadStore<Net, Db, V> {
	pub(crate) core: Arc<StoreCore<Net, Db, V>>,
}
impl<Net, Db, V> Clone for ReadStore<Net, Db, V> {
	fn clone(&self) -> Self {
		Self { core: self.core.clone() }
	}
}
impl<Net, Db, V> ReadStore<Net, Db, V>
where
	Net: Send + Sync + 'static,
	Db: Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
{
	/// Observe `key` as a lazy sequence of state transitions.
	///
	/// The sequence is infinite; it ends only when the subscription is dropped, the
	/// store is closed, or a `MustBeFresh` fetch fails. Dropping the returned stream
	/// cancels any fetch it is leading.
	pub fn stream(&self, key: StoreKey, freshness: Freshness) -> impl Stream<Item = StoreResult<V>> {
		let (tx, rx) = mpsc::channel(self.core.config.stream_buffer);
		let core = self.core.clone();
		let shutdown = core.shutdown.clone();

		tokio::spawn(async move {
			tokio::select! {
				_ = shutdown.cancelled() => {},
				_ = Self::drive_subscriber(core, key, freshness, tx) => {},
			}
		});

		ReceiverStream::new(rx)
	}

	/// One-shot read honoring `freshness`.
	///
	/// A memory hit satisfies `CachedOrFetch` directly; otherwise the fetch pipeline
	/// runs to completion and the classified error propagates. Dropping the call
	/// cancels the fetch it is leading.
	#[tracing::instrument(skip(self, key), fields(key = %key))]
	pub async fn get(&self, key: &StoreKey, freshness: Freshness) -> Result<V> {
		if matches!(freshness, Freshness::CachedOrFetch)
			&& let Some(hit) = self.core.memory.get(key).await
		{
			self.core.stats.record_memory_hit();

			return Ok(hit.value);
		}

		self.core.stats.record_memory_miss();

		loop {
			let row = self.core.current_row(key).await;
			let sot_meta =
				row.as_ref().and_then(|row| self.core.converter.db_meta_from_projection(row));
			let now = self.core.clock.now();
			let status = self.core.bookkeeper.last_status(key);
			let plan = plan_fetch(now, freshness, self.core.config.ttl, sot_meta.as_ref(), &status);

			if !plan.requires_fetch() {
				return self.serve_row(key, row).await;
			}

			match self.core.run_fetch(key, plan).await {
				FlightOutcome::Success(FetchValue::Fresh(value)) => return Ok(value),
				FlightOutcome::Success(FetchValue::NotModified) =>
					return self.serve_row(key, row).await,
				FlightOutcome::Failure(error) => {
					if matches!(freshness, Freshness::StaleIfError)
						&& stale_within_window(
							self.core.clock.now(),
							self.core.config.stale_if_error,
							sot_meta.as_ref(),
							&status,
						) && let Some(row) = row
					{
						tracing::warn!(key = %key, error = %error, "fetch failed; serving stale row");
						self.core.stats.record_stale_serve();

						return self.core.converter.db_read_to_domain(key, &row);
					}

					return Err(error);
				},
				// The leading caller went away; take over with a fresh flight.
				FlightOutcome::Cancelled => continue,
			}
		}
	}

	/// Drop `key` from memory and the source of truth.
	pub async fn invalidate(&self, key: &StoreKey) -> Result<()> {
		// The delete is an engine-originated write; serialize it with fetch
		// write-backs and mutations on the same key.
		let lock = self.core.locks.for_key(key).await;
		let _guard = lock.lock().await;

		self.core.memory.invalidate(key).await;
		self.core.sot.delete(key).await
	}

	/// Drop every memory entry in `namespace`.
	///
	/// Source-of-truth removal is not awaited here; persisted rows age out through
	/// their freshness metadata instead.
	pub async fn invalidate_namespace(&self, namespace: &Namespace) {
		self.core.memory.invalidate_namespace(namespace).await;
	}

	/// Drop every memory entry.
	pub async fn invalidate_all(&self) {
		self.core.memory.invalidate_all().await;
	}

	/// Cancel the background scope; every live subscriber stream ends.
	pub fn close(&self) {
		self.core.shutdown.cancel();
	}

	/// Point-in-time counter snapshot.
	pub fn stats(&self) -> StoreStatsSnapshot {
		self.core.stats.snapshot()
	}

	/// Bookkeeping record for `key`; missing keys yield an all-`None` record.
	pub fn key_status(&self, key: &StoreKey) -> KeyStatus {
		self.core.bookkeeper.last_status(key)
	}

	/// Capture the bookkeeper ledger for persistence.
	pub fn export_journal(&self) -> BookkeeperJournal {
		BookkeeperJournal::capture(&self.core.bookkeeper)
	}

	/// Restore a previously captured bookkeeper ledger.
	pub fn import_journal(&self, journal: BookkeeperJournal) -> Result<()> {
		journal.restore(&self.core.bookkeeper)
	}

	/// Derive a mutation store sharing this store's tables and key locks.
	pub fn mutations(&self, updater: Arc<dyn Updater<Net, V>>) -> MutationStore<Net, Db, V> {
		MutationStore::new(self.core.clone(), updater)
	}

	// Project a source-of-truth row for a one-shot read, warming the memory cache on
	// the way out.
	async fn serve_row(&self, key: &StoreKey, row: Option<Db>) -> Result<V> {
		match row {
			Some(row) => {
				let value = self.core.converter.db_read_to_domain(key, &row)?;

				self.core.memory.put(key.clone(), value.clone()).await;

				Ok(value)
			},
			None => Err(StoreError::NotFound(key.clone())),
		}
	}

	async fn drive_subscriber(
		core: Arc<StoreCore<Net, Db, V>>,
		key: StoreKey,
		freshness: Freshness,
		tx: mpsc::Sender<StoreResult<V>>,
	) {
		let mut emitted_data = false;
		let mut sot_meta: Option<DbMeta> = None;

		// Step 1: the memory cache decides between a warm start and a loading marker.
		if let Some(hit) = core.memory.get(&key).await {
			core.stats.record_memory_hit();

			let age = age_of(core.clock.now(), hit.inserted_at);

			if tx
				.send(StoreResult::Data { value: hit.value, origin: Origin::Memory, age })
				.await
				.is_err()
			{
				return;
			}

			emitted_data = true;
		} else {
			core.stats.record_memory_miss();

			if tx.send(StoreResult::Loading { from_cache: false }).await.is_err() {
				return;
			}
		}

		// Step 2: subscribe to the source of truth; the first emission doubles as the
		// plan input.
		let mut rows = core.sot.reader(&key);
		let first = tokio::select! {
			row = rows.next() => row,
			() = tx.closed() => return,
		};

		match first {
			Some(Some(row)) =>
				if !Self::emit_row(&core, &key, &tx, row, &mut emitted_data, &mut sot_meta).await {
					return;
				},
			Some(None) => {},
			None => return,
		}

		// Step 3: the validator turns policy, row metadata, and bookkeeping into a plan.
		let now = core.clock.now();
		let status = core.bookkeeper.last_status(&key);
		let plan = plan_fetch(now, freshness, core.config.ttl, sot_meta.as_ref(), &status);

		tracing::debug!(key = %key, plan = ?plan, "computed fetch plan");

		// Step 4: nothing to fetch; keep serving source-of-truth updates.
		if !plan.requires_fetch() {
			Self::forward_rows(&core, &key, &mut rows, &tx, &mut emitted_data, &mut sot_meta).await;

			return;
		}

		// Step 5: `MustBeFresh` runs the fetch blockingly; a failure terminates the
		// stream.
		if matches!(freshness, Freshness::MustBeFresh) {
			let outcome = tokio::select! {
				outcome = core.run_fetch(&key, plan) => outcome,
				() = tx.closed() => return,
			};

			match outcome {
				FlightOutcome::Success(_) => {
					Self::forward_rows(&core, &key, &mut rows, &tx, &mut emitted_data, &mut sot_meta)
						.await;
				},
				FlightOutcome::Failure(error) => {
					let _ = tx.send(StoreResult::Error { error, served_stale: false }).await;
				},
				FlightOutcome::Cancelled => {},
			}

			return;
		}

		// Steps 6-9: the fetch runs as a child of this subscriber while rows keep
		// flowing; dropping the subscription drops the fetch with it.
		let fetch = core.run_fetch(&key, plan);

		tokio::pin!(fetch);

		let mut fetch_pending = true;

		loop {
			tokio::select! {
				outcome = &mut fetch, if fetch_pending => {
					fetch_pending = false;

					if let FlightOutcome::Failure(error) = outcome {
						let served_stale = matches!(freshness, Freshness::StaleIfError)
							&& emitted_data
							&& stale_within_window(
								core.clock.now(),
								core.config.stale_if_error,
								sot_meta.as_ref(),
								&core.bookkeeper.last_status(&key),
							);

						if served_stale {
							core.stats.record_stale_serve();
						}

						if tx.send(StoreResult::Error { error, served_stale }).await.is_err() {
							return;
						}
					}
				},
				row = rows.next() => match row {
					Some(Some(row)) =>
						if !Self::emit_row(&core, &key, &tx, row, &mut emitted_data, &mut sot_meta)
							.await
						{
							return;
						},
					Some(None) => {},
					None => return,
				},
				() = tx.closed() => return,
			}
		}
	}

	async fn forward_rows(
		core: &Arc<StoreCore<Net, Db, V>>,
		key: &StoreKey,
		rows: &mut RowStream<Db>,
		tx: &mpsc::Sender<StoreResult<V>>,
		emitted_data: &mut bool,
		sot_meta: &mut Option<DbMeta>,
	) {
		loop {
			tokio::select! {
				row = rows.next() => match row {
					Some(Some(row)) =>
						if !Self::emit_row(core, key, tx, row, emitted_data, sot_meta).await {
							return;
						},
					Some(None) => {},
					None => return,
				},
				() = tx.closed() => return,
			}
		}
	}

	async fn emit_row(
		core: &Arc<StoreCore<Net, Db, V>>,
		key: &StoreKey,
		tx: &mpsc::Sender<StoreResult<V>>,
		row: Db,
		emitted_data: &mut bool,
		sot_meta: &mut Option<DbMeta>,
	) -> bool {
		*sot_meta = core.converter.db_meta_from_projection(&row);

		match core.converter.db_read_to_domain(key, &row) {
			Ok(value) => {
				let age = sot_meta
					.as_ref()
					.map(|meta| age_of(core.clock.now(), meta.updated_at))
					.unwrap_or(Duration::ZERO);
				let sent = tx
					.send(StoreResult::Data { value, origin: Origin::SourceOfTruth, age })
					.await
					.is_ok();

				*emitted_data = *emitted_data || sent;

				sent
			},
			Err(error) => {
				tracing::warn!(key = %key, error = %error, "row projection failed");

				tx.send(StoreResult::Error { error, served_stale: false }).await.is_ok()
			},
		}
	}
}
