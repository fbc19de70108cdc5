//! Engine internals shared by the read and mutation stores.

// crates.io
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	adapter::{
		converter::Converter,
		fetcher::{Conditional, Fetcher, FetcherResult},
		sot::SourceOfTruth,
	},
	cache::{
		bookkeeper::Bookkeeper,
		flight::{FlightOutcome, SingleFlight},
		freshness::FetchPlan,
		lock::KeyedLockTable,
		memory::MemoryCache,
	},
	config::StoreConfig,
	stats::StoreStats,
};

/// Result of one deduplicated fetch, shared by every single-flight participant.
#[derive(Clone, Debug)]
pub(crate) enum FetchValue<V> {
	/// The server returned a fresh value; it has been written back already.
	Fresh(V),
	/// The server confirmed the local row is current; bookkeeping only.
	NotModified,
}

/// Tables and collaborators owned by one store.
///
/// The core exclusively owns the memory cache, the key-mutex table, the single-flight
/// registry, and the bookkeeper; collaborators are shared handles. Subscriber drivers
/// hold the core behind an `Arc` and never a table guard across turns.
pub(crate) struct StoreCore<Net, Db, V> {
	pub config: StoreConfig,
	pub clock: Arc<dyn Clock>,
	pub memory: MemoryCache<V>,
	pub locks: KeyedLockTable,
	pub flights: SingleFlight<FetchValue<V>>,
	pub bookkeeper: Bookkeeper,
	pub stats: Arc<StoreStats>,
	pub sot: Arc<dyn SourceOfTruth<Db>>,
	pub fetcher: Arc<dyn Fetcher<Net>>,
	pub converter: Arc<dyn Converter<Net, Db, V>>,
	pub shutdown: CancellationToken,
}
impl<Net, Db, V> StoreCore<Net, Db, V>
where
	Net: Send + Sync + 'static,
	Db: Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
{
	/// Current source-of-truth row without keeping a subscription.
	pub async fn current_row(&self, key: &StoreKey) -> Option<Db> {
		let mut rows = self.sot.reader(key);

		rows.next().await.flatten()
	}

	/// Run the fetch for `key` under single-flight and the per-key lock.
	///
	/// Single-flight wraps the locked section so simultaneous subscribers share one
	/// fetch while the write-back stays serialized against mutations on the same key.
	pub async fn run_fetch(&self, key: &StoreKey, plan: FetchPlan) -> FlightOutcome<FetchValue<V>> {
		self.flights.launch(key, self.fetch_under_lock(key, plan)).await
	}

	async fn fetch_under_lock(&self, key: &StoreKey, plan: FetchPlan) -> Result<FetchValue<V>> {
		let lock = self.locks.for_key(key).await;
		let _guard = lock.lock().await;
		let conditional = match plan {
			FetchPlan::Conditional { etag, last_modified } =>
				Some(Conditional { etag, last_modified }),
			_ => None,
		};

		tracing::debug!(key = %key, conditional = conditional.is_some(), "dispatching fetch");

		let outcome = self.fetcher.fetch(key, conditional.as_ref()).await;
		let now = self.clock.now();

		match outcome {
			FetcherResult::Success { body, etag, .. } => {
				match self.persist_success(key, body, etag, now).await {
					Ok(value) => {
						self.stats.record_fetch_success();

						Ok(value)
					},
					Err(error) => {
						self.bookkeeper.record_failure(key, &error, now);
						self.stats.record_fetch_failure();

						Err(error)
					},
				}
			},
			FetcherResult::NotModified { etag } => {
				self.bookkeeper.record_success(key, etag, now);
				self.stats.record_fetch_not_modified();

				tracing::debug!(key = %key, "revalidated; local row is current");

				Ok(FetchValue::NotModified)
			},
			FetcherResult::Error(error) => {
				self.bookkeeper.record_failure(key, &error, now);
				self.stats.record_fetch_failure();

				Err(error)
			},
		}
	}

	async fn persist_success(
		&self,
		key: &StoreKey,
		body: Net,
		etag: Option<String>,
		now: DateTime<Utc>,
	) -> Result<FetchValue<V>> {
		let db = self.converter.net_to_db_write(key, body)?;
		let domain = self.converter.db_read_to_domain(key, &db)?;

		self.sot.write(key, db).await?;
		self.memory.put(key.clone(), domain.clone()).await;
		self.bookkeeper.record_success(key, etag, now);

		Ok(FetchValue::Fresh(domain))
	}
}
