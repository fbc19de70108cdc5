//! Builder wiring collaborators into a store.

// crates.io
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	adapter::{converter::Converter, fetcher::Fetcher, sot::SourceOfTruth},
	cache::{bookkeeper::Bookkeeper, flight::SingleFlight, lock::KeyedLockTable, memory::MemoryCache},
	clock::SystemClock,
	config::StoreConfig,
	stats::StoreStats,
	store::{core::StoreCore, read::ReadStore},
};

/// Builder for [`ReadStore`] wiring the fetcher, source of truth, and converter.
///
/// Configuration is validated at [`StoreBuilder::build`]; missing collaborators are
/// configuration errors rather than panics.
pub struct StoreBuilder<Net, Db, V> {
	config: StoreConfig,
	clock: Arc<dyn Clock>,
	sot: Option<Arc<dyn SourceOfTruth<Db>>>,
	fetcher: Option<Arc<dyn Fetcher<Net>>>,
	converter: Option<Arc<dyn Converter<Net, Db, V>>>,
}
impl<Net, Db, V> StoreBuilder<Net, Db, V>
where
	Net: Send + Sync + 'static,
	Db: Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
{
	/// Create a builder with default configuration and the system clock.
	pub fn new() -> Self {
		Self {
			config: StoreConfig::default(),
			clock: Arc::new(SystemClock),
			sot: None,
			fetcher: None,
			converter: None,
		}
	}

	/// Replace the configuration.
	pub fn config(mut self, config: StoreConfig) -> Self {
		self.config = config;

		self
	}

	/// Replace the time source; tests inject a manually-advanced clock here.
	pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}

	/// Set the source-of-truth adapter.
	pub fn source_of_truth(mut self, sot: Arc<dyn SourceOfTruth<Db>>) -> Self {
		self.sot = Some(sot);

		self
	}

	/// Set the network fetcher.
	pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher<Net>>) -> Self {
		self.fetcher = Some(fetcher);

		self
	}

	/// Set the converter triplet.
	pub fn converter(mut self, converter: Arc<dyn Converter<Net, Db, V>>) -> Self {
		self.converter = Some(converter);

		self
	}

	/// Validate the configuration and assemble the store.
	pub fn build(self) -> Result<ReadStore<Net, Db, V>> {
		self.config.validate()?;

		let sot = self
			.sot
			.ok_or_else(|| StoreError::Configuration("A source of truth is required.".into()))?;
		let fetcher =
			self.fetcher.ok_or_else(|| StoreError::Configuration("A fetcher is required.".into()))?;
		let converter = self
			.converter
			.ok_or_else(|| StoreError::Configuration("A converter is required.".into()))?;
		let core = StoreCore {
			memory: MemoryCache::new(
				self.clock.clone(),
				self.config.memory_ttl,
				self.config.memory_max_entries,
			),
			locks: KeyedLockTable::new(self.config.lock_table_max_entries),
			flights: SingleFlight::new(),
			bookkeeper: Bookkeeper::new(self.config.failure_backoff),
			stats: StoreStats::new(),
			clock: self.clock,
			config: self.config,
			sot,
			fetcher,
			converter,
			shutdown: CancellationToken::new(),
		};

		Ok(ReadStore { core: Arc::new(core) })
	}
}
impl<Net, Db, V> Default for StoreBuilder<Net, Db, V>
where
	Net: Send + Sync + 'static,
	Db: Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
{
	fn default() -> Self {
		Self::new()
	}
}
