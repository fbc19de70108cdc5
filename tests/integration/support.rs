//! Shared fixtures: scripted collaborators over a string-shaped domain.

// std
use std::{
	collections::VecDeque,
	sync::{
		Arc, Mutex,
		atomic::{AtomicU64, Ordering},
	},
	time::Duration,
};
// crates.io
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time;
// self
use reactive_store::{
	Clock, DbMeta, LoadDirection, ManualClock, Page, PageFetcher, PageToken, ReadStore,
	Result, StoreBuilder, StoreConfig, StoreError, StoreKey,
	adapter::{
		converter::Converter,
		fetcher::{Conditional, Fetcher, FetcherResult},
		sot::InMemorySot,
		updater::{MutationOp, Updater},
	},
};

/// Row shape persisted by the fixture source of truth.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
	pub value: String,
	pub updated_at: DateTime<Utc>,
	pub etag: Option<String>,
}
impl Row {
	pub fn new(value: impl Into<String>, updated_at: DateTime<Utc>, etag: Option<&str>) -> Self {
		Self { value: value.into(), updated_at, etag: etag.map(str::to_string) }
	}
}

/// Converter stamping write-backs with the injected clock.
pub struct RowConverter {
	clock: Arc<ManualClock>,
}
impl Converter<String, Row, String> for RowConverter {
	fn net_to_db_write(&self, _: &StoreKey, net: String) -> Result<Row> {
		Ok(Row { value: net, updated_at: self.clock.now(), etag: None })
	}

	fn domain_to_db_write(&self, _: &StoreKey, value: &String) -> Result<Row> {
		Ok(Row { value: value.clone(), updated_at: self.clock.now(), etag: None })
	}

	fn db_read_to_domain(&self, _: &StoreKey, db: &Row) -> Result<String> {
		Ok(db.value.clone())
	}

	fn db_meta_from_projection(&self, db: &Row) -> Option<DbMeta> {
		Some(DbMeta::new(db.updated_at, db.etag.clone()))
	}
}

/// Fetcher replaying a scripted outcome per call.
pub struct ScriptedFetcher {
	outcomes: Mutex<VecDeque<FetcherResult<String>>>,
	calls: AtomicU64,
	delay: Duration,
	last_conditional: Mutex<Option<Conditional>>,
}
impl ScriptedFetcher {
	pub fn new() -> Self {
		Self {
			outcomes: Mutex::new(VecDeque::new()),
			calls: AtomicU64::new(0),
			delay: Duration::from_millis(20),
			last_conditional: Mutex::new(None),
		}
	}

	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.delay = delay;

		self
	}

	pub fn then_success(self, body: &str, etag: Option<&str>) -> Self {
		self.push(FetcherResult::Success {
			body: body.to_string(),
			etag: etag.map(str::to_string),
			last_modified: None,
		});

		self
	}

	pub fn then_not_modified(self, etag: Option<&str>) -> Self {
		self.push(FetcherResult::NotModified { etag: etag.map(str::to_string) });

		self
	}

	pub fn then_error(self, error: StoreError) -> Self {
		self.push(FetcherResult::Error(error));

		self
	}

	pub fn calls(&self) -> u64 {
		self.calls.load(Ordering::SeqCst)
	}

	pub fn last_conditional(&self) -> Option<Conditional> {
		self.last_conditional.lock().expect("conditional").clone()
	}

	fn push(&self, outcome: FetcherResult<String>) {
		self.outcomes.lock().expect("script").push_back(outcome);
	}
}
#[async_trait]
impl Fetcher<String> for ScriptedFetcher {
	async fn fetch(&self, _: &StoreKey, conditional: Option<&Conditional>) -> FetcherResult<String> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		*self.last_conditional.lock().expect("conditional") = conditional.cloned();

		time::sleep(self.delay).await;

		self.outcomes
			.lock()
			.expect("script")
			.pop_front()
			.unwrap_or_else(|| FetcherResult::Error(StoreError::Unknown("script exhausted".into())))
	}
}

/// Updater replaying a scripted result per dispatched mutation.
pub struct ScriptedUpdater {
	outcomes: Mutex<VecDeque<Result<Option<String>>>>,
	calls: AtomicU64,
	delay: Duration,
	last_op: Mutex<Option<MutationOp<String>>>,
}
impl ScriptedUpdater {
	pub fn new() -> Self {
		Self {
			outcomes: Mutex::new(VecDeque::new()),
			calls: AtomicU64::new(0),
			delay: Duration::ZERO,
			last_op: Mutex::new(None),
		}
	}

	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.delay = delay;

		self
	}

	pub fn then_echo(self, body: &str) -> Self {
		self.outcomes.lock().expect("script").push_back(Ok(Some(body.to_string())));

		self
	}

	pub fn then_ack(self) -> Self {
		self.outcomes.lock().expect("script").push_back(Ok(None));

		self
	}

	pub fn then_error(self, error: StoreError) -> Self {
		self.outcomes.lock().expect("script").push_back(Err(error));

		self
	}

	pub fn calls(&self) -> u64 {
		self.calls.load(Ordering::SeqCst)
	}

	pub fn last_op(&self) -> Option<MutationOp<String>> {
		self.last_op.lock().expect("op").clone()
	}
}
#[async_trait]
impl Updater<String, String> for ScriptedUpdater {
	async fn send(&self, _: &StoreKey, op: &MutationOp<String>) -> Result<Option<String>> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		*self.last_op.lock().expect("op") = Some(op.clone());

		if !self.delay.is_zero() {
			time::sleep(self.delay).await;
		}

		self.outcomes
			.lock()
			.expect("script")
			.pop_front()
			.unwrap_or_else(|| Err(StoreError::Unknown("script exhausted".into())))
	}
}

/// Page fetcher generating windows of `item-N` strings from numeric cursors.
pub struct WindowPageFetcher {
	total: usize,
	calls: AtomicU64,
	delay: Duration,
	fail_next: Mutex<Option<StoreError>>,
	last_page_size: AtomicU64,
}
impl WindowPageFetcher {
	pub fn new(total: usize) -> Self {
		Self {
			total,
			calls: AtomicU64::new(0),
			delay: Duration::ZERO,
			fail_next: Mutex::new(None),
			last_page_size: AtomicU64::new(0),
		}
	}

	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.delay = delay;

		self
	}

	pub fn fail_next(&self, error: StoreError) {
		*self.fail_next.lock().expect("failure slot") = Some(error);
	}

	pub fn calls(&self) -> u64 {
		self.calls.load(Ordering::SeqCst)
	}

	pub fn last_page_size(&self) -> usize {
		self.last_page_size.load(Ordering::SeqCst) as usize
	}
}
#[async_trait]
impl PageFetcher<String> for WindowPageFetcher {
	async fn fetch_page(
		&self,
		_: &StoreKey,
		direction: LoadDirection,
		token: Option<&PageToken>,
		page_size: usize,
	) -> Result<Page<String>> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		self.last_page_size.store(page_size as u64, Ordering::SeqCst);

		if !self.delay.is_zero() {
			time::sleep(self.delay).await;
		}
		if let Some(error) = self.fail_next.lock().expect("failure slot").take() {
			return Err(error);
		}

		let start = match (direction, token) {
			(LoadDirection::Prepend, Some(token)) => token
				.before
				.as_deref()
				.and_then(|cursor| cursor.parse::<usize>().ok())
				.map(|end| end.saturating_sub(page_size))
				.unwrap_or(0),
			(_, Some(token)) =>
				token.after.as_deref().and_then(|cursor| cursor.parse().ok()).unwrap_or(0),
			(_, None) => 0,
		};
		let end = (start + page_size).min(self.total);
		let items = (start..end).map(|i| format!("item-{i}")).collect();
		let next = (end < self.total).then(|| PageToken::after(end.to_string()));
		let prev = (start > 0).then(|| PageToken::before(start.to_string()));

		Ok(Page::new(items, next, prev))
	}
}

/// Assembled fixture around one read store.
pub struct Fixture {
	pub clock: Arc<ManualClock>,
	pub sot: Arc<InMemorySot<Row>>,
	pub fetcher: Arc<ScriptedFetcher>,
	pub store: ReadStore<String, Row, String>,
}

pub fn fixture(fetcher: ScriptedFetcher, config: StoreConfig) -> Fixture {
	let clock = Arc::new(ManualClock::from_system());
	let sot = Arc::new(InMemorySot::new());
	let fetcher = Arc::new(fetcher);
	let store = StoreBuilder::new()
		.clock(clock.clone())
		.config(config)
		.source_of_truth(sot.clone())
		.fetcher(fetcher.clone())
		.converter(Arc::new(RowConverter { clock: clock.clone() }))
		.build()
		.expect("store");

	Fixture { clock, sot, fetcher, store }
}

pub fn key(id: &str) -> StoreKey {
	StoreKey::by_id("users", "user", id)
}

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt::try_init();
}
