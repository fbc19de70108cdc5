//! Single-flight registry collapsing concurrent work on the same key.

// std
use std::{
	collections::HashMap,
	future::Future,
	sync::{
		Mutex,
		atomic::{AtomicU64, Ordering},
	},
};
// crates.io
use tokio::sync::watch;
// self
use crate::_prelude::*;

/// Terminal outcome of a flight, observed identically by the leader and every waiter.
#[derive(Clone, Debug)]
pub enum FlightOutcome<T> {
	/// The work completed and produced a value.
	Success(T),
	/// The work completed with a failure.
	Failure(StoreError),
	/// The leading caller went away before the work completed; waiters are cancelled
	/// with it.
	Cancelled,
}
impl<T> FlightOutcome<T> {
	/// Convert into a `Result`, mapping [`FlightOutcome::Cancelled`] to `None`.
	pub fn into_result(self) -> Option<Result<T>> {
		match self {
			Self::Success(value) => Some(Ok(value)),
			Self::Failure(error) => Some(Err(error)),
			Self::Cancelled => None,
		}
	}
}

/// Mapping from key to a shared completion handle for in-progress work.
///
/// The first caller for a key becomes the leader and runs the work inside its own task;
/// callers arriving while the flight is open await the shared handle. Cleanup removes
/// the table entry only when it is identity-equal to the completed flight, so a delayed
/// cleanup can never evict a newer in-flight entry. Calls arriving after completion
/// start a fresh flight.
#[derive(Debug)]
pub struct SingleFlight<T> {
	inner: Mutex<HashMap<StoreKey, Flight<T>>>,
	next_id: AtomicU64,
	joins: AtomicU64,
}
impl<T> SingleFlight<T>
where
	T: Clone + Send + Sync + 'static,
{
	/// Create an empty registry.
	pub fn new() -> Self {
		Self { inner: Mutex::new(HashMap::new()), next_id: AtomicU64::new(0), joins: AtomicU64::new(0) }
	}

	/// Run `work` for `key`, or join the flight already running for it.
	///
	/// The work executes in the calling task. Dropping the leading call mid-work
	/// broadcasts [`FlightOutcome::Cancelled`] to every waiter.
	pub async fn launch<F>(&self, key: &StoreKey, work: F) -> FlightOutcome<T>
	where
		F: Future<Output = Result<T>>,
	{
		let role = {
			let mut table = self.inner.lock().expect("single-flight table poisoned");

			if let Some(flight) = table.get(key) {
				Role::Waiter(flight.rx.clone())
			} else {
				let (tx, rx) = watch::channel(FlightState::Pending);
				let id = self.next_id.fetch_add(1, Ordering::Relaxed);

				table.insert(key.clone(), Flight { id, rx });

				Role::Leader { id, tx }
			}
		};

		match role {
			Role::Waiter(mut rx) => {
				self.joins.fetch_add(1, Ordering::Relaxed);

				tracing::trace!(key = %key, "joined in-flight work");

				loop {
					if let FlightState::Done(outcome) = &*rx.borrow_and_update() {
						return outcome.clone();
					}
					if rx.changed().await.is_err() {
						return FlightOutcome::Cancelled;
					}
				}
			},
			Role::Leader { id, tx } => {
				let guard = CompletionGuard { registry: self, key: key.clone(), id, tx: Some(tx) };
				let outcome = match work.await {
					Ok(value) => FlightOutcome::Success(value),
					Err(error) => FlightOutcome::Failure(error),
				};

				guard.finish(outcome)
			},
		}
	}

	/// Whether a flight is currently open for `key`.
	pub fn in_flight(&self, key: &StoreKey) -> bool {
		self.inner.lock().expect("single-flight table poisoned").contains_key(key)
	}

	/// Number of calls that joined an existing flight instead of leading one.
	pub fn join_count(&self) -> u64 {
		self.joins.load(Ordering::Relaxed)
	}

	fn remove_if_current(&self, key: &StoreKey, id: u64) {
		let mut table = self.inner.lock().expect("single-flight table poisoned");

		if let Some(flight) = table.get(key)
			&& flight.id == id
		{
			table.remove(key);
		}
	}
}
impl<T> Default for SingleFlight<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn default() -> Self {
		Self::new()
	}
}

#[derive(Debug)]
struct Flight<T> {
	id: u64,
	rx: watch::Receiver<FlightState<T>>,
}

#[derive(Debug)]
enum FlightState<T> {
	Pending,
	Done(FlightOutcome<T>),
}

enum Role<T> {
	Waiter(watch::Receiver<FlightState<T>>),
	Leader { id: u64, tx: watch::Sender<FlightState<T>> },
}

struct CompletionGuard<'a, T> {
	registry: &'a SingleFlight<T>,
	key: StoreKey,
	id: u64,
	tx: Option<watch::Sender<FlightState<T>>>,
}
impl<T> CompletionGuard<'_, T>
where
	T: Clone,
{
	fn finish(mut self, outcome: FlightOutcome<T>) -> FlightOutcome<T> {
		if let Some(tx) = self.tx.take() {
			let _ = tx.send(FlightState::Done(outcome.clone()));
		}

		self.remove();

		outcome
	}
}
impl<T> CompletionGuard<'_, T> {
	fn remove(&self) {
		let mut table = self.registry.inner.lock().expect("single-flight table poisoned");

		if let Some(flight) = table.get(&self.key)
			&& flight.id == self.id
		{
			table.remove(&self.key);
		}
	}
}
impl<T> Drop for CompletionGuard<'_, T> {
	fn drop(&mut self) {
		if let Some(tx) = self.tx.take() {
			let _ = tx.send(FlightState::Done(FlightOutcome::Cancelled));

			self.remove();
		}
	}
}
