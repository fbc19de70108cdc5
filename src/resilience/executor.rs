//! Operation executor composing breaker, timeout, and retry around one call.

// std
use std::{future::Future, pin::Pin};
// crates.io
use tokio::{sync::mpsc, time};
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	error::NetworkError,
	resilience::{breaker::CircuitBreaker, retry::RetryPolicy},
};

type Call<T> = Box<dyn Fn() -> Pin<Box<dyn Future<Output = Result<T>> + Send>> + Send + Sync>;
type RetryOn = Box<dyn Fn(&StoreError) -> bool + Send + Sync>;

/// Terminal outcome of an executed operation.
#[derive(Debug)]
pub enum OperationResult<T> {
	/// The call succeeded.
	Success(T),
	/// The call gave up.
	Failure(OperationFailure),
}
impl<T> OperationResult<T> {
	/// The carried value, when the operation succeeded.
	pub fn success(self) -> Option<T> {
		match self {
			Self::Success(value) => Some(value),
			Self::Failure(_) => None,
		}
	}
}

/// Why an operation gave up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationFailure {
	/// The circuit breaker rejected the call outright.
	CircuitOpen,
	/// Every attempt ran past the configured timeout.
	TimedOut {
		/// Number of attempts made, including the first.
		attempts: u32,
		/// Classified cause recorded for the taxonomy.
		cause: StoreError,
	},
	/// The caller's cancellation token fired; nothing was recorded on the breaker.
	Cancelled,
	/// The call failed and the retry budget or predicate said stop.
	Error(StoreError),
}

/// Event projection of an operation's lifecycle.
#[derive(Clone, Debug)]
pub enum OperationEvent<T> {
	/// The operation started.
	Loading,
	/// The operation succeeded.
	Success(T),
	/// The operation gave up.
	Error(OperationFailure),
}

/// One configured call through the resilience pipeline.
///
/// The pipeline acquires the breaker once, then loops attempts: apply the timeout,
/// classify the outcome, consult the retry predicate and policy, and sleep the
/// computed backoff. `RateLimited.retry_after` overrides the policy delay when the
/// server suggests one. Cancellation propagates immediately and is never recorded as
/// a breaker failure.
pub struct Operation<T> {
	call: Call<T>,
	breaker: Option<Arc<CircuitBreaker>>,
	timeout: Option<Duration>,
	retry_policy: RetryPolicy,
	retry_on: RetryOn,
	cancellation: Option<CancellationToken>,
}
impl<T> Operation<T>
where
	T: Send + 'static,
{
	/// Configure an operation around `call`; the closure is re-invoked per attempt.
	pub fn new<F, Fut>(call: F) -> Self
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<T>> + Send + 'static,
	{
		Self {
			call: Box::new(move || Box::pin(call())),
			breaker: None,
			timeout: None,
			retry_policy: RetryPolicy::none(),
			retry_on: Box::new(StoreError::is_retryable),
			cancellation: None,
		}
	}

	/// Guard the call with a circuit breaker.
	pub fn breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
		self.breaker = Some(breaker);

		self
	}

	/// Bound each attempt to `timeout`.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);

		self
	}

	/// Retry failed attempts on this schedule.
	pub fn retry(mut self, policy: RetryPolicy) -> Self {
		self.retry_policy = policy;

		self
	}

	/// Replace the retry predicate; the default retries whatever the taxonomy marks
	/// retryable.
	pub fn retry_on<P>(mut self, predicate: P) -> Self
	where
		P: Fn(&StoreError) -> bool + Send + Sync + 'static,
	{
		self.retry_on = Box::new(predicate);

		self
	}

	/// Abort the pipeline when `token` fires.
	pub fn cancellation(mut self, token: CancellationToken) -> Self {
		self.cancellation = Some(token);

		self
	}

	/// Run the pipeline to its terminal outcome.
	pub async fn execute(self) -> OperationResult<T> {
		if let Some(breaker) = &self.breaker
			&& !breaker.try_acquire()
		{
			tracing::debug!("circuit open; rejecting call");

			return OperationResult::Failure(OperationFailure::CircuitOpen);
		}

		let mut attempts: u32 = 0;

		loop {
			attempts += 1;

			match self.attempt().await {
				Attempt::Finished(Ok(value)) => {
					if let Some(breaker) = &self.breaker {
						breaker.on_success();
					}

					return OperationResult::Success(value);
				},
				Attempt::Finished(Err(error)) => {
					if let Some(breaker) = &self.breaker {
						breaker.on_failure();
					}
					if (self.retry_on)(&error)
						&& let Some(delay) = self.retry_policy.delay_for(attempts - 1)
					{
						let delay = error.retry_after().unwrap_or(delay);

						tracing::debug!(attempts, ?delay, error = %error, "retrying after failure");

						if self.sleep_cancellable(delay).await.is_err() {
							return OperationResult::Failure(OperationFailure::Cancelled);
						}

						continue;
					}

					return OperationResult::Failure(OperationFailure::Error(error));
				},
				Attempt::TimedOut => {
					if let Some(breaker) = &self.breaker {
						breaker.on_failure();
					}
					if let Some(delay) = self.retry_policy.delay_for(attempts - 1) {
						tracing::debug!(attempts, ?delay, "retrying after timeout");

						if self.sleep_cancellable(delay).await.is_err() {
							return OperationResult::Failure(OperationFailure::Cancelled);
						}

						continue;
					}

					return OperationResult::Failure(OperationFailure::TimedOut {
						attempts,
						cause: NetworkError::Timeout.into(),
					});
				},
				Attempt::Cancelled =>
					return OperationResult::Failure(OperationFailure::Cancelled),
			}
		}
	}

	/// Run the pipeline, projected to loading/success/error events.
	pub fn into_event_stream(self) -> impl Stream<Item = OperationEvent<T>> {
		let (tx, rx) = mpsc::channel(8);

		tokio::spawn(async move {
			if tx.send(OperationEvent::Loading).await.is_err() {
				return;
			}

			let event = match self.execute().await {
				OperationResult::Success(value) => OperationEvent::Success(value),
				OperationResult::Failure(failure) => OperationEvent::Error(failure),
			};
			let _ = tx.send(event).await;
		});

		ReceiverStream::new(rx)
	}

	async fn attempt(&self) -> Attempt<T> {
		let call = (self.call)();
		let bounded = async {
			match self.timeout {
				Some(limit) => match time::timeout(limit, call).await {
					Ok(result) => Attempt::Finished(result),
					Err(_) => Attempt::TimedOut,
				},
				None => Attempt::Finished(call.await),
			}
		};

		match &self.cancellation {
			Some(token) => {
				tokio::select! {
					() = token.cancelled() => Attempt::Cancelled,
					outcome = bounded => outcome,
				}
			},
			None => bounded.await,
		}
	}

	async fn sleep_cancellable(&self, delay: Duration) -> std::result::Result<(), ()> {
		match &self.cancellation {
			Some(token) => {
				tokio::select! {
					() = token.cancelled() => Err(()),
					() = time::sleep(delay) => Ok(()),
				}
			},
			None => {
				time::sleep(delay).await;

				Ok(())
			},
		}
	}
}

enum Attempt<T> {
	Finished(Result<T>),
	TimedOut,
	Cancelled,
}
