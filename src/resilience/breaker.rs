//! Three-state circuit breaker with probe-limited recovery.

// std
use std::sync::Mutex;
// crates.io
use tokio::{sync::broadcast, task::JoinHandle, time};
// self
use crate::_prelude::*;

/// Breaker lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
	/// Calls pass through; failures are counted.
	Closed,
	/// Calls are rejected until the reopen timer fires.
	Open,
	/// A limited number of probe calls test recovery.
	HalfOpen,
}

/// Breaker tuning parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
	/// Consecutive failures in `Closed` that trip the breaker.
	pub failure_threshold: u32,
	/// How long the breaker stays `Open` before probing.
	pub open_ttl: Duration,
	/// Number of probe acquisitions granted in `HalfOpen`.
	pub probe_quota: u32,
}
impl CircuitBreakerConfig {
	/// Validate the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if self.failure_threshold == 0 {
			return Err(StoreError::Validation {
				field: "failure_threshold",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.open_ttl.is_zero() {
			return Err(StoreError::Validation {
				field: "open_ttl",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.probe_quota == 0 {
			return Err(StoreError::Validation {
				field: "probe_quota",
				reason: "Must be greater than zero.".into(),
			});
		}

		Ok(())
	}
}
impl Default for CircuitBreakerConfig {
	fn default() -> Self {
		Self { failure_threshold: 3, open_ttl: Duration::from_secs(30), probe_quota: 1 }
	}
}

/// One published state transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakerTransition {
	/// State before the transition.
	pub from: BreakerState,
	/// State after the transition.
	pub to: BreakerState,
	/// Wall-clock instant of the transition.
	pub at: DateTime<Utc>,
}

/// Circuit breaker guarding one downstream dependency.
///
/// State transitions happen under a single mutex; the reopen timer is cancelled under
/// that same mutex, so a late timer from a previous `Open` episode can never overwrite
/// a newer state. Transitions are published on a drop-oldest broadcast channel with no
/// replay.
#[derive(Debug)]
pub struct CircuitBreaker {
	config: CircuitBreakerConfig,
	clock: Arc<dyn Clock>,
	inner: Arc<Mutex<Inner>>,
	events: broadcast::Sender<BreakerTransition>,
}
impl CircuitBreaker {
	/// Create a breaker with the system clock.
	pub fn new(config: CircuitBreakerConfig) -> Result<Self> {
		Self::with_clock(config, Arc::new(crate::clock::SystemClock))
	}

	/// Create a breaker stamping transitions from the supplied clock.
	pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Result<Self> {
		config.validate()?;

		let (events, _) = broadcast::channel(16);

		Ok(Self {
			config,
			clock,
			inner: Arc::new(Mutex::new(Inner {
				state: BreakerState::Closed,
				failures: 0,
				probes_left: 0,
				episode: 0,
				reopen: None,
			})),
			events,
		})
	}

	/// Whether a call may proceed right now.
	///
	/// `Closed` always grants; `Open` always rejects; `HalfOpen` grants up to the
	/// probe quota, decremented atomically under the state mutex.
	pub fn try_acquire(&self) -> bool {
		let mut inner = self.inner.lock().expect("breaker state poisoned");

		match inner.state {
			BreakerState::Closed => true,
			BreakerState::Open => false,
			BreakerState::HalfOpen =>
				if inner.probes_left > 0 {
					inner.probes_left -= 1;

					true
				} else {
					false
				},
		}
	}

	/// Record a successful call.
	pub fn on_success(&self) {
		let mut inner = self.inner.lock().expect("breaker state poisoned");

		match inner.state {
			BreakerState::Closed => inner.failures = 0,
			BreakerState::HalfOpen => {
				inner.cancel_reopen();
				inner.failures = 0;
				self.transition(&mut inner, BreakerState::Closed);
			},
			BreakerState::Open => {},
		}
	}

	/// Record a failed call.
	pub fn on_failure(&self) {
		let mut inner = self.inner.lock().expect("breaker state poisoned");

		match inner.state {
			BreakerState::Closed => {
				inner.failures += 1;

				if inner.failures >= self.config.failure_threshold {
					self.trip(&mut inner);
				}
			},
			BreakerState::HalfOpen => self.trip(&mut inner),
			BreakerState::Open => {},
		}
	}

	/// Current state.
	pub fn state(&self) -> BreakerState {
		self.inner.lock().expect("breaker state poisoned").state
	}

	/// Subscribe to state transitions; lagging subscribers drop the oldest events.
	pub fn subscribe(&self) -> broadcast::Receiver<BreakerTransition> {
		self.events.subscribe()
	}

	fn trip(&self, inner: &mut Inner) {
		inner.cancel_reopen();
		self.transition(inner, BreakerState::Open);

		inner.episode += 1;

		let episode = inner.episode;
		let shared = self.inner.clone();
		let events = self.events.clone();
		let clock = self.clock.clone();
		let probe_quota = self.config.probe_quota;
		let open_ttl = self.config.open_ttl;

		// One timer per Open episode; the episode stamp keeps a late timer from
		// touching any newer state.
		inner.reopen = Some(tokio::spawn(async move {
			time::sleep(open_ttl).await;

			let mut inner = shared.lock().expect("breaker state poisoned");

			if inner.state == BreakerState::Open && inner.episode == episode {
				inner.probes_left = probe_quota;
				inner.reopen = None;

				let transition = BreakerTransition {
					from: BreakerState::Open,
					to: BreakerState::HalfOpen,
					at: clock.now(),
				};

				inner.state = BreakerState::HalfOpen;

				tracing::info!(?transition, "circuit breaker probing");

				let _ = events.send(transition);
			}
		}));
	}

	fn transition(&self, inner: &mut Inner, to: BreakerState) {
		let transition = BreakerTransition { from: inner.state, to, at: self.clock.now() };

		inner.state = to;

		tracing::info!(?transition, "circuit breaker transition");

		let _ = self.events.send(transition);
	}
}
impl Drop for CircuitBreaker {
	fn drop(&mut self) {
		if let Ok(mut inner) = self.inner.lock() {
			inner.cancel_reopen();
		}
	}
}

#[derive(Debug)]
struct Inner {
	state: BreakerState,
	failures: u32,
	probes_left: u32,
	episode: u64,
	reopen: Option<JoinHandle<()>>,
}
impl Inner {
	fn cancel_reopen(&mut self) {
		if let Some(timer) = self.reopen.take() {
			timer.abort();
		}
	}
}
