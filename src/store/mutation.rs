//! Mutation store: CRUD with optimistic apply and rollback.

// std
use std::{collections::VecDeque, sync::Mutex};
// self
use crate::{
	_prelude::*,
	adapter::{
		sot::SotWrite,
		updater::{MutationOp, Updater},
	},
	store::core::StoreCore,
};

/// Per-call mutation behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MutationPolicy {
	/// Apply the change locally before the server confirms it.
	pub optimistic: bool,
	/// When the network is unreachable, enqueue for later replay instead of failing.
	pub enqueue_offline: bool,
}
impl Default for MutationPolicy {
	fn default() -> Self {
		Self { optimistic: true, enqueue_offline: false }
	}
}

/// Terminal outcome of a mutation call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationOutcome<V> {
	/// The server committed the change; deletes commit without a value.
	Committed(Option<V>),
	/// The network was unreachable; the mutation waits in the offline queue.
	Enqueued,
}

/// Write-side API sharing the read store's tables and key locks.
///
/// Mutations to distinct keys proceed in parallel; mutations to the same key are
/// strictly serialized, and serialized against read-side write-backs, by the shared
/// key-mutex table. A caller that goes away mid-call does not abort the commit: the
/// commit runs on its own task and optimistic state is reconciled to completion.
pub struct MutationStore<Net, Db, V> {
	core: Arc<StoreCore<Net, Db, V>>,
	updater: Arc<dyn Updater<Net, V>>,
	pending: Arc<Mutex<VecDeque<PendingMutation<V, Db>>>>,
}
impl<Net, Db, V> Clone for MutationStore<Net, Db, V> {
	fn clone(&self) -> Self {
		Self { core: self.core.clone(), updater: self.updater.clone(), pending: self.pending.clone() }
	}
}
impl<Net, Db, V> MutationStore<Net, Db, V>
where
	Net: Send + Sync + 'static,
	Db: Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
{
	pub(crate) fn new(core: Arc<StoreCore<Net, Db, V>>, updater: Arc<dyn Updater<Net, V>>) -> Self {
		Self { core, updater, pending: Arc::new(Mutex::new(VecDeque::new())) }
	}

	/// Create a value that must not exist yet.
	pub async fn create(
		&self,
		key: StoreKey,
		value: V,
		policy: MutationPolicy,
	) -> Result<MutationOutcome<V>> {
		self.mutate(key, MutationOp::Create(value), policy).await
	}

	/// Patch the existing value.
	pub async fn update(
		&self,
		key: StoreKey,
		value: V,
		policy: MutationPolicy,
	) -> Result<MutationOutcome<V>> {
		self.mutate(key, MutationOp::Update(value), policy).await
	}

	/// Remove the value.
	pub async fn delete(&self, key: StoreKey, policy: MutationPolicy) -> Result<MutationOutcome<V>> {
		self.mutate(key, MutationOp::Delete, policy).await
	}

	/// Create or overwrite, whichever applies.
	pub async fn upsert(
		&self,
		key: StoreKey,
		value: V,
		policy: MutationPolicy,
	) -> Result<MutationOutcome<V>> {
		self.mutate(key, MutationOp::Upsert(value), policy).await
	}

	/// Overwrite a value that must already exist.
	pub async fn replace(
		&self,
		key: StoreKey,
		value: V,
		policy: MutationPolicy,
	) -> Result<MutationOutcome<V>> {
		self.mutate(key, MutationOp::Replace(value), policy).await
	}

	/// Replay enqueued mutations in arrival order.
	///
	/// Stops at the first mutation that still finds the network unreachable, leaving it
	/// (and everything behind it) queued. Returns the number of mutations committed.
	pub async fn drain_pending(&self) -> Result<usize> {
		let mut committed = 0;

		loop {
			let Some(mutation) = self.pending.lock().expect("pending queue poisoned").pop_front()
			else {
				break;
			};
			let lock = self.core.locks.for_key(&mutation.key).await;
			let _guard = lock.lock().await;

			match self.updater.send(&mutation.key, &mutation.op).await {
				Ok(echo) => {
					Self::integrate_echo(&self.core, &mutation.key, &mutation.op, echo).await?;

					committed += 1;
				},
				Err(error) if error.is_offline() => {
					self.pending.lock().expect("pending queue poisoned").push_front(mutation);

					tracing::debug!(error = %error, "network still unreachable; replay paused");

					break;
				},
				Err(error) => {
					Self::rollback(&self.core, &mutation.key, mutation.pre).await;

					return Err(error);
				},
			}
		}

		Ok(committed)
	}

	/// Number of mutations waiting for replay.
	pub fn pending_len(&self) -> usize {
		self.pending.lock().expect("pending queue poisoned").len()
	}

	async fn mutate(
		&self,
		key: StoreKey,
		op: MutationOp<V>,
		policy: MutationPolicy,
	) -> Result<MutationOutcome<V>> {
		let core = self.core.clone();
		let updater = self.updater.clone();
		let pending = self.pending.clone();
		// The commit owns its own task: dropping this call abandons the await, not the
		// commit, so optimistic state is always reconciled.
		let handle = tokio::spawn(Self::commit(core, updater, pending, key, op, policy));

		handle.await.map_err(|err| StoreError::Unknown(format!("mutation task failed: {err}")))?
	}

	#[tracing::instrument(skip_all, fields(key = %key))]
	async fn commit(
		core: Arc<StoreCore<Net, Db, V>>,
		updater: Arc<dyn Updater<Net, V>>,
		pending: Arc<Mutex<VecDeque<PendingMutation<V, Db>>>>,
		key: StoreKey,
		op: MutationOp<V>,
		policy: MutationPolicy,
	) -> Result<MutationOutcome<V>> {
		let lock = core.locks.for_key(&key).await;
		let _guard = lock.lock().await;
		// Pre-state is captured under the lock; rollback restores exactly this row.
		let pre = core.current_row(&key).await;

		if policy.optimistic {
			Self::apply_local(&core, &key, &op).await?;
		}

		match updater.send(&key, &op).await {
			Ok(echo) => {
				let value = Self::integrate_echo(&core, &key, &op, echo).await?;

				Ok(MutationOutcome::Committed(value))
			},
			Err(error) if error.is_offline() && policy.enqueue_offline => {
				tracing::warn!(error = %error, "network unreachable; mutation enqueued");
				pending
					.lock()
					.expect("pending queue poisoned")
					.push_back(PendingMutation { key, op, pre });

				Ok(MutationOutcome::Enqueued)
			},
			Err(error) => {
				if policy.optimistic {
					Self::rollback(&core, &key, pre).await;
				}

				Err(error)
			},
		}
	}

	async fn apply_local(core: &StoreCore<Net, Db, V>, key: &StoreKey, op: &MutationOp<V>) -> Result<()> {
		match op.value() {
			Some(value) => {
				let db = core.converter.domain_to_db_write(key, value)?;

				core.sot.write(key, db).await?;
				core.memory.put(key.clone(), value.clone()).await;
			},
			None => {
				core.sot.delete(key).await?;
				core.memory.invalidate(key).await;
			},
		}

		Ok(())
	}

	async fn integrate_echo(
		core: &StoreCore<Net, Db, V>,
		key: &StoreKey,
		op: &MutationOp<V>,
		echo: Option<Net>,
	) -> Result<Option<V>> {
		match echo {
			// The server echoed the committed state; it wins over the optimistic guess.
			Some(net) => {
				let db = core.converter.net_to_db_write(key, net)?;
				let domain = core.converter.db_read_to_domain(key, &db)?;

				core.sot.write(key, db).await?;
				core.memory.put(key.clone(), domain.clone()).await;

				Ok(Some(domain))
			},
			None => match op.value() {
				Some(value) => {
					let db = core.converter.domain_to_db_write(key, value)?;

					core.sot.write(key, db).await?;
					core.memory.put(key.clone(), value.clone()).await;

					Ok(Some(value.clone()))
				},
				None => {
					core.sot.delete(key).await?;
					core.memory.invalidate(key).await;

					Ok(None)
				},
			},
		}
	}

	async fn rollback(core: &StoreCore<Net, Db, V>, key: &StoreKey, pre: Option<Db>) {
		tracing::warn!(key = %key, "mutation failed; restoring pre-state");

		let restored = match pre {
			Some(row) => {
				let domain = core.converter.db_read_to_domain(key, &row).ok();
				let result = core.sot.transaction(vec![SotWrite::Put(key.clone(), row)]).await;

				if result.is_ok() {
					match domain {
						Some(domain) => {
							core.memory.put(key.clone(), domain).await;
						},
						None => core.memory.invalidate(key).await,
					}
				}

				result
			},
			None => {
				core.memory.invalidate(key).await;

				core.sot.delete(key).await
			},
		};

		if let Err(error) = restored {
			tracing::error!(key = %key, error = %error, "rollback write failed");
		}
	}
}

#[derive(Debug)]
struct PendingMutation<V, Db> {
	key: StoreKey,
	op: MutationOp<V>,
	pre: Option<Db>,
}
