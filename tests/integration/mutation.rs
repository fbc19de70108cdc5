//! End-to-end coverage for the mutation pipeline.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use tokio::time;
// self
use crate::support::{Fixture, Row, ScriptedFetcher, ScriptedUpdater, fixture, init_tracing, key};
use reactive_store::{
	Clock, Freshness, MutationOutcome, MutationPolicy, NetworkError, StoreConfig, StoreError,
	adapter::sot::SourceOfTruth,
	adapter::updater::MutationOp,
};

const OPTIMISTIC: MutationPolicy = MutationPolicy { optimistic: true, enqueue_offline: false };

#[tokio::test]
async fn committed_mutations_echo_the_server_state_into_the_store() {
	init_tracing();

	let Fixture { sot, store, .. } = fixture(ScriptedFetcher::new(), StoreConfig::default());
	let updater = Arc::new(ScriptedUpdater::new().then_echo("alice-server"));
	let mutations = store.mutations(updater.clone());
	let outcome =
		mutations.create(key("1"), "alice-local".into(), OPTIMISTIC).await.expect("commit");

	assert_eq!(outcome, MutationOutcome::Committed(Some("alice-server".into())));
	assert_eq!(updater.last_op(), Some(MutationOp::Create("alice-local".into())));
	// The server echo wins over the optimistic guess.
	assert_eq!(sot.peek(&key("1")).map(|row| row.value), Some("alice-server".into()));
	assert_eq!(
		store.get(&key("1"), Freshness::CachedOrFetch).await.expect("read"),
		"alice-server"
	);
}

#[tokio::test]
async fn failed_mutations_roll_back_to_the_captured_pre_state() {
	init_tracing();

	let Fixture { clock, sot, store, .. } =
		fixture(ScriptedFetcher::new(), StoreConfig::default());

	sot.write(&key("1"), Row::new("alice", clock.now(), None)).await.expect("seed");

	let updater = Arc::new(
		ScriptedUpdater::new()
			.then_error(NetworkError::Http { status: 500, body: None }.into()),
	);
	let mutations = store.mutations(updater);
	let result = mutations.update(key("1"), "bob".into(), OPTIMISTIC).await;

	assert!(matches!(
		result,
		Err(StoreError::Network(NetworkError::Http { status: 500, .. }))
	));
	assert_eq!(sot.peek(&key("1")).map(|row| row.value), Some("alice".into()));
}

#[tokio::test]
async fn failed_creates_roll_back_to_absence() {
	init_tracing();

	let Fixture { sot, store, .. } = fixture(ScriptedFetcher::new(), StoreConfig::default());
	let updater = Arc::new(
		ScriptedUpdater::new().then_error(StoreError::Validation {
			field: "body",
			reason: "rejected".into(),
		}),
	);
	let mutations = store.mutations(updater);

	assert!(mutations.create(key("1"), "alice".into(), OPTIMISTIC).await.is_err());
	assert_eq!(sot.peek(&key("1")), None);
}

#[tokio::test]
async fn optimistic_deletes_commit_on_a_bodyless_ack() {
	init_tracing();

	let Fixture { clock, sot, store, .. } =
		fixture(ScriptedFetcher::new(), StoreConfig::default());

	sot.write(&key("1"), Row::new("alice", clock.now(), None)).await.expect("seed");

	let updater = Arc::new(ScriptedUpdater::new().then_ack());
	let mutations = store.mutations(updater);
	let outcome = mutations.delete(key("1"), OPTIMISTIC).await.expect("commit");

	assert_eq!(outcome, MutationOutcome::Committed(None));
	assert_eq!(sot.peek(&key("1")), None);
}

#[tokio::test]
async fn offline_mutations_enqueue_and_drain_once_the_network_returns() {
	init_tracing();

	let Fixture { sot, store, .. } = fixture(ScriptedFetcher::new(), StoreConfig::default());
	let updater = Arc::new(
		ScriptedUpdater::new()
			.then_error(NetworkError::NoConnection.into())
			.then_echo("alice-server"),
	);
	let mutations = store.mutations(updater.clone());
	let policy = MutationPolicy { optimistic: true, enqueue_offline: true };
	let outcome = mutations.upsert(key("1"), "alice".into(), policy).await.expect("enqueue");

	assert_eq!(outcome, MutationOutcome::Enqueued);
	assert_eq!(mutations.pending_len(), 1);
	// The optimistic write stays visible while the mutation waits.
	assert_eq!(sot.peek(&key("1")).map(|row| row.value), Some("alice".into()));

	let committed = mutations.drain_pending().await.expect("drain");

	assert_eq!(committed, 1);
	assert_eq!(mutations.pending_len(), 0);
	assert_eq!(sot.peek(&key("1")).map(|row| row.value), Some("alice-server".into()));
	assert_eq!(updater.calls(), 2);
}

#[tokio::test]
async fn drain_pauses_while_the_network_is_still_unreachable() {
	init_tracing();

	let Fixture { store, .. } = fixture(ScriptedFetcher::new(), StoreConfig::default());
	let updater = Arc::new(
		ScriptedUpdater::new()
			.then_error(NetworkError::NoConnection.into())
			.then_error(NetworkError::NoConnection.into()),
	);
	let mutations = store.mutations(updater);
	let policy = MutationPolicy { optimistic: false, enqueue_offline: true };

	assert_eq!(
		mutations.update(key("1"), "alice".into(), policy).await.expect("enqueue"),
		MutationOutcome::Enqueued
	);
	assert_eq!(mutations.drain_pending().await.expect("drain"), 0);
	assert_eq!(mutations.pending_len(), 1);
}

#[tokio::test]
async fn caller_cancellation_does_not_abort_a_started_commit() {
	init_tracing();

	let Fixture { sot, store, .. } = fixture(ScriptedFetcher::new(), StoreConfig::default());
	let updater = Arc::new(
		ScriptedUpdater::new().with_delay(Duration::from_millis(100)).then_echo("alice-server"),
	);
	let mutations = store.mutations(updater);
	let caller = {
		let mutations = mutations.clone();

		tokio::spawn(async move {
			mutations.create(key("1"), "alice-local".into(), OPTIMISTIC).await
		})
	};

	time::sleep(Duration::from_millis(30)).await;
	caller.abort();
	time::sleep(Duration::from_millis(200)).await;

	// The commit ran to completion in the background.
	assert_eq!(sot.peek(&key("1")).map(|row| row.value), Some("alice-server".into()));
}

#[tokio::test]
async fn mutations_on_the_same_key_are_strictly_serialized() {
	init_tracing();

	let Fixture { sot, store, .. } = fixture(ScriptedFetcher::new(), StoreConfig::default());
	let updater = Arc::new(
		ScriptedUpdater::new()
			.with_delay(Duration::from_millis(50))
			.then_echo("first")
			.then_echo("second"),
	);
	let mutations = store.mutations(updater);
	let racer = {
		let mutations = mutations.clone();

		tokio::spawn(async move { mutations.replace(key("1"), "a".into(), OPTIMISTIC).await })
	};

	// The second mutation queues on the key lock and lands last.
	time::sleep(Duration::from_millis(10)).await;

	let outcome = mutations.replace(key("1"), "b".into(), OPTIMISTIC).await.expect("second");

	assert_eq!(outcome, MutationOutcome::Committed(Some("second".into())));
	assert!(racer.await.expect("join").is_ok());
	assert_eq!(sot.peek(&key("1")).map(|row| row.value), Some("second".into()));
}
