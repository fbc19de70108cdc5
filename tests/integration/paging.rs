//! End-to-end coverage for the bidirectional page store.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use tokio::time;
use tokio_stream::StreamExt;
// self
use crate::support::{WindowPageFetcher, init_tracing};
use reactive_store::{
	Freshness, LoadDirection, LoadState, NetworkError, PageStore, PageToken, PagingConfig,
	PagingEvent, StoreKey,
};

fn feed_key() -> StoreKey {
	StoreKey::query("feed", [("sort", "new")])
}

fn config(page_size: usize, max_size: usize) -> PagingConfig {
	PagingConfig { page_size, max_size }
}

async fn first_snapshot<S>(stream: &mut S) -> reactive_store::PagingSnapshot<String>
where
	S: tokio_stream::Stream<Item = PagingEvent<String>> + Unpin,
{
	loop {
		match stream.next().await.expect("stream ended") {
			PagingEvent::Snapshot(snapshot) => return snapshot,
			PagingEvent::Boundary { .. } => continue,
		}
	}
}

#[tokio::test]
async fn appends_trim_the_window_to_its_bound() {
	init_tracing();

	let fetcher = Arc::new(WindowPageFetcher::new(200));
	let store = PageStore::new(fetcher.clone());
	let key = feed_key();
	// The first subscriber establishes the 50-item bound and triggers the initial load.
	let mut stream =
		store.stream(key.clone(), config(20, 50), Freshness::CachedOrFetch).await.expect("stream");

	// Wait for the automatic initial load to land before paging forward.
	loop {
		let snapshot = first_snapshot(&mut stream).await;

		if snapshot.items.len() == 20 && !snapshot.source_states.initial.is_loading() {
			break;
		}
	}

	store.load(&key, LoadDirection::Append, None, Freshness::CachedOrFetch).await.expect("append");
	store.load(&key, LoadDirection::Append, None, Freshness::CachedOrFetch).await.expect("append");

	// Drain to the latest snapshot.
	let mut latest = first_snapshot(&mut stream).await;

	while let Ok(Some(event)) = time::timeout(Duration::from_millis(100), stream.next()).await {
		if let PagingEvent::Snapshot(snapshot) = event {
			latest = snapshot;
		}
	}

	assert_eq!(latest.items.len(), 50);
	assert_eq!(latest.items.last().map(String::as_str), Some("item-59"));
	assert_eq!(latest.items.first().map(String::as_str), Some("item-10"));
	assert!(!latest.fully_loaded);
}

#[tokio::test]
async fn append_without_an_open_boundary_is_a_no_op() {
	init_tracing();

	// A 30-item world: the second page closes the forward boundary.
	let fetcher = Arc::new(WindowPageFetcher::new(30));
	let store = PageStore::new(fetcher.clone());
	let key = feed_key();

	store.load(&key, LoadDirection::Initial, None, Freshness::MustBeFresh).await.expect("initial");
	store.load(&key, LoadDirection::Append, None, Freshness::CachedOrFetch).await.expect("append");

	let calls = fetcher.calls();

	// Both boundaries are closed now; appends without an explicit token do nothing.
	store.load(&key, LoadDirection::Append, None, Freshness::CachedOrFetch).await.expect("no-op");

	assert_eq!(fetcher.calls(), calls);
}

#[tokio::test]
async fn explicit_tokens_override_a_closed_boundary() {
	init_tracing();

	let fetcher = Arc::new(WindowPageFetcher::new(30));
	let store = PageStore::new(fetcher.clone());
	let key = feed_key();

	store.load(&key, LoadDirection::Initial, None, Freshness::MustBeFresh).await.expect("initial");
	store.load(&key, LoadDirection::Append, None, Freshness::CachedOrFetch).await.expect("append");

	let calls = fetcher.calls();

	store
		.load(&key, LoadDirection::Append, Some(PageToken::after("10")), Freshness::CachedOrFetch)
		.await
		.expect("explicit");

	assert_eq!(fetcher.calls(), calls + 1);
}

#[tokio::test]
async fn concurrent_same_direction_loads_collapse_onto_one_fetch() {
	init_tracing();

	let fetcher = Arc::new(WindowPageFetcher::new(200).with_delay(Duration::from_millis(80)));
	let store = Arc::new(PageStore::new(fetcher.clone()));
	let key = feed_key();

	store.load(&key, LoadDirection::Initial, None, Freshness::MustBeFresh).await.expect("initial");

	let calls = fetcher.calls();
	let racer = {
		let store = store.clone();
		let key = key.clone();

		tokio::spawn(async move {
			store.load(&key, LoadDirection::Append, None, Freshness::CachedOrFetch).await
		})
	};

	time::sleep(Duration::from_millis(20)).await;
	store.load(&key, LoadDirection::Append, None, Freshness::CachedOrFetch).await.expect("second");
	racer.await.expect("join").expect("first");

	assert_eq!(fetcher.calls(), calls + 1);
}

#[tokio::test]
async fn load_errors_stay_localized_to_their_direction() {
	init_tracing();

	let fetcher = Arc::new(WindowPageFetcher::new(200));
	let store = PageStore::new(fetcher.clone());
	let key = feed_key();

	store.load(&key, LoadDirection::Initial, None, Freshness::MustBeFresh).await.expect("initial");
	fetcher.fail_next(NetworkError::NoConnection.into());

	let result = store.load(&key, LoadDirection::Append, None, Freshness::CachedOrFetch).await;

	assert!(result.is_err());

	let mut stream = store
		.stream(key.clone(), PagingConfig::default(), Freshness::CachedOrFetch)
		.await
		.expect("stream");
	let snapshot = first_snapshot(&mut stream).await;

	// The window survives; only the append state carries the failure.
	assert_eq!(snapshot.items.len(), 20);
	assert!(matches!(
		snapshot.source_states.append,
		LoadState::Error { can_serve_stale: true, .. }
	));
	assert!(matches!(snapshot.source_states.initial, LoadState::Idle));
}

#[tokio::test]
async fn refresh_replaces_the_window_from_the_top() {
	init_tracing();

	let fetcher = Arc::new(WindowPageFetcher::new(200));
	let store = PageStore::new(fetcher.clone());
	let key = feed_key();

	store.load(&key, LoadDirection::Initial, None, Freshness::MustBeFresh).await.expect("initial");
	store.load(&key, LoadDirection::Append, None, Freshness::CachedOrFetch).await.expect("append");
	store.refresh(&key).await.expect("refresh");

	let mut stream = store
		.stream(key.clone(), PagingConfig::default(), Freshness::CachedOrFetch)
		.await
		.expect("stream");
	let snapshot = first_snapshot(&mut stream).await;

	assert_eq!(snapshot.items.len(), 20);
	assert_eq!(snapshot.items.first().map(String::as_str), Some("item-0"));
}

#[tokio::test]
async fn the_first_subscriber_establishes_the_key_config() {
	init_tracing();

	let fetcher = Arc::new(WindowPageFetcher::new(200));
	let store = PageStore::new(fetcher.clone());
	let key = feed_key();
	let _stream =
		store.stream(key.clone(), config(5, 50), Freshness::CachedOrFetch).await.expect("stream");

	// The later caller's default config is ignored; loads use the established one.
	store.load(&key, LoadDirection::Append, None, Freshness::CachedOrFetch).await.expect("load");
	time::sleep(Duration::from_millis(100)).await;

	assert_eq!(fetcher.last_page_size(), 5);
}

#[tokio::test]
async fn closing_the_boundary_emits_a_boundary_event() {
	init_tracing();

	let fetcher = Arc::new(WindowPageFetcher::new(8));
	let store = PageStore::new(fetcher.clone());
	let key = feed_key();
	let mut stream =
		store.stream(key.clone(), config(20, 50), Freshness::CachedOrFetch).await.expect("stream");
	let mut saw_boundary = false;

	// The automatic initial load fetches the single 8-item page, closing both
	// boundaries at once.
	while let Ok(Some(event)) = time::timeout(Duration::from_millis(500), stream.next()).await {
		match event {
			PagingEvent::Boundary { direction } => {
				assert_eq!(direction, LoadDirection::Initial);

				saw_boundary = true;

				break;
			},
			PagingEvent::Snapshot(snapshot) =>
				if snapshot.fully_loaded && snapshot.items.len() == 8 {
					continue;
				},
		}
	}

	assert!(saw_boundary);
}

#[tokio::test]
async fn cached_or_fetch_skips_a_fresh_initial_load() {
	init_tracing();

	let fetcher = Arc::new(WindowPageFetcher::new(200));
	let store = PageStore::new(fetcher.clone());
	let key = feed_key();

	store.load(&key, LoadDirection::Initial, None, Freshness::MustBeFresh).await.expect("initial");

	let calls = fetcher.calls();

	// The window is fresh; a cached-tolerant initial load is satisfied as-is.
	store.load(&key, LoadDirection::Initial, None, Freshness::CachedOrFetch).await.expect("cached");
	time::sleep(Duration::from_millis(50)).await;

	assert_eq!(fetcher.calls(), calls);
}

#[tokio::test]
async fn invalidation_drops_the_window_and_ends_subscriptions() {
	init_tracing();

	let fetcher = Arc::new(WindowPageFetcher::new(200));
	let store = PageStore::new(fetcher.clone());
	let key = feed_key();

	store.load(&key, LoadDirection::Initial, None, Freshness::MustBeFresh).await.expect("initial");

	let mut stream = store
		.stream(key.clone(), PagingConfig::default(), Freshness::CachedOrFetch)
		.await
		.expect("stream");
	let snapshot = first_snapshot(&mut stream).await;

	assert_eq!(snapshot.items.len(), 20);

	store.invalidate(&key);

	// A fresh subscription sees an empty window and a new automatic initial load.
	let mut fresh = store
		.stream(key.clone(), PagingConfig::default(), Freshness::CachedOrFetch)
		.await
		.expect("stream");
	let snapshot = first_snapshot(&mut fresh).await;

	assert!(snapshot.items.is_empty());
}
