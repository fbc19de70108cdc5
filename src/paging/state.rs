//! Per-key paging window state and trimming rules.

// std
use std::collections::VecDeque;
// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

/// Default page size requested from the fetcher.
pub const DEFAULT_PAGE_SIZE: usize = 20;
/// Default bound on the total number of retained items.
pub const DEFAULT_MAX_SIZE: usize = 500;

/// Opaque cursor handed back by the page fetcher.
///
/// The engine forwards tokens without interpreting them; the optional `before`/`after`
/// strings exist purely for the fetcher's own use.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageToken {
	/// Cursor half addressing items before a boundary.
	pub before: Option<String>,
	/// Cursor half addressing items after a boundary.
	pub after: Option<String>,
}
impl PageToken {
	/// Token addressing items after the given cursor.
	pub fn after(cursor: impl Into<String>) -> Self {
		Self { before: None, after: Some(cursor.into()) }
	}

	/// Token addressing items before the given cursor.
	pub fn before(cursor: impl Into<String>) -> Self {
		Self { before: Some(cursor.into()), after: None }
	}
}

/// One fetched page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page<V> {
	/// Items in window order.
	pub items: Vec<V>,
	/// Token for the page after this one, when the boundary is open.
	pub next: Option<PageToken>,
	/// Token for the page before this one, when the boundary is open.
	pub prev: Option<PageToken>,
}
impl<V> Page<V> {
	/// A page with open or closed boundaries on both sides.
	pub fn new(items: Vec<V>, next: Option<PageToken>, prev: Option<PageToken>) -> Self {
		Self { items, next, prev }
	}
}

/// Direction of a page load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadDirection {
	/// First page, replacing any prior window.
	Initial,
	/// Page after the current window.
	Append,
	/// Page before the current window.
	Prepend,
}

/// Load progress for one direction.
#[derive(Clone, Debug, Default)]
pub enum LoadState {
	/// No load is running.
	#[default]
	Idle,
	/// A load is in flight.
	Loading,
	/// The most recent load failed; existing items are preserved.
	Error {
		/// The classified failure.
		error: StoreError,
		/// Whether stale items remain in the window behind the failure.
		can_serve_stale: bool,
	},
}
impl LoadState {
	/// Whether a load is in flight.
	pub fn is_loading(&self) -> bool {
		matches!(self, Self::Loading)
	}
}

/// Per-direction load states.
#[derive(Clone, Debug, Default)]
pub struct SourceStates {
	/// State of the initial load.
	pub initial: LoadState,
	/// State of forward loads.
	pub append: LoadState,
	/// State of backward loads.
	pub prepend: LoadState,
}
impl SourceStates {
	/// State for one direction.
	pub fn get(&self, direction: LoadDirection) -> &LoadState {
		match direction {
			LoadDirection::Initial => &self.initial,
			LoadDirection::Append => &self.append,
			LoadDirection::Prepend => &self.prepend,
		}
	}

	pub(crate) fn set(&mut self, direction: LoadDirection, state: LoadState) {
		match direction {
			LoadDirection::Initial => self.initial = state,
			LoadDirection::Append => self.append = state,
			LoadDirection::Prepend => self.prepend = state,
		}
	}
}

/// Per-key paging parameters; honored for the first subscriber of a key, after which
/// the established state wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PagingConfig {
	/// Page size requested from the fetcher.
	pub page_size: usize,
	/// Bound on the total number of retained items.
	pub max_size: usize,
}
impl PagingConfig {
	/// Validate the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if self.page_size == 0 {
			return Err(StoreError::Validation {
				field: "page_size",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_size < self.page_size {
			return Err(StoreError::Validation {
				field: "max_size",
				reason: "Must be greater than or equal to page_size.".into(),
			});
		}

		Ok(())
	}
}
impl Default for PagingConfig {
	fn default() -> Self {
		Self { page_size: DEFAULT_PAGE_SIZE, max_size: DEFAULT_MAX_SIZE }
	}
}

/// Immutable view of the window published after every structural change.
#[derive(Clone, Debug)]
pub struct PagingSnapshot<V> {
	/// Concatenated window items.
	pub items: Vec<V>,
	/// Open forward boundary, if any.
	pub next: Option<PageToken>,
	/// Open backward boundary, if any.
	pub prev: Option<PageToken>,
	/// Per-direction load states.
	pub source_states: SourceStates,
	/// Whether both boundaries were closed at the most recent boundary load.
	pub fully_loaded: bool,
}

/// Mutable window state guarded by the page store's per-key mutex.
#[derive(Debug)]
pub(crate) struct PagingState<V> {
	pub config: PagingConfig,
	pub pages: VecDeque<Page<V>>,
	pub next_token: Option<PageToken>,
	pub prev_token: Option<PageToken>,
	pub source_states: SourceStates,
	pub fully_loaded: bool,
	pub last_refresh_at: Option<DateTime<Utc>>,
}
impl<V> PagingState<V>
where
	V: Clone,
{
	pub fn new(config: PagingConfig) -> Self {
		Self {
			config,
			pages: VecDeque::new(),
			next_token: None,
			prev_token: None,
			source_states: SourceStates::default(),
			fully_loaded: false,
			last_refresh_at: None,
		}
	}

	/// Whether an initial load has ever completed.
	pub fn is_loaded(&self) -> bool {
		self.last_refresh_at.is_some()
	}

	pub fn total_len(&self) -> usize {
		self.pages.iter().map(|page| page.items.len()).sum()
	}

	/// Integrate a fetched page and trim the window to its bound.
	pub fn integrate(&mut self, direction: LoadDirection, page: Page<V>, now: DateTime<Utc>) {
		match direction {
			LoadDirection::Initial => {
				let mut page = page;

				// Oversized initial pages are truncated from the tail. The incoming
				// next token is retained: tokens are opaque, so the boundary cannot be
				// re-synthesized at the cut point, and config validation keeps
				// page_size within max_size to make this a non-path.
				page.items.truncate(self.config.max_size);

				self.next_token = page.next.clone();
				self.prev_token = page.prev.clone();
				self.pages = VecDeque::from([page]);
				self.last_refresh_at = Some(now);
			},
			LoadDirection::Append => {
				self.next_token = page.next.clone();
				self.pages.push_back(page);
				self.trim_leading();
			},
			LoadDirection::Prepend => {
				self.prev_token = page.prev.clone();
				self.pages.push_front(page);
				self.trim_trailing();
			},
		}

		self.fully_loaded = self.next_token.is_none() && self.prev_token.is_none();
	}

	// Drop leading items, and page heads once emptied, until the bound holds.
	fn trim_leading(&mut self) {
		let mut excess = self.total_len().saturating_sub(self.config.max_size);

		while excess > 0 {
			let Some(front) = self.pages.front_mut() else { break };

			if front.items.len() <= excess {
				excess -= front.items.len();
				self.pages.pop_front();
				self.prev_token = self.pages.front().and_then(|page| page.prev.clone());
			} else {
				front.items.drain(..excess);
				excess = 0;
			}
		}
	}

	fn trim_trailing(&mut self) {
		let mut excess = self.total_len().saturating_sub(self.config.max_size);

		while excess > 0 {
			let Some(back) = self.pages.back_mut() else { break };

			if back.items.len() <= excess {
				excess -= back.items.len();
				self.pages.pop_back();
				self.next_token = self.pages.back().and_then(|page| page.next.clone());
			} else {
				let keep = back.items.len() - excess;

				back.items.truncate(keep);
				excess = 0;
			}
		}
	}

	pub fn snapshot(&self) -> PagingSnapshot<V> {
		PagingSnapshot {
			items: self.pages.iter().flat_map(|page| page.items.iter().cloned()).collect(),
			next: self.next_token.clone(),
			prev: self.prev_token.clone(),
			source_states: self.source_states.clone(),
			fully_loaded: self.fully_loaded,
		}
	}
}
