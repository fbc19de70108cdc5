//! Logical store keys and namespaces.
//!
//! Keys are opaque to the engine: equality, hashing, and a stable canonical form for
//! index lookups are the only operations the pipelines rely on.

// std
use std::{
	collections::BTreeMap,
	fmt::{self, Display, Formatter},
};
// crates.io
use serde::{Deserialize, Serialize};

/// Grouping tag supporting bulk invalidation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);
impl Namespace {
	/// Create a namespace from any string-like value.
	pub fn new(name: impl Into<String>) -> Self {
		Self(name.into())
	}

	/// Raw namespace name.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Display for Namespace {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}
impl From<&str> for Namespace {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}
impl From<String> for Namespace {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}

/// Typed entity identifier for [`StoreKey::ById`] keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
	/// Entity type tag, e.g. `"user"`.
	pub kind: String,
	/// Identifier unique within the type.
	pub id: String,
}
impl EntityId {
	/// Create an entity identifier.
	pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
		Self { kind: kind.into(), id: id.into() }
	}
}

/// Opaque, hashable request identifier.
///
/// The engine never interprets key contents beyond equality, hashing, and the canonical
/// form produced by [`StoreKey::index_key`]. Query parameters are kept ordered so the
/// canonical form is stable regardless of insertion order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKey {
	/// Single-entity key.
	ById {
		/// Namespace the entity belongs to.
		namespace: Namespace,
		/// Typed entity identifier.
		entity: EntityId,
	},
	/// Query-shaped key addressing a derived collection.
	Query {
		/// Namespace the query belongs to.
		namespace: Namespace,
		/// Ordered query parameters.
		query: BTreeMap<String, String>,
	},
}
impl StoreKey {
	/// Build a [`StoreKey::ById`] key.
	pub fn by_id(
		namespace: impl Into<Namespace>,
		kind: impl Into<String>,
		id: impl Into<String>,
	) -> Self {
		Self::ById { namespace: namespace.into(), entity: EntityId::new(kind, id) }
	}

	/// Build a [`StoreKey::Query`] key from parameter pairs.
	pub fn query<I, K, V>(namespace: impl Into<Namespace>, params: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		let query = params.into_iter().map(|(k, v)| (k.into(), v.into())).collect();

		Self::Query { namespace: namespace.into(), query }
	}

	/// Namespace the key belongs to.
	pub fn namespace(&self) -> &Namespace {
		match self {
			Self::ById { namespace, .. } | Self::Query { namespace, .. } => namespace,
		}
	}

	/// Stable canonical form used for index lookups and persisted artifacts.
	///
	/// Two keys compare equal exactly when their canonical forms compare equal.
	pub fn index_key(&self) -> String {
		match self {
			Self::ById { namespace, entity } => {
				format!(
					"{}/id/{}/{}",
					escape(namespace.as_str()),
					escape(&entity.kind),
					escape(&entity.id)
				)
			},
			Self::Query { namespace, query } => {
				let mut out = format!("{}/q", escape(namespace.as_str()));

				for (k, v) in query {
					out.push('/');
					out.push_str(&escape(k));
					out.push('=');
					out.push_str(&escape(v));
				}

				out
			},
		}
	}
}
impl Display for StoreKey {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(&self.index_key())
	}
}

// Reserved separators are percent-escaped so distinct keys never collide on their
// canonical forms.
fn escape(raw: &str) -> String {
	let mut out = String::with_capacity(raw.len());

	for c in raw.chars() {
		match c {
			'/' => out.push_str("%2F"),
			'=' => out.push_str("%3D"),
			'%' => out.push_str("%25"),
			_ => out.push(c),
		}
	}

	out
}
