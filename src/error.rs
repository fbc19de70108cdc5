//! Store-wide error taxonomy and retryability rules.
//!
//! The taxonomy is sealed: every failure the engine can surface is one of the variants
//! below, and retry/backoff decisions are derived from it rather than from transport
//! details. Errors are cheap to clone because fetch outcomes fan out to every
//! single-flight waiter.

// self
use crate::{_prelude::*, key::StoreKey};

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for the store engine.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
	#[error(transparent)]
	Network(#[from] NetworkError),
	#[error(transparent)]
	Persistence(#[from] PersistenceError),

	#[error("Validation failed for {field}: {reason}")]
	Validation {
		/// Configuration or input field that failed validation.
		field: &'static str,
		/// Human-readable reason for the rejection.
		reason: String,
	},
	#[error("No value recorded for key '{0}'.")]
	NotFound(StoreKey),
	#[error("Serialization failed: {0}")]
	Serialization(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
	#[error("Rate limited by upstream.")]
	RateLimited {
		/// Server-suggested delay before the next attempt; overrides policy backoff.
		retry_after: Option<Duration>,
	},
	#[error("Unknown store failure: {0}")]
	Unknown(String),
}
impl StoreError {
	/// Whether the failure is worth retrying at all.
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::Network(err) => err.is_retryable(),
			Self::Persistence(err) => err.is_retryable(),
			Self::Validation { .. }
			| Self::NotFound(_)
			| Self::Serialization(_)
			| Self::Configuration(_) => false,
			Self::RateLimited { .. } | Self::Unknown(_) => true,
		}
	}

	/// Server-suggested retry delay, when the failure carries one.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::RateLimited { retry_after } => *retry_after,
			_ => None,
		}
	}

	/// Whether the failure indicates the network itself is unreachable, as opposed to an
	/// upstream that answered badly. Drives the offline-enqueue mutation path.
	pub fn is_offline(&self) -> bool {
		matches!(self, Self::Network(NetworkError::NoConnection | NetworkError::Dns))
	}

	/// Normalize an arbitrary error message into the taxonomy.
	///
	/// Rules are case-insensitive substring matches; unknown messages become
	/// [`StoreError::Unknown`]. Adapters written against opaque transports feed their
	/// stringified failures through here.
	pub fn classify(message: &str) -> Self {
		let lower = message.to_ascii_lowercase();

		if lower.contains("timeout") || lower.contains("timed out") {
			return NetworkError::Timeout.into();
		}
		if lower.contains("dns") {
			return NetworkError::Dns.into();
		}
		if lower.contains("ssl") || lower.contains("tls") || lower.contains("certificate") {
			return NetworkError::Ssl.into();
		}
		if lower.contains("no connection")
			|| lower.contains("unreachable")
			|| lower.contains("offline")
			|| lower.contains("connection refused")
		{
			return NetworkError::NoConnection.into();
		}
		if lower.contains("disk full") || lower.contains("no space") {
			return PersistenceError::DiskFull.into();
		}
		if lower.contains("permission denied") || lower.contains("access denied") {
			return PersistenceError::PermissionDenied.into();
		}
		if lower.contains("database is locked") || lower.contains("locked") {
			return PersistenceError::DatabaseLocked.into();
		}
		if lower.contains("conflict") {
			return PersistenceError::TransactionConflict.into();
		}
		if lower.contains("rate limit") || lower.contains("too many requests") {
			return Self::RateLimited { retry_after: None };
		}

		Self::Unknown(message.to_string())
	}
}

/// Network-layer failures.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
	#[error("Network request timed out.")]
	Timeout,
	#[error("No network connection available.")]
	NoConnection,
	#[error("Upstream HTTP status {status}.")]
	Http {
		/// Status code returned by the upstream.
		status: u16,
		/// Response body captured for diagnostics, when available.
		body: Option<String>,
	},
	#[error("DNS resolution failed.")]
	Dns,
	#[error("TLS negotiation failed.")]
	Ssl,
}
impl NetworkError {
	/// Retryability per failure kind. HTTP statuses retry on 408, 429, and 5xx only.
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::Timeout | Self::NoConnection | Self::Dns => true,
			Self::Ssl => false,
			Self::Http { status, .. } => {
				matches!(status, 408 | 429) || (500..=599).contains(status)
			},
		}
	}
}

/// Local persistence failures.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PersistenceError {
	#[error("Source-of-truth read failed: {0}")]
	Read(String),
	#[error("Source-of-truth write failed: {0}")]
	Write(String),
	#[error("Source-of-truth delete failed: {0}")]
	Delete(String),
	#[error("Storage device is full.")]
	DiskFull,
	#[error("Storage permission denied.")]
	PermissionDenied,
	#[error("Transaction conflict; the write lost the race.")]
	TransactionConflict,
	#[error("Database is locked by another holder.")]
	DatabaseLocked,
}
impl PersistenceError {
	/// Retryability per failure kind.
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::Read(_)
			| Self::Write(_)
			| Self::Delete(_)
			| Self::TransactionConflict
			| Self::DatabaseLocked => true,
			Self::DiskFull | Self::PermissionDenied => false,
		}
	}
}
