//! Storage contracts and built-in backends for the credential record and the authorization
//! ledger.
//!
//! The credential record is the only shared mutable resource between concurrent runs, so
//! every write goes through [`CredentialStore::save`], a compare-and-swap on the record's
//! monotonic `version`.

pub mod file;
pub mod ledger;
pub mod memory;

pub use file::{FileLedger, FileStore};
pub use ledger::*;
pub use memory::{MemoryLedger, MemoryStore};

// self
use crate::{_prelude::*, auth::TokenPair};

/// Boxed future returned by store and ledger operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Durable home of the single credential record.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Loads the current record, if any.
	fn load(&self) -> StoreFuture<'_, Option<CredentialRecord>>;

	/// Writes `record` only if the stored version still equals `expected_version`.
	///
	/// An absent record has version `0`. On success the stored copy carries
	/// `expected_version + 1`; the `version` field of `record` is ignored.
	fn save(
		&self,
		record: CredentialRecord,
		expected_version: u64,
	) -> StoreFuture<'_, SaveOutcome>;

	/// Removes the record unconditionally.
	fn clear(&self) -> StoreFuture<'_, ()>;
}

/// Result of a [`CredentialStore::save`] attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
	/// The write landed; the record now has `version`.
	Saved {
		/// Version assigned to the stored record.
		version: u64,
	},
	/// Another writer got there first.
	VersionConflict {
		/// Version currently stored, `None` when the record is absent.
		current: Option<u64>,
	},
}

/// Error type produced by store and ledger implementations.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// Compare-and-swap kept losing to concurrent writers.
	#[error("Credential record stayed contended after {attempts} attempts.")]
	Contended {
		/// Number of CAS attempts performed.
		attempts: u32,
	},
}

/// Persisted token pair plus coordination metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
	/// Current token pair.
	#[serde(flatten)]
	pub pair: TokenPair,
	/// Monotonic CAS version.
	#[serde(default)]
	pub version: u64,
	/// Present while one invocation is refreshing.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_lease: Option<RefreshLease>,
	/// Set once the brokerage rejected the refresh token.
	#[serde(
		default,
		with = "time::serde::timestamp::option",
		skip_serializing_if = "Option::is_none"
	)]
	pub rejected_at: Option<OffsetDateTime>,
	/// Outcome of the latest token acquisition or refresh.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_refresh: Option<RefreshReport>,
}
impl CredentialRecord {
	/// Wraps a freshly issued pair.
	pub fn new(pair: TokenPair) -> Self {
		Self { pair, version: 0, refresh_lease: None, rejected_at: None, last_refresh: None }
	}

	/// Attaches a refresh report.
	pub fn with_report(mut self, outcome: RefreshOutcome, at: OffsetDateTime) -> Self {
		self.last_refresh = Some(RefreshReport { outcome, at });

		self
	}

	/// Returns `true` once the brokerage rejected this record's refresh token.
	pub fn is_rejected(&self) -> bool {
		self.rejected_at.is_some()
	}

	/// Live lease owned by someone other than `holder`, if any.
	pub fn foreign_lease(&self, holder: &str, now: OffsetDateTime) -> Option<&RefreshLease> {
		self.refresh_lease.as_ref().filter(|lease| lease.holder != holder && lease.expires_at > now)
	}

	/// Outcome reported to status consumers.
	pub fn last_outcome(&self) -> RefreshOutcome {
		self.last_refresh.map(|report| report.outcome).unwrap_or(RefreshOutcome::Never)
	}
}

/// Persisted claim that one invocation is refreshing the record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshLease {
	/// Random identifier of the claiming invocation.
	pub holder: String,
	/// Instant after which the claim may be taken over.
	#[serde(with = "time::serde::timestamp")]
	pub expires_at: OffsetDateTime,
}

/// Outcome of the latest token acquisition or refresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOutcome {
	/// Nothing has happened yet.
	Never,
	/// Pair obtained through the authorization code exchange.
	Authorized,
	/// Refresh succeeded.
	Succeeded,
	/// Refresh failed temporarily; the previous pair was kept.
	TransientFailure,
	/// Brokerage rejected the refresh token.
	Rejected,
}
impl RefreshOutcome {
	/// Stable snake_case label.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Never => "never",
			Self::Authorized => "authorized",
			Self::Succeeded => "succeeded",
			Self::TransientFailure => "transient_failure",
			Self::Rejected => "rejected",
		}
	}
}

/// Timestamped [`RefreshOutcome`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
	/// What happened.
	pub outcome: RefreshOutcome,
	/// When it happened.
	#[serde(with = "time::serde::timestamp")]
	pub at: OffsetDateTime,
}

/// Applies the CAS rule shared by every backend to an in-memory slot.
pub(crate) fn apply_save(
	slot: &mut Option<CredentialRecord>,
	mut record: CredentialRecord,
	expected_version: u64,
) -> SaveOutcome {
	let current = slot.as_ref().map(|r| r.version);

	if current.unwrap_or(0) != expected_version {
		return SaveOutcome::VersionConflict { current };
	}

	record.version = expected_version + 1;

	let version = record.version;

	*slot = Some(record);

	SaveOutcome::Saved { version }
}
