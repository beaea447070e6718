//! Replay protection for the human authorization flow.
//!
//! The ledger remembers fingerprints (never raw values) of issued `state` nonces until they
//! expire and of exchanged authorization codes for [`CODE_MEMORY`], so a replayed callback is
//! rejected before any token endpoint call.

// self
use crate::{
	_prelude::*,
	store::{StoreError, StoreFuture},
};

/// How long exchanged authorization codes are remembered.
pub const CODE_MEMORY: Duration = Duration::hours(24);

/// Persistence contract for issued states and exchanged codes.
pub trait AuthorizationLedger
where
	Self: Send + Sync,
{
	/// Records an issued state fingerprint valid until `expires_at`.
	fn record_state<'a>(
		&'a self,
		state_digest: &'a str,
		expires_at: OffsetDateTime,
	) -> StoreFuture<'a, ()>;

	/// Consumes a state fingerprint; each state is accepted at most once.
	fn consume_state<'a>(
		&'a self,
		state_digest: &'a str,
		now: OffsetDateTime,
	) -> StoreFuture<'a, StateCheck>;

	/// Returns `true` when the code fingerprint was already exchanged.
	fn is_code_used<'a>(
		&'a self,
		code_digest: &'a str,
		now: OffsetDateTime,
	) -> StoreFuture<'a, bool>;

	/// Atomically marks a code fingerprint as exchanged.
	fn claim_code<'a>(
		&'a self,
		code_digest: &'a str,
		now: OffsetDateTime,
	) -> StoreFuture<'a, CodeClaim>;
}

/// Result of [`AuthorizationLedger::consume_state`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateCheck {
	/// State was issued, unexpired, and is now consumed.
	Accepted,
	/// State was never issued or was already consumed.
	Unknown,
	/// State was issued but its window has passed.
	Expired,
}

/// Result of [`AuthorizationLedger::claim_code`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeClaim {
	/// First time this code is seen.
	Fresh,
	/// The code was exchanged before.
	AlreadyUsed,
}

/// Serializable ledger contents shared by every backend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
	/// State fingerprint → expiry (epoch seconds).
	#[serde(default)]
	pub states: BTreeMap<String, i64>,
	/// Code fingerprint → forget-after instant (epoch seconds).
	#[serde(default)]
	pub codes: BTreeMap<String, i64>,
}
impl LedgerState {
	/// Drops entries whose window has passed, keeping expired states one extra window so they
	/// still report [`StateCheck::Expired`] instead of [`StateCheck::Unknown`].
	pub fn prune(&mut self, now: OffsetDateTime) {
		let now = now.unix_timestamp();
		let grace = CODE_MEMORY.whole_seconds();

		self.states.retain(|_, expires_at| *expires_at + grace > now);
		self.codes.retain(|_, forget_at| *forget_at > now);
	}

	/// Records a state fingerprint.
	pub fn record_state(&mut self, digest: &str, expires_at: OffsetDateTime) {
		self.states.insert(digest.to_owned(), expires_at.unix_timestamp());
	}

	/// Consumes a state fingerprint.
	pub fn consume_state(&mut self, digest: &str, now: OffsetDateTime) -> StateCheck {
		match self.states.remove(digest) {
			None => StateCheck::Unknown,
			Some(expires_at) if expires_at <= now.unix_timestamp() => StateCheck::Expired,
			Some(_) => StateCheck::Accepted,
		}
	}

	/// Checks whether a code fingerprint is remembered.
	pub fn is_code_used(&self, digest: &str, now: OffsetDateTime) -> bool {
		self.codes.get(digest).is_some_and(|forget_at| *forget_at > now.unix_timestamp())
	}

	/// Claims a code fingerprint.
	pub fn claim_code(&mut self, digest: &str, now: OffsetDateTime) -> CodeClaim {
		if self.is_code_used(digest, now) {
			return CodeClaim::AlreadyUsed;
		}

		self.codes.insert(digest.to_owned(), (now + CODE_MEMORY).unix_timestamp());

		CodeClaim::Fresh
	}
}

pub(crate) fn serialization_error(context: &str, e: impl Display) -> StoreError {
	StoreError::Serialization { message: format!("{context}: {e}") }
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn states_are_single_use_and_expire() {
		let now = macros::datetime!(2025-01-01 09:00 UTC);
		let mut ledger = LedgerState::default();

		ledger.record_state("a", now + Duration::minutes(10));
		ledger.record_state("b", now + Duration::minutes(10));

		assert_eq!(ledger.consume_state("a", now), StateCheck::Accepted);
		assert_eq!(ledger.consume_state("a", now), StateCheck::Unknown);
		assert_eq!(ledger.consume_state("b", now + Duration::minutes(11)), StateCheck::Expired);
		assert_eq!(ledger.consume_state("never-issued", now), StateCheck::Unknown);
	}

	#[test]
	fn codes_are_remembered_for_a_day() {
		let now = macros::datetime!(2025-01-01 09:00 UTC);
		let mut ledger = LedgerState::default();

		assert_eq!(ledger.claim_code("c", now), CodeClaim::Fresh);
		assert_eq!(ledger.claim_code("c", now + Duration::hours(1)), CodeClaim::AlreadyUsed);
		assert!(ledger.is_code_used("c", now + Duration::hours(23)));

		ledger.prune(now + Duration::hours(25));

		assert!(ledger.codes.is_empty());
		assert!(!ledger.is_code_used("c", now + Duration::hours(25)));
	}

	#[test]
	fn prune_keeps_recently_expired_states() {
		let now = macros::datetime!(2025-01-01 09:00 UTC);
		let mut ledger = LedgerState::default();

		ledger.record_state("s", now);
		ledger.prune(now + Duration::hours(1));

		assert_eq!(ledger.consume_state("s", now + Duration::hours(1)), StateCheck::Expired);
	}
}
