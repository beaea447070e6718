//! Thread-safe in-memory backends for tests and single-process demos.

// self
use crate::{
	_prelude::*,
	store::{
		AuthorizationLedger, CodeClaim, CredentialRecord, CredentialStore, LedgerState,
		SaveOutcome, StateCheck, StoreFuture, apply_save,
	},
};

/// Credential store that keeps the record in-process.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Arc<Mutex<Option<CredentialRecord>>>);
impl MemoryStore {
	/// Seeds the store with `record`, stamped as version `1`.
	pub fn with_record(record: CredentialRecord) -> Self {
		let store = Self::default();

		apply_save(&mut store.0.lock(), record, 0);

		store
	}

	/// Synchronous snapshot, handy for assertions.
	pub fn snapshot(&self) -> Option<CredentialRecord> {
		self.0.lock().clone()
	}
}
impl CredentialStore for MemoryStore {
	fn load(&self) -> StoreFuture<'_, Option<CredentialRecord>> {
		Box::pin(async move { Ok(self.0.lock().clone()) })
	}

	fn save(
		&self,
		record: CredentialRecord,
		expected_version: u64,
	) -> StoreFuture<'_, SaveOutcome> {
		Box::pin(async move { Ok(apply_save(&mut self.0.lock(), record, expected_version)) })
	}

	fn clear(&self) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			self.0.lock().take();

			Ok(())
		})
	}
}

/// Authorization ledger that keeps fingerprints in-process.
#[derive(Clone, Debug, Default)]
pub struct MemoryLedger(Arc<Mutex<LedgerState>>);
impl AuthorizationLedger for MemoryLedger {
	fn record_state<'a>(
		&'a self,
		state_digest: &'a str,
		expires_at: OffsetDateTime,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.0.lock().record_state(state_digest, expires_at);

			Ok(())
		})
	}

	fn consume_state<'a>(
		&'a self,
		state_digest: &'a str,
		now: OffsetDateTime,
	) -> StoreFuture<'a, StateCheck> {
		Box::pin(async move {
			let mut guard = self.0.lock();

			guard.prune(now);

			Ok(guard.consume_state(state_digest, now))
		})
	}

	fn is_code_used<'a>(
		&'a self,
		code_digest: &'a str,
		now: OffsetDateTime,
	) -> StoreFuture<'a, bool> {
		Box::pin(async move { Ok(self.0.lock().is_code_used(code_digest, now)) })
	}

	fn claim_code<'a>(
		&'a self,
		code_digest: &'a str,
		now: OffsetDateTime,
	) -> StoreFuture<'a, CodeClaim> {
		Box::pin(async move {
			let mut guard = self.0.lock();

			guard.prune(now);

			Ok(guard.claim_code(code_digest, now))
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::auth::TokenPair;

	fn record(access: &str) -> CredentialRecord {
		CredentialRecord::new(
			TokenPair::builder()
				.access_token(access)
				.expires_in(Duration::hours(1))
				.build()
				.expect("Token pair fixture should build."),
		)
	}

	#[tokio::test]
	async fn save_load_and_clear() {
		let store = MemoryStore::default();

		assert_eq!(store.load().await.expect("Load should succeed."), None);
		assert_eq!(
			store.save(record("a"), 0).await.expect("Save should succeed."),
			SaveOutcome::Saved { version: 1 }
		);
		assert_eq!(
			store.save(record("b"), 0).await.expect("Save should succeed."),
			SaveOutcome::VersionConflict { current: Some(1) }
		);

		let loaded =
			store.load().await.expect("Load should succeed.").expect("Record should exist.");

		assert_eq!(loaded.pair.access_token.expose(), "a");
		assert_eq!(loaded.version, 1);

		store.clear().await.expect("Clear should succeed.");

		assert!(store.snapshot().is_none());
	}

	#[tokio::test]
	async fn ledger_rejects_second_claim() {
		let ledger = MemoryLedger::default();
		let now = OffsetDateTime::now_utc();

		assert_eq!(
			ledger.claim_code("d", now).await.expect("Claim should succeed."),
			CodeClaim::Fresh
		);
		assert!(ledger.is_code_used("d", now).await.expect("Lookup should succeed."));
		assert_eq!(
			ledger.claim_code("d", now).await.expect("Claim should succeed."),
			CodeClaim::AlreadyUsed
		);
	}
}
