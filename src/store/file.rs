//! JSON file backends for single-host deployments where scheduled runs share a disk.
//!
//! Writers serialize through an exclusive advisory lock on a sidecar `<file>.lock`, so
//! separate processes observe the same compare-and-swap semantics as threads do. Each
//! mutation replaces the data file atomically (temp file, fsync, rename, directory fsync).
//! Lock waits and file I/O run on the blocking pool, never on an async worker.

// std
use std::{
	ffi::OsString,
	fs::{self, File, OpenOptions},
	io::{ErrorKind, Write},
};
// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	store::{
		AuthorizationLedger, CodeClaim, CredentialRecord, CredentialStore, LedgerState,
		SaveOutcome, StateCheck, StoreError, StoreFuture, apply_save, ledger::serialization_error,
	},
};

/// Persists the credential record as a JSON document.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
}
impl FileStore {
	/// Opens a store at `path`, creating parent directories as needed.
	///
	/// The file itself is created on the first successful save.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		ensure_parent_exists(&path)?;

		Ok(Self { path })
	}

	/// Location of the JSON document.
	pub fn path(&self) -> &Path {
		&self.path
	}
}
impl CredentialStore for FileStore {
	fn load(&self) -> StoreFuture<'_, Option<CredentialRecord>> {
		Box::pin(with_exclusive_lock(self.path.clone(), |path| read_json(path)))
	}

	fn save(
		&self,
		record: CredentialRecord,
		expected_version: u64,
	) -> StoreFuture<'_, SaveOutcome> {
		Box::pin(with_exclusive_lock(self.path.clone(), move |path| {
			let mut slot = read_json::<CredentialRecord>(path)?;
			let outcome = apply_save(&mut slot, record, expected_version);

			if let (SaveOutcome::Saved { .. }, Some(stored)) = (outcome, slot.as_ref()) {
				write_json_atomic(path, stored)?;
			}

			Ok(outcome)
		}))
	}

	fn clear(&self) -> StoreFuture<'_, ()> {
		Box::pin(with_exclusive_lock(self.path.clone(), |path| match fs::remove_file(path) {
			Ok(()) => sync_parent(path),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(backend(&format!("Failed to remove {}", path.display()), e)),
		}))
	}
}

/// Persists the authorization ledger as a JSON document.
#[derive(Clone, Debug)]
pub struct FileLedger {
	path: PathBuf,
}
impl FileLedger {
	/// Opens a ledger at `path`, creating parent directories as needed.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		ensure_parent_exists(&path)?;

		Ok(Self { path })
	}

	/// Opens the ledger that lives next to a credential store file (`token.json` →
	/// `token.ledger.json`).
	pub fn beside(store_path: &Path) -> Result<Self, StoreError> {
		Self::open(store_path.with_extension("ledger.json"))
	}

	async fn mutate<T>(
		&self,
		f: impl 'static + Send + FnOnce(&mut LedgerState) -> T,
	) -> Result<T, StoreError>
	where
		T: 'static + Send,
	{
		with_exclusive_lock(self.path.clone(), move |path| {
			let mut state = read_json::<LedgerState>(path)?.unwrap_or_default();
			let out = f(&mut state);

			write_json_atomic(path, &state)?;

			Ok(out)
		})
		.await
	}
}
impl AuthorizationLedger for FileLedger {
	fn record_state<'a>(
		&'a self,
		state_digest: &'a str,
		expires_at: OffsetDateTime,
	) -> StoreFuture<'a, ()> {
		let state_digest = state_digest.to_owned();

		Box::pin(self.mutate(move |state| {
			state.prune(OffsetDateTime::now_utc());
			state.record_state(&state_digest, expires_at);
		}))
	}

	fn consume_state<'a>(
		&'a self,
		state_digest: &'a str,
		now: OffsetDateTime,
	) -> StoreFuture<'a, StateCheck> {
		let state_digest = state_digest.to_owned();

		Box::pin(self.mutate(move |state| {
			state.prune(now);
			state.consume_state(&state_digest, now)
		}))
	}

	fn is_code_used<'a>(
		&'a self,
		code_digest: &'a str,
		now: OffsetDateTime,
	) -> StoreFuture<'a, bool> {
		let code_digest = code_digest.to_owned();

		Box::pin(with_exclusive_lock(self.path.clone(), move |path| {
			Ok(read_json::<LedgerState>(path)?
				.is_some_and(|state| state.is_code_used(&code_digest, now)))
		}))
	}

	fn claim_code<'a>(
		&'a self,
		code_digest: &'a str,
		now: OffsetDateTime,
	) -> StoreFuture<'a, CodeClaim> {
		let code_digest = code_digest.to_owned();

		Box::pin(self.mutate(move |state| {
			state.prune(now);
			state.claim_code(&code_digest, now)
		}))
	}
}

fn backend(context: &str, e: impl Display) -> StoreError {
	StoreError::Backend { message: format!("{context}: {e}") }
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
	let mut name = path.file_name().map(OsString::from).unwrap_or_else(|| OsString::from("store"));

	name.push(".");
	name.push(suffix);

	path.with_file_name(name)
}

fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		fs::create_dir_all(parent).map_err(|e| {
			backend(&format!("Failed to create store directory {}", parent.display()), e)
		})?;
	}

	Ok(())
}

async fn with_exclusive_lock<T>(
	path: PathBuf,
	f: impl 'static + Send + FnOnce(&Path) -> Result<T, StoreError>,
) -> Result<T, StoreError>
where
	T: 'static + Send,
{
	tokio::task::spawn_blocking(move || lock_and_run(&path, f))
		.await
		.map_err(|e| backend("Store task failed", e))?
}

fn lock_and_run<T>(
	path: &Path,
	f: impl FnOnce(&Path) -> Result<T, StoreError>,
) -> Result<T, StoreError> {
	let lock_path = sidecar(path, "lock");
	let lock = OpenOptions::new()
		.create(true)
		.truncate(false)
		.read(true)
		.write(true)
		.open(&lock_path)
		.map_err(|e| backend(&format!("Failed to open {}", lock_path.display()), e))?;

	lock.lock().map_err(|e| backend(&format!("Failed to lock {}", lock_path.display()), e))?;

	let out = f(path);

	if let Err(e) = lock.unlock() {
		tracing::warn!(path = %lock_path.display(), error = %e, "Failed to release store lock.");
	}

	out
}

fn read_json<T>(path: &Path) -> Result<Option<T>, StoreError>
where
	T: DeserializeOwned,
{
	let bytes = match fs::read(path) {
		Ok(bytes) => bytes,
		Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
		Err(e) => return Err(backend(&format!("Failed to read {}", path.display()), e)),
	};

	if bytes.iter().all(u8::is_ascii_whitespace) {
		return Ok(None);
	}

	serde_json::from_slice(&bytes)
		.map(Some)
		.map_err(|e| serialization_error(&format!("Failed to parse {}", path.display()), e))
}

fn write_json_atomic<T>(path: &Path, value: &T) -> Result<(), StoreError>
where
	T: Serialize,
{
	let serialized = serde_json::to_vec_pretty(value)
		.map_err(|e| serialization_error("Failed to serialize store snapshot", e))?;
	let tmp_path = sidecar(path, "tmp");

	{
		let mut file = File::create(&tmp_path)
			.map_err(|e| backend(&format!("Failed to create {}", tmp_path.display()), e))?;

		file.write_all(&serialized)
			.map_err(|e| backend(&format!("Failed to write {}", tmp_path.display()), e))?;
		file.sync_all()
			.map_err(|e| backend(&format!("Failed to sync {}", tmp_path.display()), e))?;
	}

	fs::rename(&tmp_path, path)
		.map_err(|e| backend(&format!("Failed to replace {}", path.display()), e))?;

	sync_parent(path)
}

// Makes a rename or removal inside the directory durable.
#[cfg(unix)]
fn sync_parent(path: &Path) -> Result<(), StoreError> {
	let dir = match path.parent() {
		Some(parent) if !parent.as_os_str().is_empty() => parent,
		_ => Path::new("."),
	};

	File::open(dir)
		.and_then(|handle| handle.sync_all())
		.map_err(|e| backend(&format!("Failed to sync {}", dir.display()), e))
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> Result<(), StoreError> {
	Ok(())
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// self
	use super::*;
	use crate::auth::TokenPair;

	fn temp_path(tag: &str) -> PathBuf {
		let unique = format!(
			"brokerage_oauth_{tag}_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	fn cleanup(path: &Path) {
		for candidate in [path.to_path_buf(), sidecar(path, "lock"), sidecar(path, "tmp")] {
			let _ = fs::remove_file(candidate);
		}
	}

	#[tokio::test]
	async fn save_and_reopen_round_trip() {
		let path = temp_path("store");
		let store = FileStore::open(&path).expect("File store should open.");
		let pair = TokenPair::builder()
			.access_token("access-token")
			.refresh_token("refresh-token")
			.expires_in(Duration::hours(1))
			.build()
			.expect("Token pair fixture should build.");
		let record = CredentialRecord::new(pair);

		assert_eq!(
			store.save(record.clone(), 0).await.expect("Save should succeed."),
			SaveOutcome::Saved { version: 1 }
		);
		drop(store);

		let reopened = FileStore::open(&path).expect("File store should reopen.");
		let loaded = reopened
			.load()
			.await
			.expect("Load should succeed.")
			.expect("Record should survive reopen.");

		assert_eq!(loaded.pair, record.pair);
		assert_eq!(loaded.version, 1);
		assert_eq!(
			reopened.save(record, 0).await.expect("Save should succeed."),
			SaveOutcome::VersionConflict { current: Some(1) }
		);

		reopened.clear().await.expect("Clear should succeed.");

		assert!(reopened.load().await.expect("Load should succeed.").is_none());

		cleanup(&path);
	}

	#[tokio::test]
	async fn ledger_persists_across_handles() {
		let store_path = temp_path("ledger");
		let ledger = FileLedger::beside(&store_path).expect("Ledger should open.");
		let now = OffsetDateTime::now_utc();

		ledger
			.record_state("state-fp", now + Duration::minutes(10))
			.await
			.expect("State should record.");
		assert_eq!(
			ledger.claim_code("code-fp", now).await.expect("Claim should succeed."),
			CodeClaim::Fresh
		);

		let other = FileLedger::beside(&store_path).expect("Second handle should open.");

		assert!(other.is_code_used("code-fp", now).await.expect("Lookup should succeed."));
		assert_eq!(
			other.consume_state("state-fp", now).await.expect("Consume should succeed."),
			StateCheck::Accepted
		);
		assert_eq!(
			ledger.consume_state("state-fp", now).await.expect("Consume should succeed."),
			StateCheck::Unknown
		);

		cleanup(&store_path.with_extension("ledger.json"));
	}

	#[tokio::test(flavor = "current_thread")]
	async fn lock_waits_leave_the_runtime_responsive() {
		let path = temp_path("contended");
		let store = FileStore::open(&path).expect("File store should open.");
		let held = OpenOptions::new()
			.create(true)
			.truncate(false)
			.read(true)
			.write(true)
			.open(sidecar(&path, "lock"))
			.expect("Lock file should open.");

		held.lock().expect("Test should take the store lock first.");

		let pair = TokenPair::builder()
			.access_token("access-token")
			.expires_in(Duration::hours(1))
			.build()
			.expect("Token pair fixture should build.");
		let save = tokio::spawn(async move { store.save(CredentialRecord::new(pair), 0).await });

		tokio::time::sleep(std::time::Duration::from_millis(50)).await;

		assert!(!save.is_finished());

		drop(held);

		let outcome = save
			.await
			.expect("Save task should not panic.")
			.expect("Save should succeed once the lock is released.");

		assert_eq!(outcome, SaveOutcome::Saved { version: 1 });
		assert!(path.exists());

		cleanup(&path);
	}

	#[test]
	fn sidecars_keep_the_full_file_name() {
		let path = Path::new("/var/lib/alerts/token.json");

		assert_eq!(sidecar(path, "lock"), Path::new("/var/lib/alerts/token.json.lock"));
		assert_eq!(sidecar(path, "tmp"), Path::new("/var/lib/alerts/token.json.tmp"));
	}
}
