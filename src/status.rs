//! Secret-free health snapshot of the stored credential and configuration.

// self
use crate::{
	_prelude::*,
	auth::TokenState,
	config::Config,
	store::{CredentialStore, FileStore, RefreshOutcome},
};

/// Serializable status snapshot; contains no token values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
	/// `true` when a non-rejected, unexpired access token is stored.
	pub has_valid_token: bool,
	/// Seconds until the stored access token expires; `None` without a record.
	pub expires_in_seconds: Option<i64>,
	/// Lifecycle classification of the stored pair.
	pub token_state: Option<TokenState>,
	/// Outcome of the latest acquisition or refresh.
	pub last_refresh_outcome: RefreshOutcome,
	/// When the latest outcome was recorded.
	#[serde(with = "time::serde::rfc3339::option")]
	pub last_refresh_at: Option<OffsetDateTime>,
	/// `true` once a human must run the consent flow again.
	pub reauthorization_required: bool,
	/// `true` while another invocation holds a live refresh lease.
	pub refresh_in_progress: bool,
	/// Presence flag for every required setting, keyed by camelCase name.
	pub config_presence: BTreeMap<&'static str, bool>,
	/// Snapshot instant.
	#[serde(with = "time::serde::rfc3339")]
	pub generated_at: OffsetDateTime,
}

/// Reads the credential record and configuration presence without mutating either.
#[derive(Clone)]
pub struct StatusReporter {
	presence: BTreeMap<&'static str, bool>,
	skew: Duration,
	store: Option<Arc<dyn CredentialStore>>,
}
impl StatusReporter {
	/// Creates a reporter without a store; every report says no token is held.
	pub fn new(config: &Config) -> Self {
		Self { presence: config.presence(), skew: config.refresh_skew, store: None }
	}

	/// Opens the file store named by `config` when the location is configured.
	pub fn from_config(config: &Config) -> Result<Self> {
		let reporter = Self::new(config);

		match config.credential_store_location() {
			Ok(location) => Ok(reporter.with_store(Arc::new(FileStore::open(location)?))),
			Err(_) => Ok(reporter),
		}
	}

	/// Attaches the store to read from.
	pub fn with_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
		self.store = Some(store);

		self
	}

	/// Builds a report for the current instant.
	pub async fn get_status(&self) -> Result<StatusReport> {
		self.get_status_at(OffsetDateTime::now_utc()).await
	}

	/// Builds a report as seen at `now`.
	pub async fn get_status_at(&self, now: OffsetDateTime) -> Result<StatusReport> {
		let record = match &self.store {
			Some(store) => store.load().await?,
			None => None,
		};
		let mut report = StatusReport {
			has_valid_token: false,
			expires_in_seconds: None,
			token_state: None,
			last_refresh_outcome: RefreshOutcome::Never,
			last_refresh_at: None,
			reauthorization_required: true,
			refresh_in_progress: false,
			config_presence: self.presence.clone(),
			generated_at: now,
		};

		let Some(record) = record else {
			return Ok(report);
		};
		let state = record.pair.state_at(now, self.skew);
		let rejected = record.is_rejected();

		report.has_valid_token = !rejected && state != TokenState::Expired;
		report.expires_in_seconds = Some(record.pair.expires_in_at(now));
		report.token_state = Some(state);
		report.last_refresh_outcome = record.last_outcome();
		report.last_refresh_at = record.last_refresh.map(|r| r.at);
		report.reauthorization_required = rejected
			|| (state == TokenState::Expired && record.pair.refresh_token.is_none());
		report.refresh_in_progress =
			record.refresh_lease.as_ref().is_some_and(|lease| lease.expires_at > now);

		Ok(report)
	}
}
impl Debug for StatusReporter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("StatusReporter")
			.field("presence", &self.presence)
			.field("skew", &self.skew)
			.field("has_store", &self.store.is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{
		auth::TokenPair,
		store::{CredentialRecord, MemoryStore, RefreshLease},
	};

	const NOW: OffsetDateTime = macros::datetime!(2025-03-01 09:00 UTC);

	fn record(expires_in: Duration) -> CredentialRecord {
		CredentialRecord::new(
			TokenPair::builder()
				.access_token("access-secret-value")
				.refresh_token("refresh-secret-value")
				.issued_at(NOW - Duration::minutes(5))
				.expires_in(expires_in + Duration::minutes(5))
				.build()
				.expect("Token pair fixture should build."),
		)
	}

	fn reporter(record: Option<CredentialRecord>) -> StatusReporter {
		let config = Config::default().with_client_id("client").with_client_secret("secret");
		let store = match record {
			Some(record) => MemoryStore::with_record(record),
			None => MemoryStore::default(),
		};

		StatusReporter::new(&config).with_store(Arc::new(store))
	}

	#[tokio::test]
	async fn empty_store_reports_reauthorization() {
		let report = reporter(None).get_status_at(NOW).await.expect("Status should load.");

		assert!(!report.has_valid_token);
		assert!(report.reauthorization_required);
		assert_eq!(report.expires_in_seconds, None);
		assert_eq!(report.last_refresh_outcome, RefreshOutcome::Never);
		assert_eq!(report.config_presence.get("clientId"), Some(&true));
		assert_eq!(report.config_presence.get("redirectUri"), Some(&false));
	}

	#[tokio::test]
	async fn valid_record_is_summarised() {
		let stored = record(Duration::hours(1)).with_report(RefreshOutcome::Authorized, NOW);
		let report = reporter(Some(stored)).get_status_at(NOW).await.expect("Status should load.");

		assert!(report.has_valid_token);
		assert!(!report.reauthorization_required);
		assert_eq!(report.expires_in_seconds, Some(3_600));
		assert_eq!(report.token_state, Some(TokenState::Valid));
		assert_eq!(report.last_refresh_outcome, RefreshOutcome::Authorized);
		assert_eq!(report.last_refresh_at, Some(NOW));
	}

	#[tokio::test]
	async fn rejected_record_is_not_valid() {
		let mut stored = record(Duration::hours(1)).with_report(RefreshOutcome::Rejected, NOW);

		stored.rejected_at = Some(NOW);

		let report = reporter(Some(stored)).get_status_at(NOW).await.expect("Status should load.");

		assert!(!report.has_valid_token);
		assert!(report.reauthorization_required);
		assert_eq!(report.last_refresh_outcome, RefreshOutcome::Rejected);
	}

	#[tokio::test]
	async fn live_lease_is_reported() {
		let mut stored = record(Duration::seconds(30));

		stored.refresh_lease =
			Some(RefreshLease { holder: "other".into(), expires_at: NOW + Duration::minutes(1) });

		let report = reporter(Some(stored)).get_status_at(NOW).await.expect("Status should load.");

		assert!(report.refresh_in_progress);
		assert_eq!(report.token_state, Some(TokenState::NearExpiry));
		assert!(report.has_valid_token);
	}

	#[tokio::test]
	async fn serialized_report_never_contains_secrets() {
		let stored = record(Duration::hours(1)).with_report(RefreshOutcome::Succeeded, NOW);
		let report = reporter(Some(stored)).get_status_at(NOW).await.expect("Status should load.");
		let json = serde_json::to_string(&report).expect("Report should serialize.");

		assert!(json.contains("\"hasValidToken\":true"));
		assert!(json.contains("\"lastRefreshOutcome\":\"succeeded\""));
		assert!(!json.contains("access-secret-value"));
		assert!(!json.contains("refresh-secret-value"));
		assert!(!json.contains("\"secret\""));
	}
}
