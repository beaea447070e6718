// std
use std::{env, fs, process};
// self
use brokerage_oauth::{
	_preludet::*,
	auth::TokenPair,
	config::Config,
	status::StatusReporter,
	store::{CredentialRecord, CredentialStore, FileStore, RefreshOutcome},
};

fn temp_location(tag: &str) -> PathBuf {
	env::temp_dir()
		.join(format!(
			"brokerage_oauth_status_{tag}_{}_{}",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos()
		))
		.join("token.json")
}

#[tokio::test]
async fn status_reads_the_configured_store_without_leaking_secrets() {
	let location = temp_location("file");
	let config = Config::from_lookup(|key| match key {
		"UPSTOX_CLIENT_ID" => Some("client-status".into()),
		"UPSTOX_CLIENT_SECRET" => Some("client-secret-value".into()),
		"CREDENTIAL_STORE_PATH" => Some(location.display().to_string()),
		_ => None,
	})
	.expect("Configuration should load.");
	let now = OffsetDateTime::now_utc();
	let pair = TokenPair::builder()
		.access_token("status-access-secret")
		.refresh_token("status-refresh-secret")
		.issued_at(now)
		.expires_in(Duration::hours(8))
		.build()
		.expect("Token pair fixture should build.");

	FileStore::open(&location)
		.expect("Store should open.")
		.save(CredentialRecord::new(pair).with_report(RefreshOutcome::Succeeded, now), 0)
		.await
		.expect("Seed save should succeed.");

	let report = StatusReporter::from_config(&config)
		.expect("Reporter should open the store.")
		.get_status()
		.await
		.expect("Status should load.");
	let json = serde_json::to_value(&report).expect("Report should serialize.");
	let text = json.to_string();

	assert_eq!(json["hasValidToken"], true);
	assert_eq!(json["lastRefreshOutcome"], "succeeded");
	assert!(json["expiresInSeconds"].as_i64().is_some_and(|secs| secs > 7 * 3_600));
	assert_eq!(json["configPresence"]["redirectUri"], false);
	assert_eq!(json["configPresence"]["credentialStoreLocation"], true);

	for secret in ["status-access-secret", "status-refresh-secret", "client-secret-value"] {
		assert!(!text.contains(secret));
	}

	if let Some(dir) = location.parent() {
		let _ = fs::remove_dir_all(dir);
	}
}

#[tokio::test]
async fn status_without_a_store_reports_missing_settings() {
	let report = StatusReporter::from_config(&Config::default())
		.expect("Reporter should build without a store.")
		.get_status()
		.await
		.expect("Status should load.");

	assert!(!report.has_valid_token);
	assert!(report.reauthorization_required);
	assert_eq!(report.last_refresh_outcome, RefreshOutcome::Never);
	assert!(report.config_presence.values().all(|present| !present));
}
