//! Keeps a brokerage OAuth 2.0 access token alive for scheduled market monitors: CAS-guarded
//! refresh leases, replay-proof authorization callbacks, and secret-free status reporting.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod config;
pub mod error;
pub mod exchange;
pub mod ext;
pub mod flows;
pub mod http;
pub mod obs;
pub mod provider;
#[cfg(feature = "server")] pub mod server;
pub mod status;
pub mod store;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		config::Config,
		exchange::{RetryPolicy, TokenExchanger},
		flows::TokenLifecycleManager,
		http::ReqwestHttpClient,
		provider::{ClientAuthMethod, GrantType, ProviderDescriptor, ProviderId},
		store::{AuthorizationLedger, CredentialStore, MemoryLedger, MemoryStore},
	};

	/// Manager type alias used by reqwest-backed integration tests.
	pub type ReqwestTestManager = TokenLifecycleManager<ReqwestHttpClient>;

	/// Client identifier shared by test fixtures.
	pub const TEST_CLIENT_ID: &str = "client-it";
	/// Client secret shared by test fixtures.
	pub const TEST_CLIENT_SECRET: &str = "secret-it";
	/// Redirect URI shared by test fixtures.
	pub const TEST_REDIRECT_URI: &str = "https://alerts.example.com/auth";

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.timeout(std::time::Duration::from_millis(500))
			.redirect(reqwest::redirect::Policy::none())
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Builds a descriptor whose endpoints point at a mock server base URL.
	pub fn test_descriptor(base_url: &str) -> ProviderDescriptor {
		let base = base_url.trim_end_matches('/');

		ProviderDescriptor::builder(
			ProviderId::new("mock-brokerage").expect("Mock provider identifier should be valid."),
		)
		.authorization_endpoint(
			Url::parse(&format!("{base}/authorize"))
				.expect("Mock authorization endpoint should parse successfully."),
		)
		.token_endpoint(
			Url::parse(&format!("{base}/token")).expect("Mock token endpoint should parse."),
		)
		.support_grants([GrantType::AuthorizationCode, GrantType::RefreshToken])
		.preferred_client_auth_method(ClientAuthMethod::ClientSecretPost)
		.build()
		.expect("Mock provider descriptor should build successfully.")
	}

	/// Retry policy with millisecond delays so retry tests stay fast.
	pub fn fast_retry_policy() -> RetryPolicy {
		RetryPolicy::new(3, Duration::milliseconds(1), Duration::milliseconds(8))
	}

	/// Builds a configuration carrying every required setting, pointed at `base_url`.
	pub fn test_config(base_url: &str) -> Config {
		let mut config = Config::default()
			.with_client_id(TEST_CLIENT_ID)
			.with_client_secret(TEST_CLIENT_SECRET)
			.with_redirect_uri(TEST_REDIRECT_URI)
			.with_messaging_channel_target("-100200300");

		config.provider = Some(test_descriptor(base_url));
		config.retry = fast_retry_policy();

		config
	}

	/// Constructs a [`TokenLifecycleManager`] backed by in-memory stores and the reqwest transport
	/// used across integration tests.
	pub fn build_reqwest_test_manager(
		base_url: &str,
	) -> (ReqwestTestManager, Arc<MemoryStore>, Arc<MemoryLedger>) {
		let config = test_config(base_url);
		let store_backend = Arc::new(MemoryStore::default());
		let ledger_backend = Arc::new(MemoryLedger::default());
		let store: Arc<dyn CredentialStore> = store_backend.clone();
		let ledger: Arc<dyn AuthorizationLedger> = ledger_backend.clone();
		let exchanger = TokenExchanger::<ReqwestHttpClient>::from_config(
			&config,
			test_reqwest_http_client(),
			ledger,
		)
		.expect("Test configuration should yield a token exchanger.");
		let manager = TokenLifecycleManager::new(exchanger, store)
			.with_skew(config.refresh_skew)
			.with_poll_interval(Duration::milliseconds(5));

		(manager, store_backend, ledger_backend)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		path::{Path, PathBuf},
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use parking_lot::Mutex;
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(feature = "server")] use color_eyre as _;
#[cfg(test)] use httpmock as _;
