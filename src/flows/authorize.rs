//! Consent URL construction for the one-time human authorization step.

// self
use crate::{
	_prelude::*,
	auth::nonce,
	config::Config,
	error::ConfigError,
	obs::{self, FlowKind},
	provider::GrantType,
	store::AuthorizationLedger,
};

/// Issued authorization request; `url` is what the operator opens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationRequest {
	/// Client identifier embedded in the URL.
	pub client_id: String,
	/// Redirect target embedded in the URL.
	pub redirect_uri: Url,
	/// Always `code`.
	pub response_type: &'static str,
	/// Single-use nonce the brokerage echoes back.
	pub state: String,
	/// Instant after which the callback's `state` is refused.
	pub expires_at: OffsetDateTime,
	/// Fully assembled authorization dialog URL.
	pub url: Url,
}

/// Builds consent URLs and records the issued `state` in the ledger.
#[derive(Clone)]
pub struct AuthorizationInitiator {
	ledger: Arc<dyn AuthorizationLedger>,
}
impl AuthorizationInitiator {
	/// Creates an initiator writing issued states to `ledger`.
	pub fn new(ledger: Arc<dyn AuthorizationLedger>) -> Self {
		Self { ledger }
	}

	/// Builds the authorization dialog URL for `config`.
	///
	/// Fails with [`ConfigError::Missing`] when the client identifier or redirect URI is absent.
	/// The fresh `state` is recorded with an expiry of `config.state_ttl`.
	pub async fn build_authorization_url(&self, config: &Config) -> Result<AuthorizationRequest> {
		obs::observe(FlowKind::Authorization, "build_authorization_url", async move {
			let client_id = config.client_id()?.to_owned();
			let redirect_uri = config.redirect_uri()?;
			let descriptor = config.descriptor()?;

			if !descriptor.supports(GrantType::AuthorizationCode) {
				return Err(ConfigError::UnsupportedGrant {
					descriptor: descriptor.id.to_string(),
					grant: GrantType::AuthorizationCode.as_str(),
				}
				.into());
			}

			let state = nonce::generate_state();
			let expires_at = OffsetDateTime::now_utc() + config.state_ttl;

			self.ledger.record_state(&nonce::fingerprint(&state), expires_at).await?;

			let mut url = descriptor.endpoints.authorization.clone();

			url.query_pairs_mut()
				.append_pair("response_type", "code")
				.append_pair("client_id", &client_id)
				.append_pair("redirect_uri", redirect_uri.as_str())
				.append_pair("state", &state);

			tracing::info!(
				state_ttl_secs = config.state_ttl.whole_seconds(),
				"Authorization URL issued."
			);

			Ok(AuthorizationRequest {
				client_id,
				redirect_uri,
				response_type: "code",
				state,
				expires_at,
				url,
			})
		})
		.await
	}
}
impl Debug for AuthorizationInitiator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("AuthorizationInitiator")
	}
}
