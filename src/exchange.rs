//! Token endpoint client for the authorization code and refresh token grants.
//!
//! [`TokenExchanger`] owns everything a token call needs: the provider descriptor, client
//! credentials, the transport, the error strategy, and the authorization ledger used to reject
//! replayed callbacks. Code exchange is single-attempt because a retried POST could replay a
//! code the brokerage already consumed; refresh goes through the [`RetryPolicy`].

pub mod retry;

pub use retry::RetryPolicy;

// self
use crate::{
	_prelude::*,
	auth::{MAX_TOKEN_LIFETIME, TokenPair, TokenSecret, nonce},
	config::{Config, Setting},
	error::{ConfigError, TransientError},
	http::{TokenHttpClient, TokenReply, TokenRequest},
	obs::{self, FlowKind},
	provider::{
		ClientAuthMethod, DefaultProviderStrategy, GrantType, ProviderDescriptor,
		ProviderErrorContext, ProviderErrorKind, ProviderStrategy,
	},
	store::{AuthorizationLedger, CodeClaim, StateCheck},
};

/// Exchanges authorization codes and refresh tokens for [`TokenPair`]s.
pub struct TokenExchanger<C>
where
	C: ?Sized + TokenHttpClient,
{
	http_client: Arc<C>,
	descriptor: ProviderDescriptor,
	strategy: Arc<dyn ProviderStrategy>,
	ledger: Arc<dyn AuthorizationLedger>,
	client_id: String,
	client_secret: TokenSecret,
	redirect_uri: Option<Url>,
	retry: RetryPolicy,
}
impl<C> TokenExchanger<C>
where
	C: ?Sized + TokenHttpClient,
{
	/// Creates an exchanger with the default strategy and retry policy and no redirect URI.
	pub fn new(
		descriptor: ProviderDescriptor,
		client_id: impl Into<String>,
		client_secret: TokenSecret,
		http_client: impl Into<Arc<C>>,
		ledger: Arc<dyn AuthorizationLedger>,
	) -> Self {
		Self {
			http_client: http_client.into(),
			descriptor,
			strategy: Arc::new(DefaultProviderStrategy),
			ledger,
			client_id: client_id.into(),
			client_secret,
			redirect_uri: None,
			retry: RetryPolicy::default(),
		}
	}

	/// Builds an exchanger from process configuration.
	///
	/// Client credentials are required here. The redirect URI is only needed by
	/// [`TokenExchanger::exchange_code`], so an absent one fails there instead; a malformed one
	/// fails immediately.
	pub fn from_config(
		config: &Config,
		http_client: impl Into<Arc<C>>,
		ledger: Arc<dyn AuthorizationLedger>,
	) -> Result<Self, ConfigError> {
		let redirect_uri = match config.redirect_uri() {
			Ok(url) => Some(url),
			Err(ConfigError::Missing { .. }) => None,
			Err(e) => return Err(e),
		};
		let mut exchanger = Self::new(
			config.descriptor()?,
			config.client_id()?,
			config.client_secret()?.clone(),
			http_client,
			ledger,
		)
		.with_retry_policy(config.retry);

		exchanger.redirect_uri = redirect_uri;

		Ok(exchanger)
	}

	/// Sets the redirect URI sent with code exchanges.
	pub fn with_redirect_uri(mut self, redirect_uri: Url) -> Self {
		self.redirect_uri = Some(redirect_uri);

		self
	}

	/// Replaces the error classification strategy.
	pub fn with_strategy(mut self, strategy: Arc<dyn ProviderStrategy>) -> Self {
		self.strategy = strategy;

		self
	}

	/// Replaces the retry policy used for refreshes.
	pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Descriptor in use.
	pub fn descriptor(&self) -> &ProviderDescriptor {
		&self.descriptor
	}

	/// Ledger shared with the authorization initiator.
	pub fn ledger(&self) -> &Arc<dyn AuthorizationLedger> {
		&self.ledger
	}

	/// Exchanges a one-time authorization `code` returned with `state`.
	///
	/// The code is checked against the ledger before anything else, so a replayed callback
	/// fails with [`Error::CredentialRejected`] without contacting the brokerage. The `state`
	/// must have been issued by [`crate::flows::AuthorizationInitiator`], still be inside its
	/// window, and not have been used before; otherwise [`Error::InvalidState`].
	pub async fn exchange_code(&self, code: &str, state: &str) -> Result<TokenPair> {
		obs::observe(FlowKind::Exchange, "exchange_code", async move {
			self.ensure_supported(GrantType::AuthorizationCode)?;

			let redirect_uri = self
				.redirect_uri
				.as_ref()
				.ok_or(ConfigError::Missing { setting: Setting::RedirectUri })?;
			let code = code.trim();

			if code.is_empty() {
				return Err(Error::CredentialRejected {
					reason: "authorization code is empty".into(),
				});
			}

			let now = OffsetDateTime::now_utc();
			let code_digest = nonce::fingerprint(code);

			if self.ledger.is_code_used(&code_digest, now).await? {
				return Err(replayed_code());
			}

			self.consume_state(state, now).await?;

			if self.ledger.claim_code(&code_digest, now).await? == CodeClaim::AlreadyUsed {
				return Err(replayed_code());
			}

			let form = vec![
				("grant_type".to_owned(), GrantType::AuthorizationCode.as_str().to_owned()),
				("code".to_owned(), code.to_owned()),
				("redirect_uri".to_owned(), redirect_uri.to_string()),
			];
			let pair = self.send(GrantType::AuthorizationCode, form).await?;

			tracing::info!(
				has_refresh_token = pair.refresh_token.is_some(),
				expires_at = pair.expires_at.unix_timestamp(),
				"Authorization code exchanged."
			);

			Ok(pair)
		})
		.await
	}

	/// Obtains a new pair with `refresh_token`, retrying transient failures.
	///
	/// When the brokerage does not rotate the refresh token, the returned pair keeps the one
	/// passed in.
	pub async fn refresh(&self, refresh_token: &TokenSecret) -> Result<TokenPair> {
		obs::observe(FlowKind::Refresh, "refresh_token", async move {
			self.ensure_supported(GrantType::RefreshToken)?;

			if refresh_token.is_empty() {
				return Err(Error::ReauthorizationRequired {
					reason: "stored refresh token is empty".into(),
				});
			}

			let mut pair = self
				.retry
				.run(|attempt| {
					let form = vec![
						("grant_type".to_owned(), GrantType::RefreshToken.as_str().to_owned()),
						("refresh_token".to_owned(), refresh_token.expose().to_owned()),
					];

					tracing::debug!(attempt, "Calling token endpoint with refresh grant.");

					self.send(GrantType::RefreshToken, form)
				})
				.await?;

			if pair.refresh_token.is_none() {
				pair.refresh_token = Some(refresh_token.clone());
			}

			Ok(pair)
		})
		.await
	}

	async fn consume_state(&self, state: &str, now: OffsetDateTime) -> Result<()> {
		if state.is_empty() {
			return Err(Error::InvalidState { reason: "callback carried no state".into() });
		}

		match self.ledger.consume_state(&nonce::fingerprint(state), now).await? {
			StateCheck::Accepted => Ok(()),
			StateCheck::Unknown => Err(Error::InvalidState {
				reason: "state was not issued here or was already used".into(),
			}),
			StateCheck::Expired => Err(Error::InvalidState { reason: "state has expired".into() }),
		}
	}

	async fn send(&self, grant: GrantType, mut form: Vec<(String, String)>) -> Result<TokenPair> {
		let basic_auth = match self.descriptor.preferred_client_auth_method {
			ClientAuthMethod::ClientSecretPost => {
				form.push(("client_id".to_owned(), self.client_id.clone()));
				form.push(("client_secret".to_owned(), self.client_secret.expose().to_owned()));

				None
			},
			ClientAuthMethod::ClientSecretBasic =>
				Some((self.client_id.clone(), self.client_secret.clone())),
		};

		self.strategy.augment_token_request(grant, &mut form);

		let issued_at = OffsetDateTime::now_utc();
		let request =
			TokenRequest { url: self.descriptor.endpoints.token.clone(), form, basic_auth };
		let reply = self.http_client.post_form(request).await?;

		if !reply.is_success() {
			return Err(self.map_failure(grant, &reply));
		}

		self.parse_pair(grant, &reply, issued_at)
	}

	fn parse_pair(
		&self,
		grant: GrantType,
		reply: &TokenReply,
		issued_at: OffsetDateTime,
	) -> Result<TokenPair> {
		let status = reply.metadata.status;
		let mut deserializer = serde_json::Deserializer::from_str(&reply.body);
		let body: TokenResponseBody = serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|source| TransientError::TokenResponseParse { source, status: Some(status) })?;
		let Some(access_token) = body.access_token.filter(|token| !token.is_empty()) else {
			if body.error.is_some() {
				return Err(self.map_failure(grant, reply));
			}

			return Err(TransientError::TokenEndpoint {
				message: "success response carried no access_token".into(),
				status: Some(status),
				retry_after: None,
			}
			.into());
		};
		let lifetime = match body.expires_in {
			Some(raw) => raw.lifetime(status)?,
			None => self
				.descriptor
				.quirks
				.fallback_token_lifetime
				.ok_or(ConfigError::MissingExpiresIn)?,
		};

		TokenPair::builder()
			.access_token(access_token)
			.maybe_refresh_token(
				body.refresh_token.filter(|token| !token.is_empty()).map(TokenSecret::new),
			)
			.scope(body.scope)
			.issued_at(issued_at)
			.expires_in(lifetime)
			.build()
			.map_err(|e| ConfigError::from(e).into())
	}

	fn map_failure(&self, grant: GrantType, reply: &TokenReply) -> Error {
		let status = reply.metadata.status;
		let mut ctx = ProviderErrorContext::new(grant).with_http_status(status);

		match serde_json::from_str::<ErrorResponseBody>(&reply.body) {
			Ok(body) => {
				let first = body.errors.into_iter().next();

				if let Some(error) =
					body.error.or_else(|| first.as_ref().and_then(|item| item.error_code.clone()))
				{
					ctx = ctx.with_oauth_error(error);
				}
				if let Some(description) = body
					.error_description
					.or(body.message)
					.or_else(|| first.and_then(|item| item.message))
				{
					ctx = ctx.with_error_description(description);
				}
			},
			Err(_) if !reply.body.trim().is_empty() => {
				ctx = ctx.with_body_preview(reply.body.clone());
			},
			Err(_) => {},
		}

		let kind = self.strategy.classify_token_error(&ctx);
		let reason = ctx.reason();

		tracing::debug!(
			grant = grant.as_str(),
			status,
			?kind,
			"Token endpoint refused the request."
		);

		match kind {
			ProviderErrorKind::CredentialRejected => Error::CredentialRejected { reason },
			ProviderErrorKind::InvalidClient => ConfigError::ClientRejected { reason }.into(),
			ProviderErrorKind::MalformedRequest => ConfigError::RequestRejected { reason }.into(),
			ProviderErrorKind::Transient => TransientError::TokenEndpoint {
				message: reason,
				status: Some(status),
				retry_after: reply.metadata.retry_after,
			}
			.into(),
		}
	}

	fn ensure_supported(&self, grant: GrantType) -> Result<()> {
		if self.descriptor.supports(grant) {
			Ok(())
		} else {
			Err(ConfigError::UnsupportedGrant {
				descriptor: self.descriptor.id.to_string(),
				grant: grant.as_str(),
			}
			.into())
		}
	}
}
impl<C> Debug for TokenExchanger<C>
where
	C: ?Sized + TokenHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenExchanger")
			.field("descriptor", &self.descriptor.id)
			.field("client_id", &self.client_id)
			.field("redirect_uri", &self.redirect_uri.as_ref().map(Url::as_str))
			.field("retry", &self.retry)
			.finish()
	}
}

#[derive(Deserialize)]
struct TokenResponseBody {
	#[serde(default)]
	access_token: Option<String>,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	expires_in: Option<ExpiresIn>,
	#[serde(default)]
	scope: Option<String>,
	#[serde(default)]
	error: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
	Seconds(i64),
	Text(String),
}
impl ExpiresIn {
	fn lifetime(self, status: u16) -> Result<Duration> {
		let secs = match self {
			Self::Seconds(secs) => secs,
			Self::Text(text) => text.trim().parse::<i64>().map_err(|_| {
				TransientError::TokenEndpoint {
					message: "expires_in is not an integer".into(),
					status: Some(status),
					retry_after: None,
				}
			})?,
		};

		if secs <= 0 {
			return Err(ConfigError::NonPositiveExpiresIn.into());
		}
		if secs > MAX_TOKEN_LIFETIME.whole_seconds() {
			return Err(ConfigError::ExpiresInOutOfRange.into());
		}

		Ok(Duration::seconds(secs))
	}
}

#[derive(Deserialize)]
struct ErrorResponseBody {
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	error_description: Option<String>,
	#[serde(default)]
	message: Option<String>,
	#[serde(default)]
	errors: Vec<ErrorItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorItem {
	#[serde(default)]
	error_code: Option<String>,
	#[serde(default)]
	message: Option<String>,
}

fn replayed_code() -> Error {
	Error::CredentialRejected { reason: "authorization code was already exchanged".into() }
}
