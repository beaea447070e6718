//! Process configuration assembled once at entry and passed down explicitly.
//!
//! Required settings are optional at construction time; accessors fail with
//! [`ConfigError::Missing`] at the point of first use so that a partially configured
//! process can still report which values are absent.

// std
use std::net::SocketAddr;
// self
use crate::{
	_prelude::*,
	auth::{MAX_TOKEN_LIFETIME, TokenSecret},
	error::ConfigError,
	exchange::RetryPolicy,
	provider::{ProviderDescriptor, ProviderQuirks},
};

/// Default skew applied before `expires_at` when deciding to refresh.
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::seconds(90);
/// Default strict timeout for token endpoint calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::seconds(10);
/// Default lifetime of an issued authorization `state`.
pub const DEFAULT_STATE_TTL: Duration = Duration::minutes(10);

/// Named settings that can be reported as present or missing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Setting {
	/// Brokerage application identifier.
	ClientId,
	/// Brokerage application secret.
	ClientSecret,
	/// Callback URL registered with the brokerage.
	RedirectUri,
	/// Location of the persisted credential record.
	CredentialStoreLocation,
	/// Chat/channel that receives alerts.
	MessagingChannelTarget,
}
impl Setting {
	/// Every reportable setting, in display order.
	pub const ALL: [Self; 5] = [
		Self::ClientId,
		Self::ClientSecret,
		Self::RedirectUri,
		Self::CredentialStoreLocation,
		Self::MessagingChannelTarget,
	];

	/// Primary environment key for the setting.
	pub const fn env_key(self) -> &'static str {
		match self {
			Self::ClientId => "UPSTOX_CLIENT_ID",
			Self::ClientSecret => "UPSTOX_CLIENT_SECRET",
			Self::RedirectUri => "UPSTOX_REDIRECT_URI",
			Self::CredentialStoreLocation => "CREDENTIAL_STORE_PATH",
			Self::MessagingChannelTarget => "TELEGRAM_CHAT_ID",
		}
	}

	/// Stable camelCase label used in status output.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::ClientId => "clientId",
			Self::ClientSecret => "clientSecret",
			Self::RedirectUri => "redirectUri",
			Self::CredentialStoreLocation => "credentialStoreLocation",
			Self::MessagingChannelTarget => "messagingChannelTarget",
		}
	}
}
impl Display for Setting {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Output format for the process-wide log subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
	/// Human-readable multi-line output.
	#[default]
	Pretty,
	/// One JSON object per event.
	Json,
}
impl FromStr for LogFormat {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"pretty" | "text" => Ok(Self::Pretty),
			"json" => Ok(Self::Json),
			other => Err(format!("unknown log format `{other}`")),
		}
	}
}

/// Explicit process configuration.
#[derive(Clone, Debug)]
pub struct Config {
	/// Brokerage application identifier.
	pub client_id: Option<String>,
	/// Brokerage application secret; redacted in `Debug`.
	pub client_secret: Option<TokenSecret>,
	/// Callback URL registered with the brokerage.
	pub redirect_uri: Option<String>,
	/// Location of the persisted credential record.
	pub credential_store_location: Option<PathBuf>,
	/// Chat/channel that receives alerts; only reported, never used here.
	pub messaging_channel_target: Option<String>,
	/// Descriptor override; the Upstox preset applies when unset.
	pub provider: Option<ProviderDescriptor>,
	/// Refresh this long before `expires_at`.
	pub refresh_skew: Duration,
	/// Strict timeout for each token endpoint call.
	pub request_timeout: Duration,
	/// Retry policy for refresh calls.
	pub retry: RetryPolicy,
	/// Lifetime of an issued authorization `state`.
	pub state_ttl: Duration,
	/// Address the HTTP endpoints bind to.
	pub bind_address: SocketAddr,
	/// Log output format.
	pub log_format: LogFormat,
}
impl Config {
	/// Reads the configuration from the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Reads the configuration through an arbitrary key lookup.
	///
	/// Blank values count as absent. Malformed optional values fail immediately.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
		let mut config = Self::default();

		config.client_id = get(Setting::ClientId.env_key()).or_else(|| get("UPSTOX_API_KEY"));
		config.client_secret = get(Setting::ClientSecret.env_key()).map(TokenSecret::new);
		config.redirect_uri = get(Setting::RedirectUri.env_key());
		config.credential_store_location =
			get(Setting::CredentialStoreLocation.env_key()).map(PathBuf::from);
		config.messaging_channel_target = get(Setting::MessagingChannelTarget.env_key());

		if let Some(skew) = get("TOKEN_REFRESH_SKEW_SECS") {
			config.refresh_skew = parse_secs("TOKEN_REFRESH_SKEW_SECS", &skew, true)?;
		}
		if let Some(timeout) = get("TOKEN_REQUEST_TIMEOUT_SECS") {
			config.request_timeout = parse_secs("TOKEN_REQUEST_TIMEOUT_SECS", &timeout, false)?;
		}
		if let Some(addr) = get("BIND_ADDRESS") {
			config.bind_address = addr.parse().map_err(|e: std::net::AddrParseError| {
				ConfigError::InvalidSetting { key: "BIND_ADDRESS", reason: e.to_string() }
			})?;
		}
		if let Some(format) = get("LOG_FORMAT") {
			config.log_format = format
				.parse()
				.map_err(|reason| ConfigError::InvalidSetting { key: "LOG_FORMAT", reason })?;
		}

		let authorization = get("UPSTOX_AUTHORIZATION_URL");
		let token = get("UPSTOX_TOKEN_URL");
		let fallback = get("TOKEN_FALLBACK_LIFETIME_SECS")
			.map(|v| parse_secs("TOKEN_FALLBACK_LIFETIME_SECS", &v, false))
			.transpose()?;

		if authorization.is_some() || token.is_some() || fallback.is_some() {
			let mut builder = ProviderDescriptor::upstox_builder()?;

			if let Some(raw) = authorization {
				builder =
					builder.authorization_endpoint(parse_url("UPSTOX_AUTHORIZATION_URL", &raw)?);
			}
			if let Some(raw) = token {
				builder = builder.token_endpoint(parse_url("UPSTOX_TOKEN_URL", &raw)?);
			}
			if let Some(lifetime) = fallback {
				builder = builder
					.quirks(ProviderQuirks { fallback_token_lifetime: Some(lifetime) });
			}

			config.provider = Some(builder.build()?);
		}

		Ok(config)
	}

	/// Sets the client identifier.
	pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
		self.client_id = Some(client_id.into());

		self
	}

	/// Sets the client secret.
	pub fn with_client_secret(mut self, client_secret: impl Into<String>) -> Self {
		self.client_secret = Some(TokenSecret::new(client_secret));

		self
	}

	/// Sets the redirect URI.
	pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
		self.redirect_uri = Some(redirect_uri.into());

		self
	}

	/// Sets the credential store location.
	pub fn with_credential_store_location(mut self, location: impl Into<PathBuf>) -> Self {
		self.credential_store_location = Some(location.into());

		self
	}

	/// Sets the messaging channel target.
	pub fn with_messaging_channel_target(mut self, target: impl Into<String>) -> Self {
		self.messaging_channel_target = Some(target.into());

		self
	}

	/// Client identifier, or [`ConfigError::Missing`].
	pub fn client_id(&self) -> Result<&str, ConfigError> {
		require(self.client_id.as_deref(), Setting::ClientId)
	}

	/// Client secret, or [`ConfigError::Missing`].
	pub fn client_secret(&self) -> Result<&TokenSecret, ConfigError> {
		self.client_secret
			.as_ref()
			.ok_or(ConfigError::Missing { setting: Setting::ClientSecret })
	}

	/// Redirect URI parsed as a URL, or [`ConfigError`] when absent or malformed.
	pub fn redirect_uri(&self) -> Result<Url, ConfigError> {
		let raw = require(self.redirect_uri.as_deref(), Setting::RedirectUri)?;

		Url::parse(raw).map_err(|source| ConfigError::InvalidRedirect { source })
	}

	/// Credential store location, or [`ConfigError::Missing`].
	pub fn credential_store_location(&self) -> Result<&Path, ConfigError> {
		self.credential_store_location
			.as_deref()
			.ok_or(ConfigError::Missing { setting: Setting::CredentialStoreLocation })
	}

	/// Messaging channel target, or [`ConfigError::Missing`].
	pub fn messaging_channel_target(&self) -> Result<&str, ConfigError> {
		require(self.messaging_channel_target.as_deref(), Setting::MessagingChannelTarget)
	}

	/// Provider descriptor in effect (override or the Upstox preset).
	pub fn descriptor(&self) -> Result<ProviderDescriptor, ConfigError> {
		match &self.provider {
			Some(descriptor) => Ok(descriptor.clone()),
			None => Ok(ProviderDescriptor::upstox()?),
		}
	}

	/// Presence map keyed by camelCase setting name; never carries values.
	pub fn presence(&self) -> BTreeMap<&'static str, bool> {
		Setting::ALL
			.into_iter()
			.map(|setting| {
				let present = match setting {
					Setting::ClientId => self.client_id.is_some(),
					Setting::ClientSecret => self.client_secret.is_some(),
					Setting::RedirectUri => self.redirect_uri.is_some(),
					Setting::CredentialStoreLocation => self.credential_store_location.is_some(),
					Setting::MessagingChannelTarget => self.messaging_channel_target.is_some(),
				};

				(setting.as_str(), present)
			})
			.collect()
	}
}
impl Default for Config {
	fn default() -> Self {
		Self {
			client_id: None,
			client_secret: None,
			redirect_uri: None,
			credential_store_location: None,
			messaging_channel_target: None,
			provider: None,
			refresh_skew: DEFAULT_REFRESH_SKEW,
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
			retry: RetryPolicy::default(),
			state_ttl: DEFAULT_STATE_TTL,
			bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
			log_format: LogFormat::default(),
		}
	}
}

fn require(value: Option<&str>, setting: Setting) -> Result<&str, ConfigError> {
	value.ok_or(ConfigError::Missing { setting })
}

fn parse_secs(key: &'static str, raw: &str, allow_zero: bool) -> Result<Duration, ConfigError> {
	let secs = raw.parse::<i64>().map_err(|e| ConfigError::InvalidSetting {
		key,
		reason: format!("expected whole seconds ({e})"),
	})?;

	if secs < 0 || (secs == 0 && !allow_zero) || secs > MAX_TOKEN_LIFETIME.whole_seconds() {
		return Err(ConfigError::InvalidSetting {
			key,
			reason: format!("{secs} is out of range"),
		});
	}

	Ok(Duration::seconds(secs))
}

fn parse_url(key: &'static str, raw: &str) -> Result<Url, ConfigError> {
	Url::parse(raw).map_err(|e| ConfigError::InvalidSetting { key, reason: e.to_string() })
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let map = pairs
			.iter()
			.map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
			.collect::<HashMap<_, _>>();

		move |key| map.get(key).cloned()
	}

	#[test]
	fn defaults_apply_when_environment_is_empty() {
		let config = Config::from_lookup(|_| None).expect("Empty environment should parse.");

		assert_eq!(config.refresh_skew, Duration::seconds(90));
		assert_eq!(config.request_timeout, Duration::seconds(10));
		assert_eq!(config.state_ttl, Duration::minutes(10));
		assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
		assert!(config.presence().values().all(|present| !present));
		assert!(matches!(
			config.client_id(),
			Err(ConfigError::Missing { setting: Setting::ClientId })
		));
	}

	#[test]
	fn reads_settings_and_alias() {
		let config = Config::from_lookup(lookup_from(&[
			("UPSTOX_API_KEY", "alias-id"),
			("UPSTOX_CLIENT_SECRET", "shh"),
			("UPSTOX_REDIRECT_URI", "https://alerts.example.com/auth"),
			("CREDENTIAL_STORE_PATH", "/var/lib/alerts/token.json"),
			("TELEGRAM_CHAT_ID", "  "),
			("TOKEN_REFRESH_SKEW_SECS", "120"),
			("LOG_FORMAT", "json"),
		]))
		.expect("Valid environment should parse.");

		assert_eq!(config.client_id().expect("Client id should be present."), "alias-id");
		assert_eq!(config.client_secret().expect("Secret should be present.").expose(), "shh");
		assert_eq!(config.refresh_skew, Duration::seconds(120));
		assert_eq!(config.log_format, LogFormat::Json);
		assert!(!format!("{config:?}").contains("shh"));

		let presence = config.presence();

		assert_eq!(presence.get("clientId"), Some(&true));
		assert_eq!(presence.get("messagingChannelTarget"), Some(&false));
	}

	#[test]
	fn malformed_optional_values_fail_immediately() {
		let err = Config::from_lookup(lookup_from(&[("TOKEN_REQUEST_TIMEOUT_SECS", "soon")]))
			.expect_err("Non-numeric timeout should be rejected.");

		assert!(matches!(
			err,
			ConfigError::InvalidSetting { key: "TOKEN_REQUEST_TIMEOUT_SECS", .. }
		));

		let err = Config::from_lookup(lookup_from(&[("BIND_ADDRESS", "nowhere")]))
			.expect_err("Malformed bind address should be rejected.");

		assert!(matches!(err, ConfigError::InvalidSetting { key: "BIND_ADDRESS", .. }));
	}

	#[test]
	fn lifetimes_beyond_the_token_cap_are_rejected() {
		let err = Config::from_lookup(lookup_from(&[(
			"TOKEN_FALLBACK_LIFETIME_SECS",
			"9000000000000",
		)]))
		.expect_err("Oversized fallback lifetime should be rejected.");

		assert!(matches!(
			err,
			ConfigError::InvalidSetting { key: "TOKEN_FALLBACK_LIFETIME_SECS", .. }
		));

		let cap = MAX_TOKEN_LIFETIME.whole_seconds().to_string();
		let config =
			Config::from_lookup(lookup_from(&[("TOKEN_FALLBACK_LIFETIME_SECS", cap.as_str())]))
				.expect("Fallback lifetime at the cap should load.");

		assert_eq!(
			config.descriptor().expect("Descriptor should resolve.").quirks.fallback_token_lifetime,
			Some(MAX_TOKEN_LIFETIME)
		);

		let err = Config::from_lookup(lookup_from(&[("TOKEN_REFRESH_SKEW_SECS", "-1")]))
			.expect_err("Negative skew should be rejected.");

		assert!(matches!(err, ConfigError::InvalidSetting { key: "TOKEN_REFRESH_SKEW_SECS", .. }));
	}

	#[test]
	fn endpoint_overrides_rebuild_the_descriptor() {
		let config = Config::from_lookup(lookup_from(&[
			("UPSTOX_TOKEN_URL", "https://sandbox.example.com/token"),
			("TOKEN_FALLBACK_LIFETIME_SECS", "3600"),
		]))
		.expect("Endpoint overrides should parse.");
		let descriptor = config.descriptor().expect("Descriptor should resolve.");

		assert_eq!(descriptor.endpoints.token.as_str(), "https://sandbox.example.com/token");
		assert_eq!(descriptor.quirks.fallback_token_lifetime, Some(Duration::hours(1)));
		assert_eq!(
			descriptor.endpoints.authorization.as_str(),
			ProviderDescriptor::upstox()
				.expect("Preset should build.")
				.endpoints
				.authorization
				.as_str()
		);
	}
}
