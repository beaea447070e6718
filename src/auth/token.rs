//! Token pair model, lifecycle classification, and builder.

// self
use crate::{_prelude::*, auth::secret::TokenSecret};

/// Longest lifetime accepted for a token pair, whether reported or assumed.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::days(10 * 365);

/// Lifecycle classification of a token pair at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
	/// Usable and outside the refresh skew window.
	Valid,
	/// Still usable but inside the refresh skew window.
	NearExpiry,
	/// `now >= expires_at`; must not be used.
	Expired,
}

/// Errors produced by [`TokenPairBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum TokenPairBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
	/// Issued when the expiry does not follow the issue instant.
	#[error("Token must expire after it is issued.")]
	ExpiryNotAfterIssue,
	/// Issued when the expiry cannot be represented as a calendar instant.
	#[error("Token expiry is out of range.")]
	ExpiryOutOfRange,
}

/// Access/refresh token pair issued by the brokerage.
///
/// Instants are persisted as whole epoch seconds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
	/// Access token secret.
	pub access_token: TokenSecret,
	/// Refresh token secret, if the brokerage issued one.
	#[serde(default)]
	pub refresh_token: Option<TokenSecret>,
	/// Issue instant.
	#[serde(with = "time::serde::timestamp")]
	pub issued_at: OffsetDateTime,
	/// Expiry instant; always after `issued_at`.
	#[serde(with = "time::serde::timestamp")]
	pub expires_at: OffsetDateTime,
	/// Scope string granted by the brokerage, if reported.
	#[serde(default)]
	pub scope: Option<String>,
}
impl TokenPair {
	/// Returns a builder.
	pub fn builder() -> TokenPairBuilder {
		TokenPairBuilder::default()
	}

	/// Classifies the pair at `now` using a refresh `skew`.
	pub fn state_at(&self, now: OffsetDateTime, skew: Duration) -> TokenState {
		if now >= self.expires_at {
			TokenState::Expired
		} else if self.expires_at - now <= skew {
			TokenState::NearExpiry
		} else {
			TokenState::Valid
		}
	}

	/// Returns `true` once `now >= expires_at`.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		now >= self.expires_at
	}

	/// Whole seconds until expiry, never negative.
	pub fn expires_in_at(&self, now: OffsetDateTime) -> i64 {
		(self.expires_at - now).whole_seconds().max(0)
	}

	/// Access token handed to collaborators.
	pub fn access(&self) -> AccessToken {
		AccessToken { secret: self.access_token.clone(), expires_at: self.expires_at }
	}
}
impl Debug for TokenPair {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenPair")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.field("scope", &self.scope)
			.finish()
	}
}

/// Access token plus its expiry, as handed to the monitoring job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessToken {
	/// Bearer value; redacted in `Debug`.
	pub secret: TokenSecret,
	/// Expiry instant.
	pub expires_at: OffsetDateTime,
}
impl AccessToken {
	/// Raw bearer value for the `Authorization` header.
	pub fn expose(&self) -> &str {
		self.secret.expose()
	}
}

/// Builder for [`TokenPair`].
#[derive(Clone, Debug, Default)]
pub struct TokenPairBuilder {
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
	scope: Option<String>,
}
impl TokenPairBuilder {
	/// Sets the issued-at instant.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides an already wrapped refresh token, if any.
	pub fn maybe_refresh_token(mut self, token: Option<TokenSecret>) -> Self {
		self.refresh_token = token;

		self
	}

	/// Sets the granted scope string.
	pub fn scope(mut self, scope: Option<String>) -> Self {
		self.scope = scope;

		self
	}

	/// Consumes the builder and produces a [`TokenPair`].
	///
	/// Instants are truncated to whole seconds so the pair survives a persistence round trip.
	pub fn build(self) -> Result<TokenPair, TokenPairBuilderError> {
		let access_token = self.access_token.ok_or(TokenPairBuilderError::MissingAccessToken)?;
		let issued_at = whole_seconds(self.issued_at.unwrap_or_else(OffsetDateTime::now_utc));
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => whole_seconds(instant),
			(None, Some(delta)) => issued_at
				.checked_add(Duration::seconds(delta.whole_seconds()))
				.ok_or(TokenPairBuilderError::ExpiryOutOfRange)?,
			(None, None) => return Err(TokenPairBuilderError::MissingExpiry),
		};

		if expires_at <= issued_at {
			return Err(TokenPairBuilderError::ExpiryNotAfterIssue);
		}

		Ok(TokenPair {
			access_token,
			refresh_token: self.refresh_token,
			issued_at,
			expires_at,
			scope: self.scope,
		})
	}
}

fn whole_seconds(instant: OffsetDateTime) -> OffsetDateTime {
	instant - Duration::nanoseconds(i64::from(instant.nanosecond()))
}
