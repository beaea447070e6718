//! Crate-level error types shared across flows, providers, and stores.

// self
use crate::{_prelude::*, config::Setting};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem; the operator must fix the environment.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),

	/// Authorization callback carried an unknown, expired, or already-used `state`.
	#[error("Authorization state is invalid: {reason}.")]
	InvalidState {
		/// Why the callback was refused.
		reason: String,
	},
	/// Brokerage rejected the grant (code reused/expired or refresh token revoked).
	#[error("Brokerage rejected the credential: {reason}.")]
	CredentialRejected {
		/// Provider- or crate-supplied reason string.
		reason: String,
	},
	/// No usable credential exists; a human must complete the authorization flow again.
	#[error("Re-authorization required: {reason}.")]
	ReauthorizationRequired {
		/// Why the automated path cannot continue.
		reason: String,
	},
}
impl Error {
	/// Returns `true` when retrying the same operation may succeed.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Transient(_))
	}

	/// Returns `true` when only the human consent step can recover from this error.
	pub fn requires_reauthorization(&self) -> bool {
		matches!(self, Self::CredentialRejected { .. } | Self::ReauthorizationRequired { .. })
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// A required setting is absent.
	#[error("Required setting `{}` is not configured.", .setting.env_key())]
	Missing {
		/// Setting that was requested.
		setting: Setting,
	},
	/// A setting is present but cannot be parsed.
	#[error("Setting `{key}` is invalid: {reason}.")]
	InvalidSetting {
		/// Environment key holding the bad value.
		key: &'static str,
		/// Parser-supplied reason string.
		reason: String,
	},
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Redirect URI cannot be parsed.
	#[error("Redirect URI is invalid.")]
	InvalidRedirect {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Descriptor does not enable the requested grant.
	#[error("Descriptor `{descriptor}` does not enable the {grant} grant.")]
	UnsupportedGrant {
		/// Provider identifier string.
		descriptor: String,
		/// Disabled grant label.
		grant: &'static str,
	},
	/// Provider descriptor failed validation.
	#[error(transparent)]
	InvalidDescriptor(#[from] crate::provider::ProviderDescriptorError),
	/// Brokerage refused the client credentials themselves.
	#[error("Brokerage rejected the client credentials: {reason}.")]
	ClientRejected {
		/// Provider-supplied reason string.
		reason: String,
	},
	/// Brokerage refused the token request itself (bad parameters or an unsupported grant).
	#[error("Brokerage refused the token request: {reason}.")]
	RequestRejected {
		/// Provider-supplied reason string.
		reason: String,
	},
	/// Token pair builder validation failed.
	#[error("Unable to build token pair.")]
	TokenBuild(#[from] crate::auth::TokenPairBuilderError),
	/// Token endpoint response omitted `expires_in` and no fallback lifetime is configured.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Provider returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Provider- or crate-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// The request did not complete within the configured timeout.
	#[error("Request timed out while calling the token endpoint.")]
	Timeout {
		/// Transport-specific timeout error.
		#[source]
		source: BoxError,
	},
	/// Underlying HTTP client reported a network failure (DNS, TCP, TLS).
	#[error("Network error occurred while calling the token endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Every attempt allowed by the retry policy failed.
	#[error("Token endpoint still failing after {attempts} attempts.")]
	RetriesExhausted {
		/// Number of attempts performed.
		attempts: u32,
		/// Failure observed on the final attempt.
		#[source]
		source: Box<TransientError>,
	},
}
impl TransientError {
	/// Wraps a transport-specific timeout.
	pub fn timeout(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Timeout { source: Box::new(src) }
	}

	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}

	/// Retry-After hint carried by the failure, if any.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::TokenEndpoint { retry_after, .. } => *retry_after,
			Self::RetriesExhausted { source, .. } => source.retry_after(),
			_ => None,
		}
	}

	/// HTTP status associated with the failure, if any.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::TokenEndpoint { status, .. } | Self::TokenResponseParse { status, .. } => *status,
			Self::RetriesExhausted { source, .. } => source.status(),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn classification_helpers_match_taxonomy() {
		let transient: Error = TransientError::TokenEndpoint {
			message: "bad gateway".into(),
			status: Some(502),
			retry_after: None,
		}
		.into();

		assert!(transient.is_retryable());
		assert!(!transient.requires_reauthorization());

		let rejected = Error::CredentialRejected { reason: "invalid_grant".into() };

		assert!(!rejected.is_retryable());
		assert!(rejected.requires_reauthorization());

		let missing: Error = ConfigError::Missing { setting: Setting::ClientId }.into();

		assert!(!missing.is_retryable());
		assert!(missing.to_string().contains("UPSTOX_CLIENT_ID"));
	}

	#[test]
	fn exhausted_retries_expose_last_failure_metadata() {
		let last = TransientError::TokenEndpoint {
			message: "throttled".into(),
			status: Some(429),
			retry_after: Some(Duration::seconds(3)),
		};
		let exhausted = TransientError::RetriesExhausted { attempts: 3, source: Box::new(last) };

		assert_eq!(exhausted.status(), Some(429));
		assert_eq!(exhausted.retry_after(), Some(Duration::seconds(3)));
		assert!(exhausted.to_string().contains("3 attempts"));
	}
}
