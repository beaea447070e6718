//! Transport primitives for token endpoint calls.
//!
//! [`TokenHttpClient`] is the crate's only dependency on an HTTP stack. Exchangers hand it a
//! fully prepared [`TokenRequest`] and receive a [`TokenReply`] carrying the status, the
//! Retry-After hint, and the raw body. Timeouts and connection failures surface as
//! [`TransientError`] so the retry policy can treat every transport the same way.

// std
#[cfg(feature = "reqwest")] use std::ops::Deref;
// crates.io
#[cfg(feature = "reqwest")] use reqwest::header::{HeaderMap, RETRY_AFTER};
#[cfg(feature = "reqwest")] use time::format_description::well_known::Rfc2822;
// self
#[cfg(feature = "reqwest")] use crate::error::ConfigError;
use crate::{_prelude::*, auth::TokenSecret, error::TransientError};

/// Boxed future returned by [`TokenHttpClient::post_form`].
pub type HttpFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransientError>> + 'a + Send>>;

/// Abstraction over HTTP transports able to POST a form to the token endpoint.
///
/// Implementations must not follow redirects and must enforce their own timeout.
pub trait TokenHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Sends `request` and resolves with whatever the endpoint answered, success or not.
	fn post_form(&self, request: TokenRequest) -> HttpFuture<'_, TokenReply>;
}

/// Form POST prepared by the exchanger.
#[derive(Clone)]
pub struct TokenRequest {
	/// Token endpoint.
	pub url: Url,
	/// Form body in wire order.
	pub form: Vec<(String, String)>,
	/// HTTP Basic credentials for `client_secret_basic`.
	pub basic_auth: Option<(String, TokenSecret)>,
}
impl Debug for TokenRequest {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenRequest")
			.field("url", &self.url.as_str())
			.field("form_keys", &self.form.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>())
			.field("basic_auth", &self.basic_auth.is_some())
			.finish()
	}
}

/// Metadata captured from a token endpoint response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
	/// HTTP status code returned by the token endpoint.
	pub status: u16,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<Duration>,
}

/// Raw token endpoint response.
#[derive(Clone)]
pub struct TokenReply {
	/// Status and retry hints.
	pub metadata: ResponseMetadata,
	/// Response body; may carry tokens, so it is never logged.
	pub body: String,
}
impl TokenReply {
	/// Convenience constructor used by transports and test doubles.
	pub fn new(status: u16, body: impl Into<String>) -> Self {
		Self { metadata: ResponseMetadata { status, retry_after: None }, body: body.into() }
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.metadata.status)
	}
}
impl Debug for TokenReply {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenReply")
			.field("metadata", &self.metadata)
			.field("body_len", &self.body.len())
			.finish()
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
///
/// Token requests never follow redirects; build custom clients with
/// `redirect::Policy::none()`.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds a client with a strict overall timeout and redirects disabled.
	pub fn with_timeout(timeout: Duration) -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder()
			.timeout(timeout.unsigned_abs())
			.redirect(reqwest::redirect::Policy::none())
			.build()?;

		Ok(Self(client))
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl TokenHttpClient for ReqwestHttpClient {
	fn post_form(&self, request: TokenRequest) -> HttpFuture<'_, TokenReply> {
		Box::pin(async move {
			let mut builder = self.0.post(request.url).form(&request.form);

			if let Some((user, password)) = request.basic_auth.as_ref() {
				builder = builder.basic_auth(user, Some(password.expose()));
			}

			let response = builder.send().await.map_err(map_reqwest_error)?;
			let status = response.status().as_u16();
			let retry_after = parse_retry_after(response.headers());
			let body = response.text().await.map_err(map_reqwest_error)?;

			Ok(TokenReply { metadata: ResponseMetadata { status, retry_after }, body })
		})
	}
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(e: ReqwestError) -> TransientError {
	if e.is_timeout() { TransientError::timeout(e) } else { TransientError::network(e) }
}

#[cfg(feature = "reqwest")]
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u32>() {
		return Some(Duration::seconds(i64::from(secs)));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}
