//! Provider strategy hooks that classify token endpoint failures.
//!
//! Implementations normalize error mapping without tying flows to any particular HTTP client.

// self
use crate::{_prelude::*, provider::descriptor::GrantType};

/// Strategy hook that allows providers to classify errors.
///
/// The hooks use crate-owned data so implementations never depend on transport types.
pub trait ProviderStrategy: Send + Sync {
	/// Maps a failed token endpoint response into the crate taxonomy.
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind;

	/// Adds provider-specific form parameters before dispatching.
	fn augment_token_request(&self, _grant: GrantType, _form: &mut Vec<(String, String)>) {}
}

/// Canonical provider error categories used by strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
	/// Brokerage rejected the grant (bad, reused, or expired code; revoked refresh token).
	CredentialRejected,
	/// Client authentication failed; the operator must fix the credentials.
	InvalidClient,
	/// The brokerage refused the request shape (bad parameters or an unsupported grant).
	MalformedRequest,
	/// Failure is temporary and should be retried.
	Transient,
}

/// Context passed to provider strategies when classifying token errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderErrorContext {
	/// Grant type associated with the failing request.
	pub grant_type: GrantType,
	/// HTTP status code returned by the provider, when available.
	pub http_status: Option<u16>,
	/// Provider-supplied OAuth `error` field.
	pub oauth_error: Option<String>,
	/// Provider-supplied `error_description` (or brokerage `message`) field.
	pub error_description: Option<String>,
	/// Preview of the response body for non-JSON payloads.
	pub body_preview: Option<String>,
}
impl ProviderErrorContext {
	const BODY_PREVIEW_LIMIT: usize = 256;

	/// Creates a new context scoped to the provided grant type.
	pub fn new(grant_type: GrantType) -> Self {
		Self {
			grant_type,
			http_status: None,
			oauth_error: None,
			error_description: None,
			body_preview: None,
		}
	}

	/// Adds an HTTP status code (e.g., 400, 401, 500).
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Adds the OAuth error code string returned by the provider.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Adds the OAuth `error_description` field.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}

	/// Adds a body preview for providers that return non-JSON payloads.
	pub fn with_body_preview(mut self, body: impl Into<String>) -> Self {
		self.body_preview = Some(truncate_preview(body.into()));

		self
	}

	/// Short, secret-free reason string for error variants and logs.
	pub fn reason(&self) -> String {
		match (&self.oauth_error, &self.error_description, self.http_status) {
			(Some(error), Some(description), _) => format!("{error}: {description}"),
			(Some(error), None, _) => error.clone(),
			(None, Some(description), _) => description.clone(),
			(None, None, Some(status)) => format!("HTTP {status}"),
			(None, None, None) => "unknown token endpoint failure".into(),
		}
	}
}

/// Default strategy for OAuth-style brokerages.
///
/// A recognized OAuth `error` code decides the outcome. Without one, the brokerage's own
/// messages are matched next, and the HTTP status decides last.
#[derive(Debug, Default)]
pub struct DefaultProviderStrategy;
impl Display for DefaultProviderStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("default-provider-strategy")
	}
}
impl ProviderStrategy for DefaultProviderStrategy {
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind {
		if let Some(kind) = ctx.oauth_error.as_deref().and_then(classify_error_code) {
			return kind;
		}
		if let Some(kind) = classify_message(ctx.error_description.as_deref())
			.or_else(|| classify_message(ctx.body_preview.as_deref()))
		{
			return kind;
		}

		match ctx.oauth_error {
			Some(_) => classify_status_with_unknown_code(ctx.http_status),
			None => classify_status(ctx.http_status),
		}
	}
}

fn truncate_preview(body: String) -> String {
	if body.chars().count() <= ProviderErrorContext::BODY_PREVIEW_LIMIT {
		return body;
	}

	let mut buf = body.chars().take(ProviderErrorContext::BODY_PREVIEW_LIMIT).collect::<String>();

	buf.push('…');

	buf
}

// RFC 6749 section 5.2 codes plus `temporarily_unavailable`/`server_error` from section 4.1.2.1.
fn classify_error_code(code: &str) -> Option<ProviderErrorKind> {
	let kind = match code.to_ascii_lowercase().as_str() {
		"invalid_grant" | "access_denied" => ProviderErrorKind::CredentialRejected,
		"invalid_client" | "unauthorized_client" => ProviderErrorKind::InvalidClient,
		"invalid_request" | "unsupported_grant_type" | "invalid_scope"
		| "unsupported_response_type" => ProviderErrorKind::MalformedRequest,
		"temporarily_unavailable" | "server_error" => ProviderErrorKind::Transient,
		_ => return None,
	};

	Some(kind)
}

fn classify_message(message: Option<&str>) -> Option<ProviderErrorKind> {
	let lowered = message?.to_ascii_lowercase();
	let has = |needles: &[&str]| needles.iter().any(|needle| lowered.contains(needle));

	if has(&["invalid_grant", "invalid auth code", "invalid refresh token", "code has expired"]) {
		Some(ProviderErrorKind::CredentialRejected)
	} else if has(&["invalid_client", "invalid credentials"]) {
		Some(ProviderErrorKind::InvalidClient)
	} else if has(&["temporarily_unavailable", "try again later"]) {
		Some(ProviderErrorKind::Transient)
	} else {
		None
	}
}

fn classify_status(status: Option<u16>) -> ProviderErrorKind {
	match status {
		Some(400 | 404 | 410) => ProviderErrorKind::CredentialRejected,
		Some(401 | 403) => ProviderErrorKind::InvalidClient,
		_ => ProviderErrorKind::Transient,
	}
}

// An error code we do not recognize says the request was understood and refused, but not that
// the grant itself is dead, so it never marks the credential as rejected.
fn classify_status_with_unknown_code(status: Option<u16>) -> ProviderErrorKind {
	match status {
		Some(401 | 403) => ProviderErrorKind::InvalidClient,
		Some(429) | None => ProviderErrorKind::Transient,
		Some(status) if (400..500).contains(&status) => ProviderErrorKind::MalformedRequest,
		_ => ProviderErrorKind::Transient,
	}
}
