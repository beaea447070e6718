// std
use std::iter::IntoIterator;
// crates.io
use url::Host;
// self
use crate::{
	_prelude::*,
	auth::MAX_TOKEN_LIFETIME,
	provider::{
		ClientAuthMethod, GrantType, IdentifierError, ProviderDescriptor, ProviderEndpoints,
		ProviderId, ProviderQuirks, SupportedGrants,
	},
};

/// Errors raised while constructing or validating descriptors.
#[derive(Debug, PartialEq, Eq, ThisError)]
pub enum ProviderDescriptorError {
	/// Authorization endpoint is required for the consent step.
	#[error("Missing authorization endpoint.")]
	MissingAuthorizationEndpoint,
	/// Token endpoint is mandatory for all flows.
	#[error("Missing token endpoint.")]
	MissingTokenEndpoint,
	/// The consent step cannot work without the authorization_code grant.
	#[error("Descriptor must enable the authorization_code grant.")]
	AuthorizationCodeDisabled,
	/// Endpoints must use HTTPS unless they point at a loopback host.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// A preset endpoint failed to parse.
	#[error("The {endpoint} endpoint is not a valid URL.")]
	InvalidUrl {
		/// Which endpoint failed to parse.
		endpoint: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Descriptor identifier failed validation.
	#[error(transparent)]
	InvalidId(IdentifierError),
	/// Fallback lifetime must be positive.
	#[error("Fallback token lifetime must be positive.")]
	NonPositiveFallbackLifetime,
	/// Fallback lifetime must not exceed [`MAX_TOKEN_LIFETIME`].
	#[error("Fallback token lifetime exceeds the longest accepted token lifetime.")]
	FallbackLifetimeTooLong,
}

/// Builder for [`ProviderDescriptor`] values.
#[derive(Debug)]
pub struct ProviderDescriptorBuilder {
	/// Identifier for the descriptor being constructed.
	pub id: ProviderId,
	/// Authorization dialog endpoint.
	pub authorization_endpoint: Option<Url>,
	/// Token endpoint used for exchanges and refreshes.
	pub token_endpoint: Option<Url>,
	/// Grants enabled for the provider.
	pub supported_grants: SupportedGrants,
	/// Preferred client authentication method for the token endpoint.
	pub preferred_client_auth_method: ClientAuthMethod,
	/// Provider-specific quirks.
	pub quirks: ProviderQuirks,
}
impl ProviderDescriptorBuilder {
	/// Creates a new builder seeded with the provided identifier.
	pub fn new(id: ProviderId) -> Self {
		Self {
			id,
			authorization_endpoint: None,
			token_endpoint: None,
			supported_grants: SupportedGrants::default(),
			preferred_client_auth_method: ClientAuthMethod::default(),
			quirks: ProviderQuirks::default(),
		}
	}

	/// Sets the authorization endpoint.
	pub fn authorization_endpoint(mut self, url: Url) -> Self {
		self.authorization_endpoint = Some(url);

		self
	}

	/// Sets the token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Marks multiple grants as supported.
	pub fn support_grants<I>(mut self, grants: I) -> Self
	where
		I: IntoIterator<Item = GrantType>,
	{
		for grant in grants.into_iter() {
			self.supported_grants = self.supported_grants.enable(grant);
		}

		self
	}

	/// Overrides the preferred client authentication method.
	pub fn preferred_client_auth_method(mut self, method: ClientAuthMethod) -> Self {
		self.preferred_client_auth_method = method;

		self
	}

	/// Overrides the provider quirks.
	pub fn quirks(mut self, quirks: ProviderQuirks) -> Self {
		self.quirks = quirks;

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ProviderDescriptor, ProviderDescriptorError> {
		let authorization = self
			.authorization_endpoint
			.ok_or(ProviderDescriptorError::MissingAuthorizationEndpoint)?;
		let token = self.token_endpoint.ok_or(ProviderDescriptorError::MissingTokenEndpoint)?;
		let descriptor = ProviderDescriptor {
			id: self.id,
			endpoints: ProviderEndpoints { authorization, token },
			supported_grants: self.supported_grants,
			preferred_client_auth_method: self.preferred_client_auth_method,
			quirks: self.quirks,
		};

		descriptor.validate()?;

		Ok(descriptor)
	}
}

impl ProviderDescriptor {
	/// Validates invariants for the descriptor.
	fn validate(&self) -> Result<(), ProviderDescriptorError> {
		if !self.supports(GrantType::AuthorizationCode) {
			return Err(ProviderDescriptorError::AuthorizationCodeDisabled);
		}
		if self.quirks.fallback_token_lifetime.is_some_and(|d| !d.is_positive()) {
			return Err(ProviderDescriptorError::NonPositiveFallbackLifetime);
		}
		if self.quirks.fallback_token_lifetime.is_some_and(|d| d > MAX_TOKEN_LIFETIME) {
			return Err(ProviderDescriptorError::FallbackLifetimeTooLong);
		}

		validate_endpoint("authorization", &self.endpoints.authorization)?;
		validate_endpoint("token", &self.endpoints.token)?;

		Ok(())
	}
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), ProviderDescriptorError> {
	if url.scheme() == "https" || (url.scheme() == "http" && is_loopback(url)) {
		Ok(())
	} else {
		Err(ProviderDescriptorError::InsecureEndpoint { endpoint: name, url: url.to_string() })
	}
}

fn is_loopback(url: &Url) -> bool {
	match url.host() {
		Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
		Some(Host::Ipv4(ip)) => ip.is_loopback(),
		Some(Host::Ipv6(ip)) => ip.is_loopback(),
		None => false,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn builder() -> ProviderDescriptorBuilder {
		ProviderDescriptor::builder(
			ProviderId::new("broker").expect("Fixture identifier should be valid."),
		)
		.support_grants([GrantType::AuthorizationCode, GrantType::RefreshToken])
	}

	#[test]
	fn rejects_plain_http_for_remote_hosts() {
		let err = builder()
			.authorization_endpoint(
				Url::parse("https://broker.example.com/dialog").expect("URL fixture should parse."),
			)
			.token_endpoint(
				Url::parse("http://broker.example.com/token").expect("URL fixture should parse."),
			)
			.build()
			.expect_err("Remote plain-HTTP token endpoint should be rejected.");

		assert!(matches!(err, ProviderDescriptorError::InsecureEndpoint { endpoint: "token", .. }));
	}

	#[test]
	fn allows_loopback_http_endpoints() {
		builder()
			.authorization_endpoint(
				Url::parse("http://localhost:9000/dialog").expect("URL fixture should parse."),
			)
			.token_endpoint(
				Url::parse("http://127.0.0.1:9000/token").expect("URL fixture should parse."),
			)
			.build()
			.expect("Loopback endpoints should be accepted.");
	}

	#[test]
	fn requires_authorization_code_grant() {
		let err = ProviderDescriptor::builder(
			ProviderId::new("broker").expect("Fixture identifier should be valid."),
		)
		.support_grants([GrantType::RefreshToken])
		.authorization_endpoint(
			Url::parse("https://broker.example.com/dialog").expect("URL fixture should parse."),
		)
		.token_endpoint(
			Url::parse("https://broker.example.com/token").expect("URL fixture should parse."),
		)
		.build()
		.expect_err("Descriptor without authorization_code should be rejected.");

		assert_eq!(err, ProviderDescriptorError::AuthorizationCodeDisabled);
	}

	#[test]
	fn fallback_lifetime_is_bounded() {
		let endpoints = |builder: ProviderDescriptorBuilder| {
			builder
				.authorization_endpoint(
					Url::parse("https://broker.example.com/dialog")
						.expect("URL fixture should parse."),
				)
				.token_endpoint(
					Url::parse("https://broker.example.com/token")
						.expect("URL fixture should parse."),
				)
		};
		let err = endpoints(builder())
			.quirks(ProviderQuirks {
				fallback_token_lifetime: Some(MAX_TOKEN_LIFETIME + Duration::seconds(1)),
			})
			.build()
			.expect_err("Fallback lifetime past the cap should be rejected.");

		assert_eq!(err, ProviderDescriptorError::FallbackLifetimeTooLong);

		let err = endpoints(builder())
			.quirks(ProviderQuirks { fallback_token_lifetime: Some(Duration::ZERO) })
			.build()
			.expect_err("Zero fallback lifetime should be rejected.");

		assert_eq!(err, ProviderDescriptorError::NonPositiveFallbackLifetime);

		endpoints(builder())
			.quirks(ProviderQuirks { fallback_token_lifetime: Some(MAX_TOKEN_LIFETIME) })
			.build()
			.expect("Fallback lifetime at the cap should be accepted.");
	}
}
