//! Provider descriptor data structures shared by the authorization and token flows.

/// Builder API for assembling provider descriptors.
pub mod builder;
/// Provider-specific quirk toggles.
pub mod quirks;

pub use builder::*;
pub use quirks::*;

// self
use crate::{_prelude::*, provider::ProviderId};

/// Upstox authorization dialog endpoint.
pub const UPSTOX_AUTHORIZATION_URL: &str =
	"https://api.upstox.com/v2/login/authorization/dialog";
/// Upstox token endpoint.
pub const UPSTOX_TOKEN_URL: &str = "https://api.upstox.com/v2/login/authorization/token";
/// Lifetime assumed when an Upstox token response omits `expires_in`.
///
/// Upstox access tokens stop working at the start of the next trading day, so half a day keeps
/// the manager refreshing well before that boundary.
pub const UPSTOX_FALLBACK_TOKEN_LIFETIME: Duration = Duration::hours(12);

/// Grants this crate can drive against a brokerage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
	/// Consent-dialog code exchanged once for the first pair.
	AuthorizationCode,
	/// Scheduled renewal with the stored refresh token.
	RefreshToken,
}
impl GrantType {
	/// Wire value of the `grant_type` form field.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::AuthorizationCode => "authorization_code",
			Self::RefreshToken => "refresh_token",
		}
	}

	const fn bit(self) -> u8 {
		match self {
			Self::AuthorizationCode => 0b01,
			Self::RefreshToken => 0b10,
		}
	}
}
impl Display for GrantType {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Set of grants a descriptor accepts; serialized as a list of grant names.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<GrantType>", into = "Vec<GrantType>")]
pub struct SupportedGrants(u8);
impl SupportedGrants {
	/// Returns `true` when `grant` is in the set.
	pub fn supports(self, grant: GrantType) -> bool {
		self.0 & grant.bit() != 0
	}

	/// Returns the set with `grant` added.
	pub fn enable(self, grant: GrantType) -> Self {
		Self(self.0 | grant.bit())
	}
}
impl From<Vec<GrantType>> for SupportedGrants {
	fn from(grants: Vec<GrantType>) -> Self {
		grants.into_iter().fold(Self::default(), Self::enable)
	}
}
impl From<SupportedGrants> for Vec<GrantType> {
	fn from(set: SupportedGrants) -> Self {
		[GrantType::AuthorizationCode, GrantType::RefreshToken]
			.into_iter()
			.filter(|grant| set.supports(*grant))
			.collect()
	}
}

/// Client authentication styles for token endpoint calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
	/// Form POST body parameters for `client_id`/`client_secret`.
	#[default]
	ClientSecretPost,
	/// HTTP Basic with `client_id`/`client_secret`.
	ClientSecretBasic,
}

/// Endpoint set declared by a provider descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
	/// Authorization dialog the operator visits to grant consent.
	pub authorization: Url,
	/// Token endpoint used for exchanges and refreshes.
	pub token: Url,
}

/// Immutable provider descriptor consumed by flows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Descriptor identifier.
	pub id: ProviderId,
	/// Endpoint definitions exposed by the provider.
	pub endpoints: ProviderEndpoints,
	/// Supported grant flags.
	pub supported_grants: SupportedGrants,
	/// Preferred client authentication mechanism.
	pub preferred_client_auth_method: ClientAuthMethod,
	/// Provider-specific quirks.
	pub quirks: ProviderQuirks,
}
impl ProviderDescriptor {
	/// Creates a new builder for the provided identifier.
	pub fn builder(id: ProviderId) -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::new(id)
	}

	/// Builder pre-seeded with the Upstox endpoints and grants.
	pub fn upstox_builder() -> Result<ProviderDescriptorBuilder, ProviderDescriptorError> {
		let id = ProviderId::new("upstox").map_err(ProviderDescriptorError::InvalidId)?;
		let authorization = Url::parse(UPSTOX_AUTHORIZATION_URL).map_err(|source| {
			ProviderDescriptorError::InvalidUrl { endpoint: "authorization", source }
		})?;
		let token = Url::parse(UPSTOX_TOKEN_URL)
			.map_err(|source| ProviderDescriptorError::InvalidUrl { endpoint: "token", source })?;

		Ok(Self::builder(id)
			.authorization_endpoint(authorization)
			.token_endpoint(token)
			.support_grants([GrantType::AuthorizationCode, GrantType::RefreshToken])
			.preferred_client_auth_method(ClientAuthMethod::ClientSecretPost)
			.quirks(ProviderQuirks {
				fallback_token_lifetime: Some(UPSTOX_FALLBACK_TOKEN_LIFETIME),
			}))
	}

	/// Validated Upstox preset.
	pub fn upstox() -> Result<Self, ProviderDescriptorError> {
		Self::upstox_builder()?.build()
	}

	/// Checks whether the descriptor supports a given grant.
	pub fn supports(&self, grant: GrantType) -> bool {
		self.supported_grants.supports(grant)
	}
}
