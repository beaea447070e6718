// self
use crate::_prelude::*;

/// Provider-specific quirks that influence how token responses are interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderQuirks {
	/// Lifetime assumed when a token response omits `expires_in`.
	///
	/// Unset means such responses are rejected.
	pub fallback_token_lifetime: Option<Duration>,
}
