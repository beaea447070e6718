//! Authorization `state` nonces and the one-way fingerprints persisted for them.
//!
//! Only fingerprints reach the ledger, so a leaked ledger file cannot be replayed.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};

const STATE_LEN: usize = 32;

/// Generates a fresh alphanumeric `state` value.
pub fn generate_state() -> String {
	random_token(STATE_LEN)
}

/// Generates a random alphanumeric token of `len` characters.
pub fn random_token(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

/// Base64 (URL-safe, no padding) SHA-256 digest of `value`.
pub fn fingerprint(value: &str) -> String {
	URL_SAFE_NO_PAD.encode(Sha256::digest(value.as_bytes()))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn states_are_unique_and_alphanumeric() {
		let a = generate_state();
		let b = generate_state();

		assert_eq!(a.len(), STATE_LEN);
		assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
		assert_ne!(a, b);
	}

	#[test]
	fn fingerprint_is_stable_and_hides_input() {
		let fp = fingerprint("code-123");

		assert_eq!(fp, fingerprint("code-123"));
		assert_ne!(fp, fingerprint("code-124"));
		assert!(!fp.contains("code-123"));
		assert_eq!(fp.len(), 43);
	}
}
