//! Credential models: redacted secrets, token pairs, and authorization nonces.

pub mod nonce;
pub mod secret;
pub mod token;

pub use nonce::*;
pub use secret::*;
pub use token::*;
