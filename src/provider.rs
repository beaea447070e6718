//! Provider-facing descriptors (data) and strategies (behavior).
//!
//! `descriptor` exposes validated brokerage metadata (`ProviderDescriptor`): HTTPS endpoints,
//! enabled grants, the client authentication style, and quirks such as a fallback token
//! lifetime. `strategy` defines [`ProviderStrategy`], the hook that maps token endpoint
//! failures into the crate's error taxonomy.

pub mod descriptor;
pub mod id;
pub mod strategy;

pub use descriptor::*;
pub use id::*;
pub use strategy::*;
