//! Contracts between the token lifecycle and the scheduled monitoring job.
//!
//! The monitoring process only ever sees [`AccessTokenSource`]; it never reads the credential
//! record or talks to the token endpoint. [`run_cycle`] turns every token failure into a
//! [`CycleReport::Skipped`] so one scheduled run degrades to "skip and report".

pub mod cycle;
pub mod token_source;

pub use cycle::*;
pub use token_source::*;
