//! Bounded exponential backoff for transient token endpoint failures.

// crates.io
use rand::Rng;
// self
use crate::{_prelude::*, error::TransientError};

/// Attempt budget and delay curve applied to retryable token calls.
///
/// Delays follow `base * 2^(n-1)` capped at `max_delay`, with equal jitter (half fixed, half
/// random). A `Retry-After` hint from the endpoint raises the delay, still bounded by the cap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Total attempts including the first one; never below `1`.
	pub max_attempts: u32,
	/// Delay before the second attempt.
	pub base_delay: Duration,
	/// Upper bound for any single delay.
	pub max_delay: Duration,
}
impl RetryPolicy {
	/// Creates a policy; `max_attempts` is clamped to at least one attempt.
	pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
		let base_delay = base_delay.max(Duration::ZERO);

		Self { max_attempts: max_attempts.max(1), base_delay, max_delay: max_delay.max(base_delay) }
	}

	/// Single attempt, no retries.
	pub fn none() -> Self {
		Self::new(1, Duration::ZERO, Duration::ZERO)
	}

	/// Delay to wait after failed attempt number `attempt` (1-based).
	pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
		let cap = self.max_delay.whole_microseconds().max(0);
		let exponent = attempt.saturating_sub(1).min(30);
		let ceiling = (self.base_delay.whole_microseconds().max(0) << exponent).min(cap);
		let half = ceiling / 2;
		let jitter = if half > 0 { rand::rng().random_range(0..=half) } else { 0 };
		let mut micros = ceiling - half + jitter;

		if let Some(hint) = hint {
			micros = micros.max(hint.whole_microseconds()).min(cap);
		}

		Duration::microseconds(i64::try_from(micros).unwrap_or(i64::MAX))
	}

	/// Runs `op` until it succeeds, fails permanently, or the attempt budget is spent.
	///
	/// Only [`Error::Transient`] is retried. Once the budget is spent with more than one
	/// attempt allowed, the last failure is wrapped in [`TransientError::RetriesExhausted`].
	pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
	where
		F: FnMut(u32) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let mut attempt = 1;

		loop {
			let e = match op(attempt).await {
				Err(Error::Transient(e)) => e,
				other => return other,
			};

			if attempt >= self.max_attempts {
				if self.max_attempts == 1 {
					return Err(e.into());
				}

				tracing::warn!(attempts = attempt, error = %e, "Retry budget exhausted.");

				let source = Box::new(e);

				return Err(TransientError::RetriesExhausted { attempts: attempt, source }.into());
			}

			let delay = self.delay_for(attempt, e.retry_after());

			tracing::debug!(
				attempt,
				delay_ms = delay.whole_milliseconds() as u64,
				error = %e,
				"Transient token endpoint failure; backing off."
			);
			tokio::time::sleep(delay.unsigned_abs()).await;

			attempt += 1;
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self::new(3, Duration::seconds(1), Duration::seconds(8))
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicU32, Ordering};
	// self
	use super::*;

	fn flaky() -> Error {
		TransientError::TokenEndpoint {
			message: "bad gateway".into(),
			status: Some(502),
			retry_after: None,
		}
		.into()
	}

	#[test]
	fn delays_grow_and_stay_capped() {
		let policy = RetryPolicy::default();

		for _ in 0..32 {
			let first = policy.delay_for(1, None);
			let second = policy.delay_for(2, None);
			let fifth = policy.delay_for(5, None);

			assert!(first >= Duration::milliseconds(500) && first <= Duration::seconds(1));
			assert!(second >= Duration::seconds(1) && second <= Duration::seconds(2));
			assert!(fifth >= Duration::seconds(4) && fifth <= Duration::seconds(8));
		}
	}

	#[test]
	fn retry_after_hint_is_honoured_up_to_the_cap() {
		let policy = RetryPolicy::default();

		assert_eq!(policy.delay_for(1, Some(Duration::seconds(5))), Duration::seconds(5));
		assert_eq!(policy.delay_for(1, Some(Duration::minutes(5))), Duration::seconds(8));
	}

	#[test]
	fn attempts_are_clamped() {
		assert_eq!(RetryPolicy::new(0, Duration::seconds(1), Duration::seconds(2)).max_attempts, 1);
		assert_eq!(RetryPolicy::none().delay_for(3, None), Duration::ZERO);
	}

	#[tokio::test]
	async fn transient_failures_exhaust_the_budget() {
		let policy = RetryPolicy::new(3, Duration::milliseconds(1), Duration::milliseconds(2));
		let calls = AtomicU32::new(0);
		let result: Result<()> = policy
			.run(|_| {
				calls.fetch_add(1, Ordering::SeqCst);

				async { Err(flaky()) }
			})
			.await;

		assert_eq!(calls.load(Ordering::SeqCst), 3);
		assert!(matches!(
			result,
			Err(Error::Transient(TransientError::RetriesExhausted { attempts: 3, .. }))
		));
	}

	#[tokio::test]
	async fn permanent_failures_stop_immediately() {
		let policy = RetryPolicy::new(3, Duration::milliseconds(1), Duration::milliseconds(2));
		let calls = AtomicU32::new(0);
		let result: Result<()> = policy
			.run(|_| {
				calls.fetch_add(1, Ordering::SeqCst);

				async { Err(Error::CredentialRejected { reason: "invalid_grant".into() }) }
			})
			.await;

		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert!(matches!(result, Err(Error::CredentialRejected { .. })));
	}

	#[tokio::test]
	async fn recovers_after_a_transient_failure() {
		let policy = RetryPolicy::new(3, Duration::milliseconds(1), Duration::milliseconds(2));
		let value = policy
			.run(|attempt| async move { if attempt == 1 { Err(flaky()) } else { Ok(attempt) } })
			.await
			.expect("Second attempt should succeed.");

		assert_eq!(value, 2);
	}
}
