//! One scheduled monitoring run: fetch a token, run the job, report what happened.

// self
use crate::{_prelude::*, auth::AccessToken, ext::AccessTokenSource};

/// Boxed error returned by a [`MonitoringJob`].
pub type JobError = Box<dyn StdError + Send + Sync>;

/// Boxed future returned by [`MonitoringJob::run`].
pub type JobFuture<'a> = Pin<Box<dyn Future<Output = Result<(), JobError>> + 'a + Send>>;

/// Market monitoring work that needs a bearer token.
pub trait MonitoringJob
where
	Self: Send + Sync,
{
	/// Runs one monitoring pass with `token`.
	fn run<'a>(&'a self, token: &'a AccessToken) -> JobFuture<'a>;
}

/// Why a cycle did not run the job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
	/// A human must complete the consent flow again.
	ReauthorizationRequired {
		/// Error text, free of secrets.
		detail: String,
	},
	/// Token endpoint was unavailable and no usable token remained.
	Transient {
		/// Error text, free of secrets.
		detail: String,
	},
	/// The credential store could not be read or written.
	Storage {
		/// Error text, free of secrets.
		detail: String,
	},
	/// Required settings are missing or invalid.
	Configuration {
		/// Error text, free of secrets.
		detail: String,
	},
}
impl SkipReason {
	/// Classifies a token acquisition failure.
	pub fn from_error(error: &Error) -> Self {
		let detail = error.to_string();

		match error {
			Error::CredentialRejected { .. } | Error::ReauthorizationRequired { .. } =>
				Self::ReauthorizationRequired { detail },
			Error::Transient(_) | Error::InvalidState { .. } => Self::Transient { detail },
			Error::Storage(_) => Self::Storage { detail },
			Error::Config(_) => Self::Configuration { detail },
		}
	}

	/// Process exit code for operator commands: `2` re-authorization, `3` retry later, `78`
	/// configuration.
	pub fn exit_code(&self) -> i32 {
		match self {
			Self::ReauthorizationRequired { .. } => 2,
			Self::Transient { .. } | Self::Storage { .. } => 3,
			Self::Configuration { .. } => 78,
		}
	}

	/// Human-readable detail.
	pub fn detail(&self) -> &str {
		match self {
			Self::ReauthorizationRequired { detail }
			| Self::Transient { detail }
			| Self::Storage { detail }
			| Self::Configuration { detail } => detail,
		}
	}
}
impl Display for SkipReason {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let label = match self {
			Self::ReauthorizationRequired { .. } => "re-authorization required",
			Self::Transient { .. } => "token endpoint unavailable",
			Self::Storage { .. } => "credential store unavailable",
			Self::Configuration { .. } => "configuration error",
		};

		write!(f, "{label}: {}", self.detail())
	}
}

/// What one scheduled run did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleReport {
	/// The job ran to completion.
	Completed {
		/// Expiry of the token the job used.
		expires_at: OffsetDateTime,
	},
	/// The job did not run.
	Skipped {
		/// Why.
		reason: SkipReason,
	},
	/// The job ran with a valid token but failed on its own.
	JobFailed {
		/// Job error text.
		message: String,
	},
}
impl CycleReport {
	/// Process exit code: `0` completed, `1` job failure, otherwise [`SkipReason::exit_code`].
	pub fn exit_code(&self) -> i32 {
		match self {
			Self::Completed { .. } => 0,
			Self::JobFailed { .. } => 1,
			Self::Skipped { reason } => reason.exit_code(),
		}
	}
}

/// Runs `job` once with a token from `source`, never failing the caller.
pub async fn run_cycle<S, J>(source: &S, job: &J) -> CycleReport
where
	S: ?Sized + AccessTokenSource,
	J: ?Sized + MonitoringJob,
{
	let token = match source.get_valid_token().await {
		Ok(token) => token,
		Err(e) => {
			let reason = SkipReason::from_error(&e);

			tracing::warn!(reason = %reason, "Monitoring cycle skipped.");

			return CycleReport::Skipped { reason };
		},
	};

	match job.run(&token).await {
		Ok(()) => {
			tracing::info!(expires_at = %token.expires_at, "Monitoring cycle completed.");

			CycleReport::Completed { expires_at: token.expires_at }
		},
		Err(e) => {
			tracing::error!(error = %e, "Monitoring job failed.");

			CycleReport::JobFailed { message: e.to_string() }
		},
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicU32, Ordering};
	// self
	use super::*;
	use crate::{
		auth::TokenSecret,
		config::Setting,
		error::{ConfigError, TransientError},
		ext::TokenFuture,
		store::StoreError,
	};

	struct FixedSource(Mutex<Option<Result<AccessToken>>>);
	impl FixedSource {
		fn ok() -> Self {
			Self(Mutex::new(Some(Ok(AccessToken {
				secret: TokenSecret::new("bearer-value"),
				expires_at: OffsetDateTime::UNIX_EPOCH + Duration::days(20_000),
			}))))
		}

		fn failing(error: Error) -> Self {
			Self(Mutex::new(Some(Err(error))))
		}
	}
	impl AccessTokenSource for FixedSource {
		fn get_valid_token(&self) -> TokenFuture<'_> {
			let next = self.0.lock().take().expect("Source should be polled once.");

			Box::pin(async move { next })
		}
	}

	#[derive(Default)]
	struct CountingJob {
		runs: AtomicU32,
		fail: bool,
	}
	impl MonitoringJob for CountingJob {
		fn run<'a>(&'a self, token: &'a AccessToken) -> JobFuture<'a> {
			Box::pin(async move {
				assert_eq!(token.expose(), "bearer-value");
				self.runs.fetch_add(1, Ordering::SeqCst);

				if self.fail { Err("quote feed unavailable".into()) } else { Ok(()) }
			})
		}
	}

	#[tokio::test]
	async fn completed_cycle_runs_the_job() {
		let job = CountingJob::default();
		let report = run_cycle(&FixedSource::ok(), &job).await;

		assert!(matches!(report, CycleReport::Completed { .. }));
		assert_eq!(report.exit_code(), 0);
		assert_eq!(job.runs.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn reauthorization_skips_without_running_the_job() {
		let job = CountingJob::default();
		let source = FixedSource::failing(Error::ReauthorizationRequired {
			reason: "refresh token rejected".into(),
		});
		let report = run_cycle(&source, &job).await;

		assert_eq!(report.exit_code(), 2);
		assert_eq!(job.runs.load(Ordering::SeqCst), 0);
		assert!(matches!(
			report,
			CycleReport::Skipped { reason: SkipReason::ReauthorizationRequired { .. } }
		));
	}

	#[tokio::test]
	async fn job_failure_is_reported_separately() {
		let job = CountingJob { fail: true, ..Default::default() };
		let report = run_cycle(&FixedSource::ok(), &job).await;

		assert_eq!(report, CycleReport::JobFailed { message: "quote feed unavailable".into() });
		assert_eq!(report.exit_code(), 1);
	}

	#[test]
	fn errors_map_to_skip_reasons() {
		let transient: Error = TransientError::TokenEndpoint {
			message: "bad gateway".into(),
			status: Some(502),
			retry_after: None,
		}
		.into();
		let storage: Error = StoreError::Backend { message: "disk full".into() }.into();
		let config: Error = ConfigError::Missing { setting: Setting::ClientId }.into();
		let rejected = Error::CredentialRejected { reason: "invalid_grant".into() };

		assert_eq!(SkipReason::from_error(&transient).exit_code(), 3);
		assert_eq!(SkipReason::from_error(&storage).exit_code(), 3);
		assert_eq!(SkipReason::from_error(&config).exit_code(), 78);
		assert_eq!(SkipReason::from_error(&rejected).exit_code(), 2);
		assert!(SkipReason::from_error(&rejected).to_string().starts_with("re-authorization"));
	}
}
