//! `get_valid_token`: the refresh state machine guarded by a persisted lease.
//!
//! ```text
//! Unauthorized -exchange-> Valid -skew-> NearExpiry -lease CAS-> Refreshing
//!                            ^                                      |
//!                            +------------- success ----------------+
//!                                  Unauthorized (rejected_at) <- invalid_grant
//! ```
//!
//! The `Refreshing` state lives in the record as a [`RefreshLease`] claimed by CAS, so exactly
//! one invocation talks to the token endpoint while every other invocation polls the store and
//! reuses the holder's result. A lease whose holder died expires and can be taken over.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, TokenSecret, TokenState, nonce},
	error::TransientError,
	flows::{MAX_CAS_ATTEMPTS, TokenLifecycleManager},
	http::TokenHttpClient,
	store::{CredentialRecord, RefreshLease, RefreshOutcome, SaveOutcome, StoreError},
};

const HOLDER_LEN: usize = 16;

impl<C> TokenLifecycleManager<C>
where
	C: ?Sized + TokenHttpClient,
{
	/// Returns an access token that is valid now, refreshing it first when it is near or past
	/// expiry.
	///
	/// Fails with [`Error::ReauthorizationRequired`] when nothing was ever authorized, when the
	/// brokerage rejected the refresh token, or when an expired pair has no refresh token. When
	/// a refresh fails transiently but the current pair has not expired yet, that pair is
	/// returned and the failure is recorded for status consumers.
	pub async fn get_valid_token(&self) -> Result<AccessToken> {
		let holder = nonce::random_token(HOLDER_LEN);
		let started = OffsetDateTime::now_utc();
		let mut conflicts = 0;

		loop {
			let now = OffsetDateTime::now_utc();
			let record = self.load_authorized().await?;
			let state = record.pair.state_at(now, self.skew);

			if state == TokenState::Valid {
				return Ok(record.pair.access());
			}

			let Some(refresh_token) = record.pair.refresh_token.clone() else {
				return match state {
					TokenState::Expired => Err(Error::ReauthorizationRequired {
						reason: "access token expired and no refresh token is stored".into(),
					}),
					_ => Ok(record.pair.access()),
				};
			};

			if let Some(lease) = record.foreign_lease(&holder, now) {
				let deadline = lease.expires_at;

				tracing::debug!(
					version = record.version,
					"Another invocation holds the refresh lease; waiting."
				);

				let waited = self.wait_for_holder(record.version, deadline, started).await?;

				if let Some(access) = waited {
					return Ok(access);
				}

				continue;
			}

			let mut claimed = record.clone();

			claimed.refresh_lease =
				Some(RefreshLease { holder: holder.clone(), expires_at: now + self.lease_ttl });

			let lease_version = match self.store.save(claimed, record.version).await? {
				SaveOutcome::Saved { version } => version,
				SaveOutcome::VersionConflict { current } => {
					conflicts += 1;

					tracing::debug!(?current, conflicts, "Lease claim lost a version race.");

					if conflicts >= MAX_CAS_ATTEMPTS {
						return Err(StoreError::Contended { attempts: conflicts }.into());
					}

					continue;
				},
			};

			tracing::debug!(version = lease_version, ?state, "Refresh lease claimed.");

			return self.refresh_under_lease(record, lease_version, &refresh_token).await;
		}
	}

	async fn load_authorized(&self) -> Result<CredentialRecord> {
		let record = self.store.load().await?.ok_or_else(|| Error::ReauthorizationRequired {
			reason: "no credential has been authorized yet".into(),
		})?;

		if record.is_rejected() {
			return Err(Error::ReauthorizationRequired {
				reason: "the brokerage rejected the stored refresh token".into(),
			});
		}

		Ok(record)
	}

	async fn refresh_under_lease(
		&self,
		previous: CredentialRecord,
		lease_version: u64,
		refresh_token: &TokenSecret,
	) -> Result<AccessToken> {
		match self.exchanger.refresh(refresh_token).await {
			Ok(pair) => {
				let access = pair.access();
				let record = CredentialRecord::new(pair)
					.with_report(RefreshOutcome::Succeeded, OffsetDateTime::now_utc());

				match self.store.save(record.clone(), lease_version).await? {
					SaveOutcome::Saved { version } => {
						tracing::info!(
							version,
							expires_at = access.expires_at.unix_timestamp(),
							"Access token refreshed."
						);

						Ok(access)
					},
					SaveOutcome::VersionConflict { current } => {
						tracing::warn!(?current, "Record changed while refreshing; reconciling.");

						self.reconcile(record, access).await
					},
				}
			},
			Err(Error::CredentialRejected { reason }) => {
				let now = OffsetDateTime::now_utc();
				let mut rejected = previous.with_report(RefreshOutcome::Rejected, now);

				rejected.refresh_lease = None;
				rejected.rejected_at = Some(now);

				if let SaveOutcome::VersionConflict { current } =
					self.store.save(rejected, lease_version).await?
				{
					tracing::warn!(?current, "Rejection marker lost a version race.");

					if let Some(access) = self.stored_valid_token().await? {
						tracing::info!("Another writer installed a valid pair; rejection dropped.");

						return Ok(access);
					}
				}

				tracing::error!(%reason, "Refresh token rejected; re-authorization required.");

				Err(Error::ReauthorizationRequired {
					reason: format!("refresh token rejected ({reason})"),
				})
			},
			Err(e) => {
				let now = OffsetDateTime::now_utc();
				let still_usable = !previous.pair.is_expired_at(now);
				let fallback = previous.pair.access();
				let mut released = if e.is_retryable() {
					previous.with_report(RefreshOutcome::TransientFailure, now)
				} else {
					previous
				};

				released.refresh_lease = None;

				if let SaveOutcome::VersionConflict { current } =
					self.store.save(released, lease_version).await?
				{
					tracing::warn!(?current, "Lease release lost a version race.");

					if let Some(access) = self.stored_valid_token().await? {
						return Ok(access);
					}
				}

				if e.is_retryable() && still_usable {
					tracing::warn!(
						error = %e,
						"Refresh failed; current access token remains usable."
					);

					return Ok(fallback);
				}

				Err(e)
			},
		}
	}

	// Another writer replaced the record under our lease. Prefer a valid stored pair;
	// otherwise persist ours on top of whatever is there.
	async fn reconcile(&self, ours: CredentialRecord, access: AccessToken) -> Result<AccessToken> {
		for _ in 0..MAX_CAS_ATTEMPTS {
			let now = OffsetDateTime::now_utc();
			let current = self.store.load().await?;
			let expected = match &current {
				Some(stored)
					if !stored.is_rejected()
						&& stored.pair.state_at(now, self.skew) == TokenState::Valid =>
					return Ok(stored.pair.access()),
				Some(stored) => stored.version,
				None => 0,
			};

			if let SaveOutcome::Saved { version } = self.store.save(ours.clone(), expected).await? {
				tracing::info!(version, "Refreshed pair installed after reconciliation.");

				return Ok(access);
			}
		}

		Err(StoreError::Contended { attempts: MAX_CAS_ATTEMPTS }.into())
	}

	// Used after losing a CAS under our own lease: a concurrent writer may have installed a
	// fresh pair, which takes precedence over the failure we were about to report.
	async fn stored_valid_token(&self) -> Result<Option<AccessToken>> {
		let now = OffsetDateTime::now_utc();
		let stored = self.store.load().await?.filter(|record| {
			!record.is_rejected() && record.pair.state_at(now, self.skew) == TokenState::Valid
		});

		Ok(stored.map(|record| record.pair.access()))
	}

	// Polls until the lease holder publishes a result or its lease lapses. `Ok(Some)` hands
	// back the holder's token, `Ok(None)` asks the caller to re-evaluate the record.
	async fn wait_for_holder(
		&self,
		seen_version: u64,
		deadline: OffsetDateTime,
		started: OffsetDateTime,
	) -> Result<Option<AccessToken>> {
		loop {
			tokio::time::sleep(self.poll_interval.unsigned_abs()).await;

			let now = OffsetDateTime::now_utc();
			let record = self.load_authorized().await?;

			if record.version == seen_version && now < deadline {
				continue;
			}
			if record.refresh_lease.as_ref().is_some_and(|lease| lease.expires_at > now) {
				return Ok(None);
			}

			match record.pair.state_at(now, self.skew) {
				TokenState::Valid => return Ok(Some(record.pair.access())),
				state => {
					let holder_failed = record.last_refresh.is_some_and(|report| {
						report.outcome == RefreshOutcome::TransientFailure
							&& report.at.unix_timestamp() >= started.unix_timestamp()
					});

					if !holder_failed {
						return Ok(None);
					}
					if state == TokenState::NearExpiry {
						return Ok(Some(record.pair.access()));
					}

					return Err(TransientError::TokenEndpoint {
						message: "concurrent refresh failed and the access token expired".into(),
						status: None,
						retry_after: None,
					}
					.into());
				},
			}
		}
	}
}
