//! Token lifecycle orchestration on top of the exchanger and the credential store.
//!
//! [`TokenLifecycleManager`] is the only component that writes the credential record. Every
//! write is a compare-and-swap on the record version, which is what keeps concurrent scheduled
//! runs (threads or separate processes) from refreshing the same credential twice.

pub mod authorize;
pub mod refresh;

pub use authorize::*;

// self
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;
use crate::{
	_prelude::*,
	auth::{AccessToken, TokenPair},
	config::Config,
	exchange::TokenExchanger,
	http::TokenHttpClient,
	store::{
		CredentialRecord, CredentialStore, FileLedger, FileStore, RefreshOutcome, SaveOutcome,
		StoreError,
	},
};

/// Upper bound on compare-and-swap retries for a single write.
pub const MAX_CAS_ATTEMPTS: u32 = 5;

/// Manager specialized for the crate's default reqwest transport.
#[cfg(feature = "reqwest")]
pub type ReqwestTokenLifecycleManager = TokenLifecycleManager<ReqwestHttpClient>;

/// Decides between reuse, refresh, and re-authorization for the single stored credential.
pub struct TokenLifecycleManager<C>
where
	C: ?Sized + TokenHttpClient,
{
	exchanger: Arc<TokenExchanger<C>>,
	store: Arc<dyn CredentialStore>,
	skew: Duration,
	poll_interval: Duration,
	lease_ttl: Duration,
}
impl<C> TokenLifecycleManager<C>
where
	C: ?Sized + TokenHttpClient,
{
	const DEFAULT_POLL_INTERVAL: Duration = Duration::milliseconds(250);

	/// Builds a manager over the file-backed store and ledger at
	/// `config.credential_store_location`, calling the token endpoint through `http_client`.
	pub fn from_config_with_transport(
		config: &Config,
		http_client: impl Into<Arc<C>>,
	) -> Result<Self> {
		let location = config.credential_store_location()?;
		let store = Arc::new(FileStore::open(location)?);
		let ledger = Arc::new(FileLedger::beside(location)?);
		let exchanger = TokenExchanger::from_config(config, http_client, ledger)?;

		Ok(Self::new(exchanger, store).with_skew(config.refresh_skew))
	}

	/// Creates a manager with the default skew (90s).
	pub fn new(exchanger: TokenExchanger<C>, store: Arc<dyn CredentialStore>) -> Self {
		Self {
			exchanger: Arc::new(exchanger),
			store,
			skew: crate::config::DEFAULT_REFRESH_SKEW,
			poll_interval: Self::DEFAULT_POLL_INTERVAL,
			lease_ttl: Duration::seconds(60),
		}
	}

	/// Overrides how long before expiry a pair counts as near expiry.
	pub fn with_skew(mut self, skew: Duration) -> Self {
		self.skew = skew.max(Duration::ZERO);

		self
	}

	/// Overrides how often a waiting invocation re-reads the record while another one refreshes.
	pub fn with_poll_interval(mut self, interval: Duration) -> Self {
		self.poll_interval = interval.max(Duration::milliseconds(1));

		self
	}

	/// Overrides how long a refresh lease stays exclusive before others may take it over.
	pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
		self.lease_ttl = ttl.max(Duration::seconds(1));

		self
	}

	/// Exchanger used for token endpoint calls.
	pub fn exchanger(&self) -> &TokenExchanger<C> {
		&self.exchanger
	}

	/// Backing credential store.
	pub fn store(&self) -> &Arc<dyn CredentialStore> {
		&self.store
	}

	/// Refresh skew in effect.
	pub fn skew(&self) -> Duration {
		self.skew
	}

	/// Initiator sharing this manager's authorization ledger.
	pub fn authorization_initiator(&self) -> AuthorizationInitiator {
		AuthorizationInitiator::new(self.exchanger.ledger().clone())
	}

	/// Exchanges a callback's `code`/`state` and installs the resulting pair.
	///
	/// The new record replaces whatever is stored, including a rejected credential, and
	/// reports [`RefreshOutcome::Authorized`].
	pub async fn complete_authorization(&self, code: &str, state: &str) -> Result<AccessToken> {
		let pair = self.exchanger.exchange_code(code, state).await?;
		let access = pair.access();

		self.install(pair, RefreshOutcome::Authorized).await?;

		Ok(access)
	}

	/// Unconditionally replaces the stored record with `pair`.
	async fn install(&self, pair: TokenPair, outcome: RefreshOutcome) -> Result<u64> {
		let record = CredentialRecord::new(pair).with_report(outcome, OffsetDateTime::now_utc());

		for _ in 0..MAX_CAS_ATTEMPTS {
			let current = self.store.load().await?.map(|stored| stored.version).unwrap_or(0);

			match self.store.save(record.clone(), current).await? {
				SaveOutcome::Saved { version } => {
					tracing::info!(
						version,
						outcome = outcome.as_str(),
						"Credential record installed."
					);

					return Ok(version);
				},
				SaveOutcome::VersionConflict { current } => {
					tracing::debug!(?current, "Install lost a version race; retrying.");
				},
			}
		}

		Err(StoreError::Contended { attempts: MAX_CAS_ATTEMPTS }.into())
	}
}
#[cfg(feature = "reqwest")]
impl TokenLifecycleManager<ReqwestHttpClient> {
	/// Builds the production manager: file-backed store and ledger with a reqwest transport
	/// honouring `config.request_timeout`.
	pub fn from_config(config: &Config) -> Result<Self> {
		let http_client = ReqwestHttpClient::with_timeout(config.request_timeout)?;

		Self::from_config_with_transport(config, http_client)
	}
}
impl<C> Clone for TokenLifecycleManager<C>
where
	C: ?Sized + TokenHttpClient,
{
	fn clone(&self) -> Self {
		Self {
			exchanger: self.exchanger.clone(),
			store: self.store.clone(),
			skew: self.skew,
			poll_interval: self.poll_interval,
			lease_ttl: self.lease_ttl,
		}
	}
}
impl<C> Debug for TokenLifecycleManager<C>
where
	C: ?Sized + TokenHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenLifecycleManager")
			.field("exchanger", &self.exchanger)
			.field("skew", &self.skew)
			.field("poll_interval", &self.poll_interval)
			.field("lease_ttl", &self.lease_ttl)
			.finish()
	}
}
