//! Token provider seam consumed by the monitoring job.

// self
use crate::{_prelude::*, auth::AccessToken, flows::TokenLifecycleManager, http::TokenHttpClient};

/// Boxed future returned by [`AccessTokenSource::get_valid_token`].
pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<AccessToken>> + 'a + Send>>;

/// Anything able to hand out a currently valid access token.
pub trait AccessTokenSource
where
	Self: Send + Sync,
{
	/// Resolves with a usable token or the reason none is available.
	///
	/// [`Error::requires_reauthorization`] is `true` when only the human consent step helps.
	fn get_valid_token(&self) -> TokenFuture<'_>;
}
impl<C> AccessTokenSource for TokenLifecycleManager<C>
where
	C: ?Sized + TokenHttpClient,
{
	fn get_valid_token(&self) -> TokenFuture<'_> {
		Box::pin(TokenLifecycleManager::get_valid_token(self))
	}
}
impl<T> AccessTokenSource for Arc<T>
where
	T: ?Sized + AccessTokenSource,
{
	fn get_valid_token(&self) -> TokenFuture<'_> {
		(**self).get_valid_token()
	}
}
