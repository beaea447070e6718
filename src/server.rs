//! HTTP endpoints for the one-time consent flow and status checks.
//!
//! - `GET /auth` without parameters renders the consent link.
//! - `GET /auth?code=..&state=..` completes the exchange and stores the pair.
//! - `GET /status` returns the [`StatusReport`](crate::status::StatusReport) as JSON.
//!
//! Other methods on known paths get a 405 JSON body; unknown paths a 404 JSON body.

pub mod pages;

// std
use std::{io, net::SocketAddr};
// crates.io
use axum::{
	Router,
	extract::{Query, State},
	http::StatusCode,
	response::{Html, IntoResponse, Json, Response},
	routing::get,
};
use tokio::net::TcpListener;
// self
use crate::{
	_prelude::*,
	config::Config,
	flows::{ReqwestTokenLifecycleManager, TokenLifecycleManager},
	status::StatusReporter,
};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
	config: Arc<Config>,
	manager: Result<ReqwestTokenLifecycleManager, Arc<str>>,
	status: StatusReporter,
}
impl AppState {
	/// Wires state around an already built manager.
	pub fn new(config: Config, manager: ReqwestTokenLifecycleManager) -> Self {
		let status = StatusReporter::new(&config).with_store(manager.store().clone());

		Self { config: Arc::new(config), manager: Ok(manager), status }
	}

	/// Builds the production manager from `config`.
	///
	/// A configuration problem does not prevent the server from starting; `/auth` reports it
	/// as a 500 JSON error and `/status` shows which settings are missing.
	pub fn from_config(config: Config) -> Self {
		let manager = TokenLifecycleManager::from_config(&config).map_err(|e| {
			tracing::warn!(error = %e, "Token lifecycle unavailable until configuration is fixed.");

			Arc::<str>::from(e.to_string())
		});
		let status = match &manager {
			Ok(manager) => StatusReporter::new(&config).with_store(manager.store().clone()),
			Err(_) => StatusReporter::from_config(&config).unwrap_or_else(|e| {
				tracing::warn!(error = %e, "Credential store unavailable for status reports.");

				StatusReporter::new(&config)
			}),
		};

		Self { config: Arc::new(config), manager, status }
	}

	fn manager(&self) -> Result<&ReqwestTokenLifecycleManager, Response> {
		self.manager.as_ref().map_err(|e| error_json(StatusCode::INTERNAL_SERVER_ERROR, e, false))
	}
}
impl Debug for AppState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AppState")
			.field("manager_ready", &self.manager.is_ok())
			.field("status", &self.status)
			.finish()
	}
}

/// Query parameters the brokerage appends to the redirect.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AuthParams {
	/// Authorization code.
	pub code: Option<String>,
	/// Echoed state nonce.
	pub state: Option<String>,
	/// OAuth error code when consent failed.
	pub error: Option<String>,
	/// Human-readable companion to `error`.
	pub error_description: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
	error: &'a str,
	#[serde(with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
	timestamp: Option<OffsetDateTime>,
}

/// Builds the router serving `/auth` and `/status`.
pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/auth", get(auth).fallback(method_not_allowed))
		.route("/status", get(status).fallback(method_not_allowed))
		.fallback(not_found)
		.with_state(state)
}

/// Binds `config.bind_address` and serves until Ctrl-C.
pub async fn serve(config: Config) -> io::Result<()> {
	let listener = TcpListener::bind(config.bind_address).await?;

	serve_on(listener, AppState::from_config(config), shutdown_signal()).await
}

/// Serves on an already bound `listener` until `shutdown` resolves.
pub async fn serve_on<F>(listener: TcpListener, state: AppState, shutdown: F) -> io::Result<()>
where
	F: 'static + Send + Future<Output = ()>,
{
	let address: SocketAddr = listener.local_addr()?;

	tracing::info!(%address, "Authorization endpoints listening.");

	axum::serve(listener, router(state)).with_graceful_shutdown(shutdown).await
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		tracing::error!(error = %e, "Failed to listen for the shutdown signal.");
	}

	tracing::info!("Shutdown signal received.");
}

async fn auth(State(state): State<AppState>, Query(params): Query<AuthParams>) -> Response {
	if let Some(error) = params.error.as_deref() {
		let detail = match params.error_description.as_deref() {
			Some(description) => format!("The brokerage reported `{error}`: {description}"),
			None => format!("The brokerage reported `{error}`."),
		};

		tracing::warn!(error, "Brokerage redirected with an authorization error.");

		return page(StatusCode::BAD_REQUEST, pages::failure("Authorization failed", &detail));
	}

	match (params.code.as_deref(), params.state.as_deref()) {
		(None, None) => start_authorization(&state).await,
		(Some(code), Some(nonce)) => complete_authorization(&state, code, nonce).await,
		_ => page(
			StatusCode::BAD_REQUEST,
			pages::failure(
				"Authorization failed",
				"The callback must carry both `code` and `state`.",
			),
		),
	}
}

async fn start_authorization(state: &AppState) -> Response {
	if let Err(e) = state.config.client_id().and(state.config.redirect_uri()) {
		return error_json(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string(), false);
	}

	let manager = match state.manager() {
		Ok(manager) => manager,
		Err(response) => return response,
	};

	match manager.authorization_initiator().build_authorization_url(&state.config).await {
		Ok(request) => page(StatusCode::OK, pages::authorize(&request.url, request.expires_at)),
		Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string(), false),
	}
}

async fn complete_authorization(state: &AppState, code: &str, nonce: &str) -> Response {
	let manager = match state.manager() {
		Ok(manager) => manager,
		Err(response) => return response,
	};

	match manager.complete_authorization(code, nonce).await {
		Ok(token) => {
			tracing::info!(expires_at = %token.expires_at, "Authorization completed.");

			page(StatusCode::OK, pages::success(token.expires_at))
		},
		Err(Error::Config(e)) =>
			error_json(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string(), false),
		Err(e) => {
			let status = match &e {
				Error::Transient(_) => StatusCode::BAD_GATEWAY,
				Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
				_ => StatusCode::BAD_REQUEST,
			};

			page(status, pages::failure("Authorization failed", &e.to_string()))
		},
	}
}

async fn status(State(state): State<AppState>) -> Response {
	match state.status.get_status().await {
		Ok(report) => Json(report).into_response(),
		Err(e) => {
			tracing::error!(error = %e, "Status report failed.");

			error_json(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string(), true)
		},
	}
}

async fn method_not_allowed() -> Response {
	error_json(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed.", false)
}

async fn not_found() -> Response {
	error_json(StatusCode::NOT_FOUND, "Not found.", false)
}

fn page(status: StatusCode, html: String) -> Response {
	(status, Html(html)).into_response()
}

fn error_json(status: StatusCode, error: &str, timestamped: bool) -> Response {
	let timestamp = timestamped.then(OffsetDateTime::now_utc);

	(status, Json(ErrorBody { error, timestamp })).into_response()
}
