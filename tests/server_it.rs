// std
use std::net::SocketAddr;
// crates.io
use httpmock::prelude::*;
use tokio::net::TcpListener;
// self
use brokerage_oauth::{
	_preludet::*,
	config::Config,
	exchange::TokenExchanger,
	flows::TokenLifecycleManager,
	http::ReqwestHttpClient,
	server::{AppState, serve_on},
	store::{
		AuthorizationLedger, CredentialRecord, CredentialStore, MemoryLedger, SaveOutcome,
		StoreError, StoreFuture,
	},
};

async fn spawn(state: AppState) -> SocketAddr {
	let listener =
		TcpListener::bind("127.0.0.1:0").await.expect("Loopback listener should bind.");
	let address = listener.local_addr().expect("Listener should expose its address.");

	tokio::spawn(serve_on(listener, state, std::future::pending()));

	address
}

async fn get(address: SocketAddr, path_and_query: &str) -> (u16, String) {
	let response = ReqwestClient::new()
		.get(format!("http://{address}{path_and_query}"))
		.send()
		.await
		.expect("Request should reach the server.");
	let status = response.status().as_u16();
	let body = response.text().await.expect("Body should be readable.");

	(status, body)
}

fn json(body: &str) -> serde_json::Value {
	serde_json::from_str(body).expect("Body should be JSON.")
}

fn state_from_page(html: &str) -> String {
	let start = html.find("state=").expect("Consent link should carry a state.") + "state=".len();

	html[start..].chars().take_while(char::is_ascii_alphanumeric).collect()
}

struct BrokenStore;
impl CredentialStore for BrokenStore {
	fn load(&self) -> StoreFuture<'_, Option<CredentialRecord>> {
		Box::pin(async { Err(StoreError::Backend { message: "disk unreachable".into() }) })
	}

	fn save(
		&self,
		_record: CredentialRecord,
		_expected_version: u64,
	) -> StoreFuture<'_, SaveOutcome> {
		Box::pin(async { Err(StoreError::Backend { message: "disk unreachable".into() }) })
	}

	fn clear(&self) -> StoreFuture<'_, ()> {
		Box::pin(async { Ok(()) })
	}
}

#[tokio::test]
async fn missing_client_id_is_a_server_error() {
	let mut config = test_config("http://127.0.0.1:9");

	config.client_id = None;

	let address = spawn(AppState::from_config(config)).await;
	let (status, body) = get(address, "/auth").await;

	assert_eq!(status, 500);
	assert!(
		json(&body)["error"].as_str().is_some_and(|error| error.contains("UPSTOX_CLIENT_ID"))
	);
}

#[tokio::test]
async fn consent_round_trip_stores_the_token() {
	let server = MockServer::start_async().await;
	let (manager, store, _) = build_reqwest_test_manager(&server.base_url());
	let address = spawn(AppState::new(test_config(&server.base_url()), manager)).await;
	let (status, page) = get(address, "/auth").await;

	assert_eq!(status, 200);
	assert!(page.contains("Authorize access"));
	assert!(page.contains("&amp;state="));

	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).header("content-type", "application/json").body(concat!(
				"{\"access_token\":\"access-from-callback\",",
				"\"refresh_token\":\"refresh-from-callback\",\"expires_in\":86400}",
			));
		})
		.await;
	let state = state_from_page(&page);
	let callback = format!("/auth?code=consent-code&state={state}");
	let (status, page) = get(address, &callback).await;

	assert_eq!(status, 200);
	assert!(page.contains("Authorization complete"));
	assert!(!page.contains("access-from-callback"));

	mock.assert_async().await;

	let stored = store.snapshot().expect("Callback should store a record.");

	assert_eq!(stored.pair.access_token.expose(), "access-from-callback");

	let (status, replay) = get(address, &callback).await;

	assert_eq!(status, 400);
	assert!(replay.contains("Authorization failed"));

	mock.assert_calls_async(1).await;

	let (status, body) = get(address, "/status").await;
	let report = json(&body);

	assert_eq!(status, 200);
	assert_eq!(report["hasValidToken"], true);
	assert_eq!(report["lastRefreshOutcome"], "authorized");
	assert_eq!(report["configPresence"]["clientSecret"], true);
	assert!(!body.contains("access-from-callback"));
	assert!(!body.contains("refresh-from-callback"));
	assert!(!body.contains(TEST_CLIENT_SECRET));
}

#[tokio::test]
async fn brokerage_errors_render_an_escaped_failure_page() {
	let server = MockServer::start_async().await;
	let (manager, _, _) = build_reqwest_test_manager(&server.base_url());
	let address = spawn(AppState::new(test_config(&server.base_url()), manager)).await;
	let (status, page) =
		get(address, "/auth?error=access_denied&error_description=%3Cb%3Edenied%3C%2Fb%3E").await;

	assert_eq!(status, 400);
	assert!(page.contains("access_denied"));
	assert!(page.contains("&lt;b&gt;denied&lt;/b&gt;"));
	assert!(!page.contains("<b>denied</b>"));

	let (status, _) = get(address, "/auth?code=only-a-code").await;

	assert_eq!(status, 400);
}

#[tokio::test]
async fn unknown_state_is_refused() {
	let server = MockServer::start_async().await;
	let (manager, _, _) = build_reqwest_test_manager(&server.base_url());
	let address = spawn(AppState::new(test_config(&server.base_url()), manager)).await;
	let (status, page) = get(address, "/auth?code=some-code&state=forged").await;

	assert_eq!(status, 400);
	assert!(page.contains("Authorization state is invalid"));
}

#[tokio::test]
async fn wrong_methods_and_paths_get_json_errors() {
	let server = MockServer::start_async().await;
	let (manager, _, _) = build_reqwest_test_manager(&server.base_url());
	let address = spawn(AppState::new(test_config(&server.base_url()), manager)).await;
	let response = ReqwestClient::new()
		.post(format!("http://{address}/auth"))
		.body("code=x")
		.send()
		.await
		.expect("Request should reach the server.");

	assert_eq!(response.status().as_u16(), 405);

	let body = response.text().await.expect("Body should be readable.");

	assert!(json(&body)["error"].is_string());

	let (status, body) = get(address, "/tokens").await;

	assert_eq!(status, 404);
	assert!(json(&body)["error"].is_string());
}

#[tokio::test]
async fn store_failure_yields_a_timestamped_status_error() {
	let config: Config = test_config("http://127.0.0.1:9");
	let ledger: Arc<dyn AuthorizationLedger> = Arc::new(MemoryLedger::default());
	let exchanger = TokenExchanger::<ReqwestHttpClient>::from_config(
		&config,
		test_reqwest_http_client(),
		ledger,
	)
	.expect("Exchanger should build.");
	let manager = TokenLifecycleManager::new(exchanger, Arc::new(BrokenStore));
	let address = spawn(AppState::new(config, manager)).await;
	let (status, body) = get(address, "/status").await;
	let error = json(&body);

	assert_eq!(status, 500);
	assert!(error["error"].as_str().is_some_and(|e| e.contains("disk unreachable")));
	assert!(error["timestamp"].is_string());
}
