//! Tests for the client session manager: single-flight refresh, replay,
//! session teardown and timeouts.

mod common;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures::future::join_all;
use quillpress::client::{
    ApiRequest, ApiResponse, ClientError, DEFAULT_TIMEOUT, MemoryStorage, Navigator,
    RefreshError, ReqwestTransport, SessionConfig, SessionManager, StoredTokens, TokenStorage,
    Transport, TransportError,
};
use quillpress::clock::{Clock, ManualClock};
use quillpress::db::{AccountStatus, Role};
use quillpress::jwt::ACCESS_TOKEN_DURATION_SECS;
use quillpress::start_server;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct CountingNavigator {
    calls: AtomicUsize,
}

impl CountingNavigator {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Navigator for CountingNavigator {
    fn to_login(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

struct Tokens {
    access: String,
    refresh: String,
    generation: u32,
}

/// In-process stand-in for the API. Protected paths accept only the
/// current access token; refresh rotates both tokens.
struct FakeServer {
    tokens: Mutex<Tokens>,
    refresh_calls: AtomicUsize,
    unauthorized: AtomicUsize,
    /// Refresh does not answer until this many 401s have gone out
    hold_refresh_until: usize,
    reject_refresh: bool,
    requests: Mutex<Vec<String>>,
}

impl FakeServer {
    fn new() -> Self {
        Self {
            tokens: Mutex::new(Tokens {
                access: "access-0".to_string(),
                refresh: "refresh-0".to_string(),
                generation: 0,
            }),
            refresh_calls: AtomicUsize::new(0),
            unauthorized: AtomicUsize::new(0),
            hold_refresh_until: 0,
            reject_refresh: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn requests_to(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.as_str() == path)
            .count()
    }

    fn current(&self) -> (String, String) {
        let tokens = self.tokens.lock().unwrap();
        (tokens.access.clone(), tokens.refresh.clone())
    }

    fn session_body(&self) -> Value {
        let (access, refresh) = self.current();
        json!({ "accessToken": access, "refreshToken": refresh, "user": user() })
    }

    async fn handle(&self, request: ApiRequest) -> ApiResponse {
        self.requests.lock().unwrap().push(request.path.clone());
        let bearer = request
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
            .and_then(|(_, value)| value.strip_prefix("Bearer "))
            .map(str::to_string);

        match request.path.as_str() {
            "/api/auth/login" => ok(self.session_body()),
            "/api/auth/refresh" => self.refresh(&request).await,
            "/api/auth/logout" => ok(Value::Null),
            "/api/forbidden" => failure(403, "INSUFFICIENT_PERMISSIONS"),
            "/api/inactive" => failure(401, "ACCOUNT_INACTIVE"),
            "/api/always-expired" => self.unauthorized(),
            _ => {
                if bearer.as_deref() == Some(self.current().0.as_str()) {
                    ok(json!({ "user": user() }))
                } else {
                    self.unauthorized()
                }
            }
        }
    }

    fn unauthorized(&self) -> ApiResponse {
        self.unauthorized.fetch_add(1, Ordering::SeqCst);
        failure(401, "TOKEN_EXPIRED")
    }

    async fn refresh(&self, request: &ApiRequest) -> ApiResponse {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        while self.unauthorized.load(Ordering::SeqCst) < self.hold_refresh_until {
            tokio::task::yield_now().await;
        }

        let presented = request
            .body
            .as_ref()
            .and_then(|b| b["refreshToken"].as_str())
            .map(str::to_string);
        {
            let mut tokens = self.tokens.lock().unwrap();
            if self.reject_refresh || presented.as_deref() != Some(tokens.refresh.as_str()) {
                return failure(401, "TOKEN_INVALID");
            }
            tokens.generation += 1;
            tokens.access = format!("access-{}", tokens.generation);
            tokens.refresh = format!("refresh-{}", tokens.generation);
        }
        ok(self.session_body())
    }
}

fn user() -> Value {
    json!({ "id": "u1", "name": "Ada", "email": "a@x.com", "role": "user" })
}

fn ok(data: Value) -> ApiResponse {
    ApiResponse {
        status: 200,
        body: json!({ "success": true, "data": data }),
    }
}

fn failure(status: u16, code: &str) -> ApiResponse {
    ApiResponse {
        status,
        body: json!({ "success": false, "data": { "code": code, "message": code } }),
    }
}

#[derive(Clone)]
struct FakeTransport(Arc<FakeServer>);

impl Transport for FakeTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        Ok(self.0.handle(request).await)
    }
}

/// Transport whose requests never complete.
struct StalledTransport;

impl Transport for StalledTransport {
    async fn send(&self, _request: ApiRequest) -> Result<ApiResponse, TransportError> {
        std::future::pending().await
    }
}

struct Harness {
    server: Arc<FakeServer>,
    storage: Arc<MemoryStorage>,
    navigator: Arc<CountingNavigator>,
    manager: SessionManager<FakeTransport>,
}

/// Manager whose stored access token the server no longer accepts.
fn harness(server: FakeServer) -> Harness {
    let server = Arc::new(server);
    let (_, refresh) = server.current();
    let storage = Arc::new(MemoryStorage::with_tokens(StoredTokens {
        access_token: Some("stale".to_string()),
        refresh_token: Some(refresh),
    }));
    let navigator = Arc::new(CountingNavigator::default());
    let manager = SessionManager::builder(FakeTransport(server.clone()))
        .storage(storage.clone())
        .navigator(navigator.clone())
        .build();
    Harness {
        server,
        storage,
        navigator,
        manager,
    }
}

fn fake_jwt(exp: u64) -> String {
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"u1","exp":{exp}}}"#));
    format!("eyJhbGciOiJIUzI1NiJ9.{payload}.sig")
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let h = harness(FakeServer {
        hold_refresh_until: 5,
        ..FakeServer::new()
    });

    let results = join_all((0..5).map(|_| h.manager.me())).await;

    for result in &results {
        assert_eq!(result.as_ref().unwrap().id, "u1");
    }
    assert_eq!(h.server.refresh_calls(), 1);
    // Five rejected attempts plus five replays
    assert_eq!(h.server.requests_to("/api/auth/me"), 10);

    let tokens = h.storage.load();
    assert_eq!(tokens.access_token.as_deref(), Some("access-1"));
    assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(h.navigator.calls(), 0);
}

#[tokio::test]
async fn test_late_401_uses_already_refreshed_token() {
    let h = harness(FakeServer::new());

    h.manager.me().await.unwrap();
    assert_eq!(h.server.refresh_calls(), 1);

    // A request that was sent with the old token and bounced after the
    // refresh finished does not rotate again
    let token = h
        .manager
        .refresh_token(Some("stale"))
        .await
        .unwrap();
    assert_eq!(token, "access-1");
    assert_eq!(h.server.refresh_calls(), 1);
}

#[tokio::test]
async fn test_refresh_failure_ends_session_once() {
    let h = harness(FakeServer {
        reject_refresh: true,
        hold_refresh_until: 3,
        ..FakeServer::new()
    });

    let results = join_all((0..3).map(|_| h.manager.me())).await;

    for result in results {
        match result {
            Err(ClientError::SessionExpired(RefreshError::Rejected(failure))) => {
                assert_eq!(failure.status, 401);
                assert!(failure.has_code("TOKEN_INVALID"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
    assert_eq!(h.server.refresh_calls(), 1);
    assert_eq!(h.navigator.calls(), 1);
    assert_eq!(h.storage.load(), StoredTokens::default());
    assert!(!h.manager.is_logged_in());
}

#[tokio::test]
async fn test_late_401_after_failed_refresh_does_not_end_session_again() {
    let h = harness(FakeServer {
        reject_refresh: true,
        ..FakeServer::new()
    });

    h.manager.me().await.unwrap_err();
    assert_eq!(h.navigator.calls(), 1);

    // A request sent with the old token bounces after the teardown
    let err = h.manager.refresh_token(Some("stale")).await.unwrap_err();
    match err {
        ClientError::SessionExpired(RefreshError::Rejected(failure)) => {
            assert!(failure.has_code("TOKEN_INVALID"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.server.refresh_calls(), 1);
    assert_eq!(h.navigator.calls(), 1);
}

#[tokio::test]
async fn test_missing_refresh_token_ends_session() {
    let h = harness(FakeServer::new());
    h.storage.save(&StoredTokens {
        access_token: Some("stale".to_string()),
        refresh_token: None,
    });

    let err = h.manager.me().await.unwrap_err();
    assert_eq!(err, ClientError::SessionExpired(RefreshError::NoRefreshToken));
    assert_eq!(h.server.refresh_calls(), 0);
    assert_eq!(h.navigator.calls(), 1);
}

#[tokio::test]
async fn test_replay_happens_once() {
    let h = harness(FakeServer::new());

    let err = h
        .manager
        .request(ApiRequest::get("/api/always-expired"))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(401));
    assert_eq!(err.code(), Some("TOKEN_EXPIRED"));
    assert_eq!(h.server.refresh_calls(), 1);
    assert_eq!(h.server.requests_to("/api/always-expired"), 2);
    // The refresh itself worked, so the session survives
    assert!(h.manager.is_logged_in());
    assert_eq!(h.navigator.calls(), 0);
}

#[tokio::test]
async fn test_non_refreshable_401_ends_session() {
    let h = harness(FakeServer::new());

    let err = h
        .manager
        .request(ApiRequest::get("/api/inactive"))
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some("ACCOUNT_INACTIVE"));
    assert_eq!(h.server.refresh_calls(), 0);
    assert_eq!(h.navigator.calls(), 1);
    assert!(!h.manager.is_logged_in());
}

#[tokio::test]
async fn test_forbidden_is_returned_without_refresh() {
    let h = harness(FakeServer::new());

    let err = h
        .manager
        .request(ApiRequest::get("/api/forbidden"))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(403));
    assert_eq!(err.code(), Some("INSUFFICIENT_PERMISSIONS"));
    assert_eq!(h.server.refresh_calls(), 0);
    assert!(h.manager.is_logged_in());
    assert_eq!(h.navigator.calls(), 0);
}

#[tokio::test]
async fn test_unauthenticated_request_is_not_refreshed() {
    let server = Arc::new(FakeServer::new());
    let navigator = Arc::new(CountingNavigator::default());
    let manager = SessionManager::builder(FakeTransport(server.clone()))
        .navigator(navigator.clone())
        .build();

    let err = manager.me().await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(server.refresh_calls(), 0);
    assert_eq!(navigator.calls(), 0);
}

#[tokio::test]
async fn test_locally_expired_token_refreshes_before_sending() {
    let server = Arc::new(FakeServer::new());
    let clock = Arc::new(ManualClock::new(10_000));
    let storage = Arc::new(MemoryStorage::with_tokens(StoredTokens {
        access_token: Some(fake_jwt(clock.now() - 1)),
        refresh_token: Some("refresh-0".to_string()),
    }));
    let manager = SessionManager::builder(FakeTransport(server.clone()))
        .storage(storage.clone())
        .clock(clock)
        .build();

    manager.me().await.unwrap();

    assert_eq!(server.refresh_calls(), 1);
    assert_eq!(server.unauthorized.load(Ordering::SeqCst), 0);
    assert_eq!(server.requests_to("/api/auth/me"), 1);
}

#[tokio::test]
async fn test_login_and_logout() {
    let server = Arc::new(FakeServer::new());
    let storage = Arc::new(MemoryStorage::new());
    let navigator = Arc::new(CountingNavigator::default());
    let manager = SessionManager::builder(FakeTransport(server.clone()))
        .storage(storage.clone())
        .navigator(navigator.clone())
        .build();

    let user = manager.login("a@x.com", "Secret123").await.unwrap();
    assert_eq!(user.role, Role::User);
    assert_eq!(storage.load().access_token.as_deref(), Some("access-0"));

    manager.me().await.unwrap();
    manager.logout().await;

    assert_eq!(server.requests_to("/api/auth/logout"), 1);
    assert_eq!(storage.load(), StoredTokens::default());
    assert_eq!(navigator.calls(), 1);
}

#[tokio::test]
async fn test_logout_refreshes_expired_access_token_first() {
    let server = Arc::new(FakeServer::new());
    let clock = Arc::new(ManualClock::new(10_000));
    let storage = Arc::new(MemoryStorage::with_tokens(StoredTokens {
        access_token: Some(fake_jwt(clock.now() - 1)),
        refresh_token: Some("refresh-0".to_string()),
    }));
    let navigator = Arc::new(CountingNavigator::default());
    let manager = SessionManager::builder(FakeTransport(server.clone()))
        .storage(storage.clone())
        .navigator(navigator.clone())
        .clock(clock)
        .build();

    manager.logout().await;

    assert_eq!(server.refresh_calls(), 1);
    assert_eq!(server.requests_to("/api/auth/logout"), 1);
    assert_eq!(storage.load(), StoredTokens::default());
    assert_eq!(navigator.calls(), 1);
}

#[tokio::test]
async fn test_logout_with_dead_refresh_token_navigates_once() {
    let h = harness(FakeServer {
        reject_refresh: true,
        ..FakeServer::new()
    });
    h.storage.save(&StoredTokens {
        access_token: Some(fake_jwt(0)),
        refresh_token: Some("refresh-0".to_string()),
    });

    h.manager.logout().await;

    assert_eq!(h.server.refresh_calls(), 1);
    assert_eq!(h.server.requests_to("/api/auth/logout"), 0);
    assert_eq!(h.storage.load(), StoredTokens::default());
    assert_eq!(h.navigator.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_requests_time_out() {
    let config = SessionConfig {
        timeout: Duration::from_secs(3),
        ..SessionConfig::default()
    };
    let manager = SessionManager::builder(StalledTransport)
        .config(config)
        .build();

    let started = tokio::time::Instant::now();
    let err = manager.login("a@x.com", "Secret123").await.unwrap_err();
    assert_eq!(err, ClientError::Transport(TransportError::Timeout));
    assert!(started.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_refresh_times_out_and_ends_session() {
    let navigator = Arc::new(CountingNavigator::default());
    let storage = Arc::new(MemoryStorage::with_tokens(StoredTokens {
        access_token: Some(fake_jwt(0)),
        refresh_token: Some("refresh-0".to_string()),
    }));
    let manager = SessionManager::builder(StalledTransport)
        .storage(storage.clone())
        .navigator(navigator.clone())
        .build();

    let err = manager.me().await.unwrap_err();
    assert_eq!(
        err,
        ClientError::SessionExpired(RefreshError::Transport(TransportError::Timeout))
    );
    assert_eq!(navigator.calls(), 1);
    assert_eq!(storage.load(), StoredTokens::default());
    assert_eq!(DEFAULT_TIMEOUT, Duration::from_secs(10));
}

/// Full round trip against a running server whose clock the test moves.
#[tokio::test]
async fn test_session_renewal_against_server() {
    let app = common::TestApp::new().await;
    app.create_account("a@x.com", Role::User).await;
    let config = common::test_config(app.db.clone(), app.clock.clone());
    let (_handle, addr) = start_server(config, 0).await.unwrap();

    let transport = ReqwestTransport::new(&format!("http://{}", addr), DEFAULT_TIMEOUT).unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let navigator = Arc::new(CountingNavigator::default());
    let manager = SessionManager::builder(transport)
        .storage(storage.clone())
        .navigator(navigator.clone())
        .build();

    let user = manager.login("a@x.com", common::PASSWORD).await.unwrap();
    assert_eq!(user.email, "a@x.com");
    assert_eq!(user.role, Role::User);
    assert_eq!(manager.me().await.unwrap().id, user.id);

    // Server-side expiry drives a refresh and a transparent replay
    let before = storage.load();
    app.clock.advance(ACCESS_TOKEN_DURATION_SECS + 1);
    assert_eq!(manager.me().await.unwrap().id, user.id);
    let after = storage.load();
    assert_ne!(after.access_token, before.access_token);
    assert_ne!(after.refresh_token, before.refresh_token);

    app.clock.advance(ACCESS_TOKEN_DURATION_SECS + 1);
    let results = join_all((0..5).map(|_| manager.me())).await;
    assert!(results.iter().all(Result::is_ok));

    // Rotation kept exactly one live refresh token
    let response = manager
        .request(ApiRequest::get("/api/auth/sessions"))
        .await
        .unwrap();
    assert_eq!(response.data()["sessions"].as_array().unwrap().len(), 1);

    // The superseded refresh token is dead
    let (_, body) = app
        .post(
            "/api/auth/refresh",
            None,
            json!({ "refreshToken": before.refresh_token }),
        )
        .await;
    assert_eq!(common::error_code(&body), "TOKEN_INVALID");

    // Deactivation is not refreshable: the session ends
    app.db
        .accounts()
        .set_status(&user.id, AccountStatus::Inactive, app.clock.now())
        .await
        .unwrap();
    let err = manager.me().await.unwrap_err();
    assert_eq!(err.code(), Some("ACCOUNT_INACTIVE"));
    assert_eq!(navigator.calls(), 1);
    assert!(!manager.is_logged_in());
}

#[tokio::test]
async fn test_logout_against_server_revokes_refresh_token() {
    let app = common::TestApp::new().await;
    app.create_account("a@x.com", Role::User).await;
    let config = common::test_config(app.db.clone(), app.clock.clone());
    let (_handle, addr) = start_server(config, 0).await.unwrap();

    let transport = ReqwestTransport::new(&format!("http://{}", addr), DEFAULT_TIMEOUT).unwrap();
    let manager = SessionManager::builder(transport).build();
    manager.login("a@x.com", common::PASSWORD).await.unwrap();
    let refresh = manager.tokens().refresh_token.unwrap();

    manager.logout().await;
    assert!(!manager.is_logged_in());

    let (_, body) = app
        .post("/api/auth/refresh", None, json!({ "refreshToken": refresh }))
        .await;
    assert_eq!(common::error_code(&body), "TOKEN_INVALID");
}

#[tokio::test]
async fn test_logout_after_idle_revokes_refresh_token() {
    let app = common::TestApp::new().await;
    app.create_account("a@x.com", Role::User).await;
    let config = common::test_config(app.db.clone(), app.clock.clone());
    let (_handle, addr) = start_server(config, 0).await.unwrap();

    let transport = ReqwestTransport::new(&format!("http://{}", addr), DEFAULT_TIMEOUT).unwrap();
    let manager = SessionManager::builder(transport)
        .clock(app.clock.clone())
        .build();
    manager.login("a@x.com", common::PASSWORD).await.unwrap();
    let refresh = manager.tokens().refresh_token.unwrap();

    app.clock.advance(ACCESS_TOKEN_DURATION_SECS + 1);
    manager.logout().await;
    assert!(!manager.is_logged_in());

    let (_, body) = app
        .post("/api/auth/refresh", None, json!({ "refreshToken": refresh }))
        .await;
    assert_eq!(common::error_code(&body), "TOKEN_INVALID");

    // The token minted on the way out was revoked as well
    let account = app
        .db
        .accounts()
        .get_credentials_by_email("a@x.com")
        .await
        .unwrap()
        .unwrap()
        .account;
    let remaining = app.db.tokens().list_by_account(account.id).await.unwrap();
    assert!(remaining.is_empty());
}
