//! Client session manager with silent, single-flight token refresh.
//!
//! Every request carries the stored access token. When the server answers
//! 401 with a refreshable code, one refresh cycle runs and the request is
//! replayed once with the new token. Concurrent 401s share the same
//! in-flight refresh instead of each rotating the refresh token.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde_json::{Value, json};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::{ApiFailure, ClientError, RefreshError, TransportError};
use super::model::{Session, User, normalize, normalize_user};
use super::storage::{MemoryStorage, StoredTokens, TokenStorage};
use super::transport::{ApiRequest, ApiResponse, Transport};
use crate::clock::{Clock, SystemClock};

/// Default timeout for every call, refresh and login included.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Error codes after which a refresh is worth trying.
const REFRESHABLE_CODES: [&str; 2] = ["TOKEN_EXPIRED", "TOKEN_INVALID"];

/// Hook for sending the user back to the login view.
pub trait Navigator: Send + Sync {
    fn to_login(&self);
}

/// Navigator that does nothing, for headless use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn to_login(&self) {}
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub timeout: Duration,
    pub login_path: String,
    pub refresh_path: String,
    pub logout_path: String,
    pub me_path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            login_path: "/api/auth/login".to_string(),
            refresh_path: "/api/auth/refresh".to_string(),
            logout_path: "/api/auth/logout".to_string(),
            me_path: "/api/auth/me".to_string(),
        }
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<String, RefreshError>>>;

struct Inner<T> {
    transport: T,
    storage: Arc<dyn TokenStorage>,
    navigator: Arc<dyn Navigator>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    /// The refresh currently in flight, if any
    refresh: Mutex<Option<RefreshFuture>>,
}

/// Holds the session tokens and sends authenticated requests.
/// Cheap to clone; clones share tokens and the refresh guard.
pub struct SessionManager<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for SessionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

pub struct SessionManagerBuilder<T: Transport> {
    transport: T,
    storage: Arc<dyn TokenStorage>,
    navigator: Arc<dyn Navigator>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
}

impl<T: Transport> SessionManagerBuilder<T> {
    pub fn storage(mut self, storage: Arc<dyn TokenStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> SessionManager<T> {
        SessionManager {
            inner: Arc::new(Inner {
                transport: self.transport,
                storage: self.storage,
                navigator: self.navigator,
                clock: self.clock,
                config: self.config,
                refresh: Mutex::new(None),
            }),
        }
    }
}

/// Read `exp` from a JWT payload without checking the signature.
/// Only used to skip requests that would certainly be rejected.
pub fn token_expiry(token: &str) -> Option<u64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims["exp"].as_u64()
}

async fn with_timeout<F, R>(timeout: Duration, future: F) -> Result<R, TransportError>
where
    F: Future<Output = Result<R, TransportError>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .unwrap_or(Err(TransportError::Timeout))
}

impl<T: Transport> SessionManager<T> {
    /// Start building a manager with in-memory storage, no navigation,
    /// the system clock and default paths.
    pub fn builder(transport: T) -> SessionManagerBuilder<T> {
        SessionManagerBuilder {
            transport,
            storage: Arc::new(MemoryStorage::new()),
            navigator: Arc::new(NoopNavigator),
            clock: Arc::new(SystemClock),
            config: SessionConfig::default(),
        }
    }

    pub fn tokens(&self) -> StoredTokens {
        self.inner.storage.load()
    }

    pub fn is_logged_in(&self) -> bool {
        self.tokens().access_token.is_some()
    }

    /// Log in and store the returned tokens.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, ClientError> {
        let request = ApiRequest::post(
            self.inner.config.login_path.clone(),
            json!({ "email": email, "password": password }),
        );
        let response = self.inner.send(request).await?;
        if !response.is_success() {
            return Err(ClientError::Api(ApiFailure::from_body(
                response.status,
                &response.body,
            )));
        }

        let session: Session = normalize(response.data())?;
        self.inner.storage.save(&StoredTokens {
            access_token: Some(session.access_token),
            refresh_token: session.refresh_token,
        });
        info!(account_id = %session.user.id, "Logged in");
        Ok(session.user)
    }

    /// Tell the server to revoke the refresh token, then forget both
    /// tokens and go to the login view whatever the server said.
    ///
    /// An expired access token is refreshed first so the revocation still
    /// reaches the server after the user has been idle.
    pub async fn logout(&self) {
        match self.revoke_session().await {
            Ok(true) => debug!("Server session revoked"),
            Ok(false) => {}
            // A failed refresh has already cleared the tokens and navigated
            Err(ClientError::SessionExpired(e)) => {
                debug!(error = %e, "Session already ended during logout");
                return;
            }
            Err(e) => debug!(error = %e, "Logout not confirmed by server"),
        }
        self.inner.end_session();
    }

    /// Returns `false` when there is no session to revoke.
    async fn revoke_session(&self) -> Result<bool, ClientError> {
        let Some(mut access) = self.inner.storage.load().access_token else {
            return Ok(false);
        };

        if self.inner.is_expired(&access) {
            debug!("Access token expired locally, refreshing before logout");
            access = self.refresh_token(Some(&access)).await?;
        }

        let mut response = self.inner.send(self.inner.logout_request(&access)).await?;
        if response.status == 401 {
            let failure = ApiFailure::from_body(response.status, &response.body);
            if !REFRESHABLE_CODES.iter().any(|code| failure.has_code(code)) {
                return Err(ClientError::Api(failure));
            }
            access = self.refresh_token(Some(&access)).await?;
            response = self.inner.send(self.inner.logout_request(&access)).await?;
        }
        into_result(response).map(|_| true)
    }

    /// The current account.
    pub async fn me(&self) -> Result<User, ClientError> {
        let response = self
            .request(ApiRequest::get(self.inner.config.me_path.clone()))
            .await?;
        normalize_user(response.data())
    }

    /// Send an authenticated request, refreshing and replaying once on a
    /// refreshable 401. Returns the response only if it is a success.
    pub async fn request(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let mut token = self.inner.storage.load().access_token;

        if let Some(current) = token.as_deref() {
            if self.inner.is_expired(current) {
                debug!("Access token expired locally, refreshing before send");
                token = Some(self.refresh_token(Some(current)).await?);
            }
        }

        let response = self
            .inner
            .send(request.with_bearer(token.as_deref()))
            .await?;

        if response.status != 401 {
            return into_result(response);
        }

        let failure = ApiFailure::from_body(response.status, &response.body);
        let Some(sent) = token else {
            return Err(ClientError::Api(failure));
        };

        if !REFRESHABLE_CODES.iter().any(|code| failure.has_code(code)) {
            warn!(code = ?failure.code, "Session rejected, logging out");
            self.inner.end_session();
            return Err(ClientError::Api(failure));
        }

        let fresh = self.refresh_token(Some(&sent)).await?;
        debug!("Replaying request with refreshed token");
        let replayed = self.inner.send(request.with_bearer(Some(&fresh))).await?;
        into_result(replayed)
    }

    /// Obtain a usable access token after `stale` was rejected.
    ///
    /// Joins the refresh already in flight if there is one. If the stored
    /// token has already moved on from `stale`, that token is returned
    /// without starting another refresh.
    pub async fn refresh_token(&self, stale: Option<&str>) -> Result<String, ClientError> {
        let refresh = {
            let mut slot = self
                .inner
                .refresh
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            // A finished future left behind by a dropped caller is stale
            let in_flight = slot.as_ref().filter(|f| f.peek().is_none()).cloned();
            match in_flight {
                Some(in_flight) => in_flight,
                None => {
                    let current = self.inner.storage.load().access_token;
                    match (current, stale) {
                        (Some(current), Some(stale)) if current != stale => return Ok(current),
                        // The last refresh failed and nobody has logged in since
                        (None, _) => {
                            if let Some(Err(e)) = slot.as_ref().and_then(|f| f.peek()) {
                                return Err(ClientError::SessionExpired(e.clone()));
                            }
                        }
                        _ => {}
                    }
                    let inner = self.inner.clone();
                    let refresh = async move { inner.run_refresh().await }.boxed().shared();
                    *slot = Some(refresh.clone());
                    refresh
                }
            }
        };

        refresh.await.map_err(ClientError::SessionExpired)
    }
}

fn into_result(response: ApiResponse) -> Result<ApiResponse, ClientError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ClientError::Api(ApiFailure::from_body(
            response.status,
            &response.body,
        )))
    }
}

impl<T: Transport> Inner<T> {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        with_timeout(self.config.timeout, self.transport.send(request)).await
    }

    fn is_expired(&self, token: &str) -> bool {
        token_expiry(token).is_some_and(|exp| self.clock.now() >= exp)
    }

    /// Logout call revoking whichever refresh token is stored now.
    fn logout_request(&self, access: &str) -> ApiRequest {
        ApiRequest::post(
            self.config.logout_path.clone(),
            json!({ "refreshToken": self.storage.load().refresh_token }),
        )
        .with_bearer(Some(access))
    }

    fn end_session(&self) {
        self.storage.clear();
        self.navigator.to_login();
    }

    /// One refresh cycle. Runs once per shared future, so the failure
    /// path (clear tokens, go to login) also runs once.
    async fn run_refresh(&self) -> Result<String, RefreshError> {
        let result = self.exchange_refresh_token().await;
        match &result {
            Ok(_) => debug!("Access token refreshed"),
            Err(e) => {
                warn!(error = %e, "Refresh failed, ending session");
                self.end_session();
            }
        }
        result
    }

    async fn exchange_refresh_token(&self) -> Result<String, RefreshError> {
        let refresh_token = self
            .storage
            .load()
            .refresh_token
            .ok_or(RefreshError::NoRefreshToken)?;

        let request = ApiRequest::post(
            self.config.refresh_path.clone(),
            json!({ "refreshToken": refresh_token }),
        );
        let response = self.send(request).await.map_err(RefreshError::Transport)?;

        if !response.is_success() {
            return Err(RefreshError::Rejected(ApiFailure::from_body(
                response.status,
                &response.body,
            )));
        }

        let session: Session =
            normalize(response.data()).map_err(|e| RefreshError::Parse(e.to_string()))?;
        self.storage.save(&StoredTokens {
            access_token: Some(session.access_token.clone()),
            refresh_token: session.refresh_token.or(Some(refresh_token)),
        });
        Ok(session.access_token)
    }
}
