//! Session API endpoints.
//!
//! - POST `/login` - Exchange email and password for a token pair
//! - POST `/register` - Create an account and return a token pair
//! - POST `/refresh` - Rotate a refresh token into a new pair
//! - GET `/me` - Current account
//! - POST `/logout` - Revoke the presented refresh token
//! - GET `/sessions` - List tracked refresh tokens for the current account
//! - DELETE `/sessions/{jti}` - Revoke one of them

use axum::{
    Router,
    extract::{FromRequestParts, Path, Request, State},
    http::{StatusCode, request::Parts},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::error::{ApiError, ApiJson, ResultExt, ack, success};
use super::validation::{validate_email, validate_name, validate_password};
use crate::auth::{
    AuthError, AuthErrorKind, ErrorCode, Identity, authenticate, extract_client_ip,
    refresh_token_from,
};
use crate::db::{Account, Database, NewAccount, NewToken, Role, normalize_email};
use crate::impl_has_auth_backend;
use crate::jwt::{AccessTokenResult, RefreshTokenResult, TokenService};
use crate::lockout::{LockState, LockoutPolicy};
use crate::password::PasswordHasher;
use crate::rate_limit::{RateLimitConfig, rate_limit_refresh, rate_limit_register};

/// Upper bound for a refresh request body.
const REFRESH_BODY_LIMIT: usize = 16 * 1024;

#[derive(Clone)]
pub struct AuthApiState {
    pub db: Database,
    pub tokens: Arc<TokenService>,
    pub hasher: PasswordHasher,
    pub lockout: LockoutPolicy,
    pub rate_limits: Arc<RateLimitConfig>,
}

impl_has_auth_backend!(AuthApiState);

pub fn router(state: AuthApiState, no_signup: bool) -> Router {
    let public = Router::new()
        .route("/login", post(login))
        .with_state(state.clone());

    let refresh = Router::new()
        .route("/refresh", post(refresh))
        .route_layer(middleware::from_fn_with_state(
            state.rate_limits.clone(),
            rate_limit_refresh,
        ))
        .with_state(state.clone());

    let protected = Router::new()
        .route("/me", get(me))
        .route("/logout", post(logout))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{jti}", delete(revoke_session))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            authenticate::<AuthApiState>,
        ))
        .with_state(state.clone());

    let router = Router::new().merge(public).merge(refresh).merge(protected);

    if no_signup {
        router
    } else {
        let register = Router::new()
            .route("/register", post(register))
            .route_layer(middleware::from_fn_with_state(
                state.rate_limits.clone(),
                rate_limit_register,
            ))
            .with_state(state);
        router.merge(register)
    }
}

/// Client IP as seen through the configured proxy header, if any.
pub struct ClientIp(pub Option<String>);

impl FromRequestParts<AuthApiState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AuthApiState,
    ) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(extract_client_ip(
            parts,
            state.rate_limits.ip_header.as_deref(),
        )))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    access_token: String,
    refresh_token: String,
    user: Account,
}

impl AuthApiState {
    /// Issue a fresh access/refresh pair for an account.
    fn mint_pair(
        &self,
        account: &Account,
    ) -> Result<(AccessTokenResult, RefreshTokenResult), ApiError> {
        let access = self
            .tokens
            .issue_access_token(&account.uuid, &account.email, account.role)
            .map_err(|e| {
                error!(error = %e, "Failed to issue access token");
                ApiError::internal("Failed to issue token")
            })?;
        let refresh = self
            .tokens
            .issue_refresh_token(&account.uuid)
            .map_err(|e| {
                error!(error = %e, "Failed to issue refresh token");
                ApiError::internal("Failed to issue token")
            })?;
        Ok((access, refresh))
    }

    /// Issue a pair and start tracking its refresh token.
    async fn start_session(
        &self,
        account: Account,
        ip: Option<&str>,
    ) -> Result<SessionResponse, ApiError> {
        let (access, refresh) = self.mint_pair(&account)?;
        self.db
            .tokens()
            .create(NewToken {
                jti: &refresh.jti,
                account_id: account.id,
                ip,
                issued_at: refresh.issued_at,
                expires_at: refresh.expires_at,
            })
            .await
            .db_err("Failed to store refresh token")?;

        Ok(SessionResponse {
            access_token: access.token,
            refresh_token: refresh.token,
            user: account,
        })
    }
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn login(
    State(state): State<AuthApiState>,
    ClientIp(ip): ClientIp,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&payload.email);
    if email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::bad_request("Email and password are required"));
    }

    state
        .rate_limits
        .check_login(ip.as_deref().unwrap_or("unknown"), &email)?;

    let invalid = || ApiError::unauthorized(ErrorCode::InvalidCredentials, "Invalid email or password");

    let Some(credentials) = state
        .db
        .accounts()
        .get_credentials_by_email(&email)
        .await
        .db_err("Failed to load account")?
    else {
        debug!(email = %email, "Login for unknown email");
        return Err(invalid());
    };
    let account = credentials.account;

    let now = state.tokens.now();
    let lock = LockState::from_stored(account.login_attempts, account.lock_until);

    if let Some(until) = state.lockout.locked_until(lock, now) {
        warn!(account_id = %account.uuid, until, "Login attempt on locked account");
        return Err(AuthError::new(AuthErrorKind::AccountLocked).into());
    }

    let valid = state
        .hasher
        .verify(&payload.password, &credentials.password_hash)
        .await
        .map_err(|e| {
            error!(error = %e, "Password verification failed");
            ApiError::internal("Internal server error")
        })?;

    if !valid {
        let next = state.lockout.register_failure(lock, now);
        let (attempts, lock_until) = next.to_stored(state.lockout.threshold);
        state
            .db
            .accounts()
            .set_login_state(account.id, attempts, lock_until, now)
            .await
            .db_err("Failed to record login attempt")?;

        match next {
            LockState::Locked { until } => {
                warn!(account_id = %account.uuid, until, "Account locked after failed logins")
            }
            LockState::Unlocked { attempts } => {
                debug!(account_id = %account.uuid, attempts, "Failed login")
            }
        }
        return Err(invalid());
    }

    if !account.is_active() {
        info!(account_id = %account.uuid, "Login refused for inactive account");
        return Err(AuthError::new(AuthErrorKind::AccountInactive).into());
    }

    let mut account = account;
    if account.login_attempts > 0 || account.lock_until.is_some() {
        let (attempts, lock_until) = state
            .lockout
            .register_success()
            .to_stored(state.lockout.threshold);
        state
            .db
            .accounts()
            .set_login_state(account.id, attempts, lock_until, now)
            .await
            .db_err("Failed to reset login attempts")?;
        account.login_attempts = attempts;
        account.lock_until = lock_until;
        account.updated_at = now;
    }

    info!(account_id = %account.uuid, "Login succeeded");
    let session = state.start_session(account, ip.as_deref()).await?;
    Ok(success(session))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    name: String,
    email: String,
    password: String,
    confirm_password: String,
    #[serde(default)]
    role: Option<String>,
}

async fn register(
    State(state): State<AuthApiState>,
    ClientIp(ip): ClientIp,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = validate_name(&payload.name)?;
    validate_email(&payload.email)?;
    validate_password(&payload.password)?;
    if payload.password != payload.confirm_password {
        return Err(ApiError::bad_request("Passwords do not match"));
    }

    match payload.role.as_deref().map(str::trim) {
        None | Some("") | Some("user") => {}
        Some("admin") => {
            warn!("Rejected self-registration as admin");
            return Err(ApiError::bad_request("Cannot register as admin"));
        }
        Some(_) => return Err(ApiError::bad_request("Role must be 'user'")),
    }

    let email = normalize_email(&payload.email);
    if state
        .db
        .accounts()
        .email_exists(&email)
        .await
        .db_err("Failed to check email")?
    {
        return Err(ApiError::conflict("Email is already registered"));
    }

    let password_hash = state.hasher.hash(&payload.password).await.map_err(|e| {
        error!(error = %e, "Failed to hash password");
        ApiError::internal("Internal server error")
    })?;

    let uuid = uuid::Uuid::new_v4().to_string();
    let id = create_account(
        &state.db,
        NewAccount {
            uuid: &uuid,
            name,
            email: &email,
            password_hash: &password_hash,
            role: Role::User,
        },
        state.tokens.now(),
    )
    .await?;

    let account = state
        .db
        .accounts()
        .get_by_id(id)
        .await
        .db_err("Failed to load account")?
        .ok_or_else(|| ApiError::internal("Account vanished after creation"))?;

    info!(account_id = %account.uuid, "Account registered");
    let session = state.start_session(account, ip.as_deref()).await?;
    Ok((StatusCode::CREATED, success(session)))
}

/// Insert an account, reporting a unique-email race as a conflict.
pub(crate) async fn create_account(
    db: &Database,
    new: NewAccount<'_>,
    now: u64,
) -> Result<i64, ApiError> {
    match db.accounts().create(new, now).await {
        Ok(id) => Ok(id),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            Err(ApiError::conflict("Email is already registered"))
        }
        Err(e) => Err(ApiError::db_error("Failed to create account", e)),
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Parse an optional JSON body. Empty or non-JSON bodies carry no token.
async fn read_refresh_body(body: axum::body::Body) -> RefreshRequest {
    match axum::body::to_bytes(body, REFRESH_BODY_LIMIT).await {
        Ok(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes).unwrap_or_default(),
        _ => RefreshRequest::default(),
    }
}

async fn refresh(
    State(state): State<AuthApiState>,
    request: Request,
) -> Result<impl IntoResponse, ApiError> {
    let (parts, body) = request.into_parts();
    let body = read_refresh_body(body).await;
    let ip = extract_client_ip(&parts, state.rate_limits.ip_header.as_deref());

    let token = refresh_token_from(body.refresh_token.as_deref(), &parts.headers)
        .ok_or(AuthError::new(AuthErrorKind::NoToken))?;

    let invalid = || ApiError::from(AuthError::new(AuthErrorKind::TokenInvalid));

    let claims = state.tokens.verify_refresh_token(token).map_err(|e| {
        debug!(reason = %e, "Refresh token rejected");
        invalid()
    })?;

    let tracked = state
        .db
        .tokens()
        .get_by_jti(&claims.jti)
        .await
        .db_err("Failed to check refresh token")?;

    let Some(tracked) = tracked else {
        warn!(account_id = %claims.sub, jti = %claims.jti, "Superseded or revoked refresh token presented");
        return Err(invalid());
    };

    let account = state
        .db
        .accounts()
        .get_by_uuid(&claims.sub)
        .await
        .db_err("Failed to load account")?
        .ok_or(AuthError::new(AuthErrorKind::AccountNotFound))?;

    if tracked.account_id != account.id {
        warn!(account_id = %account.uuid, jti = %claims.jti, "Refresh token tracked for another account");
        return Err(invalid());
    }

    if !account.is_active() {
        info!(account_id = %account.uuid, "Refresh refused for inactive account");
        return Err(AuthError::new(AuthErrorKind::AccountInactive).into());
    }

    let (access, refresh) = state.mint_pair(&account)?;
    let rotated = state
        .db
        .tokens()
        .rotate(
            &claims.jti,
            NewToken {
                jti: &refresh.jti,
                account_id: account.id,
                ip: ip.as_deref().or(tracked.last_ip.as_deref()),
                issued_at: refresh.issued_at,
                expires_at: refresh.expires_at,
            },
        )
        .await
        .db_err("Failed to rotate refresh token")?;

    if !rotated {
        warn!(account_id = %account.uuid, jti = %claims.jti, "Refresh token rotated concurrently");
        return Err(invalid());
    }

    debug!(account_id = %account.uuid, "Refresh token rotated");
    Ok(success(SessionResponse {
        access_token: access.token,
        refresh_token: refresh.token,
        user: account,
    }))
}

#[derive(Serialize)]
struct MeResponse {
    user: Account,
}

async fn me(
    State(state): State<AuthApiState>,
    identity: Identity,
) -> Result<impl IntoResponse, ApiError> {
    let account = state
        .db
        .accounts()
        .get_by_id(identity.account_id)
        .await
        .db_err("Failed to load account")?
        .ok_or_else(|| ApiError::not_found("Account not found"))?;
    Ok(success(MeResponse { user: account }))
}

async fn logout(
    State(state): State<AuthApiState>,
    identity: Identity,
    request: Request,
) -> Result<impl IntoResponse, ApiError> {
    let (parts, body) = request.into_parts();
    let body = read_refresh_body(body).await;

    if let Some(token) = refresh_token_from(body.refresh_token.as_deref(), &parts.headers) {
        match state.tokens.verify_refresh_token(token) {
            Ok(claims) => {
                let revoked = state
                    .db
                    .tokens()
                    .delete_by_jti(&claims.jti, identity.account_id)
                    .await
                    .db_err("Failed to revoke refresh token")?;
                debug!(account_id = %identity.uuid, revoked, "Logout");
            }
            Err(e) => debug!(account_id = %identity.uuid, reason = %e, "Logout with unusable refresh token"),
        }
    }

    Ok(ack())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionInfo {
    jti: String,
    last_ip: Option<String>,
    issued_at: i64,
    expires_at: i64,
}

#[derive(Serialize)]
struct ListSessionsResponse {
    sessions: Vec<SessionInfo>,
}

async fn list_sessions(
    State(state): State<AuthApiState>,
    identity: Identity,
) -> Result<impl IntoResponse, ApiError> {
    let tokens = state
        .db
        .tokens()
        .list_by_account(identity.account_id)
        .await
        .db_err("Failed to list sessions")?;

    let sessions = tokens
        .into_iter()
        .map(|t| SessionInfo {
            jti: t.jti,
            last_ip: t.last_ip,
            issued_at: t.issued_at,
            expires_at: t.expires_at,
        })
        .collect();

    Ok(success(ListSessionsResponse { sessions }))
}

async fn revoke_session(
    State(state): State<AuthApiState>,
    identity: Identity,
    Path(jti): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let revoked = state
        .db
        .tokens()
        .delete_by_jti(&jti, identity.account_id)
        .await
        .db_err("Failed to revoke session")?;

    if !revoked {
        return Err(ApiError::not_found("Session not found"));
    }
    Ok(ack())
}
