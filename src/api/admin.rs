//! Admin API endpoints.
//!
//! Listing accounts needs the admin role or the `accounts:read`
//! capability; every other endpoint needs the admin role.

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, patch, post, put},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use super::auth::create_account;
use super::error::{ApiError, ApiJson, ResultExt, success, validate_uuid};
use super::validation::{parse_role, validate_email, validate_name, validate_password};
use crate::auth::{Identity, authenticate, authorize, authorize_permission};
use crate::db::{Account, AccountStatus, Database, NewAccount, Role, normalize_email};
use crate::impl_has_auth_backend;
use crate::jwt::TokenService;
use crate::password::PasswordHasher;

/// Capability that grants read access to the account list.
pub const ACCOUNTS_READ: &str = "accounts:read";

const PERMISSION_MAX_LEN: usize = 64;

/// State for admin endpoints.
#[derive(Clone)]
pub struct AdminState {
    pub db: Database,
    pub tokens: Arc<TokenService>,
    pub hasher: PasswordHasher,
}

impl_has_auth_backend!(AdminState);

pub fn router(state: AdminState) -> Router {
    let readers = Router::new()
        .route("/accounts", get(list_accounts))
        .route_layer(middleware::from_fn(authorize_permission(ACCOUNTS_READ)));

    let admins = Router::new()
        .route("/accounts", post(create_account_handler))
        .route("/accounts/{id}/role", patch(set_role))
        .route("/accounts/{id}/status", patch(set_status))
        .route("/accounts/{id}/permissions", put(set_permissions))
        .route("/accounts/{id}/unlock", post(unlock))
        .route_layer(middleware::from_fn(authorize(&[Role::Admin])));

    readers
        .merge(admins)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            authenticate::<AdminState>,
        ))
        .with_state(state)
}

/// Account as admins see it, including lockout state.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AdminAccount {
    #[serde(flatten)]
    account: Account,
    login_attempts: u32,
    lock_until: Option<u64>,
}

impl From<Account> for AdminAccount {
    fn from(account: Account) -> Self {
        Self {
            login_attempts: account.login_attempts,
            lock_until: account.lock_until,
            account,
        }
    }
}

#[derive(Serialize)]
struct AccountsResponse {
    accounts: Vec<AdminAccount>,
}

#[derive(Serialize)]
struct AccountResponse {
    user: AdminAccount,
}

async fn list_accounts(State(state): State<AdminState>) -> Result<impl IntoResponse, ApiError> {
    let accounts = state
        .db
        .accounts()
        .list()
        .await
        .db_err("Failed to list accounts")?;

    Ok(success(AccountsResponse {
        accounts: accounts.into_iter().map(AdminAccount::from).collect(),
    }))
}

#[derive(Deserialize)]
struct CreateAccountRequest {
    name: String,
    email: String,
    password: String,
    #[serde(default)]
    role: Option<String>,
}

async fn create_account_handler(
    State(state): State<AdminState>,
    identity: Identity,
    ApiJson(payload): ApiJson<CreateAccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = validate_name(&payload.name)?;
    validate_email(&payload.email)?;
    validate_password(&payload.password)?;
    let role = match payload.role.as_deref() {
        Some(role) => parse_role(role)?,
        None => Role::User,
    };

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
            role,
        },
        state.tokens.now(),
    )
    .await?;

    let account = load_by_id(&state.db, id).await?;
    info!(admin = %identity.uuid, account_id = %account.uuid, role = role.as_str(), "Admin created account");
    let response = AccountResponse {
        user: account.into(),
    };
    Ok((StatusCode::CREATED, success(response)))
}

#[derive(Deserialize)]
struct RoleRequest {
    role: String,
}

async fn set_role(
    State(state): State<AdminState>,
    identity: Identity,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<RoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_uuid(&id)?;
    let role = parse_role(&payload.role)?;
    if id == identity.uuid {
        return Err(ApiError::bad_request("Cannot change your own role"));
    }

    let updated = state
        .db
        .accounts()
        .set_role(&id, role, state.tokens.now())
        .await
        .db_err("Failed to update role")?;
    if !updated {
        return Err(ApiError::not_found("Account not found"));
    }

    info!(admin = %identity.uuid, account_id = %id, role = role.as_str(), "Role changed");
    let account = load_by_uuid(&state.db, &id).await?;
    Ok(success(AccountResponse {
        user: account.into(),
    }))
}

#[derive(Deserialize)]
struct StatusRequest {
    status: AccountStatus,
}

async fn set_status(
    State(state): State<AdminState>,
    identity: Identity,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<StatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_uuid(&id)?;
    if id == identity.uuid && payload.status == AccountStatus::Inactive {
        return Err(ApiError::bad_request("Cannot deactivate your own account"));
    }

    let account = load_by_uuid(&state.db, &id).await?;
    state
        .db
        .accounts()
        .set_status(&id, payload.status, state.tokens.now())
        .await
        .db_err("Failed to update status")?;

    if payload.status == AccountStatus::Inactive {
        let revoked = state
            .db
            .tokens()
            .delete_all_by_account(account.id)
            .await
            .db_err("Failed to revoke sessions")?;
        info!(admin = %identity.uuid, account_id = %id, revoked, "Account deactivated");
    } else {
        info!(admin = %identity.uuid, account_id = %id, "Account activated");
    }

    let account = load_by_id(&state.db, account.id).await?;
    Ok(success(AccountResponse {
        user: account.into(),
    }))
}

#[derive(Deserialize)]
struct PermissionsRequest {
    permissions: Vec<String>,
}

/// Trim, drop empties, sort and dedupe.
fn normalize_permissions(permissions: Vec<String>) -> Result<Vec<String>, ApiError> {
    let mut normalized = Vec::with_capacity(permissions.len());
    for permission in permissions {
        let permission = permission.trim();
        if permission.is_empty() {
            continue;
        }
        if permission.len() > PERMISSION_MAX_LEN || permission.chars().any(char::is_whitespace) {
            return Err(ApiError::bad_request(format!(
                "Invalid permission: {}",
                permission
            )));
        }
        normalized.push(permission.to_string());
    }
    normalized.sort();
    normalized.dedup();
    Ok(normalized)
}

async fn set_permissions(
    State(state): State<AdminState>,
    identity: Identity,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<PermissionsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_uuid(&id)?;
    let permissions = normalize_permissions(payload.permissions)?;

    let updated = state
        .db
        .accounts()
        .set_permissions(&id, &permissions, state.tokens.now())
        .await
        .db_err("Failed to update permissions")?;
    if !updated {
        return Err(ApiError::not_found("Account not found"));
    }

    info!(admin = %identity.uuid, account_id = %id, ?permissions, "Permissions changed");
    let account = load_by_uuid(&state.db, &id).await?;
    Ok(success(AccountResponse {
        user: account.into(),
    }))
}

async fn unlock(
    State(state): State<AdminState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate_uuid(&id)?;
    let account = load_by_uuid(&state.db, &id).await?;
    state
        .db
        .accounts()
        .set_login_state(account.id, 0, None, state.tokens.now())
        .await
        .db_err("Failed to unlock account")?;

    info!(admin = %identity.uuid, account_id = %id, "Account unlocked");
    let account = load_by_id(&state.db, account.id).await?;
    Ok(success(AccountResponse {
        user: account.into(),
    }))
}

async fn load_by_uuid(db: &Database, uuid: &str) -> Result<Account, ApiError> {
    db.accounts()
        .get_by_uuid(uuid)
        .await
        .db_err("Failed to load account")?
        .ok_or_else(|| ApiError::not_found("Account not found"))
}

async fn load_by_id(db: &Database, id: i64) -> Result<Account, ApiError> {
    db.accounts()
        .get_by_id(id)
        .await
        .db_err("Failed to load account")?
        .ok_or_else(|| ApiError::not_found("Account not found"))
}
