mod admin;
mod auth;
mod error;
mod posts;
mod validation;

use axum::Router;
use std::sync::Arc;

use crate::db::Database;
use crate::jwt::TokenService;
use crate::lockout::LockoutPolicy;
use crate::password::PasswordHasher;
use crate::rate_limit::RateLimitConfig;

pub use admin::ACCOUNTS_READ;
pub use error::{ApiError, ResultExt};

/// Everything the API handlers share.
#[derive(Clone)]
pub struct ApiContext {
    pub db: Database,
    pub tokens: Arc<TokenService>,
    pub hasher: PasswordHasher,
    pub lockout: LockoutPolicy,
    pub rate_limits: Arc<RateLimitConfig>,
    pub no_signup: bool,
}

/// Create the API router.
pub fn create_api_router(ctx: ApiContext) -> Router {
    let auth_state = auth::AuthApiState {
        db: ctx.db.clone(),
        tokens: ctx.tokens.clone(),
        hasher: ctx.hasher,
        lockout: ctx.lockout,
        rate_limits: ctx.rate_limits,
    };

    let admin_state = admin::AdminState {
        db: ctx.db.clone(),
        tokens: ctx.tokens.clone(),
        hasher: ctx.hasher,
    };

    let posts_state = posts::PostsState {
        db: ctx.db,
        tokens: ctx.tokens,
    };

    Router::new()
        .nest("/auth", auth::router(auth_state, ctx.no_signup))
        .nest("/admin", admin::router(admin_state))
        .nest("/posts", posts::router(posts_state))
}
