//! Rate limiting for authentication endpoints.
//!
//! Token buckets keyed by client IP (plus email for login). Limiting only
//! throttles; lockout bookkeeping is driven by login attempts alone.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::auth::{HasHeadersAndExtensions, extract_client_ip};

/// Keyed rate limiter (key is an IP or `ip|email`).
pub type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Key used when the client IP cannot be determined.
const UNKNOWN_IP: &str = "unknown";

/// Requests allowed per window for each limited endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    /// Login attempts per minute per IP and email
    pub login_per_minute: u32,
    /// Registrations per hour per IP
    pub register_per_hour: u32,
    /// Refresh calls per minute per IP
    pub refresh_per_minute: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            login_per_minute: 10,
            register_per_hour: 5,
            refresh_per_minute: 30,
        }
    }
}

/// Rate limiting state for authentication endpoints.
pub struct RateLimitConfig {
    pub login: KeyedLimiter,
    pub register: KeyedLimiter,
    pub refresh: KeyedLimiter,
    /// Header carrying the client IP when running behind a proxy
    pub ip_header: Option<String>,
}

fn non_zero(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN)
}

impl RateLimitConfig {
    pub fn new(settings: RateLimitSettings, ip_header: Option<String>) -> Self {
        Self {
            login: RateLimiter::keyed(Quota::per_minute(non_zero(settings.login_per_minute))),
            register: RateLimiter::keyed(Quota::per_hour(non_zero(settings.register_per_hour))),
            refresh: RateLimiter::keyed(Quota::per_minute(non_zero(
                settings.refresh_per_minute,
            ))),
            ip_header,
        }
    }

    /// Client IP of a request, or a shared placeholder key.
    pub fn client_ip<T: HasHeadersAndExtensions>(&self, source: &T) -> String {
        extract_client_ip(source, self.ip_header.as_deref()).unwrap_or_else(|| {
            debug!("Client IP unavailable, using shared rate limit key");
            UNKNOWN_IP.to_string()
        })
    }

    /// Check the login bucket for this IP and (normalized) email.
    pub fn check_login(&self, ip: &str, email: &str) -> Result<(), ApiError> {
        let key = format!("{}|{}", ip, email);
        self.login.check_key(&key).map_err(|_| {
            warn!(ip, email, "Login rate limit exceeded");
            ApiError::too_many_requests("Too many login attempts. Please try again later.")
        })
    }
}

async fn limit_by_ip(
    limiter: &KeyedLimiter,
    config: &RateLimitConfig,
    request: Request,
    next: Next,
    message: &'static str,
) -> Response {
    let ip = config.client_ip(&request);
    match limiter.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            warn!(ip = %ip, path = %request.uri().path(), "Rate limit exceeded");
            ApiError::too_many_requests(message).into_response()
        }
    }
}

/// Middleware for rate limiting registration.
pub async fn rate_limit_register(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    limit_by_ip(
        &config.register,
        &config,
        request,
        next,
        "Too many signup attempts. Please wait before trying again.",
    )
    .await
}

/// Middleware for rate limiting token refresh.
pub async fn rate_limit_refresh(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    limit_by_ip(
        &config.refresh,
        &config,
        request,
        next,
        "Too many requests. Please try again later.",
    )
    .await
}
