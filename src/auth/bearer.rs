//! Token extraction from request headers.

use axum::http::{HeaderMap, header};

/// Header that may carry a refresh token instead of the request body.
pub const REFRESH_TOKEN_HEADER: &str = "x-refresh-token";

const BEARER_PREFIX: &str = "Bearer ";

/// Extract the token from `Authorization: Bearer <token>`.
/// Returns None if the header is absent, not ASCII, uses another scheme,
/// or carries an empty token.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix(BEARER_PREFIX)?.trim();
    if token.is_empty() { None } else { Some(token) }
}

/// Pick the refresh token from the request body or the dedicated header.
/// The body wins when both are present.
pub fn refresh_token_from<'a>(body: Option<&'a str>, headers: &'a HeaderMap) -> Option<&'a str> {
    body.map(str::trim)
        .filter(|t| !t.is_empty())
        .or_else(|| {
            headers
                .get(REFRESH_TOKEN_HEADER)?
                .to_str()
                .ok()
                .map(str::trim)
                .filter(|t| !t.is_empty())
        })
}
