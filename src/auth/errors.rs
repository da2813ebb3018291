//! Authentication error types and the shared JSON error body.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Stable machine-readable error codes. Clients branch on these, so the
/// serialized names must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoToken,
    TokenInvalid,
    TokenExpired,
    AccountNotFound,
    AccountInactive,
    AccountLocked,
    InvalidCredentials,
    InsufficientPermissions,
    AuthRequired,
    ResourceNotFound,
    NotFound,
    ValidationError,
    DuplicateEmail,
    RateLimited,
    InternalError,
}

#[derive(Serialize)]
struct ErrorData<'a> {
    message: &'a str,
    code: ErrorCode,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    data: ErrorData<'a>,
}

/// Render `{"success": false, "data": {"message", "code"}}` with a status.
pub fn error_response(status: StatusCode, code: ErrorCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            success: false,
            data: ErrorData { message, code },
        }),
    )
        .into_response()
}

/// Internal auth error kind used by the authentication and authorization gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    NoToken,
    TokenInvalid,
    TokenExpired,
    AccountNotFound,
    AccountInactive,
    AccountLocked,
    Forbidden,
    AuthRequired,
    ResourceNotFound,
    DatabaseError,
}

/// Authentication/authorization failure, rendered as a JSON error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthError {
    pub kind: AuthErrorKind,
}

impl AuthError {
    pub fn new(kind: AuthErrorKind) -> Self {
        Self { kind }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind {
            AuthErrorKind::NoToken
            | AuthErrorKind::TokenInvalid
            | AuthErrorKind::TokenExpired
            | AuthErrorKind::AccountNotFound
            | AuthErrorKind::AccountInactive
            | AuthErrorKind::AccountLocked
            | AuthErrorKind::AuthRequired => StatusCode::UNAUTHORIZED,
            AuthErrorKind::Forbidden => StatusCode::FORBIDDEN,
            AuthErrorKind::ResourceNotFound => StatusCode::NOT_FOUND,
            AuthErrorKind::DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self.kind {
            AuthErrorKind::NoToken => ErrorCode::NoToken,
            AuthErrorKind::TokenInvalid => ErrorCode::TokenInvalid,
            AuthErrorKind::TokenExpired => ErrorCode::TokenExpired,
            AuthErrorKind::AccountNotFound => ErrorCode::AccountNotFound,
            AuthErrorKind::AccountInactive => ErrorCode::AccountInactive,
            AuthErrorKind::AccountLocked => ErrorCode::AccountLocked,
            AuthErrorKind::Forbidden => ErrorCode::InsufficientPermissions,
            AuthErrorKind::AuthRequired => ErrorCode::AuthRequired,
            AuthErrorKind::ResourceNotFound => ErrorCode::ResourceNotFound,
            AuthErrorKind::DatabaseError => ErrorCode::InternalError,
        }
    }

    pub fn message(&self) -> &'static str {
        match self.kind {
            AuthErrorKind::NoToken => "No token provided",
            AuthErrorKind::TokenInvalid => "Invalid token",
            AuthErrorKind::TokenExpired => "Token has expired",
            AuthErrorKind::AccountNotFound => "Account not found",
            AuthErrorKind::AccountInactive => "Account is inactive",
            AuthErrorKind::AccountLocked => {
                "Account is temporarily locked due to too many failed login attempts"
            }
            AuthErrorKind::Forbidden => "Insufficient permissions",
            AuthErrorKind::AuthRequired => "Authentication required",
            AuthErrorKind::ResourceNotFound => "Resource not found",
            AuthErrorKind::DatabaseError => "Internal server error",
        }
    }
}

impl From<AuthErrorKind> for AuthError {
    fn from(kind: AuthErrorKind) -> Self {
        Self::new(kind)
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        error_response(self.status_code(), self.code(), self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = AuthError::new(AuthErrorKind::TokenExpired).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["data"]["code"], "TOKEN_EXPIRED");
        assert_eq!(json["data"]["message"], "Token has expired");
    }

    #[test]
    fn test_forbidden_maps_to_403() {
        let err = AuthError::new(AuthErrorKind::Forbidden);
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.code(), ErrorCode::InsufficientPermissions);
    }
}
