//! Authentication middleware, identity extractor and role/permission gates.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use super::bearer::bearer_token;
use super::errors::{AuthError, AuthErrorKind};
use super::state::HasAuthBackend;
use super::types::Identity;
use crate::db::Role;
use crate::jwt::JwtError;

/// Core authentication: bearer token -> verified claims -> stored account.
///
/// Account status is read from the store on every call, so deactivating
/// an account takes effect on the next request even while its access
/// tokens are still cryptographically valid.
pub async fn authenticate_headers<S>(headers: &HeaderMap, state: &S) -> Result<Identity, AuthError>
where
    S: HasAuthBackend + Send + Sync,
{
    let token = bearer_token(headers).ok_or(AuthError::new(AuthErrorKind::NoToken))?;

    let claims = state.tokens().verify_access_token(token).map_err(|e| {
        match &e {
            JwtError::Expired => debug!("Access token expired"),
            other => warn!(reason = %other, "Access token rejected"),
        }
        AuthError::new(token_error_kind(&e))
    })?;

    let account = state
        .db()
        .accounts()
        .get_by_uuid(&claims.sub)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to load account");
            AuthError::new(AuthErrorKind::DatabaseError)
        })?
        .ok_or_else(|| {
            warn!(account_id = %claims.sub, "Token subject has no account");
            AuthError::new(AuthErrorKind::AccountNotFound)
        })?;

    if !account.is_active() {
        debug!(account_id = %account.uuid, "Rejected request for inactive account");
        return Err(AuthError::new(AuthErrorKind::AccountInactive));
    }

    Ok(Identity::from(account))
}

/// Map a verification failure to the client-facing kind.
fn token_error_kind(error: &JwtError) -> AuthErrorKind {
    if error.is_expired() {
        AuthErrorKind::TokenExpired
    } else {
        AuthErrorKind::TokenInvalid
    }
}

/// Middleware: authenticate the request and attach its [`Identity`].
pub async fn authenticate<S>(
    State(state): State<S>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError>
where
    S: HasAuthBackend + Clone + Send + Sync + 'static,
{
    let identity = authenticate_headers(request.headers(), &state).await?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Handlers take the identity attached by [`authenticate`]. Missing
/// identity means the route was composed without the middleware.
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or(AuthError::new(AuthErrorKind::AuthRequired))
    }
}

/// Optional identity, for routes that behave differently when a caller
/// is known but do not require one.
pub struct OptionalIdentity(pub Option<Identity>);

impl<S> FromRequestParts<S> for OptionalIdentity
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<Identity>() {
            return Ok(OptionalIdentity(Some(identity.clone())));
        }
        Ok(OptionalIdentity(
            authenticate_headers(&parts.headers, state).await.ok(),
        ))
    }
}

/// Check that the identity holds one of the allowed roles.
pub fn check_role(identity: Option<&Identity>, allowed: &[Role]) -> Result<(), AuthError> {
    let identity = identity.ok_or(AuthError::new(AuthErrorKind::AuthRequired))?;
    if allowed.contains(&identity.role) {
        Ok(())
    } else {
        debug!(account_id = %identity.uuid, role = ?identity.role, "Role not allowed");
        Err(AuthError::new(AuthErrorKind::Forbidden))
    }
}

/// Check that the identity holds a capability (admins hold all).
pub fn check_permission(identity: Option<&Identity>, capability: &str) -> Result<(), AuthError> {
    let identity = identity.ok_or(AuthError::new(AuthErrorKind::AuthRequired))?;
    if identity.has_permission(capability) {
        Ok(())
    } else {
        debug!(account_id = %identity.uuid, capability, "Capability missing");
        Err(AuthError::new(AuthErrorKind::Forbidden))
    }
}

/// Middleware factory: only let through identities with one of `allowed`.
/// Must be layered inside [`authenticate`].
///
/// ```ignore
/// router.route_layer(middleware::from_fn(authorize(&[Role::Admin])))
/// ```
pub fn authorize(
    allowed: &'static [Role],
) -> impl Fn(Request, Next) -> BoxFuture<'static, Response> + Clone + Send + Sync + 'static {
    move |request: Request, next: Next| {
        Box::pin(async move {
            match check_role(request.extensions().get::<Identity>(), allowed) {
                Ok(()) => next.run(request).await,
                Err(e) => e.into_response(),
            }
        })
    }
}

/// Middleware factory: only let through identities holding `capability`.
/// Must be layered inside [`authenticate`].
pub fn authorize_permission(
    capability: &'static str,
) -> impl Fn(Request, Next) -> BoxFuture<'static, Response> + Clone + Send + Sync + 'static {
    move |request: Request, next: Next| {
        Box::pin(async move {
            match check_permission(request.extensions().get::<Identity>(), capability) {
                Ok(()) => next.run(request).await,
                Err(e) => e.into_response(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::AccountStatus;

    fn identity(role: Role, permissions: &[&str]) -> Identity {
        Identity {
            account_id: 1,
            uuid: "uuid-1".to_string(),
            email: "a@x.com".to_string(),
            role,
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            status: AccountStatus::Active,
        }
    }

    #[test]
    fn test_check_role() {
        let user = identity(Role::User, &[]);
        let admin = identity(Role::Admin, &[]);

        assert!(check_role(Some(&admin), &[Role::Admin]).is_ok());
        assert!(check_role(Some(&user), &[Role::User, Role::Admin]).is_ok());
        assert_eq!(
            check_role(Some(&user), &[Role::Admin]).unwrap_err().kind,
            AuthErrorKind::Forbidden
        );
        assert_eq!(
            check_role(None, &[Role::Admin]).unwrap_err().kind,
            AuthErrorKind::AuthRequired
        );
    }

    #[test]
    fn test_check_permission_is_additive_with_role() {
        let reader = identity(Role::User, &["accounts:read"]);
        let user = identity(Role::User, &[]);
        let admin = identity(Role::Admin, &[]);

        assert!(check_permission(Some(&reader), "accounts:read").is_ok());
        assert!(check_permission(Some(&admin), "accounts:read").is_ok());
        assert_eq!(
            check_permission(Some(&user), "accounts:read")
                .unwrap_err()
                .kind,
            AuthErrorKind::Forbidden
        );
    }

    #[test]
    fn test_token_error_kind() {
        assert_eq!(
            token_error_kind(&JwtError::Expired),
            AuthErrorKind::TokenExpired
        );
        assert_eq!(
            token_error_kind(&JwtError::BadSignature),
            AuthErrorKind::TokenInvalid
        );
        assert_eq!(
            token_error_kind(&JwtError::WrongTokenType),
            AuthErrorKind::TokenInvalid
        );
    }
}
