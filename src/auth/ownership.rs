//! Ownership gate for routes that act on a single loaded resource.
//!
//! A loader middleware fetches the resource and attaches it as
//! [`Loaded<T>`]; [`authorize_ownership`] then compares its owner with the
//! caller. Layer order (outermost first): `authenticate`, loader, gate.

use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::errors::{AuthError, AuthErrorKind};
use super::types::Identity;

/// A resource with an owning account.
pub trait Owned {
    /// Public ID of the owning account, if the resource records one.
    fn owner_id(&self) -> Option<&str>;
}

/// Resource attached to the request by a loader middleware.
#[derive(Debug, Clone)]
pub struct Loaded<T>(pub T);

/// Admins may act on any resource; others only on resources they own.
pub fn check_ownership<T: Owned>(
    identity: Option<&Identity>,
    resource: Option<&T>,
) -> Result<(), AuthError> {
    let identity = identity.ok_or(AuthError::new(AuthErrorKind::AuthRequired))?;
    let resource = resource.ok_or(AuthError::new(AuthErrorKind::ResourceNotFound))?;

    if identity.is_admin() {
        return Ok(());
    }

    let owner = resource
        .owner_id()
        .ok_or(AuthError::new(AuthErrorKind::ResourceNotFound))?;

    if owner == identity.uuid {
        Ok(())
    } else {
        debug!(account_id = %identity.uuid, owner, "Ownership check failed");
        Err(AuthError::new(AuthErrorKind::Forbidden))
    }
}

/// Middleware: reject unless the caller owns the loaded `T` (or is admin).
pub async fn authorize_ownership<T>(request: Request, next: Next) -> Response
where
    T: Owned + Clone + Send + Sync + 'static,
{
    let result = check_ownership(
        request.extensions().get::<Identity>(),
        request.extensions().get::<Loaded<T>>().map(|l| &l.0),
    );
    match result {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}
