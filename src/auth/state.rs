//! Authentication state trait and macro.

use crate::db::Database;
use crate::jwt::TokenService;

/// Trait for state types that provide database and token access for authentication.
pub trait HasAuthBackend {
    fn tokens(&self) -> &TokenService;
    fn db(&self) -> &Database;
}

/// Macro to implement `HasAuthBackend` for state structs with the standard fields.
///
/// The struct must have these fields:
/// - `tokens: Arc<TokenService>`
/// - `db: Database`
///
/// # Example
/// ```ignore
/// use crate::impl_has_auth_backend;
///
/// #[derive(Clone)]
/// pub struct MyState {
///     pub db: Database,
///     pub tokens: Arc<TokenService>,
///     // ... other fields
/// }
///
/// impl_has_auth_backend!(MyState);
/// ```
#[macro_export]
macro_rules! impl_has_auth_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthBackend for $state_type {
            fn tokens(&self) -> &$crate::jwt::TokenService {
                &self.tokens
            }
            fn db(&self) -> &$crate::db::Database {
                &self.db
            }
        }
    };
}
