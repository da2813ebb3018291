//! Bearer-token authentication with role, capability and ownership gates.
//!
//! Dual-token system: short-lived access tokens (stateless, checked on
//! every request against the stored account) and long-lived refresh
//! tokens (tracked by ID in the database, rotated on every use).

mod bearer;
mod errors;
mod extractors;
mod ip;
mod ownership;
mod state;
mod types;

pub use bearer::{REFRESH_TOKEN_HEADER, bearer_token, refresh_token_from};
pub use errors::{AuthError, AuthErrorKind, ErrorCode, error_response};
pub use extractors::{
    OptionalIdentity, authenticate, authenticate_headers, authorize, authorize_permission,
    check_permission, check_role,
};
pub use ip::{HasHeadersAndExtensions, extract_client_ip};
pub use ownership::{Loaded, Owned, authorize_ownership, check_ownership};
pub use state::HasAuthBackend;
pub use types::Identity;
