//! Authentication identity types.

use crate::db::{Account, AccountStatus, Role};

/// Identity of the authenticated caller, attached to the request by the
/// `authenticate` middleware. Built from the account as stored at request
/// time, not from token claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Database account ID
    pub account_id: i64,
    /// Public account ID (token subject)
    pub uuid: String,
    pub email: String,
    pub role: Role,
    pub permissions: Vec<String>,
    pub status: AccountStatus,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins implicitly hold every capability.
    pub fn has_permission(&self, capability: &str) -> bool {
        self.is_admin() || self.permissions.iter().any(|p| p == capability)
    }
}

impl From<Account> for Identity {
    fn from(account: Account) -> Self {
        Self {
            account_id: account.id,
            uuid: account.uuid,
            email: account.email,
            role: account.role,
            permissions: account.permissions,
            status: account.status,
        }
    }
}
