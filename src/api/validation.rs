//! Input validation for account fields.

use super::error::ApiError;
use crate::db::Role;

pub const NAME_MAX_CHARS: usize = 50;
pub const EMAIL_MAX_LEN: usize = 254;
pub const PASSWORD_MIN_CHARS: usize = 8;
pub const PASSWORD_MAX_LEN: usize = 128;

/// Trim and check a display name. Returns the trimmed name.
pub fn validate_name(name: &str) -> Result<&str, ApiError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Name is required"));
    }
    if name.chars().count() > NAME_MAX_CHARS {
        return Err(ApiError::bad_request(format!(
            "Name cannot be longer than {} characters",
            NAME_MAX_CHARS
        )));
    }
    Ok(name)
}

/// Check the shape of an email address: `local@domain.tld`, no whitespace.
pub fn validate_email(email: &str) -> Result<(), ApiError> {
    let email = email.trim();
    let invalid = || ApiError::bad_request("Please provide a valid email");

    if email.is_empty() || email.len() > EMAIL_MAX_LEN || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }

    let (host, tld) = domain.rsplit_once('.').ok_or_else(invalid)?;
    if host.is_empty() || tld.is_empty() || domain.starts_with('.') || domain.contains("..") {
        return Err(invalid());
    }
    Ok(())
}

/// At least eight characters, with at least one letter and one digit.
pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < PASSWORD_MIN_CHARS {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {} characters",
            PASSWORD_MIN_CHARS
        )));
    }
    // bcrypt only reads the first 72 bytes
    if password.len() > PASSWORD_MAX_LEN {
        return Err(ApiError::bad_request("Password is too long"));
    }
    let has_letter = password.chars().any(char::is_alphabetic);
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err(ApiError::bad_request(
            "Password must contain at least one letter and one number",
        ));
    }
    Ok(())
}

/// Parse a role name from a request body.
pub fn parse_role(role: &str) -> Result<Role, ApiError> {
    Role::parse(role.trim()).ok_or_else(|| ApiError::bad_request("Role must be 'user' or 'admin'"))
}
