//! Access and refresh token issuance and verification.
//!
//! Access and refresh tokens are signed with different secrets so that a
//! leaked access secret cannot mint refresh tokens. Expiry is checked
//! against the injected [`Clock`] rather than inside `jsonwebtoken`, which
//! keeps "expired" distinguishable from other failures and testable
//! without sleeping.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;

use crate::clock::Clock;
use crate::db::Role;

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Short-lived access token, never stored server side
    Access,
    /// Long-lived refresh token, tracked by JTI
    Refresh,
}

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (account UUID)
    pub sub: String,
    pub email: String,
    pub role: Role,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Claims carried by a refresh token. Only the subject: email and role
/// are re-read from the account store whenever the token is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// JWT ID, used for rotation and revocation
    pub jti: String,
    /// Subject (account UUID)
    pub sub: String,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    pub iat: u64,
    pub exp: u64,
}

/// Default access token lifetime: 15 minutes
pub const ACCESS_TOKEN_DURATION_SECS: u64 = 15 * 60;

/// Default refresh token lifetime: 7 days
pub const REFRESH_TOKEN_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Token lifetimes in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifetimes {
    pub access_secs: u64,
    pub refresh_secs: u64,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access_secs: ACCESS_TOKEN_DURATION_SECS,
            refresh_secs: REFRESH_TOKEN_DURATION_SECS,
        }
    }
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

/// Issues and verifies access/refresh tokens.
pub struct TokenService {
    access: KeyPair,
    refresh: KeyPair,
    lifetimes: TokenLifetimes,
    clock: Arc<dyn Clock>,
}

/// Result of issuing an access token.
#[derive(Debug, Clone)]
pub struct AccessTokenResult {
    pub token: String,
    pub expires_at: u64,
    /// Token duration in seconds
    pub duration: u64,
}

/// Result of issuing a refresh token.
#[derive(Debug, Clone)]
pub struct RefreshTokenResult {
    pub token: String,
    /// JWT ID (unique identifier for database tracking)
    pub jti: String,
    pub issued_at: u64,
    pub expires_at: u64,
    pub duration: u64,
}

impl TokenService {
    /// Build a token service. The two secrets must differ.
    pub fn new(
        access_secret: &[u8],
        refresh_secret: &[u8],
        lifetimes: TokenLifetimes,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, JwtError> {
        if access_secret == refresh_secret {
            return Err(JwtError::SharedSecret);
        }
        Ok(Self {
            access: KeyPair::new(access_secret),
            refresh: KeyPair::new(refresh_secret),
            lifetimes,
            clock,
        })
    }

    pub fn lifetimes(&self) -> TokenLifetimes {
        self.lifetimes
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Issue an access token for an account.
    pub fn issue_access_token(
        &self,
        account_uuid: &str,
        email: &str,
        role: Role,
    ) -> Result<AccessTokenResult, JwtError> {
        let now = self.clock.now();
        let exp = now + self.lifetimes.access_secs;

        let claims = AccessClaims {
            sub: account_uuid.to_string(),
            email: email.to_string(),
            role,
            token_type: TokenType::Access,
            iat: now,
            exp,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.access.encoding)
            .map_err(JwtError::Encoding)?;

        Ok(AccessTokenResult {
            token,
            expires_at: exp,
            duration: self.lifetimes.access_secs,
        })
    }

    /// Issue a refresh token for an account. Each call gets a fresh JTI.
    pub fn issue_refresh_token(&self, account_uuid: &str) -> Result<RefreshTokenResult, JwtError> {
        let now = self.clock.now();
        let jti = uuid::Uuid::new_v4().to_string();
        let exp = now + self.lifetimes.refresh_secs;

        let claims = RefreshClaims {
            jti: jti.clone(),
            sub: account_uuid.to_string(),
            token_type: TokenType::Refresh,
            iat: now,
            exp,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.refresh.encoding)
            .map_err(JwtError::Encoding)?;

        Ok(RefreshTokenResult {
            token,
            jti,
            issued_at: now,
            expires_at: exp,
            duration: self.lifetimes.refresh_secs,
        })
    }

    /// Verify an access token against the access secret.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, JwtError> {
        let claims: AccessClaims = self.verify(token, &self.access.decoding)?;
        if claims.token_type != TokenType::Access {
            return Err(JwtError::WrongTokenType);
        }
        self.check_expiry(claims.exp)?;
        Ok(claims)
    }

    /// Verify a refresh token against the refresh secret.
    pub fn verify_refresh_token(&self, token: &str) -> Result<RefreshClaims, JwtError> {
        let claims: RefreshClaims = self.verify(token, &self.refresh.decoding)?;
        if claims.token_type != TokenType::Refresh {
            return Err(JwtError::WrongTokenType);
        }
        self.check_expiry(claims.exp)?;
        Ok(claims)
    }

    fn verify<C: DeserializeOwned>(&self, token: &str, key: &DecodingKey) -> Result<C, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;

        jsonwebtoken::decode::<C>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => JwtError::BadSignature,
                ErrorKind::ExpiredSignature => JwtError::Expired,
                _ => JwtError::Malformed(e),
            })
    }

    fn check_expiry(&self, exp: u64) -> Result<(), JwtError> {
        if self.clock.now() >= exp {
            return Err(JwtError::Expired);
        }
        Ok(())
    }
}

/// Errors that can occur during token operations.
#[derive(Debug)]
pub enum JwtError {
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// Token could not be parsed (bad shape, bad base64, bad claims)
    Malformed(jsonwebtoken::errors::Error),
    /// Signature does not match the expected secret
    BadSignature,
    /// Token expiry has passed
    Expired,
    /// Wrong token type (e.g., using refresh token as access token)
    WrongTokenType,
    /// Access and refresh secrets are identical
    SharedSecret,
}

impl JwtError {
    pub fn is_expired(&self) -> bool {
        matches!(self, JwtError::Expired)
    }
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            JwtError::Malformed(e) => write!(f, "Malformed token: {}", e),
            JwtError::BadSignature => write!(f, "Bad token signature"),
            JwtError::Expired => write!(f, "Token expired"),
            JwtError::WrongTokenType => write!(f, "Wrong token type"),
            JwtError::SharedSecret => {
                write!(f, "Access and refresh tokens must use different secrets")
            }
        }
    }
}

impl std::error::Error for JwtError {}
