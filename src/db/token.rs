//! Refresh token tracking for rotation and revocation.
//!
//! Only refresh tokens are stored. Access tokens are stateless and stay
//! valid until they expire.

use sqlx::sqlite::SqlitePool;

/// A tracked refresh token.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActiveToken {
    pub id: i64,
    pub jti: String,
    pub account_id: i64,
    pub last_ip: Option<String>,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Fields for a newly issued refresh token.
#[derive(Debug, Clone, Copy)]
pub struct NewToken<'a> {
    pub jti: &'a str,
    pub account_id: i64,
    pub ip: Option<&'a str>,
    pub issued_at: u64,
    pub expires_at: u64,
}

/// Store for tracked refresh tokens.
pub struct TokenStore {
    pool: SqlitePool,
}

impl TokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a newly issued refresh token.
    pub async fn create(&self, token: NewToken<'_>) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO refresh_tokens (jti, account_id, last_ip, issued_at, expires_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(token.jti)
        .bind(token.account_id)
        .bind(token.ip)
        .bind(token.issued_at as i64)
        .bind(token.expires_at as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_by_jti(&self, jti: &str) -> Result<Option<ActiveToken>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, jti, account_id, last_ip, issued_at, expires_at FROM refresh_tokens WHERE jti = ?",
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await
    }

    /// Replace `old_jti` with a newly issued token in one transaction.
    ///
    /// Returns false (and stores nothing) if `old_jti` is no longer tracked
    /// for this account, i.e. it was already rotated away or revoked. Two
    /// concurrent rotations of the same token cannot both succeed.
    pub async fn rotate(&self, old_jti: &str, new: NewToken<'_>) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM refresh_tokens WHERE jti = ? AND account_id = ?")
            .bind(old_jti)
            .bind(new.account_id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO refresh_tokens (jti, account_id, last_ip, issued_at, expires_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(new.jti)
        .bind(new.account_id)
        .bind(new.ip)
        .bind(new.issued_at as i64)
        .bind(new.expires_at as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Revoke a token. Only deletes if it belongs to the given account.
    pub async fn delete_by_jti(&self, jti: &str, account_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE jti = ? AND account_id = ?")
            .bind(jti)
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete all tokens whose expiry is at or before `now`.
    pub async fn delete_expired(&self, now: u64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= ?")
            .bind(now as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// List the tracked tokens for an account, newest first.
    pub async fn list_by_account(&self, account_id: i64) -> Result<Vec<ActiveToken>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, jti, account_id, last_ip, issued_at, expires_at FROM refresh_tokens WHERE account_id = ? ORDER BY issued_at DESC, id DESC",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Delete all tokens for an account (logout everywhere).
    pub async fn delete_all_by_account(&self, account_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE account_id = ?")
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
