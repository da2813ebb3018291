use serde::Serialize;
use sqlx::sqlite::SqlitePool;

#[derive(Clone)]
pub struct AccountStore {
    pool: SqlitePool,
}

/// Account role for authorization. Exactly one per account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Inactive,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AccountStatus::Active),
            "inactive" => Some(AccountStatus::Inactive),
            _ => None,
        }
    }
}

/// Account without its password hash. Lockout bookkeeping is left out
/// of the serialized form; the admin API adds it back.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(skip)]
    pub id: i64,
    #[serde(rename = "id")]
    pub uuid: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub status: AccountStatus,
    pub permissions: Vec<String>,
    #[serde(skip)]
    pub login_attempts: u32,
    #[serde(skip)]
    pub lock_until: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Account {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

/// Account together with its stored password hash, for login only.
#[derive(Debug, Clone)]
pub struct AccountCredentials {
    pub account: Account,
    pub password_hash: String,
}

/// Fields needed to create an account.
#[derive(Debug, Clone)]
pub struct NewAccount<'a> {
    pub uuid: &'a str,
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub role: Role,
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: i64,
    uuid: String,
    name: String,
    email: String,
    role: String,
    status: String,
    permissions: String,
    login_attempts: i64,
    lock_until: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
            name: row.name,
            email: row.email,
            role: Role::parse(&row.role).unwrap_or(Role::User),
            // Unknown status never grants access
            status: AccountStatus::parse(&row.status).unwrap_or(AccountStatus::Inactive),
            permissions: serde_json::from_str(&row.permissions).unwrap_or_default(),
            login_attempts: row.login_attempts.max(0) as u32,
            lock_until: row.lock_until.map(|t| t.max(0) as u64),
            created_at: row.created_at.max(0) as u64,
            updated_at: row.updated_at.max(0) as u64,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CredentialsRow {
    #[sqlx(flatten)]
    account: AccountRow,
    password_hash: String,
}

const ACCOUNT_COLUMNS: &str = "id, uuid, name, email, role, status, permissions, login_attempts, lock_until, created_at, updated_at";

/// Lowercase and trim an email for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl AccountStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an active account. Returns the row ID.
    pub async fn create(&self, new: NewAccount<'_>, now: u64) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO accounts (uuid, name, email, password_hash, role, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 'active', ?, ?)",
        )
        .bind(new.uuid)
        .bind(new.name)
        .bind(normalize_email(new.email))
        .bind(new.password_hash)
        .bind(new.role.as_str())
        .bind(now as i64)
        .bind(now as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn email_exists(&self, email: &str) -> Result<bool, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM accounts WHERE email = ?")
            .bind(normalize_email(email))
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 > 0)
    }

    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<Account>, sqlx::Error> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {} FROM accounts WHERE uuid = ?",
            ACCOUNT_COLUMNS
        ))
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Account::from))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Account>, sqlx::Error> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {} FROM accounts WHERE id = ?",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Account::from))
    }

    /// Load an account with its password hash by email (case-insensitive).
    pub async fn get_credentials_by_email(
        &self,
        email: &str,
    ) -> Result<Option<AccountCredentials>, sqlx::Error> {
        let row: Option<CredentialsRow> = sqlx::query_as(&format!(
            "SELECT {}, password_hash FROM accounts WHERE email = ?",
            ACCOUNT_COLUMNS
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| AccountCredentials {
            account: Account::from(r.account),
            password_hash: r.password_hash,
        }))
    }

    /// Persist the login-attempt counter and lock timestamp.
    pub async fn set_login_state(
        &self,
        id: i64,
        attempts: u32,
        lock_until: Option<u64>,
        now: u64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET login_attempts = ?, lock_until = ?, updated_at = ? WHERE id = ?",
        )
        .bind(attempts as i64)
        .bind(lock_until.map(|t| t as i64))
        .bind(now as i64)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_role(&self, uuid: &str, role: Role, now: u64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE accounts SET role = ?, updated_at = ? WHERE uuid = ?")
            .bind(role.as_str())
            .bind(now as i64)
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_status(
        &self,
        uuid: &str,
        status: AccountStatus,
        now: u64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE accounts SET status = ?, updated_at = ? WHERE uuid = ?")
            .bind(status.as_str())
            .bind(now as i64)
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_permissions(
        &self,
        uuid: &str,
        permissions: &[String],
        now: u64,
    ) -> Result<bool, sqlx::Error> {
        let encoded = serde_json::to_string(permissions).unwrap_or_else(|_| "[]".to_string());
        let result =
            sqlx::query("UPDATE accounts SET permissions = ?, updated_at = ? WHERE uuid = ?")
                .bind(encoded)
                .bind(now as i64)
                .bind(uuid)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List all accounts, oldest first.
    pub async fn list(&self) -> Result<Vec<Account>, sqlx::Error> {
        let rows: Vec<AccountRow> = sqlx::query_as(&format!(
            "SELECT {} FROM accounts ORDER BY created_at, id",
            ACCOUNT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Account::from).collect())
    }
}
