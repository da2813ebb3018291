//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::clock::{Clock, SystemClock};
use crate::db::{Database, NewAccount, Role, normalize_email};
use crate::jwt::{ACCESS_TOKEN_DURATION_SECS, REFRESH_TOKEN_DURATION_SECS, TokenLifetimes};
use crate::lockout::{DEFAULT_LOCKOUT_DURATION_SECS, DEFAULT_LOCKOUT_THRESHOLD, LockoutPolicy};
use crate::password::{DEFAULT_BCRYPT_COST, PasswordHasher};
use crate::rate_limit::RateLimitSettings;
use clap::Parser;
use rand::Rng;
use rand::distr::Alphanumeric;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

const MIN_SECRET_LENGTH: usize = 32;

const ACCESS_SECRET_ENV: &str = "ACCESS_TOKEN_SECRET";
const REFRESH_SECRET_ENV: &str = "REFRESH_TOKEN_SECRET";

const GENERATED_PASSWORD_LENGTH: usize = 20;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "Quillpress",
    about = "Blogging API with token-based sessions"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "7291")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "DATABASE_PATH", default_value = "quillpress.db")]
    pub database: String,

    /// Path to file containing the access token secret. Prefer ACCESS_TOKEN_SECRET
    #[arg(long)]
    pub access_token_secret_file: Option<String>,

    /// Path to file containing the refresh token secret. Prefer REFRESH_TOKEN_SECRET
    #[arg(long)]
    pub refresh_token_secret_file: Option<String>,

    /// Access token lifetime in seconds
    #[arg(long, env = "ACCESS_TOKEN_TTL", default_value_t = ACCESS_TOKEN_DURATION_SECS)]
    pub access_token_ttl: u64,

    /// Refresh token lifetime in seconds
    #[arg(long, env = "REFRESH_TOKEN_TTL", default_value_t = REFRESH_TOKEN_DURATION_SECS)]
    pub refresh_token_ttl: u64,

    /// Failed logins before an account is locked
    #[arg(long, env = "LOCKOUT_THRESHOLD", default_value_t = DEFAULT_LOCKOUT_THRESHOLD,
        value_parser = clap::value_parser!(u32).range(1..))]
    pub lockout_threshold: u32,

    /// Lock duration in seconds
    #[arg(long, env = "LOCKOUT_DURATION", default_value_t = DEFAULT_LOCKOUT_DURATION_SECS)]
    pub lockout_duration: u64,

    /// Login attempts per minute per client IP and email
    #[arg(long, env = "LOGIN_RATE_LIMIT", default_value = "10")]
    pub login_rate_limit: u32,

    /// Registrations per hour per client IP
    #[arg(long, env = "REGISTER_RATE_LIMIT", default_value = "5")]
    pub register_rate_limit: u32,

    /// Token refreshes per minute per client IP
    #[arg(long, env = "REFRESH_RATE_LIMIT", default_value = "30")]
    pub refresh_rate_limit: u32,

    /// bcrypt cost factor
    #[arg(long, env = "BCRYPT_COST", default_value_t = DEFAULT_BCRYPT_COST,
        value_parser = clap::value_parser!(u32).range(4..=31))]
    pub bcrypt_cost: u32,

    /// Header carrying the client IP (e.g. x-forwarded-for). Only set behind a proxy
    #[arg(long, env = "IP_HEADER")]
    pub ip_header: Option<String>,

    /// Disable self-registration (accounts can still be created by admins)
    #[arg(long)]
    pub no_signup: bool,

    /// Create an admin account with this email on startup and print its password
    #[arg(long, value_name = "EMAIL")]
    pub create_admin: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load one secret from its environment variable or a file.
/// Returns None and logs an error if the secret cannot be loaded.
fn load_secret(env_var: &str, file: Option<&str>, flag: &str) -> Option<Vec<u8>> {
    let secret = if let Ok(secret) = std::env::var(env_var) {
        // Clear the environment variable to prevent leaking
        // SAFETY: Secrets are loaded before the server or any other task
        // is spawned, so nothing else reads the environment concurrently.
        unsafe { std::env::remove_var(env_var) };
        secret
    } else if let Some(path) = file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read secret file");
                return None;
            }
        }
    } else {
        error!(
            "{} is required. Set the environment variable (recommended) or use --{}",
            env_var, flag
        );
        return None;
    };

    if secret.len() < MIN_SECRET_LENGTH {
        error!(
            "{} is shorter than {} characters. Use a longer secret",
            env_var, MIN_SECRET_LENGTH
        );
        return None;
    }

    Some(secret.into_bytes())
}

/// Load both signing secrets. They must both exist and must differ.
pub fn load_secrets(args: &Args) -> Option<(Vec<u8>, Vec<u8>)> {
    let access = load_secret(
        ACCESS_SECRET_ENV,
        args.access_token_secret_file.as_deref(),
        "access-token-secret-file",
    )?;
    let refresh = load_secret(
        REFRESH_SECRET_ENV,
        args.refresh_token_secret_file.as_deref(),
        "refresh-token-secret-file",
    )?;

    if access == refresh {
        error!("Access and refresh token secrets must be different");
        return None;
    }

    Some((access, refresh))
}

/// Random password with at least one letter and one digit.
pub fn generate_password() -> String {
    let mut rng = rand::rng();
    loop {
        let password: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(GENERATED_PASSWORD_LENGTH)
            .map(char::from)
            .collect();
        let has_letter = password.chars().any(|c| c.is_ascii_alphabetic());
        let has_digit = password.chars().any(|c| c.is_ascii_digit());
        if has_letter && has_digit {
            return password;
        }
    }
}

/// Handle the --create-admin flag: create an admin with a generated
/// password, or report that the email is already taken.
pub async fn handle_create_admin(db: &Database, email: &str, hasher: PasswordHasher) {
    let email = normalize_email(email);

    match db.accounts().email_exists(&email).await {
        Ok(true) => {
            println!();
            println!("Account already exists: {}", email);
            println!();
        }
        Ok(false) => {
            let password = generate_password();
            let password_hash = match hasher.hash(&password).await {
                Ok(hash) => hash,
                Err(e) => {
                    error!(error = %e, "Failed to hash admin password");
                    std::process::exit(1);
                }
            };

            let uuid = Uuid::new_v4().to_string();
            let new = NewAccount {
                uuid: &uuid,
                name: "Administrator",
                email: &email,
                password_hash: &password_hash,
                role: Role::Admin,
            };

            match db.accounts().create(new, SystemClock.now()).await {
                Ok(_) => {
                    println!();
                    println!("Admin account created: {}", email);
                    println!("Password: {}", password);
                    println!();
                }
                Err(e) => {
                    error!(error = %e, "Failed to create admin account");
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to check for existing account");
            std::process::exit(1);
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    args: &Args,
    db: Database,
    access_secret: Vec<u8>,
    refresh_secret: Vec<u8>,
) -> ServerConfig {
    ServerConfig {
        db,
        access_secret,
        refresh_secret,
        lifetimes: TokenLifetimes {
            access_secs: args.access_token_ttl,
            refresh_secs: args.refresh_token_ttl,
        },
        lockout: LockoutPolicy {
            threshold: args.lockout_threshold,
            duration_secs: args.lockout_duration,
        },
        rate_limits: RateLimitSettings {
            login_per_minute: args.login_rate_limit,
            register_per_hour: args.register_rate_limit,
            refresh_per_minute: args.refresh_rate_limit,
        },
        bcrypt_cost: args.bcrypt_cost,
        ip_header: args.ip_header.clone(),
        no_signup: args.no_signup,
        clock: Arc::new(SystemClock),
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
