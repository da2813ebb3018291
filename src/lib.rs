pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod client;
pub mod clock;
pub mod db;
pub mod jwt;
pub mod lockout;
pub mod password;
pub mod rate_limit;

use api::{ApiContext, create_api_router};
use axum::Router;
use clock::Clock;
use db::Database;
use jwt::{JwtError, TokenLifetimes, TokenService};
use lockout::LockoutPolicy;
use password::PasswordHasher;
use rate_limit::{RateLimitConfig, RateLimitSettings};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// Secret for signing access tokens
    pub access_secret: Vec<u8>,
    /// Secret for signing refresh tokens, distinct from the access secret
    pub refresh_secret: Vec<u8>,
    pub lifetimes: TokenLifetimes,
    pub lockout: LockoutPolicy,
    pub rate_limits: RateLimitSettings,
    pub bcrypt_cost: u32,
    /// Header carrying the client IP (requires running behind a proxy)
    pub ip_header: Option<String>,
    /// Whether self-registration is disabled
    pub no_signup: bool,
    /// Time source for token expiry and lock windows
    pub clock: Arc<dyn Clock>,
}

/// Create the application router with the given configuration.
/// Fails if the token secrets are unusable.
pub fn create_app(config: &ServerConfig) -> Result<Router, JwtError> {
    let tokens = Arc::new(TokenService::new(
        &config.access_secret,
        &config.refresh_secret,
        config.lifetimes,
        config.clock.clone(),
    )?);

    let ctx = ApiContext {
        db: config.db.clone(),
        tokens,
        hasher: PasswordHasher::new(config.bcrypt_cost),
        lockout: config.lockout,
        rate_limits: Arc::new(RateLimitConfig::new(
            config.rate_limits,
            config.ip_header.clone(),
        )),
        no_signup: config.no_signup,
    };

    Ok(Router::new().nest("/api", create_api_router(ctx)))
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(db: &Database, clock: Arc<dyn Clock>) {
    cleanup::run_cleanup(db, clock.as_ref()).await;
    cleanup::spawn_cleanup_scheduler(db.clone(), clock);
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> std::io::Result<(tokio::task::JoinHandle<()>, SocketAddr)> {
    init_cleanup(&config.db, config.clock.clone()).await;

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(config, listener).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}
