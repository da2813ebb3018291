use std::net::SocketAddr;

use clap::Parser;
use quillpress::cli::{
    Args, build_config, handle_create_admin, init_logging, load_secrets, open_database,
};
use quillpress::create_app;
use quillpress::init_cleanup;
use quillpress::password::PasswordHasher;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some((access_secret, refresh_secret)) = load_secrets(&args) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    if let Some(email) = args.create_admin.as_deref() {
        handle_create_admin(&db, email, PasswordHasher::new(args.bcrypt_cost)).await;
    }

    let config = build_config(&args, db, access_secret, refresh_secret);
    let app = create_app(&config).unwrap_or_else(|e| {
        error!(error = %e, "Invalid token configuration");
        std::process::exit(1);
    });

    init_cleanup(&config.db, config.clock.clone()).await;

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    match listener.local_addr() {
        Ok(local_addr) => info!(address = %local_addr, "Listening"),
        Err(e) => error!(error = %e, "Failed to read local address"),
    }

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, make_service).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
