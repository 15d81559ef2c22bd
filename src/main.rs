//! AAD Phone Book - sample web application
//!
//! Signs users in against Azure AD with the authorization-code flow, keeps
//! their tokens in a server-side session and shows the organization's
//! directory.

#![deny(clippy::all)]

mod auth;
mod config;
mod error;
mod session;
mod web;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        // .env file is optional - only log if it's not a "file not found" error
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    init_logging();

    info!("Starting AAD Phone Book v{}", env!("CARGO_PKG_VERSION"));

    let config = match Config::load() {
        Ok(c) => {
            info!("Configuration loaded successfully");
            c
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("Configuration error: {}", e);
            eprintln!("\nPlease set the following environment variables:");
            eprintln!("  AAD_PROTO_CLIENT_ID=<your-azure-ad-client-id>");
            eprintln!("  AAD_PROTO_CLIENT_SECRET=<your-client-secret>");
            eprintln!("  AAD_PROTO_TENANT_ID=<your-tenant-id>");
            std::process::exit(1);
        }
    };

    let state = AppState::from_config(&config)?;
    web::serve(&config, state).await
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();
}
