//! Turnstile API Server
//!
//! REST API server for account signup, login and session management.
//!
//! Author: hephaex@gmail.com

use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use turnstile_api::{auth::SeedOutcome, create_router, state::AppState};
use turnstile_core::{AppConfig, LoggingConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e:#}");
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging);
    info!(
        environment = ?config.environment,
        backend = ?config.database.backend,
        "Configuration loaded"
    );

    let state = Arc::new(
        AppState::connect(config.clone())
            .await
            .context("failed to connect to backing stores")?,
    );

    seed_admin(&state, &config).await?;

    let app = create_router(state);
    let addr = config.bind_address();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Turnstile API Server starting on http://{}", addr);
    info!("Swagger UI available at http://{}/swagger-ui/", addr);
    info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// `CONFIG_FILE` (TOML) when set, then environment overrides
fn load_config() -> anyhow::Result<AppConfig> {
    let config = match std::env::var("CONFIG_FILE") {
        Ok(path) => AppConfig::from_file(path)?.with_env_override()?,
        Err(_) => AppConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

/// `RUST_LOG` wins; otherwise the configured level
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", logging.level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn seed_admin(state: &AppState, config: &AppConfig) -> anyhow::Result<()> {
    let (Some(email), Some(password)) = (&config.auth.admin_email, &config.auth.admin_password)
    else {
        return Ok(());
    };

    match state
        .admins
        .seed(email, password, None)
        .await
        .context("failed to seed admin account")?
    {
        SeedOutcome::Created(admin) => info!(email = %admin.email, "Seeded admin account"),
        SeedOutcome::AlreadyPresent => warn!(email = %email, "Admin account already present"),
    }
    Ok(())
}
