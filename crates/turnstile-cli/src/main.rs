//! Turnstile CLI - operator tasks
//!
//! Usage:
//!   turnstile hash-password <password>
//!   turnstile seed-admin --email <email> --password <password>
//!   turnstile check-config

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use turnstile_api::auth::{
    AdminService, InMemorySessionStore, PasswordConfig, PasswordHasher, PgAccountStore,
    SeedOutcome, SessionManager, TokenIssuer, UserService,
};
use turnstile_core::AppConfig;

#[derive(Parser)]
#[command(name = "turnstile")]
#[command(about = "Turnstile account server administration")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the Argon2id hash of a password using the configured parameters
    HashPassword {
        /// Plaintext password
        password: String,
    },
    /// Create an admin account in PostgreSQL unless one with this email exists
    SeedAdmin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Display name
        #[arg(long)]
        name: Option<String>,
    },
    /// Load and validate configuration, then print the non-secret settings
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "turnstile=info,turnstile_api=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("failed to load configuration")?;

    match cli.command {
        Commands::HashPassword { password } => {
            let hasher = PasswordHasher::new(PasswordConfig::from(&config.auth));
            println!("{}", hasher.hash_async(&password).await?);
        }
        Commands::SeedAdmin {
            email,
            password,
            name,
        } => {
            config.validate()?;
            let outcome = seed_admin(&config, &email, &password, name).await?;
            match outcome {
                SeedOutcome::Created(admin) => println!("Created admin {} ({})", admin.email, admin.id),
                SeedOutcome::AlreadyPresent => println!("Admin {email} already exists; left unchanged"),
            }
        }
        Commands::CheckConfig => {
            config.validate()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            info!("Configuration is valid");
        }
    }

    Ok(())
}

/// Seeding only touches the admins table; sessions stay in memory
async fn seed_admin(
    config: &AppConfig,
    email: &str,
    password: &str,
    name: Option<String>,
) -> anyhow::Result<SeedOutcome> {
    let db = &config.database;
    let accounts = Arc::new(
        PgAccountStore::connect(&db.postgres_url, 1)
            .await
            .context("failed to connect to PostgreSQL")?,
    );

    let sessions = Arc::new(SessionManager::new(Arc::new(InMemorySessionStore::new())));
    let tokens = Arc::new(TokenIssuer::new((&config.auth).into()));
    let hasher = PasswordHasher::new(PasswordConfig::from(&config.auth));

    let users = Arc::new(UserService::new(
        accounts.clone(),
        sessions.clone(),
        tokens.clone(),
        hasher.clone(),
    ));
    let admins = AdminService::new(accounts, users, sessions, tokens, hasher);

    Ok(admins.seed(email, password, name).await?)
}
