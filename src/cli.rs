use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::config::{Config, StoreBackend};

#[derive(Parser)]
#[command(name = "payments-core")]
#[command(about = "Payments Core - charge, refund and webhook reconciliation service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API and webhook servers (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set to run migrations")?;

    let pool = crate::db::create_pool(database_url).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;
    println!("✓ Database migrations completed");

    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  API Port: {}", config.api_port);
    println!("  Webhooks Port: {}", config.webhooks_port);
    println!("  Store Backend: {:?}", config.store_backend);
    if config.store_backend == StoreBackend::Postgres {
        if let Some(url) = &config.database_url {
            println!("  Database URL: {}", mask_password(url));
        }
    }
    println!("  Stripe API Base: {}", config.stripe_api_base);
    println!("  Stripe Secret Key: {}", mask_secret(&config.stripe_secret_key));
    println!(
        "  Stripe Webhook Secret: {}",
        mask_secret(&config.stripe_webhook_secret_key)
    );
    println!("  Gateway Timeout: {:?}", config.gateway_timeout);
    println!("  Webhook Tolerance: {:?}", config.webhook_tolerance);
    println!("  Request Timeout: {:?}", config.request_timeout);
    println!("  Debug Mode: {}", config.debug_mode);
    println!("  Log Request Body: {}", config.log_request_body);

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user_start = slash_pos + 2;
                let user = &url[user_start..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}

/// Keeps the key-kind prefix (`sk_test_`, `whsec_`) and hides the rest.
fn mask_secret(secret: &str) -> String {
    match secret.rfind('_') {
        Some(pos) => format!("{}****", &secret[..=pos]),
        None => "****".to_string(),
    }
}
