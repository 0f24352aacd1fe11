use anyhow::Context;
use axum::http::HeaderValue;
use clap::Parser;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use payments_core::adapters::{InMemoryTransactionStore, PostgresTransactionStore};
use payments_core::cli::{self, Cli, Commands, DbCommands};
use payments_core::config::{Config, LogFormat, StoreBackend};
use payments_core::domain::PaymentProvider;
use payments_core::gateway::StripeGateway;
use payments_core::ports::TransactionStore;
use payments_core::services::{EventReconciler, PaymentService, WebhookService};
use payments_core::webhook::{EventRegistry, StripeEventVerifier};
use payments_core::{api_router, db, webhook_router, AppState};

fn init_tracing(format: LogFormat) {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn cors_layer(origins: &[String]) -> anyhow::Result<Option<CorsLayer>> {
    if origins.is_empty() {
        return Ok(None);
    }

    let origins = origins
        .iter()
        .map(|o| HeaderValue::from_str(o).with_context(|| format!("invalid CORS origin: {}", o)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any),
    ))
}

async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let (store, pool) = match config.store_backend {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set")?;
            let pool = db::create_pool(database_url).await?;
            db::run_migrations(&pool).await?;
            let store: Arc<dyn TransactionStore> =
                Arc::new(PostgresTransactionStore::new(pool.clone()));
            (store, Some(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory transaction store; records are lost on restart");
            let store: Arc<dyn TransactionStore> = Arc::new(InMemoryTransactionStore::new());
            (store, None)
        }
    };

    let gateway = StripeGateway::new(
        config.stripe_api_base.clone(),
        config.stripe_secret_key.clone(),
        config.gateway_timeout,
    )?;
    tracing::info!("Stripe gateway initialized with URL: {}", config.stripe_api_base);

    let webhooks = WebhookService::builder(EventReconciler::new(store.clone()))
        .provider(
            PaymentProvider::Stripe,
            Arc::new(StripeEventVerifier::new(
                config.stripe_webhook_secret_key.clone(),
                config.webhook_tolerance,
            )),
            EventRegistry::stripe(),
        )
        .build();

    Ok(AppState {
        payments: PaymentService::new(store, Arc::new(gateway)),
        webhooks,
        db: pool,
        debug_mode: config.debug_mode,
        log_request_body: config.log_request_body,
    })
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let state = build_state(&config).await?;
    let timeout = TimeoutLayer::new(config.request_timeout);

    let mut api = api_router(state.clone()).layer(timeout.clone());
    if let Some(cors) = cors_layer(&config.cors_allowed_origins)? {
        api = api.layer(cors);
    }
    let webhooks = webhook_router(state).layer(timeout);

    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let webhooks_addr = SocketAddr::from(([0, 0, 0, 0], config.webhooks_port));

    let api_listener = TcpListener::bind(api_addr).await?;
    let webhooks_listener = TcpListener::bind(webhooks_addr).await?;
    tracing::info!("API listening on {}", api_addr);
    tracing::info!("webhooks listening on {}", webhooks_addr);

    tokio::try_join!(
        axum::serve(api_listener, api).into_future(),
        axum::serve(webhooks_listener, webhooks).into_future(),
    )?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    init_tracing(config.log_format);

    match cli.command {
        None | Some(Commands::Serve) => serve(config).await,
        Some(Commands::Db(DbCommands::Migrate)) => cli::handle_db_migrate(&config).await,
        Some(Commands::Config) => cli::handle_config_validate(&config),
    }
}
