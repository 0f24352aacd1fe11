use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::gateway::stripe::DEFAULT_API_BASE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => bail!("STORE_BACKEND must be 'postgres' or 'memory', got '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => bail!("LOG_FORMAT must be 'text' or 'json', got '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_port: u16,
    pub webhooks_port: u16,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret_key: String,
    pub stripe_api_base: String,
    pub gateway_timeout: Duration,
    pub webhook_tolerance: Duration,
    pub request_timeout: Duration,
    pub debug_mode: bool,
    pub log_format: LogFormat,
    pub log_request_body: bool,
    pub cors_allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok(); // Load .env file if present

        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| get(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| var(key).with_context(|| format!("{} must be set", key));

        let store_backend: StoreBackend = var("STORE_BACKEND")
            .unwrap_or_else(|| "postgres".to_string())
            .parse()?;

        let database_url = var("DATABASE_URL");
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            bail!("DATABASE_URL must be set when STORE_BACKEND=postgres");
        }

        let stripe_api_base = var("STRIPE_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        url::Url::parse(&stripe_api_base)
            .with_context(|| format!("STRIPE_API_BASE is not a valid URL: {}", stripe_api_base))?;

        Ok(Config {
            api_port: parse_or(&var, "API_PORT", 3000)?,
            webhooks_port: parse_or(&var, "WEBHOOKS_PORT", 3001)?,
            store_backend,
            database_url,
            stripe_secret_key: required("STRIPE_SECRET_KEY")?,
            stripe_webhook_secret_key: required("STRIPE_WEBHOOK_SECRET_KEY")?,
            stripe_api_base,
            gateway_timeout: Duration::from_millis(parse_or(&var, "GATEWAY_TIMEOUT_MS", 15_000)?),
            webhook_tolerance: Duration::from_secs(parse_or(&var, "WEBHOOK_TOLERANCE_SECS", 300)?),
            request_timeout: Duration::from_secs(parse_or(&var, "REQUEST_TIMEOUT_SECS", 30)?),
            debug_mode: parse_or(&var, "DEBUG_MODE", false)?,
            log_format: var("LOG_FORMAT").unwrap_or_default().parse()?,
            log_request_body: parse_or(&var, "LOG_REQUEST_BODY", false)?,
            cors_allowed_origins: var("CORS_ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        None => Ok(default),
    }
}
