use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::catalog::retry::DEFAULT_MAX_ATTEMPTS;
use crate::catalog::RetryPolicy;
use crate::llm_client::{DEFAULT_API_URL, DEFAULT_MODEL};

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub catalog_base_url: String,
    /// Bearer token for the catalog; unset means the environment's ambient
    /// credentials are used.
    pub catalog_token: Option<String>,
    pub llm_api_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub fetch_max_attempts: u32,
    pub fetch_batch_size: usize,
    pub fetch_max_elapsed_secs: u64,
    /// Field list requested for batch fetches; unset keeps the built-in list.
    pub fetch_batch_fields: Option<Vec<String>>,
    pub batch_export_dir: Option<PathBuf>,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup.
    pub fn from_source(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let optional = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        Ok(Config {
            catalog_base_url: optional("CATALOG_BASE_URL").with_context(|| {
                "Required environment variable 'CATALOG_BASE_URL' is not set".to_string()
            })?,
            catalog_token: optional("CATALOG_TOKEN"),
            llm_api_url: optional("LLM_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            llm_api_key: optional("LLM_API_KEY"),
            llm_model: optional("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            fetch_max_attempts: positive_or(
                optional("FETCH_MAX_ATTEMPTS"),
                DEFAULT_MAX_ATTEMPTS,
                "FETCH_MAX_ATTEMPTS must be a positive integer",
            )?,
            fetch_batch_size: positive_or(
                optional("FETCH_BATCH_SIZE"),
                8,
                "FETCH_BATCH_SIZE must be a positive integer",
            )?,
            fetch_max_elapsed_secs: parse_or(
                optional("FETCH_MAX_ELAPSED_SECS"),
                120,
                "FETCH_MAX_ELAPSED_SECS must be a number of seconds",
            )?,
            fetch_batch_fields: optional("FETCH_BATCH_FIELDS").map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect()
            }),
            batch_export_dir: optional("BATCH_EXPORT_DIR").map(PathBuf::from),
            port: parse_or(optional("PORT"), 8080, "PORT must be a valid port number")?,
            rust_log: optional("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.fetch_max_attempts,
            Duration::from_secs(self.fetch_max_elapsed_secs),
        )
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T, msg: &'static str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(v) => v.trim().parse::<T>().context(msg),
        None => Ok(default),
    }
}

/// Like [`parse_or`], but zero is rejected.
fn positive_or<T>(value: Option<String>, default: T, msg: &'static str) -> Result<T>
where
    T: std::str::FromStr + Default + PartialEq,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let parsed = parse_or(value, default, msg)?;
    if parsed == T::default() {
        anyhow::bail!("{msg}");
    }
    Ok(parsed)
}
