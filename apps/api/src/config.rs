use anyhow::{Context, Result};

use crate::oracle::embedding::{DEFAULT_EMBEDDING_MODEL, DEFAULT_EMBEDDING_URL};
use crate::oracle::DEFAULT_MODEL;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    /// Absent: the service runs on the in-memory store.
    pub database_url: Option<String>,
    pub anthropic_api_key: String,
    pub oracle_model: String,
    pub embedding_url: String,
    pub embedding_api_key: Option<String>,
    pub embedding_model: String,
    pub oracle_concurrency: usize,
    pub batch_concurrency: usize,
    pub stage_timeout_secs: u64,
    pub default_candidate_narrative: Option<String>,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: optional_env("DATABASE_URL"),
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            oracle_model: optional_env("ORACLE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            embedding_url: optional_env("EMBEDDING_API_URL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_URL.to_string()),
            embedding_api_key: optional_env("EMBEDDING_API_KEY"),
            embedding_model: optional_env("EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            oracle_concurrency: parse_env("ORACLE_CONCURRENCY", 4)?,
            batch_concurrency: parse_env("BATCH_CONCURRENCY", 4)?,
            stage_timeout_secs: parse_env("STAGE_TIMEOUT_SECS", 90)?,
            default_candidate_narrative: optional_env("DEFAULT_CANDIDATE_NARRATIVE"),
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

/// Unset and blank both read as `None`.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        None => Ok(default),
    }
}
