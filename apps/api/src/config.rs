use std::time::Duration;

use anyhow::{Context, Result};

use crate::screening::pipeline::PipelineConfig;
use crate::screening::scoring::ScoringWeights;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let pipeline = PipelineConfig {
            concurrency_limit: parse_env("CONCURRENCY_LIMIT", 4)?,
            per_call_timeout: Duration::from_secs(parse_env("PER_CALL_TIMEOUT_SECS", 30)?),
            max_document_length: parse_env("MAX_DOCUMENT_LENGTH", 20_000)?,
            weights: ScoringWeights {
                skills: parse_env("SKILLS_WEIGHT", 0.5)?,
                experience: parse_env("EXPERIENCE_WEIGHT", 0.3)?,
                education: parse_env("EDUCATION_WEIGHT", 0.2)?,
            },
        };
        pipeline
            .validate()
            .context("Invalid pipeline configuration")?;

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            pipeline,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' is not valid: '{raw}'")),
        Err(_) => Ok(default),
    }
}
