//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section has defaults, so a partial (or empty) file is valid.
//! Secrets (the invocation token) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use crate::engine::session::MarketSession;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
    #[serde(default)]
    pub price_oracle: PriceOracleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub market_hours: MarketHoursConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvaluatorConfig {
    /// Extra lookback on top of the 45-minute window when selecting
    /// candidates. A trade only becomes a LOSS once it is at least 45
    /// minutes old, so this must cover at least one scheduler interval or
    /// expired trades are never picked up again.
    #[serde(default = "default_selection_grace_minutes")]
    pub selection_grace_minutes: i64,
    /// Maximum candidates evaluated concurrently within one pass.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Optional in-process cadence. When unset, passes only run when
    /// triggered over HTTP or via `once`.
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            selection_grace_minutes: default_selection_grace_minutes(),
            max_concurrency: default_max_concurrency(),
            poll_interval_secs: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PriceOracleConfig {
    #[serde(default = "default_price_base_url")]
    pub base_url: String,
    #[serde(default = "default_price_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for PriceOracleConfig {
    fn default() -> Self {
        Self {
            base_url: default_price_base_url(),
            timeout_secs: default_price_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Name of the env var holding the bearer token for `/evaluate`.
    /// If the variable is unset, the endpoint is open.
    #[serde(default)]
    pub auth_token_env: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_port(),
            auth_token_env: None,
        }
    }
}

/// Regular trading session gate. Outside the session quotes are stale, so
/// passes are skipped instead of expiring trades against a frozen price.
#[derive(Debug, Deserialize, Clone)]
pub struct MarketHoursConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// IANA zone the session times are expressed in.
    #[serde(default = "default_market_timezone")]
    pub timezone: String,
    /// Session open, `HH:MM` local time.
    #[serde(default = "default_market_open")]
    pub open: String,
    /// Session close, `HH:MM` local time (inclusive).
    #[serde(default = "default_market_close")]
    pub close: String,
}

impl Default for MarketHoursConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: default_market_timezone(),
            open: default_market_open(),
            close: default_market_close(),
        }
    }
}

fn default_selection_grace_minutes() -> i64 {
    15
}

fn default_max_concurrency() -> usize {
    8
}

fn default_price_base_url() -> String {
    "https://query1.finance.yahoo.com".to_string()
}

fn default_price_timeout_secs() -> u64 {
    5
}

fn default_user_agent() -> String {
    concat!("outcome-tracker/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_database_url() -> String {
    "sqlite://outcomes.db".to_string()
}

fn default_busy_timeout_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    8080
}

fn default_market_timezone() -> String {
    "America/New_York".to_string()
}

fn default_market_open() -> String {
    "09:30".to_string()
}

fn default_market_close() -> String {
    "16:00".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.evaluator.max_concurrency == 0 {
            anyhow::bail!("evaluator.max_concurrency must be at least 1");
        }
        if self.evaluator.selection_grace_minutes < 1 {
            anyhow::bail!(
                "evaluator.selection_grace_minutes must be at least 1, \
                 otherwise expired trades are never selected"
            );
        }
        match self.evaluator.poll_interval_secs {
            Some(0) => anyhow::bail!("evaluator.poll_interval_secs must be positive when set"),
            Some(secs) if secs >= self.evaluator.selection_grace_minutes as u64 * 60 => {
                anyhow::bail!(
                    "evaluator.poll_interval_secs ({secs}) must be shorter than \
                     selection_grace_minutes ({}m)",
                    self.evaluator.selection_grace_minutes
                );
            }
            _ => {}
        }
        if self.market_hours.enabled {
            MarketSession::from_config(&self.market_hours)
                .context("Invalid [market_hours] section")?;
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
