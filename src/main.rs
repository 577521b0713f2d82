//! Outcome tracker
//!
//! Entry point. Loads configuration, initialises structured logging, opens
//! the trade store, and either runs a single evaluation pass (`once`) or
//! serves the HTTP trigger, optionally polling on a fixed interval, until
//! Ctrl+C.

use anyhow::Result;
use chrono::Utc;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use outcome_tracker::config::{self, AppConfig};
use outcome_tracker::engine::{MarketSession, OutcomeEvaluator};
use outcome_tracker::prices::yahoo::YahooPriceOracle;
use outcome_tracker::server::{self, routes::ServerState};
use outcome_tracker::storage::sqlite::SqliteTradeStore;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path =
        std::env::var("OUTCOME_TRACKER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = if std::path::Path::new(&config_path).exists() {
        AppConfig::load(&config_path)?
    } else {
        AppConfig::default()
    };

    init_logging();

    info!(
        config = %config_path,
        database = %cfg.storage.database_url,
        price_source = %cfg.price_oracle.base_url,
        grace_minutes = cfg.evaluator.selection_grace_minutes,
        max_concurrency = cfg.evaluator.max_concurrency,
        market_hours = cfg.market_hours.enabled,
        "Outcome tracker starting up"
    );

    // -- Initialise components -------------------------------------------

    let store = SqliteTradeStore::connect(&cfg.storage).await?;
    let oracle = YahooPriceOracle::new(&cfg.price_oracle)?;
    let mut evaluator = OutcomeEvaluator::new(Arc::new(store), Arc::new(oracle), cfg.evaluator.clone());
    if cfg.market_hours.enabled {
        let session = MarketSession::from_config(&cfg.market_hours)?;
        info!(
            timezone = %cfg.market_hours.timezone,
            open = %cfg.market_hours.open,
            close = %cfg.market_hours.close,
            "Passes gated to the regular trading session"
        );
        evaluator = evaluator.with_market_session(session);
    }
    let evaluator = Arc::new(evaluator);

    if std::env::args().nth(1).as_deref() == Some("once") {
        return run_once(&evaluator).await;
    }

    let server_task = if cfg.server.enabled {
        let state = Arc::new(ServerState::new(evaluator.clone(), resolve_auth_token(&cfg.server)));
        let port = cfg.server.port;
        Some(tokio::spawn(async move {
            if let Err(e) = server::serve(state, port, shutdown_signal()).await {
                error!(error = %format!("{e:#}"), "Invocation server stopped");
            }
        }))
    } else {
        None
    };

    match cfg.evaluator.poll_interval_secs {
        Some(secs) => poll_loop(&evaluator, Duration::from_secs(secs)).await,
        None if server_task.is_none() => {
            warn!("Server disabled and no poll interval configured; running a single pass");
            return run_once(&evaluator).await;
        }
        None => {}
    }

    if let Some(task) = server_task {
        if let Err(e) = task.await {
            error!(error = %e, "Server task panicked");
        }
    }

    info!("Outcome tracker shut down cleanly.");
    Ok(())
}

/// Single pass for cron-style schedulers. Pass-level failure exits non-zero.
async fn run_once(evaluator: &OutcomeEvaluator) -> Result<()> {
    let summary = evaluator.run_pass(Utc::now()).await?;
    info!(summary = %summary, "Single pass finished");
    Ok(())
}

/// Run passes on a fixed cadence until Ctrl+C.
async fn poll_loop(evaluator: &OutcomeEvaluator, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!(interval_secs = every.as_secs(), "Entering poll loop. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = evaluator.run_pass(Utc::now()).await {
                    error!(error = %e, "Pass failed, continuing to next tick");
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

/// Bearer token for `/evaluate`, if the configured env var is set.
fn resolve_auth_token(cfg: &config::ServerConfig) -> Option<SecretString> {
    let env_name = cfg.auth_token_env.as_deref()?;
    match AppConfig::resolve_env(env_name) {
        Ok(token) if !token.trim().is_empty() => Some(SecretString::new(token.trim().to_string())),
        _ => {
            warn!(env = env_name, "Auth token env var not set, /evaluate is unauthenticated");
            None
        }
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("outcome_tracker=info"));

    let json_logging = std::env::var("OUTCOME_TRACKER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
