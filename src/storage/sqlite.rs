//! SQLite trade store.
//!
//! Two tables: `trade_recommendations` (written externally, status flipped
//! here) and `trade_outcomes` (one row per recommendation, enforced by a
//! UNIQUE constraint). Timestamps are stored as fixed-width RFC 3339 UTC
//! text so lexical comparison matches chronological order.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::TradeStore;
use crate::config::StorageConfig;
use crate::types::{CommitStatus, FinalOutcome, TradeOutcome, TradeRecommendation, TradeStatus};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS trade_recommendations (
        id           TEXT PRIMARY KEY,
        symbol       TEXT NOT NULL,
        direction    TEXT NOT NULL CHECK (direction IN ('LONG', 'SHORT')),
        entry_price  REAL NOT NULL,
        virtual_tp1  REAL NOT NULL,
        stop_loss    REAL NOT NULL,
        created_at   TEXT NOT NULL,
        status       TEXT NOT NULL DEFAULT 'PENDING' CHECK (status IN ('PENDING', 'COMPLETED'))
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_recommendations_status_created
        ON trade_recommendations (status, created_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS trade_outcomes (
        id                     TEXT PRIMARY KEY,
        recommendation_id      TEXT NOT NULL UNIQUE REFERENCES trade_recommendations (id),
        final_outcome          TEXT NOT NULL CHECK (final_outcome IN ('WIN', 'LOSS')),
        minutes_to_win         INTEGER,
        highest_price_reached  REAL,
        lowest_price_reached   REAL,
        resolved_at            TEXT NOT NULL
    )
    "#,
];

const SELECT_RECOMMENDATION: &str = "SELECT id, symbol, direction, entry_price, virtual_tp1, stop_loss, created_at, status FROM trade_recommendations";

const INSERT_OUTCOME: &str = r#"
    INSERT INTO trade_outcomes (
        id, recommendation_id, final_outcome, minutes_to_win,
        highest_price_reached, lowest_price_reached, resolved_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (recommendation_id) DO NOTHING
"#;

const MARK_COMPLETED: &str =
    "UPDATE trade_recommendations SET status = 'COMPLETED' WHERE id = ? AND status = 'PENDING'";

/// Format a timestamp for storage: `2026-10-19T14:05:00.000000Z`.
fn to_db_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_db_time(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp in store: {s}"))?
        .with_timezone(&Utc))
}

/// SQLite-backed [`TradeStore`].
#[derive(Clone)]
pub struct SqliteTradeStore {
    pool: SqlitePool,
}

impl SqliteTradeStore {
    /// Open (creating if missing) the database and ensure the schema exists.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let in_memory = config.database_url.contains(":memory:");
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .with_context(|| format!("Invalid database URL: {}", config.database_url))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

        // Every in-memory connection is its own database, so keep exactly one alive.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let options = if in_memory {
            options
        } else {
            options.journal_mode(SqliteJournalMode::Wal)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", config.database_url))?;

        let store = Self { pool };
        store.init().await?;
        info!(url = %config.database_url, "Trade store ready");
        Ok(store)
    }

    /// In-memory store, for tests and dry runs.
    pub async fn in_memory() -> Result<Self> {
        Self::connect(&StorageConfig {
            database_url: "sqlite::memory:".to_string(),
            ..StorageConfig::default()
        })
        .await
    }

    async fn init(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to create schema")?;
        }
        Ok(())
    }

    fn row_to_recommendation(row: &SqliteRow) -> Result<TradeRecommendation> {
        let direction: String = row.try_get("direction")?;
        let status: String = row.try_get("status")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(TradeRecommendation {
            id: row.try_get("id")?,
            symbol: row.try_get("symbol")?,
            direction: direction.parse().map_err(anyhow::Error::msg)?,
            entry_price: row.try_get("entry_price")?,
            virtual_tp1: row.try_get("virtual_tp1")?,
            stop_loss: row.try_get("stop_loss")?,
            created_at: from_db_time(&created_at)?,
            status: status.parse().map_err(anyhow::Error::msg)?,
        })
    }

    fn row_to_outcome(row: &SqliteRow) -> Result<TradeOutcome> {
        let final_outcome: String = row.try_get("final_outcome")?;
        let resolved_at: String = row.try_get("resolved_at")?;

        Ok(TradeOutcome {
            recommendation_id: row.try_get("recommendation_id")?,
            final_outcome: final_outcome.parse::<FinalOutcome>().map_err(anyhow::Error::msg)?,
            minutes_to_win: row.try_get("minutes_to_win")?,
            highest_price_reached: row.try_get("highest_price_reached")?,
            lowest_price_reached: row.try_get("lowest_price_reached")?,
            resolved_at: from_db_time(&resolved_at)?,
        })
    }

    /// Seed a recommendation. Creation belongs to the upstream producer; this
    /// exists for operators and tests.
    pub async fn insert_recommendation(&self, rec: &TradeRecommendation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_recommendations (
                id, symbol, direction, entry_price, virtual_tp1, stop_loss, created_at, status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&rec.id)
        .bind(&rec.symbol)
        .bind(rec.direction.to_string())
        .bind(rec.entry_price)
        .bind(rec.virtual_tp1)
        .bind(rec.stop_loss)
        .bind(to_db_time(rec.created_at))
        .bind(rec.status.to_string())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert recommendation {}", rec.id))?;
        Ok(())
    }

    pub async fn get_recommendation(&self, id: &str) -> Result<Option<TradeRecommendation>> {
        let row = sqlx::query(&format!("{SELECT_RECOMMENDATION} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch recommendation")?;
        row.as_ref().map(Self::row_to_recommendation).transpose()
    }

    pub async fn get_outcome(&self, recommendation_id: &str) -> Result<Option<TradeOutcome>> {
        let row = sqlx::query(
            r#"
            SELECT recommendation_id, final_outcome, minutes_to_win,
                   highest_price_reached, lowest_price_reached, resolved_at
            FROM trade_outcomes WHERE recommendation_id = ?
            "#,
        )
        .bind(recommendation_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch outcome")?;
        row.as_ref().map(Self::row_to_outcome).transpose()
    }

    pub async fn count_outcomes(&self, recommendation_id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM trade_outcomes WHERE recommendation_id = ?")
                .bind(recommendation_id)
                .fetch_one(&self.pool)
                .await
                .context("Failed to count outcomes")?;
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// TradeStore trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl TradeStore for SqliteTradeStore {
    async fn pending_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<TradeRecommendation>> {
        let rows = sqlx::query(&format!(
            "{SELECT_RECOMMENDATION} WHERE status = ? AND created_at >= ? ORDER BY created_at ASC"
        ))
        .bind(TradeStatus::Pending.to_string())
        .bind(to_db_time(cutoff))
        .fetch_all(&self.pool)
        .await
        .context("Failed to query pending recommendations")?;

        let mut trades = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::row_to_recommendation(row) {
                Ok(trade) => trades.push(trade),
                Err(e) => {
                    // One corrupt row must not block every other candidate.
                    let id: String = row.try_get("id").unwrap_or_default();
                    warn!(trade_id = %id, error = %e, "Skipping unreadable recommendation row");
                }
            }
        }
        debug!(count = trades.len(), cutoff = %cutoff, "Loaded pending recommendations");
        Ok(trades)
    }

    async fn insert_outcome(&self, outcome: &TradeOutcome) -> Result<bool> {
        let result = bind_outcome(sqlx::query(INSERT_OUTCOME), outcome)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to insert outcome for {}", outcome.recommendation_id))?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_completed(&self, recommendation_id: &str) -> Result<bool> {
        let result = sqlx::query(MARK_COMPLETED)
            .bind(recommendation_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to complete recommendation {recommendation_id}"))?;
        Ok(result.rows_affected() == 1)
    }

    /// Outcome insert and status flip in one transaction.
    async fn commit_outcome(&self, outcome: &TradeOutcome) -> Result<CommitStatus> {
        let id = &outcome.recommendation_id;
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let inserted = bind_outcome(sqlx::query(INSERT_OUTCOME), outcome)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert outcome for {id}"))?
            .rows_affected()
            == 1;

        let completed = sqlx::query(MARK_COMPLETED)
            .bind(id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to complete recommendation {id}"))?
            .rows_affected()
            == 1;

        tx.commit().await.context("Failed to commit outcome transaction")?;

        if !inserted && completed {
            info!(trade_id = %id, "Repaired PENDING trade that already had an outcome");
        }
        Ok(if inserted {
            CommitStatus::Recorded
        } else {
            CommitStatus::AlreadyResolved
        })
    }
}

fn bind_outcome<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    outcome: &'q TradeOutcome,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&outcome.recommendation_id)
        .bind(outcome.final_outcome.to_string())
        .bind(outcome.minutes_to_win)
        .bind(outcome.highest_price_reached)
        .bind(outcome.lowest_price_reached)
        .bind(to_db_time(outcome.resolved_at))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
