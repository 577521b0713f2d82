//! Persistence layer.
//!
//! The evaluator only sees the `TradeStore` capability: load candidates,
//! insert an outcome, flip a status. `SqliteTradeStore` is the concrete
//! implementation used by the binary.

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{CommitStatus, TradeOutcome, TradeRecommendation};

/// Abstraction over the trade record store.
///
/// Both write operations are idempotent: re-inserting an outcome for the
/// same recommendation, or completing an already-completed trade, is a
/// no-op reported through the `bool` return, never an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// PENDING recommendations created at or after `cutoff`, oldest first.
    async fn pending_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<TradeRecommendation>>;

    /// Insert an outcome row. Returns `false` if the recommendation
    /// already has one.
    async fn insert_outcome(&self, outcome: &TradeOutcome) -> Result<bool>;

    /// Set status to COMPLETED, guarded by status = PENDING.
    /// Returns `false` if the trade was not PENDING.
    async fn mark_completed(&self, recommendation_id: &str) -> Result<bool>;

    /// Write the outcome, then flip the status.
    ///
    /// The outcome always lands first, so an interruption can leave a
    /// PENDING trade with an outcome (repaired on the next pass) but never a
    /// COMPLETED trade without one. Stores with transactions should
    /// override this to do both atomically.
    async fn commit_outcome(&self, outcome: &TradeOutcome) -> Result<CommitStatus> {
        let inserted = self.insert_outcome(outcome).await?;
        self.mark_completed(&outcome.recommendation_id).await?;
        Ok(if inserted {
            CommitStatus::Recorded
        } else {
            CommitStatus::AlreadyResolved
        })
    }
}
