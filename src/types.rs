//! Shared types for the outcome tracker.
//!
//! These types form the data model used across all modules: the
//! recommendation under evaluation, its terminal outcome, the decision
//! computed for one candidate, and the per-pass summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of the observation window. A trade that has not reached its
/// take-profit target after this many minutes is closed as a LOSS.
pub const OBSERVATION_WINDOW_MINUTES: i64 = 45;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LONG" => Ok(Direction::Long),
            "SHORT" => Ok(Direction::Short),
            other => Err(format!("Unknown direction: {other}")),
        }
    }
}

/// Lifecycle status of a recommendation. Only ever moves PENDING → COMPLETED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Pending,
    Completed,
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeStatus::Pending => write!(f, "PENDING"),
            TradeStatus::Completed => write!(f, "COMPLETED"),
        }
    }
}

impl FromStr for TradeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(TradeStatus::Pending),
            "COMPLETED" => Ok(TradeStatus::Completed),
            other => Err(format!("Unknown trade status: {other}")),
        }
    }
}

/// Final resolution of a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FinalOutcome {
    Win,
    Loss,
}

impl fmt::Display for FinalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalOutcome::Win => write!(f, "WIN"),
            FinalOutcome::Loss => write!(f, "LOSS"),
        }
    }
}

impl FromStr for FinalOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "WIN" => Ok(FinalOutcome::Win),
            "LOSS" => Ok(FinalOutcome::Loss),
            other => Err(format!("Unknown outcome: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Recommendation
// ---------------------------------------------------------------------------

/// A trade recommendation awaiting (or past) evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecommendation {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    /// Take-profit target whose crossing triggers a WIN.
    pub virtual_tp1: f64,
    pub stop_loss: f64,
    pub created_at: DateTime<Utc>,
    pub status: TradeStatus,
}

impl fmt::Display for TradeRecommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} entry={:.2} tp1={:.2} sl={:.2} ({})",
            self.id,
            self.direction,
            self.symbol,
            self.entry_price,
            self.virtual_tp1,
            self.stop_loss,
            self.status,
        )
    }
}

impl TradeRecommendation {
    /// Whole minutes elapsed since creation, floored.
    pub fn minutes_elapsed(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds().div_euclid(60)
    }

    /// Whether the current price has crossed the take-profit target in the
    /// trade's favorable direction.
    pub fn take_profit_hit(&self, price: f64) -> bool {
        match self.direction {
            Direction::Long => price >= self.virtual_tp1,
            Direction::Short => price <= self.virtual_tp1,
        }
    }

    /// Helper to build a test recommendation with sensible defaults.
    #[cfg(test)]
    pub fn sample(direction: Direction, virtual_tp1: f64, created_at: DateTime<Utc>) -> Self {
        TradeRecommendation {
            id: "rec-001".to_string(),
            symbol: "TSLA".to_string(),
            direction,
            entry_price: 100.0,
            virtual_tp1,
            stop_loss: match direction {
                Direction::Long => 95.0,
                Direction::Short => 105.0,
            },
            created_at,
            status: TradeStatus::Pending,
        }
    }
}

// ---------------------------------------------------------------------------
// Decision & outcome
// ---------------------------------------------------------------------------

/// Result of applying the decision rule to one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Win { minutes_to_win: i64 },
    Loss,
    /// Neither condition met yet; leave the trade for a later pass.
    Pending,
}

impl Decision {
    /// Apply the win/loss rule. Take-profit is checked before expiry, so a
    /// trade that hits its target on the last minute still wins.
    pub fn evaluate(trade: &TradeRecommendation, price: f64, minutes_elapsed: i64) -> Self {
        if trade.take_profit_hit(price) {
            Decision::Win {
                minutes_to_win: minutes_elapsed,
            }
        } else if minutes_elapsed >= OBSERVATION_WINDOW_MINUTES {
            Decision::Loss
        } else {
            Decision::Pending
        }
    }

    pub fn outcome(&self) -> Option<FinalOutcome> {
        match self {
            Decision::Win { .. } => Some(FinalOutcome::Win),
            Decision::Loss => Some(FinalOutcome::Loss),
            Decision::Pending => None,
        }
    }
}

/// Terminal resolution of one recommendation. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub recommendation_id: String,
    pub final_outcome: FinalOutcome,
    /// Populated only for WIN.
    pub minutes_to_win: Option<i64>,
    /// LONG trades only: price observed at decision time.
    pub highest_price_reached: Option<f64>,
    /// SHORT trades only: price observed at decision time.
    pub lowest_price_reached: Option<f64>,
    pub resolved_at: DateTime<Utc>,
}

impl TradeOutcome {
    /// Build the outcome record for a terminal decision.
    /// Returns `None` for [`Decision::Pending`].
    pub fn from_decision(
        trade: &TradeRecommendation,
        decision: Decision,
        price: f64,
        resolved_at: DateTime<Utc>,
    ) -> Option<Self> {
        let final_outcome = decision.outcome()?;
        let minutes_to_win = match decision {
            Decision::Win { minutes_to_win } => Some(minutes_to_win),
            _ => None,
        };
        let (highest_price_reached, lowest_price_reached) = match trade.direction {
            Direction::Long => (Some(price), None),
            Direction::Short => (None, Some(price)),
        };

        Some(TradeOutcome {
            recommendation_id: trade.id.clone(),
            final_outcome,
            minutes_to_win,
            highest_price_reached,
            lowest_price_reached,
            resolved_at,
        })
    }
}

impl fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.recommendation_id, self.final_outcome)?;
        if let Some(m) = self.minutes_to_win {
            write!(f, " after {m}m")?;
        }
        Ok(())
    }
}

/// What happened when an outcome was committed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    /// New outcome row written and status flipped.
    Recorded,
    /// An outcome already existed (overlapping pass or earlier partial
    /// commit). Nothing new was written.
    AlreadyResolved,
}

// ---------------------------------------------------------------------------
// Pass summary
// ---------------------------------------------------------------------------

/// Summary of one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassSummary {
    /// Trades that reached a newly recorded terminal decision.
    pub evaluated: usize,
    pub total_candidates: usize,
    pub wins: usize,
    pub losses: usize,
    pub still_pending: usize,
    pub price_unavailable: usize,
    pub already_resolved: usize,
    pub failed: usize,
    /// Pass skipped because the market session was closed.
    pub market_closed: bool,
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.market_closed {
            return write!(f, "Skipped (market closed)");
        }
        write!(
            f,
            "Evaluated {}/{} (win={} loss={} pending={} no_price={} dup={} failed={})",
            self.evaluated,
            self.total_candidates,
            self.wins,
            self.losses,
            self.still_pending,
            self.price_unavailable,
            self.already_resolved,
            self.failed,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors surfaced by the evaluator.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    /// The candidate set could not be loaded. Fails the whole pass.
    #[error("Failed to load candidate trades: {0}")]
    CandidateLoad(String),

    /// Writing one trade's outcome failed. Contained to that candidate.
    #[error("Failed to commit outcome for trade {trade_id}: {message}")]
    Commit { trade_id: String, message: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
