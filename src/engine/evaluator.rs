//! Outcome evaluator.
//!
//! One pass = load PENDING trades inside the observation window, price each
//! one, apply the decision rule, and commit WIN/LOSS outcomes. Candidates are
//! independent and evaluated with bounded concurrency. A failure on one
//! candidate is logged and counted; only failing to load the candidate set
//! fails the pass. With a market session attached, passes outside regular
//! trading hours are skipped before touching the store.

use chrono::{DateTime, Duration, Utc};
use futures::{stream, FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::session::MarketSession;
use crate::config::EvaluatorConfig;
use crate::prices::PriceOracle;
use crate::storage::TradeStore;
use crate::types::{
    CommitStatus, Decision, EvaluationError, FinalOutcome, PassSummary, TradeOutcome,
    TradeRecommendation, OBSERVATION_WINDOW_MINUTES,
};

/// What happened to a single candidate during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateResult {
    Recorded(FinalOutcome),
    AlreadyResolved,
    StillPending,
    PriceUnavailable,
    Failed,
}

pub struct OutcomeEvaluator {
    store: Arc<dyn TradeStore>,
    oracle: Arc<dyn PriceOracle>,
    config: EvaluatorConfig,
    session: Option<MarketSession>,
}

impl OutcomeEvaluator {
    pub fn new(
        store: Arc<dyn TradeStore>,
        oracle: Arc<dyn PriceOracle>,
        config: EvaluatorConfig,
    ) -> Self {
        Self {
            store,
            oracle,
            config,
            session: None,
        }
    }

    /// Only run passes while `session` is open.
    pub fn with_market_session(mut self, session: MarketSession) -> Self {
        self.session = Some(session);
        self
    }

    /// Oldest creation time still eligible for evaluation at `now`.
    pub fn candidate_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::minutes(OBSERVATION_WINDOW_MINUTES + self.config.selection_grace_minutes)
    }

    /// Run one evaluation pass as of `now`.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> Result<PassSummary, EvaluationError> {
        if self.session.is_some_and(|s| !s.is_open(now)) {
            info!(now = %now, "Market closed, skipping evaluation pass");
            return Ok(PassSummary {
                market_closed: true,
                ..PassSummary::default()
            });
        }

        let cutoff = self.candidate_cutoff(now);
        let candidates = self
            .store
            .pending_since(cutoff)
            .await
            .map_err(|e| EvaluationError::CandidateLoad(format!("{e:#}")))?;

        let mut summary = PassSummary {
            total_candidates: candidates.len(),
            ..PassSummary::default()
        };

        if candidates.is_empty() {
            info!(cutoff = %cutoff, "No pending trades to evaluate");
            return Ok(summary);
        }

        info!(
            candidates = candidates.len(),
            oracle = self.oracle.name(),
            concurrency = self.config.max_concurrency,
            "Starting evaluation pass"
        );

        let results: Vec<CandidateResult> = stream::iter(candidates)
            .map(|trade| self.evaluate_guarded(trade, now))
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        for result in results {
            match result {
                CandidateResult::Recorded(FinalOutcome::Win) => {
                    summary.evaluated += 1;
                    summary.wins += 1;
                }
                CandidateResult::Recorded(FinalOutcome::Loss) => {
                    summary.evaluated += 1;
                    summary.losses += 1;
                }
                CandidateResult::AlreadyResolved => summary.already_resolved += 1,
                CandidateResult::StillPending => summary.still_pending += 1,
                CandidateResult::PriceUnavailable => summary.price_unavailable += 1,
                CandidateResult::Failed => summary.failed += 1,
            }
        }

        info!(
            evaluated = summary.evaluated,
            total = summary.total_candidates,
            wins = summary.wins,
            losses = summary.losses,
            still_pending = summary.still_pending,
            price_unavailable = summary.price_unavailable,
            already_resolved = summary.already_resolved,
            failed = summary.failed,
            "Evaluation pass complete"
        );

        Ok(summary)
    }

    /// Evaluate one candidate, containing both errors and panics.
    async fn evaluate_guarded(&self, trade: TradeRecommendation, now: DateTime<Utc>) -> CandidateResult {
        let trade_id = trade.id.clone();
        match AssertUnwindSafe(self.evaluate_candidate(&trade, now))
            .catch_unwind()
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(trade_id = %trade_id, error = %e, "Candidate evaluation failed");
                CandidateResult::Failed
            }
            Err(_) => {
                error!(trade_id = %trade_id, "Candidate evaluation panicked");
                CandidateResult::Failed
            }
        }
    }

    async fn evaluate_candidate(
        &self,
        trade: &TradeRecommendation,
        now: DateTime<Utc>,
    ) -> Result<CandidateResult, EvaluationError> {
        let Some(price) = self.oracle.fetch_price(&trade.symbol).await else {
            debug!(trade_id = %trade.id, symbol = %trade.symbol, "No price, retry next pass");
            return Ok(CandidateResult::PriceUnavailable);
        };

        let minutes_elapsed = trade.minutes_elapsed(now);
        let decision = Decision::evaluate(trade, price, minutes_elapsed);

        let Some(outcome) = TradeOutcome::from_decision(trade, decision, price, now) else {
            debug!(trade = %trade, price, minutes_elapsed, "Still pending");
            return Ok(CandidateResult::StillPending);
        };

        let status = self
            .store
            .commit_outcome(&outcome)
            .await
            .map_err(|e| EvaluationError::Commit {
                trade_id: trade.id.clone(),
                message: format!("{e:#}"),
            })?;

        match status {
            CommitStatus::Recorded => {
                info!(
                    trade = %trade,
                    outcome = %outcome,
                    price,
                    minutes_elapsed,
                    "Outcome recorded"
                );
                Ok(CandidateResult::Recorded(outcome.final_outcome))
            }
            CommitStatus::AlreadyResolved => {
                warn!(trade_id = %trade.id, "Outcome already existed, left unchanged");
                Ok(CandidateResult::AlreadyResolved)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
