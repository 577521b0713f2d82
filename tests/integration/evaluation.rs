//! End-to-end evaluation passes.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use outcome_tracker::config::{AppConfig, EvaluatorConfig, StorageConfig};
use outcome_tracker::engine::{MarketSession, OutcomeEvaluator};
use outcome_tracker::storage::sqlite::SqliteTradeStore;
use outcome_tracker::storage::TradeStore;
use outcome_tracker::types::*;

use crate::mock_store::{recommendation, Fault, FixedPriceOracle, MemoryTradeStore};

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-10-19T15:30:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn with_grace(minutes: i64) -> EvaluatorConfig {
    EvaluatorConfig {
        selection_grace_minutes: minutes,
        ..EvaluatorConfig::default()
    }
}

// ---------------------------------------------------------------------------
// SQLite store
// ---------------------------------------------------------------------------

async fn sqlite_with(trades: &[TradeRecommendation]) -> Arc<SqliteTradeStore> {
    let store = SqliteTradeStore::in_memory().await.unwrap();
    for trade in trades {
        store.insert_recommendation(trade).await.unwrap();
    }
    Arc::new(store)
}

#[tokio::test]
async fn test_long_win_is_persisted() {
    let store = sqlite_with(&[recommendation("w1", "TSLA", Direction::Long, 110.0, now(), 10)]).await;
    let oracle = Arc::new(FixedPriceOracle::new(&[("TSLA", 112.0)]));
    let evaluator = OutcomeEvaluator::new(store.clone(), oracle, EvaluatorConfig::default());

    let summary = evaluator.run_pass(now()).await.unwrap();
    assert_eq!(summary.evaluated, 1);
    assert_eq!(summary.total_candidates, 1);

    let outcome = store.get_outcome("w1").await.unwrap().unwrap();
    assert_eq!(outcome.final_outcome, FinalOutcome::Win);
    assert_eq!(outcome.minutes_to_win, Some(10));
    assert_eq!(outcome.highest_price_reached, Some(112.0));
    assert_eq!(outcome.lowest_price_reached, None);
    assert_eq!(outcome.resolved_at, now());

    let trade = store.get_recommendation("w1").await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Completed);
}

#[tokio::test]
async fn test_expired_short_is_loss() {
    let store = sqlite_with(&[recommendation("l1", "QQQ", Direction::Short, 90.0, now(), 50)]).await;
    let oracle = Arc::new(FixedPriceOracle::new(&[("QQQ", 95.0)]));
    let evaluator = OutcomeEvaluator::new(store.clone(), oracle, EvaluatorConfig::default());

    let summary = evaluator.run_pass(now()).await.unwrap();
    assert_eq!(summary.evaluated, 1);
    assert_eq!(summary.losses, 1);

    let outcome = store.get_outcome("l1").await.unwrap().unwrap();
    assert_eq!(outcome.final_outcome, FinalOutcome::Loss);
    assert_eq!(outcome.minutes_to_win, None);
    assert_eq!(outcome.lowest_price_reached, Some(95.0));
    assert_eq!(outcome.highest_price_reached, None);
}

#[tokio::test]
async fn test_untouched_trade_expires_on_regular_cadence() {
    let cfg = AppConfig::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml")).unwrap();
    // Monday 10:00 EDT, well inside the session for the next two hours.
    let t0 = DateTime::parse_from_rfc3339("2026-10-19T14:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let store = sqlite_with(&[recommendation("slow", "QQQ", Direction::Short, 90.0, t0, 0)]).await;
    let oracle = Arc::new(FixedPriceOracle::new(&[("QQQ", 95.0)]));
    let evaluator = OutcomeEvaluator::new(store.clone(), oracle, cfg.evaluator.clone())
        .with_market_session(MarketSession::from_config(&cfg.market_hours).unwrap());

    // A cadence that never lines up with the 45-minute mark.
    let mut losses = 0;
    let mut at = t0 + Duration::seconds(11);
    while at < t0 + Duration::hours(2) {
        losses += evaluator.run_pass(at).await.unwrap().losses;
        at += Duration::seconds(37);
    }

    assert_eq!(losses, 1);
    let outcome = store.get_outcome("slow").await.unwrap().unwrap();
    assert_eq!(outcome.final_outcome, FinalOutcome::Loss);
    assert_eq!(outcome.lowest_price_reached, Some(95.0));
    let age = outcome.resolved_at - t0;
    assert!(age >= Duration::minutes(45));
    assert!(age < Duration::minutes(45) + Duration::seconds(37));

    let trade = store.get_recommendation("slow").await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Completed);
}

#[tokio::test]
async fn test_trade_past_grace_not_selected() {
    let store = sqlite_with(&[recommendation("old", "QQQ", Direction::Short, 90.0, now(), 61)]).await;
    let oracle = Arc::new(FixedPriceOracle::new(&[("QQQ", 95.0)]));
    let evaluator = OutcomeEvaluator::new(store.clone(), oracle.clone(), EvaluatorConfig::default());

    let summary = evaluator.run_pass(now()).await.unwrap();
    assert_eq!(summary, PassSummary::default());
    assert_eq!(oracle.calls(), 0);
    assert!(store.get_outcome("old").await.unwrap().is_none());
}

#[tokio::test]
async fn test_in_window_without_target_stays_pending() {
    let store = sqlite_with(&[recommendation("p1", "AMD", Direction::Long, 110.0, now(), 20)]).await;
    let oracle = Arc::new(FixedPriceOracle::new(&[("AMD", 105.0)]));
    let evaluator = OutcomeEvaluator::new(store.clone(), oracle, EvaluatorConfig::default());

    let summary = evaluator.run_pass(now()).await.unwrap();
    assert_eq!(summary.evaluated, 0);
    assert_eq!(summary.total_candidates, 1);
    assert_eq!(summary.still_pending, 1);
    assert_eq!(store.count_outcomes("p1").await.unwrap(), 0);

    let trade = store.get_recommendation("p1").await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Pending);
}

#[tokio::test]
async fn test_second_pass_is_noop() {
    let store = sqlite_with(&[recommendation("w1", "TSLA", Direction::Long, 110.0, now(), 10)]).await;
    let oracle = Arc::new(FixedPriceOracle::new(&[("TSLA", 112.0)]));
    let evaluator = OutcomeEvaluator::new(store.clone(), oracle.clone(), EvaluatorConfig::default());

    let first = evaluator.run_pass(now()).await.unwrap();
    let second = evaluator
        .run_pass(now() + Duration::minutes(1))
        .await
        .unwrap();

    assert_eq!(first.evaluated, 1);
    assert_eq!(second.total_candidates, 0);
    assert_eq!(second.evaluated, 0);
    assert_eq!(oracle.calls(), 1);
    assert_eq!(store.count_outcomes("w1").await.unwrap(), 1);
}

#[tokio::test]
async fn test_price_outage_then_recovery() {
    let store = sqlite_with(&[recommendation("o1", "IWM", Direction::Long, 110.0, now(), 10)]).await;
    let oracle = Arc::new(FixedPriceOracle::new(&[]));
    let evaluator = OutcomeEvaluator::new(store.clone(), oracle.clone(), EvaluatorConfig::default());

    let summary = evaluator.run_pass(now()).await.unwrap();
    assert_eq!(summary.price_unavailable, 1);
    assert_eq!(summary.evaluated, 0);
    let trade = store.get_recommendation("o1").await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Pending);

    oracle.set("IWM", 111.0);
    let later = now() + Duration::minutes(5);
    let summary = evaluator.run_pass(later).await.unwrap();
    assert_eq!(summary.evaluated, 1);

    let outcome = store.get_outcome("o1").await.unwrap().unwrap();
    assert_eq!(outcome.final_outcome, FinalOutcome::Win);
    assert_eq!(outcome.minutes_to_win, Some(15));
}

#[tokio::test]
async fn test_overlapping_passes_record_once() {
    let trades: Vec<_> = (0..6)
        .map(|i| recommendation(&format!("c{i}"), "TSLA", Direction::Long, 110.0, now(), 5 + i))
        .collect();
    let store = sqlite_with(&trades).await;
    let oracle = Arc::new(FixedPriceOracle::new(&[("TSLA", 120.0)]));
    let a = OutcomeEvaluator::new(store.clone(), oracle.clone(), EvaluatorConfig::default());
    let b = OutcomeEvaluator::new(store.clone(), oracle, EvaluatorConfig::default());

    let (first, second) = tokio::join!(a.run_pass(now()), b.run_pass(now()));
    let (first, second) = (first.unwrap(), second.unwrap());

    // Each trade is counted as evaluated by exactly one pass.
    assert_eq!(first.evaluated + second.evaluated, 6);
    for trade in &trades {
        assert_eq!(store.count_outcomes(&trade.id).await.unwrap(), 1);
        let loaded = store.get_recommendation(&trade.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TradeStatus::Completed);
    }
}

#[tokio::test]
async fn test_closed_market_leaves_trades_pending() {
    // Saturday 11:00 EDT
    let saturday = DateTime::parse_from_rfc3339("2026-10-17T15:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let store =
        sqlite_with(&[recommendation("wk", "QQQ", Direction::Short, 90.0, saturday, 50)]).await;
    let oracle = Arc::new(FixedPriceOracle::new(&[("QQQ", 95.0)]));
    let session = MarketSession::from_config(&AppConfig::default().market_hours).unwrap();
    let evaluator = OutcomeEvaluator::new(store.clone(), oracle.clone(), EvaluatorConfig::default())
        .with_market_session(session);

    let summary = evaluator.run_pass(saturday).await.unwrap();
    assert!(summary.market_closed);
    assert_eq!(oracle.calls(), 0);
    assert!(store.get_outcome("wk").await.unwrap().is_none());
    let trade = store.get_recommendation("wk").await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Pending);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_passes_on_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        database_url: format!("sqlite://{}", dir.path().join("outcomes.db").display()),
        busy_timeout_secs: 10,
    };
    let store = Arc::new(SqliteTradeStore::connect(&config).await.unwrap());
    let trades: Vec<_> = (0..24)
        .map(|i| {
            let direction = if i % 2 == 0 { Direction::Long } else { Direction::Short };
            let tp1 = if i % 2 == 0 { 110.0 } else { 90.0 };
            recommendation(&format!("f{i}"), &format!("S{i}"), direction, tp1, now(), 5 + 2 * i)
        })
        .collect();
    for trade in &trades {
        store.insert_recommendation(trade).await.unwrap();
    }
    // Even LONGs win. Odd SHORTs never reach 90, so those aged 45m or more
    // (ages run 5..=51) expire and the rest stay pending.
    let quotes: Vec<(String, f64)> = (0..24)
        .map(|i| (format!("S{i}"), if i % 2 == 0 { 120.0 } else { 95.0 }))
        .collect();
    let quote_refs: Vec<(&str, f64)> = quotes.iter().map(|(s, p)| (s.as_str(), *p)).collect();
    let oracle = Arc::new(FixedPriceOracle::new(&quote_refs));

    let passes: Vec<_> = (0..3)
        .map(|_| {
            let evaluator =
                OutcomeEvaluator::new(store.clone(), oracle.clone(), EvaluatorConfig::default());
            tokio::spawn(async move { evaluator.run_pass(now()).await })
        })
        .collect();
    let mut recorded = 0;
    for pass in futures::future::join_all(passes).await {
        let summary = pass.unwrap().unwrap();
        assert_eq!(summary.failed, 0);
        recorded += summary.evaluated;
    }

    let expected: Vec<_> = trades
        .iter()
        .filter(|t| t.direction == Direction::Long || t.minutes_elapsed(now()) >= 45)
        .collect();
    assert_eq!(recorded, expected.len());
    for trade in &trades {
        let loaded = store.get_recommendation(&trade.id).await.unwrap().unwrap();
        if expected.iter().any(|t| t.id == trade.id) {
            assert_eq!(store.count_outcomes(&trade.id).await.unwrap(), 1, "{}", trade.id);
            assert_eq!(loaded.status, TradeStatus::Completed);
        } else {
            assert_eq!(store.count_outcomes(&trade.id).await.unwrap(), 0);
            assert_eq!(loaded.status, TradeStatus::Pending);
        }
    }
}

#[tokio::test]
async fn test_mixed_batch_against_sqlite() {
    let store = sqlite_with(&[
        recommendation("a", "TSLA", Direction::Long, 110.0, now(), 10),
        recommendation("b", "QQQ", Direction::Short, 90.0, now(), 47),
        recommendation("c", "AMD", Direction::Long, 110.0, now(), 20),
        recommendation("d", "SPY", Direction::Short, 90.0, now(), 30),
    ])
    .await;
    let oracle = Arc::new(FixedPriceOracle::new(&[
        ("TSLA", 110.0),
        ("QQQ", 95.0),
        ("AMD", 100.0),
        ("SPY", 89.5),
    ]));
    let evaluator = OutcomeEvaluator::new(store.clone(), oracle, with_grace(5));

    let summary = evaluator.run_pass(now()).await.unwrap();
    assert_eq!(summary.total_candidates, 4);
    assert_eq!(summary.evaluated, 3);
    assert_eq!(summary.wins, 2);
    assert_eq!(summary.losses, 1);
    assert_eq!(summary.still_pending, 1);

    let spy = store.get_outcome("d").await.unwrap().unwrap();
    assert_eq!(spy.final_outcome, FinalOutcome::Win);
    assert_eq!(spy.minutes_to_win, Some(30));
    assert_eq!(spy.lowest_price_reached, Some(89.5));
    assert!(store.get_outcome("c").await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Memory store: default (outcome-first) commit path and fault injection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_memory_store_default_commit() {
    let store = Arc::new(MemoryTradeStore::with_trades(vec![recommendation(
        "m1", "TSLA", Direction::Long, 110.0, now(), 10,
    )]));
    let oracle = Arc::new(FixedPriceOracle::new(&[("TSLA", 115.0)]));
    let evaluator = OutcomeEvaluator::new(store.clone(), oracle, EvaluatorConfig::default());

    let summary = evaluator.run_pass(now()).await.unwrap();
    assert_eq!(summary.evaluated, 1);
    assert_eq!(store.outcomes_for("m1").len(), 1);
    assert_eq!(store.status_of("m1"), Some(TradeStatus::Completed));
}

#[tokio::test]
async fn test_status_flip_failure_is_repaired_next_pass() {
    let store = Arc::new(MemoryTradeStore::with_trades(vec![recommendation(
        "m1", "TSLA", Direction::Long, 110.0, now(), 10,
    )]));
    let oracle = Arc::new(FixedPriceOracle::new(&[("TSLA", 115.0)]));
    let evaluator = OutcomeEvaluator::new(store.clone(), oracle, EvaluatorConfig::default());

    store.fail(Fault::MarkCompleted, Some("m1"));
    let summary = evaluator.run_pass(now()).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.evaluated, 0);
    // Outcome landed, status did not.
    assert_eq!(store.outcomes_for("m1").len(), 1);
    assert_eq!(store.status_of("m1"), Some(TradeStatus::Pending));

    store.clear_faults();
    let summary = evaluator
        .run_pass(now() + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(summary.already_resolved, 1);
    assert_eq!(summary.evaluated, 0);
    assert_eq!(store.outcomes_for("m1").len(), 1);
    assert_eq!(store.status_of("m1"), Some(TradeStatus::Completed));
}

#[tokio::test]
async fn test_existing_outcome_is_never_overwritten() {
    let store = Arc::new(MemoryTradeStore::with_trades(vec![recommendation(
        "m1", "QQQ", Direction::Short, 90.0, now(), 10,
    )]));
    store.seed_outcome(TradeOutcome {
        recommendation_id: "m1".to_string(),
        final_outcome: FinalOutcome::Loss,
        minutes_to_win: None,
        highest_price_reached: None,
        lowest_price_reached: Some(96.0),
        resolved_at: now() - Duration::minutes(1),
    });
    let oracle = Arc::new(FixedPriceOracle::new(&[("QQQ", 85.0)]));
    let evaluator = OutcomeEvaluator::new(store.clone(), oracle, EvaluatorConfig::default());

    let summary = evaluator.run_pass(now()).await.unwrap();
    assert_eq!(summary.already_resolved, 1);

    let outcomes = store.outcomes_for("m1");
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].final_outcome, FinalOutcome::Loss);
    assert_eq!(outcomes[0].lowest_price_reached, Some(96.0));
}

#[tokio::test]
async fn test_one_failing_insert_does_not_block_others() {
    let store = Arc::new(MemoryTradeStore::with_trades(vec![
        recommendation("bad", "TSLA", Direction::Long, 110.0, now(), 10),
        recommendation("good", "AMD", Direction::Long, 110.0, now(), 12),
    ]));
    store.fail(Fault::InsertOutcome, Some("bad"));
    let oracle = Arc::new(FixedPriceOracle::new(&[("TSLA", 120.0), ("AMD", 120.0)]));
    let evaluator = OutcomeEvaluator::new(store.clone(), oracle, EvaluatorConfig::default());

    let summary = evaluator.run_pass(now()).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.evaluated, 1);
    assert!(store.outcomes_for("bad").is_empty());
    assert_eq!(store.status_of("bad"), Some(TradeStatus::Pending));
    assert_eq!(store.status_of("good"), Some(TradeStatus::Completed));
}

#[tokio::test]
async fn test_query_failure_fails_pass_without_writes() {
    let store = Arc::new(MemoryTradeStore::with_trades(vec![recommendation(
        "m1", "TSLA", Direction::Long, 110.0, now(), 10,
    )]));
    store.fail(Fault::Query, None);
    let oracle = Arc::new(FixedPriceOracle::new(&[("TSLA", 120.0)]));
    let evaluator = OutcomeEvaluator::new(store.clone(), oracle.clone(), EvaluatorConfig::default());

    let err = evaluator.run_pass(now()).await.unwrap_err();
    assert!(matches!(err, EvaluationError::CandidateLoad(_)));
    assert_eq!(oracle.calls(), 0);
    assert!(store.outcomes_for("m1").is_empty());
    assert!(store.pending_since(now() - Duration::hours(1)).await.is_err());
}
