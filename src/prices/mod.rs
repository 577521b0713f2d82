//! Price oracle integrations.
//!
//! Defines the `PriceOracle` trait and provides the Yahoo Finance chart
//! implementation used in production.

pub mod yahoo;

use async_trait::async_trait;

/// Abstraction over live price sources.
///
/// A missing price is a normal outcome, not an error: implementors return
/// `None` when the upstream is unreachable, answers with a non-2xx status,
/// sends malformed data, or has no market price for the symbol. Callers
/// skip the trade and try again on the next pass.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Latest market price for `symbol`, or `None` if unavailable.
    /// One outbound request per call, no retries.
    async fn fetch_price(&self, symbol: &str) -> Option<f64>;

    /// Source name for logging.
    fn name(&self) -> &str;
}

/// Accept only prices the decision rule can use.
pub(crate) fn usable_price(price: f64) -> Option<f64> {
    (price.is_finite() && price > 0.0).then_some(price)
}
