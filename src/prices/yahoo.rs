//! Yahoo Finance chart API price source.
//!
//! Endpoint: `GET {base}/v8/finance/chart/{symbol}?range=1d&interval=1m`
//! No auth required. The latest price is `chart.result[0].meta.regularMarketPrice`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{usable_price, PriceOracle};
use crate::config::PriceOracleConfig;

const SOURCE_NAME: &str = "yahoo_finance";

// ---------------------------------------------------------------------------
// API response types (Yahoo JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    result: Option<Vec<ChartData>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: ChartMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    regular_market_price: Option<f64>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Price oracle backed by the Yahoo Finance v8 chart endpoint.
pub struct YahooPriceOracle {
    http: Client,
    base_url: String,
}

impl YahooPriceOracle {
    pub fn new(config: &PriceOracleConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .context("Failed to build HTTP client for Yahoo Finance")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn chart_url(&self, symbol: &str) -> String {
        format!(
            "{}/v8/finance/chart/{}?range=1d&interval=1m",
            self.base_url,
            urlencoding::encode(symbol),
        )
    }

    /// Request the chart payload and extract the market price.
    /// Every failure mode is an `Err` here; `fetch_price` folds them to `None`.
    async fn request_price(&self, symbol: &str) -> Result<f64> {
        let url = self.chart_url(symbol);
        debug!(url = %url, "Fetching quote");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Yahoo chart request failed")?;

        if !resp.status().is_success() {
            anyhow::bail!("Yahoo API returned {}", resp.status());
        }

        let data: ChartResponse = resp
            .json()
            .await
            .context("Failed to parse Yahoo chart response")?;

        Self::extract_price(data)
    }

    fn extract_price(data: ChartResponse) -> Result<f64> {
        if let Some(err) = data.chart.error {
            if !err.is_null() {
                anyhow::bail!("Yahoo error: {err}");
            }
        }

        let price = data
            .chart
            .result
            .unwrap_or_default()
            .into_iter()
            .next()
            .context("Empty chart results")?
            .meta
            .regular_market_price
            .context("No regularMarketPrice in chart meta")?;

        usable_price(price).with_context(|| format!("Unusable price {price}"))
    }
}

// ---------------------------------------------------------------------------
// PriceOracle trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl PriceOracle for YahooPriceOracle {
    async fn fetch_price(&self, symbol: &str) -> Option<f64> {
        match self.request_price(symbol).await {
            Ok(price) => {
                debug!(symbol, price, "Quote received");
                Some(price)
            }
            Err(e) => {
                warn!(symbol, error = %format!("{e:#}"), "Price unavailable");
                None
            }
        }
    }

    fn name(&self) -> &str {
        SOURCE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
