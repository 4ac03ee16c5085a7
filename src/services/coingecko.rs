//! Upstream market-data client.
//!
//! Wraps the throttled transport with bounded exponential backoff for the
//! transient failure class (429 and connection errors), and a one-shot
//! maximum-range substitution for coins that lack a full year of history.

use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::constants::{
    MAX_FETCH_ATTEMPTS, RANGE_MAX, RANGE_ONE_YEAR, RETRY_BASE_DELAY_MS, RETRY_JITTER_MS,
    RETRY_MAX_DELAY_MS, SERIES_TIMEOUT_SECS, SNAPSHOT_PAGE_SIZE, SNAPSHOT_TIMEOUT_SECS,
};
use crate::models::{PricePoint, PriceSeries, SnapshotRow};
use crate::services::transport::{FetchError, ThrottledTransport};

pub struct CoinGeckoClient {
    transport: ThrottledTransport,
    base_url: String,
}

impl CoinGeckoClient {
    pub fn new(transport: ThrottledTransport, base_url: String) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch with bounded retries. Retries only the transient class: 429 or
    /// status-less (network/timeout) failures. Backoff grows linearly with the
    /// attempt number, capped, plus jitter to avoid synchronized retry storms.
    async fn fetch_with_retry(
        &self,
        url: &str,
        params: &[(String, String)],
        timeout: Duration,
    ) -> Result<Value, FetchError> {
        let mut attempt: u32 = 1;
        loop {
            match self.transport.fetch(url, params, timeout).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retriable() && attempt < MAX_FETCH_ATTEMPTS => {
                    let backoff =
                        (RETRY_BASE_DELAY_MS * attempt as u64).min(RETRY_MAX_DELAY_MS);
                    let jitter = (rand::random::<f64>() * RETRY_JITTER_MS as f64) as u64;
                    warn!(
                        attempt,
                        max_attempts = MAX_FETCH_ATTEMPTS,
                        status = ?e.status,
                        delay_ms = backoff + jitter,
                        "retriable upstream failure, backing off"
                    );
                    sleep(Duration::from_millis(backoff + jitter)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch the full market list: one page, 250 entries, market-cap
    /// descending. Rows that fail to deserialize are skipped, never fatal.
    pub async fn fetch_markets(&self) -> Result<Vec<SnapshotRow>, FetchError> {
        let url = format!("{}/coins/markets", self.base_url);
        let params = vec![
            ("vs_currency".to_string(), "usd".to_string()),
            ("order".to_string(), "market_cap_desc".to_string()),
            ("per_page".to_string(), SNAPSHOT_PAGE_SIZE.to_string()),
            ("page".to_string(), "1".to_string()),
            ("sparkline".to_string(), "false".to_string()),
        ];

        let body = self
            .fetch_with_retry(&url, &params, Duration::from_secs(SNAPSHOT_TIMEOUT_SECS))
            .await?;

        let rows = body
            .as_array()
            .ok_or_else(|| FetchError::new(None, "unexpected market list payload"))?;

        let parsed: Vec<SnapshotRow> = rows
            .iter()
            .filter_map(|row| match serde_json::from_value(row.clone()) {
                Ok(row) => Some(row),
                Err(e) => {
                    debug!(error = %e, "skipping malformed market row");
                    None
                }
            })
            .collect();

        info!(rows = parsed.len(), "fetched market list");
        Ok(parsed)
    }

    /// Fetch one year of daily prices for a coin.
    ///
    /// Young coins 404 on the one-year window; in that case a single
    /// substituted call with the maximum-available range is made, outside the
    /// retry ceiling. If the substitution also fails, the original failure
    /// propagates.
    pub async fn fetch_daily_series(&self, coin_id: &str) -> Result<PriceSeries, FetchError> {
        let url = format!("{}/coins/{}/market_chart", self.base_url, coin_id);
        let timeout = Duration::from_secs(SERIES_TIMEOUT_SECS);
        let params = Self::chart_params(RANGE_ONE_YEAR);

        match self.fetch_with_retry(&url, &params, timeout).await {
            Ok(body) => Ok(parse_price_series(&body)),
            Err(e) if e.is_not_found() => {
                info!(coin = %coin_id, "one-year range unavailable, trying maximum range");
                let fallback = Self::chart_params(RANGE_MAX);
                match self.transport.fetch(&url, &fallback, timeout).await {
                    Ok(body) => Ok(parse_price_series(&body)),
                    Err(fallback_err) => {
                        debug!(coin = %coin_id, error = %fallback_err, "maximum-range fallback failed");
                        Err(e)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    fn chart_params(days: &str) -> Vec<(String, String)> {
        vec![
            ("vs_currency".to_string(), "usd".to_string()),
            ("days".to_string(), days.to_string()),
            ("interval".to_string(), "daily".to_string()),
        ]
    }
}

/// Extract `(timestamp, price)` points from a market-chart payload.
/// Malformed entries (wrong arity, non-numeric, NaN) are silently dropped —
/// upstream data quality is outside this system's control.
fn parse_price_series(body: &Value) -> PriceSeries {
    let Some(entries) = body.get("prices").and_then(|p| p.as_array()) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let pair = entry.as_array()?;
            if pair.len() < 2 {
                return None;
            }
            let timestamp = pair[0].as_i64().or_else(|| pair[0].as_f64().map(|t| t as i64))?;
            let price = pair[1].as_f64().filter(|p| p.is_finite())?;
            Some(PricePoint { timestamp, price })
        })
        .collect()
}
