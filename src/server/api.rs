use crate::constants::DEFAULT_COINS_LIMIT;
use crate::models::{PairResult, SnapshotRow};
use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

/// Query parameters for /api/coins
#[derive(Debug, Deserialize)]
pub struct CoinsQuery {
    /// Result-size limit applied after the cached snapshot is read
    pub limit: Option<usize>,

    /// Bypass the TTL and force a refresh
    #[serde(default)]
    pub force: bool,
}

/// Query parameters for /api/compare
#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    pub coin1: String,
    pub coin2: String,

    /// Response format: json (default) or rows (flattened for the BI tool)
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "json".to_string()
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// GET /api/coins - Current market snapshot, market-cap descending
#[instrument(skip(app_state))]
pub async fn get_coins_handler(
    State(app_state): State<AppState>,
    Query(params): Query<CoinsQuery>,
) -> Response {
    match app_state.market.get_snapshot(params.force).await {
        Ok(snapshot) => {
            let limit = params.limit.unwrap_or(DEFAULT_COINS_LIMIT);
            let rows: Vec<SnapshotRow> = snapshot.rows.iter().take(limit).cloned().collect();
            debug!(returned = rows.len(), total = snapshot.rows.len(), "returning market snapshot");
            Json(rows).into_response()
        }
        // Only reachable on a cold start with the upstream fully down.
        Err(e) => {
            warn!(error = %e, "market snapshot unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorBody {
                    error: format!("market data unavailable: {}", e),
                }),
            )
                .into_response()
        }
    }
}

/// GET /api/compare - Aligned two-coin comparison
///
/// Examples:
/// - /api/compare?coin1=bitcoin&coin2=ethereum
/// - /api/compare?coin1=bitcoin&coin2=ethereum&format=rows
#[instrument(skip(app_state))]
pub async fn compare_handler(
    State(app_state): State<AppState>,
    Query(params): Query<CompareQuery>,
) -> Response {
    let result = app_state
        .compare
        .get_comparison(&params.coin1, &params.coin2)
        .await;

    if params.format == "rows" {
        Json(flatten_rows(&result)).into_response()
    } else {
        Json(result).into_response()
    }
}

/// GET /api/coin/{id}/history - Single-coin daily series
#[instrument(skip(app_state))]
pub async fn coin_history_handler(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match app_state.compare.ensure_preloaded(&id).await {
        Some(entry) => Json(json!({
            "name": entry.name,
            "prices": entry.prices,
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: format!("no data available for {}", id),
            }),
        )
            .into_response(),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    cache_ready: bool,
    cache_age_seconds: u64,
    pair_cache_entries: usize,
    preload_entries: usize,
    reconcile_queue_depth: usize,
    reconcile_iterations: u64,
    uptime_secs: u64,
}

/// GET /health - Read-only introspection, no side effects
#[instrument(skip(app_state))]
pub async fn health_handler(State(app_state): State<AppState>) -> Json<HealthResponse> {
    let cache_age = app_state.market.cache_age_seconds().await;
    let stats = app_state.health_stats.read().await.clone();

    Json(HealthResponse {
        cache_ready: cache_age.is_some(),
        cache_age_seconds: cache_age.unwrap_or(0),
        pair_cache_entries: app_state.compare.pair_entry_count().await,
        preload_entries: app_state.compare.preload_entry_count().await,
        reconcile_queue_depth: app_state.queue.len().await,
        reconcile_iterations: stats.reconcile_iterations,
        uptime_secs: app_state.started_at.elapsed().as_secs(),
    })
}

/// Flatten a comparison into per-timestamp records for the reporting tool:
/// `{"time": "2024-01-01", "bitcoin": 42000.0, "ethereum": 2200.0}`.
/// Timestamps missing from a series simply omit that coin's column.
fn flatten_rows(result: &PairResult) -> Vec<Value> {
    let mut rows: BTreeMap<i64, Map<String, Value>> = BTreeMap::new();

    for series in &result.data {
        for point in &series.prices {
            rows.entry(point.timestamp)
                .or_default()
                .insert(series.name.clone(), json!(point.price));
        }
    }

    rows.into_iter()
        .map(|(timestamp, mut columns)| {
            let time = DateTime::from_timestamp_millis(timestamp)
                .map(|dt| dt.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| timestamp.to_string());
            columns.insert("time".to_string(), json!(time));
            Value::Object(columns)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NamedSeries, PricePoint};

    fn point(timestamp: i64, price: f64) -> PricePoint {
        PricePoint { timestamp, price }
    }

    #[test]
    fn test_flatten_rows_merges_aligned_series() {
        let result = PairResult {
            coin1: "bitcoin".into(),
            coin2: "ethereum".into(),
            data: vec![
                NamedSeries {
                    name: "bitcoin".into(),
                    prices: vec![point(1704067200000, 42000.0), point(1704153600000, 43000.0)],
                },
                NamedSeries {
                    name: "ethereum".into(),
                    prices: vec![point(1704067200000, 2200.0), point(1704153600000, 2300.0)],
                },
            ],
            warning: None,
        };

        let rows = flatten_rows(&result);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["time"], "2024-01-01");
        assert_eq!(rows[0]["bitcoin"], 42000.0);
        assert_eq!(rows[0]["ethereum"], 2200.0);
        assert_eq!(rows[1]["time"], "2024-01-02");
    }

    #[test]
    fn test_flatten_rows_handles_partial_results() {
        let result = PairResult {
            coin1: "bitcoin".into(),
            coin2: "ethereum".into(),
            data: vec![NamedSeries {
                name: "bitcoin".into(),
                prices: vec![point(1704067200000, 42000.0)],
            }],
            warning: Some("no data available for ethereum".into()),
        };

        let rows = flatten_rows(&result);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["bitcoin"], 42000.0);
        assert!(rows[0].get("ethereum").is_none());
    }

    #[test]
    fn test_flatten_rows_empty_placeholder() {
        let placeholder = PairResult::placeholder("bitcoin", "ethereum", "pending".into());
        assert!(flatten_rows(&placeholder).is_empty());
    }
}
