use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Per-coin current-state record from the market list endpoint.
///
/// Everything except `id` is nullable: the upstream omits fields for thinly
/// traded assets and a single malformed row must never fail the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub id: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub total_volume: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_24h: Option<f64>,
}

/// Full-market snapshot, in the upstream's market-cap-descending order.
/// Exactly one live instance process-wide; replaced wholesale by a refresh.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub rows: Vec<SnapshotRow>,
    /// Wall-clock refresh time, for reporting
    pub refreshed_at: DateTime<Utc>,
    /// Monotonic refresh time, drives the TTL
    pub fetched_at: Instant,
}

impl Snapshot {
    pub fn new(rows: Vec<SnapshotRow>) -> Self {
        Self {
            rows,
            refreshed_at: Utc::now(),
            fetched_at: Instant::now(),
        }
    }

    pub fn age(&self) -> std::time::Duration {
        self.fetched_at.elapsed()
    }
}
