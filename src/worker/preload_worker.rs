use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

use crate::constants::{PRELOAD_COINS, PRELOAD_SWEEP_INTERVAL_SECS};
use crate::services::{CompareCache, HealthStats, SharedHealthStats};

/// Keep the single-coin preload set fresh. The first sweep runs at startup,
/// so a restarted process converges without waiting for request traffic.
#[instrument(skip(compare, health_stats))]
pub async fn run(compare: Arc<CompareCache>, health_stats: SharedHealthStats) {
    info!(
        coins = PRELOAD_COINS.len(),
        interval_secs = PRELOAD_SWEEP_INTERVAL_SECS,
        "Starting preload worker"
    );

    loop {
        let mut refreshed = 0usize;
        for coin in PRELOAD_COINS {
            // An on-demand fetch may have renewed the entry since last sweep.
            if let Some(age) = compare.preload_age(coin).await {
                if age < Duration::from_secs(PRELOAD_SWEEP_INTERVAL_SECS / 2) {
                    continue;
                }
            }
            match compare.refresh_preload(coin).await {
                Ok(points) => {
                    info!(coin = %coin, points, "Preload worker: series refreshed");
                    refreshed += 1;
                }
                Err(e) => {
                    warn!(coin = %coin, error = %e, "Preload worker: refresh failed");
                }
            }
        }

        info!(
            refreshed,
            total = PRELOAD_COINS.len(),
            "Preload worker: sweep completed"
        );

        {
            let mut health = health_stats.write().await;
            health.preload_last_sweep = HealthStats::stamp();
        }

        sleep(Duration::from_secs(PRELOAD_SWEEP_INTERVAL_SECS)).await;
    }
}
