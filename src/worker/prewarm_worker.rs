use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, instrument};

use crate::constants::{PREWARM_INTERVAL_SECS, PREWARM_PAIRS};
use crate::services::{CompareCache, HealthStats, ReconcileQueue, ReconcileTask, SharedHealthStats};

/// Feed the reconciliation queue with the configured pair set whenever its
/// cache entries are missing or expired. The drain worker does the actual
/// fetching at its own bounded pace.
#[instrument(skip(compare, queue, health_stats))]
pub async fn run(
    compare: Arc<CompareCache>,
    queue: Arc<ReconcileQueue>,
    health_stats: SharedHealthStats,
) {
    info!(
        pairs = PREWARM_PAIRS.len(),
        interval_secs = PREWARM_INTERVAL_SECS,
        "Starting prewarm worker"
    );

    loop {
        let mut queued = 0usize;
        for (coin1, coin2) in PREWARM_PAIRS {
            if !compare.pair_is_fresh(coin1, coin2).await {
                queue.push(ReconcileTask::new(coin1, coin2)).await;
                queued += 1;
            }
        }

        if queued > 0 {
            info!(queued, "Prewarm worker: pairs queued for reconciliation");
        }

        {
            let mut health = health_stats.write().await;
            health.prewarm_last_run = HealthStats::stamp();
        }

        sleep(Duration::from_secs(PREWARM_INTERVAL_SECS)).await;
    }
}
