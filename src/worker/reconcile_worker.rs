use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::constants::{RECONCILE_INTERVAL_SECS, RECONCILE_MAX_ATTEMPTS};
use crate::services::{CompareCache, HealthStats, ReconcileQueue, ReconcileTask, SharedHealthStats};

/// Drain the reconciliation queue, one task per tick. The bounded throughput
/// is intentional: a burst of failed pairs must not amplify upstream load.
#[instrument(skip(compare, queue, health_stats))]
pub async fn run(
    compare: Arc<CompareCache>,
    queue: Arc<ReconcileQueue>,
    health_stats: SharedHealthStats,
) {
    info!(
        interval_secs = RECONCILE_INTERVAL_SECS,
        max_attempts = RECONCILE_MAX_ATTEMPTS,
        "Starting reconcile worker"
    );

    let mut iteration_count = 0u64;

    loop {
        iteration_count += 1;

        if let Some(task) = queue.pop().await {
            match compare.reconcile_pair(&task).await {
                Ok(_) => {
                    info!(
                        coin1 = %task.coin1,
                        coin2 = %task.coin2,
                        attempts = task.attempts,
                        "Reconcile worker: pair recovered"
                    );
                }
                Err(e) => {
                    let attempts = task.attempts + 1;
                    if attempts >= RECONCILE_MAX_ATTEMPTS {
                        error!(
                            coin1 = %task.coin1,
                            coin2 = %task.coin2,
                            attempts,
                            error = %e,
                            "Reconcile worker: dropping task after attempt ceiling"
                        );
                    } else {
                        warn!(
                            coin1 = %task.coin1,
                            coin2 = %task.coin2,
                            attempts,
                            error = %e,
                            "Reconcile worker: retry failed, requeueing"
                        );
                        queue
                            .push(ReconcileTask {
                                attempts,
                                ..task.clone()
                            })
                            .await;
                    }
                }
            }
        }

        {
            let mut health = health_stats.write().await;
            health.reconcile_iterations = iteration_count;
            health.reconcile_last_run = HealthStats::stamp();
        }

        sleep(Duration::from_secs(RECONCILE_INTERVAL_SECS)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::transport::testing::MockTransport;
    use crate::services::transport::{FetchError, ThrottledTransport};
    use crate::services::CoinGeckoClient;
    use serde_json::json;
    use tokio::sync::RwLock;

    fn setup(mock: Arc<MockTransport>) -> (Arc<CompareCache>, Arc<ReconcileQueue>) {
        let client = Arc::new(CoinGeckoClient::new(
            ThrottledTransport::new(mock),
            "http://upstream/api/v3".to_string(),
        ));
        let queue = Arc::new(ReconcileQueue::new());
        (Arc::new(CompareCache::new(client, queue.clone())), queue)
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_drains_one_task_per_tick() {
        let mock = Arc::new(MockTransport::new());
        mock.set_default(Ok(json!({"prices": [[1, 1.0]]}))).await;
        let (compare, queue) = setup(mock);
        let health = Arc::new(RwLock::new(HealthStats::default()));

        queue.push(ReconcileTask::new("bitcoin", "ethereum")).await;
        queue.push(ReconcileTask::new("solana", "cardano")).await;

        let worker = tokio::spawn(run(compare.clone(), queue.clone(), health.clone()));

        // The first tick runs at startup; the transport spacing means one
        // reconcile takes a few seconds of (paused) clock.
        sleep(Duration::from_secs(5)).await;
        assert_eq!(queue.len().await, 1);

        sleep(Duration::from_secs(RECONCILE_INTERVAL_SECS + 10)).await;
        assert_eq!(queue.len().await, 0);
        assert!(compare.pair_is_fresh("bitcoin", "ethereum").await);
        assert!(compare.pair_is_fresh("solana", "cardano").await);

        worker.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_task_is_dropped() {
        let mock = Arc::new(MockTransport::new());
        mock.set_default(Err(FetchError::new(Some(500), "down"))).await;
        let (compare, queue) = setup(mock);
        let health = Arc::new(RwLock::new(HealthStats::default()));

        queue
            .push(ReconcileTask {
                coin1: "bitcoin".to_string(),
                coin2: "ethereum".to_string(),
                attempts: RECONCILE_MAX_ATTEMPTS - 1,
            })
            .await;

        let worker = tokio::spawn(run(compare, queue.clone(), health));

        sleep(Duration::from_secs(5)).await;
        assert_eq!(queue.len().await, 0);

        worker.abort();
    }
}
