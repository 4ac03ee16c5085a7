//! Two-coin comparison engine.
//!
//! Pair results are cached for 60 seconds under an order-independent key,
//! with single-flight deduplication per key. The two series fetches of one
//! comparison are independent: one failing leg degrades the result instead
//! of aborting it, and a total failure degrades further to stale cache data
//! or an empty placeholder plus a queued reconciliation task. No failure
//! ever escapes to the caller.
//!
//! A parallel single-coin preload cache backs the per-coin history endpoint
//! and is kept fresh by the sweep worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::constants::{PAIR_PACING_MAX_MS, PAIR_PACING_MIN_MS, PAIR_TTL_SECS};
use crate::models::{NamedSeries, PairResult, PreloadEntry, PriceSeries};
use crate::services::align::align;
use crate::services::coingecko::CoinGeckoClient;
use crate::services::reconcile::{ReconcileQueue, ReconcileTask};
use crate::services::transport::FetchError;
use crate::utils::{normalize_id, pair_key};

struct PairEntry {
    result: PairResult,
    cached_at: Instant,
}

pub struct CompareCache {
    client: Arc<CoinGeckoClient>,
    queue: Arc<ReconcileQueue>,
    ttl: Duration,
    pairs: RwLock<HashMap<String, PairEntry>>,
    preload: RwLock<HashMap<String, PreloadEntry>>,
    /// Per-key markers, present only while a refresh runs.
    inflight: Mutex<HashMap<String, broadcast::Sender<PairResult>>>,
}

impl CompareCache {
    pub fn new(client: Arc<CoinGeckoClient>, queue: Arc<ReconcileQueue>) -> Self {
        Self {
            client,
            queue,
            ttl: Duration::from_secs(PAIR_TTL_SECS),
            pairs: RwLock::new(HashMap::new()),
            preload: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Aligned two-coin comparison. Always resolves to a well-formed result:
    /// fresh, joined, partial, stale, or placeholder.
    pub async fn get_comparison(&self, id1: &str, id2: &str) -> PairResult {
        let coin1 = normalize_id(id1);
        let coin2 = normalize_id(id2);
        let key = pair_key(&coin1, &coin2);

        enum Flight {
            Lead(broadcast::Sender<PairResult>),
            Join(broadcast::Receiver<PairResult>),
        }

        let flight = {
            let mut inflight = self.inflight.lock().await;
            if let Some(entry) = self.pairs.read().await.get(&key) {
                if entry.cached_at.elapsed() < self.ttl {
                    return entry.result.clone();
                }
            }
            match inflight.get(&key) {
                Some(sender) => Flight::Join(sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    inflight.insert(key.clone(), sender.clone());
                    Flight::Lead(sender)
                }
            }
        };

        match flight {
            Flight::Join(mut receiver) => match receiver.recv().await {
                Ok(result) => result,
                // Leader vanished; degrade the same way a failed fetch would,
                // but without queueing a second reconcile task.
                Err(_) => self.stale_or_placeholder(&key, &coin1, &coin2).await,
            },
            Flight::Lead(sender) => {
                let result = self.fetch_pair(&key, &coin1, &coin2).await;
                // Marker cleared only after the result is durably stored,
                // success or failure, so the key is never left permanently in
                // flight.
                self.inflight.lock().await.remove(&key);
                let _ = sender.send(result.clone());
                result
            }
        }
    }

    /// Fetch both legs, degrade on partial failure, cache whatever usable
    /// result came out of it.
    async fn fetch_pair(&self, key: &str, coin1: &str, coin2: &str) -> PairResult {
        let first = self.client.fetch_daily_series(coin1).await;

        // Deliberate inter-entity spacing, on top of the transport interval.
        let spread = (PAIR_PACING_MAX_MS - PAIR_PACING_MIN_MS) as f64;
        let pacing = PAIR_PACING_MIN_MS + (rand::random::<f64>() * spread) as u64;
        sleep(Duration::from_millis(pacing)).await;

        let second = self.client.fetch_daily_series(coin2).await;

        let result = match (first, second) {
            (Ok(series1), Ok(series2)) => {
                let (aligned1, aligned2) = align(&series1, &series2);
                PairResult {
                    coin1: coin1.to_string(),
                    coin2: coin2.to_string(),
                    data: vec![
                        NamedSeries { name: coin1.to_string(), prices: aligned1 },
                        NamedSeries { name: coin2.to_string(), prices: aligned2 },
                    ],
                    warning: None,
                }
            }
            (Ok(series1), Err(e)) => {
                warn!(coin = %coin2, error = %e, "one comparison leg failed");
                self.partial_result(coin1, coin2, coin1, series1)
            }
            (Err(e), Ok(series2)) => {
                warn!(coin = %coin1, error = %e, "one comparison leg failed");
                self.partial_result(coin1, coin2, coin2, series2)
            }
            (Err(e1), Err(e2)) => {
                error!(
                    coin1 = %coin1,
                    coin2 = %coin2,
                    error1 = %e1,
                    error2 = %e2,
                    "both comparison legs failed"
                );
                return self.total_failure(key, coin1, coin2).await;
            }
        };

        self.store(key, result.clone()).await;
        result
    }

    fn partial_result(
        &self,
        coin1: &str,
        coin2: &str,
        survivor: &str,
        prices: PriceSeries,
    ) -> PairResult {
        let failed = if survivor == coin1 { coin2 } else { coin1 };
        PairResult {
            coin1: coin1.to_string(),
            coin2: coin2.to_string(),
            data: vec![NamedSeries { name: survivor.to_string(), prices }],
            warning: Some(format!("no data available for {}", failed)),
        }
    }

    /// Both legs failed: serve the stale entry when one exists, otherwise
    /// queue a reconciliation task and hand back the placeholder.
    async fn total_failure(&self, key: &str, coin1: &str, coin2: &str) -> PairResult {
        if let Some(result) = self.stale_tagged(key).await {
            return result;
        }
        self.queue.push(ReconcileTask::new(coin1, coin2)).await;
        PairResult::placeholder(coin1, coin2, "upstream unavailable; data pending".to_string())
    }

    async fn stale_or_placeholder(&self, key: &str, coin1: &str, coin2: &str) -> PairResult {
        if let Some(result) = self.stale_tagged(key).await {
            return result;
        }
        PairResult::placeholder(coin1, coin2, "upstream unavailable; data pending".to_string())
    }

    /// Any-age cache entry for the key, tagged with a staleness warning.
    /// The stored entry itself is left untouched.
    async fn stale_tagged(&self, key: &str) -> Option<PairResult> {
        self.pairs.read().await.get(key).map(|entry| {
            let mut result = entry.result.clone();
            result.warning = Some("serving cached data; upstream refresh failed".to_string());
            result
        })
    }

    async fn store(&self, key: &str, result: PairResult) {
        let entry = PairEntry {
            result,
            cached_at: Instant::now(),
        };
        self.pairs.write().await.insert(key.to_string(), entry);
    }

    /// Background retry path: both legs fetched concurrently (the transport
    /// serializes them anyway), no pacing delay, success required on both.
    pub async fn reconcile_pair(&self, task: &ReconcileTask) -> Result<(), FetchError> {
        let coin1 = normalize_id(&task.coin1);
        let coin2 = normalize_id(&task.coin2);

        let (first, second) = tokio::join!(
            self.client.fetch_daily_series(&coin1),
            self.client.fetch_daily_series(&coin2)
        );
        let series1 = first?;
        let series2 = second?;

        let (aligned1, aligned2) = align(&series1, &series2);
        let result = PairResult {
            coin1: coin1.clone(),
            coin2: coin2.clone(),
            data: vec![
                NamedSeries { name: coin1.clone(), prices: aligned1 },
                NamedSeries { name: coin2.clone(), prices: aligned2 },
            ],
            warning: None,
        };
        self.store(&pair_key(&coin1, &coin2), result).await;
        info!(coin1 = %coin1, coin2 = %coin2, "pair reconciled");
        Ok(())
    }

    /// Single-coin accessor backing the history endpoint. Never fails:
    /// a non-empty cached entry is returned as-is, a miss triggers one fetch,
    /// and a failed fetch yields `None`.
    pub async fn ensure_preloaded(&self, id: &str) -> Option<PreloadEntry> {
        let id = normalize_id(id);

        if let Some(entry) = self.preload.read().await.get(&id) {
            if !entry.prices.is_empty() {
                return Some(entry.clone());
            }
        }

        match self.client.fetch_daily_series(&id).await {
            Ok(prices) => {
                let entry = PreloadEntry {
                    id: id.clone(),
                    name: id.clone(),
                    prices,
                    cached_at: Instant::now(),
                };
                self.preload.write().await.insert(id, entry.clone());
                Some(entry)
            }
            Err(e) => {
                warn!(coin = %id, error = %e, "preload fetch failed");
                None
            }
        }
    }

    /// Sweep path: unconditionally refetch and replace one preload entry.
    pub async fn refresh_preload(&self, id: &str) -> Result<usize, FetchError> {
        let id = normalize_id(id);
        let prices = self.client.fetch_daily_series(&id).await?;
        let count = prices.len();
        let entry = PreloadEntry {
            id: id.clone(),
            name: id.clone(),
            prices,
            cached_at: Instant::now(),
        };
        self.preload.write().await.insert(id, entry);
        Ok(count)
    }

    /// Age of a preload entry, if one exists. The sweep worker uses this to
    /// skip entries an on-demand fetch already renewed.
    pub async fn preload_age(&self, id: &str) -> Option<Duration> {
        self.preload
            .read()
            .await
            .get(&normalize_id(id))
            .map(|entry| entry.cached_at.elapsed())
    }

    /// True when a fresh pair entry exists; the prewarm scheduler skips those.
    pub async fn pair_is_fresh(&self, id1: &str, id2: &str) -> bool {
        let key = pair_key(&normalize_id(id1), &normalize_id(id2));
        self.pairs
            .read()
            .await
            .get(&key)
            .map(|entry| entry.cached_at.elapsed() < self.ttl)
            .unwrap_or(false)
    }

    pub async fn pair_entry_count(&self) -> usize {
        self.pairs.read().await.len()
    }

    pub async fn preload_entry_count(&self) -> usize {
        self.preload.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::transport::testing::MockTransport;
    use crate::services::transport::ThrottledTransport;
    use serde_json::json;

    fn chart_body(points: &[(i64, f64)]) -> serde_json::Value {
        let prices: Vec<serde_json::Value> = points.iter().map(|(t, p)| json!([t, p])).collect();
        json!({ "prices": prices })
    }

    fn engine(mock: Arc<MockTransport>) -> (Arc<CompareCache>, Arc<ReconcileQueue>) {
        let client = Arc::new(CoinGeckoClient::new(
            ThrottledTransport::new(mock),
            "http://upstream/api/v3".to_string(),
        ));
        let queue = Arc::new(ReconcileQueue::new());
        (Arc::new(CompareCache::new(client, queue.clone())), queue)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_comparisons_share_one_pair_of_fetches() {
        let mock = Arc::new(MockTransport::new().with_delay(Duration::from_millis(100)));
        mock.set_default(Ok(chart_body(&[(1, 1.0), (2, 2.0)]))).await;
        let (cache, _) = engine(mock.clone());

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.get_comparison("bitcoin", "ethereum").await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(mock.call_count().await, 2);
        for result in &results {
            assert_eq!(result, &results[0]);
            assert!(result.warning.is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reversed_ids_hit_the_same_cache_entry() {
        let mock = Arc::new(MockTransport::new());
        mock.set_default(Ok(chart_body(&[(1, 1.0)]))).await;
        let (cache, _) = engine(mock.clone());

        let first = cache.get_comparison("ethereum", "bitcoin").await;
        assert_eq!(mock.call_count().await, 2);

        let second = cache.get_comparison("Bitcoin", "ETHEREUM").await;
        assert_eq!(mock.call_count().await, 2);
        assert_eq!(first, second);
        assert_eq!(cache.pair_entry_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_series_are_aligned_to_shared_timestamps() {
        let mock = Arc::new(MockTransport::new());
        mock.push(Ok(chart_body(&[(1, 10.0), (2, 11.0), (3, 12.0)]))).await;
        mock.push(Ok(chart_body(&[(2, 20.0), (3, 21.0), (4, 22.0)]))).await;
        let (cache, _) = engine(mock);

        let result = cache.get_comparison("bitcoin", "ethereum").await;
        assert_eq!(result.data.len(), 2);
        let ts1: Vec<i64> = result.data[0].prices.iter().map(|p| p.timestamp).collect();
        let ts2: Vec<i64> = result.data[1].prices.iter().map(|p| p.timestamp).collect();
        assert_eq!(ts1, vec![2, 3]);
        assert_eq!(ts1, ts2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failed_leg_degrades_to_partial_result() {
        let mock = Arc::new(MockTransport::new());
        mock.push(Ok(chart_body(&[(1, 1.0), (2, 2.0)]))).await;
        mock.push(Err(FetchError::new(Some(500), "down"))).await;
        let (cache, queue) = engine(mock);

        let result = cache.get_comparison("bitcoin", "ethereum").await;
        assert_eq!(result.data.len(), 1);
        assert_eq!(result.data[0].name, "bitcoin");
        assert_eq!(result.data[0].prices.len(), 2);
        assert!(result.warning.as_deref().unwrap().contains("ethereum"));
        // Partial results are cached, not queued for reconciliation.
        assert_eq!(queue.len().await, 0);
        assert_eq!(cache.pair_entry_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_failure_without_cache_returns_placeholder_and_queues_task() {
        let mock = Arc::new(MockTransport::new());
        mock.set_default(Err(FetchError::new(Some(500), "down"))).await;
        let (cache, queue) = engine(mock);

        let result = cache.get_comparison("bitcoin", "ethereum").await;
        assert_eq!(result.coin1, "bitcoin");
        assert_eq!(result.coin2, "ethereum");
        assert_eq!(result.data.len(), 2);
        assert!(result.data.iter().all(|s| s.prices.is_empty()));
        assert!(result.warning.is_some());

        assert_eq!(queue.len().await, 1);
        let task = queue.pop().await.unwrap();
        assert_eq!(task.coin1, "bitcoin");
        assert_eq!(task.coin2, "ethereum");
        assert_eq!(task.attempts, 0);
        // Placeholders are not cached; the next request retries.
        assert_eq!(cache.pair_entry_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_failure_with_stale_cache_serves_stale_with_warning() {
        let mock = Arc::new(MockTransport::new());
        mock.push(Ok(chart_body(&[(1, 1.0)]))).await;
        mock.push(Ok(chart_body(&[(1, 2.0)]))).await;
        mock.set_default(Err(FetchError::new(Some(500), "down"))).await;
        let (cache, queue) = engine(mock);

        let fresh = cache.get_comparison("bitcoin", "ethereum").await;
        assert!(fresh.warning.is_none());

        tokio::time::advance(Duration::from_secs(PAIR_TTL_SECS + 1)).await;
        let stale = cache.get_comparison("bitcoin", "ethereum").await;
        assert_eq!(stale.data, fresh.data);
        assert!(stale.warning.is_some());
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_pair_writes_the_cache_entry() {
        let mock = Arc::new(MockTransport::new());
        mock.set_default(Ok(chart_body(&[(1, 1.0), (2, 2.0)]))).await;
        let (cache, _) = engine(mock.clone());

        cache
            .reconcile_pair(&ReconcileTask::new("bitcoin", "ethereum"))
            .await
            .unwrap();
        assert_eq!(mock.call_count().await, 2);

        // The reconciled entry serves subsequent requests without new fetches.
        let result = cache.get_comparison("bitcoin", "ethereum").await;
        assert_eq!(mock.call_count().await, 2);
        assert!(result.warning.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_preloaded_caches_and_degrades_to_none() {
        let mock = Arc::new(MockTransport::new());
        mock.push(Ok(chart_body(&[(1, 1.0)]))).await;
        mock.set_default(Err(FetchError::new(None, "unreachable"))).await;
        let (cache, _) = engine(mock.clone());

        let entry = cache.ensure_preloaded("Bitcoin").await.unwrap();
        assert_eq!(entry.id, "bitcoin");
        assert_eq!(entry.prices.len(), 1);
        assert_eq!(mock.call_count().await, 1);

        // Cached: no further upstream work.
        cache.ensure_preloaded("bitcoin").await.unwrap();
        assert_eq!(mock.call_count().await, 1);

        // A coin the upstream rejects yields None, never an error.
        assert!(cache.ensure_preloaded("unknown").await.is_none());
    }
}
