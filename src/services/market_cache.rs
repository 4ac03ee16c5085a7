//! Full-market snapshot cache.
//!
//! One global slot, 15-minute TTL, single-flight refresh. A failed refresh
//! degrades to the previous snapshot when one exists; only a cold-start total
//! failure propagates, since there is no safe placeholder for the market list.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{error, info, warn};

use crate::constants::SNAPSHOT_TTL_SECS;
use crate::models::Snapshot;
use crate::services::coingecko::CoinGeckoClient;
use crate::services::transport::FetchError;

type RefreshResult = Result<Arc<Snapshot>, FetchError>;

pub struct MarketCache {
    client: Arc<CoinGeckoClient>,
    ttl: Duration,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    /// Present only while a refresh is running; joiners subscribe to it.
    inflight: Mutex<Option<broadcast::Sender<RefreshResult>>>,
}

impl MarketCache {
    pub fn new(client: Arc<CoinGeckoClient>) -> Self {
        Self {
            client,
            ttl: Duration::from_secs(SNAPSHOT_TTL_SECS),
            snapshot: RwLock::new(None),
            inflight: Mutex::new(None),
        }
    }

    /// Return the cached snapshot if it is fresh, otherwise join or start a
    /// refresh. `force` skips the freshness check but still joins an
    /// in-flight refresh rather than doubling upstream work.
    pub async fn get_snapshot(&self, force: bool) -> RefreshResult {
        if !force {
            if let Some(snapshot) = self.fresh_snapshot().await {
                return Ok(snapshot);
            }
        }

        enum Flight {
            Lead(broadcast::Sender<RefreshResult>),
            Join(broadcast::Receiver<RefreshResult>),
        }

        let flight = {
            let mut inflight = self.inflight.lock().await;
            // Re-check under the marker lock: a refresh may have just landed.
            if !force {
                if let Some(snapshot) = self.fresh_snapshot().await {
                    return Ok(snapshot);
                }
            }
            match inflight.as_ref() {
                Some(sender) => Flight::Join(sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    *inflight = Some(sender.clone());
                    Flight::Lead(sender)
                }
            }
        };

        match flight {
            Flight::Join(mut receiver) => match receiver.recv().await {
                Ok(result) => result,
                // Leader vanished without a result; fall back to the cache.
                Err(_) => match self.snapshot.read().await.as_ref() {
                    Some(snapshot) => Ok(snapshot.clone()),
                    None => Err(FetchError::new(None, "snapshot refresh interrupted")),
                },
            },
            Flight::Lead(sender) => {
                let result = self.refresh().await;
                // Clear the marker only after the result is durably stored, on
                // both paths, so the key is never left permanently in flight.
                *self.inflight.lock().await = None;
                let _ = sender.send(result.clone());
                result
            }
        }
    }

    async fn fresh_snapshot(&self) -> Option<Arc<Snapshot>> {
        let guard = self.snapshot.read().await;
        guard.as_ref().filter(|s| s.age() < self.ttl).cloned()
    }

    async fn refresh(&self) -> RefreshResult {
        match self.client.fetch_markets().await {
            Ok(rows) => {
                let snapshot = Arc::new(Snapshot::new(rows));
                *self.snapshot.write().await = Some(snapshot.clone());
                info!(rows = snapshot.rows.len(), "market snapshot refreshed");
                Ok(snapshot)
            }
            Err(e) => {
                let stale = self.snapshot.read().await.clone();
                match stale {
                    Some(snapshot) => {
                        warn!(
                            error = %e,
                            age_secs = snapshot.age().as_secs(),
                            "snapshot refresh failed, serving stale data"
                        );
                        Ok(snapshot)
                    }
                    None => {
                        error!(error = %e, "snapshot refresh failed with no cached fallback");
                        Err(e)
                    }
                }
            }
        }
    }

    /// Read-only introspection for the health endpoint.
    pub async fn cache_age_seconds(&self) -> Option<u64> {
        self.snapshot
            .read()
            .await
            .as_ref()
            .map(|s| s.age().as_secs())
    }
}
