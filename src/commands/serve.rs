use crate::server::{self, AppState};
use crate::services::{
    CoinGeckoClient, CompareCache, HealthStats, MarketCache, ReconcileQueue, ReqwestTransport,
    ThrottledTransport,
};
use crate::utils::{upstream_api_key, upstream_base_url};
use crate::worker;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;

pub async fn run(port: u16) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    println!("🚀 Starting coinsync server on port {}", port);

    let base_url = upstream_base_url();
    println!("🌐 Upstream: {}", base_url);

    let transport = match ReqwestTransport::new(upstream_api_key()) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("❌ Failed to create transport: {}", e);
            std::process::exit(1);
        }
    };

    let client = Arc::new(CoinGeckoClient::new(
        ThrottledTransport::new(Arc::new(transport)),
        base_url,
    ));
    let market = Arc::new(MarketCache::new(client.clone()));
    let queue = Arc::new(ReconcileQueue::new());
    let compare = Arc::new(CompareCache::new(client, queue.clone()));
    let health_stats = Arc::new(RwLock::new(HealthStats::default()));

    // Prime the snapshot before serving. A failure here is tolerated: the
    // first request simply triggers the refresh again.
    println!("📊 Warming market snapshot...");
    match market.get_snapshot(false).await {
        Ok(snapshot) => println!("✅ Snapshot ready: {} coins", snapshot.rows.len()),
        Err(e) => eprintln!("⚠️  Warning: snapshot warm-up failed: {} (will retry on demand)", e),
    }

    tokio::spawn(worker::run_reconcile_worker(
        compare.clone(),
        queue.clone(),
        health_stats.clone(),
    ));
    tokio::spawn(worker::run_preload_worker(
        compare.clone(),
        health_stats.clone(),
    ));
    tokio::spawn(worker::run_prewarm_worker(
        compare.clone(),
        queue.clone(),
        health_stats.clone(),
    ));

    let app_state = AppState {
        market,
        compare,
        queue,
        health_stats,
        started_at: Instant::now(),
    };

    if let Err(e) = server::serve(app_state, port).await {
        eprintln!("❌ Server error: {}", e);
        std::process::exit(1);
    }
}
