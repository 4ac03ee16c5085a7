//! Tuning constants for the fetch-coordination layer.
//!
//! The upstream free tier throttles aggressively per IP, so every knob here
//! errs on the conservative side: one outbound request per 3 seconds, long
//! cache TTLs, and a deliberately slow reconciliation drain.

/// Default upstream API base URL (override with `COINSYNC_UPSTREAM_URL`)
pub const DEFAULT_UPSTREAM_URL: &str = "https://api.coingecko.com/api/v3";

/// Minimum spacing between consecutive upstream requests
pub const MIN_REQUEST_INTERVAL_MS: u64 = 3000;

/// Market snapshot cache TTL (15 minutes)
pub const SNAPSHOT_TTL_SECS: u64 = 900;

/// Pair comparison cache TTL
pub const PAIR_TTL_SECS: u64 = 60;

/// Maximum attempts for a retriable upstream fetch
pub const MAX_FETCH_ATTEMPTS: u32 = 30;

/// Retry backoff: `min(base * attempt, max) + uniform(0, jitter)` milliseconds
pub const RETRY_BASE_DELAY_MS: u64 = 500;
pub const RETRY_MAX_DELAY_MS: u64 = 8000;
pub const RETRY_JITTER_MS: u64 = 300;

/// Request timeouts
pub const SNAPSHOT_TIMEOUT_SECS: u64 = 15;
pub const SERIES_TIMEOUT_SECS: u64 = 20;

/// Market snapshot page size (single page, market-cap descending)
pub const SNAPSHOT_PAGE_SIZE: u32 = 250;

/// Canonical history window for series fetches, in days
pub const RANGE_ONE_YEAR: &str = "365";

/// Fallback window for coins younger than the canonical range
pub const RANGE_MAX: &str = "max";

/// Randomized spacing between the two series fetches of one comparison.
/// Deliberate inter-entity pacing on top of the transport interval, not a
/// redundant throttle.
pub const PAIR_PACING_MIN_MS: u64 = 1500;
pub const PAIR_PACING_MAX_MS: u64 = 3500;

/// Reconciliation worker: one task per tick, bounded attempts
pub const RECONCILE_INTERVAL_SECS: u64 = 15;
pub const RECONCILE_MAX_ATTEMPTS: u32 = 30;

/// Preload sweep interval (30 minutes)
pub const PRELOAD_SWEEP_INTERVAL_SECS: u64 = 1800;

/// Prewarm scheduler interval (10 minutes)
pub const PREWARM_INTERVAL_SECS: u64 = 600;

/// Coins kept warm in the single-entity preload cache
pub const PRELOAD_COINS: &[&str] = &["bitcoin", "ethereum", "solana", "cardano"];

/// Pairs the prewarm scheduler keeps queued for reconciliation
pub const PREWARM_PAIRS: &[(&str, &str)] = &[
    ("bitcoin", "ethereum"),
    ("bitcoin", "solana"),
    ("ethereum", "solana"),
];

/// Default result-size limit for the market list endpoint
pub const DEFAULT_COINS_LIMIT: usize = 100;
