pub mod align;
pub mod coingecko;
pub mod compare_cache;
pub mod health;
pub mod market_cache;
pub mod reconcile;
pub mod transport;

pub use align::align;
pub use coingecko::CoinGeckoClient;
pub use compare_cache::CompareCache;
pub use health::{HealthStats, SharedHealthStats};
pub use market_cache::MarketCache;
pub use reconcile::{ReconcileQueue, ReconcileTask};
pub use transport::{FetchError, HttpGet, ReqwestTransport, ThrottledTransport};
