use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Worker statistics surfaced by the health endpoint. Updated by the
/// background workers, read-only everywhere else.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthStats {
    pub reconcile_iterations: u64,
    pub reconcile_last_run: Option<String>,
    pub preload_last_sweep: Option<String>,
    pub prewarm_last_run: Option<String>,
}

impl Default for HealthStats {
    fn default() -> Self {
        Self {
            reconcile_iterations: 0,
            reconcile_last_run: None,
            preload_last_sweep: None,
            prewarm_last_run: None,
        }
    }
}

impl HealthStats {
    pub fn stamp() -> Option<String> {
        Some(Utc::now().to_rfc3339())
    }
}

pub type SharedHealthStats = Arc<RwLock<HealthStats>>;
