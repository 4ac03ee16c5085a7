use crate::constants::DEFAULT_UPSTREAM_URL;

/// Get upstream API base URL from environment variable or use default
pub fn upstream_base_url() -> String {
    std::env::var("COINSYNC_UPSTREAM_URL")
        .map(|url| url.trim().trim_end_matches('/').to_string())
        .unwrap_or_else(|_| DEFAULT_UPSTREAM_URL.to_string())
}

/// Optional upstream API key (sent as a default request header when set)
pub fn upstream_api_key() -> Option<String> {
    std::env::var("COINSYNC_API_KEY")
        .ok()
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}

/// Coin ids are case-insensitive at the boundary; stored and compared lower-case.
pub fn normalize_id(id: &str) -> String {
    id.trim().to_lowercase()
}

/// Order-independent cache key for a two-coin comparison.
/// ("ethereum", "bitcoin") and ("bitcoin", "ethereum") map to the same slot.
pub fn pair_key(coin1: &str, coin2: &str) -> String {
    let mut ids = [coin1, coin2];
    ids.sort();
    format!("{}|{}", ids[0], ids[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_id() {
        assert_eq!(normalize_id("  Bitcoin "), "bitcoin");
        assert_eq!(normalize_id("ETHEREUM"), "ethereum");
    }

    #[test]
    fn test_pair_key_is_order_independent() {
        assert_eq!(pair_key("ethereum", "bitcoin"), pair_key("bitcoin", "ethereum"));
        assert_eq!(pair_key("bitcoin", "ethereum"), "bitcoin|ethereum");
    }
}
