use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use tokio::time::Instant;

/// One point of a daily price series: millisecond epoch timestamp and price.
///
/// Serializes as `[timestamp, price]` so downstream consumers see the
/// upstream's wire shape unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub timestamp: i64,
    pub price: f64,
}

impl Serialize for PricePoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(2))?;
        seq.serialize_element(&self.timestamp)?;
        seq.serialize_element(&self.price)?;
        seq.end()
    }
}

/// Ascending by timestamp, no duplicate timestamps (upstream guarantee)
pub type PriceSeries = Vec<PricePoint>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedSeries {
    pub name: String,
    pub prices: PriceSeries,
}

/// Result of a two-coin comparison.
///
/// `warning` is present iff the data is degraded: stale fallback, a missing
/// leg, or the empty placeholder. The success path never sets it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairResult {
    pub coin1: String,
    pub coin2: String,
    pub data: Vec<NamedSeries>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl PairResult {
    /// Well-formed empty shape returned when both legs failed and no cache
    /// entry exists. Callers always receive both coin names.
    pub fn placeholder(coin1: &str, coin2: &str, warning: String) -> Self {
        Self {
            coin1: coin1.to_string(),
            coin2: coin2.to_string(),
            data: vec![
                NamedSeries {
                    name: coin1.to_string(),
                    prices: Vec::new(),
                },
                NamedSeries {
                    name: coin2.to_string(),
                    prices: Vec::new(),
                },
            ],
            warning: Some(warning),
        }
    }
}

/// Single-coin full-year series kept fresh by the preload sweep.
/// Independent namespace from pair cache entries.
#[derive(Debug, Clone)]
pub struct PreloadEntry {
    pub id: String,
    pub name: String,
    pub prices: PriceSeries,
    pub cached_at: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_point_serializes_as_pair() {
        let point = PricePoint {
            timestamp: 1700000000000,
            price: 42.5,
        };
        let json = serde_json::to_string(&point).unwrap();
        assert_eq!(json, "[1700000000000,42.5]");
    }

    #[test]
    fn test_placeholder_shape() {
        let result = PairResult::placeholder("bitcoin", "ethereum", "upstream unavailable".into());
        assert_eq!(result.data.len(), 2);
        assert_eq!(result.data[0].name, "bitcoin");
        assert_eq!(result.data[1].name, "ethereum");
        assert!(result.data.iter().all(|s| s.prices.is_empty()));
        assert!(result.warning.is_some());
    }

    #[test]
    fn test_warning_omitted_when_none() {
        let result = PairResult {
            coin1: "bitcoin".into(),
            coin2: "ethereum".into(),
            data: Vec::new(),
            warning: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("warning"));
    }
}
