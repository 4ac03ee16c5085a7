use std::collections::HashSet;

use crate::models::{PricePoint, PriceSeries};

/// Reduce two time-keyed series to their timestamp intersection.
///
/// Each output keeps only the points whose timestamp appears in both inputs,
/// in the original ascending order. The outputs have equal length and
/// identical timestamp sequences, which is what lets the reporting tool plot
/// the two coins on one axis.
pub fn align(series_a: &[PricePoint], series_b: &[PricePoint]) -> (PriceSeries, PriceSeries) {
    let timestamps_a: HashSet<i64> = series_a.iter().map(|p| p.timestamp).collect();
    let timestamps_b: HashSet<i64> = series_b.iter().map(|p| p.timestamp).collect();

    let aligned_a = series_a
        .iter()
        .filter(|p| timestamps_b.contains(&p.timestamp))
        .copied()
        .collect();
    let aligned_b = series_b
        .iter()
        .filter(|p| timestamps_a.contains(&p.timestamp))
        .copied()
        .collect();

    (aligned_a, aligned_b)
}
