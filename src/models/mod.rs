mod series;
mod snapshot;

pub use series::{NamedSeries, PairResult, PreloadEntry, PricePoint, PriceSeries};
pub use snapshot::{Snapshot, SnapshotRow};
