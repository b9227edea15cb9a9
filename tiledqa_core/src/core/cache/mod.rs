pub mod cached_row;
pub mod overlapping_features;
pub mod query_filter_helper;
pub mod tile_cache;

pub use cached_row::CachedRow;
pub use overlapping_features::{OverlappingFeatures, TestedRow};
pub use query_filter_helper::QueryFilterHelper;
pub use tile_cache::{LoadOptions, LoadStats, TileCache};
