//! Tile-by-tile execution of spatial data quality tests.
//!
//! The container sweeps the run extent tile by tile (left to right, then bottom
//! to top), caches only the rows relevant for the current tile plus a bounded
//! search tolerance halo, and hands every applicable (row, test) pair to its
//! test exactly once.
//!
//! ```text
//!  TileEnum ──► TestRowEnum ──► TestContainer ──► ContainerTest
//!                  │    ▲                              │
//!                  ▼    │ search                       │ report_error
//!              TileCache (BoxTree per table)           ▼
//!                  │                          QaErrorAdministrator ──► ContainerListener
//!                  ▼
//!           OverlappingFeatures (exactly-once, eviction, UniqueIdProvider)
//! ```

/// Default nominal tile side length.
pub const DEFAULT_TILE_SIZE: f64 = 10_000.0;

/// Default maximum number of points kept cached between tiles.
pub const DEFAULT_MAX_CACHED_POINT_COUNT: i64 = 500_000;

/// Maximum number of entries in a box tree node before it is split.
pub(crate) const MAX_ELEMENTS_PER_NODE: usize = 64;

pub mod configuration;
pub mod core;

pub use crate::core::error::{ContainerError, Result};
