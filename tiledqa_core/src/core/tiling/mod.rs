pub mod tile_enum;
pub mod tiling_grid;

pub use tile_enum::{Tile, TileEnum};
pub use tiling_grid::TilingGrid;
