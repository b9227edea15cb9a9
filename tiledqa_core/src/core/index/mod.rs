pub mod box_tree;

pub use box_tree::{BoxTree, BoxTreeSearch, TileEntry};
