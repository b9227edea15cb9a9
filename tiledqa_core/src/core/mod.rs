pub mod error;
pub mod geometry;
pub mod index;
pub mod data;
pub mod identity;
pub mod cache;
pub mod tiling;
pub mod container;
