pub mod engine;
pub mod envelope;
pub mod shape;

pub use engine::{GeoRelationalOperator, GeometryEngine, RelationalOperator, SpatialRelation};
pub use envelope::Envelope;
pub use shape::{Shape, ShapeKind};
