pub mod filter;
pub mod memory;
pub mod row;
pub mod surface;
pub mod traits;

pub use filter::{SpatialFilter, TableFilter};
pub use memory::MemoryTable;
pub use row::{Field, FieldType, FieldValue, InvolvedRow, Row, RowId, TableId};
pub use surface::{SurfaceId, SurfaceRow};
pub use traits::{JoinSource, ReadOnlyTable, RowConstraint, RowCursor, SurfaceKind, SurfaceSource};
