use std::sync::Arc;

use crate::core::error::DataResult;
use crate::core::geometry::Envelope;
use crate::core::tiling::tiling_grid::TilingGrid;

use super::filter::TableFilter;
use super::row::{Field, Row};

/// Lazy, single-pass sequence of rows.
pub type RowCursor = Box<dyn Iterator<Item = DataResult<Arc<Row>>>>;

/// A base table contributing to a joined table, with its key field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSource {
    pub table_name: String,
    pub key_field: String,
}

impl JoinSource {
    pub fn new(table_name: impl Into<String>, key_field: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            key_field: key_field.into(),
        }
    }
}

/// Read access to a table of the feature store.
pub trait ReadOnlyTable {
    fn name(&self) -> &str;

    /// `None` for tables without a native unique key (e.g. joins).
    fn oid_field_name(&self) -> Option<&str>;

    fn fields(&self) -> &[Field];

    fn xy_tolerance(&self) -> f64 {
        0.0
    }

    /// Extent of all rows; `None` if unknown or without geometry.
    fn extent(&self) -> Option<Envelope>;

    fn has_geometry(&self) -> bool;

    /// Contributing base tables of a joined table. Empty for plain tables.
    fn join_sources(&self) -> &[JoinSource] {
        &[]
    }

    fn enum_rows(&self, filter: &TableFilter, recycle: bool) -> DataResult<RowCursor>;

    fn row_count(&self, filter: &TableFilter) -> DataResult<usize> {
        let mut count = 0;
        for row in self.enum_rows(filter, true)? {
            row?;
            count += 1;
        }
        Ok(count)
    }

    fn field_index(&self, name: &str) -> Option<usize> {
        self.fields()
            .iter()
            .position(|field| field.name.eq_ignore_ascii_case(name))
    }
}

/// Attribute constraint of a test on one of its involved tables.
pub trait RowConstraint {
    /// Expression text; used as where clause when it is valid database syntax.
    fn expression(&self) -> &str;

    fn matches(&self, row: &Row) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    Raster,
    Terrain,
}

/// A raster or terrain surface read in fixed grid cells.
pub trait SurfaceSource {
    fn name(&self) -> &str;

    fn kind(&self) -> SurfaceKind;

    fn extent(&self) -> Envelope;

    /// Fixed tiling of the surface; `None` if it can be read in any window.
    fn tiling(&self) -> Option<TilingGrid>;
}
