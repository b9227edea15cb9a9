use std::sync::Arc;

use crate::core::geometry::{Envelope, Shape, SpatialRelation};

#[derive(Debug, Clone)]
pub struct SpatialFilter {
    pub shape: Arc<Shape>,
    pub relation: SpatialRelation,
}

impl SpatialFilter {
    pub fn new(shape: Arc<Shape>, relation: SpatialRelation) -> Self {
        Self { shape, relation }
    }

    pub fn envelope_intersects(envelope: &Envelope) -> Self {
        Self::new(
            Arc::new(Shape::from_envelope(envelope)),
            SpatialRelation::EnvelopeIntersects,
        )
    }

    /// Envelope of the filter shape; `None` if the shape is empty.
    pub fn envelope(&self) -> Option<Envelope> {
        self.shape.envelope()
    }
}

/// Query description handed to `ReadOnlyTable::enum_rows`.
#[derive(Debug, Clone)]
pub struct TableFilter {
    pub spatial: Option<SpatialFilter>,
    pub where_clause: Option<String>,
    /// Object ids that must not be returned (`OID NOT IN (...)`).
    pub excluded_oids: Vec<i64>,
    pub include_blob_fields: bool,
    pub include_geometry: bool,
}

impl Default for TableFilter {
    fn default() -> Self {
        Self {
            spatial: None,
            where_clause: None,
            excluded_oids: Vec::new(),
            include_blob_fields: false,
            include_geometry: true,
        }
    }
}

impl TableFilter {
    pub fn spatial(filter: SpatialFilter) -> Self {
        Self {
            spatial: Some(filter),
            ..Self::default()
        }
    }

    pub fn with_where_clause(mut self, where_clause: Option<String>) -> Self {
        self.where_clause = where_clause.filter(|clause| !clause.trim().is_empty());
        self
    }

    pub fn with_excluded_oids(mut self, oids: Vec<i64>) -> Self {
        self.excluded_oids = oids;
        self
    }

    pub fn with_blob_fields(mut self, include: bool) -> Self {
        self.include_blob_fields = include;
        self
    }

    pub fn with_geometry(mut self, include: bool) -> Self {
        self.include_geometry = include;
        self
    }
}
