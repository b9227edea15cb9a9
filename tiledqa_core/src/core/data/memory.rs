use std::cell::Cell;
use std::sync::Arc;

use crate::core::error::{DataError, DataResult};
use crate::core::geometry::{Envelope, GeometryEngine, Shape, SpatialRelation};

use super::filter::TableFilter;
use super::row::{Field, FieldType, FieldValue, Row};
use super::traits::{JoinSource, ReadOnlyTable, RowCursor};

/// Table held completely in memory.
///
/// Spatial filters are honoured with the default geometry engine. Where
/// clauses are accepted but not evaluated.
pub struct MemoryTable {
    name: String,
    oid_field_name: Option<String>,
    fields: Vec<Field>,
    join_sources: Vec<JoinSource>,
    xy_tolerance: f64,
    rows: Vec<Arc<Row>>,
    next_oid: i64,
    query_count: Cell<usize>,
}

impl MemoryTable {
    /// Creates a table with a native `OBJECTID` key.
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            oid_field_name: Some("OBJECTID".to_string()),
            fields,
            join_sources: Vec::new(),
            xy_tolerance: 0.0,
            rows: Vec::new(),
            next_oid: 1,
            query_count: Cell::new(0),
        }
    }

    /// Creates a joined table without native key. Key values are read from
    /// the `Table.Column` fields matching `join_sources`.
    pub fn joined(name: impl Into<String>, fields: Vec<Field>, join_sources: Vec<JoinSource>) -> Self {
        Self {
            oid_field_name: None,
            join_sources,
            ..Self::new(name, fields)
        }
    }

    pub fn with_xy_tolerance(mut self, tolerance: f64) -> Self {
        self.xy_tolerance = tolerance;
        self
    }

    /// Adds a row with the next object id, returns that id.
    pub fn add(&mut self, shape: Option<Shape>, values: Vec<FieldValue>) -> i64 {
        let oid = self.next_oid;
        self.next_oid += 1;

        let oid_value = self.oid_field_name.as_ref().map(|_| oid);
        self.rows
            .push(Arc::new(Row::new(oid_value, shape.map(Arc::new), values)));
        oid
    }

    /// Number of `enum_rows` calls so far.
    pub fn query_count(&self) -> usize {
        self.query_count.get()
    }

    fn matches(&self, row: &Row, filter: &TableFilter, engine: &mut GeometryEngine) -> DataResult<bool> {
        if let Some(oid) = row.oid {
            if filter.excluded_oids.contains(&oid) {
                return Ok(false);
            }
        }

        let Some(spatial) = &filter.spatial else {
            return Ok(true);
        };

        let (Some(shape), Some(filter_envelope)) = (&row.shape, spatial.envelope()) else {
            return Ok(false);
        };

        let Some(row_envelope) = shape.envelope() else {
            return Ok(false);
        };

        let search_envelope = filter_envelope.expanded_by(self.xy_tolerance);
        if !search_envelope.intersects(&row_envelope) {
            return Ok(false);
        }

        if spatial.relation == SpatialRelation::EnvelopeIntersects {
            return Ok(true);
        }

        engine.set_source_geometry(Arc::clone(&spatial.shape));
        engine.set_target_geometry(Arc::clone(shape));
        engine
            .evaluate_relation(&spatial.relation)
            .map_err(|e| DataError::Query {
                table: self.name.clone(),
                message: e.to_string(),
            })
    }
}

impl ReadOnlyTable for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn oid_field_name(&self) -> Option<&str> {
        self.oid_field_name.as_deref()
    }

    fn fields(&self) -> &[Field] {
        &self.fields
    }

    fn xy_tolerance(&self) -> f64 {
        self.xy_tolerance
    }

    fn extent(&self) -> Option<Envelope> {
        self.rows
            .iter()
            .filter_map(|row| row.extent())
            .reduce(|a, b| a.union(&b))
    }

    fn has_geometry(&self) -> bool {
        self.fields
            .iter()
            .any(|field| field.field_type == FieldType::Geometry)
    }

    fn join_sources(&self) -> &[JoinSource] {
        &self.join_sources
    }

    fn enum_rows(&self, filter: &TableFilter, _recycle: bool) -> DataResult<RowCursor> {
        self.query_count.set(self.query_count.get() + 1);

        let mut engine = GeometryEngine::new();
        let mut result = Vec::new();

        for row in &self.rows {
            if !self.matches(row, filter, &mut engine)? {
                continue;
            }

            let stripped = !filter.include_blob_fields
                && row.values.iter().any(|value| matches!(value, FieldValue::Blob(_)));

            let row = match (stripped, filter.include_geometry) {
                (false, true) => Arc::clone(row),
                (true, true) => Arc::new(row.without_blobs()),
                (stripped, false) => {
                    let mut copy = if stripped { row.without_blobs() } else { (**row).clone() };
                    copy.shape = None;
                    Arc::new(copy)
                }
            };

            result.push(Ok(row));
        }

        Ok(Box::new(result.into_iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::data::filter::SpatialFilter;

    fn table() -> MemoryTable {
        let mut table = MemoryTable::new(
            "Roads",
            vec![
                Field::new("OBJECTID", FieldType::Oid),
                Field::new("SHAPE", FieldType::Geometry),
                Field::new("DATA", FieldType::Blob),
            ],
        );
        table.add(
            Some(Shape::from_envelope(&Envelope::new(0.0, 0.0, 10.0, 10.0))),
            vec![FieldValue::Null, FieldValue::Null, FieldValue::Blob(vec![1, 2, 3])],
        );
        table.add(
            Some(Shape::from_envelope(&Envelope::new(50.0, 50.0, 60.0, 60.0))),
            vec![FieldValue::Null, FieldValue::Null, FieldValue::Null],
        );
        table
    }

    fn collect(table: &MemoryTable, filter: &TableFilter) -> Vec<Arc<Row>> {
        table
            .enum_rows(filter, false)
            .unwrap()
            .collect::<DataResult<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn spatial_filter_and_exclusion() {
        let table = table();
        assert_eq!(table.extent(), Some(Envelope::new(0.0, 0.0, 60.0, 60.0)));

        let filter = TableFilter::spatial(SpatialFilter::envelope_intersects(&Envelope::new(
            5.0, 5.0, 55.0, 55.0,
        )));
        assert_eq!(collect(&table, &filter).len(), 2);

        let filter = filter.with_excluded_oids(vec![1]);
        let rows = collect(&table, &filter);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].oid, Some(2));
        assert_eq!(table.query_count(), 2);
    }

    #[test]
    fn blobs_are_stripped_unless_requested() {
        let table = table();

        let rows = collect(&table, &TableFilter::default());
        assert_eq!(rows[0].values[2], FieldValue::Null);

        let rows = collect(&table, &TableFilter::default().with_blob_fields(true));
        assert_eq!(rows[0].values[2], FieldValue::Blob(vec![1, 2, 3]));
    }

    #[test]
    fn joined_tables_have_no_oid() {
        let mut table = MemoryTable::joined(
            "Road_Name",
            vec![Field::new("Road.OBJECTID", FieldType::Integer)],
            vec![JoinSource::new("Road", "OBJECTID")],
        );
        table.add(None, vec![FieldValue::Integer(5)]);

        assert!(table.oid_field_name().is_none());
        assert_eq!(collect(&table, &TableFilter::default())[0].oid, None);
    }
}
