use std::rc::Rc;
use std::sync::Arc;

use crate::core::cache::{CachedRow, QueryFilterHelper};
use crate::core::data::{InvolvedRow, ReadOnlyTable, RowId, SpatialFilter, TableFilter, TableId};
use crate::core::error::Result;
use crate::core::geometry::{Envelope, Shape};
use crate::core::identity::UniqueIdProvider;

use super::error_admin::QaError;
use super::test::{TestId, TestRow};
use super::test_row_enum::TestRowEnum;

/// Access to the data of the current tile, handed to every test call.
///
/// Errors reported through the context are routed to the listener after the
/// call returned.
pub struct TestContext<'a> {
    test: TestId,
    test_name: &'a str,
    tables: &'a [Arc<dyn ReadOnlyTable>],
    data: Option<&'a mut TestRowEnum>,
    current_row: Option<Envelope>,
    include_blob_fields: bool,
    reported: Vec<QaError>,
    clear_request: Option<(f64, f64)>,
    next_anonymous_id: RowId,
}

impl<'a> TestContext<'a> {
    pub(crate) fn new(
        test: TestId,
        test_name: &'a str,
        tables: &'a [Arc<dyn ReadOnlyTable>],
        data: Option<&'a mut TestRowEnum>,
    ) -> Self {
        Self {
            test,
            test_name,
            tables,
            data,
            current_row: None,
            include_blob_fields: false,
            reported: Vec::new(),
            clear_request: None,
            next_anonymous_id: -1,
        }
    }

    pub(crate) fn with_current_row(mut self, extent: Option<Envelope>) -> Self {
        self.current_row = extent;
        self
    }

    pub(crate) fn with_blob_fields(mut self, include: bool) -> Self {
        self.include_blob_fields = include;
        self
    }

    /// Reported errors and the last `clear_errors` request.
    pub(crate) fn finish(self) -> (Vec<QaError>, Option<(f64, f64)>) {
        (self.reported, self.clear_request)
    }

    #[inline]
    pub fn test(&self) -> TestId {
        self.test
    }

    pub fn table(&self, table: TableId) -> Option<&dyn ReadOnlyTable> {
        self.tables.get(table).map(|table| table.as_ref())
    }

    /// Rows of `table` matching `filter` and `helper`.
    ///
    /// During a tile, queried tables are searched in the tile cache; rows
    /// already returned for an earlier tile are skipped unless
    /// `helper.repeat_cached_rows()`.
    pub fn search(
        &mut self,
        table: TableId,
        filter: &SpatialFilter,
        helper: &QueryFilterHelper,
    ) -> Result<Vec<Rc<CachedRow>>> {
        if let Some(data) = self.data.as_deref_mut() {
            return data.search(table, filter, helper, Some(self.test), self.current_row.as_ref());
        }

        let Some(source) = self.tables.get(table) else {
            return Ok(Vec::new());
        };

        let query = TableFilter::spatial(filter.clone()).with_blob_fields(self.include_blob_fields);

        let mut result = Vec::new();
        for row in source.enum_rows(&query, false)? {
            let row = row?;
            if helper.is_below_minimum_oid(row.oid) || !helper.matches_constraint(&row) {
                continue;
            }

            let row_id = row.oid.unwrap_or_else(|| {
                let id = self.next_anonymous_id;
                self.next_anonymous_id -= 1;
                id
            });
            result.push(Rc::new(CachedRow::new(table, row_id, row)));
        }
        Ok(result)
    }

    /// Reports an error of the executing test.
    pub fn report_error(
        &mut self,
        message: impl Into<String>,
        involved_rows: Vec<InvolvedRow>,
        geometry: Option<Arc<Shape>>,
    ) {
        self.reported.push(QaError::new(
            self.test,
            self.test_name,
            message,
            involved_rows,
            geometry,
        ));
    }

    /// Number of errors reported so far in this call.
    pub fn reported_count(&self) -> usize {
        self.reported.len()
    }

    pub fn current_tile_extent(&self) -> Option<Envelope> {
        self.data.as_ref().and_then(|data| data.current_tile_extent())
    }

    pub fn test_run_extent(&self) -> Option<Envelope> {
        self.data.as_ref().and_then(|data| data.test_run_envelope())
    }

    /// Extent loaded into the cache for `table` in the current tile.
    pub fn loaded_extent(&self, table: TableId) -> Option<Envelope> {
        self.data.as_ref().and_then(|data| data.loaded_extent(table))
    }

    pub fn search_tolerance(&self, table: TableId) -> f64 {
        self.data.as_ref().map_or(0.0, |data| data.search_tolerance(table))
    }

    pub fn unique_id_provider(&self, table: TableId) -> Option<&UniqueIdProvider> {
        self.data.as_deref().and_then(|data| data.unique_id_provider(table))
    }

    /// The base rows behind `row_id`: the row itself for tables with object
    /// ids, the contributing rows for joined tables.
    pub fn involved_rows(&self, table: TableId, row_id: RowId) -> Vec<InvolvedRow> {
        let Some(source) = self.tables.get(table) else {
            return Vec::new();
        };

        if source.oid_field_name().is_some() {
            return vec![InvolvedRow::new(source.name(), row_id)];
        }

        self.unique_id_provider(table)
            .map(|provider| provider.get_involved_rows(row_id))
            .unwrap_or_default()
    }

    pub fn involved_rows_of(&self, row: &TestRow) -> Vec<InvolvedRow> {
        self.involved_rows(row.table, row.row_id)
    }

    /// Errors lying completely left of `x_max` and below `y_max` can no longer
    /// be reported again; they are dropped from duplicate detection.
    pub fn clear_errors(&mut self, x_max: f64, y_max: f64) {
        self.clear_request = Some((x_max, y_max));
    }
}
