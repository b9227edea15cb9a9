use std::cell::{Cell, RefCell};
use std::sync::Arc;

use once_cell::unsync::OnceCell;

use crate::core::data::{Row, RowId, TableId};
use crate::core::geometry::{Envelope, Shape};

/// A row held by the tile cache.
///
/// Extent and point count survive `release_payload`, so a released row can
/// still take part in the cache bookkeeping until it is dropped for good.
#[derive(Debug)]
pub struct CachedRow {
    table: TableId,
    row_id: RowId,
    oid: Option<i64>,
    payload: RefCell<Option<Arc<Row>>>,
    extent: OnceCell<Option<Envelope>>,
    point_count: OnceCell<usize>,
    first_occurrence_x: Cell<bool>,
    first_occurrence_y: Cell<bool>,
    disjoint_from_execute_area: Cell<bool>,
}

impl CachedRow {
    pub fn new(table: TableId, row_id: RowId, row: Arc<Row>) -> Self {
        Self {
            table,
            row_id,
            oid: row.oid,
            payload: RefCell::new(Some(row)),
            extent: OnceCell::new(),
            point_count: OnceCell::new(),
            first_occurrence_x: Cell::new(true),
            first_occurrence_y: Cell::new(true),
            disjoint_from_execute_area: Cell::new(false),
        }
    }

    #[inline]
    pub fn table(&self) -> TableId {
        self.table
    }

    /// Object id, or the unique id for joined rows.
    #[inline]
    pub fn row_id(&self) -> RowId {
        self.row_id
    }

    #[inline]
    pub fn oid(&self) -> Option<i64> {
        self.oid
    }

    pub fn extent(&self) -> Option<Envelope> {
        *self.extent.get_or_init(|| {
            self.payload
                .borrow()
                .as_ref()
                .and_then(|row| row.extent())
        })
    }

    pub fn cached_point_count(&self) -> usize {
        *self.point_count.get_or_init(|| {
            self.payload
                .borrow()
                .as_ref()
                .map_or(0, |row| row.point_count())
        })
    }

    /// The row; `None` once the payload was released.
    pub fn row(&self) -> Option<Arc<Row>> {
        self.payload.borrow().clone()
    }

    pub fn shape(&self) -> Option<Arc<Shape>> {
        self.payload
            .borrow()
            .as_ref()
            .and_then(|row| row.shape.clone())
    }

    #[inline]
    pub fn has_payload(&self) -> bool {
        self.payload.borrow().is_some()
    }

    /// Drops the row payload, keeping identity and extent. Returns the number
    /// of points released.
    pub fn release_payload(&self) -> usize {
        // resolve before the payload is gone
        self.extent();
        let count = self.cached_point_count();

        match self.payload.borrow_mut().take() {
            Some(_) => count,
            None => 0,
        }
    }

    pub fn restore_payload(&self, row: Arc<Row>) {
        let mut payload = self.payload.borrow_mut();
        if payload.is_none() {
            *payload = Some(row);
        }
    }

    /// Recomputes the first-occurrence flags for `tile`: a row reaching left
    /// of (below) the tile was already cached in a previous tile, unless the
    /// tile lies on the left (bottom) border of the run.
    pub fn set_first_occurrence(&self, tile: &Envelope, run_box: &Envelope) {
        let Some(extent) = self.extent() else {
            return;
        };

        self.first_occurrence_x
            .set(!(extent.min_x < tile.min_x && tile.min_x > run_box.min_x));
        self.first_occurrence_y
            .set(!(extent.min_y < tile.min_y && tile.min_y > run_box.min_y));
    }

    #[inline]
    pub fn is_first_occurrence_x(&self) -> bool {
        self.first_occurrence_x.get()
    }

    #[inline]
    pub fn is_first_occurrence_y(&self) -> bool {
        self.first_occurrence_y.get()
    }

    #[inline]
    pub fn is_disjoint_from_execute_area(&self) -> bool {
        self.disjoint_from_execute_area.get()
    }

    pub fn set_disjoint_from_execute_area(&self, disjoint: bool) {
        self.disjoint_from_execute_area.set(disjoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cached(envelope: Envelope) -> CachedRow {
        let row = Row::new(Some(7), Some(Arc::new(Shape::from_envelope(&envelope))), vec![]);
        CachedRow::new(0, 7, Arc::new(row))
    }

    #[test]
    fn release_keeps_extent_and_count() {
        let row = cached(Envelope::new(0.0, 0.0, 10.0, 10.0));

        assert_eq!(row.release_payload(), 5);
        assert!(!row.has_payload());
        assert!(row.shape().is_none());
        assert_eq!(row.extent(), Some(Envelope::new(0.0, 0.0, 10.0, 10.0)));
        assert_eq!(row.cached_point_count(), 5);
        assert_eq!(row.release_payload(), 0);
    }

    #[test]
    fn first_occurrence_flags() {
        let run = Envelope::new(0.0, 0.0, 100.0, 100.0);
        let row = cached(Envelope::new(35.0, 35.0, 45.0, 45.0));

        row.set_first_occurrence(&Envelope::new(0.0, 0.0, 40.0, 40.0), &run);
        assert!(row.is_first_occurrence_x());
        assert!(row.is_first_occurrence_y());

        row.set_first_occurrence(&Envelope::new(40.0, 40.0, 80.0, 80.0), &run);
        assert!(!row.is_first_occurrence_x());
        assert!(!row.is_first_occurrence_y());

        row.set_first_occurrence(&Envelope::new(40.0, 0.0, 80.0, 40.0), &run);
        assert!(!row.is_first_occurrence_x());
        assert!(row.is_first_occurrence_y());
    }
}
