use std::rc::Rc;

use ahash::AHashMap;
use log::{debug, trace};
use smallvec::SmallVec;

use crate::core::container::test::TestId;
use crate::core::data::{Row, RowId, TableId};
use crate::core::geometry::Envelope;
use crate::core::identity::UniqueIdProvider;

use super::cached_row::CachedRow;

/// A cached row with the tests it was already handed to.
#[derive(Debug)]
pub struct TestedRow {
    row: Rc<CachedRow>,
    /// `None`: all tests were applied.
    tested: Option<SmallVec<[TestId; 8]>>,
}

impl TestedRow {
    fn new(row: Rc<CachedRow>, reduced_tests: Option<&[TestId]>) -> Self {
        Self {
            row,
            tested: reduced_tests.map(|tests| tests.iter().copied().collect()),
        }
    }

    pub fn row(&self) -> &Rc<CachedRow> {
        &self.row
    }

    /// The most permissive state wins.
    fn merge(&mut self, reduced_tests: Option<&[TestId]>) {
        match (&mut self.tested, reduced_tests) {
            (None, _) => {}
            (Some(_), None) => self.tested = None,
            (Some(tested), Some(reduced)) => {
                for test in reduced {
                    if !tested.contains(test) {
                        tested.push(*test);
                    }
                }
            }
        }
    }

    pub fn was_tested(&self, test: TestId) -> bool {
        match &self.tested {
            None => true,
            Some(tested) => tested.contains(&test),
        }
    }
}

#[derive(Debug, Default)]
struct TableOverlaps {
    search_tolerance: f64,
    rows: AHashMap<RowId, TestedRow>,
    unique_ids: Option<UniqueIdProvider>,
}

/// Tracks which rows were already tested and which must stay cached because a
/// later tile can still reach them.
///
/// Tiles are processed left to right, then bottom to top.
#[derive(Debug)]
pub struct OverlappingFeatures {
    tables: AHashMap<TableId, TableOverlaps>,
    max_cached_point_count: i64,
    current_cached_point_count: i64,
    next_anonymous_id: RowId,
}

impl OverlappingFeatures {
    /// `max_cached_point_count < 0` means unlimited.
    pub fn new(max_cached_point_count: i64) -> Self {
        Self {
            tables: AHashMap::new(),
            max_cached_point_count,
            current_cached_point_count: 0,
            next_anonymous_id: -1,
        }
    }

    pub fn register_table(&mut self, table: TableId, unique_ids: Option<UniqueIdProvider>) {
        let entry = self.tables.entry(table).or_default();
        if unique_ids.is_some() {
            entry.unique_ids = unique_ids;
        }
    }

    /// Keeps the largest search tolerance requested for `table`.
    pub fn adapt_search_tolerance(&mut self, table: TableId, search_tolerance: f64) {
        let entry = self.tables.entry(table).or_default();
        if search_tolerance > entry.search_tolerance {
            entry.search_tolerance = search_tolerance;
        }
    }

    pub fn search_tolerance(&self, table: TableId) -> f64 {
        self.tables
            .get(&table)
            .map_or(0.0, |entry| entry.search_tolerance)
    }

    pub fn unique_id_provider(&self, table: TableId) -> Option<&UniqueIdProvider> {
        self.tables
            .get(&table)
            .and_then(|entry| entry.unique_ids.as_ref())
    }

    /// Identity of `row`: its object id, or its unique id for joined tables.
    /// Rows without any key get a fresh negative id on every call.
    pub fn row_id_of(&mut self, table: TableId, row: &Row) -> RowId {
        if let Some(oid) = row.oid {
            return oid;
        }

        if let Some(provider) = self
            .tables
            .get_mut(&table)
            .and_then(|entry| entry.unique_ids.as_mut())
        {
            return provider.get_unique_id(row);
        }

        let id = self.next_anonymous_id;
        self.next_anonymous_id -= 1;
        id
    }

    /// Forgets the unique id of a row that never got registered.
    pub fn release_unique_id(&mut self, table: TableId, row_id: RowId) {
        if let Some(entry) = self.tables.get_mut(&table) {
            if entry.rows.contains_key(&row_id) {
                return;
            }
            if let Some(provider) = entry.unique_ids.as_mut() {
                provider.remove(row_id);
            }
        }
    }

    pub fn register_tested_feature(&mut self, row: &Rc<CachedRow>, reduced_tests: Option<&[TestId]>) {
        let entry = self.tables.entry(row.table()).or_default();

        match entry.rows.get_mut(&row.row_id()) {
            Some(tested) => tested.merge(reduced_tests),
            None => {
                entry
                    .rows
                    .insert(row.row_id(), TestedRow::new(Rc::clone(row), reduced_tests));
            }
        }
    }

    /// True if any earlier occurrence of the row was handed to `test`.
    pub fn was_already_tested(&self, table: TableId, row_id: RowId, test: TestId) -> bool {
        self.tables
            .get(&table)
            .and_then(|entry| entry.rows.get(&row_id))
            .is_some_and(|tested| tested.was_tested(test))
    }

    pub fn find(&self, table: TableId, row_id: RowId) -> Option<Rc<CachedRow>> {
        self.tables
            .get(&table)
            .and_then(|entry| entry.rows.get(&row_id))
            .map(|tested| Rc::clone(&tested.row))
    }

    /// True once no tile from `tile` on can reach `extent` with its search box.
    ///
    /// Rows below the search box are done. Rows left of it are done unless
    /// they still reach into the search band of the next tile row.
    pub fn has_no_remaining_occurrence(extent: &Envelope, tile: &Envelope, search_tolerance: f64) -> bool {
        let search_box = tile.expanded_by(search_tolerance);

        if extent.max_y < search_box.min_y {
            return true;
        }

        extent.max_x < search_box.min_x && extent.max_y < tile.max_y - search_tolerance
    }

    /// Drops rows no remaining tile can reach, then applies the point budget
    /// to rows kept outside of the current search box. Returns the number of
    /// dropped rows.
    pub fn set_current_tile(&mut self, tile: &Envelope) -> usize {
        let mut dropped = 0;
        let mut kept_points: i64 = 0;
        let mut released = 0;

        let mut table_ids: Vec<TableId> = self.tables.keys().copied().collect();
        table_ids.sort_unstable();

        for table in table_ids {
            let Some(entry) = self.tables.get_mut(&table) else {
                continue;
            };

            let tolerance = entry.search_tolerance;
            let search_box = tile.expanded_by(tolerance);

            let mut removed_ids = Vec::new();
            entry.rows.retain(|row_id, tested| {
                let keep = match tested.row.extent() {
                    Some(extent) => !Self::has_no_remaining_occurrence(&extent, tile, tolerance),
                    None => false,
                };
                if !keep {
                    removed_ids.push(*row_id);
                }
                keep
            });

            dropped += removed_ids.len();
            if let Some(provider) = entry.unique_ids.as_mut() {
                for id in &removed_ids {
                    provider.remove(*id);
                }
            }

            let mut waiting: Vec<&TestedRow> = entry
                .rows
                .values()
                .filter(|tested| tested.row.has_payload())
                .filter(|tested| {
                    tested
                        .row
                        .extent()
                        .is_some_and(|extent| !extent.intersects(&search_box))
                })
                .collect();
            waiting.sort_unstable_by_key(|tested| tested.row.row_id());

            for tested in waiting {
                let points = tested.row.cached_point_count() as i64;
                if self.max_cached_point_count < 0
                    || kept_points + points <= self.max_cached_point_count
                {
                    kept_points += points;
                } else {
                    tested.row.release_payload();
                    released += 1;
                }
            }
        }

        self.current_cached_point_count = kept_points;

        if dropped > 0 || released > 0 {
            debug!(
                "Tile {}: dropped {} cached rows, released {} payloads, keeping {} points",
                tile, dropped, released, kept_points
            );
        }

        dropped
    }

    /// Previously registered rows whose extent intersects the search box of
    /// `tile` for `table`.
    pub fn get_overlapping_cached_rows(&self, table: TableId, tile: &Envelope) -> AHashMap<RowId, Rc<CachedRow>> {
        let Some(entry) = self.tables.get(&table) else {
            return AHashMap::new();
        };

        let search_box = tile.expanded_by(entry.search_tolerance);
        let result: AHashMap<RowId, Rc<CachedRow>> = entry
            .rows
            .iter()
            .filter(|(_, tested)| {
                tested
                    .row
                    .extent()
                    .is_some_and(|extent| extent.intersects(&search_box))
            })
            .map(|(row_id, tested)| (*row_id, Rc::clone(&tested.row)))
            .collect();

        trace!("{} overlapping rows of table {} for {}", result.len(), table, tile);
        result
    }

    /// Points of rows kept between tiles while holding their payload.
    pub fn current_cached_point_count(&self) -> i64 {
        self.current_cached_point_count
    }

    pub fn max_cached_point_count(&self) -> i64 {
        self.max_cached_point_count
    }

    pub fn tracked_row_count(&self) -> usize {
        self.tables.values().map(|entry| entry.rows.len()).sum()
    }
}

#[cfg(test)]
mod overlapping_features_tests {
    include!("overlapping_features_tests.rs");
}
