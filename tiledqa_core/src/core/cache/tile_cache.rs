use std::rc::Rc;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use log::{debug, warn};
use stopwatch::Stopwatch;

use crate::core::container::test::TestId;
use crate::core::data::{ReadOnlyTable, RowId, SpatialFilter, TableFilter, TableId};
use crate::core::error::Result;
use crate::core::geometry::{Envelope, GeometryEngine, Shape, SpatialRelation};
use crate::core::index::BoxTree;
use crate::core::tiling::tile_enum::Tile;

use super::cached_row::CachedRow;
use super::overlapping_features::OverlappingFeatures;
use super::query_filter_helper::QueryFilterHelper;

/// Settings for loading the rows of one table into the cache.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub tile_size: f64,
    pub where_clause: Option<String>,
    pub include_blob_fields: bool,
    /// Rows disjoint from this area are flagged and never dispatched.
    pub execute_area: Option<Arc<Shape>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Rows taken over from earlier tiles.
    pub previous: usize,
    /// Rows added by the query for this tile.
    pub added: usize,
    /// Large rows excluded from the query because they are already cached.
    pub excluded: usize,
}

struct BoxSelection {
    envelope: Envelope,
    selection: Option<Vec<Rc<CachedRow>>>,
}

struct CachedTable {
    xy_tolerance: f64,
    tree: BoxTree<Rc<CachedRow>>,
    rows: AHashMap<RowId, Rc<CachedRow>>,
    loaded_extent: Option<Envelope>,
    ignored: AHashMap<TestId, AHashSet<RowId>>,
    warned_outside: bool,
}

/// Per-table spatial caches for the current tile.
pub struct TileCache {
    tables: AHashMap<TableId, CachedTable>,
    run_box: Envelope,
    current_tile: Option<Envelope>,
    search_tolerance_from_to: AHashMap<(TableId, TableId), f64>,
    current_row: Option<(Option<TableId>, Envelope)>,
    current_row_neighbors: AHashMap<TableId, Option<BoxSelection>>,
    engine: GeometryEngine,
}

impl TileCache {
    pub fn new(run_box: Envelope, engine: GeometryEngine) -> Self {
        Self {
            tables: AHashMap::new(),
            run_box,
            current_tile: None,
            search_tolerance_from_to: AHashMap::new(),
            current_row: None,
            current_row_neighbors: AHashMap::new(),
            engine,
        }
    }

    pub fn add_table(&mut self, table: TableId, xy_tolerance: f64) {
        self.tables.insert(
            table,
            CachedTable {
                xy_tolerance,
                tree: BoxTree::new(),
                rows: AHashMap::new(),
                loaded_extent: None,
                ignored: AHashMap::new(),
                warned_outside: false,
            },
        );
    }

    /// Search tolerance used around a row of `from` when searching `to`.
    pub fn set_search_tolerance(&mut self, from: TableId, to: TableId, tolerance: f64) {
        let entry = self.search_tolerance_from_to.entry((from, to)).or_insert(0.0);
        if tolerance > *entry {
            *entry = tolerance;
        }
    }

    #[inline]
    pub fn is_cached(&self, table: TableId) -> bool {
        self.tables.contains_key(&table)
    }

    pub fn cached_tables(&self) -> Vec<TableId> {
        let mut tables: Vec<TableId> = self.tables.keys().copied().collect();
        tables.sort_unstable();
        tables
    }

    pub fn run_box(&self) -> &Envelope {
        &self.run_box
    }

    pub fn current_tile(&self) -> Option<&Envelope> {
        self.current_tile.as_ref()
    }

    pub fn set_current_tile(&mut self, tile: Envelope) {
        self.current_row_neighbors.clear();
        self.current_tile = Some(tile);
    }

    /// Sets the row currently handed to the tests. Searches within its
    /// tolerance box reuse one box tree lookup.
    pub fn set_current_row(&mut self, table: Option<TableId>, extent: Option<Envelope>) {
        self.current_row_neighbors.clear();
        self.current_row = extent.map(|extent| (table, extent));
    }

    pub fn loaded_extent(&self, table: TableId) -> Option<Envelope> {
        self.tables.get(&table).and_then(|cached| cached.loaded_extent)
    }

    /// Number of rows in the box trees of the current tile.
    pub fn cached_row_count(&self) -> usize {
        self.tables.values().map(|cached| cached.tree.len()).sum()
    }

    pub fn set_ignored_rows(&mut self, table: TableId, ignored: AHashMap<TestId, AHashSet<RowId>>) {
        if let Some(cached) = self.tables.get_mut(&table) {
            cached.ignored = ignored;
        }
    }

    /// Loads the rows of `table` intersecting the search box of `tile`,
    /// merged with the rows retained from earlier tiles.
    pub fn load_table(
        &mut self,
        table_id: TableId,
        table: &dyn ReadOnlyTable,
        tile: &Tile,
        tracker: &mut OverlappingFeatures,
        options: &LoadOptions,
    ) -> Result<LoadStats> {
        let mut stopwatch = Stopwatch::start_new();

        let Some(cached) = self.tables.get_mut(&table_id) else {
            return Ok(LoadStats::default());
        };

        // rows of the last tile that never got registered lose their unique id
        for row_id in cached.rows.keys() {
            tracker.release_unique_id(table_id, *row_id);
        }
        cached.rows.clear();
        cached.tree.clear();
        cached.warned_outside = false;

        let tolerance = tracker.search_tolerance(table_id);
        let load_box = tile.envelope.expanded_by(tolerance);

        let mut rows = tracker.get_overlapping_cached_rows(table_id, &tile.envelope);
        let previous = rows.len();

        let excluded_oids: Vec<i64> = rows
            .values()
            .filter(|row| row.has_payload())
            .filter(|row| {
                row.extent().is_some_and(|extent| {
                    extent.width() > options.tile_size || extent.height() > options.tile_size
                })
            })
            .filter_map(|row| row.oid())
            .collect();
        let excluded = excluded_oids.len();

        let relation = tile
            .filter
            .spatial
            .as_ref()
            .map_or(SpatialRelation::EnvelopeIntersects, |spatial| spatial.relation.clone());

        let filter = TableFilter::spatial(SpatialFilter::new(
            Arc::new(Shape::from_envelope(&load_box)),
            relation,
        ))
        .with_where_clause(options.where_clause.clone())
        .with_excluded_oids(excluded_oids)
        .with_blob_fields(options.include_blob_fields);

        let mut added = 0;
        for row in table.enum_rows(&filter, false)? {
            let row = row?;
            if row.extent().is_none() {
                continue;
            }

            let row_id = tracker.row_id_of(table_id, &row);

            if let Some(existing) = rows.get(&row_id) {
                existing.restore_payload(row);
                continue;
            }

            let cached_row = match tracker.find(table_id, row_id) {
                Some(existing) => {
                    existing.restore_payload(row);
                    existing
                }
                None => {
                    let cached_row = Rc::new(CachedRow::new(table_id, row_id, row));
                    cached_row.extent();
                    cached_row
                }
            };

            rows.insert(row_id, cached_row);
            added += 1;
        }

        let mut tree = BoxTree::with_extent(load_box);
        for row in rows.values() {
            let Some(extent) = row.extent() else {
                continue;
            };

            row.set_first_occurrence(&tile.envelope, &self.run_box);

            if let Some(area) = &options.execute_area {
                self.engine.set_source_geometry(Arc::clone(area));
                let disjoint = match row.shape() {
                    Some(shape) => {
                        self.engine.set_target_geometry(shape);
                        !self.engine.evaluate_relation(&SpatialRelation::Intersects)?
                    }
                    None => false,
                };
                row.set_disjoint_from_execute_area(disjoint);
            }

            tree.insert(extent, Rc::clone(row));
        }

        cached.tree = tree;
        cached.rows = rows;
        cached.loaded_extent = Some(load_box);

        stopwatch.stop();
        debug!(
            "{}: added {} rows to the previous {} rows in tile {} ({} large rows excluded, {} ms)",
            table.name(),
            added,
            previous,
            tile.envelope,
            excluded,
            stopwatch.elapsed_ms()
        );

        Ok(LoadStats {
            previous,
            added,
            excluded,
        })
    }

    /// Cached rows of `table` whose extent intersects `envelope`.
    pub fn enum_entries(&self, table: TableId, envelope: &Envelope) -> Vec<Rc<CachedRow>> {
        let Some(cached) = self.tables.get(&table) else {
            return Vec::new();
        };

        let mut rows: Vec<Rc<CachedRow>> = cached
            .tree
            .search(envelope)
            .map(|entry| Rc::clone(&entry.value))
            .collect();
        rows.sort_unstable_by_key(|row| row.row_id());
        rows
    }

    /// All cached rows of `table` matching the spatial filter and the helper
    /// options.
    ///
    /// Unless repeated rows are requested, rows already returned in an earlier
    /// tile are skipped when the searching geometry (`cache_geometry`, or the
    /// filter itself) reaches over the left or bottom border of the tile.
    pub fn search(
        &mut self,
        table: TableId,
        filter: &SpatialFilter,
        helper: &QueryFilterHelper,
        test: Option<TestId>,
        cache_geometry: Option<&Envelope>,
    ) -> Result<Vec<Rc<CachedRow>>> {
        let mut result = Vec::new();

        let Some(filter_envelope) = filter.envelope() else {
            return Ok(result);
        };
        let Some(tile) = self.current_tile else {
            return Ok(result);
        };

        let repeat_cached_rows = helper.repeat_cached_rows();

        if helper.for_network {
            if let Some((x, y)) = filter.shape.as_point() {
                let run = self.run_box;
                if (x <= tile.min_x && x > run.min_x)
                    || x > tile.max_x
                    || (y <= tile.min_y && y > run.min_y)
                    || y > tile.max_y
                {
                    return Ok(result);
                }
            }
        }

        let candidates = self.search_list(table, &filter_envelope);
        if candidates.is_empty() {
            return Ok(result);
        }

        let mut overlaps_left_tile = false;
        let mut overlaps_bottom_tile = false;
        if !repeat_cached_rows {
            let envelope = cache_geometry.copied().unwrap_or(filter_envelope);
            overlaps_left_tile = envelope.min_x < tile.min_x && envelope.min_x > self.run_box.min_x;
            overlaps_bottom_tile = envelope.min_y < tile.min_y && envelope.min_y > self.run_box.min_y;
        }

        let ignored = test.and_then(|test| {
            self.tables
                .get(&table)
                .and_then(|cached| cached.ignored.get(&test))
        });

        self.engine.set_source_geometry(Arc::clone(&filter.shape));

        for cached_row in candidates {
            if overlaps_left_tile && !cached_row.is_first_occurrence_x() {
                continue;
            }
            if overlaps_bottom_tile && !cached_row.is_first_occurrence_y() {
                continue;
            }
            if ignored.is_some_and(|ignored| ignored.contains(&cached_row.row_id())) {
                continue;
            }
            if helper.is_below_minimum_oid(cached_row.oid()) {
                continue;
            }

            let (Some(row), Some(shape)) = (cached_row.row(), cached_row.shape()) else {
                continue;
            };

            let mut matches_constraint = false;
            if helper.attribute_first {
                if !helper.matches_constraint(&row) {
                    continue;
                }
                matches_constraint = true;
            }

            self.engine.set_target_geometry(shape);
            if self.engine.evaluate_relation(&filter.relation)?
                && (matches_constraint || helper.matches_constraint(&row))
            {
                result.push(cached_row);
            }
        }

        Ok(result)
    }

    fn search_list(&mut self, table: TableId, filter_envelope: &Envelope) -> Vec<Rc<CachedRow>> {
        let tolerance_box = self.current_row_tolerance_box(table);

        let Some(cached) = self.tables.get_mut(&table) else {
            return Vec::new();
        };

        let search_box = filter_envelope.expanded_by(cached.xy_tolerance);

        if let Some(loaded) = cached.loaded_extent {
            if !loaded.contains(&search_box) && !cached.warned_outside {
                cached.warned_outside = true;
                warn!(
                    "Search box {} exceeds the loaded extent {} of table {}",
                    search_box, loaded, table
                );
            }
        }

        let selection = self
            .current_row_neighbors
            .entry(table)
            .or_insert_with(|| {
                tolerance_box.map(|envelope| BoxSelection {
                    envelope,
                    selection: None,
                })
            });

        let Some(selection) = selection.as_mut().filter(|s| s.envelope.contains(&search_box)) else {
            return cached
                .tree
                .search(&search_box)
                .map(|entry| Rc::clone(&entry.value))
                .collect();
        };

        let envelope = selection.envelope;
        let rows = selection.selection.get_or_insert_with(|| {
            cached
                .tree
                .search(&envelope)
                .map(|entry| Rc::clone(&entry.value))
                .collect()
        });

        if search_box.contains(&envelope) {
            return rows.clone();
        }

        rows.iter()
            .filter(|row| row.extent().is_some_and(|extent| extent.intersects(&search_box)))
            .cloned()
            .collect()
    }

    fn current_row_tolerance_box(&self, table: TableId) -> Option<Envelope> {
        let (from, extent) = self.current_row?;

        let Some(from) = from.filter(|from| self.tables.contains_key(from)) else {
            return Some(extent);
        };

        let xy_tolerance = self.tables.get(&table).map_or(0.0, |cached| cached.xy_tolerance);
        let search_tolerance = self
            .search_tolerance_from_to
            .get(&(from, table))
            .copied()
            .unwrap_or(0.0);

        Some(extent.expanded_by(xy_tolerance.max(search_tolerance)))
    }
}
