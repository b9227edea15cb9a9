use std::rc::Rc;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use itertools::Itertools;
use log::{debug, trace};
use smallvec::SmallVec;

use crate::configuration::Configuration;
use crate::core::cache::{CachedRow, LoadOptions, OverlappingFeatures, QueryFilterHelper, TileCache};
use crate::core::data::surface::surface_rows;
use crate::core::data::{
    ReadOnlyTable, Row, RowCursor, RowId, SpatialFilter, SurfaceId, SurfaceRow, SurfaceSource, TableFilter,
    TableId,
};
use crate::core::error::Result;
use crate::core::geometry::{Envelope, GeometryEngine, Shape, SpatialRelation};
use crate::core::identity::UniqueIdProvider;
use crate::core::tiling::{Tile, TileEnum};

use super::listener::ContainerListener;
use super::progress::{ProgressEvent, Step};
use super::test::{TestId, TestProfile, TestRow, TestSlot, TileInfo, TileState};

pub type TestSlots = SmallVec<[TestSlot; 4]>;

/// What the container has to do next.
#[derive(Debug)]
pub enum RowEnumEvent {
    BeginTile(TileInfo),
    Row { row: TestRow, tests: TestSlots },
    Surface { row: SurfaceRow, tests: TestSlots },
    CompleteTile(TileInfo),
}

enum Phase {
    Initial,
    BeginTile,
    CachedRows(std::vec::IntoIter<Rc<CachedRow>>),
    NonCachedRows { position: usize, cursor: Option<RowCursor> },
    SurfaceRows(std::vec::IntoIter<RowEnumEvent>),
    CompleteTile,
    Done,
}

pub(crate) fn geometry_engine(config: &Configuration) -> GeometryEngine {
    let mut engine = GeometryEngine::new();
    engine.set_envelope_intersects_always_true(config.envelope_intersects_always_true());
    engine.set_touches_clip_min_point_count(config.touches_clip_min_point_count());
    engine
}

fn is_outside(engine: &mut GeometryEngine, area: &Arc<Shape>, shape: Option<Arc<Shape>>) -> Result<bool> {
    let Some(shape) = shape else {
        return Ok(false);
    };
    engine.set_source_geometry(Arc::clone(area));
    engine.set_target_geometry(shape);
    Ok(!engine.evaluate_relation(&SpatialRelation::Intersects)?)
}

/// Produces, tile by tile, the rows to test together with the tests they
/// still have to be handed to.
///
/// Order within a tile: cached rows, streamed (non-cached) rows, surface rows.
pub struct TestRowEnum {
    tables: Vec<Arc<dyn ReadOnlyTable>>,
    surfaces: Vec<Arc<dyn SurfaceSource>>,
    profiles: Vec<TestProfile>,
    tests_per_table: AHashMap<TableId, TestSlots>,
    tests_per_surface: Vec<(SurfaceId, TestSlots)>,
    cached_tables: Vec<TableId>,
    non_cached_tables: Vec<TableId>,
    common_filter_expressions: AHashMap<TableId, String>,
    include_blob_fields: bool,
    tile_enum: TileEnum,
    execute_area: Option<Arc<Shape>>,
    cache: TileCache,
    tracker: OverlappingFeatures,
    engine: GeometryEngine,
    tile_index: usize,
    current_tile: Option<Tile>,
    area_covers_tile: Vec<bool>,
    row_counts: Option<AHashMap<TableId, (usize, usize)>>,
    tile_row_index: usize,
    tile_row_count: usize,
    /// Ids handed out for rows that may never get registered with the tracker.
    unregistered_ids: Vec<(TableId, RowId)>,
    phase: Phase,
}

impl TestRowEnum {
    pub(crate) fn new(
        config: &Configuration,
        tables: Vec<Arc<dyn ReadOnlyTable>>,
        surfaces: Vec<Arc<dyn SurfaceSource>>,
        profiles: Vec<TestProfile>,
        run_box: Option<Envelope>,
        execute_area: Option<Arc<Shape>>,
    ) -> Result<Self> {
        let mut tests_per_table: AHashMap<TableId, TestSlots> = AHashMap::new();
        let mut surface_slots: AHashMap<SurfaceId, TestSlots> = AHashMap::new();
        let mut cached: AHashSet<TableId> = AHashSet::new();

        for (test, profile) in profiles.iter().enumerate() {
            for (table_index, table) in profile.involved_tables.iter().enumerate() {
                if *table >= tables.len() {
                    continue;
                }
                tests_per_table
                    .entry(*table)
                    .or_default()
                    .push(TestSlot { test, table_index });
                if profile.queried.get(table_index).copied().unwrap_or(false) {
                    cached.insert(*table);
                }
            }
            for (table_index, surface) in profile.involved_surfaces.iter().enumerate() {
                if *surface >= surfaces.len() {
                    continue;
                }
                surface_slots
                    .entry(*surface)
                    .or_default()
                    .push(TestSlot { test, table_index });
            }
        }

        let cached_tables: Vec<TableId> = cached.into_iter().sorted().collect();
        let non_cached_tables: Vec<TableId> = tests_per_table
            .keys()
            .copied()
            .filter(|table| !cached_tables.contains(table))
            .sorted()
            .collect();
        let tests_per_surface: Vec<(SurfaceId, TestSlots)> = surface_slots
            .into_iter()
            .sorted_by_key(|(surface, _)| *surface)
            .collect();

        let nothing_to_do = tests_per_table.is_empty() && tests_per_surface.is_empty();

        let grids: Vec<_> = tests_per_surface
            .iter()
            .filter_map(|(surface, _)| surfaces[*surface].tiling())
            .collect();

        let run = run_box
            .filter(|_| !nothing_to_do)
            .unwrap_or(Envelope::from_point(0.0, 0.0));
        let tile_enum = TileEnum::new(run, config.tile_size(), &grids);

        let mut tracker = OverlappingFeatures::new(config.max_cached_point_count());
        for table in tests_per_table.keys() {
            tracker.register_table(*table, UniqueIdProvider::create(tables[*table].as_ref()));
        }

        let mut cache = TileCache::new(run, geometry_engine(config));
        for table in &cached_tables {
            cache.add_table(*table, tables[*table].xy_tolerance());
        }

        for profile in &profiles {
            for to in profile.involved_tables.iter().filter(|t| cached_tables.contains(t)) {
                tracker.adapt_search_tolerance(*to, profile.search_distance);

                let tolerance = tables[*to].xy_tolerance().max(profile.search_distance);
                for from in &profile.involved_tables {
                    cache.set_search_tolerance(*from, *to, tolerance);
                }
            }
        }

        let common_filter_expressions = if config.filter_expressions_use_db_syntax() {
            common_filter_expressions(&profiles, &tests_per_table)
        } else {
            AHashMap::new()
        };

        let mut row_enum = Self {
            tables,
            surfaces,
            area_covers_tile: vec![true; profiles.len()],
            profiles,
            tests_per_table,
            tests_per_surface,
            cached_tables,
            non_cached_tables,
            common_filter_expressions,
            include_blob_fields: config.include_blob_fields(),
            tile_enum,
            execute_area,
            cache,
            tracker,
            engine: geometry_engine(config),
            tile_index: 0,
            current_tile: None,
            row_counts: None,
            tile_row_index: 0,
            tile_row_count: 0,
            unregistered_ids: Vec::new(),
            phase: Phase::Initial,
        };

        if row_enum.tile_enum.test_run_envelope().is_none() {
            row_enum.phase = Phase::Done;
        } else if config.calculate_row_counts() {
            row_enum.row_counts = Some(row_enum.calculate_row_counts()?);
        }

        debug!(
            "{} cached tables, {} streamed tables, {} surfaces, {} tiles",
            row_enum.cached_tables.len(),
            row_enum.non_cached_tables.len(),
            row_enum.tests_per_surface.len(),
            row_enum.tile_enum.total_tile_count()
        );

        Ok(row_enum)
    }

    fn calculate_row_counts(&self) -> Result<AHashMap<TableId, (usize, usize)>> {
        let mut counts = AHashMap::new();
        let Some(run) = self.tile_enum.test_run_envelope() else {
            return Ok(counts);
        };

        for table_id in self.tests_per_table.keys() {
            let table = &self.tables[*table_id];
            let mut filter = if table.has_geometry() {
                TableFilter::spatial(SpatialFilter::envelope_intersects(&run))
            } else {
                TableFilter::default()
            };
            filter = filter
                .with_where_clause(self.common_filter_expressions.get(table_id).cloned())
                .with_geometry(false);

            counts.insert(*table_id, (0, table.row_count(&filter)?));
        }
        Ok(counts)
    }

    pub fn test_run_envelope(&self) -> Option<Envelope> {
        self.tile_enum.test_run_envelope()
    }

    pub fn total_tile_count(&self) -> usize {
        self.tile_enum.total_tile_count()
    }

    pub fn current_tile_extent(&self) -> Option<Envelope> {
        self.current_tile.as_ref().map(|tile| tile.envelope)
    }

    pub fn loaded_extent(&self, table: TableId) -> Option<Envelope> {
        self.cache.loaded_extent(table)
    }

    pub fn search_tolerance(&self, table: TableId) -> f64 {
        self.tracker.search_tolerance(table)
    }

    pub fn unique_id_provider(&self, table: TableId) -> Option<&UniqueIdProvider> {
        self.tracker.unique_id_provider(table)
    }

    pub fn table(&self, table: TableId) -> Option<&Arc<dyn ReadOnlyTable>> {
        self.tables.get(table)
    }

    /// Rows of `table` matching `filter`. Cached tables are searched in the
    /// tile cache, other tables are queried.
    pub fn search(
        &mut self,
        table: TableId,
        filter: &SpatialFilter,
        helper: &QueryFilterHelper,
        test: Option<TestId>,
        cache_geometry: Option<&Envelope>,
    ) -> Result<Vec<Rc<CachedRow>>> {
        if self.cache.is_cached(table) {
            return self.cache.search(table, filter, helper, test, cache_geometry);
        }

        let Some(source) = self.tables.get(table).cloned() else {
            return Ok(Vec::new());
        };

        let query = TableFilter::spatial(filter.clone()).with_blob_fields(self.include_blob_fields);

        let mut result = Vec::new();
        for row in source.enum_rows(&query, false)? {
            let row = row?;
            if helper.is_below_minimum_oid(row.oid) || !helper.matches_constraint(&row) {
                continue;
            }

            let row_id = self.tracker.row_id_of(table, &row);
            if row.oid.is_none() {
                self.unregistered_ids.push((table, row_id));
            }
            let cached = match self.tracker.find(table, row_id) {
                Some(cached) => {
                    cached.restore_payload(row);
                    cached
                }
                None => Rc::new(CachedRow::new(table, row_id, row)),
            };
            result.push(cached);
        }

        Ok(result)
    }

    pub(crate) fn next_event(&mut self, listener: &mut dyn ContainerListener) -> Result<Option<RowEnumEvent>> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Initial => {
                    self.phase = Phase::BeginTile;
                    if let Some(info) = self.tile_info(TileState::Initial) {
                        return Ok(Some(RowEnumEvent::CompleteTile(info)));
                    }
                }
                Phase::BeginTile => {
                    self.release_unregistered_ids();

                    let Some(tile) = self.tile_enum.tile_at(self.tile_index) else {
                        return Ok(None);
                    };

                    let rows = self.load_tile(tile, listener)?;
                    self.phase = Phase::CachedRows(rows.into_iter());

                    if let Some(info) = self.tile_info(TileState::Progressing) {
                        return Ok(Some(RowEnumEvent::BeginTile(info)));
                    }
                }
                Phase::CachedRows(mut rows) => {
                    while let Some(row) = rows.next() {
                        if let Some(event) = self.dispatch_cached(row)? {
                            self.phase = Phase::CachedRows(rows);
                            return Ok(Some(self.row_created(event, listener)));
                        }
                    }
                    self.phase = Phase::NonCachedRows {
                        position: 0,
                        cursor: None,
                    };
                }
                Phase::NonCachedRows { position, cursor } => {
                    if let Some(event) = self.next_non_cached(position, cursor)? {
                        return Ok(Some(self.row_created(event, listener)));
                    }
                }
                Phase::SurfaceRows(mut rows) => {
                    if let Some(event) = rows.next() {
                        self.phase = Phase::SurfaceRows(rows);
                        return Ok(Some(self.row_created(event, listener)));
                    }
                    self.phase = Phase::CompleteTile;
                }
                Phase::CompleteTile => {
                    self.cache.set_current_row(None, None);

                    let state = if self.tile_index + 1 < self.tile_enum.total_tile_count() {
                        TileState::Progressing
                    } else {
                        TileState::Final
                    };
                    let info = self.tile_info(state);

                    self.tile_index += 1;
                    self.phase = Phase::BeginTile;

                    if let Some(info) = info {
                        return Ok(Some(RowEnumEvent::CompleteTile(info)));
                    }
                }
                Phase::Done => return Ok(None),
            }
        }
    }

    /// Forgets the unique ids of the last tile's rows that were searched or
    /// streamed but never registered as tested.
    fn release_unregistered_ids(&mut self) {
        for (table, row_id) in self.unregistered_ids.drain(..) {
            self.tracker.release_unique_id(table, row_id);
        }
    }

    fn tile_info(&self, state: TileState) -> Option<TileInfo> {
        let test_run = self.tile_enum.test_run_envelope()?;
        let envelope = match state {
            TileState::Initial => self.tile_enum.initial_tile_envelope(),
            _ => self.current_tile_extent(),
        };

        Some(TileInfo {
            state,
            envelope,
            test_run,
            index: self.tile_index,
            total: self.tile_enum.total_tile_count(),
        })
    }

    fn row_created(&mut self, event: RowEnumEvent, listener: &mut dyn ContainerListener) -> RowEnumEvent {
        self.tile_row_index += 1;
        let total = self.tile_row_count.max(self.tile_row_index);
        listener.on_progress(
            &ProgressEvent::new(Step::TestRowCreated, self.tile_row_index, total)
                .with_tile(self.current_tile_extent(), self.tile_enum.test_run_envelope()),
        );
        event
    }

    /// Loads the cached tables for `tile`, returns the cached rows to dispatch.
    fn load_tile(&mut self, tile: Tile, listener: &mut dyn ContainerListener) -> Result<Vec<Rc<CachedRow>>> {
        let test_run = self.tile_enum.test_run_envelope();

        self.tracker.set_current_tile(&tile.envelope);
        self.cache.set_current_tile(tile.envelope);

        let tile_shape = tile
            .spatial_filter()
            .map(|filter| Arc::clone(&filter.shape))
            .unwrap_or_else(|| Arc::new(Shape::from_envelope(&tile.envelope)));

        for (test, profile) in self.profiles.iter().enumerate() {
            self.area_covers_tile[test] = match &profile.area_of_interest {
                None => true,
                Some(area) => {
                    self.engine.set_source_geometry(Arc::clone(area));
                    self.engine.set_target_geometry(Arc::clone(&tile_shape));
                    self.engine.evaluate_relation(&SpatialRelation::Contains)?
                }
            };
        }

        let options = LoadOptions {
            tile_size: self.tile_enum.tile_size(),
            where_clause: None,
            include_blob_fields: self.include_blob_fields,
            execute_area: self.execute_area.clone(),
        };

        let mut rows = Vec::new();
        for position in 0..self.cached_tables.len() {
            let table_id = self.cached_tables[position];
            let table = Arc::clone(&self.tables[table_id]);

            listener.on_progress(
                &ProgressEvent::new(Step::DataLoading, position, self.cached_tables.len())
                    .with_tile(Some(tile.envelope), test_run)
                    .with_message(table.name()),
            );

            let options = LoadOptions {
                where_clause: self.common_filter_expressions.get(&table_id).cloned(),
                ..options.clone()
            };
            let stats = self
                .cache
                .load_table(table_id, table.as_ref(), &tile, &mut self.tracker, &options)?;

            self.update_ignored_rows(table_id)?;

            let table_rows = self.cache.enum_entries(table_id, &tile.envelope);

            let (current, total) = match self.row_counts.as_mut().and_then(|c| c.get_mut(&table_id)) {
                Some((loaded, total)) => {
                    *loaded += stats.added;
                    (*loaded, *total)
                }
                None => (stats.previous + stats.added, stats.previous + stats.added),
            };
            listener.on_progress(
                &ProgressEvent::new(Step::DataLoaded, current, total)
                    .with_tile(Some(tile.envelope), test_run)
                    .with_message(table.name()),
            );

            rows.extend(table_rows);
        }

        self.tile_row_index = 0;
        self.tile_row_count = rows.len();
        self.current_tile = Some(tile);

        Ok(rows)
    }

    /// Rows outside the area of interest of a test are hidden from its searches.
    fn update_ignored_rows(&mut self, table: TableId) -> Result<()> {
        let mut ignored: AHashMap<TestId, AHashSet<RowId>> = AHashMap::new();

        let Some(loaded) = self.cache.loaded_extent(table) else {
            return Ok(());
        };
        let Some(slots) = self.tests_per_table.get(&table) else {
            return Ok(());
        };

        let rows = self.cache.enum_entries(table, &loaded);

        for test in slots.iter().map(|slot| slot.test).unique() {
            if self.area_covers_tile[test] {
                continue;
            }
            let Some(area) = &self.profiles[test].area_of_interest else {
                continue;
            };

            for row in &rows {
                if is_outside(&mut self.engine, area, row.shape())? {
                    ignored.entry(test).or_default().insert(row.row_id());
                }
            }
        }

        self.cache.set_ignored_rows(table, ignored);
        Ok(())
    }

    fn dispatch_cached(&mut self, row: Rc<CachedRow>) -> Result<Option<RowEnumEvent>> {
        if !self.tests_per_table.contains_key(&row.table()) {
            self.tracker.register_tested_feature(&row, None);
            return Ok(None);
        }

        if row.is_disjoint_from_execute_area() {
            return Ok(None);
        }

        let Some(payload) = row.row() else {
            return Ok(None);
        };

        self.dispatch(row, payload)
    }

    fn next_non_cached(&mut self, mut position: usize, mut cursor: Option<RowCursor>) -> Result<Option<RowEnumEvent>> {
        loop {
            let Some(table_id) = self.non_cached_tables.get(position).copied() else {
                let events = self.surface_events();
                self.phase = Phase::SurfaceRows(events.into_iter());
                return Ok(None);
            };

            if cursor.is_none() {
                let table = Arc::clone(&self.tables[table_id]);
                let filter = if table.has_geometry() {
                    self.current_tile
                        .as_ref()
                        .map_or_else(TableFilter::default, |tile| tile.filter.clone())
                } else if self.tile_index == 0 {
                    // rows without geometry are tested once, with the first tile
                    TableFilter::default()
                } else {
                    position += 1;
                    continue;
                };

                let filter = filter
                    .with_where_clause(self.common_filter_expressions.get(&table_id).cloned())
                    .with_blob_fields(self.include_blob_fields);

                cursor = Some(table.enum_rows(&filter, true)?);
            }

            let Some(rows) = cursor.as_mut() else {
                continue;
            };

            match rows.next() {
                Some(row) => {
                    let row = row?;
                    if let Some(event) = self.dispatch_non_cached(table_id, row)? {
                        self.phase = Phase::NonCachedRows { position, cursor };
                        return Ok(Some(event));
                    }
                }
                None => {
                    cursor = None;
                    position += 1;
                }
            }
        }
    }

    fn dispatch_non_cached(&mut self, table: TableId, row: Arc<Row>) -> Result<Option<RowEnumEvent>> {
        let row_id = self.tracker.row_id_of(table, &row);
        if row.oid.is_none() {
            self.unregistered_ids.push((table, row_id));
        }

        if row.extent().is_none() {
            let tests: TestSlots = self
                .tests_per_table
                .get(&table)
                .map(|slots| {
                    slots
                        .iter()
                        .filter(|slot| self.matches_constraint(slot, &row))
                        .copied()
                        .collect()
                })
                .unwrap_or_default();
            if tests.is_empty() {
                return Ok(None);
            }

            trace!("Row {} of table {} without geometry", row_id, table);
            return Ok(Some(RowEnumEvent::Row {
                row: TestRow {
                    table,
                    row_id,
                    row,
                    extent: None,
                },
                tests,
            }));
        }

        if let Some(area) = &self.execute_area {
            if is_outside(&mut self.engine, area, row.shape.clone())? {
                return Ok(None);
            }
        }

        let cached = match self.tracker.find(table, row_id) {
            Some(cached) => {
                cached.restore_payload(Arc::clone(&row));
                cached
            }
            None => Rc::new(CachedRow::new(table, row_id, Arc::clone(&row))),
        };

        self.dispatch(cached, row)
    }

    /// Registers `row` with the tests still applicable to it. Returns the
    /// event if any test remains.
    fn dispatch(&mut self, row: Rc<CachedRow>, payload: Arc<Row>) -> Result<Option<RowEnumEvent>> {
        let table = row.table();
        let slots = self.tests_per_table.get(&table).cloned().unwrap_or_default();

        let mut reached = TestSlots::new();
        for slot in &slots {
            if self.is_applicable(slot.test, &row, &payload)? {
                reached.push(*slot);
            }
        }

        // a row failing the constraint of a test counts as tested by it
        if reached.len() == slots.len() {
            self.tracker.register_tested_feature(&row, None);
        } else {
            let tests: SmallVec<[TestId; 8]> = reached.iter().map(|slot| slot.test).unique().collect();
            self.tracker.register_tested_feature(&row, Some(tests.as_slice()));
        }

        let applicable: TestSlots = reached
            .into_iter()
            .filter(|slot| self.matches_constraint(slot, &payload))
            .collect();

        if applicable.is_empty() {
            trace!("Row {} of table {} has no test left", row.row_id(), table);
            return Ok(None);
        }

        self.cache.set_current_row(Some(table), row.extent());

        Ok(Some(RowEnumEvent::Row {
            row: TestRow {
                table,
                row_id: row.row_id(),
                row: payload,
                extent: row.extent(),
            },
            tests: applicable,
        }))
    }

    fn is_applicable(&mut self, test: TestId, row: &CachedRow, payload: &Row) -> Result<bool> {
        let profile = &self.profiles[test];

        if let Some(area) = &profile.area_of_interest {
            if !self.area_covers_tile[test] && is_outside(&mut self.engine, area, payload.shape.clone())? {
                return Ok(false);
            }
        }

        let fully_tested =
            self.tracker.was_already_tested(row.table(), row.row_id(), test) && !profile.retests(row.table());

        Ok(!fully_tested)
    }

    fn matches_constraint(&self, slot: &TestSlot, row: &Row) -> bool {
        self.profiles[slot.test]
            .constraints
            .get(slot.table_index)
            .and_then(|constraint| constraint.as_ref())
            .is_none_or(|constraint| constraint.matches(row))
    }

    fn surface_events(&self) -> Vec<RowEnumEvent> {
        let (Some(tile), Some(run)) = (self.current_tile_extent(), self.tile_enum.test_run_envelope()) else {
            return Vec::new();
        };

        self.tests_per_surface
            .iter()
            .flat_map(|(surface, tests)| {
                surface_rows(*surface, self.surfaces[*surface].as_ref(), &tile, &run)
                    .into_iter()
                    .map(|row| RowEnumEvent::Surface {
                        row,
                        tests: tests.clone(),
                    })
            })
            .collect()
    }
}

/// The constraint expression shared by all tests of a table, if there is one.
fn common_filter_expressions(
    profiles: &[TestProfile],
    tests_per_table: &AHashMap<TableId, TestSlots>,
) -> AHashMap<TableId, String> {
    let mut result = AHashMap::new();

    for (table, slots) in tests_per_table {
        let expressions: Option<Vec<String>> = slots
            .iter()
            .map(|slot| {
                profiles[slot.test]
                    .constraints
                    .get(slot.table_index)
                    .and_then(|constraint| constraint.as_ref())
                    .map(|constraint| constraint.expression().trim().to_string())
            })
            .collect();

        let Some(expressions) = expressions else {
            continue;
        };

        if let Some(first) = expressions.first() {
            if !first.is_empty() && expressions.iter().all_equal() {
                result.insert(*table, first.clone());
            }
        }
    }

    result
}
