use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::AHashSet;
use itertools::Itertools;
use log::{debug, error, info, trace, warn};
use stopwatch::Stopwatch;

use crate::configuration::Configuration;
use crate::core::data::{InvolvedRow, ReadOnlyTable, RowId, SurfaceId, SurfaceRow, SurfaceSource, TableId};
use crate::core::error::{ContainerError, DataError, FailureContext, Result, TestFailure};
use crate::core::geometry::{Envelope, Shape};

use super::context::TestContext;
use super::error_admin::{QaError, QaErrorAdministrator};
use super::listener::{ContainerListener, ErrorDisposition};
use super::progress::{ProgressEvent, Step};
use super::test::{ContainerTest, NonContainerTest, TestId, TestProfile, TestRow, TestSlot, TileInfo, TileState};
use super::test_row_enum::{RowEnumEvent, TestRowEnum};

/// The area a run is restricted to.
#[derive(Debug, Clone, Default)]
pub enum ExecuteScope {
    /// The combined extent of all involved tables and surfaces.
    #[default]
    Full,
    Envelope(Envelope),
    /// Rows disjoint from the polygon are not tested.
    Polygon(Arc<Shape>),
}

impl ExecuteScope {
    pub fn polygon(shape: Shape) -> Self {
        ExecuteScope::Polygon(Arc::new(shape))
    }

    /// `None` for a full scan.
    pub fn envelope(&self) -> Option<Envelope> {
        match self {
            ExecuteScope::Full => None,
            ExecuteScope::Envelope(envelope) => Some(*envelope),
            ExecuteScope::Polygon(shape) => shape.envelope(),
        }
    }

    pub fn area(&self) -> Option<&Arc<Shape>> {
        match self {
            ExecuteScope::Polygon(shape) => Some(shape),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Idle,
    Preparing,
    Loading,
    BeginTile,
    ProcessingRows,
    CompleteTile,
    Completed,
}

/// Cooperative cancellation of a running test run. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// Reported errors, without duplicates and cancelled errors.
    pub error_count: usize,
    pub cancelled_error_count: usize,
    /// Tests excluded from the run after failing.
    pub failed_tests: Vec<String>,
    pub tile_count: usize,
    pub row_count: usize,
    pub cancelled: bool,
}

impl fmt::Display for ExecutionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} errors ({} cancelled), {} rows tested in {} tiles",
            self.error_count, self.cancelled_error_count, self.row_count, self.tile_count
        )?;
        if !self.failed_tests.is_empty() {
            write!(f, ", failed tests: {}", self.failed_tests.join(", "))?;
        }
        if self.cancelled {
            write!(f, ", run cancelled")?;
        }
        Ok(())
    }
}

enum RegisteredTest {
    Container(Box<dyn ContainerTest>),
    NonContainer(Box<dyn NonContainerTest>),
}

impl RegisteredTest {
    fn name(&self) -> &str {
        match self {
            RegisteredTest::Container(test) => test.name(),
            RegisteredTest::NonContainer(test) => test.name(),
        }
    }
}

/// Runs data quality tests tile by tile over a set of tables and surfaces.
///
/// Non-container tests run first, once each. Container tests then get every
/// applicable row exactly once (unless they ask for a retest per tile), with
/// the rows of the tables they search cached per tile.
pub struct TestContainer {
    config: Configuration,
    tables: Vec<Arc<dyn ReadOnlyTable>>,
    surfaces: Vec<Arc<dyn SurfaceSource>>,
    tests: Vec<RegisteredTest>,
    cancellation: CancellationToken,
    state: ContainerState,
}

impl TestContainer {
    pub fn new(config: Configuration) -> Self {
        Self {
            config,
            tables: Vec::new(),
            surfaces: Vec::new(),
            tests: Vec::new(),
            cancellation: CancellationToken::default(),
            state: ContainerState::Idle,
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    pub fn add_table(&mut self, table: Arc<dyn ReadOnlyTable>) -> TableId {
        self.tables.push(table);
        self.tables.len() - 1
    }

    pub fn add_surface(&mut self, surface: Arc<dyn SurfaceSource>) -> SurfaceId {
        self.surfaces.push(surface);
        self.surfaces.len() - 1
    }

    /// Registers a tiled test. Its tables and surfaces must be added first.
    pub fn add_test(&mut self, test: impl ContainerTest + 'static) -> Result<TestId> {
        if let Some(table) = test.involved_tables().iter().find(|table| **table >= self.tables.len()) {
            return Err(ContainerError::Configuration(format!(
                "Test '{}' involves unknown table {}",
                test.name(),
                table
            )));
        }
        if let Some(surface) = test
            .involved_surfaces()
            .iter()
            .find(|surface| **surface >= self.surfaces.len())
        {
            return Err(ContainerError::Configuration(format!(
                "Test '{}' involves unknown surface {}",
                test.name(),
                surface
            )));
        }

        self.tests.push(RegisteredTest::Container(Box::new(test)));
        Ok(self.tests.len() - 1)
    }

    pub fn add_non_container_test(&mut self, test: impl NonContainerTest + 'static) -> TestId {
        self.tests.push(RegisteredTest::NonContainer(Box::new(test)));
        self.tests.len() - 1
    }

    pub fn table(&self, table: TableId) -> Option<&Arc<dyn ReadOnlyTable>> {
        self.tables.get(table)
    }

    pub fn test_count(&self) -> usize {
        self.tests.len()
    }

    pub fn test_name(&self, test: TestId) -> Option<&str> {
        self.tests.get(test).map(RegisteredTest::name)
    }

    /// Token to stop a run from a listener or another thread. The flag is
    /// reset when a run starts.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// Executes all tests within `scope`, reporting errors and progress to
    /// `listener`.
    pub fn execute(&mut self, scope: ExecuteScope, listener: &mut dyn ContainerListener) -> Result<ExecutionSummary> {
        self.config.validate()?;
        self.cancellation.reset();
        self.state = ContainerState::Preparing;

        let mut stopwatch = Stopwatch::start_new();
        info!(
            "Executing {} tests on {} tables and {} surfaces",
            self.tests.len(),
            self.tables.len(),
            self.surfaces.len()
        );

        let result = {
            let mut execution = Execution::new(self, listener);
            execution.run(&scope).map(|()| execution.summary())
        };

        stopwatch.stop();

        match &result {
            Ok(summary) => {
                self.state = ContainerState::Completed;
                info!("Test run finished in {} ms: {}", stopwatch.elapsed_ms(), summary);
            }
            Err(e) => {
                self.state = ContainerState::Idle;
                error!("Test run failed after {} ms: {}", stopwatch.elapsed_ms(), e);
            }
        }

        result
    }
}

/// Where a test call happened, for failure reports.
struct CallSite {
    context: FailureContext,
    row: Option<(TableId, RowId)>,
    involved_rows: Vec<InvolvedRow>,
    geometry: Option<Arc<Shape>>,
}

impl CallSite {
    fn run() -> Self {
        Self {
            context: FailureContext::Run,
            row: None,
            involved_rows: Vec::new(),
            geometry: None,
        }
    }

    fn tile(envelope: Option<Envelope>) -> Self {
        Self {
            context: envelope.map_or(FailureContext::Run, FailureContext::Tile),
            ..Self::run()
        }
    }
}

/// State of one run. Borrows the registry of the container.
struct Execution<'a> {
    config: &'a Configuration,
    tables: &'a [Arc<dyn ReadOnlyTable>],
    surfaces: &'a [Arc<dyn SurfaceSource>],
    tests: &'a mut [RegisteredTest],
    names: Vec<String>,
    cancellation: &'a CancellationToken,
    state: &'a mut ContainerState,
    listener: &'a mut dyn ContainerListener,
    admin: QaErrorAdministrator,
    total_errors: usize,
    cancelled_errors: usize,
    failed: Vec<bool>,
    failed_rows: AHashSet<(TestId, TableId, RowId)>,
    tile_count: usize,
    row_count: usize,
}

impl<'a> Execution<'a> {
    fn new(container: &'a mut TestContainer, listener: &'a mut dyn ContainerListener) -> Self {
        let TestContainer {
            config,
            tables,
            surfaces,
            tests,
            cancellation,
            state,
        } = container;

        let names = tests.iter().map(|test| test.name().to_string()).collect();
        let failed = vec![false; tests.len()];

        Self {
            admin: QaErrorAdministrator::new(config.keep_error_geometry()),
            config: &*config,
            tables: tables.as_slice(),
            surfaces: surfaces.as_slice(),
            tests: tests.as_mut_slice(),
            names,
            cancellation: &*cancellation,
            state,
            listener,
            total_errors: 0,
            cancelled_errors: 0,
            failed,
            failed_rows: AHashSet::new(),
            tile_count: 0,
            row_count: 0,
        }
    }

    fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            error_count: self.total_errors - self.cancelled_errors,
            cancelled_error_count: self.cancelled_errors,
            failed_tests: self
                .failed
                .iter()
                .zip(&self.names)
                .filter(|(failed, _)| **failed)
                .map(|(_, name)| name.clone())
                .collect(),
            tile_count: self.tile_count,
            row_count: self.row_count,
            cancelled: self.cancellation.is_cancelled(),
        }
    }

    fn set_state(&mut self, state: ContainerState) {
        if *self.state != state {
            trace!("Container state {:?} -> {:?}", *self.state, state);
            *self.state = state;
        }
    }

    fn run(&mut self, scope: &ExecuteScope) -> Result<()> {
        self.execute_non_container_tests(scope)?;

        if !self.cancellation.is_cancelled() {
            self.admin.clear();
            self.execute_container_tests(scope)?;
        }

        self.listener
            .on_progress(&ProgressEvent::new(Step::Completed, self.tile_count, self.tile_count));
        Ok(())
    }

    fn execute_non_container_tests(&mut self, scope: &ExecuteScope) -> Result<()> {
        let ids: Vec<TestId> = self
            .tests
            .iter()
            .enumerate()
            .filter(|(_, test)| matches!(test, RegisteredTest::NonContainer(_)))
            .map(|(id, _)| id)
            .collect();

        let scope = if self.config.force_full_scan_for_non_container_tests() {
            ExecuteScope::Full
        } else {
            scope.clone()
        };

        for (index, id) in ids.iter().copied().enumerate() {
            self.listener.on_progress(
                &ProgressEvent::new(Step::ITestProcessing, index, ids.len()).with_message(self.names[id].as_str()),
            );

            let RegisteredTest::NonContainer(test) = &mut self.tests[id] else {
                continue;
            };

            let mut ctx = TestContext::new(id, &self.names[id], self.tables, None)
                .with_blob_fields(self.config.include_blob_fields());
            let outcome = test.execute(&scope, &mut ctx);
            let (reported, clear) = ctx.finish();

            let corrupt = match &outcome {
                Err(TestFailure::Unexpected(source)) => corrupt_row(&**source),
                _ => None,
            };

            match (outcome, corrupt) {
                (Err(TestFailure::Unexpected(source)), Some((table, oid))) => {
                    self.route(reported);
                    self.report_failed_test(
                        id,
                        format!("Error loading row {} of table {}. It might be corrupt.", oid, table),
                        vec![InvolvedRow::new(table, oid)],
                        None,
                    );

                    if !self.config.swallow_non_container_data_errors() {
                        error!("Non-container test '{}' failed: {}", self.names[id], source);
                        return Err(ContainerError::TestExecution {
                            test: self.names[id].clone(),
                            context: FailureContext::Run,
                            source,
                        });
                    }
                    warn!("Non-container test '{}' skipped after data error: {}", self.names[id], source);
                }
                (outcome, _) => self.settle(id, outcome.map(Some), reported, clear, CallSite::run())?,
            }

            self.admin.clear();

            self.listener.on_progress(
                &ProgressEvent::new(Step::ITestProcessed, index + 1, ids.len())
                    .with_message(self.names[id].as_str()),
            );

            if self.cancellation.is_cancelled() {
                info!("Test run cancelled during non-container tests");
                break;
            }
        }

        Ok(())
    }

    fn execute_container_tests(&mut self, scope: &ExecuteScope) -> Result<()> {
        let profiles: Vec<TestProfile> = self
            .tests
            .iter()
            .map(|test| match test {
                RegisteredTest::Container(test) => TestProfile::of(test.as_ref()),
                RegisteredTest::NonContainer(test) => TestProfile::empty(test.name()),
            })
            .collect();

        if profiles
            .iter()
            .all(|profile| profile.involved_tables.is_empty() && profile.involved_surfaces.is_empty())
        {
            return Ok(());
        }

        let run_box = match scope {
            ExecuteScope::Full => full_extent(&profiles, self.tables, self.surfaces),
            _ => scope.envelope(),
        };
        let Some(run_box) = run_box else {
            warn!("Nothing to test: the involved tables have no extent");
            return Ok(());
        };

        let clear_tolerance = profiles
            .iter()
            .map(|profile| profile.search_distance)
            .chain(self.tables.iter().map(|table| table.xy_tolerance()))
            .fold(0.0, f64::max);

        self.set_state(ContainerState::Loading);

        let mut rows = TestRowEnum::new(
            self.config,
            self.tables.to_vec(),
            self.surfaces.to_vec(),
            profiles,
            Some(run_box),
            scope.area().cloned(),
        )?;

        debug!("Test run extent {}, {} tiles", run_box, rows.total_tile_count());

        loop {
            if self.cancellation.is_cancelled() {
                info!("Test run cancelled");
                return Ok(());
            }

            let Some(event) = rows.next_event(&mut *self.listener)? else {
                break;
            };

            match event {
                RowEnumEvent::BeginTile(tile) => self.begin_tile(&tile, &mut rows)?,
                RowEnumEvent::Row { row, tests } => self.test_row(&row, &tests, &mut rows)?,
                RowEnumEvent::Surface { row, tests } => self.test_surface(&row, &tests, &mut rows)?,
                RowEnumEvent::CompleteTile(tile) => self.complete_tile(&tile, &mut rows, clear_tolerance)?,
            }
        }

        Ok(())
    }

    fn begin_tile(&mut self, tile: &TileInfo, rows: &mut TestRowEnum) -> Result<()> {
        self.set_state(ContainerState::BeginTile);
        self.listener.on_progress(
            &ProgressEvent::new(Step::TileProcessing, tile.index, tile.total).with_tile(tile.envelope, Some(tile.test_run)),
        );

        for id in 0..self.tests.len() {
            if self.failed[id] {
                continue;
            }
            let RegisteredTest::Container(test) = &mut self.tests[id] else {
                continue;
            };

            let mut ctx = TestContext::new(id, &self.names[id], self.tables, Some(&mut *rows))
                .with_blob_fields(self.config.include_blob_fields());
            let outcome = test.begin_tile(tile, &mut ctx);
            let (reported, clear) = ctx.finish();

            self.settle(id, outcome.map(|()| None), reported, clear, CallSite::tile(tile.envelope))?;
        }

        self.set_state(ContainerState::ProcessingRows);
        Ok(())
    }

    fn test_row(&mut self, row: &TestRow, tests: &[TestSlot], rows: &mut TestRowEnum) -> Result<()> {
        self.row_count += 1;
        self.listener.on_progress(
            &ProgressEvent::new(Step::RowProcessing, self.row_count, tests.len())
                .with_tile(rows.current_tile_extent(), rows.test_run_envelope()),
        );

        for slot in tests {
            if self.failed[slot.test] || self.failed_rows.contains(&(slot.test, row.table, row.row_id)) {
                continue;
            }
            let RegisteredTest::Container(test) = &mut self.tests[slot.test] else {
                continue;
            };

            let mut ctx = TestContext::new(slot.test, &self.names[slot.test], self.tables, Some(&mut *rows))
                .with_current_row(row.extent)
                .with_blob_fields(self.config.include_blob_fields());
            let outcome = test.execute_row(row, slot.table_index, &mut ctx);
            let involved_rows = if outcome.is_err() {
                ctx.involved_rows_of(row)
            } else {
                Vec::new()
            };
            let (reported, clear) = ctx.finish();

            let site = CallSite {
                context: FailureContext::Row {
                    table: self.tables[row.table].name().to_string(),
                    oid: Some(row.row_id),
                },
                row: Some((row.table, row.row_id)),
                involved_rows,
                geometry: row.shape().cloned(),
            };
            self.settle(slot.test, outcome.map(Some), reported, clear, site)?;
        }

        self.listener.on_progress(
            &ProgressEvent::new(Step::RowProcessed, self.row_count, tests.len())
                .with_tile(rows.current_tile_extent(), rows.test_run_envelope()),
        );
        Ok(())
    }

    fn test_surface(&mut self, row: &SurfaceRow, tests: &[TestSlot], rows: &mut TestRowEnum) -> Result<()> {
        self.row_count += 1;

        for slot in tests {
            if self.failed[slot.test] {
                continue;
            }
            let RegisteredTest::Container(test) = &mut self.tests[slot.test] else {
                continue;
            };

            let mut ctx = TestContext::new(slot.test, &self.names[slot.test], self.tables, Some(&mut *rows))
                .with_current_row(Some(row.envelope))
                .with_blob_fields(self.config.include_blob_fields());
            let outcome = test.execute_surface(row, slot.table_index, &mut ctx);
            let (reported, clear) = ctx.finish();

            let site = CallSite {
                geometry: Some(Arc::new(Shape::from_envelope(&row.envelope))),
                ..CallSite::tile(Some(row.envelope))
            };
            self.settle(slot.test, outcome.map(Some), reported, clear, site)?;
        }

        Ok(())
    }

    fn complete_tile(&mut self, tile: &TileInfo, rows: &mut TestRowEnum, clear_tolerance: f64) -> Result<()> {
        self.set_state(ContainerState::CompleteTile);

        let count = self.tests.len();
        for id in 0..count {
            if self.failed[id] {
                continue;
            }
            let RegisteredTest::Container(test) = &mut self.tests[id] else {
                continue;
            };

            self.listener.on_progress(
                &ProgressEvent::new(Step::TileCompleting, id, count)
                    .with_tile(tile.envelope, Some(tile.test_run))
                    .with_message(self.names[id].as_str()),
            );

            let mut ctx = TestContext::new(id, &self.names[id], self.tables, Some(&mut *rows))
                .with_blob_fields(self.config.include_blob_fields());
            let outcome = test.complete_tile(tile, &mut ctx);
            let (reported, clear) = ctx.finish();

            self.settle(id, outcome.map(Some), reported, clear, CallSite::tile(tile.envelope))?;

            self.listener.on_progress(
                &ProgressEvent::new(Step::TileCompleted, id + 1, count)
                    .with_tile(tile.envelope, Some(tile.test_run))
                    .with_message(self.names[id].as_str()),
            );
        }

        if tile.state == TileState::Initial {
            return Ok(());
        }

        // errors below the search band of the next tiles cannot come up again
        if let Some(envelope) = tile.envelope {
            self.admin.clear_before(f64::INFINITY, envelope.min_y - clear_tolerance);
        }

        self.tile_count += 1;
        self.listener.on_progress(
            &ProgressEvent::new(Step::TileProcessed, tile.index + 1, tile.total)
                .with_tile(tile.envelope, Some(tile.test_run)),
        );

        if tile.state == TileState::Progressing {
            self.set_state(ContainerState::Loading);
        }
        Ok(())
    }

    /// Routes the errors of one test call and checks the returned count.
    fn settle(
        &mut self,
        test: TestId,
        outcome: std::result::Result<Option<usize>, TestFailure>,
        reported: Vec<QaError>,
        clear: Option<(f64, f64)>,
        site: CallSite,
    ) -> Result<()> {
        let raised = self.route(reported);

        if let Some((x_max, y_max)) = clear {
            self.admin.clear_before(x_max, y_max);
        }

        match outcome {
            Ok(Some(returned)) if returned != raised => Err(ContainerError::InconsistentErrorCount {
                test: self.names[test].clone(),
                context: site.context.to_string(),
                returned,
                raised,
            }),
            Ok(_) => Ok(()),
            Err(TestFailure::Test(message)) => {
                error!("Test '{}' failed for {}: {}", self.names[test], site.context, message);

                self.failed[test] = true;
                self.report_failed_test(
                    test,
                    format!("Test failed: {}", message),
                    site.involved_rows,
                    site.geometry,
                );
                Ok(())
            }
            Err(TestFailure::Row(message)) => {
                error!("Test '{}' failed for {}: {}", self.names[test], site.context, message);

                if let Some((table, row_id)) = site.row {
                    self.failed_rows.insert((test, table, row_id));
                }
                self.report_failed_test(
                    test,
                    format!("Test failed for row: {}", message),
                    site.involved_rows,
                    site.geometry,
                );
                Ok(())
            }
            Err(TestFailure::Unexpected(source)) => {
                error!("Test '{}' failed for {}: {}", self.names[test], site.context, source);

                Err(ContainerError::TestExecution {
                    test: self.names[test].clone(),
                    context: site.context,
                    source,
                })
            }
        }
    }

    /// Returns the number of errors raised.
    fn route(&mut self, errors: Vec<QaError>) -> usize {
        let raised = errors.len();
        for error in errors {
            self.raise(error);
        }
        raised
    }

    fn raise(&mut self, error: QaError) {
        self.total_errors += 1;

        if self.admin.is_duplicate(&error) {
            trace!("Duplicate error discarded: {}", error);
            self.cancelled_errors += 1;
            return;
        }

        match self.listener.on_qa_error(&error) {
            ErrorDisposition::Keep => self.admin.add(error),
            ErrorDisposition::Cancel => {
                trace!("Error cancelled: {}", error);
                self.cancelled_errors += 1;
            }
        }
    }

    fn report_failed_test(
        &mut self,
        test: TestId,
        message: String,
        involved_rows: Vec<InvolvedRow>,
        geometry: Option<Arc<Shape>>,
    ) {
        let error = QaError::new(test, self.names[test].as_str(), message, involved_rows, geometry);
        self.raise(error);
    }
}

/// Table and object id of a row that could not be read.
fn corrupt_row(error: &(dyn std::error::Error + Send + Sync + 'static)) -> Option<(String, i64)> {
    let data = match error.downcast_ref::<DataError>() {
        Some(data) => data,
        None => match error.downcast_ref::<ContainerError>() {
            Some(ContainerError::Data(data)) => data,
            _ => return None,
        },
    };

    match data {
        DataError::CorruptRow { table, oid, .. } => Some((table.clone(), *oid)),
        _ => None,
    }
}

fn full_extent(
    profiles: &[TestProfile],
    tables: &[Arc<dyn ReadOnlyTable>],
    surfaces: &[Arc<dyn SurfaceSource>],
) -> Option<Envelope> {
    let table_extents = profiles
        .iter()
        .flat_map(|profile| profile.involved_tables.iter())
        .unique()
        .filter_map(|table| tables.get(*table).and_then(|table| table.extent()));

    let surface_extents = profiles
        .iter()
        .flat_map(|profile| profile.involved_surfaces.iter())
        .unique()
        .filter_map(|surface| surfaces.get(*surface).map(|surface| surface.extent()));

    table_extents.chain(surface_extents).reduce(|a, b| a.union(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::data::{Field, FieldType, FieldValue, MemoryTable};
    use crate::core::container::listener::CollectingListener;

    struct EveryRow {
        tables: Vec<TableId>,
    }

    impl ContainerTest for EveryRow {
        fn name(&self) -> &str {
            "EveryRow"
        }

        fn involved_tables(&self) -> &[TableId] {
            &self.tables
        }

        fn execute_row(&mut self, row: &TestRow, _: usize, ctx: &mut TestContext) -> std::result::Result<usize, TestFailure> {
            let involved = ctx.involved_rows_of(row);
            ctx.report_error("row found", involved, None);
            Ok(1)
        }
    }

    fn container() -> (TestContainer, TableId) {
        let mut table = MemoryTable::new(
            "Points",
            vec![
                Field::new("OBJECTID", FieldType::Oid),
                Field::new("SHAPE", FieldType::Geometry),
            ],
        );
        table.add(Some(Shape::point(1.0, 1.0)), vec![FieldValue::Null, FieldValue::Null]);
        table.add(Some(Shape::point(9.0, 9.0)), vec![FieldValue::Null, FieldValue::Null]);

        let mut container = TestContainer::new(Configuration::default().with_tile_size(5.0));
        let id = container.add_table(Arc::new(table));
        (container, id)
    }

    #[test]
    fn unknown_tables_are_rejected() {
        let (mut container, _) = container();
        let result = container.add_test(EveryRow { tables: vec![7] });
        assert!(matches!(result, Err(ContainerError::Configuration(_))));
    }

    #[test]
    fn state_ends_completed() {
        let _ = env_logger::builder().is_test(true).try_init();

        let (mut container, table) = container();
        container.add_test(EveryRow { tables: vec![table] }).unwrap();
        assert_eq!(container.state(), ContainerState::Idle);

        let mut listener = CollectingListener::new();
        let summary = container.execute(ExecuteScope::Full, &mut listener).unwrap();

        assert_eq!(container.state(), ContainerState::Completed);
        assert_eq!(summary.error_count, 2);
        assert_eq!(summary.row_count, 2);
        assert_eq!(listener.errors.len(), 2);
        assert_eq!(listener.progress.last().map(|event| event.step), Some(Step::Completed));
    }

    #[test]
    fn scope_envelope_restricts_rows() {
        let (mut container, table) = container();
        container.add_test(EveryRow { tables: vec![table] }).unwrap();

        let mut listener = CollectingListener::new();
        let summary = container
            .execute(ExecuteScope::Envelope(Envelope::new(0.0, 0.0, 5.0, 5.0)), &mut listener)
            .unwrap();

        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.tile_count, 1);
    }

    #[test]
    fn summary_reads_well() {
        let summary = ExecutionSummary {
            error_count: 3,
            cancelled_error_count: 1,
            failed_tests: vec!["Broken".to_string()],
            tile_count: 4,
            row_count: 10,
            cancelled: false,
        };
        assert_eq!(
            summary.to_string(),
            "3 errors (1 cancelled), 10 rows tested in 4 tiles, failed tests: Broken"
        );
    }
}
