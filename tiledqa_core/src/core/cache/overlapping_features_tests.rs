use std::sync::Arc;

use crate::core::data::FieldValue;
use crate::core::geometry::Shape;
use crate::core::identity::{KeyField, UniqueIdProvider};

use super::*;

fn cached(table: TableId, row_id: RowId, envelope: Envelope) -> Rc<CachedRow> {
    let shape = Arc::new(Shape::from_envelope(&envelope));
    Rc::new(CachedRow::new(
        table,
        row_id,
        Arc::new(Row::new(Some(row_id), Some(shape), vec![])),
    ))
}

#[test]
fn reduced_test_lists_are_unioned() {
    let mut tracker = OverlappingFeatures::new(-1);
    let row = cached(0, 1, Envelope::new(0.0, 0.0, 1.0, 1.0));

    assert!(!tracker.was_already_tested(0, 1, 0));

    tracker.register_tested_feature(&row, Some(&[1][..]));
    tracker.register_tested_feature(&row, Some(&[2][..]));
    assert!(tracker.was_already_tested(0, 1, 1));
    assert!(tracker.was_already_tested(0, 1, 2));
    assert!(!tracker.was_already_tested(0, 1, 3));

    tracker.register_tested_feature(&row, None);
    assert!(tracker.was_already_tested(0, 1, 3));

    tracker.register_tested_feature(&row, Some(&[4][..]));
    assert!(tracker.was_already_tested(0, 1, 3));
    assert_eq!(tracker.tracked_row_count(), 1);
}

#[test]
fn remaining_occurrence_follows_sweep_order() {
    let tile = Envelope::new(40.0, 40.0, 80.0, 80.0);

    // below the search box
    assert!(OverlappingFeatures::has_no_remaining_occurrence(
        &Envelope::new(0.0, 0.0, 100.0, 30.0),
        &tile,
        5.0
    ));
    // left of the tile, but reaching into the next tile row
    assert!(!OverlappingFeatures::has_no_remaining_occurrence(
        &Envelope::new(0.0, 50.0, 20.0, 90.0),
        &tile,
        5.0
    ));
    // left of the tile, within the current tile row only
    assert!(OverlappingFeatures::has_no_remaining_occurrence(
        &Envelope::new(0.0, 50.0, 20.0, 60.0),
        &tile,
        5.0
    ));
    // within the tolerance halo on the left
    assert!(!OverlappingFeatures::has_no_remaining_occurrence(
        &Envelope::new(30.0, 50.0, 36.0, 60.0),
        &tile,
        5.0
    ));
    // right of the tile
    assert!(!OverlappingFeatures::has_no_remaining_occurrence(
        &Envelope::new(90.0, 0.0, 95.0, 45.0),
        &tile,
        0.0
    ));
}

#[test]
fn search_tolerance_keeps_maximum() {
    let mut tracker = OverlappingFeatures::new(-1);
    tracker.adapt_search_tolerance(3, 2.0);
    tracker.adapt_search_tolerance(3, 1.0);
    assert_eq!(tracker.search_tolerance(3), 2.0);
    assert_eq!(tracker.search_tolerance(4), 0.0);
}

#[test]
fn unreachable_rows_are_dropped_with_their_unique_id() {
    let mut tracker = OverlappingFeatures::new(-1);
    tracker.register_table(
        0,
        Some(UniqueIdProvider::new([KeyField {
            field_index: 0,
            table_name: "A".to_string(),
        }])),
    );

    let joined = Row::new(None, None, vec![FieldValue::Integer(11)]);
    let id = tracker.row_id_of(0, &joined);
    assert_eq!(tracker.row_id_of(0, &joined), id);

    let row = cached(0, id, Envelope::new(10.0, 10.0, 20.0, 45.0));
    tracker.register_tested_feature(&row, None);

    assert_eq!(tracker.set_current_tile(&Envelope::new(40.0, 0.0, 80.0, 40.0)), 0);
    assert_eq!(tracker.set_current_tile(&Envelope::new(0.0, 40.0, 40.0, 80.0)), 0);
    assert!(tracker.find(0, id).is_some());

    assert_eq!(tracker.set_current_tile(&Envelope::new(40.0, 40.0, 80.0, 80.0)), 1);
    assert!(tracker.find(0, id).is_none());
    assert_eq!(tracker.unique_id_provider(0).unwrap().len(), 0);
    assert_ne!(tracker.row_id_of(0, &joined), id);
}

#[test]
fn registered_ids_are_not_released() {
    let mut tracker = OverlappingFeatures::new(-1);
    tracker.register_table(
        0,
        Some(UniqueIdProvider::new([KeyField {
            field_index: 0,
            table_name: "A".to_string(),
        }])),
    );

    let first = Row::new(None, None, vec![FieldValue::Integer(1)]);
    let second = Row::new(None, None, vec![FieldValue::Integer(2)]);
    let first_id = tracker.row_id_of(0, &first);
    let second_id = tracker.row_id_of(0, &second);

    tracker.register_tested_feature(&cached(0, first_id, Envelope::new(0.0, 0.0, 1.0, 1.0)), None);

    tracker.release_unique_id(0, first_id);
    tracker.release_unique_id(0, second_id);

    assert_eq!(tracker.row_id_of(0, &first), first_id);
    assert_eq!(tracker.unique_id_provider(0).unwrap().len(), 1);
}

#[test]
fn payloads_beyond_budget_are_released() {
    const BUDGET: i64 = 12;

    let mut tracker = OverlappingFeatures::new(BUDGET);
    let run = Envelope::new(0.0, 0.0, 100.0, 100.0);

    // tall rows in the first tile row that stay reachable from the next tile row
    let rows: Vec<Rc<CachedRow>> = (0..10)
        .map(|i| {
            let x = i as f64 * 10.0;
            cached(0, i, Envelope::new(x, 0.0, x + 5.0, 60.0))
        })
        .collect();
    for row in &rows {
        tracker.register_tested_feature(row, None);
    }

    let tile_size = 25.0;
    let mut y = run.min_y;
    while y < run.max_y {
        let mut x = run.min_x;
        while x < run.max_x {
            let tile = Envelope::new(x, y, x + tile_size, y + tile_size);
            tracker.set_current_tile(&tile);

            let held: i64 = rows
                .iter()
                .filter(|row| tracker.find(0, row.row_id()).is_some())
                .filter(|row| row.has_payload())
                .filter(|row| !row.extent().unwrap().intersects(&tile))
                .map(|row| row.cached_point_count() as i64)
                .sum();

            assert!(held <= BUDGET, "{} points held in {}", held, tile);
            assert_eq!(tracker.current_cached_point_count(), held);
            x += tile_size;
        }
        y += tile_size;
    }

    let released = rows.iter().filter(|row| !row.has_payload()).count();
    assert!(released > 0);
    assert!(rows.iter().all(|row| row.extent().is_some()));
}
