use std::cell::RefCell;
use std::sync::Arc;

use geo_types::{LineString, polygon};

use super::*;

/// Records every predicate call before delegating to the geo implementation.
#[derive(Default)]
struct RecordingOperator {
    inner: GeoRelationalOperator,
    calls: RefCell<Vec<&'static str>>,
}

impl RecordingOperator {
    fn calls(&self) -> Vec<&'static str> {
        self.calls.borrow().clone()
    }

    fn record(&self, name: &'static str) {
        self.calls.borrow_mut().push(name);
    }
}

impl RelationalOperator for RecordingOperator {
    fn disjoint(&self, source: &Shape, target: &Shape) -> bool {
        self.record("disjoint");
        self.inner.disjoint(source, target)
    }

    fn intersects(&self, source: &Shape, target: &Shape) -> bool {
        self.record("intersects");
        self.inner.intersects(source, target)
    }

    fn touches(&self, source: &Shape, target: &Shape) -> bool {
        self.record("touches");
        self.inner.touches(source, target)
    }

    fn overlaps(&self, source: &Shape, target: &Shape) -> bool {
        self.record("overlaps");
        self.inner.overlaps(source, target)
    }

    fn crosses(&self, source: &Shape, target: &Shape) -> bool {
        self.record("crosses");
        self.inner.crosses(source, target)
    }

    fn within(&self, source: &Shape, target: &Shape) -> bool {
        self.record("within");
        self.inner.within(source, target)
    }

    fn contains(&self, source: &Shape, target: &Shape) -> bool {
        self.record("contains");
        self.inner.contains(source, target)
    }

    fn relation(&self, source: &Shape, target: &Shape, pattern: &str) -> Result<bool> {
        self.record("relation");
        self.inner.relation(source, target, pattern)
    }
}

fn square(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Arc<Shape> {
    Arc::new(Shape::from_envelope(&Envelope::new(min_x, min_y, max_x, max_y)))
}

fn engine_with(source: Arc<Shape>, target: Arc<Shape>) -> GeometryEngine<RecordingOperator> {
    let mut engine = GeometryEngine::with_operator(RecordingOperator::default());
    engine.set_source_geometry(source);
    engine.set_target_geometry(target);
    engine
}

#[test]
fn identical_reference_short_circuits_without_operator() {
    let shape = square(0.0, 0.0, 10.0, 10.0);
    let engine = engine_with(Arc::clone(&shape), Arc::clone(&shape));

    assert!(engine.evaluate_relation(&SpatialRelation::Intersects).unwrap());
    assert!(engine.evaluate_relation(&SpatialRelation::EnvelopeIntersects).unwrap());

    for relation in [
        SpatialRelation::Touches,
        SpatialRelation::Overlaps,
        SpatialRelation::Crosses,
        SpatialRelation::Contains,
        SpatialRelation::Within,
    ] {
        assert!(!engine.evaluate_relation(&relation).unwrap(), "{:?}", relation);
    }

    assert!(engine.operator().calls().is_empty());
}

#[test]
fn equal_but_distinct_shapes_are_evaluated() {
    let engine = engine_with(square(0.0, 0.0, 10.0, 10.0), square(0.0, 0.0, 10.0, 10.0));

    assert!(engine.evaluate_relation(&SpatialRelation::Within).unwrap());
    assert_eq!(engine.operator().calls(), vec!["disjoint", "within"]);
}

#[test]
fn disjoint_is_tested_first() {
    let engine = engine_with(square(0.0, 0.0, 10.0, 10.0), square(20.0, 20.0, 30.0, 30.0));

    assert!(!engine.evaluate_relation(&SpatialRelation::Touches).unwrap());
    assert!(!engine.evaluate_relation(&SpatialRelation::Contains).unwrap());
    assert_eq!(engine.operator().calls(), vec!["disjoint", "disjoint"]);
}

#[test]
fn intersects_skips_disjoint() {
    let engine = engine_with(square(0.0, 0.0, 10.0, 10.0), square(5.0, 5.0, 30.0, 30.0));

    assert!(engine.evaluate_relation(&SpatialRelation::Intersects).unwrap());
    assert_eq!(engine.operator().calls(), vec!["intersects"]);
}

#[test]
fn interior_intersects_uses_touches() {
    let relation = SpatialRelation::Relation(INTERIOR_INTERSECTS.to_string());

    let overlapping = engine_with(square(0.0, 0.0, 10.0, 10.0), square(5.0, 5.0, 30.0, 30.0));
    assert!(overlapping.evaluate_relation(&relation).unwrap());
    assert_eq!(overlapping.operator().calls(), vec!["disjoint", "touches"]);

    let adjacent = engine_with(square(0.0, 0.0, 10.0, 10.0), square(10.0, 0.0, 20.0, 10.0));
    assert!(!adjacent.evaluate_relation(&relation).unwrap());
    assert!(!adjacent.operator().calls().contains(&"relation"));
}

#[test]
fn custom_relation_pattern() {
    let engine = engine_with(square(0.0, 0.0, 10.0, 10.0), square(5.0, 5.0, 30.0, 30.0));

    let overlaps = SpatialRelation::Relation("T*T***T**".to_string());
    assert!(engine.evaluate_relation(&overlaps).unwrap());

    let invalid = SpatialRelation::Relation("XYZ".to_string());
    assert!(matches!(
        engine.evaluate_relation(&invalid),
        Err(ContainerError::InvalidRelation(_))
    ));
}

#[test]
fn envelope_intersects_can_be_forced() {
    let mut engine = engine_with(square(0.0, 0.0, 10.0, 10.0), square(20.0, 20.0, 30.0, 30.0));
    assert!(!engine.evaluate_relation(&SpatialRelation::EnvelopeIntersects).unwrap());

    engine.set_envelope_intersects_always_true(true);
    assert!(engine.evaluate_relation(&SpatialRelation::EnvelopeIntersects).unwrap());
    assert!(engine.operator().calls().is_empty());
}

#[test]
fn predicates_follow_de9im() {
    let line = Arc::new(Shape::new(LineString::from(vec![(-5.0, 5.0), (15.0, 5.0)])));
    let area = square(0.0, 0.0, 10.0, 10.0);

    let mut engine = GeometryEngine::new();
    engine.set_source_geometry(Arc::clone(&line));
    engine.set_target_geometry(Arc::clone(&area));
    assert!(engine.evaluate_relation(&SpatialRelation::Crosses).unwrap());
    assert!(!engine.evaluate_relation(&SpatialRelation::Within).unwrap());

    engine.set_source_geometry(area);
    engine.set_target_geometry(square(2.0, 2.0, 4.0, 4.0));
    assert!(engine.evaluate_relation(&SpatialRelation::Contains).unwrap());
    assert!(!engine.evaluate_relation(&SpatialRelation::Overlaps).unwrap());
}

#[test]
fn touches_clips_large_polycurves() {
    let left = Arc::new(Shape::new(polygon![
        (x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 5.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)
    ]));
    let right = Arc::new(Shape::new(polygon![
        (x: 10.0, y: 0.0), (x: 20.0, y: 0.0), (x: 20.0, y: 10.0), (x: 10.0, y: 10.0), (x: 10.0, y: 5.0)
    ]));
    let overlapping = Arc::new(Shape::new(polygon![
        (x: 5.0, y: 0.0), (x: 20.0, y: 0.0), (x: 20.0, y: 10.0), (x: 5.0, y: 10.0), (x: 5.0, y: 5.0)
    ]));

    let mut engine = GeometryEngine::new();
    engine.set_touches_clip_min_point_count(4);

    engine.set_source_geometry(Arc::clone(&left));
    engine.set_target_geometry(right);
    assert!(engine.evaluate_relation(&SpatialRelation::Touches).unwrap());

    engine.set_target_geometry(overlapping);
    assert!(!engine.evaluate_relation(&SpatialRelation::Touches).unwrap());
}

#[test]
fn missing_geometry_is_an_error() {
    let engine = GeometryEngine::new();
    assert!(engine.evaluate_relation(&SpatialRelation::Intersects).is_err());
}
