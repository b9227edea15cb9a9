use std::sync::Arc;

use geo::{BooleanOps, Relate};
use geo_types::{Geometry, MultiLineString};
use log::trace;

use crate::core::error::{ContainerError, Result};

use super::envelope::Envelope;
use super::shape::{Shape, ShapeKind};

/// DE-9IM pattern for "interiors intersect".
pub const INTERIOR_INTERSECTS: &str = "T********";

/// Spatial relationship evaluated between a source (filter) and a target geometry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SpatialRelation {
    Intersects,
    Touches,
    Overlaps,
    Crosses,
    Within,
    Contains,
    /// Custom DE-9IM matrix pattern, e.g. `"T*T***T**"`.
    Relation(String),
    EnvelopeIntersects,
}

/// External evaluator for the spatial predicates.
///
/// Every method answers `source <predicate> target`.
pub trait RelationalOperator {
    fn disjoint(&self, source: &Shape, target: &Shape) -> bool;
    fn intersects(&self, source: &Shape, target: &Shape) -> bool;
    fn touches(&self, source: &Shape, target: &Shape) -> bool;
    fn overlaps(&self, source: &Shape, target: &Shape) -> bool;
    fn crosses(&self, source: &Shape, target: &Shape) -> bool;
    fn within(&self, source: &Shape, target: &Shape) -> bool;
    fn contains(&self, source: &Shape, target: &Shape) -> bool;
    fn relation(&self, source: &Shape, target: &Shape, pattern: &str) -> Result<bool>;
}

/// Default evaluator backed by the `geo` DE-9IM implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeoRelationalOperator;

#[inline]
fn dimension(shape: &Shape) -> u8 {
    match shape.kind() {
        ShapeKind::Point | ShapeKind::Multipoint => 0,
        ShapeKind::Polyline => 1,
        ShapeKind::Polygon | ShapeKind::Other => 2,
    }
}

impl GeoRelationalOperator {
    fn matches_any(&self, source: &Shape, target: &Shape, patterns: &[&str]) -> bool {
        let matrix = source.geometry().relate(target.geometry());
        patterns
            .iter()
            .any(|pattern| matrix.matches(pattern).unwrap_or(false))
    }
}

impl RelationalOperator for GeoRelationalOperator {
    fn disjoint(&self, source: &Shape, target: &Shape) -> bool {
        if source.is_empty() || target.is_empty() {
            return true;
        }
        source.geometry().relate(target.geometry()).is_disjoint()
    }

    fn intersects(&self, source: &Shape, target: &Shape) -> bool {
        !self.disjoint(source, target)
    }

    fn touches(&self, source: &Shape, target: &Shape) -> bool {
        if dimension(source) == 0 && dimension(target) == 0 {
            // points have no boundary
            return false;
        }
        self.matches_any(source, target, &["FT*******", "F**T*****", "F***T****"])
    }

    fn overlaps(&self, source: &Shape, target: &Shape) -> bool {
        match (dimension(source), dimension(target)) {
            (0, 0) | (2, 2) => self.matches_any(source, target, &["T*T***T**"]),
            (1, 1) => self.matches_any(source, target, &["1*T***T**"]),
            _ => false,
        }
    }

    fn crosses(&self, source: &Shape, target: &Shape) -> bool {
        let (ds, dt) = (dimension(source), dimension(target));
        if ds == 1 && dt == 1 {
            self.matches_any(source, target, &["0********"])
        } else if ds < dt {
            self.matches_any(source, target, &["T*T******"])
        } else if ds > dt {
            self.matches_any(source, target, &["T*****T**"])
        } else {
            false
        }
    }

    fn within(&self, source: &Shape, target: &Shape) -> bool {
        source.geometry().relate(target.geometry()).is_within()
    }

    fn contains(&self, source: &Shape, target: &Shape) -> bool {
        source.geometry().relate(target.geometry()).is_contains()
    }

    fn relation(&self, source: &Shape, target: &Shape, pattern: &str) -> Result<bool> {
        source
            .geometry()
            .relate(target.geometry())
            .matches(pattern)
            .map_err(|_| ContainerError::InvalidRelation(pattern.to_string()))
    }
}

/// Evaluates spatial relations between a source and a target geometry.
///
/// Disjoint is tested first for every predicate except `Intersects` and
/// `EnvelopeIntersects`; identical source/target references are answered
/// without calling the operator.
pub struct GeometryEngine<R: RelationalOperator = GeoRelationalOperator> {
    operator: R,
    source: Option<Arc<Shape>>,
    target: Option<Arc<Shape>>,
    envelope_intersects_always_true: bool,
    touches_clip_min_point_count: usize,
    xy_tolerance: f64,
}

impl GeometryEngine<GeoRelationalOperator> {
    pub fn new() -> Self {
        Self::with_operator(GeoRelationalOperator)
    }
}

impl Default for GeometryEngine<GeoRelationalOperator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RelationalOperator> GeometryEngine<R> {
    pub fn with_operator(operator: R) -> Self {
        Self {
            operator,
            source: None,
            target: None,
            envelope_intersects_always_true: false,
            touches_clip_min_point_count: 1_000,
            xy_tolerance: 0.0,
        }
    }

    /// When set, `EnvelopeIntersects` answers `true` unconditionally. Only valid
    /// when the caller already guarantees envelope overlap.
    pub fn set_envelope_intersects_always_true(&mut self, value: bool) {
        self.envelope_intersects_always_true = value;
    }

    /// Minimum point count of both polycurves before `Touches` clips them.
    pub fn set_touches_clip_min_point_count(&mut self, count: usize) {
        self.touches_clip_min_point_count = count;
    }

    pub fn set_xy_tolerance(&mut self, tolerance: f64) {
        self.xy_tolerance = tolerance.max(0.0);
    }

    pub fn operator(&self) -> &R {
        &self.operator
    }

    pub fn set_source_geometry(&mut self, source: Arc<Shape>) {
        self.source = Some(source);
    }

    pub fn set_target_geometry(&mut self, target: Arc<Shape>) {
        self.target = Some(target);
    }

    /// Evaluates `source <relation> target` for the current geometries.
    pub fn evaluate_relation(&self, relation: &SpatialRelation) -> Result<bool> {
        let (Some(source), Some(target)) = (self.source.as_ref(), self.target.as_ref()) else {
            return Err(ContainerError::InvalidRelation(
                "source and target geometry must be set".to_string(),
            ));
        };

        if Arc::ptr_eq(source, target) {
            match relation {
                SpatialRelation::Intersects | SpatialRelation::EnvelopeIntersects => {
                    return Ok(!source.is_empty());
                }
                SpatialRelation::Relation(_) => {}
                _ => return Ok(false),
            }
        }

        match relation {
            SpatialRelation::EnvelopeIntersects => {
                if self.envelope_intersects_always_true {
                    return Ok(true);
                }
                Ok(match (source.envelope(), target.envelope()) {
                    (Some(a), Some(b)) => a.intersects(&b),
                    _ => false,
                })
            }
            SpatialRelation::Intersects => Ok(self.operator.intersects(source, target)),
            _ => {
                if self.operator.disjoint(source, target) {
                    return Ok(false);
                }
                self.evaluate_non_disjoint(relation, source, target)
            }
        }
    }

    fn evaluate_non_disjoint(
        &self,
        relation: &SpatialRelation,
        source: &Shape,
        target: &Shape,
    ) -> Result<bool> {
        Ok(match relation {
            SpatialRelation::Touches => self.touches(source, target),
            SpatialRelation::Overlaps => self.operator.overlaps(source, target),
            SpatialRelation::Crosses => self.operator.crosses(source, target),
            SpatialRelation::Within => self.operator.within(source, target),
            SpatialRelation::Contains => self.operator.contains(source, target),
            SpatialRelation::Relation(pattern) if pattern == INTERIOR_INTERSECTS => {
                // not disjoint already established
                !self.operator.touches(source, target)
            }
            SpatialRelation::Relation(pattern) => {
                self.operator.relation(source, target, pattern)?
            }
            SpatialRelation::Intersects | SpatialRelation::EnvelopeIntersects => true,
        })
    }

    fn touches(&self, source: &Shape, target: &Shape) -> bool {
        let clip = source.kind().is_polycurve()
            && target.kind().is_polycurve()
            && source.point_count() >= self.touches_clip_min_point_count
            && target.point_count() >= self.touches_clip_min_point_count;

        if !clip {
            return self.operator.touches(source, target);
        }

        let (Some(a), Some(b)) = (source.envelope(), target.envelope()) else {
            return false;
        };

        let Some(common) = a
            .expanded_by(self.xy_tolerance)
            .intersection(&b.expanded_by(self.xy_tolerance))
        else {
            return false;
        };

        // On every side of the common envelope at most one of both inputs
        // continues, so the new clip boundary never meets the other input.
        let margin = self
            .xy_tolerance
            .max(a.union(&b).max_extent().max(1.0) * 1e-6);
        let clip_envelope = common.expanded_by(margin);

        let clipped_source = clip_to_envelope(source, &clip_envelope);
        let clipped_target = clip_to_envelope(target, &clip_envelope);

        trace!(
            "Touches: clipped {} and {} points to {}",
            source.point_count(),
            target.point_count(),
            clip_envelope
        );

        match (clipped_source, clipped_target) {
            (Some(s), Some(t)) => self.operator.touches(&s, &t),
            (Some(s), None) => self.operator.touches(&s, target),
            (None, Some(t)) => self.operator.touches(source, &t),
            (None, None) => self.operator.touches(source, target),
        }
    }
}

/// Clips polycurves to `envelope`. Other geometry kinds are not clipped.
fn clip_to_envelope(shape: &Shape, envelope: &Envelope) -> Option<Shape> {
    let clip_polygon = envelope.to_polygon();

    let clipped: Geometry<f64> = match shape.geometry() {
        Geometry::Polygon(polygon) => polygon.intersection(&clip_polygon).into(),
        Geometry::MultiPolygon(polygons) => polygons.intersection(&clip_polygon).into(),
        Geometry::LineString(line) => clip_polygon
            .clip(&MultiLineString::new(vec![line.clone()]), false)
            .into(),
        Geometry::MultiLineString(lines) => clip_polygon.clip(lines, false).into(),
        _ => return None,
    };

    Some(Shape::new(clipped))
}
