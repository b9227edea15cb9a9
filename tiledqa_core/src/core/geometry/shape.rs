use std::sync::Arc;

use geo::{BoundingRect, CoordsIter};
use geo_types::{Geometry, Point};

use super::envelope::Envelope;

/// Geometry kind, resolved once when a shape is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeKind {
    Point,
    Multipoint,
    Polyline,
    Polygon,
    Other,
}

impl ShapeKind {
    pub fn of(geometry: &Geometry<f64>) -> ShapeKind {
        match geometry {
            Geometry::Point(_) => ShapeKind::Point,
            Geometry::MultiPoint(_) => ShapeKind::Multipoint,
            Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
                ShapeKind::Polyline
            }
            Geometry::Polygon(_)
            | Geometry::MultiPolygon(_)
            | Geometry::Rect(_)
            | Geometry::Triangle(_) => ShapeKind::Polygon,
            Geometry::GeometryCollection(_) => ShapeKind::Other,
        }
    }

    /// Polylines and polygons have indexed segments.
    #[inline]
    pub fn is_polycurve(&self) -> bool {
        matches!(self, ShapeKind::Polyline | ShapeKind::Polygon)
    }
}

/// A geometry payload together with the values the engine needs on every access.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    kind: ShapeKind,
    geometry: Geometry<f64>,
    envelope: Option<Envelope>,
    point_count: usize,
}

impl Shape {
    pub fn new(geometry: impl Into<Geometry<f64>>) -> Self {
        let geometry = geometry.into();
        let envelope = geometry.bounding_rect().map(|rect| Envelope::from_rect(&rect));
        let point_count = geometry.coords_count();

        Self {
            kind: ShapeKind::of(&geometry),
            geometry,
            envelope,
            point_count,
        }
    }

    /// Convenience for the common `Arc<Shape>` construction.
    pub fn shared(geometry: impl Into<Geometry<f64>>) -> Arc<Shape> {
        Arc::new(Shape::new(geometry))
    }

    pub fn from_envelope(envelope: &Envelope) -> Self {
        Shape::new(envelope.to_polygon())
    }

    pub fn point(x: f64, y: f64) -> Self {
        Shape::new(Point::new(x, y))
    }

    #[inline]
    pub fn kind(&self) -> ShapeKind {
        self.kind
    }

    #[inline]
    pub fn geometry(&self) -> &Geometry<f64> {
        &self.geometry
    }

    /// `None` for empty geometries.
    #[inline]
    pub fn envelope(&self) -> Option<Envelope> {
        self.envelope
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.point_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.envelope.is_none()
    }

    pub fn as_point(&self) -> Option<(f64, f64)> {
        match &self.geometry {
            Geometry::Point(p) => Some((p.x(), p.y())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use geo_types::{LineString, MultiPoint, polygon};

    use super::*;

    #[test]
    fn kind_and_counts_are_resolved_once() {
        let line = Shape::new(LineString::from(vec![(0.0, 0.0), (10.0, 5.0), (20.0, 0.0)]));
        assert_eq!(line.kind(), ShapeKind::Polyline);
        assert!(line.kind().is_polycurve());
        assert_eq!(line.point_count(), 3);
        assert_eq!(line.envelope(), Some(Envelope::new(0.0, 0.0, 20.0, 5.0)));
    }

    #[test]
    fn polygon_envelope() {
        let poly = Shape::new(polygon![(x: 1.0, y: 1.0), (x: 4.0, y: 1.0), (x: 4.0, y: 3.0), (x: 1.0, y: 3.0)]);
        assert_eq!(poly.kind(), ShapeKind::Polygon);
        assert_eq!(poly.envelope(), Some(Envelope::new(1.0, 1.0, 4.0, 3.0)));
    }

    #[test]
    fn empty_multipoint_has_no_envelope() {
        let empty = Shape::new(MultiPoint::<f64>::new(vec![]));
        assert_eq!(empty.kind(), ShapeKind::Multipoint);
        assert!(empty.is_empty());
        assert_eq!(empty.point_count(), 0);
    }
}
