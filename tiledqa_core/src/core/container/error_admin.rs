use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

use ahash::{AHashMap, RandomState};
use geo::CoordsIter;

use crate::core::data::InvolvedRow;
use crate::core::geometry::{Envelope, Shape};

use super::test::TestId;

/// An error reported by a test.
#[derive(Debug, Clone)]
pub struct QaError {
    pub test: TestId,
    pub test_name: String,
    /// Sorted.
    pub involved_rows: Vec<InvolvedRow>,
    pub geometry: Option<Arc<Shape>>,
    pub envelope: Option<Envelope>,
    pub message: String,
}

impl QaError {
    pub fn new(
        test: TestId,
        test_name: impl Into<String>,
        message: impl Into<String>,
        mut involved_rows: Vec<InvolvedRow>,
        geometry: Option<Arc<Shape>>,
    ) -> Self {
        involved_rows.sort_unstable();
        involved_rows.dedup();

        Self {
            test,
            test_name: test_name.into(),
            envelope: geometry.as_ref().and_then(|shape| shape.envelope()),
            involved_rows,
            geometry,
            message: message.into(),
        }
    }

    /// Same test, same involved rows, same message and geometry. A side
    /// without geometry is compared by its envelope only.
    pub fn is_duplicate_of(&self, other: &QaError) -> bool {
        if self.test != other.test
            || self.message != other.message
            || self.involved_rows != other.involved_rows
            || self.envelope != other.envelope
        {
            return false;
        }

        match (&self.geometry, &other.geometry) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a.geometry() == b.geometry(),
            _ => true,
        }
    }
}

impl fmt::Display for QaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.test_name, self.message)?;
        if !self.involved_rows.is_empty() {
            let rows: Vec<String> = self.involved_rows.iter().map(|row| row.to_string()).collect();
            write!(f, " [{}]", rows.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct KnownError {
    error: QaError,
    /// Coordinates of the dropped geometry.
    fingerprint: Option<u64>,
}

/// Remembers reported errors to discard duplicates. Rows spanning several
/// tiles can make a test report the same error more than once.
#[derive(Debug, Default)]
pub struct QaErrorAdministrator {
    errors: AHashMap<TestId, Vec<KnownError>>,
    keep_geometry: bool,
    hash_state: RandomState,
}

impl QaErrorAdministrator {
    /// Without `keep_geometry` stored errors only keep their envelope.
    pub fn new(keep_geometry: bool) -> Self {
        Self {
            errors: AHashMap::new(),
            keep_geometry,
            hash_state: RandomState::new(),
        }
    }

    fn fingerprint(&self, shape: &Shape) -> u64 {
        let mut hasher = self.hash_state.build_hasher();
        shape.point_count().hash(&mut hasher);
        for coord in shape.geometry().coords_iter() {
            coord.x.to_bits().hash(&mut hasher);
            coord.y.to_bits().hash(&mut hasher);
        }
        hasher.finish()
    }

    pub fn is_duplicate(&self, error: &QaError) -> bool {
        let Some(errors) = self.errors.get(&error.test) else {
            return false;
        };

        let fingerprint = error.geometry.as_deref().map(|shape| self.fingerprint(shape));

        errors.iter().any(|known| {
            known.error.is_duplicate_of(error)
                && (known.error.geometry.is_some() || known.fingerprint == fingerprint)
        })
    }

    pub fn add(&mut self, mut error: QaError) {
        let mut fingerprint = None;
        if !self.keep_geometry {
            fingerprint = error.geometry.take().map(|shape| self.fingerprint(&shape));
        }
        self.errors
            .entry(error.test)
            .or_default()
            .push(KnownError { error, fingerprint });
    }

    pub fn len(&self) -> usize {
        self.errors.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.errors.clear();
    }

    /// Forgets errors lying completely left of `x_max` and below `y_max`.
    /// Errors without envelope are kept.
    pub fn clear_before(&mut self, x_max: f64, y_max: f64) {
        for errors in self.errors.values_mut() {
            errors.retain(|known| {
                !known
                    .error
                    .envelope
                    .is_some_and(|envelope| envelope.max_x < x_max && envelope.max_y < y_max)
            });
        }
        self.errors.retain(|_, errors| !errors.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(test: TestId, oid: i64, envelope: Envelope) -> QaError {
        QaError::new(
            test,
            "Test",
            "too close",
            vec![InvolvedRow::new("Roads", oid)],
            Some(Arc::new(Shape::from_envelope(&envelope))),
        )
    }

    #[test]
    fn duplicates_are_detected() {
        let mut admin = QaErrorAdministrator::new(false);
        let first = error(0, 1, Envelope::new(0.0, 0.0, 1.0, 1.0));
        admin.add(first.clone());

        assert!(admin.is_duplicate(&first));
        assert!(!admin.is_duplicate(&error(1, 1, Envelope::new(0.0, 0.0, 1.0, 1.0))));
        assert!(!admin.is_duplicate(&error(0, 2, Envelope::new(0.0, 0.0, 1.0, 1.0))));
        assert!(!admin.is_duplicate(&error(0, 1, Envelope::new(0.0, 0.0, 2.0, 1.0))));
    }

    #[test]
    fn dropped_geometry_still_tells_errors_apart() {
        let mut admin = QaErrorAdministrator::new(false);
        let square = error(0, 1, Envelope::new(0.0, 0.0, 1.0, 1.0));
        admin.add(square.clone());

        let triangle = geo_types::Polygon::new(
            geo_types::LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (0.0, 0.0)]),
            vec![],
        );
        let other = QaError::new(
            0,
            "Test",
            "too close",
            vec![InvolvedRow::new("Roads", 1)],
            Some(Arc::new(Shape::new(triangle))),
        );

        assert_eq!(other.envelope, square.envelope);
        assert!(admin.is_duplicate(&square));
        assert!(!admin.is_duplicate(&other));
    }

    #[test]
    fn clear_before_keeps_reachable_errors() {
        let mut admin = QaErrorAdministrator::new(true);
        admin.add(error(0, 1, Envelope::new(0.0, 0.0, 1.0, 1.0)));
        admin.add(error(0, 2, Envelope::new(0.0, 0.0, 1.0, 50.0)));
        admin.add(QaError::new(0, "Test", "no geometry", vec![], None));

        admin.clear_before(10.0, 10.0);
        assert_eq!(admin.len(), 2);

        admin.clear();
        assert!(admin.is_empty());
    }
}
