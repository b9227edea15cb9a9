use std::fmt;
use std::sync::Arc;

use crate::core::data::{Row, RowConstraint};

/// Options of a cache search issued by a test.
#[derive(Clone, Default)]
pub struct QueryFilterHelper {
    pub constraint: Option<Arc<dyn RowConstraint>>,
    /// Return rows already returned in an earlier tile. Defaults to `for_network`.
    pub repeat_cached_rows: Option<bool>,
    /// Network style search: point filters outside the current tile find nothing.
    pub for_network: bool,
    /// Rows with a smaller object id are skipped.
    pub minimum_oid: Option<i64>,
    /// Check the constraint before the spatial relation.
    pub attribute_first: bool,
}

impl QueryFilterHelper {
    pub fn new(constraint: Option<Arc<dyn RowConstraint>>) -> Self {
        Self {
            constraint,
            ..Self::default()
        }
    }

    pub fn for_network(mut self) -> Self {
        self.for_network = true;
        self
    }

    pub fn with_repeat_cached_rows(mut self, repeat: bool) -> Self {
        self.repeat_cached_rows = Some(repeat);
        self
    }

    pub fn with_minimum_oid(mut self, minimum_oid: i64) -> Self {
        self.minimum_oid = Some(minimum_oid);
        self
    }

    pub fn with_attribute_first(mut self, attribute_first: bool) -> Self {
        self.attribute_first = attribute_first;
        self
    }

    #[inline]
    pub fn repeat_cached_rows(&self) -> bool {
        self.repeat_cached_rows.unwrap_or(self.for_network)
    }

    pub fn matches_constraint(&self, row: &Row) -> bool {
        self.constraint
            .as_ref()
            .is_none_or(|constraint| constraint.matches(row))
    }

    pub fn is_below_minimum_oid(&self, oid: Option<i64>) -> bool {
        match (self.minimum_oid, oid) {
            (Some(minimum), Some(oid)) => oid < minimum,
            _ => false,
        }
    }
}

impl fmt::Debug for QueryFilterHelper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryFilterHelper")
            .field(
                "constraint",
                &self.constraint.as_ref().map(|constraint| constraint.expression()),
            )
            .field("repeat_cached_rows", &self.repeat_cached_rows)
            .field("for_network", &self.for_network)
            .field("minimum_oid", &self.minimum_oid)
            .field("attribute_first", &self.attribute_first)
            .finish()
    }
}
