use std::fmt;

use smallvec::SmallVec;

/// Ordered key values of the base tables contributing to a joined row.
///
/// Compared element-wise; `None` sorts before every value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RowKey(SmallVec<[Option<i64>; 4]>);

impl RowKey {
    pub fn new(values: impl IntoIterator<Item = Option<i64>>) -> Self {
        RowKey(values.into_iter().collect())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn values(&self) -> &[Option<i64>] {
        &self.0
    }
}

impl From<Vec<Option<i64>>> for RowKey {
    fn from(values: Vec<Option<i64>>) -> Self {
        RowKey::new(values)
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match value {
                Some(value) => write!(f, "{}", value)?,
                None => write!(f, "null")?,
            }
        }
        write!(f, "]")
    }
}
