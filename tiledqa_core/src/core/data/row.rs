use std::fmt;
use std::sync::Arc;

use crate::core::geometry::{Envelope, Shape};

/// Index of a table in the container's table registry.
pub type TableId = usize;

/// Native object id, or the synthetic unique id of a joined row.
pub type RowId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Oid,
    Integer,
    Double,
    Text,
    Blob,
    Geometry,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl FieldValue {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Integer view used for key columns. Doubles with an integral value qualify.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(value) => Some(*value),
            FieldValue::Double(value) if value.fract() == 0.0 => Some(*value as i64),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "<null>"),
            FieldValue::Integer(value) => write!(f, "{}", value),
            FieldValue::Double(value) => write!(f, "{}", value),
            FieldValue::Text(value) => write!(f, "{}", value),
            FieldValue::Blob(value) => write!(f, "<blob {} bytes>", value.len()),
        }
    }
}

/// A row as delivered by a table cursor. Values follow the table's field order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub oid: Option<i64>,
    pub shape: Option<Arc<Shape>>,
    pub values: Vec<FieldValue>,
}

impl Row {
    pub fn new(oid: Option<i64>, shape: Option<Arc<Shape>>, values: Vec<FieldValue>) -> Self {
        Self { oid, shape, values }
    }

    #[inline]
    pub fn value(&self, index: usize) -> Option<&FieldValue> {
        self.values.get(index)
    }

    /// Envelope of the shape; `None` for rows without (or with empty) geometry.
    #[inline]
    pub fn extent(&self) -> Option<Envelope> {
        self.shape.as_ref().and_then(|shape| shape.envelope())
    }

    pub fn point_count(&self) -> usize {
        self.shape.as_ref().map_or(0, |shape| shape.point_count())
    }

    /// Copy with blob values replaced by `Null`.
    pub fn without_blobs(&self) -> Row {
        Row {
            oid: self.oid,
            shape: self.shape.clone(),
            values: self
                .values
                .iter()
                .map(|value| match value {
                    FieldValue::Blob(_) => FieldValue::Null,
                    other => other.clone(),
                })
                .collect(),
        }
    }
}

/// A (base table, key) pair an error refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvolvedRow {
    pub table_name: String,
    pub oid: i64,
}

impl InvolvedRow {
    pub fn new(table_name: impl Into<String>, oid: i64) -> Self {
        Self {
            table_name: table_name.into(),
            oid,
        }
    }
}

impl fmt::Display for InvolvedRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_name, self.oid)
    }
}
