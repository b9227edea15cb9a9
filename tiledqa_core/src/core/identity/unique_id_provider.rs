use ahash::AHashMap;
use log::debug;
use smallvec::SmallVec;

use crate::core::data::{InvolvedRow, ReadOnlyTable, Row, RowId};

use super::row_key::RowKey;

/// Field of a joined table holding the key of one contributing base table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyField {
    pub field_index: usize,
    pub table_name: String,
}

/// Assigns stable synthetic ids to rows of joined tables without a native key.
///
/// Ids start at 1, are allocated on first sight of a key tuple and are never
/// handed out twice during a run, even after `remove`.
#[derive(Debug)]
pub struct UniqueIdProvider {
    key_fields: SmallVec<[KeyField; 4]>,
    ids: AHashMap<RowKey, RowId>,
    keys: AHashMap<RowId, RowKey>,
    next_id: RowId,
}

impl UniqueIdProvider {
    pub fn new(key_fields: impl IntoIterator<Item = KeyField>) -> Self {
        Self {
            key_fields: key_fields.into_iter().collect(),
            ids: AHashMap::new(),
            keys: AHashMap::new(),
            next_id: 1,
        }
    }

    /// Maps the qualified `Table.Column` fields of a joined table to the key
    /// fields of its contributing tables.
    ///
    /// Returns `None` for tables with a native key, or if no key field could be
    /// mapped.
    pub fn create(table: &dyn ReadOnlyTable) -> Option<Self> {
        if table.oid_field_name().is_some() {
            return None;
        }

        let mut key_fields = Vec::new();
        for source in table.join_sources() {
            let qualified = format!("{}.{}", source.table_name, source.key_field);
            if let Some(field_index) = table.field_index(&qualified) {
                key_fields.push(KeyField {
                    field_index,
                    table_name: source.table_name.clone(),
                });
            } else {
                debug!(
                    "{}: key field {} not found, rows of {} are not identified",
                    table.name(),
                    qualified,
                    source.table_name
                );
            }
        }

        if key_fields.is_empty() {
            return None;
        }

        Some(Self::new(key_fields))
    }

    pub fn key_fields(&self) -> &[KeyField] {
        &self.key_fields
    }

    /// Number of live ids.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn row_key(&self, row: &Row) -> RowKey {
        RowKey::new(
            self.key_fields
                .iter()
                .map(|key| row.value(key.field_index).and_then(|value| value.as_i64())),
        )
    }

    pub fn get_unique_id(&mut self, row: &Row) -> RowId {
        let key = self.row_key(row);
        self.get_key_id(key)
    }

    pub fn get_key_id(&mut self, key: RowKey) -> RowId {
        if let Some(id) = self.ids.get(&key) {
            return *id;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.keys.insert(id, key.clone());
        self.ids.insert(key, id);
        id
    }

    /// Contributing (table, key) pairs of `id`; null keys are skipped.
    pub fn get_involved_rows(&self, id: RowId) -> Vec<InvolvedRow> {
        let Some(key) = self.keys.get(&id) else {
            return Vec::new();
        };

        self.key_fields
            .iter()
            .zip(key.values())
            .filter_map(|(field, value)| {
                value.map(|oid| InvolvedRow::new(field.table_name.clone(), oid))
            })
            .collect()
    }

    pub fn remove(&mut self, id: RowId) -> bool {
        match self.keys.remove(&id) {
            Some(key) => {
                self.ids.remove(&key);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::core::data::{Field, FieldType, FieldValue, JoinSource, MemoryTable};

    use super::*;

    fn provider() -> UniqueIdProvider {
        UniqueIdProvider::new([
            KeyField { field_index: 0, table_name: "Strasse".to_string() },
            KeyField { field_index: 1, table_name: "Name".to_string() },
            KeyField { field_index: 2, table_name: "Typ".to_string() },
        ])
    }

    #[test]
    fn same_tuple_same_id() {
        let mut provider = provider();

        let a = provider.get_key_id(RowKey::from(vec![Some(5), None, Some(3)]));
        let b = provider.get_key_id(RowKey::from(vec![Some(5), None, Some(3)]));
        let c = provider.get_key_id(RowKey::from(vec![Some(5), Some(7), Some(3)]));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(provider.len(), 2);
    }

    #[test]
    fn removed_ids_are_not_reused() {
        let mut provider = provider();

        let first = provider.get_key_id(RowKey::from(vec![Some(1), Some(2), Some(3)]));
        assert!(provider.remove(first));
        assert!(!provider.remove(first));

        let second = provider.get_key_id(RowKey::from(vec![Some(4), Some(5), Some(6)]));
        let again = provider.get_key_id(RowKey::from(vec![Some(1), Some(2), Some(3)]));

        assert_ne!(first, second);
        assert_ne!(again, second);
        assert_ne!(again, first);
        assert!(provider.get_involved_rows(first).is_empty());
    }

    #[test]
    fn involved_rows_skip_nulls() {
        let mut provider = provider();
        let id = provider.get_key_id(RowKey::from(vec![Some(42), None, Some(7)]));

        assert_eq!(
            provider.get_involved_rows(id),
            vec![InvolvedRow::new("Strasse", 42), InvolvedRow::new("Typ", 7)]
        );
    }

    #[test]
    fn create_maps_qualified_fields() {
        let mut table = MemoryTable::joined(
            "Strasse_Name",
            vec![
                Field::new("SHAPE", FieldType::Geometry),
                Field::new("Strasse.OBJECTID", FieldType::Integer),
                Field::new("Name.OBJECTID", FieldType::Integer),
            ],
            vec![
                JoinSource::new("Strasse", "OBJECTID"),
                JoinSource::new("Name", "OBJECTID"),
                JoinSource::new("Missing", "OBJECTID"),
            ],
        );
        table.add(
            None,
            vec![FieldValue::Null, FieldValue::Integer(42), FieldValue::Null],
        );

        let mut provider = UniqueIdProvider::create(&table).unwrap();
        assert_eq!(provider.key_fields().len(), 2);
        assert_eq!(provider.key_fields()[0].field_index, 1);

        let row = Row::new(None, None, vec![FieldValue::Null, FieldValue::Integer(42), FieldValue::Null]);
        let id = provider.get_unique_id(&row);
        assert_eq!(provider.get_involved_rows(id), vec![InvolvedRow::new("Strasse", 42)]);

        let plain = MemoryTable::new("Strasse", vec![Field::new("OBJECTID", FieldType::Oid)]);
        assert!(UniqueIdProvider::create(&plain).is_none());
    }
}
