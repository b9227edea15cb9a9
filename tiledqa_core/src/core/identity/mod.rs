pub mod row_key;
pub mod unique_id_provider;

pub use row_key::RowKey;
pub use unique_id_provider::{KeyField, UniqueIdProvider};
