//! Primary-key arguments accepted by lookups.

use crate::{
    error::{Result, SnakeError},
    metadata::EntityMetadata,
    value::{FieldValues, Value},
};

/// Field holding the key when a lookup is given a bare value.
const SCALAR_KEY_FIELD: &str = "id";

/// A primary key as supplied by a caller: either the bare value of an `id`
/// field or a mapping of key fields to values, in any order.
#[derive(Debug, Clone, PartialEq)]
pub enum Identifier {
    Scalar(Value),
    Fields(FieldValues),
}

impl Identifier {
    /// Reorders the supplied fields into the declared primary-key order.
    ///
    /// # Errors
    ///
    /// Returns `SnakeError::MissingPrimaryKey` for the first declared key
    /// field that is absent or null, and `SnakeError::UnknownPrimaryKeys`
    /// listing every supplied field that is not part of the key.
    pub fn normalize(self, meta: &EntityMetadata) -> Result<FieldValues> {
        let mut supplied = match self {
            Identifier::Scalar(value) => FieldValues::from([(SCALAR_KEY_FIELD, value)]),
            Identifier::Fields(fields) => fields,
        };

        let mut key = FieldValues::new();
        for (column, _) in meta.primary_key_columns() {
            match supplied.remove(column) {
                Some(value) if !value.is_null() => key.insert(*column, value),
                _ => {
                    return Err(SnakeError::MissingPrimaryKey {
                        entity: meta.class_name().to_string(),
                        column: column.to_string(),
                    })
                }
            }
        }

        if !supplied.is_empty() {
            return Err(SnakeError::UnknownPrimaryKeys {
                entity: meta.class_name().to_string(),
                columns: supplied.names().map(String::from).collect(),
            });
        }

        Ok(key)
    }
}

impl From<Value> for Identifier {
    fn from(value: Value) -> Self {
        Identifier::Scalar(value)
    }
}

impl From<i64> for Identifier {
    fn from(value: i64) -> Self {
        Identifier::Scalar(Value::Integer(value))
    }
}

impl From<i32> for Identifier {
    fn from(value: i32) -> Self {
        Identifier::Scalar(Value::from(value))
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Identifier::Scalar(Value::from(value))
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Identifier::Scalar(Value::Text(value))
    }
}

impl From<FieldValues> for Identifier {
    fn from(fields: FieldValues) -> Self {
        Identifier::Fields(fields)
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Identifier {
    fn from(pairs: [(K, V); N]) -> Self {
        Identifier::Fields(FieldValues::from(pairs))
    }
}
