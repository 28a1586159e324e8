//! The static capability every persistable type provides.
//!
//! An entity is a plain struct with a [`Default`] value. It registers its
//! persistable fields as [`Field`] descriptors, in declaration order, and may
//! declare its primary key. The [`impl_entity!`](crate::impl_entity) macro
//! writes the descriptors for the common case:
//!
//! ```rust
//! use snake_core::impl_entity;
//!
//! #[derive(Debug, Default)]
//! pub struct BarEntity {
//!     pub bar_id: Option<i64>,
//!     pub baz_id: Option<i64>,
//!     pub info: String,
//! }
//!
//! impl_entity!(BarEntity {
//!     fields: [bar_id, baz_id, info],
//!     primary: [bar_id => false, baz_id => false],
//! });
//! ```

use std::any::Any;

use crate::{
    error::{Result, SnakeError},
    value::{Value, ValueError},
};

/// Descriptor of one persistable field: its column name plus accessors.
pub struct Field<E> {
    pub name: &'static str,
    pub get: fn(&E) -> Value,
    pub set: fn(&mut E, Value) -> std::result::Result<(), ValueError>,
}

impl<E> Field<E> {
    /// Reads the field's current value off `entity`.
    pub fn value(&self, entity: &E) -> Value {
        (self.get)(entity)
    }

    /// Writes `value` onto `entity`, reporting values that do not fit.
    pub fn assign(&self, entity: &mut E, value: Value) -> Result<()> {
        (self.set)(entity, value).map_err(|e| SnakeError::Conversion {
            column: self.name.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Explicit primary-key declaration of an entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryDefinition {
    /// Ordered fields, each flagged auto-generated or not.
    Flagged(&'static [(&'static str, bool)]),
    /// Ordered fields, none of them auto-generated.
    Columns(&'static [&'static str]),
}

impl PrimaryDefinition {
    /// The declaration as ordered `(field, auto-generated)` pairs.
    pub fn columns(&self) -> Vec<(&'static str, bool)> {
        match self {
            PrimaryDefinition::Flagged(columns) => columns.to_vec(),
            PrimaryDefinition::Columns(columns) => {
                columns.iter().map(|column| (*column, false)).collect()
            }
        }
    }
}

/// A type whose instances map to rows of one table.
pub trait Entity: Default + Any {
    /// Persistable fields in declaration order.
    fn fields() -> &'static [Field<Self>];

    /// Explicit primary key; `None` means a single auto-generated `id`.
    fn primary_definition() -> Option<PrimaryDefinition> {
        None
    }

    /// Fully qualified type name; the table name derives from its last
    /// path segment.
    fn class_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Implements [`Entity`] for a struct whose fields implement
/// [`FieldValue`](crate::value::FieldValue).
///
/// `primary` takes either `field => auto_generated` pairs or bare field
/// names (none auto-generated). Leaving it out keeps the default `id` key.
#[macro_export]
macro_rules! impl_entity {
    (@fields $ty:ty, [$($field:ident),*], $primary:expr) => {
        impl $crate::entity::Entity for $ty {
            fn fields() -> &'static [$crate::entity::Field<Self>] {
                static FIELDS: &[$crate::entity::Field<$ty>] = &[
                    $(
                        $crate::entity::Field {
                            name: stringify!($field),
                            get: |entity: &$ty| $crate::value::FieldValue::to_value(&entity.$field),
                            set: |entity: &mut $ty, value: $crate::value::Value| {
                                entity.$field = $crate::value::FieldValue::from_value(value)?;
                                Ok(())
                            },
                        }
                    ),*
                ];
                FIELDS
            }

            fn primary_definition() -> Option<$crate::entity::PrimaryDefinition> {
                $primary
            }
        }
    };
    ($ty:ty { fields: [$($field:ident),* $(,)?] $(,)? }) => {
        $crate::impl_entity!(@fields $ty, [$($field),*], None);
    };
    ($ty:ty {
        fields: [$($field:ident),* $(,)?],
        primary: [$($key:ident => $auto:expr),+ $(,)?] $(,)?
    }) => {
        $crate::impl_entity!(
            @fields $ty,
            [$($field),*],
            Some($crate::entity::PrimaryDefinition::Flagged(&[
                $((stringify!($key), $auto)),+
            ]))
        );
    };
    ($ty:ty {
        fields: [$($field:ident),* $(,)?],
        primary: [$($key:ident),+ $(,)?] $(,)?
    }) => {
        $crate::impl_entity!(
            @fields $ty,
            [$($field),*],
            Some($crate::entity::PrimaryDefinition::Columns(&[$(stringify!($key)),+]))
        );
    };
}
