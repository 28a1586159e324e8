//! Structural facts about entity types: table, fields and primary key.

use std::{
    any::TypeId,
    collections::{BTreeMap, HashMap},
    rc::Rc,
};

use serde::Serialize;

use crate::{
    arena::{Arena, EntityId},
    entity::Entity,
    error::{Result, SnakeError},
    value::{FieldValues, Value},
};

/// Primary key used when an entity declares none.
const DEFAULT_PRIMARY_KEY: (&str, bool) = ("id", true);

/// Cached description of one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityMetadata {
    #[serde(skip)]
    type_id: TypeId,
    class_name: &'static str,
    table_name: String,
    fields: Vec<&'static str>,
    primary_key: Vec<(&'static str, bool)>,
}

impl EntityMetadata {
    /// Derives the metadata of `E`, validating its primary-key declaration.
    pub fn of<E: Entity>() -> Result<Self> {
        let class_name = E::class_name();
        let fields: Vec<&'static str> = E::fields().iter().map(|field| field.name).collect();
        let primary_key = match E::primary_definition() {
            Some(definition) => {
                let columns = definition.columns();
                validate_primary_key(class_name, &fields, &columns)?;
                columns
            }
            None => vec![DEFAULT_PRIMARY_KEY],
        };

        Ok(Self {
            type_id: TypeId::of::<E>(),
            class_name,
            table_name: table_name_for(class_name),
            fields,
            primary_key,
        })
    }

    pub fn class_name(&self) -> &'static str {
        self.class_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Persistable field names in declaration order.
    pub fn fields(&self) -> &[&'static str] {
        &self.fields
    }

    /// Ordered `(field, auto-generated)` pairs of the primary key.
    pub fn primary_key_columns(&self) -> &[(&'static str, bool)] {
        &self.primary_key
    }

    pub fn is_primary(&self, field: &str) -> bool {
        self.primary_key.iter().any(|(column, _)| *column == field)
    }

    pub fn has_auto_increment_primary(&self) -> bool {
        self.primary_key.iter().any(|(_, auto)| *auto)
    }

    /// The first auto-generated primary-key field, if any.
    pub fn auto_increment_field(&self) -> Option<&'static str> {
        self.primary_key
            .iter()
            .find(|(_, auto)| *auto)
            .map(|(column, _)| *column)
    }

    /// Current value of every persistable field, in field order.
    pub fn values_of<E: Entity>(&self, entity: &E) -> Result<FieldValues> {
        self.check_type::<E>()?;
        Ok(E::fields()
            .iter()
            .map(|field| (field.name.to_string(), field.value(entity)))
            .collect())
    }

    /// Primary-key values in key order; null and empty values are left out.
    pub fn primary_values_of<E: Entity>(&self, entity: &E) -> Result<FieldValues> {
        let values = self.values_of(entity)?;
        Ok(self
            .primary_key
            .iter()
            .filter_map(|(column, _)| {
                values
                    .get(column)
                    .filter(|value| !value.is_empty())
                    .map(|value| (column.to_string(), value.clone()))
            })
            .collect())
    }

    /// Writes `values` onto the instances they are keyed by.
    ///
    /// # Errors
    ///
    /// Returns `SnakeError::EntityTypeMismatch` when an instance is not an `E`
    /// and `SnakeError::UnknownField` when `E` has no field `field`.
    pub fn assign_generated_key<E: Entity>(
        &self,
        field: &str,
        entities: &mut Arena,
        values: &BTreeMap<EntityId, Value>,
    ) -> Result<()> {
        self.check_type::<E>()?;
        let descriptor = E::fields()
            .iter()
            .find(|descriptor| descriptor.name == field)
            .ok_or_else(|| SnakeError::UnknownField {
                entity: self.class_name.to_string(),
                field: field.to_string(),
            })?;

        for (id, value) in values {
            let entity = entities.expect_mut::<E>(*id)?;
            descriptor.assign(entity, value.clone())?;
        }

        Ok(())
    }

    fn check_type<E: Entity>(&self) -> Result<()> {
        if TypeId::of::<E>() == self.type_id {
            Ok(())
        } else {
            Err(SnakeError::EntityTypeMismatch {
                expected: self.class_name.to_string(),
                found: E::class_name().to_string(),
            })
        }
    }
}

fn validate_primary_key(
    class_name: &str,
    fields: &[&'static str],
    columns: &[(&'static str, bool)],
) -> Result<()> {
    let invalid = |reason: String| SnakeError::InvalidPrimaryDefinition {
        entity: class_name.to_string(),
        reason,
    };

    if columns.is_empty() {
        return Err(invalid("Declaration is empty, expected at least one field".to_string()));
    }

    for (position, (column, _)) in columns.iter().enumerate() {
        if !fields.contains(column) {
            return Err(invalid(format!("Field \"{column}\" is not a persistable field")));
        }
        if columns[..position].iter().any(|(seen, _)| seen == column) {
            return Err(invalid(format!("Field \"{column}\" is declared twice")));
        }
    }

    Ok(())
}

/// Converts a type path to its table name.
///
/// The module path and generic arguments are stripped, then an underscore is
/// inserted before every upper-case letter after the first and the result is
/// lower-cased: `app::FooEntity` becomes `foo_entity`. Acronyms are not
/// special-cased, so `HTTPBar` becomes `h_t_t_p_bar`.
pub fn table_name_for(class_name: &str) -> String {
    let without_generics = class_name.split('<').next().unwrap_or(class_name);
    let simple_name = without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics);

    let mut table_name = String::with_capacity(simple_name.len() + 4);
    for (position, ch) in simple_name.chars().enumerate() {
        if position > 0 && ch.is_ascii_uppercase() {
            table_name.push('_');
        }
        table_name.push(ch.to_ascii_lowercase());
    }
    table_name
}

/// Per-type cache of [`EntityMetadata`].
#[derive(Debug, Default)]
pub struct MetadataProvider {
    cache: HashMap<TypeId, Rc<EntityMetadata>>,
}

impl MetadataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the metadata of `E`, deriving it on first use.
    ///
    /// Declaration errors are not cached and are reported on every call.
    pub fn metadata_for<E: Entity>(&mut self) -> Result<Rc<EntityMetadata>> {
        if let Some(metadata) = self.cache.get(&TypeId::of::<E>()) {
            return Ok(Rc::clone(metadata));
        }

        let metadata = Rc::new(EntityMetadata::of::<E>()?);
        self.cache.insert(TypeId::of::<E>(), Rc::clone(&metadata));
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Field, PrimaryDefinition};

    mod fixtures {
        #[derive(Debug, Default)]
        pub struct FooEntity {
            pub id: Option<i64>,
            pub name: String,
            pub bar: Option<String>,
        }

        crate::impl_entity!(FooEntity {
            fields: [id, name, bar],
        });

        #[derive(Debug, Default)]
        pub struct BarEntity {
            pub bar_id: Option<i64>,
            pub baz_id: Option<i64>,
            pub info: String,
        }

        crate::impl_entity!(BarEntity {
            fields: [bar_id, baz_id, info],
            primary: [bar_id => false, baz_id => false],
        });

        #[derive(Debug, Default)]
        pub struct HTTPBar {
            pub id: Option<i64>,
        }

        crate::impl_entity!(HTTPBar { fields: [id] });
    }

    use fixtures::{BarEntity, FooEntity, HTTPBar};

    #[derive(Debug, Default)]
    struct FaultyEntity {
        id: i64,
    }

    impl Entity for FaultyEntity {
        fn fields() -> &'static [Field<Self>] {
            static FIELDS: &[Field<FaultyEntity>] = &[Field {
                name: "id",
                get: |entity: &FaultyEntity| Value::Integer(entity.id),
                set: |entity: &mut FaultyEntity, value: Value| {
                    entity.id = crate::value::FieldValue::from_value(value)?;
                    Ok(())
                },
            }];
            FIELDS
        }

        fn primary_definition() -> Option<PrimaryDefinition> {
            Some(PrimaryDefinition::Columns(&["uuid"]))
        }
    }

    #[derive(Debug, Default)]
    struct EmptyKeyEntity {
        id: i64,
    }

    impl Entity for EmptyKeyEntity {
        fn fields() -> &'static [Field<Self>] {
            static FIELDS: &[Field<EmptyKeyEntity>] = &[Field {
                name: "id",
                get: |entity: &EmptyKeyEntity| Value::Integer(entity.id),
                set: |_: &mut EmptyKeyEntity, _: Value| Ok(()),
            }];
            FIELDS
        }

        fn primary_definition() -> Option<PrimaryDefinition> {
            Some(PrimaryDefinition::Flagged(&[]))
        }
    }

    #[test]
    fn test_table_name() {
        let meta = EntityMetadata::of::<FooEntity>().unwrap();
        assert_eq!(meta.table_name(), "foo_entity");
        assert_eq!(meta.class_name(), std::any::type_name::<FooEntity>());
    }

    #[test]
    fn test_table_name_keeps_acronym_quirk() {
        let meta = EntityMetadata::of::<HTTPBar>().unwrap();
        assert_eq!(meta.table_name(), "h_t_t_p_bar");
    }

    #[test]
    fn test_table_name_for_strips_path_and_generics() {
        assert_eq!(table_name_for("app::models::FooEntity"), "foo_entity");
        assert_eq!(table_name_for("Wrapper<app::Inner>"), "wrapper");
        assert_eq!(table_name_for("plain"), "plain");
    }

    #[test]
    fn test_primary_key_columns_default_id() {
        let meta = EntityMetadata::of::<FooEntity>().unwrap();

        assert_eq!(meta.primary_key_columns(), &[("id", true)]);
        assert!(meta.has_auto_increment_primary());
        assert_eq!(meta.auto_increment_field(), Some("id"));
    }

    #[test]
    fn test_primary_key_columns_when_defined() {
        let meta = EntityMetadata::of::<BarEntity>().unwrap();

        assert_eq!(
            meta.primary_key_columns(),
            &[("bar_id", false), ("baz_id", false)]
        );
        assert!(!meta.has_auto_increment_primary());
        assert_eq!(meta.auto_increment_field(), None);
    }

    #[test]
    fn test_primary_key_naming_unknown_field_is_rejected() {
        let err = EntityMetadata::of::<FaultyEntity>().unwrap_err();

        assert!(err.to_string().contains("is not a persistable field"));
        assert_eq!(err.kind(), crate::error::ErrorKind::Metadata);
    }

    #[test]
    fn test_empty_primary_key_is_rejected() {
        let err = EntityMetadata::of::<EmptyKeyEntity>().unwrap_err();
        assert!(err.to_string().contains("expected at least one field"));
    }

    #[test]
    fn test_values_of() {
        let meta = EntityMetadata::of::<FooEntity>().unwrap();
        let values = meta.values_of(&FooEntity::default()).unwrap();

        let expected: FieldValues = [
            ("id", Value::Null),
            ("name", Value::from("")),
            ("bar", Value::Null),
        ]
        .into_iter()
        .collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn test_values_of_rejects_other_types() {
        let meta = EntityMetadata::of::<FooEntity>().unwrap();
        let err = meta.values_of(&BarEntity::default()).unwrap_err();

        assert!(matches!(err, SnakeError::EntityTypeMismatch { .. }));
    }

    #[test]
    fn test_primary_values_drop_nulls_and_follow_key_order() {
        let meta = EntityMetadata::of::<BarEntity>().unwrap();
        let mut bar = BarEntity::default();
        assert!(meta.primary_values_of(&bar).unwrap().is_empty());

        bar.baz_id = Some(2);
        bar.bar_id = Some(13);
        let values = meta.primary_values_of(&bar).unwrap();

        let columns: Vec<_> = values.iter().map(|(column, _)| column.as_str()).collect();
        assert_eq!(columns, vec!["bar_id", "baz_id"]);
        assert_eq!(values.get("baz_id"), Some(&Value::Integer(2)));
    }

    #[test]
    fn test_assign_generated_key() {
        let meta = EntityMetadata::of::<FooEntity>().unwrap();
        let mut arena = Arena::new();
        let first = arena.insert(FooEntity::default());
        let second = arena.insert(FooEntity::default());

        let values = BTreeMap::from([
            (first.id(), Value::Integer(1)),
            (second.id(), Value::Integer(2)),
        ]);
        meta.assign_generated_key::<FooEntity>("id", &mut arena, &values)
            .unwrap();

        assert_eq!(arena.get(first).unwrap().id, Some(1));
        assert_eq!(arena.get(second).unwrap().id, Some(2));
    }

    #[test]
    fn test_assign_generated_key_rejects_foreign_instances() {
        let meta = EntityMetadata::of::<FooEntity>().unwrap();
        let mut arena = Arena::new();
        let bar = arena.insert(BarEntity::default());

        let values = BTreeMap::from([(bar.id(), Value::Integer(1))]);
        let err = meta
            .assign_generated_key::<FooEntity>("id", &mut arena, &values)
            .unwrap_err();

        assert!(matches!(err, SnakeError::EntityTypeMismatch { .. }));
    }

    #[test]
    fn test_provider_memoizes_per_type() {
        let mut provider = MetadataProvider::new();

        let first = provider.metadata_for::<FooEntity>().unwrap();
        let second = provider.metadata_for::<FooEntity>().unwrap();

        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_provider_reports_errors_every_time() {
        let mut provider = MetadataProvider::new();

        assert!(provider.metadata_for::<FaultyEntity>().is_err());
        assert!(provider.metadata_for::<FaultyEntity>().is_err());
    }
}
