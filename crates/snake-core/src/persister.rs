//! Per-entity-type SQL operations.
//!
//! A [`Persister`] turns an entity type's metadata and an instance's current
//! field values into statements against that type's table. Every method maps
//! to one round trip, except [`Persister::flush_inserts`], which prepares one
//! `INSERT` and executes it once per queued instance.

use std::{any::Any, collections::BTreeMap, marker::PhantomData, rc::Rc};

use log::debug;
use rusqlite::{params_from_iter, Connection, Row};

use crate::{
    arena::{Arena, EntityId, Handle},
    entity::Entity,
    error::{DatabaseResultExt, Result},
    metadata::EntityMetadata,
    sql::{self, Select, Statement},
    value::{FieldValues, Value},
};

/// SQL operations for entities of type `E`.
pub struct Persister<E: Entity> {
    meta: Rc<EntityMetadata>,
    queued_inserts: Vec<EntityId>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity> Persister<E> {
    pub fn new(meta: Rc<EntityMetadata>) -> Self {
        Self {
            meta,
            queued_inserts: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Queues an instance for the next [`flush_inserts`](Self::flush_inserts).
    /// Queueing the same instance twice keeps a single entry.
    pub fn queue_insert(&mut self, handle: Handle<E>) {
        self.queue_insert_id(handle.id());
    }

    fn queue_insert_id(&mut self, id: EntityId) {
        if !self.queued_inserts.contains(&id) {
            self.queued_inserts.push(id);
        }
    }

    /// Instances waiting for insertion, in queue order.
    pub fn queued_inserts(&self) -> &[EntityId] {
        &self.queued_inserts
    }

    /// Columns written by `INSERT`: every field except auto-generated keys.
    fn insert_columns(&self) -> Vec<&'static str> {
        let auto_field = self.meta.auto_increment_field();
        self.meta
            .fields()
            .iter()
            .copied()
            .filter(|field| Some(*field) != auto_field)
            .collect()
    }

    pub fn insert_sql(&self) -> String {
        sql::insert(self.meta.table_name(), self.insert_columns())
    }

    /// Inserts every queued instance and returns the generated keys by
    /// instance identity.
    ///
    /// The map is empty when the type has no auto-generated key. The queue
    /// is emptied whether or not the batch succeeds.
    pub fn flush_inserts(
        &mut self,
        conn: &Connection,
        entities: &Arena,
    ) -> Result<BTreeMap<EntityId, Value>> {
        let queued = std::mem::take(&mut self.queued_inserts);
        let mut generated = BTreeMap::new();
        if queued.is_empty() {
            return Ok(generated);
        }

        let insert_sql = self.insert_sql();
        let columns = self.insert_columns();
        let has_auto_increment = self.meta.has_auto_increment_primary();

        debug!("insert {} rows: {}", queued.len(), insert_sql);
        let mut stmt = conn
            .prepare(&insert_sql)
            .db_context("Failed to prepare insert")?;

        for id in queued {
            let entity = entities.expect::<E>(id)?;
            let params: Vec<Value> = self
                .meta
                .values_of(entity)?
                .into_iter()
                .filter(|(column, _)| columns.iter().any(|included| included == column))
                .map(|(_, value)| value)
                .collect();

            stmt.execute(params_from_iter(params.iter()))
                .db_context("Failed to insert entity")?;

            if has_auto_increment {
                generated.insert(id, Value::Integer(conn.last_insert_rowid()));
            }
        }

        Ok(generated)
    }

    /// Splits the current values into non-key and key fields.
    fn split_values(&self, entity: &E) -> Result<(FieldValues, FieldValues)> {
        let mut values = FieldValues::new();
        let mut primary_values = FieldValues::new();

        for (column, value) in self.meta.values_of(entity)? {
            if self.meta.is_primary(&column) {
                primary_values.insert(column, value);
            } else {
                values.insert(column, value);
            }
        }

        Ok((values, primary_values))
    }

    pub fn update_statement(&self, entity: &E) -> Result<Statement> {
        let (values, primary_values) = self.split_values(entity)?;
        Ok(sql::update(self.meta.table_name(), &values, &primary_values))
    }

    pub fn delete_statement(&self, entity: &E) -> Result<Statement> {
        let (_, primary_values) = self.split_values(entity)?;
        Ok(sql::delete(self.meta.table_name(), &primary_values))
    }

    /// Writes every non-key field of `entity` to the row matching its
    /// current primary-key values.
    pub fn update(&self, conn: &Connection, entity: &E) -> Result<()> {
        let (values, _) = self.split_values(entity)?;
        if values.is_empty() {
            debug!("skip update of {}: no non-key fields", self.meta.table_name());
            return Ok(());
        }

        self.update_statement(entity)?.execute(conn)?;
        Ok(())
    }

    /// Deletes the row matching the current primary-key values of `entity`.
    pub fn delete(&self, conn: &Connection, entity: &E) -> Result<()> {
        self.delete_statement(entity)?.execute(conn)?;
        Ok(())
    }

    /// `SELECT` of every persistable field, without predicates.
    pub fn select(&self) -> Select {
        sql::select(self.meta.table_name()).columns(self.meta.fields().iter().copied())
    }

    /// True when at least one row matches every `criteria` equality.
    pub fn exists(&self, conn: &Connection, criteria: &FieldValues) -> Result<bool> {
        let mut query = sql::select(self.meta.table_name()).raw("1");
        query.where_all(criteria).limit(1);
        let statement = query.to_statement();

        debug!("exists: {} {:?}", statement.sql, statement.params);
        let mut stmt = conn
            .prepare_cached(&statement.sql)
            .db_context("Failed to prepare query")?;
        stmt.exists(params_from_iter(statement.params.iter()))
            .db_context("Failed to query entity existence")
    }

    /// Materializes the first row matching `criteria`.
    pub fn load(&self, conn: &Connection, criteria: &FieldValues) -> Result<Option<E>> {
        let mut query = self.select();
        query.where_all(criteria).limit(1);
        Ok(self.query(conn, &query)?.into_iter().next())
    }

    /// Materializes every row of the table, in result order.
    pub fn load_all(&self, conn: &Connection) -> Result<Vec<E>> {
        self.query(conn, &self.select())
    }

    /// Like [`load_all`](Self::load_all), letting `customize` add filters,
    /// ordering or a limit first.
    pub fn load_all_with<F>(&self, conn: &Connection, customize: F) -> Result<Vec<E>>
    where
        F: FnOnce(&mut Select),
    {
        let mut query = self.select();
        customize(&mut query);
        self.query(conn, &query)
    }

    fn query(&self, conn: &Connection, query: &Select) -> Result<Vec<E>> {
        let statement = query.to_statement();

        debug!("query: {} {:?}", statement.sql, statement.params);
        let mut stmt = conn
            .prepare_cached(&statement.sql)
            .db_context("Failed to prepare query")?;
        let mut rows = stmt
            .query(params_from_iter(statement.params.iter()))
            .db_context("Failed to query entities")?;

        let mut entities = Vec::new();
        while let Some(row) = rows.next().db_context("Failed to fetch row")? {
            entities.push(Self::hydrate(row)?);
        }
        Ok(entities)
    }

    /// Builds an instance from a row whose columns follow field order.
    fn hydrate(row: &Row<'_>) -> Result<E> {
        let mut entity = E::default();
        for (index, field) in E::fields().iter().enumerate() {
            let value: Value = row.get(index).db_context("Failed to read column")?;
            field.assign(&mut entity, value)?;
        }
        Ok(entity)
    }
}

/// Type-erased persister operations the entity manager needs while it
/// walks instances of mixed types.
pub(crate) trait ErasedPersister {
    fn metadata_rc(&self) -> &Rc<EntityMetadata>;

    fn queue_insert_erased(&mut self, id: EntityId);

    fn flush_queued(
        &mut self,
        conn: &Connection,
        entities: &Arena,
    ) -> Result<BTreeMap<EntityId, Value>>;

    fn update_erased(&self, conn: &Connection, entities: &Arena, id: EntityId) -> Result<()>;

    fn delete_erased(&self, conn: &Connection, entities: &Arena, id: EntityId) -> Result<()>;

    fn primary_values_erased(&self, entities: &Arena, id: EntityId) -> Result<FieldValues>;

    fn assign_generated_keys(
        &self,
        entities: &mut Arena,
        keys: &BTreeMap<EntityId, Value>,
    ) -> Result<()>;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: Entity> ErasedPersister for Persister<E> {
    fn metadata_rc(&self) -> &Rc<EntityMetadata> {
        &self.meta
    }

    fn queue_insert_erased(&mut self, id: EntityId) {
        self.queue_insert_id(id);
    }

    fn flush_queued(
        &mut self,
        conn: &Connection,
        entities: &Arena,
    ) -> Result<BTreeMap<EntityId, Value>> {
        self.flush_inserts(conn, entities)
    }

    fn update_erased(&self, conn: &Connection, entities: &Arena, id: EntityId) -> Result<()> {
        self.update(conn, entities.expect::<E>(id)?)
    }

    fn delete_erased(&self, conn: &Connection, entities: &Arena, id: EntityId) -> Result<()> {
        self.delete(conn, entities.expect::<E>(id)?)
    }

    fn primary_values_erased(&self, entities: &Arena, id: EntityId) -> Result<FieldValues> {
        self.meta.primary_values_of(entities.expect::<E>(id)?)
    }

    fn assign_generated_keys(
        &self,
        entities: &mut Arena,
        keys: &BTreeMap<EntityId, Value>,
    ) -> Result<()> {
        match self.meta.auto_increment_field() {
            Some(field) if !keys.is_empty() => {
                self.meta.assign_generated_key::<E>(field, entities, keys)
            }
            _ => Ok(()),
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
