//! Identity map and unit of work.
//!
//! The [`EntityManager`] owns the connection, the arena of instances it
//! knows about, and all tracking state:
//!
//! - the **identity map**, guaranteeing at most one live instance per
//!   (entity type, primary key);
//! - the **state table**, recording the [`EntityState`] of each instance it
//!   has seen (absent means "derive on demand");
//! - the **pending-write sets** (inserts, updates, deletions), executed by
//!   [`EntityManager::flush`] inside one transaction.
//!
//! One manager serves one logical unit of work at a time and is passed
//! explicitly through the call chain.
//!
//! ```rust
//! use snake_core::{impl_entity, EntityManagerBuilder};
//!
//! #[derive(Debug, Default)]
//! struct FooEntity {
//!     id: Option<i64>,
//!     name: String,
//! }
//!
//! impl_entity!(FooEntity { fields: [id, name] });
//!
//! # fn main() -> snake_core::Result<()> {
//! let mut manager = EntityManagerBuilder::new().in_memory().build()?;
//! manager
//!     .connection()
//!     .execute_batch("CREATE TABLE foo_entity (id INTEGER PRIMARY KEY, name TEXT)")
//!     .unwrap();
//!
//! let foo = manager.attach(FooEntity {
//!     id: None,
//!     name: "n1".to_string(),
//! });
//! manager.persist(foo)?;
//! manager.flush()?;
//!
//! let id = manager.get(foo).and_then(|foo| foo.id).unwrap();
//! assert_eq!(manager.find::<FooEntity>(id)?, Some(foo));
//! # Ok(())
//! # }
//! ```

use std::{
    any::TypeId,
    collections::{BTreeMap, HashMap},
    rc::Rc,
};

use log::{debug, trace, warn};
use rusqlite::Connection;

use crate::{
    arena::{Arena, EntityId, Handle},
    entity::Entity,
    error::{DatabaseResultExt, Result, SnakeError},
    metadata::{EntityMetadata, MetadataProvider},
    persister::{ErasedPersister, Persister},
    sql::Select,
    value::{FieldValues, Value},
};

pub mod builder;
pub mod identifier;
pub mod state;

pub use builder::EntityManagerBuilder;
pub use identifier::Identifier;
pub use state::{EntityState, PendingCounts};

use state::PendingSet;

type Persisters = HashMap<TypeId, Box<dyn ErasedPersister>>;

/// Generated keys of one flushed insert batch, by instance.
type GeneratedKeys = Vec<(TypeId, BTreeMap<EntityId, Value>)>;

/// Orchestrates loading, tracking and writing of entities.
pub struct EntityManager {
    connection: Connection,
    entities: Arena,
    identity_map: HashMap<TypeId, HashMap<String, EntityId>>,
    entity_identifiers: HashMap<EntityId, FieldValues>,
    entity_states: HashMap<EntityId, EntityState>,
    metadata: MetadataProvider,
    persisters: Persisters,
    entity_inserts: PendingSet,
    entity_updates: PendingSet,
    entity_deletions: PendingSet,
}

impl EntityManager {
    /// Wraps an open connection.
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            entities: Arena::new(),
            identity_map: HashMap::new(),
            entity_identifiers: HashMap::new(),
            entity_states: HashMap::new(),
            metadata: MetadataProvider::new(),
            persisters: HashMap::new(),
            entity_inserts: PendingSet::default(),
            entity_updates: PendingSet::default(),
            entity_deletions: PendingSet::default(),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Cached metadata of `E`.
    pub fn metadata<E: Entity>(&mut self) -> Result<Rc<EntityMetadata>> {
        self.metadata.metadata_for::<E>()
    }

    /// Cached persister of `E`; every call returns the same instance.
    pub fn persister<E: Entity>(&mut self) -> Result<&mut Persister<E>> {
        persister_in::<E>(&mut self.persisters, &mut self.metadata)
    }

    /// Moves an instance into the manager without tracking it.
    ///
    /// Its state is derived on demand: see [`entity_state`](Self::entity_state).
    pub fn attach<E: Entity>(&mut self, entity: E) -> Handle<E> {
        self.entities.insert(entity)
    }

    pub fn get<E: Entity>(&self, handle: Handle<E>) -> Option<&E> {
        self.entities.get(handle)
    }

    pub fn get_mut<E: Entity>(&mut self, handle: Handle<E>) -> Option<&mut E> {
        self.entities.get_mut(handle)
    }

    /// Finds an entity by primary key, consulting the identity map before
    /// storage.
    ///
    /// `id` is either the bare value of an `id` field or a mapping that
    /// supplies exactly the declared primary-key fields, in any order.
    ///
    /// # Errors
    ///
    /// Returns `SnakeError::MissingPrimaryKey` / `SnakeError::UnknownPrimaryKeys`
    /// when `id` does not match the declared key, metadata errors of `E`, and
    /// `SnakeError::Database` if the row cannot be loaded.
    pub fn find<E: Entity>(&mut self, id: impl Into<Identifier>) -> Result<Option<Handle<E>>> {
        let meta = self.metadata.metadata_for::<E>()?;
        let key = id.into().normalize(&meta)?;

        if let Some(handle) = self.lookup::<E>(&key) {
            trace!("identity map hit for {} [{}]", meta.class_name(), key.identity_key());
            return Ok(self.live(handle));
        }

        let persister = persister_in::<E>(&mut self.persisters, &mut self.metadata)?;
        let Some(entity) = persister.load(&self.connection, &key)? else {
            return Ok(None);
        };

        // Storage may coerce the lookup values, so the row's own key is the
        // one that identifies it.
        let stored_key = meta.primary_values_of(&entity)?;
        if let Some(handle) = self.lookup::<E>(&stored_key) {
            return Ok(self.live(handle));
        }

        let handle = self.entities.insert(entity);
        self.register_managed(handle.id(), TypeId::of::<E>(), stored_key);
        Ok(Some(handle))
    }

    /// Identity-map lookup only; never touches storage. Instances scheduled
    /// for deletion are not returned.
    pub fn get_by_id<E: Entity>(
        &mut self,
        id: impl Into<Identifier>,
    ) -> Result<Option<Handle<E>>> {
        let meta = self.metadata.metadata_for::<E>()?;
        let key = id.into().normalize(&meta)?;
        Ok(self.lookup::<E>(&key).and_then(|handle| self.live(handle)))
    }

    /// Loads every row of `E`'s table; rows already in the identity map
    /// resolve to the tracked instance and rows scheduled for deletion are
    /// left out.
    pub fn load_all<E: Entity>(&mut self) -> Result<Vec<Handle<E>>> {
        self.load_all_with::<E, _>(|_| {})
    }

    /// Like [`load_all`](Self::load_all), letting `customize` add filters,
    /// ordering or a limit.
    pub fn load_all_with<E, F>(&mut self, customize: F) -> Result<Vec<Handle<E>>>
    where
        E: Entity,
        F: FnOnce(&mut Select),
    {
        let persister = persister_in::<E>(&mut self.persisters, &mut self.metadata)?;
        let loaded = persister.load_all_with(&self.connection, customize)?;
        let meta = self.metadata.metadata_for::<E>()?;

        let mut handles = Vec::with_capacity(loaded.len());
        for entity in loaded {
            let key = meta.primary_values_of(&entity)?;
            if let Some(handle) = self.lookup::<E>(&key) {
                handles.extend(self.live(handle));
                continue;
            }

            let handle = self.entities.insert(entity);
            if key.len() == meta.primary_key_columns().len() {
                self.register_managed(handle.id(), TypeId::of::<E>(), key);
            }
            handles.push(handle);
        }
        Ok(handles)
    }

    /// Current lifecycle state of an instance.
    ///
    /// A recorded state is returned as is. Otherwise it is derived without
    /// registering anything: an instance whose primary key is not fully set
    /// is `New`; one whose key belongs to another tracked instance, or to an
    /// existing row, is `Detached`; anything else is `New`.
    pub fn entity_state<E: Entity>(&mut self, handle: Handle<E>) -> Result<EntityState> {
        if let Some(state) = self.entity_states.get(&handle.id()) {
            return Ok(*state);
        }

        let meta = self.metadata.metadata_for::<E>()?;
        let primary_values = meta.primary_values_of(self.entities.expect::<E>(handle.id())?)?;

        if primary_values.len() < meta.primary_key_columns().len() {
            return Ok(EntityState::New);
        }

        if self.lookup::<E>(&primary_values).is_some() {
            return Ok(EntityState::Detached);
        }

        let persister = persister_in::<E>(&mut self.persisters, &mut self.metadata)?;
        if persister.exists(&self.connection, &primary_values)? {
            return Ok(EntityState::Detached);
        }

        Ok(EntityState::New)
    }

    /// True when the instance is managed by this manager.
    pub fn contains<E: Entity>(&self, handle: Handle<E>) -> bool {
        self.entity_states.get(&handle.id()) == Some(&EntityState::Managed)
    }

    /// Makes an instance managed.
    ///
    /// A new instance is scheduled for insertion; a removed one has its
    /// deletion cancelled; a managed one is left alone.
    ///
    /// # Errors
    ///
    /// Returns `SnakeError::DetachedEntity` for detached instances and
    /// `SnakeError::SchedulingConflict` if a new instance is already scheduled
    /// for update or deletion.
    pub fn persist<E: Entity>(&mut self, handle: Handle<E>) -> Result<()> {
        let id = handle.id();

        match self.entity_state(handle)? {
            EntityState::Managed => Ok(()),
            EntityState::New => {
                if self.entity_updates.contains(id) {
                    return Err(conflict::<E>("update", "insert"));
                }
                if self.entity_deletions.contains(id) {
                    return Err(conflict::<E>("deletion", "insert"));
                }

                persister_in::<E>(&mut self.persisters, &mut self.metadata)?;
                self.entity_states.insert(id, EntityState::Managed);
                self.entity_inserts.insert(id, TypeId::of::<E>());
                Ok(())
            }
            EntityState::Removed => {
                self.entity_deletions.remove(id);
                self.entity_states.insert(id, EntityState::Managed);
                Ok(())
            }
            EntityState::Detached => Err(SnakeError::DetachedEntity {
                entity: E::class_name().to_string(),
                action: "persisted",
            }),
        }
    }

    /// Schedules a managed instance for deletion on the next flush.
    ///
    /// The instance keeps its identity-map entry until the deletion commits,
    /// so its key can neither be found nor loaded a second time, and
    /// [`persist`](Self::persist) can restore it before the flush. A managed
    /// instance that was never flushed only has its insert cancelled. New and
    /// removed instances are left alone.
    pub fn remove<E: Entity>(&mut self, handle: Handle<E>) -> Result<()> {
        let id = handle.id();

        match self.entity_state(handle)? {
            EntityState::New | EntityState::Removed => Ok(()),
            EntityState::Detached => Err(SnakeError::DetachedEntity {
                entity: E::class_name().to_string(),
                action: "removed",
            }),
            EntityState::Managed => {
                if self.entity_inserts.remove(id) {
                    self.forget(id, TypeId::of::<E>());
                    return Ok(());
                }
                if self.entity_updates.contains(id) {
                    return Err(conflict::<E>("update", "deletion"));
                }

                persister_in::<E>(&mut self.persisters, &mut self.metadata)?;
                self.entity_states.insert(id, EntityState::Removed);
                self.entity_deletions.insert(id, TypeId::of::<E>());
                Ok(())
            }
        }
    }

    /// Schedules a managed instance's current values to be written on the
    /// next flush. Instances still waiting for insertion need no update.
    pub fn schedule_update<E: Entity>(&mut self, handle: Handle<E>) -> Result<()> {
        let id = handle.id();

        match self.entity_state(handle)? {
            EntityState::Managed => {
                if self.entity_inserts.contains(id) {
                    return Ok(());
                }
                if self.entity_deletions.contains(id) {
                    return Err(conflict::<E>("deletion", "update"));
                }

                persister_in::<E>(&mut self.persisters, &mut self.metadata)?;
                self.entity_updates.insert(id, TypeId::of::<E>());
                Ok(())
            }
            EntityState::Removed => Err(conflict::<E>("deletion", "update")),
            EntityState::New => Err(SnakeError::NotManaged {
                entity: E::class_name().to_string(),
                action: "updated",
            }),
            EntityState::Detached => Err(SnakeError::DetachedEntity {
                entity: E::class_name().to_string(),
                action: "updated",
            }),
        }
    }

    /// Stops tracking an instance: it leaves the identity map and every
    /// pending-write set and is recorded as detached.
    pub fn detach<E: Entity>(&mut self, handle: Handle<E>) -> Result<()> {
        let id = handle.id();
        self.entities.expect::<E>(id)?;

        self.forget(id, TypeId::of::<E>());
        self.entity_states.insert(id, EntityState::Detached);
        Ok(())
    }

    pub fn has_pending_writes(&self) -> bool {
        !(self.entity_inserts.is_empty()
            && self.entity_updates.is_empty()
            && self.entity_deletions.is_empty())
    }

    pub fn pending_counts(&self) -> PendingCounts {
        PendingCounts {
            inserts: self.entity_inserts.len(),
            updates: self.entity_updates.len(),
            deletions: self.entity_deletions.len(),
        }
    }

    /// Writes every pending insert, update and deletion in one transaction.
    ///
    /// Inserts run as one batch per entity type, then updates, then
    /// deletions. On success the generated keys are written back onto the
    /// inserted instances, which join the identity map, deleted instances
    /// stop being tracked, and the pending-write sets are cleared.
    ///
    /// # Errors
    ///
    /// Any failure rolls the transaction back and is returned; the
    /// instances, the identity map and the pending-write sets are left as
    /// they were before the call.
    pub fn flush(&mut self) -> Result<()> {
        if !self.has_pending_writes() {
            debug!("flush: nothing to write");
            return Ok(());
        }

        let counts = self.pending_counts();
        debug!(
            "flush: {} inserts, {} updates, {} deletions",
            counts.inserts, counts.updates, counts.deletions
        );

        let tx = self
            .connection
            .transaction()
            .db_context("Failed to begin transaction")?;

        let executed = execute_pending(
            &tx,
            &mut self.persisters,
            &self.entities,
            &self.entity_inserts,
            &self.entity_updates,
            &self.entity_deletions,
        );

        let generated = match executed {
            Ok(generated) => generated,
            Err(err) => {
                warn!("flush failed, rolling back: {err}");
                if let Err(rollback_err) = tx.rollback() {
                    warn!("rollback failed: {rollback_err}");
                }
                return Err(err);
            }
        };

        tx.commit().db_context("Failed to commit transaction")?;
        debug!("flush: committed");

        self.complete_flush(generated)
    }

    /// Post-commit bookkeeping. Runs to the end even if writing a key back
    /// fails, so committed rows are never scheduled twice.
    fn complete_flush(&mut self, generated: GeneratedKeys) -> Result<()> {
        let mut first_error = None;

        for (type_id, keys) in generated {
            if let Some(persister) = self.persisters.get(&type_id) {
                if let Err(err) = persister.assign_generated_keys(&mut self.entities, &keys) {
                    first_error.get_or_insert(err);
                }
            }
        }

        let inserted: Vec<(EntityId, TypeId)> = self.entity_inserts.iter().collect();
        for (id, type_id) in inserted {
            let Some(persister) = self.persisters.get(&type_id) else {
                continue;
            };
            let expected = persister.metadata_rc().primary_key_columns().len();
            match persister.primary_values_erased(&self.entities, id) {
                Ok(key) if key.len() == expected => self.register_managed(id, type_id, key),
                Ok(_) => {}
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        let deleted: Vec<(EntityId, TypeId)> = self.entity_deletions.iter().collect();
        for (id, type_id) in deleted {
            self.forget(id, type_id);
        }

        self.entity_inserts.clear();
        self.entity_updates.clear();
        self.entity_deletions.clear();

        first_error.map_or(Ok(()), Err)
    }

    fn lookup<E: Entity>(&self, key: &FieldValues) -> Option<Handle<E>> {
        self.identity_map
            .get(&TypeId::of::<E>())?
            .get(&key.identity_key())
            .map(|id| Handle::new(*id))
    }

    /// Hides instances whose deletion is pending.
    fn live<E>(&self, handle: Handle<E>) -> Option<Handle<E>> {
        let removed = self.entity_states.get(&handle.id()) == Some(&EntityState::Removed);
        (!removed).then_some(handle)
    }

    fn register_managed(&mut self, id: EntityId, type_id: TypeId, key: FieldValues) {
        self.entity_states.insert(id, EntityState::Managed);
        self.identity_map
            .entry(type_id)
            .or_default()
            .insert(key.identity_key(), id);
        self.entity_identifiers.insert(id, key);
    }

    fn remove_from_identity_map(&mut self, id: EntityId, type_id: TypeId) {
        let Some(key) = self.entity_identifiers.get(&id) else {
            return;
        };
        if let Some(entries) = self.identity_map.get_mut(&type_id) {
            let hash = key.identity_key();
            if entries.get(&hash) == Some(&id) {
                entries.remove(&hash);
            }
        }
    }

    /// Drops every trace of an instance from tracking, except the instance.
    fn forget(&mut self, id: EntityId, type_id: TypeId) {
        self.remove_from_identity_map(id, type_id);
        self.entity_identifiers.remove(&id);
        self.entity_states.remove(&id);
        self.entity_inserts.remove(id);
        self.entity_updates.remove(id);
        self.entity_deletions.remove(id);
    }
}

fn persister_in<'a, E: Entity>(
    persisters: &'a mut Persisters,
    metadata: &mut MetadataProvider,
) -> Result<&'a mut Persister<E>> {
    let type_id = TypeId::of::<E>();
    if !persisters.contains_key(&type_id) {
        let meta = metadata.metadata_for::<E>()?;
        persisters.insert(type_id, Box::new(Persister::<E>::new(meta)));
    }

    persisters
        .get_mut(&type_id)
        .and_then(|persister| persister.as_any_mut().downcast_mut::<Persister<E>>())
        .ok_or_else(|| SnakeError::EntityTypeMismatch {
            expected: E::class_name().to_string(),
            found: "unregistered persister".to_string(),
        })
}

fn conflict<E: Entity>(scheduled: &'static str, requested: &'static str) -> SnakeError {
    SnakeError::SchedulingConflict {
        entity: E::class_name().to_string(),
        scheduled,
        requested,
    }
}

/// Runs every scheduled write on `conn` and returns the generated keys of
/// each insert batch. Nothing outside the database is modified.
fn execute_pending(
    conn: &Connection,
    persisters: &mut Persisters,
    entities: &Arena,
    inserts: &PendingSet,
    updates: &PendingSet,
    deletions: &PendingSet,
) -> Result<GeneratedKeys> {
    let mut generated = Vec::new();

    for (type_id, ids) in inserts.grouped_by_type() {
        let persister = persister_for(persisters, entities, type_id, ids[0])?;
        for id in ids {
            persister.queue_insert_erased(id);
        }
        let keys = persister.flush_queued(conn, entities)?;
        debug!(
            "inserted batch into {} ({} generated keys)",
            persister.metadata_rc().table_name(),
            keys.len()
        );
        generated.push((type_id, keys));
    }

    for (id, type_id) in updates.iter() {
        persister_for(persisters, entities, type_id, id)?.update_erased(conn, entities, id)?;
    }

    for (id, type_id) in deletions.iter() {
        persister_for(persisters, entities, type_id, id)?.delete_erased(conn, entities, id)?;
    }

    Ok(generated)
}

fn persister_for<'a>(
    persisters: &'a mut Persisters,
    entities: &Arena,
    type_id: TypeId,
    id: EntityId,
) -> Result<&'a mut Box<dyn ErasedPersister>> {
    persisters
        .get_mut(&type_id)
        .ok_or_else(|| SnakeError::InvalidHandle {
            entity: entities.type_name_of(id).unwrap_or("unknown").to_string(),
            id: id.index(),
        })
}

#[cfg(test)]
mod tests;
