//! Storage for entity instances and their in-memory identities.
//!
//! Every instance known to an [`EntityManager`](crate::EntityManager) lives
//! in its [`Arena`]. The slot index is the instance's in-memory identity
//! ([`EntityId`]); it stays valid for the arena's lifetime and is never
//! reused.

use std::{
    any::{Any, TypeId},
    fmt,
    marker::PhantomData,
};

use serde::Serialize;

use crate::{
    entity::Entity,
    error::{Result, SnakeError},
};

/// In-memory identity token of an instance within one arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EntityId(usize);

impl EntityId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Typed reference to an instance stored in an [`Arena`].
pub struct Handle<E> {
    id: EntityId,
    _marker: PhantomData<fn() -> E>,
}

impl<E> Handle<E> {
    pub(crate) fn new(id: EntityId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }
}

// Manual impls: derives would require `E: Clone` etc.
impl<E> Clone for Handle<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Handle<E> {}

impl<E> PartialEq for Handle<E> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<E> Eq for Handle<E> {}

impl<E> fmt::Debug for Handle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&self.id.0).finish()
    }
}

struct Slot {
    type_id: TypeId,
    type_name: &'static str,
    entity: Box<dyn Any>,
}

/// Owner of entity instances, addressed by [`EntityId`].
#[derive(Default)]
pub struct Arena {
    slots: Vec<Slot>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `entity` into the arena and returns its handle.
    pub fn insert<E: Entity>(&mut self, entity: E) -> Handle<E> {
        let id = EntityId(self.slots.len());
        self.slots.push(Slot {
            type_id: TypeId::of::<E>(),
            type_name: E::class_name(),
            entity: Box::new(entity),
        });
        Handle::new(id)
    }

    pub fn get<E: Entity>(&self, handle: Handle<E>) -> Option<&E> {
        self.get_by_id(handle.id)
    }

    pub fn get_mut<E: Entity>(&mut self, handle: Handle<E>) -> Option<&mut E> {
        self.get_by_id_mut(handle.id)
    }

    /// Looks an instance up by identity, `None` if the slot holds another type.
    pub fn get_by_id<E: Entity>(&self, id: EntityId) -> Option<&E> {
        self.slots.get(id.0)?.entity.downcast_ref::<E>()
    }

    pub fn get_by_id_mut<E: Entity>(&mut self, id: EntityId) -> Option<&mut E> {
        self.slots.get_mut(id.0)?.entity.downcast_mut::<E>()
    }

    /// Like [`get_by_id`](Self::get_by_id) but reports why the lookup failed.
    pub fn expect<E: Entity>(&self, id: EntityId) -> Result<&E> {
        self.check_type::<E>(id)?;
        self.get_by_id(id).ok_or_else(|| invalid_handle::<E>(id))
    }

    pub fn expect_mut<E: Entity>(&mut self, id: EntityId) -> Result<&mut E> {
        self.check_type::<E>(id)?;
        self.get_by_id_mut(id).ok_or_else(|| invalid_handle::<E>(id))
    }

    pub fn type_name_of(&self, id: EntityId) -> Option<&'static str> {
        self.slots.get(id.0).map(|slot| slot.type_name)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn check_type<E: Entity>(&self, id: EntityId) -> Result<()> {
        match self.slots.get(id.0) {
            None => Err(invalid_handle::<E>(id)),
            Some(slot) if slot.type_id != TypeId::of::<E>() => Err(SnakeError::EntityTypeMismatch {
                expected: E::class_name().to_string(),
                found: slot.type_name.to_string(),
            }),
            Some(_) => Ok(()),
        }
    }
}

fn invalid_handle<E: Entity>(id: EntityId) -> SnakeError {
    SnakeError::InvalidHandle {
        entity: E::class_name().to_string(),
        id: id.0,
    }
}
