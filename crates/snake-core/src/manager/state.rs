//! Lifecycle states and pending-write bookkeeping.

use std::{
    any::TypeId,
    collections::HashMap,
    fmt,
};

use serde::Serialize;

use crate::arena::EntityId;

/// Lifecycle state of an instance relative to one entity manager.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntityState {
    /// Tracked in the identity map and written on flush
    Managed,

    /// Not yet assigned to any row
    New,

    /// Has a row, but is not tracked by this manager
    Detached,

    /// Scheduled for deletion on the next flush
    Removed,
}

impl EntityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityState::Managed => "managed",
            EntityState::New => "new",
            EntityState::Detached => "detached",
            EntityState::Removed => "removed",
        }
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of instances in each pending-write set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingCounts {
    pub inserts: usize,
    pub updates: usize,
    pub deletions: usize,
}

/// Insertion-ordered set of scheduled instances with their runtime types.
#[derive(Debug, Default)]
pub(crate) struct PendingSet {
    order: Vec<EntityId>,
    types: HashMap<EntityId, TypeId>,
}

impl PendingSet {
    pub(crate) fn insert(&mut self, id: EntityId, type_id: TypeId) {
        if self.types.insert(id, type_id).is_none() {
            self.order.push(id);
        }
    }

    /// Returns whether the instance was scheduled.
    pub(crate) fn remove(&mut self, id: EntityId) -> bool {
        if self.types.remove(&id).is_none() {
            return false;
        }
        self.order.retain(|scheduled| *scheduled != id);
        true
    }

    pub(crate) fn contains(&self, id: EntityId) -> bool {
        self.types.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (EntityId, TypeId)> + '_ {
        self.order
            .iter()
            .filter_map(|id| self.types.get(id).map(|type_id| (*id, *type_id)))
    }

    /// Scheduled instances grouped by type, types in first-scheduled order.
    pub(crate) fn grouped_by_type(&self) -> Vec<(TypeId, Vec<EntityId>)> {
        let mut groups: Vec<(TypeId, Vec<EntityId>)> = Vec::new();
        for (id, type_id) in self.iter() {
            match groups.iter_mut().find(|(group, _)| *group == type_id) {
                Some((_, ids)) => ids.push(id),
                None => groups.push((type_id, vec![id])),
            }
        }
        groups
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.types.clear();
    }
}
