//! Core library for the Snake persistence layer.
//!
//! This crate maps plain Rust structs to rows of SQLite tables and tracks
//! them through an identity map and a unit of work, so that each row is
//! represented by at most one live instance and every pending change is
//! written in a single transaction.
//!
//! # Architecture
//!
//! - **Entities** ([`entity`]): structs registering their persistable fields
//!   and primary key, usually through [`impl_entity!`]
//! - **Metadata** ([`metadata`]): table name, field list and primary key of
//!   each entity type, derived once and cached
//! - **Persisters** ([`persister`]): per-type SQL for load, exists, batched
//!   insert, update and delete
//! - **Entity manager** ([`manager`]): identity map, lifecycle states and the
//!   transactional flush
//!
//! Instances live in the manager's [`Arena`] and are addressed through typed
//! [`Handle`]s; two handles are equal exactly when they name the same
//! instance.
//!
//! # Quick Start
//!
//! ```rust
//! use snake_core::{impl_entity, EntityManagerBuilder, EntityState};
//!
//! #[derive(Debug, Default)]
//! pub struct BarEntity {
//!     pub bar_id: i64,
//!     pub baz_id: i64,
//!     pub info: String,
//! }
//!
//! impl_entity!(BarEntity {
//!     fields: [bar_id, baz_id, info],
//!     primary: [bar_id => false, baz_id => false],
//! });
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut manager = EntityManagerBuilder::new().in_memory().build()?;
//! manager.connection().execute_batch(
//!     "CREATE TABLE bar_entity (bar_id INTEGER, baz_id INTEGER, info TEXT,
//!      PRIMARY KEY (bar_id, baz_id))",
//! )?;
//!
//! // Schedule an insert and write it
//! let bar = manager.attach(BarEntity {
//!     bar_id: 13,
//!     baz_id: 2,
//!     info: "info".to_string(),
//! });
//! manager.persist(bar)?;
//! manager.flush()?;
//!
//! // Lookups resolve to the tracked instance, whatever the key order
//! let found = manager.find::<BarEntity>([("baz_id", 2), ("bar_id", 13)])?;
//! assert_eq!(found, Some(bar));
//! assert_eq!(manager.entity_state(bar)?, EntityState::Managed);
//! # Ok(())
//! # }
//! ```

pub mod arena;
pub mod entity;
pub mod error;
pub mod manager;
pub mod metadata;
pub mod persister;
pub mod sql;
pub mod value;

// Re-export commonly used types
pub use arena::{Arena, EntityId, Handle};
pub use entity::{Entity, Field, PrimaryDefinition};
pub use error::{ErrorKind, Result, SnakeError};
pub use manager::{EntityManager, EntityManagerBuilder, EntityState, Identifier, PendingCounts};
pub use metadata::{EntityMetadata, MetadataProvider};
pub use persister::Persister;
pub use value::{FieldValue, FieldValues, Value};
