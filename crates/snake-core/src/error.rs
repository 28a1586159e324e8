//! Error types for the persistence core.

use std::path::PathBuf;

use thiserror::Error;

/// Comprehensive error type for all entity manager operations.
#[derive(Error, Debug)]
pub enum SnakeError {
    /// The primary-key declaration of an entity type is unusable
    #[error("Error in definition of the primary definition of {entity} entity. {reason}")]
    InvalidPrimaryDefinition { entity: String, reason: String },
    /// An instance of one type was handed to metadata of another
    #[error("Given entity \"{found}\" is not instance of \"{expected}\"")]
    EntityTypeMismatch { expected: String, found: String },
    /// A field name that the entity type does not register
    #[error("Entity \"{entity}\" has no field \"{field}\"")]
    UnknownField { entity: String, field: String },
    /// A primary-key column was not supplied to a lookup
    #[error("Tried to load entity of type \"{entity}\" but primary key \"{column}\" are missing")]
    MissingPrimaryKey { entity: String, column: String },
    /// Columns that are not part of the primary key were supplied to a lookup
    #[error("Tried to load entity of type \"{entity}\" but got unknown primary keys {}", .columns.join(", "))]
    UnknownPrimaryKeys { entity: String, columns: Vec<String> },
    /// A detached instance was handed to the write path
    #[error("Detached entity of type \"{entity}\" can not be {action}")]
    DetachedEntity {
        entity: String,
        action: &'static str,
    },
    /// The operation requires a managed instance
    #[error("Entity of type \"{entity}\" is not managed and can not be {action}")]
    NotManaged {
        entity: String,
        action: &'static str,
    },
    /// An instance was scheduled into a second pending-write set
    #[error("Entity of type \"{entity}\" is scheduled for {scheduled} and can not be scheduled for {requested}")]
    SchedulingConflict {
        entity: String,
        scheduled: &'static str,
        requested: &'static str,
    },
    /// A handle that does not point at a live instance of its type
    #[error("No entity of type \"{entity}\" is registered under handle {id}")]
    InvalidHandle { entity: String, id: usize },
    /// Database connection or statement errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: rusqlite::Error,
    },
    /// A stored value that does not fit the entity field
    #[error("Cannot convert value for column '{column}': {reason}")]
    Conversion { column: String, reason: String },
    /// File system operation errors
    #[error("File system error at path '{path}': {source}")]
    FileSystem {
        path: PathBuf,
        source: std::io::Error,
    },
    /// XDG directory specification errors
    #[error("XDG directory error: {0}")]
    XdgDirectory(String),
}

/// Coarse classification of [`SnakeError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad entity declaration or type mismatch; raised before any I/O
    Metadata,
    /// Missing or unexpected primary-key columns in a lookup
    Lookup,
    /// Lifecycle misuse by the caller
    State,
    /// Failures reported by the connection, including row conversions
    Storage,
    /// Database location and bootstrap problems
    Configuration,
}

impl SnakeError {
    /// Creates a builder for database errors.
    pub fn database(message: impl Into<String>) -> DatabaseErrorBuilder {
        DatabaseErrorBuilder::new(message)
    }

    /// Returns the category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SnakeError::InvalidPrimaryDefinition { .. }
            | SnakeError::EntityTypeMismatch { .. }
            | SnakeError::UnknownField { .. } => ErrorKind::Metadata,
            SnakeError::MissingPrimaryKey { .. } | SnakeError::UnknownPrimaryKeys { .. } => {
                ErrorKind::Lookup
            }
            SnakeError::DetachedEntity { .. }
            | SnakeError::NotManaged { .. }
            | SnakeError::SchedulingConflict { .. }
            | SnakeError::InvalidHandle { .. } => ErrorKind::State,
            SnakeError::Database { .. } | SnakeError::Conversion { .. } => ErrorKind::Storage,
            SnakeError::FileSystem { .. } | SnakeError::XdgDirectory(_) => {
                ErrorKind::Configuration
            }
        }
    }
}

/// Builder for creating database errors with optional context.
pub struct DatabaseErrorBuilder {
    message: String,
}

impl DatabaseErrorBuilder {
    /// Create a new database error builder with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Build the error with the given source.
    pub fn with_source(self, source: rusqlite::Error) -> SnakeError {
        SnakeError::Database {
            message: self.message,
            source,
        }
    }
}

/// Specialized extension trait for database-related Results.
pub trait DatabaseResultExt<T> {
    /// Map database errors with a message.
    fn db_context(self, message: &str) -> Result<T>;
}

impl<T> DatabaseResultExt<T> for std::result::Result<T, rusqlite::Error> {
    fn db_context(self, message: &str) -> Result<T> {
        self.map_err(|e| SnakeError::database(message).with_source(e))
    }
}

/// Result type alias for entity manager operations
pub type Result<T> = std::result::Result<T, SnakeError>;
