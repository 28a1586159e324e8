//! Builder for creating and configuring EntityManager instances.

use std::path::{Path, PathBuf};

use log::debug;
use rusqlite::Connection;

use super::EntityManager;
use crate::error::{DatabaseResultExt, Result, SnakeError};

/// Builder for creating and configuring EntityManager instances.
#[derive(Debug, Clone)]
pub struct EntityManagerBuilder {
    database_path: Option<PathBuf>,
    in_memory: bool,
    foreign_keys: bool,
}

impl EntityManagerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            database_path: None,
            in_memory: false,
            foreign_keys: true,
        }
    }

    /// Sets a custom database file path.
    ///
    /// If not specified, uses XDG Base Directory specification:
    /// `$XDG_DATA_HOME/snake/snake.db` or `~/.local/share/snake/snake.db`
    pub fn with_database_path<P: AsRef<Path>>(mut self, path: Option<P>) -> Self {
        if let Some(path) = path {
            self.database_path = Some(path.as_ref().to_path_buf());
        }
        self
    }

    /// Uses a private in-memory database; any configured path is ignored.
    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }

    /// Toggles foreign key enforcement (on by default).
    pub fn with_foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    /// Opens the connection and wraps it in an entity manager.
    ///
    /// # Errors
    ///
    /// Returns `SnakeError::XdgDirectory` if no default location can be found
    /// Returns `SnakeError::FileSystem` if the database directory cannot be created
    /// Returns `SnakeError::Database` if the connection cannot be opened or configured
    pub fn build(self) -> Result<EntityManager> {
        let connection = if self.in_memory {
            debug!("opening in-memory database");
            Connection::open_in_memory().db_context("Failed to open in-memory database")?
        } else {
            let db_path = match self.database_path {
                Some(path) => path,
                None => Self::default_database_path()?,
            };

            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| SnakeError::FileSystem {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }

            debug!("opening database at {}", db_path.display());
            Connection::open(&db_path).db_context("Failed to open database connection")?
        };

        let pragma = if self.foreign_keys {
            "PRAGMA foreign_keys = ON"
        } else {
            "PRAGMA foreign_keys = OFF"
        };
        connection
            .execute_batch(pragma)
            .db_context("Failed to configure foreign keys")?;

        Ok(EntityManager::new(connection))
    }

    /// Returns the default database path following XDG Base Directory
    /// specification.
    fn default_database_path() -> Result<PathBuf> {
        xdg::BaseDirectories::with_prefix("snake")
            .place_data_file("snake.db")
            .map_err(|e| SnakeError::XdgDirectory(e.to_string()))
    }
}

impl Default for EntityManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
