#![allow(dead_code)]

use jiff::civil::DateTime;
use snake_core::{impl_entity, EntityManager, EntityManagerBuilder};
use tempfile::TempDir;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FooEntity {
    pub id: Option<i64>,
    pub name: String,
    pub bar: Option<String>,
    pub created_time: DateTime,
}

impl_entity!(FooEntity {
    fields: [id, name, bar, created_time],
});

#[derive(Debug, Default, Clone, PartialEq)]
pub struct BarEntity {
    pub bar_id: i64,
    pub baz_id: i64,
    pub info: String,
}

impl_entity!(BarEntity {
    fields: [bar_id, baz_id, info],
    primary: [bar_id => false, baz_id => false],
});

const SCHEMA: &str = "
    CREATE TABLE foo_entity (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        bar TEXT,
        created_time DATETIME NOT NULL
    );
    CREATE TABLE bar_entity (
        bar_id INTEGER NOT NULL,
        baz_id INTEGER NOT NULL,
        info TEXT NOT NULL CHECK (info <> 'invalid'),
        PRIMARY KEY (bar_id, baz_id)
    );
";

/// Rows of `foo_entity` as `(name, bar)`.
pub const FOO_ROWS: [(&str, Option<&str>); 3] =
    [("foo1", None), ("foo2", Some("bar2")), ("foo3", Some("bar3"))];

/// Rows of `bar_entity` as `(bar_id, baz_id, info)`.
pub const BAR_ROWS: [(i64, i64, &str); 3] = [(13, 2, "info"), (13, 3, "other"), (14, 2, "more")];

/// Installs the test logger once per binary.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn created_time() -> DateTime {
    jiff::civil::date(2020, 1, 1).at(0, 0, 0, 0)
}

pub fn foo(name: &str, bar: Option<&str>) -> FooEntity {
    FooEntity {
        id: None,
        name: name.to_string(),
        bar: bar.map(String::from),
        created_time: created_time(),
    }
}

pub fn bar(bar_id: i64, baz_id: i64, info: &str) -> BarEntity {
    BarEntity {
        bar_id,
        baz_id,
        info: info.to_string(),
    }
}

/// Helper function to create an in-memory manager with the schema and no rows
pub fn create_empty_manager() -> EntityManager {
    init_logging();
    let manager = EntityManagerBuilder::new()
        .in_memory()
        .build()
        .expect("Failed to create manager");
    manager
        .connection()
        .execute_batch(SCHEMA)
        .expect("Failed to create schema");
    manager
}

/// Helper function to create an in-memory manager with the fixture rows
pub fn create_test_manager() -> EntityManager {
    let manager = create_empty_manager();
    load_fixtures(&manager);
    manager
}

/// Helper function to create a file-backed manager with the fixture rows
pub fn create_file_manager() -> (TempDir, EntityManager) {
    init_logging();
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let manager = EntityManagerBuilder::new()
        .with_database_path(Some(&db_path))
        .build()
        .expect("Failed to create manager");
    manager
        .connection()
        .execute_batch(SCHEMA)
        .expect("Failed to create schema");
    load_fixtures(&manager);
    (temp_dir, manager)
}

fn load_fixtures(manager: &EntityManager) {
    let conn = manager.connection();
    for (name, bar) in FOO_ROWS {
        conn.execute(
            "INSERT INTO foo_entity (name, bar, created_time) VALUES (?1, ?2, '2020-01-01 00:00:00')",
            (name, bar),
        )
        .expect("Failed to insert foo fixture");
    }
    for (bar_id, baz_id, info) in BAR_ROWS {
        conn.execute(
            "INSERT INTO bar_entity (bar_id, baz_id, info) VALUES (?1, ?2, ?3)",
            (bar_id, baz_id, info),
        )
        .expect("Failed to insert bar fixture");
    }
}

pub fn count_rows(manager: &EntityManager, table: &str) -> i64 {
    manager
        .connection()
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .expect("Failed to count rows")
}
