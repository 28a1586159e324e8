//! Tests for the manager module.

use super::*;

#[derive(Debug, Default, Clone, PartialEq)]
struct Foo {
    id: Option<i64>,
    name: String,
    bar: Option<String>,
}

crate::impl_entity!(Foo {
    fields: [id, name, bar],
});

#[derive(Debug, Default, Clone, PartialEq)]
struct Pair {
    left_id: i64,
    right_id: i64,
    info: String,
}

crate::impl_entity!(Pair {
    fields: [left_id, right_id, info],
    primary: [left_id, right_id],
});

#[derive(Debug, Default)]
struct Faulty {
    id: Option<i64>,
}

crate::impl_entity!(Faulty {
    fields: [id],
    primary: [missing],
});

/// Helper function to create a manager over a fresh schema
fn create_test_manager() -> EntityManager {
    let manager = EntityManagerBuilder::new()
        .in_memory()
        .build()
        .expect("Failed to create manager");
    manager
        .connection()
        .execute_batch(
            "CREATE TABLE foo (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL CHECK (name <> 'boom'),
                bar TEXT
            );
            CREATE TABLE pair (
                left_id INTEGER NOT NULL,
                right_id INTEGER NOT NULL,
                info TEXT NOT NULL,
                PRIMARY KEY (left_id, right_id)
            );
            INSERT INTO foo (name, bar) VALUES ('foo1', NULL), ('foo2', 'bar2');",
        )
        .expect("Failed to create schema");
    manager
}

fn foo(name: &str) -> Foo {
    Foo {
        id: None,
        name: name.to_string(),
        bar: None,
    }
}

fn count_rows(manager: &EntityManager, table: &str) -> i64 {
    manager
        .connection()
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .expect("Failed to count rows")
}

#[test]
fn test_new_instance_is_inserted_and_gets_its_key() {
    let mut manager = create_test_manager();
    let handle = manager.attach(foo("n1"));
    assert_eq!(manager.entity_state(handle).unwrap(), EntityState::New);

    manager.persist(handle).unwrap();
    assert_eq!(manager.entity_state(handle).unwrap(), EntityState::Managed);
    assert_eq!(
        manager.pending_counts(),
        PendingCounts {
            inserts: 1,
            updates: 0,
            deletions: 0
        }
    );

    manager.flush().unwrap();

    assert_eq!(manager.get(handle).unwrap().id, Some(3));
    assert!(!manager.has_pending_writes());
    assert_eq!(manager.find::<Foo>(3).unwrap(), Some(handle));
    assert_eq!(count_rows(&manager, "foo"), 3);
}

#[test]
fn test_find_returns_same_instance() {
    let mut manager = create_test_manager();

    let first = manager.find::<Foo>(2).unwrap().expect("foo2 should exist");
    manager.get_mut(first).unwrap().name = "changed".to_string();
    let second = manager.find::<Foo>(2).unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(manager.get(second).unwrap().name, "changed");
    assert!(manager.contains(first));
}

#[test]
fn test_find_missing_row() {
    let mut manager = create_test_manager();

    assert_eq!(manager.find::<Foo>(42).unwrap(), None);
    assert_eq!(manager.get_by_id::<Foo>(42).unwrap(), None);
}

#[test]
fn test_get_by_id_never_loads() {
    let mut manager = create_test_manager();

    assert_eq!(manager.get_by_id::<Foo>(1).unwrap(), None);
    let loaded = manager.find::<Foo>(1).unwrap();
    assert_eq!(manager.get_by_id::<Foo>(1).unwrap(), loaded);
}

#[test]
fn test_untracked_copy_of_stored_row_is_detached() {
    let mut manager = create_test_manager();
    let copy = manager.attach(Foo {
        id: Some(1),
        ..foo("foo1")
    });

    assert_eq!(manager.entity_state(copy).unwrap(), EntityState::Detached);
    let err = manager.persist(copy).unwrap_err();
    assert!(matches!(err, SnakeError::DetachedEntity { .. }));
    assert!(!manager.has_pending_writes());
}

#[test]
fn test_copy_of_tracked_instance_is_detached() {
    let mut manager = create_test_manager();
    let pair = manager.attach(Pair {
        left_id: 1,
        right_id: 2,
        info: "a".to_string(),
    });
    manager.persist(pair).unwrap();

    let copy = manager.attach(Pair {
        left_id: 1,
        right_id: 2,
        info: "b".to_string(),
    });
    // Not flushed yet: the key is not in the identity map and has no row.
    assert_eq!(manager.entity_state(copy).unwrap(), EntityState::New);

    manager.flush().unwrap();
    assert_eq!(manager.entity_state(copy).unwrap(), EntityState::Detached);
}

#[test]
fn test_persist_is_idempotent_for_managed() {
    let mut manager = create_test_manager();
    let handle = manager.attach(foo("n1"));

    manager.persist(handle).unwrap();
    manager.persist(handle).unwrap();

    assert_eq!(manager.pending_counts().inserts, 1);
}

#[test]
fn test_remove_and_flush_deletes_row() {
    let mut manager = create_test_manager();
    let handle = manager.find::<Foo>(1).unwrap().unwrap();

    manager.remove(handle).unwrap();

    assert_eq!(manager.entity_state(handle).unwrap(), EntityState::Removed);
    assert_eq!(manager.get_by_id::<Foo>(1).unwrap(), None);
    assert!(!manager.contains(handle));

    manager.flush().unwrap();

    assert_eq!(count_rows(&manager, "foo"), 1);
    assert_eq!(manager.find::<Foo>(1).unwrap(), None);
    assert_eq!(manager.entity_state(handle).unwrap(), EntityState::New);
}

#[test]
fn test_persist_restores_removed_instance() {
    let mut manager = create_test_manager();
    let handle = manager.find::<Foo>(1).unwrap().unwrap();
    manager.remove(handle).unwrap();

    manager.persist(handle).unwrap();

    assert_eq!(manager.entity_state(handle).unwrap(), EntityState::Managed);
    assert_eq!(manager.get_by_id::<Foo>(1).unwrap(), Some(handle));
    assert!(!manager.has_pending_writes());

    manager.flush().unwrap();
    assert_eq!(count_rows(&manager, "foo"), 2);
}

#[test]
fn test_remove_cancels_pending_insert() {
    let mut manager = create_test_manager();
    let handle = manager.attach(foo("n1"));
    manager.persist(handle).unwrap();

    manager.remove(handle).unwrap();

    assert_eq!(manager.entity_state(handle).unwrap(), EntityState::New);
    assert!(!manager.has_pending_writes());
    manager.flush().unwrap();
    assert_eq!(count_rows(&manager, "foo"), 2);
}

#[test]
fn test_remove_new_instance_is_noop() {
    let mut manager = create_test_manager();
    let handle = manager.attach(foo("n1"));

    manager.remove(handle).unwrap();

    assert_eq!(manager.entity_state(handle).unwrap(), EntityState::New);
    assert!(!manager.has_pending_writes());
}

#[test]
fn test_schedule_update_writes_current_values() {
    let mut manager = create_test_manager();
    let handle = manager.find::<Foo>(1).unwrap().unwrap();
    {
        let entity = manager.get_mut(handle).unwrap();
        entity.name = "edit name".to_string();
        entity.bar = Some("edit bar".to_string());
    }

    manager.schedule_update(handle).unwrap();
    manager.flush().unwrap();

    let (name, bar): (String, Option<String>) = manager
        .connection()
        .query_row("SELECT name, bar FROM foo WHERE id = 1", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap();
    assert_eq!(name, "edit name");
    assert_eq!(bar.as_deref(), Some("edit bar"));
}

#[test]
fn test_schedule_update_requires_managed_instance() {
    let mut manager = create_test_manager();
    let handle = manager.attach(foo("n1"));

    let err = manager.schedule_update(handle).unwrap_err();
    assert!(matches!(err, SnakeError::NotManaged { .. }));

    manager.persist(handle).unwrap();
    manager.schedule_update(handle).unwrap();
    assert_eq!(manager.pending_counts().updates, 0);
}

#[test]
fn test_update_conflicts_with_deletion() {
    let mut manager = create_test_manager();
    let handle = manager.find::<Foo>(1).unwrap().unwrap();
    manager.schedule_update(handle).unwrap();

    let err = manager.remove(handle).unwrap_err();
    assert!(matches!(
        err,
        SnakeError::SchedulingConflict {
            scheduled: "update",
            requested: "deletion",
            ..
        }
    ));
    assert_eq!(err.kind(), crate::error::ErrorKind::State);
}

#[test]
fn test_failed_flush_rolls_back_and_keeps_pending_writes() {
    let mut manager = create_test_manager();
    let good = manager.attach(foo("good"));
    let bad = manager.attach(foo("boom"));
    manager.persist(good).unwrap();
    manager.persist(bad).unwrap();

    let err = manager.flush().unwrap_err();

    assert_eq!(err.kind(), crate::error::ErrorKind::Storage);
    assert_eq!(count_rows(&manager, "foo"), 2);
    assert_eq!(manager.get(good).unwrap().id, None);
    assert_eq!(manager.pending_counts().inserts, 2);
    assert_eq!(manager.entity_state(good).unwrap(), EntityState::Managed);

    manager.get_mut(bad).unwrap().name = "fixed".to_string();
    manager.flush().unwrap();

    assert_eq!(count_rows(&manager, "foo"), 4);
    assert_eq!(manager.get(good).unwrap().id, Some(3));
    assert_eq!(manager.get(bad).unwrap().id, Some(4));
}

#[test]
fn test_composite_key_insert_and_find() {
    let mut manager = create_test_manager();
    let handle = manager.attach(Pair {
        left_id: 13,
        right_id: 2,
        info: "pair".to_string(),
    });
    manager.persist(handle).unwrap();
    manager.flush().unwrap();

    let found = manager
        .find::<Pair>([("right_id", 2), ("left_id", 13)])
        .unwrap();

    assert_eq!(found, Some(handle));
    assert_eq!(count_rows(&manager, "pair"), 1);
}

#[test]
fn test_update_without_non_key_fields_is_skipped() {
    #[derive(Debug, Default)]
    struct Link {
        left_id: i64,
        right_id: i64,
    }

    crate::impl_entity!(Link {
        fields: [left_id, right_id],
        primary: [left_id, right_id],
    });

    let mut manager = create_test_manager();
    manager
        .connection()
        .execute_batch("CREATE TABLE link (left_id INTEGER, right_id INTEGER); INSERT INTO link VALUES (1, 2);")
        .unwrap();

    let handle = manager.find::<Link>([("left_id", 1), ("right_id", 2)]).unwrap().unwrap();
    manager.schedule_update(handle).unwrap();

    manager.flush().unwrap();
    assert!(!manager.has_pending_writes());
}

#[test]
fn test_detach_stops_tracking() {
    let mut manager = create_test_manager();
    let handle = manager.find::<Foo>(1).unwrap().unwrap();

    manager.detach(handle).unwrap();

    assert!(!manager.contains(handle));
    assert_eq!(manager.entity_state(handle).unwrap(), EntityState::Detached);
    let reloaded = manager.find::<Foo>(1).unwrap().unwrap();
    assert_ne!(reloaded, handle);
}

#[test]
fn test_load_all_reuses_tracked_instances() {
    let mut manager = create_test_manager();
    let tracked = manager.find::<Foo>(2).unwrap().unwrap();

    let all = manager.load_all::<Foo>().unwrap();

    assert_eq!(all.len(), 2);
    assert!(all.contains(&tracked));
    assert!(all.iter().all(|handle| manager.contains(*handle)));
}

#[test]
fn test_load_all_with_filter() {
    let mut manager = create_test_manager();

    let found = manager
        .load_all_with::<Foo, _>(|query| {
            query.where_eq("bar", "bar2");
        })
        .unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(manager.get(found[0]).unwrap().name, "foo2");
}

#[test]
fn test_persister_is_cached() {
    let mut manager = create_test_manager();

    let first: *const Persister<Foo> = manager.persister::<Foo>().unwrap();
    let second: *const Persister<Foo> = manager.persister::<Foo>().unwrap();

    assert!(std::ptr::eq(first, second));
}

#[test]
fn test_metadata_errors_are_raised_before_io() {
    let mut manager = create_test_manager();

    let err = manager.find::<Faulty>(1).unwrap_err();
    assert!(matches!(err, SnakeError::InvalidPrimaryDefinition { .. }));

    let handle = manager.attach(Faulty::default());
    assert!(manager.persist(handle).is_err());
    assert!(!manager.has_pending_writes());
}

#[test]
fn test_flush_without_pending_writes() {
    let mut manager = create_test_manager();
    manager.flush().unwrap();
    assert_eq!(count_rows(&manager, "foo"), 2);
}

#[test]
fn test_text_key_resolves_to_stored_identity() {
    let mut manager = create_test_manager();

    let by_text = manager.find::<Foo>("2").unwrap().expect("foo2 should exist");
    let by_integer = manager.find::<Foo>(2).unwrap();

    assert_eq!(by_integer, Some(by_text));
    assert_eq!(manager.find::<Foo>("2").unwrap(), Some(by_text));
}

#[test]
fn test_removed_instance_keeps_its_key_reserved() {
    let mut manager = create_test_manager();
    let handle = manager.find::<Foo>(2).unwrap().unwrap();
    manager.remove(handle).unwrap();

    assert_eq!(manager.find::<Foo>(2).unwrap(), None);
    assert_eq!(manager.find::<Foo>("2").unwrap(), None);
    assert_eq!(manager.load_all::<Foo>().unwrap().len(), 1);
    assert_eq!(manager.entity_state(handle).unwrap(), EntityState::Removed);
}
