use contentstore_core::db::open_db;
use contentstore_core::{ChildrenMode, CreateEntity, EntityStore, StoreError, Values};
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::thread;

const WORKERS: usize = 4;
const PER_WORKER: usize = 10;

fn payload(value: serde_json::Value) -> Values {
    serde_json::from_value(value).unwrap()
}

#[test]
fn parallel_children_all_land_under_the_parent() {
    let dir = tempfile::tempdir().unwrap();
    let path: PathBuf = dir.path().join("store.sqlite3");

    let parent_id = {
        let conn = open_db(&path).unwrap();
        let store = EntityStore::try_new(&conn).unwrap();
        store
            .create(CreateEntity::new(payload(json!({"type": "board", "title": "inbox"}))))
            .unwrap()
            .id
    };

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                let store = EntityStore::try_new(&conn).unwrap();
                barrier.wait();
                for index in 0..PER_WORKER {
                    let title = format!("card-{worker}-{index}");
                    store
                        .create(
                            CreateEntity::new(payload(json!({"type": "card", "title": title})))
                                .with_parent(parent_id),
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let conn = open_db(&path).unwrap();
    let store = EntityStore::try_new(&conn).unwrap();
    let parent = store.get(parent_id).unwrap();
    let children = store.tree().children(&parent, ChildrenMode::Current).unwrap();
    assert_eq!(children.len(), WORKERS * PER_WORKER);
    for child in &children {
        assert_eq!(store.tree().parent(child).unwrap().map(|p| p.id), Some(parent_id));
    }
}

#[test]
fn parallel_duplicates_create_exactly_one_entity() {
    let dir = tempfile::tempdir().unwrap();
    let path: PathBuf = dir.path().join("store.sqlite3");
    drop(open_db(&path).unwrap());

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                let store = EntityStore::try_new(&conn).unwrap();
                barrier.wait();
                store.create(CreateEntity::new(payload(
                    json!({"type": "tag", "title": "urgent"}),
                )))
            })
        })
        .collect();

    let mut created = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => created += 1,
            Err(StoreError::AlreadyExists { .. }) => duplicates += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(duplicates, WORKERS - 1);

    let conn = open_db(&path).unwrap();
    let store = EntityStore::try_new(&conn).unwrap();
    assert_eq!(store.list("tag").unwrap().len(), 1);
}
