mod common;

use common::assert_invariants;
use opal::collection::{Collection, CollectionOptions};
use opal::errors::ErrorKind;
use opal::filter::field;
use opal::{doc, Value};

fn transactional() -> Collection {
    Collection::with_options(
        "tx",
        CollectionOptions::default()
            .transactional(true)
            .with_unique(&["k"])
            .with_indices(&["k"]),
    )
    .unwrap()
}

// Seed scenario: transactional rollback of a failing batch.
#[test]
fn test_failing_batch_insert_rolls_back_everything() {
    let collection = transactional();

    let err = collection
        .insert_all(vec![doc! { "k": 1 }, doc! { "k": 2 }, doc! { "k": 1 }])
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::UniqueConstraintViolation);

    assert_eq!(collection.count(), 0);
    assert_eq!(collection.max_id(), 0);
    assert!(collection.by("k", &Value::Int(1)).unwrap().is_none());
    assert!(collection.by("k", &Value::Int(2)).unwrap().is_none());
    assert!(collection
        .calculate_range("k", opal::index::RangeOp::Gte, &Value::Int(0), None)
        .unwrap()
        .is_empty());
    assert_invariants(&collection, &["k"]);
}

#[test]
fn test_failed_mutation_leaves_snapshot_equal_state() {
    let collection = transactional();
    collection
        .insert_all(vec![doc! { "k": 1 }, doc! { "k": 2 }])
        .unwrap();

    let before = collection.to_json();

    let err = collection.insert(doc! { "k": 2 }).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::UniqueConstraintViolation);

    let after = collection.to_json();
    assert_eq!(before.data, after.data);
    assert_eq!(before.id_index, after.id_index);
    assert_eq!(before.max_id, after.max_id);
    assert_eq!(
        serde_json::to_string(&before.binary_indices).unwrap(),
        serde_json::to_string(&after.binary_indices).unwrap()
    );
}

#[test]
fn test_failed_update_rolls_back() {
    let collection = transactional();
    let docs = collection
        .insert_all(vec![doc! { "k": 1 }, doc! { "k": 2 }])
        .unwrap();

    let mut colliding = docs[1].clone();
    colliding.put("k", 1).unwrap();
    assert!(collection.update(colliding).is_err());

    // both documents keep their values and the indices still resolve
    assert_eq!(
        collection.by("k", &Value::Int(2)).unwrap().unwrap().id(),
        docs[1].id()
    );
    assert_invariants(&collection, &["k"]);
}

#[test]
fn test_rollback_restores_dynamic_views() {
    let collection = transactional();
    collection
        .add_dynamic_view("big", field("k").gte(10))
        .unwrap();
    collection.insert(doc! { "k": 10 }).unwrap();
    assert_eq!(collection.view_data("big").unwrap().len(), 1);

    // second insert matches the view, then collides and rolls back
    let err = collection
        .insert_all(vec![doc! { "k": 20 }, doc! { "k": 10 }])
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::UniqueConstraintViolation);

    assert_eq!(collection.view_data("big").unwrap().len(), 1);
}

#[test]
fn test_explicit_transaction_methods() {
    let collection = transactional();
    collection.insert(doc! { "k": 1 }).unwrap();

    collection.start_transaction();
    collection.rollback();
    assert_eq!(collection.count(), 1);

    collection.start_transaction();
    collection.commit();
    assert_eq!(collection.count(), 1);
}

#[test]
fn test_transaction_methods_are_noops_when_disabled() {
    let collection = Collection::new("plain").unwrap();
    collection.insert(doc! { "k": 1 }).unwrap();

    collection.start_transaction();
    collection.rollback();

    // nothing was snapshotted, nothing restored
    assert_eq!(collection.count(), 1);
}

#[test]
fn test_non_transactional_batch_keeps_prefix() {
    let collection = Collection::with_options(
        "plain",
        CollectionOptions::default().with_unique(&["k"]),
    )
    .unwrap();

    let err = collection
        .insert_all(vec![doc! { "k": 1 }, doc! { "k": 2 }, doc! { "k": 1 }])
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::UniqueConstraintViolation);

    // without a transaction the documents inserted before the failure stay
    assert_eq!(collection.count(), 2);
    assert_invariants(&collection, &[]);
}

#[test]
fn test_change_log_rolls_back_with_the_mutation() {
    let collection = Collection::with_options(
        "tx",
        CollectionOptions::default()
            .transactional(true)
            .with_unique(&["k"])
            .disable_changes_api(false),
    )
    .unwrap();

    collection.insert(doc! { "k": 1 }).unwrap();
    assert_eq!(collection.get_changes().len(), 1);

    assert!(collection
        .insert_all(vec![doc! { "k": 5 }, doc! { "k": 1 }])
        .is_err());
    // the rolled-back inserts left no change records behind
    assert_eq!(collection.get_changes().len(), 1);
}
