#![allow(dead_code)]

use opal::collection::{Collection, Document};
use opal::index::CheckIndexOptions;

/// Asserts the structural invariants that must hold outside a transaction:
/// id/data alignment, strictly increasing identifiers, a sane id counter,
/// and correctly ordered binary indices.
pub fn assert_invariants(collection: &Collection, indexed_fields: &[&str]) {
    let data = collection.data();
    assert_eq!(data.len(), collection.count());

    let ids: Vec<u64> = data
        .iter()
        .map(|doc| doc.id().expect("stored document must carry an id"))
        .collect();
    for pair in ids.windows(2) {
        assert!(
            pair[0] < pair[1],
            "identifier index must be strictly increasing: {:?}",
            ids
        );
    }
    if let Some(&last) = ids.last() {
        assert!(collection.max_id() >= last);
    }

    for field in indexed_fields {
        assert!(
            collection
                .check_index(field, &CheckIndexOptions::default())
                .unwrap(),
            "binary index on '{}' failed its integrity check",
            field
        );
    }
}

/// Ages of the documents in data order, for comparing query results.
pub fn ages(docs: &[Document]) -> Vec<i64> {
    docs.iter()
        .map(|doc| match doc.get("age") {
            opal::Value::Int(age) => age,
            other => panic!("expected integer age, got {:?}", other),
        })
        .collect()
}
