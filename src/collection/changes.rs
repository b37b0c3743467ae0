//! Change tracking.
//!
//! When enabled, the collection appends a record to an in-memory log for
//! every mutation: `I` on insert, `U` on update, `R` on remove. With delta
//! tracking also enabled, update records carry a minimal property-level diff
//! instead of the full document.

use crate::collection::Document;
use crate::common::RESERVED_FIELDS;
use crate::Value;
use std::collections::BTreeSet;

/// Operation tag of a change record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ChangeOp {
    #[serde(rename = "I")]
    Insert,
    #[serde(rename = "U")]
    Update,
    #[serde(rename = "R")]
    Remove,
}

/// One entry of the change log.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChangeRecord {
    /// Owning collection name.
    pub name: String,
    pub op: ChangeOp,
    /// Deep copy of the affected document, or the delta for `U` records when
    /// delta tracking is on.
    pub obj: Document,
}

impl ChangeRecord {
    pub fn new(name: &str, op: ChangeOp, obj: Document) -> Self {
        ChangeRecord {
            name: name.to_string(),
            op,
            obj,
        }
    }
}

/// Computes the minimal delta between two versions of a document.
///
/// Walks the new record's property set, recursing into nested documents. A
/// leaf is included when the old version had no such key, when the key sits
/// on a unique index, or when the key is reserved (`$id`, `meta`); nested
/// documents contribute their recursive delta when it is non-empty;
/// everything else is included only when the value changed.
pub(crate) fn compute_delta(
    old: &Document,
    new: &Document,
    unique_fields: &BTreeSet<String>,
) -> Document {
    let mut delta = Document::new();

    for (key, new_value) in new.iter() {
        if RESERVED_FIELDS.contains(&key.as_str()) || unique_fields.contains(key) {
            delta.put_raw(key, new_value.clone());
            continue;
        }

        if !old.contains_key(key) {
            delta.put_raw(key, new_value.clone());
            continue;
        }

        let old_value = old.get(key);
        match (&old_value, new_value) {
            (Value::Document(old_doc), Value::Document(new_doc)) => {
                let nested = compute_delta(old_doc, new_doc, unique_fields);
                if !nested.is_empty() {
                    delta.put_raw(key, Value::Document(nested));
                }
            }
            _ => {
                if old_value != *new_value {
                    delta.put_raw(key, new_value.clone());
                }
            }
        }
    }

    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn no_unique() -> BTreeSet<String> {
        BTreeSet::new()
    }

    #[test]
    fn test_delta_of_identical_documents_is_empty() {
        let doc = doc! { "a": 1, "b": { "c": 2 } };
        let delta = compute_delta(&doc, &doc, &no_unique());
        assert!(delta.is_empty());
    }

    #[test]
    fn test_delta_includes_changed_scalar() {
        let old = doc! { "a": 1, "b": 2 };
        let new = doc! { "a": 1, "b": 3 };
        let delta = compute_delta(&old, &new, &no_unique());
        assert_eq!(delta, doc! { "b": 3 });
    }

    #[test]
    fn test_delta_recurses_into_nested_documents() {
        let old = doc! { "a": 1, "b": { "c": 2, "d": 3 } };
        let new = doc! { "a": 1, "b": { "c": 2, "d": 4 } };
        let delta = compute_delta(&old, &new, &no_unique());
        assert_eq!(delta, doc! { "b": { "d": 4 } });
    }

    #[test]
    fn test_delta_includes_new_keys() {
        let old = doc! { "a": 1 };
        let new = doc! { "a": 1, "b": 2 };
        let delta = compute_delta(&old, &new, &no_unique());
        assert_eq!(delta, doc! { "b": 2 });
    }

    #[test]
    fn test_delta_always_includes_unique_keys() {
        let old = doc! { "email": "a@x.io", "age": 1 };
        let new = doc! { "email": "a@x.io", "age": 1 };
        let unique: BTreeSet<String> = ["email".to_string()].into();
        let delta = compute_delta(&old, &new, &unique);
        assert_eq!(delta, doc! { "email": "a@x.io" });
    }

    #[test]
    fn test_delta_always_includes_reserved_fields() {
        let mut old = doc! { "a": 1 };
        old.set_id(9);
        let mut new = doc! { "a": 1 };
        new.set_id(9);

        let delta = compute_delta(&old, &new, &no_unique());
        assert_eq!(delta.id(), Some(9));
    }

    #[test]
    fn test_change_record_serialization_uses_short_tags() {
        let record = ChangeRecord::new("users", ChangeOp::Insert, doc! { "a": 1 });
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"op\":\"I\""));

        let back: ChangeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
