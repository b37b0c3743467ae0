//! Unique hash indices.
//!
//! A unique index maps an indexed field value to the data position currently
//! holding it, enforcing injectivity. Null values are not indexed: a missing
//! field does not participate in the constraint.
//!
//! Position references cannot be persisted safely, so unique indices are
//! rebuilt from scratch on deserialization; only the field names survive a
//! round trip.

use crate::collection::Document;
use crate::errors::{ErrorKind, OpalError, OpalResult};
use crate::Value;
use std::collections::HashMap;

/// Hash index from field value to data position.
#[derive(Clone, Debug, Default)]
pub struct UniqueIndex {
    field: String,
    key_map: HashMap<Value, usize>,
}

impl UniqueIndex {
    pub fn new(field: &str) -> Self {
        UniqueIndex {
            field: field.to_string(),
            key_map: HashMap::new(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn len(&self) -> usize {
        self.key_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_map.is_empty()
    }

    /// Position currently holding `value`, if any.
    pub fn get(&self, value: &Value) -> Option<usize> {
        self.key_map.get(value).copied()
    }

    /// Indexes `value` at `position`.
    ///
    /// # Errors
    ///
    /// Fails with a unique constraint violation when another position already
    /// holds the value.
    pub fn set(&mut self, value: Value, position: usize) -> OpalResult<()> {
        if value.is_null() {
            return Ok(());
        }
        if let Some(&existing) = self.key_map.get(&value) {
            if existing != position {
                log::error!(
                    "Duplicate key '{}' for unique index on field '{}'",
                    value,
                    self.field
                );
                return Err(OpalError::new(
                    &format!(
                        "Duplicate key '{}' for unique index on field '{}'",
                        value, self.field
                    ),
                    ErrorKind::UniqueConstraintViolation,
                ));
            }
        }
        self.key_map.insert(value, position);
        Ok(())
    }

    /// Rewrites the mapping when a document's indexed value changes.
    ///
    /// # Errors
    ///
    /// Fails with a unique constraint violation when the new value is held by
    /// a different position.
    pub fn update(&mut self, old_value: &Value, new_value: Value, position: usize) -> OpalResult<()> {
        if let Some(&existing) = self.key_map.get(&new_value) {
            if existing != position {
                log::error!(
                    "Duplicate key '{}' for unique index on field '{}'",
                    new_value,
                    self.field
                );
                return Err(OpalError::new(
                    &format!(
                        "Duplicate key '{}' for unique index on field '{}'",
                        new_value, self.field
                    ),
                    ErrorKind::UniqueConstraintViolation,
                ));
            }
        }
        if *old_value != new_value {
            self.remove_value(old_value);
        }
        self.set(new_value, position)
    }

    /// Removes the mapping for `value`. No-op if the value is absent.
    pub fn remove_value(&mut self, value: &Value) {
        self.key_map.remove(value);
    }

    /// Decrements every stored position greater than the removed one. Must
    /// run after the removed document's own entry has been dropped.
    pub fn shift_after_remove(&mut self, removed: usize) {
        for position in self.key_map.values_mut() {
            if *position > removed {
                *position -= 1;
            }
        }
    }

    pub fn clear(&mut self) {
        self.key_map.clear();
    }

    /// Rebuilds the index from the data array, for example after
    /// deserialization.
    pub fn rebuild<F>(&mut self, data: &[Document], extract: F) -> OpalResult<()>
    where
        F: Fn(&Document) -> Value,
    {
        self.key_map.clear();
        for (position, doc) in data.iter().enumerate() {
            self.set(extract(doc), position)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_set_and_get() {
        let mut index = UniqueIndex::new("email");
        index.set(Value::from("a@x.io"), 0).unwrap();
        index.set(Value::from("b@x.io"), 1).unwrap();

        assert_eq!(index.get(&Value::from("a@x.io")), Some(0));
        assert_eq!(index.get(&Value::from("b@x.io")), Some(1));
        assert_eq!(index.get(&Value::from("c@x.io")), None);
    }

    #[test]
    fn test_set_collision_fails() {
        let mut index = UniqueIndex::new("email");
        index.set(Value::from("a@x.io"), 0).unwrap();

        let err = index.set(Value::from("a@x.io"), 1).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UniqueConstraintViolation);
        // the original mapping is untouched
        assert_eq!(index.get(&Value::from("a@x.io")), Some(0));
    }

    #[test]
    fn test_set_same_position_is_idempotent() {
        let mut index = UniqueIndex::new("email");
        index.set(Value::from("a@x.io"), 0).unwrap();
        assert!(index.set(Value::from("a@x.io"), 0).is_ok());
    }

    #[test]
    fn test_null_values_are_not_indexed() {
        let mut index = UniqueIndex::new("email");
        index.set(Value::Null, 0).unwrap();
        index.set(Value::Null, 1).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_update_rewrites_mapping() {
        let mut index = UniqueIndex::new("email");
        index.set(Value::from("a@x.io"), 0).unwrap();

        index
            .update(&Value::from("a@x.io"), Value::from("z@x.io"), 0)
            .unwrap();
        assert_eq!(index.get(&Value::from("a@x.io")), None);
        assert_eq!(index.get(&Value::from("z@x.io")), Some(0));
    }

    #[test]
    fn test_update_collision_fails() {
        let mut index = UniqueIndex::new("email");
        index.set(Value::from("a@x.io"), 0).unwrap();
        index.set(Value::from("b@x.io"), 1).unwrap();

        let err = index
            .update(&Value::from("b@x.io"), Value::from("a@x.io"), 1)
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UniqueConstraintViolation);
        // nothing was rewritten
        assert_eq!(index.get(&Value::from("b@x.io")), Some(1));
    }

    #[test]
    fn test_remove_value_is_noop_when_absent() {
        let mut index = UniqueIndex::new("email");
        index.remove_value(&Value::from("missing"));
        assert!(index.is_empty());
    }

    #[test]
    fn test_shift_after_remove() {
        let mut index = UniqueIndex::new("k");
        index.set(Value::Int(10), 0).unwrap();
        index.set(Value::Int(20), 1).unwrap();
        index.set(Value::Int(30), 2).unwrap();

        index.remove_value(&Value::Int(20));
        index.shift_after_remove(1);

        assert_eq!(index.get(&Value::Int(10)), Some(0));
        assert_eq!(index.get(&Value::Int(30)), Some(1));
    }

    #[test]
    fn test_rebuild() {
        let data = vec![doc! { "k": 1 }, doc! { "k": 2 }];
        let mut index = UniqueIndex::new("k");
        index.set(Value::Int(99), 7).unwrap();

        index.rebuild(&data, |d| d.get("k")).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.get(&Value::Int(99)), None);
        assert_eq!(index.get(&Value::Int(2)), Some(1));
    }

    #[test]
    fn test_rebuild_detects_duplicates() {
        let data = vec![doc! { "k": 1 }, doc! { "k": 1 }];
        let mut index = UniqueIndex::new("k");
        let err = index.rebuild(&data, |d| d.get("k")).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UniqueConstraintViolation);
    }
}
