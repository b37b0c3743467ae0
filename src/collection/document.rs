use im::OrdMap;
use smallvec::SmallVec;

use crate::common::{
    Value, DOC_ID, DOC_META, FIELD_SEPARATOR, INITIAL_VERSION, META_CREATED, META_REVISION,
    META_UPDATED, META_VERSION,
};
use crate::errors::{ErrorKind, OpalError, OpalResult};
use std::borrow::Cow;
use std::fmt::{Debug, Display};

type FieldVec = SmallVec<[String; 8]>;

/// Internal document identifier: a monotonically increasing integer assigned
/// at insert, stable for the document's lifetime, never reused.
pub type DocId = u64;

/// Represents a document in an Opal collection.
///
/// Documents are composed of key-value pairs. The key is always a [String]
/// and the value is a [Value]. Nested documents are supported; the key of a
/// nested field is a [String] separated by `.` (for example `"a.b"` reads the
/// field `b` inside the nested document `a`).
///
/// Two fields are reserved and maintained by the engine:
///
/// * `$id` - The unique identifier of the document, assigned during insertion.
/// * `meta` - Change-tracking metadata: `{version, revision, created, updated}`.
///
/// ## Lock-Free Design
///
/// This struct uses `im::OrdMap` (a persistent ordered map):
/// - O(1) cloning via internal structural sharing
/// - Mutations create new maps, so a cloned document is a true snapshot
/// - Zero locks
#[derive(Clone, Eq, PartialEq, Hash, Default, Ord, PartialOrd, serde::Deserialize, serde::Serialize)]
pub struct Document {
    data: OrdMap<String, Value>,
}

impl Document {
    /// Creates a new empty document.
    pub fn new() -> Self {
        Document {
            data: OrdMap::new(),
        }
    }

    /// Checks if the document is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the number of top-level fields.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Associates the specified [Value] with the specified key in this
    /// document. If the key already exists, its value is replaced. The key
    /// may be an embedded path (`"user.address.zip"`).
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty, or if the key is the reserved
    /// `$id` field (the identifier is generated by the engine and cannot be
    /// set manually).
    pub fn put<'a, T: Into<Value>>(
        &mut self,
        key: impl Into<Cow<'a, str>>,
        value: T,
    ) -> OpalResult<()> {
        let key = key.into();
        if key.is_empty() {
            log::error!("Document does not support empty key");
            return Err(OpalError::new(
                "Document does not support empty key",
                ErrorKind::InvalidFieldName,
            ));
        }

        if key == DOC_ID {
            log::error!("Document id is an auto generated field and cannot be set manually");
            return Err(OpalError::new(
                "Document id is an auto generated field and cannot be set manually",
                ErrorKind::IllegalState,
            ));
        }

        let value = value.into();

        if key.contains(FIELD_SEPARATOR) {
            let splits: FieldVec = key.split(FIELD_SEPARATOR).map(str::to_string).collect();
            self.deep_put(&splits, value)
        } else {
            self.data = self.data.update(key.to_string(), value);
            Ok(())
        }
    }

    /// Returns the [Value] associated with the specified key, or
    /// [Value::Null] if this document contains no mapping for the key.
    /// Embedded paths (`"location.address.zip"`) and array positions
    /// (`"items.0"`) are supported; when an intermediate segment is an
    /// array without a numeric selector, the results are flattened into a
    /// single array.
    pub fn get(&self, key: &str) -> Value {
        match self.data.get(key) {
            Some(value) => value.clone(),
            None => {
                if key.contains(FIELD_SEPARATOR) {
                    let splits: FieldVec =
                        key.split(FIELD_SEPARATOR).map(str::to_string).collect();
                    self.resolve_path(&splits)
                } else {
                    Value::Null
                }
            }
        }
    }

    /// Resolves a pre-split field path against this document, flattening
    /// through arrays. Used both by [Document::get] and by registered nested
    /// property accessors.
    pub fn resolve_path(&self, path: &[String]) -> Value {
        fn resolve(value: &Value, path: &[String]) -> Value {
            if path.is_empty() {
                return value.clone();
            }
            match value {
                Value::Document(doc) => {
                    let next = doc.data.get(&path[0]).cloned().unwrap_or(Value::Null);
                    resolve(&next, &path[1..])
                }
                Value::Array(items) => {
                    // numeric segment selects a single element
                    if let Ok(idx) = path[0].parse::<usize>() {
                        match items.get(idx) {
                            Some(item) => resolve(item, &path[1..]),
                            None => Value::Null,
                        }
                    } else {
                        // fan out over every element, flattening nested results
                        let mut flat = Vec::with_capacity(items.len());
                        for item in items {
                            match resolve(item, path) {
                                Value::Null => {}
                                Value::Array(inner) => flat.extend(inner),
                                other => flat.push(other),
                            }
                        }
                        Value::Array(flat)
                    }
                }
                _ => Value::Null,
            }
        }

        if path.is_empty() {
            return Value::Null;
        }
        let head = self.data.get(&path[0]).cloned().unwrap_or(Value::Null);
        resolve(&head, &path[1..])
    }

    fn deep_put(&mut self, path: &[String], value: Value) -> OpalResult<()> {
        if path.len() == 1 {
            self.data = self.data.update(path[0].clone(), value);
            return Ok(());
        }
        let mut child = match self.data.get(&path[0]) {
            Some(Value::Document(doc)) => doc.clone(),
            Some(_) | None => Document::new(),
        };
        child.deep_put(&path[1..], value)?;
        self.data = self.data.update(path[0].clone(), Value::Document(child));
        Ok(())
    }

    /// Removes the mapping for the specified key from this document if
    /// present. Embedded paths are supported.
    pub fn remove(&mut self, key: &str) -> OpalResult<()> {
        if key.contains(FIELD_SEPARATOR) {
            let splits: FieldVec = key.split(FIELD_SEPARATOR).map(str::to_string).collect();
            let (head, rest) = splits.split_first().map(|(h, r)| (h.clone(), r)).ok_or_else(|| {
                OpalError::new("Document does not support empty key", ErrorKind::InvalidFieldName)
            })?;
            if let Some(Value::Document(doc)) = self.data.get(&head) {
                let mut child = doc.clone();
                child.remove(&rest.join(FIELD_SEPARATOR))?;
                self.data = self.data.update(head, Value::Document(child));
            }
        } else {
            self.data = self.data.without(key);
        }
        Ok(())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Copies the top-level fields into a fresh document. With the
    /// persistent value model the nested values are shared structurally.
    pub fn shallow_clone(&self) -> Document {
        let mut copy = Document::new();
        for (key, value) in self.data.iter() {
            copy.data = copy.data.update(key.clone(), value.clone());
        }
        copy
    }

    /// Sets a top-level field without reserved-key validation. Only the
    /// engine may write `$id` and `meta` through this path.
    pub(crate) fn put_raw(&mut self, key: &str, value: Value) {
        self.data = self.data.update(key.to_string(), value);
    }

    /// Iterates over the top-level fields of this document.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    /// Returns the internal identifier of this document, if it has been
    /// inserted into a collection.
    pub fn id(&self) -> Option<DocId> {
        match self.data.get(DOC_ID) {
            Some(Value::Int(id)) if *id >= 0 => Some(*id as DocId),
            _ => None,
        }
    }

    pub(crate) fn set_id(&mut self, id: DocId) {
        self.data = self.data.update(DOC_ID.to_string(), Value::Int(id as i64));
    }

    /// Strips the reserved fields, turning a stored record back into a plain
    /// application document. Used when a removed document is handed back to
    /// the caller.
    pub(crate) fn strip_reserved(&mut self) {
        self.data = self.data.without(DOC_ID).without(DOC_META);
    }

    /// Returns the metadata document, if present.
    pub fn meta(&self) -> Option<Document> {
        match self.data.get(DOC_META) {
            Some(Value::Document(meta)) => Some(meta.clone()),
            _ => None,
        }
    }

    pub fn revision(&self) -> i64 {
        self.meta()
            .and_then(|m| match m.get(META_REVISION) {
                Value::Int(r) => Some(r),
                _ => None,
            })
            .unwrap_or(0)
    }

    pub fn created(&self) -> Option<i64> {
        self.meta().and_then(|m| match m.get(META_CREATED) {
            Value::Int(t) => Some(t),
            _ => None,
        })
    }

    pub fn updated(&self) -> Option<i64> {
        self.meta().and_then(|m| match m.get(META_UPDATED) {
            Value::Int(t) => Some(t),
            _ => None,
        })
    }

    /// Initialises metadata on first insert.
    pub(crate) fn init_meta(&mut self, now: i64) {
        let mut meta = Document::new();
        meta.data = meta
            .data
            .update(META_VERSION.to_string(), Value::Int(INITIAL_VERSION))
            .update(META_REVISION.to_string(), Value::Int(0))
            .update(META_CREATED.to_string(), Value::Int(now));
        self.data = self.data.update(DOC_META.to_string(), Value::Document(meta));
    }

    /// Bumps the revision and stamps the update time, carrying the creation
    /// time forward from the previous version of the document.
    pub(crate) fn touch_meta(&mut self, previous: &Document, now: i64) {
        let created = previous.created().unwrap_or(now);
        let mut meta = Document::new();
        meta.data = meta
            .data
            .update(META_VERSION.to_string(), Value::Int(INITIAL_VERSION))
            .update(META_REVISION.to_string(), Value::Int(previous.revision() + 1))
            .update(META_CREATED.to_string(), Value::Int(created))
            .update(META_UPDATED.to_string(), Value::Int(now));
        self.data = self.data.update(DOC_META.to_string(), Value::Document(meta));
    }
}

impl Display for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "\"{}\": {}", k, v)?;
        }
        write!(f, "}}")
    }
}

impl Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

/// Strips the surrounding quotes that `stringify!` leaves on string literal
/// keys inside the [doc!] macro.
pub fn normalize(key: &str) -> String {
    key.trim_matches('"').to_string()
}

/// Creates a [Document] from key-value pairs.
///
/// ```ignore
/// let doc = doc! {
///     "name": "Alice",
///     "age": 30,
///     "address": { "city": "Berlin", "zip": "10115" },
///     "tags": ["a", "b"]
/// };
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::collection::Document::new()
    };

    (@fields $doc:ident; ) => {};

    (@fields $doc:ident; $key:tt : $value:tt $(, $($rest:tt)*)?) => {
        $doc.put(&$crate::collection::normalize(stringify!($key)), $crate::doc_value!($value))
            .expect(&format!("Failed to put value {} in document", stringify!($value)));
        $crate::doc!(@fields $doc; $($($rest)*)?);
    };

    (@fields $doc:ident; $key:tt : $value:expr $(, $($rest:tt)*)?) => {
        $doc.put(&$crate::collection::normalize(stringify!($key)), $crate::doc_value!($value))
            .expect("Failed to put value in document");
        $crate::doc!(@fields $doc; $($($rest)*)?);
    };

    ({ $($input:tt)* }) => {
        $crate::doc!($($input)*)
    };

    ($($input:tt)*) => {
        {
            #[allow(unused_imports)]
            use $crate::doc_value;

            let mut doc = $crate::collection::Document::new();
            $crate::doc!(@fields doc; $($input)*);
            doc
        }
    };
}

/// Helper macro to convert values for the [doc!] macro.
/// Handles nested documents, arrays, and expressions.
#[macro_export]
macro_rules! doc_value {
    ({ $($key:tt : $value:tt),* $(,)? }) => {
        $crate::common::Value::Document($crate::doc!{ $($key : $value),* })
    };

    ([ $($value:tt),* $(,)? ]) => {
        $crate::common::Value::Array(vec![$($crate::doc_value!($value)),*])
    };

    ($value:expr) => {
        $crate::common::Value::from($value)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_document_is_empty() {
        let doc = Document::new();
        assert!(doc.is_empty());
        assert_eq!(doc.len(), 0);
    }

    #[test]
    fn test_put_and_get() {
        let mut doc = Document::new();
        doc.put("name", "Alice").unwrap();
        doc.put("age", 30).unwrap();

        assert_eq!(doc.get("name"), Value::String("Alice".into()));
        assert_eq!(doc.get("age"), Value::Int(30));
        assert_eq!(doc.get("missing"), Value::Null);
    }

    #[test]
    fn test_put_empty_key_fails() {
        let mut doc = Document::new();
        let result = doc.put("", 1);
        assert_eq!(result.unwrap_err().kind(), &ErrorKind::InvalidFieldName);
    }

    #[test]
    fn test_put_id_fails() {
        let mut doc = Document::new();
        let result = doc.put(DOC_ID, 1);
        assert_eq!(result.unwrap_err().kind(), &ErrorKind::IllegalState);
    }

    #[test]
    fn test_deep_put_and_get() {
        let mut doc = Document::new();
        doc.put("user.address.zip", "10115").unwrap();

        assert_eq!(doc.get("user.address.zip"), Value::String("10115".into()));
        assert!(matches!(doc.get("user"), Value::Document(_)));
    }

    #[test]
    fn test_array_position_access() {
        let doc = doc! { "items": [10, 20, 30] };
        assert_eq!(doc.get("items.0"), Value::Int(10));
        assert_eq!(doc.get("items.2"), Value::Int(30));
        assert_eq!(doc.get("items.9"), Value::Null);
    }

    #[test]
    fn test_resolve_path_flattens_arrays() {
        let doc = doc! {
            "orders": [
                { "lines": [ { "sku": "a" }, { "sku": "b" } ] },
                { "lines": [ { "sku": "c" } ] }
            ]
        };
        let path: Vec<String> = vec!["orders".into(), "lines".into(), "sku".into()];
        let resolved = doc.resolve_path(&path);
        assert_eq!(
            resolved,
            Value::Array(vec![
                Value::String("a".into()),
                Value::String("b".into()),
                Value::String("c".into())
            ])
        );
    }

    #[test]
    fn test_remove() {
        let mut doc = doc! { "a": 1, "b": { "c": 2, "d": 3 } };
        doc.remove("a").unwrap();
        assert_eq!(doc.get("a"), Value::Null);

        doc.remove("b.c").unwrap();
        assert_eq!(doc.get("b.c"), Value::Null);
        assert_eq!(doc.get("b.d"), Value::Int(3));
    }

    #[test]
    fn test_id_round_trip() {
        let mut doc = Document::new();
        assert_eq!(doc.id(), None);
        doc.set_id(7);
        assert_eq!(doc.id(), Some(7));

        doc.strip_reserved();
        assert_eq!(doc.id(), None);
    }

    #[test]
    fn test_meta_lifecycle() {
        let mut doc = doc! { "x": 1 };
        doc.init_meta(1000);
        assert_eq!(doc.revision(), 0);
        assert_eq!(doc.created(), Some(1000));
        assert_eq!(doc.updated(), None);

        let previous = doc.clone();
        let mut updated = doc.clone();
        updated.touch_meta(&previous, 2000);
        assert_eq!(updated.revision(), 1);
        assert_eq!(updated.created(), Some(1000));
        assert_eq!(updated.updated(), Some(2000));
    }

    #[test]
    fn test_clone_is_snapshot() {
        let mut doc = doc! { "x": 1 };
        let snapshot = doc.clone();
        doc.put("x", 2).unwrap();

        assert_eq!(snapshot.get("x"), Value::Int(1));
        assert_eq!(doc.get("x"), Value::Int(2));
    }

    #[test]
    fn test_doc_macro_nested() {
        let doc = doc! {
            "name": "Bob",
            "scores": [1, 2, 3],
            "nested": { "deep": { "value": true } }
        };
        assert_eq!(doc.get("name"), Value::String("Bob".into()));
        assert_eq!(doc.get("nested.deep.value"), Value::Bool(true));
    }

    #[test]
    fn test_serde_round_trip() {
        let doc = doc! { "a": 1, "b": { "c": "x" }, "d": [1.5, 2.5] };
        let json = serde_json::to_string(&doc).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(doc, back);
    }
}
