use crate::collection::Document;
use crate::errors::OpalResult;
use crate::index::FullTextSearch;
use crate::common::FIELD_SEPARATOR;
use std::fmt::Debug;
use std::sync::Arc;

/// Strategy used when the collection copies documents.
///
/// The set is closed; each tag names one concrete strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CloneMethod {
    /// Structural deep copy. The default.
    #[default]
    #[serde(rename = "deep")]
    Deep,
    /// JSON round trip (`serialize` then `deserialize`).
    #[serde(rename = "parse-stringify")]
    ParseStringify,
    /// Top-level copy; nested values are shared.
    #[serde(rename = "shallow")]
    Shallow,
    /// Top-level copy of own fields, mirroring an assign-style copy.
    #[serde(rename = "shallow-assign")]
    ShallowAssign,
}

/// Copies a document using the named strategy.
pub fn clone_document(doc: &Document, method: CloneMethod) -> OpalResult<Document> {
    match method {
        // the persistent map makes a structural clone a true value snapshot
        CloneMethod::Deep => Ok(doc.clone()),
        CloneMethod::ParseStringify => {
            let json = serde_json::to_string(doc)?;
            let revived: Document = serde_json::from_str(&json)?;
            Ok(revived)
        }
        CloneMethod::Shallow | CloneMethod::ShallowAssign => Ok(doc.shallow_clone()),
    }
}

/// A virtual accessor that reads `obj.seg1.seg2...` and returns either the
/// scalar at the end of the path, or a flattened list when any intermediate
/// segment is a list.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NestedProperty {
    pub name: String,
    pub path: Vec<String>,
}

impl NestedProperty {
    /// Registers `name` with a path derived by splitting the name on `.`.
    pub fn new(name: &str) -> Self {
        NestedProperty {
            name: name.to_string(),
            path: name.split(FIELD_SEPARATOR).map(str::to_string).collect(),
        }
    }

    /// Registers `name` with an explicit path.
    pub fn with_path(name: &str, path: &[&str]) -> Self {
        NestedProperty {
            name: name.to_string(),
            path: path.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl From<&str> for NestedProperty {
    fn from(name: &str) -> Self {
        NestedProperty::new(name)
    }
}

/// Options for [crate::collection::Collection] construction.
///
/// Every flag defaults as documented on its builder method. Mutually
/// exclusive combinations (metadata disabled together with change tracking
/// or TTL) are rejected by the collection constructor.
#[derive(Clone, Default)]
pub struct CollectionOptions {
    pub unique: Vec<String>,
    pub indices: Vec<String>,
    pub adaptive_binary_indices: Option<bool>,
    pub async_listeners: bool,
    pub disable_meta: bool,
    pub disable_changes_api: Option<bool>,
    pub disable_delta_changes_api: Option<bool>,
    pub clone_objects: bool,
    pub clone_method: CloneMethod,
    pub serializable_indices: Option<bool>,
    pub transactional: bool,
    pub ttl_age: Option<i64>,
    pub ttl_interval: Option<i64>,
    pub nested_properties: Vec<NestedProperty>,
    pub full_text_search: Option<Arc<dyn FullTextSearch>>,
}

impl CollectionOptions {
    pub fn new() -> Self {
        CollectionOptions::default()
    }

    /// Defines unique hash indices on the given fields.
    pub fn with_unique(mut self, fields: &[&str]) -> Self {
        self.unique = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Defines sorted binary indices on the given fields.
    pub fn with_indices(mut self, fields: &[&str]) -> Self {
        self.indices = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Maintain binary indices inside every mutation (default `true`);
    /// `false` switches to lazy dirty-flag maintenance.
    pub fn adaptive_binary_indices(mut self, enabled: bool) -> Self {
        self.adaptive_binary_indices = Some(enabled);
        self
    }

    /// Dispatch event listeners fire-and-forget on a background thread
    /// (default `false`).
    pub fn async_listeners(mut self, enabled: bool) -> Self {
        self.async_listeners = enabled;
        self
    }

    /// Suppress document metadata (default `false`). Mutually exclusive with
    /// change tracking and TTL.
    pub fn disable_meta(mut self, disabled: bool) -> Self {
        self.disable_meta = disabled;
        self
    }

    /// Disable the in-memory change log (default `true`).
    pub fn disable_changes_api(mut self, disabled: bool) -> Self {
        self.disable_changes_api = Some(disabled);
        self
    }

    /// Disable minimal delta recomputation on update (default `true`; forced
    /// `true` when the changes API is disabled).
    pub fn disable_delta_changes_api(mut self, disabled: bool) -> Self {
        self.disable_delta_changes_api = Some(disabled);
        self
    }

    /// Deep-copy documents on the way in and out (default `false`).
    pub fn clone_objects(mut self, enabled: bool) -> Self {
        self.clone_objects = enabled;
        self
    }

    /// Strategy used when cloning is enabled (default [CloneMethod::Deep]).
    pub fn clone_method(mut self, method: CloneMethod) -> Self {
        self.clone_method = method;
        self
    }

    /// Convert date values on indexed fields to epoch milliseconds before
    /// indexing, so serialization preserves ordering (default `true`).
    pub fn serializable_indices(mut self, enabled: bool) -> Self {
        self.serializable_indices = Some(enabled);
        self
    }

    /// Snapshot state on every mutation and roll back on failure
    /// (default `false`).
    pub fn transactional(mut self, enabled: bool) -> Self {
        self.transactional = enabled;
        self
    }

    /// Evict documents older than `age` milliseconds, checked every
    /// `interval` milliseconds.
    pub fn ttl(mut self, age: i64, interval: i64) -> Self {
        self.ttl_age = Some(age);
        self.ttl_interval = Some(interval);
        self
    }

    /// Registers virtual accessors for nested paths.
    pub fn with_nested_properties(mut self, properties: Vec<NestedProperty>) -> Self {
        self.nested_properties = properties;
        self
    }

    /// Plugs in a full-text search observer.
    pub fn with_full_text_search(mut self, fts: Arc<dyn FullTextSearch>) -> Self {
        self.full_text_search = Some(fts);
        self
    }
}

impl Debug for CollectionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionOptions")
            .field("unique", &self.unique)
            .field("indices", &self.indices)
            .field("adaptive_binary_indices", &self.adaptive_binary_indices)
            .field("async_listeners", &self.async_listeners)
            .field("disable_meta", &self.disable_meta)
            .field("disable_changes_api", &self.disable_changes_api)
            .field("disable_delta_changes_api", &self.disable_delta_changes_api)
            .field("clone_objects", &self.clone_objects)
            .field("clone_method", &self.clone_method)
            .field("serializable_indices", &self.serializable_indices)
            .field("transactional", &self.transactional)
            .field("ttl_age", &self.ttl_age)
            .field("ttl_interval", &self.ttl_interval)
            .field("nested_properties", &self.nested_properties)
            .field("full_text_search", &self.full_text_search.is_some())
            .finish()
    }
}

/// Options for [crate::collection::Collection::clear].
#[derive(Clone, Copy, Debug, Default)]
pub struct ClearOptions {
    /// Drop the index definitions entirely instead of just emptying them.
    pub remove_indices: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::Value;

    #[test]
    fn test_defaults() {
        let options = CollectionOptions::default();
        assert!(options.unique.is_empty());
        assert!(options.adaptive_binary_indices.is_none());
        assert!(!options.clone_objects);
        assert_eq!(options.clone_method, CloneMethod::Deep);
        assert!(!options.transactional);
    }

    #[test]
    fn test_builder_chain() {
        let options = CollectionOptions::new()
            .with_unique(&["email"])
            .with_indices(&["age", "name"])
            .adaptive_binary_indices(false)
            .transactional(true)
            .ttl(1000, 100);

        assert_eq!(options.unique, vec!["email"]);
        assert_eq!(options.indices, vec!["age", "name"]);
        assert_eq!(options.adaptive_binary_indices, Some(false));
        assert!(options.transactional);
        assert_eq!(options.ttl_age, Some(1000));
        assert_eq!(options.ttl_interval, Some(100));
    }

    #[test]
    fn test_nested_property_from_name() {
        let prop = NestedProperty::new("address.zip");
        assert_eq!(prop.name, "address.zip");
        assert_eq!(prop.path, vec!["address", "zip"]);
    }

    #[test]
    fn test_nested_property_with_path() {
        let prop = NestedProperty::with_path("zip", &["address", "zip"]);
        assert_eq!(prop.name, "zip");
        assert_eq!(prop.path, vec!["address", "zip"]);
    }

    #[test]
    fn test_clone_document_strategies() {
        let doc = doc! { "a": 1, "b": { "c": [1, 2] } };

        for method in [
            CloneMethod::Deep,
            CloneMethod::ParseStringify,
            CloneMethod::Shallow,
            CloneMethod::ShallowAssign,
        ] {
            let copy = clone_document(&doc, method).unwrap();
            assert_eq!(copy, doc, "strategy {:?} must copy all fields", method);
        }
    }

    #[test]
    fn test_cloned_document_is_independent() {
        let doc = doc! { "a": 1 };
        let mut copy = clone_document(&doc, CloneMethod::Deep).unwrap();
        copy.put("a", 2).unwrap();

        assert_eq!(doc.get("a"), Value::Int(1));
        assert_eq!(copy.get("a"), Value::Int(2));
    }
}
