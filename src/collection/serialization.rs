//! Collection serialization.
//!
//! [Collection::to_json] produces a self-describing snapshot record;
//! [Collection::from_json_object] revives it. Unique indices are rebuilt
//! from the data on load because stale position references cannot be
//! persisted safely, and dynamic view memberships are re-evaluated for the
//! same reason.

use crate::collection::changes::ChangeRecord;
use crate::collection::opal_collection::resolve_field;
use crate::collection::{
    CloneMethod, Collection, CollectionOptions, DocId, Document, NestedProperty,
};
use crate::errors::{ErrorKind, OpalError, OpalResult};
use crate::index::{BinaryIndex, FullTextSearch, UniqueIndex};
use crate::view::DynamicView;
use crate::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Self-describing serialized form of a collection.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionJson {
    pub name: String,
    pub data: Vec<Document>,
    pub id_index: Vec<DocId>,
    pub max_id: DocId,
    pub dirty: bool,
    pub binary_indices: BTreeMap<String, BinaryIndex>,
    /// Unique index field names only; the maps are rebuilt on load.
    pub unique_names: Vec<String>,
    pub dynamic_views: Vec<DynamicView>,
    pub transforms: BTreeMap<String, Value>,
    pub nested_properties: Vec<NestedProperty>,
    pub adaptive_binary_indices: bool,
    pub async_listeners: bool,
    pub disable_meta: bool,
    pub disable_changes_api: bool,
    pub disable_delta_changes_api: bool,
    pub clone_objects: bool,
    pub clone_method: CloneMethod,
    pub serializable_indices: bool,
    pub transactional: bool,
    pub changes: Vec<ChangeRecord>,
    pub ttl_age: Option<i64>,
    pub ttl_interval: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_text_search: Option<Value>,
}

/// Per-collection revival options for [Collection::from_json_object].
#[derive(Clone, Default)]
pub struct ReviveOptions {
    /// Maps every stored document through a caller-supplied constructor, for
    /// reviving typed records.
    pub inflate: Option<Arc<dyn Fn(Document) -> Document + Send + Sync>>,
    /// Full-text search observer to re-attach; the engine itself only
    /// persists the observer's snapshot.
    pub full_text_search: Option<Arc<dyn FullTextSearch>>,
}

impl Collection {
    /// Snapshot of the full collection state as a serializable record.
    pub fn to_json(&self) -> CollectionJson {
        let state = self.inner.state.read();
        let config = &self.inner.config;
        let ttl = self.inner.ttl.lock();

        CollectionJson {
            name: self.inner.name.clone(),
            data: state.data.clone(),
            id_index: state.id_index.clone(),
            max_id: state.max_id,
            dirty: state.dirty,
            binary_indices: state.binary_indices.clone(),
            unique_names: state.unique_indices.keys().cloned().collect(),
            dynamic_views: state.views.clone(),
            transforms: self
                .inner
                .transforms
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            nested_properties: config
                .nested
                .iter()
                .map(|(name, path)| NestedProperty {
                    name: name.clone(),
                    path: path.clone(),
                })
                .collect(),
            adaptive_binary_indices: config.adaptive_binary_indices,
            async_listeners: config.async_listeners,
            disable_meta: config.disable_meta,
            disable_changes_api: !self.inner.changes_enabled(),
            disable_delta_changes_api: !self.inner.delta_enabled(),
            clone_objects: config.clone_objects,
            clone_method: config.clone_method,
            serializable_indices: config.serializable_indices,
            transactional: config.transactional,
            changes: state.changes.clone(),
            ttl_age: (ttl.age_ms > 0).then_some(ttl.age_ms),
            ttl_interval: (ttl.interval_ms > 0).then_some(ttl.interval_ms),
            full_text_search: self.inner.fts.as_ref().and_then(|fts| fts.to_json()),
        }
    }

    /// Revives a collection from its serialized form.
    ///
    /// Data, the identifier index, the id counter, binary indices (including
    /// their dirty flags), views, transforms, and the change log are
    /// restored; unique indices and view memberships are rebuilt.
    ///
    /// # Errors
    ///
    /// * `EncodingError` - the record is internally inconsistent
    /// * `UniqueConstraintViolation` - the stored data violates a recorded
    ///   unique index
    pub fn from_json_object(
        json: CollectionJson,
        revive: Option<ReviveOptions>,
    ) -> OpalResult<Collection> {
        if json.data.len() != json.id_index.len() {
            log::error!(
                "Corrupt collection snapshot: {} documents but {} identifiers",
                json.data.len(),
                json.id_index.len()
            );
            return Err(OpalError::new(
                "Corrupt collection snapshot: data and identifier index lengths differ",
                ErrorKind::EncodingError,
            ));
        }

        let revive = revive.unwrap_or_default();

        let mut options = CollectionOptions::default()
            .adaptive_binary_indices(json.adaptive_binary_indices)
            .async_listeners(json.async_listeners)
            .disable_meta(json.disable_meta)
            .disable_changes_api(json.disable_changes_api)
            .disable_delta_changes_api(json.disable_delta_changes_api)
            .clone_objects(json.clone_objects)
            .clone_method(json.clone_method)
            .serializable_indices(json.serializable_indices)
            .transactional(json.transactional)
            .with_nested_properties(json.nested_properties.clone());
        if let Some(fts) = revive.full_text_search.clone() {
            options = options.with_full_text_search(fts);
        }

        let collection = Collection::with_options(&json.name, options)?;

        let data: Vec<Document> = match &revive.inflate {
            Some(inflate) => json.data.into_iter().map(|doc| inflate(doc)).collect(),
            None => json.data,
        };

        {
            let mut state = collection.inner.state.write();
            state.data = data;
            state.id_index = json.id_index;
            state.max_id = json.max_id;
            state.dirty = json.dirty;
            state.changes = json.changes;

            state.binary_indices = json.binary_indices;
            {
                let crate::collection::opal_collection::CollectionState {
                    data,
                    binary_indices,
                    ..
                } = &mut *state;
                for (field, index) in binary_indices.iter_mut() {
                    if !index.dirty && index.len() != data.len() {
                        log::warn!(
                            "Binary index on '{}' does not cover the data; marking dirty",
                            field
                        );
                        index.dirty = true;
                    }
                }
            }

            state.unique_indices.clear();
            for field in &json.unique_names {
                let mut index = UniqueIndex::new(field);
                let nested = &collection.inner.config.nested;
                index.rebuild(&state.data, |d| resolve_field(nested, d, field))?;
                state.unique_indices.insert(field.clone(), index);
            }

            state.views = json.dynamic_views;
            let nested = &collection.inner.config.nested;
            let crate::collection::opal_collection::CollectionState { data, views, .. } =
                &mut *state;
            for view in views.iter_mut() {
                view.rebuild(data, &|d, f| resolve_field(nested, d, f));
            }
        }

        for (name, transform) in json.transforms {
            collection.inner.transforms.insert(name, transform);
        }

        if let (Some(age), Some(interval)) = (json.ttl_age, json.ttl_interval) {
            collection.set_ttl(age, interval)?;
        }

        Ok(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::filter::field;

    fn seeded() -> Collection {
        let collection = Collection::with_options(
            "round_trip",
            CollectionOptions::default()
                .with_unique(&["email"])
                .with_indices(&["age"]),
        )
        .unwrap();
        collection
            .insert_all(vec![
                doc! { "email": "a@x.io", "age": 30 },
                doc! { "email": "b@x.io", "age": 10 },
                doc! { "email": "c@x.io", "age": 20 },
            ])
            .unwrap();
        collection
            .add_dynamic_view("adults", field("age").gte(18))
            .unwrap();
        collection
            .add_transform("identity", Value::Array(vec![]))
            .unwrap();
        collection
    }

    #[test]
    fn test_round_trip_preserves_core_state() {
        let original = seeded();
        let json = original.to_json();

        // through an actual JSON string, as a persistence adapter would
        let text = serde_json::to_string(&json).unwrap();
        let parsed: CollectionJson = serde_json::from_str(&text).unwrap();

        let revived = Collection::from_json_object(parsed, None).unwrap();
        assert_eq!(revived.name(), "round_trip");
        assert_eq!(revived.count(), 3);
        assert_eq!(revived.max_id(), original.max_id());
        assert_eq!(revived.data(), original.data());
    }

    #[test]
    fn test_round_trip_rebuilds_unique_indices() {
        let original = seeded();
        let revived = Collection::from_json_object(original.to_json(), None).unwrap();

        let found = revived.by("email", &Value::from("b@x.io")).unwrap().unwrap();
        assert_eq!(found.get("age"), Value::Int(10));
    }

    #[test]
    fn test_round_trip_preserves_views_and_transforms() {
        let original = seeded();
        let revived = Collection::from_json_object(original.to_json(), None).unwrap();

        assert_eq!(revived.view_data("adults").unwrap().len(), 2);
        assert_eq!(revived.get_transform("identity"), Some(Value::Array(vec![])));
    }

    #[test]
    fn test_corrupt_snapshot_rejected() {
        let original = seeded();
        let mut json = original.to_json();
        json.id_index.pop();

        let err = Collection::from_json_object(json, None).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::EncodingError);
    }

    #[test]
    fn test_inflate_callback_runs_per_document() {
        let original = seeded();
        let revive = ReviveOptions {
            inflate: Some(Arc::new(|mut doc: Document| {
                doc.put("inflated", true).unwrap();
                doc
            })),
            full_text_search: None,
        };

        let revived = Collection::from_json_object(original.to_json(), Some(revive)).unwrap();
        for doc in revived.data() {
            assert_eq!(doc.get("inflated"), Value::Bool(true));
        }
    }
}
