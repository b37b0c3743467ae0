//! Indexed lookup and scan helpers.

use crate::collection::opal_collection::resolve_field;
use crate::collection::{Collection, DocId, Document};
use crate::errors::{ErrorKind, OpalError, OpalResult};
use crate::filter::Filter;
use crate::index::id_index;
use crate::Value;

impl Collection {
    /// Looks up a document by its internal identifier via binary search over
    /// the identifier index. O(log n).
    pub fn get(&self, id: DocId) -> Option<Document> {
        self.get_with_position(id).map(|(doc, _)| doc)
    }

    /// Like [Collection::get], additionally returning the current data
    /// position. The position is ephemeral: it changes when earlier
    /// documents are removed.
    pub fn get_with_position(&self, id: DocId) -> Option<(Document, usize)> {
        let state = self.inner.state.read();
        let position = id_index::locate(&state.id_index, id)?;
        Some((state.data[position].clone(), position))
    }

    /// Looks up a document through a unique index.
    ///
    /// # Errors
    ///
    /// Fails with `IndexNotFound` when no unique index exists on `field`.
    pub fn by(&self, field: &str, value: &Value) -> OpalResult<Option<Document>> {
        let state = self.inner.state.read();
        let index = state.unique_indices.get(field).ok_or_else(|| {
            log::error!("No unique index on field '{}'", field);
            OpalError::new(
                &format!("No unique index on field '{}'", field),
                ErrorKind::IndexNotFound,
            )
        })?;
        Ok(index.get(value).map(|position| state.data[position].clone()))
    }

    /// Scans the collection for documents matching the filter. Registered
    /// nested properties resolve in filter fields.
    pub fn find(&self, filter: &Filter) -> Vec<Document> {
        let state = self.inner.state.read();
        let nested = &self.inner.config.nested;
        state
            .data
            .iter()
            .filter(|doc| filter.apply_with(doc, &|d, f| resolve_field(nested, d, f)))
            .cloned()
            .collect()
    }

    /// First document matching the filter, in data order.
    pub fn find_one(&self, filter: &Filter) -> Option<Document> {
        let state = self.inner.state.read();
        let nested = &self.inner.config.nested;
        state
            .data
            .iter()
            .find(|doc| filter.apply_with(doc, &|d, f| resolve_field(nested, d, f)))
            .cloned()
    }

    /// Snapshot of all documents in data order.
    pub fn data(&self) -> Vec<Document> {
        self.inner.state.read().data.clone()
    }
}
