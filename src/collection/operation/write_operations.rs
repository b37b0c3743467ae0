//! Mutation coordination.
//!
//! Every mutation follows the same shape: validate, announce the `pre-*`
//! event, snapshot (when transactional), drive the document store and every
//! dependent structure in order - unique indices, data and identifier
//! arrays, binary indices, dynamic views, full-text search, the change log -
//! then commit and announce the result. Any failure rolls the snapshot back,
//! fires the `error` channel, and re-raises.

use crate::collection::changes::{compute_delta, ChangeOp, ChangeRecord};
use crate::collection::opal_collection::{resolve_field, CollectionInner, CollectionState};
use crate::collection::options::clone_document;
use crate::collection::{
    ClearOptions, Collection, CollectionEventInfo, CollectionEvents, DocId, Document,
};
use crate::common::get_current_time_or_zero;
use crate::errors::{ErrorKind, OpalError, OpalResult};
use crate::filter::Filter;
use crate::index::id_index;
use crate::Value;
use std::collections::BTreeSet;

impl Collection {
    /// Inserts a single document.
    ///
    /// Assigns the next internal identifier, initialises metadata (unless
    /// suppressed), and updates every index, view, and observer. With
    /// cloning enabled the stored record and the returned record are
    /// independent copies of the input.
    ///
    /// # Errors
    ///
    /// * `IllegalState` - the document already carries an internal id
    /// * `UniqueConstraintViolation` - a unique index rejected the document
    pub fn insert(&self, document: Document) -> OpalResult<Document> {
        let mut results = self.inner.insert_internal(vec![document], false)?;
        results.pop().ok_or_else(|| {
            OpalError::new("Insert produced no result", ErrorKind::InternalError)
        })
    }

    /// Inserts a batch of documents sequentially.
    ///
    /// `pre-insert` fires once with the whole list before any state changes;
    /// `insert` fires once with the full result list. On a transactional
    /// collection the batch is atomic; otherwise a failure aborts the batch
    /// after the documents already inserted.
    pub fn insert_all(&self, documents: Vec<Document>) -> OpalResult<Vec<Document>> {
        self.inner.insert_internal(documents, true)
    }

    /// Replaces the stored version of `document`, located by its internal id.
    ///
    /// Bumps the metadata revision, stamps the update time, repositions
    /// binary index entries, and re-evaluates views. The `update` event
    /// carries both the new and the old version.
    ///
    /// # Errors
    ///
    /// * `IllegalState` - the document has no id, or no document with that id
    ///   exists
    /// * `UniqueConstraintViolation` - the new value collides on a unique index
    pub fn update(&self, document: Document) -> OpalResult<Document> {
        let (new_doc, _) = self.inner.update_one(document, false)?;
        Ok(new_doc)
    }

    /// Updates a batch sequentially.
    ///
    /// When adaptive indexing is on, cloning is off, and binary indices
    /// exist, the batch temporarily falls back to lazy dirty marking and
    /// rebuilds every index once at the end instead of repositioning entries
    /// document by document.
    pub fn update_all(&self, documents: Vec<Document>) -> OpalResult<Vec<Document>> {
        let batch_lazy = {
            let state = self.inner.state.read();
            self.inner.config.adaptive_binary_indices
                && !self.inner.config.clone_objects
                && !state.binary_indices.is_empty()
        };

        let mut results = Vec::with_capacity(documents.len());
        for document in documents {
            let (new_doc, _) = self.inner.update_one(document, batch_lazy)?;
            results.push(new_doc);
        }

        if batch_lazy {
            self.inner.ensure_all_indexes_internal(true)?;
        }
        Ok(results)
    }

    /// Removes a document previously returned by the collection. The
    /// returned record has its reserved fields stripped.
    ///
    /// # Errors
    ///
    /// * `IllegalState` - the document carries no internal id
    /// * `DocumentNotFound` - no document with that id exists
    pub fn remove(&self, document: &Document) -> OpalResult<Document> {
        let id = document.id().ok_or_else(|| {
            let err = OpalError::new(
                "Cannot remove a document that was never inserted",
                ErrorKind::IllegalState,
            );
            log::error!("{}", err);
            self.inner.emit_error(&err);
            err
        })?;
        self.remove_by_id(id)
    }

    /// Removes the document with the given internal id.
    pub fn remove_by_id(&self, id: DocId) -> OpalResult<Document> {
        self.inner.remove_internal(id)
    }

    /// Removes a batch of documents. Returns the removed records.
    pub fn remove_all(&self, documents: &[Document]) -> OpalResult<Vec<Document>> {
        let mut removed = Vec::with_capacity(documents.len());
        for document in documents {
            removed.push(self.remove(document)?);
        }
        Ok(removed)
    }

    /// Removes every document matching the filter. The matching positions
    /// are collected first and removed highest position first, so the
    /// splices never shift a position that is still pending. Returns the
    /// number of removed documents.
    pub fn remove_where(&self, filter: &Filter) -> OpalResult<usize> {
        let positions: Vec<usize> = {
            let state = self.inner.state.read();
            let nested = &self.inner.config.nested;
            state
                .data
                .iter()
                .enumerate()
                .filter(|(_, doc)| filter.apply_with(doc, &|d, f| resolve_field(nested, d, f)))
                .map(|(position, _)| position)
                .collect()
        };
        self.inner.remove_batch_by_positions(positions)
    }

    /// Alias of [Collection::remove_where], mirroring the query-style entry
    /// point.
    pub fn find_and_remove(&self, filter: &Filter) -> OpalResult<usize> {
        self.remove_where(filter)
    }

    /// Applies `update_fn` to every document matching the filter and stores
    /// the results. Returns the number of updated documents.
    pub fn update_where<F>(&self, filter: &Filter, mut update_fn: F) -> OpalResult<usize>
    where
        F: FnMut(Document) -> OpalResult<Document>,
    {
        let matches: Vec<Document> = {
            let state = self.inner.state.read();
            let nested = &self.inner.config.nested;
            state
                .data
                .iter()
                .filter(|doc| filter.apply_with(doc, &|d, f| resolve_field(nested, d, f)))
                .cloned()
                .collect()
        };

        let count = matches.len();
        for doc in matches {
            let updated = update_fn(doc)?;
            self.update(updated)?;
        }
        Ok(count)
    }

    /// Alias of [Collection::update_where].
    pub fn find_and_update<F>(&self, filter: &Filter, update_fn: F) -> OpalResult<usize>
    where
        F: FnMut(Document) -> OpalResult<Document>,
    {
        self.update_where(filter, update_fn)
    }

    /// Empties the collection. Index definitions survive (emptied) unless
    /// `remove_indices` is set; the identifier counter resets, so the next
    /// insert starts over at id 1.
    pub fn clear(&self, options: ClearOptions) -> OpalResult<()> {
        self.inner.clear_internal(options)
    }
}

impl CollectionInner {
    pub(crate) fn insert_internal(
        &self,
        documents: Vec<Document>,
        batch: bool,
    ) -> OpalResult<Vec<Document>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        for document in &documents {
            if document.id().is_some() {
                let err = OpalError::new(
                    "Document is already in a collection; use update instead",
                    ErrorKind::IllegalState,
                );
                log::error!("{}", err);
                self.emit_error(&err);
                return Err(err);
            }
        }

        // pre-insert fires once per call, with the list for batches
        let payload = if batch {
            Value::Array(documents.iter().cloned().map(Value::Document).collect())
        } else {
            Value::Document(documents[0].clone())
        };
        if let Err(e) = self.emit(CollectionEventInfo::new(
            CollectionEvents::PreInsert,
            Some(payload),
        )) {
            self.emit_error(&e);
            return Err(e);
        }

        let now = get_current_time_or_zero();
        let mut state = self.state.write();
        self.start_tx(&mut state);

        match self.insert_body(&mut state, documents, now) {
            Ok(results) => {
                self.commit_tx(&mut state);
                state.dirty = true;
                drop(state);

                let payload = if batch {
                    Value::Array(results.iter().cloned().map(Value::Document).collect())
                } else {
                    Value::Document(results[0].clone())
                };
                if let Err(e) =
                    self.emit(CollectionEventInfo::new(CollectionEvents::Insert, Some(payload)))
                {
                    self.emit_error(&e);
                    return Err(e);
                }
                Ok(results)
            }
            Err(e) => {
                self.rollback_tx(&mut state);
                drop(state);
                self.emit_error(&e);
                Err(e)
            }
        }
    }

    fn insert_body(
        &self,
        state: &mut CollectionState,
        documents: Vec<Document>,
        now: i64,
    ) -> OpalResult<Vec<Document>> {
        let mut results = Vec::with_capacity(documents.len());
        for document in documents {
            let inserted = self.insert_one_document(state, document, now)?;
            results.push(inserted);
        }
        Ok(results)
    }

    fn insert_one_document(
        &self,
        state: &mut CollectionState,
        document: Document,
        now: i64,
    ) -> OpalResult<Document> {
        let nested = &self.config.nested;
        let mut stored = if self.config.clone_objects {
            clone_document(&document, self.config.clone_method)?
        } else {
            document
        };

        // phase 1: reject unique collisions before anything is touched, so a
        // failed insert leaves no partial unique entries even without a
        // transaction
        for (field, index) in state.unique_indices.iter() {
            let value = resolve_field(nested, &stored, field);
            if !value.is_null() && index.get(&value).is_some() {
                log::error!(
                    "Duplicate key '{}' for unique index on field '{}'",
                    value,
                    field
                );
                return Err(OpalError::new(
                    &format!(
                        "Duplicate key '{}' for unique index on field '{}'",
                        value, field
                    ),
                    ErrorKind::UniqueConstraintViolation,
                ));
            }
        }

        let id = state.max_id + 1;
        stored.set_id(id);
        if !self.config.disable_meta {
            stored.init_meta(now);
        }

        self.serialize_index_dates(state, &mut stored)?;

        // phase 2: apply. Collisions within the same batch surface here and
        // roll back through the caller.
        let position = state.data.len();
        for (field, index) in state.unique_indices.iter_mut() {
            let value = resolve_field(nested, &stored, field);
            index.set(value, position)?;
        }

        state.data.push(stored);
        state.id_index.push(id);
        state.max_id = id;

        {
            let CollectionState {
                data,
                binary_indices,
                views,
                ..
            } = state;

            for (field, index) in binary_indices.iter_mut() {
                if self.config.adaptive_binary_indices {
                    index.insert_adaptive(data, |d| resolve_field(nested, d, field), position);
                } else {
                    index.dirty = true;
                }
            }

            let doc_ref = &data[position];
            for view in views.iter_mut() {
                view.evaluate_document(doc_ref, position, true, &|d, f| {
                    resolve_field(nested, d, f)
                });
            }
        }

        if let Some(fts) = &self.fts {
            fts.add_document(&state.data[position], position)?;
        }

        if self.changes_enabled() {
            let record =
                ChangeRecord::new(&self.name, ChangeOp::Insert, state.data[position].clone());
            state.changes.push(record);
        }

        Ok(state.data[position].clone())
    }

    /// Converts date values on binary-indexed fields to their epoch
    /// milliseconds in place, so a serialization round trip preserves index
    /// ordering. Registered nested properties are computed values and are
    /// left alone.
    fn serialize_index_dates(
        &self,
        state: &CollectionState,
        stored: &mut Document,
    ) -> OpalResult<()> {
        if !self.config.serializable_indices {
            return Ok(());
        }
        for field in state.binary_indices.keys() {
            if self.config.nested.contains_key(field) {
                continue;
            }
            if let Value::Date(ms) = stored.get(field) {
                stored.put(field, Value::Int(ms))?;
            }
        }
        Ok(())
    }

    pub(crate) fn update_one(
        &self,
        document: Document,
        force_lazy: bool,
    ) -> OpalResult<(Document, Document)> {
        let id = match document.id() {
            Some(id) => id,
            None => {
                let err = OpalError::new(
                    "Trying to update a document not in the collection",
                    ErrorKind::IllegalState,
                );
                log::error!("{}", err);
                self.emit_error(&err);
                return Err(err);
            }
        };

        if let Err(e) = self.emit(CollectionEventInfo::new(
            CollectionEvents::PreUpdate,
            Some(Value::Document(document.clone())),
        )) {
            self.emit_error(&e);
            return Err(e);
        }

        let now = get_current_time_or_zero();
        let mut state = self.state.write();
        self.start_tx(&mut state);

        match self.update_body(&mut state, document, id, force_lazy, now) {
            Ok((new_doc, old_doc)) => {
                self.commit_tx(&mut state);
                state.dirty = true;
                drop(state);

                if let Err(e) = self.emit(CollectionEventInfo::with_old(
                    CollectionEvents::Update,
                    Value::Document(new_doc.clone()),
                    Value::Document(old_doc.clone()),
                )) {
                    self.emit_error(&e);
                    return Err(e);
                }
                Ok((new_doc, old_doc))
            }
            Err(e) => {
                self.rollback_tx(&mut state);
                drop(state);
                self.emit_error(&e);
                Err(e)
            }
        }
    }

    fn update_body(
        &self,
        state: &mut CollectionState,
        document: Document,
        id: DocId,
        force_lazy: bool,
        now: i64,
    ) -> OpalResult<(Document, Document)> {
        let nested = &self.config.nested;
        let position = id_index::locate(&state.id_index, id).ok_or_else(|| {
            log::error!("No document with id {} to update", id);
            OpalError::new(
                &format!("No document with id {} to update", id),
                ErrorKind::IllegalState,
            )
        })?;

        let old_doc = state.data[position].clone();
        let mut new_doc = if self.config.clone_objects {
            clone_document(&document, self.config.clone_method)?
        } else {
            document
        };

        if !self.config.disable_meta {
            new_doc.touch_meta(&old_doc, now);
        }

        self.serialize_index_dates(state, &mut new_doc)?;

        // phase 1: reject collisions before any index is rewritten
        for (field, index) in state.unique_indices.iter() {
            let new_value = resolve_field(nested, &new_doc, field);
            if !new_value.is_null() {
                if let Some(existing) = index.get(&new_value) {
                    if existing != position {
                        log::error!(
                            "Duplicate key '{}' for unique index on field '{}'",
                            new_value,
                            field
                        );
                        return Err(OpalError::new(
                            &format!(
                                "Duplicate key '{}' for unique index on field '{}'",
                                new_value, field
                            ),
                            ErrorKind::UniqueConstraintViolation,
                        ));
                    }
                }
            }
        }

        // phase 2: apply
        for (field, index) in state.unique_indices.iter_mut() {
            let old_value = resolve_field(nested, &old_doc, field);
            let new_value = resolve_field(nested, &new_doc, field);
            index.update(&old_value, new_value, position)?;
        }

        state.data[position] = new_doc.clone();

        {
            let CollectionState {
                data,
                binary_indices,
                views,
                ..
            } = state;

            for (field, index) in binary_indices.iter_mut() {
                if self.config.adaptive_binary_indices && !force_lazy {
                    index.update_adaptive(data, |d| resolve_field(nested, d, field), position);
                } else {
                    index.dirty = true;
                }
            }

            let doc_ref = &data[position];
            for view in views.iter_mut() {
                view.evaluate_document(doc_ref, position, false, &|d, f| {
                    resolve_field(nested, d, f)
                });
            }
        }

        if let Some(fts) = &self.fts {
            fts.update_document(&state.data[position], position)?;
        }

        if self.changes_enabled() {
            let obj = if self.delta_enabled() {
                let unique_fields: BTreeSet<String> =
                    state.unique_indices.keys().cloned().collect();
                compute_delta(&old_doc, &new_doc, &unique_fields)
            } else {
                new_doc.clone()
            };
            state
                .changes
                .push(ChangeRecord::new(&self.name, ChangeOp::Update, obj));
        }

        Ok((new_doc, old_doc))
    }

    pub(crate) fn remove_internal(&self, id: DocId) -> OpalResult<Document> {
        self.remove_resolved(|state| {
            id_index::locate(&state.id_index, id).ok_or_else(|| {
                log::error!("No document with id {} to remove", id);
                OpalError::new(
                    &format!("No document with id {} to remove", id),
                    ErrorKind::DocumentNotFound,
                )
            })
        })
    }

    /// Removes the documents at the given data positions, highest position
    /// first. Because a splice only shifts positions above it, the pending
    /// lower positions stay valid without re-resolution.
    pub(crate) fn remove_batch_by_positions(
        &self,
        mut positions: Vec<usize>,
    ) -> OpalResult<usize> {
        positions.sort_unstable_by(|a, b| b.cmp(a));
        positions.dedup();

        for &position in &positions {
            self.remove_resolved(|state| {
                if position < state.data.len() {
                    Ok(position)
                } else {
                    log::error!("No document at position {} to remove", position);
                    Err(OpalError::new(
                        &format!("No document at position {} to remove", position),
                        ErrorKind::DocumentNotFound,
                    ))
                }
            })?;
        }
        Ok(positions.len())
    }

    fn remove_resolved(
        &self,
        locate: impl FnOnce(&CollectionState) -> OpalResult<usize>,
    ) -> OpalResult<Document> {
        let mut state = self.state.write();
        self.start_tx(&mut state);

        let located = locate(&*state);
        match located.and_then(|position| self.remove_body(&mut state, position)) {
            Ok(removed) => {
                self.commit_tx(&mut state);
                state.dirty = true;
                drop(state);

                if let Err(e) = self.emit(CollectionEventInfo::new(
                    CollectionEvents::Delete,
                    Some(Value::Document(removed.clone())),
                )) {
                    self.emit_error(&e);
                    return Err(e);
                }

                let mut returned = removed;
                returned.strip_reserved();
                Ok(returned)
            }
            Err(e) => {
                self.rollback_tx(&mut state);
                drop(state);
                self.emit_error(&e);
                Err(e)
            }
        }
    }

    fn remove_body(&self, state: &mut CollectionState, position: usize) -> OpalResult<Document> {
        let nested = &self.config.nested;
        let removed = state.data[position].clone();

        // unique entries are removed by value, then every later position
        // shifts down to keep the maps aligned with the spliced data array
        for (field, index) in state.unique_indices.iter_mut() {
            let value = resolve_field(nested, &removed, field);
            index.remove_value(&value);
            index.shift_after_remove(position);
        }

        for view in state.views.iter_mut() {
            view.remove_document(position);
        }

        {
            let CollectionState {
                data,
                binary_indices,
                ..
            } = state;
            for (field, index) in binary_indices.iter_mut() {
                if self.config.adaptive_binary_indices {
                    // runs against the pre-splice data array
                    index.remove_adaptive(data, |d| resolve_field(nested, d, field), position);
                } else {
                    index.dirty = true;
                }
            }
        }

        state.data.remove(position);
        state.id_index.remove(position);

        if let Some(fts) = &self.fts {
            fts.remove_document(&removed, position)?;
        }

        if self.changes_enabled() {
            state
                .changes
                .push(ChangeRecord::new(&self.name, ChangeOp::Remove, removed.clone()));
        }

        Ok(removed)
    }

    fn clear_internal(&self, options: ClearOptions) -> OpalResult<()> {
        let nested = &self.config.nested;
        let mut state = self.state.write();

        state.data.clear();
        state.id_index.clear();
        state.max_id = 0;

        if options.remove_indices {
            state.binary_indices.clear();
            state.unique_indices.clear();
        } else {
            for index in state.binary_indices.values_mut() {
                index.values.clear();
                index.dirty = false;
            }
            for index in state.unique_indices.values_mut() {
                index.clear();
            }
        }

        {
            let CollectionState { data, views, .. } = &mut *state;
            for view in views.iter_mut() {
                view.rebuild(data, &|d, f| resolve_field(nested, d, f));
            }
        }

        state.dirty = true;
        drop(state);

        if let Some(fts) = &self.fts {
            fts.clear()?;
        }
        Ok(())
    }

    /// TTL eviction pass: removes every document whose last touch
    /// (`meta.updated`, falling back to `meta.created`) is older than
    /// `now - age`. Runs as a normal sequence of remove mutations.
    pub(crate) fn remove_expired(&self, age_ms: i64) {
        let now = get_current_time_or_zero();
        let threshold = now - age_ms;

        let expired: Vec<DocId> = {
            let state = self.state.read();
            state
                .data
                .iter()
                .filter(|doc| {
                    doc.updated()
                        .or_else(|| doc.created())
                        .map(|t| t < threshold)
                        .unwrap_or(false)
                })
                .filter_map(|doc| doc.id())
                .collect()
        };

        for id in expired {
            if let Err(e) = self.remove_internal(id) {
                log::warn!("TTL eviction of document {} failed: {}", id, e);
            }
        }
    }
}
