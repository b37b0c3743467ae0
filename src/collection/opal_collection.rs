use crate::collection::changes::ChangeRecord;
use crate::collection::stage::CommitEntry;
use crate::collection::ttl::TtlState;
use crate::collection::{
    CollectionEventInfo, CollectionEventListener, CollectionEvents, CollectionOptions, Document,
    DocId,
};
use crate::common::{async_task, OpalEventBus, SubscriberRef};
use crate::errors::{ErrorKind, OpalError, OpalResult};
use crate::index::{BinaryIndex, FullTextSearch, UniqueIndex};
use crate::view::DynamicView;
use crate::Value;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::options::CloneMethod;

/// An in-memory document collection.
///
/// The collection owns a dense array of documents plus every dependent
/// structure derived from it: the identifier index, sorted binary indices,
/// unique hash indices, dynamic views, the change log, and the TTL daemon.
/// Every mutation drives all of them in lock-step so that the invariants a
/// query layer depends on hold between operations.
///
/// `Collection` is a cheap clone of an `Arc`-wrapped inner implementation;
/// all clones share the same state.
///
/// # Example
///
/// ```ignore
/// let users = Collection::with_options(
///     "users",
///     CollectionOptions::default()
///         .with_unique(&["email"])
///         .with_indices(&["age"]),
/// )?;
///
/// users.insert(doc! { "email": "a@x.io", "age": 30 })?;
/// let thirties = users.calculate_range("age", RangeOp::Between, &30.into(), Some(&39.into()))?;
/// ```
#[derive(Clone)]
pub struct Collection {
    pub(crate) inner: Arc<CollectionInner>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("name", &self.inner.name).finish()
    }
}

impl Collection {
    /// Creates a collection with default options.
    pub fn new(name: &str) -> OpalResult<Self> {
        Collection::with_options(name, CollectionOptions::default())
    }

    /// Creates a collection with the given options.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidConfiguration` when metadata is disabled together
    /// with change tracking or TTL.
    pub fn with_options(name: &str, options: CollectionOptions) -> OpalResult<Self> {
        let disable_changes_api = options.disable_changes_api.unwrap_or(true);
        // delta tracking is meaningless without the change log
        let disable_delta_changes_api = if disable_changes_api {
            true
        } else {
            options.disable_delta_changes_api.unwrap_or(true)
        };

        if options.disable_meta && !disable_changes_api {
            log::error!("Change tracking requires document metadata");
            return Err(OpalError::new(
                "Change tracking requires document metadata",
                ErrorKind::InvalidConfiguration,
            ));
        }
        if options.disable_meta && options.ttl_age.is_some() {
            log::error!("TTL requires document metadata");
            return Err(OpalError::new(
                "TTL requires document metadata",
                ErrorKind::InvalidConfiguration,
            ));
        }

        let config = CollectionConfig {
            adaptive_binary_indices: options.adaptive_binary_indices.unwrap_or(true),
            async_listeners: options.async_listeners,
            disable_meta: options.disable_meta,
            disable_changes_api: AtomicBool::new(disable_changes_api),
            disable_delta_changes_api: AtomicBool::new(disable_delta_changes_api),
            clone_objects: options.clone_objects,
            clone_method: options.clone_method,
            serializable_indices: options.serializable_indices.unwrap_or(true),
            transactional: options.transactional,
            nested: options
                .nested_properties
                .iter()
                .map(|p| (p.name.clone(), p.path.clone()))
                .collect(),
        };

        let mut state = CollectionState::new();
        for field in &options.indices {
            state
                .binary_indices
                .insert(field.clone(), BinaryIndex::new());
        }
        for field in &options.unique {
            state
                .unique_indices
                .insert(field.clone(), UniqueIndex::new(field));
        }

        let inner = Arc::new(CollectionInner {
            name: name.to_string(),
            config,
            state: RwLock::new(state),
            event_bus: OpalEventBus::new(),
            fts: options.full_text_search.clone(),
            transforms: DashMap::new(),
            stages: DashMap::new(),
            commit_log: Mutex::new(Vec::new()),
            ttl: Mutex::new(TtlState::default()),
        });

        let collection = Collection { inner };

        if let (Some(age), Some(interval)) = (options.ttl_age, options.ttl_interval) {
            collection.set_ttl(age, interval)?;
        }

        Ok(collection)
    }

    /// Name of this collection.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of documents currently stored.
    pub fn count(&self) -> usize {
        self.inner.state.read().data.len()
    }

    /// Last assigned document identifier.
    pub fn max_id(&self) -> DocId {
        self.inner.state.read().max_id
    }

    /// True when the collection has unsaved mutations. The flag is cleared
    /// by the owning database on save via [Collection::mark_saved].
    pub fn is_dirty(&self) -> bool {
        self.inner.state.read().dirty
    }

    pub fn mark_saved(&self) {
        self.inner.state.write().dirty = false;
    }

    /// Registers a listener on an event channel. The returned handle is
    /// needed to unsubscribe later.
    pub fn subscribe(
        &self,
        event: CollectionEvents,
        listener: CollectionEventListener,
    ) -> OpalResult<SubscriberRef> {
        self.inner.event_bus.register(event.channel(), listener)
    }

    pub fn unsubscribe(&self, subscriber: SubscriberRef) -> OpalResult<()> {
        self.inner.event_bus.deregister(subscriber)
    }

    /// Begins an explicit transaction. No-op unless the collection was
    /// created with `transactional`.
    pub fn start_transaction(&self) {
        let mut state = self.inner.state.write();
        self.inner.start_tx(&mut state);
    }

    /// Commits the current transaction. No-op unless transactional.
    pub fn commit(&self) {
        let mut state = self.inner.state.write();
        self.inner.commit_tx(&mut state);
    }

    /// Rolls the state back to the last snapshot. No-op unless transactional.
    pub fn rollback(&self) {
        let mut state = self.inner.state.write();
        self.inner.rollback_tx(&mut state);
    }

    /// Stores a named reusable query pipeline spec.
    ///
    /// # Errors
    ///
    /// Fails with `IllegalState` when a transform with the same name exists.
    pub fn add_transform(&self, name: &str, transform: Value) -> OpalResult<()> {
        if self.inner.transforms.contains_key(name) {
            log::error!("A transform with name '{}' already exists", name);
            return Err(OpalError::new(
                &format!("A transform with name '{}' already exists", name),
                ErrorKind::IllegalState,
            ));
        }
        self.inner.transforms.insert(name.to_string(), transform);
        Ok(())
    }

    pub fn get_transform(&self, name: &str) -> Option<Value> {
        self.inner.transforms.get(name).map(|t| t.value().clone())
    }

    /// Adds or replaces a named transform.
    pub fn set_transform(&self, name: &str, transform: Value) {
        self.inner.transforms.insert(name.to_string(), transform);
    }

    pub fn remove_transform(&self, name: &str) {
        self.inner.transforms.remove(name);
    }

    /// Returns the recorded change log.
    pub fn get_changes(&self) -> Vec<ChangeRecord> {
        self.inner.state.read().changes.clone()
    }

    /// Empties the change log and announces it on the `flushbuffer` channel.
    pub fn flush_changes(&self) -> OpalResult<()> {
        self.inner.state.write().changes.clear();
        self.inner
            .emit(CollectionEventInfo::new(CollectionEvents::FlushBuffer, None))
    }

    /// Serializes the change log, for replication-style consumers.
    pub fn changes_as_json(&self) -> OpalResult<String> {
        let changes = self.get_changes();
        Ok(serde_json::to_string(&changes)?)
    }

    /// Toggles the change log at runtime. Disabling it also disables delta
    /// tracking.
    pub fn set_changes_api(&self, enabled: bool) -> OpalResult<()> {
        if enabled && self.inner.config.disable_meta {
            log::error!("Change tracking requires document metadata");
            return Err(OpalError::new(
                "Change tracking requires document metadata",
                ErrorKind::InvalidConfiguration,
            ));
        }
        self.inner
            .config
            .disable_changes_api
            .store(!enabled, Ordering::Relaxed);
        if !enabled {
            self.inner
                .config
                .disable_delta_changes_api
                .store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Toggles delta recomputation on update. Requires the change log.
    pub fn set_delta_changes_api(&self, enabled: bool) -> OpalResult<()> {
        if enabled
            && self
                .inner
                .config
                .disable_changes_api
                .load(Ordering::Relaxed)
        {
            log::error!("Delta tracking requires the changes API");
            return Err(OpalError::new(
                "Delta tracking requires the changes API",
                ErrorKind::InvalidConfiguration,
            ));
        }
        self.inner
            .config
            .disable_delta_changes_api
            .store(!enabled, Ordering::Relaxed);
        Ok(())
    }

    /// Registers a dynamic view over the given filter. The view's result set
    /// is evaluated immediately and maintained incrementally from then on.
    pub fn add_dynamic_view(&self, name: &str, filter: crate::filter::Filter) -> OpalResult<()> {
        let mut state = self.inner.state.write();
        if state.views.iter().any(|v| v.name() == name) {
            log::error!("A dynamic view with name '{}' already exists", name);
            return Err(OpalError::new(
                &format!("A dynamic view with name '{}' already exists", name),
                ErrorKind::IllegalState,
            ));
        }
        let mut view = DynamicView::new(name, filter);
        let nested = &self.inner.config.nested;
        view.rebuild(&state.data, &|doc, field| resolve_field(nested, doc, field));
        state.views.push(view);
        Ok(())
    }

    /// Current result documents of the named view.
    pub fn view_data(&self, name: &str) -> OpalResult<Vec<Document>> {
        let state = self.inner.state.read();
        let view = state.views.iter().find(|v| v.name() == name).ok_or_else(|| {
            log::error!("Dynamic view '{}' not found", name);
            OpalError::new(
                &format!("Dynamic view '{}' not found", name),
                ErrorKind::DocumentNotFound,
            )
        })?;
        Ok(view.data(&state.data))
    }

    /// Removes the named view. Returns whether it existed.
    pub fn remove_dynamic_view(&self, name: &str) -> bool {
        let mut state = self.inner.state.write();
        let before = state.views.len();
        state.views.retain(|v| v.name() != name);
        state.views.len() != before
    }

    /// Closes the collection: cancels the TTL daemon, announces `close`, and
    /// drops every listener.
    pub fn close(&self) -> OpalResult<()> {
        self.inner.ttl.lock().cancel();
        self.inner
            .emit(CollectionEventInfo::new(CollectionEvents::Close, None))?;
        self.inner.event_bus.close()
    }
}

/// Resolved, immutable collection configuration. The change-tracking toggles
/// are atomics because they can be flipped at runtime.
pub(crate) struct CollectionConfig {
    pub(crate) adaptive_binary_indices: bool,
    pub(crate) async_listeners: bool,
    pub(crate) disable_meta: bool,
    pub(crate) disable_changes_api: AtomicBool,
    pub(crate) disable_delta_changes_api: AtomicBool,
    pub(crate) clone_objects: bool,
    pub(crate) clone_method: CloneMethod,
    pub(crate) serializable_indices: bool,
    pub(crate) transactional: bool,
    pub(crate) nested: BTreeMap<String, Vec<String>>,
}

/// Everything a transaction must be able to restore.
pub(crate) struct TxSnapshot {
    data: Vec<Document>,
    id_index: Vec<DocId>,
    max_id: DocId,
    binary_indices: BTreeMap<String, BinaryIndex>,
    unique_indices: BTreeMap<String, UniqueIndex>,
    changes_len: usize,
}

/// Mutable state of a collection, guarded by one lock so that a mutation is
/// never observable half-applied.
pub(crate) struct CollectionState {
    pub(crate) data: Vec<Document>,
    pub(crate) id_index: Vec<DocId>,
    pub(crate) max_id: DocId,
    pub(crate) binary_indices: BTreeMap<String, BinaryIndex>,
    pub(crate) unique_indices: BTreeMap<String, UniqueIndex>,
    pub(crate) views: Vec<DynamicView>,
    pub(crate) changes: Vec<ChangeRecord>,
    pub(crate) dirty: bool,
    pub(crate) snapshot: Option<TxSnapshot>,
}

impl CollectionState {
    pub(crate) fn new() -> Self {
        CollectionState {
            data: Vec::new(),
            id_index: Vec::new(),
            max_id: 0,
            binary_indices: BTreeMap::new(),
            unique_indices: BTreeMap::new(),
            views: Vec::new(),
            changes: Vec::new(),
            dirty: false,
            snapshot: None,
        }
    }
}

pub(crate) struct CollectionInner {
    pub(crate) name: String,
    pub(crate) config: CollectionConfig,
    pub(crate) state: RwLock<CollectionState>,
    pub(crate) event_bus: OpalEventBus<CollectionEventInfo, CollectionEventListener>,
    pub(crate) fts: Option<Arc<dyn FullTextSearch>>,
    pub(crate) transforms: DashMap<String, Value>,
    pub(crate) stages: DashMap<String, HashMap<DocId, Document>>,
    pub(crate) commit_log: Mutex<Vec<CommitEntry>>,
    pub(crate) ttl: Mutex<TtlState>,
}

impl CollectionInner {
    pub(crate) fn changes_enabled(&self) -> bool {
        !self.config.disable_changes_api.load(Ordering::Relaxed)
    }

    pub(crate) fn delta_enabled(&self) -> bool {
        !self.config.disable_delta_changes_api.load(Ordering::Relaxed)
    }

    /// Field resolver honouring registered nested properties.
    pub(crate) fn resolve(&self, doc: &Document, field: &str) -> Value {
        resolve_field(&self.config.nested, doc, field)
    }

    /// Emits an event, honouring the listener scheduling policy. With async
    /// listeners the dispatch is fire-and-forget; synchronous listener
    /// failures propagate to the caller.
    pub(crate) fn emit(&self, info: CollectionEventInfo) -> OpalResult<()> {
        let channel = info.event_type().channel();
        if self.config.async_listeners {
            let bus = self.event_bus.clone();
            async_task(move || {
                if let Err(e) = bus.publish(info.event_type().channel(), info.clone()) {
                    log::warn!("Async event listener failed: {}", e);
                }
            });
            Ok(())
        } else {
            self.event_bus.publish(channel, info)
        }
    }

    /// Reports a failed mutation on the `error` channel. Emission problems
    /// are logged, never propagated - the original error wins.
    pub(crate) fn emit_error(&self, err: &OpalError) {
        let info = CollectionEventInfo::with_message(CollectionEvents::Error, err.message());
        if let Err(e) = self.emit(info) {
            log::warn!("Failed to publish error event: {}", e);
        }
    }

    /// Snapshots data, the identifier index, the id counter, both index
    /// families, and the change log watermark, then recursively starts
    /// transactions on every dynamic view. No-op when the collection is not
    /// transactional.
    pub(crate) fn start_tx(&self, state: &mut CollectionState) {
        if !self.config.transactional {
            return;
        }
        state.snapshot = Some(TxSnapshot {
            // documents are persistent maps, so cloning the array is a true
            // deep snapshot at structural-share cost
            data: state.data.clone(),
            id_index: state.id_index.clone(),
            max_id: state.max_id,
            binary_indices: state.binary_indices.clone(),
            unique_indices: state.unique_indices.clone(),
            changes_len: state.changes.len(),
        });
        for view in state.views.iter_mut() {
            view.start_transaction();
        }
    }

    pub(crate) fn commit_tx(&self, state: &mut CollectionState) {
        if !self.config.transactional {
            return;
        }
        state.snapshot = None;
        for view in state.views.iter_mut() {
            view.commit();
        }
    }

    pub(crate) fn rollback_tx(&self, state: &mut CollectionState) {
        if !self.config.transactional {
            return;
        }
        if let Some(snapshot) = state.snapshot.take() {
            state.data = snapshot.data;
            state.id_index = snapshot.id_index;
            state.max_id = snapshot.max_id;
            state.binary_indices = snapshot.binary_indices;
            state.unique_indices = snapshot.unique_indices;
            state.changes.truncate(snapshot.changes_len);
        }
        for view in state.views.iter_mut() {
            view.rollback();
        }
    }
}

/// Resolves a field against a document, going through the nested property
/// registry first.
pub(crate) fn resolve_field(
    nested: &BTreeMap<String, Vec<String>>,
    doc: &Document,
    field: &str,
) -> Value {
    match nested.get(field) {
        Some(path) => doc.resolve_path(path),
        None => doc.get(field),
    }
}
