use crate::common::get_current_time_or_zero;
use crate::errors::OpalResult;
use crate::Value;
use anyhow::Error;
use basu::error::BasuError;
use basu::event::Event;
use basu::Handle;
use std::fmt::Debug;
use std::sync::Arc;

/// Subscribable event channels of a collection.
///
/// `PreInsert` and `PreUpdate` fire before the state mutation; their
/// counterparts fire after commit. `Error` fires whenever a mutation fails,
/// just before the error is returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionEvents {
    Insert,
    Update,
    Delete,
    PreInsert,
    PreUpdate,
    Error,
    Close,
    FlushBuffer,
    Warning,
}

impl CollectionEvents {
    /// Channel name used on the event bus.
    pub fn channel(&self) -> &'static str {
        match self {
            CollectionEvents::Insert => "insert",
            CollectionEvents::Update => "update",
            CollectionEvents::Delete => "delete",
            CollectionEvents::PreInsert => "pre-insert",
            CollectionEvents::PreUpdate => "pre-update",
            CollectionEvents::Error => "error",
            CollectionEvents::Close => "close",
            CollectionEvents::FlushBuffer => "flushbuffer",
            CollectionEvents::Warning => "warning",
        }
    }
}

/// Information about a collection event that occurred.
///
/// Contains the event type, the affected item (a document, or a list for
/// batch operations), the previous version of the item for updates, and a
/// message for `Error` / `Warning` events.
///
/// # Usage
///
/// ```ignore
/// collection.subscribe(CollectionEvents::Insert, CollectionEventListener::new(|event| {
///     println!("inserted: {:?}", event.item());
///     Ok(())
/// }))?;
/// ```
#[derive(Clone)]
pub struct CollectionEventInfo {
    inner: Arc<CollectionEventInner>,
}

impl CollectionEventInfo {
    /// Creates a new collection event with the specified type and item.
    pub fn new(event_type: CollectionEvents, item: Option<Value>) -> Self {
        CollectionEventInfo {
            inner: Arc::new(CollectionEventInner {
                event_type,
                item,
                old_item: None,
                message: None,
                timestamp: get_current_time_or_zero(),
            }),
        }
    }

    /// Creates an update event carrying both the new and the old document.
    pub fn with_old(event_type: CollectionEvents, item: Value, old_item: Value) -> Self {
        CollectionEventInfo {
            inner: Arc::new(CollectionEventInner {
                event_type,
                item: Some(item),
                old_item: Some(old_item),
                message: None,
                timestamp: get_current_time_or_zero(),
            }),
        }
    }

    /// Creates an `Error` or `Warning` event carrying a message.
    pub fn with_message(event_type: CollectionEvents, message: &str) -> Self {
        CollectionEventInfo {
            inner: Arc::new(CollectionEventInner {
                event_type,
                item: None,
                old_item: None,
                message: Some(message.to_string()),
                timestamp: get_current_time_or_zero(),
            }),
        }
    }

    pub fn event_type(&self) -> CollectionEvents {
        self.inner.event_type
    }

    /// The document or batch associated with this event, if any.
    pub fn item(&self) -> Option<Value> {
        self.inner.item.clone()
    }

    /// The previous version of the document, present on `Update` events.
    pub fn old_item(&self) -> Option<Value> {
        self.inner.old_item.clone()
    }

    pub fn message(&self) -> Option<String> {
        self.inner.message.clone()
    }

    /// Milliseconds since epoch when this event was created.
    pub fn timestamp(&self) -> i64 {
        self.inner.timestamp
    }
}

impl Debug for CollectionEventInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionEventInfo")
            .field("event_type", &self.event_type())
            .field("item", &self.item())
            .field("old_item", &self.old_item())
            .field("message", &self.message())
            .field("timestamp", &self.timestamp())
            .finish()
    }
}

struct CollectionEventInner {
    event_type: CollectionEvents,
    item: Option<Value>,
    old_item: Option<Value>,
    message: Option<String>,
    timestamp: i64,
}

/// Trait for closure-based event handlers.
///
/// Any closure matching `Fn(CollectionEventInfo) -> OpalResult<()>` that is
/// `Send + Sync` automatically implements this trait.
pub trait CollectionEventCallback:
    Send + Sync + Fn(CollectionEventInfo) -> OpalResult<()>
{
}

impl<F> CollectionEventCallback for F where
    F: Send + Sync + Fn(CollectionEventInfo) -> OpalResult<()>
{
}

/// Listener for collection events.
///
/// Wraps an event handler callback; register it on a channel via
/// `Collection::subscribe`. When the collection runs with synchronous
/// listeners, an error returned from the callback propagates into the
/// mutation and rolls it back.
#[derive(Clone)]
pub struct CollectionEventListener {
    on_event: Arc<dyn CollectionEventCallback>,
}

impl CollectionEventListener {
    /// Creates a new event listener wrapping the provided callback.
    pub fn new(on_event: impl CollectionEventCallback + 'static) -> Self {
        CollectionEventListener {
            on_event: Arc::new(on_event),
        }
    }
}

impl Handle<CollectionEventInfo> for CollectionEventListener {
    fn handle(&self, event: &Event<CollectionEventInfo>) -> Result<(), BasuError> {
        match (self.on_event)(event.data.clone()) {
            Ok(_) => Ok(()),
            Err(e) => Err(BasuError::HandlerError(Error::from(e))),
        }
    }
}

impl Debug for CollectionEventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionEventListener").finish()
    }
}
