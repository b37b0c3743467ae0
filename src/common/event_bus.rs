use crate::errors::{ErrorKind, OpalError, OpalResult};
use basu::error::BasuError;
use basu::event::Event;
use basu::{EventBus, Handle, HandlerId};
use std::marker::PhantomData;
use std::sync::Arc;

/// Channel-keyed publish/subscribe bus for collection events.
///
/// Every subscribable event kind (`insert`, `update`, `delete`,
/// `pre-insert`, ...) is its own channel. A listener registers on exactly
/// one channel and only receives that channel's events; the channels of one
/// bus share nothing beyond the underlying dispatch machinery.
///
/// Publishing to a channel without listeners is the common case for most
/// collections, so [OpalEventBus::publish] probes the listener count and
/// returns before constructing the dispatchable event.
///
/// # Example
///
/// ```ignore
/// let bus: OpalEventBus<E, L> = OpalEventBus::new();
/// let subscriber = bus.register("insert", listener)?;
/// bus.publish("insert", my_event)?;    // delivered
/// bus.publish("delete", my_event)?;    // nobody listens: cheap no-op
/// bus.deregister(subscriber)?;
/// ```
#[derive(Clone)]
pub struct OpalEventBus<E, L> {
    inner: Arc<OpalEventBusInner<E, L>>,
}

impl<E, L> Default for OpalEventBus<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E, L> OpalEventBus<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    pub fn new() -> Self {
        OpalEventBus {
            inner: Arc::new(OpalEventBusInner::new()),
        }
    }

    /// Adds a listener to `channel` and returns the handle needed to remove
    /// it again.
    pub fn register(&self, channel: &str, listener: L) -> OpalResult<SubscriberRef> {
        self.inner.register(channel, listener)
    }

    /// Removes a previously registered listener.
    pub fn deregister(&self, subscriber: SubscriberRef) -> OpalResult<()> {
        self.inner.deregister(subscriber)
    }

    /// Delivers `event` to every listener of `channel`. With no listeners
    /// this is a cheap no-op. A listener error surfaces to the caller, which
    /// is what lets synchronous listeners veto a mutation.
    pub fn publish(&self, channel: &str, event: E) -> OpalResult<()> {
        self.inner.publish(channel, event)
    }

    /// Drops every listener on every channel.
    pub fn close(&self) -> OpalResult<()> {
        self.inner.close()
    }

    pub fn has_listeners(&self, channel: &str) -> bool {
        self.inner.has_listeners(channel)
    }
}

/// Handle identifying one registration; required for deregistration because
/// a listener may be subscribed to several channels at once.
pub struct SubscriberRef {
    pub(crate) channel: String,
    pub(crate) inner: HandlerId,
}

impl SubscriberRef {
    pub fn new(channel: &str, inner: HandlerId) -> Self {
        SubscriberRef {
            channel: channel.to_string(),
            inner,
        }
    }
}

struct OpalEventBusInner<E, L> {
    event_bus: EventBus<E>,
    phantom_data: PhantomData<L>,
}

impl<E, L> OpalEventBusInner<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    fn new() -> Self {
        OpalEventBusInner {
            event_bus: EventBus::new(),
            phantom_data: PhantomData,
        }
    }

    fn register(&self, channel: &str, listener: L) -> OpalResult<SubscriberRef> {
        self.event_bus
            .subscribe(channel, Box::new(listener))
            .map(|id| SubscriberRef::new(channel, id))
            .map_err(Self::map_bus_error)
    }

    #[inline]
    fn deregister(&self, subscriber: SubscriberRef) -> OpalResult<()> {
        self.event_bus
            .unsubscribe(&subscriber.channel, &subscriber.inner)
            .map(|_| ())
            .map_err(Self::map_bus_error)
    }

    #[inline]
    fn publish(&self, channel: &str, event: E) -> OpalResult<()> {
        if self.handler_count(channel)? == 0 {
            return Ok(());
        }
        self.event_bus
            .publish(channel, &Event::new(event))
            .map_err(Self::map_bus_error)
    }

    #[inline]
    fn close(&self) -> OpalResult<()> {
        self.event_bus
            .clear()
            .map(|_| ())
            .map_err(Self::map_bus_error)
    }

    #[inline]
    fn has_listeners(&self, channel: &str) -> bool {
        match self.handler_count(channel) {
            Ok(count) => count > 0,
            Err(e) => {
                log::warn!("Could not count listeners on '{}': {}", channel, e);
                false
            }
        }
    }

    /// Number of listeners currently registered on `channel`. basu treats a
    /// channel that was never subscribed to as an error; for this bus that
    /// just means zero listeners.
    #[inline]
    fn handler_count(&self, channel: &str) -> OpalResult<usize> {
        match self.event_bus.get_handler_count(channel) {
            Ok(count) => Ok(count),
            Err(BasuError::EventTypeNotFOUND) => Ok(0),
            Err(e) => Err(Self::map_bus_error(e)),
        }
    }

    fn map_bus_error(e: BasuError) -> OpalError {
        match e {
            BasuError::EventTypeNotFOUND => OpalError::new(
                "No listeners were ever registered on this channel",
                ErrorKind::EventError,
            ),
            BasuError::MutexPoisoned => OpalError::new(
                "Event bus lock poisoned; listener registrations may be inconsistent",
                ErrorKind::EventError,
            ),
            BasuError::HandlerError(cause) => {
                let detail = cause
                    .source()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| cause.to_string());
                OpalError::new(&format!("Listener failed: {}", detail), ErrorKind::EventError)
            }
        }
    }
}
