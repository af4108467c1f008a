//! Channel event notification.
//!
//! Every channel owns an [`EventObservable`]; the channel and its transport
//! both raise events through it. Observers are keyed by [`EventKind`] and
//! dispatched synchronously, in registration order, on the notifying task.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::uri::ChannelUri;

/// Discriminant used to register observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Opened,
    Closed,
    MessagePublished,
    MessageReceived,
    MessageRequested,
    DecodeFailed,
}

/// Something that happened on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened { uri: ChannelUri },
    Closed { uri: ChannelUri },
    /// An encoded message of `size` bytes left through the transport.
    MessagePublished { uri: ChannelUri, size: usize },
    /// An encoded message of `size` bytes arrived from the transport.
    MessageReceived { uri: ChannelUri, size: usize },
    /// The latest message was requested without subscribing.
    MessageRequested { uri: ChannelUri },
    /// An inbound message could not be decoded by the pipeline.
    DecodeFailed { uri: ChannelUri, reason: String },
}

impl ChannelEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Opened { .. } => EventKind::Opened,
            Self::Closed { .. } => EventKind::Closed,
            Self::MessagePublished { .. } => EventKind::MessagePublished,
            Self::MessageReceived { .. } => EventKind::MessageReceived,
            Self::MessageRequested { .. } => EventKind::MessageRequested,
            Self::DecodeFailed { .. } => EventKind::DecodeFailed,
        }
    }

    #[must_use]
    pub fn uri(&self) -> &ChannelUri {
        match self {
            Self::Opened { uri }
            | Self::Closed { uri }
            | Self::MessagePublished { uri, .. }
            | Self::MessageReceived { uri, .. }
            | Self::MessageRequested { uri }
            | Self::DecodeFailed { uri, .. } => uri,
        }
    }
}

/// Receiver of channel events.
///
/// Used as `Arc<dyn EventObserver>`. Closures taking `&ChannelEvent`
/// implement it directly.
pub trait EventObserver: Send + Sync {
    fn notify(&self, event: &ChannelEvent);
}

impl<F> EventObserver for F
where
    F: Fn(&ChannelEvent) + Send + Sync,
{
    fn notify(&self, event: &ChannelEvent) {
        self(event);
    }
}

type ObserverMap = HashMap<EventKind, Vec<Arc<dyn EventObserver>>>;

/// Shared observer registry of one channel.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct EventObservable {
    observers: Arc<RwLock<ObserverMap>>,
}

impl EventObservable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `observer` for events of `kind`, after any already registered.
    pub fn register(&self, kind: EventKind, observer: Arc<dyn EventObserver>) {
        self.observers.write().entry(kind).or_default().push(observer);
    }

    /// Removes `observer` from `kind`. Returns false if it was not registered.
    pub fn unregister(&self, kind: EventKind, observer: &Arc<dyn EventObserver>) -> bool {
        let mut observers = self.observers.write();
        let Some(list) = observers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|existing| !Arc::ptr_eq(existing, observer));
        let removed = list.len() != before;
        if list.is_empty() {
            observers.remove(&kind);
        }
        removed
    }

    #[must_use]
    pub fn has_observer(&self, kind: EventKind) -> bool {
        self.observers
            .read()
            .get(&kind)
            .is_some_and(|list| !list.is_empty())
    }

    /// Dispatches `event` to every observer registered for its exact kind.
    ///
    /// The observer list is snapshotted first, so observers may register or
    /// unregister from inside `notify`.
    pub fn notify(&self, event: &ChannelEvent) {
        let snapshot = self.observers.read().get(&event.kind()).cloned();
        for observer in snapshot.into_iter().flatten() {
            observer.notify(event);
        }
    }

    /// Drops every registered observer.
    pub fn clear(&self) {
        self.observers.write().clear();
    }
}

impl fmt::Debug for EventObservable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let observers = self.observers.read();
        let mut counts: Vec<_> = observers.iter().map(|(k, v)| (*k, v.len())).collect();
        counts.sort_by_key(|(k, _)| format!("{k:?}"));
        f.debug_struct("EventObservable")
            .field("observers", &counts)
            .finish()
    }
}
