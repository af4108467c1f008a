//! Typed channel: a URI, a pipeline and a transport behind one lifecycle.
//!
//! State machine: Closed -> Open -> Closed. Every I/O call checks the state
//! first, so transports never see traffic on a closed channel.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::Bytes;
use conduit_core::{
    ChannelEvent, ChannelUri, EventKind, EventObservable, EventObserver, Message, Pipeline,
};

use super::transport::{LatestGenerator, MessageSink, Transport};
use crate::error::{ChannelIoError, ChannelLifetimeError};

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Open,
}

/// Named, typed endpoint.
///
/// Messages of type `M` run through the channel's pipeline before reaching
/// the transport, and through its inverse on the way back. Equality and
/// hashing use the URI only.
pub struct Channel<M> {
    core: Arc<ChannelCore<M>>,
}

struct ChannelCore<M> {
    uri: ChannelUri,
    pipeline: Pipeline<M, Bytes>,
    transport: Box<dyn Transport>,
    events: EventObservable,
    state: ArcSwap<ChannelState>,
    transition: tokio::sync::Mutex<()>,
    publishing: AtomicBool,
    subscribing: AtomicBool,
}

/// Type-erased view used by the registry to close channels it handed out.
#[async_trait]
pub(crate) trait ChannelHandle: Send + Sync {
    fn uri(&self) -> &ChannelUri;
    fn is_open(&self) -> bool;
    async fn close(&self) -> Result<(), ChannelLifetimeError>;
}

impl<M: Message> Channel<M> {
    /// Binds an unopened transport to `pipeline`.
    #[must_use]
    pub fn new(
        uri: ChannelUri,
        pipeline: Pipeline<M, Bytes>,
        transport: Box<dyn Transport>,
        events: EventObservable,
    ) -> Self {
        Self {
            core: Arc::new(ChannelCore {
                uri,
                pipeline,
                transport,
                events,
                state: ArcSwap::from_pointee(ChannelState::Closed),
                transition: tokio::sync::Mutex::new(()),
                publishing: AtomicBool::new(false),
                subscribing: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn uri(&self) -> &ChannelUri {
        &self.core.uri
    }

    #[must_use]
    pub fn pipeline(&self) -> &Pipeline<M, Bytes> {
        &self.core.pipeline
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        **self.core.state.load()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// True once a publish has succeeded on this channel.
    #[must_use]
    pub fn is_publishing(&self) -> bool {
        self.core.publishing.load(Ordering::Acquire)
    }

    /// True once a subscription has been established on this channel.
    #[must_use]
    pub fn is_subscribing(&self) -> bool {
        self.core.subscribing.load(Ordering::Acquire)
    }

    /// Opens the transport. Opening an open channel is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the transport's open failure; the channel stays closed.
    pub async fn open(&self) -> Result<(), ChannelLifetimeError> {
        self.core.open().await
    }

    /// Closes the transport. Closing a closed channel is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the transport's close failure; the channel is closed anyway.
    pub async fn close(&self) -> Result<(), ChannelLifetimeError> {
        self.core.close().await
    }

    /// Encodes `message` and hands it to the transport.
    ///
    /// # Errors
    ///
    /// [`ChannelIoError::Closed`] on a closed channel,
    /// [`ChannelIoError::Pipeline`] if encoding fails, or the transport's
    /// failure.
    pub async fn publish(&self, message: M) -> Result<(), ChannelIoError> {
        let core = &self.core;
        core.ensure_open()?;
        let payload = core
            .pipeline
            .execute(message)
            .map_err(|source| ChannelIoError::Pipeline {
                uri: core.uri.clone(),
                source,
            })?;
        let size = payload.len();
        core.transport.publish(payload).await?;
        core.publishing.store(true, Ordering::Release);
        tracing::trace!(uri = %core.uri, size, "published");
        core.events.notify(&ChannelEvent::MessagePublished {
            uri: core.uri.clone(),
            size,
        });
        Ok(())
    }

    /// Delivers every decoded inbound message to `callback` until close.
    ///
    /// Returns once the transport reports the listener active. Messages the
    /// pipeline cannot decode are logged, raised as
    /// [`ChannelEvent::DecodeFailed`] and skipped.
    ///
    /// # Errors
    ///
    /// [`ChannelIoError::Closed`] on a closed channel, or the transport's
    /// failure.
    pub async fn subscribe<F>(&self, callback: F) -> Result<(), ChannelIoError>
    where
        F: Fn(M) + Send + Sync + 'static,
    {
        let core = &self.core;
        core.ensure_open()?;
        let pipeline = core.pipeline.clone();
        let events = core.events.clone();
        let uri = core.uri.clone();
        let sink: MessageSink = Arc::new(move |payload: Bytes| {
            events.notify(&ChannelEvent::MessageReceived {
                uri: uri.clone(),
                size: payload.len(),
            });
            match pipeline.execute_inverse(payload) {
                Ok(message) => callback(message),
                Err(e) => {
                    tracing::warn!(uri = %uri, error = %e, "dropping message that failed to decode");
                    events.notify(&ChannelEvent::DecodeFailed {
                        uri: uri.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        });
        core.transport.subscribe(sink).await?;
        core.subscribing.store(true, Ordering::Release);
        tracing::debug!(uri = %core.uri, "subscribed");
        Ok(())
    }

    /// Most recent message on the channel, without subscribing.
    ///
    /// # Errors
    ///
    /// [`ChannelIoError::Closed`] on a closed channel,
    /// [`ChannelIoError::Pipeline`] if decoding fails, or the provider's
    /// retrieval failure ([`ChannelIoError::NoLatest`],
    /// [`ChannelIoError::RetrievalTimeout`]).
    pub async fn latest(&self) -> Result<M, ChannelIoError> {
        let core = &self.core;
        core.ensure_open()?;
        let payload = core.transport.latest().await?;
        core.pipeline
            .execute_inverse(payload)
            .map_err(|source| ChannelIoError::Pipeline {
                uri: core.uri.clone(),
                source,
            })
    }

    /// Serves latest-value requests by calling `generator`.
    ///
    /// # Errors
    ///
    /// [`ChannelIoError::Closed`] on a closed channel, or
    /// [`ChannelIoError::Unsupported`] if the transport cannot serve
    /// generated values.
    pub fn on_latest<G>(&self, generator: G) -> Result<(), ChannelIoError>
    where
        G: Fn() -> M + Send + Sync + 'static,
    {
        let core = &self.core;
        core.ensure_open()?;
        let pipeline = core.pipeline.clone();
        let uri = core.uri.clone();
        let encoded: LatestGenerator = Arc::new(move || {
            pipeline
                .execute(generator())
                .map_err(|source| ChannelIoError::Pipeline {
                    uri: uri.clone(),
                    source,
                })
        });
        core.transport.on_latest(encoded)
    }

    /// The channel's event observable.
    #[must_use]
    pub fn events(&self) -> &EventObservable {
        &self.core.events
    }

    pub fn register(&self, kind: EventKind, observer: Arc<dyn EventObserver>) {
        self.core.events.register(kind, observer);
    }

    pub fn unregister(&self, kind: EventKind, observer: &Arc<dyn EventObserver>) -> bool {
        self.core.events.unregister(kind, observer)
    }

    #[must_use]
    pub fn has_observer(&self, kind: EventKind) -> bool {
        self.core.events.has_observer(kind)
    }

    pub fn notify(&self, event: &ChannelEvent) {
        self.core.events.notify(event);
    }

    pub(crate) fn handle(&self) -> Arc<dyn ChannelHandle> {
        Arc::clone(&self.core) as Arc<dyn ChannelHandle>
    }
}

impl<M: Message> ChannelCore<M> {
    fn ensure_open(&self) -> Result<(), ChannelIoError> {
        if **self.state.load() == ChannelState::Open {
            Ok(())
        } else {
            Err(ChannelIoError::Closed {
                uri: self.uri.clone(),
            })
        }
    }

    async fn open(&self) -> Result<(), ChannelLifetimeError> {
        let _transition = self.transition.lock().await;
        if **self.state.load() == ChannelState::Open {
            return Ok(());
        }
        self.transport.open().await?;
        self.state.store(Arc::new(ChannelState::Open));
        tracing::debug!(uri = %self.uri, "channel opened");
        self.events.notify(&ChannelEvent::Opened {
            uri: self.uri.clone(),
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), ChannelLifetimeError> {
        let _transition = self.transition.lock().await;
        if **self.state.load() == ChannelState::Closed {
            return Ok(());
        }
        self.state.store(Arc::new(ChannelState::Closed));
        let closed = self.transport.close().await;
        tracing::debug!(uri = %self.uri, "channel closed");
        self.events.notify(&ChannelEvent::Closed {
            uri: self.uri.clone(),
        });
        closed
    }
}

#[async_trait]
impl<M: Message> ChannelHandle for ChannelCore<M> {
    fn uri(&self) -> &ChannelUri {
        &self.uri
    }

    fn is_open(&self) -> bool {
        **self.state.load() == ChannelState::Open
    }

    async fn close(&self) -> Result<(), ChannelLifetimeError> {
        ChannelCore::close(self).await
    }
}

impl<M> PartialEq for Channel<M> {
    fn eq(&self, other: &Self) -> bool {
        self.core.uri == other.core.uri
    }
}

impl<M> Eq for Channel<M> {}

impl<M> Hash for Channel<M> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.core.uri.hash(state);
    }
}

impl<M> fmt::Display for Channel<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.core.uri, f)
    }
}

impl<M> fmt::Debug for Channel<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("uri", &self.core.uri)
            .field("state", &**self.core.state.load())
            .field("pipeline", &self.core.pipeline)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    use conduit_core::{FormatKind, Persistence, PipelineError};
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};

    use super::*;

    /// Transport that records traffic and loops published bytes back to
    /// its sinks.
    #[derive(Default)]
    struct LoopbackTransport {
        uri: Option<ChannelUri>,
        opens: AtomicUsize,
        closes: AtomicUsize,
        published: Mutex<Vec<Bytes>>,
        sinks: Mutex<Vec<MessageSink>>,
    }

    impl LoopbackTransport {
        fn new(uri: &ChannelUri) -> Arc<Self> {
            Arc::new(Self {
                uri: Some(uri.clone()),
                ..Self::default()
            })
        }

        fn inject(&self, payload: Bytes) {
            for sink in self.sinks.lock().iter() {
                sink(payload.clone());
            }
        }
    }

    struct Shared(Arc<LoopbackTransport>);

    #[async_trait]
    impl Transport for Shared {
        fn uri(&self) -> &ChannelUri {
            self.0.uri.as_ref().unwrap()
        }

        async fn open(&self) -> Result<(), ChannelLifetimeError> {
            self.0.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) -> Result<(), ChannelLifetimeError> {
            self.0.closes.fetch_add(1, Ordering::SeqCst);
            self.0.sinks.lock().clear();
            Ok(())
        }

        async fn publish(&self, payload: Bytes) -> Result<(), ChannelIoError> {
            self.0.published.lock().push(payload.clone());
            self.0.inject(payload);
            Ok(())
        }

        async fn subscribe(&self, sink: MessageSink) -> Result<(), ChannelIoError> {
            self.0.sinks.lock().push(sink);
            Ok(())
        }

        async fn latest(&self) -> Result<Bytes, ChannelIoError> {
            self.0
                .published
                .lock()
                .last()
                .cloned()
                .ok_or_else(|| ChannelIoError::NoLatest {
                    uri: self.uri().clone(),
                })
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Reading {
        a: String,
        b: i32,
    }

    fn reading() -> Reading {
        Reading {
            a: "hi".to_string(),
            b: 5,
        }
    }

    fn json_pipeline() -> Pipeline<Reading, Bytes> {
        Pipeline::new()
            .append_all([FormatKind::Json.operation::<Reading>()])
            .unwrap()
    }

    fn channel(path: &str) -> (Channel<Reading>, Arc<LoopbackTransport>) {
        let uri = ChannelUri::parse(format!("loop:{path}")).unwrap();
        let transport = LoopbackTransport::new(&uri);
        let channel = Channel::new(
            uri,
            json_pipeline(),
            Box::new(Shared(Arc::clone(&transport))),
            EventObservable::new(),
        );
        (channel, transport)
    }

    fn record(channel: &Channel<Reading>, kinds: &[EventKind]) -> Arc<Mutex<Vec<EventKind>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        for kind in kinds {
            let log = Arc::clone(&log);
            channel.register(*kind, Arc::new(move |e: &ChannelEvent| log.lock().push(e.kind())));
        }
        log
    }

    #[tokio::test]
    async fn io_on_closed_channel_fails() {
        let (channel, transport) = channel("/closed");
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(matches!(
            channel.publish(reading()).await,
            Err(ChannelIoError::Closed { .. })
        ));
        assert!(matches!(
            channel.subscribe(|_| {}).await,
            Err(ChannelIoError::Closed { .. })
        ));
        assert!(matches!(
            channel.latest().await,
            Err(ChannelIoError::Closed { .. })
        ));
        assert!(matches!(
            channel.on_latest(reading),
            Err(ChannelIoError::Closed { .. })
        ));
        assert!(transport.published.lock().is_empty());
    }

    #[tokio::test]
    async fn open_and_close_are_idempotent() {
        let (channel, transport) = channel("/idempotent");
        channel.open().await.unwrap();
        channel.open().await.unwrap();
        assert!(channel.is_open());
        assert_eq!(transport.opens.load(Ordering::SeqCst), 1);

        channel.close().await.unwrap();
        channel.close().await.unwrap();
        assert!(!channel.is_open());
        assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn publish_after_close_fails() {
        let (channel, _transport) = channel("/after-close");
        channel.open().await.unwrap();
        channel.publish(reading()).await.unwrap();
        channel.close().await.unwrap();
        assert!(matches!(
            channel.publish(reading()).await,
            Err(ChannelIoError::Closed { .. })
        ));
    }

    #[tokio::test]
    async fn publish_encodes_through_pipeline() {
        let (channel, transport) = channel("/publish");
        channel.open().await.unwrap();
        assert!(!channel.is_publishing());
        channel.publish(reading()).await.unwrap();
        assert!(channel.is_publishing());
        assert!(!channel.is_subscribing());
        assert_eq!(&transport.published.lock()[0][..], br#"{"a":"hi","b":5}"#);
    }

    #[tokio::test]
    async fn subscribe_decodes_inbound_messages() {
        let (channel, _transport) = channel("/subscribe");
        channel.open().await.unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        channel.subscribe(move |m| sink.lock().push(m)).await.unwrap();
        assert!(channel.is_subscribing());

        channel.publish(reading()).await.unwrap();
        assert_eq!(*received.lock(), vec![reading()]);
    }

    #[tokio::test]
    async fn undecodable_message_raises_event_and_keeps_subscription() {
        let (channel, transport) = channel("/decode");
        channel.open().await.unwrap();
        let events = record(&channel, &[EventKind::MessageReceived, EventKind::DecodeFailed]);
        let received = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&received);
        channel
            .subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        transport.inject(Bytes::from_static(b"not json"));
        transport.inject(Bytes::from_static(br#"{"a":"ok","b":1}"#));

        assert_eq!(received.load(Ordering::SeqCst), 1);
        assert_eq!(
            *events.lock(),
            vec![
                EventKind::MessageReceived,
                EventKind::DecodeFailed,
                EventKind::MessageReceived
            ]
        );
    }

    #[tokio::test]
    async fn lifecycle_and_publish_events_in_order() {
        let (channel, _transport) = channel("/events");
        let events = record(
            &channel,
            &[EventKind::Opened, EventKind::MessagePublished, EventKind::Closed],
        );
        channel.open().await.unwrap();
        channel.publish(reading()).await.unwrap();
        channel.close().await.unwrap();
        assert_eq!(
            *events.lock(),
            vec![EventKind::Opened, EventKind::MessagePublished, EventKind::Closed]
        );
    }

    #[tokio::test]
    async fn latest_decodes_transport_value() {
        let (channel, _transport) = channel("/latest");
        channel.open().await.unwrap();
        assert!(matches!(
            channel.latest().await,
            Err(ChannelIoError::NoLatest { .. })
        ));
        channel.publish(reading()).await.unwrap();
        assert_eq!(channel.latest().await.unwrap(), reading());
    }

    #[tokio::test]
    async fn on_latest_is_unsupported_by_default() {
        let (channel, _transport) = channel("/on-latest");
        channel.open().await.unwrap();
        assert!(matches!(
            channel.on_latest(reading),
            Err(ChannelIoError::Unsupported { operation: "on_latest", .. })
        ));
    }

    #[tokio::test]
    async fn publish_failure_leaves_flags_unchanged() {
        let uri = ChannelUri::parse("loop:/incomplete").unwrap();
        let transport = LoopbackTransport::new(&uri);
        let channel: Channel<Reading> = Channel::new(
            uri,
            Pipeline::new(),
            Box::new(Shared(transport)),
            EventObservable::new(),
        );
        channel.open().await.unwrap();
        let err = channel.publish(reading()).await.unwrap_err();
        assert!(matches!(
            err,
            ChannelIoError::Pipeline {
                source: PipelineError::Creation { .. },
                ..
            }
        ));
        assert!(!channel.is_publishing());
    }

    #[test]
    fn equality_and_hash_use_uri_only() {
        let (a, _) = channel("/same");
        let (b, _) = channel("/same");
        let (c, _) = channel("/other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn equality_ignores_pipeline_and_persistence() {
        use std::hash::{DefaultHasher, Hash, Hasher};

        use crate::channels::{ChannelProvider, ProviderContext};
        use crate::config::ProviderConfig;
        use crate::pool::WorkerPool;
        use crate::transports::LocalProvider;

        let provider = LocalProvider::new();
        let ctx = ProviderContext {
            pool: WorkerPool::try_current().unwrap(),
            config: ProviderConfig::default(),
        };
        provider.start(&ctx).await.unwrap();
        let build = |path: &str, format: FormatKind, persistence: Persistence| {
            let uri = ChannelUri::parse(format!("local:{path}")).unwrap();
            let events = EventObservable::new();
            let transport = provider.build(&uri, persistence, &[], events.clone()).unwrap();
            let pipeline = Pipeline::new()
                .append_all([format.operation::<Reading>()])
                .unwrap();
            Channel::new(uri, pipeline, transport, events)
        };
        let hash = |channel: &Channel<Reading>| {
            let mut hasher = DefaultHasher::new();
            channel.hash(&mut hasher);
            hasher.finish()
        };

        let a = build("/same", FormatKind::Json, Persistence::DEFAULT);
        let b = build("/same", FormatKind::MsgPack, Persistence::NEVER_PERSIST);
        let c = build("/other", FormatKind::Json, Persistence::DEFAULT);
        assert_eq!(a, b);
        assert_eq!(hash(&a), hash(&b));
        assert_ne!(a, c);
    }

    #[test]
    fn display_is_uri() {
        let (channel, _) = channel("/display");
        assert_eq!(channel.to_string(), "loop:/display");
    }
}
