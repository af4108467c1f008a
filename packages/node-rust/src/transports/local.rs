//! In-process transport for the `local` scheme.
//!
//! Every channel URI maps to a topic on a bus owned by the provider. A topic
//! is a `tokio::sync::broadcast` channel plus the retained latest message,
//! so all channels of a node opened on the same URI see each other's
//! traffic. A topic lives while a channel on it is open, or while it still
//! holds a retained message or a generator.
//!
//! # Persistence
//!
//! A publish through a channel whose persistence must persist retains the
//! message for `persist_for`. `latest()` serves the retained message, or
//! waits up to `retrieve_under` for the next one, or fails immediately when
//! the channel has no retrieval lifetime.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use conduit_core::{ChannelEvent, ChannelUri, EventObservable, Metadata, Persistence};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::channels::{
    ChannelProvider, LatestGenerator, MessageSink, ProviderContext, Transport,
};
use crate::error::{ChannelIoError, ChannelLifetimeError};
use crate::pool::WorkerPool;

/// Scheme served by [`LocalProvider::new`].
pub const SCHEME: &str = "local";

/// Default per-topic broadcast buffer, in messages.
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// LocalProvider
// ---------------------------------------------------------------------------

/// Provider of in-process channels.
///
/// Reads `buffer_capacity` from its configuration section.
pub struct LocalProvider {
    scheme: String,
    bus: RwLock<Option<Arc<LocalBus>>>,
}

impl LocalProvider {
    /// Provider for the `local` scheme.
    #[must_use]
    pub fn new() -> Self {
        Self::with_scheme(SCHEME)
    }

    /// Provider serving `scheme` instead, e.g. `*` to act as the fallback.
    #[must_use]
    pub fn with_scheme(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            bus: RwLock::new(None),
        }
    }
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelProvider for LocalProvider {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    async fn start(&self, ctx: &ProviderContext) -> anyhow::Result<()> {
        let capacity: usize = ctx
            .config
            .get_or("buffer_capacity", DEFAULT_BUFFER_CAPACITY);
        if capacity == 0 {
            anyhow::bail!("buffer_capacity must be greater than zero");
        }
        let bus = Arc::new(LocalBus {
            pool: ctx.pool.clone(),
            capacity,
            topics: DashMap::new(),
            shutdown: CancellationToken::new(),
            next_transport_id: AtomicU64::new(0),
        });
        if let Some(previous) = self.bus.write().replace(bus) {
            previous.shutdown.cancel();
        }
        tracing::debug!(scheme = %self.scheme, capacity, "local provider started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(bus) = self.bus.write().take() {
            bus.shutdown.cancel();
            bus.topics.clear();
            tracing::debug!(scheme = %self.scheme, "local provider stopped");
        }
        Ok(())
    }

    fn build(
        &self,
        uri: &ChannelUri,
        persistence: Persistence,
        _metadata: &[Metadata],
        events: EventObservable,
    ) -> Result<Box<dyn Transport>, ChannelLifetimeError> {
        let bus = self
            .bus
            .read()
            .clone()
            .ok_or_else(|| ChannelLifetimeError::ProviderNotStarted {
                scheme: self.scheme.clone(),
            })?;
        Ok(Box::new(LocalTransport {
            id: bus.next_transport_id.fetch_add(1, Ordering::Relaxed),
            uri: uri.clone(),
            persistence,
            cancel: Mutex::new(bus.shutdown.child_token()),
            bus,
            topic: Mutex::new(None),
            events,
        }))
    }
}

// ---------------------------------------------------------------------------
// Bus and topics
// ---------------------------------------------------------------------------

struct LocalBus {
    pool: WorkerPool,
    capacity: usize,
    topics: DashMap<ChannelUri, Arc<Topic>>,
    shutdown: CancellationToken,
    next_transport_id: AtomicU64,
}

impl LocalBus {
    /// Topic for `uri`, counted as held by one more open transport.
    fn acquire(&self, uri: &ChannelUri) -> Arc<Topic> {
        let entry = self.topics.entry(uri.clone()).or_insert_with(|| {
            let (sender, _) = broadcast::channel(self.capacity);
            Arc::new(Topic {
                sender,
                open: AtomicUsize::new(0),
                retained: Mutex::new(None),
                generator: Mutex::new(None),
            })
        });
        // Counted under the shard lock so `release` cannot drop it meanwhile.
        entry.value().open.fetch_add(1, Ordering::AcqRel);
        Arc::clone(entry.value())
    }

    fn release(&self, uri: &ChannelUri, topic: &Arc<Topic>) {
        topic.open.fetch_sub(1, Ordering::AcqRel);
        let removed = self
            .topics
            .remove_if(uri, |_, current| Arc::ptr_eq(current, topic) && current.is_idle())
            .is_some();
        if removed {
            tracing::trace!(uri = %uri, "local topic dropped");
        }
    }
}

struct Topic {
    sender: broadcast::Sender<Bytes>,
    /// Open transports holding this topic.
    open: AtomicUsize,
    retained: Mutex<Option<Retained>>,
    generator: Mutex<Option<GeneratorSlot>>,
}

struct Retained {
    payload: Bytes,
    /// `None` when retained forever.
    expires_at: Option<Instant>,
}

#[derive(Clone)]
struct GeneratorSlot {
    owner: u64,
    generate: LatestGenerator,
    events: EventObservable,
}

impl Topic {
    fn retain(&self, payload: Bytes, persistence: Persistence) {
        let expires_at = Instant::now().checked_add(persistence.persist_for);
        *self.retained.lock() = Some(Retained {
            payload,
            expires_at,
        });
    }

    fn retained_payload(&self) -> Option<Bytes> {
        let mut retained = self.retained.lock();
        let expired = retained
            .as_ref()
            .and_then(|r| r.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            *retained = None;
        }
        retained.as_ref().map(|r| r.payload.clone())
    }

    fn is_idle(&self) -> bool {
        self.open.load(Ordering::Acquire) == 0
            && self.generator.lock().is_none()
            && self.retained_payload().is_none()
    }
}

// ---------------------------------------------------------------------------
// LocalTransport
// ---------------------------------------------------------------------------

struct LocalTransport {
    id: u64,
    uri: ChannelUri,
    persistence: Persistence,
    bus: Arc<LocalBus>,
    /// Held from `open` until `close`.
    topic: Mutex<Option<Arc<Topic>>>,
    events: EventObservable,
    cancel: Mutex<CancellationToken>,
}

impl LocalTransport {
    fn topic(&self) -> Result<Arc<Topic>, ChannelIoError> {
        self.topic.lock().clone().ok_or_else(|| ChannelIoError::Closed {
            uri: self.uri.clone(),
        })
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn uri(&self) -> &ChannelUri {
        &self.uri
    }

    async fn open(&self) -> Result<(), ChannelLifetimeError> {
        if self.bus.shutdown.is_cancelled() {
            return Err(ChannelLifetimeError::OpenFailed {
                uri: self.uri.clone(),
                reason: "local provider has been stopped".to_string(),
            });
        }
        {
            let mut cancel = self.cancel.lock();
            if cancel.is_cancelled() {
                *cancel = self.bus.shutdown.child_token();
            }
        }
        let mut topic = self.topic.lock();
        if topic.is_none() {
            *topic = Some(self.bus.acquire(&self.uri));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), ChannelLifetimeError> {
        self.cancel.lock().cancel();
        let Some(topic) = self.topic.lock().take() else {
            return Ok(());
        };
        {
            let mut generator = topic.generator.lock();
            if generator.as_ref().is_some_and(|slot| slot.owner == self.id) {
                *generator = None;
            }
        }
        self.bus.release(&self.uri, &topic);
        Ok(())
    }

    async fn publish(&self, payload: Bytes) -> Result<(), ChannelIoError> {
        let topic = self.topic()?;
        if self.persistence.must_persist() {
            topic.retain(payload.clone(), self.persistence);
        }
        // No receivers is not an error: nobody is subscribed yet.
        let receivers = topic.sender.send(payload).unwrap_or(0);
        tracing::trace!(uri = %self.uri, receivers, "local publish");
        Ok(())
    }

    async fn subscribe(&self, sink: MessageSink) -> Result<(), ChannelIoError> {
        let receiver = self.topic()?.sender.subscribe();
        let cancel = self.cancel.lock().clone();
        self.bus
            .pool
            .spawn(listen(self.uri.clone(), receiver, sink, cancel));
        Ok(())
    }

    async fn latest(&self) -> Result<Bytes, ChannelIoError> {
        let topic = self.topic()?;
        let slot = topic.generator.lock().clone();
        if let Some(slot) = slot {
            slot.events.notify(&ChannelEvent::MessageRequested {
                uri: self.uri.clone(),
            });
            return (slot.generate)();
        }

        let mut receiver = topic.sender.subscribe();
        if let Some(payload) = topic.retained_payload() {
            return Ok(payload);
        }
        if !self.persistence.has_retrieval_lifetime() {
            return Err(ChannelIoError::NoLatest {
                uri: self.uri.clone(),
            });
        }

        let timeout = self.persistence.retrieve_under;
        let next = async {
            loop {
                match receiver.recv().await {
                    Ok(payload) => return Some(payload),
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return None,
                }
            }
        };
        match tokio::time::timeout(timeout, next).await {
            Ok(Some(payload)) => Ok(payload),
            Ok(None) => Err(ChannelIoError::NoLatest {
                uri: self.uri.clone(),
            }),
            Err(_) => Err(ChannelIoError::RetrievalTimeout {
                uri: self.uri.clone(),
                timeout,
            }),
        }
    }

    fn on_latest(&self, generator: LatestGenerator) -> Result<(), ChannelIoError> {
        *self.topic()?.generator.lock() = Some(GeneratorSlot {
            owner: self.id,
            generate: generator,
            events: self.events.clone(),
        });
        Ok(())
    }
}

async fn listen(
    uri: ChannelUri,
    mut receiver: broadcast::Receiver<Bytes>,
    sink: MessageSink,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = receiver.recv() => match received {
                Ok(payload) => sink(payload),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(uri = %uri, skipped, "local subscriber lagged, messages dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    tracing::trace!(uri = %uri, "local listener stopped");
}
