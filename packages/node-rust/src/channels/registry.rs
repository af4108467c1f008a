//! Scheme-keyed provider registry and channel factory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use conduit_core::metadata::find_format;
use conduit_core::{
    ChannelUri, EventKind, EventObservable, EventObserver, FormatKind, Message, Metadata,
    Persistence, Pipeline, UriError,
};
use dashmap::DashMap;
use parking_lot::RwLock;

use super::channel::{Channel, ChannelHandle};
use super::provider::{ChannelProvider, ProviderContext};
use crate::config::NodeConfig;
use crate::error::ChannelLifetimeError;
use crate::pool::WorkerPool;

/// Scheme of the provider used when no other provider matches.
pub const FALLBACK_SCHEME: &str = "*";

/// An open channel and the scheme of the provider serving it, which is `*`
/// for channels served by the fallback.
struct Tracked {
    provider: String,
    handle: Arc<dyn ChannelHandle>,
}

/// Registry of channel providers and the channels opened through them.
///
/// Providers are started when registered and stopped when unregistered or
/// on [`shutdown`](Channels::shutdown). Channels opened through the
/// registry are tracked so they can be closed along with their provider.
pub struct Channels {
    pool: WorkerPool,
    config: Arc<NodeConfig>,
    providers: DashMap<String, Arc<dyn ChannelProvider>>,
    tracked: DashMap<u64, Tracked>,
    next_id: AtomicU64,
    observers: RwLock<Vec<(EventKind, Arc<dyn EventObserver>)>>,
}

impl Channels {
    #[must_use]
    pub fn new(pool: WorkerPool, config: Arc<NodeConfig>) -> Self {
        Self {
            pool,
            config,
            providers: DashMap::new(),
            tracked: DashMap::new(),
            next_id: AtomicU64::new(0),
            observers: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Starts `provider` and makes it serve its scheme.
    ///
    /// A provider previously registered for the same scheme is replaced and
    /// stopped.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelLifetimeError::ProviderStart`] if the provider fails
    /// to start; the previous registration, if any, is kept.
    pub async fn register(
        &self,
        provider: Arc<dyn ChannelProvider>,
    ) -> Result<(), ChannelLifetimeError> {
        let scheme = provider.scheme().to_string();
        let ctx = ProviderContext {
            pool: self.pool.clone(),
            config: self.config.provider(&scheme),
        };
        provider
            .start(&ctx)
            .await
            .map_err(|e| ChannelLifetimeError::ProviderStart {
                scheme: scheme.clone(),
                source: e.into(),
            })?;

        let replaced = self.providers.insert(scheme.clone(), provider);
        tracing::info!(scheme = %scheme, replaced = replaced.is_some(), "channel provider registered");
        if let Some(previous) = replaced {
            if let Err(e) = previous.stop().await {
                tracing::warn!(scheme = %scheme, error = %e, "replaced provider failed to stop");
            }
        }
        Ok(())
    }

    /// Provider for `scheme`, falling back to the `*` provider.
    ///
    /// # Errors
    ///
    /// [`ChannelLifetimeError::MalformedUri`] for an empty scheme and
    /// [`ChannelLifetimeError::UnknownScheme`] when neither the scheme nor
    /// the fallback is registered.
    pub fn get(&self, scheme: &str) -> Result<Arc<dyn ChannelProvider>, ChannelLifetimeError> {
        if scheme.is_empty() {
            return Err(UriError::MissingScheme { uri: String::new() }.into());
        }
        self.providers
            .get(scheme)
            .or_else(|| self.providers.get(FALLBACK_SCHEME))
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ChannelLifetimeError::UnknownScheme {
                scheme: scheme.to_string(),
            })
    }

    /// Removes the provider for `scheme`, closing the channels it serves and
    /// stopping it. Returns false if nothing was registered.
    pub async fn unregister(&self, scheme: &str) -> bool {
        let Some((_, provider)) = self.providers.remove(scheme) else {
            return false;
        };
        let handles: Vec<(u64, Arc<dyn ChannelHandle>)> = self
            .tracked
            .iter()
            .filter(|entry| entry.value().provider == scheme)
            .map(|entry| (*entry.key(), Arc::clone(&entry.value().handle)))
            .collect();
        for (id, handle) in handles {
            self.tracked.remove(&id);
            close_logged(handle.as_ref()).await;
        }
        if let Err(e) = provider.stop().await {
            tracing::warn!(scheme = %scheme, error = %e, "channel provider failed to stop");
        }
        tracing::info!(scheme = %scheme, "channel provider unregistered");
        true
    }

    /// Attaches `observer` for `kind` to every channel built from now on.
    pub fn observe_all(&self, kind: EventKind, observer: Arc<dyn EventObserver>) {
        self.observers.write().push((kind, observer));
    }

    /// Builds an unopened channel bound to `pipeline`.
    ///
    /// # Errors
    ///
    /// Returns the provider lookup failure or the provider's build failure.
    pub fn build<M: Message>(
        &self,
        uri: &ChannelUri,
        pipeline: Pipeline<M, Bytes>,
        persistence: Persistence,
        metadata: &[Metadata],
    ) -> Result<Channel<M>, ChannelLifetimeError> {
        let provider = self.get(uri.scheme())?;
        self.build_with(provider.as_ref(), uri, pipeline, persistence, metadata)
    }

    fn build_with<M: Message>(
        &self,
        provider: &dyn ChannelProvider,
        uri: &ChannelUri,
        pipeline: Pipeline<M, Bytes>,
        persistence: Persistence,
        metadata: &[Metadata],
    ) -> Result<Channel<M>, ChannelLifetimeError> {
        let events = EventObservable::new();
        for (kind, observer) in self.observers.read().iter() {
            events.register(*kind, Arc::clone(observer));
        }
        let transport = provider.build(uri, persistence, metadata, events.clone())?;
        Ok(Channel::new(uri.clone(), pipeline, transport, events))
    }

    /// Format pipeline for messages of type `M`.
    ///
    /// A [`Metadata::Format`] entry wins; otherwise [`FormatKind::default_for`]
    /// decides.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelLifetimeError::Format`] if the chosen format cannot
    /// encode `M`.
    pub fn format_pipeline<M: Message>(
        uri: &ChannelUri,
        metadata: &[Metadata],
    ) -> Result<Pipeline<M, Bytes>, ChannelLifetimeError> {
        let kind = find_format(metadata).unwrap_or_else(FormatKind::default_for::<M>);
        Pipeline::new()
            .append_all([kind.operation::<M>()])
            .map_err(|source| ChannelLifetimeError::Format {
                uri: uri.clone(),
                source,
            })
    }

    /// Builds, opens and tracks a channel using the format chosen for `M`.
    ///
    /// # Errors
    ///
    /// Any [`ChannelLifetimeError`] raised while choosing the format,
    /// building or opening the channel.
    pub async fn open_channel<M: Message>(
        &self,
        uri: &ChannelUri,
        persistence: Persistence,
        metadata: &[Metadata],
    ) -> Result<Channel<M>, ChannelLifetimeError> {
        let pipeline = Self::format_pipeline::<M>(uri, metadata)?;
        self.open_channel_with(uri, pipeline, persistence, metadata)
            .await
    }

    /// Builds, opens and tracks a channel bound to `pipeline`.
    ///
    /// # Errors
    ///
    /// [`ChannelLifetimeError::OpenTimeout`] if the channel does not open
    /// within the configured timeout, or any build/open failure.
    pub async fn open_channel_with<M: Message>(
        &self,
        uri: &ChannelUri,
        pipeline: Pipeline<M, Bytes>,
        persistence: Persistence,
        metadata: &[Metadata],
    ) -> Result<Channel<M>, ChannelLifetimeError> {
        let provider = self.get(uri.scheme())?;
        let channel = self.build_with(provider.as_ref(), uri, pipeline, persistence, metadata)?;
        let opened = match self.config.open_timeout() {
            Some(timeout) => match tokio::time::timeout(timeout, channel.open()).await {
                Ok(opened) => opened,
                Err(_) => {
                    close_logged(channel.handle().as_ref()).await;
                    return Err(ChannelLifetimeError::OpenTimeout {
                        uri: uri.clone(),
                        timeout,
                    });
                }
            },
            None => channel.open().await,
        };
        opened?;
        self.track(provider.scheme(), channel.handle());
        Ok(channel)
    }

    /// URIs of tracked channels that are still open.
    #[must_use]
    pub fn open_channels(&self) -> Vec<ChannelUri> {
        self.tracked.retain(|_, tracked| tracked.handle.is_open());
        let mut uris: Vec<ChannelUri> = self
            .tracked
            .iter()
            .map(|entry| entry.value().handle.uri().clone())
            .collect();
        uris.sort();
        uris
    }

    /// Closes every tracked channel, stops every provider and clears all
    /// registrations.
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<dyn ChannelHandle>> = self
            .tracked
            .iter()
            .map(|entry| Arc::clone(&entry.value().handle))
            .collect();
        self.tracked.clear();
        for handle in &handles {
            close_logged(handle.as_ref()).await;
        }

        let providers: Vec<(String, Arc<dyn ChannelProvider>)> = self
            .providers
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        self.providers.clear();
        for (scheme, provider) in providers {
            if let Err(e) = provider.stop().await {
                tracing::warn!(scheme = %scheme, error = %e, "channel provider failed to stop");
            }
        }
        self.observers.write().clear();
        tracing::info!(channels = handles.len(), "channel registry shut down");
    }

    fn track(&self, provider: &str, handle: Arc<dyn ChannelHandle>) {
        self.tracked.retain(|_, tracked| tracked.handle.is_open());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.tracked.insert(
            id,
            Tracked {
                provider: provider.to_string(),
                handle,
            },
        );
    }
}

async fn close_logged(handle: &dyn ChannelHandle) {
    if let Err(e) = handle.close().await {
        tracing::warn!(uri = %handle.uri(), error = %e, "failed to close channel");
    }
}
