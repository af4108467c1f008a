//! Node assembly: configuration, worker pool and channel registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use arc_swap::ArcSwap;
use bytes::Bytes;
use conduit_core::{ChannelUri, Message, Metadata, Persistence, Pipeline};

use crate::channels::{Channel, ChannelProvider, Channels};
use crate::config::NodeConfig;
use crate::error::ChannelLifetimeError;
use crate::metrics::ChannelMetricsObserver;
use crate::pool::WorkerPool;
use crate::request_response::{Requestor, Responder};
use crate::telemetry;
use crate::transports::LocalProvider;

/// Node lifecycle state.
///
/// State machine: Starting -> Running -> Stopping -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// A running node.
///
/// Owns the worker pool every provider shares, the configuration and the
/// channel registry. The `local` provider is registered on start; further
/// providers are added with [`register_provider`](Node::register_provider).
pub struct Node {
    config: Arc<NodeConfig>,
    pool: WorkerPool,
    channels: Arc<Channels>,
    state: ArcSwap<NodeState>,
    shutting_down: AtomicBool,
}

impl Node {
    /// Starts a node on the current tokio runtime.
    ///
    /// Installs the tracing subscriber unless one is already installed.
    ///
    /// # Errors
    ///
    /// Fails outside a tokio runtime or if a built-in provider fails to
    /// start.
    pub async fn start(config: NodeConfig) -> anyhow::Result<Self> {
        if !telemetry::init_tracing(&config.log) {
            tracing::debug!("tracing subscriber already installed");
        }
        let pool = WorkerPool::try_current().context("a node must be started inside a tokio runtime")?;
        Self::start_on(pool, config).await
    }

    /// Starts a node whose providers run on `pool`.
    ///
    /// # Errors
    ///
    /// Fails if a built-in provider fails to start.
    pub async fn start_on(pool: WorkerPool, config: NodeConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let channels = Arc::new(Channels::new(pool.clone(), Arc::clone(&config)));
        let node = Self {
            config,
            pool,
            channels,
            state: ArcSwap::from_pointee(NodeState::Starting),
            shutting_down: AtomicBool::new(false),
        };

        if node.config.metrics {
            ChannelMetricsObserver::describe();
            ChannelMetricsObserver::attach(&node.channels);
        }
        node.channels
            .register(Arc::new(LocalProvider::new()))
            .await
            .context("failed to start the local provider")?;

        node.state.store(Arc::new(NodeState::Running));
        tracing::info!(node_id = %node.config.node_id, "node started");
        Ok(node)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.config.node_id
    }

    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    #[must_use]
    pub fn channels(&self) -> &Arc<Channels> {
        &self.channels
    }

    #[must_use]
    pub fn state(&self) -> NodeState {
        **self.state.load()
    }

    /// Registers an additional provider, replacing any for the same scheme.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelLifetimeError::ProviderStart`] if it fails to start.
    pub async fn register_provider(
        &self,
        provider: Arc<dyn ChannelProvider>,
    ) -> Result<(), ChannelLifetimeError> {
        self.channels.register(provider).await
    }

    /// Opens a channel with the format chosen for `M`.
    ///
    /// # Errors
    ///
    /// See [`Channels::open_channel`].
    pub async fn open_channel<M: Message>(
        &self,
        uri: &ChannelUri,
        persistence: Persistence,
        metadata: &[Metadata],
    ) -> Result<Channel<M>, ChannelLifetimeError> {
        self.channels.open_channel(uri, persistence, metadata).await
    }

    /// Opens a channel bound to a caller-built pipeline.
    ///
    /// # Errors
    ///
    /// See [`Channels::open_channel_with`].
    pub async fn open_channel_with<M: Message>(
        &self,
        uri: &ChannelUri,
        pipeline: Pipeline<M, Bytes>,
        persistence: Persistence,
        metadata: &[Metadata],
    ) -> Result<Channel<M>, ChannelLifetimeError> {
        self.channels
            .open_channel_with(uri, pipeline, persistence, metadata)
            .await
    }

    #[must_use]
    pub fn requestor<Q: Message, R: Message>(&self) -> Requestor<Q, R> {
        Requestor::new(Arc::clone(&self.channels))
    }

    #[must_use]
    pub fn responder<Q: Message, R: Message>(&self) -> Responder<Q, R> {
        Responder::new(Arc::clone(&self.channels))
    }

    /// Closes every channel and stops every provider. Later calls are
    /// no-ops.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.state.store(Arc::new(NodeState::Stopping));
        tracing::info!(node_id = %self.config.node_id, "node shutting down");
        self.channels.shutdown().await;
        self.state.store(Arc::new(NodeState::Stopped));
        tracing::info!(node_id = %self.config.node_id, "node stopped");
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.config.node_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
