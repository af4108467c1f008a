//! Provider SPI: one implementation per URI scheme.

use async_trait::async_trait;
use conduit_core::{ChannelUri, EventObservable, Metadata, Persistence};

use super::transport::Transport;
use crate::config::ProviderConfig;
use crate::error::ChannelLifetimeError;
use crate::pool::WorkerPool;

/// Resources handed to a provider when it is started.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    /// Runtime shared by every provider of the node.
    pub pool: WorkerPool,
    /// The provider's configuration section.
    pub config: ProviderConfig,
}

/// Factory for the transports of one URI scheme.
///
/// Registered with [`Channels`](super::Channels), which starts it before
/// first use and stops it on unregistration or shutdown. Used as
/// `Arc<dyn ChannelProvider>`.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// Scheme served by this provider, or `*` for the fallback provider.
    fn scheme(&self) -> &str;

    /// Creates provider-wide resources.
    async fn start(&self, ctx: &ProviderContext) -> anyhow::Result<()>;

    /// Releases provider-wide resources.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Builds an unopened transport for `uri`.
    ///
    /// `events` is the observable of the channel the transport will back;
    /// the transport may raise its own events through it.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelLifetimeError::ProviderNotStarted`] before `start`,
    /// or any provider-specific creation failure.
    fn build(
        &self,
        uri: &ChannelUri,
        persistence: Persistence,
        metadata: &[Metadata],
        events: EventObservable,
    ) -> Result<Box<dyn Transport>, ChannelLifetimeError>;
}
