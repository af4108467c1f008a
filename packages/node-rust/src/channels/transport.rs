//! The byte-level half of a channel, supplied by a provider.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use conduit_core::ChannelUri;

use crate::error::{ChannelIoError, ChannelLifetimeError};

/// Receives every encoded message delivered to a subscription.
pub type MessageSink = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Produces an encoded message on demand for latest-value requests.
pub type LatestGenerator = Arc<dyn Fn() -> Result<Bytes, ChannelIoError> + Send + Sync>;

/// Moves encoded messages for one channel.
///
/// A [`Channel`](super::Channel) enforces the open/closed lifecycle before
/// calling into its transport, so implementations only deal with bytes.
/// Used as `Arc<dyn Transport>`.
#[async_trait]
pub trait Transport: Send + Sync {
    fn uri(&self) -> &ChannelUri;

    /// Acquires whatever the channel needs to move messages.
    async fn open(&self) -> Result<(), ChannelLifetimeError>;

    /// Releases everything acquired by `open`, including subscriptions.
    async fn close(&self) -> Result<(), ChannelLifetimeError>;

    async fn publish(&self, payload: Bytes) -> Result<(), ChannelIoError>;

    /// Starts delivering inbound messages to `sink`.
    ///
    /// Returns once the listener is active, so a message published after
    /// this call returns is delivered.
    async fn subscribe(&self, sink: MessageSink) -> Result<(), ChannelIoError>;

    /// Most recent message, following the provider's retention policy.
    async fn latest(&self) -> Result<Bytes, ChannelIoError>;

    /// Serves latest-value requests from `generator` instead of retention.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelIoError::Unsupported`] unless overridden.
    fn on_latest(&self, generator: LatestGenerator) -> Result<(), ChannelIoError> {
        let _ = generator;
        Err(ChannelIoError::Unsupported {
            uri: self.uri().clone(),
            operation: "on_latest",
        })
    }
}
