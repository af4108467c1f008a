//! Server side of the request/response protocol.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use conduit_core::{ChannelUri, Message, Metadata, Persistence};
use parking_lot::Mutex;

use super::reply_channel_uri;
use crate::channels::{Channel, Channels};
use crate::error::RequestError;

/// Answers requests of type `Q` with responses of type `R`.
///
/// Each inbound request is served in its own task on the worker pool.
/// A handler that fails or panics is logged and the listener keeps going.
/// Request and reply channels are opened with the responder's metadata.
pub struct Responder<Q, R> {
    channels: Arc<Channels>,
    metadata: Arc<[Metadata]>,
    listening: Mutex<Vec<Channel<Q>>>,
    _response: PhantomData<fn() -> R>,
}

impl<Q: Message, R: Message> Responder<Q, R> {
    #[must_use]
    pub fn new(channels: Arc<Channels>) -> Self {
        Self {
            channels,
            metadata: Arc::from(Vec::new()),
            listening: Mutex::new(Vec::new()),
            _response: PhantomData,
        }
    }

    /// Opens request and reply channels with `metadata`, e.g. a
    /// [`Metadata::Format`] both sides agree on.
    #[must_use]
    pub fn with_metadata(mut self, metadata: impl IntoIterator<Item = Metadata>) -> Self {
        self.metadata = metadata.into_iter().collect();
        self
    }

    /// Serves requests arriving on `uri` with `handler`.
    ///
    /// Returns once the request channel is subscribed. May be called for
    /// several URIs; [`close`](Self::close) stops all of them.
    ///
    /// # Errors
    ///
    /// Any failure opening or subscribing the request channel.
    pub async fn listen<H, Fut>(&self, uri: &ChannelUri, handler: H) -> Result<(), RequestError>
    where
        H: Fn(Q) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let channel: Channel<Q> = self
            .channels
            .open_channel(uri, Persistence::NEVER_PERSIST, &self.metadata)
            .await?;

        let handler = Arc::new(handler);
        let channels = Arc::clone(&self.channels);
        let metadata = Arc::clone(&self.metadata);
        let request_uri = uri.clone();
        let subscribed = channel
            .subscribe(move |request: Q| {
                let task = serve(
                    Arc::clone(&channels),
                    Arc::clone(&metadata),
                    request_uri.clone(),
                    request,
                    Arc::clone(&handler),
                );
                channels.pool().spawn(task);
            })
            .await;
        if let Err(e) = subscribed {
            if let Err(close) = channel.close().await {
                tracing::warn!(uri = %uri, error = %close, "failed to close request channel");
            }
            return Err(e.into());
        }

        tracing::info!(uri = %uri, "responder listening");
        self.listening.lock().push(channel);
        Ok(())
    }

    /// Stops listening on every URI.
    pub async fn close(&self) {
        let listening = std::mem::take(&mut *self.listening.lock());
        for channel in &listening {
            if let Err(e) = channel.close().await {
                tracing::warn!(uri = %channel.uri(), error = %e, "failed to close request channel");
            }
        }
    }
}

impl<Q, R> std::fmt::Debug for Responder<Q, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("listening", &self.listening.lock().len())
            .finish_non_exhaustive()
    }
}

async fn serve<Q, R, H, Fut>(
    channels: Arc<Channels>,
    metadata: Arc<[Metadata]>,
    uri: ChannelUri,
    request: Q,
    handler: Arc<H>,
) where
    Q: Message,
    R: Message,
    H: Fn(Q) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
{
    let reply_uri = match reply_channel_uri(&uri, &request) {
        Ok(reply_uri) => reply_uri,
        Err(e) => {
            tracing::warn!(uri = %uri, error = %e, "cannot derive reply channel, request dropped");
            return;
        }
    };

    // The handler gets its own task so a panic surfaces as a JoinError.
    let handled = channels
        .pool()
        .spawn(async move { handler(request).await })
        .await;
    let response = match handled {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            tracing::warn!(uri = %uri, error = %e, "request handler failed");
            return;
        }
        Err(e) => {
            tracing::error!(uri = %uri, error = %e, "request handler panicked");
            return;
        }
    };

    if let Err(e) = reply(&channels, &metadata, &reply_uri, response).await {
        tracing::warn!(uri = %uri, reply = %reply_uri, error = %e, "failed to send response");
    }
}

async fn reply<R: Message>(
    channels: &Channels,
    metadata: &[Metadata],
    uri: &ChannelUri,
    response: R,
) -> Result<(), RequestError> {
    let channel: Channel<R> = channels
        .open_channel(uri, Persistence::NEVER_PERSIST, metadata)
        .await?;
    let published = channel.publish(response).await;
    channel.close().await?;
    published?;
    Ok(())
}
