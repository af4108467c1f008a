//! Client side of the request/response protocol.

use std::future::{Future, IntoFuture};
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use conduit_core::{ChannelUri, Message, Metadata, Persistence};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::reply_channel_uri;
use crate::channels::{Channel, Channels};
use crate::error::RequestError;
use crate::pool::WorkerPool;

/// Sends requests of type `Q` and awaits responses of type `R`.
///
/// Request channels are opened once per URI and cached; each request gets
/// its own reply channel, closed once the response arrives. Both are opened
/// with the requestor's metadata.
pub struct Requestor<Q, R> {
    channels: Arc<Channels>,
    metadata: Vec<Metadata>,
    cache: DashMap<ChannelUri, Arc<Channel<Q>>>,
    _response: PhantomData<fn() -> R>,
}

impl<Q: Message, R: Message> Requestor<Q, R> {
    #[must_use]
    pub fn new(channels: Arc<Channels>) -> Self {
        Self {
            channels,
            metadata: Vec::new(),
            cache: DashMap::new(),
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

    /// Publishes `message` on `uri` and returns the pending response.
    ///
    /// The reply channel is subscribed before the request goes out, so a
    /// fast responder cannot be missed. There is no built-in timeout; wrap
    /// the returned future in `tokio::time::timeout` if needed.
    ///
    /// # Errors
    ///
    /// Any failure opening the request or reply channel, fingerprinting the
    /// message, subscribing or publishing.
    pub async fn request(
        &self,
        uri: &ChannelUri,
        message: Q,
    ) -> Result<PendingResponse<R>, RequestError> {
        let request = self.request_channel(uri).await?;
        let reply_uri = reply_channel_uri(uri, &message)?;
        let reply: Channel<R> = self
            .channels
            .open_channel(&reply_uri, Persistence::NEVER_PERSIST, &self.metadata)
            .await?;

        let (sender, receiver) = oneshot::channel();
        let sender = Mutex::new(Some(sender));
        let sent = async {
            reply
                .subscribe(move |response| {
                    if let Some(sender) = sender.lock().take() {
                        let _ = sender.send(response);
                    }
                })
                .await?;
            request.publish(message).await
        };
        if let Err(e) = sent.await {
            close_logged(&reply).await;
            return Err(e.into());
        }

        tracing::debug!(uri = %uri, reply = %reply_uri, "request sent");
        Ok(PendingResponse {
            pool: self.channels.pool().clone(),
            reply_uri,
            reply: Some(reply),
            receiver,
        })
    }

    /// Closes every cached request channel.
    pub async fn close(&self) {
        let cached: Vec<Arc<Channel<Q>>> = self
            .cache
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.cache.clear();
        for channel in &cached {
            close_logged(channel).await;
        }
    }

    async fn request_channel(&self, uri: &ChannelUri) -> Result<Arc<Channel<Q>>, RequestError> {
        let cached = self.cache.get(uri).map(|entry| Arc::clone(entry.value()));
        if let Some(channel) = cached.filter(|c| c.is_open()) {
            return Ok(channel);
        }

        let opened = Arc::new(
            self.channels
                .open_channel::<Q>(uri, Persistence::NEVER_PERSIST, &self.metadata)
                .await?,
        );
        // Another request may have opened the same channel meanwhile.
        let winner = match self.cache.entry(uri.clone()) {
            Entry::Occupied(entry) if entry.get().is_open() => Some(Arc::clone(entry.get())),
            Entry::Occupied(mut entry) => {
                entry.insert(Arc::clone(&opened));
                None
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&opened));
                None
            }
        };
        match winner {
            Some(winner) => {
                close_logged(&opened).await;
                Ok(winner)
            }
            None => Ok(opened),
        }
    }
}

impl<Q, R> std::fmt::Debug for Requestor<Q, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Requestor")
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

/// Response to a request still in flight.
///
/// Await it (it implements [`IntoFuture`]) to get the first reply. The reply
/// channel is closed once the response resolves, or in the background if
/// the pending response is dropped unresolved.
pub struct PendingResponse<R: Message> {
    pool: WorkerPool,
    reply_uri: ChannelUri,
    reply: Option<Channel<R>>,
    receiver: oneshot::Receiver<R>,
}

impl<R: Message> PendingResponse<R> {
    /// URI of the channel the response is expected on.
    #[must_use]
    pub fn reply_uri(&self) -> &ChannelUri {
        &self.reply_uri
    }

    async fn resolve(mut self) -> Result<R, RequestError> {
        let received = (&mut self.receiver).await;
        if let Some(reply) = self.reply.take() {
            close_logged(&reply).await;
        }
        received.map_err(|_| RequestError::Abandoned {
            uri: self.reply_uri.clone(),
        })
    }
}

impl<R: Message> IntoFuture for PendingResponse<R> {
    type Output = Result<R, RequestError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.resolve())
    }
}

impl<R: Message> Drop for PendingResponse<R> {
    fn drop(&mut self) {
        if let Some(reply) = self.reply.take() {
            self.pool.spawn(async move { close_logged(&reply).await });
        }
    }
}

impl<R: Message> std::fmt::Debug for PendingResponse<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("reply", &self.reply_uri())
            .finish_non_exhaustive()
    }
}

async fn close_logged<M: Message>(channel: &Channel<M>) {
    if let Err(e) = channel.close().await {
        tracing::warn!(uri = %channel.uri(), error = %e, "failed to close channel");
    }
}
