//! Request/response over pairs of channels.
//!
//! A request is published on the request channel; the response comes back
//! on a reply channel whose URI both sides derive from the request URI and
//! a fingerprint of the request message. Identical requests in flight at
//! the same time therefore share a reply channel, and each receives the
//! first response published on it.

mod requestor;
mod responder;

use conduit_core::{fingerprint, ChannelUri, FingerprintError, Message};

pub use requestor::{PendingResponse, Requestor};
pub use responder::Responder;

/// Reply channel for `message` sent on `request_uri`.
///
/// The request URI's path extended with the message's
/// [`fingerprint`](conduit_core::fingerprint), which is the same for the
/// message and for its decoded copy on the responder side.
///
/// # Errors
///
/// Returns the [`FingerprintError`] if `message` has no canonical form.
pub fn reply_channel_uri<M: Message>(
    request_uri: &ChannelUri,
    message: &M,
) -> Result<ChannelUri, FingerprintError> {
    let digest = fingerprint(message)?;
    Ok(request_uri.join(&[&digest]))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use conduit_core::{BytesMessage, FormatKind, Metadata, Persistence};
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::channels::Channels;
    use crate::config::NodeConfig;
    use crate::error::RequestError;
    use crate::pool::WorkerPool;
    use crate::transports::LocalProvider;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Query {
        n: i64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Answer {
        doubled: i64,
    }

    fn uri(s: &str) -> ChannelUri {
        ChannelUri::parse(s).unwrap()
    }

    async fn local_channels() -> Arc<Channels> {
        let channels = Channels::new(
            WorkerPool::try_current().unwrap(),
            Arc::new(NodeConfig::default()),
        );
        channels.register(Arc::new(LocalProvider::new())).await.unwrap();
        Arc::new(channels)
    }

    async fn doubling_responder(channels: &Arc<Channels>, at: &ChannelUri) -> Responder<Query, Answer> {
        let responder = Responder::new(Arc::clone(channels));
        responder
            .listen(at, |q: Query| async move {
                Ok::<_, anyhow::Error>(Answer { doubled: q.n * 2 })
            })
            .await
            .unwrap();
        responder
    }

    #[test]
    fn reply_uri_extends_request_path_with_fingerprint() {
        let request = uri("local:/svc/double");
        let a = reply_channel_uri(&request, &Query { n: 1 }).unwrap();
        let b = reply_channel_uri(&request, &Query { n: 1 }).unwrap();
        let c = reply_channel_uri(&request, &Query { n: 2 }).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.scheme(), "local");
        let digest = a.path().strip_prefix("/svc/double/").unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn request_resolves_with_response() {
        let channels = local_channels().await;
        let service = uri("local:/svc/double");
        let _responder = doubling_responder(&channels, &service).await;
        let requestor: Requestor<Query, Answer> = Requestor::new(Arc::clone(&channels));

        let pending = requestor.request(&service, Query { n: 21 }).await.unwrap();
        let reply_uri = pending.reply_uri().clone();
        let answer = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(answer, Answer { doubled: 42 });
        assert!(!channels.open_channels().contains(&reply_uri));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_requests_get_their_own_responses() {
        let channels = local_channels().await;
        let service = uri("local:/svc/concurrent");
        let _responder = doubling_responder(&channels, &service).await;
        let requestor: Arc<Requestor<Query, Answer>> =
            Arc::new(Requestor::new(Arc::clone(&channels)));

        let mut requests = tokio::task::JoinSet::new();
        for n in 0..16 {
            let requestor = Arc::clone(&requestor);
            let service = service.clone();
            requests.spawn(async move {
                let answer = requestor.request(&service, Query { n }).await?.await?;
                Ok::<_, RequestError>((n, answer))
            });
        }
        let mut answered = 0;
        while let Some(joined) = requests.join_next().await {
            let (n, answer) = joined.unwrap().unwrap();
            assert_eq!(answer.doubled, n * 2);
            answered += 1;
        }
        assert_eq!(answered, 16);

        // One responder channel plus one cached request channel.
        let open = channels.open_channels();
        assert_eq!(open.iter().filter(|u| **u == service).count(), 2);
        requestor.close().await;
        let open = channels.open_channels();
        assert_eq!(open.iter().filter(|u| **u == service).count(), 1);
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_the_responder() {
        let channels = local_channels().await;
        let service = uri("local:/svc/flaky");
        let responder: Responder<Query, Answer> = Responder::new(Arc::clone(&channels));
        responder
            .listen(&service, |q: Query| async move {
                match q.n {
                    0 => anyhow::bail!("refusing zero"),
                    1 => panic!("handler blew up"),
                    n => Ok::<_, anyhow::Error>(Answer { doubled: n * 2 }),
                }
            })
            .await
            .unwrap();
        let requestor: Requestor<Query, Answer> = Requestor::new(Arc::clone(&channels));

        for n in [0, 1] {
            let pending = requestor.request(&service, Query { n }).await.unwrap();
            let outcome = tokio::time::timeout(Duration::from_millis(100), pending).await;
            assert!(outcome.is_err(), "request {n} should go unanswered");
        }

        let pending = requestor.request(&service, Query { n: 3 }).await.unwrap();
        let answer = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(answer, Answer { doubled: 6 });
    }

    #[tokio::test]
    async fn closed_responder_stops_answering() {
        let channels = local_channels().await;
        let service = uri("local:/svc/closed");
        let responder = doubling_responder(&channels, &service).await;
        responder.close().await;
        let requestor: Requestor<Query, Answer> = Requestor::new(Arc::clone(&channels));

        let pending = requestor.request(&service, Query { n: 1 }).await.unwrap();
        let outcome = tokio::time::timeout(Duration::from_millis(100), pending).await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn shutdown_abandons_pending_requests() {
        let channels = local_channels().await;
        let requestor: Requestor<Query, Answer> = Requestor::new(Arc::clone(&channels));
        let pending = requestor
            .request(&uri("local:/svc/nobody"), Query { n: 1 })
            .await
            .unwrap();

        channels.shutdown().await;
        let outcome = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap();
        assert!(matches!(outcome, Err(RequestError::Abandoned { .. })));
    }

    #[tokio::test]
    async fn map_requests_resolve() {
        let channels = local_channels().await;
        let service = uri("local:/svc/sum");
        let responder: Responder<HashMap<String, u32>, u32> = Responder::new(Arc::clone(&channels));
        responder
            .listen(&service, |m: HashMap<String, u32>| async move {
                Ok::<_, anyhow::Error>(m.values().sum::<u32>())
            })
            .await
            .unwrap();
        let requestor: Requestor<HashMap<String, u32>, u32> =
            Requestor::new(Arc::clone(&channels));

        let request: HashMap<String, u32> = (0..8).map(|i| (format!("k{i}"), i)).collect();
        for _ in 0..10 {
            let pending = requestor.request(&service, request.clone()).await.unwrap();
            let sum = tokio::time::timeout(Duration::from_secs(5), pending)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(sum, 28);
        }
    }

    #[tokio::test]
    async fn metadata_selects_the_wire_format() {
        let channels = local_channels().await;
        let service = uri("local:/svc/msgpack");
        let msgpack = [Metadata::Format(FormatKind::MsgPack)];

        let wire: crate::channels::Channel<BytesMessage> = channels
            .open_channel(&service, Persistence::NEVER_PERSIST, &[])
            .await
            .unwrap();
        let (tx, mut raw) = tokio::sync::mpsc::unbounded_channel();
        wire.subscribe(move |m: BytesMessage| {
            let _ = tx.send(m.into_bytes());
        })
        .await
        .unwrap();

        let responder: Responder<Query, Answer> =
            Responder::new(Arc::clone(&channels)).with_metadata(msgpack.clone());
        responder
            .listen(&service, |q: Query| async move {
                Ok::<_, anyhow::Error>(Answer { doubled: q.n * 2 })
            })
            .await
            .unwrap();
        let requestor: Requestor<Query, Answer> =
            Requestor::new(Arc::clone(&channels)).with_metadata(msgpack);

        let pending = requestor.request(&service, Query { n: 4 }).await.unwrap();
        let answer = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(answer, Answer { doubled: 8 });

        let sent: Bytes = raw.recv().await.unwrap();
        assert_eq!(rmp_serde::from_slice::<Query>(&sent).unwrap(), Query { n: 4 });
        assert!(serde_json::from_slice::<Query>(&sent).is_err());
    }

    proptest! {
        #[test]
        fn reply_uri_ignores_map_insertion_order(
            entries in proptest::collection::btree_map("[a-z]{1,8}", any::<u32>(), 0..24)
        ) {
            let request = uri("local:/svc/prop");
            let forward: HashMap<String, u32> = entries.clone().into_iter().collect();
            let backward: HashMap<String, u32> = entries.clone().into_iter().rev().collect();
            let decoded: HashMap<String, u32> =
                serde_json::from_slice(&serde_json::to_vec(&forward).unwrap()).unwrap();

            let expected = reply_channel_uri(&request, &entries).unwrap();
            prop_assert_eq!(reply_channel_uri(&request, &forward).unwrap(), expected.clone());
            prop_assert_eq!(reply_channel_uri(&request, &backward).unwrap(), expected.clone());
            prop_assert_eq!(reply_channel_uri(&request, &decoded).unwrap(), expected);
        }
    }
}
