//! Channel event counters.
//!
//! [`ChannelMetricsObserver`] turns channel events into `metrics` counters
//! labelled by URI scheme. Nothing is exported unless the embedding
//! application installs a recorder.

use std::sync::Arc;

use conduit_core::{ChannelEvent, EventKind, EventObserver};

use crate::channels::Channels;

pub const MESSAGES_PUBLISHED: &str = "conduit_messages_published_total";
pub const MESSAGES_RECEIVED: &str = "conduit_messages_received_total";
pub const LATEST_REQUESTS: &str = "conduit_latest_requests_total";
pub const DECODE_FAILURES: &str = "conduit_decode_failures_total";

/// Event observer that counts channel traffic.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelMetricsObserver;

impl ChannelMetricsObserver {
    /// Event kinds the observer counts.
    pub const KINDS: [EventKind; 4] = [
        EventKind::MessagePublished,
        EventKind::MessageReceived,
        EventKind::MessageRequested,
        EventKind::DecodeFailed,
    ];

    /// Registers counter descriptions with the installed recorder.
    pub fn describe() {
        metrics::describe_counter!(MESSAGES_PUBLISHED, "Messages published on channels");
        metrics::describe_counter!(MESSAGES_RECEIVED, "Messages delivered to subscriptions");
        metrics::describe_counter!(LATEST_REQUESTS, "Latest-value requests served by generators");
        metrics::describe_counter!(DECODE_FAILURES, "Inbound messages that failed to decode");
    }

    /// Attaches one shared observer to every channel `channels` builds.
    pub fn attach(channels: &Channels) {
        let observer: Arc<dyn EventObserver> = Arc::new(Self);
        for kind in Self::KINDS {
            channels.observe_all(kind, Arc::clone(&observer));
        }
    }
}

impl EventObserver for ChannelMetricsObserver {
    fn notify(&self, event: &ChannelEvent) {
        let name = match event {
            ChannelEvent::MessagePublished { .. } => MESSAGES_PUBLISHED,
            ChannelEvent::MessageReceived { .. } => MESSAGES_RECEIVED,
            ChannelEvent::MessageRequested { .. } => LATEST_REQUESTS,
            ChannelEvent::DecodeFailed { .. } => DECODE_FAILURES,
            ChannelEvent::Opened { .. } | ChannelEvent::Closed { .. } => return,
        };
        metrics::counter!(name, "scheme" => event.uri().scheme().to_owned()).increment(1);
    }
}
