//! Conduit node: typed channels over pluggable transports.
//!
//! A [`Node`] owns the worker pool, the configuration and the [`Channels`]
//! registry. Providers register per URI scheme and build the byte-level
//! [`Transport`] behind each [`Channel`]; the `local` provider ships with
//! every node. [`request_response`] layers a correlated request/reply
//! exchange on top of plain channels.

pub mod channels;
pub mod config;
pub mod error;
pub mod metrics;
pub mod node;
pub mod pool;
pub mod request_response;
pub mod telemetry;
pub mod transports;

pub use channels::{
    Channel, ChannelProvider, ChannelState, Channels, LatestGenerator, MessageSink,
    ProviderContext, Transport, FALLBACK_SCHEME,
};
pub use config::{LogConfig, NodeConfig, ProviderConfig};
pub use error::{ChannelIoError, ChannelLifetimeError, ConfigError, RequestError};
pub use crate::metrics::ChannelMetricsObserver;
pub use node::{Node, NodeState};
pub use pool::WorkerPool;
pub use request_response::{reply_channel_uri, PendingResponse, Requestor, Responder};
pub use transports::LocalProvider;
