//! Error types for channel lifecycle, channel I/O, request/response and
//! configuration.

use std::path::PathBuf;
use std::time::Duration;

use conduit_core::{BoxError, ChannelUri, FingerprintError, PipelineError, UriError};

/// Failure to create, open or close a channel, or to manage a provider.
#[derive(Debug, thiserror::Error)]
pub enum ChannelLifetimeError {
    #[error("no channel provider registered for scheme `{scheme}`")]
    UnknownScheme { scheme: String },
    #[error(transparent)]
    MalformedUri(#[from] UriError),
    #[error("channel provider `{scheme}` failed to start")]
    ProviderStart {
        scheme: String,
        #[source]
        source: BoxError,
    },
    #[error("channel provider `{scheme}` has not been started")]
    ProviderNotStarted { scheme: String },
    #[error("failed to open channel `{uri}`: {reason}")]
    OpenFailed { uri: ChannelUri, reason: String },
    #[error("channel `{uri}` did not open within {timeout:?}")]
    OpenTimeout { uri: ChannelUri, timeout: Duration },
    #[error("failed to close channel `{uri}`")]
    CloseFailed {
        uri: ChannelUri,
        #[source]
        source: BoxError,
    },
    /// No format pipeline could be built for the channel's message type.
    #[error("cannot format messages for channel `{uri}`")]
    Format {
        uri: ChannelUri,
        #[source]
        source: PipelineError,
    },
}

/// Failure of a publish, subscribe or latest-retrieval call.
#[derive(Debug, thiserror::Error)]
pub enum ChannelIoError {
    #[error("channel `{uri}` is closed")]
    Closed { uri: ChannelUri },
    #[error("pipeline failed on channel `{uri}`")]
    Pipeline {
        uri: ChannelUri,
        #[source]
        source: PipelineError,
    },
    #[error("transport failure on channel `{uri}`: {reason}")]
    Transport { uri: ChannelUri, reason: String },
    #[error("no latest message available on channel `{uri}`")]
    NoLatest { uri: ChannelUri },
    #[error("no message arrived on channel `{uri}` within {timeout:?}")]
    RetrievalTimeout { uri: ChannelUri, timeout: Duration },
    #[error("channel `{uri}` does not support {operation}")]
    Unsupported {
        uri: ChannelUri,
        operation: &'static str,
    },
}

/// Failure of the request/response protocol.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Lifetime(#[from] ChannelLifetimeError),
    #[error(transparent)]
    Io(#[from] ChannelIoError),
    /// The request message could not be fingerprinted.
    #[error("cannot fingerprint request message")]
    Fingerprint(#[from] FingerprintError),
    /// The reply channel went away before a response arrived.
    #[error("reply channel `{uri}` closed before a response arrived")]
    Abandoned { uri: ChannelUri },
}

/// Failure to load node configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read configuration file `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration")]
    Parse(#[from] serde_json::Error),
}
