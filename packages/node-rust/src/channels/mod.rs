//! Typed channels and the providers that back them.

mod channel;
mod provider;
mod registry;
mod transport;

pub use channel::{Channel, ChannelState};
pub use provider::{ChannelProvider, ProviderContext};
pub use registry::{Channels, FALLBACK_SCHEME};
pub use transport::{LatestGenerator, MessageSink, Transport};
