//! Conduit core: type tokens, invertible operation pipelines, message formats,
//! channel metadata, channel URIs and channel events.
//!
//! This crate has no async runtime dependency; the channel layer built on it
//! lives in `conduit-node`.

pub mod error;
pub mod event;
pub mod formats;
pub mod hash;
pub mod metadata;
pub mod operation;
pub mod pipeline;
pub mod registry;
pub mod type_token;
pub mod uri;

pub use error::{
    BoxError, FingerprintError, MetadataError, OperationError, PipelineError, TypeTokenError,
    UriError,
};
pub use event::{ChannelEvent, EventKind, EventObservable, EventObserver};
pub use formats::{BytesFormat, BytesMessage, FormatKind, JsonFormat, Message, MsgPackFormat};
pub use hash::{fingerprint, ChecksumOperation, DigestOperation};
pub use metadata::{Frequency, Metadata, Persistence};
pub use operation::{erase, AnyOperation, FnOperation, Operation, Payload};
pub use pipeline::Pipeline;
pub use registry::{provider_fn, Attributes, OperationProvider, OperationRegistry, PipelineFactory};
pub use type_token::{RawType, TypeShape, TypeToken};
pub use uri::ChannelUri;
