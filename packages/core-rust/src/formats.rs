//! Message formats: the pipeline stage that turns a typed message into bytes.
//!
//! A channel's pipeline always ends in a format so that transports only ever
//! see [`Bytes`]. Which format is used is chosen by [`FormatKind`].

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::OperationError;
use crate::operation::{erase, AnyOperation, Operation};

/// Anything that can travel over a channel.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Message for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Opaque binary message, encoded without any framing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BytesMessage(pub Bytes);

impl BytesMessage {
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Bytes> for BytesMessage {
    fn from(value: Bytes) -> Self {
        Self(value)
    }
}

impl From<Vec<u8>> for BytesMessage {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

/// Selects a format through channel metadata or configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    Json,
    MsgPack,
    Bytes,
}

impl FormatKind {
    /// Format used when nothing was requested: bytes for [`BytesMessage`],
    /// JSON for everything else.
    #[must_use]
    pub fn default_for<M: 'static>() -> Self {
        if TypeId::of::<M>() == TypeId::of::<BytesMessage>() {
            Self::Bytes
        } else {
            Self::Json
        }
    }

    /// Builds the format stage for messages of type `M`.
    ///
    /// [`FormatKind::Bytes`] only accepts [`BytesMessage`]; for any other `M`
    /// the returned stage is rejected when appended to a `Pipeline<M, _>`.
    #[must_use]
    pub fn operation<M: Message>(self) -> Arc<dyn AnyOperation> {
        match self {
            Self::Json => erase(JsonFormat::<M>::new()),
            Self::MsgPack => erase(MsgPackFormat::<M>::new()),
            Self::Bytes => erase(BytesFormat),
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::MsgPack => "msgpack",
            Self::Bytes => "bytes",
        })
    }
}

/// JSON encoding via `serde_json`.
pub struct JsonFormat<M> {
    _message: PhantomData<fn() -> M>,
}

impl<M> JsonFormat<M> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            _message: PhantomData,
        }
    }
}

impl<M> Default for JsonFormat<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Message> Operation for JsonFormat<M> {
    type Input = M;
    type Output = Bytes;

    fn name(&self) -> &str {
        "json"
    }

    fn execute(&self, input: M) -> Result<Bytes, OperationError> {
        serde_json::to_vec(&input)
            .map(Bytes::from)
            .map_err(|e| OperationError::codec(self.name(), "encode failed", e))
    }

    fn execute_inverse(&self, output: Bytes) -> Result<M, OperationError> {
        serde_json::from_slice(&output)
            .map_err(|e| OperationError::codec(self.name(), "decode failed", e))
    }
}

/// MessagePack encoding via `rmp-serde`, with named struct fields.
pub struct MsgPackFormat<M> {
    _message: PhantomData<fn() -> M>,
}

impl<M> MsgPackFormat<M> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            _message: PhantomData,
        }
    }
}

impl<M> Default for MsgPackFormat<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Message> Operation for MsgPackFormat<M> {
    type Input = M;
    type Output = Bytes;

    fn name(&self) -> &str {
        "msgpack"
    }

    fn execute(&self, input: M) -> Result<Bytes, OperationError> {
        rmp_serde::to_vec_named(&input)
            .map(Bytes::from)
            .map_err(|e| OperationError::codec(self.name(), "encode failed", e))
    }

    fn execute_inverse(&self, output: Bytes) -> Result<M, OperationError> {
        rmp_serde::from_slice(&output)
            .map_err(|e| OperationError::codec(self.name(), "decode failed", e))
    }
}

/// Passes [`BytesMessage`] payloads through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesFormat;

impl Operation for BytesFormat {
    type Input = BytesMessage;
    type Output = Bytes;

    fn name(&self) -> &str {
        "bytes"
    }

    fn execute(&self, input: BytesMessage) -> Result<Bytes, OperationError> {
        Ok(input.0)
    }

    fn execute_inverse(&self, output: Bytes) -> Result<BytesMessage, OperationError> {
        Ok(BytesMessage(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Reading {
        a: String,
        b: i32,
    }

    fn reading() -> Reading {
        Reading {
            a: "hi".to_string(),
            b: 5,
        }
    }

    #[test]
    fn json_encodes_field_names() {
        let bytes = JsonFormat::<Reading>::new().execute(reading()).unwrap();
        assert_eq!(&bytes[..], br#"{"a":"hi","b":5}"#);
        let back = JsonFormat::<Reading>::new().execute_inverse(bytes).unwrap();
        assert_eq!(back, reading());
    }

    #[test]
    fn json_decode_failure_is_codec_error() {
        let err = JsonFormat::<Reading>::new()
            .execute_inverse(Bytes::from_static(b"{not json"))
            .unwrap_err();
        assert!(matches!(err, OperationError::Failed { source: Some(_), .. }));
    }

    #[test]
    fn msgpack_round_trip() {
        let format = MsgPackFormat::<Reading>::new();
        let bytes = format.execute(reading()).unwrap();
        assert_eq!(format.execute_inverse(bytes).unwrap(), reading());
    }

    #[test]
    fn bytes_format_is_passthrough() {
        let message = BytesMessage::new(vec![1_u8, 2, 3]);
        let bytes = BytesFormat.execute(message.clone()).unwrap();
        assert_eq!(&bytes[..], &[1, 2, 3]);
        assert_eq!(BytesFormat.execute_inverse(bytes).unwrap(), message);
    }

    #[test]
    fn default_format_depends_on_message_type() {
        assert_eq!(FormatKind::default_for::<BytesMessage>(), FormatKind::Bytes);
        assert_eq!(FormatKind::default_for::<Reading>(), FormatKind::Json);
    }

    #[test]
    fn format_kind_builds_pipeline_stage() {
        let pipeline = Pipeline::<Reading, Bytes>::new()
            .append_all([FormatKind::MsgPack.operation::<Reading>()])
            .unwrap();
        let bytes = pipeline.execute(reading()).unwrap();
        assert_eq!(pipeline.execute_inverse(bytes).unwrap(), reading());
    }

    #[test]
    fn bytes_kind_rejects_structured_messages() {
        let err = Pipeline::<Reading, Bytes>::new()
            .append_all([FormatKind::Bytes.operation::<Reading>()])
            .unwrap_err();
        assert!(matches!(err, crate::error::PipelineError::Creation { .. }));
    }

    #[test]
    fn format_kind_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&FormatKind::MsgPack).unwrap(), "\"msgpack\"");
        let kind: FormatKind = serde_json::from_str("\"bytes\"").unwrap();
        assert_eq!(kind, FormatKind::Bytes);
    }
}
