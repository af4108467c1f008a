//! Error types for type tokens, operations, pipelines, metadata and URIs.

use std::error::Error as StdError;
use std::time::Duration;

/// Boxed cause carried by codec and transformation failures.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors raised when a type token cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeTokenError {
    /// `tree` was called without any type arguments.
    #[error("ambiguous type capture: `{parent}` given no type arguments")]
    MissingArguments { parent: String },
    /// `tree` was called with a parent that is not a concrete raw type.
    #[error("ambiguous type capture: `{parent}` is not a concrete raw type")]
    NonConcreteParent { parent: String },
}

/// Failure of a single [`Operation`](crate::Operation) step.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    /// The operation has no inverse direction.
    #[error("operation `{operation}` is not invertible")]
    NotInvertible { operation: String },
    /// The value handed to the operation is not of its declared type.
    #[error("operation `{operation}` expected a value of type `{expected}`")]
    TypeMismatch {
        operation: String,
        expected: &'static str,
    },
    /// The operation rejected the value (malformed bytes, failed check, ...).
    #[error("operation `{operation}` failed: {reason}")]
    Failed {
        operation: String,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl OperationError {
    /// Failure without an underlying cause.
    pub fn failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            operation: operation.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Failure wrapping a codec (serializer/deserializer) error.
    pub fn codec<E>(operation: impl Into<String>, reason: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Failed {
            operation: operation.into(),
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns true if this error signals a missing inverse rather than a bad value.
    #[must_use]
    pub fn is_not_invertible(&self) -> bool {
        matches!(self, Self::NotInvertible { .. })
    }
}

/// Failure to build or run a [`Pipeline`](crate::Pipeline).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The operation chain does not type-check, or the pipeline is incomplete.
    #[error("pipeline creation failed: {reason}")]
    Creation { reason: String },
    /// A stage failed while executing, in either direction.
    #[error("pipeline stage {stage} (`{operation}`) failed")]
    Execution {
        stage: usize,
        operation: String,
        #[source]
        source: OperationError,
    },
    /// A stage cannot run in the inverse direction.
    #[error("pipeline stage {stage} (`{operation}`) does not support the inverse direction")]
    InverseUnsupported { stage: usize, operation: String },
}

impl PipelineError {
    pub(crate) fn creation(reason: impl Into<String>) -> Self {
        Self::Creation {
            reason: reason.into(),
        }
    }
}

/// Invalid channel metadata value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    #[error(
        "frequency must satisfy minimum <= average <= maximum (got {minimum:?}, {average:?}, {maximum:?})"
    )]
    InvalidFrequency {
        minimum: Duration,
        average: Duration,
        maximum: Duration,
    },
}

/// Malformed channel URI.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UriError {
    #[error("channel URI `{uri}` has no scheme")]
    MissingScheme { uri: String },
    #[error("channel URI `{uri}` has an invalid scheme")]
    InvalidScheme { uri: String },
    #[error("channel URI `{uri}` has an empty path")]
    EmptyPath { uri: String },
}

/// Failure to fingerprint a value.
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    /// The value has no canonical form (e.g. a map keyed by a struct).
    #[error("value has no canonical form")]
    Canonical(#[source] serde_json::Error),
    #[error("canonical value cannot be encoded")]
    Encode(#[source] rmp_serde::encode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_error_preserves_source() {
        let json_err = serde_json::from_slice::<u32>(b"nope").unwrap_err();
        let err = OperationError::codec("json", "decode failed", json_err);
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "operation `json` failed: decode failed");
    }

    #[test]
    fn execution_error_chains_operation_error() {
        let err = PipelineError::Execution {
            stage: 2,
            operation: "checksum".to_string(),
            source: OperationError::failed("checksum", "digest mismatch"),
        };
        let cause = err.source().expect("operation error is the source");
        assert_eq!(cause.to_string(), "operation `checksum` failed: digest mismatch");
    }

    #[test]
    fn not_invertible_is_detectable() {
        let err = OperationError::NotInvertible {
            operation: "digest".to_string(),
        };
        assert!(err.is_not_invertible());
        assert!(!OperationError::failed("x", "y").is_not_invertible());
    }
}
