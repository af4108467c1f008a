//! SHA-256 helpers and the integrity operations built on them.
//!
//! [`fingerprint`] gives a stable identity to any serializable value: the
//! hex SHA-256 of the MessagePack encoding of its canonical form. The
//! request/response layer derives reply channel names from it, so a value
//! and its decoded copy must agree.

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{FingerprintError, OperationError};
use crate::operation::Operation;

/// Length in bytes of a SHA-256 digest.
pub const DIGEST_LEN: usize = 32;

/// Raw SHA-256 digest of `data`.
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Lowercase hex SHA-256 digest of `data`.
///
/// ```
/// use conduit_core::hash::sha256_hex;
///
/// assert_eq!(
///     sha256_hex(b""),
///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
/// );
/// ```
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Hex SHA-256 of the MessagePack encoding of `value`'s canonical form.
///
/// The canonical form is the `serde_json::Value` of `value`, whose maps are
/// key-ordered, so hash maps fingerprint the same whatever their iteration
/// order. Sequences keep their order.
///
/// # Errors
///
/// Returns [`FingerprintError::Canonical`] if `value` has no JSON form, e.g.
/// a map with non-scalar keys.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<String, FingerprintError> {
    let canonical = serde_json::to_value(value).map_err(FingerprintError::Canonical)?;
    let bytes = rmp_serde::to_vec_named(&canonical).map_err(FingerprintError::Encode)?;
    Ok(sha256_hex(&bytes))
}

/// Appends a SHA-256 digest of the payload; the inverse verifies and strips it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumOperation;

impl Operation for ChecksumOperation {
    type Input = Bytes;
    type Output = Bytes;

    fn name(&self) -> &str {
        "checksum"
    }

    fn execute(&self, input: Bytes) -> Result<Bytes, OperationError> {
        let mut framed = BytesMut::with_capacity(input.len() + DIGEST_LEN);
        framed.extend_from_slice(&input);
        framed.extend_from_slice(&sha256(&input));
        Ok(framed.freeze())
    }

    fn execute_inverse(&self, mut output: Bytes) -> Result<Bytes, OperationError> {
        if output.len() < DIGEST_LEN {
            return Err(OperationError::failed(
                self.name(),
                format!(
                    "frame of {} bytes is shorter than its {DIGEST_LEN}-byte digest",
                    output.len()
                ),
            ));
        }
        let digest = output.split_off(output.len() - DIGEST_LEN);
        if sha256(&output)[..] != digest[..] {
            return Err(OperationError::failed(self.name(), "digest mismatch"));
        }
        Ok(output)
    }
}

/// One-way SHA-256 of the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestOperation;

impl Operation for DigestOperation {
    type Input = Bytes;
    type Output = Bytes;

    fn name(&self) -> &str {
        "digest"
    }

    fn execute(&self, input: Bytes) -> Result<Bytes, OperationError> {
        Ok(Bytes::copy_from_slice(&sha256(&input)))
    }
}
