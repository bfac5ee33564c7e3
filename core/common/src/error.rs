//! Common error types for StreamSeal.

use thiserror::Error;

/// Top-level error type for StreamSeal operations.
///
/// Every variant is terminal for the call that produced it. Nothing in the
/// library retries; callers decide whether to try again (for example with a
/// fresh counter value).
#[derive(Debug, Error)]
pub enum Error {
    /// A buffer could not be allocated.
    #[error("Allocation failed: {0}")]
    Allocation(String),

    /// The platform CSPRNG could not produce bytes.
    #[error("Random source unavailable: {0}")]
    RandomSource(String),

    /// The device identifier and counter do not fit in the requested IV length.
    #[error(
        "Invalid IV construction: {iv_len_bits}-bit IV cannot hold a {device_id_len}-byte device id, \
         an 8-byte counter and at least one random byte"
    )]
    InvalidIvConstruction {
        iv_len_bits: usize,
        device_id_len: usize,
    },

    /// The clear header or the encrypted length header could not be parsed.
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// The stream declares an IV shorter than 96 bits.
    #[error("IV too short: {bits} bits (minimum 96)")]
    IvTooShort { bits: usize },

    /// The source ended before the expected number of bytes was read.
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: u64, actual: u64 },

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The authentication tag did not verify.
    #[error("Authentication failed: ciphertext, header, AAD or tag has been modified")]
    AuthenticationFailure,

    /// Text could not be decoded as base64.
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Key material has the wrong shape.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Stream parameters are out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The IV counter has no values left.
    #[error("Counter exhausted for device {0}")]
    CounterExhausted(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether this error means the data itself failed integrity checks.
    ///
    /// Callers that retry on transient failures must never retry these.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Error::AuthenticationFailure | Error::MalformedHeader(_) | Error::IvTooShort { .. }
        )
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(e: std::collections::TryReserveError) -> Self {
        Error::Allocation(e.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_failures() {
        assert!(Error::AuthenticationFailure.is_integrity_failure());
        assert!(Error::IvTooShort { bits: 64 }.is_integrity_failure());
        assert!(Error::MalformedHeader("x".into()).is_integrity_failure());
        assert!(!Error::ShortRead {
            expected: 4,
            actual: 2
        }
        .is_integrity_failure());
    }

    #[test]
    fn test_try_reserve_maps_to_allocation() {
        let mut v: Vec<u8> = Vec::new();
        let err = v.try_reserve(usize::MAX).unwrap_err();
        assert!(matches!(Error::from(err), Error::Allocation(_)));
    }

    #[test]
    fn test_display_mentions_sizes() {
        let msg = Error::InvalidIvConstruction {
            iv_len_bits: 128,
            device_id_len: 9,
        }
        .to_string();
        assert!(msg.contains("128-bit"));
        assert!(msg.contains("9-byte"));
    }
}
