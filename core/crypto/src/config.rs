//! Stream parameters.

use serde::{Deserialize, Serialize};

use crate::frame::{MAX_IV_BITS, MAX_TAG_LEN, MIN_IV_BITS, MIN_TAG_LEN};
use streamseal_common::{Error, Result};

/// Default IV length in bits.
pub const DEFAULT_IV_BITS: usize = 512;

/// Default authentication tag length in bytes.
pub const DEFAULT_TAG_LEN: usize = 16;

/// Default chunk size for streaming (1 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Parameters shared by the encryptor and decryptor.
///
/// The defaults are the interoperability defaults; any reader of the format
/// handles them. `iv_len_bits` and `tag_len` travel in the stream header, so
/// a decryptor only uses `chunk_size` from its own configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// IV length in bits.
    pub iv_len_bits: usize,
    /// Authentication tag length in bytes.
    pub tag_len: usize,
    /// Plaintext bytes processed per I/O step.
    pub chunk_size: usize,
}

impl StreamConfig {
    /// Set the IV length in bits.
    pub fn with_iv_len_bits(mut self, bits: usize) -> Self {
        self.iv_len_bits = bits;
        self
    }

    /// Set the tag length in bytes.
    pub fn with_tag_len(mut self, len: usize) -> Self {
        self.tag_len = len;
        self
    }

    /// Set the chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Check the parameters are usable.
    ///
    /// # Errors
    /// - `InvalidConfig` if the IV is outside 96..=65536 bits or not whole bytes,
    ///   the tag is outside 12..=16 bytes, or the chunk size is zero
    pub fn validate(&self) -> Result<()> {
        let iv_in_range = (MIN_IV_BITS..=MAX_IV_BITS).contains(&self.iv_len_bits);
        if !iv_in_range || self.iv_len_bits % 8 != 0 {
            return Err(Error::InvalidConfig(format!(
                "iv_len_bits must be a multiple of 8 in {}..={}, got {}",
                MIN_IV_BITS, MAX_IV_BITS, self.iv_len_bits
            )));
        }
        if !(MIN_TAG_LEN..=MAX_TAG_LEN).contains(&self.tag_len) {
            return Err(Error::InvalidConfig(format!(
                "tag_len must be between {} and {} bytes, got {}",
                MIN_TAG_LEN, MAX_TAG_LEN, self.tag_len
            )));
        }
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            iv_len_bits: DEFAULT_IV_BITS,
            tag_len: DEFAULT_TAG_LEN,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StreamConfig::default();
        assert_eq!(config.iv_len_bits, 512);
        assert_eq!(config.tag_len, 16);
        assert_eq!(config.chunk_size, 1024);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = StreamConfig::default();
        assert!(base.with_iv_len_bits(64).validate().is_err());
        assert!(base.with_iv_len_bits(100).validate().is_err());
        assert!(base.with_iv_len_bits(MAX_IV_BITS + 8).validate().is_err());
        assert!(base.with_tag_len(8).validate().is_err());
        assert!(base.with_tag_len(17).validate().is_err());
        assert!(base.with_chunk_size(0).validate().is_err());
        base.with_iv_len_bits(96).with_tag_len(12).validate().unwrap();
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: StreamConfig = serde_json::from_str(r#"{"chunk_size": 4096}"#).unwrap();
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.iv_len_bits, DEFAULT_IV_BITS);
        assert_eq!(config.tag_len, DEFAULT_TAG_LEN);
    }
}
