//! Symmetric key generation and handling.
//!
//! Keys are zeroized on drop and never printed. The core never persists a
//! key; callers move them around as raw bytes or base64 text.

use rand::{rngs::OsRng, RngCore};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::encoding;
use streamseal_common::{Error, Result};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Default key length in bits.
pub const KEY_BITS: usize = KEY_LENGTH * 8;

/// Fill `buffer` from the operating system CSPRNG.
///
/// # Errors
/// - `RandomSource` if the OS generator is unavailable
pub fn fill_random(buffer: &mut [u8]) -> Result<()> {
    OsRng
        .try_fill_bytes(buffer)
        .map_err(|e| Error::RandomSource(e.to_string()))
}

fn key_byte_len(bit_length: usize) -> Result<usize> {
    if bit_length == 0 || bit_length % 8 != 0 {
        return Err(Error::InvalidInput(format!(
            "key length must be a positive multiple of 8 bits, got {}",
            bit_length
        )));
    }
    Ok(bit_length / 8)
}

/// Generate `bit_length / 8` random bytes.
///
/// # Errors
/// - `InvalidInput` if `bit_length` is zero or not a multiple of 8
/// - `RandomSource` if the CSPRNG fails
pub fn generate_key(bit_length: usize) -> Result<Vec<u8>> {
    let len = key_byte_len(bit_length)?;
    let mut key = Vec::new();
    key.try_reserve_exact(len)?;
    key.resize(len, 0);
    fill_random(&mut key)?;
    Ok(key)
}

/// Write `bit_length / 8` random bytes to the front of `dest`.
///
/// Bytes of `dest` past the key are left untouched, so a caller can keep a
/// terminator or sentinel right after the key region.
///
/// # Returns
/// The number of bytes written.
///
/// # Errors
/// - `InvalidInput` if `dest` is too small or `bit_length` is invalid
/// - `RandomSource` if the CSPRNG fails
pub fn generate_key_into(bit_length: usize, dest: &mut [u8]) -> Result<usize> {
    let len = key_byte_len(bit_length)?;
    if dest.len() < len {
        return Err(Error::InvalidInput(format!(
            "destination holds {} bytes, key needs {}",
            dest.len(),
            len
        )));
    }
    fill_random(&mut dest[..len])?;
    Ok(len)
}

/// AES-256 key for stream encryption.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    key: [u8; KEY_LENGTH],
}

impl SymmetricKey {
    /// Create a key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Create a key from a slice.
    ///
    /// # Errors
    /// - `InvalidKey` if `bytes` is not exactly KEY_LENGTH long
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LENGTH] = bytes.try_into().map_err(|_| {
            Error::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self { key })
    }

    /// Generate a random key.
    ///
    /// # Errors
    /// - `RandomSource` if the CSPRNG fails
    pub fn generate() -> Result<Self> {
        let mut key = [0u8; KEY_LENGTH];
        fill_random(&mut key)?;
        Ok(Self { key })
    }

    /// Parse a key from base64 text.
    ///
    /// # Errors
    /// - `InvalidEncoding` for malformed base64
    /// - `InvalidKey` if the decoded length is wrong
    pub fn from_base64(text: &str) -> Result<Self> {
        let mut raw = encoding::decode(text)?;
        let key = Self::from_slice(&raw);
        raw.zeroize();
        key
    }

    /// Encode the key as base64 text.
    pub fn to_base64(&self) -> String {
        encoding::encode(&self.key)
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}
