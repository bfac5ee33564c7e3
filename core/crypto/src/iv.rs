//! Initialization vector construction.
//!
//! Every IV is laid out as
//!
//! ```text
//! [random bytes][device id bytes][counter, 8 bytes big-endian]
//! ```
//!
//! Uniqueness under a key rests on the (device id, counter) pair; the random
//! prefix keeps the IV unpredictable. Reusing an IV with the same key breaks
//! both confidentiality and integrity of GCM, so the counter is an owned,
//! injected source that refuses to wrap rather than a number the caller
//! passes around.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::keys::fill_random;
use streamseal_common::{DeviceId, Error, Result};

/// Width of the counter encoding in bytes.
pub const COUNTER_LEN: usize = 8;

/// Build an IV of `iv_len_bits` bits from randomness, a device id and a counter.
///
/// # Preconditions
/// - `iv_len_bits` is a multiple of 8
/// - `iv_len_bits / 8 - device_id.len() - 8 > 0`
///
/// # Errors
/// - `InvalidIvConstruction` if the preconditions do not hold; the device id
///   is never truncated
/// - `RandomSource` if the CSPRNG fails
pub fn build_iv(device_id: &[u8], counter: u64, iv_len_bits: usize) -> Result<Vec<u8>> {
    let invalid = || Error::InvalidIvConstruction {
        iv_len_bits,
        device_id_len: device_id.len(),
    };
    if iv_len_bits % 8 != 0 {
        return Err(invalid());
    }
    let iv_len = iv_len_bits / 8;
    let random_len = iv_len
        .checked_sub(device_id.len() + COUNTER_LEN)
        .filter(|&n| n > 0)
        .ok_or_else(invalid)?;

    let mut iv = Vec::new();
    iv.try_reserve_exact(iv_len)?;
    iv.resize(random_len, 0);
    fill_random(&mut iv)?;
    iv.extend_from_slice(device_id);
    iv.extend_from_slice(&counter.to_be_bytes());

    debug_assert_eq!(iv.len(), iv_len);
    Ok(iv)
}

/// A source of strictly increasing counter values.
pub trait CounterSource: Send + Sync {
    /// Take the next value. Two calls never return the same value.
    ///
    /// # Errors
    /// - `CounterExhausted` once the value space is used up
    fn next_value(&self) -> Result<u64>;
}

/// In-process counter backed by an atomic.
///
/// Seed it from durable state (for example the last value persisted by the
/// caller plus one) so that restarts do not replay values.
#[derive(Debug)]
pub struct MonotonicCounter {
    next: AtomicU64,
}

impl MonotonicCounter {
    /// Create a counter whose first value is `start`.
    pub fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// The value the next call to `next_value` will return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

impl CounterSource for MonotonicCounter {
    fn next_value(&self) -> Result<u64> {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_add(1))
            .map_err(|v| Error::CounterExhausted(format!("counter reached {}", v)))
    }
}

/// Builds fresh IVs for one device.
pub struct IvBuilder {
    device_id: DeviceId,
    counter: Box<dyn CounterSource>,
}

impl IvBuilder {
    /// Create a builder for `device_id` drawing counter values from `counter`.
    pub fn new(device_id: DeviceId, counter: impl CounterSource + 'static) -> Self {
        Self {
            device_id,
            counter: Box::new(counter),
        }
    }

    /// The device id embedded in every IV.
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Check that an IV of `iv_len_bits` can be built for this device.
    ///
    /// Does not consume a counter value.
    pub fn check_fits(&self, iv_len_bits: usize) -> Result<()> {
        let fits = iv_len_bits % 8 == 0 && iv_len_bits / 8 > self.device_id.len() + COUNTER_LEN;
        if !fits {
            return Err(Error::InvalidIvConstruction {
                iv_len_bits,
                device_id_len: self.device_id.len(),
            });
        }
        Ok(())
    }

    /// Build the next IV, consuming one counter value.
    pub fn next_iv(&self, iv_len_bits: usize) -> Result<Vec<u8>> {
        self.check_fits(iv_len_bits)?;
        let counter = self.counter.next_value()?;
        debug!(device = %self.device_id, counter, iv_len_bits, "Building IV");
        build_iv(self.device_id.as_bytes(), counter, iv_len_bits)
    }
}

impl std::fmt::Debug for IvBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IvBuilder")
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_iv_layout() {
        let iv = build_iv(b"Ncho12345", 12345, 512).unwrap();

        assert_eq!(iv.len(), 64);
        assert_eq!(&iv[64 - 8 - 9..64 - 8], b"Ncho12345");
        assert_eq!(&iv[56..], &12345u64.to_be_bytes());
    }

    #[test]
    fn test_build_iv_random_prefix_differs() {
        let a = build_iv(b"dev", 1, 512).unwrap();
        let b = build_iv(b"dev", 1, 512).unwrap();
        assert_ne!(a[..53], b[..53]);
        assert_eq!(a[53..], b[53..]);
    }

    #[test]
    fn test_build_iv_minimum_random_byte() {
        // 96 bits = 12 bytes: 3-byte id + 8-byte counter leaves one random byte.
        assert_eq!(build_iv(b"abc", 0, 96).unwrap().len(), 12);
        // 4-byte id leaves none.
        assert!(matches!(
            build_iv(b"abcd", 0, 96),
            Err(Error::InvalidIvConstruction { .. })
        ));
    }

    #[test]
    fn test_build_iv_rejects_oversized_id() {
        let id = vec![b'x'; 100];
        assert!(build_iv(&id, 0, 512).is_err());
    }

    #[test]
    fn test_build_iv_rejects_partial_bytes() {
        assert!(build_iv(b"a", 0, 100).is_err());
    }

    #[test]
    fn test_monotonic_counter() {
        let counter = MonotonicCounter::starting_at(5);
        assert_eq!(counter.next_value().unwrap(), 5);
        assert_eq!(counter.next_value().unwrap(), 6);
        assert_eq!(counter.peek(), 7);
    }

    #[test]
    fn test_monotonic_counter_exhaustion() {
        let counter = MonotonicCounter::starting_at(u64::MAX - 1);
        assert_eq!(counter.next_value().unwrap(), u64::MAX - 1);
        assert!(matches!(
            counter.next_value(),
            Err(Error::CounterExhausted(_))
        ));
        // Stays exhausted, never wraps to zero.
        assert!(counter.next_value().is_err());
    }

    #[test]
    fn test_iv_builder_consumes_counter() {
        let builder = IvBuilder::new(
            "Ncho12345".parse().unwrap(),
            MonotonicCounter::starting_at(12345),
        );
        let first = builder.next_iv(512).unwrap();
        let second = builder.next_iv(512).unwrap();

        assert_eq!(&first[56..], &12345u64.to_be_bytes());
        assert_eq!(&second[56..], &12346u64.to_be_bytes());
    }

    #[test]
    fn test_iv_builder_check_fits_does_not_consume() {
        let counter = MonotonicCounter::starting_at(1);
        let builder = IvBuilder::new("long-device-name".parse().unwrap(), counter);

        assert!(builder.check_fits(128).is_err());
        assert!(builder.next_iv(128).is_err());
        let iv = builder.next_iv(512).unwrap();
        assert_eq!(&iv[56..], &1u64.to_be_bytes());
    }
}
