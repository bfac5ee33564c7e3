//! Streaming authenticated encryption for StreamSeal.
//!
//! This module provides:
//! - AES-256 key generation from the OS CSPRNG
//! - IV construction from randomness, a device id and a monotonic counter
//! - Framed AES-256-GCM streams with variable-length IVs and tags
//! - Commit/discard sinks so unauthenticated plaintext is never released
//!
//! # Security Guarantees
//! - Key material is zeroized on drop
//! - No plaintext or key material is ever logged
//! - Tags are compared in constant time

pub mod config;
pub mod encoding;
pub mod frame;
pub mod gcm;
pub mod io;
pub mod iv;
pub mod keys;
pub mod stream;

pub use config::StreamConfig;
pub use frame::StreamHeader;
pub use io::{stdout_sink, ByteSink, FileSink, MemorySink, Source, SpoolSink, StdoutSink};
pub use iv::{build_iv, CounterSource, IvBuilder, MonotonicCounter};
pub use keys::{generate_key, generate_key_into, SymmetricKey, KEY_BITS, KEY_LENGTH};
pub use stream::{
    decrypt_bytes, decrypt_file, encrypt_bytes, encrypt_file, inspect, Decryptor, Encryptor,
};
