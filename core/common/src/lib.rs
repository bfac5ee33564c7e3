//! Common utilities and types shared across StreamSeal crates.
//!
//! This module provides the error taxonomy used by every layer and the
//! identity types that feed IV construction.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::DeviceId;
