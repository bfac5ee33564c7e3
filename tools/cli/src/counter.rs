//! Counter persisted in a small JSON file.
//!
//! Each value is written back to disk before it is handed out, so a crash
//! after reservation can skip a counter value but never reuse one.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use streamseal_common::{DeviceId, Error};
use streamseal_crypto::{ByteSink, CounterSource, FileSink};

/// On-disk layout of a counter file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterState {
    pub device_id: String,
    pub next: u64,
}

/// [`CounterSource`] backed by a JSON file.
#[derive(Debug)]
pub struct FileCounter {
    path: PathBuf,
    state: Mutex<CounterState>,
}

impl FileCounter {
    /// Load the counter at `path`, or start a new one at zero.
    ///
    /// A new file needs `device_id`. An existing file must agree with
    /// `device_id` when one is given.
    pub fn open(path: &Path, device_id: Option<&str>) -> Result<Self> {
        let state = match fs::read(path) {
            Ok(bytes) => {
                let state: CounterState = serde_json::from_slice(&bytes)
                    .with_context(|| format!("Invalid counter file {}", path.display()))?;
                if let Some(id) = device_id {
                    if id != state.device_id {
                        anyhow::bail!(
                            "Counter file {} belongs to device '{}', not '{}'",
                            path.display(),
                            state.device_id,
                            id
                        );
                    }
                }
                state
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let device_id = device_id.with_context(|| {
                    format!(
                        "Counter file {} does not exist; --device-id is required to create it",
                        path.display()
                    )
                })?;
                let state = CounterState {
                    device_id: device_id.to_string(),
                    next: 0,
                };
                persist(path, &state)?;
                debug!(path = %path.display(), "Created counter file");
                state
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read counter file {}", path.display()))
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(state),
        })
    }

    /// Device id recorded in the file.
    pub fn device_id(&self) -> Result<DeviceId> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("Counter state lock poisoned"))?;
        Ok(state.device_id.parse::<DeviceId>()?)
    }

    /// Value the next reservation will return.
    pub fn peek(&self) -> Result<u64> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("Counter state lock poisoned"))?;
        Ok(state.next)
    }
}

impl CounterSource for FileCounter {
    fn next_value(&self) -> streamseal_common::Result<u64> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::InvalidInput("counter state lock poisoned".into()))?;
        let value = state.next;
        let advanced = CounterState {
            device_id: state.device_id.clone(),
            next: value.checked_add(1).ok_or_else(|| {
                Error::CounterExhausted(format!("{} has no values left", self.path.display()))
            })?,
        };
        persist(&self.path, &advanced).map_err(|e| match e.downcast::<Error>() {
            Ok(inner) => inner,
            Err(other) => Error::Io(std::io::Error::other(other.to_string())),
        })?;
        *state = advanced;
        debug!(counter = value, path = %self.path.display(), "Reserved counter value");
        Ok(value)
    }
}

fn persist(path: &Path, state: &CounterState) -> Result<()> {
    let json = serde_json::to_vec_pretty(state)?;
    let mut sink = FileSink::create(path)?;
    sink.write_all(&json)?;
    sink.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_counter_starts_at_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counter.json");

        let counter = FileCounter::open(&path, Some("laptop")).unwrap();

        assert_eq!(counter.peek().unwrap(), 0);
        assert_eq!(counter.next_value().unwrap(), 0);
        assert_eq!(counter.next_value().unwrap(), 1);
        assert_eq!(counter.device_id().unwrap().as_bytes(), b"laptop");
    }

    #[test]
    fn test_counter_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counter.json");

        let counter = FileCounter::open(&path, Some("laptop")).unwrap();
        counter.next_value().unwrap();
        counter.next_value().unwrap();
        drop(counter);

        let reopened = FileCounter::open(&path, None).unwrap();
        assert_eq!(reopened.next_value().unwrap(), 2);

        let state: CounterState =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(
            state,
            CounterState {
                device_id: "laptop".into(),
                next: 3
            }
        );
    }

    #[test]
    fn test_device_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counter.json");
        FileCounter::open(&path, Some("laptop")).unwrap();

        assert!(FileCounter::open(&path, Some("phone")).is_err());
    }

    #[test]
    fn test_missing_file_needs_device() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counter.json");

        assert!(FileCounter::open(&path, None).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_exhausted_counter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counter.json");
        let state = CounterState {
            device_id: "laptop".into(),
            next: u64::MAX,
        };
        fs::write(&path, serde_json::to_vec(&state).unwrap()).unwrap();

        let counter = FileCounter::open(&path, None).unwrap();

        assert!(matches!(
            counter.next_value(),
            Err(Error::CounterExhausted(_))
        ));
    }
}
