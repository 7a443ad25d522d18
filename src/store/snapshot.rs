//! Snapshot Files
//!
//! JSON snapshots of in-memory state, written after each change so a
//! restarted process can pick up where the last one stopped.

use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

/// Loads a snapshot, or the default value when none exists yet.
pub fn load_snapshot<T>(path: &Path) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        debug!("No snapshot at {}, starting empty", path.display());
        return Ok(T::default());
    }

    let content = fs::read_to_string(path)?;
    let value = serde_json::from_str(&content)?;
    info!("Loaded snapshot from {}", path.display());
    Ok(value)
}

/// Writes a snapshot atomically: a temporary file is written, then renamed.
pub fn save_snapshot<T>(path: &Path, value: &T) -> Result<(), StoreError>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
