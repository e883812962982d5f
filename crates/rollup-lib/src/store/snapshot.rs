//! JSON snapshots written atomically through a temp file and rename

use crate::error::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;

/// Write `value` to `path`, replacing any previous snapshot
pub fn save<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_vec(value)?;

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;
    file.write_all(&json)?;
    file.sync_all()?;

    std::fs::rename(&temp_path, path)?;
    debug!(path = %path.display(), bytes = json.len(), "Snapshot written");
    Ok(())
}

/// Read a snapshot, `None` when the file does not exist yet
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }

    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;
    Ok(Some(serde_json::from_slice(&data)?))
}
