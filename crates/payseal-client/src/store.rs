//! Local JSON cache.
//!
//! One directory of JSON files: the persisted session and one record cache
//! per account. Writes are atomic (tmp + rename) with restrictive
//! permissions, so a crash mid-write can never corrupt the last good
//! snapshot.

use std::fs;
use std::path::PathBuf;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{ClientError, Result};

/// File-backed cache rooted at a data directory.
pub struct CacheStore {
    base_dir: PathBuf,
}

impl CacheStore {
    /// Open (and create) the cache directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)
            .map_err(|e| ClientError::Storage(format!("cannot create data directory: {e}")))?;
        Ok(Self { base_dir })
    }

    /// File name of the persisted session.
    pub fn session_file() -> String {
        "session.json".to_string()
    }

    /// File name of an account's record cache. `account_key` is the
    /// lowercased stable account identifier.
    pub fn records_file(account_key: &str) -> String {
        let key = account_key.trim_start_matches("0x");
        format!("records-{key}.json")
    }

    /// Read and parse a JSON file; `None` when it does not exist.
    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.base_dir.join(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ClientError::Storage(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| ClientError::Storage(format!("failed to parse {}: {e}", path.display())))
    }

    /// Serialize and atomically write a JSON file.
    pub fn write_json<T: Serialize>(&self, name: &str, data: &T) -> Result<()> {
        let path = self.base_dir.join(name);
        let content = serde_json::to_string_pretty(data)
            .map_err(|e| ClientError::Storage(format!("failed to serialize: {e}")))?;

        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, &content)
            .map_err(|e| ClientError::Storage(format!("failed to write: {e}")))?;
        fs::rename(&tmp_path, &path)
            .map_err(|e| ClientError::Storage(format!("failed to commit write: {e}")))?;

        set_restrictive_permissions(&path)?;
        Ok(())
    }

    /// Delete a cache file if present.
    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.base_dir.join(name);
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| ClientError::Storage(format!("failed to delete: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn set_restrictive_permissions(path: &PathBuf) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| ClientError::Storage(format!("failed to set file permissions: {e}")))
}

#[cfg(not(unix))]
fn set_restrictive_permissions(_path: &PathBuf) -> Result<()> {
    Ok(())
}
