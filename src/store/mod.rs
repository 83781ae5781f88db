//! Persisted server configuration and environment variables

pub mod config;
pub mod env;

pub use config::{ConfigStore, ServerEntry};
pub use env::EnvStore;

use crate::error::{ManagerError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Read and parse a JSON file, `Ok(None)` if it does not exist
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .map_err(|e| ManagerError::io(format!("reading {}", path.display()), e))?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| ManagerError::ConfigCorrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Replace `path` with the pretty-printed JSON of `value`.
///
/// The content goes to a temporary file in the same directory which is then
/// renamed over the target, so readers see either the old or the new file.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)
        .map_err(|e| ManagerError::io(format!("creating {}", dir.display()), e))?;

    let content = serde_json::to_string_pretty(value).map_err(|e| {
        ManagerError::io(
            format!("serializing {}", path.display()),
            std::io::Error::other(e),
        )
    })?;

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| ManagerError::io(format!("creating temp file in {}", dir.display()), e))?;
    tmp.write_all(content.as_bytes())
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| ManagerError::io(format!("writing {}", path.display()), e))?;
    tmp.persist(path)
        .map_err(|e| ManagerError::io(format!("replacing {}", path.display()), e.error))?;
    Ok(())
}
