//! On-disk persistence for the client snapshot
//!
//! A thin wrapper around one JSON file in the client's configuration
//! directory. The format is whatever the snapshot type serializes to;
//! this layer only guarantees that saving and loading round-trips it.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{PeregrineError, Result};

/// Handle to one named JSON state file inside a directory.
///
/// # Examples
///
/// ```no_run
/// use peregrine::config::Config;
///
/// # fn example() -> peregrine::error::Result<()> {
/// let config = Config::new("/home/user/.config/peregrine", "state");
/// config.save(&vec!["example"])?;
/// let restored: Option<Vec<String>> = config.load()?;
/// assert!(restored.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    path: PathBuf,
}

impl Config {
    /// Creates a handle for `<directory>/<name>.json`.
    pub fn new(directory: impl AsRef<Path>, name: &str) -> Self {
        Self {
            path: directory.as_ref().join(format!("{name}.json")),
        }
    }

    /// The file this handle reads and writes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serializes `value` to the state file, creating the directory when
    /// needed.
    pub fn save<T: Serialize>(&self, value: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(PeregrineError::Io)?;
        }
        let json = serde_json::to_string_pretty(value).map_err(PeregrineError::Serialization)?;
        std::fs::write(&self.path, json).map_err(PeregrineError::Io)?;
        Ok(())
    }

    /// Loads the state file.
    ///
    /// Returns `Ok(None)` when the file does not exist, so first launch
    /// is not an error.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PeregrineError::Io(e).into()),
        };
        let value = serde_json::from_str(&json).map_err(PeregrineError::Serialization)?;
        Ok(Some(value))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path(), "state");
        let restored: Option<Vec<u32>> = config.load().unwrap();
        assert!(restored.is_none());
    }

    #[test]
    fn test_save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path(), "state");

        let value = vec![("a".to_string(), 1u64), ("b".to_string(), 2u64)];
        config.save(&value).unwrap();

        let restored: Option<Vec<(String, u64)>> = config.load().unwrap();
        assert_eq!(restored, Some(value));
    }

    #[test]
    fn test_save_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("deeply").join("nested");
        let config = Config::new(&nested, "state");
        config.save(&42u8).unwrap();
        assert!(nested.join("state.json").exists());
    }

    #[test]
    fn test_load_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path(), "state");
        std::fs::write(config.path(), "{not json").unwrap();
        let result: Result<Option<u8>> = config.load();
        assert!(result.is_err());
    }
}
