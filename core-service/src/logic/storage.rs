//! Crash-safe file persistence.
//!
//! Every artifact a run produces (checkpoints, metric history, confusion
//! matrix) is written to a temporary sibling and renamed into place, so a
//! reader only ever sees the previous complete file or the new one.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{DetectorError, DetectorResult};

/// Temporary sibling path for `path` (same directory, so rename is atomic)
pub fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

/// Write `bytes` to a fresh temporary file and fsync it. Nothing visible
/// under the final name changes yet.
pub fn write_staged(path: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = staging_path(path);
    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(tmp)
}

/// Atomically move a staged file over its final name
pub fn promote(staged: &Path, path: &Path) -> io::Result<()> {
    fs::rename(staged, path).map_err(|e| {
        let _ = fs::remove_file(staged);
        e
    })
}

/// Stage + promote in one go
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let staged = write_staged(path, bytes)?;
    promote(&staged, path)
}

/// Save a serde value as pretty JSON, atomically
pub fn save_json<T: Serialize>(value: &T, path: &Path) -> DetectorResult<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &json).map_err(|source| DetectorError::CheckpointIo {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a serde value from JSON
pub fn load_json<T: DeserializeOwned>(path: &Path) -> DetectorResult<T> {
    let data = fs::read(path).map_err(|source| DetectorError::CheckpointIo {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_slice(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        // No temporary leftovers
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_staged_write_is_invisible_until_promoted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value.json");
        write_atomic(&path, b"old").unwrap();

        let staged = write_staged(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"old");

        promote(&staged, &path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert!(!staged.exists());
    }

    #[test]
    fn test_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("values.json");
        save_json(&vec![1.5f32, 2.5], &path).unwrap();
        let loaded: Vec<f32> = load_json(&path).unwrap();
        assert_eq!(loaded, vec![1.5, 2.5]);
    }

    #[test]
    fn test_load_missing_file_is_checkpoint_io() {
        let dir = tempfile::tempdir().unwrap();
        let result: DetectorResult<Vec<f32>> = load_json(&dir.path().join("missing.json"));
        assert!(matches!(result, Err(DetectorError::CheckpointIo { .. })));
    }
}
