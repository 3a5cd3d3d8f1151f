//! Persisted stage outputs.
//!
//! Stages talk to an [`ArtifactStore`] by key (`grouped/cell_003.json`,
//! `union.json`, ...). Whether a stage has already run is answered by the
//! store, never by hard-coded paths. A stage directory is complete only once
//! its `_complete` marker exists; cell files found without it are leftovers
//! of an aborted run and are discarded.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{retry_once, Result, SettleError};

const MARKER: &str = "_complete";

pub trait ArtifactStore: Sync {
    fn exists(&self, key: &str) -> bool;
    fn read_bytes(&self, key: &str) -> Result<Vec<u8>>;
    /// Must be atomic: readers see the old artifact or the new one, never a
    /// partial write.
    fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()>;
    /// Remove the artifact or directory at `key`, if any.
    fn remove(&self, key: &str) -> Result<()>;
}

pub fn read_json<T: DeserializeOwned>(store: &dyn ArtifactStore, key: &str) -> Result<T> {
    let bytes = retry_once(|| store.read_bytes(key))?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn write_json<T: Serialize>(store: &dyn ArtifactStore, key: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    retry_once(|| store.write_bytes(key, &bytes))
}

pub fn marker_key(stage: &str) -> String {
    format!("{stage}/{MARKER}")
}

pub fn is_complete(store: &dyn ArtifactStore, stage: &str) -> bool {
    store.exists(&marker_key(stage))
}

pub fn mark_complete(store: &dyn ArtifactStore, stage: &str) -> Result<()> {
    store.write_bytes(&marker_key(stage), b"")
}

/// Artifacts as files under a working directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ArtifactStore for FsArtifactStore {
    fn exists(&self, key: &str) -> bool {
        self.path(key).exists()
    }

    fn read_bytes(&self, key: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.path(key))?)
    }

    fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        let parent = path
            .parent()
            .ok_or_else(|| SettleError::engine(format!("artifact key has no parent: {key}")))?;
        fs::create_dir_all(parent)?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SettleError::engine(format!("bad artifact key: {key}")))?;
        let tmp = parent.join(format!(".{file_name}.tmp"));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path(key);
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

/// Read a JSON input file (footprint layer, raster, config).
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = retry_once(|| Ok(fs::read(path)?))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| SettleError::engine(format!("failed to parse {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn temp_store(name: &str) -> FsArtifactStore {
        let dir = std::env::temp_dir().join(format!("bldg_core_{name}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        FsArtifactStore::new(dir).unwrap()
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: u32,
        name: String,
    }

    #[test]
    fn json_round_trip_and_markers() {
        let store = temp_store("artifact_rt");
        let row = Row { id: 3, name: "x".into() };
        write_json(&store, "grouped/cell_03.json", &row).unwrap();
        assert!(store.exists("grouped/cell_03.json"));
        assert!(!store.exists("grouped/.cell_03.json.tmp"));
        assert_eq!(read_json::<Row>(&store, "grouped/cell_03.json").unwrap(), row);

        assert!(!is_complete(&store, "grouped"));
        mark_complete(&store, "grouped").unwrap();
        assert!(is_complete(&store, "grouped"));

        store.remove("grouped").unwrap();
        assert!(!store.exists("grouped/cell_03.json"));
        assert!(!is_complete(&store, "grouped"));
        fs::remove_dir_all(store.root()).ok();
    }

    #[test]
    fn missing_artifact_is_engine_error() {
        let store = temp_store("artifact_missing");
        let err = read_json::<Row>(&store, "nope.json").unwrap_err();
        assert_eq!(err.kind(), "EngineError");
        fs::remove_dir_all(store.root()).ok();
    }
}
