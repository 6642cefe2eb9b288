use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use takeoff_core::{ImageStore, PageId, TakeoffError, TakeoffResult, TakeoffSnapshot};

const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
    #[error("unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Data directory holding the takeoff snapshot and rendered page images
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    version: u32,
    snapshot: TakeoffSnapshot,
}

impl Storage {
    pub fn from_default_project() -> Result<Self, StorageError> {
        let dirs = ProjectDirs::from("dev", "Takeoff", "Takeoff").ok_or(StorageError::NoDataDirectory)?;

        Ok(Self { root: dirs.data_local_dir().to_path_buf() })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the saved takeoff, or an empty one when nothing was saved yet
    pub fn load_snapshot(&self) -> Result<TakeoffSnapshot, StorageError> {
        let path = self.snapshot_path();
        if !path.exists() {
            return Ok(TakeoffSnapshot::default());
        }

        let bytes = fs::read(path)?;
        let envelope: SnapshotEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != SNAPSHOT_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedVersion {
                found: envelope.version,
                expected: SNAPSHOT_SCHEMA_VERSION,
            });
        }

        Ok(envelope.snapshot)
    }

    /// Write the takeoff atomically (temp file + rename)
    pub fn save_snapshot(&self, snapshot: &TakeoffSnapshot) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;

        let envelope = SnapshotEnvelope { version: SNAPSHOT_SCHEMA_VERSION, snapshot: snapshot.clone() };

        let bytes = serde_json::to_vec_pretty(&envelope)?;
        let path = self.snapshot_path();
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, bytes)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// Store a rendered page image
    pub fn save_page_image(&self, page_id: PageId, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        let path = self.page_image_path(page_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        Ok(path)
    }

    pub fn page_image_path(&self, page_id: PageId) -> PathBuf {
        self.root.join("pages").join(format!("{page_id}.png"))
    }

    fn snapshot_path(&self) -> PathBuf {
        self.root.join("takeoff.json")
    }
}

impl ImageStore for Storage {
    fn page_image(&self, page_id: PageId) -> TakeoffResult<Vec<u8>> {
        let path = self.page_image_path(page_id);
        fs::read(&path).map_err(|error| {
            TakeoffError::DetectionFailure(format!("page image {} unavailable: {error}", path.display()))
        })
    }
}
