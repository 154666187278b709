//! Snapshot Store
//!
//! Persists the last run's snapshot collection as a YAML file.
//! The file is read once at the start of a run and replaced once at the end.

use crate::error::StoreError;
use crate::snapshot::SnapshotCollection;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// File-backed store for the previous run's snapshots
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the previous collection
    ///
    /// Returns `Ok(None)` when the file does not exist (first run). An
    /// existing file that cannot be read or parsed is an error: guessing at
    /// the previous state would produce bogus deltas.
    pub async fn load(&self) -> Result<Option<SnapshotCollection>, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!("No snapshot file at {}, treating as first run", self.path.display());
                return Ok(None);
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        // An empty file parses as "no snapshots", not as an error.
        if contents.trim().is_empty() {
            return Ok(Some(SnapshotCollection::new()));
        }

        let collection: SnapshotCollection =
            serde_yaml::from_str(&contents).map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            })?;

        tracing::debug!(
            "Loaded {} snapshots from {}",
            collection.len(),
            self.path.display()
        );

        Ok(Some(collection))
    }

    /// Replace the stored collection with `collection`
    ///
    /// Writes a sibling temporary file and renames it into place, so the file
    /// is never left half written.
    pub async fn save(&self, collection: &SnapshotCollection) -> Result<(), StoreError> {
        let yaml = serde_yaml::to_string(collection).map_err(StoreError::Serialize)?;

        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, yaml.as_bytes())
            .await
            .map_err(|source| StoreError::Write {
                path: temp_path.clone(),
                source,
            })?;

        if let Err(source) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StoreError::Write {
                path: self.path.clone(),
                source,
            });
        }

        tracing::info!(
            "Saved {} snapshots to {}",
            collection.len(),
            self.path.display()
        );

        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name: OsString = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}
