use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::LibraryIndex;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::LibraryError;

/// Holds the committed index snapshot.
///
/// Readers clone an `Arc` under a lock that is only ever held for the
/// pointer swap, so a running scan never blocks them. Writers queue on a
/// separate mutex for the whole build-and-commit.
pub struct IndexStore {
    current: RwLock<Option<Arc<LibraryIndex>>>,
    writer: Mutex<()>,
    recovery_path: PathBuf,
}

impl IndexStore {
    pub fn new(recovery_path: PathBuf) -> Self {
        Self {
            current: RwLock::new(None),
            writer: Mutex::new(()),
            recovery_path,
        }
    }

    pub fn recovery_path(&self) -> &Path {
        &self.recovery_path
    }

    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }

    /// Latest committed snapshot. Before the first commit this falls back to
    /// the recovery file, then to an empty index.
    pub fn read(&self) -> Arc<LibraryIndex> {
        if let Some(snapshot) = self.current.read().clone() {
            return snapshot;
        }

        let recovered = match self.load_from_disk() {
            Ok(index) => Arc::new(index),
            Err(err) => {
                debug!("No recovery index at {:?}: {}", self.recovery_path, err);
                return Arc::new(LibraryIndex::new());
            }
        };
        let mut guard = self.current.write();
        match guard.as_ref() {
            Some(snapshot) => Arc::clone(snapshot),
            None => {
                *guard = Some(Arc::clone(&recovered));
                recovered
            }
        }
    }

    pub fn replace(&self, index: LibraryIndex) -> Arc<LibraryIndex> {
        let _writer = self.writer.lock();
        self.swap(index)
    }

    /// Builds a new snapshot while holding the writer lock, commits it and
    /// writes the recovery file. A failed build commits nothing.
    pub fn rebuild<F>(&self, build: F) -> Result<Arc<LibraryIndex>, LibraryError>
    where
        F: FnOnce() -> Result<LibraryIndex, LibraryError>,
    {
        let _writer = self.writer.lock();
        let snapshot = self.swap(build()?);
        if let Err(err) = write_recovery(&self.recovery_path, &snapshot) {
            warn!("Failed to write recovery index {:?}: {}", self.recovery_path, err);
        }
        Ok(snapshot)
    }

    pub fn persist(&self) -> Result<(), LibraryError> {
        let snapshot = match self.current.read().clone() {
            Some(snapshot) => snapshot,
            None => return Ok(()),
        };
        write_recovery(&self.recovery_path, &snapshot)
    }

    pub fn load_from_disk(&self) -> Result<LibraryIndex, LibraryError> {
        let contents = fs::read(&self.recovery_path)?;
        Ok(serde_json::from_slice(&contents)?)
    }

    fn swap(&self, index: LibraryIndex) -> Arc<LibraryIndex> {
        let snapshot = Arc::new(index);
        *self.current.write() = Some(Arc::clone(&snapshot));
        snapshot
    }
}

fn write_recovery(path: &Path, index: &LibraryIndex) -> Result<(), LibraryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, serde_json::to_vec(index)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
