use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use common::{join_relpath, relpath_segments};
use metadata::TagBackend;
use parking_lot::Mutex;
use tracing::warn;

use crate::LibraryError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artwork {
    pub data: Bytes,
    pub mime: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArtworkResult {
    Present(Artwork),
    Absent,
    NotFound,
}

#[derive(Clone, Debug)]
enum CacheEntry {
    Present(Artwork),
    Absent,
    /// The container could not be parsed; re-reading will not help.
    Failed(String),
}

/// Memoised embedded artwork keyed by relative path.
///
/// Only the table itself is locked; extraction runs outside the lock so
/// lookups for different files proceed in parallel.
pub struct ArtworkCache {
    root: PathBuf,
    tags: Arc<dyn TagBackend>,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ArtworkCache {
    pub fn new(root: PathBuf, tags: Arc<dyn TagBackend>) -> Self {
        Self {
            root,
            tags,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, relpath: &str) -> Result<ArtworkResult, LibraryError> {
        let key = match relpath_segments(relpath) {
            Some(parts) => parts.join("/"),
            None => return Ok(ArtworkResult::NotFound),
        };

        let cached = self.entries.lock().get(&key).cloned();
        if let Some(entry) = cached {
            return entry_result(&key, entry);
        }

        let path = join_relpath(&self.root, &key);
        if !path.is_file() {
            return Ok(ArtworkResult::NotFound);
        }

        let entry = match self.tags.read_artwork(&path) {
            Ok(Some(cover)) => CacheEntry::Present(Artwork {
                data: Bytes::from(cover.data),
                mime: cover.mime,
            }),
            Ok(None) => CacheEntry::Absent,
            Err(err) if err.is_transient() => {
                warn!("Artwork read failed for {} (will retry): {}", key, err);
                return Err(LibraryError::ExtractionFailed(format!("{}: {}", key, err)));
            }
            Err(err) => {
                warn!("Artwork extraction failed for {}: {}", key, err);
                CacheEntry::Failed(err.to_string())
            }
        };

        self.entries.lock().insert(key.clone(), entry.clone());
        entry_result(&key, entry)
    }

    pub fn invalidate(&self, relpath: &str) -> bool {
        let key = match relpath_segments(relpath) {
            Some(parts) => parts.join("/"),
            None => return false,
        };
        self.entries.lock().remove(&key).is_some()
    }

    /// Drops entries for files that are no longer part of the library.
    pub fn retain_paths(&self, live: &HashSet<String>) {
        self.entries.lock().retain(|key, _| live.contains(key));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn entry_result(key: &str, entry: CacheEntry) -> Result<ArtworkResult, LibraryError> {
    match entry {
        CacheEntry::Present(artwork) => Ok(ArtworkResult::Present(artwork)),
        CacheEntry::Absent => Ok(ArtworkResult::Absent),
        CacheEntry::Failed(message) => {
            Err(LibraryError::ExtractionFailed(format!("{}: {}", key, message)))
        }
    }
}
