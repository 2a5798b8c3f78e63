mod artwork;
mod reorganize;
mod scanner;
mod store;
mod upload;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{join_relpath, relpath_segments, LibraryIndex, Track};
use metadata::{LoftyTags, MetadataError, TagBackend, TagInfo};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use artwork::{Artwork, ArtworkCache, ArtworkResult};
pub use reorganize::{ReassignOutcome, ReassignRequest};
pub use scanner::{index_location, scan, ScanReport};
pub use store::IndexStore;
pub use upload::{upload_destination, UploadFile, UploadReport};

/// Shared handle over the music root, its index snapshot and artwork cache.
#[derive(Clone)]
pub struct Library {
    inner: Arc<LibraryInner>,
}

struct LibraryInner {
    root: PathBuf,
    extensions: Vec<String>,
    store: IndexStore,
    artwork: ArtworkCache,
    tags: Arc<dyn TagBackend>,
    skipped: AtomicUsize,
}

impl Library {
    pub fn open(root: PathBuf, recovery_path: PathBuf, extensions: Vec<String>) -> Self {
        Self::with_backend(root, recovery_path, extensions, Arc::new(LoftyTags))
    }

    pub fn with_backend(
        root: PathBuf,
        recovery_path: PathBuf,
        extensions: Vec<String>,
        tags: Arc<dyn TagBackend>,
    ) -> Self {
        let artwork = ArtworkCache::new(root.clone(), Arc::clone(&tags));
        Self {
            inner: Arc::new(LibraryInner {
                root,
                extensions,
                store: IndexStore::new(recovery_path),
                artwork,
                tags,
                skipped: AtomicUsize::new(0),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn extensions(&self) -> &[String] {
        &self.inner.extensions
    }

    pub fn store(&self) -> &IndexStore {
        &self.inner.store
    }

    pub fn artwork_cache(&self) -> &ArtworkCache {
        &self.inner.artwork
    }

    /// Current snapshot. Never blocks on a running scan.
    pub fn index(&self) -> Arc<LibraryIndex> {
        self.inner.store.read()
    }

    /// Full rebuild of the index from disk. Concurrent callers queue up; a
    /// failed scan leaves the previous snapshot in place.
    pub fn rescan(&self) -> Result<LibraryStats, LibraryError> {
        let root = &self.inner.root;
        let extensions = &self.inner.extensions;
        let mut skipped = 0usize;
        let snapshot = self.inner.store.rebuild(|| {
            let (index, report) = scan(root, extensions)?;
            skipped = report.skipped();
            Ok(index)
        })?;
        self.inner.skipped.store(skipped, Ordering::Relaxed);

        let live: HashSet<String> = snapshot.tracks().map(|track| track.relative_path).collect();
        self.inner.artwork.retain_paths(&live);

        let stats = LibraryStats::from_index(&snapshot, skipped);
        info!(
            "Scan complete: {} artists, {} albums, {} tracks ({} skipped)",
            stats.artists, stats.albums, stats.tracks, stats.skipped
        );
        Ok(stats)
    }

    /// Counts for the current snapshot and the skip count of the last scan.
    pub fn stats(&self) -> LibraryStats {
        LibraryStats::from_index(&self.index(), self.inner.skipped.load(Ordering::Relaxed))
    }

    pub fn artwork(&self, relpath: &str) -> Result<ArtworkResult, LibraryError> {
        self.inner.artwork.get(relpath)
    }

    pub fn reassign(&self, request: &ReassignRequest) -> Result<ReassignOutcome, LibraryError> {
        let relocation = reorganize::relocate(&self.inner.root, self.inner.tags.as_ref(), request)?;
        self.inner.artwork.invalidate(&relocation.old_relpath);

        let reindexed = match self.rescan() {
            Ok(_) => true,
            Err(err) => {
                warn!("Rescan after reassign failed: {}", err);
                false
            }
        };
        Ok(ReassignOutcome {
            relative_path: relocation.new_relpath,
            moved: relocation.moved,
            reindexed,
        })
    }

    /// Stores an upload batch. Overwritten files lose their cached artwork,
    /// and one rescan follows when anything was accepted.
    pub fn store_uploads(&self, files: Vec<UploadFile>) -> UploadReport {
        let (mut report, stored) =
            upload::store_files(&self.inner.root, &self.inner.extensions, files);
        for relpath in &stored {
            self.inner.artwork.invalidate(relpath);
        }
        if report.accepted > 0 {
            match self.rescan() {
                Ok(_) => report.reindexed = true,
                Err(err) => warn!("Rescan after upload failed: {}", err),
            }
        }
        report
    }

    pub fn find_song(&self, filename: &str) -> Option<Track> {
        self.index().find_track(filename)
    }

    pub fn read_track_tags(&self, relpath: &str) -> Result<TagInfo, LibraryError> {
        let path = self.resolve_track_path(relpath)?;
        self.inner
            .tags
            .read_tags(&path)
            .map_err(|err| LibraryError::ExtractionFailed(format!("{}: {}", relpath, err)))
    }

    /// Maps a client-supplied relative path to a regular file that stays
    /// under the music root once symlinks are resolved.
    pub fn resolve_track_path(&self, relpath: &str) -> Result<PathBuf, LibraryError> {
        let not_found = || LibraryError::NotFound(relpath.to_string());
        let parts = relpath_segments(relpath).ok_or_else(not_found)?;
        let path = join_relpath(&self.inner.root, &parts.join("/"));
        let canonical = path.canonicalize().map_err(|_| not_found())?;
        let root = self.inner.root.canonicalize()?;
        if !canonical.starts_with(&root) || !canonical.is_file() {
            return Err(not_found());
        }
        Ok(canonical)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryStats {
    pub artists: usize,
    pub albums: usize,
    pub tracks: usize,
    pub skipped: usize,
}

impl LibraryStats {
    pub fn from_index(index: &LibraryIndex, skipped: usize) -> Self {
        Self {
            artists: index.artist_count(),
            albums: index.album_count(),
            tracks: index.track_count(),
            skipped,
        }
    }
}

#[derive(Debug)]
pub enum LibraryError {
    NotFound(String),
    Conflict(String),
    TagWriteFailed(MetadataError),
    MoveFailed(std::io::Error),
    ExtractionFailed(String),
    ScanFailed(String),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::NotFound(path) => write!(f, "not found: {}", path),
            LibraryError::Conflict(path) => write!(f, "destination already exists: {}", path),
            LibraryError::TagWriteFailed(err) => write!(f, "tag write failed: {}", err),
            LibraryError::MoveFailed(err) => write!(f, "move failed: {}", err),
            LibraryError::ExtractionFailed(message) => {
                write!(f, "artwork extraction failed: {}", message)
            }
            LibraryError::ScanFailed(message) => write!(f, "scan failed: {}", message),
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Json(err) => write!(f, "json error: {}", err),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<serde_json::Error> for LibraryError {
    fn from(err: serde_json::Error) -> Self {
        LibraryError::Json(err)
    }
}
