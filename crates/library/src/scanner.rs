use std::fs;
use std::path::Path;

use common::{has_extension, relpath_from, LibraryIndex, UNKNOWN_ALBUM, UNKNOWN_ARTIST};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::LibraryError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub tracks: usize,
    pub skipped_depth: usize,
    pub skipped_errors: usize,
    pub skipped_reserved: usize,
}

impl ScanReport {
    pub fn skipped(&self) -> usize {
        self.skipped_depth + self.skipped_errors + self.skipped_reserved
    }
}

/// Walks `root` and builds a fresh index from every audio file found.
///
/// Unreadable entries below the root are logged and skipped. Only an
/// unreadable root fails the scan.
pub fn scan(root: &Path, extensions: &[String]) -> Result<(LibraryIndex, ScanReport), LibraryError> {
    let meta = fs::metadata(root)
        .map_err(|err| LibraryError::ScanFailed(format!("{}: {}", root.display(), err)))?;
    if !meta.is_dir() {
        return Err(LibraryError::ScanFailed(format!(
            "{}: not a directory",
            root.display()
        )));
    }

    let mut index = LibraryIndex::new();
    let mut report = ScanReport::default();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(LibraryError::ScanFailed(format!("{}: {}", root.display(), err)));
            }
            Err(err) => {
                warn!("Skipping unreadable entry: {}", err);
                report.skipped_errors += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() || !has_extension(entry.path(), extensions) {
            continue;
        }
        let relpath = match relpath_from(root, entry.path()) {
            Some(rel) => rel,
            None => continue,
        };
        if in_reserved_folder(&relpath) {
            debug!("Skipping {} (folder name is reserved for placeholders)", relpath);
            report.skipped_reserved += 1;
            continue;
        }
        match index_location(&relpath) {
            Some((artist, album, filename)) => {
                index.insert(artist, album, filename);
                report.tracks += 1;
            }
            None => {
                debug!("Skipping {} (deeper than artist/album)", relpath);
                report.skipped_depth += 1;
            }
        }
    }

    Ok((index, report))
}

/// Artist, album and filename for a `/`-separated relative path, or `None`
/// when the file sits deeper than `artist/album/file` or inside a folder
/// named like a placeholder.
pub fn index_location(relpath: &str) -> Option<(&str, &str, &str)> {
    if in_reserved_folder(relpath) {
        return None;
    }
    let parts: Vec<&str> = relpath.split('/').collect();
    match parts.as_slice() {
        [file] => Some((UNKNOWN_ARTIST, UNKNOWN_ALBUM, *file)),
        [artist, file] => Some((*artist, UNKNOWN_ALBUM, *file)),
        [artist, album, file] => Some((*artist, *album, *file)),
        _ => None,
    }
}

/// A real folder called `(unknown artist)` or `(unknown album)` would be
/// indistinguishable from the placeholders, and its tracks would resolve to
/// the wrong path.
fn in_reserved_folder(relpath: &str) -> bool {
    let mut folders = relpath.split('/').rev().skip(1);
    folders.any(|name| name == UNKNOWN_ARTIST || name == UNKNOWN_ALBUM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::touch;
    use common::default_extensions;

    #[test]
    fn groups_by_artist_and_album() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "A/B/one.mp3");
        touch(dir.path(), "A/B/two.WAV");
        touch(dir.path(), "A/loose.ogg");
        touch(dir.path(), "A/B/cover.jpg");

        let (index, report) = scan(dir.path(), &default_extensions()).unwrap();
        assert_eq!(
            index.album_tracks("A", "B"),
            Some(&["one.mp3".to_string(), "two.WAV".to_string()][..])
        );
        assert_eq!(
            index.album_tracks("A", UNKNOWN_ALBUM),
            Some(&["loose.ogg".to_string()][..])
        );
        assert_eq!(report.tracks, 3);
    }

    #[test]
    fn root_files_go_under_unknown_artist() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "stray.m4a");
        let (index, _) = scan(dir.path(), &default_extensions()).unwrap();
        assert_eq!(
            index.album_tracks(UNKNOWN_ARTIST, UNKNOWN_ALBUM),
            Some(&["stray.m4a".to_string()][..])
        );
    }

    #[test]
    fn deep_files_are_counted_not_indexed() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "A/B/Disc 1/deep.flac");
        let (index, report) = scan(dir.path(), &default_extensions()).unwrap();
        assert!(index.is_empty());
        assert_eq!(report.skipped_depth, 1);
    }

    #[test]
    fn rescanning_unchanged_tree_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        for rel in ["X/Y/a.mp3", "X/Y/b.mp3", "X/Z/c.flac", "Q/d.ogg"] {
            touch(dir.path(), rel);
        }
        let (first, _) = scan(dir.path(), &default_extensions()).unwrap();
        let (second, _) = scan(dir.path(), &default_extensions()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn respects_configured_extensions() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "A/B/one.mp3");
        touch(dir.path(), "A/B/two.opus");
        let (index, _) = scan(dir.path(), &["opus".to_string()]).unwrap();
        assert_eq!(index.album_tracks("A", "B"), Some(&["two.opus".to_string()][..]));
    }

    #[test]
    fn missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan(&dir.path().join("nope"), &default_extensions()).unwrap_err();
        assert!(matches!(err, LibraryError::ScanFailed(_)));
    }

    #[test]
    fn location_depths() {
        assert_eq!(index_location("a.mp3"), Some((UNKNOWN_ARTIST, UNKNOWN_ALBUM, "a.mp3")));
        assert_eq!(index_location("A/a.mp3"), Some(("A", UNKNOWN_ALBUM, "a.mp3")));
        assert_eq!(index_location("A/B/a.mp3"), Some(("A", "B", "a.mp3")));
        assert_eq!(index_location("A/B/C/a.mp3"), None);
        assert_eq!(index_location("A/(unknown album)/a.mp3"), None);
        assert_eq!(index_location("(unknown artist)/a.mp3"), None);
    }

    #[test]
    fn placeholder_named_folders_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "A/(unknown album)/x.mp3");
        touch(dir.path(), "(unknown artist)/B/y.mp3");
        touch(dir.path(), "A/z.mp3");

        let (index, report) = scan(dir.path(), &default_extensions()).unwrap();
        assert_eq!(
            index.album_tracks("A", UNKNOWN_ALBUM),
            Some(&["z.mp3".to_string()][..])
        );
        assert!(index.artist(UNKNOWN_ARTIST).is_none());
        assert_eq!(report.tracks, 1);
        assert_eq!(report.skipped_reserved, 2);
        assert_eq!(report.skipped(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_folder_is_skipped_not_fatal() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "A/B/good.mp3");
        touch(dir.path(), "locked/X/bad.mp3");
        let locked = dir.path().join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_dir(&locked).is_ok() {
            // Privileged users read through the mode bits.
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let result = scan(dir.path(), &default_extensions());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let (index, report) = result.unwrap();
        assert_eq!(index.album_tracks("A", "B"), Some(&["good.mp3".to_string()][..]));
        assert_eq!(report.tracks, 1);
        assert_eq!(report.skipped_errors, 1);
    }
}
