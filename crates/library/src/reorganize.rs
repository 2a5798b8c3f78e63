use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use common::{
    relpath_from, sanitize_segment, PLACEHOLDER_ALBUM, PLACEHOLDER_ARTIST, PLACEHOLDER_TITLE,
    UNKNOWN_ARTIST,
};
use metadata::{TagBackend, TagUpdate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::LibraryError;

/// Moves a track to the location implied by new metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassignRequest {
    pub current_artist: String,
    pub current_album: String,
    pub current_filename: String,
    pub new_artist: String,
    pub new_album: String,
    pub new_title: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassignOutcome {
    pub relative_path: String,
    pub moved: bool,
    pub reindexed: bool,
}

pub(crate) struct Relocation {
    pub old_relpath: String,
    pub new_relpath: String,
    pub moved: bool,
}

/// Rewrites tags and moves the file to `root/artist/album/title.ext`.
///
/// Nothing on disk changes before the destination has been checked. Tags
/// are written before the move; a failed move does not undo them.
pub(crate) fn relocate(
    root: &Path,
    tags: &dyn TagBackend,
    request: &ReassignRequest,
) -> Result<Relocation, LibraryError> {
    let source = locate_source(root, request)?;

    let artist = sanitize_segment(&request.new_artist, PLACEHOLDER_ARTIST);
    let album = sanitize_segment(&request.new_album, PLACEHOLDER_ALBUM);
    let title = sanitize_segment(&request.new_title, PLACEHOLDER_TITLE);

    let filename = match source.extension() {
        Some(ext) => format!("{}.{}", title, ext.to_string_lossy()),
        None => title.clone(),
    };
    let destination = root.join(&artist).join(&album).join(filename);

    let identical = source == destination;
    let conflict = || {
        LibraryError::Conflict(
            relpath_from(root, &destination).unwrap_or_else(|| destination.display().to_string()),
        )
    };
    if !identical && destination.exists() && !is_same_file(&source, &destination) {
        return Err(conflict());
    }

    let update = TagUpdate {
        title,
        artist,
        album,
    };
    tags.write_tags(&source, &update)
        .map_err(LibraryError::TagWriteFailed)?;

    let old_relpath = relpath_from(root, &source).unwrap_or_default();
    let new_relpath = relpath_from(root, &destination).unwrap_or_default();

    if identical {
        debug!("Reassign of {} kept the file in place", old_relpath);
        return Ok(Relocation {
            old_relpath,
            new_relpath,
            moved: false,
        });
    }

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(LibraryError::MoveFailed)?;
    }
    move_without_overwrite(&source, &destination, conflict)?;
    info!("Moved {} -> {}", old_relpath, new_relpath);

    prune_empty_parents(root, &source);

    Ok(Relocation {
        old_relpath,
        new_relpath,
        moved: true,
    })
}

/// Moves `source` to `destination` without ever replacing a file that
/// appeared there after the conflict check. The hard link fails atomically
/// when the name is taken; filesystems without hard links get a re-checked
/// rename.
fn move_without_overwrite(
    source: &Path,
    destination: &Path,
    conflict: impl Fn() -> LibraryError,
) -> Result<(), LibraryError> {
    if is_same_file(source, destination) {
        return fs::rename(source, destination).map_err(LibraryError::MoveFailed);
    }
    match fs::hard_link(source, destination) {
        Ok(()) => {
            if let Err(err) = fs::remove_file(source) {
                let _ = fs::remove_file(destination);
                return Err(LibraryError::MoveFailed(err));
            }
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Err(conflict()),
        Err(err) => {
            debug!("Hard link to {:?} failed ({}), renaming instead", destination, err);
            if destination.exists() {
                return Err(conflict());
            }
            fs::rename(source, destination).map_err(LibraryError::MoveFailed)
        }
    }
}

fn locate_source(root: &Path, request: &ReassignRequest) -> Result<PathBuf, LibraryError> {
    let not_found = || {
        LibraryError::NotFound(format!(
            "{}/{}/{}",
            request.current_artist, request.current_album, request.current_filename
        ))
    };
    for segment in [
        &request.current_artist,
        &request.current_album,
        &request.current_filename,
    ] {
        if !is_plain_segment(segment) {
            return Err(not_found());
        }
    }

    let artist_dir = root.join(&request.current_artist);
    let mut candidates = vec![
        artist_dir
            .join(&request.current_album)
            .join(&request.current_filename),
        artist_dir.join(&request.current_filename),
    ];
    if request.current_artist == UNKNOWN_ARTIST {
        candidates.push(root.join(&request.current_filename));
    }

    candidates
        .into_iter()
        .find(|candidate| candidate.is_file())
        .ok_or_else(not_found)
}

/// Removes the old album folder and then the old artist folder if the move
/// left them empty. Failures are ignored.
fn prune_empty_parents(root: &Path, moved_from: &Path) {
    let mut dir = moved_from.parent();
    for _ in 0..2 {
        let current = match dir {
            Some(current) if current != root && current.starts_with(root) => current,
            _ => return,
        };
        if let Err(err) = fs::remove_dir(current) {
            debug!("Left {:?} in place: {}", current, err);
            return;
        }
        dir = current.parent();
    }
}

fn is_plain_segment(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\'])
}

/// Case-only renames on case-insensitive filesystems resolve to the file
/// being moved; anything else at the destination is a different file.
#[cfg(unix)]
fn is_same_file(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(left), Ok(right)) => left.dev() == right.dev() && left.ino() == right.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn is_same_file(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{touch, FakeTags};
    use crate::Library;
    use common::UNKNOWN_ALBUM;
    use std::sync::Arc;

    fn request(artist: &str, album: &str, file: &str, to: (&str, &str, &str)) -> ReassignRequest {
        ReassignRequest {
            current_artist: artist.to_string(),
            current_album: album.to_string(),
            current_filename: file.to_string(),
            new_artist: to.0.to_string(),
            new_album: to.1.to_string(),
            new_title: to.2.to_string(),
        }
    }

    fn library(root: &Path, tags: &Arc<FakeTags>) -> Library {
        Library::with_backend(
            root.to_path_buf(),
            root.join("music_structure.json"),
            common::default_extensions(),
            tags.clone(),
        )
    }

    #[test]
    fn moves_retags_and_prunes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let source = touch(root, "X/Y/song.mp3");
        let tags = Arc::new(FakeTags::default());
        let library = library(root, &tags);
        library.rescan().unwrap();

        let outcome = library
            .reassign(&request("X", "Y", "song.mp3", ("Z", "W", "New Song")))
            .unwrap();
        assert_eq!(outcome.relative_path, "Z/W/New Song.mp3");
        assert!(outcome.moved);
        assert!(outcome.reindexed);

        assert!(root.join("Z/W/New Song.mp3").is_file());
        assert!(!root.join("X").exists());

        let written = tags.written.lock();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].0, source);
        assert_eq!(
            written[0].1,
            TagUpdate {
                title: "New Song".to_string(),
                artist: "Z".to_string(),
                album: "W".to_string(),
            }
        );

        let index = library.index();
        assert_eq!(
            index.album_tracks("Z", "W"),
            Some(&["New Song.mp3".to_string()][..])
        );
        assert!(index.artist("X").is_none());
    }

    #[test]
    fn keeps_non_empty_album_folder() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "X/Y/song.mp3");
        touch(root, "X/Y/other.mp3");
        let tags = Arc::new(FakeTags::default());
        let library = library(root, &tags);

        library
            .reassign(&request("X", "Y", "song.mp3", ("Z", "W", "Song")))
            .unwrap();
        assert!(root.join("X/Y/other.mp3").is_file());
        assert!(root.join("Z/W/Song.mp3").is_file());
    }

    #[test]
    fn conflict_leaves_both_files_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "X/Y/song.mp3");
        touch(root, "Z/W/New Song.mp3");
        let tags = Arc::new(FakeTags::default());
        let library = library(root, &tags);

        let err = library
            .reassign(&request("X", "Y", "song.mp3", ("Z", "W", "New Song")))
            .unwrap_err();
        assert!(matches!(err, LibraryError::Conflict(_)));
        assert_eq!(fs::read(root.join("X/Y/song.mp3")).unwrap(), b"X/Y/song.mp3");
        assert_eq!(
            fs::read(root.join("Z/W/New Song.mp3")).unwrap(),
            b"Z/W/New Song.mp3"
        );
        assert!(tags.written.lock().is_empty());
    }

    #[test]
    fn falls_back_to_artist_level_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "X/song.mp3");
        let tags = Arc::new(FakeTags::default());
        let library = library(root, &tags);

        let outcome = library
            .reassign(&request("X", UNKNOWN_ALBUM, "song.mp3", ("X", "Album", "song")))
            .unwrap();
        assert_eq!(outcome.relative_path, "X/Album/song.mp3");
        assert!(root.join("X/Album/song.mp3").is_file());
    }

    #[test]
    fn missing_source_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let tags = Arc::new(FakeTags::default());
        let library = library(dir.path(), &tags);
        let err = library
            .reassign(&request("X", "Y", "nope.mp3", ("Z", "W", "T")))
            .unwrap_err();
        assert!(matches!(err, LibraryError::NotFound(_)));

        let err = library
            .reassign(&request("..", "Y", "nope.mp3", ("Z", "W", "T")))
            .unwrap_err();
        assert!(matches!(err, LibraryError::NotFound(_)));
    }

    #[test]
    fn identical_destination_skips_move() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "Z/W/Song.mp3");
        let tags = Arc::new(FakeTags::default());
        let library = library(root, &tags);

        let outcome = library
            .reassign(&request("Z", "W", "Song.mp3", ("Z", "W", "Song")))
            .unwrap();
        assert!(!outcome.moved);
        assert!(root.join("Z/W/Song.mp3").is_file());
        assert_eq!(tags.written.lock().len(), 1);
    }

    #[test]
    fn sanitizes_and_falls_back_to_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "X/Y/song.flac");
        let tags = Arc::new(FakeTags::default());
        let library = library(root, &tags);

        let outcome = library
            .reassign(&request("X", "Y", "song.flac", ("AC/DC", "???", "Live: 1979")))
            .unwrap();
        assert_eq!(outcome.relative_path, "ACDC/Unknown Album/Live 1979.flac");
    }

    #[test]
    fn tag_failure_aborts_before_move() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "X/Y/song.mp3");
        let tags = Arc::new(FakeTags {
            fail_writes: true,
            ..FakeTags::default()
        });
        let library = library(root, &tags);

        let err = library
            .reassign(&request("X", "Y", "song.mp3", ("Z", "W", "T")))
            .unwrap_err();
        assert!(matches!(err, LibraryError::TagWriteFailed(_)));
        assert!(root.join("X/Y/song.mp3").is_file());
        assert!(!root.join("Z").exists());
    }

    #[test]
    fn reassign_invalidates_old_artwork_key() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "X/Y/song.mp3");
        let tags = Arc::new(FakeTags::default());
        let library = library(root, &tags);

        library.artwork("X/Y/song.mp3").unwrap();
        assert_eq!(library.artwork_cache().len(), 1);
        library
            .reassign(&request("X", "Y", "song.mp3", ("Z", "W", "T")))
            .unwrap();
        assert!(library.artwork_cache().is_empty());
    }

    fn write_mp3(path: &Path) {
        let mut frame = vec![0u8; 417];
        frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
        let mut bytes = Vec::new();
        for _ in 0..30 {
            bytes.extend_from_slice(&frame);
        }
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn rewrites_real_id3_tags() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_mp3(&root.join("X/Y/song.mp3"));
        let library = Library::open(
            root.to_path_buf(),
            root.join("music_structure.json"),
            common::default_extensions(),
        );

        library
            .reassign(&request("X", "Y", "song.mp3", ("Z", "W", "New Song")))
            .unwrap();
        let info = library.read_track_tags("Z/W/New Song.mp3").unwrap();
        assert_eq!(info.title.as_deref(), Some("New Song"));
        assert_eq!(info.artist.as_deref(), Some("Z"));
        assert_eq!(info.album.as_deref(), Some("W"));
        assert!(!root.join("X/Y").exists());
    }

    #[test]
    fn move_never_replaces_a_late_arrival() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let source = touch(root, "X/Y/song.mp3");
        let destination = touch(root, "Z/W/Song.mp3");
        let conflict = || LibraryError::Conflict("Z/W/Song.mp3".to_string());

        let err = move_without_overwrite(&source, &destination, conflict).unwrap_err();
        assert!(matches!(err, LibraryError::Conflict(_)));
        assert_eq!(fs::read(&source).unwrap(), b"X/Y/song.mp3");
        assert_eq!(fs::read(&destination).unwrap(), b"Z/W/Song.mp3");

        fs::remove_file(&destination).unwrap();
        move_without_overwrite(&source, &destination, conflict).unwrap();
        assert!(!source.exists());
        assert_eq!(fs::read(&destination).unwrap(), b"X/Y/song.mp3");
    }
}
