use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Index key for tracks that sit directly under the music root.
pub const UNKNOWN_ARTIST: &str = "(unknown artist)";
/// Index key for tracks that sit directly under an artist folder.
pub const UNKNOWN_ALBUM: &str = "(unknown album)";

pub const PLACEHOLDER_ARTIST: &str = "Unknown Artist";
pub const PLACEHOLDER_ALBUM: &str = "Unknown Album";
pub const PLACEHOLDER_TITLE: &str = "Unknown Title";

pub const DEFAULT_AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "m4a"];

const ILLEGAL_SEGMENT_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Snapshot of the music tree: artist -> album -> filenames.
///
/// Serializes as `{"artist": {"album": ["file", ...]}}`, which is also the
/// layout of the recovery file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LibraryIndex {
    artists: BTreeMap<String, ArtistEntry>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtistEntry {
    albums: BTreeMap<String, AlbumEntry>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlbumEntry {
    tracks: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub artist: String,
    pub album: String,
    pub filename: String,
    pub relative_path: String,
}

impl LibraryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, artist: &str, album: &str, filename: &str) {
        let tracks = &mut self
            .artists
            .entry(artist.to_string())
            .or_default()
            .albums
            .entry(album.to_string())
            .or_default()
            .tracks;
        if let Err(pos) = tracks.binary_search_by(|track| track.as_str().cmp(filename)) {
            tracks.insert(pos, filename.to_string());
        }
    }

    pub fn artist(&self, name: &str) -> Option<&ArtistEntry> {
        self.artists.get(name)
    }

    pub fn artists(&self) -> impl Iterator<Item = (&str, &ArtistEntry)> {
        self.artists.iter().map(|(name, artist)| (name.as_str(), artist))
    }

    pub fn album_tracks(&self, artist: &str, album: &str) -> Option<&[String]> {
        self.artists
            .get(artist)
            .and_then(|entry| entry.albums.get(album))
            .map(|entry| entry.tracks.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.artists.is_empty()
    }

    pub fn artist_count(&self) -> usize {
        self.artists.len()
    }

    pub fn album_count(&self) -> usize {
        self.artists.values().map(|artist| artist.albums.len()).sum()
    }

    pub fn track_count(&self) -> usize {
        self.artists
            .values()
            .flat_map(|artist| artist.albums.values())
            .map(|album| album.tracks.len())
            .sum()
    }

    pub fn tracks(&self) -> impl Iterator<Item = Track> + '_ {
        self.artists.iter().flat_map(|(artist, entry)| {
            entry.albums.iter().flat_map(move |(album, album_entry)| {
                album_entry.tracks.iter().map(move |filename| Track {
                    artist: artist.clone(),
                    album: album.clone(),
                    filename: filename.clone(),
                    relative_path: track_relpath(artist, album, filename),
                })
            })
        })
    }

    pub fn find_track(&self, filename: &str) -> Option<Track> {
        self.tracks().find(|track| track.filename == filename)
    }
}

impl ArtistEntry {
    pub fn albums(&self) -> impl Iterator<Item = (&str, &AlbumEntry)> {
        self.albums.iter().map(|(name, album)| (name.as_str(), album))
    }
}

impl AlbumEntry {
    pub fn tracks(&self) -> &[String] {
        &self.tracks
    }
}

/// Relative path a track occupies given its index keys.
pub fn track_relpath(artist: &str, album: &str, filename: &str) -> String {
    match (artist == UNKNOWN_ARTIST, album == UNKNOWN_ALBUM) {
        (true, true) => filename.to_string(),
        (false, true) => format!("{}/{}", artist, filename),
        _ => format!("{}/{}/{}", artist, album, filename),
    }
}

pub fn relpath_from(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(path_to_slash_string(rel))
}

pub fn join_relpath(root: &Path, relpath: &str) -> PathBuf {
    let mut out = PathBuf::from(root);
    for part in relpath.split('/') {
        if part.is_empty() {
            continue;
        }
        out.push(part);
    }
    out
}

/// Splits a client-supplied relative path into its non-empty segments.
///
/// Backslashes count as separators. Returns `None` when any segment tries to
/// climb out of the root (`..`) or the path has no usable segment.
pub fn relpath_segments(relpath: &str) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    for part in relpath.split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => return None,
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts)
    }
}

/// Strips characters that are illegal in a path segment, falling back to
/// `placeholder` when nothing usable is left.
pub fn sanitize_segment(value: &str, placeholder: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|ch| !ILLEGAL_SEGMENT_CHARS.contains(ch) && !ch.is_control())
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        placeholder.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

pub fn default_extensions() -> Vec<String> {
    DEFAULT_AUDIO_EXTENSIONS
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

pub fn content_tag(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex()[..32].to_string()
}

fn path_to_slash_string(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_serializes_as_nested_maps() {
        let mut index = LibraryIndex::new();
        index.insert("Artist", "Album", "b.mp3");
        index.insert("Artist", "Album", "a.mp3");
        index.insert("Artist", "Album", "a.mp3");
        let json = serde_json::to_string(&index).unwrap();
        assert_eq!(json, r#"{"Artist":{"Album":["a.mp3","b.mp3"]}}"#);

        let decoded: LibraryIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, index);
    }

    #[test]
    fn counts_follow_inserts() {
        let mut index = LibraryIndex::new();
        index.insert("A", "X", "1.mp3");
        index.insert("A", "Y", "2.mp3");
        index.insert("B", UNKNOWN_ALBUM, "3.flac");
        assert_eq!(index.artist_count(), 2);
        assert_eq!(index.album_count(), 3);
        assert_eq!(index.track_count(), 3);
    }

    #[test]
    fn track_paths_follow_layout() {
        assert_eq!(track_relpath("A", "B", "s.mp3"), "A/B/s.mp3");
        assert_eq!(track_relpath("A", UNKNOWN_ALBUM, "s.mp3"), "A/s.mp3");
        assert_eq!(track_relpath(UNKNOWN_ARTIST, UNKNOWN_ALBUM, "s.mp3"), "s.mp3");
    }

    #[test]
    fn find_track_returns_location() {
        let mut index = LibraryIndex::new();
        index.insert("A", "B", "song.mp3");
        let track = index.find_track("song.mp3").unwrap();
        assert_eq!(track.artist, "A");
        assert_eq!(track.album, "B");
        assert_eq!(track.relative_path, "A/B/song.mp3");
        assert!(index.find_track("missing.mp3").is_none());
    }

    #[test]
    fn segments_reject_traversal() {
        assert_eq!(relpath_segments("a\\b//c.mp3"), Some(vec!["a", "b", "c.mp3"]));
        assert_eq!(relpath_segments("../c.mp3"), None);
        assert_eq!(relpath_segments("//"), None);
    }

    #[test]
    fn sanitize_strips_illegal_chars() {
        assert_eq!(sanitize_segment("AC/DC: Live?", PLACEHOLDER_ARTIST), "ACDC Live");
        assert_eq!(sanitize_segment("<>|*", PLACEHOLDER_ALBUM), PLACEHOLDER_ALBUM);
        assert_eq!(sanitize_segment("  ", PLACEHOLDER_TITLE), PLACEHOLDER_TITLE);
    }

    #[test]
    fn extension_match_ignores_case() {
        let exts = default_extensions();
        assert!(has_extension(Path::new("x/Song.MP3"), &exts));
        assert!(!has_extension(Path::new("x/cover.jpg"), &exts));
        assert!(!has_extension(Path::new("x/noext"), &exts));
    }

    #[test]
    fn content_tag_is_deterministic() {
        assert_eq!(content_tag(b"abc"), content_tag(b"abc"));
        assert_ne!(content_tag(b"abc"), content_tag(b"abd"));
    }
}
