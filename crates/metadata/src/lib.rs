use std::path::Path;

use lofty::config::WriteOptions;
use lofty::error::{ErrorKind, LoftyError};
use lofty::picture::{Picture, PictureType};
use lofty::prelude::{Accessor, AudioFile, TaggedFileExt};
use lofty::tag::{Tag, TagType};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TagInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub has_artwork: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverArt {
    pub data: Vec<u8>,
    pub mime: String,
}

/// New title/artist/album for a file. Every field is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagUpdate {
    pub title: String,
    pub artist: String,
    pub album: String,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
    NoTagSupport,
}

impl MetadataError {
    /// I/O failures may clear up on retry; parse failures will not.
    pub fn is_transient(&self) -> bool {
        match self {
            MetadataError::Io(_) => true,
            MetadataError::Lofty(err) => matches!(err.kind(), ErrorKind::Io(_)),
            MetadataError::NoTagSupport => false,
        }
    }
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
            MetadataError::NoTagSupport => write!(f, "container does not support tags"),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

/// Tag access used by the library. Split out so callers can swap the
/// lofty-backed implementation for a fake.
pub trait TagBackend: Send + Sync {
    fn read_tags(&self, path: &Path) -> Result<TagInfo, MetadataError>;
    fn read_artwork(&self, path: &Path) -> Result<Option<CoverArt>, MetadataError>;
    fn write_tags(&self, path: &Path, update: &TagUpdate) -> Result<(), MetadataError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyTags;

impl TagBackend for LoftyTags {
    fn read_tags(&self, path: &Path) -> Result<TagInfo, MetadataError> {
        read_tags(path)
    }

    fn read_artwork(&self, path: &Path) -> Result<Option<CoverArt>, MetadataError> {
        read_artwork(path)
    }

    fn write_tags(&self, path: &Path, update: &TagUpdate) -> Result<(), MetadataError> {
        write_tags(path, update)
    }
}

pub fn read_tags(path: &Path) -> Result<TagInfo, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let mut info = TagInfo::default();

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        info.title = tag.title().map(|v| v.to_string());
        info.artist = tag.artist().map(|v| v.to_string());
        info.album = tag.album().map(|v| v.to_string());
    }
    info.has_artwork = tagged_file
        .tags()
        .iter()
        .any(|tag| !tag.pictures().is_empty());

    Ok(info)
}

/// Embedded artwork, looked up in container priority order:
/// ID3 picture frames, then any other tag's picture list (Vorbis/FLAC),
/// then the MP4 `covr` atom, whose MIME has to be sniffed.
pub fn read_artwork(path: &Path) -> Result<Option<CoverArt>, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    Ok(artwork_from_tags(tagged_file.tags()))
}

fn artwork_from_tags(tags: &[Tag]) -> Option<CoverArt> {
    let id3v2 = tags.iter().find(|tag| tag.tag_type() == TagType::Id3v2);
    if let Some(picture) = id3v2.and_then(|tag| pick_picture(tag.pictures())) {
        return Some(declared_cover(picture));
    }

    for tag in tags {
        if matches!(tag.tag_type(), TagType::Id3v2 | TagType::Mp4Ilst) {
            continue;
        }
        if let Some(picture) = tag.pictures().first() {
            return Some(declared_cover(picture));
        }
    }

    let ilst = tags.iter().find(|tag| tag.tag_type() == TagType::Mp4Ilst)?;
    let picture = ilst.pictures().first()?;
    let data = picture.data().to_vec();
    let mime = sniff_image_mime(&data).to_string();
    Some(CoverArt { data, mime })
}

/// Writes into the container's primary tag, creating it when missing.
/// Other tags already on the file (an ID3v1 trailer, say) get the same
/// values so readers of either agree.
pub fn write_tags(path: &Path, update: &TagUpdate) -> Result<(), MetadataError> {
    let mut tagged_file = lofty::read_from_path(path)?;
    let primary = tagged_file.primary_tag_type();
    if tagged_file.tag(primary).is_none() {
        tagged_file.insert_tag(Tag::new(primary));
    }
    if tagged_file.tag(primary).is_none() && tagged_file.first_tag().is_none() {
        return Err(MetadataError::NoTagSupport);
    }

    let tag_types: Vec<TagType> = tagged_file.tags().iter().map(Tag::tag_type).collect();
    for tag_type in tag_types {
        if let Some(tag) = tagged_file.tag_mut(tag_type) {
            tag.set_title(update.title.clone());
            tag.set_artist(update.artist.clone());
            tag.set_album(update.album.clone());
        }
    }

    tagged_file.save_to_path(path, WriteOptions::default())?;
    Ok(())
}

/// JPEG when the bytes open with `FF D8`, PNG otherwise.
pub fn sniff_image_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8]) {
        "image/jpeg"
    } else {
        "image/png"
    }
}

fn declared_cover(picture: &Picture) -> CoverArt {
    let data = picture.data().to_vec();
    let mime = picture
        .mime_type()
        .map(|mime| mime.as_str().to_string())
        .filter(|mime| mime.starts_with("image/"))
        .unwrap_or_else(|| sniff_image_mime(&data).to_string());
    CoverArt { data, mime }
}

fn pick_picture(pictures: &[Picture]) -> Option<&Picture> {
    for picture in pictures {
        if picture.pic_type() == PictureType::CoverFront {
            return Some(picture);
        }
    }
    pictures.first()
}
