use std::fs;
use std::path::Path;

use bytes::Bytes;
use common::{
    has_extension, join_relpath, relpath_segments, PLACEHOLDER_ALBUM, PLACEHOLDER_ARTIST,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct UploadFile {
    /// Client-suggested relative path; only its last three segments matter.
    pub name: String,
    pub content: Bytes,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReport {
    pub accepted: usize,
    pub rejected: usize,
    /// Whether the rescan after an accepted batch succeeded.
    #[serde(default)]
    pub reindexed: bool,
}

/// Relative destination for an uploaded file, or `None` if it must be
/// rejected.
///
/// One segment lands in `Unknown Artist/Unknown Album`, two segments are
/// read as `album/file` under `Unknown Artist`, and longer paths keep their
/// last three segments.
pub fn upload_destination(name: &str, extensions: &[String]) -> Option<String> {
    let parts = relpath_segments(name)?;
    let (artist, album, file) = match parts.as_slice() {
        [file] => (PLACEHOLDER_ARTIST, PLACEHOLDER_ALBUM, *file),
        [album, file] => (PLACEHOLDER_ARTIST, *album, *file),
        [.., artist, album, file] => (*artist, *album, *file),
        [] => return None,
    };
    if !has_extension(Path::new(file), extensions) {
        return None;
    }
    Some(format!("{}/{}/{}", artist, album, file))
}

/// Writes every placeable file and returns the counts along with the
/// relative paths that were written.
pub(crate) fn store_files(
    root: &Path,
    extensions: &[String],
    files: Vec<UploadFile>,
) -> (UploadReport, Vec<String>) {
    let mut report = UploadReport::default();
    let mut stored = Vec::new();
    for file in files {
        let relpath = match upload_destination(&file.name, extensions) {
            Some(relpath) => relpath,
            None => {
                warn!("Rejected upload {:?}", file.name);
                report.rejected += 1;
                continue;
            }
        };
        match write_staged(&join_relpath(root, &relpath), &file.content) {
            Ok(()) => {
                info!("Stored upload {} ({} bytes)", relpath, file.content.len());
                report.accepted += 1;
                stored.push(relpath);
            }
            Err(err) => {
                warn!("Failed to store upload {}: {}", relpath, err);
                report.rejected += 1;
            }
        }
    }
    (report, stored)
}

/// Writes next to the destination under a hidden `.part` name and renames
/// into place, so scans never index a half-written file.
fn write_staged(dest: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no parent"))?;
    fs::create_dir_all(parent)?;
    let name = dest
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let staging = parent.join(format!(".{}.part", name));
    if let Err(err) = fs::write(&staging, content) {
        let _ = fs::remove_file(&staging);
        return Err(err);
    }
    if let Err(err) = fs::rename(&staging, dest) {
        let _ = fs::remove_file(&staging);
        return Err(err);
    }
    Ok(())
}
