use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::StatusCode;
use axum::Json;
use library::{Library, LibraryStats};
use notify::RecommendedWatcher;
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub library: Library,
    pub config: Arc<ServerConfig>,
    pub status: Arc<RwLock<LibraryStatus>>,
    pub watcher: Arc<RwLock<Option<RecommendedWatcher>>>,
}

impl AppState {
    pub fn new(library: Library, config: ServerConfig) -> Self {
        Self {
            library,
            config: Arc::new(config),
            status: Arc::new(RwLock::new(LibraryStatus::Scanning {
                started: SystemTime::now(),
            })),
            watcher: Arc::new(RwLock::new(None)),
        }
    }

    pub fn set_status(&self, status: LibraryStatus) {
        *self.status.write() = status;
    }
}

#[derive(Clone, Debug)]
pub enum LibraryStatus {
    Scanning { started: SystemTime },
    Ready(LibraryStats),
    Error(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct LibraryStatusResponse {
    pub status: &'static str,
    pub message: Option<String>,
    pub started_at: Option<u64>,
    pub artists: Option<usize>,
    pub albums: Option<usize>,
    pub tracks: Option<usize>,
    pub skipped: Option<usize>,
}

impl From<&LibraryStatus> for LibraryStatusResponse {
    fn from(status: &LibraryStatus) -> Self {
        let empty = Self {
            status: "",
            message: None,
            started_at: None,
            artists: None,
            albums: None,
            tracks: None,
            skipped: None,
        };
        match status {
            LibraryStatus::Scanning { started } => Self {
                status: "scanning",
                started_at: started
                    .duration_since(UNIX_EPOCH)
                    .ok()
                    .map(|d| d.as_secs()),
                ..empty
            },
            LibraryStatus::Ready(stats) => Self {
                status: "ready",
                artists: Some(stats.artists),
                albums: Some(stats.albums),
                tracks: Some(stats.tracks),
                skipped: Some(stats.skipped),
                ..empty
            },
            LibraryStatus::Error(message) => Self {
                status: "error",
                message: Some(message.clone()),
                ..empty
            },
        }
    }
}

#[derive(Serialize)]
pub struct SongResponse {
    pub artist: String,
    pub album: String,
    #[serde(rename = "songName")]
    pub song_name: String,
    pub path: String,
}

#[derive(Serialize)]
pub struct TagsResponse {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub has_artwork: bool,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub count: usize,
    pub rejected: usize,
}

#[derive(Serialize)]
pub struct RescanResponse {
    pub status: &'static str,
}

pub type JsonResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;
