pub mod library;
pub mod media;
pub mod upload;

use axum::{
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::state::{AppState, HealthResponse};

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/library", get(library::get_index))
        .route("/library/status", get(library::get_status))
        .route("/library/rescan", post(library::rescan))
        .route("/songs/:name", get(library::get_song))
        .route("/tags/*path", get(library::get_tags))
        .route("/reassign", post(library::reassign))
        .route("/stream/*path", get(media::stream_track))
        .route("/artwork/*path", get(media::get_artwork))
        .route("/upload", post(upload::upload_files))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::fs;
    use std::path::Path;

    use library::Library;

    use crate::config::ServerConfig;
    use crate::state::AppState;

    pub fn app_state(root: &Path) -> AppState {
        let library = Library::open(
            root.to_path_buf(),
            root.join("music_structure.json"),
            common::default_extensions(),
        );
        AppState::new(library, ServerConfig::default())
    }

    pub fn touch(root: &Path, relpath: &str, content: &[u8]) {
        let path = common::join_relpath(root, relpath);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
}
