use axum::{
    body::Body,
    extract::{Path as AxumPath, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use library::{ReassignOutcome, ReassignRequest};
use metadata::TagInfo;

use crate::scan::{refresh_status, start_rescan};
use crate::state::{
    AppState, JsonResult, LibraryStatusResponse, RescanResponse, SongResponse, TagsResponse,
};
use crate::utils::{join_error, json_error, json_error_response, library_error};

/// The whole index as `{artist: {album: [file, ...]}}`.
pub async fn get_index(State(state): State<AppState>) -> Response {
    let index = state.library.index();
    match serde_json::to_vec(index.as_ref()) {
        Ok(body) => {
            let mut response = Response::new(Body::from(body));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(err) => json_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode index: {}", err),
        ),
    }
}

pub async fn get_status(State(state): State<AppState>) -> Json<LibraryStatusResponse> {
    let status = state.status.read();
    Json(LibraryStatusResponse::from(&*status))
}

pub async fn rescan(State(state): State<AppState>) -> impl IntoResponse {
    start_rescan(state);
    (StatusCode::ACCEPTED, Json(RescanResponse { status: "scanning" }))
}

pub async fn get_song(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
) -> JsonResult<SongResponse> {
    match state.library.find_song(&name) {
        Some(track) => Ok(Json(SongResponse {
            path: format!("/api/v1/stream/{}", track.relative_path),
            artist: track.artist,
            album: track.album,
            song_name: track.filename,
        })),
        None => Err(json_error(StatusCode::NOT_FOUND, "Song not found")),
    }
}

pub async fn get_tags(
    State(state): State<AppState>,
    AxumPath(path): AxumPath<String>,
) -> JsonResult<TagsResponse> {
    let library = state.library.clone();
    let info = tokio::task::spawn_blocking(move || library.read_track_tags(&path))
        .await
        .map_err(join_error)?
        .map_err(library_error)?;
    Ok(Json(tags_response(info)))
}

pub async fn reassign(
    State(state): State<AppState>,
    Json(request): Json<ReassignRequest>,
) -> JsonResult<ReassignOutcome> {
    let library = state.library.clone();
    let outcome = tokio::task::spawn_blocking(move || library.reassign(&request))
        .await
        .map_err(join_error)?
        .map_err(library_error)?;
    refresh_status(&state, outcome.reindexed);
    Ok(Json(outcome))
}

fn tags_response(info: TagInfo) -> TagsResponse {
    TagsResponse {
        title: info.title,
        artist: info.artist,
        album: info.album,
        has_artwork: info.has_artwork,
    }
}
