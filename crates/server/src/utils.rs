use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use library::LibraryError;

use crate::state::ErrorResponse;

pub fn json_error(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn json_error_response(status: StatusCode, message: impl Into<String>) -> Response {
    json_error(status, message).into_response()
}

pub fn library_error_status(err: &LibraryError) -> StatusCode {
    match err {
        LibraryError::NotFound(_) => StatusCode::NOT_FOUND,
        LibraryError::Conflict(_) => StatusCode::CONFLICT,
        LibraryError::ScanFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
        LibraryError::TagWriteFailed(_)
        | LibraryError::MoveFailed(_)
        | LibraryError::ExtractionFailed(_)
        | LibraryError::Io(_)
        | LibraryError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn library_error(err: LibraryError) -> (StatusCode, Json<ErrorResponse>) {
    json_error(library_error_status(&err), err.to_string())
}

pub fn library_error_response(err: LibraryError) -> Response {
    library_error(err).into_response()
}

/// Maps a failed `spawn_blocking` join to a 500.
pub fn join_error(err: tokio::task::JoinError) -> (StatusCode, Json<ErrorResponse>) {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("worker failed: {}", err),
    )
}
