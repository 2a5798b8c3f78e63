use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use library::UploadFile;
use tracing::info;

use crate::scan::refresh_status;
use crate::state::{AppState, JsonResult, UploadResponse};
use crate::utils::{join_error, json_error};

/// Multipart upload. Every `files` part is placed by its filename, which
/// the client sets to the suggested relative path.
pub async fn upload_files(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> JsonResult<UploadResponse> {
    let mut files = Vec::new();
    let mut saw_files = false;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return Err(json_error(err.status(), err.body_text())),
        };
        if field.name() != Some("files") {
            continue;
        }
        saw_files = true;
        let name = field.file_name().unwrap_or_default().to_string();
        let content = field
            .bytes()
            .await
            .map_err(|err| json_error(err.status(), err.body_text()))?;
        if name.is_empty() {
            continue;
        }
        files.push(UploadFile { name, content });
    }
    if !saw_files {
        return Err(json_error(StatusCode::BAD_REQUEST, "No files part"));
    }

    let library = state.library.clone();
    let report = tokio::task::spawn_blocking(move || library.store_uploads(files))
        .await
        .map_err(join_error)?;
    info!(
        "Upload batch: {} accepted, {} rejected",
        report.accepted, report.rejected
    );
    if report.accepted > 0 {
        refresh_status(&state, report.reindexed);
    }

    Ok(Json(UploadResponse {
        success: true,
        count: report.accepted,
        rejected: report.rejected,
    }))
}
