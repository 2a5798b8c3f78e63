use std::io::SeekFrom;

use axum::{
    body::Body,
    extract::{Path as AxumPath, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use common::content_tag;
use library::{Artwork, ArtworkResult};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::range::{parse_range_header, RangeError};
use crate::state::AppState;
use crate::utils::{join_error, json_error_response, library_error_response};

const ARTWORK_CACHE_CONTROL: &str = "public, max-age=86400";

pub async fn stream_track(
    State(state): State<AppState>,
    AxumPath(path): AxumPath<String>,
    headers: HeaderMap,
) -> Response {
    let library = state.library.clone();
    let resolved = match tokio::task::spawn_blocking(move || library.resolve_track_path(&path)).await
    {
        Ok(Ok(resolved)) => resolved,
        Ok(Err(err)) => return library_error_response(err),
        Err(err) => return join_error(err).into_response(),
    };

    let mut file = match tokio::fs::File::open(&resolved).await {
        Ok(file) => file,
        Err(err) => {
            return json_error_response(StatusCode::NOT_FOUND, format!("open failed: {}", err))
        }
    };
    let size = match file.metadata().await {
        Ok(meta) => meta.len(),
        Err(err) => {
            return json_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("stat failed: {}", err),
            )
        }
    };
    let mime = mime_guess::from_path(&resolved).first_or_octet_stream();

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .map(|value| parse_range_header(value, size));

    let (status, length, content_range, body) = match range {
        Some(Ok(range)) => {
            if let Err(err) = file.seek(SeekFrom::Start(range.start)).await {
                return json_error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("seek failed: {}", err),
                );
            }
            let body = Body::from_stream(ReaderStream::new(file.take(range.len())));
            (
                StatusCode::PARTIAL_CONTENT,
                range.len(),
                Some(range.content_range(size)),
                body,
            )
        }
        Some(Err(RangeError::Unsatisfiable)) => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            insert_header(&mut response, header::CONTENT_RANGE, &format!("bytes */{}", size));
            return response;
        }
        Some(Err(RangeError::Invalid)) | None => (
            StatusCode::OK,
            size,
            None,
            Body::from_stream(ReaderStream::new(file)),
        ),
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    insert_header(&mut response, header::CONTENT_TYPE, mime.as_ref());
    insert_header(&mut response, header::CONTENT_LENGTH, &length.to_string());
    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(content_range) = content_range {
        insert_header(&mut response, header::CONTENT_RANGE, &content_range);
    }
    response
}

pub async fn get_artwork(
    State(state): State<AppState>,
    AxumPath(path): AxumPath<String>,
    headers: HeaderMap,
) -> Response {
    let library = state.library.clone();
    match tokio::task::spawn_blocking(move || library.artwork(&path)).await {
        Ok(Ok(ArtworkResult::Present(artwork))) => {
            artwork_response(&artwork, headers.get(header::IF_NONE_MATCH))
        }
        Ok(Ok(ArtworkResult::Absent)) => {
            json_error_response(StatusCode::NOT_FOUND, "no embedded artwork")
        }
        Ok(Ok(ArtworkResult::NotFound)) => json_error_response(StatusCode::NOT_FOUND, "file not found"),
        Ok(Err(err)) => library_error_response(err),
        Err(err) => join_error(err).into_response(),
    }
}

pub(crate) fn artwork_response(artwork: &Artwork, if_none_match: Option<&HeaderValue>) -> Response {
    let etag = format!("\"{}\"", content_tag(&artwork.data));
    let matched = if_none_match
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .any(|candidate| candidate == "*" || candidate.trim_start_matches("W/") == etag)
        })
        .unwrap_or(false);

    let mut response = if matched {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        response
    } else {
        let mut response = Response::new(Body::from(artwork.data.clone()));
        insert_header(&mut response, header::CONTENT_TYPE, &artwork.mime);
        response
    };
    insert_header(&mut response, header::ETAG, &etag);
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(ARTWORK_CACHE_CONTROL),
    );
    response
}

fn insert_header(response: &mut Response, name: header::HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        response.headers_mut().insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testutil::{app_state, touch};
    use axum::body::to_bytes;
    use bytes::Bytes;

    fn cover() -> Artwork {
        Artwork {
            data: Bytes::from_static(&[0x89, b'P', b'N', b'G', 1, 2, 3]),
            mime: "image/png".to_string(),
        }
    }

    #[test]
    fn artwork_carries_etag_and_cache_headers() {
        let response = artwork_response(&cover(), None);
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        assert_eq!(headers[header::CACHE_CONTROL], ARTWORK_CACHE_CONTROL);
        let etag = headers[header::ETAG].to_str().unwrap();
        assert_eq!(etag, format!("\"{}\"", content_tag(&cover().data)));
    }

    #[test]
    fn matching_etag_is_not_modified() {
        let etag = artwork_response(&cover(), None).headers()[header::ETAG].clone();
        let response = artwork_response(&cover(), Some(&etag));
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

        let other = HeaderValue::from_static("\"deadbeef\"");
        let response = artwork_response(&cover(), Some(&other));
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn streams_whole_file_and_ranges() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "A/B/one.mp3", b"0123456789");
        let state = app_state(dir.path());

        let response = stream_track(
            State(state.clone()),
            AxumPath("A/B/one.mp3".to_string()),
            HeaderMap::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "10");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"0123456789");

        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=2-4"));
        let response = stream_track(
            State(state.clone()),
            AxumPath("A/B/one.mp3".to_string()),
            headers,
        )
        .await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 2-4/10");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"234");
    }

    #[tokio::test]
    async fn stream_rejects_escapes_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("music");
        touch(&root, "A/B/one.mp3", b"x");
        touch(dir.path(), "secret.mp3", b"y");
        let state = app_state(&root);

        for path in ["../secret.mp3", "A/B/two.mp3", "A/B"] {
            let response =
                stream_track(State(state.clone()), AxumPath(path.to_string()), HeaderMap::new())
                    .await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", path);
        }
    }

    #[tokio::test]
    async fn artwork_for_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(dir.path());
        let response = get_artwork(
            State(state),
            AxumPath("A/B/missing.wav".to_string()),
            HeaderMap::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
