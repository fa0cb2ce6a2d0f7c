//! Range-aware delivery gate
//!
//! GET /api/videos/{id}/stream/secure?token=&expires=&quality=&signature=
//!
//! The signed query is checked before anything touches the catalog. Bodies
//! are streamed from disk and bounded by the computed content length.

use axum::{
    body::Body,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{StreamExt, TryStreamExt};
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use playsync_core::{
    metrics,
    models::{StreamToken, VideoId},
    service::{ByteRange, MediaFile, SignedStreamParams},
    Error,
};

use super::{AppError, AppResult, AppState};

const NO_CACHE_HEADERS: [(header::HeaderName, &str); 3] = [
    (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
    (header::PRAGMA, "no-cache"),
    (header::EXPIRES, "0"),
];

/// Decrements the in-flight gauge when the response body is dropped
struct ActiveStreamGuard;

impl ActiveStreamGuard {
    fn new() -> Self {
        metrics::stream::ACTIVE_STREAMS.inc();
        Self
    }
}

impl Drop for ActiveStreamGuard {
    fn drop(&mut self) {
        metrics::stream::ACTIVE_STREAMS.dec();
    }
}

pub async fn stream_secure(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    query: Result<Query<SignedStreamParams>, QueryRejection>,
    headers: HeaderMap,
) -> AppResult<Response> {
    // A malformed signed query is just another bad signature
    let Query(params) = query.map_err(|_| AppError::from(Error::BadSignature))?;
    let token = params.into_token(VideoId::from(video_id))?;
    state.tokens.validate(&token)?;

    let file = state.catalog.resolve(&token.video_id, token.quality).await?;

    let range_header = headers
        .get(header::RANGE)
        .map(|v| v.to_str().unwrap_or_default());
    let range = match ByteRange::parse(range_header, file.size) {
        Ok(range) => range,
        Err(Error::RangeNotSatisfiable { total }) => {
            debug!(video_id = %token.video_id, range = ?range_header, total, "Range not satisfiable");
            metrics::stream::RESPONSES
                .with_label_values(&["unsatisfiable"])
                .inc();
            return Ok(unsatisfiable(total));
        }
        Err(e) => return Err(e.into()),
    };

    let (status, start, length) = match range {
        Some(r) => (StatusCode::PARTIAL_CONTENT, r.start, r.length()),
        None => (StatusCode::OK, 0, file.size),
    };

    let body = open_body(
        &file,
        start,
        length,
        &token,
        state.config.streaming.enforce_expiry_mid_stream,
    )
    .await?;

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, file.content_type)
        .header(header::CONTENT_LENGTH, length)
        .header(header::ACCEPT_RANGES, "bytes");
    for (name, value) in NO_CACHE_HEADERS {
        builder = builder.header(name, value);
    }
    if let Some(r) = range {
        builder = builder.header(header::CONTENT_RANGE, r.content_range(file.size));
    }

    metrics::stream::RESPONSES
        .with_label_values(&[if range.is_some() { "partial" } else { "full" }])
        .inc();
    info!(
        video_id = %token.video_id,
        user_id = %token.user_id,
        quality = %token.quality,
        status = status.as_u16(),
        start,
        length,
        "Serving media"
    );

    builder
        .body(body)
        .map_err(|_| AppError::internal_server_error("Failed to build response"))
}

fn unsatisfiable(total: u64) -> Response {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&ByteRange::unsatisfiable_content_range(total)) {
        headers.insert(header::CONTENT_RANGE, value);
    }
    for (name, value) in NO_CACHE_HEADERS {
        headers.insert(name, HeaderValue::from_static(value));
    }
    (StatusCode::RANGE_NOT_SATISFIABLE, headers).into_response()
}

async fn open_body(
    file: &MediaFile,
    start: u64,
    length: u64,
    token: &StreamToken,
    enforce_expiry: bool,
) -> AppResult<Body> {
    let mut handle = tokio::fs::File::open(&file.path).await.map_err(|e| {
        warn!(error = %e, "Failed to open media file");
        AppError::internal_server_error("Media unavailable")
    })?;
    if start > 0 {
        handle.seek(SeekFrom::Start(start)).await.map_err(|e| {
            warn!(error = %e, "Failed to seek media file");
            AppError::internal_server_error("Media unavailable")
        })?;
    }

    let video_id = token.video_id.clone();
    let guard = ActiveStreamGuard::new();
    let chunks = ReaderStream::new(handle.take(length))
        .inspect_err(move |e| {
            // Headers are already sent; the connection just ends
            warn!(video_id = %video_id, error = %e, "Media transfer aborted");
        })
        .map(move |chunk| {
            let _in_flight = &guard;
            chunk
        });

    if !enforce_expiry {
        return Ok(Body::from_stream(chunks));
    }

    let remaining = (token.expires_at - chrono::Utc::now().timestamp()).max(0);
    let deadline = tokio::time::sleep(std::time::Duration::from_secs(
        u64::try_from(remaining).unwrap_or_default(),
    ));
    Ok(Body::from_stream(chunks.take_until(deadline)))
}
