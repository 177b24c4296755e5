//! Range-aware audio streaming and the derived HLS manifest.
use super::range::parse_range;
use super::{auth, hls, ApiError, AppState};
use crate::kv::TrackMeta;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use std::collections::HashMap;
use tokio_util::io::ReaderStream;
use tracing::warn;
use uuid::Uuid;

/// Copy buffer for proxied object reads; the full file is never held in
/// memory.
pub const STREAM_BUFFER: usize = 64 * 1024;

const AUDIO_CACHE_CONTROL: &str = "private, max-age=3600";

/// Two-tier metadata resolution: KV hit, or catalog query + KV fill.
pub async fn resolve_meta(state: &AppState, track_id: Uuid) -> Result<TrackMeta, ApiError> {
    if let Some(meta) = state.kv.get_track_meta(track_id).await? {
        return Ok(meta);
    }

    let track = state
        .db
        .get_track(track_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("track {} not found", track_id)))?;
    let meta = TrackMeta::from(&track);

    // A cache-fill failure costs a catalog query next time, nothing more.
    if let Err(e) = state.kv.put_track_meta(track_id, &meta).await {
        warn!("failed to cache track meta for {}: {}", track_id, e);
    }

    Ok(meta)
}

/// `GET /stream/{track_id}` — authenticated range-aware audio.
pub async fn stream_track(
    State(state): State<AppState>,
    Path(track_id): Path<Uuid>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    auth::authenticate(&state, &headers, &query).await?;
    let meta = resolve_meta(&state, track_id).await?;
    serve_ranged(state.storage.as_ref(), &meta, range_header(&headers)).await
}

/// `GET /stream/{track_id}/index.m3u8` — VOD playlist over byte ranges.
pub async fn hls_manifest(
    State(state): State<AppState>,
    Path(track_id): Path<Uuid>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    auth::authenticate(&state, &headers, &query).await?;
    let meta = resolve_meta(&state, track_id).await?;

    // Carry the authorizing token into segment URIs so the player's range
    // requests pass the same check.
    let token = auth::extract_token(&headers, &query).unwrap_or_default();
    let manifest = hls::build_manifest(
        &track_id.to_string(),
        meta.file_size as u64,
        meta.duration_ms as u64,
        &token,
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(manifest))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

pub fn range_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::RANGE).and_then(|v| v.to_str().ok())
}

/// Serve a track body honoring an optional Range header.
///
/// 206 for a valid range, 200 for none, 416 with `Content-Range: bytes
/// */{size}` for anything malformed or unsatisfiable.
pub async fn serve_ranged(
    storage: &dyn crate::storage::ObjectStorage,
    meta: &TrackMeta,
    range: Option<&str>,
) -> Result<Response, ApiError> {
    let size = meta.file_size as u64;

    let (status, byte_range) = match range {
        None => (StatusCode::OK, None),
        Some(raw) => match parse_range(raw, size) {
            Ok(range) => (StatusCode::PARTIAL_CONTENT, Some(range)),
            Err(_) => {
                return Response::builder()
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(header::CONTENT_RANGE, format!("bytes */{}", size))
                    .header(header::ACCEPT_RANGES, "bytes")
                    .body(Body::empty())
                    .map_err(|e| ApiError::Internal(e.to_string()));
            }
        },
    };

    let (start, end_exclusive, content_length) = match byte_range {
        Some(range) => (range.start, range.end + 1, range.len()),
        None => (0, size, size),
    };

    let body = if content_length == 0 {
        Body::empty()
    } else {
        let reader = storage
            .open_range(&meta.file_key, start, end_exclusive)
            .await?;
        Body::from_stream(ReaderStream::with_capacity(reader, STREAM_BUFFER))
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, meta.format.mime())
        .header(header::CONTENT_LENGTH, content_length.to_string())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, AUDIO_CACHE_CONTROL)
        .header("X-Orb-Sample-Rate", meta.sample_rate.to_string());

    if let Some(bit_depth) = meta.bit_depth {
        builder = builder.header("X-Orb-Bit-Depth", bit_depth.to_string());
    }

    if let Some(range) = byte_range {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", range.start, range.end, size),
        );
    }

    builder
        .body(body)
        .map_err(|e| ApiError::Internal(e.to_string()))
}
