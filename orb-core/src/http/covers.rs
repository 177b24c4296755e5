//! Cover image serving.
use super::{ApiError, AppState};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

const COVER_CACHE_CONTROL: &str = "public, max-age=86400";

/// Stream an image object with long-lived public caching.
async fn serve_image(state: &AppState, key: &str) -> Result<Response, ApiError> {
    let size = state.storage.size(key).await?;

    let body = if size == 0 {
        Body::empty()
    } else {
        let reader = state.storage.open_range(key, 0, size).await?;
        Body::from_stream(ReaderStream::with_capacity(reader, super::stream::STREAM_BUFFER))
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/jpeg")
        .header(header::CONTENT_LENGTH, size.to_string())
        .header(header::CACHE_CONTROL, COVER_CACHE_CONTROL)
        .body(body)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// `GET /covers/{album_id}`
pub async fn album_cover(
    State(state): State<AppState>,
    Path(album_id): Path<String>,
) -> Result<Response, ApiError> {
    serve_image(&state, &crate::storage::album_cover_key(&album_id)).await
}

/// `GET /covers/artist/{artist_id}`
pub async fn artist_cover(
    State(state): State<AppState>,
    Path(artist_id): Path<String>,
) -> Result<Response, ApiError> {
    serve_image(&state, &crate::storage::artist_image_key(&artist_id)).await
}

/// `GET /covers/playlist/{playlist_id}` — up to four cover URLs drawn from
/// the playlist's most-played tracks. Compositing them into one image is the
/// client's concern.
pub async fn composite_cover(
    State(state): State<AppState>,
    Path(playlist_id): Path<Uuid>,
) -> Result<Json<Vec<String>>, ApiError> {
    state
        .db
        .get_playlist(playlist_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("playlist {} not found", playlist_id)))?;

    let tracks = state
        .db
        .most_played_playlist_tracks(playlist_id, 16)
        .await?;

    let mut urls = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for track in tracks {
        let Some(album_id) = track.album_id else {
            continue;
        };
        if !seen.insert(album_id.clone()) {
            continue;
        }
        let album = state.db.get_album(&album_id).await?;
        if album.and_then(|a| a.cover_key).is_some() {
            urls.push(format!("/covers/{}", album_id));
        }
        if urls.len() == 4 {
            break;
        }
    }

    Ok(Json(urls))
}
