use crate::content_type::AudioFormat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Registered account. Password hash is argon2.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An artist or band.
///
/// The id is the first 8 bytes of `sha256("artist:" + lower(name))` in hex,
/// so re-ingesting the same name always lands on the same row. Enrichment
/// fields stay NULL until the external lookup fills them.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub sort_name: String,
    pub external_id: Option<String>,
    pub artist_type: Option<String>,
    pub country: Option<String>,
    pub begin_date: Option<String>,
    pub end_date: Option<String>,
    pub disambiguation: Option<String>,
    pub image_key: Option<String>,
    pub enriched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A logical album. Id derived from `sha256("album:" + lower(album_artist) +
/// ":" + lower(title))`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Album {
    pub id: String,
    pub artist_id: Option<String>,
    pub title: String,
    pub year: Option<i32>,
    pub label: Option<String>,
    /// Object-store key of the album cover (`covers/{album_id}.jpg`).
    pub cover_key: Option<String>,
    pub external_id: Option<String>,
    pub album_type: Option<String>,
    pub release_date: Option<String>,
    pub release_group_id: Option<String>,
    pub enriched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single audio file in the catalog.
///
/// The id is a UUID shaped from the content fingerprint, so the same bytes
/// always upsert the same row regardless of path.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Track {
    pub id: Uuid,
    pub album_id: Option<String>,
    pub artist_id: Option<String>,
    pub title: String,
    pub track_number: Option<i32>,
    pub disc_number: Option<i32>,
    pub duration_ms: i64,
    /// Object-store key (`audio/{artist}/{album}/{track}.{ext}`).
    pub file_key: String,
    pub file_size: i64,
    #[sqlx(try_from = "String")]
    pub format: AudioFormat,
    /// NULL for lossy formats.
    pub bit_depth: Option<i32>,
    pub sample_rate: i32,
    pub channels: i32,
    pub bitrate: Option<i32>,
    pub seek_table: Option<serde_json::Value>,
    /// Full-content SHA-256, hex encoded.
    pub fingerprint: String,
    pub external_id: Option<String>,
    pub lyrics: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Playlist {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlaylistTrack {
    pub playlist_id: Uuid,
    pub track_id: Uuid,
    pub position: i32,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueEntry {
    pub id: i64,
    pub user_id: Uuid,
    pub track_id: Uuid,
    pub position: i64,
    pub source: Option<String>,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlayHistoryEntry {
    pub track_id: Uuid,
    pub played_at: DateTime<Utc>,
    pub duration_played_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Genre {
    pub id: String,
    pub name: String,
}

impl Genre {
    /// Build a genre from a display name; the id is the lowercased slug.
    pub fn from_name(name: &str) -> Self {
        let id = name
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect::<String>();
        Self {
            id,
            name: name.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RelatedArtist {
    pub artist_id: String,
    pub related_id: String,
    pub rel_type: String,
}

/// One row of the ingest skip index.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IngestStateRow {
    pub path: String,
    pub mtime_unix: i64,
    pub file_size: i64,
    pub track_id: Uuid,
}
