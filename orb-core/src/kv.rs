//! Ephemeral presence layer over Redis: sessions, refresh tokens, hot track
//! metadata, listen-session snapshots, guest tokens, login rate counters.
use crate::content_type::AudioFormat;
use crate::db::models::Track;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// TTLs, in seconds, for each key family.
pub mod ttl {
    /// `track:meta:{id}` — hot metadata cache.
    pub const TRACK_META: u64 = 3600;
    /// `queue:{user_id}` — cached queue snapshot.
    pub const QUEUE: u64 = 86_400;
    /// `refresh:{token}`.
    pub const REFRESH: u64 = 7 * 86_400;
    /// `listen_session:{id}`.
    pub const LISTEN_SESSION: u64 = 12 * 3600;
    /// `listen_guest:{token}`.
    pub const GUEST_TOKEN: u64 = 6 * 3600;
    /// `ratelimit:login:{ip}`.
    pub const LOGIN_WINDOW: u64 = 60;
}

/// Login attempts allowed per IP per window.
pub const LOGIN_MAX_ATTEMPTS: i64 = 10;

/// Key builders — the single source of truth for the KV layout.
pub mod keys {
    use uuid::Uuid;

    pub fn session(user_id: Uuid) -> String {
        format!("session:{}", user_id)
    }

    pub fn refresh(token: &str) -> String {
        format!("refresh:{}", token)
    }

    pub fn track_meta(track_id: Uuid) -> String {
        format!("track:meta:{}", track_id)
    }

    pub fn queue(user_id: Uuid) -> String {
        format!("queue:{}", user_id)
    }

    pub fn login_rate(ip: &str) -> String {
        format!("ratelimit:login:{}", ip)
    }

    pub fn listen_session(id: &str) -> String {
        format!("listen_session:{}", id)
    }

    pub fn listen_guest(token: &str) -> String {
        format!("listen_guest:{}", token)
    }
}

/// Hot projection of a track row, cached under `track:meta:{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackMeta {
    pub file_key: String,
    pub file_size: i64,
    pub format: AudioFormat,
    pub bit_depth: Option<i32>,
    pub sample_rate: i32,
    pub channels: i32,
    pub duration_ms: i64,
}

impl From<&Track> for TrackMeta {
    fn from(track: &Track) -> Self {
        Self {
            file_key: track.file_key.clone(),
            file_size: track.file_size,
            format: track.format,
            bit_depth: track.bit_depth,
            sample_rate: track.sample_rate,
            channels: track.channels,
            duration_ms: track.duration_ms,
        }
    }
}

/// Shared handle to the KV connection. Cheap to clone; the underlying
/// connection manager reconnects on its own.
#[derive(Clone)]
pub struct KvStore {
    conn: ConnectionManager,
}

impl KvStore {
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to KV layer");
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    // ------------------------------------------------------------------
    // Generic JSON ops
    // ------------------------------------------------------------------

    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), KvError> {
        let payload = serde_json::to_string(value)?;
        let mut conn = self.conn();
        conn.set_ex::<_, _, ()>(key, payload, ttl_secs).await?;
        Ok(())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, KvError> {
        let mut conn = self.conn();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    pub async fn set_string(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), KvError> {
        let mut conn = self.conn();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    pub async fn get_string(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn();
        Ok(conn.get(key).await?)
    }

    pub async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.conn();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Track metadata cache
    // ------------------------------------------------------------------

    pub async fn get_track_meta(&self, track_id: Uuid) -> Result<Option<TrackMeta>, KvError> {
        self.get_json(&keys::track_meta(track_id)).await
    }

    pub async fn put_track_meta(&self, track_id: Uuid, meta: &TrackMeta) -> Result<(), KvError> {
        self.set_json(&keys::track_meta(track_id), meta, ttl::TRACK_META)
            .await
    }

    // ------------------------------------------------------------------
    // Auth presence
    // ------------------------------------------------------------------

    /// Record a login: session presence + refresh token in one pipelined
    /// round trip.
    pub async fn put_login(
        &self,
        user_id: Uuid,
        refresh_token: &str,
        session_ttl_secs: u64,
    ) -> Result<(), KvError> {
        let mut conn = self.conn();
        redis::pipe()
            .atomic()
            .set_ex(keys::session(user_id), user_id.to_string(), session_ttl_secs)
            .ignore()
            .set_ex(keys::refresh(refresh_token), user_id.to_string(), ttl::REFRESH)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Rotate a refresh token: delete the old one, set the new one, and
    /// refresh session presence — one pipeline so a crash can't leave both
    /// tokens live.
    pub async fn rotate_refresh(
        &self,
        user_id: Uuid,
        old_token: &str,
        new_token: &str,
        session_ttl_secs: u64,
    ) -> Result<(), KvError> {
        let mut conn = self.conn();
        redis::pipe()
            .atomic()
            .del(keys::refresh(old_token))
            .ignore()
            .set_ex(keys::refresh(new_token), user_id.to_string(), ttl::REFRESH)
            .ignore()
            .set_ex(keys::session(user_id), user_id.to_string(), session_ttl_secs)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn refresh_token_user(&self, token: &str) -> Result<Option<Uuid>, KvError> {
        let raw = self.get_string(&keys::refresh(token)).await?;
        Ok(raw.and_then(|s| Uuid::parse_str(&s).ok()))
    }

    /// True when the user has live session presence.
    pub async fn session_present(&self, user_id: Uuid) -> Result<bool, KvError> {
        let mut conn = self.conn();
        Ok(conn.exists(keys::session(user_id)).await?)
    }

    pub async fn drop_session(&self, user_id: Uuid) -> Result<(), KvError> {
        self.delete(&keys::session(user_id)).await
    }

    // ------------------------------------------------------------------
    // Login rate limiting
    // ------------------------------------------------------------------

    /// Count a login attempt for this IP. Returns the attempt number within
    /// the current window; the first attempt starts the window.
    pub async fn count_login_attempt(&self, ip: &str) -> Result<i64, KvError> {
        let key = keys::login_rate(ip);
        let mut conn = self.conn();
        let count: i64 = conn.incr(&key, 1).await?;
        if count == 1 {
            conn.expire::<_, ()>(&key, ttl::LOGIN_WINDOW as i64).await?;
        }
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Queue cache
    // ------------------------------------------------------------------

    pub async fn invalidate_queue(&self, user_id: Uuid) -> Result<(), KvError> {
        self.delete(&keys::queue(user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        let user = Uuid::nil();
        assert_eq!(
            keys::session(user),
            "session:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(keys::refresh("abc"), "refresh:abc");
        assert_eq!(
            keys::track_meta(user),
            "track:meta:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(keys::login_rate("10.0.0.1"), "ratelimit:login:10.0.0.1");
        assert_eq!(keys::listen_session("s1"), "listen_session:s1");
        assert_eq!(keys::listen_guest("t1"), "listen_guest:t1");
    }

    #[test]
    fn track_meta_projection() {
        use chrono::Utc;
        let track = Track {
            id: Uuid::nil(),
            album_id: Some("a".into()),
            artist_id: Some("b".into()),
            title: "T".into(),
            track_number: Some(1),
            disc_number: None,
            duration_ms: 300_000,
            file_key: "audio/b/a/t.flac".into(),
            file_size: 48_302_156,
            format: AudioFormat::Flac,
            bit_depth: Some(24),
            sample_rate: 96_000,
            channels: 2,
            bitrate: None,
            seek_table: None,
            fingerprint: "f".into(),
            external_id: None,
            lyrics: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let meta = TrackMeta::from(&track);
        assert_eq!(meta.file_size, 48_302_156);
        assert_eq!(meta.format, AudioFormat::Flac);
        assert_eq!(meta.bit_depth, Some(24));
        assert_eq!(meta.sample_rate, 96_000);
    }
}
