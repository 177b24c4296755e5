use super::models::{PlayHistoryEntry, Playlist, PlaylistTrack, QueueEntry, Track};
use super::{Database, DbError};
use uuid::Uuid;

impl Database {
    // ------------------------------------------------------------------
    // Library / favorites
    // ------------------------------------------------------------------

    /// Conflict-tolerant: adding a track twice is a no-op.
    pub async fn add_to_library(&self, user_id: Uuid, track_id: Uuid) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO user_library (user_id, track_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(track_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn remove_from_library(&self, user_id: Uuid, track_id: Uuid) -> Result<(), DbError> {
        sqlx::query("DELETE FROM user_library WHERE user_id = $1 AND track_id = $2")
            .bind(user_id)
            .bind(track_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn list_library(&self, user_id: Uuid) -> Result<Vec<Track>, DbError> {
        let tracks = sqlx::query_as::<_, Track>(
            r#"
            SELECT tracks.* FROM tracks
            JOIN user_library ul ON ul.track_id = tracks.id
            WHERE ul.user_id = $1
            ORDER BY ul.added_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(tracks)
    }

    pub async fn add_favorite(&self, user_id: Uuid, track_id: Uuid) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO favorites (user_id, track_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(track_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn remove_favorite(&self, user_id: Uuid, track_id: Uuid) -> Result<(), DbError> {
        sqlx::query("DELETE FROM favorites WHERE user_id = $1 AND track_id = $2")
            .bind(user_id)
            .bind(track_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn list_favorites(&self, user_id: Uuid) -> Result<Vec<Track>, DbError> {
        let tracks = sqlx::query_as::<_, Track>(
            r#"
            SELECT tracks.* FROM tracks
            JOIN favorites f ON f.track_id = tracks.id
            WHERE f.user_id = $1
            ORDER BY f.added_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(tracks)
    }

    // ------------------------------------------------------------------
    // Playlists
    // ------------------------------------------------------------------

    pub async fn create_playlist(&self, user_id: Uuid, name: &str) -> Result<Playlist, DbError> {
        let playlist = sqlx::query_as::<_, Playlist>(
            "INSERT INTO playlists (id, user_id, name) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(name)
        .fetch_one(self.pool())
        .await?;
        Ok(playlist)
    }

    pub async fn get_playlist(&self, id: Uuid) -> Result<Option<Playlist>, DbError> {
        let playlist = sqlx::query_as::<_, Playlist>("SELECT * FROM playlists WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(playlist)
    }

    pub async fn list_playlists(&self, user_id: Uuid) -> Result<Vec<Playlist>, DbError> {
        let playlists = sqlx::query_as::<_, Playlist>(
            "SELECT * FROM playlists WHERE user_id = $1 ORDER BY lower(name) ASC",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(playlists)
    }

    pub async fn delete_playlist(&self, id: Uuid) -> Result<(), DbError> {
        sqlx::query("DELETE FROM playlists WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Position is unique within a playlist; inserting at a taken position
    /// surfaces the unique violation to the caller.
    pub async fn add_playlist_track(
        &self,
        playlist_id: Uuid,
        track_id: Uuid,
        position: i32,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO playlist_tracks (playlist_id, track_id, position) VALUES ($1, $2, $3)",
        )
        .bind(playlist_id)
        .bind(track_id)
        .bind(position)
        .execute(self.pool())
        .await?;
        sqlx::query("UPDATE playlists SET updated_at = now() WHERE id = $1")
            .bind(playlist_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn remove_playlist_track(
        &self,
        playlist_id: Uuid,
        track_id: Uuid,
    ) -> Result<(), DbError> {
        sqlx::query("DELETE FROM playlist_tracks WHERE playlist_id = $1 AND track_id = $2")
            .bind(playlist_id)
            .bind(track_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn list_playlist_tracks(
        &self,
        playlist_id: Uuid,
    ) -> Result<Vec<PlaylistTrack>, DbError> {
        let rows = sqlx::query_as::<_, PlaylistTrack>(
            "SELECT * FROM playlist_tracks WHERE playlist_id = $1 ORDER BY position ASC",
        )
        .bind(playlist_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    /// Position may be negative (prepend) or large (append); playback order
    /// is strictly ascending position, contiguity not required.
    pub async fn push_queue_entry(
        &self,
        user_id: Uuid,
        track_id: Uuid,
        position: i64,
        source: Option<&str>,
    ) -> Result<QueueEntry, DbError> {
        let entry = sqlx::query_as::<_, QueueEntry>(
            r#"
            INSERT INTO queue_entries (user_id, track_id, position, source)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(track_id)
        .bind(position)
        .bind(source)
        .fetch_one(self.pool())
        .await?;
        Ok(entry)
    }

    pub async fn list_queue(&self, user_id: Uuid) -> Result<Vec<QueueEntry>, DbError> {
        let entries = sqlx::query_as::<_, QueueEntry>(
            "SELECT * FROM queue_entries WHERE user_id = $1 ORDER BY position ASC, id ASC",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(entries)
    }

    pub async fn remove_queue_entry(&self, user_id: Uuid, entry_id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM queue_entries WHERE user_id = $1 AND id = $2")
            .bind(user_id)
            .bind(entry_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn clear_queue(&self, user_id: Uuid) -> Result<(), DbError> {
        sqlx::query("DELETE FROM queue_entries WHERE user_id = $1")
            .bind(user_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Play history
    // ------------------------------------------------------------------

    pub async fn append_play_history(
        &self,
        user_id: Uuid,
        track_id: Uuid,
        duration_played_ms: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO play_history (user_id, track_id, duration_played_ms) VALUES ($1, $2, $3)",
        )
        .bind(user_id)
        .bind(track_id)
        .bind(duration_played_ms)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Most recent distinct tracks, newest first. DISTINCT ON picks the
    /// latest play per track; the outer query restores recency order.
    pub async fn recently_played(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<PlayHistoryEntry>, DbError> {
        let entries = sqlx::query_as::<_, PlayHistoryEntry>(
            r#"
            SELECT track_id, played_at, duration_played_ms FROM (
                SELECT DISTINCT ON (track_id) track_id, played_at, duration_played_ms
                FROM play_history
                WHERE user_id = $1
                ORDER BY track_id, played_at DESC
            ) latest
            ORDER BY played_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(entries)
    }

    /// Most-played tracks of a playlist, for the composite cover endpoint.
    pub async fn most_played_playlist_tracks(
        &self,
        playlist_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Track>, DbError> {
        let tracks = sqlx::query_as::<_, Track>(
            r#"
            SELECT tracks.* FROM tracks
            JOIN playlist_tracks pt ON pt.track_id = tracks.id
            LEFT JOIN play_history ph ON ph.track_id = tracks.id
            WHERE pt.playlist_id = $1
            GROUP BY tracks.id, pt.position
            ORDER BY count(ph.id) DESC, pt.position ASC
            LIMIT $2
            "#,
        )
        .bind(playlist_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(tracks)
    }
}
