use super::models::{Album, Artist, Genre, Track};
use super::{Database, DbError};
use serde::Serialize;
use uuid::Uuid;

/// Whitelisted album list orderings. Anything unrecognized falls back to
/// title order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlbumSort {
    Title,
    Artist,
    Year,
}

impl AlbumSort {
    /// Parse a user-supplied sort key. Only whitelisted values map to an
    /// ORDER BY fragment; everything else is `Title`.
    pub fn parse(key: &str) -> Self {
        match key.trim().to_lowercase().as_str() {
            "artist" => Self::Artist,
            "year" => Self::Year,
            _ => Self::Title,
        }
    }

    /// ORDER BY fragment, inlined into the query. Values come only from the
    /// enum above, never from user input. Leading articles are stripped so
    /// "The Orb" sorts under O.
    fn order_by(&self) -> &'static str {
        match self {
            Self::Title => {
                "lower(regexp_replace(albums.title, '^(the |a |an )', '', 'i')) ASC"
            }
            Self::Artist => {
                "lower(coalesce(artists.sort_name, '')) ASC, lower(regexp_replace(albums.title, '^(the |a |an )', '', 'i')) ASC"
            }
            Self::Year => {
                "albums.year ASC NULLS LAST, lower(regexp_replace(albums.title, '^(the |a |an )', '', 'i')) ASC"
            }
        }
    }
}

/// A ranked full-text search match.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit<T> {
    pub rank: f32,
    #[serde(flatten)]
    pub item: T,
}

impl Database {
    // ------------------------------------------------------------------
    // Artists
    // ------------------------------------------------------------------

    /// Idempotent artist upsert. The image key is preserved when the new
    /// value is NULL so enrichment never loses a stored image.
    pub async fn upsert_artist(
        &self,
        id: &str,
        name: &str,
        sort_name: &str,
    ) -> Result<Artist, DbError> {
        let artist = sqlx::query_as::<_, Artist>(
            r#"
            INSERT INTO artists (id, name, sort_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                sort_name = EXCLUDED.sort_name,
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(sort_name)
        .fetch_one(self.pool())
        .await?;
        Ok(artist)
    }

    pub async fn get_artist(&self, id: &str) -> Result<Option<Artist>, DbError> {
        let artist = sqlx::query_as::<_, Artist>("SELECT * FROM artists WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(artist)
    }

    pub async fn list_artists(&self) -> Result<Vec<Artist>, DbError> {
        let artists =
            sqlx::query_as::<_, Artist>("SELECT * FROM artists ORDER BY lower(sort_name) ASC")
                .fetch_all(self.pool())
                .await?;
        Ok(artists)
    }

    /// Overwrite enrichment columns. NULL inputs keep the existing value.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_artist_enrichment(
        &self,
        id: &str,
        external_id: Option<&str>,
        artist_type: Option<&str>,
        country: Option<&str>,
        begin_date: Option<&str>,
        end_date: Option<&str>,
        disambiguation: Option<&str>,
        image_key: Option<&str>,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE artists SET
                external_id = COALESCE($2, external_id),
                artist_type = COALESCE($3, artist_type),
                country = COALESCE($4, country),
                begin_date = COALESCE($5, begin_date),
                end_date = COALESCE($6, end_date),
                disambiguation = COALESCE($7, disambiguation),
                image_key = COALESCE($8, image_key),
                enriched_at = now(),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(external_id)
        .bind(artist_type)
        .bind(country)
        .bind(begin_date)
        .bind(end_date)
        .bind(disambiguation)
        .bind(image_key)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Replace all genre associations for an artist in one transaction.
    pub async fn replace_artist_genres(
        &self,
        artist_id: &str,
        genres: &[Genre],
    ) -> Result<(), DbError> {
        let mut tx = self.pool().begin().await?;
        for genre in genres {
            sqlx::query(
                "INSERT INTO genres (id, name) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
            )
            .bind(&genre.id)
            .bind(&genre.name)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("DELETE FROM artist_genres WHERE artist_id = $1")
            .bind(artist_id)
            .execute(&mut *tx)
            .await?;
        for genre in genres {
            sqlx::query(
                "INSERT INTO artist_genres (artist_id, genre_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(artist_id)
            .bind(&genre.id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn replace_related_artists(
        &self,
        artist_id: &str,
        related: &[(String, String)],
    ) -> Result<(), DbError> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM related_artists WHERE artist_id = $1")
            .bind(artist_id)
            .execute(&mut *tx)
            .await?;
        for (related_id, rel_type) in related {
            sqlx::query(
                r#"
                INSERT INTO related_artists (artist_id, related_id, rel_type)
                VALUES ($1, $2, $3)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(artist_id)
            .bind(related_id)
            .bind(rel_type)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Albums
    // ------------------------------------------------------------------

    /// Idempotent album upsert. Cover key and year use COALESCE(new,
    /// existing): a run that found no cover never clears one stored earlier.
    pub async fn upsert_album(
        &self,
        id: &str,
        artist_id: Option<&str>,
        title: &str,
        year: Option<i32>,
        cover_key: Option<&str>,
    ) -> Result<Album, DbError> {
        let album = sqlx::query_as::<_, Album>(
            r#"
            INSERT INTO albums (id, artist_id, title, year, cover_key)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                artist_id = COALESCE(EXCLUDED.artist_id, albums.artist_id),
                title = EXCLUDED.title,
                year = COALESCE(EXCLUDED.year, albums.year),
                cover_key = COALESCE(EXCLUDED.cover_key, albums.cover_key),
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(artist_id)
        .bind(title)
        .bind(year)
        .bind(cover_key)
        .fetch_one(self.pool())
        .await?;
        Ok(album)
    }

    pub async fn get_album(&self, id: &str) -> Result<Option<Album>, DbError> {
        let album = sqlx::query_as::<_, Album>("SELECT * FROM albums WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(album)
    }

    pub async fn list_albums_by_artist(&self, artist_id: &str) -> Result<Vec<Album>, DbError> {
        let albums = sqlx::query_as::<_, Album>(
            "SELECT * FROM albums WHERE artist_id = $1 ORDER BY year ASC NULLS LAST, lower(title) ASC",
        )
        .bind(artist_id)
        .fetch_all(self.pool())
        .await?;
        Ok(albums)
    }

    /// List albums with a whitelisted ordering.
    pub async fn list_albums(&self, sort: AlbumSort, limit: i64) -> Result<Vec<Album>, DbError> {
        let sql = format!(
            r#"
            SELECT albums.* FROM albums
            LEFT JOIN artists ON artists.id = albums.artist_id
            ORDER BY {}
            LIMIT $1
            "#,
            sort.order_by()
        );
        let albums = sqlx::query_as::<_, Album>(&sql)
            .bind(limit)
            .fetch_all(self.pool())
            .await?;
        Ok(albums)
    }

    /// Overwrite album enrichment columns, preserving existing values on NULL.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_album_enrichment(
        &self,
        id: &str,
        external_id: Option<&str>,
        album_type: Option<&str>,
        label: Option<&str>,
        release_date: Option<&str>,
        release_group_id: Option<&str>,
        year: Option<i32>,
        cover_key: Option<&str>,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE albums SET
                external_id = COALESCE($2, external_id),
                album_type = COALESCE($3, album_type),
                label = COALESCE($4, label),
                release_date = COALESCE($5, release_date),
                release_group_id = COALESCE($6, release_group_id),
                year = COALESCE($7, year),
                cover_key = COALESCE($8, cover_key),
                enriched_at = now(),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(external_id)
        .bind(album_type)
        .bind(label)
        .bind(release_date)
        .bind(release_group_id)
        .bind(year)
        .bind(cover_key)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Replace all genre associations for an album in one transaction.
    pub async fn replace_album_genres(
        &self,
        album_id: &str,
        genres: &[Genre],
    ) -> Result<(), DbError> {
        let mut tx = self.pool().begin().await?;
        for genre in genres {
            sqlx::query(
                "INSERT INTO genres (id, name) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
            )
            .bind(&genre.id)
            .bind(&genre.name)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("DELETE FROM album_genres WHERE album_id = $1")
            .bind(album_id)
            .execute(&mut *tx)
            .await?;
        for genre in genres {
            sqlx::query(
                "INSERT INTO album_genres (album_id, genre_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(album_id)
            .bind(&genre.id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tracks
    // ------------------------------------------------------------------

    /// Idempotent track upsert keyed by the fingerprint-derived id.
    pub async fn upsert_track(&self, track: &Track) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO tracks (
                id, album_id, artist_id, title, track_number, disc_number,
                duration_ms, file_key, file_size, format, bit_depth,
                sample_rate, channels, bitrate, seek_table, fingerprint,
                external_id, lyrics
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (id) DO UPDATE SET
                album_id = COALESCE(EXCLUDED.album_id, tracks.album_id),
                artist_id = COALESCE(EXCLUDED.artist_id, tracks.artist_id),
                title = EXCLUDED.title,
                track_number = COALESCE(EXCLUDED.track_number, tracks.track_number),
                disc_number = COALESCE(EXCLUDED.disc_number, tracks.disc_number),
                duration_ms = EXCLUDED.duration_ms,
                file_key = tracks.file_key,
                file_size = EXCLUDED.file_size,
                format = EXCLUDED.format,
                bit_depth = COALESCE(EXCLUDED.bit_depth, tracks.bit_depth),
                sample_rate = EXCLUDED.sample_rate,
                channels = EXCLUDED.channels,
                bitrate = COALESCE(EXCLUDED.bitrate, tracks.bitrate),
                seek_table = COALESCE(EXCLUDED.seek_table, tracks.seek_table),
                lyrics = COALESCE(EXCLUDED.lyrics, tracks.lyrics),
                updated_at = now()
            "#,
        )
        .bind(track.id)
        .bind(&track.album_id)
        .bind(&track.artist_id)
        .bind(&track.title)
        .bind(track.track_number)
        .bind(track.disc_number)
        .bind(track.duration_ms)
        .bind(&track.file_key)
        .bind(track.file_size)
        .bind(track.format.as_str())
        .bind(track.bit_depth)
        .bind(track.sample_rate)
        .bind(track.channels)
        .bind(track.bitrate)
        .bind(&track.seek_table)
        .bind(&track.fingerprint)
        .bind(&track.external_id)
        .bind(&track.lyrics)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_track(&self, id: Uuid) -> Result<Option<Track>, DbError> {
        let track = sqlx::query_as::<_, Track>("SELECT * FROM tracks WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(track)
    }

    pub async fn list_tracks_by_album(&self, album_id: &str) -> Result<Vec<Track>, DbError> {
        let tracks = sqlx::query_as::<_, Track>(
            r#"
            SELECT * FROM tracks WHERE album_id = $1
            ORDER BY disc_number ASC NULLS FIRST, track_number ASC NULLS LAST, lower(title) ASC
            "#,
        )
        .bind(album_id)
        .fetch_all(self.pool())
        .await?;
        Ok(tracks)
    }

    // ------------------------------------------------------------------
    // Full-text search
    // ------------------------------------------------------------------

    pub async fn search_artists(
        &self,
        query: &str,
        limit: i64,
    ) -> Result<Vec<SearchHit<Artist>>, DbError> {
        #[derive(sqlx::FromRow)]
        struct Row {
            rank: f32,
            #[sqlx(flatten)]
            item: Artist,
        }
        let rows: Vec<Row> = sqlx::query_as(
            r#"
            SELECT ts_rank(search_vec, q) AS rank, artists.*
            FROM artists, websearch_to_tsquery('simple', $1) q
            WHERE search_vec @@ q
            ORDER BY rank DESC
            LIMIT $2
            "#,
        )
        .bind(query)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| SearchHit { rank: r.rank, item: r.item })
            .collect())
    }

    pub async fn search_albums(
        &self,
        query: &str,
        limit: i64,
    ) -> Result<Vec<SearchHit<Album>>, DbError> {
        #[derive(sqlx::FromRow)]
        struct Row {
            rank: f32,
            #[sqlx(flatten)]
            item: Album,
        }
        let rows: Vec<Row> = sqlx::query_as(
            r#"
            SELECT ts_rank(albums.search_vec, q) AS rank, albums.*
            FROM albums, websearch_to_tsquery('simple', $1) q
            WHERE albums.search_vec @@ q
            ORDER BY rank DESC
            LIMIT $2
            "#,
        )
        .bind(query)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| SearchHit { rank: r.rank, item: r.item })
            .collect())
    }

    /// Track search joins the artist vector so "miles blue" matches a track
    /// titled "Blue in Green" by Miles Davis.
    pub async fn search_tracks(
        &self,
        query: &str,
        limit: i64,
    ) -> Result<Vec<SearchHit<Track>>, DbError> {
        #[derive(sqlx::FromRow)]
        struct Row {
            rank: f32,
            #[sqlx(flatten)]
            item: Track,
        }
        let rows: Vec<Row> = sqlx::query_as(
            r#"
            SELECT ts_rank(tracks.search_vec || coalesce(artists.search_vec, ''::tsvector), q) AS rank,
                   tracks.*
            FROM tracks
            LEFT JOIN artists ON artists.id = tracks.artist_id,
            websearch_to_tsquery('simple', $1) q
            WHERE (tracks.search_vec || coalesce(artists.search_vec, ''::tsvector)) @@ q
            ORDER BY rank DESC
            LIMIT $2
            "#,
        )
        .bind(query)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| SearchHit { rank: r.rank, item: r.item })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_key_whitelist() {
        assert_eq!(AlbumSort::parse("title"), AlbumSort::Title);
        assert_eq!(AlbumSort::parse("artist"), AlbumSort::Artist);
        assert_eq!(AlbumSort::parse("YEAR"), AlbumSort::Year);
        // Anything else falls back to title -- never inlined verbatim.
        assert_eq!(AlbumSort::parse("title; DROP TABLE albums"), AlbumSort::Title);
        assert_eq!(AlbumSort::parse(""), AlbumSort::Title);
    }

    #[test]
    fn order_by_strips_articles() {
        assert!(AlbumSort::Title.order_by().contains("regexp_replace"));
        assert!(AlbumSort::Artist.order_by().contains("sort_name"));
        assert!(AlbumSort::Year.order_by().starts_with("albums.year"));
    }
}
