//! Best-effort catalog enrichment from external metadata.
//!
//! Every lookup is deduplicated per run: an artist or album id is queried at
//! most once no matter how many tracks reference it. Failures are logged and
//! never roll back the ingest that triggered them.
pub mod coverart;
pub mod musicbrainz;

use crate::db::models::{Album, Artist, Genre};
use crate::db::Database;
use crate::storage::{self, ObjectStorage};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Keep at most this many genres per entity.
const MAX_GENRES: usize = 5;

/// Keep at most this many related artists per artist.
const MAX_RELATED: usize = 10;

pub struct Enricher {
    db: Database,
    storage: Arc<dyn ObjectStorage>,
    cover_client: coverart::CoverArtClient,
    seen_artists: Mutex<HashSet<String>>,
    seen_albums: Mutex<HashSet<String>>,
}

impl Enricher {
    pub fn new(db: Database, storage: Arc<dyn ObjectStorage>) -> Self {
        Self {
            db,
            storage,
            cover_client: coverart::CoverArtClient::new(),
            seen_artists: Mutex::new(HashSet::new()),
            seen_albums: Mutex::new(HashSet::new()),
        }
    }

    /// Enrich an artist row. No-op when this run already looked the id up.
    pub async fn enrich_artist(&self, artist: &Artist) {
        if !self.seen_artists.lock().await.insert(artist.id.clone()) {
            return;
        }

        let results = match musicbrainz::search_artists(&artist.name).await {
            Ok(results) => results,
            Err(e) => {
                warn!("artist enrichment failed for '{}': {}", artist.name, e);
                return;
            }
        };

        let Some(best) = results
            .into_iter()
            .find(|a| a.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(&artist.name)))
        else {
            debug!("no artist match for '{}'", artist.name);
            return;
        };

        let life_span = best.life_span.unwrap_or_default();
        if let Err(e) = self
            .db
            .update_artist_enrichment(
                &artist.id,
                best.id.as_deref(),
                best.artist_type.as_deref(),
                best.country.as_deref(),
                life_span.begin.as_deref(),
                life_span.end.as_deref(),
                best.disambiguation.as_deref(),
                None,
            )
            .await
        {
            warn!("failed to store artist enrichment for {}: {}", artist.id, e);
            return;
        }

        let genres = top_genres(&best.genres);
        if !genres.is_empty() {
            if let Err(e) = self.db.replace_artist_genres(&artist.id, &genres).await {
                warn!("failed to store artist genres for {}: {}", artist.id, e);
            }
        }

        if let Some(mbid) = best.id.as_deref() {
            self.enrich_related_artists(artist, mbid).await;
        }

        info!("enriched artist '{}'", artist.name);
    }

    /// Fetch artist-to-artist relations and replace the related-artist rows.
    /// Each counterpart is upserted first so the triples always reference
    /// live artist rows.
    async fn enrich_related_artists(&self, artist: &Artist, mbid: &str) {
        let relations = match musicbrainz::lookup_artist_relations(mbid).await {
            Ok(relations) => relations,
            Err(e) => {
                warn!("relation lookup failed for '{}': {}", artist.name, e);
                return;
            }
        };

        let pairs = related_artist_pairs(&relations, &artist.name);
        if pairs.is_empty() {
            return;
        }

        let mut related = Vec::with_capacity(pairs.len());
        for (name, rel_type) in pairs {
            let related_id = crate::ingest::ids::artist_id(&name);
            if let Err(e) = self
                .db
                .upsert_artist(&related_id, &name, &crate::util::sort_name(&name))
                .await
            {
                warn!("failed to upsert related artist '{}': {}", name, e);
                continue;
            }
            related.push((related_id, rel_type));
        }

        if let Err(e) = self.db.replace_related_artists(&artist.id, &related).await {
            warn!("failed to store related artists for {}: {}", artist.id, e);
        } else {
            debug!("stored {} related artists for '{}'", related.len(), artist.name);
        }
    }

    /// Enrich an album row; when the catalog has no cover for it, try the
    /// cover archive via the matched release group.
    pub async fn enrich_album(&self, album: &Album, artist_name: &str) {
        if !self.seen_albums.lock().await.insert(album.id.clone()) {
            return;
        }

        let results = match musicbrainz::search_release_groups(artist_name, &album.title).await {
            Ok(results) => results,
            Err(e) => {
                warn!("album enrichment failed for '{}': {}", album.title, e);
                return;
            }
        };

        let Some(best) = results.into_iter().find(|rg| {
            rg.title
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case(&album.title))
        }) else {
            debug!("no release-group match for '{}'", album.title);
            return;
        };

        if let Err(e) = self
            .db
            .update_album_enrichment(
                &album.id,
                best.id.as_deref(),
                best.primary_type.as_deref(),
                None,
                best.first_release_date.as_deref(),
                best.id.as_deref(),
                best.year(),
                None,
            )
            .await
        {
            warn!("failed to store album enrichment for {}: {}", album.id, e);
            return;
        }

        let genres = top_genres(&best.genres);
        if !genres.is_empty() {
            if let Err(e) = self.db.replace_album_genres(&album.id, &genres).await {
                warn!("failed to store album genres for {}: {}", album.id, e);
            }
        }

        if album.cover_key.is_none() {
            if let Some(rg_id) = best.id.as_deref() {
                self.fetch_archive_cover(&album.id, rg_id).await;
            }
        }

        info!("enriched album '{}'", album.title);
    }

    /// Pull a front cover from the archive and persist it for the album.
    async fn fetch_archive_cover(&self, album_id: &str, release_group_id: &str) {
        let cover = match self.cover_client.front_cover(release_group_id).await {
            Ok(cover) => cover,
            Err(coverart::CoverArtError::NotFound(_)) => {
                debug!("no archive cover for album {}", album_id);
                return;
            }
            Err(e) => {
                warn!("archive cover fetch failed for album {}: {}", album_id, e);
                return;
            }
        };

        let key = storage::album_cover_key(album_id);
        let encoded = crate::ingest::cover::encode_cover_jpeg(&cover.data);
        if let Err(e) = self.storage.put(&key, &encoded).await {
            warn!("failed to store archive cover for album {}: {}", album_id, e);
            return;
        }

        if let Err(e) = self
            .db
            .update_album_enrichment(album_id, None, None, None, None, None, None, Some(&key))
            .await
        {
            warn!("failed to record archive cover for album {}: {}", album_id, e);
        }
    }
}

/// `(name, rel_type)` pairs from artist relations: named counterparts only,
/// self-references dropped, deduplicated, capped at MAX_RELATED.
fn related_artist_pairs(
    relations: &[musicbrainz::MbRelation],
    own_name: &str,
) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    let mut pairs = Vec::new();
    for relation in relations {
        let Some(name) = relation.artist.as_ref().and_then(|a| a.name.as_deref()) else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case(own_name) {
            continue;
        }
        let rel_type = relation
            .rel_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("related")
            .to_string();
        if !seen.insert((name.to_lowercase(), rel_type.to_lowercase())) {
            continue;
        }
        pairs.push((name.to_string(), rel_type));
        if pairs.len() == MAX_RELATED {
            break;
        }
    }
    pairs
}

/// Highest-voted genres, capped at MAX_GENRES.
fn top_genres(genres: &[musicbrainz::MbGenre]) -> Vec<Genre> {
    let mut named: Vec<(&str, i64)> = genres
        .iter()
        .filter_map(|g| g.name.as_deref().map(|n| (n, g.count)))
        .filter(|(n, _)| !n.trim().is_empty())
        .collect();
    named.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    named
        .into_iter()
        .take(MAX_GENRES)
        .map(|(name, _)| Genre::from_name(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use musicbrainz::MbGenre;

    fn genre(name: &str, count: i64) -> MbGenre {
        MbGenre {
            name: Some(name.to_string()),
            count,
        }
    }

    #[test]
    fn top_genres_sorted_and_capped() {
        let genres = vec![
            genre("jazz", 20),
            genre("bebop", 5),
            genre("cool jazz", 12),
            genre("fusion", 1),
            genre("modal", 9),
            genre("hard bop", 7),
        ];
        let top = top_genres(&genres);
        assert_eq!(top.len(), 5);
        assert_eq!(top[0].name, "jazz");
        assert_eq!(top[1].name, "cool jazz");
        // "fusion" (count 1) is the one cut
        assert!(top.iter().all(|g| g.name != "fusion"));
    }

    #[test]
    fn top_genres_skips_unnamed() {
        let genres = vec![
            MbGenre { name: None, count: 99 },
            genre("  ", 50),
            genre("jazz", 1),
        ];
        let top = top_genres(&genres);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].id, "jazz");
    }

    fn relation(name: Option<&str>, rel_type: Option<&str>) -> musicbrainz::MbRelation {
        musicbrainz::MbRelation {
            rel_type: rel_type.map(String::from),
            artist: name.map(|n| musicbrainz::MbArtistRef {
                id: None,
                name: Some(n.to_string()),
                sort_name: None,
            }),
        }
    }

    #[test]
    fn related_pairs_keep_named_counterparts() {
        let relations = vec![
            relation(Some("Miles Davis Quintet"), Some("member of band")),
            relation(Some("Gil Evans"), Some("collaboration")),
            relation(None, Some("member of band")),
            relation(Some("Miles Davis"), Some("collaboration")), // self
            relation(Some("  "), Some("collaboration")),
        ];
        let pairs = related_artist_pairs(&relations, "Miles Davis");
        assert_eq!(
            pairs,
            vec![
                ("Miles Davis Quintet".to_string(), "member of band".to_string()),
                ("Gil Evans".to_string(), "collaboration".to_string()),
            ]
        );
    }

    #[test]
    fn related_pairs_default_type_and_dedup() {
        let relations = vec![
            relation(Some("Gil Evans"), None),
            relation(Some("gil evans"), Some("")),
            relation(Some("Gil Evans"), Some("collaboration")),
        ];
        let pairs = related_artist_pairs(&relations, "Miles Davis");
        assert_eq!(
            pairs,
            vec![
                ("Gil Evans".to_string(), "related".to_string()),
                ("Gil Evans".to_string(), "collaboration".to_string()),
            ]
        );
    }

    #[test]
    fn related_pairs_capped() {
        let relations: Vec<_> = (0..20)
            .map(|i| relation(Some(&format!("Artist {}", i)), Some("collaboration")))
            .collect();
        let pairs = related_artist_pairs(&relations, "Someone Else");
        assert_eq!(pairs.len(), MAX_RELATED);
    }
}
