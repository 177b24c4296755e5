//! MusicBrainz client for catalog enrichment.
//!
//! One outbound request per second across the whole process, enforced by a
//! mutex-guarded last-call instant. A 503 backs off two seconds and retries
//! once; anything else surfaces to the caller, who treats enrichment as
//! best-effort.
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

const BASE_URL: &str = "https://musicbrainz.org/ws/2";
const RESULT_LIMIT: usize = 5;

/// Shared HTTP client for all MusicBrainz requests.
fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .user_agent("orb/0.1 +https://github.com/orb-music/orb")
            .timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to create HTTP client")
    })
}

/// Rate limiter ensuring at least 1 second between API requests.
fn rate_limiter() -> &'static Mutex<Instant> {
    static LIMITER: OnceLock<Mutex<Instant>> = OnceLock::new();
    LIMITER.get_or_init(|| Mutex::new(Instant::now() - Duration::from_secs(1)))
}

async fn wait_for_rate_limit() {
    let mut last_request = rate_limiter().lock().await;
    let elapsed = last_request.elapsed();
    if elapsed < Duration::from_secs(1) {
        tokio::time::sleep(Duration::from_secs(1) - elapsed).await;
    }
    *last_request = Instant::now();
}

/// Quote a value for a Lucene field query, escaping embedded quotes and
/// backslashes.
pub fn lucene_quote(value: &str) -> String {
    let escaped = value.trim().replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

#[derive(Error, Debug)]
pub enum MusicBrainzError {
    #[error("MusicBrainz API error: {0}")]
    Api(String),
    #[error("MusicBrainz returned status {0}")]
    Status(u16),
}

// ============================================================================
// Serde response types — decoded leniently, missing fields stay empty
// ============================================================================

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MbLifeSpan {
    pub begin: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MbGenre {
    pub name: Option<String>,
    #[serde(default)]
    pub count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MbArtist {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "sort-name")]
    pub sort_name: Option<String>,
    #[serde(rename = "type")]
    pub artist_type: Option<String>,
    pub country: Option<String>,
    #[serde(rename = "life-span", default)]
    pub life_span: Option<MbLifeSpan>,
    pub disambiguation: Option<String>,
    #[serde(default)]
    pub genres: Vec<MbGenre>,
    #[serde(default)]
    pub score: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ArtistSearchResponse {
    #[serde(default)]
    artists: Vec<MbArtist>,
}

/// Reference to another artist inside a relation.
#[derive(Debug, Clone, Deserialize)]
pub struct MbArtistRef {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "sort-name")]
    pub sort_name: Option<String>,
}

/// An artist-to-artist relation (member of band, collaboration, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct MbRelation {
    #[serde(rename = "type")]
    pub rel_type: Option<String>,
    pub artist: Option<MbArtistRef>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ArtistLookupResponse {
    #[serde(default)]
    relations: Vec<MbRelation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MbArtistCredit {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MbReleaseGroup {
    pub id: Option<String>,
    pub title: Option<String>,
    #[serde(rename = "first-release-date")]
    pub first_release_date: Option<String>,
    #[serde(rename = "primary-type")]
    pub primary_type: Option<String>,
    #[serde(rename = "artist-credit", default)]
    pub artist_credit: Vec<MbArtistCredit>,
    #[serde(default)]
    pub genres: Vec<MbGenre>,
}

impl MbReleaseGroup {
    /// Four-digit year from the first release date, when present.
    pub fn year(&self) -> Option<i32> {
        self.first_release_date
            .as_deref()
            .and_then(|d| d.get(..4))
            .and_then(|y| y.parse().ok())
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ReleaseGroupSearchResponse {
    #[serde(rename = "release-groups", default)]
    release_groups: Vec<MbReleaseGroup>,
}

// ============================================================================
// API calls
// ============================================================================

/// One rate-limited GET with the 503 backoff-and-retry-once policy.
async fn get_with_retry(url: &str, query: &[(&str, &str)]) -> Result<String, MusicBrainzError> {
    for attempt in 0..2 {
        wait_for_rate_limit().await;

        let response = http_client()
            .get(url)
            .query(query)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| MusicBrainzError::Api(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 503 && attempt == 0 {
            warn!("MusicBrainz returned 503, backing off 2s");
            tokio::time::sleep(Duration::from_secs(2)).await;
            continue;
        }
        if !status.is_success() {
            return Err(MusicBrainzError::Status(status.as_u16()));
        }

        return response
            .text()
            .await
            .map_err(|e| MusicBrainzError::Api(format!("failed to read body: {}", e)));
    }
    Err(MusicBrainzError::Status(503))
}

/// Search artists by name. Results are trimmed to the top five.
pub async fn search_artists(name: &str) -> Result<Vec<MbArtist>, MusicBrainzError> {
    let query = format!("artist:{}", lucene_quote(name));
    debug!("MusicBrainz artist search: {}", query);

    let url = format!("{}/artist", BASE_URL);
    let body = get_with_retry(&url, &[("query", query.as_str()), ("limit", "5")]).await?;

    let parsed: ArtistSearchResponse = serde_json::from_str(&body)
        .map_err(|e| MusicBrainzError::Api(format!("failed to parse JSON: {}", e)))?;

    Ok(parsed.artists.into_iter().take(RESULT_LIMIT).collect())
}

/// Look up an artist's artist-to-artist relations by MusicBrainz id.
pub async fn lookup_artist_relations(mbid: &str) -> Result<Vec<MbRelation>, MusicBrainzError> {
    debug!("MusicBrainz artist relations lookup: {}", mbid);

    let url = format!("{}/artist/{}", BASE_URL, mbid);
    let body = get_with_retry(&url, &[("inc", "artist-rels")]).await?;

    let parsed: ArtistLookupResponse = serde_json::from_str(&body)
        .map_err(|e| MusicBrainzError::Api(format!("failed to parse JSON: {}", e)))?;

    Ok(parsed.relations)
}

/// Search release groups by artist and title. Results trimmed to top five.
pub async fn search_release_groups(
    artist: &str,
    title: &str,
) -> Result<Vec<MbReleaseGroup>, MusicBrainzError> {
    let query = format!(
        "releasegroup:{} AND artist:{}",
        lucene_quote(title),
        lucene_quote(artist)
    );
    debug!("MusicBrainz release-group search: {}", query);

    let url = format!("{}/release-group", BASE_URL);
    let body = get_with_retry(&url, &[("query", query.as_str()), ("limit", "5")]).await?;

    let parsed: ReleaseGroupSearchResponse = serde_json::from_str(&body)
        .map_err(|e| MusicBrainzError::Api(format!("failed to parse JSON: {}", e)))?;

    Ok(parsed.release_groups.into_iter().take(RESULT_LIMIT).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lucene_quote_wraps_and_escapes() {
        assert_eq!(lucene_quote("Miles Davis"), "\"Miles Davis\"");
        assert_eq!(lucene_quote("  trimmed  "), "\"trimmed\"");
        assert_eq!(
            lucene_quote("The \"Black\" Album"),
            "\"The \\\"Black\\\" Album\""
        );
        assert_eq!(lucene_quote("back\\slash"), "\"back\\\\slash\"");
    }

    #[test]
    fn release_group_year_extraction() {
        let rg = MbReleaseGroup {
            id: Some("rg".to_string()),
            title: Some("Kind of Blue".to_string()),
            first_release_date: Some("1959-08-17".to_string()),
            primary_type: Some("Album".to_string()),
            artist_credit: vec![],
            genres: vec![],
        };
        assert_eq!(rg.year(), Some(1959));

        let rg_no_date = MbReleaseGroup {
            first_release_date: None,
            ..rg.clone()
        };
        assert_eq!(rg_no_date.year(), None);

        let rg_year_only = MbReleaseGroup {
            first_release_date: Some("2002".to_string()),
            ..rg
        };
        assert_eq!(rg_year_only.year(), Some(2002));
    }

    #[test]
    fn lenient_artist_decode() {
        let json = r#"{
            "artists": [
                {
                    "id": "da612f5e",
                    "name": "Miles Davis",
                    "sort-name": "Davis, Miles",
                    "type": "Person",
                    "country": "US",
                    "life-span": { "begin": "1926-05-26", "end": "1991-09-28" },
                    "genres": [ { "name": "jazz", "count": 20 }, { "name": "bebop" } ]
                },
                { "name": "Sparse Artist" }
            ]
        }"#;
        let parsed: ArtistSearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.artists.len(), 2);
        assert_eq!(parsed.artists[0].country.as_deref(), Some("US"));
        assert_eq!(parsed.artists[0].genres.len(), 2);
        assert_eq!(parsed.artists[0].genres[1].count, 0);
        assert!(parsed.artists[1].id.is_none());
        assert!(parsed.artists[1].genres.is_empty());
    }

    #[test]
    fn lenient_relation_decode() {
        let json = r#"{
            "id": "da612f5e",
            "name": "Miles Davis",
            "relations": [
                {
                    "type": "member of band",
                    "artist": { "id": "x1", "name": "Miles Davis Quintet", "sort-name": "Davis, Miles, Quintet" }
                },
                { "type": "collaboration" },
                { "artist": { "name": "Nameless Type" } }
            ]
        }"#;
        let parsed: ArtistLookupResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.relations.len(), 3);
        assert_eq!(parsed.relations[0].rel_type.as_deref(), Some("member of band"));
        assert_eq!(
            parsed.relations[0].artist.as_ref().unwrap().name.as_deref(),
            Some("Miles Davis Quintet")
        );
        assert!(parsed.relations[1].artist.is_none());
        assert!(parsed.relations[2].rel_type.is_none());

        // No relations key at all decodes to empty.
        let bare: ArtistLookupResponse = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
        assert!(bare.relations.is_empty());
    }

    #[test]
    fn lenient_release_group_decode() {
        let json = r#"{
            "release-groups": [
                {
                    "id": "rg-1",
                    "title": "Kind of Blue",
                    "first-release-date": "1959-08-17",
                    "primary-type": "Album"
                },
                {}
            ]
        }"#;
        let parsed: ReleaseGroupSearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.release_groups.len(), 2);
        assert_eq!(parsed.release_groups[0].year(), Some(1959));
        assert!(parsed.release_groups[1].id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_enforces_spacing() {
        let start = Instant::now();
        wait_for_rate_limit().await;
        let first_elapsed = start.elapsed();
        assert!(
            first_elapsed < Duration::from_millis(100),
            "first call should be near-instant, took {:?}",
            first_elapsed
        );

        let start = Instant::now();
        wait_for_rate_limit().await;
        let second_elapsed = start.elapsed();
        assert!(
            second_elapsed >= Duration::from_millis(900),
            "second call should wait ~1s, only waited {:?}",
            second_elapsed
        );
    }
}
