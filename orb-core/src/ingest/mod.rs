//! Concurrent, idempotent, restart-safe library ingest.
//!
//! The engine bulk-loads the skip index once, walks the tree, and fans paths
//! out to a bounded worker pool. Per-file work is independent; all shared
//! state is the skip map (one RwLock) and three per-run dedupe sets (covers
//! processed, folder images memoised, enrichment lookups). A crash mid-file
//! leaves the skip index untouched for that path, so the next run simply
//! redoes the file — every downstream write is an idempotent upsert.
pub mod cover;
pub mod flac;
pub mod ids;
pub mod tags;
pub mod watch;

use crate::config::IngestConfig;
use crate::content_type::{is_audio_path, AudioFormat};
use crate::db::models::Track;
use crate::db::{Database, DbError, SkipEntry};
use crate::enrich::Enricher;
use crate::storage::{self, ObjectStorage, StorageError};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

const DISPATCH_BUFFER: usize = 256;
const HASH_CHUNK: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Tag(#[from] tags::TagError),
    #[error("walk error: {0}")]
    Walk(String),
}

/// What happened to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Ingested,
    Skipped,
    DryRun,
}

/// Counters for one engine run.
#[derive(Default)]
pub struct IngestStats {
    pub scanned: AtomicU64,
    pub ingested: AtomicU64,
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
}

/// Final numbers reported after a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub scanned: u64,
    pub ingested: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl IngestStats {
    fn report(&self) -> IngestReport {
        IngestReport {
            scanned: self.scanned.load(Ordering::Relaxed),
            ingested: self.ingested.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub struct IngestEngine {
    config: IngestConfig,
    db: Database,
    storage: Arc<dyn ObjectStorage>,
    enricher: Arc<Enricher>,
    /// path -> last seen (mtime, size); consulted before any per-file work.
    skip: RwLock<HashMap<String, SkipEntry>>,
    /// Album ids whose cover art was already handled this run.
    covers_done: Mutex<HashSet<String>>,
    /// Directory -> chosen folder image, memoised per run.
    folder_images: Mutex<HashMap<PathBuf, Option<PathBuf>>>,
    pub stats: IngestStats,
}

impl IngestEngine {
    pub fn new(
        config: IngestConfig,
        db: Database,
        storage: Arc<dyn ObjectStorage>,
    ) -> Arc<Self> {
        let enricher = Arc::new(Enricher::new(db.clone(), storage.clone()));
        Arc::new(Self {
            config,
            db,
            storage,
            enricher,
            skip: RwLock::new(HashMap::new()),
            covers_done: Mutex::new(HashSet::new()),
            folder_images: Mutex::new(HashMap::new()),
            stats: IngestStats::default(),
        })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Scan the configured root once and return the run report.
    pub async fn run(self: &Arc<Self>) -> Result<IngestReport, IngestError> {
        let skip_map = self.db.load_ingest_state().await?;
        info!("Loaded {} skip-index entries", skip_map.len());
        *self.skip.write().await = skip_map;

        let (tx, rx) = mpsc::channel::<PathBuf>(DISPATCH_BUFFER);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(self.config.workers);
        for _ in 0..self.config.workers {
            let engine = Arc::clone(self);
            let rx = Arc::clone(&rx);
            workers.push(tokio::spawn(async move {
                loop {
                    let path = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    match path {
                        Some(path) => engine.process_file(&path).await,
                        None => break,
                    }
                }
            }));
        }

        let root = self.config.dir.clone();
        let recursive = self.config.recursive;
        let walker = tokio::task::spawn_blocking(move || {
            let mut walk = walkdir::WalkDir::new(&root);
            if !recursive {
                walk = walk.max_depth(1);
            }
            for entry in walk.into_iter().filter_map(|e| e.ok()) {
                if entry.file_type().is_file() && is_audio_path(entry.path()) {
                    if tx.blocking_send(entry.path().to_path_buf()).is_err() {
                        break;
                    }
                }
            }
        });

        walker
            .await
            .map_err(|e| IngestError::Walk(e.to_string()))?;
        for worker in workers {
            let _ = worker.await;
        }

        let report = self.stats.report();
        info!(
            "Ingest finished: {} scanned, {} ingested, {} skipped, {} failed",
            report.scanned, report.ingested, report.skipped, report.failed
        );
        Ok(report)
    }

    /// Run one file through the pipeline, counting the outcome. Errors are
    /// logged and counted; they never halt the scan.
    pub async fn process_file(&self, path: &Path) {
        self.stats.scanned.fetch_add(1, Ordering::Relaxed);
        match self.ingest_file(path).await {
            Ok(FileOutcome::Ingested) => {
                self.stats.ingested.fetch_add(1, Ordering::Relaxed);
            }
            Ok(FileOutcome::Skipped) | Ok(FileOutcome::DryRun) => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("failed to ingest {}: {}", path.display(), e);
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn ingest_file(&self, path: &Path) -> Result<FileOutcome, IngestError> {
        let path_key = path.to_string_lossy().to_string();

        let meta = tokio::fs::metadata(path).await?;
        let mtime_unix = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let file_size = meta.len() as i64;

        {
            let skip = self.skip.read().await;
            if let Some(entry) = skip.get(&path_key) {
                if entry.mtime_unix == mtime_unix && entry.file_size == file_size {
                    debug!("skipping unchanged {}", path.display());
                    return Ok(FileOutcome::Skipped);
                }
            }
        }

        if self.config.dry_run {
            info!("[dry-run] would ingest {}", path.display());
            return Ok(FileOutcome::DryRun);
        }

        let Some(format) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(AudioFormat::from_extension)
        else {
            return Ok(FileOutcome::Skipped);
        };

        // Stream the whole file through SHA-256, keeping the first bytes for
        // the STREAMINFO parse.
        let (fingerprint, header) = hash_file(path).await?;
        let track_id = ids::track_id(&fingerprint);

        let file_tags = {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || tags::read_tags(&path))
                .await
                .map_err(|e| IngestError::Walk(e.to_string()))??
        };

        let album_artist_name = file_tags.album_artist_or_artist();
        let album_title = file_tags.album_or_dir(path);
        let title = file_tags.title_or_stem(path);

        let artist_id = ids::artist_id(&album_artist_name);
        let album_id = ids::album_id(&album_artist_name, &album_title);

        let album_artist = self
            .db
            .upsert_artist(
                &artist_id,
                &album_artist_name,
                &crate::util::sort_name(&album_artist_name),
            )
            .await?;

        // A differing performing artist gets its own row; the track hangs off
        // that one.
        let track_artist_id = match &file_tags.artist {
            Some(artist) if !artist.eq_ignore_ascii_case(&album_artist_name) => {
                let id = ids::artist_id(artist);
                self.db
                    .upsert_artist(&id, artist, &crate::util::sort_name(artist))
                    .await?;
                id
            }
            _ => artist_id.clone(),
        };

        let cover_key = self
            .process_cover(&album_id, path, file_tags.picture.as_deref())
            .await?;

        let album = self
            .db
            .upsert_album(
                &album_id,
                Some(&artist_id),
                &album_title,
                file_tags.year,
                cover_key.as_deref(),
            )
            .await?;

        // Audio properties: FLAC comes from STREAMINFO, everything else from
        // the container tags with a 44.1 kHz fallback.
        let (duration_ms, sample_rate, channels, bit_depth) = match format {
            AudioFormat::Flac => match flac::parse_stream_info(&header) {
                Ok(info) => (
                    info.duration_ms() as i64,
                    info.sample_rate as i32,
                    info.channels as i32,
                    Some(info.bit_depth as i32),
                ),
                Err(e) => {
                    warn!("STREAMINFO parse failed for {}: {}", path.display(), e);
                    tag_properties(&file_tags, format)
                }
            },
            _ => tag_properties(&file_tags, format),
        };

        let file_key = storage::audio_key(&track_artist_id, &album_id, track_id, format.extension());

        let track = Track {
            id: track_id,
            album_id: Some(album_id.clone()),
            artist_id: Some(track_artist_id),
            title,
            track_number: file_tags.track_number.map(|n| n as i32),
            disc_number: file_tags.disc_number.map(|n| n as i32),
            duration_ms,
            file_key: file_key.clone(),
            file_size,
            format,
            bit_depth,
            sample_rate,
            channels,
            bitrate: file_tags.bitrate_kbps.map(|b| b as i32),
            seek_table: None,
            fingerprint,
            external_id: None,
            lyrics: file_tags.lyrics.clone(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        self.db.upsert_track(&track).await?;

        // Upload is idempotent by key; a renamed file re-upserts the row but
        // never re-uploads the bytes.
        if !self.storage.exists(&file_key).await? {
            let data = tokio::fs::read(path).await?;
            self.storage.put(&file_key, &data).await?;
            debug!("uploaded {} ({} bytes)", file_key, data.len());
        }

        if let Some(user_id) = self.config.owner_user_id {
            self.db.add_to_library(user_id, track_id).await?;
        }

        let entry = SkipEntry {
            mtime_unix,
            file_size,
            track_id,
        };
        self.db.upsert_ingest_state(&path_key, &entry).await?;
        self.skip.write().await.insert(path_key, entry);

        // Best-effort enrichment; per-run dedup lives inside the enricher.
        self.enricher.enrich_artist(&album_artist).await;
        self.enricher.enrich_album(&album, &album_artist_name).await;

        info!("ingested {}", path.display());
        Ok(FileOutcome::Ingested)
    }

    /// Store cover art for an album the first time this run encounters it.
    /// Returns the cover key when any source produced bytes.
    async fn process_cover(
        &self,
        album_id: &str,
        track_path: &Path,
        embedded: Option<&[u8]>,
    ) -> Result<Option<String>, IngestError> {
        if !self.covers_done.lock().await.insert(album_id.to_string()) {
            // Another worker already handled this album; report the key only
            // if the object is there.
            let key = storage::album_cover_key(album_id);
            return Ok(self.storage.exists(&key).await?.then_some(key));
        }

        let bytes = match embedded {
            Some(picture) => Some(picture.to_vec()),
            None => {
                let dir = track_path.parent().map(Path::to_path_buf);
                match dir {
                    Some(dir) => {
                        let memo = {
                            let cache = self.folder_images.lock().await;
                            cache.get(&dir).cloned()
                        };
                        let chosen = match memo {
                            Some(chosen) => chosen,
                            None => {
                                let scan_dir = dir.clone();
                                let chosen = tokio::task::spawn_blocking(move || {
                                    cover::best_folder_image(&scan_dir)
                                })
                                .await
                                .map_err(|e| IngestError::Walk(e.to_string()))?;
                                self.folder_images.lock().await.insert(dir, chosen.clone());
                                chosen
                            }
                        };
                        match chosen {
                            Some(image_path) => Some(tokio::fs::read(&image_path).await?),
                            None => None,
                        }
                    }
                    None => None,
                }
            }
        };

        let Some(bytes) = bytes else {
            return Ok(None);
        };

        let encoded =
            tokio::task::spawn_blocking(move || cover::encode_cover_jpeg(&bytes))
                .await
                .map_err(|e| IngestError::Walk(e.to_string()))?;

        let key = storage::album_cover_key(album_id);
        self.storage.put(&key, &encoded).await?;
        debug!("stored cover {}", key);
        Ok(Some(key))
    }
}

/// Properties for non-FLAC content (or a FLAC whose header refused to parse).
fn tag_properties(
    file_tags: &tags::FileTags,
    format: AudioFormat,
) -> (i64, i32, i32, Option<i32>) {
    let duration_ms = file_tags.duration_ms.unwrap_or(0) as i64;
    let sample_rate = file_tags.sample_rate.unwrap_or(44_100) as i32;
    let channels = file_tags.channels.unwrap_or(2) as i32;
    let bit_depth = if format.is_lossless() {
        file_tags.bit_depth.map(|b| b as i32)
    } else {
        None
    };
    (duration_ms, sample_rate, channels, bit_depth)
}

/// SHA-256 over the whole file plus the leading bytes needed for STREAMINFO.
async fn hash_file(path: &Path) -> Result<(String, Vec<u8>), IngestError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut header = Vec::with_capacity(flac::STREAMINFO_HEADER_LEN);
    let mut buf = vec![0u8; HASH_CHUNK];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if header.len() < flac::STREAMINFO_HEADER_LEN {
            let want = flac::STREAMINFO_HEADER_LEN - header.len();
            header.extend_from_slice(&buf[..n.min(want)]);
        }
        hasher.update(&buf[..n]);
    }

    let fingerprint = hex::encode(hasher.finalize());
    Ok((fingerprint, header))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_file_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        tokio::fs::write(&path, b"abc").await.unwrap();

        let (fingerprint, header) = hash_file(&path).await.unwrap();
        assert_eq!(
            fingerprint,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(header, b"abc");
    }

    #[tokio::test]
    async fn hash_file_captures_streaminfo_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big");
        let data: Vec<u8> = (0..=255u8).cycle().take(200_000).collect();
        tokio::fs::write(&path, &data).await.unwrap();

        let (_, header) = hash_file(&path).await.unwrap();
        assert_eq!(header.len(), flac::STREAMINFO_HEADER_LEN);
        assert_eq!(header, &data[..flac::STREAMINFO_HEADER_LEN]);
    }

    #[test]
    fn tag_properties_defaults() {
        let tags = tags::FileTags::default();
        let (duration, rate, channels, depth) = tag_properties(&tags, AudioFormat::Mp3);
        assert_eq!(duration, 0);
        assert_eq!(rate, 44_100);
        assert_eq!(channels, 2);
        assert_eq!(depth, None);
    }

    #[test]
    fn tag_properties_keeps_lossless_depth() {
        let tags = tags::FileTags {
            bit_depth: Some(24),
            sample_rate: Some(48_000),
            ..Default::default()
        };
        let (_, rate, _, depth) = tag_properties(&tags, AudioFormat::Wav);
        assert_eq!(rate, 48_000);
        assert_eq!(depth, Some(24));

        // Lossy formats never report a bit depth even if the tag has one.
        let (_, _, _, depth) = tag_properties(&tags, AudioFormat::Mp3);
        assert_eq!(depth, None);
    }
}
