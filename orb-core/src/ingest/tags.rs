//! Embedded tag extraction via lofty.
use lofty::prelude::*;
use lofty::probe::Probe;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TagError {
    #[error("tag read error: {0}")]
    Lofty(#[from] lofty::error::LoftyError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the pipeline wants from a file's embedded metadata.
///
/// All fields optional: files with stripped tags still get catalogued under
/// fallback names derived from their path.
#[derive(Debug, Clone, Default)]
pub struct FileTags {
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
    pub year: Option<i32>,
    pub lyrics: Option<String>,
    /// From the container's audio properties, not the tag frame.
    pub duration_ms: Option<u64>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub bit_depth: Option<u8>,
    pub bitrate_kbps: Option<u32>,
    /// First embedded picture, raw bytes.
    pub picture: Option<Vec<u8>>,
}

/// Read tags and audio properties. Blocking; callers run it on a blocking
/// thread.
pub fn read_tags(path: &Path) -> Result<FileTags, TagError> {
    let tagged = Probe::open(path)?.read()?;
    let props = tagged.properties();

    let mut tags = FileTags {
        duration_ms: Some(props.duration().as_millis() as u64),
        sample_rate: props.sample_rate(),
        channels: props.channels(),
        bit_depth: props.bit_depth(),
        bitrate_kbps: props.audio_bitrate(),
        ..Default::default()
    };

    let tag = tagged.primary_tag().or_else(|| tagged.first_tag());
    if let Some(tag) = tag {
        tags.artist = tag.artist().map(|s| s.to_string());
        tags.album = tag.album().map(|s| s.to_string());
        tags.title = tag.title().map(|s| s.to_string());
        tags.album_artist = tag
            .get_string(&ItemKey::AlbumArtist)
            .map(|s| s.to_string());
        tags.track_number = tag.track();
        tags.disc_number = tag.disk();
        tags.year = tag.year().map(|y| y as i32);
        tags.lyrics = tag.get_string(&ItemKey::Lyrics).map(|s| s.to_string());
        tags.picture = tag.pictures().first().map(|p| p.data().to_vec());
    }

    Ok(tags)
}

impl FileTags {
    /// Track title, falling back to the file stem.
    pub fn title_or_stem(&self, path: &Path) -> String {
        self.title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("Unknown Track")
                    .to_string()
            })
    }

    /// The artist the album is filed under: album-artist tag when present,
    /// otherwise the performing artist, otherwise "Unknown Artist".
    pub fn album_artist_or_artist(&self) -> String {
        self.album_artist
            .clone()
            .or_else(|| self.artist.clone())
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| "Unknown Artist".to_string())
    }

    /// Album title, falling back to the parent directory name.
    pub fn album_or_dir(&self, path: &Path) -> String {
        self.album
            .clone()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| {
                path.parent()
                    .and_then(|p| p.file_name())
                    .and_then(|s| s.to_str())
                    .unwrap_or("Unknown Album")
                    .to_string()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn fallbacks_from_path() {
        let tags = FileTags::default();
        let path = PathBuf::from("/music/Miles Davis/Kind of Blue/01 So What.flac");
        assert_eq!(tags.title_or_stem(&path), "01 So What");
        assert_eq!(tags.album_or_dir(&path), "Kind of Blue");
        assert_eq!(tags.album_artist_or_artist(), "Unknown Artist");
    }

    #[test]
    fn album_artist_preferred_over_artist() {
        let tags = FileTags {
            artist: Some("Miles Davis Quintet".to_string()),
            album_artist: Some("Miles Davis".to_string()),
            ..Default::default()
        };
        assert_eq!(tags.album_artist_or_artist(), "Miles Davis");

        let tags = FileTags {
            artist: Some("Miles Davis".to_string()),
            ..Default::default()
        };
        assert_eq!(tags.album_artist_or_artist(), "Miles Davis");
    }

    #[test]
    fn blank_tags_fall_through() {
        let tags = FileTags {
            title: Some("   ".to_string()),
            album: Some("".to_string()),
            ..Default::default()
        };
        let path = PathBuf::from("/music/Album/track.flac");
        assert_eq!(tags.title_or_stem(&path), "track");
        assert_eq!(tags.album_or_dir(&path), "Album");
    }
}
