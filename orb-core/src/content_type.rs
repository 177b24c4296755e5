use serde::{Deserialize, Serialize};
use std::path::Path;

/// Audio file extensions the ingest engine picks up.
pub const AUDIO_EXTENSIONS: &[&str] = &["flac", "wav", "mp3", "aiff", "aif"];

/// Container format of a catalogued track.
///
/// Stored as a lowercase tag in the `tracks.format` column and mapped to a
/// MIME type when serving ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Flac,
    Wav,
    Mp3,
    Aiff,
}

impl AudioFormat {
    /// Database tag (e.g. "flac").
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flac => "flac",
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Aiff => "aiff",
        }
    }

    /// MIME type used in streaming responses.
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Flac => "audio/flac",
            Self::Mp3 => "audio/mpeg",
            Self::Wav => "audio/wav",
            Self::Aiff => "audio/aiff",
        }
    }

    /// File extension used for object-store keys.
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    /// Map a file extension to its format. `.aif` is folded into AIFF.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "flac" => Some(Self::Flac),
            "wav" => Some(Self::Wav),
            "mp3" => Some(Self::Mp3),
            "aiff" | "aif" => Some(Self::Aiff),
            _ => None,
        }
    }

    /// True when the container carries PCM with a meaningful bit depth.
    pub fn is_lossless(&self) -> bool {
        !matches!(self, Self::Mp3)
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decode the database tag (used by `#[sqlx(try_from = "String")]`).
impl TryFrom<String> for AudioFormat {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_extension(&s).ok_or_else(|| format!("unknown audio format tag '{}'", s))
    }
}

/// Check whether a path has a recognized audio extension.
pub fn is_audio_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_extension_known_formats() {
        assert_eq!(AudioFormat::from_extension("flac"), Some(AudioFormat::Flac));
        assert_eq!(AudioFormat::from_extension("FLAC"), Some(AudioFormat::Flac));
        assert_eq!(AudioFormat::from_extension("aif"), Some(AudioFormat::Aiff));
        assert_eq!(AudioFormat::from_extension("aiff"), Some(AudioFormat::Aiff));
        assert_eq!(AudioFormat::from_extension("ogg"), None);
    }

    #[test]
    fn mime_map() {
        assert_eq!(AudioFormat::Flac.mime(), "audio/flac");
        assert_eq!(AudioFormat::Mp3.mime(), "audio/mpeg");
        assert_eq!(AudioFormat::Wav.mime(), "audio/wav");
        assert_eq!(AudioFormat::Aiff.mime(), "audio/aiff");
    }

    #[test]
    fn lossy_has_no_bit_depth() {
        assert!(!AudioFormat::Mp3.is_lossless());
        assert!(AudioFormat::Flac.is_lossless());
    }

    #[test]
    fn audio_path_detection() {
        assert!(is_audio_path(Path::new("/music/a/b/01 Song.flac")));
        assert!(is_audio_path(Path::new("track.AIF")));
        assert!(!is_audio_path(Path::new("cover.jpg")));
        assert!(!is_audio_path(Path::new("no_extension")));
    }
}
