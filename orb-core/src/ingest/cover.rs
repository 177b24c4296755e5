//! Album cover resolution.
//!
//! Source precedence: embedded picture, then the "best folder image" — the
//! most nearly square image in the file's directory. Whatever the source,
//! bytes are re-encoded as JPEG quality 90; when the decode fails the raw
//! bytes are stored verbatim.
use image::codecs::jpeg::JpegEncoder;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp"];

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Pick the squarest image in a directory, by minimum `|width - height|`.
/// Ties break on path order so the choice is deterministic. Blocking.
pub fn best_folder_image(dir: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_image_file(p))
        .collect();
    candidates.sort();

    let mut best: Option<(u32, PathBuf)> = None;
    for path in candidates {
        let Ok((w, h)) = image::image_dimensions(&path) else {
            continue;
        };
        let diff = w.abs_diff(h);
        if best.as_ref().map(|(d, _)| diff < *d).unwrap_or(true) {
            best = Some((diff, path));
        }
    }
    best.map(|(_, path)| path)
}

/// Re-encode cover bytes as JPEG quality 90. Decode failures fall back to
/// the raw bytes so an odd-but-servable image is never dropped.
pub fn encode_cover_jpeg(bytes: &[u8]) -> Vec<u8> {
    match image::load_from_memory(bytes) {
        Ok(img) => {
            let mut out = Vec::new();
            let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut out), 90);
            match img.write_with_encoder(encoder) {
                Ok(()) => out,
                Err(e) => {
                    debug!("cover re-encode failed ({}), storing raw bytes", e);
                    bytes.to_vec()
                }
            }
        }
        Err(e) => {
            debug!("cover decode failed ({}), storing raw bytes", e);
            bytes.to_vec()
        }
    }
}
