//! HTTP byte-range parsing.
//!
//! Only `bytes=` ranges are accepted. Every malformed or unsatisfiable form
//! maps to 416 with `Content-Range: bytes */{size}`, so the parser folds all
//! failures into one error type.
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RangeError {
    #[error("unsupported range unit")]
    BadUnit,
    #[error("malformed range")]
    Malformed,
    #[error("unsatisfiable range")]
    Unsatisfiable,
}

/// An inclusive byte range `[start, end]`, both within the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered; a valid range always spans at least one.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parse a `Range` header against a file of `size` bytes.
///
/// Accepted forms: `bytes=A-B` (inclusive), `bytes=A-` (open ended),
/// `bytes=-N` (suffix). Rejected: any other unit, missing `=`, non-integer
/// endpoints, `start > end`, `end >= size`, multipart ranges.
pub fn parse_range(header: &str, size: u64) -> Result<ByteRange, RangeError> {
    let spec = header.strip_prefix("bytes=").ok_or(RangeError::BadUnit)?;

    if size == 0 {
        return Err(RangeError::Unsatisfiable);
    }
    if spec.contains(',') {
        // Multipart ranges are not served.
        return Err(RangeError::Malformed);
    }

    let (start_str, end_str) = spec.split_once('-').ok_or(RangeError::Malformed)?;

    // Suffix form: bytes=-N, the last N bytes.
    if start_str.is_empty() {
        let n: u64 = end_str.parse().map_err(|_| RangeError::Malformed)?;
        if n == 0 {
            return Err(RangeError::Unsatisfiable);
        }
        let start = size.saturating_sub(n);
        return Ok(ByteRange {
            start,
            end: size - 1,
        });
    }

    let start: u64 = start_str.parse().map_err(|_| RangeError::Malformed)?;

    // Open-ended form: bytes=A-.
    if end_str.is_empty() {
        if start >= size {
            return Err(RangeError::Unsatisfiable);
        }
        return Ok(ByteRange {
            start,
            end: size - 1,
        });
    }

    let end: u64 = end_str.parse().map_err(|_| RangeError::Malformed)?;
    if start > end || end >= size {
        return Err(RangeError::Unsatisfiable);
    }
    Ok(ByteRange { start, end })
}
