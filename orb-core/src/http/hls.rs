//! HLS manifest synthesis.
//!
//! The playlist references the same underlying object through byte-range
//! segment descriptors, so a player seeks with ordinary range requests and
//! no transmuxing happens server-side.
use std::fmt::Write;

/// Target segment duration in seconds.
pub const SEGMENT_SECONDS: u64 = 10;

/// One byte-range segment of the derived playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub duration_ms: u64,
    pub length: u64,
    pub offset: u64,
}

/// Split a file into ~10 s byte-range segments.
///
/// Non-final segments get `round(file_size / duration_s * 10)` bytes; the
/// final one takes whatever remains, so the byte-range lengths always sum to
/// `file_size` exactly.
pub fn segments(file_size: u64, duration_ms: u64) -> Vec<Segment> {
    if file_size == 0 {
        return Vec::new();
    }
    if duration_ms == 0 {
        return vec![Segment {
            duration_ms: 0,
            length: file_size,
            offset: 0,
        }];
    }

    let duration_s = duration_ms as f64 / 1000.0;
    let count = (duration_s / SEGMENT_SECONDS as f64).ceil().max(1.0) as u64;
    let bytes_per_segment =
        ((file_size as f64 / duration_s) * SEGMENT_SECONDS as f64).round() as u64;

    let mut out = Vec::with_capacity(count as usize);
    let mut offset = 0u64;
    for i in 0..count {
        let last = i == count - 1;
        let length = if last {
            file_size - offset
        } else {
            bytes_per_segment.min(file_size - offset)
        };
        let duration = if last {
            duration_ms - i * SEGMENT_SECONDS * 1000
        } else {
            SEGMENT_SECONDS * 1000
        };
        out.push(Segment {
            duration_ms: duration,
            length,
            offset,
        });
        offset += length;
    }
    out
}

/// Render the VOD playlist. The token that authorized the manifest request
/// is carried into every segment URI so range requests stay authorized.
pub fn build_manifest(track_id: &str, file_size: u64, duration_ms: u64, token: &str) -> String {
    let segments = segments(file_size, duration_ms);

    let mut m3u8 = String::new();
    m3u8.push_str("#EXTM3U\n");
    m3u8.push_str("#EXT-X-VERSION:4\n");
    let _ = writeln!(m3u8, "#EXT-X-TARGETDURATION:{}", SEGMENT_SECONDS);
    m3u8.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");
    m3u8.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");

    for segment in &segments {
        let _ = writeln!(m3u8, "#EXTINF:{:.3},", segment.duration_ms as f64 / 1000.0);
        let _ = writeln!(m3u8, "#EXT-X-BYTERANGE:{}@{}", segment.length, segment.offset);
        let _ = writeln!(m3u8, "../{}?token={}", track_id, token);
    }

    m3u8.push_str("#EXT-X-ENDLIST\n");
    m3u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_lengths_sum_to_file_size() {
        for (size, duration_ms) in [
            (48_302_156u64, 300_000u64),
            (1_000_003, 37_123),
            (999, 9_999),
            (5_000_000, 10_000),
            (123, 601_000),
        ] {
            let segs = segments(size, duration_ms);
            let total: u64 = segs.iter().map(|s| s.length).sum();
            assert_eq!(total, size, "sizes must sum for {}B/{}ms", size, duration_ms);

            // Offsets are contiguous from zero.
            let mut expected_offset = 0u64;
            for seg in &segs {
                assert_eq!(seg.offset, expected_offset);
                expected_offset += seg.length;
            }
        }
    }

    #[test]
    fn five_minute_file_has_thirty_segments() {
        let segs = segments(48_302_156, 300_000);
        assert_eq!(segs.len(), 30);
        assert!(segs.iter().all(|s| s.duration_ms == 10_000));
    }

    #[test]
    fn remainder_lands_in_final_segment() {
        // 25 s -> 3 segments: 10 + 10 + 5.
        let segs = segments(1_000_000, 25_000);
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[0].duration_ms, 10_000);
        assert_eq!(segs[1].duration_ms, 10_000);
        assert_eq!(segs[2].duration_ms, 5_000);
        assert_eq!(segs.iter().map(|s| s.length).sum::<u64>(), 1_000_000);
    }

    #[test]
    fn zero_duration_yields_single_segment() {
        let segs = segments(4_096, 0);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].length, 4_096);
    }

    #[test]
    fn manifest_shape() {
        let manifest = build_manifest("track-1", 48_302_156, 300_000, "tok123");

        assert!(manifest.starts_with("#EXTM3U\n"));
        assert!(manifest.contains("#EXT-X-PLAYLIST-TYPE:VOD"));
        assert!(manifest.contains("#EXT-X-TARGETDURATION:10"));
        assert!(manifest.ends_with("#EXT-X-ENDLIST\n"));

        let extinf_lines: Vec<&str> = manifest
            .lines()
            .filter(|l| l.starts_with("#EXTINF:"))
            .collect();
        assert_eq!(extinf_lines.len(), 30);
        for line in &extinf_lines {
            let value: f64 = line
                .trim_start_matches("#EXTINF:")
                .trim_end_matches(',')
                .parse()
                .unwrap();
            assert!((value - 10.0).abs() < f64::EPSILON);
        }

        // Byte-range lengths in the manifest sum to the file size.
        let total: u64 = manifest
            .lines()
            .filter(|l| l.starts_with("#EXT-X-BYTERANGE:"))
            .map(|l| {
                let spec = l.trim_start_matches("#EXT-X-BYTERANGE:");
                spec.split('@').next().unwrap().parse::<u64>().unwrap()
            })
            .sum();
        assert_eq!(total, 48_302_156);

        // The token rides along on every segment URI.
        assert_eq!(
            manifest.matches("../track-1?token=tok123").count(),
            30
        );
    }
}
