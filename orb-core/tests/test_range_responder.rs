//! End-to-end range responder behavior against a real local object store.
use axum::body::to_bytes;
use axum::http::StatusCode;
use orb_core::content_type::AudioFormat;
use orb_core::http::stream::serve_ranged;
use orb_core::kv::TrackMeta;
use orb_core::storage::{LocalStorage, ObjectStorage};

const FILE_KEY: &str = "audio/aa/bb/track.flac";

async fn fixture(size: usize) -> (tempfile::TempDir, LocalStorage, TrackMeta, Vec<u8>) {
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalStorage::new(dir.path().to_path_buf());

    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    storage.put(FILE_KEY, &data).await.unwrap();

    let meta = TrackMeta {
        file_key: FILE_KEY.to_string(),
        file_size: size as i64,
        format: AudioFormat::Flac,
        bit_depth: Some(24),
        sample_rate: 96_000,
        channels: 2,
        duration_ms: 300_000,
    };
    (dir, storage, meta, data)
}

fn header<'a>(response: &'a axum::response::Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn partial_content_with_advisory_headers() {
    let (_dir, storage, meta, data) = fixture(100_000).await;

    let response = serve_ranged(&storage, &meta, Some("bytes=0-4095"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&response, "content-range"), Some("bytes 0-4095/100000"));
    assert_eq!(header(&response, "content-length"), Some("4096"));
    assert_eq!(header(&response, "accept-ranges"), Some("bytes"));
    assert_eq!(header(&response, "content-type"), Some("audio/flac"));
    assert_eq!(header(&response, "cache-control"), Some("private, max-age=3600"));
    assert_eq!(header(&response, "x-orb-bit-depth"), Some("24"));
    assert_eq!(header(&response, "x-orb-sample-rate"), Some("96000"));

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], &data[..4096]);
}

#[tokio::test]
async fn full_body_without_range_header() {
    let (_dir, storage, meta, data) = fixture(10_000).await;

    let response = serve_ranged(&storage, &meta, None).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-length"), Some("10000"));
    assert!(header(&response, "content-range").is_none());

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], &data[..]);
}

#[tokio::test]
async fn unsatisfiable_range_gets_416_envelope() {
    let (_dir, storage, meta, _) = fixture(10_000).await;

    for bad in ["bytes=10000-10100", "bytes=5-1", "items=0-5", "bytes=a-b", "bytes=0-10,20-30"] {
        let response = serve_ranged(&storage, &meta, Some(bad)).await.unwrap();
        assert_eq!(
            response.status(),
            StatusCode::RANGE_NOT_SATISFIABLE,
            "{} should be rejected",
            bad
        );
        assert_eq!(header(&response, "content-range"), Some("bytes */10000"));
    }
}

#[tokio::test]
async fn split_ranges_reassemble_the_file() {
    let (_dir, storage, meta, data) = fixture(50_000).await;

    for split in [1usize, 4096, 25_000, 49_999] {
        let first = serve_ranged(&storage, &meta, Some(&format!("bytes=0-{}", split - 1)))
            .await
            .unwrap();
        let second = serve_ranged(&storage, &meta, Some(&format!("bytes={}-", split)))
            .await
            .unwrap();

        let mut whole = to_bytes(first.into_body(), usize::MAX).await.unwrap().to_vec();
        whole.extend_from_slice(&to_bytes(second.into_body(), usize::MAX).await.unwrap());
        assert_eq!(whole, data, "split at {} must reassemble the file", split);
    }
}

#[tokio::test]
async fn suffix_range_serves_file_tail() {
    let (_dir, storage, meta, data) = fixture(10_000).await;

    let response = serve_ranged(&storage, &meta, Some("bytes=-100")).await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&response, "content-range"), Some("bytes 9900-9999/10000"));

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], &data[9_900..]);
}

#[tokio::test]
async fn lossy_format_omits_bit_depth_header() {
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalStorage::new(dir.path().to_path_buf());
    storage.put("audio/x/y/t.mp3", b"mp3 bytes").await.unwrap();

    let meta = TrackMeta {
        file_key: "audio/x/y/t.mp3".to_string(),
        file_size: 9,
        format: AudioFormat::Mp3,
        bit_depth: None,
        sample_rate: 44_100,
        channels: 2,
        duration_ms: 1_000,
    };

    let response = serve_ranged(&storage, &meta, None).await.unwrap();
    assert_eq!(header(&response, "content-type"), Some("audio/mpeg"));
    assert!(header(&response, "x-orb-bit-depth").is_none());
    assert_eq!(header(&response, "x-orb-sample-rate"), Some("44100"));
}
