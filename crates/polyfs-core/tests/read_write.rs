//! Read and write pipeline behavior: path selection, position/length
//! laws, preconditions, input coalescing, and streaming.

use std::sync::Arc;

use polyfs_core::{
    byte_pipe_default, Capabilities, FileErrorKind, FileService, MemConfig, MemProvider,
    ReadOptions, Resource, SizeLimits, WriteOptions, WriteSource, ETAG_DISABLED,
};
use rstest::rstest;

fn res(s: &str) -> Resource {
    Resource::parse(s).unwrap()
}

fn service_with(provider: Arc<MemProvider>) -> FileService {
    let service = FileService::new();
    service.register_provider("mem", provider).unwrap().forget();
    service
}

async fn seed(service: &FileService, uri: &str, data: &[u8]) {
    service
        .write_file(
            &res(uri),
            WriteSource::bytes(data.to_vec()),
            &WriteOptions::default(),
        )
        .await
        .unwrap();
}

#[rstest]
#[case::unbuffered(Capabilities::FILE_READ_WRITE)]
#[case::streamed(Capabilities::FILE_READ_WRITE | Capabilities::FILE_READ_STREAM)]
#[case::positional(Capabilities::FILE_READ_WRITE | Capabilities::FILE_OPEN_READ_WRITE_CLOSE)]
#[tokio::test]
async fn test_read_round_trip_across_paths(#[case] caps: Capabilities) {
    let caps = caps | Capabilities::PATH_CASE_SENSITIVE;
    let service = service_with(Arc::new(MemProvider::with_capabilities(caps)));

    let payload: Vec<u8> = (0..150_000).map(|i| (i % 253) as u8).collect();
    seed(&service, "mem:///data.bin", &payload).await;

    let content = service
        .read_file(&res("mem:///data.bin"), &ReadOptions::default())
        .await
        .unwrap();
    assert_eq!(content.value, payload);
    assert_eq!(content.stat.size, Some(payload.len() as u64));
}

#[tokio::test]
async fn test_position_and_length_slicing() {
    let service = service_with(Arc::new(MemProvider::new()));
    seed(&service, "mem:///slice.txt", b"0123456789").await;

    let window = |position, length| ReadOptions {
        position,
        length,
        ..Default::default()
    };

    let content = service
        .read_file(&res("mem:///slice.txt"), &window(Some(2), Some(5)))
        .await
        .unwrap();
    assert_eq!(content.value, b"23456");

    // Position past the end yields no bytes.
    let content = service
        .read_file(&res("mem:///slice.txt"), &window(Some(100), None))
        .await
        .unwrap();
    assert!(content.value.is_empty());

    // Zero length yields no bytes regardless of position.
    let content = service
        .read_file(&res("mem:///slice.txt"), &window(Some(3), Some(0)))
        .await
        .unwrap();
    assert!(content.value.is_empty());
}

#[tokio::test]
async fn test_empty_file_reads_empty() {
    let service = service_with(Arc::new(MemProvider::new()));
    seed(&service, "mem:///empty", b"").await;

    let content = service
        .read_file(&res("mem:///empty"), &ReadOptions::default())
        .await
        .unwrap();
    assert!(content.value.is_empty());
    assert!(content.stat.etag.is_some());
}

#[tokio::test]
async fn test_read_directory_fails() {
    let service = service_with(Arc::new(MemProvider::new()));
    service.create_folder(&res("mem:///dir")).await.unwrap();

    let err = service
        .read_file(&res("mem:///dir"), &ReadOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FileErrorKind::FileIsDirectory);
}

#[tokio::test]
async fn test_etag_precondition() {
    let service = service_with(Arc::new(MemProvider::new()));
    seed(&service, "mem:///cached.txt", b"content").await;

    let stat = service
        .read_file(&res("mem:///cached.txt"), &ReadOptions::default())
        .await
        .unwrap()
        .stat;

    // Same etag: not modified since.
    let err = service
        .read_file(
            &res("mem:///cached.txt"),
            &ReadOptions {
                etag: stat.etag.clone(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FileErrorKind::FileNotModifiedSince);

    // The disabled sentinel skips the check.
    service
        .read_file(
            &res("mem:///cached.txt"),
            &ReadOptions {
                etag: Some(ETAG_DISABLED.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // A stale etag reads normally.
    service
        .read_file(
            &res("mem:///cached.txt"),
            &ReadOptions {
                etag: Some("stale".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_size_limits() {
    let service = service_with(Arc::new(MemProvider::new()));
    seed(&service, "mem:///big.bin", &vec![0u8; 1000]).await;

    let err = service
        .read_file(
            &res("mem:///big.bin"),
            &ReadOptions {
                limits: SizeLimits {
                    size: Some(100),
                    memory: None,
                },
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FileErrorKind::FileTooLarge);

    let err = service
        .read_file(
            &res("mem:///big.bin"),
            &ReadOptions {
                limits: SizeLimits {
                    size: None,
                    memory: Some(100),
                },
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FileErrorKind::FileExceedsMemoryLimit);
}

#[rstest]
#[case::streamed(
    Capabilities::FILE_READ_WRITE
        | Capabilities::FILE_READ_STREAM
        | Capabilities::PATH_CASE_SENSITIVE
)]
#[case::positional(
    Capabilities::FILE_READ_WRITE
        | Capabilities::FILE_OPEN_READ_WRITE_CLOSE
        | Capabilities::PATH_CASE_SENSITIVE
)]
#[case::unbuffered(Capabilities::FILE_READ_WRITE | Capabilities::PATH_CASE_SENSITIVE)]
#[tokio::test]
async fn test_read_file_stream(#[case] caps: Capabilities) {
    let service = service_with(Arc::new(MemProvider::with_capabilities(caps)));

    let payload: Vec<u8> = (0..100_000).map(|i| (i % 241) as u8).collect();
    seed(&service, "mem:///streamed.bin", &payload).await;

    let mut content = service
        .read_file_stream(&res("mem:///streamed.bin"), &ReadOptions::default())
        .await
        .unwrap();
    assert_eq!(content.stat.size, Some(payload.len() as u64));
    assert_eq!(content.value.read_to_end().await.unwrap(), payload);
}

#[tokio::test]
async fn test_prefer_unbuffered_wins_over_streaming() {
    let provider = Arc::new(MemProvider::new());
    let service = service_with(provider.clone());
    seed(&service, "mem:///pref.txt", b"abc").await;

    let content = service
        .read_file(
            &res("mem:///pref.txt"),
            &ReadOptions {
                prefer_unbuffered: true,
                position: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(content.value, b"bc");
}

#[tokio::test]
async fn test_write_from_readable() {
    let service = service_with(Arc::new(MemProvider::new()));

    let chunks = vec![b"hel".to_vec(), b"lo ".to_vec(), b"world".to_vec()];
    service
        .write_file(
            &res("mem:///readable.txt"),
            WriteSource::readable(chunks.into_iter()),
            &WriteOptions::default(),
        )
        .await
        .unwrap();

    let content = service
        .read_file(&res("mem:///readable.txt"), &ReadOptions::default())
        .await
        .unwrap();
    assert_eq!(content.value, b"hello world");
}

#[tokio::test]
async fn test_write_from_stream() {
    let service = service_with(Arc::new(MemProvider::new()));

    let (writer, reader) = byte_pipe_default();
    let feeder = tokio::spawn(async move {
        for chunk in [&b"str"[..], b"eam", b"ed ", b"pay", b"load"] {
            writer.write_all_bytes(chunk).await.unwrap();
        }
    });

    service
        .write_file(
            &res("mem:///streamed.txt"),
            WriteSource::stream(reader),
            &WriteOptions::default(),
        )
        .await
        .unwrap();
    feeder.await.unwrap();

    let content = service
        .read_file(&res("mem:///streamed.txt"), &ReadOptions::default())
        .await
        .unwrap();
    assert_eq!(content.value, b"streamed payload");
}

#[tokio::test]
async fn test_small_readable_coalesces_to_one_unbuffered_write() {
    let provider = Arc::new(MemProvider::new());
    let service = service_with(provider.clone());

    let before = provider.write_file_invocations();
    let chunks = vec![b"a".to_vec(), b"b".to_vec()];
    service
        .write_file(
            &res("mem:///small.txt"),
            WriteSource::readable(chunks.into_iter()),
            &WriteOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(provider.write_file_invocations(), before + 1);
    assert_eq!(provider.open_invocations(), 0);
}

#[tokio::test]
async fn test_large_readable_takes_buffered_path() {
    let provider = Arc::new(MemProvider::new());
    let service = service_with(provider.clone());

    let before = provider.write_file_invocations();
    let chunks: Vec<Vec<u8>> = (0..10).map(|i| vec![i as u8; 16]).collect();
    service
        .write_file(
            &res("mem:///large.txt"),
            WriteSource::readable(chunks.into_iter()),
            &WriteOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(provider.write_file_invocations(), before);
    assert_eq!(provider.open_invocations(), 1);

    let content = service
        .read_file(&res("mem:///large.txt"), &ReadOptions::default())
        .await
        .unwrap();
    assert_eq!(content.value.len(), 160);
}

#[tokio::test]
async fn test_short_provider_writes_are_reentered() {
    let provider = Arc::new(MemProvider::with_config(MemConfig {
        capabilities: Capabilities::FILE_OPEN_READ_WRITE_CLOSE | Capabilities::PATH_CASE_SENSITIVE,
        write_chunk_limit: Some(7),
    }));
    let service = service_with(provider);

    let payload: Vec<u8> = (0..1000).map(|i| (i % 255) as u8).collect();
    service
        .write_file(
            &res("mem:///short.bin"),
            WriteSource::bytes(payload.clone()),
            &WriteOptions::default(),
        )
        .await
        .unwrap();

    let content = service
        .read_file(&res("mem:///short.bin"), &ReadOptions::default())
        .await
        .unwrap();
    assert_eq!(content.value, payload);
}

#[tokio::test]
async fn test_positional_only_provider_round_trip() {
    let caps = Capabilities::FILE_OPEN_READ_WRITE_CLOSE | Capabilities::PATH_CASE_SENSITIVE;
    let service = service_with(Arc::new(MemProvider::with_capabilities(caps)));

    seed(&service, "mem:///pos.bin", b"positional only").await;
    let content = service
        .read_file(&res("mem:///pos.bin"), &ReadOptions::default())
        .await
        .unwrap();
    assert_eq!(content.value, b"positional only");
}

#[tokio::test]
async fn test_stream_read_respects_window() {
    let service = service_with(Arc::new(MemProvider::new()));
    seed(&service, "mem:///window.txt", b"abcdefghij").await;

    let mut content = service
        .read_file_stream(
            &res("mem:///window.txt"),
            &ReadOptions {
                position: Some(2),
                length: Some(4),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(content.value.read_to_end().await.unwrap(), b"cdef");
}
