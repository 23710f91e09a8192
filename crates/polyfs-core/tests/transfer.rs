//! Move/copy engine: capability permutations, folder recursion,
//! validation rules, and cross-provider moves.

use std::sync::Arc;

use polyfs_core::{
    Capabilities, DiskConfig, DiskProvider, FileErrorKind, FileOperation, FileService,
    MemProvider, ReadOptions, ResolveOptions, Resource, WriteOptions, WriteSource,
};
use rstest::rstest;

fn res(s: &str) -> Resource {
    Resource::parse(s).unwrap()
}

fn unbuffered_only() -> Capabilities {
    Capabilities::FILE_READ_WRITE | Capabilities::PATH_CASE_SENSITIVE
}

fn positional_only() -> Capabilities {
    Capabilities::FILE_OPEN_READ_WRITE_CLOSE | Capabilities::PATH_CASE_SENSITIVE
}

async fn seed_file(service: &FileService, uri: &str, data: &[u8]) {
    service
        .write_file(
            &res(uri),
            WriteSource::bytes(data.to_vec()),
            &WriteOptions::default(),
        )
        .await
        .unwrap();
}

async fn read_back(service: &FileService, uri: &str) -> Vec<u8> {
    service
        .read_file(&res(uri), &ReadOptions::default())
        .await
        .unwrap()
        .value
}

/// Each (source, target) capability pairing exercises one of the four
/// byte-pipe permutations.
#[rstest]
#[case::positional_to_positional(positional_only(), positional_only())]
#[case::positional_to_unbuffered(positional_only(), unbuffered_only())]
#[case::unbuffered_to_positional(unbuffered_only(), positional_only())]
#[case::unbuffered_to_unbuffered(unbuffered_only(), unbuffered_only())]
#[tokio::test]
async fn test_cross_provider_file_copy(
    #[case] source_caps: Capabilities,
    #[case] target_caps: Capabilities,
) {
    let service = FileService::new();
    service
        .register_provider("src", Arc::new(MemProvider::with_capabilities(source_caps)))
        .unwrap()
        .forget();
    service
        .register_provider("dst", Arc::new(MemProvider::with_capabilities(target_caps)))
        .unwrap()
        .forget();

    let payload: Vec<u8> = (0..200_000).map(|i| (i % 251) as u8).collect();
    seed_file(&service, "src:///big.bin", &payload).await;

    service
        .copy(&res("src:///big.bin"), &res("dst:///copy.bin"), false)
        .await
        .unwrap();

    assert_eq!(read_back(&service, "dst:///copy.bin").await, payload);
    // Source is untouched by a copy.
    assert_eq!(read_back(&service, "src:///big.bin").await, payload);
}

#[tokio::test]
async fn test_cross_provider_folder_copy() {
    let service = FileService::new();
    service
        .register_provider("mem", Arc::new(MemProvider::new()))
        .unwrap()
        .forget();
    let tmp = tempfile::tempdir().unwrap();
    service
        .register_provider("disk", Arc::new(DiskProvider::new(DiskConfig::new(tmp.path()))))
        .unwrap()
        .forget();

    seed_file(&service, "mem:///src/f1", b"A").await;
    seed_file(&service, "mem:///src/sub/f2", b"BB").await;

    let mut operations = service.on_after_operation();
    service
        .copy(&res("mem:///src"), &res("disk:///dst"), true)
        .await
        .unwrap();

    assert_eq!(read_back(&service, "disk:///dst/f1").await, b"A");
    assert_eq!(read_back(&service, "disk:///dst/sub/f2").await, b"BB");
    assert_eq!(
        operations.try_recv().unwrap().operation,
        FileOperation::Copy
    );
}

#[tokio::test]
async fn test_folder_copy_then_move_round_trip() {
    let service = FileService::new();
    service
        .register_provider("mem", Arc::new(MemProvider::new()))
        .unwrap()
        .forget();

    seed_file(&service, "mem:///tree/a.txt", b"a").await;
    seed_file(&service, "mem:///tree/sub/b.txt", b"bb").await;

    service
        .copy(&res("mem:///tree"), &res("mem:///copy"), false)
        .await
        .unwrap();
    service
        .rename(&res("mem:///copy"), &res("mem:///moved"), false)
        .await
        .unwrap();

    assert!(!service.exists(&res("mem:///copy")).await);
    assert_eq!(read_back(&service, "mem:///moved/a.txt").await, b"a");
    assert_eq!(read_back(&service, "mem:///moved/sub/b.txt").await, b"bb");
    // Original tree still intact.
    assert_eq!(read_back(&service, "mem:///tree/a.txt").await, b"a");
}

#[tokio::test]
async fn test_cross_provider_move_reports_copy() {
    let service = FileService::new();
    service
        .register_provider("one", Arc::new(MemProvider::new()))
        .unwrap()
        .forget();
    service
        .register_provider("two", Arc::new(MemProvider::new()))
        .unwrap()
        .forget();

    seed_file(&service, "one:///data.txt", b"payload").await;

    let mut operations = service.on_after_operation();
    service
        .rename(&res("one:///data.txt"), &res("two:///data.txt"), false)
        .await
        .unwrap();

    assert!(!service.exists(&res("one:///data.txt")).await);
    assert_eq!(read_back(&service, "two:///data.txt").await, b"payload");

    // The move degraded to copy + delete; events report what happened:
    // the byte copy, the source delete, then the top-level mode.
    let kinds: Vec<FileOperation> = std::iter::from_fn(|| operations.try_recv().ok())
        .map(|e| e.operation)
        .collect();
    assert_eq!(*kinds.last().unwrap(), FileOperation::Copy);
    assert!(kinds.contains(&FileOperation::Delete));
}

#[tokio::test]
async fn test_copy_onto_self_is_noop() {
    let service = FileService::new();
    service
        .register_provider("mem", Arc::new(MemProvider::new()))
        .unwrap()
        .forget();
    seed_file(&service, "mem:///self.txt", b"same").await;

    service
        .copy(&res("mem:///self.txt"), &res("mem:///self.txt"), false)
        .await
        .unwrap();
    assert_eq!(read_back(&service, "mem:///self.txt").await, b"same");
}

#[tokio::test]
async fn test_copy_onto_self_with_different_case_fails() {
    let service = FileService::new();
    let caps = Capabilities::FILE_READ_WRITE
        | Capabilities::FILE_OPEN_READ_WRITE_CLOSE
        | Capabilities::FILE_FOLDER_COPY;
    service
        .register_provider("ci", Arc::new(MemProvider::with_capabilities(caps)))
        .unwrap()
        .forget();
    seed_file(&service, "ci:///File.txt", b"x").await;

    let err = service
        .copy(&res("ci:///File.txt"), &res("ci:///FILE.TXT"), false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("path case"));
}

#[tokio::test]
async fn test_rename_to_different_case_is_allowed_on_insensitive_provider() {
    let service = FileService::new();
    let caps = Capabilities::FILE_READ_WRITE | Capabilities::FILE_OPEN_READ_WRITE_CLOSE;
    service
        .register_provider("ci", Arc::new(MemProvider::with_capabilities(caps)))
        .unwrap()
        .forget();
    seed_file(&service, "ci:///file.txt", b"x").await;

    let stat = service
        .rename(&res("ci:///file.txt"), &res("ci:///FILE.txt"), false)
        .await
        .unwrap();
    assert_eq!(stat.name, "FILE.txt");
}

#[tokio::test]
async fn test_move_into_own_subtree_fails() {
    let service = FileService::new();
    service
        .register_provider("mem", Arc::new(MemProvider::new()))
        .unwrap()
        .forget();
    seed_file(&service, "mem:///parent/child.txt", b"x").await;

    let err = service
        .rename(&res("mem:///parent"), &res("mem:///parent/inside"), false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("parent of the target"));
}

#[tokio::test]
async fn test_move_conflict_without_overwrite() {
    let service = FileService::new();
    service
        .register_provider("mem", Arc::new(MemProvider::new()))
        .unwrap()
        .forget();
    seed_file(&service, "mem:///a.txt", b"a").await;
    seed_file(&service, "mem:///b.txt", b"b").await;

    let err = service
        .rename(&res("mem:///a.txt"), &res("mem:///b.txt"), false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FileErrorKind::FileMoveConflict);

    // Overwrite replaces the target.
    service
        .rename(&res("mem:///a.txt"), &res("mem:///b.txt"), true)
        .await
        .unwrap();
    assert_eq!(read_back(&service, "mem:///b.txt").await, b"a");
}

#[tokio::test]
async fn test_overwrite_that_would_delete_source_fails() {
    let service = FileService::new();
    service
        .register_provider("mem", Arc::new(MemProvider::new()))
        .unwrap()
        .forget();
    seed_file(&service, "mem:///folder/inner.txt", b"x").await;

    let err = service
        .copy(&res("mem:///folder/inner.txt"), &res("mem:///folder"), true)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("delete the source"));
}

#[tokio::test]
async fn test_native_copy_used_when_provider_supports_it() {
    let service = FileService::new();
    let provider = Arc::new(MemProvider::new());
    service
        .register_provider("mem", provider.clone())
        .unwrap()
        .forget();

    seed_file(&service, "mem:///native/file.txt", b"zzz").await;
    let opens_before = provider.open_invocations();

    service
        .copy(&res("mem:///native"), &res("mem:///cloned"), false)
        .await
        .unwrap();

    assert_eq!(read_back(&service, "mem:///cloned/file.txt").await, b"zzz");
    // The native folder copy moved no bytes through handles.
    assert_eq!(provider.open_invocations(), opens_before);
}

#[tokio::test]
async fn test_preflight_validators() {
    let service = FileService::new();
    service
        .register_provider("mem", Arc::new(MemProvider::new()))
        .unwrap()
        .forget();
    seed_file(&service, "mem:///have.txt", b"x").await;

    assert!(service
        .can_create_file(&res("mem:///new.txt"), &WriteOptions::default())
        .await
        .is_ok());
    assert_eq!(
        service
            .can_create_file(&res("mem:///have.txt"), &WriteOptions::default())
            .await
            .unwrap_err()
            .kind(),
        FileErrorKind::FileModifiedSince
    );

    assert!(service
        .can_move(&res("mem:///have.txt"), &res("mem:///moved.txt"), false)
        .await
        .is_ok());
    assert_eq!(
        service
            .can_copy(&res("mem:///have.txt"), &res("mem:///have.txt/sub"), false)
            .await
            .unwrap_err()
            .kind(),
        FileErrorKind::Unknown
    );

    assert!(service
        .can_delete(&res("mem:///have.txt"), Default::default())
        .await
        .is_ok());
    assert_eq!(
        service
            .can_delete(&res("mem:///missing"), Default::default())
            .await
            .unwrap_err()
            .kind(),
        FileErrorKind::FileNotFound
    );

    // Validators do not mutate.
    assert!(service.exists(&res("mem:///have.txt")).await);
    assert!(!service.exists(&res("mem:///moved.txt")).await);
}

#[tokio::test]
async fn test_copy_preserves_structure_with_resolve() {
    let service = FileService::new();
    service
        .register_provider("mem", Arc::new(MemProvider::new()))
        .unwrap()
        .forget();

    seed_file(&service, "mem:///t/one", b"1").await;
    seed_file(&service, "mem:///t/d/two", b"22").await;
    seed_file(&service, "mem:///t/d/e/three", b"333").await;

    service
        .copy(&res("mem:///t"), &res("mem:///t2"), false)
        .await
        .unwrap();

    let stat = service
        .resolve(
            &res("mem:///t2"),
            &ResolveOptions {
                resolve_to: vec![res("mem:///t2/d/e/three")],
                resolve_metadata: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let children = stat.children.unwrap();
    let names: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
    assert!(names.contains(&"one"));
    assert!(names.contains(&"d"));

    let d = children.iter().find(|c| c.name == "d").unwrap();
    let d_children = d.children.as_ref().unwrap();
    let e = d_children.iter().find(|c| c.name == "e").unwrap();
    let three = &e.children.as_ref().unwrap()[0];
    assert_eq!(three.name, "three");
    assert_eq!(three.size, Some(3));
}
