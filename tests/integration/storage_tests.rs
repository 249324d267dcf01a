//! Storage backend integration tests.
//!
//! Tests verify:
//! - Destination selection from plain paths and URIs
//! - Directory storage creation, collisions and close semantics
//! - Tar archives written by parallel builds
//! - Descriptor and tile names of a build

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use dzi_pyramid::storage::Target;
use dzi_pyramid::{
    Destination, DirectoryStorage, EntrySource, InMemorySource, MemoryStorage, PyramidBuilder,
    S3Settings, StorageError, StorageSink, TarStorage,
};

use super::test_utils::{build_in_memory, entries, gradient_rgb, options};

fn write(sink: &impl StorageSink, path: &str, content: &[u8]) -> Result<(), StorageError> {
    sink.append_entry(path, |writer: &mut dyn Write| {
        writer
            .write_all(content)
            .map_err(|e| StorageError::io(path, e))
    })
}

// =============================================================================
// Destination Selection
// =============================================================================

#[test]
fn test_directory_destination() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("out");

    let destination = Destination::from_uri(root.to_str().unwrap(), &S3Settings::default()).unwrap();
    assert!(matches!(destination, Destination::Directory(_)));
    assert!(root.is_dir());

    write(&destination, "a/b.txt", b"hello").unwrap();
    destination.close().unwrap();
    assert_eq!(fs::read(root.join("a/b.txt")).unwrap(), b"hello");
}

#[test]
fn test_file_uri_destination() {
    assert_eq!(
        Target::parse("file:///tmp/pyramids").unwrap(),
        Target::Directory("/tmp/pyramids".into())
    );
    assert_eq!(
        Target::parse("s3://bucket/some/prefix/").unwrap(),
        Target::S3 {
            bucket: "bucket".to_string(),
            prefix: "some/prefix".to_string(),
        }
    );
}

#[test]
fn test_unsupported_destinations() {
    for uri in [
        "hdfs://namenode/out.tar",
        "hdfs://namenode/out",
        "out.seq",
        "ftp://host/out",
    ] {
        assert!(
            matches!(
                Destination::from_uri(uri, &S3Settings::default()),
                Err(StorageError::InvalidDestination(_))
            ),
            "{uri}"
        );
    }
}

#[test]
fn test_tar_destination() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("scan.TAR");

    let destination =
        Destination::from_uri(archive.to_str().unwrap(), &S3Settings::default()).unwrap();
    assert!(matches!(destination, Destination::Tar(_)));
    write(&destination, "scan.dzi", b"xml").unwrap();
    destination.close().unwrap();
    assert_eq!(read_tar(&archive)["scan.dzi"], b"xml");

    // An existing archive is never appended to
    assert!(matches!(
        Destination::from_uri(archive.to_str().unwrap(), &S3Settings::default()),
        Err(StorageError::AlreadyExists(_))
    ));
}

// =============================================================================
// Directory Storage
// =============================================================================

#[test]
fn test_directory_over_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("taken");
    fs::write(&file, b"x").unwrap();

    assert!(matches!(
        DirectoryStorage::create(&file),
        Err(StorageError::AlreadyExists(_))
    ));
}

#[test]
fn test_directory_reuses_existing_directory() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("out/img_files/0")).unwrap();

    let storage = DirectoryStorage::create(dir.path().join("out")).unwrap();
    write(&storage, "img_files/0/0_0.png", b"tile").unwrap();
    assert_eq!(storage.read_entry("img_files/0/0_0.png").unwrap().as_ref(), b"tile");
}

#[test]
fn test_duplicate_entry() {
    let dir = tempfile::tempdir().unwrap();
    let storage = DirectoryStorage::create(dir.path()).unwrap();

    write(&storage, "img.dzi", b"first").unwrap();
    assert!(matches!(
        write(&storage, "img.dzi", b"second"),
        Err(StorageError::AlreadyExists(_))
    ));
    assert_eq!(fs::read(dir.path().join("img.dzi")).unwrap(), b"first");
}

#[test]
fn test_append_after_close() {
    let dir = tempfile::tempdir().unwrap();
    let storage = DirectoryStorage::create(dir.path()).unwrap();
    storage.close().unwrap();
    storage.close().unwrap();

    assert!(matches!(write(&storage, "img.dzi", b"x"), Err(StorageError::Closed)));

    let memory = MemoryStorage::new();
    memory.close().unwrap();
    assert!(matches!(write(&memory, "img.dzi", b"x"), Err(StorageError::Closed)));
}

#[test]
fn test_append_file() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("local.bin");
    fs::write(&local, b"payload").unwrap();

    let storage = DirectoryStorage::create(dir.path().join("out")).unwrap();
    storage.append_file("copied/local.bin", &local).unwrap();
    assert_eq!(storage.read_entry("copied/local.bin").unwrap().as_ref(), b"payload");

    let memory = MemoryStorage::new();
    memory.append_file("local.bin", &local).unwrap();
    assert_eq!(memory.get("local.bin").unwrap().as_ref(), b"payload");
}

// =============================================================================
// Pyramid Entries
// =============================================================================

#[test]
fn test_build_entry_names() {
    let sink = MemoryStorage::new();
    let builder = PyramidBuilder::new(64, 1, "jpg", "xml").unwrap();
    builder
        .build(
            &InMemorySource::new(gradient_rgb(100, 50)),
            "/images/slide.v2.png",
            &sink,
            &options(2, 0.0),
        )
        .unwrap();

    let paths = sink.paths();
    assert!(paths.contains(&"slide.v2.xml".to_string()), "{paths:?}");
    assert!(paths.contains(&"slide.v2_files/7/1_0.jpg".to_string()), "{paths:?}");
    assert!(paths.iter().all(|path| path == "slide.v2.xml" || path.starts_with("slide.v2_files/")));

    let xml = String::from_utf8(sink.get("slide.v2.xml").unwrap().to_vec()).unwrap();
    assert!(xml.contains(r#"Format="jpg""#));
    assert!(xml.contains(r#"<Size Width="100" Height="50" />"#));
}

// =============================================================================
// Tar Archives
// =============================================================================

fn read_tar(path: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut archive = tar::Archive::new(File::open(path).unwrap());
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (name, data)
        })
        .collect()
}

#[test]
fn test_parallel_build_into_tar() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("img.tar");
    let raster = gradient_rgb(301, 187);
    let builder = PyramidBuilder::new(50, 2, "png", "dzi").unwrap();

    let storage = TarStorage::create(&archive).unwrap();
    let summary = builder
        .build(&InMemorySource::new(raster.clone()), "img", &storage, &options(4, 0.0))
        .unwrap();
    storage.close().unwrap();

    let expected: BTreeMap<String, Vec<u8>> =
        entries(&build_in_memory(&InMemorySource::new(raster), &builder, &options(1, 0.0)))
            .into_iter()
            .map(|(path, data)| (path, data.to_vec()))
            .collect();
    let archived = read_tar(&archive);
    assert_eq!(archived.len(), summary.tiles_written + 1);
    assert_eq!(archived, expected);
}
