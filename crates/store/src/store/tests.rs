use super::*;
use crate::{
    BytesSource, Database, DirectExtractor, ExtractorKind, FileExtractor, FileSource, MemoryExtractor, ReaderSource,
};
use rstest::rstest;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tempfile::TempDir;

const QWERTY_SHA256: &str = "9a900403ac313ba27a1bc81f0932652b8020dac92c234d98fa0b06bf0040ecfd";
const GLOB_FILES: [&str; 7] = ["foo.txt", "bar.txt", "test1.txt", "test2.txt", "taxi.txt", "tax%.txt", "file.dat"];

struct Fixture {
    dir: TempDir,
    db: Database,
    store: FileStore,
}

async fn fixture(extractor: ExtractorHandle) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::connect(dir.path().join("store.db"), None).await.unwrap();
    let store = FileStore::new(db.pool().clone(), "storage", extractor).unwrap();
    store.ensure_table().await.unwrap();
    Fixture { dir, db, store }
}

fn secret(phrase: &str) -> Secret {
    Secret::new(phrase).unwrap().with_iterations(1_000).unwrap()
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Deterministic, compressible, not-too-repetitive text.
fn text(size: usize) -> Vec<u8> {
    const WORDS: [&str; 12] = [
        "alpha ", "bravo ", "charlie ", "delta ", "echo ", "foxtrot ", "golf ", "hotel ", "india ", "juliett ", "kilo ",
        "lima\n",
    ];
    let mut out = Vec::with_capacity(size + 16);
    let mut state: u32 = 0x2545_f491;
    while out.len() < size {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        out.extend_from_slice(WORDS[state as usize % WORDS.len()].as_bytes());
    }
    out.truncate(size);
    out
}

fn spool_dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

/// Hash a stream off the runtime, the way callers must consume direct streams.
async fn hash_stream(mut stream: ContentStream) -> (u64, String) {
    tokio::task::spawn_blocking(move || {
        let mut hasher = Sha256::new();
        let length = stream.copy_to(&mut hasher).unwrap();
        (length, format!("{:x}", hasher.finalize()))
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_store_and_get() {
    let fx = fixture(ExtractorKind::File.handle()).await;
    let stored = fx.store.store(&BytesSource::new(&b"qwertyuiop"[..]), "qwerty.txt").await.unwrap();
    assert_eq!(stored.filename(), "qwerty.txt");
    assert_eq!(stored.content_length(), 10);
    assert_eq!(stored.sha256_hex(), Some(QWERTY_SHA256));
    assert!(stored.flags().is_plain());

    let fetched = fx.store.get("qwerty.txt").await.unwrap();
    assert_eq!(fetched.meta(), stored.meta());
    assert_eq!(fetched.read_all().await.unwrap(), b"qwertyuiop");
    fx.db.close().await;
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn test_round_trip(
    #[values(ExtractorKind::Direct, ExtractorKind::Memory, ExtractorKind::File)] extractor: ExtractorKind,
    #[values(Compression::None, Compression::Low, Compression::Medium, Compression::High)] compression: Compression,
    #[values(false, true)] encrypted: bool,
) {
    let fx = fixture(extractor.handle()).await;
    let mut store = fx.store.with_compression(compression);
    if encrypted {
        store = store.with_secret(secret("round trip"));
    }
    let input = text(300_000);
    let resource = store.store(&BytesSource::new(input.clone()), "round-trip.txt").await.unwrap();
    assert_eq!(resource.flags().compressed, compression.is_enabled());
    assert_eq!(resource.flags().encrypted, encrypted);
    assert_eq!(resource.sha256_hex(), Some(sha256_hex(&input).as_str()));

    let output = store.get("round-trip.txt").await.unwrap().read_all().await.unwrap();
    assert_eq!(output.len(), input.len());
    assert_eq!(sha256_hex(&output), sha256_hex(&input));
    fx.db.close().await;
}

/// Store `content` under `filename` and read it back through a direct stream,
/// returning how long the round trip took.
async fn timed_round_trip(store: &FileStore, content: &bytes::Bytes, filename: &str) -> Duration {
    let started = Instant::now();
    store.store(&BytesSource::new(content.clone()), filename).await.unwrap();
    let stream = store.get(filename).await.unwrap().open().await.unwrap();
    let (length, _) = hash_stream(stream).await;
    assert_eq!(length, content.len() as u64);
    started.elapsed()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_round_trip_cost_grows_linearly() {
    const SMALL: usize = 4 * 1024 * 1024;
    const FACTOR: u32 = 16;
    let fx = fixture(ExtractorKind::Direct.handle()).await;
    let small = bytes::Bytes::from(text(SMALL));
    let large = bytes::Bytes::from(text(SMALL * FACTOR as usize));

    let mut baseline = Duration::MAX;
    for attempt in 0..3 {
        baseline = baseline.min(timed_round_trip(&fx.store, &small, &format!("small-{attempt}.txt")).await);
    }
    let elapsed = timed_round_trip(&fx.store, &large, "large.txt").await;
    // Generous headroom for noisy machines; per-chunk costs that grow with the
    // blob's size blow well past it.
    let limit = baseline * FACTOR * 3 + Duration::from_millis(500);
    assert!(elapsed < limit, "{FACTOR}x the content took {elapsed:?}, baseline {baseline:?}");
    fx.db.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_large_content_through_every_extractor() {
    const SIZE: usize = 32 * 1024 * 1024;
    let fx = fixture(ExtractorKind::File.handle()).await;
    let source_path = fx.dir.path().join("large.txt");
    let content = text(SIZE);
    std::fs::write(&source_path, &content).unwrap();
    let expected = sha256_hex(&content);
    drop(content);
    let source = FileSource::new(&source_path);

    let extractors: [ExtractorHandle; 3] = [
        Arc::new(DirectExtractor),
        Arc::new(MemoryExtractor),
        Arc::new(FileExtractor::in_dir(fx.dir.path())),
    ];
    for compression in [Compression::None, Compression::Low, Compression::Medium, Compression::High] {
        let filename = format!("large-{compression}.txt");
        let stored = fx.store.with_compression(compression).store(&source, &filename).await.unwrap();
        assert_eq!(stored.content_length(), SIZE as u64);
        assert_eq!(stored.sha256_hex(), Some(expected.as_str()));

        for extractor in &extractors {
            let store = fx.store.with_extractor(extractor.clone());
            let stream = store.get(&filename).await.unwrap().open().await.unwrap();
            let (length, hash) = hash_stream(stream).await;
            assert_eq!(length, SIZE as u64, "{compression} via {}", extractor.name());
            assert_eq!(hash, expected, "{compression} via {}", extractor.name());
        }
    }
    fx.db.close().await;
}

#[rstest]
#[case(&["*"], 7)]
#[case(&["t*"], 4)]
#[case(&["te*"], 2)]
#[case(&["tax%*"], 1)]
#[case(&["tax%.txt"], 1)]
#[case(&["tax*.txt"], 2)]
#[case(&["tax?.txt"], 2)]
#[case(&["?ax*.txt"], 2)]
#[case(&["*ax*"], 2)]
#[case(&["*.txt"], 6)]
#[case(&["*.d?t"], 1)]
#[case(&["test_.txt"], 0)]
#[case(&["nothing*"], 0)]
#[case(&["foo*", "bar*"], 2)]
#[case(&["*.dat", "t*"], 5)]
#[case(&["*.txt", "*"], 7)]
#[tokio::test(flavor = "multi_thread")]
async fn test_list_globs(#[case] globs: &[&str], #[case] expected: usize) {
    let fx = fixture(ExtractorKind::Memory.handle()).await;
    for name in GLOB_FILES {
        fx.store.store(&BytesSource::new(name.as_bytes().to_vec()), name).await.unwrap();
    }
    let found = fx.store.list(globs).await.unwrap();
    assert_eq!(found.len(), expected, "globs {globs:?}");
    fx.db.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_list_everything_in_filename_order() {
    let fx = fixture(ExtractorKind::Memory.handle()).await;
    for name in GLOB_FILES {
        fx.store.store(&BytesSource::new(name.as_bytes().to_vec()), name).await.unwrap();
    }
    let names: Vec<String> = fx
        .store
        .list::<&str>(&[])
        .await
        .unwrap()
        .iter()
        .map(|resource| resource.filename().to_string())
        .collect();
    let mut expected: Vec<String> = GLOB_FILES.iter().map(|name| name.to_string()).collect();
    expected.sort();
    assert_eq!(names, expected);
    fx.db.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_duplicate_store_leaves_original_untouched() {
    let fx = fixture(ExtractorKind::Memory.handle()).await;
    fx.store.store(&BytesSource::new(&b"first"[..]), "dup.txt").await.unwrap();

    let second = ReaderSource::new(std::io::Cursor::new(b"second".to_vec()));
    let err = fx.store.store(&second, "dup.txt").await.unwrap_err();
    assert_eq!(*err, ErrorKind::AlreadyExists("dup.txt".to_string()));
    // The one-shot source was never opened.
    assert!(second.exists().await.unwrap());
    assert_eq!(fx.store.get("dup.txt").await.unwrap().read_all().await.unwrap(), b"first");
    fx.db.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_filename_is_rejected() {
    let fx = fixture(ExtractorKind::Memory.handle()).await;
    let err = fx.store.store(&BytesSource::new(&b"x"[..]), "").await.unwrap_err();
    assert!(matches!(*err, ErrorKind::InvalidArgument(_)));
    fx.store.store(&BytesSource::new(&b"x"[..]), "x").await.unwrap();
    let err = fx.store.rename("x", "").await.unwrap_err();
    assert!(matches!(*err, ErrorKind::InvalidArgument(_)));
    let err = fx.store.rename("", "y").await.unwrap_err();
    assert!(matches!(*err, ErrorKind::InvalidArgument(_)));
    assert!(matches!(*fx.store.get("").await.unwrap_err(), ErrorKind::InvalidArgument(_)));
    assert!(matches!(*fx.store.exists("").await.unwrap_err(), ErrorKind::InvalidArgument(_)));
    assert!(matches!(*fx.store.delete("").await.unwrap_err(), ErrorKind::InvalidArgument(_)));
    assert!(fx.store.exists("x").await.unwrap());
    fx.db.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rename() {
    let fx = fixture(ExtractorKind::File.handle()).await;
    fx.store.store(&BytesSource::new(&b"one"[..]), "one.txt").await.unwrap();
    fx.store.store(&BytesSource::new(&b"two"[..]), "two.txt").await.unwrap();

    let err = fx.store.rename("one.txt", "two.txt").await.unwrap_err();
    assert_eq!(*err, ErrorKind::AlreadyExists("two.txt".to_string()));
    assert_eq!(fx.store.get("one.txt").await.unwrap().read_all().await.unwrap(), b"one");
    assert_eq!(fx.store.get("two.txt").await.unwrap().read_all().await.unwrap(), b"two");

    let err = fx.store.rename("missing.txt", "three.txt").await.unwrap_err();
    assert_eq!(*err, ErrorKind::NotFound("missing.txt".to_string()));

    let old = fx.store.get("one.txt").await.unwrap();
    fx.store.rename("one.txt", "uno.txt").await.unwrap();
    assert!(!old.exists().await.unwrap());
    assert!(matches!(*old.open().await.unwrap_err(), ErrorKind::NotFound(_)));
    let renamed = fx.store.get("uno.txt").await.unwrap();
    assert_eq!(renamed.read_all().await.unwrap(), b"one");
    assert_eq!(renamed.last_modified(), old.last_modified());
    fx.db.close().await;
}

#[rstest]
#[case(ExtractorKind::Direct)]
#[case(ExtractorKind::Memory)]
#[case(ExtractorKind::File)]
#[tokio::test(flavor = "multi_thread")]
async fn test_delete_visibility(#[case] extractor: ExtractorKind) {
    let fx = fixture(extractor.handle()).await;
    let resource = fx.store.store(&BytesSource::new(&b"doomed"[..]), "doomed.txt").await.unwrap();
    let opened_before = resource.open().await.unwrap();

    fx.store.delete("doomed.txt").await.unwrap();
    assert!(!resource.exists().await.unwrap());
    assert!(matches!(*resource.open().await.unwrap_err(), ErrorKind::NotFound(_)));
    assert!(matches!(*fx.store.get("doomed.txt").await.unwrap_err(), ErrorKind::NotFound(_)));
    assert!(matches!(*fx.store.delete("doomed.txt").await.unwrap_err(), ErrorKind::NotFound(_)));

    // Streams opened earlier keep serving what they saw: buffered ones from
    // their copy, direct ones from their read snapshot.
    let (length, hash) = hash_stream(opened_before).await;
    assert_eq!(length, 6);
    assert_eq!(hash, sha256_hex(b"doomed"));
    fx.db.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_builders_do_not_mutate() {
    let fx = fixture(ExtractorKind::Direct.handle()).await;
    let compressed = fx.store.with_compression(Compression::High);
    let encrypted = fx.store.with_encryption("s3cret").unwrap();
    let qualified = fx.store.with_schema("main").unwrap();
    let buffered = fx.store.with_extractor(ExtractorKind::Memory.handle());

    assert_eq!(fx.store.config().compression(), Compression::None);
    assert!(!fx.store.config().is_encrypted());
    assert_eq!(fx.store.config().table().schema(), None);
    assert_eq!(fx.store.config().extractor().name(), "direct");

    assert_eq!(compressed.config().compression(), Compression::High);
    assert!(encrypted.config().is_encrypted());
    assert_eq!(qualified.config().table().qualified(), "\"main\".\"storage\"");
    assert_eq!(buffered.config().extractor().name(), "memory");

    assert!(matches!(*fx.store.with_encryption("").unwrap_err(), ErrorKind::InvalidArgument(_)));
    assert!(matches!(*fx.store.with_schema("").unwrap_err(), ErrorKind::InvalidArgument(_)));
    fx.db.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_schema_qualified_store() {
    let fx = fixture(ExtractorKind::Memory.handle()).await;
    let qualified = fx.store.with_schema("main").unwrap();
    qualified.ensure_table().await.unwrap();
    qualified.store(&BytesSource::new(&b"qualified"[..]), "q.txt").await.unwrap();
    // Same table, reached without the qualifier.
    assert_eq!(fx.store.get("q.txt").await.unwrap().read_all().await.unwrap(), b"qualified");
    fx.db.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rows_decode_by_their_own_flags() {
    let fx = fixture(ExtractorKind::Memory.handle()).await;
    let plain = fx.store.clone();
    let sealed = fx.store.with_compression(Compression::Medium).with_secret(secret("mixed"));
    plain.store(&BytesSource::new(&b"plain text"[..]), "plain.txt").await.unwrap();
    sealed.store(&BytesSource::new(&b"sealed text"[..]), "sealed.txt").await.unwrap();

    // The encrypting store reads plain rows, and the plain store can still
    // list and describe sealed rows.
    assert_eq!(sealed.get("plain.txt").await.unwrap().read_all().await.unwrap(), b"plain text");
    assert_eq!(sealed.get("sealed.txt").await.unwrap().read_all().await.unwrap(), b"sealed text");
    let listed = plain.list(&["*"]).await.unwrap();
    assert_eq!(listed.len(), 2);

    // Without the secret, sealed content can't be opened.
    let err = plain.get("sealed.txt").await.unwrap().read_all().await.unwrap_err();
    assert!(matches!(*err, ErrorKind::InvalidArgument(_)));
    fx.db.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wrong_secret_is_corrupt_content() {
    let fx = fixture(ExtractorKind::Direct.handle()).await;
    let sealed = fx.store.with_secret(secret("right"));
    sealed.store(&BytesSource::new(text(100_000)), "secret.txt").await.unwrap();
    let wrong = fx.store.with_secret(secret("wrong"));
    let err = wrong.get("secret.txt").await.unwrap().read_all().await.unwrap_err();
    assert_eq!(*err, ErrorKind::CorruptContent);
    fx.db.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tampered_content_is_corrupt_and_spool_is_removed() {
    let fx = fixture(ExtractorKind::Memory.handle()).await;
    let spool_dir = tempfile::tempdir().unwrap();
    let sealed = fx
        .store
        .with_compression(Compression::Low)
        .with_secret(secret("tamper"))
        .with_extractor(Arc::new(FileExtractor::in_dir(spool_dir.path())));
    sealed.store(&BytesSource::new(text(50_000)), "tampered.txt").await.unwrap();

    let (mut contents,): (Vec<u8>,) = sqlx::query_as("SELECT file_contents FROM storage WHERE filename = ?1")
        .bind("tampered.txt")
        .fetch_one(fx.db.pool())
        .await
        .unwrap();
    let middle = contents.len() / 2;
    contents[middle] ^= 0x40;
    sqlx::query("UPDATE storage SET file_contents = ?2 WHERE filename = ?1")
        .bind("tampered.txt")
        .bind(contents)
        .execute(fx.db.pool())
        .await
        .unwrap();

    let err = sealed.get("tampered.txt").await.unwrap().read_all().await.unwrap_err();
    assert_eq!(*err, ErrorKind::CorruptContent);
    assert!(spool_dir_is_empty(spool_dir.path()));
    fx.db.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_spool_is_removed_on_close_and_drop() {
    let fx = fixture(ExtractorKind::Memory.handle()).await;
    let spool_dir = tempfile::tempdir().unwrap();
    let store = fx.store.with_extractor(Arc::new(FileExtractor::in_dir(spool_dir.path())));
    let resource = store.store(&BytesSource::new(&b"spooled"[..]), "spooled.txt").await.unwrap();

    let stream = resource.open().await.unwrap();
    let path = stream.spool_path().unwrap().to_path_buf();
    assert!(path.starts_with(spool_dir.path()));
    assert!(path.exists());
    stream.close();
    assert!(spool_dir_is_empty(spool_dir.path()));

    let stream = resource.open().await.unwrap();
    assert!(!spool_dir_is_empty(spool_dir.path()));
    drop(stream);
    assert!(spool_dir_is_empty(spool_dir.path()));
    fx.db.close().await;
}

#[rstest]
#[case(ExtractorKind::Direct, false)]
#[case(ExtractorKind::Memory, true)]
#[case(ExtractorKind::File, true)]
#[tokio::test(flavor = "multi_thread")]
async fn test_rewind(#[case] extractor: ExtractorKind, #[case] rewindable: bool) {
    let fx = fixture(extractor.handle()).await;
    let store = fx.store.with_compression(Compression::Low);
    let resource = store.store(&BytesSource::new(&b"again and again"[..]), "again.txt").await.unwrap();
    let stream = resource.open().await.unwrap();
    assert_eq!(stream.is_rewindable(), rewindable);

    let (first, rewound) = tokio::task::spawn_blocking(move || {
        let mut stream = stream;
        let first = stream.read_to_vec().unwrap();
        let rewound = stream.rewind().and_then(|()| stream.read_to_vec());
        (first, rewound)
    })
    .await
    .unwrap();
    assert_eq!(first, b"again and again");
    match rewound {
        Ok(second) => {
            assert!(rewindable);
            assert_eq!(second, b"again and again");
        },
        Err(err) => {
            assert!(!rewindable);
            assert!(matches!(*err, ErrorKind::InvalidArgument(_)));
        },
    }
    fx.db.close().await;
}

#[rstest]
#[case(ExtractorKind::Direct)]
#[case(ExtractorKind::Memory)]
#[case(ExtractorKind::File)]
#[tokio::test(flavor = "multi_thread")]
async fn test_empty_content(#[case] extractor: ExtractorKind) {
    let fx = fixture(extractor.handle()).await;
    for (name, store) in [
        ("plain", fx.store.clone()),
        ("sealed", fx.store.with_compression(Compression::High).with_secret(secret("empty"))),
    ] {
        let resource = store.store(&BytesSource::new(Vec::new()), name).await.unwrap();
        assert_eq!(resource.content_length(), 0);
        assert!(store.get(name).await.unwrap().read_all().await.unwrap().is_empty());
    }
    fx.db.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_source_leaves_no_row() {
    struct Failing {
        remaining: usize,
    }
    impl Read for Failing {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.remaining == 0 {
                return Err(std::io::Error::other("source went away"));
            }
            let n = buf.len().min(self.remaining);
            buf[..n].fill(b'z');
            self.remaining -= n;
            Ok(n)
        }
    }

    let fx = fixture(ExtractorKind::Memory.handle()).await;
    let source = ReaderSource::new(Failing { remaining: 9 * 1024 * 1024 });
    let err = fx.store.store(&source, "partial.bin").await.unwrap_err();
    assert_eq!(*err, ErrorKind::Storage);
    assert!(!fx.store.exists("partial.bin").await.unwrap());
    assert!(fx.store.list::<&str>(&[]).await.unwrap().is_empty());
    // The name is free again.
    fx.store.store(&BytesSource::new(&b"whole"[..]), "partial.bin").await.unwrap();
    fx.db.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_file_source_keeps_modification_time() {
    let fx = fixture(ExtractorKind::Memory.handle()).await;
    let path = fx.dir.path().join("dated.txt");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(b"dated").unwrap();
    let modified = SystemTime::UNIX_EPOCH + Duration::from_nanos(1_600_000_000_123_456_789);
    file.set_modified(modified).unwrap();
    drop(file);

    let resource = fx.store.store(&FileSource::new(&path), "dated.txt").await.unwrap();
    let fetched = fx.store.get("dated.txt").await.unwrap();
    assert_eq!(fetched.last_modified(), resource.last_modified());
    assert_eq!(fetched.last_modified().unix_timestamp_nanos(), 1_600_000_000_123_000_000);
    fx.db.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_copy_between_stores() {
    let fx = fixture(ExtractorKind::Direct.handle()).await;
    let archive = FileStore::new(fx.db.pool().clone(), "archive", ExtractorKind::File.handle())
        .unwrap()
        .with_compression(Compression::High)
        .with_secret(secret("archive"));
    archive.ensure_table().await.unwrap();

    let input = text(1_000_000);
    let original = fx.store.store(&BytesSource::new(input.clone()), "copy.txt").await.unwrap();
    let copied = archive.store(&original, "copy.txt").await.unwrap();
    assert_eq!(copied.sha256_hex(), original.sha256_hex());
    assert_eq!(copied.last_modified(), original.last_modified());
    assert!(copied.flags().encrypted && copied.flags().compressed);
    assert_eq!(archive.get("copy.txt").await.unwrap().read_all().await.unwrap(), input);
    fx.db.close().await;
}
