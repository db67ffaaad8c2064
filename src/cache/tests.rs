use super::*;

const KEY: &str = "https://assets.example.com/rules.zip";

fn typed_metadata(etag: Option<&str>, last_modified: Option<i64>) -> HashMap<MetadataKey, String> {
    let mut metadata = HashMap::new();
    if let Some(etag) = etag {
        metadata.insert(MetadataKey::ETag, etag.to_string());
    }
    if let Some(lm) = last_modified {
        metadata.insert(MetadataKey::LastModifiedEpoch, lm.to_string());
    }
    metadata
}

#[test]
fn metadata_key_names_are_stable() {
    assert_eq!(MetadataKey::LastModifiedEpoch.as_str(), "last-modified-epoch");
    assert_eq!(MetadataKey::ETag.as_str(), "etag");
}

#[test]
fn entry_dir_is_scoped_by_sub_dir() {
    let store = CacheFileStore::new("/cache");

    let scoped = store.entry_dir(KEY, Some("rules"));
    let unscoped = store.entry_dir(KEY, None);

    assert_eq!(scoped.parent().unwrap(), Path::new("/cache/rules"));
    assert_eq!(unscoped.parent().unwrap(), Path::new("/cache"));
    assert_eq!(scoped.file_name(), unscoped.file_name());
}

#[test]
fn created_file_is_partial_and_invisible_to_strict_lookup() {
    let root = tempfile::tempdir().unwrap();
    let store = CacheFileStore::new(root.path());

    let file = store
        .create_file(KEY, Some("rules"), typed_metadata(Some("\"v1\""), Some(1_000)))
        .unwrap();

    assert!(!file.is_complete());
    assert!(file.path().exists());
    assert!(file.is_empty());
    assert_eq!(store.get_file(KEY, Some("rules"), false), None);

    let partial = store.get_file(KEY, Some("rules"), true).unwrap();
    assert_eq!(partial, file);
    assert_eq!(partial.etag(), Some("\"v1\""));
    assert_eq!(partial.last_modified_epoch(), Some(1_000));
}

#[test]
fn mark_complete_renames_and_preserves_metadata() {
    let root = tempfile::tempdir().unwrap();
    let store = CacheFileStore::new(root.path());
    let file = store
        .create_file(KEY, None, typed_metadata(Some("W/\"abc.def\""), Some(42)))
        .unwrap();
    fs::write(file.path(), b"body").unwrap();

    let complete = store.mark_complete(&file).unwrap();

    assert!(complete.is_complete());
    assert!(!file.path().exists(), "partial file should be renamed away");
    assert_eq!(fs::read(complete.path()).unwrap(), b"body");
    assert_eq!(complete.etag(), Some("W/\"abc.def\""));
    assert_eq!(complete.metadata(MetadataKey::LastModifiedEpoch), Some("42"));
    assert_eq!(store.get_file(KEY, None, false), Some(complete));
}

#[test]
fn mark_complete_rejects_complete_file() {
    let root = tempfile::tempdir().unwrap();
    let store = CacheFileStore::new(root.path());
    let file = store.create_file(KEY, None, HashMap::new()).unwrap();
    let complete = store.mark_complete(&file).unwrap();

    assert!(matches!(
        store.mark_complete(&complete),
        Err(CacheError::NotPartial { .. })
    ));
}

#[test]
fn mark_complete_fails_when_partial_vanished() {
    let root = tempfile::tempdir().unwrap();
    let store = CacheFileStore::new(root.path());
    let file = store.create_file(KEY, None, HashMap::new()).unwrap();
    fs::remove_file(file.path()).unwrap();

    assert!(matches!(
        store.mark_complete(&file),
        Err(CacheError::MarkCompleteFailed { .. })
    ));
}

#[test]
fn new_version_replaces_old_content() {
    let root = tempfile::tempdir().unwrap();
    let store = CacheFileStore::new(root.path());

    let v1 = store.create_file(KEY, None, typed_metadata(None, Some(1))).unwrap();
    fs::write(v1.path(), b"v1").unwrap();
    let v1 = store.mark_complete(&v1).unwrap();

    let v2 = store.create_file(KEY, None, typed_metadata(None, Some(2))).unwrap();
    fs::write(v2.path(), b"v2").unwrap();
    assert!(v1.path().exists(), "the old body stays readable while v2 is written");
    assert_eq!(store.get_file(KEY, None, false), Some(v1.clone()));

    let v2 = store.mark_complete(&v2).unwrap();
    assert!(!v1.path().exists());
    let found = store.get_file(KEY, None, false).unwrap();
    assert_eq!(found, v2);
    assert_eq!(found.last_modified_epoch(), Some(2));
}

#[test]
fn create_file_discards_leftover_partials() {
    let root = tempfile::tempdir().unwrap();
    let store = CacheFileStore::new(root.path());

    let stale = store.create_file(KEY, None, typed_metadata(None, Some(1))).unwrap();
    fs::write(stale.path(), b"half").unwrap();
    let fresh = store.create_file(KEY, None, typed_metadata(None, Some(2))).unwrap();

    assert!(!stale.path().exists());
    assert_eq!(store.get_file(KEY, None, true), Some(fresh));
}

#[test]
fn oversized_etag_is_dropped_from_file_name() {
    let root = tempfile::tempdir().unwrap();
    let store = CacheFileStore::new(root.path());
    let etag = format!("\"{}\"", "x".repeat(MAX_ETAG_LEN));

    let file = store
        .create_file(KEY, None, typed_metadata(Some(&etag), Some(7)))
        .unwrap();

    assert_eq!(file.etag(), None);
    assert_eq!(file.last_modified_epoch(), Some(7));
    assert_eq!(file.path().file_name().unwrap(), "content._.7.partial");

    let fits = "y".repeat(MAX_ETAG_LEN);
    let file = store
        .create_file("other", None, typed_metadata(Some(&fits), Some(7)))
        .unwrap();
    let file = store.mark_complete(&file).unwrap();
    assert_eq!(file.etag(), Some(fits.as_str()));
    assert!(file.path().file_name().unwrap().len() < 255);
}

#[test]
fn absent_metadata_round_trips_through_file_name() {
    let root = tempfile::tempdir().unwrap();
    let store = CacheFileStore::new(root.path());
    let file = store.create_file(KEY, None, HashMap::new()).unwrap();

    assert_eq!(file.path().file_name().unwrap(), "content._._.partial");
    let found = store.get_file(KEY, None, true).unwrap();
    assert_eq!(found.etag(), None);
    assert_eq!(found.last_modified_epoch(), None);
}

#[test]
fn foreign_files_are_ignored_by_lookup() {
    let root = tempfile::tempdir().unwrap();
    let store = CacheFileStore::new(root.path());
    let dir = store.ensure_entry_dir(KEY, None).unwrap();
    fs::write(dir.join("meta.txt"), "1|2|").unwrap();
    fs::write(dir.join("content.zz.1"), "bad hex").unwrap();
    fs::write(dir.join("content._.notanumber"), "bad epoch").unwrap();

    assert_eq!(store.get_file(KEY, None, true), None);
}

#[test]
fn delete_removes_content_and_metadata_record() {
    let root = tempfile::tempdir().unwrap();
    let store = CacheFileStore::new(root.path());
    let file = store.create_file(KEY, Some("rules"), HashMap::new()).unwrap();
    let dir = file.entry_dir().unwrap().to_path_buf();
    let provider = MetadataProvider::new();
    assert!(provider.create_metadata(Some(&dir), 10, 10));

    assert!(store.delete(KEY, Some("rules")));

    assert_eq!(store.get_file(KEY, Some("rules"), true), None);
    assert_eq!(provider.get_metadata(Some(&dir)), None);
    assert!(!store.delete(KEY, Some("rules")), "second delete finds nothing");
}

#[test]
fn sub_dir_must_be_single_component() {
    let root = tempfile::tempdir().unwrap();
    let store = CacheFileStore::new(root.path());

    for bad in ["../escape", "a/b", "..", "."] {
        assert!(
            matches!(
                store.ensure_entry_dir(KEY, Some(bad)),
                Err(CacheError::DirectoryNotWritable { .. })
            ),
            "{bad:?} should be rejected"
        );
    }
}

#[test]
fn empty_sub_dir_is_the_root() {
    let root = tempfile::tempdir().unwrap();
    let store = CacheFileStore::new(root.path());

    let dir = store.ensure_entry_dir(KEY, Some("")).unwrap();

    assert_eq!(dir, store.entry_dir(KEY, None));
    let file = store.create_file(KEY, Some(""), HashMap::new()).unwrap();
    assert_eq!(store.get_file(KEY, None, true), Some(file));
}

#[test]
fn unwritable_root_is_reported() {
    let root = tempfile::tempdir().unwrap();
    let blocker = root.path().join("blocker");
    fs::write(&blocker, b"not a directory").unwrap();
    let store = CacheFileStore::new(&blocker);

    assert!(matches!(
        store.ensure_entry_dir(KEY, Some("rules")),
        Err(CacheError::DirectoryNotWritable { .. })
    ));
}

#[test]
fn clear_sub_dir_removes_all_entries() {
    let root = tempfile::tempdir().unwrap();
    let store = CacheFileStore::new(root.path());
    store.create_file("a", Some("images"), HashMap::new()).unwrap();
    store.create_file("b", Some("images"), HashMap::new()).unwrap();
    store.create_file("c", Some("rules"), HashMap::new()).unwrap();

    assert!(store.clear_sub_dir("images"));

    assert_eq!(store.get_file("a", Some("images"), true), None);
    assert_eq!(store.get_file("b", Some("images"), true), None);
    assert!(store.get_file("c", Some("rules"), true).is_some());
    assert!(!store.clear_sub_dir("../rules"));
}
