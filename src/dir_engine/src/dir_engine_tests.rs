use crate::*;
use pod_store::LocalStore;
use podfs_lib::{
    BlockStoreRef, Compression, DirEntry, FeedClient, FeedStoreRef, MemoryBlockStore,
    MemoryFeedStore, PodFsConfig, PodFsError, PodPath, Topic, DEFAULT_DIR_MODE, S_IFDIR,
};
use std::sync::{Arc, Once};

static INIT: Once = Once::new();

fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn memory_stores() -> (BlockStoreRef, FeedStoreRef) {
    (
        Arc::new(MemoryBlockStore::new()),
        Arc::new(MemoryFeedStore::new()),
    )
}

fn test_config() -> PodFsConfig {
    PodFsConfig {
        worker_count: Some(4),
        ..Default::default()
    }
}

async fn new_namespace() -> (Namespace, BlockStoreRef, FeedStoreRef) {
    init_logging();
    let (blocks, feeds) = memory_stores();
    let ns = Namespace::create("pod", "0xowner", blocks.clone(), feeds.clone(), test_config())
        .await
        .unwrap();
    (ns, blocks, feeds)
}

fn p(path: &str) -> PodPath {
    PodPath::new(path)
}

fn payload(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

async fn put(ns: &Namespace, path: &str, data: &[u8]) {
    ns.upload(data, &p(path), data.len() as u64, 16, Some(Compression::Gzip))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_upload_into_nested_directory() {
    let (ns, _, _) = new_namespace().await;
    ns.mkdir(&p("/a"), 0).await.unwrap();
    ns.mkdir(&p("/a/b"), 0).await.unwrap();

    let data = payload(1, 1000);
    ns.upload(&data[..], &p("/a/b/f.txt"), 1000, 64, None)
        .await
        .unwrap();
    assert_eq!(ns.read_all(&p("/a/b/f.txt")).await.unwrap(), data);

    let listing = ns.list(&p("/a/b")).await.unwrap();
    assert_eq!(listing.files, vec![p("/a/b/f.txt")]);
    assert!(listing.dirs.is_empty());

    let listing = ns.list(&p("/a")).await.unwrap();
    assert_eq!(listing.dirs.len(), 1);
    assert_eq!(listing.dirs[0].full_path(), p("/a/b"));
}

#[tokio::test]
async fn test_rmdir_requires_empty_directory() {
    let (ns, _, _) = new_namespace().await;
    ns.mkdir(&p("/c"), 0).await.unwrap();
    put(&ns, "/c/file", b"content").await;

    let err = ns.rmdir(&p("/c")).await.unwrap_err();
    assert!(matches!(err, PodFsError::NotEmpty(_)));

    ns.rm_file(&p("/c/file")).await.unwrap();
    ns.rmdir(&p("/c")).await.unwrap();

    assert!(ns.list(&p("/c")).await.unwrap_err().is_not_found());
    assert!(ns.list(&PodPath::root()).await.unwrap().names().is_empty());
    assert!(ns.rmdir(&PodPath::root()).await.is_err());
}

#[tokio::test]
async fn test_rm_file_unlinks_entry() {
    let (ns, _, _) = new_namespace().await;
    put(&ns, "/doc", b"words").await;
    ns.rm_file(&p("/doc")).await.unwrap();

    assert!(ns.download(&p("/doc")).await.unwrap_err().is_deleted());
    assert!(ns.list(&PodPath::root()).await.unwrap().files.is_empty());
    assert!(ns.entry(&p("/doc")).await.unwrap_err().is_not_found());

    // the name can be used again
    put(&ns, "/doc", b"new words").await;
    assert_eq!(ns.read_all(&p("/doc")).await.unwrap(), b"new words".to_vec());
}

async fn build_parent_tree(ns: &Namespace) {
    ns.mkdir(&p("/parentDir"), 0).await.unwrap();
    put(ns, "/parentDir/file1", &payload(1, 100)).await;
    put(ns, "/parentDir/file2", &payload(2, 37)).await;
    ns.mkdir(&p("/parentDir/subDir1"), 0).await.unwrap();
    ns.mkdir(&p("/parentDir/subDir2"), 0).await.unwrap();
    put(ns, "/parentDir/subDir1/inner", &payload(3, 300)).await;
    ns.mkdir(&p("/parentDir/subDir1/deep"), 0o700).await.unwrap();
    put(ns, "/parentDir/subDir1/deep/leaf", &payload(4, 5)).await;
}

#[tokio::test]
async fn test_rename_directory_moves_subtree() {
    let (ns, _, _) = new_namespace().await;
    build_parent_tree(&ns).await;

    ns.rename_dir(&p("/parentDir"), &p("/parentNew"))
        .await
        .unwrap();

    let listing = ns.list(&p("/parentNew")).await.unwrap();
    assert_eq!(
        listing.names(),
        vec!["file1", "file2", "subDir1", "subDir2"]
    );
    assert!(ns.list(&p("/parentDir")).await.unwrap_err().is_not_found());
    assert_eq!(ns.list(&PodPath::root()).await.unwrap().names(), vec!["parentNew"]);

    assert_eq!(ns.read_all(&p("/parentNew/file1")).await.unwrap(), payload(1, 100));
    assert_eq!(
        ns.read_all(&p("/parentNew/subDir1/inner")).await.unwrap(),
        payload(3, 300)
    );
    assert_eq!(
        ns.read_all(&p("/parentNew/subDir1/deep/leaf")).await.unwrap(),
        payload(4, 5)
    );
    let deep = ns.dirs().dir_stat(&p("/parentNew/subDir1/deep")).await.unwrap();
    assert_eq!(deep.mode, S_IFDIR | 0o700);

    for old in [
        "/parentDir/file1",
        "/parentDir/file2",
        "/parentDir/subDir1/inner",
        "/parentDir/subDir1/deep/leaf",
    ] {
        assert!(ns.download(&p(old)).await.unwrap_err().is_not_found(), "{}", old);
    }
    for old in ["/parentDir/subDir1", "/parentDir/subDir2", "/parentDir/subDir1/deep"] {
        assert!(!ns.dirs().is_dir_present(&p(old)).await.unwrap(), "{}", old);
    }
}

#[tokio::test]
async fn test_rename_survives_fresh_session() {
    let (ns, blocks, feeds) = new_namespace().await;
    build_parent_tree(&ns).await;
    ns.rename_dir(&p("/parentDir"), &p("/parentNew"))
        .await
        .unwrap();
    drop(ns);

    let ns = Namespace::open("pod", "0xowner", blocks, feeds, test_config())
        .await
        .unwrap();
    assert_eq!(ns.dirs().node_cache().len(), 5);
    assert_eq!(
        ns.read_all(&p("/parentNew/subDir1/deep/leaf")).await.unwrap(),
        payload(4, 5)
    );
    assert!(ns.list(&p("/parentDir")).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_rename_preconditions() {
    let (ns, _, _) = new_namespace().await;
    ns.mkdir(&p("/x"), 0).await.unwrap();
    ns.mkdir(&p("/x/y"), 0).await.unwrap();
    ns.mkdir(&p("/z"), 0).await.unwrap();

    let err = ns.rename_dir(&PodPath::root(), &p("/r")).await.unwrap_err();
    assert!(matches!(err, PodFsError::InvalidParam(_)));

    let err = ns.rename_dir(&p("/x"), &p("/x/y/x")).await.unwrap_err();
    assert!(matches!(err, PodFsError::InvalidParam(_)));

    let err = ns.rename_dir(&p("/x"), &p("/z")).await.unwrap_err();
    assert!(matches!(err, PodFsError::AlreadyExists(_)));

    let err = ns
        .rename_dir(&p("/x"), &p(&format!("/{}", "n".repeat(101))))
        .await
        .unwrap_err();
    assert!(matches!(err, PodFsError::InvalidParam(_)));

    let err = ns.rename_dir(&p("/missing"), &p("/m2")).await.unwrap_err();
    assert!(err.is_not_found());

    // a move under another parent
    ns.rename_dir(&p("/x/y"), &p("/z/y2")).await.unwrap();
    assert!(ns.list(&p("/x")).await.unwrap().names().is_empty());
    assert_eq!(ns.list(&p("/z")).await.unwrap().names(), vec!["y2"]);
}

#[tokio::test]
async fn test_mkdir_validation() {
    let (ns, _, _) = new_namespace().await;
    let err = ns
        .mkdir(&p(&format!("/{}", "n".repeat(101))), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, PodFsError::InvalidParam(_)));
    ns.mkdir(&p(&format!("/{}", "n".repeat(100))), 0)
        .await
        .unwrap();

    let err = ns.mkdir(&p("/no/parent"), 0).await.unwrap_err();
    assert!(err.is_not_found());

    ns.mkdir(&p("/dup"), 0).await.unwrap();
    let err = ns.mkdir(&p("/dup"), 0).await.unwrap_err();
    assert!(matches!(err, PodFsError::AlreadyExists(_)));

    put(&ns, "/taken", b"file").await;
    let err = ns.mkdir(&p("/taken"), 0).await.unwrap_err();
    assert!(matches!(err, PodFsError::AlreadyExists(_)));

    let err = ns.mkdir(&PodPath::root(), 0).await.unwrap_err();
    assert!(matches!(err, PodFsError::AlreadyExists(_)));

    let err = ns.mkdir(&p("/badmode"), 0o40755).await.unwrap_err();
    assert!(matches!(err, PodFsError::InvalidParam(_)));
}

#[tokio::test]
async fn test_entry_order_is_preserved() {
    let (ns, _, _) = new_namespace().await;
    let dirs = ns.dirs();
    let root = PodPath::root();
    for (name, is_file) in [("a", true), ("b", false), ("c", true), ("d", false)] {
        dirs.add_entry_to_dir(&root, name, is_file).await.unwrap();
    }
    assert!(matches!(
        dirs.add_entry_to_dir(&root, "a", false).await.unwrap_err(),
        PodFsError::AlreadyExists(_)
    ));
    dirs.remove_entry_from_dir(&root, "b", false).await.unwrap();
    assert!(dirs
        .remove_entry_from_dir(&root, "c", false)
        .await
        .unwrap_err()
        .is_not_found());

    // a cold read sees the same order as the cache
    dirs.node_cache().clear();
    let node = dirs.load_node(&root).await.unwrap();
    assert_eq!(
        node.entries,
        vec![
            DirEntry::File("a".to_string()),
            DirEntry::File("c".to_string()),
            DirEntry::Directory("d".to_string()),
        ]
    );

    let err = dirs
        .add_entry_to_dir(&p("/absent"), "x", true)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_chmod_and_stat() {
    let (ns, _, _) = new_namespace().await;
    ns.mkdir(&p("/d"), 0).await.unwrap();
    ns.mkdir(&p("/d/sub"), 0).await.unwrap();
    put(&ns, "/d/f1", b"1").await;
    put(&ns, "/d/f2", b"22").await;

    match ns.stat(&p("/d")).await.unwrap() {
        NodeStat::Dir(stats) => {
            assert_eq!(stats.file_count, 2);
            assert_eq!(stats.dir_count, 1);
            assert_eq!(stats.mode, DEFAULT_DIR_MODE);
        }
        other => panic!("unexpected {:?}", other),
    }

    ns.chmod(&p("/d"), 0o711).await.unwrap();
    ns.chmod(&p("/d/f1"), 0o600).await.unwrap();
    assert_eq!(
        ns.dirs().dir_stat(&p("/d")).await.unwrap().mode,
        S_IFDIR | 0o711
    );
    match ns.stat(&p("/d/f1")).await.unwrap() {
        NodeStat::File(stats) => assert_eq!(stats.meta.mode & 0o7777, 0o600),
        other => panic!("unexpected {:?}", other),
    }

    assert!(ns.stat(&p("/d/none")).await.unwrap_err().is_not_found());
    assert!(ns.chmod(&p("/d"), 0o10000).await.is_err());
}

#[tokio::test]
async fn test_rename_file_between_directories() {
    let (ns, _, _) = new_namespace().await;
    ns.mkdir(&p("/src"), 0).await.unwrap();
    ns.mkdir(&p("/dst"), 0).await.unwrap();
    put(&ns, "/src/a.bin", &payload(9, 70)).await;

    ns.rename(&p("/src/a.bin"), &p("/dst/b.bin")).await.unwrap();
    assert!(ns.list(&p("/src")).await.unwrap().files.is_empty());
    assert_eq!(ns.list(&p("/dst")).await.unwrap().files, vec![p("/dst/b.bin")]);
    assert_eq!(ns.read_all(&p("/dst/b.bin")).await.unwrap(), payload(9, 70));
    assert!(ns.read_all(&p("/src/a.bin")).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_deleted_child_is_skipped() {
    let (ns, _, feeds) = new_namespace().await;
    ns.mkdir(&p("/keep"), 0).await.unwrap();
    ns.mkdir(&p("/lost"), 0).await.unwrap();

    // tombstone behind the engine's back, as another session would
    FeedClient::new(feeds, "0xowner")
        .tombstone(&Topic::from_path(&p("/lost")))
        .await
        .unwrap();
    ns.dirs().node_cache().clear();

    let listing = ns.list(&PodPath::root()).await.unwrap();
    assert_eq!(listing.names(), vec!["keep"]);
    assert!(ns.list(&p("/lost")).await.unwrap_err().is_deleted());

    let summary = ns.sync().await.unwrap();
    assert_eq!(summary, SyncSummary { dirs: 2, files: 0 });
}

#[tokio::test]
async fn test_open_bootstraps_empty_namespace() {
    init_logging();
    let (blocks, feeds) = memory_stores();
    let ns = Namespace::open("pod", "0xowner", blocks.clone(), feeds.clone(), test_config())
        .await
        .unwrap();
    assert!(ns.dirs().is_dir_present(&PodPath::root()).await.unwrap());
    ns.mkdir(&p("/first"), 0).await.unwrap();

    // creating it a second time clashes with the existing root
    assert!(Namespace::create("pod", "0xowner", blocks, feeds, test_config())
        .await
        .is_err());

    let summary = ns.dirs().sync_directory(&PodPath::root()).await.unwrap();
    assert_eq!(summary, SyncSummary { dirs: 2, files: 0 });
}

#[tokio::test]
async fn test_owners_are_isolated() {
    init_logging();
    let (blocks, feeds) = memory_stores();
    let alice = Namespace::create("pod", "0xalice", blocks.clone(), feeds.clone(), test_config())
        .await
        .unwrap();
    let bob = Namespace::create("pod", "0xbob", blocks, feeds, test_config())
        .await
        .unwrap();
    alice.mkdir(&p("/only-alice"), 0).await.unwrap();
    assert!(bob.list(&p("/only-alice")).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_local_store_persists_namespace() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let data = payload(5, 5000);
    {
        let store = Arc::new(LocalStore::open(dir.path().to_path_buf()).await.unwrap());
        let ns = Namespace::create("pod", "0xowner", store.clone(), store, test_config())
            .await
            .unwrap();
        ns.mkdir(&p("/docs"), 0).await.unwrap();
        ns.upload(&data[..], &p("/docs/report.txt"), 5000, 1024, Some(Compression::Snappy))
            .await
            .unwrap();
        ns.write_at(&p("/docs/report.txt"), &b"HEAD"[..], 0, false)
            .await
            .unwrap();
    }

    let store = Arc::new(LocalStore::open(dir.path().to_path_buf()).await.unwrap());
    let ns = Namespace::open("pod", "0xowner", store.clone(), store, test_config())
        .await
        .unwrap();
    assert_eq!(ns.files().meta_cache().len(), 1);

    let mut expected = data.clone();
    expected[..4].copy_from_slice(b"HEAD");
    assert_eq!(ns.read_all(&p("/docs/report.txt")).await.unwrap(), expected);
    assert_eq!(
        ns.list(&p("/docs")).await.unwrap().files,
        vec![p("/docs/report.txt")]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_siblings_keep_every_entry() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalStore::open(dir.path().to_path_buf()).await.unwrap());
    let ns = Namespace::create("pod", "0xowner", store.clone(), store.clone(), test_config())
        .await
        .unwrap();

    let data = payload(9, 40);
    let mkdirs = (0..16).map(|i| {
        let ns = &ns;
        async move { ns.mkdir(&p(&format!("/d{}", i)), 0).await }
    });
    let uploads = (0..8).map(|i| {
        let ns = &ns;
        let data = &data;
        async move {
            ns.upload(&data[..], &p(&format!("/f{}.bin", i)), 40, 16, None)
                .await
                .map(|_| ())
        }
    });
    let (made, uploaded) = tokio::join!(
        futures::future::join_all(mkdirs),
        futures::future::join_all(uploads)
    );
    assert!(made.iter().chain(uploaded.iter()).all(|r| r.is_ok()));

    let listing = ns.list(&PodPath::root()).await.unwrap();
    assert_eq!(listing.dirs.len(), 16);
    assert_eq!(listing.files.len(), 8);

    let reopened = Namespace::open("pod", "0xowner", store.clone(), store, test_config())
        .await
        .unwrap();
    let listing = reopened.list(&PodPath::root()).await.unwrap();
    assert_eq!(listing.dirs.len(), 16);
    assert_eq!(listing.files.len(), 8);
}

#[tokio::test]
async fn test_sync_directory_drops_stale_file_meta() {
    init_logging();
    let (blocks, feeds) = memory_stores();
    let first = Namespace::create("pod", "0xowner", blocks.clone(), feeds.clone(), test_config())
        .await
        .unwrap();
    first.mkdir(&p("/a"), 0).await.unwrap();
    put(&first, "/a/f.txt", &payload(2, 40)).await;
    assert_eq!(first.files().load_file_meta(&p("/a/f.txt")).await.unwrap().file_size, 40);

    let second = Namespace::open("pod", "0xowner", blocks, feeds, test_config())
        .await
        .unwrap();
    second
        .write_at(&p("/a/f.txt"), &b"tail"[..], 40, false)
        .await
        .unwrap();

    assert_eq!(first.files().load_file_meta(&p("/a/f.txt")).await.unwrap().file_size, 40);
    first.dirs().sync_directory(&p("/a")).await.unwrap();
    assert_eq!(first.files().load_file_meta(&p("/a/f.txt")).await.unwrap().file_size, 44);
    assert_eq!(first.read_all(&p("/a/f.txt")).await.unwrap().len(), 44);
}
