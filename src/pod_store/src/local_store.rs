use async_trait::async_trait;
use log::{debug, warn};
use podfs_lib::{BlockStore, ContentRef, FeedStore, PodFsError, PodFsResult, Topic};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

const CONFIG_FILE_NAME: &str = "pod_store.json";
const BLOCK_DIR_NAME: &str = "blocks";
const FEED_DIR_NAME: &str = "feeds";
const BLOCK_FINAL_EXT: &str = "final";
const TMP_EXT: &str = "tmp";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LocalStoreConfig {
    pub read_only: bool,
    pub block_dir: Option<PathBuf>,
    pub feed_dir: Option<PathBuf>,
}

/// Directory backed block + feed store.
///
/// Blocks live at `blocks/<prefix>/<ref>.final`, feeds at
/// `feeds/<owner-hex>/<topic>`. Every write goes to a tmp file first and is
/// renamed into place, so readers never observe a half written payload.
#[derive(Clone)]
pub struct LocalStore {
    base_dir: PathBuf,
    read_only: bool,
    block_dir: PathBuf,
    feed_dir: PathBuf,
    feed_lock: Arc<tokio::sync::Mutex<()>>,
    tmp_seq: Arc<AtomicU64>,
}

impl LocalStore {
    /// Open (and initialise on first use) the store rooted at `root_path`.
    pub async fn open(root_path: PathBuf) -> PodFsResult<Self> {
        if !root_path.exists() {
            debug!("LocalStore: create base dir:{}", root_path.display());
            fs::create_dir_all(&root_path)
                .await
                .map_err(|e| PodFsError::IoError(format!("create base dir failed: {}", e)))?;
        }

        let config_file = root_path.join(CONFIG_FILE_NAME);
        let config = if !config_file.exists() {
            let config = LocalStoreConfig::default();
            let config_str = serde_json::to_string_pretty(&config)
                .map_err(|e| PodFsError::Internal(e.to_string()))?;
            let mut file = File::create(&config_file)
                .await
                .map_err(|e| PodFsError::IoError(format!("create config failed: {}", e)))?;
            file.write_all(config_str.as_bytes())
                .await
                .map_err(|e| PodFsError::IoError(format!("write config failed: {}", e)))?;
            config
        } else {
            let config_str = fs::read_to_string(&config_file).await.map_err(|e| {
                warn!("LocalStore: read store config failed! {}", e);
                PodFsError::NotFound("pod store config not found".to_string())
            })?;
            serde_json::from_str::<LocalStoreConfig>(&config_str).map_err(|e| {
                warn!("LocalStore: parse store config failed! {}", e);
                PodFsError::DecodeError("pod store config invalid".to_string())
            })?
        };

        Self::from_config(root_path, config).await
    }

    pub async fn from_config(root_path: PathBuf, config: LocalStoreConfig) -> PodFsResult<Self> {
        let block_dir = config
            .block_dir
            .clone()
            .unwrap_or_else(|| root_path.join(BLOCK_DIR_NAME));
        let feed_dir = config
            .feed_dir
            .clone()
            .unwrap_or_else(|| root_path.join(FEED_DIR_NAME));

        if !config.read_only {
            for dir in [&block_dir, &feed_dir] {
                fs::create_dir_all(dir)
                    .await
                    .map_err(|e| PodFsError::IoError(format!("create store dir failed: {}", e)))?;
            }
        }

        Ok(Self {
            base_dir: root_path,
            read_only: config.read_only,
            block_dir,
            feed_dir,
            feed_lock: Arc::new(tokio::sync::Mutex::new(())),
            tmp_seq: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn ensure_writable(&self) -> PodFsResult<()> {
        if self.read_only {
            return Err(PodFsError::StorageFailure(format!(
                "store {} is read only",
                self.base_dir.display()
            )));
        }
        Ok(())
    }

    fn block_path(&self, reference: &ContentRef) -> PathBuf {
        let name = reference.to_hex();
        self.block_dir
            .join(&name[0..2])
            .join(format!("{}.{}", name, BLOCK_FINAL_EXT))
    }

    fn feed_path(&self, topic: &Topic, owner: &str) -> PathBuf {
        self.feed_dir
            .join(hex::encode(owner.as_bytes()))
            .join(topic.to_hex())
    }

    async fn write_atomic(&self, final_path: &Path, data: &[u8]) -> PodFsResult<()> {
        let parent = final_path
            .parent()
            .ok_or_else(|| PodFsError::Internal(format!("no parent for {}", final_path.display())))?;
        fs::create_dir_all(parent).await?;

        let seq = self.tmp_seq.fetch_add(1, Ordering::SeqCst);
        let tmp_path = final_path.with_extension(format!("{}.{}", seq, TMP_EXT));
        let mut file = File::create(&tmp_path).await.map_err(|e| {
            warn!("write_atomic: create {} failed! {}", tmp_path.display(), e);
            PodFsError::IoError(e.to_string())
        })?;
        file.write_all(data).await?;
        file.flush().await?;
        drop(file);

        fs::rename(&tmp_path, final_path).await.map_err(|e| {
            warn!("write_atomic: rename failed! {}", e);
            PodFsError::IoError(e.to_string())
        })
    }

    async fn read_file(path: &Path, what: String) -> PodFsResult<Vec<u8>> {
        match fs::read(path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PodFsError::NotFound(what)),
            Err(e) => Err(PodFsError::IoError(e.to_string())),
        }
    }

    async fn remove_file(path: &Path) -> PodFsResult<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PodFsError::IoError(e.to_string())),
        }
    }
}

#[async_trait]
impl BlockStore for LocalStore {
    async fn upload_blob(&self, data: &[u8]) -> PodFsResult<ContentRef> {
        self.ensure_writable()?;
        let reference = ContentRef::from_content(data);
        let path = self.block_path(&reference);
        if !path.exists() {
            self.write_atomic(&path, data).await?;
        }
        Ok(reference)
    }

    async fn download_blob(&self, reference: &ContentRef) -> PodFsResult<Vec<u8>> {
        let data = Self::read_file(&self.block_path(reference), format!("blob {}", reference)).await?;
        if ContentRef::from_content(&data) != *reference {
            warn!("blob {} failed verification", reference);
            return Err(PodFsError::StorageFailure(format!(
                "blob {} content does not match its reference",
                reference
            )));
        }
        Ok(data)
    }

    async fn delete_blob(&self, reference: &ContentRef) -> PodFsResult<()> {
        self.ensure_writable()?;
        Self::remove_file(&self.block_path(reference)).await
    }
}

#[async_trait]
impl FeedStore for LocalStore {
    async fn create_feed(&self, topic: &Topic, owner: &str, data: &[u8]) -> PodFsResult<()> {
        self.ensure_writable()?;
        let _guard = self.feed_lock.lock().await;
        let path = self.feed_path(topic, owner);
        if path.exists() {
            return Err(PodFsError::AlreadyExists(format!("feed {}", topic)));
        }
        self.write_atomic(&path, data).await
    }

    async fn update_feed(&self, topic: &Topic, owner: &str, data: &[u8]) -> PodFsResult<()> {
        self.ensure_writable()?;
        let _guard = self.feed_lock.lock().await;
        let path = self.feed_path(topic, owner);
        if !path.exists() {
            return Err(PodFsError::NotFound(format!("feed {}", topic)));
        }
        self.write_atomic(&path, data).await
    }

    async fn read_feed(&self, topic: &Topic, owner: &str) -> PodFsResult<Vec<u8>> {
        Self::read_file(&self.feed_path(topic, owner), format!("feed {}", topic)).await
    }

    async fn delete_feed(&self, topic: &Topic, owner: &str) -> PodFsResult<()> {
        self.ensure_writable()?;
        let _guard = self.feed_lock.lock().await;
        Self::remove_file(&self.feed_path(topic, owner)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podfs_lib::{FeedClient, FeedState, PodPath};
    use tempfile::TempDir;

    async fn create_store() -> (TempDir, LocalStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(temp_dir.path().join("pod_store"))
            .await
            .unwrap();
        (temp_dir, store)
    }

    #[tokio::test]
    async fn test_blob_put_get_delete() {
        let (_tmp, store) = create_store().await;
        let reference = store.upload_blob(b"block-data").await.unwrap();
        assert_eq!(reference, ContentRef::from_content(b"block-data"));
        // same content, same reference, no rewrite
        assert_eq!(store.upload_blob(b"block-data").await.unwrap(), reference);
        assert_eq!(
            store.download_blob(&reference).await.unwrap(),
            b"block-data".to_vec()
        );
        store.delete_blob(&reference).await.unwrap();
        assert!(store
            .download_blob(&reference)
            .await
            .unwrap_err()
            .is_not_found());
        // deleting twice is fine
        store.delete_blob(&reference).await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupted_blob_is_rejected() {
        let (_tmp, store) = create_store().await;
        let reference = store.upload_blob(b"original").await.unwrap();
        std::fs::write(store.block_path(&reference), b"tampered").unwrap();
        let err = store.download_blob(&reference).await.unwrap_err();
        assert!(matches!(err, PodFsError::StorageFailure(_)));
    }

    #[tokio::test]
    async fn test_feed_semantics() {
        let (_tmp, store) = create_store().await;
        let topic = Topic::from_path(&PodPath::new("/docs"));
        assert!(store.read_feed(&topic, "0xa").await.unwrap_err().is_not_found());
        assert!(store
            .update_feed(&topic, "0xa", b"x")
            .await
            .unwrap_err()
            .is_not_found());

        store.create_feed(&topic, "0xa", b"v1").await.unwrap();
        assert!(matches!(
            store.create_feed(&topic, "0xa", b"v1").await.unwrap_err(),
            PodFsError::AlreadyExists(_)
        ));
        store.update_feed(&topic, "0xa", b"v2").await.unwrap();
        assert_eq!(store.read_feed(&topic, "0xa").await.unwrap(), b"v2".to_vec());
        assert!(store.read_feed(&topic, "0xb").await.unwrap_err().is_not_found());

        store.delete_feed(&topic, "0xa").await.unwrap();
        assert!(store.read_feed(&topic, "0xa").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("pod_store");
        let topic = Topic::from_path(&PodPath::new("/keep"));
        {
            let store = LocalStore::open(root.clone()).await.unwrap();
            let feeds = FeedClient::new(Arc::new(store), "owner");
            feeds.put_new(&topic, b"persisted").await.unwrap();
            feeds.tombstone(&topic).await.unwrap();
        }
        let store = LocalStore::open(root).await.unwrap();
        let feeds = FeedClient::new(Arc::new(store), "owner");
        assert_eq!(feeds.read(&topic).await.unwrap(), FeedState::Deleted);
    }

    #[tokio::test]
    async fn test_read_only_store_refuses_writes() {
        let temp_dir = TempDir::new().unwrap();
        let config = LocalStoreConfig {
            read_only: true,
            ..Default::default()
        };
        let store = LocalStore::from_config(temp_dir.path().to_path_buf(), config)
            .await
            .unwrap();
        assert!(matches!(
            store.upload_blob(b"x").await.unwrap_err(),
            PodFsError::StorageFailure(_)
        ));
    }
}
