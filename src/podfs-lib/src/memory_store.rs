use crate::{BlockStore, ContentRef, FeedStore, PodFsError, PodFsResult, Topic};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

fn lock_err<T>(e: std::sync::PoisonError<T>) -> PodFsError {
    PodFsError::Internal(format!("memory store lock poisoned: {}", e))
}

/// In-memory block store for tests and ephemeral namespaces.
///
/// Supports fault injection: `fail_uploads_after(n)` lets the first `n`
/// uploads succeed and fails every later one.
#[derive(Default)]
pub struct MemoryBlockStore {
    blobs: Mutex<HashMap<ContentRef, Vec<u8>>>,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    fail_uploads_after: Mutex<Option<usize>>,
    fail_deletes: AtomicBool,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_uploads_after(&self, successful_uploads: Option<usize>) {
        if let Ok(mut guard) = self.fail_uploads_after.lock() {
            *guard = successful_uploads.map(|n| self.uploads.load(Ordering::SeqCst) + n);
        }
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn contains(&self, reference: &ContentRef) -> bool {
        self.blobs
            .lock()
            .map(|b| b.contains_key(reference))
            .unwrap_or(false)
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn upload_blob(&self, data: &[u8]) -> PodFsResult<ContentRef> {
        let seq = self.uploads.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = *self.fail_uploads_after.lock().map_err(lock_err)? {
            if seq >= limit {
                return Err(PodFsError::StorageFailure(format!(
                    "injected upload failure #{}",
                    seq
                )));
            }
        }
        let reference = ContentRef::from_content(data);
        self.blobs
            .lock()
            .map_err(lock_err)?
            .insert(reference, data.to_vec());
        Ok(reference)
    }

    async fn download_blob(&self, reference: &ContentRef) -> PodFsResult<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.blobs
            .lock()
            .map_err(lock_err)?
            .get(reference)
            .cloned()
            .ok_or_else(|| PodFsError::NotFound(format!("blob {}", reference)))
    }

    async fn delete_blob(&self, reference: &ContentRef) -> PodFsResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(PodFsError::StorageFailure(format!(
                "injected delete failure for {}",
                reference
            )));
        }
        self.blobs.lock().map_err(lock_err)?.remove(reference);
        Ok(())
    }
}

/// In-memory feed store keyed by (owner, topic).
#[derive(Default)]
pub struct MemoryFeedStore {
    feeds: Mutex<HashMap<(String, Topic), Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryFeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn feed_count(&self) -> usize {
        self.feeds.lock().map(|f| f.len()).unwrap_or(0)
    }

    fn check_writable(&self) -> PodFsResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PodFsError::StorageFailure(
                "injected feed write failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl FeedStore for MemoryFeedStore {
    async fn create_feed(&self, topic: &Topic, owner: &str, data: &[u8]) -> PodFsResult<()> {
        self.check_writable()?;
        let mut feeds = self.feeds.lock().map_err(lock_err)?;
        let key = (owner.to_string(), *topic);
        if feeds.contains_key(&key) {
            return Err(PodFsError::AlreadyExists(format!("feed {}", topic)));
        }
        feeds.insert(key, data.to_vec());
        Ok(())
    }

    async fn update_feed(&self, topic: &Topic, owner: &str, data: &[u8]) -> PodFsResult<()> {
        self.check_writable()?;
        let mut feeds = self.feeds.lock().map_err(lock_err)?;
        match feeds.get_mut(&(owner.to_string(), *topic)) {
            Some(slot) => {
                *slot = data.to_vec();
                Ok(())
            }
            None => Err(PodFsError::NotFound(format!("feed {}", topic))),
        }
    }

    async fn read_feed(&self, topic: &Topic, owner: &str) -> PodFsResult<Vec<u8>> {
        self.feeds
            .lock()
            .map_err(lock_err)?
            .get(&(owner.to_string(), *topic))
            .cloned()
            .ok_or_else(|| PodFsError::NotFound(format!("feed {}", topic)))
    }

    async fn delete_feed(&self, topic: &Topic, owner: &str) -> PodFsResult<()> {
        self.check_writable()?;
        self.feeds
            .lock()
            .map_err(lock_err)?
            .remove(&(owner.to_string(), *topic));
        Ok(())
    }
}
