use crate::{BlockStoreRef, ContentRef, FeedStoreRef, PodFsError, PodFsResult, Topic};
use std::future::Future;
use std::time::Duration;

/// Reserved feed payload marking a node as permanently deleted.
pub const TOMBSTONE: &[u8] = b"__Deleted__";

pub const DEFAULT_IO_TIMEOUT_MS: u64 = 30_000;

/// Decoded state of a feed, produced once at the storage boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedState {
    Absent,
    Active(Vec<u8>),
    Deleted,
}

impl FeedState {
    pub fn from_payload(data: Vec<u8>) -> Self {
        if data.as_slice() == TOMBSTONE {
            FeedState::Deleted
        } else {
            FeedState::Active(data)
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, FeedState::Active(_))
    }

    /// Turn the state into the payload, surfacing `NotFound` / `ResourceDeleted`.
    pub fn into_data(self, what: &str) -> PodFsResult<Vec<u8>> {
        match self {
            FeedState::Active(data) => Ok(data),
            FeedState::Absent => Err(PodFsError::NotFound(what.to_string())),
            FeedState::Deleted => Err(PodFsError::ResourceDeleted(what.to_string())),
        }
    }
}

async fn with_timeout<T, F>(timeout: Duration, op: &str, fut: F) -> PodFsResult<T>
where
    F: Future<Output = PodFsResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} timed out after {:?}", op, timeout);
            Err(PodFsError::Timeout(format!("{} exceeded {:?}", op, timeout)))
        }
    }
}

/// Feed access bound to one owner. Every call is limited by the I/O timeout
/// and every read is decoded into a [`FeedState`].
#[derive(Clone)]
pub struct FeedClient {
    store: FeedStoreRef,
    owner: String,
    timeout: Duration,
}

impl FeedClient {
    pub fn new(store: FeedStoreRef, owner: impl Into<String>) -> Self {
        Self {
            store,
            owner: owner.into(),
            timeout: Duration::from_millis(DEFAULT_IO_TIMEOUT_MS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub async fn read(&self, topic: &Topic) -> PodFsResult<FeedState> {
        let result = with_timeout(
            self.timeout,
            "read feed",
            self.store.read_feed(topic, &self.owner),
        )
        .await;
        match result {
            Ok(data) => Ok(FeedState::from_payload(data)),
            Err(PodFsError::NotFound(_)) => Ok(FeedState::Absent),
            Err(e) => Err(e),
        }
    }

    pub async fn create(&self, topic: &Topic, data: &[u8]) -> PodFsResult<()> {
        with_timeout(
            self.timeout,
            "create feed",
            self.store.create_feed(topic, &self.owner, data),
        )
        .await
    }

    pub async fn update(&self, topic: &Topic, data: &[u8]) -> PodFsResult<()> {
        with_timeout(
            self.timeout,
            "update feed",
            self.store.update_feed(topic, &self.owner, data),
        )
        .await
    }

    /// Write a brand new record: creates the feed, or revives it when the
    /// previous holder of this topic was tombstoned. Fails with
    /// `AlreadyExists` when an active record is present.
    pub async fn put_new(&self, topic: &Topic, data: &[u8]) -> PodFsResult<()> {
        match self.read(topic).await? {
            FeedState::Absent => self.create(topic, data).await,
            FeedState::Deleted => self.update(topic, data).await,
            FeedState::Active(_) => Err(PodFsError::AlreadyExists(format!(
                "feed {} already active",
                topic
            ))),
        }
    }

    pub async fn tombstone(&self, topic: &Topic) -> PodFsResult<()> {
        self.update(topic, TOMBSTONE).await
    }

    pub async fn remove(&self, topic: &Topic) -> PodFsResult<()> {
        with_timeout(
            self.timeout,
            "delete feed",
            self.store.delete_feed(topic, &self.owner),
        )
        .await
    }

    /// Tombstone and then drop the feed, so later reads see `Absent`.
    /// The tombstone write is mandatory, the removal is best-effort.
    pub async fn tombstone_and_remove(&self, topic: &Topic) -> PodFsResult<()> {
        self.tombstone(topic).await?;
        if let Err(e) = self.remove(topic).await {
            warn!("remove feed {} after tombstone failed: {}", topic, e);
        }
        Ok(())
    }
}

/// Block store access with the same timeout discipline as [`FeedClient`].
#[derive(Clone)]
pub struct BlockClient {
    store: BlockStoreRef,
    timeout: Duration,
}

impl BlockClient {
    pub fn new(store: BlockStoreRef) -> Self {
        Self {
            store,
            timeout: Duration::from_millis(DEFAULT_IO_TIMEOUT_MS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn upload(&self, data: &[u8]) -> PodFsResult<ContentRef> {
        with_timeout(self.timeout, "upload blob", self.store.upload_blob(data)).await
    }

    pub async fn download(&self, reference: &ContentRef) -> PodFsResult<Vec<u8>> {
        with_timeout(
            self.timeout,
            "download blob",
            self.store.download_blob(reference),
        )
        .await
    }

    pub async fn delete(&self, reference: &ContentRef) -> PodFsResult<()> {
        with_timeout(self.timeout, "delete blob", self.store.delete_blob(reference)).await
    }
}
