use crate::{ContentRef, PodFsResult, Topic};
use async_trait::async_trait;
use std::sync::Arc;

/// Immutable content-addressed blob storage.
#[async_trait]
pub trait BlockStore: Send + Sync {
    async fn upload_blob(&self, data: &[u8]) -> PodFsResult<ContentRef>;

    /// Fails with `NotFound` when the reference is unknown.
    async fn download_blob(&self, reference: &ContentRef) -> PodFsResult<Vec<u8>>;

    async fn delete_blob(&self, reference: &ContentRef) -> PodFsResult<()>;
}

/// Owner-keyed mutable pointers addressed by topic.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Fails with `AlreadyExists` when the feed was created before.
    async fn create_feed(&self, topic: &Topic, owner: &str, data: &[u8]) -> PodFsResult<()>;

    /// Fails with `NotFound` when the feed was never created.
    async fn update_feed(&self, topic: &Topic, owner: &str, data: &[u8]) -> PodFsResult<()>;

    /// Fails with `NotFound` when the feed was never created.
    async fn read_feed(&self, topic: &Topic, owner: &str) -> PodFsResult<Vec<u8>>;

    async fn delete_feed(&self, topic: &Topic, owner: &str) -> PodFsResult<()>;
}

pub type BlockStoreRef = Arc<dyn BlockStore>;
pub type FeedStoreRef = Arc<dyn FeedStore>;
