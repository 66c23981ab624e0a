use podfs_lib::{FileMetadata, PathCache, PodPath};
use std::sync::{Arc, RwLock};

/// Shared cache of file metadata by full path.
///
/// Never held across an await; a poisoned lock degrades to a cache miss.
#[derive(Clone)]
pub struct FileMetaCache {
    inner: Arc<RwLock<PathCache<FileMetadata>>>,
}

impl FileMetaCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(PathCache::new(max_entries))),
        }
    }

    pub fn get(&self, path: &PodPath) -> Option<FileMetadata> {
        self.inner.write().ok()?.get(path)
    }

    pub fn put(&self, meta: &FileMetadata) {
        if let Ok(mut cache) = self.inner.write() {
            cache.put(meta.full_path(), meta.clone());
        }
    }

    pub fn remove(&self, path: &PodPath) {
        if let Ok(mut cache) = self.inner.write() {
            cache.remove(path);
        }
    }

    pub fn remove_subtree(&self, prefix: &PodPath) {
        if let Ok(mut cache) = self.inner.write() {
            cache.remove_subtree(prefix);
        }
    }

    pub fn contains(&self, path: &PodPath) -> bool {
        self.inner
            .read()
            .map(|cache| cache.contains(path))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|cache| cache.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.inner.write() {
            cache.clear();
        }
    }
}
