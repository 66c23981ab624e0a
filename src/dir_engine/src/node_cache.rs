use podfs_lib::{DirNode, PodPath};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// In-memory path -> directory node map of one session.
///
/// Every mutating directory call writes the feed first and then this map;
/// the lock is never held across an await.
#[derive(Clone, Default)]
pub struct DirNodeCache {
    nodes: Arc<RwLock<HashMap<PodPath, DirNode>>>,
}

impl DirNodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &PodPath) -> Option<DirNode> {
        self.nodes.read().ok()?.get(path).cloned()
    }

    pub fn put(&self, path: PodPath, node: DirNode) {
        if let Ok(mut nodes) = self.nodes.write() {
            nodes.insert(path, node);
        }
    }

    pub fn remove(&self, path: &PodPath) -> Option<DirNode> {
        self.nodes.write().ok()?.remove(path)
    }

    pub fn remove_subtree(&self, prefix: &PodPath) {
        if let Ok(mut nodes) = self.nodes.write() {
            nodes.retain(|path, _| path != prefix && !path.is_descendant_of(prefix));
        }
    }

    pub fn contains(&self, path: &PodPath) -> bool {
        self.nodes
            .read()
            .map(|nodes| nodes.contains_key(path))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().map(|nodes| nodes.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached paths, sorted.
    pub fn paths(&self) -> Vec<PodPath> {
        let mut paths: Vec<PodPath> = self
            .nodes
            .read()
            .map(|nodes| nodes.keys().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    pub fn clear(&self) {
        if let Ok(mut nodes) = self.nodes.write() {
            nodes.clear();
        }
    }
}
