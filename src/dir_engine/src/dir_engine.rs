use crate::DirNodeCache;
use file_engine::FileEngine;
use futures::future::{try_join_all, BoxFuture, FutureExt};
use log::{debug, info, warn};
use podfs_lib::{
    apply_permission, decode_record, encode_record, now_unix, validate_name, DirEntry, DirNode,
    FeedClient, OrderedTasks, PodFsConfig, PodFsError, PodFsResult, PodPath, Topic, WorkerPool,
    DEFAULT_DIR_MODE,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Result of [`DirEngine::list_dir`]. File entries are left as paths for the
/// caller to resolve; child directories come back as their nodes.
#[derive(Debug, Clone, Default)]
pub struct DirListing {
    pub files: Vec<PodPath>,
    pub dirs: Vec<DirNode>,
}

impl DirListing {
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .files
            .iter()
            .filter_map(|p| p.name())
            .chain(self.dirs.iter().map(|d| d.meta.name.clone()))
            .collect();
        names.sort();
        names
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirStats {
    pub path: String,
    pub mode: u32,
    pub creation_time: i64,
    pub access_time: i64,
    pub modification_time: i64,
    pub file_count: u64,
    pub dir_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub dirs: usize,
    pub files: usize,
}

impl SyncSummary {
    fn absorb(&mut self, other: SyncSummary) {
        self.dirs += other.dirs;
        self.files += other.files;
    }
}

/// Directory tree over feeds addressed by the hash of each directory's full
/// path, mirrored in a per-session [`DirNodeCache`].
///
/// Clones share one node lock, so read-modify-write of a directory node is
/// serialised across every clone of the engine.
#[derive(Clone)]
pub struct DirEngine {
    feeds: FeedClient,
    files: FileEngine,
    pool: WorkerPool,
    config: Arc<PodFsConfig>,
    cache: DirNodeCache,
    node_lock: Arc<Mutex<()>>,
}

impl DirEngine {
    pub fn new(feeds: FeedClient, files: FileEngine, pool: WorkerPool, config: PodFsConfig) -> Self {
        Self {
            feeds,
            files,
            pool,
            config: Arc::new(config),
            cache: DirNodeCache::new(),
            node_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn node_cache(&self) -> &DirNodeCache {
        &self.cache
    }

    fn split(&self, path: &PodPath) -> PodFsResult<(PodPath, String)> {
        let Some((parent, name)) = path.split_parent_name() else {
            return Err(PodFsError::InvalidParam(format!(
                "{} has no parent directory",
                path
            )));
        };
        validate_name(&name, self.config.max_name_length)?;
        Ok((parent, name))
    }

    async fn read_node(&self, path: &PodPath) -> PodFsResult<DirNode> {
        let data = self
            .feeds
            .read(&Topic::from_path(path))
            .await?
            .into_data(&format!("directory {}", path))?;
        decode_record(&data)
    }

    /// Resolve the node of `path`, falling back to its feed on a cache miss.
    pub async fn load_node(&self, path: &PodPath) -> PodFsResult<DirNode> {
        if let Some(node) = self.cache.get(path) {
            return Ok(node);
        }
        let node = self.read_node(path).await?;
        self.cache.put(path.clone(), node.clone());
        Ok(node)
    }

    async fn store_node(&self, node: &DirNode) -> PodFsResult<()> {
        let path = node.full_path();
        self.feeds
            .update(&Topic::from_path(&path), &encode_record(node)?)
            .await?;
        self.cache.put(path, node.clone());
        Ok(())
    }

    /// Load `path`, apply `edit` and store the result, holding the node lock
    /// for the whole round trip. Nothing is written when `edit` fails.
    async fn update_node<F>(&self, path: &PodPath, edit: F) -> PodFsResult<DirNode>
    where
        F: FnOnce(&mut DirNode) -> PodFsResult<()> + Send,
    {
        let _guard = self.node_lock.lock().await;
        let mut node = self.load_node(path).await?;
        edit(&mut node)?;
        self.store_node(&node).await?;
        Ok(node)
    }

    async fn create_node(&self, node: &DirNode) -> PodFsResult<()> {
        let path = node.full_path();
        self.feeds
            .put_new(&Topic::from_path(&path), &encode_record(node)?)
            .await?;
        self.cache.put(path, node.clone());
        Ok(())
    }

    pub async fn is_dir_present(&self, path: &PodPath) -> PodFsResult<bool> {
        match self.load_node(path).await {
            Ok(_) => Ok(true),
            Err(PodFsError::NotFound(_))
            | Err(PodFsError::ResourceDeleted(_))
            | Err(PodFsError::DecodeError(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create the root node of an empty namespace.
    pub async fn mk_root_dir(&self) -> PodFsResult<DirNode> {
        let root = DirNode::new(None, "", DEFAULT_DIR_MODE, now_unix());
        self.create_node(&root).await?;
        info!("created root directory for {}", self.feeds.owner());
        Ok(root)
    }

    /// Create directory `path`. `mode` carries permission bits only; 0 picks
    /// the default.
    pub async fn mk_dir(&self, path: &PodPath, mode: u32) -> PodFsResult<DirNode> {
        if path.is_root() {
            return Err(PodFsError::AlreadyExists("/".to_string()));
        }
        let (parent_path, name) = self.split(path)?;
        let mode = if mode == 0 {
            DEFAULT_DIR_MODE
        } else {
            apply_permission(DEFAULT_DIR_MODE, mode)?
        };

        let parent = self.load_node(&parent_path).await?;
        if parent.find(&name).is_some() {
            return Err(PodFsError::AlreadyExists(format!("{}", path)));
        }

        let node = DirNode::new(Some(&parent_path), &name, mode, now_unix());
        self.create_node(&node).await?;
        self.add_entry_to_dir(&parent_path, &name, false).await?;
        info!("created directory {}", path);
        Ok(node)
    }

    /// Append `name` to the entries of `parent`.
    pub async fn add_entry_to_dir(
        &self,
        parent: &PodPath,
        name: &str,
        is_file: bool,
    ) -> PodFsResult<()> {
        self.update_node(parent, |node| {
            node.add_entry(DirEntry::new(name, is_file))?;
            node.meta.modification_time = now_unix();
            Ok(())
        })
        .await
        .map(|_| ())
    }

    pub async fn remove_entry_from_dir(
        &self,
        parent: &PodPath,
        name: &str,
        is_file: bool,
    ) -> PodFsResult<()> {
        self.update_node(parent, |node| {
            if !node.remove_entry(&DirEntry::new(name, is_file)) {
                return Err(PodFsError::NotFound(format!(
                    "{} in directory {}",
                    name, parent
                )));
            }
            node.meta.modification_time = now_unix();
            Ok(())
        })
        .await
        .map(|_| ())
    }

    /// List `path`. Child directories are resolved concurrently on the
    /// shared pool; children that vanished meanwhile are skipped.
    pub async fn list_dir(&self, path: &PodPath) -> PodFsResult<DirListing> {
        let node = self.load_node(path).await?;

        let mut listing = DirListing::default();
        let mut tasks = OrderedTasks::new(self.pool.clone());
        for (index, entry) in node.entries.iter().enumerate() {
            match entry {
                DirEntry::File(name) => listing.files.push(path.join(name)),
                DirEntry::Directory(name) => {
                    let engine = self.clone();
                    let child = path.join(name);
                    tasks
                        .spawn(index, async move {
                            match engine.load_node(&child).await {
                                Ok(node) => Ok(Some(node)),
                                Err(e) if e.is_not_found() || e.is_deleted() => {
                                    warn!("listed directory {} unavailable: {}", child, e);
                                    Ok(None)
                                }
                                Err(e) => Err(e),
                            }
                        })
                        .await?;
                }
            }
        }
        listing.dirs = tasks.finish().await?.into_iter().flatten().collect();
        Ok(listing)
    }

    /// Remove an empty directory.
    pub async fn rm_dir(&self, path: &PodPath) -> PodFsResult<()> {
        let (parent, name) = self.split(path)?;
        {
            // no entry may be linked in between the check and the tombstone
            let _guard = self.node_lock.lock().await;
            let node = self.load_node(path).await?;
            if !node.entries.is_empty() {
                return Err(PodFsError::NotEmpty(format!(
                    "{} has {} entries",
                    path,
                    node.entries.len()
                )));
            }

            self.feeds
                .tombstone_and_remove(&Topic::from_path(path))
                .await?;
            self.cache.remove(path);
        }
        self.remove_entry_from_dir(&parent, &name, false).await?;
        info!("removed directory {}", path);
        Ok(())
    }

    pub async fn chmod(&self, path: &PodPath, mode: u32) -> PodFsResult<DirNode> {
        self.update_node(path, |node| {
            node.meta.mode = apply_permission(node.meta.mode, mode)?;
            node.meta.access_time = now_unix();
            Ok(())
        })
        .await
    }

    pub async fn dir_stat(&self, path: &PodPath) -> PodFsResult<DirStats> {
        let node = self.load_node(path).await?;
        Ok(DirStats {
            path: path.to_string(),
            mode: node.meta.mode,
            creation_time: node.meta.creation_time,
            access_time: node.meta.access_time,
            modification_time: node.meta.modification_time,
            file_count: node.file_count(),
            dir_count: node.dir_count(),
        })
    }

    /// Move directory `old_path` with its whole subtree to `new_path`.
    ///
    /// Topics derive from full paths, so every descendant file and directory
    /// is re-homed under a new topic. Afterwards nothing under `old_path`
    /// resolves any more.
    pub async fn rename_dir(&self, old_path: &PodPath, new_path: &PodPath) -> PodFsResult<()> {
        if old_path.is_root() || new_path.is_root() {
            return Err(PodFsError::InvalidParam(
                "the root directory cannot be renamed".to_string(),
            ));
        }
        if old_path == new_path || new_path.is_descendant_of(old_path) {
            return Err(PodFsError::InvalidParam(format!(
                "cannot move {} to {}",
                old_path, new_path
            )));
        }
        let (old_parent, old_name) = self.split(old_path)?;
        let (new_parent, new_name) = self.split(new_path)?;

        self.load_node(old_path).await?;
        let destination = self.load_node(&new_parent).await?;
        if destination.find(&new_name).is_some() {
            return Err(PodFsError::AlreadyExists(format!("{}", new_path)));
        }

        self.migrate_subtree(old_path.clone(), new_path.clone())
            .await?;

        if old_parent == new_parent {
            self.update_node(&old_parent, |parent| {
                parent.remove_entry(&DirEntry::Directory(old_name));
                parent.add_entry(DirEntry::Directory(new_name))?;
                parent.meta.modification_time = now_unix();
                Ok(())
            })
            .await?;
        } else {
            self.remove_entry_from_dir(&old_parent, &old_name, false)
                .await?;
            self.add_entry_to_dir(&new_parent, &new_name, false).await?;
        }
        info!("renamed directory {} -> {}", old_path, new_path);
        Ok(())
    }

    /// Re-home `old_path` and everything below it. Files of one directory
    /// move concurrently; child directories are migrated before their parent.
    fn migrate_subtree(&self, old_path: PodPath, new_path: PodPath) -> BoxFuture<'_, PodFsResult<()>> {
        async move {
            let node = self.load_node(&old_path).await?;

            let mut tasks = OrderedTasks::new(self.pool.clone());
            let mut child_dirs = Vec::new();
            for (index, entry) in node.entries.iter().enumerate() {
                match entry {
                    DirEntry::File(name) => {
                        let files = self.files.clone();
                        let from = old_path.join(name);
                        let to = new_path.join(name);
                        tasks
                            .spawn(index, async move {
                                files.rename_file(&from, &to).await.map(|_| ())
                            })
                            .await?;
                    }
                    DirEntry::Directory(name) => child_dirs.push(name.clone()),
                }
            }
            tasks.finish().await?;

            for name in child_dirs {
                self.migrate_subtree(old_path.join(&name), new_path.join(&name))
                    .await?;
            }

            let (new_parent, new_name) = self.split(&new_path)?;
            let mut moved = node;
            moved.meta.path = new_parent.to_string();
            moved.meta.name = new_name;
            self.create_node(&moved).await?;
            self.feeds
                .tombstone_and_remove(&Topic::from_path(&old_path))
                .await?;
            self.cache.remove(&old_path);
            debug!("migrated directory {} -> {}", old_path, new_path);
            Ok(())
        }
        .boxed()
    }

    /// Reload `path` and its subtree from the feeds, warming the file
    /// metadata cache on the way. A namespace without a root is empty.
    pub async fn sync_directory(&self, path: &PodPath) -> PodFsResult<SyncSummary> {
        self.cache.remove_subtree(path);
        self.files.meta_cache().remove_subtree(path);
        match self.sync_node(path.clone()).await {
            Err(PodFsError::NotFound(_)) if path.is_root() => {
                info!("no root directory for {}, namespace is empty", self.feeds.owner());
                Ok(SyncSummary::default())
            }
            result => result,
        }
    }

    fn sync_node(&self, path: PodPath) -> BoxFuture<'_, PodFsResult<SyncSummary>> {
        async move {
            let node = self.pool.run(self.read_node(&path)).await??;
            self.cache.put(path.clone(), node.clone());

            let mut file_paths = Vec::new();
            let mut children = Vec::new();
            for entry in node.entries.iter() {
                match entry {
                    DirEntry::File(name) => file_paths.push(path.join(name)),
                    DirEntry::Directory(name) => children.push(self.sync_child(path.join(name))),
                }
            }

            let mut summary = SyncSummary {
                dirs: 1,
                files: self.files.list_files(&file_paths).await?.len(),
            };
            for child in try_join_all(children).await? {
                summary.absorb(child);
            }
            Ok(summary)
        }
        .boxed()
    }

    fn sync_child(&self, path: PodPath) -> BoxFuture<'_, PodFsResult<SyncSummary>> {
        async move {
            match self.sync_node(path.clone()).await {
                Err(e) if e.is_not_found() || e.is_deleted() => {
                    warn!("skip directory {} during sync: {}", path, e);
                    Ok(SyncSummary::default())
                }
                result => result,
            }
        }
        .boxed()
    }
}
