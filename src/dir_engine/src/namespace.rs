use crate::{DirEngine, DirListing, DirStats, SyncSummary};
use file_engine::{BlockReader, FileEngine, FileStats};
use log::{info, warn};
use podfs_lib::{
    BlockClient, BlockStoreRef, Compression, DirEntry, FeedClient, FeedStoreRef, FileMetadata,
    PodFsConfig, PodFsError, PodFsResult, PodPath, WorkerPool,
};
use serde::Serialize;
use tokio::io::AsyncRead;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStat {
    File(FileStats),
    Dir(DirStats),
}

/// One file tree of one owner: a [`FileEngine`] and a [`DirEngine`] wired to
/// the same stores, worker pool and configuration. Keeps directory entries
/// in step with the file operations.
pub struct Namespace {
    name: String,
    files: FileEngine,
    dirs: DirEngine,
}

impl Namespace {
    fn assemble(
        name: &str,
        owner: &str,
        blocks: BlockStoreRef,
        feeds: FeedStoreRef,
        config: PodFsConfig,
    ) -> Self {
        let pool = WorkerPool::new(config.worker_count());
        let timeout = config.io_timeout();
        let feeds = FeedClient::new(feeds, owner).with_timeout(timeout);
        let blocks = BlockClient::new(blocks).with_timeout(timeout);
        let files = FileEngine::new(name, feeds.clone(), blocks, pool.clone(), config.clone());
        let dirs = DirEngine::new(feeds, files.clone(), pool, config);
        Self {
            name: name.to_string(),
            files,
            dirs,
        }
    }

    /// Start a new, empty namespace. Fails if its root already exists.
    pub async fn create(
        name: &str,
        owner: &str,
        blocks: BlockStoreRef,
        feeds: FeedStoreRef,
        config: PodFsConfig,
    ) -> PodFsResult<Self> {
        let ns = Self::assemble(name, owner, blocks, feeds, config);
        ns.dirs.mk_root_dir().await?;
        info!("namespace {} created for {}", name, owner);
        Ok(ns)
    }

    /// Open a namespace and load its tree. A namespace that was never
    /// written to gets its root bootstrapped.
    pub async fn open(
        name: &str,
        owner: &str,
        blocks: BlockStoreRef,
        feeds: FeedStoreRef,
        config: PodFsConfig,
    ) -> PodFsResult<Self> {
        let ns = Self::assemble(name, owner, blocks, feeds, config);
        let summary = ns.sync().await?;
        if summary.dirs == 0 {
            ns.dirs.mk_root_dir().await?;
        }
        info!(
            "namespace {} opened: {} directories, {} files",
            name, summary.dirs, summary.files
        );
        Ok(ns)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn files(&self) -> &FileEngine {
        &self.files
    }

    pub fn dirs(&self) -> &DirEngine {
        &self.dirs
    }

    pub async fn sync(&self) -> PodFsResult<SyncSummary> {
        self.files.meta_cache().clear();
        self.dirs.sync_directory(&PodPath::root()).await
    }

    fn split(path: &PodPath) -> PodFsResult<(PodPath, String)> {
        path.split_parent_name().ok_or_else(|| {
            PodFsError::InvalidParam(format!("{} does not name a file or directory", path))
        })
    }

    /// Kind of the node at `path`, as recorded in its parent.
    pub async fn entry(&self, path: &PodPath) -> PodFsResult<DirEntry> {
        if path.is_root() {
            return Ok(DirEntry::Directory(String::new()));
        }
        let (parent, name) = Self::split(path)?;
        let node = self.dirs.load_node(&parent).await?;
        node.find(&name)
            .cloned()
            .ok_or_else(|| PodFsError::NotFound(format!("{}", path)))
    }

    pub async fn upload<R>(
        &self,
        reader: R,
        path: &PodPath,
        size: u64,
        block_size: u64,
        compression: Option<Compression>,
    ) -> PodFsResult<FileMetadata>
    where
        R: AsyncRead + Unpin + Send,
    {
        let (parent, name) = Self::split(path)?;
        let node = self.dirs.load_node(&parent).await?;
        if node.find(&name).is_some() {
            return Err(PodFsError::AlreadyExists(format!("{}", path)));
        }

        let meta = self
            .files
            .upload(reader, &name, size, block_size, &parent, compression)
            .await?;
        if let Err(e) = self.dirs.add_entry_to_dir(&parent, &name, true).await {
            warn!("link {} into {} failed, drop the upload: {}", name, parent, e);
            if let Err(rm_err) = self.files.rm_file(path).await {
                warn!("drop unlinked upload {} failed: {}", path, rm_err);
            }
            return Err(e);
        }
        Ok(meta)
    }

    pub async fn download(&self, path: &PodPath) -> PodFsResult<(BlockReader, u64)> {
        self.files.download(path).await
    }

    pub async fn read_all(&self, path: &PodPath) -> PodFsResult<Vec<u8>> {
        self.files.read_all(path).await
    }

    pub async fn write_at<R>(
        &self,
        path: &PodPath,
        patch: R,
        offset: u64,
        truncate: bool,
    ) -> PodFsResult<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.files.write_at(path, patch, offset, truncate).await
    }

    /// Delete the file and drop it from its directory.
    pub async fn rm_file(&self, path: &PodPath) -> PodFsResult<()> {
        let (parent, name) = Self::split(path)?;
        self.files.rm_file(path).await?;
        self.dirs.remove_entry_from_dir(&parent, &name, true).await
    }

    pub async fn rename_file(&self, old_path: &PodPath, new_path: &PodPath) -> PodFsResult<()> {
        let (old_parent, old_name) = Self::split(old_path)?;
        let (new_parent, new_name) = Self::split(new_path)?;
        let destination = self.dirs.load_node(&new_parent).await?;
        if destination.find(&new_name).is_some() {
            return Err(PodFsError::AlreadyExists(format!("{}", new_path)));
        }

        self.files.rename_file(old_path, new_path).await?;
        self.dirs
            .remove_entry_from_dir(&old_parent, &old_name, true)
            .await?;
        self.dirs.add_entry_to_dir(&new_parent, &new_name, true).await
    }

    pub async fn mkdir(&self, path: &PodPath, mode: u32) -> PodFsResult<()> {
        self.dirs.mk_dir(path, mode).await.map(|_| ())
    }

    pub async fn rmdir(&self, path: &PodPath) -> PodFsResult<()> {
        self.dirs.rm_dir(path).await
    }

    pub async fn list(&self, path: &PodPath) -> PodFsResult<DirListing> {
        self.dirs.list_dir(path).await
    }

    pub async fn rename_dir(&self, old_path: &PodPath, new_path: &PodPath) -> PodFsResult<()> {
        self.dirs.rename_dir(old_path, new_path).await
    }

    /// Move a file or a directory, whichever `old_path` is.
    pub async fn rename(&self, old_path: &PodPath, new_path: &PodPath) -> PodFsResult<()> {
        match self.entry(old_path).await? {
            DirEntry::File(_) => self.rename_file(old_path, new_path).await,
            DirEntry::Directory(_) => self.rename_dir(old_path, new_path).await,
        }
    }

    pub async fn chmod(&self, path: &PodPath, mode: u32) -> PodFsResult<()> {
        match self.entry(path).await? {
            DirEntry::File(_) => self.files.chmod(path, mode).await.map(|_| ()),
            DirEntry::Directory(_) => self.dirs.chmod(path, mode).await.map(|_| ()),
        }
    }

    pub async fn stat(&self, path: &PodPath) -> PodFsResult<NodeStat> {
        match self.entry(path).await? {
            DirEntry::File(_) => Ok(NodeStat::File(self.files.stat(path).await?)),
            DirEntry::Directory(_) => Ok(NodeStat::Dir(self.dirs.dir_stat(path).await?)),
        }
    }
}
