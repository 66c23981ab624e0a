use crate::block_writer::BlockWriter;
use crate::{BlockReader, BlockReaderOptions, FileMetaCache};
use log::{debug, info, warn};
use podfs_lib::{
    apply_permission, decode_record, detect_content_type, encode_record, now_unix,
    validate_name, BlockClient, BlockInfo, BlockList, Compression, ContentRef, FeedClient,
    FileMetadata, OrderedTasks, PodFsConfig, PodFsError, PodFsResult, PodPath, Topic,
    WorkerPool, DEFAULT_CACHE_ENTRIES, DEFAULT_FILE_MODE, MAX_BLOCK_SIZE, META_VERSION,
    SNIFF_LEN,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

const COPY_BUF_LEN: usize = 64 * 1024;

/// File metadata together with its resolved block list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileStats {
    pub meta: FileMetadata,
    pub blocks: Vec<BlockInfo>,
}

impl FileStats {
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

/// Chunked file storage over a block store, with per-file metadata kept in
/// feeds addressed by the hash of the full path.
///
/// Cloning is cheap; clones share the metadata cache and the worker pool.
#[derive(Clone)]
pub struct FileEngine {
    pod_name: String,
    feeds: FeedClient,
    blocks: BlockClient,
    pool: WorkerPool,
    config: Arc<PodFsConfig>,
    cache: FileMetaCache,
}

impl FileEngine {
    pub fn new(
        pod_name: impl Into<String>,
        feeds: FeedClient,
        blocks: BlockClient,
        pool: WorkerPool,
        config: PodFsConfig,
    ) -> Self {
        Self {
            pod_name: pod_name.into(),
            feeds,
            blocks,
            pool,
            config: Arc::new(config),
            cache: FileMetaCache::new(DEFAULT_CACHE_ENTRIES),
        }
    }

    pub fn pod_name(&self) -> &str {
        &self.pod_name
    }

    pub fn owner(&self) -> &str {
        self.feeds.owner()
    }

    pub fn config(&self) -> &PodFsConfig {
        &self.config
    }

    pub fn meta_cache(&self) -> &FileMetaCache {
        &self.cache
    }

    fn resolve_block_size(&self, block_size: u64) -> PodFsResult<u64> {
        let block_size = if block_size == 0 {
            self.config.block_size
        } else {
            block_size
        };
        if block_size > MAX_BLOCK_SIZE {
            return Err(PodFsError::InvalidParam(format!(
                "block size {} exceeds {}",
                block_size, MAX_BLOCK_SIZE
            )));
        }
        Ok(block_size)
    }

    fn open_reader(&self, meta: &FileMetadata, list: BlockList) -> BlockReader {
        let options = BlockReaderOptions::default()
            .with_cache(self.config.block_cache)
            .with_compression(meta.compression.clone())
            .with_block_size(meta.block_size);
        BlockReader::new(self.blocks.clone(), list, options)
    }

    async fn store_block_list(&self, list: &BlockList) -> PodFsResult<ContentRef> {
        self.blocks.upload(&encode_record(list)?).await
    }

    async fn load_block_list(&self, meta: &FileMetadata) -> PodFsResult<BlockList> {
        let Some(reference) = &meta.block_list_ref else {
            return Ok(BlockList::default());
        };
        let data = self.blocks.download(reference).await?;
        let list: BlockList = decode_record(&data)?;
        list.check_layout(meta.file_size, meta.block_size)?;
        Ok(list)
    }

    async fn persist_meta(&self, meta: &FileMetadata) -> PodFsResult<()> {
        let topic = Topic::from_path(&meta.full_path());
        self.feeds.update(&topic, &encode_record(meta)?).await?;
        self.cache.put(meta);
        Ok(())
    }

    /// Resolve the metadata of `path`, through the cache when possible.
    pub async fn load_file_meta(&self, path: &PodPath) -> PodFsResult<FileMetadata> {
        if let Some(meta) = self.cache.get(path) {
            return Ok(meta);
        }
        let topic = Topic::from_path(path);
        let data = self
            .feeds
            .read(&topic)
            .await?
            .into_data(&format!("file {}", path))?;
        let meta: FileMetadata = decode_record(&data)?;
        self.cache.put(&meta);
        Ok(meta)
    }

    pub async fn is_file_present(&self, path: &PodPath) -> PodFsResult<bool> {
        match self.load_file_meta(path).await {
            Ok(_) => Ok(true),
            Err(PodFsError::NotFound(_))
            | Err(PodFsError::ResourceDeleted(_))
            | Err(PodFsError::DecodeError(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Store the content of `reader` as a new file `name` under `parent`.
    ///
    /// Either the complete block list and metadata become visible, or
    /// nothing does; blocks stored by a failed attempt stay behind as
    /// unreferenced blobs.
    pub async fn upload<R>(
        &self,
        mut reader: R,
        name: &str,
        declared_size: u64,
        block_size: u64,
        parent: &PodPath,
        compression: Option<Compression>,
    ) -> PodFsResult<FileMetadata>
    where
        R: AsyncRead + Unpin + Send,
    {
        validate_name(name, self.config.max_name_length)?;
        let block_size = self.resolve_block_size(block_size)?;
        let compression = compression.unwrap_or_else(|| self.config.compression.clone());
        let full_path = parent.join(name);
        let topic = Topic::from_path(&full_path);
        if self.feeds.read(&topic).await?.is_active() {
            return Err(PodFsError::AlreadyExists(format!("file {}", full_path)));
        }

        let mut writer = BlockWriter::new(
            self.pool.clone(),
            self.blocks.clone(),
            compression.clone(),
            block_size,
        );
        let mut head = Vec::with_capacity(SNIFF_LEN);
        let mut buf = vec![0u8; block_size as usize];
        let mut total = 0u64;
        loop {
            let n = read_full(&mut reader, &mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if total > declared_size {
                writer.abort();
                return Err(PodFsError::LengthMismatch(format!(
                    "{} is longer than the declared {} bytes",
                    full_path, declared_size
                )));
            }
            if head.len() < SNIFF_LEN {
                let take = (SNIFF_LEN - head.len()).min(n);
                head.extend_from_slice(&buf[..take]);
            }
            writer.write(&buf[..n]).await?;
            if n < buf.len() {
                break;
            }
        }
        if total != declared_size {
            writer.abort();
            return Err(PodFsError::LengthMismatch(format!(
                "read {} bytes for {}, declared {}",
                total, full_path, declared_size
            )));
        }

        let list = writer.finish().await?;
        let list_ref = self.store_block_list(&list).await?;
        let content_type = if head.is_empty() {
            String::new()
        } else {
            detect_content_type(name, &head)
        };

        let now = now_unix();
        let meta = FileMetadata {
            version: META_VERSION,
            owner: self.owner().to_string(),
            pod_name: self.pod_name.clone(),
            file_path: parent.to_string(),
            file_name: name.to_string(),
            file_size: total,
            block_size,
            content_type,
            compression,
            creation_time: now,
            access_time: now,
            modification_time: now,
            mode: DEFAULT_FILE_MODE,
            block_list_ref: Some(list_ref),
        };
        self.feeds.put_new(&topic, &encode_record(&meta)?).await?;
        self.cache.put(&meta);
        info!(
            "uploaded {} ({} bytes in {} blocks, {})",
            full_path,
            total,
            list.len(),
            meta.compression
        );
        Ok(meta)
    }

    /// Open a streaming reader over `path`; also returns the declared size.
    pub async fn download(&self, path: &PodPath) -> PodFsResult<(BlockReader, u64)> {
        let meta = self.load_file_meta(path).await?;
        let list = self.load_block_list(&meta).await?;
        let size = meta.file_size;
        Ok((self.open_reader(&meta, list), size))
    }

    pub async fn read_all(&self, path: &PodPath) -> PodFsResult<Vec<u8>> {
        let (mut reader, size) = self.download(path).await?;
        let mut out = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut out).await?;
        Ok(out)
    }

    /// Overwrite `path` from `offset` with everything `patch` yields.
    ///
    /// Without `truncate` the old bytes after the patched range are kept,
    /// otherwise the file ends where the patch does. Blocks before `offset`
    /// and whole blocks after the patched range are reused as they are; only
    /// the touched blocks are re-chunked and stored. Returns the number of
    /// bytes taken from `patch`.
    pub async fn write_at<R>(
        &self,
        path: &PodPath,
        mut patch: R,
        offset: u64,
        truncate: bool,
    ) -> PodFsResult<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut meta = self.load_file_meta(path).await?;
        if offset > meta.file_size {
            return Err(PodFsError::InvalidParam(format!(
                "offset {} beyond size {} of {}",
                offset, meta.file_size, path
            )));
        }

        if meta.block_size == 0 || meta.block_size > MAX_BLOCK_SIZE {
            return Err(PodFsError::DecodeError(format!(
                "{} has invalid block size {}",
                path, meta.block_size
            )));
        }

        let list = self.load_block_list(&meta).await?;
        let block_size = meta.block_size;
        let old_size = meta.file_size;
        let first_block = (offset / block_size) as usize;

        let mut writer = BlockWriter::new(
            self.pool.clone(),
            self.blocks.clone(),
            meta.compression.clone(),
            block_size,
        );
        for info in list.blocks.iter().take(first_block) {
            writer.reuse(info.clone())?;
        }

        // old bytes between the start of the first touched block and offset
        let mut old = self.open_reader(&meta, list.clone());
        let block_start = first_block as u64 * block_size;
        old.seek_to(block_start)?;
        copy_range(&mut old, offset - block_start, &mut writer).await?;

        let mut consumed = 0u64;
        let mut head = Vec::new();
        let mut buf = vec![0u8; block_size.min(COPY_BUF_LEN as u64) as usize];
        loop {
            let n = patch.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            if head.len() < SNIFF_LEN {
                let take = (SNIFF_LEN - head.len()).min(n);
                head.extend_from_slice(&buf[..take]);
            }
            writer.write(&buf[..n]).await?;
            consumed += n as u64;
        }

        let patch_end = offset + consumed;
        if !truncate && patch_end < old_size {
            // finish the block the patch ended in, then splice the rest
            let boundary = (patch_end.div_ceil(block_size) * block_size).min(old_size);
            old.seek_to(patch_end)?;
            copy_range(&mut old, boundary - patch_end, &mut writer).await?;
            debug!(
                "write_at {}: {} pending at boundary {}",
                path,
                writer.pending_len(),
                boundary
            );
            // a short last block was copied in full above
            for info in list.blocks.iter().skip(boundary.div_ceil(block_size) as usize) {
                writer.reuse(info.clone())?;
            }
        }

        let new_list = writer.finish().await?;
        let list_ref = self.store_block_list(&new_list).await?;

        let now = now_unix();
        meta.file_size = new_list.total_size();
        meta.block_list_ref = Some(list_ref);
        meta.modification_time = now;
        meta.access_time = now;
        if meta.content_type.is_empty() && !head.is_empty() {
            meta.content_type = detect_content_type(&meta.file_name, &head);
        }
        self.persist_meta(&meta).await?;
        info!(
            "write_at {} offset {} took {} bytes, size {} -> {}",
            path, offset, consumed, old_size, meta.file_size
        );
        Ok(consumed)
    }

    pub async fn chmod(&self, path: &PodPath, mode: u32) -> PodFsResult<FileMetadata> {
        let mut meta = self.load_file_meta(path).await?;
        meta.mode = apply_permission(meta.mode, mode)?;
        meta.access_time = now_unix();
        self.persist_meta(&meta).await?;
        Ok(meta)
    }

    pub async fn stat(&self, path: &PodPath) -> PodFsResult<FileStats> {
        let meta = self.load_file_meta(path).await?;
        let list = self.load_block_list(&meta).await?;
        Ok(FileStats {
            meta,
            blocks: list.blocks,
        })
    }

    /// Delete the blocks and the block list of `path`, then tombstone it.
    ///
    /// Block deletes are best-effort; the tombstone is not.
    ///
    /// Blocks are content-addressed and not reference counted. Another file
    /// holding a byte-identical block shares its blob, and loses that block
    /// here too: its reads fail with `NotFound` once the blob is gone.
    pub async fn rm_file(&self, path: &PodPath) -> PodFsResult<()> {
        let meta = self.load_file_meta(path).await?;
        let list = match self.load_block_list(&meta).await {
            Ok(list) => list,
            Err(e) => {
                warn!("load block list of {} failed, skip block deletes: {}", path, e);
                BlockList::default()
            }
        };

        let mut tasks = OrderedTasks::new(self.pool.clone());
        for (index, info) in list.blocks.into_iter().enumerate() {
            let blocks = self.blocks.clone();
            let path = path.clone();
            tasks
                .spawn(index, async move {
                    if let Err(e) = blocks.delete(&info.reference).await {
                        warn!("delete {} of {} failed, skip: {}", info.name, path, e);
                    }
                    Ok(())
                })
                .await?;
        }
        tasks.finish().await?;

        if let Some(reference) = &meta.block_list_ref {
            if let Err(e) = self.blocks.delete(reference).await {
                warn!("delete block list of {} failed, skip: {}", path, e);
            }
        }

        self.cache.remove(path);
        self.feeds.tombstone(&Topic::from_path(path)).await?;
        info!("removed file {}", path);
        Ok(())
    }

    /// Move the metadata of a single file to `new_path`. The content is not
    /// touched, and the old topic no longer resolves afterwards.
    pub async fn rename_file(
        &self,
        old_path: &PodPath,
        new_path: &PodPath,
    ) -> PodFsResult<FileMetadata> {
        let Some((new_parent, new_name)) = new_path.split_parent_name() else {
            return Err(PodFsError::InvalidParam(format!(
                "cannot rename {} to {}",
                old_path, new_path
            )));
        };
        validate_name(&new_name, self.config.max_name_length)?;

        let mut meta = self.load_file_meta(old_path).await?;
        meta.file_path = new_parent.to_string();
        meta.file_name = new_name;
        self.feeds
            .put_new(&Topic::from_path(new_path), &encode_record(&meta)?)
            .await?;
        self.feeds
            .tombstone_and_remove(&Topic::from_path(old_path))
            .await?;
        self.cache.remove(old_path);
        self.cache.put(&meta);
        debug!("moved file {} -> {}", old_path, new_path);
        Ok(meta)
    }

    /// Resolve the metadata of many files concurrently. Files that vanished
    /// or were deleted in the meantime are skipped.
    pub async fn list_files(&self, paths: &[PodPath]) -> PodFsResult<Vec<FileMetadata>> {
        let mut tasks = OrderedTasks::new(self.pool.clone());
        for (index, path) in paths.iter().cloned().enumerate() {
            let engine = self.clone();
            tasks
                .spawn(index, async move {
                    match engine.load_file_meta(&path).await {
                        Ok(meta) => Ok(Some(meta)),
                        Err(e) if e.is_not_found() || e.is_deleted() => {
                            warn!("listed file {} unavailable: {}", path, e);
                            Ok(None)
                        }
                        Err(e) => Err(e),
                    }
                })
                .await?;
        }
        Ok(tasks.finish().await?.into_iter().flatten().collect())
    }
}

/// Fill `buf` as far as the reader allows. A short count means EOF.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> PodFsResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn copy_range(reader: &mut BlockReader, len: u64, writer: &mut BlockWriter) -> PodFsResult<()> {
    let mut remaining = len;
    let mut buf = vec![0u8; COPY_BUF_LEN];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(PodFsError::DecodeError(format!(
                "stored content ended {} bytes early",
                remaining
            )));
        }
        writer.write(&buf[..n]).await?;
        remaining -= n as u64;
    }
    Ok(())
}
