use futures::future::{BoxFuture, FutureExt};
use log::{debug, warn};
use podfs_lib::{
    decompress, BlockClient, BlockInfo, BlockList, Compression, PodFsError, PodFsResult,
};
use std::collections::HashMap;
use std::future::Future;
use std::io::SeekFrom;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

type LoadingFuture = BoxFuture<'static, PodFsResult<Vec<u8>>>;

#[derive(Default, Clone)]
pub struct BlockReaderOptions {
    /// Keep decompressed blocks around, keyed by block index.
    pub cache_blocks: bool,
    pub compression: Compression,
    pub block_size: u64,
}

impl BlockReaderOptions {
    pub fn with_cache(mut self, cache_blocks: bool) -> Self {
        self.cache_blocks = cache_blocks;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }
}

#[derive(Clone)]
struct BlockSlot {
    info: BlockInfo,
    start: u64,
}

struct LoadedBlock {
    index: usize,
    data: Arc<Vec<u8>>,
}

/// Sequential, seekable reader over the blocks of one file.
///
/// Blocks are fetched lazily, one at a time, and decompressed before being
/// served. A decompressed length that disagrees with the recorded size is
/// adopted as that block's effective length.
pub struct BlockReader {
    blocks: BlockClient,
    compression: Compression,
    block_size: u64,

    slots: Vec<BlockSlot>,
    total_size: u64,
    position: u64,

    current: Option<LoadedBlock>,
    pending_seek: Option<u64>,
    loading_index: Option<usize>,
    loading_future: Option<LoadingFuture>,
    cache: Option<HashMap<usize, Arc<Vec<u8>>>>,
}

impl BlockReader {
    pub fn new(blocks: BlockClient, list: BlockList, options: BlockReaderOptions) -> Self {
        let mut slots = Vec::with_capacity(list.blocks.len());
        let mut start = 0u64;
        for info in list.blocks {
            let size = info.size;
            slots.push(BlockSlot { info, start });
            start = start.saturating_add(size);
        }

        Self {
            blocks,
            compression: options.compression,
            block_size: options.block_size,
            slots,
            total_size: start,
            position: 0,
            current: None,
            pending_seek: None,
            loading_index: None,
            loading_future: None,
            cache: if options.cache_blocks {
                Some(HashMap::new())
            } else {
                None
            },
        }
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn block_count(&self) -> usize {
        self.slots.len()
    }

    fn calc_seek_target(&self, seek_from: SeekFrom) -> PodFsResult<u64> {
        let target = match seek_from {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.position as i128 + delta as i128,
            SeekFrom::End(delta) => self.total_size as i128 + delta as i128,
        };

        if target < 0 {
            return Err(PodFsError::InvalidParam(format!(
                "seek target {} before start of file",
                target
            )));
        }
        if target > self.total_size as i128 {
            return Err(PodFsError::OffsetTooLarge(format!(
                "seek target {} past EOF {}",
                target, self.total_size
            )));
        }

        Ok(target as u64)
    }

    fn apply_seek_target(&mut self, position: u64) {
        self.position = position;
        self.pending_seek = None;
        self.loading_future = None;
        self.loading_index = None;
        if let Some(current) = &self.current {
            if !self.block_covers(current.index, current.data.len(), position) {
                self.current = None;
            }
        }
    }

    /// Move to an absolute offset without going through `AsyncSeek`.
    pub fn seek_to(&mut self, position: u64) -> PodFsResult<u64> {
        let target = self.calc_seek_target(SeekFrom::Start(position))?;
        self.apply_seek_target(target);
        Ok(target)
    }

    fn block_covers(&self, index: usize, len: usize, position: u64) -> bool {
        let start = self.slots[index].start;
        position >= start && position < start + len as u64
    }

    fn locate_position(&self, position: u64) -> usize {
        if position >= self.total_size || self.slots.is_empty() {
            return self.slots.len();
        }

        let mut left = 0usize;
        let mut right = self.slots.len();
        while left < right {
            let mid = left + (right - left) / 2;
            let slot = &self.slots[mid];
            if slot.start.saturating_add(slot.info.size) <= position {
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        left
    }

    fn load_block(&self, index: usize) -> impl Future<Output = PodFsResult<Vec<u8>>> + Send + 'static {
        let blocks = self.blocks.clone();
        let compression = self.compression.clone();
        let block_size = self.block_size;
        let info = self.slots[index].info.clone();
        async move {
            let packed = blocks.download(&info.reference).await?;
            let data = tokio::task::spawn_blocking(move || {
                decompress(&packed, &compression, block_size)
            })
            .await
            .map_err(|e| PodFsError::Internal(format!("decompress task failed: {}", e)))??;
            if data.len() as u64 != info.size {
                warn!(
                    "block {} decoded to {} bytes, recorded {}",
                    info.name,
                    data.len(),
                    info.size
                );
            }
            Ok(data)
        }
    }

    fn install_block(&mut self, index: usize, data: Arc<Vec<u8>>) -> PodFsResult<()> {
        if !self.block_covers(index, data.len(), self.position) {
            return Err(PodFsError::DecodeError(format!(
                "block {} holds {} bytes, cannot serve offset {}",
                index,
                data.len(),
                self.position
            )));
        }
        if let Some(cache) = self.cache.as_mut() {
            cache.insert(index, data.clone());
        }
        self.current = Some(LoadedBlock { index, data });
        Ok(())
    }

    fn cached_block(&self, index: usize) -> Option<Arc<Vec<u8>>> {
        self.cache.as_ref().and_then(|c| c.get(&index).cloned())
    }

    /// Copy from the current block into `out`, advancing the position.
    fn copy_out(&mut self, out: &mut [u8]) -> usize {
        let Some(current) = &self.current else {
            return 0;
        };
        let start = self.slots[current.index].start;
        let offset = (self.position - start) as usize;
        let available = &current.data[offset..];
        let remaining_in_file = (self.total_size - self.position) as usize;
        let n = available.len().min(out.len()).min(remaining_in_file);
        out[..n].copy_from_slice(&available[..n]);
        self.position += n as u64;
        n
    }

    fn current_covers_position(&self) -> bool {
        match &self.current {
            Some(current) => self.block_covers(current.index, current.data.len(), self.position),
            None => false,
        }
    }

    async fn ensure_current(&mut self) -> PodFsResult<()> {
        if self.current_covers_position() {
            return Ok(());
        }
        let index = self.locate_position(self.position);
        let data = match self.cached_block(index) {
            Some(data) => data,
            None => Arc::new(self.load_block(index).await?),
        };
        self.install_block(index, data)
    }

    /// Read up to and including the next `\n`. Returns `None` at EOF.
    pub async fn read_line(&mut self) -> PodFsResult<Option<String>> {
        if let Some(target) = self.pending_seek.take() {
            self.apply_seek_target(target);
        }

        let mut line = Vec::new();
        while self.position < self.total_size {
            self.ensure_current().await?;
            let Some(current) = &self.current else {
                break;
            };
            let start = self.slots[current.index].start;
            let offset = (self.position - start) as usize;
            let chunk = &current.data[offset..];
            match chunk.iter().position(|b| *b == b'\n') {
                Some(end) => {
                    line.extend_from_slice(&chunk[..=end]);
                    self.position += (end + 1) as u64;
                    return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
                }
                None => {
                    line.extend_from_slice(chunk);
                    self.position += chunk.len() as u64;
                }
            }
        }

        if line.is_empty() {
            debug!("read_line reached EOF at {}", self.position);
            Ok(None)
        } else {
            Ok(Some(String::from_utf8_lossy(&line).into_owned()))
        }
    }
}

impl std::fmt::Debug for BlockReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockReader")
            .field("blocks", &self.slots.len())
            .field("total_size", &self.total_size)
            .field("position", &self.position)
            .field("compression", &self.compression)
            .finish()
    }
}

impl AsyncRead for BlockReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        if this.pending_seek.is_some() {
            return Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "seek in progress, call poll_complete before read",
            )));
        }

        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            if this.position >= this.total_size {
                return Poll::Ready(Ok(()));
            }

            if this.current_covers_position() {
                let n = this.copy_out(buf.initialize_unfilled());
                buf.advance(n);
                return Poll::Ready(Ok(()));
            }

            let index = this.locate_position(this.position);
            if let Some(data) = this.cached_block(index) {
                this.install_block(index, data)?;
                continue;
            }

            if this.loading_index != Some(index) {
                this.loading_future = Some(this.load_block(index).boxed());
                this.loading_index = Some(index);
            }

            let Some(fut) = this.loading_future.as_mut() else {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "loading block future missing",
                )));
            };
            match fut.as_mut().poll(cx) {
                Poll::Ready(Ok(data)) => {
                    this.loading_future = None;
                    this.loading_index = None;
                    this.install_block(index, Arc::new(data))?;
                }
                Poll::Ready(Err(err)) => {
                    this.loading_future = None;
                    this.loading_index = None;
                    return Poll::Ready(Err(err.into()));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl AsyncSeek for BlockReader {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> std::io::Result<()> {
        let this = self.get_mut();
        let target = this.calc_seek_target(position)?;
        this.pending_seek = Some(target);
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<u64>> {
        let this = self.get_mut();
        if let Some(target) = this.pending_seek.take() {
            this.apply_seek_target(target);
        }

        Poll::Ready(Ok(this.position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podfs_lib::{compress, ContentRef, MemoryBlockStore};
    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    async fn build_reader(
        content: &[u8],
        block_size: usize,
        compression: Compression,
        cache: bool,
    ) -> (Arc<MemoryBlockStore>, BlockReader) {
        let store = Arc::new(MemoryBlockStore::new());
        let client = BlockClient::new(store.clone());
        let mut blocks = Vec::new();
        for (index, piece) in content.chunks(block_size).enumerate() {
            let packed = compress(piece, &compression, block_size as u64).unwrap();
            let reference = client.upload(&packed).await.unwrap();
            blocks.push(BlockInfo {
                name: format!("block-{}", index),
                size: piece.len() as u64,
                compressed_size: packed.len() as u64,
                reference,
            });
        }
        let options = BlockReaderOptions::default()
            .with_cache(cache)
            .with_compression(compression)
            .with_block_size(block_size as u64);
        let reader = BlockReader::new(client, BlockList::new(blocks), options);
        (store, reader)
    }

    #[tokio::test]
    async fn test_read_across_blocks() {
        let content: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let (_, mut reader) = build_reader(&content, 64, Compression::Gzip, false).await;
        assert_eq!(reader.block_count(), 16);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, content);
        assert_eq!(reader.position(), 1000);
    }

    #[tokio::test]
    async fn test_seek_then_read() {
        let content: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        let (_, mut reader) = build_reader(&content, 100, Compression::Snappy, false).await;

        reader.seek(SeekFrom::Start(150)).await.unwrap();
        let mut buf = [0u8; 100];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..], &content[150..250]);

        reader.seek(SeekFrom::End(-10)).await.unwrap();
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail).await.unwrap();
        assert_eq!(tail, &content[290..]);

        // seeking to EOF is allowed and reads nothing
        reader.seek(SeekFrom::Start(300)).await.unwrap();
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);

        let err = reader.seek(SeekFrom::Start(301)).await.unwrap_err();
        assert!(err.to_string().contains("past EOF"));
    }

    #[tokio::test]
    async fn test_read_line_with_cache() {
        let content = b"first line\nsecond line spans blocks\nlast".to_vec();
        let (store, mut reader) = build_reader(&content, 8, Compression::None, true).await;

        assert_eq!(reader.read_line().await.unwrap().unwrap(), "first line\n");
        assert_eq!(
            reader.read_line().await.unwrap().unwrap(),
            "second line spans blocks\n"
        );
        assert_eq!(reader.read_line().await.unwrap().unwrap(), "last");
        assert_eq!(reader.read_line().await.unwrap(), None);

        let fetched = store.download_count();
        reader.seek_to(0).unwrap();
        assert_eq!(reader.read_line().await.unwrap().unwrap(), "first line\n");
        assert_eq!(store.download_count(), fetched);
    }

    #[tokio::test]
    async fn test_missing_block_surfaces_error() {
        let store = Arc::new(MemoryBlockStore::new());
        let client = BlockClient::new(store);
        let list = BlockList::new(vec![BlockInfo {
            name: "block-0".to_string(),
            size: 4,
            compressed_size: 4,
            reference: ContentRef::from_content(b"gone"),
        }]);
        let mut reader = BlockReader::new(client, list, BlockReaderOptions::default());
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).await.is_err());
    }

    #[tokio::test]
    async fn test_reader_debug_shows_position() {
        let content = vec![1u8; 40];
        let (_, mut reader) = build_reader(&content, 16, Compression::None, false).await;
        reader.seek_to(20).unwrap();
        let shown = format!("{:?}", reader);
        assert!(shown.contains("blocks: 3"));
        assert!(shown.contains("position: 20"));

        // download results can be unwrapped on either side
        let failed: PodFsResult<BlockReader> = Err(PodFsError::NotFound("x".to_string()));
        assert!(failed.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_empty_list_is_eof() {
        let (_, mut reader) = build_reader(b"", 16, Compression::None, false).await;
        let mut out = Vec::new();
        assert_eq!(reader.read_to_end(&mut out).await.unwrap(), 0);
        assert_eq!(reader.read_line().await.unwrap(), None);
    }
}
