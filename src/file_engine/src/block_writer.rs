use log::debug;
use podfs_lib::{
    compress, BlockClient, BlockInfo, BlockList, Compression, OrderedTasks, PodFsError,
    PodFsResult, WorkerPool,
};
use std::collections::BTreeMap;

pub fn block_name(index: usize) -> String {
    format!("block-{:05}", index)
}

/// Re-chunks a byte stream into fixed-size blocks and stores them through the
/// worker pool. Unchanged blocks of an older list can be spliced in with
/// [`BlockWriter::reuse`] as long as the stream sits on a block boundary.
///
/// Dropping the writer aborts every upload still in flight.
pub(crate) struct BlockWriter {
    tasks: OrderedTasks<BlockInfo>,
    reused: BTreeMap<usize, BlockInfo>,
    blocks: BlockClient,
    compression: Compression,
    block_size: u64,
    pending: Vec<u8>,
    next_index: usize,
}

impl BlockWriter {
    pub fn new(
        pool: WorkerPool,
        blocks: BlockClient,
        compression: Compression,
        block_size: u64,
    ) -> Self {
        Self {
            tasks: OrderedTasks::new(pool),
            reused: BTreeMap::new(),
            blocks,
            compression,
            block_size,
            pending: Vec::with_capacity(block_size as usize),
            next_index: 0,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub async fn write(&mut self, mut data: &[u8]) -> PodFsResult<()> {
        let block_size = self.block_size as usize;
        while !data.is_empty() {
            let take = (block_size - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() == block_size {
                let block = std::mem::replace(&mut self.pending, Vec::with_capacity(block_size));
                self.submit(block).await?;
            }
        }
        Ok(())
    }

    /// Append an already stored block without uploading it again.
    pub fn reuse(&mut self, info: BlockInfo) -> PodFsResult<()> {
        if !self.pending.is_empty() {
            return Err(PodFsError::Internal(format!(
                "cannot reuse block {} with {} bytes pending",
                info.name,
                self.pending.len()
            )));
        }
        self.reused.insert(self.next_index, info);
        self.next_index += 1;
        Ok(())
    }

    async fn submit(&mut self, data: Vec<u8>) -> PodFsResult<()> {
        let index = self.next_index;
        self.next_index += 1;

        let blocks = self.blocks.clone();
        let compression = self.compression.clone();
        let block_size = self.block_size;
        self.tasks
            .spawn(index, async move {
                let size = data.len() as u64;
                let packed = tokio::task::spawn_blocking(move || {
                    compress(&data, &compression, block_size)
                })
                .await
                .map_err(|e| PodFsError::Internal(format!("compress task failed: {}", e)))??;
                let reference = blocks.upload(&packed).await?;
                debug!(
                    "stored block {} ({} -> {} bytes) as {}",
                    index,
                    size,
                    packed.len(),
                    reference
                );
                Ok(BlockInfo {
                    name: block_name(index),
                    size,
                    compressed_size: packed.len() as u64,
                    reference,
                })
            })
            .await
    }

    /// Flush the trailing partial block and wait for every upload. The list
    /// comes back in stream order with names renumbered.
    pub async fn finish(mut self) -> PodFsResult<BlockList> {
        if !self.pending.is_empty() {
            let block = std::mem::take(&mut self.pending);
            self.submit(block).await?;
        }

        let mut uploaded = self.tasks.finish_indexed().await?;
        let mut blocks = Vec::with_capacity(self.next_index);
        for index in 0..self.next_index {
            let Some(mut info) = self
                .reused
                .remove(&index)
                .or_else(|| uploaded.remove(&index))
            else {
                return Err(PodFsError::Internal(format!("block {} missing", index)));
            };
            info.name = block_name(index);
            blocks.push(info);
        }
        Ok(BlockList::new(blocks))
    }

    pub fn abort(self) {
        self.tasks.abort();
    }
}
