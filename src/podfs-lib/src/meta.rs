use crate::{Compression, ContentRef, PodFsError, PodFsResult, PodPath};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const META_VERSION: u8 = 2;

pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;
pub const PERMISSION_MASK: u32 = 0o7777;
pub const DEFAULT_DIR_MODE: u32 = S_IFDIR | 0o755;
pub const DEFAULT_FILE_MODE: u32 = S_IFREG | 0o644;

/// Keep the type bits of `current` and take the permission bits from `perm`.
pub fn apply_permission(current: u32, perm: u32) -> PodFsResult<u32> {
    if perm & !PERMISSION_MASK != 0 {
        return Err(PodFsError::InvalidParam(format!(
            "invalid permission bits {:o}",
            perm
        )));
    }
    Ok((current & S_IFMT) | perm)
}

pub fn encode_record<T: Serialize>(record: &T) -> PodFsResult<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| PodFsError::Internal(format!("encode record failed: {}", e)))
}

pub fn decode_record<T: DeserializeOwned>(data: &[u8]) -> PodFsResult<T> {
    serde_json::from_slice(data).map_err(|e| PodFsError::DecodeError(format!("decode record failed: {}", e)))
}

/// Per-file metadata, stored in the feed at `Topic::from_path(full_path)`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FileMetadata {
    pub version: u8,
    pub owner: String,
    pub pod_name: String,
    /// Parent directory path.
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub block_size: u64,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub compression: Compression,
    pub creation_time: i64,
    pub access_time: i64,
    pub modification_time: i64,
    pub mode: u32,
    /// Blob holding the serialized [`BlockList`]; `None` until content is stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_list_ref: Option<ContentRef>,
}

impl FileMetadata {
    pub fn full_path(&self) -> PodPath {
        PodPath::new(&self.file_path).join(&self.file_name)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BlockInfo {
    pub name: String,
    pub size: u64,
    pub compressed_size: u64,
    pub reference: ContentRef,
}

/// Ordered block list of a file; list order is byte order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct BlockList {
    pub blocks: Vec<BlockInfo>,
}

impl BlockList {
    pub fn new(blocks: Vec<BlockInfo>) -> Self {
        Self { blocks }
    }

    pub fn total_size(&self) -> u64 {
        self.blocks.iter().map(|b| b.size).sum()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Sizes must add up to `file_size` and every block but the last must be
    /// exactly `block_size` long.
    pub fn check_layout(&self, file_size: u64, block_size: u64) -> PodFsResult<()> {
        let total = self.total_size();
        if total != file_size {
            return Err(PodFsError::DecodeError(format!(
                "block list covers {} bytes, file declares {}",
                total, file_size
            )));
        }
        let count = self.blocks.len();
        for (index, block) in self.blocks.iter().enumerate() {
            let last = index + 1 == count;
            if (!last && block.size != block_size) || block.size > block_size || block.size == 0 {
                return Err(PodFsError::DecodeError(format!(
                    "block {} has size {}, block size is {}",
                    index, block.size, block_size
                )));
            }
        }
        Ok(())
    }
}

/// One child of a directory, tagged by kind.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DirEntry {
    #[serde(rename = "file")]
    File(String),
    #[serde(rename = "dir")]
    Directory(String),
}

impl DirEntry {
    pub fn name(&self) -> &str {
        match self {
            DirEntry::File(name) | DirEntry::Directory(name) => name,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, DirEntry::File(_))
    }

    pub fn new(name: impl Into<String>, is_file: bool) -> Self {
        if is_file {
            DirEntry::File(name.into())
        } else {
            DirEntry::Directory(name.into())
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DirMetadata {
    pub version: u8,
    /// Parent directory path; empty for the root.
    pub path: String,
    pub name: String,
    pub creation_time: i64,
    pub access_time: i64,
    pub modification_time: i64,
    pub mode: u32,
}

/// Directory record, stored in the feed at `Topic::from_path(full_path)`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DirNode {
    pub meta: DirMetadata,
    #[serde(default)]
    pub entries: Vec<DirEntry>,
}

impl DirNode {
    pub fn new(parent: Option<&PodPath>, name: &str, mode: u32, now: i64) -> Self {
        Self {
            meta: DirMetadata {
                version: META_VERSION,
                path: parent.map(|p| p.to_string()).unwrap_or_default(),
                name: name.to_string(),
                creation_time: now,
                access_time: now,
                modification_time: now,
                mode,
            },
            entries: Vec::new(),
        }
    }

    pub fn full_path(&self) -> PodPath {
        if self.meta.path.is_empty() {
            PodPath::root()
        } else {
            PodPath::new(&self.meta.path).join(&self.meta.name)
        }
    }

    pub fn find(&self, name: &str) -> Option<&DirEntry> {
        self.entries.iter().find(|e| e.name() == name)
    }

    /// Append an entry. Names are unique regardless of kind, so a second
    /// entry with the same name is refused.
    pub fn add_entry(&mut self, entry: DirEntry) -> PodFsResult<()> {
        if let Some(existing) = self.find(entry.name()) {
            return Err(PodFsError::AlreadyExists(format!(
                "{:?} already listed in {}",
                existing,
                self.full_path()
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Remove an entry, keeping the order of the others. Returns whether
    /// anything was removed.
    pub fn remove_entry(&mut self, entry: &DirEntry) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e != entry);
        before != self.entries.len()
    }

    pub fn file_count(&self) -> u64 {
        self.entries.iter().filter(|e| e.is_file()).count() as u64
    }

    pub fn dir_count(&self) -> u64 {
        self.entries.iter().filter(|e| !e.is_file()).count() as u64
    }
}
